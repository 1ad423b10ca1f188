use crate::id::ResourceId;
use crate::model::ModelMessage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
	Created,
	Deleted,
	Updated,
	/// One side of a rename whose direction the backend did not report.
	/// Resolved against the filesystem when applied.
	Renamed,
}

impl ChangeKind {
	/// Map a raw notify event kind; access and unknown events carry no change.
	pub fn from_notify(kind: &notify::EventKind) -> Option<Self> {
		use notify::event::{ModifyKind, RenameMode};
		match kind {
			notify::EventKind::Create(_) => Some(ChangeKind::Created),
			notify::EventKind::Remove(_) => Some(ChangeKind::Deleted),
			notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
				Some(ChangeKind::Deleted)
			}
			notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
				Some(ChangeKind::Created)
			}
			notify::EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
			notify::EventKind::Modify(_) => Some(ChangeKind::Updated),
			_ => None,
		}
	}
}

/// A change notification waiting to be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
	pub id: ResourceId,
	pub kind: ChangeKind,
	pub received_at: DateTime<Utc>,
}

impl PendingEvent {
	pub fn new(id: ResourceId, kind: ChangeKind) -> Self {
		Self { id, kind, received_at: Utc::now() }
	}
}

/// FIFO of change notifications shared between notifier callbacks and the
/// model's owner thread.
///
/// Cloning yields another handle to the same queue. The first push after the
/// owner last took the events wakes it through the model's message channel;
/// later pushes ride on that wake-up. The owner drains on its own schedule.
#[derive(Clone, Default)]
pub struct WatchEventQueue {
	events: Arc<Mutex<VecDeque<PendingEvent>>>,
	/// Set while a wake-up is outstanding; cleared when the owner takes the events
	wake_pending: Arc<AtomicBool>,
	waker: Option<Sender<ModelMessage>>,
}

impl WatchEventQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn with_waker(waker: Sender<ModelMessage>) -> Self {
		Self { waker: Some(waker), ..Default::default() }
	}

	pub fn push(&self, id: ResourceId, kind: ChangeKind) {
		trace!("Queueing {:?} for {}", kind, id);
		let wake = {
			let mut events = self.events.lock();
			events.push_back(PendingEvent::new(id, kind));
			!self.wake_pending.swap(true, Ordering::AcqRel)
		};
		if wake {
			self.wake();
		}
	}

	/// Queue a rename as Deleted(old) followed by Created(new). Both land under
	/// one lock so no other event can slip between them.
	pub fn push_rename(&self, old: ResourceId, new: ResourceId) {
		trace!("Queueing rename {} -> {}", old, new);
		let wake = {
			let mut events = self.events.lock();
			events.push_back(PendingEvent::new(old, ChangeKind::Deleted));
			events.push_back(PendingEvent::new(new, ChangeKind::Created));
			!self.wake_pending.swap(true, Ordering::AcqRel)
		};
		if wake {
			self.wake();
		}
	}

	/// Whether any event is waiting
	pub fn has_pending(&self) -> bool {
		!self.events.lock().is_empty()
	}

	pub fn len(&self) -> usize {
		self.events.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.lock().is_empty()
	}

	pub fn pop(&self) -> Option<PendingEvent> {
		let mut events = self.events.lock();
		let event = events.pop_front();
		if events.is_empty() {
			self.wake_pending.store(false, Ordering::Release);
		}
		event
	}

	/// Take everything queued so far, in arrival order
	pub fn take_all(&self) -> Vec<PendingEvent> {
		let mut events = self.events.lock();
		self.wake_pending.store(false, Ordering::Release);
		events.drain(..).collect()
	}

	/// Drop all queued events. Returns how many were discarded.
	pub fn clear(&self) -> usize {
		let mut events = self.events.lock();
		self.wake_pending.store(false, Ordering::Release);
		let discarded = events.len();
		events.clear();
		discarded
	}

	fn wake(&self) {
		let Some(waker) = &self.waker else {
			return;
		};
		match waker.try_send(ModelMessage::WatchEventsPending) {
			Ok(()) => {}
			// The owner has messages to process and checks the queue after each one.
			Err(TrySendError::Full(_)) => trace!("Model channel full, wake-up deferred"),
			// The model is gone; nothing left to wake.
			Err(TrySendError::Closed(_)) => {}
		}
	}
}
