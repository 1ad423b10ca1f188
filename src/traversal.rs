//! Background directory traversal
//!
//! A session lists one directory off the owner's thread and hands the results
//! to the owning model in batches. The enumerator runs on its own thread,
//! statting each child there, and feeds a batching thread that flushes when
//! the batch reaches the configured size or when the configured time window
//! has passed since the previous flush, whether or not the enumerator is
//! making progress. Whatever remains is flushed at the end, followed by a
//! completion message. A cancelled session sends nothing more.

use crate::backend::{Enumerator, MetadataProvider};
use crate::config::ViewModelConfig;
use crate::id::ResourceId;
use crate::model::ModelMessage;
use crate::node::FileMetadata;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Sender;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Upper bound on how long the batching thread waits before looking at the
/// cancellation flag again
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// A child found by traversal, already materialized
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredEntry {
	pub id: ResourceId,
	pub metadata: FileMetadata,
}

pub struct TraversalSession {
	id: Uuid,
	root: ResourceId,
	cancelled: Arc<AtomicBool>,
	finished: bool,
	started_at: Instant,
}

/// What the enumeration thread hands to the batching thread
enum Produced {
	Entry(DiscoveredEntry),
	/// The directory itself could not be opened
	Failed(String),
}

struct Producer {
	root: ResourceId,
	enumerator: Arc<dyn Enumerator>,
	metadata: Arc<dyn MetadataProvider>,
	cancelled: Arc<AtomicBool>,
}

struct Worker {
	session: Uuid,
	root: ResourceId,
	cancelled: Arc<AtomicBool>,
	time_window: Duration,
	max_entries: usize,
	tx: Sender<ModelMessage>,
}

impl TraversalSession {
	/// Start listing `root` in the background
	pub(crate) fn spawn(
		root: ResourceId, enumerator: Arc<dyn Enumerator>, metadata: Arc<dyn MetadataProvider>,
		config: &ViewModelConfig, tx: Sender<ModelMessage>,
	) -> Self {
		let id = Uuid::new_v4();
		let cancelled = Arc::new(AtomicBool::new(false));
		let max_entries = config.batch_max_entries.max(1);
		let producer = Producer {
			root: root.clone(),
			enumerator,
			metadata,
			cancelled: cancelled.clone(),
		};
		let worker = Worker {
			session: id,
			root: root.clone(),
			cancelled: cancelled.clone(),
			time_window: config.batch_time_window,
			max_entries,
			tx: tx.clone(),
		};

		info!("Starting traversal {} of {}", id, root);
		if let Err(e) = Self::start_threads(producer, worker, max_entries) {
			error!("Failed to spawn traversal threads for {}: {}", root, e);
			cancelled.store(true, Ordering::Release);
			let finished = ModelMessage::TraversalFinished {
				session: id,
				discovered: 0,
				error: Some(e.to_string()),
			};
			if tx.try_send(finished).is_err() {
				warn!("Could not report the failed traversal of {}", root);
			}
		}

		Self {
			id,
			root,
			cancelled,
			finished: false,
			started_at: Instant::now(),
		}
	}

	fn start_threads(producer: Producer, worker: Worker, capacity: usize) -> std::io::Result<()> {
		let (entries_tx, entries_rx) = std_mpsc::sync_channel(capacity);
		std::thread::Builder::new()
			.name("dirview-enumerator".to_string())
			.spawn(move || producer.run(entries_tx))?;
		std::thread::Builder::new()
			.name("dirview-traversal".to_string())
			.spawn(move || worker.run(entries_rx))?;
		Ok(())
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn root(&self) -> &ResourceId {
		&self.root
	}

	pub fn is_finished(&self) -> bool {
		self.finished
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}

	pub fn elapsed(&self) -> Duration {
		self.started_at.elapsed()
	}

	pub(crate) fn mark_finished(&mut self) {
		self.finished = true;
	}

	/// Ask the threads to stop. They are left to wind down on their own; the
	/// enumerator may be blocked and nothing sent afterwards is used.
	pub fn cancel(&mut self) {
		if !self.finished && !self.cancelled.swap(true, Ordering::AcqRel) {
			debug!("Cancelled traversal {} of {}", self.id, self.root);
		}
	}
}

impl Drop for TraversalSession {
	fn drop(&mut self) {
		if !self.finished {
			self.cancelled.store(true, Ordering::Release);
		}
	}
}

impl Producer {
	fn run(self, out: SyncSender<Produced>) {
		let children = match self.enumerator.list(&self.root) {
			Ok(children) => children,
			Err(e) => {
				let _ = out.send(Produced::Failed(e.to_string()));
				return;
			}
		};

		for child in children {
			if self.cancelled.load(Ordering::Acquire) {
				return;
			}
			match child {
				Ok(id) => match self.metadata.stat(&id) {
					Some(metadata) => {
						// The batching side hung up: cancelled or gone.
						if out.send(Produced::Entry(DiscoveredEntry { id, metadata })).is_err() {
							return;
						}
					}
					None => trace!("{} vanished before it could be read", id),
				},
				Err(e) => debug!("Skipping unreadable entry in {}: {}", self.root, e),
			}
		}
	}
}

impl Worker {
	fn run(self, entries: std_mpsc::Receiver<Produced>) {
		let mut staged: Vec<DiscoveredEntry> = Vec::new();
		let mut discovered = 0usize;
		let mut window_start = Instant::now();

		loop {
			if self.is_cancelled() {
				debug!("Traversal {} stopped after {} entries", self.session, discovered);
				return;
			}

			let wait = self.time_window.saturating_sub(window_start.elapsed()).min(CANCEL_POLL);
			match entries.recv_timeout(wait) {
				Ok(Produced::Entry(entry)) => staged.push(entry),
				Ok(Produced::Failed(e)) => {
					warn!("Cannot enumerate {}: {}", self.root, e);
					self.finish(discovered, Some(e));
					return;
				}
				Err(RecvTimeoutError::Timeout) => {}
				Err(RecvTimeoutError::Disconnected) => break,
			}

			let window_elapsed = window_start.elapsed() >= self.time_window;
			if staged.len() >= self.max_entries || (window_elapsed && !staged.is_empty()) {
				discovered += staged.len();
				if !self.flush(&mut staged) {
					return;
				}
				window_start = Instant::now();
			} else if window_elapsed {
				window_start = Instant::now();
			}
		}

		if self.is_cancelled() {
			return;
		}
		discovered += staged.len();
		if !staged.is_empty() && !self.flush(&mut staged) {
			return;
		}
		self.finish(discovered, None);
	}

	fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}

	/// Hand the staged entries over, waiting for room in the model's channel.
	/// Returns false when the session should stop.
	fn flush(&self, staged: &mut Vec<DiscoveredEntry>) -> bool {
		if self.is_cancelled() {
			return false;
		}
		let entries = std::mem::take(staged);
		trace!("Traversal {} flushing {} entries", self.session, entries.len());
		self.tx
			.blocking_send(ModelMessage::Batch { session: self.session, entries })
			.is_ok()
	}

	fn finish(&self, discovered: usize, error: Option<String>) {
		if self.is_cancelled() {
			return;
		}
		let _ = self.tx.blocking_send(ModelMessage::TraversalFinished {
			session: self.session,
			discovered,
			error,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::memory::MemoryFileSystem;
	use crate::backend::ChildIter;
	use tokio::sync::mpsc::{channel, Receiver};

	fn spawn(
		fs: &Arc<MemoryFileSystem>, root: &str, config: &ViewModelConfig,
	) -> (TraversalSession, Receiver<ModelMessage>) {
		let (tx, rx) = channel(4);
		let session = TraversalSession::spawn(fs.id(root), fs.clone(), fs.clone(), config, tx);
		(session, rx)
	}

	/// Collect batch sizes and names until the completion message
	fn collect(rx: &mut Receiver<ModelMessage>) -> (Vec<usize>, Vec<String>, usize, Option<String>) {
		let mut sizes = Vec::new();
		let mut names = Vec::new();
		while let Some(message) = rx.blocking_recv() {
			match message {
				ModelMessage::Batch { entries, .. } => {
					sizes.push(entries.len());
					names.extend(entries.iter().map(|e| e.id.file_name()));
				}
				ModelMessage::TraversalFinished { discovered, error, .. } => {
					return (sizes, names, discovered, error);
				}
				ModelMessage::WatchEventsPending => {}
			}
		}
		panic!("channel closed before traversal finished");
	}

	/// Yields the first entries at once, then blocks before the last one
	struct StallingEnumerator {
		ids: Vec<ResourceId>,
		ready: usize,
		stall: Duration,
	}

	impl Enumerator for StallingEnumerator {
		fn list(&self, _directory: &ResourceId) -> crate::error::Result<ChildIter> {
			let (ready, stall) = (self.ready, self.stall);
			Ok(Box::new(self.ids.clone().into_iter().enumerate().map(move |(i, id)| {
				if i == ready {
					std::thread::sleep(stall);
				}
				Ok(id)
			})))
		}
	}

	#[test]
	fn test_batches_by_count_in_discovery_order() {
		let fs = Arc::new(MemoryFileSystem::new("mem"));
		for name in ["e", "d", "c", "b", "a"] {
			fs.add_file(format!("/r/{name}"), 1);
		}
		let config = ViewModelConfig::with_batching(Duration::from_secs(60), 2);

		let (_session, mut rx) = spawn(&fs, "/r", &config);
		let (sizes, names, discovered, error) = collect(&mut rx);

		assert_eq!(sizes, vec![2, 2, 1]);
		assert_eq!(names, vec!["e", "d", "c", "b", "a"]);
		assert_eq!(discovered, 5);
		assert!(error.is_none());
	}

	#[test]
	fn test_time_window_flushes_small_batches() {
		let fs = Arc::new(MemoryFileSystem::new("mem"));
		for i in 0..4 {
			fs.add_file(format!("/r/f{i}"), 1);
		}
		fs.set_listing_delay(Some(Duration::from_millis(20)));
		let config = ViewModelConfig::with_batching(Duration::from_millis(5), 1000);

		let (_session, mut rx) = spawn(&fs, "/r", &config);
		let (sizes, _, discovered, _) = collect(&mut rx);

		assert!(sizes.len() > 1, "expected several time-bounded batches, got {sizes:?}");
		assert_eq!(discovered, 4);
	}

	#[test]
	fn test_time_window_flushes_while_enumerator_stalls() {
		let fs = Arc::new(MemoryFileSystem::new("mem"));
		let ids: Vec<ResourceId> = (0..4).map(|i| fs.add_file(format!("/r/f{i}"), 1)).collect();
		let enumerator = Arc::new(StallingEnumerator {
			ids,
			ready: 3,
			stall: Duration::from_secs(1),
		});
		let config = ViewModelConfig::with_batching(Duration::from_millis(15), 1000);
		let (tx, mut rx) = channel(4);

		let started = Instant::now();
		let _session = TraversalSession::spawn(fs.id("/r"), enumerator, fs.clone(), &config, tx);
		match rx.blocking_recv() {
			Some(ModelMessage::Batch { entries, .. }) => assert_eq!(entries.len(), 3),
			_ => panic!("expected a first batch"),
		}
		assert!(
			started.elapsed() < Duration::from_millis(500),
			"first batch waited for the stalled enumerator: {:?}",
			started.elapsed()
		);

		let (sizes, _, discovered, _) = collect(&mut rx);
		assert_eq!(sizes, vec![1]);
		assert_eq!(discovered, 4);
	}

	#[test]
	fn test_unreadable_directory_finishes_empty() {
		let fs = Arc::new(MemoryFileSystem::new("mem"));
		fs.add_file("/locked/secret", 1);
		fs.set_unreadable("/locked", true);

		let (_session, mut rx) = spawn(&fs, "/locked", &ViewModelConfig::default());
		let (sizes, _, discovered, error) = collect(&mut rx);

		assert!(sizes.is_empty());
		assert_eq!(discovered, 0);
		assert!(error.unwrap().contains("permission denied"));
	}

	#[test]
	fn test_cancelled_session_sends_nothing_more() {
		let fs = Arc::new(MemoryFileSystem::new("mem"));
		for i in 0..50 {
			fs.add_file(format!("/r/f{i}"), 1);
		}
		fs.set_listing_delay(Some(Duration::from_millis(2)));
		let config = ViewModelConfig::with_batching(Duration::from_secs(60), 5);

		let (mut session, mut rx) = spawn(&fs, "/r", &config);
		match rx.blocking_recv() {
			Some(ModelMessage::Batch { .. }) => {}
			_ => panic!("expected a first batch"),
		}
		session.cancel();
		assert!(session.is_cancelled());

		// Drain until the worker drops its sender; there must be no completion.
		let mut batches_after_cancel = 0;
		while let Some(message) = rx.blocking_recv() {
			match message {
				ModelMessage::Batch { .. } => batches_after_cancel += 1,
				ModelMessage::TraversalFinished { .. } => panic!("cancelled session finished"),
				ModelMessage::WatchEventsPending => {}
			}
		}
		// At most the batch that was already being sent when the flag flipped.
		assert!(batches_after_cancel <= 1);
	}

	#[test]
	fn test_full_channel_holds_the_worker_back() {
		let fs = Arc::new(MemoryFileSystem::new("mem"));
		for i in 0..20 {
			fs.add_file(format!("/r/f{i:02}"), 1);
		}
		let config = ViewModelConfig::with_batching(Duration::from_secs(60), 1);
		let (tx, mut rx) = channel(2);
		let observer = tx.clone();
		let _session = TraversalSession::spawn(fs.id("/r"), fs.clone(), fs.clone(), &config, tx);

		std::thread::sleep(Duration::from_millis(100));
		assert_eq!(observer.capacity(), 0);
		drop(observer);

		let (sizes, _, discovered, _) = collect(&mut rx);
		assert_eq!(discovered, 20);
		assert_eq!(sizes.len(), 20);
	}
}
