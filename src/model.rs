//! The directory view model
//!
//! A [`ViewModel`] shows the direct children of one root directory. It owns
//! the node cache, the adapter, the reconciler and the running traversal, and
//! is driven from a single owner task: background traversal batches and watch
//! notifications arrive as messages on an internal channel and are applied
//! only when the owner calls [`ViewModel::process_pending`],
//! [`ViewModel::process_next`] or [`ViewModel::run_until_idle`].

use crate::adapter::{CellValue, Column, ColumnProvider, ViewAdapter, ViewSink};
use crate::backend::{Collaborators, SchemeRegistry};
use crate::cache::NodeCache;
use crate::config::{EventPolicy, ViewModelConfig};
use crate::error::Result;
use crate::id::ResourceId;
use crate::node::FileNode;
use crate::queue::WatchEventQueue;
use crate::reconciler::{ReconcileTarget, Reconciler, ReconcilerStats};
use crate::sort::SortSpec;
use crate::traversal::{DiscoveredEntry, TraversalSession};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Whether a traversal is feeding the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
	Idle,
	Busy,
}

/// Work handed to the owner task
#[derive(Debug)]
pub(crate) enum ModelMessage {
	Batch { session: Uuid, entries: Vec<DiscoveredEntry> },
	TraversalFinished { session: Uuid, discovered: usize, error: Option<String> },
	WatchEventsPending,
}

pub struct ViewModel<S: ViewSink> {
	registry: SchemeRegistry,
	config: ViewModelConfig,
	root: Option<ResourceId>,
	collaborators: Option<Collaborators>,
	cache: NodeCache,
	adapter: ViewAdapter,
	reconciler: Reconciler,
	queue: WatchEventQueue,
	session: Option<TraversalSession>,
	state: ModelState,
	live_updates: bool,
	last_error: Option<String>,
	sink: S,
	tx: Sender<ModelMessage>,
	rx: Receiver<ModelMessage>,
}

impl<S: ViewSink> ViewModel<S> {
	pub fn new(registry: SchemeRegistry, config: ViewModelConfig, sink: S) -> Result<Self> {
		config.validate()?;
		let (tx, rx) = channel(config.message_capacity);
		Ok(Self {
			registry,
			adapter: ViewAdapter::new(config.initial_sort),
			reconciler: Reconciler::new(config.coalesce_updates),
			config,
			root: None,
			collaborators: None,
			cache: NodeCache::new(),
			queue: WatchEventQueue::with_waker(tx.clone()),
			session: None,
			state: ModelState::Idle,
			live_updates: false,
			last_error: None,
			sink,
			tx,
			rx,
		})
	}

	/// Show `root`. Any running traversal is cancelled, pending notifications
	/// are discarded, the current rows are removed, and a new traversal and
	/// watch are started. Setting the current root again does nothing.
	pub fn set_root(&mut self, root: ResourceId) -> Result<()> {
		if self.root.as_ref() == Some(&root) {
			debug!("Root {} is already shown", root);
			return Ok(());
		}
		let collaborators = self.registry.resolve(&root)?;

		self.teardown();
		info!("Switching view root to {}", root);
		self.root = Some(root.clone());
		self.collaborators = Some(collaborators);
		self.sink.root_changed(&root);
		self.start();
		Ok(())
	}

	/// Re-list the current root from scratch
	pub fn refresh(&mut self) {
		if self.root.is_none() {
			return;
		}
		self.teardown();
		self.start();
	}

	/// Stop everything and forget the root
	pub fn clear(&mut self) {
		self.teardown();
		self.root = None;
		self.collaborators = None;
	}

	pub fn root(&self) -> Option<&ResourceId> {
		self.root.as_ref()
	}

	pub fn row_count(&self) -> usize {
		self.cache.len()
	}

	pub fn node_at(&self, row: usize) -> Option<Arc<FileNode>> {
		self.cache.node_at(row)
	}

	pub fn node(&self, id: &ResourceId) -> Option<Arc<FileNode>> {
		self.cache.get(id)
	}

	pub fn row_of(&self, id: &ResourceId) -> Option<usize> {
		self.cache.row_of(id)
	}

	/// Identifiers in row order
	pub fn ordered_ids(&self) -> &[ResourceId] {
		self.cache.ordered_ids()
	}

	pub fn data(&self, row: usize, column: &Column) -> Option<CellValue> {
		self.adapter.data(&self.cache, row, column)
	}

	pub fn columns(&self) -> Vec<Column> {
		self.adapter.columns()
	}

	pub fn register_column(&mut self, provider: Box<dyn ColumnProvider>) {
		self.adapter.register_column(provider);
	}

	pub fn sort(&self) -> Option<SortSpec> {
		self.adapter.sort()
	}

	/// Change the active sort; rows are re-ordered in place.
	pub fn set_sort(&mut self, sort: Option<SortSpec>) {
		if self.adapter.set_sort(&mut self.cache, sort, &mut self.sink) {
			debug!("Sort changed to {:?}", sort);
		}
	}

	pub fn state(&self) -> ModelState {
		self.state
	}

	/// False when the root could not be watched and the rows are a snapshot
	pub fn live_updates(&self) -> bool {
		self.live_updates
	}

	/// Error reported by the last traversal, if it could not list the root
	pub fn last_error(&self) -> Option<&str> {
		self.last_error.as_deref()
	}

	pub fn is_traversal_finished(&self) -> bool {
		self.session.as_ref().map_or(true, TraversalSession::is_finished)
	}

	/// Handle to the notification queue feeding this model
	pub fn event_queue(&self) -> WatchEventQueue {
		self.queue.clone()
	}

	pub fn reconciler_stats(&self) -> &ReconcilerStats {
		self.reconciler.stats()
	}

	pub fn config(&self) -> &ViewModelConfig {
		&self.config
	}

	pub fn cache(&self) -> &NodeCache {
		&self.cache
	}

	pub fn sink(&self) -> &S {
		&self.sink
	}

	pub fn sink_mut(&mut self) -> &mut S {
		&mut self.sink
	}

	/// Apply every message that has already arrived, without waiting.
	/// Returns how many were handled.
	pub fn process_pending(&mut self) -> usize {
		let mut handled = 0;
		while let Ok(message) = self.rx.try_recv() {
			self.handle(message);
			handled += 1;
		}
		handled
	}

	/// Wait for the next message and apply it
	pub async fn process_next(&mut self) -> bool {
		match self.rx.recv().await {
			Some(message) => {
				self.handle(message);
				true
			}
			None => false,
		}
	}

	/// Keep applying messages until the traversal has finished and no
	/// notification is waiting, or until `timeout` passes. Returns true if the
	/// model went idle in time.
	pub async fn run_until_idle(&mut self, timeout: Duration) -> bool {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			self.process_pending();
			if self.is_settled() {
				return true;
			}
			match tokio::time::timeout_at(deadline, self.rx.recv()).await {
				Ok(Some(message)) => self.handle(message),
				Ok(None) => return false,
				Err(_) => {
					debug!("Model did not settle within {:?}", timeout);
					return false;
				}
			}
		}
	}

	fn is_settled(&self) -> bool {
		self.is_traversal_finished() && self.queue.is_empty()
	}

	fn handle(&mut self, message: ModelMessage) {
		match message {
			ModelMessage::Batch { session, entries } => {
				if self.is_current(session) {
					self.commit_batch(entries);
				} else {
					trace!("Discarding {} entries from stale traversal {}", entries.len(), session);
				}
			}
			ModelMessage::TraversalFinished { session, discovered, error } => {
				if self.is_current(session) {
					self.finish_traversal(discovered, error);
				} else {
					trace!("Ignoring completion of stale traversal {}", session);
				}
			}
			ModelMessage::WatchEventsPending => {}
		}
		// The queue only wakes the owner once per drain, and that wake-up is
		// dropped when the channel is full, so look after every message.
		if self.queue.has_pending() {
			self.drain_events();
		}
	}

	fn is_current(&self, session: Uuid) -> bool {
		self.session.as_ref().is_some_and(|current| current.id() == session)
	}

	fn commit_batch(&mut self, entries: Vec<DiscoveredEntry>) {
		let traversal_in_flight = !self.is_traversal_finished();
		if let Some(added) = self.reconcile(traversal_in_flight, |reconciler, target| {
			reconciler.merge_batch(entries, target)
		}) {
			trace!("Committed {} rows, {} total", added, self.cache.len());
		}
	}

	fn finish_traversal(&mut self, discovered: usize, error: Option<String>) {
		if let Some(session) = self.session.as_mut() {
			session.mark_finished();
			info!(
				"Traversal of {} finished: {} entries in {:?}",
				session.root(),
				discovered,
				session.elapsed()
			);
		}
		if let Some(e) = &error {
			warn!("Traversal ended with an error: {}", e);
		}
		self.last_error = error;
		self.reconciler.clear_tombstones();
		self.set_state(ModelState::Idle);
		if self.config.event_policy == EventPolicy::AfterTraversal {
			self.drain_events();
		}
	}

	fn drain_events(&mut self) {
		let traversal_in_flight = !self.is_traversal_finished();
		if traversal_in_flight && self.config.event_policy == EventPolicy::AfterTraversal {
			trace!("Holding {} events until traversal finishes", self.queue.len());
			return;
		}
		let queue = self.queue.clone();
		match self.reconcile(traversal_in_flight, |reconciler, target| reconciler.drain(&queue, target)) {
			Some(0) => {}
			Some(applied) => debug!("Applied {} change notifications", applied),
			None => {
				queue.clear();
			}
		}
	}

	/// Run one reconciliation step against the current root. `None` when no
	/// root is shown.
	fn reconcile<R>(
		&mut self, traversal_in_flight: bool,
		step: impl FnOnce(&mut Reconciler, &mut ReconcileTarget<'_>) -> R,
	) -> Option<R> {
		let root = self.root.as_ref()?;
		let collaborators = self.collaborators.as_ref()?;
		let mut target = ReconcileTarget {
			root,
			cache: &mut self.cache,
			adapter: &self.adapter,
			metadata: &*collaborators.metadata,
			notifier: &*collaborators.notifier,
			sink: &mut self.sink,
			traversal_in_flight,
		};
		Some(step(&mut self.reconciler, &mut target))
	}

	/// Watch the root and start listing it
	fn start(&mut self) {
		let (Some(root), Some(collaborators)) = (self.root.clone(), self.collaborators.clone())
		else {
			return;
		};

		match collaborators.notifier.watch(&root, self.queue.clone()) {
			Ok(()) => self.live_updates = true,
			Err(e) => {
				warn!("Live updates unavailable for {}, showing a snapshot: {}", root, e);
				self.live_updates = false;
			}
		}

		self.last_error = None;
		self.session = Some(TraversalSession::spawn(
			root,
			collaborators.enumerator.clone(),
			collaborators.metadata.clone(),
			&self.config,
			self.tx.clone(),
		));
		self.set_state(ModelState::Busy);
	}

	/// Cancel the traversal, drop queued notifications and rows, release the watch
	fn teardown(&mut self) {
		if let Some(mut session) = self.session.take() {
			session.cancel();
		}
		let discarded = self.queue.clear();
		if discarded > 0 {
			debug!("Discarded {} pending change notifications", discarded);
		}
		self.reconciler.reset();
		self.adapter.clear(&mut self.cache, &mut self.sink);
		if let (Some(root), Some(collaborators)) = (&self.root, &self.collaborators) {
			collaborators.notifier.unwatch(root);
		}
		self.live_updates = false;
		self.set_state(ModelState::Idle);
	}

	fn set_state(&mut self, state: ModelState) {
		if self.state != state {
			self.state = state;
			self.sink.state_changed(state);
		}
	}
}

impl<S: ViewSink> Drop for ViewModel<S> {
	fn drop(&mut self) {
		if let Some(session) = self.session.as_mut() {
			session.cancel();
		}
		if let (Some(root), Some(collaborators)) = (&self.root, &self.collaborators) {
			collaborators.notifier.unwatch(root);
		}
	}
}
