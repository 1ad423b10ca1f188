//! Merges change notifications with traversal results
//!
//! Both sources funnel through cache membership: a Created for a cached entry
//! is a no-op, and a batch entry that is already cached is skipped. Deletions
//! seen while a traversal is still running leave a tombstone so a batch
//! carrying the deleted entry cannot bring it back.

use crate::adapter::{ViewAdapter, ViewSink};
use crate::backend::{ChangeNotifier, MetadataProvider};
use crate::cache::NodeCache;
use crate::id::ResourceId;
use crate::node::{FileMetadata, FileNode};
use crate::queue::{ChangeKind, PendingEvent, WatchEventQueue};
use crate::traversal::DiscoveredEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, trace, warn};

/// Everything a reconciliation step may touch, borrowed from the model
pub struct ReconcileTarget<'a> {
	pub root: &'a ResourceId,
	pub cache: &'a mut NodeCache,
	pub adapter: &'a ViewAdapter,
	pub metadata: &'a dyn MetadataProvider,
	pub notifier: &'a dyn ChangeNotifier,
	pub sink: &'a mut dyn ViewSink,
	/// A traversal of `root` is still delivering batches
	pub traversal_in_flight: bool,
}

/// What applying one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Inserted { row: usize },
	Updated { row: usize },
	Removed { count: usize },
	Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
	/// Event for the view root itself
	Root,
	/// Parent is neither the root nor a cached directory
	OutOfView,
	/// Created for an entry already cached
	AlreadyCached,
	/// Updated or Deleted for an entry that is not cached
	NotCached,
	/// Created for an entry that could not be statted any more
	Vanished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerStats {
	pub events_applied: u64,
	pub events_ignored: u64,
	pub updates_coalesced: u64,
	pub batch_entries_committed: u64,
	pub batch_entries_skipped: u64,
}

#[derive(Debug, Default)]
pub struct Reconciler {
	coalesce_updates: bool,
	draining: bool,
	tombstones: HashSet<ResourceId>,
	stats: ReconcilerStats,
}

impl Reconciler {
	pub fn new(coalesce_updates: bool) -> Self {
		Self { coalesce_updates, ..Default::default() }
	}

	pub fn stats(&self) -> &ReconcilerStats {
		&self.stats
	}

	pub fn is_draining(&self) -> bool {
		self.draining
	}

	pub fn is_tombstoned(&self, id: &ResourceId) -> bool {
		self.tombstones.contains(id)
	}

	/// Forget deletions recorded against the running traversal
	pub fn clear_tombstones(&mut self) {
		if !self.tombstones.is_empty() {
			trace!("Clearing {} tombstones", self.tombstones.len());
			self.tombstones.clear();
		}
	}

	/// Drop per-root state when the view switches directories
	pub fn reset(&mut self) {
		self.tombstones.clear();
		self.draining = false;
	}

	/// Commit a traversal batch. Entries already cached or deleted while the
	/// traversal ran are skipped. Returns how many rows were added.
	pub fn merge_batch(
		&mut self, entries: Vec<DiscoveredEntry>, target: &mut ReconcileTarget<'_>,
	) -> usize {
		let total = entries.len();
		let nodes: Vec<FileNode> = entries
			.into_iter()
			.filter(|entry| !self.tombstones.contains(&entry.id))
			.map(|entry| FileNode::new(Some(target.root.clone()), entry.id, entry.metadata))
			.collect();

		let added = target.adapter.insert_batch(target.cache, nodes, target.sink);
		self.stats.batch_entries_committed += added as u64;
		self.stats.batch_entries_skipped += (total - added) as u64;
		if added < total {
			debug!("Skipped {} of {} batch entries already known to the view", total - added, total);
		}
		added
	}

	/// Apply everything queued, in arrival order, until the queue stays empty.
	///
	/// Events queued while draining (including from sink callbacks) are picked
	/// up by the same loop rather than by a nested drain. Returns the number of
	/// events applied.
	pub fn drain(&mut self, queue: &WatchEventQueue, target: &mut ReconcileTarget<'_>) -> usize {
		if self.draining {
			trace!("Drain already in progress");
			return 0;
		}
		self.draining = true;

		let mut applied = 0;
		loop {
			let events = queue.take_all();
			if events.is_empty() {
				break;
			}
			// Ids already refreshed in this batch; the stat taken then is current.
			let mut refreshed = HashSet::new();
			for event in events {
				if self.coalesce_updates {
					if event.kind == ChangeKind::Updated {
						if !refreshed.insert(event.id.clone()) {
							self.stats.updates_coalesced += 1;
							continue;
						}
					} else {
						refreshed.remove(&event.id);
					}
				}
				self.apply(&event, target);
				applied += 1;
			}
		}

		self.draining = false;
		applied
	}

	/// Apply one change notification
	pub fn apply(&mut self, event: &PendingEvent, target: &mut ReconcileTarget<'_>) -> Outcome {
		let outcome = self.apply_inner(event, target);
		match &outcome {
			Outcome::Ignored(reason) => {
				self.stats.events_ignored += 1;
				trace!("Ignored {:?} for {}: {:?}", event.kind, event.id, reason);
			}
			_ => self.stats.events_applied += 1,
		}
		outcome
	}

	fn apply_inner(&mut self, event: &PendingEvent, target: &mut ReconcileTarget<'_>) -> Outcome {
		let id = &event.id;
		if id == target.root {
			if event.kind == ChangeKind::Deleted {
				warn!("View root {} was deleted; keeping the current rows", id);
			}
			return Outcome::Ignored(IgnoreReason::Root);
		}

		let Some(parent) = id.parent() else {
			return Outcome::Ignored(IgnoreReason::OutOfView);
		};
		let in_view = &parent == target.root
			|| target.cache.get(&parent).is_some_and(|node| node.is_dir());
		if !in_view {
			return Outcome::Ignored(IgnoreReason::OutOfView);
		}

		match event.kind {
			ChangeKind::Created => {
				self.tombstones.remove(id);
				if target.cache.contains(id) {
					return Outcome::Ignored(IgnoreReason::AlreadyCached);
				}
				match target.metadata.stat(id) {
					Some(metadata) => self.insert(parent, id, metadata, target),
					None => Outcome::Ignored(IgnoreReason::Vanished),
				}
			}
			ChangeKind::Deleted => self.remove(id, target),
			ChangeKind::Updated => {
				if !target.cache.contains(id) {
					return Outcome::Ignored(IgnoreReason::NotCached);
				}
				match target.metadata.stat(id) {
					Some(metadata) => self.refresh(id, metadata, target),
					None => {
						debug!("{} is gone, removing its row", id);
						self.remove(id, target)
					}
				}
			}
			// Whichever side this was, the entry's presence now decides.
			ChangeKind::Renamed => match target.metadata.stat(id) {
				Some(metadata) if target.cache.contains(id) => self.refresh(id, metadata, target),
				Some(metadata) => {
					self.tombstones.remove(id);
					self.insert(parent, id, metadata, target)
				}
				None => self.remove(id, target),
			},
		}
	}

	fn insert(
		&mut self, parent: ResourceId, id: &ResourceId, metadata: FileMetadata,
		target: &mut ReconcileTarget<'_>,
	) -> Outcome {
		let node = FileNode::new(Some(parent), id.clone(), metadata);
		match target.adapter.insert_live(target.cache, node, target.sink) {
			Some(row) => Outcome::Inserted { row },
			None => Outcome::Ignored(IgnoreReason::AlreadyCached),
		}
	}

	fn remove(&mut self, id: &ResourceId, target: &mut ReconcileTarget<'_>) -> Outcome {
		if target.traversal_in_flight {
			self.tombstones.insert(id.clone());
		}
		let removed = target.adapter.remove(target.cache, id, target.sink);
		if removed.is_empty() {
			return Outcome::Ignored(IgnoreReason::NotCached);
		}
		for node in removed.iter().filter(|node| node.is_dir()) {
			target.notifier.unwatch(node.id());
			target.sink.watch_released(node.id());
		}
		Outcome::Removed { count: removed.len() }
	}

	fn refresh(
		&mut self, id: &ResourceId, metadata: FileMetadata, target: &mut ReconcileTarget<'_>,
	) -> Outcome {
		match target.adapter.update(target.cache, id, metadata, target.sink) {
			Some(row) => Outcome::Updated { row },
			None => Outcome::Ignored(IgnoreReason::NotCached),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adapter::{RecordingSink, ViewChange};
	use crate::backend::memory::MemoryFileSystem;
	use crate::sort::{SortKey, SortSpec};

	struct Fixture {
		fs: MemoryFileSystem,
		root: ResourceId,
		cache: NodeCache,
		adapter: ViewAdapter,
		sink: RecordingSink,
		reconciler: Reconciler,
	}

	impl Fixture {
		fn new() -> Self {
			let fs = MemoryFileSystem::new("mem");
			let root = fs.add_dir("/home/u");
			Self {
				fs,
				root,
				cache: NodeCache::new(),
				adapter: ViewAdapter::new(Some(SortSpec::default())),
				sink: RecordingSink::new(),
				reconciler: Reconciler::new(true),
			}
		}

		fn target(&mut self, traversal_in_flight: bool) -> ReconcileTarget<'_> {
			ReconcileTarget {
				root: &self.root,
				cache: &mut self.cache,
				adapter: &self.adapter,
				metadata: &self.fs,
				notifier: &self.fs,
				sink: &mut self.sink,
				traversal_in_flight,
			}
		}

		fn apply(&mut self, name: &str, kind: ChangeKind, in_flight: bool) -> Outcome {
			let event = PendingEvent::new(self.root.join(name), kind);
			let mut reconciler = std::mem::take(&mut self.reconciler);
			let outcome = reconciler.apply(&event, &mut self.target(in_flight));
			self.reconciler = reconciler;
			outcome
		}

		fn merge(&mut self, names: &[&str]) -> usize {
			let entries = names
				.iter()
				.map(|name| {
					let id = self.root.join(name);
					DiscoveredEntry {
						metadata: FileMetadata::file(*name, 1),
						id,
					}
				})
				.collect();
			let mut reconciler = std::mem::take(&mut self.reconciler);
			let added = reconciler.merge_batch(entries, &mut self.target(true));
			self.reconciler = reconciler;
			added
		}

		fn names(&self) -> Vec<String> {
			self.cache.ordered_ids().iter().map(|id| id.file_name()).collect()
		}
	}

	#[test]
	fn test_created_then_batch_does_not_duplicate() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/new.txt", 4);

		assert_eq!(
			fx.apply("new.txt", ChangeKind::Created, true),
			Outcome::Inserted { row: 0 }
		);
		assert_eq!(fx.merge(&["new.txt", "other.txt"]), 1);
		assert_eq!(fx.names(), vec!["new.txt", "other.txt"]);
		assert!(fx.cache.is_consistent());
	}

	#[test]
	fn test_batch_then_created_does_not_duplicate() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/new.txt", 4);
		fx.merge(&["new.txt"]);

		assert_eq!(
			fx.apply("new.txt", ChangeKind::Created, true),
			Outcome::Ignored(IgnoreReason::AlreadyCached)
		);
		assert_eq!(fx.cache.len(), 1);
	}

	#[test]
	fn test_deleted_during_traversal_blocks_stale_batch_entry() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/gone.txt", 1);
		fx.merge(&["keep.txt"]);

		assert_eq!(
			fx.apply("gone.txt", ChangeKind::Deleted, true),
			Outcome::Ignored(IgnoreReason::NotCached)
		);
		assert!(fx.reconciler.is_tombstoned(&fx.root.join("gone.txt")));
		assert_eq!(fx.merge(&["gone.txt"]), 0);
		assert_eq!(fx.names(), vec!["keep.txt"]);

		// A later Created brings it back.
		assert_eq!(
			fx.apply("gone.txt", ChangeKind::Created, true),
			Outcome::Inserted { row: 0 }
		);
		assert!(!fx.reconciler.is_tombstoned(&fx.root.join("gone.txt")));
	}

	#[test]
	fn test_deleted_is_idempotent() {
		let mut fx = Fixture::new();
		fx.merge(&["a.txt", "c.txt"]);
		fx.sink.take();

		assert_eq!(fx.apply("a.txt", ChangeKind::Deleted, false), Outcome::Removed { count: 1 });
		assert_eq!(
			fx.apply("a.txt", ChangeKind::Deleted, false),
			Outcome::Ignored(IgnoreReason::NotCached)
		);
		assert_eq!(fx.sink.changes, vec![ViewChange::RemoveRows { first: 0, last: 0 }]);
	}

	#[test]
	fn test_deleted_directory_releases_watch() {
		let mut fx = Fixture::new();
		fx.fs.add_dir("/home/u/b");
		fx.fs.add_file("/home/u/b/inner.txt", 3);
		fx.apply("b", ChangeKind::Created, false);
		let inner = FileNode::new(
			Some(fx.root.join("b")),
			fx.root.join("b").join("inner.txt"),
			FileMetadata::file("inner.txt", 3),
		);
		fx.cache.insert_at(1, inner);
		fx.sink.take();

		assert_eq!(fx.apply("b", ChangeKind::Deleted, false), Outcome::Removed { count: 2 });
		assert!(fx.cache.is_empty());
		assert!(fx
			.sink
			.changes
			.contains(&ViewChange::WatchReleased(fx.root.join("b"))));
	}

	#[test]
	fn test_updated_keeps_row_and_reports_data_change() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/a.txt", 1);
		fx.fs.add_file("/home/u/b.txt", 1);
		fx.apply("a.txt", ChangeKind::Created, false);
		fx.apply("b.txt", ChangeKind::Created, false);
		fx.sink.take();

		fx.fs.modify("/home/u/b.txt", 99);
		assert_eq!(fx.apply("b.txt", ChangeKind::Updated, false), Outcome::Updated { row: 1 });
		assert_eq!(fx.cache.get(&fx.root.join("b.txt")).unwrap().metadata().size, 99);
		assert_eq!(fx.sink.changes, vec![ViewChange::DataChanged { first: 1, last: 1 }]);

		assert_eq!(
			fx.apply("missing.txt", ChangeKind::Updated, false),
			Outcome::Ignored(IgnoreReason::NotCached)
		);
	}

	#[test]
	fn test_updated_for_vanished_entry_removes_row() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/a.txt", 1);
		fx.apply("a.txt", ChangeKind::Created, false);
		fx.fs.remove_silently("/home/u/a.txt");
		fx.sink.take();

		assert_eq!(fx.apply("a.txt", ChangeKind::Updated, false), Outcome::Removed { count: 1 });
		assert!(fx.cache.is_empty());
		assert_eq!(fx.sink.changes, vec![ViewChange::RemoveRows { first: 0, last: 0 }]);
	}

	#[test]
	fn test_undirected_rename_resolves_against_filesystem() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/old.txt", 5);
		fx.apply("old.txt", ChangeKind::Created, false);

		// The backend reports both sides of old.txt -> new.txt without a direction.
		fx.fs.remove_silently("/home/u/old.txt");
		fx.fs.add_file("/home/u/new.txt", 5);
		fx.sink.take();

		assert_eq!(fx.apply("old.txt", ChangeKind::Renamed, false), Outcome::Removed { count: 1 });
		assert_eq!(
			fx.apply("new.txt", ChangeKind::Renamed, false),
			Outcome::Inserted { row: 0 }
		);
		assert_eq!(fx.names(), vec!["new.txt"]);
		assert!(fx.cache.is_consistent());

		// A rename side for an entry that is still present and cached refreshes it.
		fx.fs.modify("/home/u/new.txt", 8);
		assert_eq!(
			fx.apply("new.txt", ChangeKind::Renamed, false),
			Outcome::Updated { row: 0 }
		);
		assert_eq!(fx.cache.get(&fx.root.join("new.txt")).unwrap().metadata().size, 8);
	}

	#[test]
	fn test_updated_repositions_under_size_sort() {
		let mut fx = Fixture::new();
		fx.adapter = ViewAdapter::new(Some(SortSpec::descending(SortKey::Size)));
		fx.fs.add_file("/home/u/big", 30);
		fx.fs.add_file("/home/u/mid", 20);
		fx.fs.add_file("/home/u/small", 10);
		for name in ["big", "mid", "small"] {
			fx.apply(name, ChangeKind::Created, false);
		}
		assert_eq!(fx.names(), vec!["big", "mid", "small"]);

		fx.fs.modify("/home/u/small", 99);
		assert_eq!(fx.apply("small", ChangeKind::Updated, false), Outcome::Updated { row: 0 });
		assert_eq!(fx.names(), vec!["small", "big", "mid"]);

		// Later inserts still land in sorted position.
		fx.fs.add_file("/home/u/medium", 25);
		assert_eq!(
			fx.apply("medium", ChangeKind::Created, false),
			Outcome::Inserted { row: 2 }
		);
		assert_eq!(fx.names(), vec!["small", "big", "medium", "mid"]);
		assert!(fx.sink.is_balanced());
	}

	#[test]
	fn test_root_and_foreign_events_are_ignored() {
		let mut fx = Fixture::new();
		let root_event = PendingEvent::new(fx.root.clone(), ChangeKind::Deleted);
		let mut reconciler = Reconciler::new(true);
		assert_eq!(
			reconciler.apply(&root_event, &mut fx.target(false)),
			Outcome::Ignored(IgnoreReason::Root)
		);

		let foreign = PendingEvent::new(ResourceId::new("mem", "/tmp/x"), ChangeKind::Created);
		assert_eq!(
			reconciler.apply(&foreign, &mut fx.target(false)),
			Outcome::Ignored(IgnoreReason::OutOfView)
		);
		assert_eq!(reconciler.stats().events_ignored, 2);
	}

	#[test]
	fn test_drain_preserves_order_and_coalesces_updates() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/a.txt", 1);
		let queue = WatchEventQueue::new();
		let a = fx.root.join("a.txt");
		queue.push(a.clone(), ChangeKind::Created);
		queue.push(a.clone(), ChangeKind::Updated);
		queue.push(a.clone(), ChangeKind::Updated);
		queue.push(a.clone(), ChangeKind::Updated);
		queue.push(a.clone(), ChangeKind::Deleted);

		let mut reconciler = Reconciler::new(true);
		let applied = reconciler.drain(&queue, &mut fx.target(false));

		assert_eq!(applied, 3);
		assert_eq!(reconciler.stats().updates_coalesced, 2);
		assert!(fx.cache.is_empty());
		assert_eq!(
			fx.sink.changes,
			vec![
				ViewChange::InsertRows { first: 0, last: 0 },
				ViewChange::DataChanged { first: 0, last: 0 },
				ViewChange::RemoveRows { first: 0, last: 0 },
			]
		);
		assert!(!reconciler.is_draining());
	}

	#[test]
	fn test_interleaved_updates_are_coalesced() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/a.txt", 1);
		fx.fs.add_file("/home/u/b.txt", 1);
		fx.apply("a.txt", ChangeKind::Created, false);
		fx.apply("b.txt", ChangeKind::Created, false);
		fx.sink.take();

		let queue = WatchEventQueue::new();
		let (a, b) = (fx.root.join("a.txt"), fx.root.join("b.txt"));
		queue.push(a.clone(), ChangeKind::Updated);
		queue.push(b.clone(), ChangeKind::Updated);
		queue.push(a.clone(), ChangeKind::Updated);
		queue.push(b.clone(), ChangeKind::Updated);

		let mut reconciler = Reconciler::new(true);
		assert_eq!(reconciler.drain(&queue, &mut fx.target(false)), 2);
		assert_eq!(reconciler.stats().updates_coalesced, 2);
		assert_eq!(fx.sink.changes.len(), 2);
	}

	#[test]
	fn test_update_after_recreate_is_not_coalesced() {
		let mut fx = Fixture::new();
		fx.fs.add_file("/home/u/a.txt", 1);
		let queue = WatchEventQueue::new();
		let a = fx.root.join("a.txt");
		queue.push(a.clone(), ChangeKind::Created);
		queue.push(a.clone(), ChangeKind::Updated);
		queue.push(a.clone(), ChangeKind::Deleted);
		queue.push(a.clone(), ChangeKind::Created);
		queue.push(a.clone(), ChangeKind::Updated);

		let mut reconciler = Reconciler::new(true);
		assert_eq!(reconciler.drain(&queue, &mut fx.target(false)), 5);
		assert_eq!(reconciler.stats().updates_coalesced, 0);
		assert_eq!(fx.names(), vec!["a.txt"]);
	}

	/// Sink that queues a follow-up event from inside a notification
	struct EchoSink {
		queue: WatchEventQueue,
		follow_up: Option<ResourceId>,
		inserts: usize,
	}

	impl ViewSink for EchoSink {
		fn end_insert_rows(&mut self) {
			self.inserts += 1;
			if let Some(id) = self.follow_up.take() {
				self.queue.push(id, ChangeKind::Created);
			}
		}
	}

	#[test]
	fn test_events_queued_during_drain_are_applied_by_the_same_drain() {
		let fs = MemoryFileSystem::new("mem");
		let root = fs.add_dir("/home/u");
		fs.add_file("/home/u/first", 1);
		fs.add_file("/home/u/second", 1);
		let queue = WatchEventQueue::new();
		let mut sink = EchoSink {
			queue: queue.clone(),
			follow_up: Some(root.join("second")),
			inserts: 0,
		};
		let mut cache = NodeCache::new();
		let adapter = ViewAdapter::new(None);
		queue.push(root.join("first"), ChangeKind::Created);

		let mut reconciler = Reconciler::new(true);
		let applied = reconciler.drain(
			&queue,
			&mut ReconcileTarget {
				root: &root,
				cache: &mut cache,
				adapter: &adapter,
				metadata: &fs,
				notifier: &fs,
				sink: &mut sink,
				traversal_in_flight: false,
			},
		);

		assert_eq!(applied, 2);
		assert_eq!(sink.inserts, 2);
		assert!(queue.is_empty());
		assert_eq!(cache.len(), 2);
	}
}
