//! Presentation boundary: turns cache mutations into row notifications
//!
//! Every mutation is bracketed on the sink (`begin_*` before, `end_*` after)
//! and the cache is changed in a single call between the two, so a sink never
//! observes the map and the row order out of step.

use crate::cache::NodeCache;
use crate::id::ResourceId;
use crate::model::ModelState;
use crate::node::FileNode;
use crate::sort::SortSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Batches up to this size are spliced in row by row on a sorted, non-empty
/// view; larger ones reset the view.
pub const ROW_INSERT_LIMIT: usize = 32;

/// Receiver of row-level notifications
#[allow(unused_variables)]
pub trait ViewSink {
	fn begin_insert_rows(&mut self, first: usize, last: usize) {}
	fn end_insert_rows(&mut self) {}
	fn begin_remove_rows(&mut self, first: usize, last: usize) {}
	fn end_remove_rows(&mut self) {}
	fn begin_reset(&mut self) {}
	fn end_reset(&mut self) {}
	fn data_changed(&mut self, first: usize, last: usize) {}
	fn root_changed(&mut self, root: &ResourceId) {}
	fn state_changed(&mut self, state: ModelState) {}
	/// A cached directory was deleted; any watch held on it should be released.
	fn watch_released(&mut self, id: &ResourceId) {}
}

/// Sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ViewSink for NullSink {}

/// A notification as seen by the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ViewChange {
	InsertRows { first: usize, last: usize },
	RemoveRows { first: usize, last: usize },
	Reset,
	DataChanged { first: usize, last: usize },
	RootChanged(ResourceId),
	StateChanged(ModelState),
	WatchReleased(ResourceId),
}

/// Sink that records notifications in order and checks bracket pairing
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
	pub changes: Vec<ViewChange>,
	open: Option<ViewChange>,
	unbalanced: bool,
}

impl RecordingSink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Take the recorded notifications, leaving the log empty
	pub fn take(&mut self) -> Vec<ViewChange> {
		std::mem::take(&mut self.changes)
	}

	/// Row notifications only (inserts, removes, resets, data changes)
	pub fn row_changes(&self) -> Vec<ViewChange> {
		self.changes
			.iter()
			.filter(|change| {
				!matches!(
					change,
					ViewChange::RootChanged(_)
						| ViewChange::StateChanged(_)
						| ViewChange::WatchReleased(_)
				)
			})
			.cloned()
			.collect()
	}

	/// True if every `begin_*` was closed by the matching `end_*`
	pub fn is_balanced(&self) -> bool {
		!self.unbalanced && self.open.is_none()
	}

	fn open(&mut self, change: ViewChange) {
		if self.open.is_some() {
			self.unbalanced = true;
		}
		self.changes.push(change.clone());
		self.open = Some(change);
	}

	fn close(&mut self, expected: fn(&ViewChange) -> bool) {
		match self.open.take() {
			Some(change) if expected(&change) => {}
			_ => self.unbalanced = true,
		}
	}
}

impl ViewSink for RecordingSink {
	fn begin_insert_rows(&mut self, first: usize, last: usize) {
		self.open(ViewChange::InsertRows { first, last });
	}

	fn end_insert_rows(&mut self) {
		self.close(|change| matches!(change, ViewChange::InsertRows { .. }));
	}

	fn begin_remove_rows(&mut self, first: usize, last: usize) {
		self.open(ViewChange::RemoveRows { first, last });
	}

	fn end_remove_rows(&mut self) {
		self.close(|change| matches!(change, ViewChange::RemoveRows { .. }));
	}

	fn begin_reset(&mut self) {
		self.open(ViewChange::Reset);
	}

	fn end_reset(&mut self) {
		self.close(|change| matches!(change, ViewChange::Reset));
	}

	fn data_changed(&mut self, first: usize, last: usize) {
		self.changes.push(ViewChange::DataChanged { first, last });
	}

	fn root_changed(&mut self, root: &ResourceId) {
		self.changes.push(ViewChange::RootChanged(root.clone()));
	}

	fn state_changed(&mut self, state: ModelState) {
		self.changes.push(ViewChange::StateChanged(state));
	}

	fn watch_released(&mut self, id: &ResourceId) {
		self.changes.push(ViewChange::WatchReleased(id.clone()));
	}
}

/// Columns addressable by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
	Name,
	Size,
	Type,
	Modified,
	Created,
	/// Column contributed by a registered [`ColumnProvider`]
	Extension(String),
}

impl Column {
	pub const BUILT_IN: [Column; 5] =
		[Column::Name, Column::Modified, Column::Size, Column::Type, Column::Created];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
	Text(String),
	Bytes(u64),
	Time(DateTime<Utc>),
}

/// Extension point for plugin-contributed columns
pub trait ColumnProvider {
	fn name(&self) -> &str;
	fn value(&self, node: &FileNode) -> Option<CellValue>;
}

pub struct ViewAdapter {
	sort: Option<SortSpec>,
	columns: Vec<Box<dyn ColumnProvider>>,
}

impl ViewAdapter {
	pub fn new(sort: Option<SortSpec>) -> Self {
		Self { sort, columns: Vec::new() }
	}

	pub fn sort(&self) -> Option<SortSpec> {
		self.sort
	}

	pub fn register_column(&mut self, provider: Box<dyn ColumnProvider>) {
		self.columns.retain(|existing| existing.name() != provider.name());
		self.columns.push(provider);
	}

	pub fn columns(&self) -> Vec<Column> {
		Column::BUILT_IN
			.iter()
			.cloned()
			.chain(
				self.columns
					.iter()
					.map(|provider| Column::Extension(provider.name().to_string())),
			)
			.collect()
	}

	/// Splice one new node into its sorted position, or append when unsorted.
	/// Returns the row, or `None` if the identifier was already cached.
	pub fn insert_live(
		&self, cache: &mut NodeCache, node: FileNode, sink: &mut dyn ViewSink,
	) -> Option<usize> {
		if cache.contains(node.id()) {
			return None;
		}
		match self.sort {
			Some(spec) => {
				let row = cache.insertion_row(&node, |a, b| spec.compare(a, b));
				sink.begin_insert_rows(row, row);
				cache.insert_at(row, node);
				sink.end_insert_rows();
				Some(row)
			}
			None => {
				let row = cache.len();
				let (parent, id) = (node.parent().cloned(), node.id().clone());
				sink.begin_insert_rows(row, row);
				cache.insert_or_update(parent, id, node.metadata().clone());
				sink.end_insert_rows();
				Some(row)
			}
		}
	}

	/// Commit a traversal batch. Entries keep their discovery order on the way
	/// in; sorting is applied afterwards. Returns how many rows were added.
	pub fn insert_batch(
		&self, cache: &mut NodeCache, nodes: Vec<FileNode>, sink: &mut dyn ViewSink,
	) -> usize {
		let mut seen = HashSet::new();
		let fresh: Vec<FileNode> = nodes
			.into_iter()
			.filter(|node| !cache.contains(node.id()) && seen.insert(node.id().clone()))
			.collect();
		if fresh.is_empty() {
			return 0;
		}
		let count = fresh.len();

		match self.sort {
			None => {
				let first = cache.len();
				sink.begin_insert_rows(first, first + count - 1);
				cache.extend(fresh);
				sink.end_insert_rows();
			}
			Some(spec) if cache.is_empty() => {
				sink.begin_insert_rows(0, count - 1);
				cache.extend(fresh);
				cache.sort_by(|a, b| spec.compare(a, b));
				sink.end_insert_rows();
			}
			Some(_) if count <= ROW_INSERT_LIMIT => {
				for node in fresh {
					self.insert_live(cache, node, sink);
				}
			}
			Some(_) => {
				debug!("Merging batch of {} into {} rows with a reset", count, cache.len());
				self.reset_with(cache, sink, |cache| {
					cache.extend(fresh);
				});
			}
		}
		count
	}

	/// Apply a wholesale change under a single reset notification. The active
	/// sort is re-applied before the reset ends.
	pub fn reset_with(
		&self, cache: &mut NodeCache, sink: &mut dyn ViewSink, mutate: impl FnOnce(&mut NodeCache),
	) {
		sink.begin_reset();
		mutate(cache);
		if let Some(spec) = self.sort {
			cache.sort_by(|a, b| spec.compare(a, b));
		}
		sink.end_reset();
	}

	/// Remove a node and its cached subtree, one row notification per removed
	/// row. Returns the removed nodes, the requested one first.
	pub fn remove(
		&self, cache: &mut NodeCache, id: &ResourceId, sink: &mut dyn ViewSink,
	) -> Vec<Arc<FileNode>> {
		let plan = cache.subtree_of(id);
		for detached in &plan.detached {
			cache.detach(detached);
			if let Some(row) = cache.row_of(detached) {
				sink.data_changed(row, row);
			}
		}

		let mut removed = Vec::with_capacity(plan.removed.len());
		for victim in &plan.removed {
			let (Some(node), Some(row)) = (cache.get(victim), cache.row_of(victim)) else {
				continue;
			};
			sink.begin_remove_rows(row, row);
			cache.remove_one(victim);
			sink.end_remove_rows();
			removed.push(node);
		}
		removed
	}

	/// Swap in a fresh metadata snapshot. The row stays put unless the new
	/// metadata breaks the active sort, in which case it is removed and
	/// re-inserted at its sorted position. Returns the row it ends up at.
	pub fn update(
		&self, cache: &mut NodeCache, id: &ResourceId, metadata: crate::node::FileMetadata,
		sink: &mut dyn ViewSink,
	) -> Option<usize> {
		let row = cache.refresh(id, metadata)?;
		let Some(spec) = self.sort else {
			sink.data_changed(row, row);
			return Some(row);
		};
		if cache.is_ordered_at(row, |a, b| spec.compare(a, b)) {
			sink.data_changed(row, row);
			return Some(row);
		}

		// The new metadata moved the entry under the active sort.
		let node = cache.get(id)?;
		sink.begin_remove_rows(row, row);
		cache.remove_one(id);
		sink.end_remove_rows();
		let node = FileNode::clone(&node);
		let target = cache.insertion_row(&node, |a, b| spec.compare(a, b));
		sink.begin_insert_rows(target, target);
		cache.insert_at(target, node);
		sink.end_insert_rows();
		trace!("Moved {} from row {} to {}", id, row, target);
		Some(target)
	}

	/// Switch the active sort. A different sort re-sorts the whole view and
	/// reports it with a single data-changed over every row.
	pub fn set_sort(
		&mut self, cache: &mut NodeCache, sort: Option<SortSpec>, sink: &mut dyn ViewSink,
	) -> bool {
		if self.sort == sort {
			return false;
		}
		self.sort = sort;
		if let Some(spec) = sort {
			cache.sort_by(|a, b| spec.compare(a, b));
			if !cache.is_empty() {
				sink.data_changed(0, cache.len() - 1);
			}
		}
		true
	}

	/// Drop every row. Returns how many were removed.
	pub fn clear(&self, cache: &mut NodeCache, sink: &mut dyn ViewSink) -> usize {
		if cache.is_empty() {
			return 0;
		}
		let last = cache.len() - 1;
		sink.begin_remove_rows(0, last);
		let released = cache.clear();
		sink.end_remove_rows();
		released
	}

	pub fn data(&self, cache: &NodeCache, row: usize, column: &Column) -> Option<CellValue> {
		let node = cache.node_at(row)?;
		let metadata = node.metadata();
		match column {
			Column::Name => Some(CellValue::Text(metadata.name.clone())),
			Column::Size => Some(CellValue::Bytes(metadata.size)),
			Column::Type => Some(CellValue::Text(metadata.type_name())),
			Column::Modified => metadata.modified.map(CellValue::Time),
			Column::Created => metadata.created.map(CellValue::Time),
			Column::Extension(name) => self
				.columns
				.iter()
				.find(|provider| provider.name() == name)
				.and_then(|provider| provider.value(&node)),
		}
	}
}
