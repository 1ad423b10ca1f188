//! Node cache: identifier-to-node map plus the ordered row sequence
//!
//! Every mutator updates the map and the ordered sequence together, so the
//! ordered identifiers are always a permutation of the map keys.

use crate::id::ResourceId;
use crate::node::{FileMetadata, FileNode};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// Outcome of [`NodeCache::insert_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMutation {
	Inserted { row: usize },
	Updated { row: usize },
}

/// What a subtree removal will do, computed before anything is mutated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtreePlan {
	/// Identifiers to drop, the removed entry first
	pub removed: Vec<ResourceId>,
	/// Nodes parented to a removed entry that live elsewhere and are only detached
	pub detached: Vec<ResourceId>,
}

#[derive(Debug, Default)]
pub struct NodeCache {
	nodes: HashMap<ResourceId, Arc<FileNode>>,
	order: Vec<ResourceId>,
}

impl NodeCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, id: &ResourceId) -> Option<Arc<FileNode>> {
		self.nodes.get(id).cloned()
	}

	pub fn contains(&self, id: &ResourceId) -> bool {
		self.nodes.contains_key(id)
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	/// Identifiers in row order
	pub fn ordered_ids(&self) -> &[ResourceId] {
		&self.order
	}

	/// Row currently holding `id`. Rows shift on every insert and removal, so
	/// this is a scan of the row order rather than a stored index.
	pub fn row_of(&self, id: &ResourceId) -> Option<usize> {
		if !self.nodes.contains_key(id) {
			return None;
		}
		self.order.iter().position(|candidate| candidate == id)
	}

	pub fn node_at(&self, row: usize) -> Option<Arc<FileNode>> {
		self.order.get(row).and_then(|id| self.nodes.get(id)).cloned()
	}

	/// Resolve a node's parent relation through the cache
	pub fn parent_of(&self, node: &FileNode) -> Option<Arc<FileNode>> {
		node.parent().and_then(|parent| self.get(parent))
	}

	/// Insert a new node at the end of the row order, or refresh the metadata
	/// of an existing one in place.
	pub fn insert_or_update(
		&mut self, parent: Option<ResourceId>, id: ResourceId, metadata: FileMetadata,
	) -> CacheMutation {
		if let Some(existing) = self.nodes.get_mut(&id) {
			*existing = Arc::new(existing.with_metadata(metadata));
			let row = self
				.order
				.iter()
				.position(|candidate| candidate == &id)
				.unwrap_or(self.order.len());
			return CacheMutation::Updated { row };
		}

		let row = self.order.len();
		self.order.push(id.clone());
		self.nodes
			.insert(id.clone(), Arc::new(FileNode::new(parent, id, metadata)));
		CacheMutation::Inserted { row }
	}

	/// Insert a node at a specific row. Returns false, without touching
	/// anything, if the identifier is already cached.
	pub fn insert_at(&mut self, row: usize, node: FileNode) -> bool {
		if self.nodes.contains_key(node.id()) {
			trace!("Ignoring duplicate insert for {}", node.id());
			return false;
		}
		let row = row.min(self.order.len());
		self.order.insert(row, node.id().clone());
		self.nodes.insert(node.id().clone(), Arc::new(node));
		true
	}

	/// Append nodes in the given order, skipping identifiers already cached.
	/// Returns the number appended.
	pub fn extend(&mut self, nodes: impl IntoIterator<Item = FileNode>) -> usize {
		let before = self.order.len();
		for node in nodes {
			let row = self.order.len();
			self.insert_at(row, node);
		}
		self.order.len() - before
	}

	/// Work out which entries a removal of `id` affects. A directory takes its
	/// cached path-descendants with it; nodes merely parented to a removed
	/// entry but located elsewhere are detached instead.
	pub fn subtree_of(&self, id: &ResourceId) -> SubtreePlan {
		let mut plan = SubtreePlan::default();
		if !self.nodes.contains_key(id) {
			return plan;
		}
		plan.removed.push(id.clone());
		for candidate in &self.order {
			if candidate.is_descendant_of(id) {
				plan.removed.push(candidate.clone());
			}
		}
		let removed: HashSet<&ResourceId> = plan.removed.iter().collect();
		for candidate in &self.order {
			if removed.contains(candidate) {
				continue;
			}
			let parented_to_removed = self
				.nodes
				.get(candidate)
				.and_then(|node| node.parent())
				.map(|parent| removed.contains(parent))
				.unwrap_or(false);
			if parented_to_removed {
				plan.detached.push(candidate.clone());
			}
		}
		plan
	}

	/// Drop exactly one node. Returns the row it occupied.
	pub fn remove_one(&mut self, id: &ResourceId) -> Option<usize> {
		self.nodes.remove(id)?;
		let row = self.order.iter().position(|candidate| candidate == id)?;
		self.order.remove(row);
		Some(row)
	}

	/// Clear the parent relation of a node, keeping it cached
	pub fn detach(&mut self, id: &ResourceId) -> bool {
		match self.nodes.get_mut(id) {
			Some(node) => {
				*node = Arc::new(node.detached());
				true
			}
			None => false,
		}
	}

	/// Remove a node and its cached subtree. Removing an unknown identifier
	/// is a no-op. Returns the removed identifiers.
	pub fn remove(&mut self, id: &ResourceId) -> Vec<ResourceId> {
		let plan = self.subtree_of(id);
		for detached in &plan.detached {
			self.detach(detached);
		}
		plan.removed
			.into_iter()
			.filter(|removed| self.remove_one(removed).is_some())
			.collect()
	}

	/// Replace a node's metadata snapshot. Returns its row.
	pub fn refresh(&mut self, id: &ResourceId, metadata: FileMetadata) -> Option<usize> {
		let node = self.nodes.get_mut(id)?;
		*node = Arc::new(node.with_metadata(metadata));
		self.order.iter().position(|candidate| candidate == id)
	}

	/// Drop every node. Returns how many rows were released.
	pub fn clear(&mut self) -> usize {
		let released = self.order.len();
		self.order.clear();
		self.nodes.clear();
		released
	}

	/// Stable re-sort of the row order
	pub fn sort_by(&mut self, mut compare: impl FnMut(&FileNode, &FileNode) -> Ordering) {
		let nodes = &self.nodes;
		self.order.sort_by(|a, b| match (nodes.get(a), nodes.get(b)) {
			(Some(a), Some(b)) => compare(a, b),
			_ => Ordering::Equal,
		});
	}

	/// First row at which `node` can be inserted while keeping the order
	/// sorted under `compare`.
	pub fn insertion_row(
		&self, node: &FileNode, mut compare: impl FnMut(&FileNode, &FileNode) -> Ordering,
	) -> usize {
		self.order.partition_point(|id| {
			self.nodes
				.get(id)
				.map(|existing| compare(existing, node) != Ordering::Greater)
				.unwrap_or(true)
		})
	}

	/// Whether the node at `row` sits between its neighbours under `compare`
	pub fn is_ordered_at(
		&self, row: usize, mut compare: impl FnMut(&FileNode, &FileNode) -> Ordering,
	) -> bool {
		let Some(node) = self.node_at(row) else {
			return true;
		};
		let before = row
			.checked_sub(1)
			.and_then(|prev| self.node_at(prev))
			.map_or(true, |prev| compare(prev.as_ref(), node.as_ref()) != Ordering::Greater);
		let after = self
			.node_at(row + 1)
			.map_or(true, |next| compare(node.as_ref(), next.as_ref()) != Ordering::Greater);
		before && after
	}

	/// Check the permutation invariant between the map and the row order
	pub fn is_consistent(&self) -> bool {
		self.order.len() == self.nodes.len()
			&& self.order.iter().all(|id| self.nodes.contains_key(id))
	}
}
