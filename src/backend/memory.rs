//! In-memory filesystem backend
//!
//! Serves virtual schemes whose contents are not on disk, and doubles as a
//! deterministic fixture: entries can be added without notifying watchers,
//! mutations notify the watcher of the parent directory, listings can be
//! slowed down and directories made unreadable.

use crate::backend::{ChangeNotifier, ChildIter, Collaborators, Enumerator, MetadataProvider};
use crate::error::{ModelError, Result};
use crate::id::ResourceId;
use crate::node::{FileKind, FileMetadata};
use crate::queue::{ChangeKind, WatchEventQueue};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
	entries: HashMap<PathBuf, FileMetadata>,
	/// Insertion order, which is also listing order
	order: Vec<PathBuf>,
	watches: HashMap<PathBuf, WatchEventQueue>,
	unreadable: HashSet<PathBuf>,
	listing_delay: Option<Duration>,
	watch_unavailable: bool,
}

pub struct MemoryFileSystem {
	scheme: String,
	state: RwLock<MemoryState>,
}

impl MemoryFileSystem {
	pub fn new(scheme: &str) -> Self {
		let fs = Self { scheme: scheme.to_string(), state: RwLock::default() };
		fs.state
			.write()
			.entries
			.insert(PathBuf::from("/"), FileMetadata::directory("/"));
		fs
	}

	/// Wrap in an `Arc` and expose as collaborators
	pub fn shared(scheme: &str) -> (Arc<Self>, Collaborators) {
		let fs = Arc::new(Self::new(scheme));
		let collaborators = Collaborators::from_backend(fs.clone());
		(fs, collaborators)
	}

	pub fn id(&self, path: impl AsRef<Path>) -> ResourceId {
		ResourceId::new(self.scheme.clone(), path.as_ref())
	}

	/// Add a directory (and any missing ancestors) without notifying watchers
	pub fn add_dir(&self, path: impl AsRef<Path>) -> ResourceId {
		let path = path.as_ref();
		let name = display_name(path);
		self.insert_entry(path, FileMetadata::directory(name));
		self.id(path)
	}

	/// Add a file without notifying watchers
	pub fn add_file(&self, path: impl AsRef<Path>, size: u64) -> ResourceId {
		let path = path.as_ref();
		self.insert_entry(path, FileMetadata::file(display_name(path), size));
		self.id(path)
	}

	/// Add an entry with explicit metadata without notifying watchers
	pub fn add_entry(&self, path: impl AsRef<Path>, metadata: FileMetadata) -> ResourceId {
		let path = path.as_ref();
		self.insert_entry(path, metadata);
		self.id(path)
	}

	/// Create a file and notify the watcher of its directory
	pub fn create_file(&self, path: impl AsRef<Path>, size: u64) -> ResourceId {
		let id = self.add_file(path, size);
		self.emit(&id, ChangeKind::Created);
		id
	}

	pub fn create_dir(&self, path: impl AsRef<Path>) -> ResourceId {
		let id = self.add_dir(path);
		self.emit(&id, ChangeKind::Created);
		id
	}

	/// Change a file's size and notify
	pub fn modify(&self, path: impl AsRef<Path>, size: u64) {
		let path = path.as_ref();
		let changed = match self.state.write().entries.get_mut(path) {
			Some(metadata) => {
				metadata.size = size;
				true
			}
			None => false,
		};
		if changed {
			self.emit(&self.id(path), ChangeKind::Updated);
		}
	}

	/// Remove an entry and everything below it, then notify
	pub fn delete(&self, path: impl AsRef<Path>) {
		let path = path.as_ref();
		if self.remove_silently(path) {
			self.emit(&self.id(path), ChangeKind::Deleted);
		}
	}

	/// Remove an entry and its subtree without notifying watchers
	pub fn remove_silently(&self, path: impl AsRef<Path>) -> bool {
		let path = path.as_ref();
		let mut state = self.state.write();
		if state.entries.remove(path).is_none() {
			return false;
		}
		state.entries.retain(|candidate, _| !candidate.starts_with(path));
		state.order.retain(|candidate| !candidate.starts_with(path));
		true
	}

	/// Move a single entry and notify the affected directories
	pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) {
		let (from, to) = (from.as_ref(), to.as_ref());
		let metadata = {
			let mut state = self.state.write();
			let Some(mut metadata) = state.entries.remove(from) else {
				return;
			};
			metadata.name = display_name(to);
			state.order.retain(|candidate| candidate != from);
			metadata
		};
		self.insert_entry(to, metadata);

		let (old, new) = (self.id(from), self.id(to));
		let same_parent = from.parent() == to.parent();
		let parent_queue = from
			.parent()
			.and_then(|parent| self.state.read().watches.get(parent).cloned());
		match parent_queue {
			Some(queue) if same_parent => queue.push_rename(old, new),
			_ => {
				self.emit(&old, ChangeKind::Deleted);
				self.emit(&new, ChangeKind::Created);
			}
		}
	}

	/// Deliver a raw change event to the watcher of the entry's directory
	pub fn emit(&self, id: &ResourceId, kind: ChangeKind) {
		let queue = id
			.path()
			.parent()
			.and_then(|parent| self.state.read().watches.get(parent).cloned());
		match queue {
			Some(queue) => queue.push(id.clone(), kind),
			None => debug!("No watcher for parent of {}, dropping {:?}", id, kind),
		}
	}

	pub fn set_unreadable(&self, path: impl AsRef<Path>, unreadable: bool) {
		let mut state = self.state.write();
		if unreadable {
			state.unreadable.insert(path.as_ref().to_path_buf());
		} else {
			state.unreadable.remove(path.as_ref());
		}
	}

	/// Sleep this long before yielding each listed child
	pub fn set_listing_delay(&self, delay: Option<Duration>) {
		self.state.write().listing_delay = delay;
	}

	/// Make every subsequent watch registration fail
	pub fn set_watch_unavailable(&self, unavailable: bool) {
		self.state.write().watch_unavailable = unavailable;
	}

	pub fn is_watched(&self, directory: impl AsRef<Path>) -> bool {
		self.state.read().watches.contains_key(directory.as_ref())
	}

	pub fn watch_count(&self) -> usize {
		self.state.read().watches.len()
	}

	fn insert_entry(&self, path: &Path, metadata: FileMetadata) {
		let mut state = self.state.write();
		let mut missing = Vec::new();
		let mut ancestor = path.parent();
		while let Some(dir) = ancestor {
			if state.entries.contains_key(dir) {
				break;
			}
			missing.push(dir.to_path_buf());
			ancestor = dir.parent();
		}
		for dir in missing.into_iter().rev() {
			let name = display_name(&dir);
			state.entries.insert(dir.clone(), FileMetadata::directory(name));
			state.order.push(dir);
		}
		if state.entries.insert(path.to_path_buf(), metadata).is_none() {
			state.order.push(path.to_path_buf());
		}
	}
}

fn display_name(path: &Path) -> String {
	path.file_name()
		.map(|name| name.to_string_lossy().to_string())
		.unwrap_or_else(|| path.to_string_lossy().to_string())
}

impl Enumerator for MemoryFileSystem {
	fn list(&self, directory: &ResourceId) -> Result<ChildIter> {
		let state = self.state.read();
		let dir = directory.path();
		let label = directory.to_string();
		match state.entries.get(dir) {
			None => return Err(ModelError::enumeration_failed(&label, "no such directory")),
			Some(metadata) if metadata.kind != FileKind::Directory => {
				return Err(ModelError::enumeration_failed(&label, "not a directory"));
			}
			Some(_) => {}
		}
		if state.unreadable.contains(dir) {
			return Err(ModelError::enumeration_failed(&label, "permission denied"));
		}

		let children: Vec<ResourceId> = state
			.order
			.iter()
			.filter(|candidate| candidate.parent() == Some(dir))
			.map(|candidate| ResourceId::new(self.scheme.clone(), candidate))
			.collect();
		let delay = state.listing_delay;
		Ok(Box::new(children.into_iter().map(move |child| {
			if let Some(delay) = delay {
				std::thread::sleep(delay);
			}
			Ok(child)
		})))
	}
}

impl MetadataProvider for MemoryFileSystem {
	fn stat(&self, id: &ResourceId) -> Option<FileMetadata> {
		self.state.read().entries.get(id.path()).cloned()
	}
}

impl ChangeNotifier for MemoryFileSystem {
	fn watch(&self, directory: &ResourceId, queue: WatchEventQueue) -> Result<()> {
		let mut state = self.state.write();
		if state.watch_unavailable {
			return Err(ModelError::watch_unavailable(
				&directory.to_string(),
				"watch service unavailable",
			));
		}
		if !state.entries.contains_key(directory.path()) {
			return Err(ModelError::watch_unavailable(
				&directory.to_string(),
				"no such directory",
			));
		}
		state.watches.insert(directory.path().to_path_buf(), queue);
		Ok(())
	}

	fn unwatch(&self, directory: &ResourceId) {
		self.state.write().watches.remove(directory.path());
	}
}
