use crate::backend::{ChangeNotifier, ChildIter, Collaborators, Enumerator, MetadataProvider};
use crate::error::{ModelError, Result};
use crate::id::ResourceId;
use crate::node::{FileKind, FileMetadata};
use crate::queue::{ChangeKind, WatchEventQueue};
use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Enumeration and metadata straight from `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl LocalFileSystem {
	pub fn collaborators() -> Collaborators {
		Collaborators::new(
			Arc::new(LocalFileSystem),
			Arc::new(LocalFileSystem),
			Arc::new(NotifyChangeNotifier::new()),
		)
	}
}

impl Enumerator for LocalFileSystem {
	fn list(&self, directory: &ResourceId) -> Result<ChildIter> {
		let entries = std::fs::read_dir(directory.path()).map_err(|e| {
			ModelError::enumeration_failed(&directory.to_string(), &e.to_string())
		})?;
		let parent = directory.clone();
		Ok(Box::new(entries.map(move |entry| {
			entry
				.map(|entry| parent.join(entry.file_name()))
				.map_err(ModelError::from)
		})))
	}
}

impl MetadataProvider for LocalFileSystem {
	fn stat(&self, id: &ResourceId) -> Option<FileMetadata> {
		let path = id.path();
		// Follow links; a dangling link still shows up, as a symlink.
		let metadata = std::fs::metadata(path)
			.or_else(|_| std::fs::symlink_metadata(path))
			.ok()?;

		let kind = if metadata.is_dir() {
			FileKind::Directory
		} else if metadata.is_file() {
			FileKind::File
		} else if metadata.file_type().is_symlink() {
			FileKind::Symlink
		} else {
			FileKind::Other
		};

		let mut snapshot = FileMetadata::new(id.file_name(), kind);
		snapshot.size = if metadata.is_file() { metadata.len() } else { 0 };
		snapshot.modified = metadata.modified().ok().map(DateTime::<Utc>::from);
		snapshot.created = metadata.created().ok().map(DateTime::<Utc>::from);
		snapshot.readonly = metadata.permissions().readonly();
		Some(snapshot)
	}
}

/// Change notifier backed by one non-recursive `notify` watcher per directory
#[derive(Default)]
pub struct NotifyChangeNotifier {
	watchers: Mutex<HashMap<PathBuf, RecommendedWatcher>>,
}

impl NotifyChangeNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn watched_directories(&self) -> Vec<PathBuf> {
		self.watchers.lock().keys().cloned().collect()
	}

	fn forward_event(scheme: &str, event: Event, queue: &WatchEventQueue) {
		debug!("Received notify event: {:?}", event);
		let to_id = |path: &Path| ResourceId::new(scheme, path);

		if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
			if let [from, to] = event.paths.as_slice() {
				queue.push_rename(to_id(from), to_id(to));
				return;
			}
		}

		let Some(kind) = ChangeKind::from_notify(&event.kind) else {
			return;
		};
		for path in &event.paths {
			queue.push(to_id(path), kind);
		}
	}
}

impl ChangeNotifier for NotifyChangeNotifier {
	fn watch(&self, directory: &ResourceId, queue: WatchEventQueue) -> Result<()> {
		let path = directory.path().to_path_buf();
		if !path.is_dir() {
			return Err(ModelError::InvalidPath { path: path.to_string_lossy().to_string() });
		}

		let scheme = directory.scheme().to_string();
		let mut watcher = RecommendedWatcher::new(
			move |result: notify::Result<Event>| match result {
				Ok(event) => Self::forward_event(&scheme, event, &queue),
				Err(e) => error!("Notify error: {}", e),
			},
			Config::default(),
		)?;
		watcher.watch(&path, RecursiveMode::NonRecursive)?;

		info!("Watching directory: {:?}", path);
		self.watchers.lock().insert(path, watcher);
		Ok(())
	}

	fn unwatch(&self, directory: &ResourceId) {
		// Dropping the watcher releases the OS watch.
		if self.watchers.lock().remove(directory.path()).is_some() {
			info!("Stopped watching directory: {:?}", directory.path());
		}
	}
}
