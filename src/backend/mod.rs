//! Collaborators injected into the view model
//!
//! A backend serves one identifier scheme with three capabilities: listing a
//! directory, statting an entry, and delivering change notifications for a
//! watched directory. Backends are looked up through a [`SchemeRegistry`] that
//! the application builds once and hands to each model.
//!
//! - [`local`] - the local filesystem (`std::fs` plus `notify`)
//! - [`memory`] - an in-memory tree for virtual schemes and fixtures

pub mod local;
pub mod memory;

use crate::error::{ModelError, Result};
use crate::id::ResourceId;
use crate::node::FileMetadata;
use crate::queue::WatchEventQueue;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazy sequence of children; per-entry failures are reported inline
pub type ChildIter = Box<dyn Iterator<Item = Result<ResourceId>> + Send>;

pub trait Enumerator: Send + Sync {
	/// Start listing `directory`. Fails only when the directory itself cannot
	/// be opened. The returned iterator is pulled on a background thread and
	/// dropped early on cancellation.
	fn list(&self, directory: &ResourceId) -> Result<ChildIter>;
}

pub trait MetadataProvider: Send + Sync {
	/// `None` means the entry no longer exists.
	fn stat(&self, id: &ResourceId) -> Option<FileMetadata>;
}

pub trait ChangeNotifier: Send + Sync {
	/// Start delivering changes for the direct children of `directory` into `queue`.
	fn watch(&self, directory: &ResourceId, queue: WatchEventQueue) -> Result<()>;

	/// Stop delivering changes for `directory`. Unknown directories are ignored.
	fn unwatch(&self, directory: &ResourceId);
}

/// The three capabilities for one scheme
#[derive(Clone)]
pub struct Collaborators {
	pub enumerator: Arc<dyn Enumerator>,
	pub metadata: Arc<dyn MetadataProvider>,
	pub notifier: Arc<dyn ChangeNotifier>,
}

impl Collaborators {
	pub fn new(
		enumerator: Arc<dyn Enumerator>, metadata: Arc<dyn MetadataProvider>,
		notifier: Arc<dyn ChangeNotifier>,
	) -> Self {
		Self { enumerator, metadata, notifier }
	}

	/// Use one object for all three capabilities
	pub fn from_backend<B>(backend: Arc<B>) -> Self
	where
		B: Enumerator + MetadataProvider + ChangeNotifier + 'static,
	{
		Self {
			enumerator: backend.clone(),
			metadata: backend.clone(),
			notifier: backend,
		}
	}
}

/// Scheme-to-backend lookup, constructed explicitly and passed to each model
#[derive(Clone, Default)]
pub struct SchemeRegistry {
	backends: HashMap<String, Collaborators>,
}

impl SchemeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry serving the `file` scheme from the local filesystem
	pub fn with_local() -> Self {
		let mut registry = Self::new();
		registry.register(crate::id::LOCAL_SCHEME, local::LocalFileSystem::collaborators());
		registry
	}

	/// Register (or replace) the backend for a scheme
	pub fn register(&mut self, scheme: &str, collaborators: Collaborators) {
		self.backends.insert(scheme.to_string(), collaborators);
	}

	pub fn resolve(&self, id: &ResourceId) -> Result<Collaborators> {
		self.backends
			.get(id.scheme())
			.cloned()
			.ok_or_else(|| ModelError::unknown_scheme(id.scheme()))
	}

	pub fn schemes(&self) -> Vec<&str> {
		let mut schemes: Vec<&str> = self.backends.keys().map(String::as_str).collect();
		schemes.sort_unstable();
		schemes
	}
}
