use crate::id::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
	File,
	Directory,
	Symlink,
	Other,
}

/// Metadata snapshot for one entry, as returned by a metadata provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
	pub name: String,
	pub kind: FileKind,
	/// Size in bytes; directories report 0
	pub size: u64,
	pub modified: Option<DateTime<Utc>>,
	pub created: Option<DateTime<Utc>>,
	pub hidden: bool,
	pub readonly: bool,
}

impl FileMetadata {
	pub fn new(name: impl Into<String>, kind: FileKind) -> Self {
		let name = name.into();
		Self {
			hidden: name.starts_with('.'),
			name,
			kind,
			size: 0,
			modified: None,
			created: None,
			readonly: false,
		}
	}

	pub fn file(name: impl Into<String>, size: u64) -> Self {
		Self { size, ..Self::new(name, FileKind::File) }
	}

	pub fn directory(name: impl Into<String>) -> Self {
		Self::new(name, FileKind::Directory)
	}

	pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
		self.modified = Some(modified);
		self
	}

	pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
		self.created = Some(created);
		self
	}

	pub fn is_dir(&self) -> bool {
		self.kind == FileKind::Directory
	}

	/// Type label used for the type column and type sorting: the lowercase
	/// extension for files, a fixed label otherwise.
	pub fn type_name(&self) -> String {
		match self.kind {
			FileKind::Directory => "directory".to_string(),
			FileKind::Symlink => "symlink".to_string(),
			FileKind::Other => "special".to_string(),
			FileKind::File => Path::new(&self.name)
				.extension()
				.map(|ext| ext.to_string_lossy().to_lowercase())
				.unwrap_or_default(),
		}
	}
}

/// One entry known to the view.
///
/// The parent is held as an identifier and resolved through the cache, so a
/// node never keeps its parent alive and detached subtrees leave no dangling
/// references behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
	id: ResourceId,
	parent: Option<ResourceId>,
	metadata: FileMetadata,
}

impl FileNode {
	pub fn new(parent: Option<ResourceId>, id: ResourceId, metadata: FileMetadata) -> Self {
		Self { id, parent, metadata }
	}

	pub fn id(&self) -> &ResourceId {
		&self.id
	}

	pub fn parent(&self) -> Option<&ResourceId> {
		self.parent.as_ref()
	}

	pub fn metadata(&self) -> &FileMetadata {
		&self.metadata
	}

	pub fn name(&self) -> &str {
		&self.metadata.name
	}

	pub fn is_dir(&self) -> bool {
		self.metadata.is_dir()
	}

	/// Copy of this node carrying a fresh metadata snapshot
	pub fn with_metadata(&self, metadata: FileMetadata) -> Self {
		Self { id: self.id.clone(), parent: self.parent.clone(), metadata }
	}

	/// Copy of this node with its parent relation cleared
	pub fn detached(&self) -> Self {
		Self { id: self.id.clone(), parent: None, metadata: self.metadata.clone() }
	}
}
