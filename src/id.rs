use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Scheme used for plain local paths
pub const LOCAL_SCHEME: &str = "file";

/// Identifier of a filesystem entry: a scheme plus an absolute path.
///
/// The scheme selects which collaborators (enumerator, notifier, metadata
/// provider) serve the entry; the path is the entry's location within that scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
	scheme: String,
	path: PathBuf,
}

impl ResourceId {
	pub fn new(scheme: impl Into<String>, path: impl Into<PathBuf>) -> Self {
		Self { scheme: scheme.into(), path: path.into() }
	}

	/// Identifier for a path on the local filesystem
	pub fn local(path: impl Into<PathBuf>) -> Self {
		Self::new(LOCAL_SCHEME, path)
	}

	/// Parse `scheme://path`; anything without a scheme separator is a local path.
	pub fn parse(raw: &str) -> Self {
		match raw.split_once("://") {
			Some((scheme, rest)) if !scheme.is_empty() && !scheme.contains('/') => {
				let path = if rest.starts_with('/') {
					PathBuf::from(rest)
				} else {
					Path::new("/").join(rest)
				};
				Self::new(scheme, path)
			}
			_ => Self::local(raw),
		}
	}

	pub fn scheme(&self) -> &str {
		&self.scheme
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn is_local(&self) -> bool {
		self.scheme == LOCAL_SCHEME
	}

	/// The containing directory, or `None` for a scheme root.
	pub fn parent(&self) -> Option<ResourceId> {
		self.path
			.parent()
			.map(|parent| Self::new(self.scheme.clone(), parent))
	}

	/// Last path component as a display string
	pub fn file_name(&self) -> String {
		self.path
			.file_name()
			.map(|name| name.to_string_lossy().to_string())
			.unwrap_or_else(|| self.path.to_string_lossy().to_string())
	}

	/// Child identifier in the same scheme
	pub fn join(&self, name: impl AsRef<Path>) -> ResourceId {
		Self::new(self.scheme.clone(), self.path.join(name))
	}

	/// True if `self` lies strictly below `ancestor` in the same scheme.
	pub fn is_descendant_of(&self, ancestor: &ResourceId) -> bool {
		self.scheme == ancestor.scheme
			&& self.path != ancestor.path
			&& self.path.starts_with(&ancestor.path)
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}://{}", self.scheme, self.path.display())
	}
}

impl From<&Path> for ResourceId {
	fn from(path: &Path) -> Self {
		Self::local(path)
	}
}

impl From<PathBuf> for ResourceId {
	fn from(path: PathBuf) -> Self {
		Self::local(path)
	}
}
