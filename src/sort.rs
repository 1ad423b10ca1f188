//! Sorting policy for the ordered view
//!
//! Every comparator puts directories before non-directories regardless of key
//! or direction. The direction only flips the key comparison; ties on the key
//! fall back to the case-insensitive name and then the identifier so that the
//! order is total and identical for bulk and live insertion.

use crate::node::FileNode;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortKey {
	Name,
	Size,
	Type,
	Modified,
	Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
	Ascending,
	Descending,
}

/// Active sort key plus direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
	pub key: SortKey,
	pub order: SortOrder,
}

impl SortSpec {
	pub fn new(key: SortKey, order: SortOrder) -> Self {
		Self { key, order }
	}

	pub fn ascending(key: SortKey) -> Self {
		Self::new(key, SortOrder::Ascending)
	}

	pub fn descending(key: SortKey) -> Self {
		Self::new(key, SortOrder::Descending)
	}

	/// Comparator for this key and direction
	pub fn comparator(&self) -> fn(&FileNode, &FileNode) -> Ordering {
		match self.key {
			SortKey::Name => compare_name,
			SortKey::Size => compare_size,
			SortKey::Type => compare_type,
			SortKey::Modified => compare_modified,
			SortKey::Created => compare_created,
		}
	}

	pub fn compare(&self, a: &FileNode, b: &FileNode) -> Ordering {
		directories_first(a, b)
			.then_with(|| {
				let by_key = (self.comparator())(a, b);
				match self.order {
					SortOrder::Ascending => by_key,
					SortOrder::Descending => by_key.reverse(),
				}
			})
			.then_with(|| compare_name(a, b))
			.then_with(|| a.id().cmp(b.id()))
	}
}

impl Default for SortSpec {
	fn default() -> Self {
		Self::ascending(SortKey::Name)
	}
}

impl fmt::Display for SortKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let label = match self {
			SortKey::Name => "name",
			SortKey::Size => "size",
			SortKey::Type => "type",
			SortKey::Modified => "modified",
			SortKey::Created => "created",
		};
		f.write_str(label)
	}
}

impl FromStr for SortKey {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"name" => Ok(SortKey::Name),
			"size" => Ok(SortKey::Size),
			"type" | "mime" => Ok(SortKey::Type),
			"modified" | "mtime" => Ok(SortKey::Modified),
			"created" | "ctime" => Ok(SortKey::Created),
			other => Err(format!("unknown sort key '{other}'")),
		}
	}
}

fn directories_first(a: &FileNode, b: &FileNode) -> Ordering {
	b.is_dir().cmp(&a.is_dir())
}

/// Case-insensitive, compared char by char without building lowered copies
fn compare_name(a: &FileNode, b: &FileNode) -> Ordering {
	a.name()
		.chars()
		.flat_map(char::to_lowercase)
		.cmp(b.name().chars().flat_map(char::to_lowercase))
}

fn compare_size(a: &FileNode, b: &FileNode) -> Ordering {
	a.metadata().size.cmp(&b.metadata().size)
}

fn compare_type(a: &FileNode, b: &FileNode) -> Ordering {
	a.metadata().type_name().cmp(&b.metadata().type_name())
}

// Missing timestamps sort before any known one.
fn compare_modified(a: &FileNode, b: &FileNode) -> Ordering {
	a.metadata().modified.cmp(&b.metadata().modified)
}

fn compare_created(a: &FileNode, b: &FileNode) -> Ordering {
	a.metadata().created.cmp(&b.metadata().created)
}
