mod adapter;
pub mod backend;
mod cache;
mod config;
mod error;
mod id;
mod model;
mod node;
mod queue;
mod reconciler;
mod sort;
mod traversal;

pub use adapter::{
	CellValue, Column, ColumnProvider, NullSink, RecordingSink, ViewAdapter, ViewChange, ViewSink,
	ROW_INSERT_LIMIT,
};
pub use backend::local::{LocalFileSystem, NotifyChangeNotifier};
pub use backend::memory::MemoryFileSystem;
pub use backend::{ChangeNotifier, Collaborators, Enumerator, MetadataProvider, SchemeRegistry};
pub use cache::{CacheMutation, NodeCache, SubtreePlan};
pub use config::{EventPolicy, ViewModelConfig};
pub use error::{ModelError, Result};
pub use id::{ResourceId, LOCAL_SCHEME};
pub use model::{ModelState, ViewModel};
pub use node::{FileKind, FileMetadata, FileNode};
pub use queue::{ChangeKind, PendingEvent, WatchEventQueue};
pub use reconciler::{IgnoreReason, Outcome, ReconcileTarget, Reconciler, ReconcilerStats};
pub use sort::{SortKey, SortOrder, SortSpec};
pub use traversal::{DiscoveredEntry, TraversalSession};
