//! Virtual filesystem layer: generic node tree, remote mirror, content
//! cache, synthetic entries, the per-verb dispatcher and the mount
//! adapter.

pub mod cache;
pub mod dispatcher;
pub mod entry;
pub mod mirror;
pub mod mount;
pub mod node;
pub mod synthetic;

pub use cache::CacheManager;
pub use dispatcher::{ConfirmDelete, DenyAll, Dispatcher};
pub use entry::{DiskSpace, EntryAttributes, EntryKind, FileEntry, VfsError, VfsResult, VolumeInfo};
pub use mirror::NodeMirror;
pub use node::{NodeId, NodeTree};
