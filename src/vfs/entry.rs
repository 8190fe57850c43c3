use crate::mega_service::models::MegaNode;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Status codes of the filesystem callback contract. Every dispatcher
/// verb resolves to `Ok(_)` or exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VfsError {
    /// An intermediate path segment failed to resolve
    #[error("path not found")]
    PathNotFound,
    /// The leaf resolved to nothing, or to the wrong entry type
    #[error("file not found")]
    FileNotFound,
    /// Create or move collided with an existing entry
    #[error("file already exists")]
    AlreadyExists,
    /// Policy-protected target (synthetic entry, protected node kind,
    /// declined irreversible delete)
    #[error("access denied")]
    AccessDenied,
    /// Remote API failure or malformed preconditions
    #[error("operation unsuccessful")]
    Unsuccessful,
    /// Explicitly deferred verb
    #[error("not implemented")]
    NotImplemented,
}

impl VfsError {
    /// Errno presented to the host driver.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::PathNotFound => libc::ENOENT,
            VfsError::FileNotFound => libc::ENOENT,
            VfsError::AlreadyExists => libc::EEXIST,
            VfsError::AccessDenied => libc::EACCES,
            VfsError::Unsuccessful => libc::EIO,
            VfsError::NotImplemented => libc::ENOSYS,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Presentation attributes of a directory entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryAttributes {
    pub hidden: bool,
    pub system: bool,
    pub read_only: bool,
}

impl EntryAttributes {
    /// Attribute set of the two synthetic entries.
    pub fn synthetic() -> Self {
        Self {
            hidden: true,
            system: true,
            read_only: true,
        }
    }
}

/// Metadata of one filesystem entry as handed to the host driver.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub attributes: EntryAttributes,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl FileEntry {
    pub fn from_node(node: &MegaNode) -> Self {
        let kind = if node.is_container() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Self {
            name: node.name.clone(),
            kind,
            size: if node.is_file() { node.size } else { 0 },
            attributes: EntryAttributes::default(),
            created: node.created,
            modified: node.modified,
        }
    }

    /// Synthetic entries carry a fixed timestamp so repeated metadata
    /// queries agree.
    pub fn synthetic(name: &str, size: u64) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            name: name.to_string(),
            kind: EntryKind::File,
            size,
            attributes: EntryAttributes::synthetic(),
            created: epoch,
            modified: epoch,
        }
    }

    /// Entry for a directory fabricated locally, e.g. the virtual root.
    pub fn directory(name: &str) -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            name: name.to_string(),
            kind: EntryKind::Directory,
            size: 0,
            attributes: EntryAttributes::default(),
            created: epoch,
            modified: epoch,
        }
    }

    /// Entry for a file that exists only as pending local content.
    pub fn staged(name: &str, size: u64) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            kind: EntryKind::File,
            size,
            attributes: EntryAttributes::default(),
            created: now,
            modified: now,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Volume identification reported to the host.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub label: String,
    /// Filesystem name slot carries the mounted account's email
    pub filesystem_name: String,
}

/// Used/total byte counts from the remote quota query.
#[derive(Debug, Clone, Copy)]
pub struct DiskSpace {
    pub free: u64,
    pub total: u64,
}
