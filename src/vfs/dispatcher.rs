//! The filesystem operation dispatcher.
//!
//! One handler per filesystem verb. Every handler resolves its target
//! path against the current mirror snapshot, enforces policy (synthetic
//! entries, protected node kinds, trash confirmation), performs the
//! remote mutation where applicable, and forces a mirror rebuild before
//! returning, so subsequent reads observe the mutation.

use crate::mega_service::client::StorageClient;
use crate::mega_service::models::{MegaNode, NodeKind};
use crate::vfs::cache::CacheManager;
use crate::vfs::entry::{DiskSpace, FileEntry, VfsError, VfsResult, VolumeInfo};
use crate::vfs::mirror::NodeMirror;
use crate::vfs::node::{split_parent, NodeId, NodeTree};
use crate::vfs::synthetic;
use log::{debug, error, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Confirmation capability for irreversible deletes of trash contents.
/// Injected so the core stays decoupled from any presentation mechanism.
pub trait ConfirmDelete: Send + Sync {
    fn confirm(&self, description: &str) -> bool;
}

/// Refuses every irreversible delete; the safe default when no
/// interactive channel exists.
pub struct DenyAll;

impl ConfirmDelete for DenyAll {
    fn confirm(&self, _description: &str) -> bool {
        false
    }
}

pub struct Dispatcher {
    client: Arc<dyn StorageClient>,
    mirror: NodeMirror,
    cache: CacheManager,
    confirm: Box<dyn ConfirmDelete>,
    email: String,
    volume_label: String,
    runtime: Handle,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn StorageClient>,
        cache: CacheManager,
        confirm: Box<dyn ConfirmDelete>,
        email: String,
        volume_label: String,
        runtime: Handle,
    ) -> Self {
        let mirror = NodeMirror::new(client.clone());
        Self {
            client,
            mirror,
            cache,
            confirm,
            email,
            volume_label,
            runtime,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Bridge the async client into the synchronous callback contract.
    /// Handlers block their invoking thread for the duration of the
    /// remote call.
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        match Handle::try_current() {
            Ok(handle) => tokio::task::block_in_place(|| handle.block_on(future)),
            Err(_) => self.runtime.block_on(future),
        }
    }

    /// Rebuild the mirror, mapping remote failure to the generic status.
    pub fn refresh(&self) -> VfsResult<()> {
        self.block_on(self.mirror.refresh()).map_err(|e| {
            error!("Mirror refresh failed: {:#}", e);
            VfsError::Unsuccessful
        })
    }

    fn with_tree<R>(&self, f: impl FnOnce(&NodeTree<MegaNode>) -> R) -> VfsResult<R> {
        self.mirror.read(f).ok_or(VfsError::Unsuccessful)
    }

    /// Resolve a virtual path to its remote payload under the tree lock.
    fn resolve_node(&self, path: &str) -> VfsResult<Option<MegaNode>> {
        let normalized = rooted(path);
        self.with_tree(|tree| {
            tree.navigate(tree.root(), &normalized)
                .and_then(|id| tree.payload(id).cloned())
        })
    }

    // ---- directory listing ----

    /// List a directory's children. The virtual root additionally carries
    /// the two synthetic entries.
    pub fn list_dir(&self, path: &str) -> VfsResult<Vec<FileEntry>> {
        debug!("LIST: {}", path);
        let normalized = rooted(path);
        let mut entries = self
            .with_tree(|tree| {
                tree.navigate(tree.root(), &normalized).map(|dir| {
                    tree.children(dir)
                        .iter()
                        .filter_map(|&c| tree.payload(c).map(FileEntry::from_node))
                        .collect::<Vec<_>>()
                })
            })?
            .ok_or(VfsError::PathNotFound)?;

        if synthetic::is_root_path(&normalized) {
            entries.extend(synthetic::root_entries(&self.email));
        }
        Ok(entries)
    }

    /// List a directory filtered through a wildcard pattern.
    pub fn find_with_pattern(&self, path: &str, pattern: &str) -> VfsResult<Vec<FileEntry>> {
        debug!("FIND: {} pattern={}", path, pattern);
        let normalized = rooted(path);
        let mut entries = self
            .with_tree(|tree| {
                tree.navigate(tree.root(), &normalized).map(|dir| {
                    tree.find_children(dir, pattern)
                        .filter_map(|c| tree.payload(c).map(FileEntry::from_node))
                        .collect::<Vec<_>>()
                })
            })?
            .ok_or(VfsError::PathNotFound)?;

        if synthetic::is_root_path(&normalized) {
            entries.extend(
                synthetic::root_entries(&self.email)
                    .into_iter()
                    .filter(|e| crate::vfs::node::wildcard_match(pattern, &e.name)),
            );
        }
        Ok(entries)
    }

    // ---- metadata ----

    pub fn metadata(&self, path: &str) -> VfsResult<FileEntry> {
        debug!("GETATTR: {}", path);
        if synthetic::is_ini_path(path) {
            return Ok(FileEntry::synthetic(
                synthetic::INI_FILE_NAME,
                synthetic::ini_content(&self.email).len() as u64,
            ));
        }
        if synthetic::is_icon_path(path) {
            return Ok(FileEntry::synthetic(
                synthetic::ICON_FILE_NAME,
                synthetic::ICON_BYTES.len() as u64,
            ));
        }

        let normalized = rooted(path);
        match self.resolve_node(&normalized)? {
            Some(node) => Ok(FileEntry::from_node(&node)),
            None => {
                // A freshly created file exists only as staged content
                // until its first upload.
                if let Some(size) = self.cache.staged_size(&normalized) {
                    let (_, name) = split_parent(&normalized);
                    return Ok(FileEntry::staged(name, size));
                }
                Err(VfsError::FileNotFound)
            }
        }
    }

    // ---- create ----

    /// Create a directory under an existing parent via the remote API.
    pub fn create_dir(&self, path: &str) -> VfsResult<()> {
        debug!("MKDIR: {}", path);
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AlreadyExists);
        }
        let normalized = rooted(path);
        let (parent_path, name) = split_parent(&normalized);

        let parent = self
            .with_tree(|tree| {
                tree.navigate(tree.root(), &rooted(parent_path))
                    .and_then(|id| tree.payload(id).cloned())
            })?
            .ok_or(VfsError::PathNotFound)?;

        if !matches!(parent.kind, NodeKind::Folder | NodeKind::Root) {
            return Err(VfsError::PathNotFound);
        }
        let exists = self.with_tree(|tree| {
            tree.navigate(tree.root(), &rooted(parent_path))
                .and_then(|id| tree.child_by_name(id, name))
                .is_some()
        })?;
        if exists {
            return Err(VfsError::AlreadyExists);
        }

        self.block_on(self.client.create_folder(&parent.id, name))
            .map_err(|e| {
                error!("Remote folder creation failed: {:#}", e);
                VfsError::Unsuccessful
            })?;
        self.refresh()
    }

    /// Create a plain file as a staged upload: the remote object comes
    /// into being on the first flush/close, not here.
    pub fn create_file(&self, path: &str) -> VfsResult<()> {
        debug!("CREATE: {}", path);
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AlreadyExists);
        }
        let normalized = rooted(path);
        let (parent_path, _) = split_parent(&normalized);

        let parent = self
            .resolve_node(parent_path)?
            .ok_or(VfsError::PathNotFound)?;
        if !parent.is_container() {
            return Err(VfsError::PathNotFound);
        }
        if self.resolve_node(&normalized)?.is_some() {
            // Opening an existing remote file is fine; nothing to stage.
            return Ok(());
        }
        self.cache.create_staged(&normalized).map_err(|e| {
            error!("Failed to stage new file: {:#}", e);
            VfsError::Unsuccessful
        })
    }

    // ---- delete ----

    /// Delete a file or directory. Applies the protection policy before
    /// any remote call; directory deletes are recursive on the remote.
    pub fn delete(&self, path: &str) -> VfsResult<()> {
        debug!("DELETE: {}", path);
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AccessDenied);
        }
        let normalized = rooted(path);

        // Staged-only files have no remote counterpart yet.
        if self.resolve_node(&normalized)?.is_none() && self.cache.has_staged(&normalized) {
            return self.cache.clear_staged(&normalized).map_err(|e| {
                error!("Failed to drop staged file: {:#}", e);
                VfsError::Unsuccessful
            });
        }

        enum Plan {
            Denied,
            Missing,
            Recursive(MegaNode),
            Irreversible(MegaNode, String),
        }

        let plan = self.with_tree(|tree| {
            let Some(id) = tree.navigate(tree.root(), &normalized) else {
                return Plan::Missing;
            };
            let Some(node) = tree.payload(id).cloned() else {
                return Plan::Missing;
            };
            if tree.is_root(id) || node.kind.is_protected() {
                return Plan::Denied;
            }
            if in_trash(tree, id) {
                let description = delete_description(tree, id, &node);
                return Plan::Irreversible(node, description);
            }
            Plan::Recursive(node)
        })?;

        match plan {
            Plan::Missing => Err(VfsError::Unsuccessful),
            Plan::Denied => Err(VfsError::AccessDenied),
            Plan::Recursive(node) => {
                self.block_on(self.client.delete_node(&node.id, false))
                    .map_err(|e| {
                        error!("Remote delete failed: {:#}", e);
                        VfsError::Unsuccessful
                    })?;
                self.cache.evict(&node.id);
                self.refresh()
            }
            Plan::Irreversible(node, description) => {
                if !self.confirm.confirm(&description) {
                    debug!("Irreversible delete of {} declined", node.id);
                    return Err(VfsError::Unsuccessful);
                }
                self.block_on(self.client.delete_node(&node.id, true))
                    .map_err(|e| {
                        error!("Remote permanent delete failed: {:#}", e);
                        VfsError::Unsuccessful
                    })?;
                self.cache.evict(&node.id);
                self.refresh()
            }
        }
    }

    // ---- move / rename ----

    /// Move or rename an entry. A same-parent move is a pure rename;
    /// crossing parents issues the remote move, followed by a rename
    /// when the leaf name also changed.
    pub fn rename(&self, old_path: &str, new_path: &str, replace: bool) -> VfsResult<()> {
        debug!("RENAME: {} -> {} (replace={})", old_path, new_path, replace);
        if synthetic::is_synthetic_path(old_path) {
            return Err(VfsError::AccessDenied);
        }
        if synthetic::is_synthetic_path(new_path) {
            return if replace {
                Err(VfsError::AccessDenied)
            } else {
                Err(VfsError::AlreadyExists)
            };
        }

        let old_normalized = rooted(old_path);
        let new_normalized = rooted(new_path);
        let (src_parent_path, src_name) = split_parent(&old_normalized);
        let (dst_parent_path, dst_name) = split_parent(&new_normalized);

        // A staged file that has never been uploaded moves locally.
        if self.resolve_node(&old_normalized)?.is_none() && self.cache.has_staged(&old_normalized) {
            return self
                .cache
                .rename_staged(&old_normalized, &new_normalized)
                .map_err(|e| {
                    error!("Failed to move staged file: {:#}", e);
                    VfsError::Unsuccessful
                });
        }

        let src_parent = self.resolve_node(src_parent_path)?;
        let dst_parent = self.resolve_node(dst_parent_path)?;
        let (Some(src_parent), Some(dst_parent)) = (src_parent, dst_parent) else {
            return Err(VfsError::Unsuccessful);
        };
        let source = self
            .resolve_node(&old_normalized)?
            .ok_or(VfsError::Unsuccessful)?;
        if source.kind.is_protected() {
            return Err(VfsError::AccessDenied);
        }
        // A case-only rename resolves the destination to the source
        // itself; that is not a collision.
        let replaced = self
            .resolve_node(&new_normalized)?
            .filter(|target| target.id != source.id);
        if !replace && replaced.is_some() {
            return Err(VfsError::AlreadyExists);
        }

        // Retire the replaced destination node after the move so the
        // destination parent never ends up with two same-named siblings.
        let result = self.block_on(async {
            if src_parent.id != dst_parent.id {
                self.client.move_node(&source.id, &dst_parent.id).await?;
            }
            if src_name != dst_name {
                self.client.rename_node(&source.id, dst_name).await?;
            }
            if let Some(old) = &replaced {
                self.client.delete_node(&old.id, true).await?;
            }
            Ok::<(), anyhow::Error>(())
        });
        result.map_err(|e| {
            error!("Remote move failed: {:#}", e);
            VfsError::Unsuccessful
        })?;
        if let Some(old) = replaced {
            self.cache.evict(&old.id);
        }
        self.refresh()
    }

    // ---- read ----

    /// Read a byte range into `buf`, returning the number of bytes
    /// copied. Reading past end-of-content succeeds with zero bytes.
    pub fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        debug!("READ: {} offset={} size={}", path, offset, buf.len());
        if synthetic::is_ini_path(path) {
            return Ok(copy_range(synthetic::ini_content(&self.email).as_bytes(), offset, buf));
        }
        if synthetic::is_icon_path(path) {
            return Ok(copy_range(synthetic::ICON_BYTES, offset, buf));
        }

        let normalized = rooted(path);
        match self.resolve_node(&normalized)? {
            None => {
                // Staged content readable before the first upload.
                if let Some(content) = self.staged(&normalized)? {
                    return Ok(copy_range(&content, offset, buf));
                }
                Err(VfsError::PathNotFound)
            }
            Some(node) if !node.is_file() => Err(VfsError::FileNotFound),
            Some(node) => {
                // Pending local writes shadow the remote content.
                if let Some(content) = self.staged(&normalized)? {
                    return Ok(copy_range(&content, offset, buf));
                }
                let content = self
                    .block_on(self.cache.content(self.client.as_ref(), &node))
                    .map_err(|e| {
                        error!("Content fetch failed for {}: {:#}", node.id, e);
                        VfsError::Unsuccessful
                    })?;
                Ok(copy_range(&content, offset, buf))
            }
        }
    }

    fn staged(&self, normalized: &str) -> VfsResult<Option<Vec<u8>>> {
        self.cache.staged_content(normalized).map_err(|e| {
            error!("Failed to read staged content: {:#}", e);
            VfsError::Unsuccessful
        })
    }

    // ---- write path ----

    /// Before the first staged mutation of a remote file, copy the
    /// current remote content into the staging file so partial
    /// overwrites and truncations stay coherent.
    fn seed_staging(&self, normalized: &str) -> VfsResult<()> {
        if self.cache.has_staged(normalized) {
            return Ok(());
        }
        if let Some(node) = self.resolve_node(normalized)? {
            if !node.is_file() {
                return Err(VfsError::FileNotFound);
            }
            let content = self
                .block_on(self.cache.content(self.client.as_ref(), &node))
                .map_err(|e| {
                    error!("Failed to seed staging from remote: {:#}", e);
                    VfsError::Unsuccessful
                })?;
            self.cache.write_staged(normalized, 0, &content).map_err(|e| {
                error!("Failed to seed staging file: {:#}", e);
                VfsError::Unsuccessful
            })?;
        }
        Ok(())
    }

    /// Buffer a write into the staging file; the remote upload happens at
    /// flush/close.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> VfsResult<usize> {
        debug!("WRITE: {} offset={} size={}", path, offset, data.len());
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AccessDenied);
        }
        let normalized = rooted(path);
        self.seed_staging(&normalized)?;
        self.cache.write_staged(&normalized, offset, data).map_err(|e| {
            error!("Staged write failed: {:#}", e);
            VfsError::Unsuccessful
        })
    }

    /// Truncate or extend pending content.
    pub fn set_len(&self, path: &str, len: u64) -> VfsResult<()> {
        debug!("SET_LEN: {} len={}", path, len);
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AccessDenied);
        }
        let normalized = rooted(path);
        self.seed_staging(&normalized)?;
        self.cache.truncate_staged(&normalized, len).map_err(|e| {
            error!("Staged truncate failed: {:#}", e);
            VfsError::Unsuccessful
        })
    }

    /// Commit staged content to the remote, then rebuild the mirror so
    /// other handles observe up-to-date metadata. A failed upload keeps
    /// the staging file and reports the generic failure; the remote is
    /// never left with a partial object.
    pub fn flush(&self, path: &str) -> VfsResult<()> {
        debug!("FLUSH: {}", path);
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AccessDenied);
        }
        let normalized = rooted(path);

        let Some(content) = self.staged(&normalized)? else {
            return Ok(());
        };

        let (parent_path, name) = split_parent(&normalized);
        let parent = self
            .resolve_node(parent_path)?
            .ok_or(VfsError::Unsuccessful)?;

        // Replacing an existing remote file: upload the new content, then
        // retire the old node so the name stays unique.
        let previous = self.resolve_node(&normalized)?;

        let upload = self.block_on(async {
            self.client.upload(&parent.id, name, content).await?;
            if let Some(old) = &previous {
                self.client.delete_node(&old.id, true).await?;
            }
            Ok::<(), anyhow::Error>(())
        });
        upload.map_err(|e| {
            error!("Upload of {} failed: {:#}", normalized, e);
            VfsError::Unsuccessful
        })?;

        if let Some(old) = previous {
            self.cache.evict(&old.id);
        }
        if let Err(e) = self.cache.clear_staged(&normalized) {
            warn!("Failed to clear staging after upload: {:#}", e);
        }
        self.refresh()
    }

    // ---- metadata mutation stubs (remote-owned) ----

    pub fn set_attributes(&self, path: &str) -> VfsResult<()> {
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AccessDenied);
        }
        Ok(())
    }

    pub fn set_times(&self, path: &str) -> VfsResult<()> {
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AccessDenied);
        }
        Ok(())
    }

    pub fn set_security(&self, path: &str) -> VfsResult<()> {
        if synthetic::is_synthetic_path(path) {
            return Err(VfsError::AccessDenied);
        }
        Ok(())
    }

    pub fn get_security(&self, _path: &str) -> VfsResult<()> {
        Err(VfsError::NotImplemented)
    }

    // ---- locks and lifecycle ----

    pub fn lock(&self, _path: &str, _offset: u64, _len: u64) -> VfsResult<()> {
        Ok(())
    }

    pub fn unlock(&self, _path: &str, _offset: u64, _len: u64) -> VfsResult<()> {
        Ok(())
    }

    pub fn mounted(&self) -> VfsResult<()> {
        Ok(())
    }

    pub fn unmounted(&self, purge_cache: bool) -> VfsResult<()> {
        if purge_cache {
            if let Err(e) = self.cache.purge() {
                warn!("Cache purge at unmount failed: {:#}", e);
            }
        }
        Ok(())
    }

    // ---- volume ----

    pub fn disk_free_space(&self) -> VfsResult<DiskSpace> {
        let quota = self.block_on(self.client.quota()).map_err(|e| {
            error!("Quota query failed: {:#}", e);
            VfsError::Unsuccessful
        })?;
        Ok(DiskSpace {
            free: quota.free(),
            total: quota.total,
        })
    }

    pub fn volume_info(&self) -> VfsResult<VolumeInfo> {
        Ok(VolumeInfo {
            label: self.volume_label.clone(),
            filesystem_name: self.email.clone(),
        })
    }
}

/// Normalize to a rooted slash path for tree navigation. Case is kept;
/// lookups are case-insensitive, but names travel to the remote as
/// given.
fn rooted(path: &str) -> String {
    let folded = synthetic::fold_separators(path);
    if folded.starts_with('/') {
        folded
    } else {
        format!("/{}", folded)
    }
}

/// Whether any ancestor of the node is the trash container, i.e. a
/// delete would be irreversible.
fn in_trash(tree: &NodeTree<MegaNode>, id: NodeId) -> bool {
    let mut current = tree.parent(id);
    while let Some(ancestor) = current {
        if tree
            .payload(ancestor)
            .map(|n| n.kind == NodeKind::Trash)
            .unwrap_or(false)
        {
            return true;
        }
        current = tree.parent(ancestor);
    }
    false
}

fn delete_description(tree: &NodeTree<MegaNode>, id: NodeId, node: &MegaNode) -> String {
    format!(
        "You are about to delete the following file/directory permanently:\n\
         Name: {}\n\
         Path: {}\n\
         Owner: {}\n\
         Node type: {:?}\n\
         Node ID: {}\n\
         Parent ID: {}\n\
         Size: {} kB\n\
         Date created: {}\n\
         Date modified: {}",
        node.name,
        tree.path(id),
        node.owner,
        node.kind,
        node.id,
        node.parent_id,
        node.size / 1024,
        node.created,
        node.modified,
    )
}

fn copy_range(content: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    if offset >= content.len() as u64 {
        return 0;
    }
    let start = offset as usize;
    let count = buf.len().min(content.len() - start);
    buf[..count].copy_from_slice(&content[start..start + count]);
    count
}
