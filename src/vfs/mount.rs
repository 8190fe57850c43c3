//! FUSE mount adapter. Translates the kernel's inode-based callbacks
//! into the dispatcher's path-based verbs, keeping a bidirectional
//! inode/path table of its own.

use crate::vfs::dispatcher::Dispatcher;
use crate::vfs::entry::{FileEntry, VfsError};
use crate::vfs::synthetic;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, warn};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;
const BLOCK_SIZE: u32 = 512;

/// Bidirectional inode/path mapping. Inodes are handed out on first
/// sight of a path and never reused within a mount session.
struct InodeTable {
    paths: HashMap<u64, String>,
    inos: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inos: HashMap::new(),
            next: ROOT_INO + 1,
        };
        table.paths.insert(ROOT_INO, "/".to_string());
        table.inos.insert("/".to_string(), ROOT_INO);
        table
    }

    fn path(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    fn assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inos.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.inos.insert(path.to_string(), ino);
        ino
    }

    fn forget_path(&mut self, path: &str) {
        if let Some(ino) = self.inos.remove(path) {
            self.paths.remove(&ino);
        }
    }

    fn rename(&mut self, old_path: &str, new_path: &str) {
        if let Some(ino) = self.inos.remove(old_path) {
            self.inos.insert(new_path.to_string(), ino);
            self.paths.insert(ino, new_path.to_string());
        }
    }
}

pub struct MountAdapter {
    dispatcher: Arc<Dispatcher>,
    inodes: InodeTable,
    uid: u32,
    gid: u32,
}

impl MountAdapter {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        // Ownership of every entry is pinned to the mounting user.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self {
            dispatcher,
            inodes: InodeTable::new(),
            uid,
            gid,
        }
    }

    fn attr_for(&self, ino: u64, entry: &FileEntry) -> FileAttr {
        let kind = if entry.is_directory() {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let perm = match (entry.is_directory(), entry.attributes.read_only) {
            (true, _) => 0o755,
            (false, true) => 0o444,
            (false, false) => 0o644,
        };
        let created: SystemTime = entry.created.into();
        let modified: SystemTime = entry.modified.into();
        FileAttr {
            ino,
            size: entry.size,
            blocks: entry.size.div_ceil(BLOCK_SIZE as u64),
            atime: modified,
            mtime: modified,
            ctime: modified,
            crtime: created,
            kind,
            perm,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent_path = self.inodes.path(parent)?;
        let name = name.to_str()?;
        let joined = if parent_path == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent_path, name)
        };
        Some(synthetic::fold_separators(&joined))
    }
}

impl Filesystem for MountAdapter {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher.metadata(&path) {
            Ok(entry) => {
                let ino = self.inodes.assign(&path);
                reply.entry(&TTL, &self.attr_for(ino, &entry), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        if ino == ROOT_INO {
            let entry = FileEntry::directory("");
            reply.attr(&TTL, &self.attr_for(ROOT_INO, &entry));
            return;
        }
        match self.dispatcher.metadata(&path) {
            Ok(entry) => reply.attr(&TTL, &self.attr_for(ino, &entry)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.dispatcher.list_dir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut listing: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for entry in entries {
            let child = if path == "/" {
                format!("/{}", entry.name)
            } else {
                format!("{}/{}", path, entry.name)
            };
            let child_ino = self.inodes.assign(&child);
            let kind = if entry.is_directory() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            listing.push((child_ino, kind, entry.name));
        }

        for (i, (entry_ino, kind, name)) in
            listing.into_iter().enumerate().skip(offset as usize)
        {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        match self.dispatcher.read(&path, offset as u64, &mut buf) {
            Ok(count) => reply.data(&buf[..count]),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher.write(&path, offset as u64, data) {
            Ok(count) => reply.written(count as u32),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self
            .dispatcher
            .create_file(&path)
            .and_then(|_| self.dispatcher.metadata(&path))
        {
            Ok(entry) => {
                let ino = self.inodes.assign(&path);
                reply.created(&TTL, &self.attr_for(ino, &entry), 0, 0, flags as u32);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self
            .dispatcher
            .create_dir(&path)
            .and_then(|_| self.dispatcher.metadata(&path))
        {
            Ok(entry) => {
                let ino = self.inodes.assign(&path);
                reply.entry(&TTL, &self.attr_for(ino, &entry), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher.delete(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.dispatcher.delete(&path) {
            Ok(()) => {
                self.inodes.forget_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(old_path), Some(new_path)) = (
            self.child_path(parent, name),
            self.child_path(newparent, newname),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        let replace = flags & libc::RENAME_NOREPLACE == 0;
        match self.dispatcher.rename(&old_path, &new_path, replace) {
            Ok(()) => {
                self.inodes.rename(&old_path, &new_path);
                reply.ok();
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        if let Some(len) = size {
            if let Err(e) = self.dispatcher.set_len(&path, len) {
                reply.error(e.errno());
                return;
            }
        } else if let Err(e) = self.dispatcher.set_times(&path) {
            reply.error(e.errno());
            return;
        }
        match self.dispatcher.metadata(&path) {
            Ok(entry) => reply.attr(&TTL, &self.attr_for(ino, &entry)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        if synthetic::is_synthetic_path(&path) || path == "/" {
            reply.ok();
            return;
        }
        match self.dispatcher.flush(&path) {
            Ok(()) => reply.ok(),
            Err(VfsError::Unsuccessful) => {
                warn!("Flush of {} failed, keeping pending content", path);
                reply.error(libc::EIO);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let Some(path) = self.inodes.path(ino).map(str::to_string) else {
            reply.ok();
            return;
        };
        if !synthetic::is_synthetic_path(&path) && path != "/" {
            if let Err(e) = self.dispatcher.flush(&path) {
                debug!("Deferred upload of {} failed: {}", path, e);
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.dispatcher.disk_free_space() {
            Ok(space) => {
                let blocks = space.total / BLOCK_SIZE as u64;
                let free = space.free / BLOCK_SIZE as u64;
                reply.statfs(blocks, free, free, 0, 0, BLOCK_SIZE, 255, BLOCK_SIZE);
            }
            Err(e) => reply.error(e.errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_table_assign_is_stable() {
        let mut table = InodeTable::new();
        let a = table.assign("/docs");
        let b = table.assign("/docs");
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INO);
        assert_eq!(table.path(a), Some("/docs"));
    }

    #[test]
    fn test_inode_table_rename_keeps_ino() {
        let mut table = InodeTable::new();
        let ino = table.assign("/a.txt");
        table.rename("/a.txt", "/b.txt");
        assert_eq!(table.path(ino), Some("/b.txt"));
        assert_eq!(table.assign("/b.txt"), ino);
    }

    #[test]
    fn test_inode_table_forget() {
        let mut table = InodeTable::new();
        let ino = table.assign("/gone.txt");
        table.forget_path("/gone.txt");
        assert_eq!(table.path(ino), None);
        assert_ne!(table.assign("/gone.txt"), ino);
    }
}
