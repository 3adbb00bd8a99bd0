//! Virtual Filesystem Adapter — exposes the catalog as a read-only
//! userspace filesystem.
//!
//! Grounded on `pbs-pxar-fuse`'s `Session`/`Operations` split for the
//! overall shape (one adapter struct holding shared state, per-request
//! dispatch), but implemented against the `fuser` crate's synchronous
//! `Filesystem` trait rather than `proxmox-fuse`'s async request stream,
//! since spec.md §5 states the scheduling model is "multiple OS threads...
//! no cooperative async core" — fuser's threaded-callback model, not
//! proxmox-fuse's single-task-polling-a-channel model.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen,
    ReplyStatfs, Request,
};
use log::{error, warn};

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::error::TapeVaultError;
use crate::tape::changer::ChangerInterface;
use crate::tape::fetcher::Fetcher;
use crate::tape::orchestrator::TapeOrchestrator;

const ROOT_INODE: u64 = 1;
const TTL: Duration = Duration::from_secs(1);

/// Bidirectional path <-> inode table. FUSE's lowlevel protocol is
/// inode-addressed, so the catalog's path-addressed rows are mapped
/// through this table; inodes are assigned on first lookup and kept for
/// the lifetime of the mount (they are never recycled, which is
/// acceptable since the core does not evict entries at runtime other than
/// at reconciliation, itself a startup-only event per spec.md §9).
struct InodeTable {
    path_to_ino: HashMap<String, u64>,
    ino_to_path: HashMap<u64, String>,
    next_ino: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut ino_to_path = HashMap::new();
        ino_to_path.insert(ROOT_INODE, String::new());
        InodeTable {
            path_to_ino: HashMap::new(),
            ino_to_path,
            next_ino: ROOT_INODE + 1,
        }
    }

    fn ino_for_path(&mut self, path: &str) -> u64 {
        if path.is_empty() {
            return ROOT_INODE;
        }
        if let Some(ino) = self.path_to_ino.get(path) {
            return *ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.path_to_ino.insert(path.to_string(), ino);
        self.ino_to_path.insert(ino, path.to_string());
        ino
    }

    fn path_for_ino(&self, ino: u64) -> Option<&str> {
        self.ino_to_path.get(&ino).map(|s| s.as_str())
    }
}

/// What kind of catalog entry a path resolves to.
enum Resolved {
    Root,
    File { size: i64, mtime: i64 },
    Directory,
}

/// An open cached file descriptor, keyed by file handle.
struct OpenFile {
    file: File,
}

pub struct VaultFs {
    catalog: Mutex<CatalogStore>,
    fetcher_config: Config,
    changer: ChangerInterface,
    orchestrator: TapeOrchestrator,
    inodes: Mutex<InodeTable>,
    open_files: Mutex<HashMap<u64, OpenFile>>,
    next_fh: AtomicU64,
}

impl VaultFs {
    pub fn new(config: Config, catalog: CatalogStore) -> Self {
        let changer = ChangerInterface::new(config.changer_device.clone());
        let orchestrator = TapeOrchestrator::new(&config);
        VaultFs {
            catalog: Mutex::new(catalog),
            fetcher_config: config,
            changer,
            orchestrator,
            inodes: Mutex::new(InodeTable::new()),
            open_files: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn resolve(&self, clean_path: &str) -> Result<Resolved, TapeVaultError> {
        if clean_path.is_empty() {
            return Ok(Resolved::Root);
        }
        let catalog = self.catalog.lock().unwrap();
        if let Some((_volume_tag, size, mtime)) = catalog.lookup_file(clean_path)? {
            return Ok(Resolved::File { size, mtime });
        }
        if catalog.has_children(clean_path)? {
            return Ok(Resolved::Directory);
        }
        Err(TapeVaultError::NotFound(clean_path.to_string()))
    }

    fn attr_for(&self, ino: u64, resolved: &Resolved) -> FileAttr {
        match resolved {
            Resolved::Root | Resolved::Directory => directory_attr(ino),
            Resolved::File { size, mtime, .. } => file_attr(ino, *size as u64, *mtime),
        }
    }
}

fn directory_attr(ino: u64) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino,
        size: 0,
        blocks: 0,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: FileType::Directory,
        perm: 0o755,
        nlink: 2,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

fn file_attr(ino: u64, size: u64, mtime: i64) -> FileAttr {
    let mtime = UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64);
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind: FileType::RegularFile,
        perm: 0o444,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

impl Filesystem for VaultFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent_path = {
            let inodes = self.inodes.lock().unwrap();
            match inodes.path_for_ino(parent) {
                Some(p) => p.to_string(),
                None => return reply.error(libc::ENOENT),
            }
        };
        let name = match name.to_str() {
            Some(n) => n,
            None => return reply.error(libc::ENOENT),
        };
        let child_path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{parent_path}/{name}")
        };

        match self.resolve(&child_path) {
            Ok(resolved) => {
                let ino = self.inodes.lock().unwrap().ino_for_path(&child_path);
                let attr = self.attr_for(ino, &resolved);
                reply.entry(&TTL, &attr, 0);
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = {
            let inodes = self.inodes.lock().unwrap();
            match inodes.path_for_ino(ino) {
                Some(p) => p.to_string(),
                None => return reply.error(libc::ENOENT),
            }
        };
        match self.resolve(&path) {
            Ok(resolved) => reply.attr(&TTL, &self.attr_for(ino, &resolved)),
            Err(err) => reply.error(err.to_errno()),
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
        let path = {
            let inodes = self.inodes.lock().unwrap();
            match inodes.path_for_ino(ino) {
                Some(p) => p.to_string(),
                None => return reply.error(libc::ENOENT),
            }
        };

        let children = {
            let catalog = self.catalog.lock().unwrap();
            match catalog.children_under(&path) {
                Ok(rows) => rows,
                Err(err) => {
                    error!("readdir({path}) catalog query failed: {err}");
                    return reply.error(libc::EIO);
                }
            }
        };

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        // Deduplicate first path segments; order is stable within one
        // call but otherwise unspecified, per spec.md §4.8.
        let mut seen = std::collections::BTreeSet::new();
        let mut first_segments = Vec::new();
        for child in &children {
            let remainder = &child[prefix.len()..];
            let segment = remainder.split('/').next().unwrap_or(remainder);
            if seen.insert(segment.to_string()) {
                first_segments.push(segment.to_string());
            }
        }

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (ino, FileType::Directory, "..".to_string()),
        ];
        for segment in first_segments {
            let child_path = format!("{prefix}{segment}");
            let kind = match self.resolve(&child_path) {
                Ok(Resolved::File { .. }) => FileType::RegularFile,
                _ => FileType::Directory,
            };
            let child_ino = self.inodes.lock().unwrap().ino_for_path(&child_path);
            entries.push((child_ino, kind, segment));
        }

        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if flags & (libc::O_WRONLY | libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC) != 0 {
            return reply.error(libc::EROFS);
        }

        let path = {
            let inodes = self.inodes.lock().unwrap();
            match inodes.path_for_ino(ino) {
                Some(p) => p.to_string(),
                None => return reply.error(libc::ENOENT),
            }
        };

        let (volume_tag, _size, _mtime) = match self.catalog.lock().unwrap().lookup_file(&path) {
            Ok(Some(row)) => row,
            Ok(None) => return reply.error(libc::ENOENT),
            Err(err) => {
                error!("open({path}) catalog lookup failed: {err}");
                return reply.error(libc::EIO);
            }
        };

        let relative = path.clone();
        let cache_path: PathBuf = {
            let existing = self.fetcher_config.cache_path(&volume_tag, &relative);
            if existing.exists() {
                existing
            } else {
                let fetcher = Fetcher::new(&self.fetcher_config, &self.changer, &self.orchestrator);
                match fetcher.fetch(&volume_tag, &relative) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!("fetch({volume_tag}/{relative}) failed: {err}");
                        return reply.error(err.to_errno());
                    }
                }
            }
        };

        match File::open(&cache_path) {
            Ok(file) => {
                let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
                self.open_files
                    .lock()
                    .unwrap()
                    .insert(fh, OpenFile { file });
                reply.opened(fh, 0);
            }
            Err(err) => {
                error!("open of cache file {cache_path:?} failed: {err}");
                reply.error(err.raw_os_error().unwrap_or(libc::EIO));
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let open_files = self.open_files.lock().unwrap();
        let entry = match open_files.get(&fh) {
            Some(entry) => entry,
            None => return reply.error(libc::EBADF),
        };

        let mut buf = vec![0u8; size as usize];
        match entry.file.read_at(&mut buf, offset.max(0) as u64) {
            Ok(n) => reply.data(&buf[..n]),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.open_files.lock().unwrap().remove(&fh);
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let (total, free) = match self.catalog.lock().unwrap().total_capacity() {
            Ok(v) => v,
            Err(err) => {
                error!("statfs catalog query failed: {err}");
                return reply.error(libc::EIO);
            }
        };
        const BSIZE: u64 = 4096;
        let blocks = total as u64 / BSIZE;
        let bfree = free as u64 / BSIZE;
        reply.statfs(blocks, bfree, bfree, 0, 0, BSIZE as u32, 255, 0);
    }
}
