//! A [`RawFileSystem`] that mirrors a local directory.
//!
//! Used by `fuserpc serve` and by the end-to-end tests. Node ids are
//! assigned on lookup and map to paths relative to the root; node 1 is the
//! root itself. Extended attributes, locks, `lseek`, `fallocate`,
//! `copy_file_range` and `mknod` are left unimplemented.

use crate::error::ServerError;
use crate::handles::{Handle, HandleTable};
use filetime::FileTime;
use fuserpc_core::abi::{
    AccessIn, Attr, AttrOut, CreateIn, CreateOut, EntryOut, FlushIn, FsyncIn, GetAttrIn, InHeader, LinkIn,
    MkdirIn, OpenIn, OpenOut, Owner, ROOT_ID, ReadIn, ReleaseIn, RenameIn, SetAttrIn, StatfsOut, WriteIn,
    setattr_valid,
};
use fuserpc_core::{Cancel, DirEntry, DirEntryList, RawFileSystem, Status};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File, Metadata, OpenOptions};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{DirBuilderExt, DirEntryExt, FileExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// How long the kernel may cache entries and attributes.
const TTL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Node {
    /// Path relative to the root; empty for the root.
    path: PathBuf,
    lookups: u64,
}

#[derive(Debug)]
struct NodeTable {
    by_id: HashMap<u64, Node>,
    by_path: HashMap<PathBuf, u64>,
    next_id: u64,
}

impl NodeTable {
    fn new() -> Self {
        let mut by_id = HashMap::new();
        by_id.insert(
            ROOT_ID,
            Node {
                path: PathBuf::new(),
                lookups: 1,
            },
        );
        let mut by_path = HashMap::new();
        by_path.insert(PathBuf::new(), ROOT_ID);
        Self {
            by_id,
            by_path,
            next_id: ROOT_ID + 1,
        }
    }

    /// Returns the node for `path`, adding one lookup reference.
    fn acquire(&mut self, path: &Path) -> u64 {
        if let Some(&id) = self.by_path.get(path) {
            if let Some(node) = self.by_id.get_mut(&id) {
                node.lookups += 1;
            }
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_id.insert(
            id,
            Node {
                path: path.to_path_buf(),
                lookups: 1,
            },
        );
        self.by_path.insert(path.to_path_buf(), id);
        id
    }

    fn forget(&mut self, id: u64, nlookup: u64) {
        if id == ROOT_ID {
            return;
        }
        let Some(node) = self.by_id.get_mut(&id) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(nlookup);
        if node.lookups == 0
            && let Some(node) = self.by_id.remove(&id)
            && self.by_path.get(&node.path) == Some(&id)
        {
            self.by_path.remove(&node.path);
        }
    }

    /// Re-homes `from` and everything below it to `to`.
    fn rename(&mut self, from: &Path, to: &Path) {
        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, &id)| (path.clone(), id))
            .collect();
        for (old, id) in moved {
            self.by_path.remove(&old);
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            if let Some(node) = self.by_id.get_mut(&id) {
                node.path.clone_from(&new);
            }
            self.by_path.insert(new, id);
        }
    }
}

/// Raw filesystem backed by a directory on the local disk.
#[derive(Debug)]
pub struct LoopbackFileSystem {
    root: PathBuf,
    nodes: Mutex<NodeTable>,
    handles: HandleTable,
    debug: AtomicBool,
}

impl LoopbackFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ServerError::NotADirectory(root.display().to_string()));
        }
        Ok(Self {
            root,
            nodes: Mutex::new(NodeTable::new()),
            handles: HandleTable::new(),
            debug: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of open file and directory handles.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn relative(&self, node_id: u64) -> Result<PathBuf, Status> {
        self.nodes
            .lock()
            .by_id
            .get(&node_id)
            .map(|node| node.path.clone())
            .ok_or(Status::ENOENT)
    }

    fn path(&self, node_id: u64) -> Result<PathBuf, Status> {
        Ok(self.root.join(self.relative(node_id)?))
    }

    /// Relative path of `name` inside directory `parent`.
    fn child(&self, parent: u64, name: &str) -> Result<PathBuf, Status> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(Status::EINVAL);
        }
        Ok(self.relative(parent)?.join(name))
    }

    /// Stats `rel`, registers it as a node and fills `out`.
    fn entry(&self, rel: &Path, out: &mut EntryOut) -> Status {
        match fs::symlink_metadata(self.root.join(rel)) {
            Ok(meta) => {
                let node_id = self.nodes.lock().acquire(rel);
                *out = entry_out(node_id, &meta);
                if self.debug.load(Ordering::Relaxed) {
                    debug!(node_id, path = %rel.display(), "entry");
                } else {
                    trace!(node_id, path = %rel.display(), "entry");
                }
                Status::OK
            }
            Err(e) => Status::from(e),
        }
    }

    fn with_file<T>(&self, fh: u64, f: impl FnOnce(&File) -> Result<T, Status>) -> Result<T, Status> {
        match self.handles.get(fh).as_deref() {
            Some(Handle::File(file)) => f(file),
            _ => Err(Status::EBADF),
        }
    }

    fn set_times(path: &Path, input: &SetAttrIn, meta: &Metadata) -> std::io::Result<()> {
        let pick = |set: u32, now: u32, secs: u64, nsec: u32, current: FileTime| {
            if input.valid & now != 0 {
                FileTime::now()
            } else if input.valid & set != 0 {
                FileTime::from_unix_time(i64::try_from(secs).unwrap_or(i64::MAX), nsec)
            } else {
                current
            }
        };
        let atime = pick(
            setattr_valid::ATIME,
            setattr_valid::ATIME_NOW,
            input.atime,
            input.atimensec,
            FileTime::from_last_access_time(meta),
        );
        let mtime = pick(
            setattr_valid::MTIME,
            setattr_valid::MTIME_NOW,
            input.mtime,
            input.mtimensec,
            FileTime::from_last_modification_time(meta),
        );
        filetime::set_symlink_file_times(path, atime, mtime)
    }

    fn apply_set_attr(&self, input: &SetAttrIn) -> Result<Metadata, Status> {
        let path = self.path(input.header.node_id)?;

        if let Some(mode) = input.mode() {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        if input.uid().is_some() || input.gid().is_some() {
            std::os::unix::fs::lchown(&path, input.uid(), input.gid())?;
        }
        if let Some(size) = input.size() {
            match input.fh() {
                Some(fh) => self.with_file(fh, |file| file.set_len(size).map_err(Status::from))?,
                None => OpenOptions::new().write(true).open(&path)?.set_len(size)?,
            }
        }
        let time_bits = setattr_valid::ATIME | setattr_valid::MTIME | setattr_valid::ATIME_NOW | setattr_valid::MTIME_NOW;
        if input.valid & time_bits != 0 {
            let meta = fs::symlink_metadata(&path)?;
            Self::set_times(&path, input, &meta)?;
        }
        Ok(fs::symlink_metadata(&path)?)
    }

    fn list_dir(&self, node_id: u64) -> Result<Vec<DirEntry>, Status> {
        let path = self.path(node_id)?;
        let meta = fs::metadata(&path)?;
        let mut entries = vec![
            DirEntry::new(".", meta.ino(), libc::S_IFDIR as u32),
            DirEntry::new("..", 0, libc::S_IFDIR as u32),
        ];
        for dirent in fs::read_dir(&path)? {
            let dirent = dirent?;
            let file_type = dirent.file_type()?;
            entries.push(DirEntry::new(
                dirent.file_name().into_vec(),
                dirent.ino(),
                file_type_mode(file_type),
            ));
        }
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.off = i as u64 + 1;
        }
        Ok(entries)
    }

    fn dir_entries(&self, fh: u64) -> Result<Vec<DirEntry>, Status> {
        match self.handles.get(fh).as_deref() {
            Some(Handle::Dir(entries)) => Ok(entries.clone()),
            _ => Err(Status::EBADF),
        }
    }
}

fn secs(t: i64) -> u64 {
    u64::try_from(t).unwrap_or(0)
}

fn nsecs(t: i64) -> u32 {
    u32::try_from(t).unwrap_or(0)
}

#[allow(clippy::cast_possible_truncation)]
fn attr(meta: &Metadata) -> Attr {
    Attr {
        ino: meta.ino(),
        size: meta.size(),
        blocks: meta.blocks(),
        atime: secs(meta.atime()),
        mtime: secs(meta.mtime()),
        ctime: secs(meta.ctime()),
        atimensec: nsecs(meta.atime_nsec()),
        mtimensec: nsecs(meta.mtime_nsec()),
        ctimensec: nsecs(meta.ctime_nsec()),
        mode: meta.mode(),
        nlink: u32::try_from(meta.nlink()).unwrap_or(u32::MAX),
        owner: Owner {
            uid: meta.uid(),
            gid: meta.gid(),
        },
        rdev: meta.rdev() as u32,
        #[cfg(target_os = "linux")]
        blksize: u32::try_from(meta.blksize()).unwrap_or(u32::MAX),
        ..Attr::default()
    }
}

fn entry_out(node_id: u64, meta: &Metadata) -> EntryOut {
    EntryOut {
        node_id,
        generation: 0,
        entry_valid: TTL.as_secs(),
        attr_valid: TTL.as_secs(),
        entry_valid_nsec: TTL.subsec_nanos(),
        attr_valid_nsec: TTL.subsec_nanos(),
        attr: attr(meta),
    }
}

fn attr_out(meta: &Metadata) -> AttrOut {
    AttrOut {
        attr_valid: TTL.as_secs(),
        attr_valid_nsec: TTL.subsec_nanos(),
        dummy: 0,
        attr: attr(meta),
    }
}

fn file_type_mode(ft: fs::FileType) -> u32 {
    let bits = if ft.is_dir() {
        libc::S_IFDIR
    } else if ft.is_symlink() {
        libc::S_IFLNK
    } else if ft.is_fifo() {
        libc::S_IFIFO
    } else if ft.is_socket() {
        libc::S_IFSOCK
    } else if ft.is_char_device() {
        libc::S_IFCHR
    } else if ft.is_block_device() {
        libc::S_IFBLK
    } else {
        libc::S_IFREG
    };
    bits as u32
}

/// Translates kernel open flags into `OpenOptions`.
fn open_options(flags: u32) -> OpenOptions {
    let flags = flags.cast_signed();
    let mut opts = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_RDONLY => opts.read(true),
        libc::O_WRONLY => opts.write(true),
        _ => opts.read(true).write(true),
    };
    if flags & libc::O_APPEND != 0 {
        opts.append(true);
    }
    if flags & libc::O_TRUNC != 0 {
        opts.truncate(true);
    }
    opts.custom_flags(flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC | libc::O_APPEND));
    opts
}

fn read_full_at(file: &File, buf: &mut [u8], mut offset: u64) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn errno(e: nix::errno::Errno) -> Status {
    Status::from_code(e as i32)
}

impl RawFileSystem for LoopbackFileSystem {
    fn string(&self) -> String {
        format!("loopback:{}", self.root.display())
    }

    fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    fn lookup(&self, _cancel: &Cancel, header: &InHeader, name: &str, out: &mut EntryOut) -> Status {
        match self.child(header.node_id, name) {
            Ok(rel) => self.entry(&rel, out),
            Err(status) => status,
        }
    }

    fn forget(&self, node_id: u64, nlookup: u64) {
        self.nodes.lock().forget(node_id, nlookup);
    }

    fn get_attr(&self, _cancel: &Cancel, input: &GetAttrIn, out: &mut AttrOut) -> Status {
        let meta = match input.fh() {
            Some(fh) => self.with_file(fh, |file| file.metadata().map_err(Status::from)),
            None => self
                .path(input.header.node_id)
                .and_then(|path| fs::symlink_metadata(path).map_err(Status::from)),
        };
        match meta {
            Ok(meta) => {
                *out = attr_out(&meta);
                Status::OK
            }
            Err(status) => status,
        }
    }

    fn set_attr(&self, _cancel: &Cancel, input: &SetAttrIn, out: &mut AttrOut) -> Status {
        match self.apply_set_attr(input) {
            Ok(meta) => {
                *out = attr_out(&meta);
                Status::OK
            }
            Err(status) => status,
        }
    }

    fn mkdir(&self, _cancel: &Cancel, input: &MkdirIn, name: &str, out: &mut EntryOut) -> Status {
        let rel = match self.child(input.header.node_id, name) {
            Ok(rel) => rel,
            Err(status) => return status,
        };
        let created = fs::DirBuilder::new()
            .mode(input.mode & !input.umask & 0o7777)
            .create(self.root.join(&rel));
        match created {
            Ok(()) => self.entry(&rel, out),
            Err(e) => Status::from(e),
        }
    }

    fn unlink(&self, _cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        match self.child(header.node_id, name) {
            Ok(rel) => fs::remove_file(self.root.join(rel)).map_or_else(Status::from, |()| Status::OK),
            Err(status) => status,
        }
    }

    fn rmdir(&self, _cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        match self.child(header.node_id, name) {
            Ok(rel) => fs::remove_dir(self.root.join(rel)).map_or_else(Status::from, |()| Status::OK),
            Err(status) => status,
        }
    }

    fn rename(&self, _cancel: &Cancel, input: &RenameIn, old_name: &str, new_name: &str) -> Status {
        if input.flags != 0 {
            return Status::EINVAL;
        }
        let (from, to) = match (
            self.child(input.header.node_id, old_name),
            self.child(input.newdir, new_name),
        ) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(status), _) | (_, Err(status)) => return status,
        };
        match fs::rename(self.root.join(&from), self.root.join(&to)) {
            Ok(()) => {
                self.nodes.lock().rename(&from, &to);
                Status::OK
            }
            Err(e) => Status::from(e),
        }
    }

    fn link(&self, _cancel: &Cancel, input: &LinkIn, filename: &str, out: &mut EntryOut) -> Status {
        let (target, rel) = match (self.path(input.oldnodeid), self.child(input.header.node_id, filename)) {
            (Ok(target), Ok(rel)) => (target, rel),
            (Err(status), _) | (_, Err(status)) => return status,
        };
        match fs::hard_link(target, self.root.join(&rel)) {
            Ok(()) => self.entry(&rel, out),
            Err(e) => Status::from(e),
        }
    }

    fn symlink(
        &self,
        _cancel: &Cancel,
        header: &InHeader,
        pointed_to: &str,
        link_name: &str,
        out: &mut EntryOut,
    ) -> Status {
        let rel = match self.child(header.node_id, link_name) {
            Ok(rel) => rel,
            Err(status) => return status,
        };
        match std::os::unix::fs::symlink(pointed_to, self.root.join(&rel)) {
            Ok(()) => self.entry(&rel, out),
            Err(e) => Status::from(e),
        }
    }

    fn readlink(&self, _cancel: &Cancel, header: &InHeader) -> Result<Vec<u8>, Status> {
        let target = fs::read_link(self.path(header.node_id)?)?;
        Ok(target.as_os_str().as_bytes().to_vec())
    }

    fn access(&self, _cancel: &Cancel, input: &AccessIn) -> Status {
        let path = match self.path(input.header.node_id) {
            Ok(path) => path,
            Err(status) => return status,
        };
        let mode = nix::unistd::AccessFlags::from_bits_truncate(input.mask.cast_signed());
        match nix::unistd::access(&path, mode) {
            Ok(()) => Status::OK,
            Err(e) => errno(e),
        }
    }

    fn create(&self, _cancel: &Cancel, input: &CreateIn, name: &str, out: &mut CreateOut) -> Status {
        let rel = match self.child(input.header.node_id, name) {
            Ok(rel) => rel,
            Err(status) => return status,
        };
        let mut opts = open_options(input.flags);
        if input.flags.cast_signed() & libc::O_EXCL != 0 {
            opts.create_new(true);
        } else {
            opts.create(true);
        }
        opts.mode(input.mode & !input.umask & 0o7777);
        let file = match opts.open(self.root.join(&rel)) {
            Ok(file) => file,
            Err(e) => return Status::from(e),
        };
        let status = self.entry(&rel, &mut out.entry_out);
        if status.is_ok() {
            out.open_out = OpenOut {
                fh: self.handles.insert(Handle::File(file)),
                ..OpenOut::default()
            };
        }
        status
    }

    fn open(&self, _cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        let path = match self.path(input.header.node_id) {
            Ok(path) => path,
            Err(status) => return status,
        };
        match open_options(input.flags).open(path) {
            Ok(file) => {
                *out = OpenOut {
                    fh: self.handles.insert(Handle::File(file)),
                    ..OpenOut::default()
                };
                Status::OK
            }
            Err(e) => Status::from(e),
        }
    }

    fn read(&self, cancel: &Cancel, input: &ReadIn, buf: &mut [u8]) -> Result<usize, Status> {
        if cancel.is_closed() {
            return Err(Status::EINTR);
        }
        self.with_file(input.fh, |file| read_full_at(file, buf, input.offset).map_err(Status::from))
    }

    fn release(&self, _cancel: &Cancel, input: &ReleaseIn) {
        if self.handles.remove(input.fh).is_none() {
            debug!(fh = input.fh, "release of unknown handle");
        }
    }

    fn write(&self, _cancel: &Cancel, input: &WriteIn, data: &[u8]) -> Result<u32, Status> {
        self.with_file(input.fh, |file| {
            file.write_all_at(data, input.offset)?;
            u32::try_from(data.len()).map_err(|_| Status::EINVAL)
        })
    }

    fn flush(&self, _cancel: &Cancel, input: &FlushIn) -> Status {
        self.with_file(input.fh, |_| Ok(())).map_or_else(|status| status, |()| Status::OK)
    }

    fn fsync(&self, _cancel: &Cancel, input: &FsyncIn) -> Status {
        let data_only = input.fsync_flags & 1 != 0;
        self.with_file(input.fh, |file| {
            let synced = if data_only { file.sync_data() } else { file.sync_all() };
            synced.map_err(Status::from)
        })
        .map_or_else(|status| status, |()| Status::OK)
    }

    fn open_dir(&self, _cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        match self.list_dir(input.header.node_id) {
            Ok(entries) => {
                *out = OpenOut {
                    fh: self.handles.insert(Handle::Dir(entries)),
                    ..OpenOut::default()
                };
                Status::OK
            }
            Err(status) => status,
        }
    }

    fn read_dir(&self, _cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        let entries = match self.dir_entries(input.fh) {
            Ok(entries) => entries,
            Err(status) => return status,
        };
        let start = usize::try_from(input.offset).unwrap_or(usize::MAX);
        for entry in entries.iter().skip(start) {
            if !out.add_dir_entry(entry) {
                break;
            }
        }
        Status::OK
    }

    fn read_dir_plus(&self, cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        let entries = match self.dir_entries(input.fh) {
            Ok(entries) => entries,
            Err(status) => return status,
        };
        let parent = match self.relative(input.header.node_id) {
            Ok(parent) => parent,
            Err(status) => return status,
        };
        let start = usize::try_from(input.offset).unwrap_or(usize::MAX);
        for entry in entries.iter().skip(start) {
            if cancel.is_closed() {
                return Status::EINTR;
            }
            let mut entry_out = EntryOut::default();
            let looked_up = entry.name != b"." && entry.name != b".." && {
                let rel = parent.join(OsStr::from_bytes(&entry.name));
                self.entry(&rel, &mut entry_out).is_ok()
            };
            if !out.add_dir_lookup_entry(entry, &entry_out) {
                if looked_up {
                    self.forget(entry_out.node_id, 1);
                }
                break;
            }
        }
        Status::OK
    }

    fn release_dir(&self, input: &ReleaseIn) {
        self.handles.remove(input.fh);
    }

    fn fsync_dir(&self, _cancel: &Cancel, input: &FsyncIn) -> Status {
        match self.handles.get(input.fh).as_deref() {
            Some(Handle::Dir(_)) => Status::OK,
            _ => Status::EBADF,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::unnecessary_cast, clippy::useless_conversion)]
    fn stat_fs(&self, _cancel: &Cancel, _header: &InHeader, out: &mut StatfsOut) -> Status {
        match nix::sys::statvfs::statvfs(&self.root) {
            Ok(stat) => {
                let bsize = stat.fragment_size() as u32;
                *out = StatfsOut {
                    blocks: u64::from(stat.blocks()),
                    bfree: u64::from(stat.blocks_free()),
                    bavail: u64::from(stat.blocks_available()),
                    files: u64::from(stat.files()),
                    ffree: u64::from(stat.files_free()),
                    bsize,
                    name_len: stat.name_max() as u32,
                    frsize: bsize,
                    ..StatfsOut::default()
                };
                Status::OK
            }
            Err(e) => errno(e),
        }
    }
}
