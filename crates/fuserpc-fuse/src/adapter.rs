//! Kernel-facing adapter.
//!
//! [`FuseAdapter`] receives callbacks from the fuser session loop, rebuilds
//! the native request structures and hands them to a [`RawFileSystem`]. The
//! filesystem's replies are converted back into fuser replies.
//!
//! The node ids a filesystem hands out are passed to the kernel verbatim as
//! inode numbers, so every [`FileAttr`] carries the node id rather than the
//! `ino` of the underlying attribute block.

use crate::config::MountConfig;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEmpty, ReplyEntry, ReplyLock, ReplyLseek, ReplyOpen, ReplyStatfs, ReplyWrite,
    ReplyXattr, Request, TimeOrNow,
};
use fuserpc_core::abi::{
    AccessIn, Attr, AttrOut, Caller, CopyFileRangeIn, CreateIn, CreateOut, EntryOut, FallocateIn, FileLock,
    FlushIn, FsyncIn, GETATTR_FH, GetAttrIn, InHeader, LinkIn, LkIn, LkOut, LseekIn, LseekOut, MkdirIn, MknodIn,
    OpenIn, OpenOut, Owner, ReadIn, ReleaseIn, RenameIn, SetAttrIn, SetXAttrIn, StatfsOut, WriteIn, setattr_valid,
};
use fuserpc_core::dirent::{DirentRecord, parse_dirents, parse_dirents_plus, type_to_mode};
use fuserpc_core::{BufferPool, Cancel, CancelHandle, DirEntryList, RawFileSystem, Status};
use libc::c_int;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace};

/// Size of the listing buffer handed to the filesystem per readdir call.
const DIR_BUF_SIZE: u32 = 4096;

/// `read_flags` bit marking a valid `lock_owner`.
const READ_LOCKOWNER: u32 = 1 << 1;

/// `release_flags` bit requesting a flush before release.
const RELEASE_FLUSH: u32 = 1 << 0;

/// `fsync_flags` bit requesting data-only sync.
const FSYNC_FDATASYNC: u32 = 1 << 0;

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;
const S_IFLNK: u32 = libc::S_IFLNK as u32;
const S_IFIFO: u32 = libc::S_IFIFO as u32;
const S_IFCHR: u32 = libc::S_IFCHR as u32;
const S_IFBLK: u32 = libc::S_IFBLK as u32;
const S_IFSOCK: u32 = libc::S_IFSOCK as u32;

/// Extracts a UTF-8 name or replies `EINVAL` and returns.
macro_rules! utf8_or_reply {
    ($name:expr, $reply:ident) => {
        match $name.to_str() {
            Some(name) => name,
            None => {
                $reply.error(libc::EINVAL);
                return;
            }
        }
    };
}

/// Exposes a [`RawFileSystem`] to the kernel through fuser.
pub struct FuseAdapter<F> {
    fs: F,
    config: MountConfig,
    buffers: BufferPool,
    cancel: Cancel,
    /// Dropped on destroy so that calls still running observe cancellation.
    cancel_handle: Option<CancelHandle>,
}

impl<F: RawFileSystem> FuseAdapter<F> {
    pub fn new(fs: F, config: MountConfig) -> Self {
        let (handle, cancel) = Cancel::pair();
        Self {
            fs,
            config,
            buffers: BufferPool::new(),
            cancel,
            cancel_handle: Some(handle),
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Validity period to report, falling back to the configured TTL when the
    /// filesystem leaves it at zero.
    fn ttl(&self, secs: u64, nsec: u32) -> Duration {
        if secs == 0 && nsec == 0 {
            self.config.attr_ttl
        } else {
            Duration::from_secs(secs).saturating_add(Duration::from_nanos(u64::from(nsec)))
        }
    }

    fn fail(&self, op: &'static str, status: Status) -> c_int {
        if self.config.debug {
            debug!(op, %status, "Request failed");
        }
        status.code()
    }

    fn reply_entry(&self, op: &'static str, status: Status, out: &EntryOut, reply: ReplyEntry) {
        if !status.is_ok() {
            reply.error(self.fail(op, status));
            return;
        }
        let ttl = self.ttl(out.entry_valid, out.entry_valid_nsec);
        reply.entry(&ttl, &file_attr(&out.attr, out.node_id), out.generation);
    }

    fn reply_attr(&self, op: &'static str, status: Status, out: &AttrOut, ino: u64, reply: ReplyAttr) {
        if !status.is_ok() {
            reply.error(self.fail(op, status));
            return;
        }
        let ttl = self.ttl(out.attr_valid, out.attr_valid_nsec);
        reply.attr(&ttl, &file_attr(&out.attr, ino));
    }

    fn reply_empty(&self, op: &'static str, status: Status, reply: ReplyEmpty) {
        if status.is_ok() {
            reply.ok();
        } else {
            reply.error(self.fail(op, status));
        }
    }

    fn reply_open(&self, op: &'static str, status: Status, out: &OpenOut, reply: ReplyOpen) {
        if status.is_ok() {
            reply.opened(out.fh, out.open_flags);
        } else {
            reply.error(self.fail(op, status));
        }
    }

    fn reply_xattr(&self, op: &'static str, result: Result<u32, Status>, dest: &[u8], reply: ReplyXattr) {
        match result {
            // A zero-sized request only asks for the size.
            Ok(size) if dest.is_empty() => reply.size(size),
            Ok(size) => reply.data(&dest[..(size as usize).min(dest.len())]),
            Err(status) => reply.error(self.fail(op, status)),
        }
    }

    /// Runs a listing call against a fresh buffer starting at `offset`.
    fn list(&self, plus: bool, req: &Request<'_>, ino: u64, fh: u64, offset: i64) -> Result<DirEntryList, Status> {
        let offset = u64::try_from(offset).map_err(|_| Status::EINVAL)?;
        let input = ReadIn {
            header: header(req, ino),
            fh,
            offset,
            size: DIR_BUF_SIZE,
            ..ReadIn::default()
        };
        let mut list = DirEntryList::with_capacity(DIR_BUF_SIZE as usize, offset);
        let status = if plus {
            self.fs.read_dir_plus(&self.cancel, &input, &mut list)
        } else {
            self.fs.read_dir(&self.cancel, &input, &mut list)
        };
        status.into_result().map(|()| list)
    }
}

impl<F: RawFileSystem> Filesystem for FuseAdapter<F> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        self.fs.set_debug(self.config.debug);
        self.fs.init();
        info!(fs = %self.fs.string(), "Filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        drop(self.cancel_handle.take());
        self.fs.destroy();
        info!("Filesystem destroyed");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = utf8_or_reply!(name, reply);
        trace!(parent, name, "lookup");
        let mut out = EntryOut::default();
        let status = self.fs.lookup(&self.cancel, &header(req, parent), name, &mut out);
        self.reply_entry("lookup", status, &out, reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.fs.forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let input = GetAttrIn {
            header: header(req, ino),
            flags: if fh.is_some() { GETATTR_FH } else { 0 },
            fh: fh.unwrap_or(0),
            ..GetAttrIn::default()
        };
        let mut out = AttrOut::default();
        let status = self.fs.get_attr(&self.cancel, &input, &mut out);
        self.reply_attr("getattr", status, &out, ino, reply);
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = AttrChanges {
            mode,
            uid,
            gid,
            size,
            atime,
            mtime,
            ctime,
            fh,
        };
        let input = changes.into_set_attr_in(header(req, ino));
        let mut out = AttrOut::default();
        let status = self.fs.set_attr(&self.cancel, &input, &mut out);
        self.reply_attr("setattr", status, &out, ino, reply);
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.fs.readlink(&self.cancel, &header(req, ino)) {
            Ok(target) => reply.data(&target),
            Err(status) => reply.error(self.fail("readlink", status)),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let name = utf8_or_reply!(name, reply);
        let input = MknodIn {
            header: header(req, parent),
            mode,
            rdev,
            umask,
            ..MknodIn::default()
        };
        let mut out = EntryOut::default();
        let status = self.fs.mknod(&self.cancel, &input, name, &mut out);
        self.reply_entry("mknod", status, &out, reply);
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let name = utf8_or_reply!(name, reply);
        let input = MkdirIn {
            header: header(req, parent),
            mode,
            umask,
        };
        let mut out = EntryOut::default();
        let status = self.fs.mkdir(&self.cancel, &input, name, &mut out);
        self.reply_entry("mkdir", status, &out, reply);
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = utf8_or_reply!(name, reply);
        let status = self.fs.unlink(&self.cancel, &header(req, parent), name);
        self.reply_empty("unlink", status, reply);
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = utf8_or_reply!(name, reply);
        let status = self.fs.rmdir(&self.cancel, &header(req, parent), name);
        self.reply_empty("rmdir", status, reply);
    }

    fn symlink(&mut self, req: &Request<'_>, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
        let link_name = utf8_or_reply!(link_name, reply);
        let target = utf8_or_reply!(target.as_os_str(), reply);
        let mut out = EntryOut::default();
        let status = self.fs.symlink(&self.cancel, &header(req, parent), target, link_name, &mut out);
        self.reply_entry("symlink", status, &out, reply);
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = utf8_or_reply!(name, reply);
        let newname = utf8_or_reply!(newname, reply);
        let input = RenameIn {
            header: header(req, parent),
            newdir: newparent,
            flags,
            ..RenameIn::default()
        };
        let status = self.fs.rename(&self.cancel, &input, name, newname);
        self.reply_empty("rename", status, reply);
    }

    fn link(&mut self, req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        let newname = utf8_or_reply!(newname, reply);
        let input = LinkIn {
            header: header(req, newparent),
            oldnodeid: ino,
        };
        let mut out = EntryOut::default();
        let status = self.fs.link(&self.cancel, &input, newname, &mut out);
        self.reply_entry("link", status, &out, reply);
    }

    #[allow(clippy::cast_sign_loss)]
    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let input = OpenIn {
            header: header(req, ino),
            flags: flags as u32,
            mode: 0,
        };
        let mut out = OpenOut::default();
        let status = self.fs.open(&self.cancel, &input, &mut out);
        self.reply_open("open", status, &out, reply);
    }

    #[allow(clippy::cast_sign_loss)]
    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let input = ReadIn {
            header: header(req, ino),
            fh,
            offset,
            size,
            read_flags: if lock_owner.is_some() { READ_LOCKOWNER } else { 0 },
            lock_owner: lock_owner.unwrap_or(0),
            flags: flags as u32,
            ..ReadIn::default()
        };
        let mut buf = self.buffers.alloc(size as usize);
        match self.fs.read(&self.cancel, &input, &mut buf) {
            Ok(n) => reply.data(&buf[..n.min(buf.len())]),
            Err(status) => reply.error(self.fail("read", status)),
        }
        self.buffers.free(buf);
    }

    #[allow(clippy::cast_sign_loss)]
    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        write_flags: u32,
        flags: i32,
        lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let input = WriteIn {
            header: header(req, ino),
            fh,
            offset,
            size: u32::try_from(data.len()).unwrap_or(u32::MAX),
            write_flags,
            lock_owner: lock_owner.unwrap_or(0),
            flags: flags as u32,
            ..WriteIn::default()
        };
        match self.fs.write(&self.cancel, &input, data) {
            Ok(written) => reply.written(written),
            Err(status) => reply.error(self.fail("write", status)),
        }
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, fh: u64, lock_owner: u64, reply: ReplyEmpty) {
        let input = FlushIn {
            header: header(req, ino),
            fh,
            lock_owner,
            ..FlushIn::default()
        };
        let status = self.fs.flush(&self.cancel, &input);
        self.reply_empty("flush", status, reply);
    }

    #[allow(clippy::cast_sign_loss)]
    fn release(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        lock_owner: Option<u64>,
        flush: bool,
        reply: ReplyEmpty,
    ) {
        let input = ReleaseIn {
            header: header(req, ino),
            fh,
            flags: flags as u32,
            release_flags: if flush { RELEASE_FLUSH } else { 0 },
            lock_owner: lock_owner.unwrap_or(0),
        };
        self.fs.release(&self.cancel, &input);
        reply.ok();
    }

    fn fsync(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let status = self.fs.fsync(&self.cancel, &fsync_in(req, ino, fh, datasync));
        self.reply_empty("fsync", status, reply);
    }

    #[allow(clippy::cast_sign_loss)]
    fn opendir(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let input = OpenIn {
            header: header(req, ino),
            flags: flags as u32,
            mode: 0,
        };
        let mut out = OpenOut::default();
        let status = self.fs.open_dir(&self.cancel, &input, &mut out);
        self.reply_open("opendir", status, &out, reply);
    }

    #[allow(clippy::cast_possible_wrap)]
    fn readdir(&mut self, req: &Request<'_>, ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let list = match self.list(false, req, ino, fh, offset) {
            Ok(list) => list,
            Err(status) => {
                reply.error(self.fail("readdir", status));
                return;
            }
        };
        for (_, record) in parse_dirents(list.as_bytes()) {
            let kind = file_type(type_to_mode(record.typ));
            if reply.add(record.ino, record.off as i64, kind, OsStr::from_bytes(record.name)) {
                break;
            }
        }
        reply.ok();
    }

    #[allow(clippy::cast_possible_wrap)]
    fn readdirplus(&mut self, req: &Request<'_>, ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectoryPlus) {
        let list = match self.list(true, req, ino, fh, offset) {
            Ok(list) => list,
            Err(status) => {
                reply.error(self.fail("readdirplus", status));
                return;
            }
        };
        let mut full = false;
        for (entry_out, record) in parse_dirents_plus(list.as_bytes()) {
            let entry_out = entry_out.unwrap_or_default();
            if !full {
                let (node_id, attr) = plus_attr(&entry_out, &record);
                let ttl = self.ttl(entry_out.entry_valid, entry_out.entry_valid_nsec);
                full = reply.add(
                    node_id,
                    record.off as i64,
                    OsStr::from_bytes(record.name),
                    &ttl,
                    &attr,
                    entry_out.generation,
                );
            }
            // Entries the kernel never saw must give back their lookup.
            if full && entry_out.node_id != 0 {
                self.fs.forget(entry_out.node_id, 1);
            }
        }
        reply.ok();
    }

    #[allow(clippy::cast_sign_loss)]
    fn releasedir(&mut self, req: &Request<'_>, ino: u64, fh: u64, flags: i32, reply: ReplyEmpty) {
        self.fs.release_dir(&ReleaseIn {
            header: header(req, ino),
            fh,
            flags: flags as u32,
            ..ReleaseIn::default()
        });
        reply.ok();
    }

    fn fsyncdir(&mut self, req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let status = self.fs.fsync_dir(&self.cancel, &fsync_in(req, ino, fh, datasync));
        self.reply_empty("fsyncdir", status, reply);
    }

    fn statfs(&mut self, req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let mut out = StatfsOut::default();
        let status = self.fs.stat_fs(&self.cancel, &header(req, ino), &mut out);
        if status.is_ok() {
            reply.statfs(
                out.blocks,
                out.bfree,
                out.bavail,
                out.files,
                out.ffree,
                out.bsize,
                out.name_len,
                out.frsize,
            );
        } else {
            reply.error(self.fail("statfs", status));
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn setxattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: ReplyEmpty,
    ) {
        let name = utf8_or_reply!(name, reply);
        let input = SetXAttrIn {
            header: header(req, ino),
            size: u32::try_from(value.len()).unwrap_or(u32::MAX),
            flags: flags as u32,
            #[cfg(not(target_os = "linux"))]
            position,
            ..SetXAttrIn::default()
        };
        #[cfg(target_os = "linux")]
        let _ = position;
        let status = self.fs.set_xattr(&self.cancel, &input, name, value);
        self.reply_empty("setxattr", status, reply);
    }

    fn getxattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let name = utf8_or_reply!(name, reply);
        let mut dest = vec![0u8; size as usize];
        let result = self.fs.get_xattr(&self.cancel, &header(req, ino), name, &mut dest);
        self.reply_xattr("getxattr", result, &dest, reply);
    }

    fn listxattr(&mut self, req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let mut dest = vec![0u8; size as usize];
        let result = self.fs.list_xattr(&self.cancel, &header(req, ino), &mut dest);
        self.reply_xattr("listxattr", result, &dest, reply);
    }

    fn removexattr(&mut self, req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = utf8_or_reply!(name, reply);
        let status = self.fs.remove_xattr(&self.cancel, &header(req, ino), name);
        self.reply_empty("removexattr", status, reply);
    }

    #[allow(clippy::cast_sign_loss)]
    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let input = AccessIn {
            header: header(req, ino),
            mask: mask as u32,
            ..AccessIn::default()
        };
        let status = self.fs.access(&self.cancel, &input);
        self.reply_empty("access", status, reply);
    }

    #[allow(clippy::cast_sign_loss)]
    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name = utf8_or_reply!(name, reply);
        let input = CreateIn {
            header: header(req, parent),
            flags: flags as u32,
            mode,
            umask,
            ..CreateIn::default()
        };
        let mut out = CreateOut::default();
        let status = self.fs.create(&self.cancel, &input, name, &mut out);
        if !status.is_ok() {
            reply.error(self.fail("create", status));
            return;
        }
        let entry = &out.entry_out;
        reply.created(
            &self.ttl(entry.entry_valid, entry.entry_valid_nsec),
            &file_attr(&entry.attr, entry.node_id),
            entry.generation,
            out.open_out.fh,
            out.open_out.open_flags,
        );
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn getlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        reply: ReplyLock,
    ) {
        let input = lk_in(req, ino, fh, lock_owner, start, end, typ as u32, pid);
        let mut out = LkOut::default();
        let status = self.fs.get_lk(&self.cancel, &input, &mut out);
        if status.is_ok() {
            reply.locked(out.lk.start, out.lk.end, out.lk.typ as i32, out.lk.pid);
        } else {
            reply.error(self.fail("getlk", status));
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn setlk(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        sleep: bool,
        reply: ReplyEmpty,
    ) {
        let input = lk_in(req, ino, fh, lock_owner, start, end, typ as u32, pid);
        let status = if sleep {
            self.fs.set_lkw(&self.cancel, &input)
        } else {
            self.fs.set_lk(&self.cancel, &input)
        };
        self.reply_empty("setlk", status, reply);
    }

    #[allow(clippy::cast_sign_loss)]
    fn fallocate(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        length: i64,
        mode: i32,
        reply: ReplyEmpty,
    ) {
        let (Ok(offset), Ok(length)) = (u64::try_from(offset), u64::try_from(length)) else {
            reply.error(libc::EINVAL);
            return;
        };
        let input = FallocateIn {
            header: header(req, ino),
            fh,
            offset,
            length,
            mode: mode as u32,
            ..FallocateIn::default()
        };
        let status = self.fs.fallocate(&self.cancel, &input);
        self.reply_empty("fallocate", status, reply);
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    fn lseek(&mut self, req: &Request<'_>, ino: u64, fh: u64, offset: i64, whence: i32, reply: ReplyLseek) {
        let input = LseekIn {
            header: header(req, ino),
            fh,
            offset: offset as u64,
            whence: whence as u32,
            ..LseekIn::default()
        };
        let mut out = LseekOut::default();
        let status = self.fs.lseek(&self.cancel, &input, &mut out);
        if status.is_ok() {
            reply.offset(out.offset as i64);
        } else {
            reply.error(self.fail("lseek", status));
        }
    }

    fn copy_file_range(
        &mut self,
        req: &Request<'_>,
        ino_in: u64,
        fh_in: u64,
        offset_in: i64,
        ino_out: u64,
        fh_out: u64,
        offset_out: i64,
        len: u64,
        flags: u32,
        reply: ReplyWrite,
    ) {
        let (Ok(off_in), Ok(off_out)) = (u64::try_from(offset_in), u64::try_from(offset_out)) else {
            reply.error(libc::EINVAL);
            return;
        };
        let input = CopyFileRangeIn {
            header: header(req, ino_in),
            fh_in,
            off_in,
            node_id_out: ino_out,
            fh_out,
            off_out,
            len,
            flags: u64::from(flags),
        };
        match self.fs.copy_file_range(&self.cancel, &input) {
            Ok(copied) => reply.written(copied),
            Err(status) => reply.error(self.fail("copy_file_range", status)),
        }
    }
}

/// Native request header for a kernel request addressed at `node_id`.
fn header(req: &Request<'_>, node_id: u64) -> InHeader {
    InHeader {
        unique: req.unique(),
        node_id,
        caller: Caller {
            owner: Owner {
                uid: req.uid(),
                gid: req.gid(),
            },
            pid: req.pid(),
        },
        ..InHeader::default()
    }
}

fn fsync_in(req: &Request<'_>, ino: u64, fh: u64, datasync: bool) -> FsyncIn {
    FsyncIn {
        header: header(req, ino),
        fh,
        fsync_flags: if datasync { FSYNC_FDATASYNC } else { 0 },
        ..FsyncIn::default()
    }
}

#[allow(clippy::too_many_arguments)]
fn lk_in(req: &Request<'_>, ino: u64, fh: u64, owner: u64, start: u64, end: u64, typ: u32, pid: u32) -> LkIn {
    LkIn {
        header: header(req, ino),
        fh,
        owner,
        lk: FileLock { start, end, typ, pid },
        ..LkIn::default()
    }
}

/// Attribute changes requested by a kernel `setattr`.
#[derive(Debug, Default, Clone)]
pub struct AttrChanges {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<TimeOrNow>,
    pub mtime: Option<TimeOrNow>,
    pub ctime: Option<SystemTime>,
    pub fh: Option<u64>,
}

impl AttrChanges {
    /// Encodes the changes as a native `setattr` request with its validity mask.
    pub fn into_set_attr_in(self, header: InHeader) -> SetAttrIn {
        let mut input = SetAttrIn {
            header,
            ..SetAttrIn::default()
        };
        if let Some(mode) = self.mode {
            input.valid |= setattr_valid::MODE;
            input.mode = mode;
        }
        if let Some(uid) = self.uid {
            input.valid |= setattr_valid::UID;
            input.owner.uid = uid;
        }
        if let Some(gid) = self.gid {
            input.valid |= setattr_valid::GID;
            input.owner.gid = gid;
        }
        if let Some(size) = self.size {
            input.valid |= setattr_valid::SIZE;
            input.size = size;
        }
        if let Some(fh) = self.fh {
            input.valid |= setattr_valid::FH;
            input.fh = fh;
        }
        match self.atime {
            Some(TimeOrNow::Now) => input.valid |= setattr_valid::ATIME | setattr_valid::ATIME_NOW,
            Some(TimeOrNow::SpecificTime(t)) => {
                input.valid |= setattr_valid::ATIME;
                (input.atime, input.atimensec) = time_parts(t);
            }
            None => {}
        }
        match self.mtime {
            Some(TimeOrNow::Now) => input.valid |= setattr_valid::MTIME | setattr_valid::MTIME_NOW,
            Some(TimeOrNow::SpecificTime(t)) => {
                input.valid |= setattr_valid::MTIME;
                (input.mtime, input.mtimensec) = time_parts(t);
            }
            None => {}
        }
        if let Some(t) = self.ctime {
            input.valid |= setattr_valid::CTIME;
            (input.ctime, input.ctimensec) = time_parts(t);
        }
        input
    }
}

/// Kernel file type for the `S_IFMT` bits of `mode`.
///
/// Modes without a recognizable type are reported as regular files.
pub fn file_type(mode: u32) -> FileType {
    match mode & S_IFMT {
        S_IFDIR => FileType::Directory,
        S_IFLNK => FileType::Symlink,
        S_IFIFO => FileType::NamedPipe,
        S_IFCHR => FileType::CharDevice,
        S_IFBLK => FileType::BlockDevice,
        S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

/// Converts native attributes into a fuser [`FileAttr`] numbered `node_id`.
#[allow(clippy::cast_possible_truncation)]
pub fn file_attr(attr: &Attr, node_id: u64) -> FileAttr {
    let ctime = system_time(attr.ctime, attr.ctimensec);
    FileAttr {
        ino: node_id,
        size: attr.size,
        blocks: attr.blocks,
        atime: system_time(attr.atime, attr.atimensec),
        mtime: system_time(attr.mtime, attr.mtimensec),
        ctime,
        crtime: ctime,
        kind: file_type(attr.mode),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.owner.uid,
        gid: attr.owner.gid,
        rdev: attr.rdev,
        #[cfg(target_os = "linux")]
        blksize: attr.blksize,
        #[cfg(not(target_os = "linux"))]
        blksize: 4096,
        #[cfg(target_os = "linux")]
        flags: 0,
        #[cfg(not(target_os = "linux"))]
        flags: attr.flags,
    }
}

/// Node id and attributes reported for one readdirplus record.
///
/// Records without a node (`.` and `..`) keep their inode number so the
/// listing still shows them; the kernel never instantiates those names.
fn plus_attr(entry_out: &EntryOut, record: &DirentRecord<'_>) -> (u64, FileAttr) {
    if entry_out.node_id != 0 {
        return (entry_out.node_id, file_attr(&entry_out.attr, entry_out.node_id));
    }
    let is_dot = record.name == b"." || record.name == b"..";
    let node_id = if is_dot { record.ino } else { 0 };
    let attr = Attr {
        ino: record.ino,
        mode: type_to_mode(record.typ),
        ..Attr::default()
    };
    (node_id, file_attr(&attr, node_id))
}

fn system_time(secs: u64, nsec: u32) -> SystemTime {
    UNIX_EPOCH
        .checked_add(Duration::from_secs(secs).saturating_add(Duration::from_nanos(u64::from(nsec))))
        .unwrap_or(UNIX_EPOCH)
}

/// Splits a time into seconds and nanoseconds since the epoch; earlier times clamp to zero.
fn time_parts(t: SystemTime) -> (u64, u32) {
    t.duration_since(UNIX_EPOCH)
        .map_or((0, 0), |d| (d.as_secs(), d.subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(mode: u32) -> Attr {
        Attr {
            ino: 99,
            size: 1234,
            blocks: 3,
            atime: 10,
            atimensec: 5,
            mtime: 20,
            ctime: 30,
            mode,
            nlink: 2,
            owner: Owner { uid: 1000, gid: 100 },
            ..Attr::default()
        }
    }

    #[test]
    fn test_file_attr_uses_node_id() {
        let fa = file_attr(&attr(S_IFDIR | 0o755), 7);
        assert_eq!(fa.ino, 7);
        assert_eq!(fa.kind, FileType::Directory);
        assert_eq!(fa.perm, 0o755);
        assert_eq!(fa.size, 1234);
        assert_eq!(fa.nlink, 2);
        assert_eq!((fa.uid, fa.gid), (1000, 100));
        assert_eq!(fa.atime, UNIX_EPOCH + Duration::new(10, 5));
        assert_eq!(fa.mtime, UNIX_EPOCH + Duration::from_secs(20));
    }

    #[test]
    fn test_file_type_from_mode() {
        assert_eq!(file_type(libc::S_IFREG as u32 | 0o644), FileType::RegularFile);
        assert_eq!(file_type(S_IFLNK | 0o777), FileType::Symlink);
        assert_eq!(file_type(S_IFIFO), FileType::NamedPipe);
        assert_eq!(file_type(S_IFSOCK), FileType::Socket);
        assert_eq!(file_type(0), FileType::RegularFile);
    }

    #[test]
    fn test_setattr_mask() {
        let changes = AttrChanges {
            mode: Some(0o600),
            size: Some(0),
            atime: Some(TimeOrNow::Now),
            mtime: Some(TimeOrNow::SpecificTime(UNIX_EPOCH + Duration::new(42, 7))),
            ..AttrChanges::default()
        };
        let input = changes.into_set_attr_in(InHeader::for_node(5));
        assert_eq!(input.header.node_id, 5);
        assert_eq!(input.mode(), Some(0o600));
        assert_eq!(input.size(), Some(0));
        assert_eq!(input.uid(), None);
        assert_eq!(input.fh(), None);
        assert_ne!(input.valid & setattr_valid::ATIME_NOW, 0);
        assert_ne!(input.valid & setattr_valid::ATIME, 0);
        assert_eq!(input.valid & setattr_valid::MTIME_NOW, 0);
        assert_eq!((input.mtime, input.mtimensec), (42, 7));
    }

    #[test]
    fn test_setattr_owner_and_handle() {
        let changes = AttrChanges {
            uid: Some(1),
            gid: Some(2),
            fh: Some(9),
            ..AttrChanges::default()
        };
        let input = changes.into_set_attr_in(InHeader::default());
        assert_eq!(input.uid(), Some(1));
        assert_eq!(input.gid(), Some(2));
        assert_eq!(input.fh(), Some(9));
        assert_eq!(input.mode(), None);
    }

    #[test]
    fn test_plus_attr_for_dots() {
        let record = DirentRecord {
            ino: 1234,
            off: 1,
            typ: 4,
            name: b".",
        };
        let (node_id, fa) = plus_attr(&EntryOut::default(), &record);
        assert_eq!(node_id, 1234);
        assert_eq!(fa.kind, FileType::Directory);

        let record = DirentRecord { name: b"x", ..record };
        let (node_id, _) = plus_attr(&EntryOut::default(), &record);
        assert_eq!(node_id, 0);

        let entry = EntryOut {
            node_id: 77,
            attr: attr(libc::S_IFREG as u32 | 0o644),
            ..EntryOut::default()
        };
        let (node_id, fa) = plus_attr(&entry, &record);
        assert_eq!(node_id, 77);
        assert_eq!(fa.ino, 77);
        assert_eq!(fa.size, 1234);
    }

    #[test]
    fn test_time_parts() {
        assert_eq!(time_parts(UNIX_EPOCH + Duration::new(3, 9)), (3, 9));
        assert_eq!(time_parts(UNIX_EPOCH - Duration::from_secs(1)), (0, 0));
        assert_eq!(system_time(3, 9), UNIX_EPOCH + Duration::new(3, 9));
    }

    #[test]
    fn test_ttl_fallback() {
        struct Nothing;
        impl RawFileSystem for Nothing {}

        let adapter = FuseAdapter::new(Nothing, MountConfig::default().attr_ttl(Duration::from_millis(300)));
        assert_eq!(adapter.ttl(0, 0), Duration::from_millis(300));
        assert_eq!(adapter.ttl(2, 500), Duration::new(2, 500));
        assert!(!adapter.cancel.is_closed());
    }
}
