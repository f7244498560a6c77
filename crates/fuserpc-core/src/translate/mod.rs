//! Conversions between native structures and wire messages.
//!
//! Every conversion is total: missing nested wire messages decode as zeros
//! and native values always encode with their nested messages present.
//! Platform-only fields go through the `platform` module picked at compile
//! time (`linux` or `bsd`).

use crate::abi::{
    AccessIn, Attr, AttrOut, Caller, CopyFileRangeIn, CreateIn, CreateOut, EntryOut, FallocateIn, FileLock,
    FlushIn, FsyncIn, GetAttrIn, InHeader, LinkIn, LkIn, LseekIn, MkdirIn, MknodIn, OpenIn, OpenOut, Owner,
    ReadIn, ReleaseIn, RenameIn, SetAttrIn, SetXAttrIn, StatfsOut, WriteIn,
};
use crate::dirent::{DirEntry, DirentRecord, type_to_mode};
use crate::status::Status;
use crate::wire;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as platform;

#[cfg(not(target_os = "linux"))]
mod bsd;
#[cfg(not(target_os = "linux"))]
use bsd as platform;

impl From<Status> for wire::Status {
    fn from(s: Status) -> Self {
        wire::Status { code: s.code() }
    }
}

impl From<wire::Status> for Status {
    fn from(s: wire::Status) -> Self {
        Status::from_code(s.code)
    }
}

impl From<&Owner> for wire::Owner {
    fn from(o: &Owner) -> Self {
        wire::Owner { uid: o.uid, gid: o.gid }
    }
}

impl From<&wire::Owner> for Owner {
    fn from(o: &wire::Owner) -> Self {
        Owner { uid: o.uid, gid: o.gid }
    }
}

fn owner_from_wire(owner: Option<&wire::Owner>) -> Owner {
    owner.map(Owner::from).unwrap_or_default()
}

impl From<&InHeader> for wire::InHeader {
    fn from(h: &InHeader) -> Self {
        wire::InHeader {
            length: h.length,
            opcode: h.opcode,
            unique: h.unique,
            node_id: h.node_id,
            caller: Some(wire::Caller {
                owner: Some(wire::Owner::from(&h.caller.owner)),
                pid: h.caller.pid,
            }),
            padding: h.padding,
        }
    }
}

impl From<&wire::InHeader> for InHeader {
    fn from(h: &wire::InHeader) -> Self {
        let caller = h.caller.unwrap_or_default();
        InHeader {
            length: h.length,
            opcode: h.opcode,
            unique: h.unique,
            node_id: h.node_id,
            caller: Caller {
                owner: owner_from_wire(caller.owner.as_ref()),
                pid: caller.pid,
            },
            padding: h.padding,
        }
    }
}

/// Encodes a header for a request message.
pub fn header_to_wire(h: &InHeader) -> Option<wire::InHeader> {
    Some(wire::InHeader::from(h))
}

/// Decodes an optional request header; an absent header decodes as zeros.
pub fn header_from_wire(h: Option<&wire::InHeader>) -> InHeader {
    match h {
        Some(h) => InHeader::from(h),
        None => {
            tracing::trace!("request without header, using zero header");
            InHeader::default()
        }
    }
}

impl From<&Attr> for wire::Attr {
    fn from(a: &Attr) -> Self {
        let mut out = wire::Attr {
            ino: a.ino,
            size: a.size,
            blocks: a.blocks,
            atime: a.atime,
            mtime: a.mtime,
            ctime: a.ctime,
            atimensec: a.atimensec,
            mtimensec: a.mtimensec,
            ctimensec: a.ctimensec,
            mode: a.mode,
            nlink: a.nlink,
            owner: Some(wire::Owner::from(&a.owner)),
            rdev: a.rdev,
            ..wire::Attr::default()
        };
        platform::attr_to_wire(a, &mut out);
        out
    }
}

impl From<&wire::Attr> for Attr {
    fn from(a: &wire::Attr) -> Self {
        let mut out = Attr {
            ino: a.ino,
            size: a.size,
            blocks: a.blocks,
            atime: a.atime,
            mtime: a.mtime,
            ctime: a.ctime,
            atimensec: a.atimensec,
            mtimensec: a.mtimensec,
            ctimensec: a.ctimensec,
            mode: a.mode,
            nlink: a.nlink,
            owner: owner_from_wire(a.owner.as_ref()),
            rdev: a.rdev,
            ..Attr::default()
        };
        platform::attr_from_wire(a, &mut out);
        out
    }
}

fn attr_from_wire(a: Option<&wire::Attr>) -> Attr {
    a.map(Attr::from).unwrap_or_default()
}

impl From<&EntryOut> for wire::EntryOut {
    fn from(e: &EntryOut) -> Self {
        wire::EntryOut {
            node_id: e.node_id,
            generation: e.generation,
            entry_valid: e.entry_valid,
            attr_valid: e.attr_valid,
            entry_valid_nsec: e.entry_valid_nsec,
            attr_valid_nsec: e.attr_valid_nsec,
            attr: Some(wire::Attr::from(&e.attr)),
        }
    }
}

impl From<&wire::EntryOut> for EntryOut {
    fn from(e: &wire::EntryOut) -> Self {
        EntryOut {
            node_id: e.node_id,
            generation: e.generation,
            entry_valid: e.entry_valid,
            attr_valid: e.attr_valid,
            entry_valid_nsec: e.entry_valid_nsec,
            attr_valid_nsec: e.attr_valid_nsec,
            attr: attr_from_wire(e.attr.as_ref()),
        }
    }
}

impl From<&AttrOut> for wire::AttrOut {
    fn from(a: &AttrOut) -> Self {
        wire::AttrOut {
            attr_valid: a.attr_valid,
            attr_valid_nsec: a.attr_valid_nsec,
            dummy: a.dummy,
            attr: Some(wire::Attr::from(&a.attr)),
        }
    }
}

impl From<&wire::AttrOut> for AttrOut {
    fn from(a: &wire::AttrOut) -> Self {
        AttrOut {
            attr_valid: a.attr_valid,
            attr_valid_nsec: a.attr_valid_nsec,
            dummy: a.dummy,
            attr: attr_from_wire(a.attr.as_ref()),
        }
    }
}

impl From<&OpenOut> for wire::OpenOut {
    fn from(o: &OpenOut) -> Self {
        wire::OpenOut {
            fh: o.fh,
            open_flags: o.open_flags,
            padding: o.padding,
        }
    }
}

impl From<&wire::OpenOut> for OpenOut {
    fn from(o: &wire::OpenOut) -> Self {
        OpenOut {
            fh: o.fh,
            open_flags: o.open_flags,
            padding: o.padding,
        }
    }
}

impl From<&FileLock> for wire::FileLock {
    fn from(l: &FileLock) -> Self {
        wire::FileLock {
            start: l.start,
            end: l.end,
            typ: l.typ,
            pid: l.pid,
        }
    }
}

impl From<&wire::FileLock> for FileLock {
    fn from(l: &wire::FileLock) -> Self {
        FileLock {
            start: l.start,
            end: l.end,
            typ: l.typ,
            pid: l.pid,
        }
    }
}

impl From<&StatfsOut> for wire::StatfsOut {
    fn from(s: &StatfsOut) -> Self {
        wire::StatfsOut {
            blocks: s.blocks,
            bfree: s.bfree,
            bavail: s.bavail,
            files: s.files,
            ffree: s.ffree,
            bsize: s.bsize,
            name_len: s.name_len,
            frsize: s.frsize,
            padding: s.padding,
            spare: s.spare,
        }
    }
}

impl From<&wire::StatfsOut> for StatfsOut {
    fn from(s: &wire::StatfsOut) -> Self {
        StatfsOut {
            blocks: s.blocks,
            bfree: s.bfree,
            bavail: s.bavail,
            files: s.files,
            ffree: s.ffree,
            bsize: s.bsize,
            name_len: s.name_len,
            frsize: s.frsize,
            padding: s.padding,
            spare: s.spare,
        }
    }
}

impl From<&ReadIn> for wire::ReadIn {
    fn from(r: &ReadIn) -> Self {
        wire::ReadIn {
            header: header_to_wire(&r.header),
            fh: r.fh,
            offset: r.offset,
            size: r.size,
            read_flags: r.read_flags,
            lock_owner: r.lock_owner,
            flags: r.flags,
            padding: r.padding,
        }
    }
}

impl From<&wire::ReadIn> for ReadIn {
    fn from(r: &wire::ReadIn) -> Self {
        ReadIn {
            header: header_from_wire(r.header.as_ref()),
            fh: r.fh,
            offset: r.offset,
            size: r.size,
            read_flags: r.read_flags,
            lock_owner: r.lock_owner,
            flags: r.flags,
            padding: r.padding,
        }
    }
}

impl From<&DirEntry> for wire::DirEntry {
    fn from(e: &DirEntry) -> Self {
        wire::DirEntry {
            mode: e.mode,
            name: e.name.clone(),
            ino: e.ino,
            off: e.off,
        }
    }
}

impl From<&DirentRecord<'_>> for wire::DirEntry {
    fn from(r: &DirentRecord<'_>) -> Self {
        wire::DirEntry {
            mode: type_to_mode(r.typ),
            name: r.name.to_vec(),
            ino: r.ino,
            off: r.off,
        }
    }
}

impl From<&wire::DirEntry> for DirEntry {
    fn from(e: &wire::DirEntry) -> Self {
        DirEntry {
            mode: e.mode,
            name: e.name.clone(),
            ino: e.ino,
            off: e.off,
        }
    }
}

// Request messages. `*_request` builds the wire form from native inputs,
// `*_in` recovers the native input on the serving side.

pub fn read_request(input: &ReadIn) -> wire::ReadRequest {
    wire::ReadRequest {
        read_in: Some(wire::ReadIn::from(input)),
    }
}

pub fn read_in(req: &wire::ReadRequest) -> ReadIn {
    req.read_in.as_ref().map(ReadIn::from).unwrap_or_default()
}

pub fn get_attr_request(input: &GetAttrIn) -> wire::GetAttrRequest {
    wire::GetAttrRequest {
        header: header_to_wire(&input.header),
        flags: input.flags,
        dummy: input.dummy,
        fh: input.fh,
    }
}

pub fn get_attr_in(req: &wire::GetAttrRequest) -> GetAttrIn {
    GetAttrIn {
        header: header_from_wire(req.header.as_ref()),
        flags: req.flags,
        dummy: req.dummy,
        fh: req.fh,
    }
}

pub fn set_attr_request(input: &SetAttrIn) -> wire::SetAttrRequest {
    wire::SetAttrRequest {
        header: header_to_wire(&input.header),
        valid: input.valid,
        padding: input.padding,
        fh: input.fh,
        size: input.size,
        lock_owner: input.lock_owner,
        atime: input.atime,
        mtime: input.mtime,
        ctime: input.ctime,
        atimensec: input.atimensec,
        mtimensec: input.mtimensec,
        ctimensec: input.ctimensec,
        mode: input.mode,
        unused4: input.unused4,
        owner: Some(wire::Owner::from(&input.owner)),
        unused5: input.unused5,
    }
}

pub fn set_attr_in(req: &wire::SetAttrRequest) -> SetAttrIn {
    SetAttrIn {
        header: header_from_wire(req.header.as_ref()),
        valid: req.valid,
        padding: req.padding,
        fh: req.fh,
        size: req.size,
        lock_owner: req.lock_owner,
        atime: req.atime,
        mtime: req.mtime,
        ctime: req.ctime,
        atimensec: req.atimensec,
        mtimensec: req.mtimensec,
        ctimensec: req.ctimensec,
        mode: req.mode,
        unused4: req.unused4,
        owner: owner_from_wire(req.owner.as_ref()),
        unused5: req.unused5,
    }
}

pub fn mknod_request(input: &MknodIn, name: &str) -> wire::MknodRequest {
    wire::MknodRequest {
        header: header_to_wire(&input.header),
        name: name.to_string(),
        mode: input.mode,
        rdev: input.rdev,
        umask: input.umask,
        padding: input.padding,
    }
}

pub fn mknod_in(req: &wire::MknodRequest) -> MknodIn {
    MknodIn {
        header: header_from_wire(req.header.as_ref()),
        mode: req.mode,
        rdev: req.rdev,
        umask: req.umask,
        padding: req.padding,
    }
}

pub fn mkdir_request(input: &MkdirIn, name: &str) -> wire::MkdirRequest {
    wire::MkdirRequest {
        header: header_to_wire(&input.header),
        name: name.to_string(),
        mode: input.mode,
        umask: input.umask,
    }
}

pub fn mkdir_in(req: &wire::MkdirRequest) -> MkdirIn {
    MkdirIn {
        header: header_from_wire(req.header.as_ref()),
        mode: req.mode,
        umask: req.umask,
    }
}

pub fn rename_request(input: &RenameIn, old_name: &str, new_name: &str) -> wire::RenameRequest {
    wire::RenameRequest {
        header: header_to_wire(&input.header),
        newdir: input.newdir,
        flags: input.flags,
        padding: input.padding,
        old_name: old_name.to_string(),
        new_name: new_name.to_string(),
    }
}

pub fn rename_in(req: &wire::RenameRequest) -> RenameIn {
    RenameIn {
        header: header_from_wire(req.header.as_ref()),
        newdir: req.newdir,
        flags: req.flags,
        padding: req.padding,
    }
}

pub fn link_request(input: &LinkIn, filename: &str) -> wire::LinkRequest {
    wire::LinkRequest {
        header: header_to_wire(&input.header),
        oldnodeid: input.oldnodeid,
        filename: filename.to_string(),
    }
}

pub fn link_in(req: &wire::LinkRequest) -> LinkIn {
    LinkIn {
        header: header_from_wire(req.header.as_ref()),
        oldnodeid: req.oldnodeid,
    }
}

pub fn access_request(input: &AccessIn) -> wire::AccessRequest {
    wire::AccessRequest {
        header: header_to_wire(&input.header),
        mask: input.mask,
        padding: input.padding,
    }
}

pub fn access_in(req: &wire::AccessRequest) -> AccessIn {
    AccessIn {
        header: header_from_wire(req.header.as_ref()),
        mask: req.mask,
        padding: req.padding,
    }
}

pub fn set_xattr_request(input: &SetXAttrIn, attr: &str, data: &[u8]) -> wire::SetXAttrRequest {
    let mut req = wire::SetXAttrRequest {
        header: header_to_wire(&input.header),
        attr: attr.to_string(),
        data: data.to_vec(),
        size: input.size,
        flags: input.flags,
        ..wire::SetXAttrRequest::default()
    };
    platform::set_xattr_to_wire(input, &mut req);
    req
}

pub fn set_xattr_in(req: &wire::SetXAttrRequest) -> SetXAttrIn {
    let mut input = SetXAttrIn {
        header: header_from_wire(req.header.as_ref()),
        size: req.size,
        flags: req.flags,
        ..SetXAttrIn::default()
    };
    platform::set_xattr_from_wire(req, &mut input);
    input
}

pub fn create_request(input: &CreateIn, name: &str) -> wire::CreateRequest {
    wire::CreateRequest {
        header: header_to_wire(&input.header),
        name: name.to_string(),
        flags: input.flags,
        mode: input.mode,
        umask: input.umask,
        padding: input.padding,
    }
}

pub fn create_in(req: &wire::CreateRequest) -> CreateIn {
    CreateIn {
        header: header_from_wire(req.header.as_ref()),
        flags: req.flags,
        mode: req.mode,
        umask: req.umask,
        padding: req.padding,
    }
}

pub fn create_out(resp: &wire::CreateResponse) -> CreateOut {
    CreateOut {
        entry_out: resp.entry_out.as_ref().map(EntryOut::from).unwrap_or_default(),
        open_out: resp.open_out.as_ref().map(OpenOut::from).unwrap_or_default(),
    }
}

pub fn open_request(input: &OpenIn) -> wire::OpenRequest {
    wire::OpenRequest {
        header: header_to_wire(&input.header),
        flags: input.flags,
        mode: input.mode,
    }
}

pub fn open_in(req: &wire::OpenRequest) -> OpenIn {
    OpenIn {
        header: header_from_wire(req.header.as_ref()),
        flags: req.flags,
        mode: req.mode,
    }
}

pub fn lseek_request(input: &LseekIn) -> wire::LseekRequest {
    wire::LseekRequest {
        header: header_to_wire(&input.header),
        fh: input.fh,
        offset: input.offset,
        whence: input.whence,
        padding: input.padding,
    }
}

pub fn lseek_in(req: &wire::LseekRequest) -> LseekIn {
    LseekIn {
        header: header_from_wire(req.header.as_ref()),
        fh: req.fh,
        offset: req.offset,
        whence: req.whence,
        padding: req.padding,
    }
}

pub fn lk_request(input: &LkIn) -> wire::LkRequest {
    wire::LkRequest {
        header: header_to_wire(&input.header),
        fh: input.fh,
        owner: input.owner,
        lk: Some(wire::FileLock::from(&input.lk)),
        lk_flags: input.lk_flags,
        padding: input.padding,
    }
}

pub fn lk_in(req: &wire::LkRequest) -> LkIn {
    LkIn {
        header: header_from_wire(req.header.as_ref()),
        fh: req.fh,
        owner: req.owner,
        lk: req.lk.as_ref().map(FileLock::from).unwrap_or_default(),
        lk_flags: req.lk_flags,
        padding: req.padding,
    }
}

pub fn release_request(input: &ReleaseIn) -> wire::ReleaseRequest {
    wire::ReleaseRequest {
        header: header_to_wire(&input.header),
        fh: input.fh,
        flags: input.flags,
        release_flags: input.release_flags,
        lock_owner: input.lock_owner,
    }
}

pub fn release_in(req: &wire::ReleaseRequest) -> ReleaseIn {
    ReleaseIn {
        header: header_from_wire(req.header.as_ref()),
        fh: req.fh,
        flags: req.flags,
        release_flags: req.release_flags,
        lock_owner: req.lock_owner,
    }
}

pub fn write_request(input: &WriteIn, data: &[u8]) -> wire::WriteRequest {
    wire::WriteRequest {
        header: header_to_wire(&input.header),
        fh: input.fh,
        offset: input.offset,
        size: input.size,
        write_flags: input.write_flags,
        lock_owner: input.lock_owner,
        flags: input.flags,
        padding: input.padding,
        data: data.to_vec(),
    }
}

pub fn write_in(req: &wire::WriteRequest) -> WriteIn {
    WriteIn {
        header: header_from_wire(req.header.as_ref()),
        fh: req.fh,
        offset: req.offset,
        size: req.size,
        write_flags: req.write_flags,
        lock_owner: req.lock_owner,
        flags: req.flags,
        padding: req.padding,
    }
}

pub fn copy_file_range_request(input: &CopyFileRangeIn) -> wire::CopyFileRangeRequest {
    wire::CopyFileRangeRequest {
        header: header_to_wire(&input.header),
        fh_in: input.fh_in,
        off_in: input.off_in,
        node_id_out: input.node_id_out,
        fh_out: input.fh_out,
        off_out: input.off_out,
        len: input.len,
        flags: input.flags,
    }
}

pub fn copy_file_range_in(req: &wire::CopyFileRangeRequest) -> CopyFileRangeIn {
    CopyFileRangeIn {
        header: header_from_wire(req.header.as_ref()),
        fh_in: req.fh_in,
        off_in: req.off_in,
        node_id_out: req.node_id_out,
        fh_out: req.fh_out,
        off_out: req.off_out,
        len: req.len,
        flags: req.flags,
    }
}

pub fn flush_request(input: &FlushIn) -> wire::FlushRequest {
    wire::FlushRequest {
        header: header_to_wire(&input.header),
        fh: input.fh,
        unused: input.unused,
        padding: input.padding,
        lock_owner: input.lock_owner,
    }
}

pub fn flush_in(req: &wire::FlushRequest) -> FlushIn {
    FlushIn {
        header: header_from_wire(req.header.as_ref()),
        fh: req.fh,
        unused: req.unused,
        padding: req.padding,
        lock_owner: req.lock_owner,
    }
}

pub fn fsync_request(input: &FsyncIn) -> wire::FsyncRequest {
    wire::FsyncRequest {
        header: header_to_wire(&input.header),
        fh: input.fh,
        fsync_flags: input.fsync_flags,
        padding: input.padding,
    }
}

pub fn fsync_in(req: &wire::FsyncRequest) -> FsyncIn {
    FsyncIn {
        header: header_from_wire(req.header.as_ref()),
        fh: req.fh,
        fsync_flags: req.fsync_flags,
        padding: req.padding,
    }
}

pub fn fallocate_request(input: &FallocateIn) -> wire::FallocateRequest {
    wire::FallocateRequest {
        header: header_to_wire(&input.header),
        fh: input.fh,
        offset: input.offset,
        length: input.length,
        mode: input.mode,
        padding: input.padding,
    }
}

pub fn fallocate_in(req: &wire::FallocateRequest) -> FallocateIn {
    FallocateIn {
        header: header_from_wire(req.header.as_ref()),
        fh: req.fh,
        offset: req.offset,
        length: req.length,
        mode: req.mode,
        padding: req.padding,
    }
}
