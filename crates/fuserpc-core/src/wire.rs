//! Wire messages of the raw filesystem service.
//!
//! One request and one response message per operation. Every response
//! carries a [`Status`] whose code is the native errno of the remote call;
//! zero means success. Nested messages are `Option`al the way optional
//! sub-messages are on the wire: senders always fill them, receivers treat
//! a missing one as all zeros.
//!
//! [`Attr`] carries the union of the platform-specific attribute fields
//! (`blksize`/`padding` on Linux, `flags` on BSD/Darwin); each side only
//! reads and writes the ones its platform has.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
}

impl Status {
    pub const OK: Status = Status { code: 0 };

    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub owner: Option<Owner>,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InHeader {
    pub length: u32,
    pub opcode: u32,
    pub unique: u64,
    pub node_id: u64,
    pub caller: Option<Caller>,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub owner: Option<Owner>,
    pub rdev: u32,
    pub blksize: u32,
    pub padding: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOut {
    pub node_id: u64,
    pub generation: u64,
    pub entry_valid: u64,
    pub attr_valid: u64,
    pub entry_valid_nsec: u32,
    pub attr_valid_nsec: u32,
    pub attr: Option<Attr>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrOut {
    pub attr_valid: u64,
    pub attr_valid_nsec: u32,
    pub dummy: u32,
    pub attr: Option<Attr>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOut {
    pub fh: u64,
    pub open_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLock {
    pub start: u64,
    pub end: u64,
    pub typ: u32,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatfsOut {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub name_len: u32,
    pub frsize: u32,
    pub padding: u32,
    pub spare: [u32; 6],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub mode: u32,
    pub name: Vec<u8>,
    pub ino: u64,
    pub off: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadIn {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub offset: u64,
    pub size: u32,
    pub read_flags: u32,
    pub lock_owner: u64,
    pub flags: u32,
    pub padding: u32,
}

// Requests

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub header: Option<InHeader>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgetRequest {
    pub node_id: u64,
    pub nlookup: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAttrRequest {
    pub header: Option<InHeader>,
    pub flags: u32,
    pub dummy: u32,
    pub fh: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttrRequest {
    pub header: Option<InHeader>,
    pub valid: u32,
    pub padding: u32,
    pub fh: u64,
    pub size: u64,
    pub lock_owner: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub unused4: u32,
    pub owner: Option<Owner>,
    pub unused5: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MknodRequest {
    pub header: Option<InHeader>,
    pub name: String,
    pub mode: u32,
    pub rdev: u32,
    pub umask: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirRequest {
    pub header: Option<InHeader>,
    pub name: String,
    pub mode: u32,
    pub umask: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub header: Option<InHeader>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmdirRequest {
    pub header: Option<InHeader>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub header: Option<InHeader>,
    pub newdir: u64,
    pub flags: u32,
    pub padding: u32,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub header: Option<InHeader>,
    pub oldnodeid: u64,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkRequest {
    pub header: Option<InHeader>,
    pub pointed_to: String,
    pub link_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadlinkRequest {
    pub header: Option<InHeader>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub header: Option<InHeader>,
    pub mask: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetXAttrRequest {
    pub header: Option<InHeader>,
    pub attr: String,
    /// Capacity of the caller's buffer; zero asks for the size only.
    pub dest_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListXAttrRequest {
    pub header: Option<InHeader>,
    pub dest_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetXAttrRequest {
    pub header: Option<InHeader>,
    pub attr: String,
    pub data: Vec<u8>,
    pub size: u32,
    pub flags: u32,
    pub position: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveXAttrRequest {
    pub header: Option<InHeader>,
    pub attr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub header: Option<InHeader>,
    pub name: String,
    pub flags: u32,
    pub mode: u32,
    pub umask: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub header: Option<InHeader>,
    pub flags: u32,
    pub mode: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub read_in: Option<ReadIn>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LseekRequest {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub offset: u64,
    pub whence: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LkRequest {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub owner: u64,
    pub lk: Option<FileLock>,
    pub lk_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub flags: u32,
    pub release_flags: u32,
    pub lock_owner: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub offset: u64,
    pub size: u32,
    pub write_flags: u32,
    pub lock_owner: u64,
    pub flags: u32,
    pub padding: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFileRangeRequest {
    pub header: Option<InHeader>,
    pub fh_in: u64,
    pub off_in: u64,
    pub node_id_out: u64,
    pub fh_out: u64,
    pub off_out: u64,
    pub len: u64,
    pub flags: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushRequest {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub unused: u32,
    pub padding: u32,
    pub lock_owner: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsyncRequest {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub fsync_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallocateRequest {
    pub header: Option<InHeader>,
    pub fh: u64,
    pub offset: u64,
    pub length: u64,
    pub mode: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFsRequest {
    pub header: Option<InHeader>,
}

// Responses

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringResponse {
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResponse {}

/// Response of an operation that produces nothing but a status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

/// Response of an operation that produces a directory entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryResponse {
    pub status: Status,
    pub entry_out: Option<EntryOut>,
}

/// Response of an operation that produces attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrResponse {
    pub status: Status,
    pub attr_out: Option<AttrOut>,
}

/// Response of an operation that opens a file or directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenResponse {
    pub status: Status,
    pub open_out: Option<OpenOut>,
}

pub type LookupResponse = EntryResponse;
pub type ForgetResponse = EmptyResponse;
pub type GetAttrResponse = AttrResponse;
pub type SetAttrResponse = AttrResponse;
pub type MknodResponse = EntryResponse;
pub type MkdirResponse = EntryResponse;
pub type UnlinkResponse = StatusResponse;
pub type RmdirResponse = StatusResponse;
pub type RenameResponse = StatusResponse;
pub type LinkResponse = EntryResponse;
pub type SymlinkResponse = EntryResponse;
pub type AccessResponse = StatusResponse;
pub type SetXAttrResponse = StatusResponse;
pub type RemoveXAttrResponse = StatusResponse;
pub type OpenDirResponse = OpenResponse;
pub type SetLkResponse = StatusResponse;
pub type ReleaseResponse = EmptyResponse;
pub type ReleaseDirResponse = EmptyResponse;
pub type FlushResponse = StatusResponse;
pub type FsyncResponse = StatusResponse;
pub type FsyncDirResponse = StatusResponse;
pub type FallocateResponse = StatusResponse;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadlinkResponse {
    pub status: Status,
    pub out: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XAttrResponse {
    pub status: Status,
    /// Size of the value (or name list), even when `data` is empty.
    pub size: u32,
    pub data: Vec<u8>,
}

pub type GetXAttrResponse = XAttrResponse;
pub type ListXAttrResponse = XAttrResponse;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub status: Status,
    pub entry_out: Option<EntryOut>,
    pub open_out: Option<OpenOut>,
}

/// One chunk of a streamed read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub status: Status,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LseekResponse {
    pub status: Status,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLkResponse {
    pub status: Status,
    pub lk: Option<FileLock>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub status: Status,
    pub written: u32,
}

pub type CopyFileRangeResponse = WriteResponse;

/// One chunk of a streamed directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirResponse {
    pub status: Status,
    pub entries: Vec<DirEntry>,
}

/// One chunk of a streamed directory listing with lookup results.
/// `entry_outs[i]` belongs to `entries[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirPlusResponse {
    pub status: Status,
    pub entries: Vec<DirEntry>,
    pub entry_outs: Vec<EntryOut>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFsResponse {
    pub status: Status,
    pub statfs_out: Option<StatfsOut>,
}

/// Access to the in-band status of a response.
pub trait HasStatus {
    fn status(&self) -> Status;
}

macro_rules! impl_has_status {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HasStatus for $ty {
                fn status(&self) -> Status {
                    self.status
                }
            }
        )*
    };
}

impl_has_status!(
    StatusResponse,
    EntryResponse,
    AttrResponse,
    OpenResponse,
    ReadlinkResponse,
    XAttrResponse,
    CreateResponse,
    ReadResponse,
    LseekResponse,
    GetLkResponse,
    WriteResponse,
    ReadDirResponse,
    ReadDirPlusResponse,
    StatFsResponse,
);
