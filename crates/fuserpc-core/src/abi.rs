//! Kernel-shaped input and output structures of the raw FUSE operations.
//!
//! These mirror the structs the kernel exchanges with a userspace daemon.
//! Fields that exist only on one platform family are compiled in with
//! `#[cfg(target_os = "linux")]`; every other unix target uses the
//! BSD/Darwin layout.

/// Inode number of the filesystem root.
pub const ROOT_ID: u64 = 1;

/// Inode number reported to the kernel when the real one is unknown.
pub const UNKNOWN_INO: u64 = 0xffff_ffff;

/// `SetAttrIn::valid` bits.
pub mod setattr_valid {
    pub const MODE: u32 = 1 << 0;
    pub const UID: u32 = 1 << 1;
    pub const GID: u32 = 1 << 2;
    pub const SIZE: u32 = 1 << 3;
    pub const ATIME: u32 = 1 << 4;
    pub const MTIME: u32 = 1 << 5;
    pub const FH: u32 = 1 << 6;
    pub const ATIME_NOW: u32 = 1 << 7;
    pub const MTIME_NOW: u32 = 1 << 8;
    pub const LOCKOWNER: u32 = 1 << 9;
    pub const CTIME: u32 = 1 << 10;
}

/// `GetAttrIn::flags` bit: the `fh` field is valid.
pub const GETATTR_FH: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caller {
    pub owner: Owner,
    pub pid: u32,
}

/// Common header of every kernel request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InHeader {
    pub length: u32,
    pub opcode: u32,
    pub unique: u64,
    pub node_id: u64,
    pub caller: Caller,
    pub padding: u32,
}

impl InHeader {
    /// Header addressed at `node_id` with an otherwise empty request context.
    pub fn for_node(node_id: u64) -> Self {
        Self {
            node_id,
            ..Self::default()
        }
    }
}

/// File attributes as reported to the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
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
    pub owner: Owner,
    pub rdev: u32,
    #[cfg(target_os = "linux")]
    pub blksize: u32,
    #[cfg(target_os = "linux")]
    pub padding: u32,
    #[cfg(not(target_os = "linux"))]
    pub flags: u32,
}

impl Attr {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_regular(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrOut {
    pub attr_valid: u64,
    pub attr_valid_nsec: u32,
    pub dummy: u32,
    pub attr: Attr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOut {
    pub node_id: u64,
    pub generation: u64,
    pub entry_valid: u64,
    pub attr_valid: u64,
    pub entry_valid_nsec: u32,
    pub attr_valid_nsec: u32,
    pub attr: Attr,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetAttrIn {
    pub header: InHeader,
    pub flags: u32,
    pub dummy: u32,
    pub fh: u64,
}

impl GetAttrIn {
    /// The file handle, if the kernel supplied one.
    pub fn fh(&self) -> Option<u64> {
        (self.flags & GETATTR_FH != 0).then_some(self.fh)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttrIn {
    pub header: InHeader,
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
    pub owner: Owner,
    pub unused5: u32,
}

impl SetAttrIn {
    fn get(&self, bit: u32) -> bool {
        self.valid & bit != 0
    }

    pub fn mode(&self) -> Option<u32> {
        self.get(setattr_valid::MODE).then_some(self.mode)
    }

    pub fn uid(&self) -> Option<u32> {
        self.get(setattr_valid::UID).then_some(self.owner.uid)
    }

    pub fn gid(&self) -> Option<u32> {
        self.get(setattr_valid::GID).then_some(self.owner.gid)
    }

    pub fn size(&self) -> Option<u64> {
        self.get(setattr_valid::SIZE).then_some(self.size)
    }

    pub fn fh(&self) -> Option<u64> {
        self.get(setattr_valid::FH).then_some(self.fh)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MknodIn {
    pub header: InHeader,
    pub mode: u32,
    pub rdev: u32,
    pub umask: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MkdirIn {
    pub header: InHeader,
    pub mode: u32,
    pub umask: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameIn {
    pub header: InHeader,
    pub newdir: u64,
    pub flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkIn {
    pub header: InHeader,
    pub oldnodeid: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessIn {
    pub header: InHeader,
    pub mask: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetXAttrIn {
    pub header: InHeader,
    pub size: u32,
    pub flags: u32,
    #[cfg(not(target_os = "linux"))]
    pub position: u32,
    #[cfg(not(target_os = "linux"))]
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateIn {
    pub header: InHeader,
    pub flags: u32,
    pub mode: u32,
    pub umask: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenIn {
    pub header: InHeader,
    pub flags: u32,
    pub mode: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOut {
    pub fh: u64,
    pub open_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOut {
    pub entry_out: EntryOut,
    pub open_out: OpenOut,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadIn {
    pub header: InHeader,
    pub fh: u64,
    pub offset: u64,
    pub size: u32,
    pub read_flags: u32,
    pub lock_owner: u64,
    pub flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteIn {
    pub header: InHeader,
    pub fh: u64,
    pub offset: u64,
    pub size: u32,
    pub write_flags: u32,
    pub lock_owner: u64,
    pub flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LseekIn {
    pub header: InHeader,
    pub fh: u64,
    pub offset: u64,
    pub whence: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LseekOut {
    pub offset: u64,
}

/// A POSIX record lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileLock {
    pub start: u64,
    pub end: u64,
    pub typ: u32,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LkIn {
    pub header: InHeader,
    pub fh: u64,
    pub owner: u64,
    pub lk: FileLock,
    pub lk_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LkOut {
    pub lk: FileLock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseIn {
    pub header: InHeader,
    pub fh: u64,
    pub flags: u32,
    pub release_flags: u32,
    pub lock_owner: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushIn {
    pub header: InHeader,
    pub fh: u64,
    pub unused: u32,
    pub padding: u32,
    pub lock_owner: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsyncIn {
    pub header: InHeader,
    pub fh: u64,
    pub fsync_flags: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallocateIn {
    pub header: InHeader,
    pub fh: u64,
    pub offset: u64,
    pub length: u64,
    pub mode: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyFileRangeIn {
    pub header: InHeader,
    pub fh_in: u64,
    pub off_in: u64,
    pub node_id_out: u64,
    pub fh_out: u64,
    pub off_out: u64,
    pub len: u64,
    pub flags: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setattr_accessors() {
        let input = SetAttrIn {
            valid: setattr_valid::MODE | setattr_valid::SIZE,
            mode: 0o644,
            size: 42,
            owner: Owner { uid: 7, gid: 8 },
            ..SetAttrIn::default()
        };
        assert_eq!(input.mode(), Some(0o644));
        assert_eq!(input.size(), Some(42));
        assert_eq!(input.uid(), None);
        assert_eq!(input.gid(), None);
        assert_eq!(input.fh(), None);
    }

    #[test]
    fn test_getattr_fh() {
        let mut input = GetAttrIn { fh: 9, ..GetAttrIn::default() };
        assert_eq!(input.fh(), None);
        input.flags = GETATTR_FH;
        assert_eq!(input.fh(), Some(9));
    }

    #[test]
    fn test_attr_kind() {
        let dir = Attr { mode: libc::S_IFDIR as u32 | 0o755, ..Attr::default() };
        assert!(dir.is_dir());
        assert!(!dir.is_regular());

        let link = Attr { mode: libc::S_IFLNK as u32 | 0o777, ..Attr::default() };
        assert!(link.is_symlink());
    }

    #[test]
    fn test_header_for_node() {
        let header = InHeader::for_node(ROOT_ID);
        assert_eq!(header.node_id, 1);
        assert_eq!(header.caller, Caller::default());
    }
}
