//! The raw FUSE operation contract.
//!
//! [`RawFileSystem`] is implemented by filesystems that want to be served
//! (the server adapter calls into it) and by the client adapter that
//! forwards every call to a remote server. Every operation has a default
//! body reporting [`Status::ENOSYS`], so implementations only override what
//! they support.

use crate::abi::{
    AccessIn, AttrOut, CopyFileRangeIn, CreateIn, CreateOut, EntryOut, FallocateIn, FlushIn, FsyncIn,
    GetAttrIn, InHeader, LinkIn, LkIn, LkOut, LseekIn, LseekOut, MkdirIn, MknodIn, OpenIn, OpenOut, ReadIn,
    ReleaseIn, RenameIn, SetAttrIn, SetXAttrIn, StatfsOut, WriteIn,
};
use crate::cancel::Cancel;
use crate::dirent::DirEntryList;
use crate::status::Status;

/// Raw filesystem operations as issued by the kernel.
///
/// Methods returning [`Status`] fill their `out` argument only on success.
/// Methods returning `Result` never use `Err(Status::OK)`.
#[allow(unused_variables)]
pub trait RawFileSystem: Send + Sync {
    /// Identifying name of the filesystem.
    fn string(&self) -> String {
        "RawFileSystem".to_string()
    }

    fn set_debug(&self, debug: bool) {}

    /// Called once the kernel connection is established.
    fn init(&self) {}

    /// Called when the filesystem is unmounted.
    fn destroy(&self) {}

    fn lookup(&self, cancel: &Cancel, header: &InHeader, name: &str, out: &mut EntryOut) -> Status {
        Status::ENOSYS
    }

    /// Drops `nlookup` references to `node_id`.
    fn forget(&self, node_id: u64, nlookup: u64) {}

    fn get_attr(&self, cancel: &Cancel, input: &GetAttrIn, out: &mut AttrOut) -> Status {
        Status::ENOSYS
    }

    fn set_attr(&self, cancel: &Cancel, input: &SetAttrIn, out: &mut AttrOut) -> Status {
        Status::ENOSYS
    }

    fn mknod(&self, cancel: &Cancel, input: &MknodIn, name: &str, out: &mut EntryOut) -> Status {
        Status::ENOSYS
    }

    fn mkdir(&self, cancel: &Cancel, input: &MkdirIn, name: &str, out: &mut EntryOut) -> Status {
        Status::ENOSYS
    }

    fn unlink(&self, cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        Status::ENOSYS
    }

    fn rmdir(&self, cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        Status::ENOSYS
    }

    fn rename(&self, cancel: &Cancel, input: &RenameIn, old_name: &str, new_name: &str) -> Status {
        Status::ENOSYS
    }

    fn link(&self, cancel: &Cancel, input: &LinkIn, filename: &str, out: &mut EntryOut) -> Status {
        Status::ENOSYS
    }

    fn symlink(
        &self,
        cancel: &Cancel,
        header: &InHeader,
        pointed_to: &str,
        link_name: &str,
        out: &mut EntryOut,
    ) -> Status {
        Status::ENOSYS
    }

    fn readlink(&self, cancel: &Cancel, header: &InHeader) -> Result<Vec<u8>, Status> {
        Err(Status::ENOSYS)
    }

    fn access(&self, cancel: &Cancel, input: &AccessIn) -> Status {
        Status::ENOSYS
    }

    /// Copies the attribute value into `dest` and returns its size.
    ///
    /// With an empty `dest` only the size is reported; `ERANGE` means `dest`
    /// is too small.
    fn get_xattr(&self, cancel: &Cancel, header: &InHeader, attr: &str, dest: &mut [u8]) -> Result<u32, Status> {
        Err(Status::ENOSYS)
    }

    /// Copies the NUL-separated attribute names into `dest` and returns their size.
    fn list_xattr(&self, cancel: &Cancel, header: &InHeader, dest: &mut [u8]) -> Result<u32, Status> {
        Err(Status::ENOSYS)
    }

    fn set_xattr(&self, cancel: &Cancel, input: &SetXAttrIn, attr: &str, data: &[u8]) -> Status {
        Status::ENOSYS
    }

    fn remove_xattr(&self, cancel: &Cancel, header: &InHeader, attr: &str) -> Status {
        Status::ENOSYS
    }

    fn create(&self, cancel: &Cancel, input: &CreateIn, name: &str, out: &mut CreateOut) -> Status {
        Status::ENOSYS
    }

    fn open(&self, cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        Status::ENOSYS
    }

    /// Reads into `buf` and returns the number of bytes produced.
    fn read(&self, cancel: &Cancel, input: &ReadIn, buf: &mut [u8]) -> Result<usize, Status> {
        Err(Status::ENOSYS)
    }

    fn lseek(&self, cancel: &Cancel, input: &LseekIn, out: &mut LseekOut) -> Status {
        Status::ENOSYS
    }

    fn get_lk(&self, cancel: &Cancel, input: &LkIn, out: &mut LkOut) -> Status {
        Status::ENOSYS
    }

    fn set_lk(&self, cancel: &Cancel, input: &LkIn) -> Status {
        Status::ENOSYS
    }

    fn set_lkw(&self, cancel: &Cancel, input: &LkIn) -> Status {
        Status::ENOSYS
    }

    fn release(&self, cancel: &Cancel, input: &ReleaseIn) {}

    /// Writes `data` and returns the number of bytes accepted.
    fn write(&self, cancel: &Cancel, input: &WriteIn, data: &[u8]) -> Result<u32, Status> {
        Err(Status::ENOSYS)
    }

    fn copy_file_range(&self, cancel: &Cancel, input: &CopyFileRangeIn) -> Result<u32, Status> {
        Err(Status::ENOSYS)
    }

    fn flush(&self, cancel: &Cancel, input: &FlushIn) -> Status {
        Status::ENOSYS
    }

    fn fsync(&self, cancel: &Cancel, input: &FsyncIn) -> Status {
        Status::ENOSYS
    }

    fn fallocate(&self, cancel: &Cancel, input: &FallocateIn) -> Status {
        Status::ENOSYS
    }

    fn open_dir(&self, cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        Status::ENOSYS
    }

    fn read_dir(&self, cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        Status::ENOSYS
    }

    fn read_dir_plus(&self, cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        Status::ENOSYS
    }

    fn release_dir(&self, input: &ReleaseIn) {}

    fn fsync_dir(&self, cancel: &Cancel, input: &FsyncIn) -> Status {
        Status::ENOSYS
    }

    fn stat_fs(&self, cancel: &Cancel, header: &InHeader, out: &mut StatfsOut) -> Status {
        Status::ENOSYS
    }
}

impl<T: RawFileSystem + ?Sized> RawFileSystem for std::sync::Arc<T> {
    fn string(&self) -> String {
        (**self).string()
    }
    fn set_debug(&self, debug: bool) {
        (**self).set_debug(debug);
    }
    fn init(&self) {
        (**self).init();
    }
    fn destroy(&self) {
        (**self).destroy();
    }
    fn lookup(&self, cancel: &Cancel, header: &InHeader, name: &str, out: &mut EntryOut) -> Status {
        (**self).lookup(cancel, header, name, out)
    }
    fn forget(&self, node_id: u64, nlookup: u64) {
        (**self).forget(node_id, nlookup);
    }
    fn get_attr(&self, cancel: &Cancel, input: &GetAttrIn, out: &mut AttrOut) -> Status {
        (**self).get_attr(cancel, input, out)
    }
    fn set_attr(&self, cancel: &Cancel, input: &SetAttrIn, out: &mut AttrOut) -> Status {
        (**self).set_attr(cancel, input, out)
    }
    fn mknod(&self, cancel: &Cancel, input: &MknodIn, name: &str, out: &mut EntryOut) -> Status {
        (**self).mknod(cancel, input, name, out)
    }
    fn mkdir(&self, cancel: &Cancel, input: &MkdirIn, name: &str, out: &mut EntryOut) -> Status {
        (**self).mkdir(cancel, input, name, out)
    }
    fn unlink(&self, cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        (**self).unlink(cancel, header, name)
    }
    fn rmdir(&self, cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        (**self).rmdir(cancel, header, name)
    }
    fn rename(&self, cancel: &Cancel, input: &RenameIn, old_name: &str, new_name: &str) -> Status {
        (**self).rename(cancel, input, old_name, new_name)
    }
    fn link(&self, cancel: &Cancel, input: &LinkIn, filename: &str, out: &mut EntryOut) -> Status {
        (**self).link(cancel, input, filename, out)
    }
    fn symlink(&self, cancel: &Cancel, header: &InHeader, pointed_to: &str, link_name: &str, out: &mut EntryOut) -> Status {
        (**self).symlink(cancel, header, pointed_to, link_name, out)
    }
    fn readlink(&self, cancel: &Cancel, header: &InHeader) -> Result<Vec<u8>, Status> {
        (**self).readlink(cancel, header)
    }
    fn access(&self, cancel: &Cancel, input: &AccessIn) -> Status {
        (**self).access(cancel, input)
    }
    fn get_xattr(&self, cancel: &Cancel, header: &InHeader, attr: &str, dest: &mut [u8]) -> Result<u32, Status> {
        (**self).get_xattr(cancel, header, attr, dest)
    }
    fn list_xattr(&self, cancel: &Cancel, header: &InHeader, dest: &mut [u8]) -> Result<u32, Status> {
        (**self).list_xattr(cancel, header, dest)
    }
    fn set_xattr(&self, cancel: &Cancel, input: &SetXAttrIn, attr: &str, data: &[u8]) -> Status {
        (**self).set_xattr(cancel, input, attr, data)
    }
    fn remove_xattr(&self, cancel: &Cancel, header: &InHeader, attr: &str) -> Status {
        (**self).remove_xattr(cancel, header, attr)
    }
    fn create(&self, cancel: &Cancel, input: &CreateIn, name: &str, out: &mut CreateOut) -> Status {
        (**self).create(cancel, input, name, out)
    }
    fn open(&self, cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        (**self).open(cancel, input, out)
    }
    fn read(&self, cancel: &Cancel, input: &ReadIn, buf: &mut [u8]) -> Result<usize, Status> {
        (**self).read(cancel, input, buf)
    }
    fn lseek(&self, cancel: &Cancel, input: &LseekIn, out: &mut LseekOut) -> Status {
        (**self).lseek(cancel, input, out)
    }
    fn get_lk(&self, cancel: &Cancel, input: &LkIn, out: &mut LkOut) -> Status {
        (**self).get_lk(cancel, input, out)
    }
    fn set_lk(&self, cancel: &Cancel, input: &LkIn) -> Status {
        (**self).set_lk(cancel, input)
    }
    fn set_lkw(&self, cancel: &Cancel, input: &LkIn) -> Status {
        (**self).set_lkw(cancel, input)
    }
    fn release(&self, cancel: &Cancel, input: &ReleaseIn) {
        (**self).release(cancel, input);
    }
    fn write(&self, cancel: &Cancel, input: &WriteIn, data: &[u8]) -> Result<u32, Status> {
        (**self).write(cancel, input, data)
    }
    fn copy_file_range(&self, cancel: &Cancel, input: &CopyFileRangeIn) -> Result<u32, Status> {
        (**self).copy_file_range(cancel, input)
    }
    fn flush(&self, cancel: &Cancel, input: &FlushIn) -> Status {
        (**self).flush(cancel, input)
    }
    fn fsync(&self, cancel: &Cancel, input: &FsyncIn) -> Status {
        (**self).fsync(cancel, input)
    }
    fn fallocate(&self, cancel: &Cancel, input: &FallocateIn) -> Status {
        (**self).fallocate(cancel, input)
    }
    fn open_dir(&self, cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        (**self).open_dir(cancel, input, out)
    }
    fn read_dir(&self, cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        (**self).read_dir(cancel, input, out)
    }
    fn read_dir_plus(&self, cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        (**self).read_dir_plus(cancel, input, out)
    }
    fn release_dir(&self, input: &ReleaseIn) {
        (**self).release_dir(input);
    }
    fn fsync_dir(&self, cancel: &Cancel, input: &FsyncIn) -> Status {
        (**self).fsync_dir(cancel, input)
    }
    fn stat_fs(&self, cancel: &Cancel, header: &InHeader, out: &mut StatfsOut) -> Status {
        (**self).stat_fs(cancel, header, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Named;

    impl RawFileSystem for Named {
        fn string(&self) -> String {
            "named".into()
        }

        fn unlink(&self, _cancel: &Cancel, _header: &InHeader, name: &str) -> Status {
            if name == "busy" { Status::EBUSY } else { Status::OK }
        }
    }

    #[test]
    fn test_defaults_are_unimplemented() {
        let fs = Named;
        let cancel = Cancel::never();
        let header = InHeader::default();
        let mut entry = EntryOut::default();
        assert_eq!(fs.lookup(&cancel, &header, "x", &mut entry), Status::ENOSYS);
        assert_eq!(fs.readlink(&cancel, &header), Err(Status::ENOSYS));
        assert_eq!(fs.stat_fs(&cancel, &header, &mut StatfsOut::default()), Status::ENOSYS);
        assert_eq!(
            fs.read(&cancel, &ReadIn::default(), &mut [0u8; 4]),
            Err(Status::ENOSYS)
        );
    }

    #[test]
    fn test_arc_forwards() {
        let fs: Arc<dyn RawFileSystem> = Arc::new(Named);
        let cancel = Cancel::never();
        let header = InHeader::default();
        assert_eq!(fs.string(), "named");
        assert_eq!(fs.unlink(&cancel, &header, "busy"), Status::EBUSY);
        assert_eq!(fs.unlink(&cancel, &header, "idle"), Status::OK);
    }
}
