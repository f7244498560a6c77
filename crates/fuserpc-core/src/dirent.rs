//! Directory entry binary layout and the `DirEntryList` write cursor.
//!
//! The kernel consumes readdir replies as a packed sequence of records:
//! a 24-byte header `{ino: u64, off: u64, namelen: u32, typ: u32}` followed
//! by the name, each record padded to an 8-byte boundary. Readdirplus
//! replies prefix every record with a full `fuse_entry_out`.
//!
//! All integers are written in native byte order, as the kernel reads them
//! straight out of the reply buffer.

use crate::abi::{Attr, EntryOut, UNKNOWN_INO};

/// Longest name a single directory entry may carry.
pub const NAME_MAX: usize = 255;

/// Record alignment required by the kernel.
pub const DIRENT_ALIGN: usize = 8;

/// Fixed header of a kernel directory entry (`struct fuse_dirent` without the name).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelDirent {
    pub ino: u64,
    pub off: u64,
    pub namelen: u32,
    pub typ: u32,
}

/// Size of [`KernelDirent`] in bytes.
pub const DIRENT_HEADER_SIZE: usize = std::mem::size_of::<KernelDirent>();

/// Size of `struct fuse_attr` for the target platform.
#[cfg(target_os = "linux")]
pub const ATTR_SIZE: usize = 88;
/// Size of `struct fuse_attr` for the target platform (includes crtime fields).
#[cfg(not(target_os = "linux"))]
pub const ATTR_SIZE: usize = 96;

/// Size of `struct fuse_entry_out` for the target platform.
pub const ENTRY_OUT_SIZE: usize = 40 + ATTR_SIZE;

/// Header size plus name, without alignment padding.
pub const fn dirent_record_size(name_len: usize) -> usize {
    DIRENT_HEADER_SIZE + name_len
}

/// Record size rounded up to the kernel's record alignment.
pub const fn dirent_aligned_size(name_len: usize) -> usize {
    (dirent_record_size(name_len) + DIRENT_ALIGN - 1) & !(DIRENT_ALIGN - 1)
}

/// Translates a dirent type tag (`DT_*`) into the `S_IFMT` bits of a mode word.
///
/// Unknown tags map to zero.
pub fn type_to_mode(typ: u32) -> u32 {
    let bits = match typ {
        1 => libc::S_IFIFO,
        2 => libc::S_IFCHR,
        4 => libc::S_IFDIR,
        6 => libc::S_IFBLK,
        8 => libc::S_IFREG,
        10 => libc::S_IFLNK,
        12 => libc::S_IFSOCK,
        _ => return 0,
    };
    bits as u32
}

/// Translates the `S_IFMT` bits of a mode word into a dirent type tag.
pub fn mode_to_type(mode: u32) -> u32 {
    (mode & libc::S_IFMT as u32) >> 12
}

/// One directory entry as exchanged between a filesystem and its caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// File type bits (`S_IFMT` part of the mode); permission bits are ignored.
    pub mode: u32,
    /// Raw name bytes; not necessarily UTF-8.
    pub name: Vec<u8>,
    pub ino: u64,
    /// Offset the kernel should pass back to continue after this entry.
    /// Zero means "one past the previous entry".
    pub off: u64,
}

impl DirEntry {
    pub fn new(name: impl Into<Vec<u8>>, ino: u64, mode: u32) -> Self {
        Self {
            mode,
            name: name.into(),
            ino,
            off: 0,
        }
    }
}

/// Signal returned when an entry does not fit into the remaining buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("directory entry buffer is full")]
pub struct DirListFull;

/// Write cursor over a fixed-capacity readdir reply buffer.
///
/// Entries are appended only when the whole record fits; a failed append
/// leaves the buffer untouched. The position of the last record is kept so
/// its offset, type, or lookup prefix can be patched after the fact.
#[derive(Debug)]
pub struct DirEntryList {
    buf: Vec<u8>,
    written: usize,
    offset: u64,
    last_entry_out: Option<usize>,
    last_dirent: Option<usize>,
}

impl DirEntryList {
    /// Creates a cursor over `buf`, whose length is the reply capacity.
    ///
    /// `offset` is the directory offset the listing starts from.
    pub fn new(buf: Vec<u8>, offset: u64) -> Self {
        Self {
            buf,
            written: 0,
            offset,
            last_entry_out: None,
            last_dirent: None,
        }
    }

    /// Creates a cursor over a freshly allocated, zeroed buffer.
    pub fn with_capacity(size: usize, offset: u64) -> Self {
        Self::new(vec![0; size], offset)
    }

    /// Appends one record.
    ///
    /// `off == 0` stores one past the current offset. On success returns
    /// whether another maximal entry of the same kind still fits.
    pub fn append_entry(&mut self, ino: u64, name: &[u8], typ: u32, off: u64) -> Result<bool, DirListFull> {
        self.append(0, ino, name, typ, off)
    }

    fn append(&mut self, prefix: usize, ino: u64, name: &[u8], typ: u32, off: u64) -> Result<bool, DirListFull> {
        let namelen = u32::try_from(name.len()).map_err(|_| DirListFull)?;
        let end = self.written + prefix + dirent_aligned_size(name.len());
        if end > self.buf.len() {
            return Err(DirListFull);
        }

        let start = self.written;
        let dirent_at = start + prefix;
        let off = if off == 0 { self.offset + 1 } else { off };
        let header = KernelDirent {
            ino: if ino == 0 { UNKNOWN_INO } else { ino },
            off,
            namelen,
            typ,
        };

        self.buf[start..end].fill(0);
        write_dirent(&mut self.buf[dirent_at..], &header);
        let name_at = dirent_at + DIRENT_HEADER_SIZE;
        self.buf[name_at..name_at + name.len()].copy_from_slice(name);

        self.written = end;
        self.offset = off;
        self.last_dirent = Some(dirent_at);
        self.last_entry_out = (prefix > 0).then_some(start);

        Ok(self.remaining() >= prefix + dirent_aligned_size(NAME_MAX))
    }

    /// Appends a plain readdir entry. Returns `false` when it does not fit.
    pub fn add_dir_entry(&mut self, entry: &DirEntry) -> bool {
        self.append(0, entry.ino, &entry.name, mode_to_type(entry.mode), entry.off)
            .is_ok()
    }

    /// Appends one readdirplus record: the lookup result, then the dirent.
    pub fn append_lookup_entry(
        &mut self,
        ino: u64,
        name: &[u8],
        typ: u32,
        off: u64,
        entry_out: &EntryOut,
    ) -> Result<bool, DirListFull> {
        let more = self.append(ENTRY_OUT_SIZE, ino, name, typ, off)?;
        self.set_last_entry_out(entry_out);
        Ok(more)
    }

    /// Appends a readdirplus entry with its lookup result.
    /// Returns `false` when it does not fit.
    pub fn add_dir_lookup_entry(&mut self, entry: &DirEntry, entry_out: &EntryOut) -> bool {
        self.append_lookup_entry(entry.ino, &entry.name, mode_to_type(entry.mode), entry.off, entry_out)
            .is_ok()
    }

    /// Rewrites the lookup result of the last readdirplus entry.
    pub fn set_last_entry_out(&mut self, entry_out: &EntryOut) -> bool {
        match self.last_entry_out {
            Some(at) => {
                encode_entry_out(entry_out, &mut self.buf[at..at + ENTRY_OUT_SIZE]);
                true
            }
            None => false,
        }
    }

    /// Rewrites the offset field of the last appended record.
    pub fn patch_last_offset(&mut self, off: u64) -> bool {
        match self.last_dirent {
            Some(at) => {
                self.buf[at + 8..at + 16].copy_from_slice(&off.to_ne_bytes());
                self.offset = off;
                true
            }
            None => false,
        }
    }

    /// Rewrites the type tag of the last appended record from a mode word.
    pub fn fix_mode(&mut self, mode: u32) {
        if let Some(at) = self.last_dirent {
            self.buf[at + 20..at + 24].copy_from_slice(&mode_to_type(mode).to_ne_bytes());
        }
    }

    /// Offset of the last appended entry (or the starting offset).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.written
    }

    /// The encoded records.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.written]
    }

    /// Gives back the underlying buffer, e.g. to return it to a pool.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}

fn write_dirent(buf: &mut [u8], d: &KernelDirent) {
    let mut w = Writer::new(buf);
    w.u64(d.ino);
    w.u64(d.off);
    w.u32(d.namelen);
    w.u32(d.typ);
}

/// A decoded directory record borrowed from a reply buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirentRecord<'a> {
    pub ino: u64,
    pub off: u64,
    pub typ: u32,
    pub name: &'a [u8],
}

impl DirentRecord<'_> {
    /// Converts the record into an owned entry.
    pub fn to_entry(&self) -> DirEntry {
        DirEntry {
            mode: type_to_mode(self.typ),
            name: self.name.to_vec(),
            ino: self.ino,
            off: self.off,
        }
    }
}

/// Iterates the records of a readdir (or readdirplus) reply buffer.
///
/// A truncated trailing record ends iteration instead of failing.
#[derive(Debug, Clone)]
pub struct Dirents<'a> {
    buf: &'a [u8],
    pos: usize,
    plus: bool,
}

/// Parses a readdir reply.
pub fn parse_dirents(buf: &[u8]) -> Dirents<'_> {
    Dirents { buf, pos: 0, plus: false }
}

/// Parses a readdirplus reply.
pub fn parse_dirents_plus(buf: &[u8]) -> Dirents<'_> {
    Dirents { buf, pos: 0, plus: true }
}

impl<'a> Iterator for Dirents<'a> {
    type Item = (Option<EntryOut>, DirentRecord<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let prefix = if self.plus { ENTRY_OUT_SIZE } else { 0 };
        let rest = self.buf.get(self.pos..)?;
        if rest.len() < prefix + DIRENT_HEADER_SIZE {
            return None;
        }

        let entry_out = self.plus.then(|| decode_entry_out(&rest[..ENTRY_OUT_SIZE]));
        let mut r = Reader::new(&rest[prefix..]);
        let ino = r.u64();
        let off = r.u64();
        let namelen = r.u32() as usize;
        let typ = r.u32();

        let name_at = prefix + DIRENT_HEADER_SIZE;
        let name = rest.get(name_at..name_at + namelen)?;
        self.pos += prefix + dirent_aligned_size(namelen);
        Some((entry_out, DirentRecord { ino, off, typ, name }))
    }
}

/// Encodes `fuse_entry_out` into `buf`, which must be `ENTRY_OUT_SIZE` long.
pub fn encode_entry_out(out: &EntryOut, buf: &mut [u8]) {
    let mut w = Writer::new(buf);
    w.u64(out.node_id);
    w.u64(out.generation);
    w.u64(out.entry_valid);
    w.u64(out.attr_valid);
    w.u32(out.entry_valid_nsec);
    w.u32(out.attr_valid_nsec);
    encode_attr(&out.attr, &mut w);
}

/// Decodes `fuse_entry_out` from `buf`, which must be `ENTRY_OUT_SIZE` long.
pub fn decode_entry_out(buf: &[u8]) -> EntryOut {
    let mut r = Reader::new(buf);
    EntryOut {
        node_id: r.u64(),
        generation: r.u64(),
        entry_valid: r.u64(),
        attr_valid: r.u64(),
        entry_valid_nsec: r.u32(),
        attr_valid_nsec: r.u32(),
        attr: decode_attr(&mut r),
    }
}

#[cfg(target_os = "linux")]
fn encode_attr(a: &Attr, w: &mut Writer<'_>) {
    for v in [a.ino, a.size, a.blocks, a.atime, a.mtime, a.ctime] {
        w.u64(v);
    }
    for v in [
        a.atimensec, a.mtimensec, a.ctimensec, a.mode, a.nlink, a.owner.uid, a.owner.gid, a.rdev,
        a.blksize, a.padding,
    ] {
        w.u32(v);
    }
}

#[cfg(not(target_os = "linux"))]
fn encode_attr(a: &Attr, w: &mut Writer<'_>) {
    // crtime and crtimensec are not tracked and go out as zero.
    for v in [a.ino, a.size, a.blocks, a.atime, a.mtime, a.ctime, 0] {
        w.u64(v);
    }
    for v in [
        a.atimensec, a.mtimensec, a.ctimensec, 0, a.mode, a.nlink, a.owner.uid, a.owner.gid, a.rdev,
        a.flags,
    ] {
        w.u32(v);
    }
}

#[cfg(target_os = "linux")]
fn decode_attr(r: &mut Reader<'_>) -> Attr {
    let mut a = Attr {
        ino: r.u64(),
        size: r.u64(),
        blocks: r.u64(),
        atime: r.u64(),
        mtime: r.u64(),
        ctime: r.u64(),
        ..Attr::default()
    };
    a.atimensec = r.u32();
    a.mtimensec = r.u32();
    a.ctimensec = r.u32();
    a.mode = r.u32();
    a.nlink = r.u32();
    a.owner.uid = r.u32();
    a.owner.gid = r.u32();
    a.rdev = r.u32();
    a.blksize = r.u32();
    a.padding = r.u32();
    a
}

#[cfg(not(target_os = "linux"))]
fn decode_attr(r: &mut Reader<'_>) -> Attr {
    let mut a = Attr {
        ino: r.u64(),
        size: r.u64(),
        blocks: r.u64(),
        atime: r.u64(),
        mtime: r.u64(),
        ctime: r.u64(),
        ..Attr::default()
    };
    let _crtime = r.u64();
    a.atimensec = r.u32();
    a.mtimensec = r.u32();
    a.ctimensec = r.u32();
    let _crtimensec = r.u32();
    a.mode = r.u32();
    a.nlink = r.u32();
    a.owner.uid = r.u32();
    a.owner.gid = r.u32();
    a.rdev = r.u32();
    a.flags = r.u32();
    a
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u64(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_ne_bytes());
        self.pos += 8;
    }

    fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_ne_bytes());
        self.pos += 4;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_ne_bytes(b)
    }

    fn u32(&mut self) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_ne_bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Owner;
    use proptest::prelude::*;

    /// Kernel `struct fuse_attr` for the target platform.
    #[cfg(target_os = "linux")]
    #[repr(C)]
    #[allow(dead_code)]
    struct KernelAttr {
        ino: u64,
        size: u64,
        blocks: u64,
        atime: u64,
        mtime: u64,
        ctime: u64,
        atimensec: u32,
        mtimensec: u32,
        ctimensec: u32,
        mode: u32,
        nlink: u32,
        uid: u32,
        gid: u32,
        rdev: u32,
        blksize: u32,
        flags: u32,
    }

    #[cfg(not(target_os = "linux"))]
    #[repr(C)]
    #[allow(dead_code)]
    struct KernelAttr {
        ino: u64,
        size: u64,
        blocks: u64,
        atime: u64,
        mtime: u64,
        ctime: u64,
        crtime: u64,
        atimensec: u32,
        mtimensec: u32,
        ctimensec: u32,
        crtimensec: u32,
        mode: u32,
        nlink: u32,
        uid: u32,
        gid: u32,
        rdev: u32,
        flags: u32,
    }

    #[repr(C)]
    #[allow(dead_code)]
    struct KernelEntryOut {
        nodeid: u64,
        generation: u64,
        entry_valid: u64,
        attr_valid: u64,
        entry_valid_nsec: u32,
        attr_valid_nsec: u32,
        attr: KernelAttr,
    }

    fn sample_entry_out() -> EntryOut {
        EntryOut {
            node_id: 42,
            generation: 3,
            entry_valid: 1,
            attr_valid: 2,
            entry_valid_nsec: 500,
            attr_valid_nsec: 600,
            attr: Attr {
                ino: 42,
                size: 1234,
                blocks: 8,
                mode: libc::S_IFREG as u32 | 0o644,
                nlink: 1,
                owner: Owner { uid: 1000, gid: 100 },
                ..Attr::default()
            },
        }
    }

    #[test]
    fn test_header_size_matches_kernel_struct() {
        assert_eq!(DIRENT_HEADER_SIZE, 24);
        assert_eq!(DIRENT_HEADER_SIZE, std::mem::size_of::<KernelDirent>());
    }

    #[test]
    fn test_entry_out_size_matches_kernel_struct() {
        assert_eq!(ATTR_SIZE, std::mem::size_of::<KernelAttr>());
        assert_eq!(ENTRY_OUT_SIZE, std::mem::size_of::<KernelEntryOut>());
    }

    #[test]
    fn test_record_size() {
        for n in [0usize, 5, 255, 1024] {
            assert_eq!(dirent_record_size(n), DIRENT_HEADER_SIZE + n);
            assert_eq!(dirent_aligned_size(n) % DIRENT_ALIGN, 0);
            assert!(dirent_aligned_size(n) >= dirent_record_size(n));
            assert!(dirent_aligned_size(n) - dirent_record_size(n) < DIRENT_ALIGN);
        }
    }

    #[test]
    fn test_type_to_mode() {
        assert_eq!(type_to_mode(8), libc::S_IFREG as u32);
        assert_eq!(type_to_mode(4), libc::S_IFDIR as u32);
        assert_eq!(type_to_mode(10), libc::S_IFLNK as u32);
        assert_eq!(type_to_mode(0), 0);
        assert_eq!(type_to_mode(99), 0);
    }

    #[test]
    fn test_mode_to_type() {
        assert_eq!(mode_to_type(libc::S_IFREG as u32 | 0o644), 8);
        assert_eq!(mode_to_type(libc::S_IFDIR as u32 | 0o755), 4);
        assert_eq!(mode_to_type(libc::S_IFLNK as u32), 10);
        assert_eq!(mode_to_type(0o644), 0);
    }

    #[test]
    fn test_append_and_parse() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert!(list.add_dir_entry(&DirEntry::new("hello", 10, libc::S_IFREG as u32)));
        assert!(list.add_dir_entry(&DirEntry::new("sub", 11, libc::S_IFDIR as u32)));

        let records: Vec<_> = parse_dirents(list.as_bytes()).map(|(_, r)| r.to_entry()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, b"hello");
        assert_eq!(records[0].ino, 10);
        assert_eq!(records[0].off, 1);
        assert_eq!(records[0].mode, libc::S_IFREG as u32);
        assert_eq!(records[1].name, b"sub");
        assert_eq!(records[1].off, 2);
        assert_eq!(records[1].mode, libc::S_IFDIR as u32);
        assert_eq!(list.offset(), 2);
    }

    #[test]
    fn test_non_utf8_name_is_kept() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert!(list.add_dir_entry(&DirEntry::new(&b"caf\xe9"[..], 3, libc::S_IFREG as u32)));
        let (_, rec) = parse_dirents(list.as_bytes()).next().unwrap();
        assert_eq!(rec.name, b"caf\xe9");
        assert_eq!(rec.to_entry().name, b"caf\xe9");
    }

    #[test]
    fn test_explicit_offset_is_kept() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        let mut entry = DirEntry::new("a", 5, libc::S_IFREG as u32);
        entry.off = 77;
        assert!(list.add_dir_entry(&entry));
        assert_eq!(list.offset(), 77);
        let (_, rec) = parse_dirents(list.as_bytes()).next().unwrap();
        assert_eq!(rec.off, 77);
    }

    #[test]
    fn test_zero_inode_becomes_unknown() {
        let mut list = DirEntryList::with_capacity(128, 0);
        assert!(list.add_dir_entry(&DirEntry::new("x", 0, 0)));
        let (_, rec) = parse_dirents(list.as_bytes()).next().unwrap();
        assert_eq!(rec.ino, UNKNOWN_INO);
    }

    #[test]
    fn test_records_are_padded() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert!(list.add_dir_entry(&DirEntry::new("abc", 1, 0)));
        assert_eq!(list.len(), 32);
        assert!(list.add_dir_entry(&DirEntry::new("abcdefgh", 2, 0)));
        assert_eq!(list.len(), 64);
    }

    #[test]
    fn test_full_buffer_rejects_without_partial_write() {
        let mut list = DirEntryList::with_capacity(40, 0);
        assert!(list.add_dir_entry(&DirEntry::new("abc", 1, 0)));
        let before = list.as_bytes().to_vec();
        assert!(!list.add_dir_entry(&DirEntry::new("abc", 2, 0)));
        assert_eq!(list.as_bytes(), &before[..]);
        assert_eq!(list.offset(), 1);
    }

    #[test]
    fn test_append_reports_room_for_maximal_entry() {
        let mut list = DirEntryList::with_capacity(dirent_aligned_size(1) + dirent_aligned_size(NAME_MAX), 0);
        assert_eq!(list.append_entry(1, b"a", 8, 0), Ok(true));
        assert_eq!(list.append_entry(2, b"b", 8, 0), Ok(false));

        let mut tiny = DirEntryList::with_capacity(8, 0);
        assert_eq!(tiny.append_entry(1, b"", 8, 0), Err(DirListFull));
    }

    #[test]
    fn test_patch_last_offset() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert!(!list.patch_last_offset(9));
        assert!(list.add_dir_entry(&DirEntry::new("a", 1, 0)));
        assert!(list.add_dir_entry(&DirEntry::new("b", 2, 0)));
        assert!(list.patch_last_offset(1000));

        let offs: Vec<u64> = parse_dirents(list.as_bytes()).map(|(_, r)| r.off).collect();
        assert_eq!(offs, vec![1, 1000]);
        assert_eq!(list.offset(), 1000);
    }

    #[test]
    fn test_fix_mode() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert!(list.add_dir_entry(&DirEntry::new("a", 1, 0)));
        list.fix_mode(libc::S_IFDIR as u32);
        let (_, rec) = parse_dirents(list.as_bytes()).next().unwrap();
        assert_eq!(rec.typ, 4);
    }

    #[test]
    fn test_lookup_entries() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        let out = sample_entry_out();
        assert!(list.add_dir_lookup_entry(&DirEntry::new("file", 42, libc::S_IFREG as u32), &out));
        assert_eq!(list.len(), ENTRY_OUT_SIZE + dirent_aligned_size(4));

        let (entry_out, rec) = parse_dirents_plus(list.as_bytes()).next().unwrap();
        assert_eq!(entry_out, Some(out));
        assert_eq!(rec.name, b"file");

        let mut patched = out;
        patched.generation = 99;
        assert!(list.set_last_entry_out(&patched));
        let (entry_out, _) = parse_dirents_plus(list.as_bytes()).next().unwrap();
        assert_eq!(entry_out.unwrap().generation, 99);
    }

    #[test]
    fn test_plain_entry_has_no_lookup_slot() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert!(list.add_dir_entry(&DirEntry::new("a", 1, 0)));
        assert!(!list.set_last_entry_out(&EntryOut::default()));
    }

    #[test]
    fn test_truncated_buffer_stops_iteration() {
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert!(list.add_dir_entry(&DirEntry::new("abcdef", 1, 0)));
        let bytes = list.as_bytes();
        assert_eq!(parse_dirents(&bytes[..DIRENT_HEADER_SIZE + 2]).count(), 0);
        assert_eq!(parse_dirents(&bytes[..10]).count(), 0);
    }

    #[test]
    fn test_entry_out_codec() {
        let out = sample_entry_out();
        let mut buf = vec![0u8; ENTRY_OUT_SIZE];
        encode_entry_out(&out, &mut buf);
        assert_eq!(decode_entry_out(&buf), out);
    }

    proptest! {
        #[test]
        fn prop_record_size(n in 0usize..2048) {
            prop_assert_eq!(dirent_record_size(n), DIRENT_HEADER_SIZE + n);
        }

        #[test]
        fn prop_names_survive(
            names in proptest::collection::vec(proptest::collection::vec(1u8..=255, 1..64), 1..20)
        ) {
            let mut list = DirEntryList::with_capacity(1 << 16, 0);
            for (i, name) in names.iter().enumerate() {
                prop_assert!(list.add_dir_entry(&DirEntry::new(name.clone(), i as u64 + 1, libc::S_IFREG as u32)));
            }
            let parsed: Vec<Vec<u8>> = parse_dirents(list.as_bytes()).map(|(_, r)| r.to_entry().name).collect();
            prop_assert_eq!(parsed, names);
        }
    }
}
