//! Server adapter: the RPC service contract over a local [`RawFileSystem`].
//!
//! Each call decodes its request into native structures, runs the local
//! operation on the blocking pool with a cancellation signal tied to the
//! call, and encodes the outcome. `ENOSYS` from the local filesystem is the
//! one status that leaves the response path: it becomes an RPC
//! `Unimplemented` error. Every other status, success or failure, travels
//! in-band in the response.
//!
//! `read`, `read_dir` and `read_dir_plus` answer with a stream whose chunks
//! stay under the configured message-size threshold.

use async_trait::async_trait;
use fuserpc_core::abi::{AttrOut, CreateOut, EntryOut, LkOut, LseekOut, OpenOut, StatfsOut};
use fuserpc_core::dirent::{self, DirEntryList, ENTRY_OUT_SIZE};
use fuserpc_core::rpc::{MAX_FRAME_LEN, RawFileSystemService, Request, RpcResult, RpcStatus, Streaming};
use fuserpc_core::translate::{self, header_from_wire};
use fuserpc_core::wire;
use fuserpc_core::{BufferPool, Cancel, RawFileSystem, Status};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{trace, warn};

/// Default largest payload put into one response message (1 MiB).
pub const DEFAULT_MSG_SIZE_THRESHOLD: usize = 1 << 20;

/// Largest reply buffer a single request may ask the server to allocate.
pub const MAX_REQUEST_SIZE: usize = MAX_FRAME_LEN;

/// Estimated wire size of a directory entry without its name.
const DIRENT_WIRE_OVERHEAD: usize = 12;

/// Serves a [`RawFileSystem`] through the RPC service contract.
pub struct FileSystemServer<F> {
    fs: Arc<F>,
    msg_size_threshold: AtomicUsize,
    pool: Arc<BufferPool>,
}

impl<F> std::fmt::Debug for FileSystemServer<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemServer")
            .field("msg_size_threshold", &self.msg_size_threshold.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<F: RawFileSystem + 'static> FileSystemServer<F> {
    pub fn new(fs: F) -> Self {
        Self::with_threshold(fs, DEFAULT_MSG_SIZE_THRESHOLD)
    }

    pub fn with_threshold(fs: F, threshold: usize) -> Self {
        Self::from_arc(Arc::new(fs), threshold)
    }

    pub fn from_arc(fs: Arc<F>, threshold: usize) -> Self {
        Self {
            fs,
            msg_size_threshold: AtomicUsize::new(threshold.max(1)),
            pool: Arc::new(BufferPool::new()),
        }
    }

    /// Changes the message-size threshold for responses produced from now on.
    pub fn set_msg_size_threshold(&self, threshold: usize) {
        self.msg_size_threshold.store(threshold.max(1), Ordering::Relaxed);
    }

    pub fn msg_size_threshold(&self) -> usize {
        self.msg_size_threshold.load(Ordering::Relaxed)
    }

    pub fn filesystem(&self) -> &Arc<F> {
        &self.fs
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Runs `f` against the local filesystem on the blocking pool.
    async fn run<T, Op>(&self, op: &'static str, cancel: &Cancel, f: Op) -> RpcResult<T>
    where
        T: Send + 'static,
        Op: FnOnce(&F, &Cancel) -> T + Send + 'static,
    {
        trace!(op, "dispatching to local filesystem");
        let fs = Arc::clone(&self.fs);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || f(&fs, &cancel))
            .await
            .map_err(|e| {
                warn!(op, error = %e, "local filesystem call did not complete");
                RpcStatus::internal(format!("{op}: {e}"))
            })
    }
}

/// `ENOSYS` becomes an RPC error; everything else is passed through.
fn check(op: &'static str, status: Status) -> RpcResult<wire::Status> {
    if status.is_unimplemented() {
        trace!(op, "local filesystem does not implement operation");
        return Err(RpcStatus::unimplemented(op));
    }
    Ok(status.into())
}

/// Client-supplied buffer sizes above [`MAX_REQUEST_SIZE`] are `EINVAL`.
fn request_size(op: &'static str, size: u32) -> Result<usize, wire::Status> {
    let size = size as usize;
    if size > MAX_REQUEST_SIZE {
        warn!(op, size, "requested buffer too large");
        return Err(Status::EINVAL.into());
    }
    Ok(size)
}

fn check_result<T>(op: &'static str, result: Result<T, Status>) -> RpcResult<Result<T, wire::Status>> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(status) => check(op, status).map(Err),
    }
}

fn status_response(op: &'static str, status: Status) -> RpcResult<wire::StatusResponse> {
    Ok(wire::StatusResponse {
        status: check(op, status)?,
    })
}

fn entry_response(op: &'static str, status: Status, out: &EntryOut) -> RpcResult<wire::EntryResponse> {
    Ok(wire::EntryResponse {
        status: check(op, status)?,
        entry_out: status.is_ok().then(|| out.into()),
    })
}

fn attr_response(op: &'static str, status: Status, out: &AttrOut) -> RpcResult<wire::AttrResponse> {
    Ok(wire::AttrResponse {
        status: check(op, status)?,
        attr_out: status.is_ok().then(|| out.into()),
    })
}

fn open_response(op: &'static str, status: Status, out: &OpenOut) -> RpcResult<wire::OpenResponse> {
    Ok(wire::OpenResponse {
        status: check(op, status)?,
        open_out: status.is_ok().then(|| out.into()),
    })
}

/// Splits `items` into chunks whose estimated size stays within `threshold`.
/// An item larger than the threshold gets a chunk of its own. Always
/// returns at least one (possibly empty) chunk.
fn chunk_by_size<T>(items: Vec<T>, threshold: usize, size_of: impl Fn(&T) -> usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0;
    for item in items {
        let size = size_of(&item);
        if !current.is_empty() && current_size + size > threshold {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(item);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl<F: RawFileSystem + 'static> RawFileSystemService for FileSystemServer<F> {
    async fn string(&self, _request: Request<wire::StringRequest>) -> RpcResult<wire::StringResponse> {
        Ok(wire::StringResponse { value: self.fs.string() })
    }

    async fn lookup(&self, request: Request<wire::LookupRequest>) -> RpcResult<wire::LookupResponse> {
        let Request { message, context } = request;
        let header = header_from_wire(message.header.as_ref());
        let (status, out) = self
            .run("Lookup", context.cancel_signal(), move |fs, cancel| {
                let mut out = EntryOut::default();
                let status = fs.lookup(cancel, &header, &message.name, &mut out);
                (status, out)
            })
            .await?;
        entry_response("Lookup", status, &out)
    }

    async fn forget(&self, request: Request<wire::ForgetRequest>) -> RpcResult<wire::ForgetResponse> {
        let wire::ForgetRequest { node_id, nlookup } = request.message;
        self.run("Forget", request.context.cancel_signal(), move |fs, _| fs.forget(node_id, nlookup))
            .await?;
        Ok(wire::EmptyResponse {})
    }

    async fn get_attr(&self, request: Request<wire::GetAttrRequest>) -> RpcResult<wire::GetAttrResponse> {
        let input = translate::get_attr_in(&request.message);
        let (status, out) = self
            .run("GetAttr", request.context.cancel_signal(), move |fs, cancel| {
                let mut out = AttrOut::default();
                (fs.get_attr(cancel, &input, &mut out), out)
            })
            .await?;
        attr_response("GetAttr", status, &out)
    }

    async fn set_attr(&self, request: Request<wire::SetAttrRequest>) -> RpcResult<wire::SetAttrResponse> {
        let input = translate::set_attr_in(&request.message);
        let (status, out) = self
            .run("SetAttr", request.context.cancel_signal(), move |fs, cancel| {
                let mut out = AttrOut::default();
                (fs.set_attr(cancel, &input, &mut out), out)
            })
            .await?;
        attr_response("SetAttr", status, &out)
    }

    async fn mknod(&self, request: Request<wire::MknodRequest>) -> RpcResult<wire::MknodResponse> {
        let Request { message, context } = request;
        let input = translate::mknod_in(&message);
        let (status, out) = self
            .run("Mknod", context.cancel_signal(), move |fs, cancel| {
                let mut out = EntryOut::default();
                (fs.mknod(cancel, &input, &message.name, &mut out), out)
            })
            .await?;
        entry_response("Mknod", status, &out)
    }

    async fn mkdir(&self, request: Request<wire::MkdirRequest>) -> RpcResult<wire::MkdirResponse> {
        let Request { message, context } = request;
        let input = translate::mkdir_in(&message);
        let (status, out) = self
            .run("Mkdir", context.cancel_signal(), move |fs, cancel| {
                let mut out = EntryOut::default();
                (fs.mkdir(cancel, &input, &message.name, &mut out), out)
            })
            .await?;
        entry_response("Mkdir", status, &out)
    }

    async fn unlink(&self, request: Request<wire::UnlinkRequest>) -> RpcResult<wire::UnlinkResponse> {
        let Request { message, context } = request;
        let header = header_from_wire(message.header.as_ref());
        let status = self
            .run("Unlink", context.cancel_signal(), move |fs, cancel| {
                fs.unlink(cancel, &header, &message.name)
            })
            .await?;
        status_response("Unlink", status)
    }

    async fn rmdir(&self, request: Request<wire::RmdirRequest>) -> RpcResult<wire::RmdirResponse> {
        let Request { message, context } = request;
        let header = header_from_wire(message.header.as_ref());
        let status = self
            .run("Rmdir", context.cancel_signal(), move |fs, cancel| {
                fs.rmdir(cancel, &header, &message.name)
            })
            .await?;
        status_response("Rmdir", status)
    }

    async fn rename(&self, request: Request<wire::RenameRequest>) -> RpcResult<wire::RenameResponse> {
        let Request { message, context } = request;
        let input = translate::rename_in(&message);
        let status = self
            .run("Rename", context.cancel_signal(), move |fs, cancel| {
                fs.rename(cancel, &input, &message.old_name, &message.new_name)
            })
            .await?;
        status_response("Rename", status)
    }

    async fn link(&self, request: Request<wire::LinkRequest>) -> RpcResult<wire::LinkResponse> {
        let Request { message, context } = request;
        let input = translate::link_in(&message);
        let (status, out) = self
            .run("Link", context.cancel_signal(), move |fs, cancel| {
                let mut out = EntryOut::default();
                (fs.link(cancel, &input, &message.filename, &mut out), out)
            })
            .await?;
        entry_response("Link", status, &out)
    }

    async fn symlink(&self, request: Request<wire::SymlinkRequest>) -> RpcResult<wire::SymlinkResponse> {
        let Request { message, context } = request;
        let header = header_from_wire(message.header.as_ref());
        let (status, out) = self
            .run("Symlink", context.cancel_signal(), move |fs, cancel| {
                let mut out = EntryOut::default();
                let status = fs.symlink(cancel, &header, &message.pointed_to, &message.link_name, &mut out);
                (status, out)
            })
            .await?;
        entry_response("Symlink", status, &out)
    }

    async fn readlink(&self, request: Request<wire::ReadlinkRequest>) -> RpcResult<wire::ReadlinkResponse> {
        let header = header_from_wire(request.message.header.as_ref());
        let result = self
            .run("Readlink", request.context.cancel_signal(), move |fs, cancel| {
                fs.readlink(cancel, &header)
            })
            .await?;
        Ok(match check_result("Readlink", result)? {
            Ok(out) => wire::ReadlinkResponse {
                status: wire::Status::OK,
                out,
            },
            Err(status) => wire::ReadlinkResponse {
                status,
                out: Vec::new(),
            },
        })
    }

    async fn access(&self, request: Request<wire::AccessRequest>) -> RpcResult<wire::AccessResponse> {
        let input = translate::access_in(&request.message);
        let status = self
            .run("Access", request.context.cancel_signal(), move |fs, cancel| fs.access(cancel, &input))
            .await?;
        status_response("Access", status)
    }

    async fn get_xattr(&self, request: Request<wire::GetXAttrRequest>) -> RpcResult<wire::GetXAttrResponse> {
        let Request { message, context } = request;
        let header = header_from_wire(message.header.as_ref());
        let dest_size = match request_size("GetXAttr", message.dest_size) {
            Ok(size) => size,
            Err(status) => return Ok(xattr_response(Err(status))),
        };
        let pool = Arc::clone(&self.pool);
        let result = self
            .run("GetXAttr", context.cancel_signal(), move |fs, cancel| {
                let mut dest = pool.alloc(dest_size);
                let result = fs.get_xattr(cancel, &header, &message.attr, &mut dest);
                xattr_reply(&pool, dest, result)
            })
            .await?;
        Ok(xattr_response(check_result("GetXAttr", result)?))
    }

    async fn list_xattr(&self, request: Request<wire::ListXAttrRequest>) -> RpcResult<wire::ListXAttrResponse> {
        let Request { message, context } = request;
        let header = header_from_wire(message.header.as_ref());
        let dest_size = match request_size("ListXAttr", message.dest_size) {
            Ok(size) => size,
            Err(status) => return Ok(xattr_response(Err(status))),
        };
        let pool = Arc::clone(&self.pool);
        let result = self
            .run("ListXAttr", context.cancel_signal(), move |fs, cancel| {
                let mut dest = pool.alloc(dest_size);
                let result = fs.list_xattr(cancel, &header, &mut dest);
                xattr_reply(&pool, dest, result)
            })
            .await?;
        Ok(xattr_response(check_result("ListXAttr", result)?))
    }

    async fn set_xattr(&self, request: Request<wire::SetXAttrRequest>) -> RpcResult<wire::SetXAttrResponse> {
        let Request { message, context } = request;
        let input = translate::set_xattr_in(&message);
        let status = self
            .run("SetXAttr", context.cancel_signal(), move |fs, cancel| {
                fs.set_xattr(cancel, &input, &message.attr, &message.data)
            })
            .await?;
        status_response("SetXAttr", status)
    }

    async fn remove_xattr(&self, request: Request<wire::RemoveXAttrRequest>) -> RpcResult<wire::RemoveXAttrResponse> {
        let Request { message, context } = request;
        let header = header_from_wire(message.header.as_ref());
        let status = self
            .run("RemoveXAttr", context.cancel_signal(), move |fs, cancel| {
                fs.remove_xattr(cancel, &header, &message.attr)
            })
            .await?;
        status_response("RemoveXAttr", status)
    }

    async fn create(&self, request: Request<wire::CreateRequest>) -> RpcResult<wire::CreateResponse> {
        let Request { message, context } = request;
        let input = translate::create_in(&message);
        let (status, out) = self
            .run("Create", context.cancel_signal(), move |fs, cancel| {
                let mut out = CreateOut::default();
                (fs.create(cancel, &input, &message.name, &mut out), out)
            })
            .await?;
        let ok = status.is_ok();
        Ok(wire::CreateResponse {
            status: check("Create", status)?,
            entry_out: ok.then(|| (&out.entry_out).into()),
            open_out: ok.then(|| (&out.open_out).into()),
        })
    }

    async fn open(&self, request: Request<wire::OpenRequest>) -> RpcResult<wire::OpenResponse> {
        let input = translate::open_in(&request.message);
        let (status, out) = self
            .run("Open", request.context.cancel_signal(), move |fs, cancel| {
                let mut out = OpenOut::default();
                (fs.open(cancel, &input, &mut out), out)
            })
            .await?;
        open_response("Open", status, &out)
    }

    async fn read(&self, request: Request<wire::ReadRequest>) -> RpcResult<Streaming<wire::ReadResponse>> {
        let input = translate::read_in(&request.message);
        let size = match request_size("Read", input.size) {
            Ok(size) => size,
            Err(status) => {
                return Ok(Streaming::from_items(vec![wire::ReadResponse {
                    status,
                    buffer: Vec::new(),
                }]));
            }
        };
        let pool = Arc::clone(&self.pool);
        let threshold = self.msg_size_threshold();
        let result = self
            .run("Read", request.context.cancel_signal(), move |fs, cancel| {
                let mut buf = pool.alloc(size);
                let result = fs.read(cancel, &input, &mut buf).map(|n| {
                    let data = &buf[..n.min(buf.len())];
                    let mut chunks: Vec<wire::ReadResponse> = data
                        .chunks(threshold)
                        .map(|chunk| wire::ReadResponse {
                            status: wire::Status::OK,
                            buffer: chunk.to_vec(),
                        })
                        .collect();
                    if chunks.is_empty() {
                        chunks.push(wire::ReadResponse::default());
                    }
                    chunks
                });
                pool.free(buf);
                result
            })
            .await?;

        let chunks = match check_result("Read", result)? {
            Ok(chunks) => chunks,
            Err(status) => vec![wire::ReadResponse {
                status,
                buffer: Vec::new(),
            }],
        };
        trace!(chunks = chunks.len(), "read stream");
        Ok(Streaming::from_items(chunks))
    }

    async fn lseek(&self, request: Request<wire::LseekRequest>) -> RpcResult<wire::LseekResponse> {
        let input = translate::lseek_in(&request.message);
        let (status, out) = self
            .run("Lseek", request.context.cancel_signal(), move |fs, cancel| {
                let mut out = LseekOut::default();
                (fs.lseek(cancel, &input, &mut out), out)
            })
            .await?;
        Ok(wire::LseekResponse {
            status: check("Lseek", status)?,
            offset: if status.is_ok() { out.offset } else { 0 },
        })
    }

    async fn get_lk(&self, request: Request<wire::LkRequest>) -> RpcResult<wire::GetLkResponse> {
        let input = translate::lk_in(&request.message);
        let (status, out) = self
            .run("GetLk", request.context.cancel_signal(), move |fs, cancel| {
                let mut out = LkOut::default();
                (fs.get_lk(cancel, &input, &mut out), out)
            })
            .await?;
        Ok(wire::GetLkResponse {
            status: check("GetLk", status)?,
            lk: status.is_ok().then(|| (&out.lk).into()),
        })
    }

    async fn set_lk(&self, request: Request<wire::LkRequest>) -> RpcResult<wire::SetLkResponse> {
        let input = translate::lk_in(&request.message);
        let status = self
            .run("SetLk", request.context.cancel_signal(), move |fs, cancel| fs.set_lk(cancel, &input))
            .await?;
        status_response("SetLk", status)
    }

    async fn set_lkw(&self, request: Request<wire::LkRequest>) -> RpcResult<wire::SetLkResponse> {
        let input = translate::lk_in(&request.message);
        let status = self
            .run("SetLkw", request.context.cancel_signal(), move |fs, cancel| fs.set_lkw(cancel, &input))
            .await?;
        status_response("SetLkw", status)
    }

    async fn release(&self, request: Request<wire::ReleaseRequest>) -> RpcResult<wire::ReleaseResponse> {
        let input = translate::release_in(&request.message);
        self.run("Release", request.context.cancel_signal(), move |fs, cancel| fs.release(cancel, &input))
            .await?;
        Ok(wire::EmptyResponse {})
    }

    async fn write(&self, request: Request<wire::WriteRequest>) -> RpcResult<wire::WriteResponse> {
        let Request { message, context } = request;
        let input = translate::write_in(&message);
        let result = self
            .run("Write", context.cancel_signal(), move |fs, cancel| {
                fs.write(cancel, &input, &message.data)
            })
            .await?;
        Ok(write_response(check_result("Write", result)?))
    }

    async fn copy_file_range(
        &self,
        request: Request<wire::CopyFileRangeRequest>,
    ) -> RpcResult<wire::CopyFileRangeResponse> {
        let input = translate::copy_file_range_in(&request.message);
        let result = self
            .run("CopyFileRange", request.context.cancel_signal(), move |fs, cancel| {
                fs.copy_file_range(cancel, &input)
            })
            .await?;
        Ok(write_response(check_result("CopyFileRange", result)?))
    }

    async fn flush(&self, request: Request<wire::FlushRequest>) -> RpcResult<wire::FlushResponse> {
        let input = translate::flush_in(&request.message);
        let status = self
            .run("Flush", request.context.cancel_signal(), move |fs, cancel| fs.flush(cancel, &input))
            .await?;
        status_response("Flush", status)
    }

    async fn fsync(&self, request: Request<wire::FsyncRequest>) -> RpcResult<wire::FsyncResponse> {
        let input = translate::fsync_in(&request.message);
        let status = self
            .run("Fsync", request.context.cancel_signal(), move |fs, cancel| fs.fsync(cancel, &input))
            .await?;
        status_response("Fsync", status)
    }

    async fn fallocate(&self, request: Request<wire::FallocateRequest>) -> RpcResult<wire::FallocateResponse> {
        let input = translate::fallocate_in(&request.message);
        let status = self
            .run("Fallocate", request.context.cancel_signal(), move |fs, cancel| {
                fs.fallocate(cancel, &input)
            })
            .await?;
        status_response("Fallocate", status)
    }

    async fn open_dir(&self, request: Request<wire::OpenRequest>) -> RpcResult<wire::OpenDirResponse> {
        let input = translate::open_in(&request.message);
        let (status, out) = self
            .run("OpenDir", request.context.cancel_signal(), move |fs, cancel| {
                let mut out = OpenOut::default();
                (fs.open_dir(cancel, &input, &mut out), out)
            })
            .await?;
        open_response("OpenDir", status, &out)
    }

    async fn read_dir(&self, request: Request<wire::ReadRequest>) -> RpcResult<Streaming<wire::ReadDirResponse>> {
        let input = translate::read_in(&request.message);
        let size = match request_size("ReadDir", input.size) {
            Ok(size) => size,
            Err(status) => {
                return Ok(Streaming::from_items(vec![wire::ReadDirResponse {
                    status,
                    entries: Vec::new(),
                }]));
            }
        };
        let pool = Arc::clone(&self.pool);
        let (status, entries) = self
            .run("ReadDir", request.context.cancel_signal(), move |fs, cancel| {
                let mut list = DirEntryList::new(pool.alloc(size), input.offset);
                let status = fs.read_dir(cancel, &input, &mut list);
                let entries: Vec<wire::DirEntry> = dirent::parse_dirents(list.as_bytes())
                    .map(|(_, record)| (&record).into())
                    .collect();
                pool.free(list.into_buffer());
                (status, entries)
            })
            .await?;

        let status = check("ReadDir", status)?;
        if !status.is_ok() {
            return Ok(Streaming::from_items(vec![wire::ReadDirResponse {
                status,
                entries: Vec::new(),
            }]));
        }
        let chunks = chunk_by_size(entries, self.msg_size_threshold(), |e| {
            DIRENT_WIRE_OVERHEAD + e.name.len()
        });
        trace!(chunks = chunks.len(), "readdir stream");
        Ok(Streaming::from_items(
            chunks
                .into_iter()
                .map(|entries| wire::ReadDirResponse {
                    status: wire::Status::OK,
                    entries,
                })
                .collect(),
        ))
    }

    async fn read_dir_plus(
        &self,
        request: Request<wire::ReadRequest>,
    ) -> RpcResult<Streaming<wire::ReadDirPlusResponse>> {
        let input = translate::read_in(&request.message);
        let size = match request_size("ReadDirPlus", input.size) {
            Ok(size) => size,
            Err(status) => {
                return Ok(Streaming::from_items(vec![wire::ReadDirPlusResponse {
                    status,
                    ..wire::ReadDirPlusResponse::default()
                }]));
            }
        };
        let pool = Arc::clone(&self.pool);
        let (status, entries) = self
            .run("ReadDirPlus", request.context.cancel_signal(), move |fs, cancel| {
                let mut list = DirEntryList::new(pool.alloc(size), input.offset);
                let status = fs.read_dir_plus(cancel, &input, &mut list);
                let entries: Vec<(wire::DirEntry, wire::EntryOut)> = dirent::parse_dirents_plus(list.as_bytes())
                    .map(|(entry_out, record)| {
                        let entry_out = entry_out.unwrap_or_default();
                        ((&record).into(), (&entry_out).into())
                    })
                    .collect();
                pool.free(list.into_buffer());
                (status, entries)
            })
            .await?;

        let status = check("ReadDirPlus", status)?;
        if !status.is_ok() {
            return Ok(Streaming::from_items(vec![wire::ReadDirPlusResponse {
                status,
                ..wire::ReadDirPlusResponse::default()
            }]));
        }
        let chunks = chunk_by_size(entries, self.msg_size_threshold(), |(e, _)| {
            DIRENT_WIRE_OVERHEAD + ENTRY_OUT_SIZE + e.name.len()
        });
        trace!(chunks = chunks.len(), "readdirplus stream");
        Ok(Streaming::from_items(
            chunks
                .into_iter()
                .map(|chunk| {
                    let (entries, entry_outs) = chunk.into_iter().unzip();
                    wire::ReadDirPlusResponse {
                        status: wire::Status::OK,
                        entries,
                        entry_outs,
                    }
                })
                .collect(),
        ))
    }

    async fn release_dir(&self, request: Request<wire::ReleaseRequest>) -> RpcResult<wire::ReleaseDirResponse> {
        let input = translate::release_in(&request.message);
        self.run("ReleaseDir", request.context.cancel_signal(), move |fs, _| fs.release_dir(&input))
            .await?;
        Ok(wire::EmptyResponse {})
    }

    async fn fsync_dir(&self, request: Request<wire::FsyncRequest>) -> RpcResult<wire::FsyncDirResponse> {
        let input = translate::fsync_in(&request.message);
        let status = self
            .run("FsyncDir", request.context.cancel_signal(), move |fs, cancel| fs.fsync_dir(cancel, &input))
            .await?;
        status_response("FsyncDir", status)
    }

    async fn stat_fs(&self, request: Request<wire::StatFsRequest>) -> RpcResult<wire::StatFsResponse> {
        let header = header_from_wire(request.message.header.as_ref());
        let (status, out) = self
            .run("StatFs", request.context.cancel_signal(), move |fs, cancel| {
                let mut out = StatfsOut::default();
                (fs.stat_fs(cancel, &header, &mut out), out)
            })
            .await?;
        Ok(wire::StatFsResponse {
            status: check("StatFs", status)?,
            statfs_out: status.is_ok().then(|| (&out).into()),
        })
    }
}

/// Copies the produced xattr bytes out of a pooled buffer and returns it.
fn xattr_reply(pool: &BufferPool, dest: Vec<u8>, result: Result<u32, Status>) -> Result<(u32, Vec<u8>), Status> {
    let reply = result.map(|size| {
        let data = if dest.is_empty() {
            Vec::new()
        } else {
            dest[..(size as usize).min(dest.len())].to_vec()
        };
        (size, data)
    });
    pool.free(dest);
    reply
}

fn xattr_response(result: Result<(u32, Vec<u8>), wire::Status>) -> wire::XAttrResponse {
    match result {
        Ok((size, data)) => wire::XAttrResponse {
            status: wire::Status::OK,
            size,
            data,
        },
        Err(status) => wire::XAttrResponse {
            status,
            ..wire::XAttrResponse::default()
        },
    }
}

fn write_response(result: Result<u32, wire::Status>) -> wire::WriteResponse {
    match result {
        Ok(written) => wire::WriteResponse {
            status: wire::Status::OK,
            written,
        },
        Err(status) => wire::WriteResponse { status, written: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuserpc_core::abi::{FsyncIn, InHeader, ReadIn};
    use fuserpc_core::dirent::DirEntry;
    use fuserpc_core::rpc::{CallContext, Code, Dispatched, Recv, RequestBody, dispatch};

    /// Filesystem answering every supported call with a fixed status.
    struct Fixed {
        status: Status,
    }

    impl RawFileSystem for Fixed {
        fn fsync(&self, _cancel: &Cancel, _input: &FsyncIn) -> Status {
            self.status
        }

        fn lookup(&self, _cancel: &Cancel, header: &InHeader, name: &str, out: &mut EntryOut) -> Status {
            if self.status.is_ok() {
                out.node_id = header.node_id + name.len() as u64;
                out.attr.mode = libc::S_IFREG as u32 | 0o644;
            }
            self.status
        }
    }

    /// Filesystem serving a fixed file body and directory listing.
    struct Content {
        data: Vec<u8>,
        names: Vec<String>,
    }

    impl RawFileSystem for Content {
        fn read(&self, _cancel: &Cancel, input: &ReadIn, buf: &mut [u8]) -> Result<usize, Status> {
            let start = (input.offset as usize).min(self.data.len());
            let n = (self.data.len() - start).min(buf.len());
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }

        fn read_dir(&self, _cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
            for (i, name) in self.names.iter().enumerate().skip(input.offset as usize) {
                let mut entry = DirEntry::new(name.clone(), i as u64 + 2, libc::S_IFREG as u32);
                entry.off = i as u64 + 1;
                if !out.add_dir_entry(&entry) {
                    break;
                }
            }
            Status::OK
        }

        fn read_dir_plus(&self, _cancel: &Cancel, _input: &ReadIn, out: &mut DirEntryList) -> Status {
            for (i, name) in self.names.iter().enumerate() {
                let entry = DirEntry::new(name.clone(), i as u64 + 2, libc::S_IFDIR as u32);
                let entry_out = EntryOut {
                    node_id: i as u64 + 2,
                    ..EntryOut::default()
                };
                if !out.add_dir_lookup_entry(&entry, &entry_out) {
                    break;
                }
            }
            Status::OK
        }
    }

    fn read_request(size: u32) -> Request<wire::ReadRequest> {
        Request::background(translate::read_request(&ReadIn {
            size,
            ..ReadIn::default()
        }))
    }

    async fn drain<T: Send + 'static>(mut stream: Streaming<T>) -> Vec<T> {
        let mut items = Vec::new();
        loop {
            match stream.recv().await {
                Recv::Data(item) => items.push(item),
                Recv::EndOfStream => return items,
                Recv::Error(status) => panic!("stream failed: {status}"),
            }
        }
    }

    #[tokio::test]
    async fn test_status_passes_through() {
        for code in [libc::EINVAL, libc::EACCES, libc::ENOENT, libc::EIO, 0, 12345] {
            let server = FileSystemServer::new(Fixed {
                status: Status::from_code(code),
            });
            let resp = server
                .fsync(Request::background(wire::FsyncRequest::default()))
                .await
                .unwrap();
            assert_eq!(resp, wire::FsyncResponse { status: wire::Status { code } });
        }
    }

    #[tokio::test]
    async fn test_enosys_becomes_unimplemented() {
        let server = FileSystemServer::new(Fixed {
            status: Status::ENOSYS,
        });
        let err = server
            .fsync(Request::background(wire::FsyncRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unimplemented);

        // Operations the filesystem never overrides report the same way.
        let err = server
            .stat_fs(Request::background(wire::StatFsRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Unimplemented);
        let err = server.read_dir(read_request(4096)).await.unwrap_err();
        assert_eq!(err.code, Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_failed_lookup_has_no_entry() {
        let server = FileSystemServer::new(Fixed {
            status: Status::ENOENT,
        });
        let resp = server
            .lookup(Request::background(wire::LookupRequest {
                header: None,
                name: "x".into(),
            }))
            .await
            .unwrap();
        assert_eq!(resp.status.code, libc::ENOENT);
        assert!(resp.entry_out.is_none());
    }

    #[tokio::test]
    async fn test_lookup_without_header_uses_zero_header() {
        let server = FileSystemServer::new(Fixed { status: Status::OK });
        let resp = server
            .lookup(Request::background(wire::LookupRequest {
                header: None,
                name: "abc".into(),
            }))
            .await
            .unwrap();
        assert!(resp.status.is_ok());
        let entry = resp.entry_out.expect("entry");
        assert_eq!(entry.node_id, 3);
        assert!(entry.attr.expect("attr").owner.is_some());
    }

    #[tokio::test]
    async fn test_read_is_chunked_by_threshold() {
        let server = FileSystemServer::with_threshold(
            Content {
                data: b"hello world".to_vec(),
                names: Vec::new(),
            },
            4,
        );
        let chunks = drain(server.read(read_request(64)).await.unwrap()).await;
        let sizes: Vec<usize> = chunks.iter().map(|c| c.buffer.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.buffer.clone()).collect();
        assert_eq!(joined, b"hello world");
        assert!(chunks.iter().all(|c| c.status.is_ok()));

        server.set_msg_size_threshold(1 << 20);
        let chunks = drain(server.read(read_request(64)).await.unwrap()).await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_read_yields_one_empty_chunk() {
        let server = FileSystemServer::new(Content {
            data: Vec::new(),
            names: Vec::new(),
        });
        let chunks = drain(server.read(read_request(64)).await.unwrap()).await;
        assert_eq!(chunks, vec![wire::ReadResponse::default()]);
    }

    #[tokio::test]
    async fn test_read_dir_decodes_entries_and_chunks() {
        let names: Vec<String> = (0..6).map(|i| format!("file{i}")).collect();
        // Each entry is estimated at 12 + 5 bytes; two fit under 40.
        let server = FileSystemServer::with_threshold(
            Content {
                data: Vec::new(),
                names: names.clone(),
            },
            40,
        );
        let chunks = drain(server.read_dir(read_request(4096)).await.unwrap()).await;
        assert_eq!(chunks.len(), 3);
        let got: Vec<wire::DirEntry> = chunks.into_iter().flat_map(|c| c.entries).collect();
        assert_eq!(got.len(), 6);
        for (i, entry) in got.iter().enumerate() {
            assert_eq!(entry.name, names[i].as_bytes());
            assert_eq!(entry.ino, i as u64 + 2);
            assert_eq!(entry.off, i as u64 + 1);
            assert_eq!(entry.mode, libc::S_IFREG as u32);
        }
    }

    #[tokio::test]
    async fn test_read_dir_plus_pairs_entry_outs() {
        let server = FileSystemServer::new(Content {
            data: Vec::new(),
            names: vec!["a".into(), "b".into()],
        });
        let chunks = drain(server.read_dir_plus(read_request(4096)).await.unwrap()).await;
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.entries.len(), chunk.entry_outs.len());
        for (entry, out) in chunk.entries.iter().zip(&chunk.entry_outs) {
            assert_eq!(entry.ino, out.node_id);
        }
    }

    /// Filesystem that overrides nothing.
    struct Bare;

    impl RawFileSystem for Bare {}

    fn every_request() -> Vec<RequestBody> {
        vec![
            RequestBody::String(wire::StringRequest::default()),
            RequestBody::Lookup(wire::LookupRequest::default()),
            RequestBody::Forget(wire::ForgetRequest::default()),
            RequestBody::GetAttr(wire::GetAttrRequest::default()),
            RequestBody::SetAttr(wire::SetAttrRequest::default()),
            RequestBody::Mknod(wire::MknodRequest::default()),
            RequestBody::Mkdir(wire::MkdirRequest::default()),
            RequestBody::Unlink(wire::UnlinkRequest::default()),
            RequestBody::Rmdir(wire::RmdirRequest::default()),
            RequestBody::Rename(wire::RenameRequest::default()),
            RequestBody::Link(wire::LinkRequest::default()),
            RequestBody::Symlink(wire::SymlinkRequest::default()),
            RequestBody::Readlink(wire::ReadlinkRequest::default()),
            RequestBody::Access(wire::AccessRequest::default()),
            RequestBody::GetXAttr(wire::GetXAttrRequest::default()),
            RequestBody::ListXAttr(wire::ListXAttrRequest::default()),
            RequestBody::SetXAttr(wire::SetXAttrRequest::default()),
            RequestBody::RemoveXAttr(wire::RemoveXAttrRequest::default()),
            RequestBody::Create(wire::CreateRequest::default()),
            RequestBody::Open(wire::OpenRequest::default()),
            RequestBody::Lseek(wire::LseekRequest::default()),
            RequestBody::GetLk(wire::LkRequest::default()),
            RequestBody::SetLk(wire::LkRequest::default()),
            RequestBody::SetLkw(wire::LkRequest::default()),
            RequestBody::Release(wire::ReleaseRequest::default()),
            RequestBody::Write(wire::WriteRequest::default()),
            RequestBody::CopyFileRange(wire::CopyFileRangeRequest::default()),
            RequestBody::Flush(wire::FlushRequest::default()),
            RequestBody::Fsync(wire::FsyncRequest::default()),
            RequestBody::Fallocate(wire::FallocateRequest::default()),
            RequestBody::OpenDir(wire::OpenRequest::default()),
            RequestBody::ReleaseDir(wire::ReleaseRequest::default()),
            RequestBody::FsyncDir(wire::FsyncRequest::default()),
            RequestBody::StatFs(wire::StatFsRequest::default()),
            RequestBody::Read(wire::ReadRequest::default()),
            RequestBody::ReadDir(wire::ReadRequest::default()),
            RequestBody::ReadDirPlus(wire::ReadRequest::default()),
        ]
    }

    /// The RPC code a dispatched call ended with, `None` on success.
    async fn outcome(dispatched: Dispatched) -> Option<Code> {
        match dispatched {
            Dispatched::Unary(Ok(_)) => None,
            Dispatched::Unary(Err(status)) | Dispatched::Streaming(Err(status)) => Some(status.code),
            Dispatched::Streaming(Ok(mut stream)) => match stream.recv().await {
                Recv::Error(status) => Some(status.code),
                _ => None,
            },
        }
    }

    #[tokio::test]
    async fn test_every_operation_reports_unimplemented() {
        // Calls without a status of their own cannot fail.
        let no_status = ["String", "Forget", "Release", "ReleaseDir"];
        let server = FileSystemServer::new(Bare);
        let requests = every_request();
        assert_eq!(requests.len(), 37);
        for body in requests {
            let method = body.method();
            let got = outcome(dispatch(&server, CallContext::background(), body).await).await;
            if no_status.contains(&method) {
                assert_eq!(got, None, "{method}");
            } else {
                assert_eq!(got, Some(Code::Unimplemented), "{method}");
            }
        }
    }

    #[tokio::test]
    async fn test_read_dir_keeps_raw_name_bytes() {
        struct Latin1;

        impl RawFileSystem for Latin1 {
            fn read_dir(&self, _cancel: &Cancel, _input: &ReadIn, out: &mut DirEntryList) -> Status {
                let _ = out.append_entry(7, b"caf\xe9", 8, 0);
                Status::OK
            }

            fn read_dir_plus(&self, _cancel: &Cancel, _input: &ReadIn, out: &mut DirEntryList) -> Status {
                let entry = DirEntry::new(&b"caf\xe9"[..], 7, libc::S_IFREG as u32);
                out.add_dir_lookup_entry(&entry, &EntryOut::default());
                Status::OK
            }
        }

        let server = FileSystemServer::new(Latin1);
        let chunks = drain(server.read_dir(read_request(4096)).await.unwrap()).await;
        assert_eq!(chunks[0].entries[0].name, b"caf\xe9");
        let chunks = drain(server.read_dir_plus(read_request(4096)).await.unwrap()).await;
        assert_eq!(chunks[0].entries[0].name, b"caf\xe9");
    }

    #[tokio::test]
    async fn test_oversized_buffers_are_rejected() {
        let server = FileSystemServer::new(Content {
            data: b"data".to_vec(),
            names: vec!["a".into()],
        });
        let too_big = u32::try_from(MAX_REQUEST_SIZE + 1).unwrap();

        let chunks = drain(server.read(read_request(too_big)).await.unwrap()).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].status.code, libc::EINVAL);
        assert!(chunks[0].buffer.is_empty());

        let chunks = drain(server.read_dir(read_request(too_big)).await.unwrap()).await;
        assert_eq!(chunks[0].status.code, libc::EINVAL);
        let chunks = drain(server.read_dir_plus(read_request(u32::MAX)).await.unwrap()).await;
        assert_eq!(chunks[0].status.code, libc::EINVAL);

        let resp = server
            .get_xattr(Request::background(wire::GetXAttrRequest {
                dest_size: u32::MAX,
                ..wire::GetXAttrRequest::default()
            }))
            .await
            .unwrap();
        assert_eq!(resp.status.code, libc::EINVAL);
        let resp = server
            .list_xattr(Request::background(wire::ListXAttrRequest {
                dest_size: too_big,
                ..wire::ListXAttrRequest::default()
            }))
            .await
            .unwrap();
        assert_eq!(resp.status.code, libc::EINVAL);

        // The limit itself is still served.
        let limit = u32::try_from(MAX_REQUEST_SIZE).unwrap();
        let chunks = drain(server.read(read_request(limit)).await.unwrap()).await;
        assert!(chunks[0].status.is_ok());
        assert_eq!(chunks[0].buffer, b"data");
    }

    #[tokio::test]
    async fn test_threshold_is_clamped() {
        let server = FileSystemServer::new(Fixed { status: Status::OK });
        assert_eq!(server.msg_size_threshold(), DEFAULT_MSG_SIZE_THRESHOLD);
        server.set_msg_size_threshold(0);
        assert_eq!(server.msg_size_threshold(), 1);
    }

    #[test]
    fn test_chunk_by_size() {
        let chunks = chunk_by_size(vec![3, 3, 3, 10, 1], 6, |n| *n);
        assert_eq!(chunks, vec![vec![3, 3], vec![3], vec![10], vec![1]]);
        assert_eq!(chunk_by_size(Vec::<usize>::new(), 6, |n| *n), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_xattr_reply_size_only() {
        let pool = BufferPool::new();
        let reply = xattr_reply(&pool, pool.alloc(0), Ok(42)).unwrap();
        assert_eq!(reply, (42, Vec::new()));

        let mut dest = pool.alloc(8);
        dest[..3].copy_from_slice(b"val");
        let reply = xattr_reply(&pool, dest, Ok(3)).unwrap();
        assert_eq!(reply, (3, b"val".to_vec()));
    }
}
