//! [`RawFileSystem`] implemented by calling a remote service.
//!
//! Every operation builds a wire request from its native inputs, runs the
//! call through the async bridge and copies the reply back into the native
//! outputs. Call failures never reach the kernel as such: `Unimplemented`
//! turns into `ENOSYS`, anything else into `EIO`. A non-zero status inside
//! a reply is returned as-is and leaves the outputs untouched.

use crate::async_bridge::{self, BridgeStats};
use crate::config::ClientConfig;
use fuserpc_core::abi::{
    AccessIn, AttrOut, CopyFileRangeIn, CreateIn, CreateOut, EntryOut, FallocateIn, FlushIn, FsyncIn, GetAttrIn,
    InHeader, LinkIn, LkIn, LkOut, LseekIn, LseekOut, MkdirIn, MknodIn, OpenIn, OpenOut, ReadIn, ReleaseIn,
    RenameIn, SetAttrIn, SetXAttrIn, StatfsOut, WriteIn,
};
use fuserpc_core::rpc::{CallContext, RawFileSystemService, Recv, Request, RpcResult, RpcStatus, Streaming};
use fuserpc_core::translate::{self, header_to_wire};
use fuserpc_core::dirent::mode_to_type;
use fuserpc_core::{Cancel, DirEntryList, RawFileSystem, Status, wire};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// Name reported when the remote side cannot be asked for one.
pub const DEFAULT_NAME: &str = "fuserpc";

/// Maps a failed call to the status handed to the kernel.
pub fn status_from_rpc(status: &RpcStatus) -> Status {
    if status.is_unimplemented() {
        Status::ENOSYS
    } else {
        Status::EIO
    }
}

/// Client adapter: a raw filesystem whose every operation is a remote call.
pub struct RemoteFileSystem<S> {
    service: Arc<S>,
    runtime: Handle,
    config: ClientConfig,
    stats: Arc<BridgeStats>,
    debug: AtomicBool,
}

impl<S> std::fmt::Debug for RemoteFileSystem<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFileSystem")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<S: RawFileSystemService + 'static> RemoteFileSystem<S> {
    /// Wraps `service`; calls are spawned on `runtime`.
    pub fn new(service: S, runtime: Handle) -> Self {
        Self::with_config(service, runtime, ClientConfig::default())
    }

    pub fn with_config(service: S, runtime: Handle, config: ClientConfig) -> Self {
        Self {
            service: Arc::new(service),
            runtime,
            config,
            stats: BridgeStats::new(),
            debug: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Runs one unary call to completion.
    fn call<T, Fut>(&self, op: &'static str, cancel: &Cancel, f: impl FnOnce(Arc<S>, CallContext) -> Fut) -> Result<T, Status>
    where
        T: Send + 'static,
        Fut: Future<Output = RpcResult<T>> + Send + 'static,
    {
        if self.debug.load(Ordering::Relaxed) {
            debug!(op, "remote call");
        } else {
            trace!(op, "remote call");
        }
        let future = f(Arc::clone(&self.service), CallContext::from_cancel(cancel.clone()));
        match async_bridge::execute(&self.runtime, self.config.call_timeout, Some(&self.stats), future) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(status)) => {
                debug!(op, code = %status.code, message = %status.message, "remote call failed");
                Err(status_from_rpc(&status))
            }
            Err(e) => {
                warn!(op, error = %e, "remote call did not complete");
                Err(Status::EIO)
            }
        }
    }

    /// Iterates over the messages of a streamed reply, one bridged receive
    /// at a time. Dropping the iterator early cancels the call.
    fn chunks<T: Send + 'static>(&self, op: &'static str, stream: Streaming<T>) -> Chunks<'_, S, T> {
        Chunks {
            fs: self,
            op,
            stream: Some(stream),
        }
    }

    fn stream<T, Fut>(
        &self,
        op: &'static str,
        cancel: &Cancel,
        f: impl FnOnce(Arc<S>, CallContext) -> Fut,
    ) -> Result<Chunks<'_, S, T>, Status>
    where
        T: Send + 'static,
        Fut: Future<Output = RpcResult<Streaming<T>>> + Send + 'static,
    {
        let stream = self.call(op, cancel, f)?;
        Ok(self.chunks(op, stream))
    }

    /// Returns the lookups of readdirplus entries the kernel never saw.
    fn forget_entries(&self, entry_outs: &[wire::EntryOut]) {
        for entry_out in entry_outs.iter().filter(|e| e.node_id != 0) {
            self.forget(entry_out.node_id, 1);
        }
    }

    /// For calls whose outcome the kernel never sees.
    fn fire_and_forget<T, Fut>(&self, op: &'static str, f: impl FnOnce(Arc<S>, CallContext) -> Fut)
    where
        T: Send + 'static,
        Fut: Future<Output = RpcResult<T>> + Send + 'static,
    {
        if let Err(status) = self.call(op, &Cancel::never(), f) {
            debug!(op, %status, "ignoring failure");
        }
    }
}

struct Chunks<'a, S, T> {
    fs: &'a RemoteFileSystem<S>,
    op: &'static str,
    stream: Option<Streaming<T>>,
}

impl<S, T: Send + 'static> Iterator for Chunks<'_, S, T> {
    type Item = Result<T, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut stream = self.stream.take()?;
        let received = async_bridge::execute(
            &self.fs.runtime,
            self.fs.config.call_timeout,
            Some(&self.fs.stats),
            async move {
                let item = stream.recv().await;
                (stream, item)
            },
        );
        match received {
            Ok((stream, Recv::Data(item))) => {
                self.stream = Some(stream);
                Some(Ok(item))
            }
            Ok((_, Recv::EndOfStream)) => None,
            Ok((_, Recv::Error(status))) => {
                debug!(op = self.op, code = %status.code, "stream failed");
                Some(Err(status_from_rpc(&status)))
            }
            Err(e) => {
                warn!(op = self.op, error = %e, "stream receive did not complete");
                Some(Err(Status::EIO))
            }
        }
    }
}

fn entry_reply(resp: &wire::EntryResponse, out: &mut EntryOut) -> Status {
    let status = Status::from(resp.status);
    if status.is_ok()
        && let Some(entry_out) = &resp.entry_out
    {
        *out = entry_out.into();
    }
    status
}

fn attr_reply(resp: &wire::AttrResponse, out: &mut AttrOut) -> Status {
    let status = Status::from(resp.status);
    if status.is_ok()
        && let Some(attr_out) = &resp.attr_out
    {
        *out = attr_out.into();
    }
    status
}

fn open_reply(resp: &wire::OpenResponse, out: &mut OpenOut) -> Status {
    let status = Status::from(resp.status);
    if status.is_ok()
        && let Some(open_out) = &resp.open_out
    {
        *out = open_out.into();
    }
    status
}

fn xattr_reply(resp: &wire::XAttrResponse, dest: &mut [u8]) -> Result<u32, Status> {
    Status::from(resp.status).into_result()?;
    let n = resp.data.len().min(dest.len());
    dest[..n].copy_from_slice(&resp.data[..n]);
    Ok(resp.size)
}

fn written_reply(resp: &wire::WriteResponse) -> Result<u32, Status> {
    Status::from(resp.status).into_result()?;
    Ok(resp.written)
}

/// Collapses the outcome of a call that only reports a status.
fn status_of(result: Result<wire::StatusResponse, Status>) -> Status {
    result.map_or_else(|status| status, |resp| resp.status.into())
}

impl<S: RawFileSystemService + 'static> RawFileSystem for RemoteFileSystem<S> {
    fn string(&self) -> String {
        self.call("String", &Cancel::never(), |s, ctx| async move {
            s.string(Request::new(wire::StringRequest {}, ctx)).await
        })
        .map_or_else(|_| DEFAULT_NAME.to_owned(), |resp| resp.value)
    }

    fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    fn lookup(&self, cancel: &Cancel, header: &InHeader, name: &str, out: &mut EntryOut) -> Status {
        let req = wire::LookupRequest {
            header: header_to_wire(header),
            name: name.to_owned(),
        };
        match self.call("Lookup", cancel, |s, ctx| async move { s.lookup(Request::new(req, ctx)).await }) {
            Ok(resp) => entry_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn forget(&self, node_id: u64, nlookup: u64) {
        let req = wire::ForgetRequest { node_id, nlookup };
        self.fire_and_forget("Forget", |s, ctx| async move { s.forget(Request::new(req, ctx)).await });
    }

    fn get_attr(&self, cancel: &Cancel, input: &GetAttrIn, out: &mut AttrOut) -> Status {
        let req = translate::get_attr_request(input);
        match self.call("GetAttr", cancel, |s, ctx| async move { s.get_attr(Request::new(req, ctx)).await }) {
            Ok(resp) => attr_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn set_attr(&self, cancel: &Cancel, input: &SetAttrIn, out: &mut AttrOut) -> Status {
        let req = translate::set_attr_request(input);
        match self.call("SetAttr", cancel, |s, ctx| async move { s.set_attr(Request::new(req, ctx)).await }) {
            Ok(resp) => attr_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn mknod(&self, cancel: &Cancel, input: &MknodIn, name: &str, out: &mut EntryOut) -> Status {
        let req = translate::mknod_request(input, name);
        match self.call("Mknod", cancel, |s, ctx| async move { s.mknod(Request::new(req, ctx)).await }) {
            Ok(resp) => entry_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn mkdir(&self, cancel: &Cancel, input: &MkdirIn, name: &str, out: &mut EntryOut) -> Status {
        let req = translate::mkdir_request(input, name);
        match self.call("Mkdir", cancel, |s, ctx| async move { s.mkdir(Request::new(req, ctx)).await }) {
            Ok(resp) => entry_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn unlink(&self, cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        let req = wire::UnlinkRequest {
            header: header_to_wire(header),
            name: name.to_owned(),
        };
        status_of(self.call("Unlink", cancel, |s, ctx| async move { s.unlink(Request::new(req, ctx)).await }))
    }

    fn rmdir(&self, cancel: &Cancel, header: &InHeader, name: &str) -> Status {
        let req = wire::RmdirRequest {
            header: header_to_wire(header),
            name: name.to_owned(),
        };
        status_of(self.call("Rmdir", cancel, |s, ctx| async move { s.rmdir(Request::new(req, ctx)).await }))
    }

    fn rename(&self, cancel: &Cancel, input: &RenameIn, old_name: &str, new_name: &str) -> Status {
        let req = translate::rename_request(input, old_name, new_name);
        status_of(self.call("Rename", cancel, |s, ctx| async move { s.rename(Request::new(req, ctx)).await }))
    }

    fn link(&self, cancel: &Cancel, input: &LinkIn, filename: &str, out: &mut EntryOut) -> Status {
        let req = translate::link_request(input, filename);
        match self.call("Link", cancel, |s, ctx| async move { s.link(Request::new(req, ctx)).await }) {
            Ok(resp) => entry_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn symlink(
        &self,
        cancel: &Cancel,
        header: &InHeader,
        pointed_to: &str,
        link_name: &str,
        out: &mut EntryOut,
    ) -> Status {
        let req = wire::SymlinkRequest {
            header: header_to_wire(header),
            pointed_to: pointed_to.to_owned(),
            link_name: link_name.to_owned(),
        };
        match self.call("Symlink", cancel, |s, ctx| async move { s.symlink(Request::new(req, ctx)).await }) {
            Ok(resp) => entry_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn readlink(&self, cancel: &Cancel, header: &InHeader) -> Result<Vec<u8>, Status> {
        let req = wire::ReadlinkRequest {
            header: header_to_wire(header),
        };
        let resp = self.call("Readlink", cancel, |s, ctx| async move { s.readlink(Request::new(req, ctx)).await })?;
        Status::from(resp.status).into_result()?;
        Ok(resp.out)
    }

    fn access(&self, cancel: &Cancel, input: &AccessIn) -> Status {
        let req = translate::access_request(input);
        status_of(self.call("Access", cancel, |s, ctx| async move { s.access(Request::new(req, ctx)).await }))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn get_xattr(&self, cancel: &Cancel, header: &InHeader, attr: &str, dest: &mut [u8]) -> Result<u32, Status> {
        let req = wire::GetXAttrRequest {
            header: header_to_wire(header),
            attr: attr.to_owned(),
            dest_size: dest.len() as u32,
        };
        let resp = self.call("GetXAttr", cancel, |s, ctx| async move { s.get_xattr(Request::new(req, ctx)).await })?;
        xattr_reply(&resp, dest)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn list_xattr(&self, cancel: &Cancel, header: &InHeader, dest: &mut [u8]) -> Result<u32, Status> {
        let req = wire::ListXAttrRequest {
            header: header_to_wire(header),
            dest_size: dest.len() as u32,
        };
        let resp = self.call("ListXAttr", cancel, |s, ctx| async move { s.list_xattr(Request::new(req, ctx)).await })?;
        xattr_reply(&resp, dest)
    }

    fn set_xattr(&self, cancel: &Cancel, input: &SetXAttrIn, attr: &str, data: &[u8]) -> Status {
        let req = translate::set_xattr_request(input, attr, data);
        status_of(self.call("SetXAttr", cancel, |s, ctx| async move { s.set_xattr(Request::new(req, ctx)).await }))
    }

    fn remove_xattr(&self, cancel: &Cancel, header: &InHeader, attr: &str) -> Status {
        let req = wire::RemoveXAttrRequest {
            header: header_to_wire(header),
            attr: attr.to_owned(),
        };
        status_of(self.call("RemoveXAttr", cancel, |s, ctx| async move {
            s.remove_xattr(Request::new(req, ctx)).await
        }))
    }

    fn create(&self, cancel: &Cancel, input: &CreateIn, name: &str, out: &mut CreateOut) -> Status {
        let req = translate::create_request(input, name);
        match self.call("Create", cancel, |s, ctx| async move { s.create(Request::new(req, ctx)).await }) {
            Ok(resp) => {
                let status = Status::from(resp.status);
                if status.is_ok() {
                    *out = translate::create_out(&resp);
                }
                status
            }
            Err(status) => status,
        }
    }

    fn open(&self, cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        let req = translate::open_request(input);
        match self.call("Open", cancel, |s, ctx| async move { s.open(Request::new(req, ctx)).await }) {
            Ok(resp) => open_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn read(&self, cancel: &Cancel, input: &ReadIn, buf: &mut [u8]) -> Result<usize, Status> {
        let req = translate::read_request(input);
        let chunks = self.stream("Read", cancel, |s, ctx| async move { s.read(Request::new(req, ctx)).await })?;
        let mut filled = 0;
        for chunk in chunks {
            let chunk = chunk?;
            Status::from(chunk.status).into_result()?;
            let n = chunk.buffer.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&chunk.buffer[..n]);
            filled += n;
        }
        Ok(filled)
    }

    fn lseek(&self, cancel: &Cancel, input: &LseekIn, out: &mut LseekOut) -> Status {
        let req = translate::lseek_request(input);
        match self.call("Lseek", cancel, |s, ctx| async move { s.lseek(Request::new(req, ctx)).await }) {
            Ok(resp) => {
                let status = Status::from(resp.status);
                if status.is_ok() {
                    out.offset = resp.offset;
                }
                status
            }
            Err(status) => status,
        }
    }

    fn get_lk(&self, cancel: &Cancel, input: &LkIn, out: &mut LkOut) -> Status {
        let req = translate::lk_request(input);
        match self.call("GetLk", cancel, |s, ctx| async move { s.get_lk(Request::new(req, ctx)).await }) {
            Ok(resp) => {
                let status = Status::from(resp.status);
                if status.is_ok()
                    && let Some(lk) = &resp.lk
                {
                    out.lk = lk.into();
                }
                status
            }
            Err(status) => status,
        }
    }

    fn set_lk(&self, cancel: &Cancel, input: &LkIn) -> Status {
        let req = translate::lk_request(input);
        status_of(self.call("SetLk", cancel, |s, ctx| async move { s.set_lk(Request::new(req, ctx)).await }))
    }

    fn set_lkw(&self, cancel: &Cancel, input: &LkIn) -> Status {
        let req = translate::lk_request(input);
        status_of(self.call("SetLkw", cancel, |s, ctx| async move { s.set_lkw(Request::new(req, ctx)).await }))
    }

    fn release(&self, _cancel: &Cancel, input: &ReleaseIn) {
        let req = translate::release_request(input);
        self.fire_and_forget("Release", |s, ctx| async move { s.release(Request::new(req, ctx)).await });
    }

    fn write(&self, cancel: &Cancel, input: &WriteIn, data: &[u8]) -> Result<u32, Status> {
        let req = translate::write_request(input, data);
        let resp = self.call("Write", cancel, |s, ctx| async move { s.write(Request::new(req, ctx)).await })?;
        written_reply(&resp)
    }

    fn copy_file_range(&self, cancel: &Cancel, input: &CopyFileRangeIn) -> Result<u32, Status> {
        let req = translate::copy_file_range_request(input);
        let resp = self.call("CopyFileRange", cancel, |s, ctx| async move {
            s.copy_file_range(Request::new(req, ctx)).await
        })?;
        written_reply(&resp)
    }

    fn flush(&self, cancel: &Cancel, input: &FlushIn) -> Status {
        let req = translate::flush_request(input);
        status_of(self.call("Flush", cancel, |s, ctx| async move { s.flush(Request::new(req, ctx)).await }))
    }

    fn fsync(&self, cancel: &Cancel, input: &FsyncIn) -> Status {
        let req = translate::fsync_request(input);
        status_of(self.call("Fsync", cancel, |s, ctx| async move { s.fsync(Request::new(req, ctx)).await }))
    }

    fn fallocate(&self, cancel: &Cancel, input: &FallocateIn) -> Status {
        let req = translate::fallocate_request(input);
        status_of(self.call("Fallocate", cancel, |s, ctx| async move { s.fallocate(Request::new(req, ctx)).await }))
    }

    fn open_dir(&self, cancel: &Cancel, input: &OpenIn, out: &mut OpenOut) -> Status {
        let req = translate::open_request(input);
        match self.call("OpenDir", cancel, |s, ctx| async move { s.open_dir(Request::new(req, ctx)).await }) {
            Ok(resp) => open_reply(&resp, out),
            Err(status) => status,
        }
    }

    fn read_dir(&self, cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        let req = translate::read_request(input);
        let chunks = match self.stream("ReadDir", cancel, |s, ctx| async move { s.read_dir(Request::new(req, ctx)).await }) {
            Ok(chunks) => chunks,
            Err(status) => return status,
        };
        for chunk in chunks {
            let resp = match chunk {
                Ok(resp) => resp,
                Err(status) => return status,
            };
            let status = Status::from(resp.status);
            if !status.is_ok() {
                return status;
            }
            for entry in &resp.entries {
                if out.append_entry(entry.ino, &entry.name, mode_to_type(entry.mode), entry.off).is_err() {
                    trace!(offset = out.offset(), "directory buffer full");
                    return Status::OK;
                }
            }
        }
        Status::OK
    }

    fn read_dir_plus(&self, cancel: &Cancel, input: &ReadIn, out: &mut DirEntryList) -> Status {
        let req = translate::read_request(input);
        let mut chunks = match self.stream("ReadDirPlus", cancel, |s, ctx| async move {
            s.read_dir_plus(Request::new(req, ctx)).await
        }) {
            Ok(chunks) => chunks,
            Err(status) => return status,
        };
        while let Some(chunk) = chunks.next() {
            let resp = match chunk {
                Ok(resp) => resp,
                Err(status) => return status,
            };
            let status = Status::from(resp.status);
            if !status.is_ok() {
                return status;
            }
            for (i, entry) in resp.entries.iter().enumerate() {
                let entry_out = resp.entry_outs.get(i).map(EntryOut::from).unwrap_or_default();
                let appended =
                    out.append_lookup_entry(entry.ino, &entry.name, mode_to_type(entry.mode), entry.off, &entry_out);
                if appended.is_err() {
                    trace!(offset = out.offset(), "directory buffer full");
                    // The server counted a lookup for every entry it sent.
                    self.forget_entries(&resp.entry_outs[i.min(resp.entry_outs.len())..]);
                    for rest in chunks.by_ref() {
                        match rest {
                            Ok(resp) => self.forget_entries(&resp.entry_outs),
                            Err(_) => break,
                        }
                    }
                    return Status::OK;
                }
            }
        }
        Status::OK
    }

    fn release_dir(&self, input: &ReleaseIn) {
        let req = translate::release_request(input);
        self.fire_and_forget("ReleaseDir", |s, ctx| async move { s.release_dir(Request::new(req, ctx)).await });
    }

    fn fsync_dir(&self, cancel: &Cancel, input: &FsyncIn) -> Status {
        let req = translate::fsync_request(input);
        status_of(self.call("FsyncDir", cancel, |s, ctx| async move { s.fsync_dir(Request::new(req, ctx)).await }))
    }

    fn stat_fs(&self, cancel: &Cancel, header: &InHeader, out: &mut StatfsOut) -> Status {
        let req = wire::StatFsRequest {
            header: header_to_wire(header),
        };
        match self.call("StatFs", cancel, |s, ctx| async move { s.stat_fs(Request::new(req, ctx)).await }) {
            Ok(resp) => {
                let status = Status::from(resp.status);
                if status.is_ok()
                    && let Some(statfs_out) = &resp.statfs_out
                {
                    *out = statfs_out.into();
                }
                status
            }
            Err(status) => status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fuserpc_core::abi::ROOT_ID;
    use fuserpc_core::dirent::{parse_dirents, parse_dirents_plus};
    use fuserpc_core::rpc::StreamSender;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::runtime::Runtime;

    fn ok() -> wire::Status {
        wire::Status::OK
    }

    fn read_chunk(data: &[u8]) -> wire::ReadResponse {
        wire::ReadResponse {
            status: ok(),
            buffer: data.to_vec(),
        }
    }

    fn dirent(name: &str, off: u64) -> wire::DirEntry {
        wire::DirEntry {
            mode: libc::S_IFREG as u32,
            name: name.into(),
            ino: off + 10,
            off,
        }
    }

    /// Replies with canned responses and records what it saw.
    #[derive(Default)]
    struct Scripted {
        read_chunks: Vec<wire::ReadResponse>,
        dir_chunks: Vec<wire::ReadDirResponse>,
        plus_chunks: Vec<wire::ReadDirPlusResponse>,
        fsync_code: i32,
        forgets: AtomicUsize,
        forgotten: Mutex<Vec<u64>>,
        /// Items handed out by the last streamed readdir.
        streamed: Arc<AtomicUsize>,
        lookups: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RawFileSystemService for Scripted {
        async fn string(&self, _request: Request<wire::StringRequest>) -> RpcResult<wire::StringResponse> {
            Err(RpcStatus::unavailable("down"))
        }

        async fn lookup(&self, request: Request<wire::LookupRequest>) -> RpcResult<wire::LookupResponse> {
            let name = request.message.name;
            self.lookups.lock().unwrap().push(name.clone());
            if name == "missing" {
                return Ok(wire::EntryResponse {
                    status: Status::ENOENT.into(),
                    entry_out: None,
                });
            }
            Ok(wire::EntryResponse {
                status: ok(),
                entry_out: Some(wire::EntryOut {
                    node_id: 42,
                    attr: Some(wire::Attr {
                        mode: libc::S_IFREG as u32 | 0o644,
                        ..wire::Attr::default()
                    }),
                    ..wire::EntryOut::default()
                }),
            })
        }

        async fn forget(&self, request: Request<wire::ForgetRequest>) -> RpcResult<wire::ForgetResponse> {
            self.forgets.fetch_add(1, Ordering::Relaxed);
            self.forgotten.lock().unwrap().push(request.message.node_id);
            Err(RpcStatus::internal("ignored"))
        }

        async fn fsync(&self, _request: Request<wire::FsyncRequest>) -> RpcResult<wire::FsyncResponse> {
            Ok(wire::StatusResponse {
                status: wire::Status::new(self.fsync_code),
            })
        }

        async fn read(&self, _request: Request<wire::ReadRequest>) -> RpcResult<Streaming<wire::ReadResponse>> {
            Ok(Streaming::from_items(self.read_chunks.clone()))
        }

        async fn read_dir(&self, _request: Request<wire::ReadRequest>) -> RpcResult<Streaming<wire::ReadDirResponse>> {
            let (tx, rx): (StreamSender<wire::ReadDirResponse>, _) = Streaming::channel(1);
            let chunks = self.dir_chunks.clone();
            let streamed = Arc::clone(&self.streamed);
            tokio::spawn(async move {
                for chunk in chunks {
                    if !tx.send(chunk).await {
                        return;
                    }
                    streamed.fetch_add(1, Ordering::SeqCst);
                }
            });
            Ok(rx)
        }

        async fn read_dir_plus(
            &self,
            _request: Request<wire::ReadRequest>,
        ) -> RpcResult<Streaming<wire::ReadDirPlusResponse>> {
            Ok(Streaming::from_items(self.plus_chunks.clone()))
        }
    }

    fn remote(service: Scripted) -> (Runtime, RemoteFileSystem<Scripted>) {
        let rt = Runtime::new().unwrap();
        let fs = RemoteFileSystem::new(service, rt.handle().clone());
        (rt, fs)
    }

    fn read_in(size: u32) -> ReadIn {
        ReadIn {
            header: InHeader::for_node(5),
            size,
            ..ReadIn::default()
        }
    }

    #[test]
    fn test_read_reassembles_chunks() {
        let (_rt, fs) = remote(Scripted {
            read_chunks: vec![read_chunk(b"hello "), read_chunk(b"world")],
            ..Scripted::default()
        });
        let mut buf = vec![0u8; 64];
        let n = fs.read(&Cancel::never(), &read_in(64), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
    }

    #[test]
    fn test_read_error_chunk_short_circuits() {
        let (_rt, fs) = remote(Scripted {
            read_chunks: vec![
                read_chunk(b"hello "),
                wire::ReadResponse {
                    status: Status::EIO.into(),
                    buffer: Vec::new(),
                },
                read_chunk(b"never"),
            ],
            ..Scripted::default()
        });
        let mut buf = vec![0u8; 64];
        assert_eq!(fs.read(&Cancel::never(), &read_in(64), &mut buf), Err(Status::EIO));
        assert!(!buf.windows(5).any(|w| w == b"never"));
    }

    #[test]
    fn test_unimplemented_becomes_enosys() {
        let (_rt, fs) = remote(Scripted::default());
        let mut out = EntryOut::default();
        let mkdir = MkdirIn {
            header: InHeader::for_node(ROOT_ID),
            mode: 0o755,
            umask: 0,
        };
        assert_eq!(fs.mkdir(&Cancel::never(), &mkdir, "d", &mut out), Status::ENOSYS);
        assert_eq!(fs.readlink(&Cancel::never(), &InHeader::for_node(2)), Err(Status::ENOSYS));
    }

    #[test]
    fn test_other_rpc_errors_become_eio() {
        assert_eq!(status_from_rpc(&RpcStatus::unavailable("gone")), Status::EIO);
        assert_eq!(status_from_rpc(&RpcStatus::cancelled()), Status::EIO);
        assert_eq!(status_from_rpc(&RpcStatus::unimplemented("Read")), Status::ENOSYS);
    }

    #[test]
    fn test_status_passes_through() {
        for code in [libc::EINVAL, libc::EACCES, libc::ENOSPC, 0] {
            let (_rt, fs) = remote(Scripted {
                fsync_code: code,
                ..Scripted::default()
            });
            let status = fs.fsync(&Cancel::never(), &FsyncIn::default());
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_lookup_fills_output() {
        let (_rt, fs) = remote(Scripted::default());
        let mut out = EntryOut::default();
        let status = fs.lookup(&Cancel::never(), &InHeader::for_node(ROOT_ID), "somefile", &mut out);
        assert_eq!(status, Status::OK);
        assert_eq!(out.node_id, 42);
        assert!(out.attr.is_regular());
        assert_eq!(fs.service().lookups.lock().unwrap().as_slice(), ["somefile"]);
    }

    #[test]
    fn test_failed_lookup_leaves_output_alone() {
        let (_rt, fs) = remote(Scripted::default());
        let mut out = EntryOut::default();
        let status = fs.lookup(&Cancel::never(), &InHeader::for_node(ROOT_ID), "missing", &mut out);
        assert_eq!(status, Status::ENOENT);
        assert_eq!(out, EntryOut::default());
    }

    #[test]
    fn test_string_falls_back() {
        let (_rt, fs) = remote(Scripted::default());
        assert_eq!(fs.string(), DEFAULT_NAME);
    }

    #[test]
    fn test_forget_swallows_errors() {
        let (_rt, fs) = remote(Scripted::default());
        fs.forget(7, 1);
        assert_eq!(fs.service().forgets.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_readdir_stops_when_full() {
        let (_rt, fs) = remote(Scripted {
            dir_chunks: (1..=20)
                .map(|i| wire::ReadDirResponse {
                    status: ok(),
                    entries: vec![dirent(&format!("entry-{i}"), i)],
                })
                .collect(),
            ..Scripted::default()
        });
        // Room for exactly two 32-byte records.
        let mut list = DirEntryList::with_capacity(64, 0);
        assert_eq!(fs.read_dir(&Cancel::never(), &read_in(64), &mut list), Status::OK);

        let names: Vec<&[u8]> = parse_dirents(list.as_bytes()).map(|(_, r)| r.name).collect();
        assert_eq!(names, vec![&b"entry-1"[..], &b"entry-2"[..]]);
        assert_eq!(list.offset(), 2);
        // The rest of the stream was abandoned, not drained.
        assert!(fs.service().streamed.load(Ordering::SeqCst) < 20);
    }

    #[test]
    fn test_readdir_error_chunk() {
        let (_rt, fs) = remote(Scripted {
            dir_chunks: vec![
                wire::ReadDirResponse {
                    status: ok(),
                    entries: vec![dirent("a", 1)],
                },
                wire::ReadDirResponse {
                    status: Status::EACCES.into(),
                    entries: Vec::new(),
                },
            ],
            ..Scripted::default()
        });
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert_eq!(fs.read_dir(&Cancel::never(), &read_in(4096), &mut list), Status::EACCES);
    }

    #[test]
    fn test_readdir_keeps_raw_name_bytes() {
        let (_rt, fs) = remote(Scripted {
            dir_chunks: vec![wire::ReadDirResponse {
                status: ok(),
                entries: vec![wire::DirEntry {
                    name: b"caf\xe9".to_vec(),
                    ..dirent("", 1)
                }],
            }],
            ..Scripted::default()
        });
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert_eq!(fs.read_dir(&Cancel::never(), &read_in(4096), &mut list), Status::OK);
        let (_, record) = parse_dirents(list.as_bytes()).next().expect("one entry");
        assert_eq!(record.name, b"caf\xe9");
        assert_eq!(record.ino, 11);
    }

    fn plus_chunk(range: std::ops::Range<u64>) -> wire::ReadDirPlusResponse {
        wire::ReadDirPlusResponse {
            status: ok(),
            entries: range.clone().map(|i| dirent(&format!("entry-{i}"), i)).collect(),
            entry_outs: range
                .map(|i| wire::EntryOut {
                    node_id: 100 + i,
                    ..wire::EntryOut::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_readdirplus_returns_lookups_it_drops() {
        // Ten looked-up entries, split over two messages.
        let (_rt, fs) = remote(Scripted {
            plus_chunks: vec![plus_chunk(0..6), plus_chunk(6..10)],
            ..Scripted::default()
        });
        let mut list = DirEntryList::with_capacity(600, 0);
        assert_eq!(fs.read_dir_plus(&Cancel::never(), &read_in(4096), &mut list), Status::OK);

        let accepted: Vec<u64> = parse_dirents_plus(list.as_bytes())
            .map(|(entry_out, _)| entry_out.expect("lookup").node_id)
            .collect();
        assert_eq!(accepted, vec![100, 101, 102]);
        let forgotten = fs.service().forgotten.lock().unwrap().clone();
        assert_eq!(forgotten, (103..110).collect::<Vec<u64>>());
        assert_eq!(fs.service().forgets.load(Ordering::Relaxed), 10 - accepted.len());
    }

    #[test]
    fn test_readdirplus_skips_entries_without_lookup() {
        let mut chunk = plus_chunk(0..5);
        chunk.entry_outs[4].node_id = 0;
        let (_rt, fs) = remote(Scripted {
            plus_chunks: vec![chunk],
            ..Scripted::default()
        });
        let mut list = DirEntryList::with_capacity(600, 0);
        assert_eq!(fs.read_dir_plus(&Cancel::never(), &read_in(4096), &mut list), Status::OK);
        assert_eq!(*fs.service().forgotten.lock().unwrap(), vec![103]);
    }

    #[test]
    fn test_readdirplus_that_fits_forgets_nothing() {
        let (_rt, fs) = remote(Scripted {
            plus_chunks: vec![plus_chunk(0..3)],
            ..Scripted::default()
        });
        let mut list = DirEntryList::with_capacity(4096, 0);
        assert_eq!(fs.read_dir_plus(&Cancel::never(), &read_in(4096), &mut list), Status::OK);
        assert_eq!(parse_dirents_plus(list.as_bytes()).count(), 3);
        assert_eq!(fs.service().forgets.load(Ordering::Relaxed), 0);
    }

    /// Service that implements nothing.
    struct Nothing;

    #[async_trait]
    impl RawFileSystemService for Nothing {}

    fn status_of_result<T>(result: Result<T, Status>) -> Status {
        result.map_or_else(|status| status, |_| Status::OK)
    }

    #[test]
    fn test_every_operation_maps_unimplemented_to_enosys() {
        let rt = Runtime::new().unwrap();
        let fs = RemoteFileSystem::new(Nothing, rt.handle().clone());
        let c = Cancel::never();
        let h = InHeader::for_node(ROOT_ID);
        let mut entry = EntryOut::default();
        let mut attr = AttrOut::default();
        let mut open = OpenOut::default();
        let mut buf = [0u8; 16];

        let statuses = [
            ("lookup", fs.lookup(&c, &h, "a", &mut entry)),
            ("get_attr", fs.get_attr(&c, &GetAttrIn::default(), &mut attr)),
            ("set_attr", fs.set_attr(&c, &SetAttrIn::default(), &mut attr)),
            ("mknod", fs.mknod(&c, &MknodIn::default(), "a", &mut entry)),
            ("mkdir", fs.mkdir(&c, &MkdirIn::default(), "a", &mut entry)),
            ("unlink", fs.unlink(&c, &h, "a")),
            ("rmdir", fs.rmdir(&c, &h, "a")),
            ("rename", fs.rename(&c, &RenameIn::default(), "a", "b")),
            ("link", fs.link(&c, &LinkIn::default(), "a", &mut entry)),
            ("symlink", fs.symlink(&c, &h, "a", "b", &mut entry)),
            ("readlink", status_of_result(fs.readlink(&c, &h))),
            ("access", fs.access(&c, &AccessIn::default())),
            ("get_xattr", status_of_result(fs.get_xattr(&c, &h, "user.a", &mut buf))),
            ("list_xattr", status_of_result(fs.list_xattr(&c, &h, &mut buf))),
            ("set_xattr", fs.set_xattr(&c, &SetXAttrIn::default(), "user.a", b"v")),
            ("remove_xattr", fs.remove_xattr(&c, &h, "user.a")),
            ("create", fs.create(&c, &CreateIn::default(), "a", &mut CreateOut::default())),
            ("open", fs.open(&c, &OpenIn::default(), &mut open)),
            ("read", status_of_result(fs.read(&c, &ReadIn::default(), &mut buf))),
            ("lseek", fs.lseek(&c, &LseekIn::default(), &mut LseekOut::default())),
            ("get_lk", fs.get_lk(&c, &LkIn::default(), &mut LkOut::default())),
            ("set_lk", fs.set_lk(&c, &LkIn::default())),
            ("set_lkw", fs.set_lkw(&c, &LkIn::default())),
            ("write", status_of_result(fs.write(&c, &WriteIn::default(), b"data"))),
            ("copy_file_range", status_of_result(fs.copy_file_range(&c, &CopyFileRangeIn::default()))),
            ("flush", fs.flush(&c, &FlushIn::default())),
            ("fsync", fs.fsync(&c, &FsyncIn::default())),
            ("fallocate", fs.fallocate(&c, &FallocateIn::default())),
            ("open_dir", fs.open_dir(&c, &OpenIn::default(), &mut open)),
            ("read_dir", fs.read_dir(&c, &ReadIn::default(), &mut DirEntryList::with_capacity(4096, 0))),
            ("read_dir_plus", fs.read_dir_plus(&c, &ReadIn::default(), &mut DirEntryList::with_capacity(4096, 0))),
            ("fsync_dir", fs.fsync_dir(&c, &FsyncIn::default())),
            ("stat_fs", fs.stat_fs(&c, &h, &mut StatfsOut::default())),
        ];
        for (op, status) in statuses {
            assert_eq!(status, Status::ENOSYS, "{op}");
        }
        assert_eq!(entry, EntryOut::default());
        assert_eq!(attr, AttrOut::default());

        // Calls without a reply of their own stay quiet.
        fs.forget(2, 1);
        fs.release(&c, &ReleaseIn::default());
        fs.release_dir(&ReleaseIn::default());
        assert_eq!(fs.string(), DEFAULT_NAME);
    }
}
