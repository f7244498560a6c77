//! The raw filesystem RPC service.
//!
//! One method per filesystem operation, all under one service.
//! [`RawFileSystemService`] is implemented by the server adapter and, via
//! [`ServiceClient`], by anything that can carry a [`RequestBody`] to a
//! remote peer. Every method defaults to `Unimplemented`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::CallContext;
use super::status::{RpcResult, RpcStatus};
use super::stream::Streaming;
use super::Request;
use crate::wire::*;

/// Result of routing one call to a service method.
#[derive(Debug)]
pub enum Dispatched {
    Unary(RpcResult<ResponseBody>),
    Streaming(RpcResult<Streaming<ResponseBody>>),
}

/// Carries encoded calls to a remote service.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn unary(&self, context: CallContext, body: RequestBody) -> RpcResult<ResponseBody>;

    async fn streaming(&self, context: CallContext, body: RequestBody) -> RpcResult<Streaming<ResponseBody>>;
}

/// Service implementation that forwards every call over a [`CallTransport`].
#[derive(Debug, Clone)]
pub struct ServiceClient<T> {
    transport: T,
}

impl<T> ServiceClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

fn mismatch(method: &str, got: &ResponseBody) -> RpcStatus {
    RpcStatus::internal(format!("{method}: unexpected {} response", got.method()))
}

macro_rules! raw_filesystem_service {
    (
        unary {
            $( $name:ident => $variant:ident ( $req:ty ) -> $resp:ty; )*
        }
        streaming {
            $( $sname:ident => $svariant:ident ( $sreq:ty ) -> $sresp:ty; )*
        }
    ) => {
        /// RPC surface of a raw filesystem.
        #[async_trait]
        pub trait RawFileSystemService: Send + Sync {
            $(
                async fn $name(&self, request: Request<$req>) -> RpcResult<$resp> {
                    let _ = request;
                    Err(RpcStatus::unimplemented(stringify!($variant)))
                }
            )*
            $(
                async fn $sname(&self, request: Request<$sreq>) -> RpcResult<Streaming<$sresp>> {
                    let _ = request;
                    Err(RpcStatus::unimplemented(stringify!($svariant)))
                }
            )*
        }

        /// Request message of any method, tagged by method.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum RequestBody {
            $( $variant($req), )*
            $( $svariant($sreq), )*
        }

        /// Response message (or stream item) of any method, tagged by method.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum ResponseBody {
            $( $variant($resp), )*
            $( $svariant($sresp), )*
        }

        impl RequestBody {
            pub fn method(&self) -> &'static str {
                match self {
                    $( Self::$variant(_) => stringify!($variant), )*
                    $( Self::$svariant(_) => stringify!($svariant), )*
                }
            }

            pub fn is_streaming(&self) -> bool {
                match self {
                    $( Self::$variant(_) => false, )*
                    $( Self::$svariant(_) => true, )*
                }
            }
        }

        impl ResponseBody {
            pub fn method(&self) -> &'static str {
                match self {
                    $( Self::$variant(_) => stringify!($variant), )*
                    $( Self::$svariant(_) => stringify!($svariant), )*
                }
            }
        }

        /// Routes a decoded call to the matching method of `service`.
        pub async fn dispatch<S>(service: &S, context: CallContext, body: RequestBody) -> Dispatched
        where
            S: RawFileSystemService + ?Sized,
        {
            match body {
                $(
                    RequestBody::$variant(message) => Dispatched::Unary(
                        service.$name(Request::new(message, context)).await.map(ResponseBody::$variant),
                    ),
                )*
                $(
                    RequestBody::$svariant(message) => Dispatched::Streaming(
                        service
                            .$sname(Request::new(message, context))
                            .await
                            .map(|s| s.map(|item| Ok(ResponseBody::$svariant(item)))),
                    ),
                )*
            }
        }

        #[async_trait]
        impl<T: CallTransport> RawFileSystemService for ServiceClient<T> {
            $(
                async fn $name(&self, request: Request<$req>) -> RpcResult<$resp> {
                    let Request { message, context } = request;
                    match self.transport.unary(context, RequestBody::$variant(message)).await? {
                        ResponseBody::$variant(resp) => Ok(resp),
                        other => Err(mismatch(stringify!($variant), &other)),
                    }
                }
            )*
            $(
                async fn $sname(&self, request: Request<$sreq>) -> RpcResult<Streaming<$sresp>> {
                    let Request { message, context } = request;
                    let stream = self.transport.streaming(context, RequestBody::$svariant(message)).await?;
                    Ok(stream.map(|body| match body {
                        ResponseBody::$svariant(item) => Ok(item),
                        other => Err(mismatch(stringify!($svariant), &other)),
                    }))
                }
            )*
        }
    };
}

raw_filesystem_service! {
    unary {
        string => String(StringRequest) -> StringResponse;
        lookup => Lookup(LookupRequest) -> LookupResponse;
        forget => Forget(ForgetRequest) -> ForgetResponse;
        get_attr => GetAttr(GetAttrRequest) -> GetAttrResponse;
        set_attr => SetAttr(SetAttrRequest) -> SetAttrResponse;
        mknod => Mknod(MknodRequest) -> MknodResponse;
        mkdir => Mkdir(MkdirRequest) -> MkdirResponse;
        unlink => Unlink(UnlinkRequest) -> UnlinkResponse;
        rmdir => Rmdir(RmdirRequest) -> RmdirResponse;
        rename => Rename(RenameRequest) -> RenameResponse;
        link => Link(LinkRequest) -> LinkResponse;
        symlink => Symlink(SymlinkRequest) -> SymlinkResponse;
        readlink => Readlink(ReadlinkRequest) -> ReadlinkResponse;
        access => Access(AccessRequest) -> AccessResponse;
        get_xattr => GetXAttr(GetXAttrRequest) -> GetXAttrResponse;
        list_xattr => ListXAttr(ListXAttrRequest) -> ListXAttrResponse;
        set_xattr => SetXAttr(SetXAttrRequest) -> SetXAttrResponse;
        remove_xattr => RemoveXAttr(RemoveXAttrRequest) -> RemoveXAttrResponse;
        create => Create(CreateRequest) -> CreateResponse;
        open => Open(OpenRequest) -> OpenResponse;
        lseek => Lseek(LseekRequest) -> LseekResponse;
        get_lk => GetLk(LkRequest) -> GetLkResponse;
        set_lk => SetLk(LkRequest) -> SetLkResponse;
        set_lkw => SetLkw(LkRequest) -> SetLkResponse;
        release => Release(ReleaseRequest) -> ReleaseResponse;
        write => Write(WriteRequest) -> WriteResponse;
        copy_file_range => CopyFileRange(CopyFileRangeRequest) -> CopyFileRangeResponse;
        flush => Flush(FlushRequest) -> FlushResponse;
        fsync => Fsync(FsyncRequest) -> FsyncResponse;
        fallocate => Fallocate(FallocateRequest) -> FallocateResponse;
        open_dir => OpenDir(OpenRequest) -> OpenDirResponse;
        release_dir => ReleaseDir(ReleaseRequest) -> ReleaseDirResponse;
        fsync_dir => FsyncDir(FsyncRequest) -> FsyncDirResponse;
        stat_fs => StatFs(StatFsRequest) -> StatFsResponse;
    }
    streaming {
        read => Read(ReadRequest) -> ReadResponse;
        read_dir => ReadDir(ReadRequest) -> ReadDirResponse;
        read_dir_plus => ReadDirPlus(ReadRequest) -> ReadDirPlusResponse;
    }
}
