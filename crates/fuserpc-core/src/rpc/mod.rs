//! Minimal RPC layer: error space, call context, streams, the service
//! contract and its framing.

mod context;
mod frame;
mod service;
mod status;
mod stream;

pub use context::{CallContext, ContextError};
pub use frame::{Frame, FrameCodec, FrameError, MAX_FRAME_LEN};
pub use service::{CallTransport, Dispatched, RawFileSystemService, RequestBody, ResponseBody, ServiceClient, dispatch};
pub use status::{Code, RpcResult, RpcStatus};
pub use stream::{Recv, StreamSender, Streaming};

/// A request message together with the context of its call.
#[derive(Debug, Clone)]
pub struct Request<T> {
    pub message: T,
    pub context: CallContext,
}

impl<T> Request<T> {
    pub fn new(message: T, context: CallContext) -> Self {
        Self { message, context }
    }

    /// A request whose call is never cancelled.
    pub fn background(message: T) -> Self {
        Self::new(message, CallContext::background())
    }

    pub fn into_inner(self) -> T {
        self.message
    }
}
