//! Client end of an RPC connection.
//!
//! A [`Channel`] owns one TCP connection and multiplexes calls over it by
//! id. A reader task routes incoming frames to the waiting call; a writer
//! task drains outgoing frames. Dropping a call (or its context becoming
//! done) sends a `Cancel` frame so the server can stop working on it.

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use dashmap::DashMap;
use fuserpc_core::rpc::{
    CallContext, CallTransport, Frame, FrameCodec, RequestBody, ResponseBody, RpcResult, RpcStatus, ServiceClient,
    Streaming,
};
use futures::stream::{self, SplitStream, StreamExt};
use futures::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

/// The raw filesystem service reached through a [`Channel`].
pub type RemoteService = ServiceClient<Channel>;

enum Pending {
    Unary(oneshot::Sender<RpcResult<ResponseBody>>),
    Streaming(mpsc::UnboundedSender<RpcResult<ResponseBody>>),
}

struct Shared {
    pending: DashMap<u64, Pending>,
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Frame>,
    closed: AtomicBool,
}

impl Shared {
    fn connection_lost() -> RpcStatus {
        RpcStatus::unavailable("connection closed")
    }

    /// Reserves an id for a new call.
    fn register(&self, pending: Pending) -> RpcResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(id, pending);
        // The reader sets `closed` before failing the pending calls; a call
        // registered after that must not wait for a reply.
        if self.closed.load(Ordering::Acquire) {
            self.pending.remove(&id);
            return Err(Self::connection_lost());
        }
        Ok(id)
    }

    fn send(&self, frame: Frame) -> RpcResult<()> {
        self.outgoing.send(frame).map_err(|_| Self::connection_lost())
    }

    fn route(&self, frame: Frame) {
        match frame {
            Frame::Reply { id, body } => match self.pending.remove(&id) {
                Some((_, Pending::Unary(tx))) => {
                    let _ = tx.send(Ok(body));
                }
                Some((_, Pending::Streaming(tx))) => {
                    warn!(id, "unary reply for a streaming call");
                    let _ = tx.send(Err(RpcStatus::internal("unexpected unary reply")));
                }
                None => trace!(id, "reply for unknown call"),
            },
            Frame::Item { id, body } => {
                let delivered = match self.pending.get(&id).as_deref() {
                    Some(Pending::Streaming(tx)) => tx.send(Ok(body)).is_ok(),
                    Some(Pending::Unary(_)) => {
                        warn!(id, "stream item for a unary call");
                        true
                    }
                    None => true,
                };
                if !delivered {
                    self.pending.remove(&id);
                    let _ = self.send(Frame::Cancel { id });
                }
            }
            Frame::End { id } => {
                // Dropping the sender ends the stream.
                self.pending.remove(&id);
            }
            Frame::Failure { id, status } => match self.pending.remove(&id) {
                Some((_, Pending::Unary(tx))) => {
                    let _ = tx.send(Err(status));
                }
                Some((_, Pending::Streaming(tx))) => {
                    let _ = tx.send(Err(status));
                }
                None => trace!(id, "failure for unknown call"),
            },
            Frame::Call { id, .. } | Frame::Cancel { id } => {
                warn!(id, "ignoring client-bound frame from server");
            }
        }
    }

    /// Fails every outstanding call with `Unavailable`.
    fn fail_all(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            match self.pending.remove(&id) {
                Some((_, Pending::Unary(tx))) => {
                    let _ = tx.send(Err(Self::connection_lost()));
                }
                Some((_, Pending::Streaming(tx))) => {
                    let _ = tx.send(Err(Self::connection_lost()));
                }
                None => {}
            }
        }
    }
}

/// Cancels its call on drop unless the call already completed.
struct CallGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.shared.pending.remove(&self.id).is_some() {
            trace!(id = self.id, "cancelling abandoned call");
            let _ = self.shared.send(Frame::Cancel { id: self.id });
        }
    }
}

struct Tasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Tasks {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// A multiplexed connection to a fuserpc server. Cheap to clone; the
/// connection closes when the last clone is dropped.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
    peer: SocketAddr,
    _tasks: Arc<Tasks>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.peer)
            .field("pending", &self.shared.pending.len())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Dials `addr`.
    pub async fn connect<A>(addr: A) -> ClientResult<Self>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let display = addr.to_string();
        let stream = TcpStream::connect(addr).await.map_err(|source| ClientError::Connect {
            addr: display,
            source,
        })?;
        Self::from_stream(stream)
    }

    /// Dials `addr`, giving up after `timeout`.
    pub async fn connect_timeout<A>(addr: A, timeout: Duration) -> ClientResult<Self>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let display = addr.to_string();
        match tokio::time::timeout(timeout, Self::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectTimeout { addr: display, timeout }),
        }
    }

    /// Runs the protocol over an already connected stream.
    pub fn from_stream(stream: TcpStream) -> ClientResult<Self> {
        let peer = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (mut sink, frames) = Framed::new(stream, FrameCodec::new()).split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Frame>();

        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            outgoing,
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!(error = %e, "Failed to write frame");
                    break;
                }
            }
        });
        let reader = tokio::spawn(read_loop(frames, Arc::clone(&shared), peer));

        debug!(peer = %peer, "Connected");
        Ok(Self {
            shared,
            peer,
            _tasks: Arc::new(Tasks { reader, writer }),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// True once the connection has been lost.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Wraps this channel in the service interface.
    pub fn into_service(self) -> RemoteService {
        ServiceClient::new(self)
    }
}

async fn read_loop(mut frames: SplitStream<Framed<TcpStream, FrameCodec>>, shared: Arc<Shared>, peer: SocketAddr) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => shared.route(frame),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to read frame");
                break;
            }
        }
    }
    debug!(peer = %peer, "Connection closed");
    shared.fail_all();
}

#[async_trait]
impl CallTransport for Channel {
    async fn unary(&self, context: CallContext, body: RequestBody) -> RpcResult<ResponseBody> {
        if context.is_done() {
            return Err(RpcStatus::cancelled());
        }
        let method = body.method();
        let (tx, rx) = oneshot::channel();
        let id = self.shared.register(Pending::Unary(tx))?;
        let guard = CallGuard {
            shared: Arc::clone(&self.shared),
            id,
        };
        trace!(id, method, "unary call");
        self.shared.send(Frame::Call { id, body })?;

        let result = tokio::select! {
            reply = rx => reply.unwrap_or_else(|_| Err(Shared::connection_lost())),
            () = context.done() => {
                debug!(id, method, "call cancelled");
                Err(RpcStatus::cancelled())
            }
        };
        drop(guard);
        result
    }

    async fn streaming(&self, context: CallContext, body: RequestBody) -> RpcResult<Streaming<ResponseBody>> {
        if context.is_done() {
            return Err(RpcStatus::cancelled());
        }
        let method = body.method();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.register(Pending::Streaming(tx))?;
        let guard = CallGuard {
            shared: Arc::clone(&self.shared),
            id,
        };
        trace!(id, method, "streaming call");
        self.shared.send(Frame::Call { id, body })?;

        let items = stream::unfold((rx, context, guard), |(mut rx, context, guard)| async move {
            let item = tokio::select! {
                item = rx.recv() => item?,
                () = context.done() => Err(RpcStatus::cancelled()),
            };
            Some((item, (rx, context, guard)))
        });
        Ok(Streaming::from_stream(items))
    }
}
