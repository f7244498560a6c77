//! TCP server lifecycle for the RPC service.
//!
//! Every accepted connection gets a reader loop and a writer task. Calls are
//! served concurrently, each in its own task; their frames are funnelled
//! through the connection's writer. A `Cancel` frame (or losing the
//! connection) fires the call's cancellation signal.

use crate::config::ServerConfig;
use crate::error::ServerError;
use dashmap::DashMap;
use fuserpc_core::rpc::{
    CallContext, Dispatched, Frame, FrameCodec, RawFileSystemService, Recv, RequestBody, dispatch,
};
use fuserpc_core::{Cancel, CancelHandle};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

/// A running RPC server instance.
pub struct RpcServer {
    /// The actual bound address.
    pub addr: SocketAddr,
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Server task handle.
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer").field("addr", &self.addr).finish_non_exhaustive()
    }
}

impl RpcServer {
    /// Binds the listener and starts serving `service`.
    pub async fn start<S>(service: S, config: ServerConfig) -> Result<Self, ServerError>
    where
        S: RawFileSystemService + 'static,
    {
        Self::start_shared(Arc::new(service), config).await
    }

    pub async fn start_shared<S>(service: Arc<S>, config: ServerConfig) -> Result<Self, ServerError>
    where
        S: RawFileSystemService + 'static,
    {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let actual_addr = listener.local_addr()?;

        info!(addr = %actual_addr, "Starting RPC server");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let write_queue = config.write_queue;

        let server_handle = tokio::spawn(async move {
            tokio::select! {
                () = run_server(listener, service, write_queue) => {
                    debug!("Server loop ended");
                }
                _ = shutdown_rx => {
                    info!("Received shutdown signal");
                }
            }
        });

        Ok(Self {
            addr: actual_addr,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting, drops every open connection and waits for the
    /// server task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        info!("RPC server stopped");
    }

    /// Stop the server synchronously (for use in Drop).
    fn stop_sync(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop_sync();
    }
}

/// Accept loop. Connections live in a `JoinSet` so that dropping this
/// future tears all of them down.
async fn run_server<S>(listener: TcpListener, service: Arc<S>, write_queue: usize)
where
    S: RawFileSystemService + 'static,
{
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!(peer = %peer_addr, "Accepted connection");
                    let service = Arc::clone(&service);
                    connections.spawn(async move {
                        serve_connection(stream, service, write_queue).await;
                        debug!(peer = %peer_addr, "Connection closed");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection<S>(stream: TcpStream, service: Arc<S>, write_queue: usize)
where
    S: RawFileSystemService + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        trace!(error = %e, "Failed to set TCP_NODELAY");
    }
    let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new()).split();
    let (tx, mut rx) = mpsc::channel::<Frame>(write_queue);

    let writer = async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!(error = %e, "Failed to write frame");
                break;
            }
        }
    };

    let reader = async move {
        let inflight: Arc<DashMap<u64, CancelHandle>> = Arc::new(DashMap::new());
        let mut calls = JoinSet::new();
        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(Frame::Call { id, body })) => {
                        trace!(id, method = body.method(), "Call");
                        let (handle, cancel) = Cancel::pair();
                        inflight.insert(id, handle);
                        let service = Arc::clone(&service);
                        let inflight = Arc::clone(&inflight);
                        let tx = tx.clone();
                        calls.spawn(async move {
                            serve_call(service.as_ref(), id, body, cancel, &tx).await;
                            inflight.remove(&id);
                        });
                    }
                    Some(Ok(Frame::Cancel { id })) => {
                        if let Some((_, handle)) = inflight.remove(&id) {
                            debug!(id, "Call cancelled by client");
                            handle.cancel();
                        }
                    }
                    Some(Ok(other)) => {
                        warn!(id = other.id(), "Ignoring unexpected frame from client");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to read frame");
                        break;
                    }
                    None => break,
                },
                Some(_) = calls.join_next(), if !calls.is_empty() => {}
            }
        }
        // Fire every outstanding cancellation before the calls are torn down.
        inflight.clear();
    };

    tokio::select! {
        () = reader => {}
        () = writer => {}
    }
}

async fn serve_call<S>(service: &S, id: u64, body: RequestBody, cancel: Cancel, tx: &mpsc::Sender<Frame>)
where
    S: RawFileSystemService + ?Sized,
{
    let method = body.method();
    let context = CallContext::from_cancel(cancel);
    match dispatch(service, context, body).await {
        Dispatched::Unary(Ok(body)) => {
            let _ = tx.send(Frame::Reply { id, body }).await;
        }
        Dispatched::Unary(Err(status)) | Dispatched::Streaming(Err(status)) => {
            debug!(id, method, code = %status.code, "Call failed");
            let _ = tx.send(Frame::Failure { id, status }).await;
        }
        Dispatched::Streaming(Ok(mut stream)) => loop {
            let frame = match stream.recv().await {
                Recv::Data(body) => Frame::Item { id, body },
                Recv::EndOfStream => {
                    let _ = tx.send(Frame::End { id }).await;
                    break;
                }
                Recv::Error(status) => {
                    debug!(id, method, code = %status.code, "Stream failed");
                    let _ = tx.send(Frame::Failure { id, status }).await;
                    break;
                }
            };
            if tx.send(frame).await.is_err() {
                break;
            }
        },
    }
}
