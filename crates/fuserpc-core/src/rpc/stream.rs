//! Server-streamed responses.
//!
//! A [`Streaming`] is a finite, non-restartable sequence of messages. Every
//! receive ends in one of three states ([`Recv`]); after an error or the end
//! of the stream, further receives keep reporting the end.

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use super::status::{RpcResult, RpcStatus};

/// Outcome of one receive on a [`Streaming`].
#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Data(T),
    EndOfStream,
    Error(RpcStatus),
}

/// Receiving half of a streamed response.
pub struct Streaming<T> {
    inner: BoxStream<'static, RpcResult<T>>,
    finished: bool,
}

impl<T> std::fmt::Debug for Streaming<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streaming").field("finished", &self.finished).finish_non_exhaustive()
    }
}

/// Sending half of a streamed response.
#[derive(Debug)]
pub struct StreamSender<T> {
    tx: mpsc::Sender<RpcResult<T>>,
}

// Manual impl: a derive would require `T: Clone`.
impl<T> Clone for StreamSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Send + 'static> Streaming<T> {
    /// Creates a bounded stream holding at most `buffer` pending messages.
    pub fn channel(buffer: usize) -> (StreamSender<T>, Streaming<T>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let inner = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        (StreamSender { tx }, Self::from_stream(inner))
    }

    /// A stream that ends after yielding `items`.
    pub fn from_items(items: Vec<T>) -> Streaming<T> {
        Self::from_stream(stream::iter(items.into_iter().map(Ok)))
    }

    pub fn from_stream<S>(inner: S) -> Streaming<T>
    where
        S: futures::Stream<Item = RpcResult<T>> + Send + 'static,
    {
        Streaming {
            inner: inner.boxed(),
            finished: false,
        }
    }

    /// Receives the next message.
    pub async fn recv(&mut self) -> Recv<T> {
        if self.finished {
            return Recv::EndOfStream;
        }
        match self.inner.next().await {
            Some(Ok(item)) => Recv::Data(item),
            Some(Err(status)) => {
                self.finished = true;
                Recv::Error(status)
            }
            None => {
                self.finished = true;
                Recv::EndOfStream
            }
        }
    }

    /// Converts every message; an `Err` from `f` terminates the stream with that error.
    pub fn map<U, F>(self, mut f: F) -> Streaming<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> RpcResult<U> + Send + 'static,
    {
        Streaming {
            inner: self.inner.map(move |item| item.and_then(&mut f)).boxed(),
            finished: self.finished,
        }
    }
}

impl<T> StreamSender<T> {
    /// Sends one message. Returns `false` once the receiver is gone.
    pub async fn send(&self, item: T) -> bool {
        self.tx.send(Ok(item)).await.is_ok()
    }

    /// Terminates the stream with an error.
    pub async fn fail(self, status: RpcStatus) {
        let _ = self.tx.send(Err(status)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
