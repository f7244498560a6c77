//! Errors raised while running the RPC server.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listening socket failed.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The loopback root is missing or not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

pub type ServerResult<T> = Result<T, ServerError>;
