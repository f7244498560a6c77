//! Errors raised while setting up a client connection.
//!
//! Once connected, failures travel as [`RpcStatus`](fuserpc_core::rpc::RpcStatus)
//! and, at the filesystem boundary, as native [`Status`](fuserpc_core::Status).

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Dialing the server failed.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Dialing the server did not finish in time.
    #[error("Timed out after {timeout:?} connecting to {addr}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Whether the server could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::ConnectTimeout { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
