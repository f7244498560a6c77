//! Server side of the FUSE-over-RPC bridge.
//!
//! [`FileSystemServer`] wraps any [`RawFileSystem`](fuserpc_core::RawFileSystem)
//! and exposes it as a `RawFileSystemService`. [`RpcServer`] puts that
//! service on a TCP listener.
//!
//! # How It Works
//!
//! 1. Each incoming call is decoded from its wire form into native ABI structs
//! 2. The filesystem runs on the blocking pool with a cancellation signal
//!    tied to the call
//! 3. The native reply is encoded back, with the errno carried in `status`
//!
//! `ENOSYS` is the one errno that does not travel in-band: it becomes an RPC
//! `Unimplemented` failure so clients can tell "not supported" apart from
//! "failed". `Read`, `ReadDir` and `ReadDirPlus` are streamed in chunks no
//! larger than the message size threshold.
//!
//! # Example
//!
//! ```ignore
//! use fuserpc_server::{FileSystemServer, LoopbackFileSystem, RpcServer, ServerConfig};
//!
//! let fs = LoopbackFileSystem::new("/srv/export")?;
//! let server = RpcServer::start(FileSystemServer::new(fs), ServerConfig::default()).await?;
//! println!("Serving on {}", server.local_addr());
//! ```

mod config;
mod error;
mod handles;
mod loopback;
mod server;
mod transport;

pub use config::{DEFAULT_PORT, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use loopback::LoopbackFileSystem;
pub use server::{DEFAULT_MSG_SIZE_THRESHOLD, FileSystemServer, MAX_REQUEST_SIZE};
pub use transport::RpcServer;
