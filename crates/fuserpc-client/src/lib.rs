//! Client side of the FUSE-over-RPC bridge.
//!
//! [`Channel`] dials a fuserpc server and carries calls over one TCP
//! connection. [`RemoteFileSystem`] turns any `RawFileSystemService` (usually
//! a [`RemoteService`] over a channel) back into a synchronous
//! [`RawFileSystem`](fuserpc_core::RawFileSystem) that a kernel bridge can
//! drive.
//!
//! # Example
//!
//! ```ignore
//! use fuserpc_client::{Channel, RemoteFileSystem};
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let channel = runtime.block_on(Channel::connect("127.0.0.1:7420"))?;
//! let fs = RemoteFileSystem::new(channel.into_service(), runtime.handle().clone());
//! println!("Connected to {}", fs.string());
//! ```

pub mod async_bridge;
mod channel;
mod config;
mod error;
mod filesystem;

pub use async_bridge::{BridgeError, BridgeStats};
pub use channel::{Channel, RemoteService};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use filesystem::{DEFAULT_NAME, RemoteFileSystem, status_from_rpc};
