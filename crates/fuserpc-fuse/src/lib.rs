//! Kernel side of the FUSE-over-RPC bridge.
//!
//! [`FuseAdapter`] drives any [`RawFileSystem`](fuserpc_core::RawFileSystem)
//! from a fuser session: usually a `RemoteFileSystem` talking to a fuserpc
//! server, but a local filesystem works just as well. [`mount`] puts it on a
//! background session and returns a [`FuseMountHandle`] that unmounts when
//! dropped.
//!
//! # Usage
//!
//! ```ignore
//! use fuserpc_fuse::{MountConfig, mount};
//!
//! let handle = mount(fs, "/mnt/remote", MountConfig::default().read_only(true))?;
//! // ... serve until asked to stop
//! handle.unmount();
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;

pub use adapter::{AttrChanges, FuseAdapter, file_attr, file_type};
pub use backend::{FuseMountHandle, is_available, mount};
pub use config::{DEFAULT_MOUNT_TIMEOUT, DEFAULT_TTL, MountConfig};
pub use error::{MountError, MountResult};
