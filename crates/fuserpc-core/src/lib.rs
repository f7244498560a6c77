//! Core of the FUSE-over-RPC bridge.
//!
//! This crate holds everything both halves of the bridge agree on:
//!
//! - [`RawFileSystem`], the kernel-shaped operation contract, with the
//!   native in/out structures in [`abi`] and the errno-valued [`Status`]
//! - the directory entry codec and [`DirEntryList`] cursor ([`dirent`])
//! - a per-instance [`BufferPool`]
//! - the wire messages ([`wire`]) and the native/wire translators
//!   ([`translate`]), selected per platform at compile time
//! - the RPC layer ([`rpc`]): error space, call context, streams, the
//!   [`RawFileSystemService`](rpc::RawFileSystemService) contract and its
//!   framing
//!
//! The server adapter lives in `fuserpc-server`, the client adapter in
//! `fuserpc-client`.

pub mod abi;
pub mod bufferpool;
pub mod cancel;
pub mod dirent;
pub mod raw;
pub mod rpc;
pub mod status;
pub mod translate;
pub mod wire;

pub use bufferpool::{BufferPool, PoolStatsSnapshot};
pub use cancel::{Cancel, CancelHandle};
pub use dirent::{DirEntry, DirEntryList};
pub use raw::RawFileSystem;
pub use status::Status;
