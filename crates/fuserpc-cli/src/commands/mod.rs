pub mod mount;
pub mod serve;

use std::sync::mpsc;

use anyhow::{Context, Result};

/// Blocks until Ctrl-C (or SIGTERM/SIGHUP) arrives.
pub fn wait_for_interrupt() -> Result<()> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt, shutting down...");
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;
    rx.recv().context("Signal handler went away")
}

/// Multi-threaded runtime shared by the RPC layer.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("fuserpc-rt")
        .build()
        .context("Failed to start async runtime")
}
