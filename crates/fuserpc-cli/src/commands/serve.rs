//! Serve a local directory.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use fuserpc_core::RawFileSystem;
use fuserpc_server::{
    DEFAULT_MSG_SIZE_THRESHOLD, DEFAULT_PORT, FileSystemServer, LoopbackFileSystem, RpcServer, ServerConfig,
};

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
    /// Directory to serve
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Address to listen on
    #[arg(long, value_name = "ADDR", default_value_t = SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)))]
    pub listen: SocketAddr,

    /// Largest streamed chunk in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MSG_SIZE_THRESHOLD)]
    pub threshold: usize,

    /// Log every served request
    #[arg(long)]
    pub debug: bool,
}

pub fn execute(args: &Args) -> Result<()> {
    let fs = LoopbackFileSystem::new(&args.dir)
        .with_context(|| format!("Cannot serve {}", args.dir.display()))?;
    fs.set_debug(args.debug);

    let runtime = super::runtime()?;
    let server = runtime
        .block_on(RpcServer::start(
            FileSystemServer::with_threshold(fs, args.threshold),
            ServerConfig::listen(args.listen),
        ))
        .with_context(|| format!("Failed to listen on {}", args.listen))?;

    eprintln!("Serving {} on {}", args.dir.display(), server.local_addr());
    super::wait_for_interrupt()?;

    runtime.block_on(server.stop());
    Ok(())
}
