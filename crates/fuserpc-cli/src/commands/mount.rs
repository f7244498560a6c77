//! Mount a remote filesystem.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use fuserpc_client::{Channel, RemoteFileSystem};
use fuserpc_fuse::{MountConfig, is_available, mount};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(ClapArgs, Debug, Clone)]
pub struct Args {
    /// Local directory to mount on
    #[arg(value_name = "MOUNTPOINT")]
    pub mountpoint: PathBuf,

    /// Address of the fuserpc server (host:port)
    #[arg(value_name = "ADDRESS")]
    pub address: String,

    /// Log every kernel request
    #[arg(long)]
    pub debug: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    pub allow_other: bool,

    /// Mount read-only
    #[arg(long = "ro")]
    pub read_only: bool,
}

pub fn execute(args: &Args) -> Result<()> {
    if !is_available() {
        bail!("FUSE is not available on this system");
    }

    let runtime = super::runtime()?;
    let channel = runtime
        .block_on(Channel::connect_timeout(args.address.as_str(), CONNECT_TIMEOUT))
        .with_context(|| format!("Failed to connect to {}", args.address))?;
    tracing::info!(peer = %channel.peer_addr(), "Connected");

    let fs = RemoteFileSystem::new(channel.into_service(), runtime.handle().clone());
    let config = MountConfig::default()
        .fs_name(format!("fuserpc:{}", args.address))
        .allow_other(args.allow_other)
        .read_only(args.read_only)
        .debug(args.debug);
    let handle = mount(fs, &args.mountpoint, config)
        .with_context(|| format!("Failed to mount at {}", args.mountpoint.display()))?;

    eprintln!("Mounted {} at {}", args.address, args.mountpoint.display());
    super::wait_for_interrupt()?;

    handle.unmount();
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}
