//! Mounting and unmounting.

use crate::adapter::FuseAdapter;
use crate::config::MountConfig;
use crate::error::{MountError, MountResult};
use fuser::{BackgroundSession, MountOption};
use fuserpc_core::RawFileSystem;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

/// Timeout for a graceful session join before forcing the unmount.
/// The join thread may leak on timeout.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a mounted filesystem. Dropping it unmounts.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl FuseMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session to finish.
    pub fn unmount(mut self) {
        tracing::info!(mountpoint = %self.mountpoint.display(), "Unmounting");
        if let Some(session) = self.session.take() {
            session.join();
        }
        tracing::info!(mountpoint = %self.mountpoint.display(), "Unmounted");
    }

    /// Unmounts using system tools; used when the session join is stuck.
    fn force_unmount(&self) {
        #[cfg(target_os = "macos")]
        {
            let result = std::process::Command::new("diskutil")
                .args(["unmount", "force"])
                .arg(&self.mountpoint)
                .output();
            if matches!(&result, Ok(output) if output.status.success()) {
                tracing::debug!("Force unmount via diskutil succeeded");
                return;
            }
            tracing::debug!("diskutil unmount failed, trying umount");
            let _ = std::process::Command::new("umount")
                .arg("-f")
                .arg(&self.mountpoint)
                .output();
        }

        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("fusermount")
                .arg("-uz")
                .arg(&self.mountpoint)
                .output();
        }
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::debug!(mountpoint = %self.mountpoint.display(), "Unmounting on drop");

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });

        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            tracing::warn!(
                mountpoint = %self.mountpoint.display(),
                "Session join timed out after {JOIN_TIMEOUT:?}, forcing unmount"
            );
            self.force_unmount();
        }
    }
}

/// Whether a FUSE implementation appears to be installed.
pub fn is_available() -> bool {
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        false
    }
}

/// Mounts `fs` at `mountpoint` and serves it on a background session.
pub fn mount<F>(fs: F, mountpoint: impl AsRef<Path>, config: MountConfig) -> MountResult<FuseMountHandle>
where
    F: RawFileSystem + 'static,
{
    let mountpoint = mountpoint.as_ref().to_path_buf();
    if !mountpoint.is_dir() {
        return Err(MountError::InvalidMountpoint(mountpoint));
    }

    let options = config.options();
    let timeout = config.mount_timeout;
    tracing::info!(
        mountpoint = %mountpoint.display(),
        fs = %fs.string(),
        read_only = config.read_only,
        "Mounting"
    );
    let session = spawn_mount_with_timeout(FuseAdapter::new(fs, config), &mountpoint, options, timeout)?;

    Ok(FuseMountHandle {
        session: Some(session),
        mountpoint,
    })
}

/// Runs `spawn_mount2` on its own thread so a mount syscall that blocks
/// (for example on a stale mount) cannot hang the caller.
fn spawn_mount_with_timeout<F>(
    adapter: FuseAdapter<F>,
    mountpoint: &Path,
    options: Vec<MountOption>,
    timeout: Duration,
) -> MountResult<BackgroundSession>
where
    F: RawFileSystem + 'static,
{
    let mountpoint = mountpoint.to_path_buf();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(fuser::spawn_mount2(adapter, &mountpoint, &options));
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(e)) => Err(MountError::Mount(e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(MountError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(MountError::ThreadLost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;
    impl RawFileSystem for Nothing {}

    #[test]
    fn test_mount_rejects_missing_mountpoint() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent");
        let err = mount(Nothing, &missing, MountConfig::default()).err().unwrap();
        assert!(matches!(err, MountError::InvalidMountpoint(p) if p == missing));
    }

    #[test]
    fn test_mount_rejects_file_mountpoint() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = mount(Nothing, file.path(), MountConfig::default()).err().unwrap();
        assert!(matches!(err, MountError::InvalidMountpoint(_)));
    }
}
