//! Errors raised while mounting.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("mountpoint {} does not exist or is not a directory", .0.display())]
    InvalidMountpoint(PathBuf),

    /// The kernel (or libfuse) rejected the mount.
    #[error("mount failed: {0}")]
    Mount(#[from] io::Error),

    #[error("mount did not complete within {0:?}; the mountpoint may be a stale FUSE mount")]
    Timeout(Duration),

    #[error("mount thread terminated unexpectedly")]
    ThreadLost,
}

pub type MountResult<T> = Result<T, MountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MountError::InvalidMountpoint(PathBuf::from("/nope"));
        assert!(err.to_string().contains("/nope"));

        let err: MountError = io::Error::from_raw_os_error(libc::EPERM).into();
        assert!(matches!(err, MountError::Mount(_)));
    }
}
