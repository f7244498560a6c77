//! Native filesystem status codes.
//!
//! A [`Status`] is the result every raw filesystem operation reports to the
//! kernel: zero for success, otherwise a positive POSIX errno. The value is
//! carried over the wire as a plain integer and never reinterpreted.

use std::fmt;
use std::io;

/// Result code of a raw filesystem operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const EPERM: Status = Status(libc::EPERM);
    pub const ENOENT: Status = Status(libc::ENOENT);
    pub const EIO: Status = Status(libc::EIO);
    pub const EBADF: Status = Status(libc::EBADF);
    pub const EAGAIN: Status = Status(libc::EAGAIN);
    pub const EACCES: Status = Status(libc::EACCES);
    pub const EBUSY: Status = Status(libc::EBUSY);
    pub const EEXIST: Status = Status(libc::EEXIST);
    pub const EXDEV: Status = Status(libc::EXDEV);
    pub const ENOTDIR: Status = Status(libc::ENOTDIR);
    pub const EISDIR: Status = Status(libc::EISDIR);
    pub const EINVAL: Status = Status(libc::EINVAL);
    pub const ENOSPC: Status = Status(libc::ENOSPC);
    pub const ERANGE: Status = Status(libc::ERANGE);
    pub const ENAMETOOLONG: Status = Status(libc::ENAMETOOLONG);
    pub const ENOTEMPTY: Status = Status(libc::ENOTEMPTY);
    pub const ENODATA: Status = Status(libc::ENODATA);
    pub const ENOTSUP: Status = Status(libc::ENOTSUP);
    pub const EINTR: Status = Status(libc::EINTR);
    /// The backend does not implement this operation.
    pub const ENOSYS: Status = Status(libc::ENOSYS);

    /// Wraps a raw errno value.
    pub const fn from_code(code: i32) -> Self {
        Status(code)
    }

    /// The raw errno value (zero on success).
    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// True for the reserved "not implemented" status.
    pub const fn is_unimplemented(self) -> bool {
        self.0 == libc::ENOSYS
    }

    /// Converts a status into a `Result`, treating every nonzero code as an error.
    pub fn into_result(self) -> Result<(), Status> {
        if self.is_ok() { Ok(()) } else { Err(self) }
    }
}

impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        Status::from(&err)
    }
}

impl From<&io::Error> for Status {
    fn from(err: &io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            return Status(code);
        }
        match err.kind() {
            io::ErrorKind::NotFound => Status::ENOENT,
            io::ErrorKind::PermissionDenied => Status::EACCES,
            io::ErrorKind::AlreadyExists => Status::EEXIST,
            io::ErrorKind::InvalidInput => Status::EINVAL,
            io::ErrorKind::Unsupported => Status::ENOTSUP,
            io::ErrorKind::Interrupted => Status::EINTR,
            _ => Status::EIO,
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("OK");
        }
        write!(f, "{}", io::Error::from_raw_os_error(self.0))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_is_zero() {
        assert_eq!(Status::OK.code(), 0);
        assert!(Status::OK.is_ok());
        assert!(Status::default().is_ok());
    }

    #[test]
    fn test_unimplemented_is_enosys() {
        assert!(Status::ENOSYS.is_unimplemented());
        assert!(!Status::EIO.is_unimplemented());
        assert_eq!(Status::ENOSYS.code(), libc::ENOSYS);
    }

    #[test]
    fn test_from_code_roundtrip() {
        for code in [0, 1, libc::EINVAL, libc::ENOTEMPTY, i32::MAX, -1] {
            assert_eq!(Status::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_from_io_error() {
        let e = io::Error::from_raw_os_error(libc::ENOTDIR);
        assert_eq!(Status::from(e), Status::ENOTDIR);

        let e = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(Status::from(e), Status::ENOENT);

        let e = io::Error::other("boom");
        assert_eq!(Status::from(e), Status::EIO);
    }

    #[test]
    fn test_into_result() {
        assert!(Status::OK.into_result().is_ok());
        assert_eq!(Status::EACCES.into_result(), Err(Status::EACCES));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Status::OK), "OK");
        assert!(!format!("{}", Status::ENOENT).is_empty());
    }
}
