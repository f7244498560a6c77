//! Transport-level call failures.
//!
//! These are distinct from the in-band [`wire::Status`](crate::wire::Status)
//! of a response: an `RpcStatus` means the call itself did not produce a
//! response message.

use serde::{Deserialize, Serialize};

/// Canonical RPC failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    Unimplemented,
    Internal,
    Unavailable,
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Code::Cancelled => "cancelled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid argument",
            Code::DeadlineExceeded => "deadline exceeded",
            Code::NotFound => "not found",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// A failed RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc {code}: {message}")]
pub struct RpcStatus {
    pub code: Code,
    pub message: String,
}

/// Result of an RPC call.
pub type RpcResult<T> = Result<T, RpcStatus>;

impl RpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unimplemented(method: &str) -> Self {
        Self::new(Code::Unimplemented, format!("method {method} not implemented"))
    }

    pub fn cancelled() -> Self {
        Self::new(Code::Cancelled, "call cancelled")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(Code::DeadlineExceeded, "deadline exceeded")
    }

    pub fn is_unimplemented(&self) -> bool {
        self.code == Code::Unimplemented
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unimplemented_names_method() {
        let status = RpcStatus::unimplemented("Mknod");
        assert!(status.is_unimplemented());
        assert_eq!(status.to_string(), "rpc unimplemented: method Mknod not implemented");
    }

    #[test]
    fn test_other_codes_are_not_unimplemented() {
        assert!(!RpcStatus::unavailable("gone").is_unimplemented());
        assert_eq!(RpcStatus::cancelled().code, Code::Cancelled);
    }
}
