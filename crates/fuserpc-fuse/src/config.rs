//! Mount configuration for the kernel bridge.

use fuser::MountOption;
use std::time::Duration;

/// Default time-to-live for entries and attributes the bridge hands to the kernel.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Default time to wait for the mount syscall before giving up.
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for mounting a [`RawFileSystem`](fuserpc_core::RawFileSystem).
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Name shown as the mount source.
    pub fs_name: String,

    /// Filesystem subtype (`fuse.<subtype>` in the mount table).
    pub subtype: String,

    /// Let users other than the mounting one access the filesystem.
    pub allow_other: bool,

    /// Mount read-only.
    pub read_only: bool,

    /// Log every kernel request and enable filesystem debug output.
    pub debug: bool,

    /// TTL used when the filesystem reports a zero validity period.
    pub attr_ttl: Duration,

    /// How long to wait for the mount to come up.
    pub mount_timeout: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "fuserpc".to_string(),
            subtype: "fuserpc".to_string(),
            allow_other: false,
            read_only: false,
            debug: false,
            attr_ttl: DEFAULT_TTL,
            mount_timeout: DEFAULT_MOUNT_TIMEOUT,
        }
    }
}

impl MountConfig {
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the fallback TTL for entries and attributes.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }

    /// Mount options passed to the kernel.
    pub fn options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(self.subtype.clone()),
            MountOption::AutoUnmount,
            MountOption::DefaultPermissions,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options.push(if self.read_only { MountOption::RO } else { MountOption::RW });

        #[cfg(target_os = "macos")]
        {
            options.push(MountOption::CUSTOM(format!("volname={}", self.fs_name)));
            options.push(MountOption::CUSTOM("daemon_timeout=30".to_string()));
        }

        options
    }
}
