use crate::capabilities::has_any_permitted_capabilities;
use anyhow::{Context, Result, bail};
use nix::unistd::{Uid, geteuid, getuid};
use once_cell::sync::OnceCell;

static GLOBAL_CONTEXT: OnceCell<GlobalContext> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrivilegeLevel {
    Root,
    Rootless,
    Setuid,
    RootlessWithCapabilities,
}

/// Identity of the process that started the bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct GlobalContext {
    ruid: Uid,
    euid: Uid,
    level: PrivilegeLevel,
}

impl GlobalContext {
    /// Captures the caller identity. Later calls return the first capture.
    pub fn init() -> Result<Self> {
        GLOBAL_CONTEXT
            .get_or_try_init(GlobalContext::new)
            .copied()
            .context("Failed to create global context")
    }

    #[inline]
    pub fn ruid(&self) -> Uid {
        self.ruid
    }

    #[inline]
    pub fn euid(&self) -> Uid {
        self.euid
    }

    #[inline]
    pub fn privilege_level(&self) -> PrivilegeLevel {
        self.level
    }

    /// Only a real root caller may create accounts.
    #[inline]
    pub fn superuser(&self) -> bool {
        self.level == PrivilegeLevel::Root
    }

    /// Explains why a caller that is not the superuser was rejected.
    pub fn rejection(&self) -> &'static str {
        match self.level {
            PrivilegeLevel::RootlessWithCapabilities => ROOTLESS_WITH_CAPABILITY_ERROR_MESSAGE,
            PrivilegeLevel::Setuid => SETUID_ERROR_MESSAGE,
            PrivilegeLevel::Root | PrivilegeLevel::Rootless => NOT_ROOT_ERROR_MESSAGE,
        }
    }

    pub(crate) fn with_level(ruid: Uid, euid: Uid, level: PrivilegeLevel) -> Self {
        Self { ruid, euid, level }
    }

    fn new() -> Result<Self> {
        let ruid = getuid();
        let euid = geteuid();

        let level = if ruid != euid {
            if !euid.is_root() {
                bail!(
                    "FATAL: setuid binary must elevate to root (euid=0), but got euid={}",
                    euid
                );
            }
            PrivilegeLevel::Setuid
        } else if euid.is_root() {
            PrivilegeLevel::Root
        } else if has_any_permitted_capabilities()? {
            PrivilegeLevel::RootlessWithCapabilities
        } else {
            PrivilegeLevel::Rootless
        };

        Ok(Self::with_level(ruid, euid, level))
    }
}

pub(crate) const NOT_ROOT_ERROR_MESSAGE: &str = "The entrypoint must run as root";

pub(crate) const SETUID_ERROR_MESSAGE: &str = "The entrypoint must run as root, not as a setuid binary. \
Start the container with the root user and let the entrypoint drop privileges.";

pub(crate) const ROOTLESS_WITH_CAPABILITY_ERROR_MESSAGE: &str = "The entrypoint must run as root. \
Detected capabilities without root privileges, which usually means file capabilities (setcap) \
on the binary. Run the container as root instead.";
