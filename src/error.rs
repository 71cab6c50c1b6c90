use crate::admin::AdminError;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code used for every failure of the bootstrap itself.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("{0}")]
    NotSuperuser(&'static str),

    #[error("SANDBOX_USER_ID is not set")]
    MissingSandboxUserId,

    #[error("SANDBOX_USER_ID must be a numeric user id, got {0:?}")]
    InvalidSandboxUserId(String),

    #[error("Failed to create user {user} with id {uid} for a second time")]
    UserCreationExhausted {
        user: String,
        uid: u32,
        #[source]
        source: AdminError,
    },

    #[error("Cannot free user id {uid}: renumbering {builtin} failed")]
    RenumberFailed {
        builtin: String,
        uid: u32,
        #[source]
        source: AdminError,
    },

    #[error("Cannot free user id {0}: no id is left above it")]
    UidOverflow(u32),

    #[error("User {0} is missing right after provisioning")]
    UserVanished(String),

    #[error("Failed to inspect docker socket {path}")]
    DockerSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BootstrapError {
    /// Process exit code reported for this failure.
    pub fn exit_code(&self) -> u8 {
        EXIT_FAILURE
    }
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;
