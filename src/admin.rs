//! User and group administration.
//!
//! [`SystemAdmin`] is the only way the bootstrap touches the user database, so tests can
//! substitute an in-memory implementation for [`ShadowUtils`].

use nix::unistd::{Gid, Group, Uid, User, getgrouplist};
use std::{
    ffi::CString,
    fmt,
    path::PathBuf,
    process::{Command, Output},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("`{program} {args}` failed with {status}: {stderr}")]
    CommandFailed {
        program: &'static str,
        args: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to run `{program}`")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to look up {what}")]
    Lookup {
        what: String,
        #[source]
        source: nix::Error,
    },

    #[error("Invalid account name {0:?}")]
    InvalidName(String),
}

/// An existing account as seen in the user database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: Uid,
    pub gid: Gid,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// A group referenced either by name or by numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRef<'a> {
    Name(&'a str),
    Id(Gid),
}

impl fmt::Display for GroupRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupRef::Name(name) => f.write_str(name),
            GroupRef::Id(gid) => write!(f, "{gid}"),
        }
    }
}

/// Whether an `ensure_*` call found the entry or had to create it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Existing,
    Created,
}

pub trait SystemAdmin {
    fn user_exists(&self, name: &str) -> Result<bool, AdminError> {
        Ok(self.lookup_user(name)?.is_some())
    }

    fn lookup_user(&self, name: &str) -> Result<Option<Account>, AdminError>;

    /// Creates `name` with a home directory, the given uid and login shell.
    fn create_user(&self, name: &str, uid: Uid, shell: &str) -> Result<(), AdminError>;

    /// Changes the uid of an existing account.
    fn set_user_id(&self, name: &str, uid: Uid) -> Result<(), AdminError>;

    /// Returns the name of the group owning `gid`, if any.
    fn group_by_id(&self, gid: Gid) -> Result<Option<String>, AdminError>;

    fn group_exists(&self, gid: Gid) -> Result<bool, AdminError> {
        Ok(self.group_by_id(gid)?.is_some())
    }

    fn create_group(&self, name: &str, gid: Gid) -> Result<(), AdminError>;

    /// Appends `group` to the supplementary groups of `user`.
    fn add_user_to_group(&self, user: &str, group: GroupRef<'_>) -> Result<(), AdminError>;

    /// Every group id `account` belongs to, primary group included.
    fn supplementary_groups(&self, account: &Account) -> Result<Vec<Gid>, AdminError>;

    /// Makes sure `name` exists. Safe to call any number of times; an existing account is
    /// left untouched even if its uid differs from `uid`.
    fn ensure_user_exists(&self, name: &str, uid: Uid, shell: &str) -> Result<Ensured, AdminError> {
        if self.user_exists(name)? {
            return Ok(Ensured::Existing);
        }

        self.create_user(name, uid, shell)?;
        Ok(Ensured::Created)
    }

    /// Makes sure a group with `gid` exists, creating it as `name` otherwise. Safe to call
    /// any number of times; only the id is matched, an existing group keeps its name.
    fn ensure_group_exists(&self, name: &str, gid: Gid) -> Result<Ensured, AdminError> {
        if self.group_exists(gid)? {
            return Ok(Ensured::Existing);
        }

        self.create_group(name, gid)?;
        Ok(Ensured::Created)
    }
}

impl<T: SystemAdmin + ?Sized> SystemAdmin for &T {
    fn lookup_user(&self, name: &str) -> Result<Option<Account>, AdminError> {
        (**self).lookup_user(name)
    }

    fn create_user(&self, name: &str, uid: Uid, shell: &str) -> Result<(), AdminError> {
        (**self).create_user(name, uid, shell)
    }

    fn set_user_id(&self, name: &str, uid: Uid) -> Result<(), AdminError> {
        (**self).set_user_id(name, uid)
    }

    fn group_by_id(&self, gid: Gid) -> Result<Option<String>, AdminError> {
        (**self).group_by_id(gid)
    }

    fn create_group(&self, name: &str, gid: Gid) -> Result<(), AdminError> {
        (**self).create_group(name, gid)
    }

    fn add_user_to_group(&self, user: &str, group: GroupRef<'_>) -> Result<(), AdminError> {
        (**self).add_user_to_group(user, group)
    }

    fn supplementary_groups(&self, account: &Account) -> Result<Vec<Gid>, AdminError> {
        (**self).supplementary_groups(account)
    }
}

/// [`SystemAdmin`] backed by the libc user database and the shadow-utils binaries.
#[derive(Debug, Default)]
pub struct ShadowUtils;

impl ShadowUtils {
    fn run(program: &'static str, args: &[&str]) -> Result<(), AdminError> {
        debug!(program, ?args, "running");

        let Output { status, stderr, .. } = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| AdminError::Spawn { program, source })?;

        if status.success() {
            return Ok(());
        }

        Err(AdminError::CommandFailed {
            program,
            args: args.join(" "),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_owned(),
        })
    }
}

impl SystemAdmin for ShadowUtils {
    fn lookup_user(&self, name: &str) -> Result<Option<Account>, AdminError> {
        let user = User::from_name(name).map_err(|source| AdminError::Lookup {
            what: format!("user {name}"),
            source,
        })?;

        Ok(user.map(|user| Account {
            name: user.name,
            uid: user.uid,
            gid: user.gid,
            home: user.dir,
            shell: user.shell,
        }))
    }

    fn create_user(&self, name: &str, uid: Uid, shell: &str) -> Result<(), AdminError> {
        let uid = uid.to_string();
        Self::run("useradd", &["-l", "-m", "-u", &uid, "-s", shell, name])?;
        debug!(user = name, %uid, "created user");
        Ok(())
    }

    fn set_user_id(&self, name: &str, uid: Uid) -> Result<(), AdminError> {
        Self::run("usermod", &["-u", &uid.to_string(), name])
    }

    fn group_by_id(&self, gid: Gid) -> Result<Option<String>, AdminError> {
        let group = Group::from_gid(gid).map_err(|source| AdminError::Lookup {
            what: format!("group {gid}"),
            source,
        })?;

        Ok(group.map(|group| group.name))
    }

    fn create_group(&self, name: &str, gid: Gid) -> Result<(), AdminError> {
        Self::run("groupadd", &["-g", &gid.to_string(), name])?;
        debug!(group = name, %gid, "created group");
        Ok(())
    }

    fn add_user_to_group(&self, user: &str, group: GroupRef<'_>) -> Result<(), AdminError> {
        Self::run("usermod", &["-aG", &group.to_string(), user])
    }

    fn supplementary_groups(&self, account: &Account) -> Result<Vec<Gid>, AdminError> {
        let name = CString::new(account.name.as_str())
            .map_err(|_| AdminError::InvalidName(account.name.clone()))?;

        getgrouplist(&name, account.gid).map_err(|source| AdminError::Lookup {
            what: format!("groups of {}", account.name),
            source,
        })
    }
}
