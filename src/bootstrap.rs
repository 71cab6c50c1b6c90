use crate::{
    admin::{AdminError, Ensured, GroupRef, SystemAdmin},
    cache::{self, HUGGINGFACE_CACHE, PLAYWRIGHT_CACHE},
    checks,
    config::Config,
    context::GlobalContext,
    env::{EnvOverlay, RUN_AS_OPENHANDS, STATE_PATH, WORKSPACE_BASE, WORKSPACE_MOUNT_PATH},
    error::{BootstrapError, Result},
    handoff::{Identity, Invocation, Launcher},
    paths,
};
use nix::unistd::{Gid, Uid};
use std::{fs, os::unix::fs::MetadataExt};
use tracing::{info, warn};

/// How the wrapped command runs, decided once from the sandbox user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Root,
    User(Uid),
}

impl From<Uid> for Mode {
    fn from(uid: Uid) -> Self {
        if uid.is_root() { Mode::Root } else { Mode::User(uid) }
    }
}

pub struct Bootstrapper<'a, A, L> {
    config: &'a Config,
    context: GlobalContext,
    admin: A,
    launcher: L,
}

impl<'a, A: SystemAdmin, L: Launcher> Bootstrapper<'a, A, L> {
    pub fn new(config: &'a Config, context: GlobalContext, admin: A, launcher: L) -> Self {
        Self {
            config,
            context,
            admin,
            launcher,
        }
    }

    /// Runs the whole bootstrap and returns the exit code of the wrapped command.
    pub fn run(&self) -> Result<u8> {
        let mut env = self.exported_env();

        if self.config.user.skip_setup() {
            info!(euid = %self.context.euid(), "Skipping setup, running as the current user");
            return self.hand_off(env, Identity::Current);
        }

        checks::require_superuser(&self.context)?;
        let uid = checks::sandbox_user_id(self.config.user.sandbox_user_id.as_deref())?;

        if !checks::workspace_mount_requested(
            &env,
            self.config.paths.workspace_mount_path.as_deref(),
        ) {
            env.unset(WORKSPACE_BASE);
        }

        match Mode::from(uid) {
            Mode::Root => self.run_as_root(env),
            Mode::User(uid) => self.run_as_user(uid, env),
        }
    }

    /// Normalized path variables for the wrapped command.
    fn exported_env(&self) -> EnvOverlay {
        let paths = &self.config.paths;
        let mut env = EnvOverlay::new();

        if let Some(base) = paths::normalize_env(paths.workspace_base.as_deref()) {
            env.set(WORKSPACE_BASE, &base).set(WORKSPACE_MOUNT_PATH, base);
        } else if let Some(mount) = paths.workspace_mount_path.as_deref() {
            // Passed as a flag, the child would not inherit it.
            env.set(WORKSPACE_MOUNT_PATH, mount);
        }
        if let Some(state) = paths::normalize_env(paths.state_path.as_deref()) {
            env.set(STATE_PATH, state);
        }

        env
    }

    fn run_as_root(&self, mut env: EnvOverlay) -> Result<u8> {
        let layout = &self.config.layout;
        info!("Running as root");

        env.set(RUN_AS_OPENHANDS, "false");

        cache::ensure_dir(&layout.root_home.join(PLAYWRIGHT_CACHE))?;
        cache::relocate(
            &self.builtin_home().join(PLAYWRIGHT_CACHE),
            &layout.root_home.join(".cache"),
        )?;

        self.hand_off(env, Identity::Root)
    }

    fn run_as_user(&self, uid: Uid, mut env: EnvOverlay) -> Result<u8> {
        let user = &self.config.user;
        info!(%uid, "Setting up {} with id {}", user.user_name, uid);

        self.provision_user(uid)?;
        self.admin
            .add_user_to_group(&user.user_name, GroupRef::Name(&user.app_group))?;

        let socket_gid = self.docker_socket_gid()?;
        info!(gid = %socket_gid, "Docker socket group id");
        match self.admin.ensure_group_exists(&user.docker_group, socket_gid)? {
            Ensured::Existing => info!(gid = %socket_gid, "Group already exists"),
            Ensured::Created => info!(gid = %socket_gid, name = %user.docker_group, "Created group"),
        }

        let home = self.config.layout.home_of(&user.user_name);
        cache::ensure_dir(&home.join(HUGGINGFACE_CACHE))?;
        cache::ensure_dir(&home.join(PLAYWRIGHT_CACHE))?;
        cache::relocate(
            &self.builtin_home().join(PLAYWRIGHT_CACHE),
            &home.join(".cache"),
        )?;

        self.admin
            .add_user_to_group(&user.user_name, GroupRef::Id(socket_gid))?;

        let account = self
            .admin
            .lookup_user(&user.user_name)?
            .ok_or_else(|| BootstrapError::UserVanished(user.user_name.clone()))?;
        let groups = self.admin.supplementary_groups(&account)?;

        env.set("HOME", account.home.as_os_str())
            .set("USER", &account.name)
            .set("LOGNAME", &account.name)
            .set("SHELL", account.shell.as_os_str());

        info!("Running as {}", account.name);
        self.hand_off(env, Identity::User { account, groups })
    }

    /// Creates the account, freeing `uid` from the built-in account once if needed.
    fn provision_user(&self, uid: Uid) -> Result<()> {
        let user = &self.config.user;

        let first = match self
            .admin
            .ensure_user_exists(&user.user_name, uid, &user.login_shell)
        {
            Ok(Ensured::Existing) => {
                info!("User {} already exists. Skipping creation.", user.user_name);
                return Ok(());
            }
            Ok(Ensured::Created) => {
                info!(user = %user.user_name, %uid, "Created user");
                return Ok(());
            }
            Err(error @ AdminError::Lookup { .. }) => return Err(error.into()),
            Err(error) => error,
        };

        warn!(
            error = %first,
            "Failed to create user {} with id {}. Moving {} user.",
            user.user_name, uid, user.builtin_user
        );

        let bumped = uid
            .as_raw()
            .checked_add(1)
            .ok_or(BootstrapError::UidOverflow(uid.as_raw()))?;

        self.admin
            .set_user_id(&user.builtin_user, Uid::from_raw(bumped))
            .map_err(|source| BootstrapError::RenumberFailed {
                builtin: user.builtin_user.clone(),
                uid: uid.as_raw(),
                source,
            })?;

        self.admin
            .create_user(&user.user_name, uid, &user.login_shell)
            .map_err(|source| BootstrapError::UserCreationExhausted {
                user: user.user_name.clone(),
                uid: uid.as_raw(),
                source,
            })?;

        info!(user = %user.user_name, %uid, "Created user after moving {}", user.builtin_user);
        Ok(())
    }

    fn docker_socket_gid(&self) -> Result<Gid> {
        let path = &self.config.layout.docker_socket;
        let metadata = fs::metadata(path).map_err(|source| BootstrapError::DockerSocket {
            path: path.clone(),
            source,
        })?;

        Ok(Gid::from_raw(metadata.gid()))
    }

    fn builtin_home(&self) -> std::path::PathBuf {
        self.config.layout.home_of(&self.config.user.builtin_user)
    }

    fn hand_off(&self, env: EnvOverlay, identity: Identity) -> Result<u8> {
        let invocation = Invocation {
            argv: self.config.command.clone(),
            env,
            identity,
        };

        Ok(self.launcher.launch(invocation)?)
    }
}
