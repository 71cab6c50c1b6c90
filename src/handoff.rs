//! Hand-off to the wrapped command.
//!
//! The command is passed to the spawn primitive as an argument vector; nothing is re-quoted
//! or re-parsed by a shell on the way.

use crate::{admin::Account, env::EnvOverlay};
use anyhow::{Context, Result, anyhow, bail};
use nix::{
    errno::Errno,
    sys::wait::{WaitStatus, waitpid},
    unistd::{Gid, Pid, setgroups, setresgid, setresuid},
};
use std::{
    ffi::OsString,
    io,
    os::unix::process::CommandExt,
    process::{Child, Command},
};
use tracing::{debug, error, info};

/// Exit code of a command that could not be found, as reported by POSIX shells.
pub const EXIT_NOT_FOUND: u8 = 127;
/// Exit code of a command that was found but could not be executed.
pub const EXIT_NOT_EXECUTABLE: u8 = 126;

/// The account the wrapped command runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Whoever started the bootstrap; the command runs as a waited-on child.
    Current,
    /// Root; the bootstrap process image is replaced by the command.
    Root,
    /// A provisioned account; the command runs as a waited-on child.
    User { account: Account, groups: Vec<Gid> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<OsString>,
    pub env: EnvOverlay,
    pub identity: Identity,
}

pub trait Launcher {
    /// Runs the invocation and returns the exit code this process should report.
    fn launch(&self, invocation: Invocation) -> Result<u8>;
}

impl<T: Launcher + ?Sized> Launcher for &T {
    fn launch(&self, invocation: Invocation) -> Result<u8> {
        (**self).launch(invocation)
    }
}

#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, invocation: Invocation) -> Result<u8> {
        let Invocation {
            argv,
            env,
            identity,
        } = invocation;

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("No command to hand off to"))?;

        let mut command = Command::new(program);
        command.args(args);
        env.apply(&mut command);

        debug!(?argv, ?identity, "handing off");

        match identity {
            Identity::Current => spawn_and_wait(&mut command),
            Identity::Root => {
                let error = command.exec();
                exec_failure(program, error)
            }
            Identity::User { account, groups } => {
                let uid = account.uid;
                let gid = account.gid;

                // SAFETY: the closure only issues raw syscalls on data moved into it.
                unsafe {
                    command.pre_exec(move || {
                        setgroups(&groups)?;
                        setresgid(gid, gid, gid)?;
                        setresuid(uid, uid, uid)?;
                        Ok(())
                    });
                }

                info!(user = %account.name, %uid, %gid, "running as user");
                spawn_and_wait(&mut command)
            }
        }
    }
}

fn spawn_and_wait(command: &mut Command) -> Result<u8> {
    let child = match command.spawn() {
        Ok(child) => child,
        Err(error) => return exec_failure(command.get_program(), error),
    };

    wait(&child)
}

/// Maps a failure to start the command onto the shell's exit codes.
///
/// Only `ENOENT` and `EACCES` come from `execve` itself. Anything else, including the `EPERM`
/// of a refused privilege drop, is an error.
fn exec_failure(program: &std::ffi::OsStr, error: io::Error) -> Result<u8> {
    let code = match error.raw_os_error().map(Errno::from_raw) {
        Some(Errno::ENOENT) => EXIT_NOT_FOUND,
        Some(Errno::EACCES) => EXIT_NOT_EXECUTABLE,
        _ => {
            return Err(error)
                .with_context(|| format!("Failed to execute {}", program.to_string_lossy()));
        }
    };

    error!(program = %program.to_string_lossy(), %error, "cannot execute command");
    Ok(code)
}

fn wait(child: &Child) -> Result<u8> {
    let pid = Pid::from_raw(child.id() as i32);

    loop {
        let status =
            waitpid(pid, None).with_context(|| format!("Failed to wait for process {}", pid))?;

        match status {
            WaitStatus::Exited(_, code) => return Ok(code as u8),
            WaitStatus::Signaled(_, signal, _) => {
                info!(%pid, ?signal, "command killed by signal");
                return Ok(128u8.wrapping_add(signal as u8));
            }
            WaitStatus::Stopped(..) | WaitStatus::Continued(..) => continue,
            other => bail!("Unexpected wait status: {:?}", other),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use caps::{CapSet, Capability};
    use nix::unistd::{Uid, geteuid};
    use rstest::rstest;
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};
    use tempfile::TempDir;

    const NOBODY: u32 = 65534;

    fn nobody(groups: &[u32]) -> Identity {
        Identity::User {
            account: Account {
                name: "nobody".into(),
                uid: Uid::from_raw(NOBODY),
                gid: Gid::from_raw(NOBODY),
                home: PathBuf::from("/nonexistent"),
                shell: PathBuf::from("/usr/sbin/nologin"),
            },
            groups: groups.iter().copied().map(Gid::from_raw).collect(),
        }
    }

    fn shell(script: &str) -> Invocation {
        Invocation {
            argv: vec!["/bin/sh".into(), "-c".into(), script.into()],
            env: EnvOverlay::new(),
            identity: Identity::Current,
        }
    }

    #[rstest]
    #[case("exit 0", 0)]
    #[case("exit 3", 3)]
    #[case("kill -TERM $$", 128 + 15)]
    fn propagates_exit_status(#[case] script: &str, #[case] expected: u8) {
        assert_eq!(ProcessLauncher.launch(shell(script)).unwrap(), expected);
    }

    #[test]
    fn arguments_survive_untouched() {
        let mut invocation = shell(r#"[ "$1" = 'two words "quoted"' ] && [ $# -eq 1 ]"#);
        invocation.argv.push("sh".into());
        invocation.argv.push(r#"two words "quoted""#.into());

        assert_eq!(ProcessLauncher.launch(invocation).unwrap(), 0);
    }

    #[test]
    fn overlay_reaches_the_child() {
        let mut invocation = shell(r#"[ "$OPENHANDS_STATE_PATH" = /state ] && [ -z "${WORKSPACE_BASE+x}" ]"#);
        invocation
            .env
            .set("OPENHANDS_STATE_PATH", "/state")
            .unset("WORKSPACE_BASE");

        assert_eq!(ProcessLauncher.launch(invocation).unwrap(), 0);
    }

    #[test]
    fn missing_program_exits_127() {
        let invocation = Invocation {
            argv: vec!["/nonexistent/command".into()],
            env: EnvOverlay::new(),
            identity: Identity::Current,
        };

        assert_eq!(ProcessLauncher.launch(invocation).unwrap(), EXIT_NOT_FOUND);
    }

    #[test]
    fn non_executable_file_exits_126() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("script");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();

        let invocation = Invocation {
            argv: vec![script.into()],
            env: EnvOverlay::new(),
            identity: Identity::Current,
        };

        // Root bypasses the execute bit only when some execute bit is set.
        assert_eq!(ProcessLauncher.launch(invocation).unwrap(), EXIT_NOT_EXECUTABLE);
    }

    #[test]
    fn user_identity_drops_uid_and_groups() {
        if !geteuid().is_root() {
            return;
        }

        let mut invocation =
            shell(r#"test "$(id -u)" = 65534 && test "$(id -g)" = 65534 && test "$(id -G)" = "65534 1234""#);
        invocation.identity = nobody(&[NOBODY, 1234]);

        assert_eq!(ProcessLauncher.launch(invocation).unwrap(), 0);
    }

    #[test]
    fn refused_setresuid_is_an_error() {
        if !geteuid().is_root()
            || !caps::has_cap(None, CapSet::Effective, Capability::CAP_SETUID).unwrap()
        {
            return;
        }

        // Capabilities are per thread and the child is forked from this one.
        caps::drop(None, CapSet::Effective, Capability::CAP_SETUID).unwrap();
        let mut invocation = shell("exit 0");
        invocation.identity = nobody(&[NOBODY]);
        let result = ProcessLauncher.launch(invocation);
        caps::raise(None, CapSet::Effective, Capability::CAP_SETUID).unwrap();

        assert!(result.is_err(), "expected an error, got {result:?}");
    }

    #[test]
    fn refused_privilege_drop_is_an_error_when_unprivileged() {
        if geteuid().is_root() {
            return;
        }

        let mut invocation = shell("exit 0");
        invocation.identity = nobody(&[NOBODY]);

        assert!(ProcessLauncher.launch(invocation).is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        let invocation = Invocation {
            argv: Vec::new(),
            env: EnvOverlay::new(),
            identity: Identity::Current,
        };

        assert!(ProcessLauncher.launch(invocation).is_err());
    }
}
