use crate::{
    context::GlobalContext,
    env::{EnvOverlay, WORKSPACE_MOUNT_PATH},
    error::{BootstrapError, Result},
};
use nix::unistd::Uid;

/// Account provisioning needs the real superuser.
pub fn require_superuser(context: &GlobalContext) -> Result<()> {
    if context.superuser() {
        return Ok(());
    }

    Err(BootstrapError::NotSuperuser(context.rejection()))
}

pub fn sandbox_user_id(raw: Option<&str>) -> Result<Uid> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Err(BootstrapError::MissingSandboxUserId),
    };

    raw.parse::<u32>()
        .map(Uid::from_raw)
        .map_err(|_| BootstrapError::InvalidSandboxUserId(raw.to_owned()))
}

/// Whether downstream tooling should mount a workspace at all.
pub fn workspace_mount_requested(env: &EnvOverlay, inherited: Option<&str>) -> bool {
    env.resolve(WORKSPACE_MOUNT_PATH, inherited)
        .is_some_and(|path| !path.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PrivilegeLevel;
    use rstest::rstest;

    #[rstest]
    #[case(PrivilegeLevel::Rootless)]
    #[case(PrivilegeLevel::Setuid)]
    #[case(PrivilegeLevel::RootlessWithCapabilities)]
    fn rejects_everyone_but_root(#[case] level: PrivilegeLevel) {
        let uid = Uid::from_raw(1000);
        let context = GlobalContext::with_level(uid, Uid::from_raw(0), level);

        let error = require_superuser(&context).unwrap_err();

        assert!(matches!(error, BootstrapError::NotSuperuser(_)));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn accepts_root() {
        let root = Uid::from_raw(0);
        let context = GlobalContext::with_level(root, root, PrivilegeLevel::Root);

        assert!(require_superuser(&context).is_ok());
    }

    #[rstest]
    #[case(Some("0"), 0)]
    #[case(Some("5000"), 5000)]
    #[case(Some(" 1000\n"), 1000)]
    fn parses_sandbox_user_id(#[case] raw: Option<&str>, #[case] uid: u32) {
        assert_eq!(sandbox_user_id(raw).unwrap(), Uid::from_raw(uid));
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("  "))]
    fn missing_sandbox_user_id(#[case] raw: Option<&str>) {
        assert!(matches!(
            sandbox_user_id(raw),
            Err(BootstrapError::MissingSandboxUserId)
        ));
    }

    #[rstest]
    #[case("abc")]
    #[case("-1")]
    #[case("4294967296")]
    fn invalid_sandbox_user_id(#[case] raw: &str) {
        assert!(matches!(
            sandbox_user_id(Some(raw)),
            Err(BootstrapError::InvalidSandboxUserId(_))
        ));
    }

    #[test]
    fn empty_mount_path_means_no_workspace() {
        let mut env = EnvOverlay::new();

        assert!(!workspace_mount_requested(&env, None));
        assert!(workspace_mount_requested(&env, Some("/opt/workspace")));

        env.set(WORKSPACE_MOUNT_PATH, "");
        assert!(!workspace_mount_requested(&env, Some("/opt/workspace")));
    }
}
