use clap::{Args, Parser};
use std::{ffi::OsString, path::PathBuf};

const HEADING_PATHS: &str = "Paths";
const HEADING_USER: &str = "User";
const HEADING_LAYOUT: &str = "Layout";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sandbox-entrypoint",
    version,
    about = "Container entrypoint that provisions the sandbox user and runs COMMAND as it"
)]
pub struct Config {
    #[command(flatten)]
    pub paths: PathOptions,

    #[command(flatten)]
    pub user: UserOptions,

    #[command(flatten)]
    pub layout: LayoutOptions,

    /// Command to run once setup is done
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<OsString>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PathOptions {
    #[arg(
        long,
        env = "WORKSPACE_BASE",
        help = "Workspace base path, normalized before export",
        help_heading = HEADING_PATHS
    )]
    pub workspace_base: Option<String>,

    #[arg(
        long,
        env = "OPENHANDS_STATE_PATH",
        help = "State path, normalized before export",
        help_heading = HEADING_PATHS
    )]
    pub state_path: Option<String>,

    #[arg(
        long,
        env = "WORKSPACE_MOUNT_PATH",
        help = "Workspace mount path; when empty no workspace is mounted",
        help_heading = HEADING_PATHS
    )]
    pub workspace_mount_path: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct UserOptions {
    #[arg(
        long,
        env = "NO_SETUP",
        help = "Skip all setup when set to \"true\"",
        help_heading = HEADING_USER
    )]
    pub no_setup: Option<String>,

    #[arg(
        long,
        env = "SANDBOX_USER_ID",
        help = "User id to run as; 0 runs as root",
        help_heading = HEADING_USER
    )]
    pub sandbox_user_id: Option<String>,

    #[arg(
        long,
        env = "ENTRYPOINT_USER_NAME",
        default_value = "enduser",
        help = "Account provisioned for non-zero user ids",
        help_heading = HEADING_USER
    )]
    pub user_name: String,

    #[arg(
        long,
        env = "ENTRYPOINT_BUILTIN_USER",
        default_value = "openhands",
        help = "Account baked into the image that may hold the requested id",
        help_heading = HEADING_USER
    )]
    pub builtin_user: String,

    #[arg(
        long,
        env = "ENTRYPOINT_APP_GROUP",
        default_value = "app",
        help = "Application group the account joins",
        help_heading = HEADING_USER
    )]
    pub app_group: String,

    #[arg(
        long,
        env = "ENTRYPOINT_DOCKER_GROUP",
        default_value = "docker",
        help = "Name for the docker socket group when it has to be created",
        help_heading = HEADING_USER
    )]
    pub docker_group: String,

    #[arg(
        long,
        env = "ENTRYPOINT_LOGIN_SHELL",
        default_value = "/bin/bash",
        help = "Login shell of the provisioned account",
        help_heading = HEADING_USER
    )]
    pub login_shell: String,
}

impl UserOptions {
    /// Only the literal value `true` skips setup.
    pub fn skip_setup(&self) -> bool {
        self.no_setup.as_deref() == Some("true")
    }
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            no_setup: None,
            sandbox_user_id: None,
            user_name: "enduser".into(),
            builtin_user: "openhands".into(),
            app_group: "app".into(),
            docker_group: "docker".into(),
            login_shell: "/bin/bash".into(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LayoutOptions {
    #[arg(
        long,
        env = "DOCKER_SOCKET",
        default_value = "/var/run/docker.sock",
        help = "Docker socket whose group the account joins",
        help_heading = HEADING_LAYOUT
    )]
    pub docker_socket: PathBuf,

    #[arg(
        long,
        env = "ENTRYPOINT_HOME_ROOT",
        default_value = "/home",
        help = "Directory holding user home directories",
        help_heading = HEADING_LAYOUT
    )]
    pub home_root: PathBuf,

    #[arg(
        long,
        env = "ENTRYPOINT_ROOT_HOME",
        default_value = "/root",
        help = "Home directory of root",
        help_heading = HEADING_LAYOUT
    )]
    pub root_home: PathBuf,
}

impl LayoutOptions {
    pub fn home_of(&self, user: &str) -> PathBuf {
        self.home_root.join(user)
    }
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            docker_socket: PathBuf::from("/var/run/docker.sock"),
            home_root: PathBuf::from("/home"),
            root_home: PathBuf::from("/root"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn verify_cli() {
        Config::command().debug_assert();
    }

    #[test]
    fn command_keeps_its_own_flags() {
        let config = Config::try_parse_from([
            "sandbox-entrypoint",
            "--user-name",
            "worker",
            "python",
            "-m",
            "server",
            "--user-name",
            "x",
        ])
        .unwrap();

        assert_eq!(config.user.user_name, "worker");
        assert_eq!(
            config.command,
            ["python", "-m", "server", "--user-name", "x"].map(OsString::from)
        );
    }

    #[test]
    fn command_is_required() {
        assert!(Config::try_parse_from(["sandbox-entrypoint"]).is_err());
    }

    #[rstest]
    #[case(Some("true"), true)]
    #[case(Some("TRUE"), false)]
    #[case(Some("1"), false)]
    #[case(None, false)]
    fn only_literal_true_skips_setup(#[case] value: Option<&str>, #[case] skip: bool) {
        let options = UserOptions {
            no_setup: value.map(String::from),
            ..UserOptions::default()
        };

        assert_eq!(options.skip_setup(), skip);
    }
}
