mod admin;
mod bootstrap;
mod cache;
mod capabilities;
mod checks;
mod config;
mod context;
mod env;
mod error;
mod handoff;
mod paths;

use admin::ShadowUtils;
use bootstrap::Bootstrapper;
use clap::Parser;
use config::Config;
use context::GlobalContext;
use handoff::ProcessLauncher;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // stdout belongs to the wrapped command.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    match run(&config) {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            let code = error.exit_code();
            error!("{:#}", anyhow::Error::new(error));
            ExitCode::from(code)
        }
    }
}

fn run(config: &Config) -> error::Result<u8> {
    tracing::info!("Starting sandbox entrypoint");

    let context = GlobalContext::init()?;
    tracing::debug!(
        ruid = %context.ruid(),
        euid = %context.euid(),
        level = ?context.privilege_level(),
        "caller"
    );
    trace_capability_snapshot!("caller capabilities");

    Bootstrapper::new(config, context, ShadowUtils, ProcessLauncher).run()
}
