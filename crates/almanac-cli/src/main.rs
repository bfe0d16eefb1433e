//! CLI entrypoint for the Almanac dashboard shell.

mod cli;
mod prompt;
mod render;
mod shell;
mod style;

use std::path::PathBuf;

use almanac_client::config::{ClientConfig, CONFIG_FILE_NAME};
use anyhow::Context;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

const CONFIG_ENV: &str = "ALMANAC_CONFIG";

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", style::error(format!("Error: {err:#}")));
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Completions { shell }) => {
            generate(shell, &mut Cli::command(), "almanac", &mut std::io::stdout());
            Ok(())
        }
        None | Some(Command::Shell) => {
            let config = resolve_config(cli.config, cli.server.as_deref())?;
            init_tracing(&config.log_level, cli.verbose)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(shell::run(config))
        }
    }
}

/// `--config`, then `$ALMANAC_CONFIG`, then `~/.almanac/almanac.toml` when
/// present, else built-in defaults.
fn resolve_config(explicit: Option<PathBuf>, server: Option<&str>) -> anyhow::Result<ClientConfig> {
    let explicit = explicit.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let path = explicit.or_else(|| default_config_path().filter(|path| path.is_file()));
    let config = match path {
        Some(path) => ClientConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };
    match server {
        Some(base_url) => Ok(config.with_base_url(base_url)?),
        None => Ok(config),
    }
}

fn default_config_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".almanac").join(CONFIG_FILE_NAME))
}

fn init_tracing(level: &str, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { level };
    let level: LevelFilter = level
        .parse()
        .with_context(|| format!("invalid log level '{level}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}
