//! Entry point for the `nixedit` binary.

#[macro_use]
extern crate log;

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use nixconf::{EditorConfig, Session};

use crate::cli::{Cli, Commands};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        error!("{err:?}");
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        config,
        configuration,
        command,
    } = Cli::parse();

    if let Commands::Schema = command {
        return commands::schema();
    }

    let session = Session::new(load_config(config.as_deref(), configuration)?);
    match command {
        Commands::Children { attribute } => commands::children(&session, attribute.as_deref()),
        Commands::Show { attribute } => commands::show(&session, &attribute),
        Commands::Nav { attribute } => commands::nav(&session, &attribute),
        Commands::Set(args) => commands::set(&session, &args),
        Commands::Errors => commands::errors(&session),
        Commands::Schema => commands::schema(),
    }
}

/// File settings, then the environment, then the command line.
fn load_config(
    path: Option<&std::path::Path>,
    configuration: Option<std::path::PathBuf>,
) -> Result<EditorConfig> {
    let mut config = match path {
        Some(path) => EditorConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EditorConfig::default(),
    };
    config.apply_env();
    if let Some(configuration) = configuration {
        config.configuration_path = configuration;
    }
    debug!("editing {}", config.configuration_path.display());
    Ok(config)
}
