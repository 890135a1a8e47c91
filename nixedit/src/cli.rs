//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Browse and edit NixOS configuration options.
#[derive(Parser, Debug)]
#[command(name = "nixedit", version, about)]
pub struct Cli {
    /// Editor configuration file (`.toml` or `.json`).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration file to edit, overriding the editor configuration.
    #[arg(long, global = true, value_name = "PATH")]
    pub configuration: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the children of an attribute, largest first.
    Children {
        /// Attribute to list; the root when omitted.
        #[arg(value_name = "ATTR")]
        attribute: Option<String>,
    },
    /// Show everything known about one option.
    Show {
        /// Option attribute path.
        #[arg(value_name = "ATTR")]
        attribute: String,
    },
    /// Follow single-child branches down from an attribute.
    Nav {
        /// Starting attribute.
        #[arg(value_name = "ATTR")]
        attribute: String,
    },
    /// Set option definitions and save the result.
    Set(SetArgs),
    /// List options whose configured expression failed to evaluate.
    Errors,
    /// Print the JSON schema of the editor configuration.
    Schema,
}

/// Arguments for `set`.
#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    /// Assignments such as `networking.hostName="box"`. An empty
    /// expression removes the definition.
    #[arg(value_name = "ATTR=EXPR", num_args = 1.., required = true)]
    pub assignments: Vec<String>,

    /// Show the changes without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}
