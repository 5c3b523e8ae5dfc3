//! CLI argument parsing for propstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ps")]
#[command(author, version, about = "Inspect communicator property files", long_about = None)]
pub struct Cli {
    /// Property files to load before running the command (repeatable)
    #[arg(short, long)]
    pub file: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse `--Comm.*` style options and print the resulting properties
    Parse {
        /// Prefix of the options to consume (default: Comm)
        #[arg(short, long)]
        prefix: Option<String>,

        /// Options to parse, e.g. `-- --Comm.Trace=1 --Comm.Config=app.cfg`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },

    /// Print a single property value
    Get {
        /// Property key
        #[arg(required = true)]
        key: String,

        /// Value printed when the key is not set
        #[arg(short, long)]
        default: Option<String>,
    },

    /// List properties, optionally filtered by prefix
    List {
        /// Only list keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },
}
