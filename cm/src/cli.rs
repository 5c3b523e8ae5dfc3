//! CLI argument parsing for cm

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cm")]
#[command(author, version, about = "Run and inspect a communicator runtime", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the configured adapters and run until Ctrl-C or a remote shutdown
    Run {
        /// Runtime options, e.g. `-- --Comm.Admin.Endpoints="tcp -p 9999"`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the effective runtime properties
    Props {
        /// Only list keys starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Runtime options applied before printing
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Parse a proxy string and print its canonical form
    Proxy {
        /// Proxy string, e.g. `"printer:tcp -h localhost -p 10000"`
        #[arg(required = true, allow_hyphen_values = true)]
        proxy: String,
    },

    /// Parse an identity string and print its canonical form
    Identity {
        /// Identity string, e.g. `office/printer`
        #[arg(required = true)]
        identity: String,
    },
}
