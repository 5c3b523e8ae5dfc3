use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use propstore::Properties;
use propstore::cli::{Cli, Command};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn print_properties(props: &Properties, prefix: &str) {
    let matching = props.get_properties_for_prefix(prefix);
    if matching.is_empty() {
        println!("No properties found");
        return;
    }
    for (key, value) in matching {
        println!("{} = {}", key.cyan(), value);
    }
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let props = Properties::new();
    for file in &cli.file {
        props
            .load(file)
            .with_context(|| format!("Failed to load property file {}", file.display()))?;
    }

    info!("propstore loaded {} properties", props.len());

    match cli.command {
        Command::Parse { prefix, options } => {
            let prefix = prefix.unwrap_or_else(|| propstore::RUNTIME_PREFIX.to_string());
            let remaining = props
                .parse_command_line_options(&prefix, &options)
                .context("Failed to parse options")?;
            if prefix == propstore::RUNTIME_PREFIX {
                props.load_config().context("Failed to load Comm.Config files")?;
            }
            print_properties(&props, "");
            if !remaining.is_empty() {
                println!("{} {}", "Unparsed:".yellow(), remaining.join(" "));
            }
        }
        Command::Get { key, default } => {
            let value = props.get_property_with_default(&key, default.as_deref().unwrap_or(""));
            println!("{}", value);
        }
        Command::List { prefix } => {
            print_properties(&props, prefix.as_deref().unwrap_or(""));
        }
    }

    Ok(())
}
