//! cm - communicator runtime launcher
//!
//! Starts a communicator from a YAML config plus `--Comm.*` options, or
//! inspects the string forms it understands.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use communicator::Communicator;
use communicator::cli::{Cli, Command};
use communicator::config::Config;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("communicator")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("cm.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { args } => cmd_run(&config, args).await,
        Command::Props { prefix, args } => cmd_props(&config, prefix.as_deref().unwrap_or(""), args),
        Command::Proxy { proxy } => cmd_proxy(&config, &proxy),
        Command::Identity { identity } => cmd_identity(&identity),
    }
}

fn start(config: &Config, mut args: Vec<String>) -> Result<(Communicator, Vec<String>)> {
    let init_data = config.to_init_data()?;
    let communicator = communicator::initialize(&mut args, init_data).context("Failed to initialize communicator")?;
    Ok((communicator, args))
}

async fn cmd_run(config: &Config, args: Vec<String>) -> Result<()> {
    debug!(?args, "cmd_run: called");
    let (communicator, remaining) = start(config, args)?;
    if !remaining.is_empty() {
        println!("{} {}", "Ignoring arguments:".yellow(), remaining.join(" "));
    }

    for adapter_config in &config.adapters {
        let adapter = match &adapter_config.endpoints {
            Some(endpoints) => communicator.create_object_adapter_with_endpoints(&adapter_config.name, endpoints),
            None => communicator.create_object_adapter(&adapter_config.name),
        }
        .with_context(|| format!("Failed to create object adapter {}", adapter_config.name))?;
        adapter.activate()?;

        let endpoints: Vec<String> = adapter.published_endpoints().iter().map(ToString::to_string).collect();
        println!("{} {} {}", "✓".green(), adapter.name().cyan(), endpoints.join(":").dimmed());
    }
    if let Some(admin) = communicator.admin()? {
        println!("{} {}", "admin".cyan(), admin);
    }

    let signal_handle = communicator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cmd_run: Ctrl-C received, shutting down");
            request_shutdown(&signal_handle);
        }
    });

    println!("{}", "Running, press Ctrl-C to stop".dimmed());
    communicator.wait_for_shutdown_async().await?;
    communicator.destroy();
    println!("{} Shut down", "✓".green());
    Ok(())
}

/// Ask the communicator to shut down; returns whether the request was accepted
fn request_shutdown(communicator: &Communicator) -> bool {
    match communicator.shutdown() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "request_shutdown: shutdown failed");
            eprintln!("{} {}", "Shutdown failed:".red(), e);
            false
        }
    }
}

fn cmd_props(config: &Config, prefix: &str, args: Vec<String>) -> Result<()> {
    debug!(%prefix, ?args, "cmd_props: called");
    let (communicator, _) = start(config, args)?;
    let properties = communicator.properties().get_properties_for_prefix(prefix);
    communicator.destroy();

    if properties.is_empty() {
        println!("No properties found");
    }
    for (key, value) in properties {
        println!("{} = {}", key.cyan(), value);
    }
    Ok(())
}

fn cmd_proxy(config: &Config, text: &str) -> Result<()> {
    debug!(%text, "cmd_proxy: called");
    let (communicator, _) = start(config, Vec::new())?;
    let parsed = communicator.string_to_proxy(text);
    communicator.destroy();

    match parsed.context("Failed to parse proxy")? {
        Some(proxy) => {
            println!("{}", proxy);
            println!("  {} {}", "identity:".dimmed(), proxy.identity());
            println!("  {} {}", "mode:".dimmed(), proxy.mode());
            if !proxy.adapter_id().is_empty() {
                println!("  {} {}", "adapter:".dimmed(), proxy.adapter_id());
            }
            for endpoint in proxy.endpoints() {
                println!("  {} {}", "endpoint:".dimmed(), endpoint);
            }
        }
        None => println!("{}", "(null proxy)".yellow()),
    }
    Ok(())
}

fn cmd_identity(text: &str) -> Result<()> {
    debug!(%text, "cmd_identity: called");
    let identity = communicator::string_to_identity(text).context("Failed to parse identity")?;
    println!("{}", identity);
    println!("  {} {}", "name:".dimmed(), identity.name);
    println!("  {} {}", "category:".dimmed(), identity.category);
    Ok(())
}
