//! Vigil - operator CLI for the trust & integrity control plane

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vigil_core::config::VigilConfig;
use vigil_core::plane::ControlPlane;

pub mod audit_cli;
pub mod license_cli;
pub mod manifest_cli;
pub mod monitor_cli;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "vigil",
    about = "Code integrity, licensing and security audit control plane",
    version
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,

    /// JSON config file (defaults to the per-user config location if present)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Set log level
    #[clap(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// Structured JSON output for logs and results
    #[clap(long, global = true)]
    pub json: bool,

    /// Override the data directory (logs, caches, SQLite store)
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the deployment root
    #[clap(long, global = true)]
    pub deploy_root: Option<PathBuf>,

    /// Never contact the remote authority
    #[clap(long, global = true)]
    pub offline: bool,
}

#[derive(Parser, Debug)]
pub enum Command {
    /// Build, verify or inspect the integrity manifest
    Manifest {
        #[clap(subcommand)]
        command: manifest_cli::ManifestCommand,
    },

    /// Validate or generate license keys
    License {
        #[clap(subcommand)]
        command: license_cli::LicenseCommand,
    },

    /// Read the audit trail
    Audit {
        #[clap(subcommand)]
        command: audit_cli::AuditCommand,
    },

    /// Review and acknowledge security alerts
    Alerts {
        #[clap(subcommand)]
        command: audit_cli::AlertsCommand,
    },

    /// File baselines, integrity cycles and login activity
    Monitor {
        #[clap(subcommand)]
        command: monitor_cli::MonitorCommand,
    },

    /// Run the startup checks (integrity + license) and report
    Status,
}

/// Everything a command needs: the resolved config and the output mode
pub struct Context {
    pub config: VigilConfig,
    pub json: bool,
}

impl Context {
    /// Layer config file, environment and CLI flags
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config_file = cli.config.clone().or_else(default_config_file);
        debug!("Using config file: {:?}", config_file);

        let mut config = VigilConfig::load(config_file.as_deref())?;
        if let Some(dir) = &cli.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(root) = &cli.deploy_root {
            config.deploy_root = root.clone();
        }
        if cli.offline {
            config.offline = true;
        }

        Ok(Self {
            config,
            json: cli.json,
        })
    }

    pub fn plane(&self) -> Result<ControlPlane> {
        ControlPlane::new(self.config.clone()).context("Failed to initialize control plane")
    }

    /// Print a serializable value as pretty JSON
    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// `vigil.json` in the platform config directory, when it exists
fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "vigil", "vigil")
        .map(|dirs| dirs.config_dir().join("vigil.json"))
        .filter(|path| path.exists())
}

pub fn initialize_tracing(log_level: LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        // Logs go to stderr; stdout carries command results
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::from_cli(&cli)?;

    match &cli.command {
        Command::Manifest { command } => command.execute(&ctx).await,
        Command::License { command } => command.execute(&ctx).await,
        Command::Audit { command } => command.execute(&ctx).await,
        Command::Alerts { command } => command.execute(&ctx).await,
        Command::Monitor { command } => command.execute(&ctx).await,
        Command::Status => status_command(&ctx).await,
    }
}

async fn status_command(ctx: &Context) -> Result<()> {
    let plane = ctx.plane()?;
    let report = plane.startup().await;

    if ctx.json {
        return ctx.print_json(&report);
    }

    println!("Installation: {}", report.installation_id);
    println!("Version:      {}", report.app_version);
    match report.integrity.valid() {
        Some(true) => println!("✅ Integrity: {}", report.integrity.reason),
        Some(false) => println!("❌ Integrity: {}", report.integrity.reason),
        None => println!("⚠️  Integrity: {}", report.integrity.reason),
    }
    if report.license.is_valid() {
        println!(
            "✅ License: {} ({})",
            report.license.status,
            report.license.institution.as_deref().unwrap_or("Unknown")
        );
    } else {
        println!("❌ License: {}", report.license.message);
    }
    for name in &report.insecure_defaults {
        println!("⚠️  {name} is using an insecure development default");
    }

    if report.healthy() {
        Ok(())
    } else {
        anyhow::bail!("Startup checks failed")
    }
}
