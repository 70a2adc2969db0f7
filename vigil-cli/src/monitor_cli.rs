//! Security monitor commands

use anyhow::{Context as _, Result};
use clap::Parser;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use crate::Context;

#[derive(Parser, Debug)]
pub enum MonitorCommand {
    /// Record current file digests as the trusted baseline
    Baseline,

    /// Run one integrity cycle against the baseline
    Check,

    /// Summary of files, logins, database activity and open alerts
    Overview,

    /// Recent login attempts
    Logins {
        #[clap(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Tabled)]
struct LoginRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "User")]
    username: String,
    #[tabled(rename = "IP")]
    ip_address: String,
    #[tabled(rename = "Result")]
    result: String,
}

impl MonitorCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let mut plane = ctx.plane()?;
        let monitor = plane.attach_monitor().await?;

        let result = match self {
            MonitorCommand::Baseline => {
                let count = monitor.baseline().await.context("Baseline failed")?;
                if ctx.json {
                    ctx.print_json(&serde_json::json!({ "baselined": count }))
                } else {
                    println!(
                        "✅ Baselined {} of {} monitored files",
                        count,
                        monitor.monitored_files().len()
                    );
                    Ok(())
                }
            }
            MonitorCommand::Check => {
                let violations = monitor.check_cycle().await.context("Integrity cycle failed")?;
                if ctx.json {
                    ctx.print_json(&violations)
                } else if violations.is_empty() {
                    println!("✅ All monitored files match their baseline");
                    Ok(())
                } else {
                    for v in &violations {
                        println!("❌ {}: {}", v.file, v.message);
                    }
                    Ok(())
                }
            }
            MonitorCommand::Overview => {
                let overview = monitor.overview().await.context("Failed to build overview")?;
                if ctx.json {
                    ctx.print_json(&overview)
                } else {
                    println!("Files verified:        {}", overview.files_verified);
                    println!("Files modified:        {}", overview.files_modified);
                    println!("Logins (24h):          {} ok / {} failed", overview.logins_successful_24h, overview.logins_failed_24h);
                    println!("DB operations (24h):   {}", overview.db_operations_24h);
                    println!("Unacknowledged alerts: {}", overview.unacknowledged_alerts);
                    Ok(())
                }
            }
            MonitorCommand::Logins { limit } => {
                let attempts = monitor
                    .recent_login_attempts(*limit)
                    .await
                    .context("Failed to read login attempts")?;
                if ctx.json {
                    ctx.print_json(&attempts)
                } else if attempts.is_empty() {
                    println!("No login attempts recorded");
                    Ok(())
                } else {
                    let rows: Vec<LoginRow> = attempts
                        .iter()
                        .map(|a| LoginRow {
                            timestamp: vigil_core::rfc3339(a.timestamp),
                            username: a.username.clone(),
                            ip_address: a.ip_address.clone().unwrap_or_default(),
                            result: if a.success {
                                "success".to_string()
                            } else {
                                format!(
                                    "failed ({})",
                                    a.failure_reason.as_deref().unwrap_or("unknown")
                                )
                            },
                        })
                        .collect();
                    let table = Table::new(&rows)
                        .with(Style::rounded())
                        .with(Modify::new(Rows::first()).with(Alignment::center()))
                        .to_string();
                    println!("{table}");
                    Ok(())
                }
            }
        };

        monitor.store().close().await;
        result
    }
}
