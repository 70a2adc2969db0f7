//! Audit trail and alert review commands

use anyhow::{Context as _, Result};
use clap::Parser;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use vigil_core::audit::{AckOutcome, AlertQuery, AuditQuery, Severity};

use crate::Context;

#[derive(Parser, Debug)]
pub enum AuditCommand {
    /// Most recent entries, newest first
    Read {
        #[clap(long, default_value_t = 100)]
        limit: usize,

        #[clap(long)]
        action_type: Option<String>,

        /// Only entries recorded for this user
        #[clap(long)]
        actor: Option<String>,
    },

    /// Counts by action type and user
    Stats,
}

#[derive(Parser, Debug)]
pub enum AlertsCommand {
    /// Most recent alerts, newest first
    Read {
        #[clap(long, default_value_t = 50)]
        limit: usize,

        /// info, warning or critical
        #[clap(long)]
        severity: Option<Severity>,

        /// Only alerts nobody has acknowledged
        #[clap(long)]
        unacknowledged: bool,
    },

    /// Counts by severity and type
    Stats,

    /// Mark an alert as handled
    Ack {
        id: String,

        /// Who is acknowledging
        #[clap(long = "by")]
        by: String,
    },
}

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "User")]
    actor: String,
    #[tabled(rename = "Details")]
    details: String,
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Type")]
    alert_type: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Ack")]
    acknowledged: String,
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn render<T: Tabled>(rows: &[T]) -> String {
    Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string()
}

impl AuditCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let plane = ctx.plane()?;
        let audit = plane.audit();

        match self {
            AuditCommand::Read {
                limit,
                action_type,
                actor,
            } => {
                let entries = audit
                    .query(&AuditQuery {
                        limit: *limit,
                        action_type: action_type.clone(),
                        actor: actor.clone(),
                    })
                    .context("Failed to read audit log")?;

                if ctx.json {
                    return ctx.print_json(&entries);
                }
                if entries.is_empty() {
                    println!("No audit entries found");
                    return Ok(());
                }
                let rows: Vec<AuditRow> = entries
                    .iter()
                    .map(|e| AuditRow {
                        timestamp: e.timestamp.clone(),
                        action: e.action_type.clone(),
                        actor: e.actor.clone(),
                        details: truncate(&e.details.to_string(), 60),
                    })
                    .collect();
                println!("{}", render(&rows));
                Ok(())
            }
            AuditCommand::Stats => {
                let stats = audit.stats().context("Failed to read audit log")?;
                if ctx.json {
                    return ctx.print_json(&stats);
                }
                println!("Total entries: {}", stats.total);
                if let (Some(first), Some(last)) = (&stats.first_ts, &stats.last_ts) {
                    println!("Range:         {first} .. {last}");
                }
                println!("By action type:");
                for (action, count) in &stats.by_type {
                    println!("   {action}: {count}");
                }
                println!("By user:");
                for (actor, count) in &stats.by_actor {
                    println!("   {actor}: {count}");
                }
                Ok(())
            }
        }
    }
}

impl AlertsCommand {
    pub async fn execute(&self, ctx: &Context) -> Result<()> {
        let plane = ctx.plane()?;
        let alerts = plane.alerts();

        match self {
            AlertsCommand::Read {
                limit,
                severity,
                unacknowledged,
            } => {
                let found = alerts
                    .read(&AlertQuery {
                        limit: *limit,
                        severity: *severity,
                        acknowledged: unacknowledged.then_some(false),
                    })
                    .context("Failed to read alert log")?;

                if ctx.json {
                    return ctx.print_json(&found);
                }
                if found.is_empty() {
                    println!("No alerts found");
                    return Ok(());
                }
                let rows: Vec<AlertRow> = found
                    .iter()
                    .map(|a| AlertRow {
                        id: a.id.clone(),
                        timestamp: a.timestamp.clone(),
                        severity: a.severity.to_string(),
                        alert_type: a.alert_type.clone(),
                        message: truncate(&a.message, 60),
                        acknowledged: if a.acknowledged { "yes" } else { "no" }.to_string(),
                    })
                    .collect();
                println!("{}", render(&rows));
                Ok(())
            }
            AlertsCommand::Stats => {
                let stats = alerts.stats().context("Failed to read alert log")?;
                if ctx.json {
                    return ctx.print_json(&stats);
                }
                println!("Total alerts:   {}", stats.total);
                println!("   critical:    {}", stats.critical);
                println!("   warning:     {}", stats.warning);
                println!("   info:        {}", stats.info);
                println!("Unacknowledged: {}", stats.unacknowledged);
                if let Some(latest) = &stats.latest {
                    println!("Latest:         {latest}");
                }
                Ok(())
            }
            AlertsCommand::Ack { id, by } => {
                let outcome = alerts
                    .acknowledge(id, by)
                    .context("Failed to update alert log")?;
                match outcome {
                    AckOutcome::Acknowledged => {
                        println!("✅ Alert {id} acknowledged by {by}");
                        Ok(())
                    }
                    AckOutcome::AlreadyAcknowledged => {
                        println!("Alert {id} was already acknowledged");
                        Ok(())
                    }
                    AckOutcome::NotFound => anyhow::bail!("No alert with id {id}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
