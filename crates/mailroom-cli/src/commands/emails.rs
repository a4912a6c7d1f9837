//! Email ledger inspection commands

use clap::{Args, Subcommand};
use colored::Colorize;
use mailroom_email::EmailLedger;
use std::sync::Arc;

#[derive(Args)]
pub struct EmailsCommand {
    /// Database connection URL
    #[arg(long, env = "MAILROOM_DATABASE_URL")]
    pub database_url: String,

    #[command(subcommand)]
    pub action: EmailsAction,
}

#[derive(Subcommand)]
pub enum EmailsAction {
    /// Ledger counts by status
    Stats,
    /// Most recently recorded emails
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

impl EmailsCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let db = rt.block_on(mailroom_database::establish_connection(&self.database_url))?;
        let ledger = Arc::new(EmailLedger::new(db));

        match self.action {
            EmailsAction::Stats => {
                let stats = rt
                    .block_on(ledger.stats())
                    .map_err(|e| anyhow::anyhow!("Failed to load ledger stats: {}", e))?;

                println!();
                println!("{:>10} {}", "Total:".bright_white().bold(), stats.total);
                println!(
                    "{:>10} {}",
                    "Pending:".bright_white().bold(),
                    stats.pending.to_string().bright_yellow()
                );
                println!(
                    "{:>10} {}",
                    "Sent:".bright_white().bold(),
                    stats.sent.to_string().bright_green()
                );
                println!(
                    "{:>10} {}",
                    "Failed:".bright_white().bold(),
                    stats.failed.to_string().bright_red()
                );
                println!("{:>10} {}", "Today:".bright_white().bold(), stats.today);
                println!();
            }
            EmailsAction::Recent { limit } => {
                let records = rt
                    .block_on(ledger.recent(limit))
                    .map_err(|e| anyhow::anyhow!("Failed to load recent emails: {}", e))?;

                println!();
                for record in records {
                    let status = match record.status.as_str() {
                        "sent" => record.status.bright_green(),
                        "failed" => record.status.bright_red(),
                        _ => record.status.bright_yellow(),
                    };
                    println!(
                        "{} {:<8} {:<20} {:<30} {}",
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        status,
                        record.tenant.bright_cyan(),
                        record.recipient,
                        record.subject
                    );
                    if let Some(error) = record.error_message {
                        println!("{:>28}{}", "", error.bright_red());
                    }
                }
                println!();
            }
        }

        Ok(())
    }
}
