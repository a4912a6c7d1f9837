//! API key management commands
//!
//! Issues and administers tenant credentials. Issuance prints the
//! secret exactly once; it cannot be recovered afterwards.

use clap::{Args, Subcommand};
use colored::Colorize;
use mailroom_auth::{ApiKeyService, AuthCache, IssueKeyRequest};
use mailroom_core::MailroomConfig;
use std::sync::Arc;
use tracing::debug;

/// Output format for API key commands
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors and formatting
    #[default]
    Text,
    /// JSON output for automation and scripting
    Json,
}

#[derive(Args)]
pub struct ApiKeyCommand {
    /// Database connection URL
    #[arg(long, env = "MAILROOM_DATABASE_URL")]
    pub database_url: String,

    /// Require administrative approval before new keys authenticate
    #[arg(long, env = "MAILROOM_REQUIRE_APPROVAL", default_value_t = false)]
    pub require_approval: bool,

    /// Output format: text (human-readable) or json (machine-readable)
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub output_format: OutputFormat,

    #[command(subcommand)]
    pub action: ApiKeyAction,
}

#[derive(Subcommand)]
pub enum ApiKeyAction {
    /// Issue a new API key for a tenant
    Issue {
        /// Tenant the key belongs to
        #[arg(long)]
        tenant: String,

        /// SMTP sender address for the tenant's outbound email
        #[arg(long)]
        sender_address: Option<String>,

        /// SMTP sender secret for the tenant's outbound email
        #[arg(long)]
        sender_secret: Option<String>,
    },
    /// Approve a tenant's pending key
    Approve {
        #[arg(long)]
        tenant: String,
    },
    /// Deactivate a key without deleting it
    Deactivate {
        #[arg(long)]
        id: i32,
    },
    /// Reactivate a previously deactivated key
    Reactivate {
        #[arg(long)]
        id: i32,
    },
    /// Permanently delete a key
    Revoke {
        #[arg(long)]
        id: i32,
    },
    /// List issued keys
    List {
        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long, default_value_t = 20)]
        page_size: u64,
    },
}

impl ApiKeyCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let db = rt.block_on(mailroom_database::establish_connection(&self.database_url))?;

        let config = MailroomConfig::default();
        let cache = Arc::new(AuthCache::new(
            config.positive_cache_ttl(),
            config.negative_cache_ttl(),
        ));
        let service = ApiKeyService::new(db, cache, self.require_approval);

        match self.action {
            ApiKeyAction::Issue {
                tenant,
                sender_address,
                sender_secret,
            } => {
                debug!("Issuing API key for tenant: {}", tenant);
                let response = rt
                    .block_on(service.issue_key(IssueKeyRequest {
                        tenant,
                        sender_address,
                        sender_secret,
                    }))
                    .map_err(|e| anyhow::anyhow!("Failed to issue API key: {}", e))?;

                match self.output_format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&response)?);
                    }
                    OutputFormat::Text => {
                        println!();
                        println!(
                            "{}",
                            "   API key issued successfully!".bright_white().bold()
                        );
                        println!();
                        println!(
                            "{:>14} {}",
                            "Tenant:".bright_white().bold(),
                            response.tenant.bright_cyan()
                        );
                        println!(
                            "{:>14} {}",
                            "Key Prefix:".bright_white().bold(),
                            response.key_prefix.bright_cyan()
                        );
                        println!(
                            "{:>14} {}",
                            "Approved:".bright_white().bold(),
                            response.is_approved.to_string().bright_cyan()
                        );
                        println!();
                        println!(
                            "{:>14} {}",
                            "API Key:".bright_white().bold(),
                            response.api_key.bright_yellow().bold()
                        );
                        println!();
                        println!(
                            "{}",
                            "IMPORTANT: Save this API key now!".bright_yellow().bold()
                        );
                        println!(
                            "{}",
                            "This is the only time it will be displayed.".bright_white()
                        );
                        println!();
                        if !response.is_approved {
                            println!(
                                "{}",
                                "The key is pending approval and will not authenticate yet."
                                    .bright_yellow()
                            );
                            println!();
                        }
                    }
                }
            }
            ApiKeyAction::Approve { tenant } => {
                let response = rt
                    .block_on(service.approve_tenant(&tenant))
                    .map_err(|e| anyhow::anyhow!("Failed to approve tenant: {}", e))?;
                print_key(&self.output_format, &response)?;
            }
            ApiKeyAction::Deactivate { id } => {
                let response = rt
                    .block_on(service.deactivate_key(id))
                    .map_err(|e| anyhow::anyhow!("Failed to deactivate key: {}", e))?;
                print_key(&self.output_format, &response)?;
            }
            ApiKeyAction::Reactivate { id } => {
                let response = rt
                    .block_on(service.reactivate_key(id))
                    .map_err(|e| anyhow::anyhow!("Failed to reactivate key: {}", e))?;
                print_key(&self.output_format, &response)?;
            }
            ApiKeyAction::Revoke { id } => {
                rt.block_on(service.revoke_key(id))
                    .map_err(|e| anyhow::anyhow!("Failed to revoke key: {}", e))?;
                match self.output_format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::json!({ "revoked": id }));
                    }
                    OutputFormat::Text => {
                        println!("Key {} revoked.", id.to_string().bright_cyan());
                    }
                }
            }
            ApiKeyAction::List { page, page_size } => {
                let response = rt
                    .block_on(service.list_keys(page, page_size))
                    .map_err(|e| anyhow::anyhow!("Failed to list keys: {}", e))?;

                match self.output_format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&response)?);
                    }
                    OutputFormat::Text => {
                        println!();
                        println!(
                            "{:<6} {:<20} {:<10} {:<8} {:<9} {}",
                            "ID".bright_white().bold(),
                            "Tenant".bright_white().bold(),
                            "Prefix".bright_white().bold(),
                            "Active".bright_white().bold(),
                            "Approved".bright_white().bold(),
                            "Created".bright_white().bold()
                        );
                        for key in &response.api_keys {
                            println!(
                                "{:<6} {:<20} {:<10} {:<8} {:<9} {}",
                                key.id,
                                key.tenant.bright_cyan(),
                                key.key_prefix,
                                key.is_active,
                                key.is_approved,
                                key.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                            );
                        }
                        println!();
                        println!("Total: {}", response.total.to_string().bright_cyan());
                        println!();
                    }
                }
            }
        }

        Ok(())
    }
}

fn print_key(
    format: &OutputFormat,
    response: &mailroom_auth::ApiKeyResponse,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?);
        }
        OutputFormat::Text => {
            println!(
                "Key {} (tenant {}): active={}, approved={}",
                response.id.to_string().bright_cyan(),
                response.tenant.bright_cyan(),
                response.is_active,
                response.is_approved
            );
        }
    }
    Ok(())
}
