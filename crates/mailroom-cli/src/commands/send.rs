//! One-off email submission
//!
//! Runs the full intake and delivery path in-process: the submission
//! is authenticated, recorded in the ledger, and delivered by a local
//! worker before the command returns.

use clap::Args;
use colored::Colorize;
use mailroom_auth::{ApiKeyService, AuthCache};
use mailroom_core::{MailroomConfig, RetryPolicy, RetrySettings};
use mailroom_delivery::{
    DeliveryContext, DeliveryWorkerPool, SenderConnectionPool, SmtpTransportFactory,
    TemplateRenderer,
};
use mailroom_email::{EmailLedger, IntakeService, SubmitEmailRequest};
use mailroom_queue::DispatchQueueService;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Args)]
pub struct SendCommand {
    /// Database connection URL
    #[arg(long, env = "MAILROOM_DATABASE_URL")]
    pub database_url: String,

    /// API key authenticating the submission
    #[arg(long, env = "MAILROOM_API_KEY")]
    pub api_key: String,

    /// SMTP relay host
    #[arg(long, env = "MAILROOM_SMTP_HOST")]
    pub smtp_host: String,

    /// SMTP relay port
    #[arg(long, env = "MAILROOM_SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    /// Directory of HTML templates, registered under their file stem
    #[arg(long, env = "MAILROOM_TEMPLATES_DIR")]
    pub templates_dir: Option<PathBuf>,

    /// Recipient address
    #[arg(long)]
    pub to: String,

    /// Message subject
    #[arg(long)]
    pub subject: String,

    /// Template name
    #[arg(long)]
    pub template: String,

    /// Template data as a JSON object
    #[arg(long, default_value = "{}")]
    pub data: String,

    /// Recipient domains accepted by intake (comma-separated; empty
    /// accepts any domain)
    #[arg(long, env = "MAILROOM_ALLOWED_DOMAINS", value_delimiter = ',')]
    pub allowed_domains: Option<Vec<String>>,

    /// Seconds to wait for the delivery to reach a terminal status
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

impl SendCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let data: serde_json::Value = serde_json::from_str(&self.data)
            .map_err(|e| anyhow::anyhow!("--data is not valid JSON: {}", e))?;

        let rt = tokio::runtime::Runtime::new()?;
        let db = rt.block_on(mailroom_database::establish_connection(&self.database_url))?;

        let config = MailroomConfig::default();
        let cache = Arc::new(AuthCache::new(
            config.positive_cache_ttl(),
            config.negative_cache_ttl(),
        ));
        let auth = Arc::new(ApiKeyService::new(db.clone(), cache, false));
        let ledger = Arc::new(EmailLedger::new(db));

        let renderer = Arc::new(super::worker::load_templates(self.templates_dir.as_deref())?);
        let transports = Arc::new(SenderConnectionPool::new(Arc::new(
            SmtpTransportFactory::new(&self.smtp_host, self.smtp_port),
        )));

        let (queue, receiver) = DispatchQueueService::create_channel(16);

        let intake = IntakeService::new(
            ledger.clone(),
            auth,
            Arc::new(queue.clone()),
            RetrySettings::new(RetryPolicy::default()),
            self.allowed_domains.clone().unwrap_or_default(),
        );

        rt.block_on(async {
            let context = DeliveryContext {
                ledger: ledger.clone(),
                renderer,
                transports,
                queue,
            };
            let pool = DeliveryWorkerPool::start(1, receiver, context);

            let response = intake
                .submit(
                    &self.api_key,
                    SubmitEmailRequest {
                        to: self.to.clone(),
                        subject: self.subject.clone(),
                        template: self.template.clone(),
                        data,
                    },
                )
                .await
                .map_err(|e| anyhow::anyhow!("Submission rejected: {}", e))?;

            debug!("Submission accepted as {}", response.email_id);

            // Poll the ledger until the worker settles the delivery
            let deadline = tokio::time::Instant::now() + Duration::from_secs(self.timeout_secs);
            let record = loop {
                let record = ledger
                    .get(response.email_id)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to read ledger: {}", e))?;
                if record.status != "pending" {
                    break record;
                }
                if tokio::time::Instant::now() >= deadline {
                    break record;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            };

            pool.shutdown().await;

            match record.status.as_str() {
                "sent" => {
                    println!(
                        "{} {} ({})",
                        "Delivered".bright_green().bold(),
                        record.recipient.bright_cyan(),
                        record.id
                    );
                    Ok(())
                }
                "failed" => Err(anyhow::anyhow!(
                    "Delivery failed: {}",
                    record
                        .error_message
                        .unwrap_or_else(|| "unknown error".to_string())
                )),
                _ => Err(anyhow::anyhow!(
                    "Delivery still pending after {} seconds (id {})",
                    self.timeout_secs,
                    record.id
                )),
            }
        })
    }
}
