//! Delivery worker command
//!
//! Runs the worker pool against the configured SMTP relay. Ledger
//! rows still marked `pending` are requeued at startup so deliveries
//! interrupted by a previous shutdown are picked up again.

use clap::Args;
use mailroom_core::{DeliveryJob, RetryPolicy, SenderCredentials};
use mailroom_delivery::{
    DeliveryContext, DeliveryWorkerPool, SenderConnectionPool, SmtpTransportFactory,
    TemplateRenderer,
};
use mailroom_email::EmailLedger;
use mailroom_queue::DispatchQueueService;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args)]
pub struct WorkerCommand {
    /// Database connection URL
    #[arg(long, env = "MAILROOM_DATABASE_URL")]
    pub database_url: String,

    /// SMTP relay host
    #[arg(long, env = "MAILROOM_SMTP_HOST")]
    pub smtp_host: String,

    /// SMTP relay port
    #[arg(long, env = "MAILROOM_SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    /// Directory of HTML templates, registered under their file stem
    #[arg(long, env = "MAILROOM_TEMPLATES_DIR")]
    pub templates_dir: Option<PathBuf>,

    /// Number of concurrent delivery workers
    #[arg(long, env = "MAILROOM_WORKER_CONCURRENCY", default_value_t = 5)]
    pub concurrency: usize,

    /// Dispatch queue channel capacity
    #[arg(long, env = "MAILROOM_QUEUE_CAPACITY", default_value_t = 1000)]
    pub queue_capacity: usize,

    /// Maximum delivery attempts per email (clamped to 1-5)
    #[arg(long, env = "MAILROOM_RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    pub retry_max_attempts: u32,

    /// Base backoff between attempts, in milliseconds
    #[arg(long, env = "MAILROOM_RETRY_BACKOFF_MS", default_value_t = 5000)]
    pub retry_backoff_ms: u64,
}

impl WorkerCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let db = rt.block_on(mailroom_database::establish_connection(&self.database_url))?;

        let ledger = Arc::new(EmailLedger::new(db.clone()));
        let renderer = Arc::new(load_templates(self.templates_dir.as_deref())?);
        let transports = Arc::new(SenderConnectionPool::new(Arc::new(
            SmtpTransportFactory::new(&self.smtp_host, self.smtp_port),
        )));

        let (queue, receiver) = DispatchQueueService::create_channel(self.queue_capacity);

        let retry = RetryPolicy::new(self.retry_max_attempts, self.retry_backoff_ms);

        rt.block_on(async {
            let requeued = requeue_pending(&db, &queue, retry).await?;
            if requeued > 0 {
                info!("Requeued {} pending emails from the ledger", requeued);
            }

            let context = DeliveryContext {
                ledger,
                renderer,
                transports,
                queue,
            };

            let pool = DeliveryWorkerPool::start(self.concurrency, receiver, context);
            info!(
                "Delivery worker pool started with {} workers against {}:{}",
                self.concurrency, self.smtp_host, self.smtp_port
            );

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, draining workers");
            pool.shutdown().await;

            Ok::<_, anyhow::Error>(())
        })?;

        Ok(())
    }
}

pub(crate) fn load_templates(dir: Option<&std::path::Path>) -> anyhow::Result<TemplateRenderer> {
    let mut renderer = TemplateRenderer::new();
    let Some(dir) = dir else {
        return Ok(renderer);
    };

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let body = std::fs::read_to_string(&path)?;
        renderer.register(name, &body);
        info!("Registered template '{}'", name);
    }

    Ok(renderer)
}

/// Rebuild delivery jobs for ledger rows left `pending` by a previous
/// run. Credentials are resolved from the tenant's API key record;
/// rows for tenants without sender credentials are left untouched.
async fn requeue_pending(
    db: &Arc<mailroom_database::DbConnection>,
    queue: &DispatchQueueService,
    retry: RetryPolicy,
) -> anyhow::Result<u64> {
    use mailroom_entities::{api_keys, emails};

    let pending = emails::Entity::find()
        .filter(emails::Column::Status.eq("pending"))
        .all(db.as_ref())
        .await?;

    let mut requeued = 0;
    for email in pending {
        let api_key = api_keys::Entity::find()
            .filter(api_keys::Column::Tenant.eq(&email.tenant))
            .one(db.as_ref())
            .await?;

        let credentials = api_key.and_then(|key| {
            Some(SenderCredentials {
                address: key.sender_address?,
                secret: key.sender_secret?,
            })
        });

        let Some(credentials) = credentials else {
            warn!(
                email_id = %email.id,
                tenant = %email.tenant,
                "Skipping pending email: no sender credentials for tenant"
            );
            continue;
        };

        let job = DeliveryJob {
            email_id: email.id,
            to: email.recipient,
            subject: email.subject,
            template: email.template,
            data: email.data,
            tenant: email.tenant,
            credentials,
            retry,
            attempt: 1,
        };

        queue.enqueue_delivery(job).await?;
        requeued += 1;
    }

    Ok(requeued)
}
