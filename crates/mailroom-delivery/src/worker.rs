//! Delivery worker pool
//!
//! A fixed number of workers pull jobs from the shared dispatch
//! channel. Each job is rendered and handed to the tenant's transport;
//! the ledger row moves to `sent` on success or `failed` on error.
//! Failed jobs are redelivered with exponential backoff until their
//! attempt budget runs out, then retained as dead letters.

use crate::connections::SenderConnectionPool;
use crate::renderer::{RenderError, Renderer};
use crate::transport::{DeliveryReceipt, OutboundEmail, TransportError};
use mailroom_core::DeliveryJob;
use mailroom_email::{EmailLedger, EmailStatus};
use mailroom_queue::DispatchQueueService;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
enum DeliveryError {
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Send failed: {0}")]
    Transport(#[from] TransportError),
}

impl DeliveryError {
    fn is_auth(&self) -> bool {
        matches!(self, DeliveryError::Transport(e) if e.is_auth())
    }
}

/// Shared dependencies for delivery workers
#[derive(Clone)]
pub struct DeliveryContext {
    pub ledger: Arc<EmailLedger>,
    pub renderer: Arc<dyn Renderer>,
    pub transports: Arc<SenderConnectionPool>,
    pub queue: DispatchQueueService,
}

pub struct DeliveryWorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl DeliveryWorkerPool {
    /// Spawn `concurrency` workers over the dispatch channel
    pub fn start(
        concurrency: usize,
        receiver: mpsc::Receiver<DeliveryJob>,
        context: DeliveryContext,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));
        let context = Arc::new(context);

        let handles = (0..concurrency.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let context = Arc::clone(&context);
                let shutdown = shutdown.subscribe();
                tokio::spawn(worker_loop(worker_id, receiver, shutdown, context))
            })
            .collect();

        Self { shutdown, handles }
    }

    /// Signal workers to stop and wait for them to drain
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>,
    mut shutdown: watch::Receiver<bool>,
    context: Arc<DeliveryContext>,
) {
    debug!(worker_id, "Delivery worker started");
    loop {
        let job = tokio::select! {
            _ = shutdown.changed() => break,
            job = next_job(&receiver) => match job {
                Some(job) => job,
                None => break, // Channel closed
            },
        };

        process_job(worker_id, &context, job).await;
    }
    debug!(worker_id, "Delivery worker stopped");
}

async fn next_job(receiver: &Arc<Mutex<mpsc::Receiver<DeliveryJob>>>) -> Option<DeliveryJob> {
    let mut receiver = receiver.lock().await;
    receiver.recv().await
}

async fn process_job(worker_id: usize, context: &DeliveryContext, job: DeliveryJob) {
    debug!(worker_id, "Processing {}", job);

    match attempt_delivery(context, &job).await {
        Ok(receipt) => {
            info!(
                worker_id,
                email_id = %job.email_id,
                message_id = %receipt.message_id,
                "Delivered {}",
                job
            );
            context
                .ledger
                .transition(job.email_id, EmailStatus::Sent, None)
                .await;
        }
        Err(e) => {
            if e.is_auth() {
                // Stale or revoked sender credentials; force a fresh
                // transport for the tenant's next delivery
                context.transports.invalidate(&job.tenant).await;
            }

            warn!(worker_id, email_id = %job.email_id, "Delivery failed: {}", e);
            context
                .ledger
                .transition(job.email_id, EmailStatus::Failed, Some(e.to_string()))
                .await;

            if job.attempts_remaining() {
                let delay = job.retry.backoff_for(job.attempt);
                context.queue.schedule_retry(job.next_attempt(), delay);
            } else {
                error!(email_id = %job.email_id, "Attempts exhausted for {}", job);
                context.queue.dead_letter(job, e.to_string()).await;
            }
        }
    }
}

async fn attempt_delivery(
    context: &DeliveryContext,
    job: &DeliveryJob,
) -> Result<DeliveryReceipt, DeliveryError> {
    let rendered = context.renderer.render(&job.template, &job.data).await?;

    let transport = context
        .transports
        .get_or_create(&job.tenant, &job.credentials)
        .await?;

    let email = OutboundEmail {
        from: job.credentials.address.clone(),
        to: job.to.clone(),
        subject: job.subject.clone(),
        html: rendered.html,
        text: rendered.text,
    };

    let receipt = transport.send(&email).await?;
    Ok(receipt)
}
