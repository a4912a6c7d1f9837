use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mailroom_core::async_trait::async_trait;
use mailroom_core::{DeliveryJob, DispatchQueue, QueueError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use crate::dead_letter::DeadLetterStore;

#[derive(Error, Debug)]
pub enum QueueServiceError {
    #[error("Failed to send job to queue: {details}")]
    QueueSendError { details: String },

    #[error("Queue channel closed")]
    QueueChannelClosed,

    #[error("Invalid job data: {details}")]
    InvalidJobData { details: String },
}

impl<T> From<mpsc::error::SendError<T>> for QueueServiceError {
    fn from(_err: mpsc::error::SendError<T>) -> Self {
        QueueServiceError::QueueChannelClosed
    }
}

/// Point-in-time counters for queue activity
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueueStats {
    pub enqueued: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Channel-backed dispatch queue
///
/// Jobs flow through a bounded mpsc channel to the worker pool. Retry
/// redelivery re-enters through the same channel after a backoff delay,
/// and exhausted jobs land in the dead-letter store.
#[derive(Clone)]
pub struct DispatchQueueService {
    job_sender: mpsc::Sender<DeliveryJob>,
    counters: Arc<Counters>,
    dead_letters: Arc<DeadLetterStore>,
}

impl DispatchQueueService {
    pub fn new(job_sender: mpsc::Sender<DeliveryJob>) -> Self {
        Self {
            job_sender,
            counters: Arc::new(Counters::default()),
            dead_letters: Arc::new(DeadLetterStore::new()),
        }
    }

    pub fn create_channel(
        buffer_size: usize,
    ) -> (DispatchQueueService, mpsc::Receiver<DeliveryJob>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (DispatchQueueService::new(sender), receiver)
    }

    /// Enqueue a freshly accepted delivery
    pub async fn enqueue_delivery(&self, job: DeliveryJob) -> Result<(), QueueServiceError> {
        if job.to.is_empty() {
            return Err(QueueServiceError::InvalidJobData {
                details: "Recipient cannot be empty".to_string(),
            });
        }

        info!("Queueing delivery job: {}", job);
        self.job_sender.send(job).await.map_err(|e| {
            error!("Failed to queue delivery job: {}", e);
            QueueServiceError::QueueSendError {
                details: e.to_string(),
            }
        })?;

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Put a job back on the queue for another attempt
    pub async fn requeue(&self, job: DeliveryJob) -> Result<(), QueueServiceError> {
        debug!("Requeueing delivery job: {}", job);
        self.job_sender.send(job).await.map_err(|e| {
            error!("Failed to requeue delivery job: {}", e);
            QueueServiceError::QueueSendError {
                details: e.to_string(),
            }
        })?;

        self.counters.requeued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Requeue a job after a delay without blocking the caller
    ///
    /// The send happens from a spawned task; if the channel has closed
    /// by then (shutdown), the job is dropped with an error log.
    pub fn schedule_retry(&self, job: DeliveryJob, delay: Duration) {
        let queue = self.clone();
        debug!(
            "Scheduling retry for {} in {}ms",
            job,
            delay.as_millis()
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.requeue(job).await {
                error!("Dropping retry, queue unavailable: {}", e);
            }
        });
    }

    /// Record a job whose attempts are exhausted
    pub async fn dead_letter(&self, job: DeliveryJob, reason: String) {
        error!("Dead-lettering job {} after exhausted attempts: {}", job, reason);
        self.dead_letters.push(job, reason).await;
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dead_letters(&self) -> Arc<DeadLetterStore> {
        Arc::clone(&self.dead_letters)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DispatchQueue for DispatchQueueService {
    async fn enqueue(&self, job: DeliveryJob) -> Result<(), QueueError> {
        self.enqueue_delivery(job).await.map_err(|e| match e {
            QueueServiceError::QueueChannelClosed => QueueError::ChannelClosed,
            QueueServiceError::InvalidJobData { details } => QueueError::InvalidData(details),
            QueueServiceError::QueueSendError { details } => QueueError::SendError(details),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailroom_core::{RetryPolicy, SenderCredentials};
    use tokio::time::{timeout, Duration};

    fn test_job(to: &str) -> DeliveryJob {
        DeliveryJob {
            email_id: mailroom_core::uuid::Uuid::new_v4(),
            to: to.to_string(),
            subject: "Welcome".to_string(),
            template: "welcome".to_string(),
            data: mailroom_core::serde_json::json!({"name": "Ada"}),
            tenant: "acme".to_string(),
            credentials: SenderCredentials {
                address: "noreply@acme.example".to_string(),
                secret: "secret".to_string(),
            },
            retry: RetryPolicy::default(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let (queue, mut receiver) = DispatchQueueService::create_channel(10);

        queue.enqueue_delivery(test_job("a@b.example")).await.unwrap();

        let received = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("Should receive job within timeout")
            .expect("Should receive a job");

        assert_eq!(received.to, "a@b.example");
        assert_eq!(queue.stats().enqueued, 1);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut receiver) = DispatchQueueService::create_channel(10);

        queue.enqueue_delivery(test_job("first@x.example")).await.unwrap();
        queue.enqueue_delivery(test_job("second@x.example")).await.unwrap();
        queue.enqueue_delivery(test_job("third@x.example")).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().to, "first@x.example");
        assert_eq!(receiver.recv().await.unwrap().to, "second@x.example");
        assert_eq!(receiver.recv().await.unwrap().to, "third@x.example");
    }

    #[tokio::test]
    async fn test_empty_recipient_rejected() {
        let (queue, _receiver) = DispatchQueueService::create_channel(10);

        let result = queue.enqueue_delivery(test_job("")).await;

        assert!(matches!(
            result,
            Err(QueueServiceError::InvalidJobData { .. })
        ));
        assert_eq!(queue.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn test_closed_channel_reports_send_error() {
        let (queue, receiver) = DispatchQueueService::create_channel(10);
        drop(receiver);

        let result = queue.enqueue_delivery(test_job("a@b.example")).await;

        assert!(matches!(
            result,
            Err(QueueServiceError::QueueSendError { .. })
        ));
    }

    #[tokio::test]
    async fn test_clone_shares_counters() {
        let (queue, mut receiver) = DispatchQueueService::create_channel(10);
        let cloned = queue.clone();

        queue.enqueue_delivery(test_job("a@b.example")).await.unwrap();
        cloned.enqueue_delivery(test_job("c@d.example")).await.unwrap();

        receiver.recv().await.unwrap();
        receiver.recv().await.unwrap();

        assert_eq!(queue.stats().enqueued, 2);
        assert_eq!(cloned.stats().enqueued, 2);
    }

    #[tokio::test]
    async fn test_schedule_retry_redelivers_after_delay() {
        let (queue, mut receiver) = DispatchQueueService::create_channel(10);

        queue.schedule_retry(test_job("retry@x.example"), Duration::from_millis(30));

        let received = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("Should receive retried job within timeout")
            .expect("Should receive a job");

        assert_eq!(received.to, "retry@x.example");
        assert_eq!(queue.stats().requeued, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_records_job() {
        let (queue, _receiver) = DispatchQueueService::create_channel(10);

        queue
            .dead_letter(test_job("dead@x.example"), "connection refused".to_string())
            .await;

        let letters = queue.dead_letters().all().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job.to, "dead@x.example");
        assert_eq!(letters[0].reason, "connection refused");
        assert_eq!(queue.stats().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_dispatch_queue_trait_enqueue() {
        let (queue, mut receiver) = DispatchQueueService::create_channel(10);
        let queue: Arc<dyn DispatchQueue> = Arc::new(queue);

        queue.enqueue(test_job("trait@x.example")).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap().to, "trait@x.example");
    }
}
