//! Delivery job types and the dispatch queue abstraction

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::RetryPolicy;

/// Sender credentials resolved at accept time.
///
/// A copy travels with every queue entry so an in-flight job completes
/// under the credentials that were valid when it was accepted, even if
/// the tenant's credential is revoked afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderCredentials {
    pub address: String,
    pub secret: String,
}

/// One email-send job as carried through the dispatch queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Ledger correlation key
    pub email_id: Uuid,
    pub to: String,
    pub subject: String,
    pub template: String,
    pub data: serde_json::Value,
    /// Owning tenant
    pub tenant: String,
    pub credentials: SenderCredentials,
    pub retry: RetryPolicy,
    /// 1-based number of the delivery attempt this entry represents
    pub attempt: u32,
}

impl DeliveryJob {
    /// Whether another delivery attempt is permitted after this one
    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.retry.max_attempts
    }

    /// The entry to redeliver after a failed attempt
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

impl fmt::Display for DeliveryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeliveryJob(email_id: {}, tenant: {}, to: {}, attempt: {}/{})",
            self.email_id, self.tenant, self.to, self.attempt, self.retry.max_attempts
        )
    }
}

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to send job: {0}")]
    SendError(String),
    #[error("Failed to receive job: {0}")]
    ReceiveError(String),
    #[error("Queue channel closed")]
    ChannelClosed,
    #[error("Invalid job data: {0}")]
    InvalidData(String),
}

/// Core trait for the dispatch queue seam.
///
/// The intake handler only depends on this; the concrete queueing
/// technology (and its retry bookkeeping) lives behind it.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Append a job to the queue. Must not block on delivery.
    async fn enqueue(&self, job: DeliveryJob) -> Result<(), QueueError>;
}
