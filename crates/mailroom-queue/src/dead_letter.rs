//! Retention for deliveries whose attempts are exhausted

use chrono::Utc;
use mailroom_core::{DeliveryJob, UtcDateTime};
use tokio::sync::Mutex;

/// A delivery that exhausted its retry budget
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: DeliveryJob,
    pub reason: String,
    pub failed_at: UtcDateTime,
}

/// In-memory dead-letter retention
///
/// Entries are kept for inspection and are never removed automatically;
/// `drain` hands them over for manual reprocessing.
#[derive(Default)]
pub struct DeadLetterStore {
    letters: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, job: DeliveryJob, reason: String) {
        let mut letters = self.letters.lock().await;
        letters.push(DeadLetter {
            job,
            reason,
            failed_at: Utc::now(),
        });
    }

    pub async fn all(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.letters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.lock().await.is_empty()
    }

    /// Remove and return all retained letters
    pub async fn drain(&self) -> Vec<DeadLetter> {
        let mut letters = self.letters.lock().await;
        std::mem::take(&mut *letters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailroom_core::{RetryPolicy, SenderCredentials};

    fn test_job() -> DeliveryJob {
        DeliveryJob {
            email_id: mailroom_core::uuid::Uuid::new_v4(),
            to: "user@example.com".to_string(),
            subject: "Hi".to_string(),
            template: "welcome".to_string(),
            data: mailroom_core::serde_json::json!({}),
            tenant: "acme".to_string(),
            credentials: SenderCredentials {
                address: "noreply@acme.example".to_string(),
                secret: "secret".to_string(),
            },
            retry: RetryPolicy::default(),
            attempt: 3,
        }
    }

    #[tokio::test]
    async fn test_push_and_inspect() {
        let store = DeadLetterStore::new();

        store.push(test_job(), "smtp timeout".to_string()).await;

        assert_eq!(store.len().await, 1);
        let letters = store.all().await;
        assert_eq!(letters[0].reason, "smtp timeout");
    }

    #[tokio::test]
    async fn test_drain_empties_store() {
        let store = DeadLetterStore::new();

        store.push(test_job(), "a".to_string()).await;
        store.push(test_job(), "b".to_string()).await;

        let drained = store.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(store.is_empty().await);
    }
}
