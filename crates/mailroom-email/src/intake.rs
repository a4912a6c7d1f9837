//! Submission intake: validate, authenticate, record, enqueue
//!
//! The handler accepts a submission only after every check passes;
//! a rejected request never creates a ledger row or a queue entry.
//! Accepted submissions are recorded as `pending` and enqueued with
//! the retry policy in force at accept time.

use mailroom_auth::{ApiKeyService, ApiKeyServiceError};
use mailroom_core::{DeliveryJob, DispatchQueue, RetrySettings};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::IntakeError;
use crate::ledger::{EmailLedger, EmailStatus, RecordEmailRequest};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitEmailRequest {
    #[schema(example = "user@acme.example")]
    pub to: String,
    #[schema(example = "Welcome aboard")]
    pub subject: String,
    #[schema(example = "welcome")]
    pub template: String,
    /// Template substitution values
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitEmailResponse {
    pub email_id: Uuid,
    pub status: EmailStatus,
}

pub struct IntakeService {
    ledger: Arc<EmailLedger>,
    auth: Arc<ApiKeyService>,
    queue: Arc<dyn DispatchQueue>,
    retry_settings: RetrySettings,
    /// Recipient domains accepted; empty means no restriction
    allowed_domains: Vec<String>,
}

impl IntakeService {
    pub fn new(
        ledger: Arc<EmailLedger>,
        auth: Arc<ApiKeyService>,
        queue: Arc<dyn DispatchQueue>,
        retry_settings: RetrySettings,
        allowed_domains: Vec<String>,
    ) -> Self {
        Self {
            ledger,
            auth,
            queue,
            retry_settings,
            allowed_domains,
        }
    }

    /// Accept or reject one submission
    pub async fn submit(
        &self,
        api_key: &str,
        request: SubmitEmailRequest,
    ) -> Result<SubmitEmailResponse, IntakeError> {
        // 1. Required fields
        if request.to.trim().is_empty() {
            return Err(IntakeError::MissingField("to"));
        }
        if request.subject.trim().is_empty() {
            return Err(IntakeError::MissingField("subject"));
        }
        if request.template.trim().is_empty() {
            return Err(IntakeError::MissingField("template"));
        }

        // 2. Recipient shape and domain
        let domain = recipient_domain(&request.to)
            .ok_or_else(|| IntakeError::InvalidRecipient(request.to.clone()))?;

        // 3. Domain allowlist
        if !self.allowed_domains.is_empty()
            && !self
                .allowed_domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&domain))
        {
            return Err(IntakeError::DomainNotAllowed {
                domain,
                allowed: self.allowed_domains.clone(),
            });
        }

        // 4. Authentication
        let context = self.auth.validate_key(api_key).await.map_err(|e| match e {
            ApiKeyServiceError::Unauthorized(msg) => IntakeError::Unauthorized(msg),
            other => IntakeError::Unauthorized(other.to_string()),
        })?;

        // 5. Sender credentials must exist before anything is persisted
        let credentials = context
            .sender
            .ok_or_else(|| IntakeError::CredentialsNotFound(context.tenant.clone()))?;

        // 6. Record, then enqueue with the policy in force right now
        let record = self
            .ledger
            .record_pending(RecordEmailRequest {
                to: request.to.clone(),
                subject: request.subject.clone(),
                template: request.template.clone(),
                data: request.data.clone(),
                tenant: context.tenant.clone(),
            })
            .await
            .map_err(|e| match e {
                crate::errors::EmailServiceError::DatabaseError(db) => {
                    IntakeError::DatabaseError(db)
                }
                other => IntakeError::Unauthorized(other.to_string()),
            })?;

        let retry = self.retry_settings.current().await;
        let job = DeliveryJob {
            email_id: record.id,
            to: request.to,
            subject: request.subject,
            template: request.template,
            data: request.data,
            tenant: context.tenant.clone(),
            credentials,
            retry,
            attempt: 1,
        };

        if let Err(e) = self.queue.enqueue(job).await {
            // The row exists; mark it failed so it is visible rather
            // than stuck pending forever
            self.ledger
                .transition(record.id, EmailStatus::Failed, Some(e.to_string()))
                .await;
            return Err(IntakeError::QueueUnavailable(e.to_string()));
        }

        info!(
            email_id = %record.id,
            tenant = %context.tenant,
            "Accepted email submission"
        );

        Ok(SubmitEmailResponse {
            email_id: record.id,
            status: EmailStatus::Pending,
        })
    }
}

/// Extract the domain of a recipient address, lowercased
fn recipient_domain(address: &str) -> Option<String> {
    let (local, domain) = address.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains(' ') {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailroom_auth::{AuthCache, IssueKeyRequest};
    use mailroom_core::RetryPolicy;
    use mailroom_database::test_utils::TestDatabase;
    use mailroom_queue::DispatchQueueService;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct TestEnv {
        _db: TestDatabase,
        ledger: Arc<EmailLedger>,
        intake: IntakeService,
        receiver: mpsc::Receiver<DeliveryJob>,
        api_key: String,
        retry_settings: RetrySettings,
    }

    async fn setup(allowed_domains: Vec<String>, with_credentials: bool) -> TestEnv {
        let db = TestDatabase::with_migrations().await.unwrap();
        let cache = Arc::new(AuthCache::new(
            Duration::from_secs(300),
            Duration::from_secs(30),
        ));
        let auth = Arc::new(ApiKeyService::new(db.db.clone(), cache, false));

        let issued = auth
            .issue_key(IssueKeyRequest {
                tenant: "acme".to_string(),
                sender_address: with_credentials.then(|| "noreply@acme.example".to_string()),
                sender_secret: with_credentials.then(|| "smtp-password".to_string()),
            })
            .await
            .unwrap();

        let ledger = Arc::new(EmailLedger::new(db.db.clone()));
        let (queue, receiver) = DispatchQueueService::create_channel(10);
        let retry_settings = RetrySettings::default();

        let intake = IntakeService::new(
            ledger.clone(),
            auth,
            Arc::new(queue),
            retry_settings.clone(),
            allowed_domains,
        );

        TestEnv {
            _db: db,
            ledger,
            intake,
            receiver,
            api_key: issued.api_key,
            retry_settings,
        }
    }

    fn submit_request(to: &str) -> SubmitEmailRequest {
        SubmitEmailRequest {
            to: to.to_string(),
            subject: "Welcome".to_string(),
            template: "welcome".to_string(),
            data: serde_json::json!({"name": "Ada"}),
        }
    }

    async fn assert_ledger_empty(ledger: &EmailLedger) {
        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total, 0, "Rejected submission must leave no ledger row");
    }

    #[tokio::test]
    async fn test_submit_accepts_and_enqueues() {
        let mut env = setup(vec![], true).await;

        let response = env
            .intake
            .submit(&env.api_key, submit_request("user@example.com"))
            .await
            .unwrap();

        assert_eq!(response.status, EmailStatus::Pending);

        // Ledger row is pending
        let record = env.ledger.get(response.email_id).await.unwrap();
        assert_eq!(record.status, "pending");

        // Queue entry carries the ledger id and a credentials copy
        let job = env.receiver.recv().await.unwrap();
        assert_eq!(job.email_id, response.email_id);
        assert_eq!(job.tenant, "acme");
        assert_eq!(job.attempt, 1);
        assert_eq!(job.credentials.address, "noreply@acme.example");
        assert_eq!(job.retry.max_attempts, RetryPolicy::default().max_attempts);
    }

    #[tokio::test]
    async fn test_submit_missing_fields_rejected() {
        let env = setup(vec![], true).await;

        let mut request = submit_request("user@example.com");
        request.subject = "".to_string();

        let result = env.intake.submit(&env.api_key, request).await;
        assert!(matches!(result, Err(IntakeError::MissingField("subject"))));

        assert_ledger_empty(&env.ledger).await;
    }

    #[tokio::test]
    async fn test_submit_invalid_recipient_rejected() {
        let env = setup(vec![], true).await;

        let result = env
            .intake
            .submit(&env.api_key, submit_request("not-an-address"))
            .await;

        assert!(matches!(result, Err(IntakeError::InvalidRecipient(_))));
        assert_ledger_empty(&env.ledger).await;
    }

    #[tokio::test]
    async fn test_submit_domain_not_allowed() {
        let env = setup(vec!["acme.example".to_string()], true).await;

        let result = env
            .intake
            .submit(&env.api_key, submit_request("user@evil.example"))
            .await;

        match result {
            Err(IntakeError::DomainNotAllowed { domain, allowed }) => {
                assert_eq!(domain, "evil.example");
                assert_eq!(allowed, vec!["acme.example".to_string()]);
            }
            other => panic!("Expected DomainNotAllowed, got {:?}", other.map(|r| r.email_id)),
        }

        assert_ledger_empty(&env.ledger).await;
    }

    #[tokio::test]
    async fn test_submit_domain_allowlist_is_case_insensitive() {
        let env = setup(vec!["Acme.Example".to_string()], true).await;

        let response = env
            .intake
            .submit(&env.api_key, submit_request("user@ACME.example"))
            .await
            .unwrap();

        assert_eq!(response.status, EmailStatus::Pending);
    }

    #[tokio::test]
    async fn test_submit_bad_api_key_rejected() {
        let env = setup(vec![], true).await;

        let bogus = format!("mk_{}", "x".repeat(40));
        let result = env.intake.submit(&bogus, submit_request("user@example.com")).await;

        assert!(matches!(result, Err(IntakeError::Unauthorized(_))));
        assert_ledger_empty(&env.ledger).await;
    }

    #[tokio::test]
    async fn test_submit_without_sender_credentials_rejected() {
        let env = setup(vec![], false).await;

        let result = env
            .intake
            .submit(&env.api_key, submit_request("user@example.com"))
            .await;

        match result {
            Err(IntakeError::CredentialsNotFound(tenant)) => assert_eq!(tenant, "acme"),
            other => panic!("Expected CredentialsNotFound, got {:?}", other.map(|r| r.email_id)),
        }

        assert_ledger_empty(&env.ledger).await;
    }

    #[tokio::test]
    async fn test_submit_uses_current_retry_settings() {
        let mut env = setup(vec![], true).await;

        env.retry_settings.set_max_attempts(5).await;

        env.intake
            .submit(&env.api_key, submit_request("user@example.com"))
            .await
            .unwrap();

        let job = env.receiver.recv().await.unwrap();
        assert_eq!(job.retry.max_attempts, 5);
    }

    #[tokio::test]
    async fn test_submit_queue_closed_marks_failed() {
        let env = setup(vec![], true).await;
        drop(env.receiver);

        let result = env
            .intake
            .submit(&env.api_key, submit_request("user@example.com"))
            .await;

        assert!(matches!(result, Err(IntakeError::QueueUnavailable(_))));

        // The accepted row exists and is visible as failed
        let stats = env.ledger.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_recipient_domain_parsing() {
        assert_eq!(
            recipient_domain("user@Example.COM"),
            Some("example.com".to_string())
        );
        assert_eq!(recipient_domain("a@b@c.example"), Some("c.example".to_string()));
        assert_eq!(recipient_domain("no-at-sign"), None);
        assert_eq!(recipient_domain("@example.com"), None);
        assert_eq!(recipient_domain("user@"), None);
    }
}
