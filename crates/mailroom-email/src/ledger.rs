//! Durable per-email delivery ledger
//!
//! Every accepted submission gets a `pending` row before it is
//! enqueued; delivery workers move rows to `sent` or `failed`. A row
//! that reached `sent` never changes again, while `failed` rows may
//! still flip to `sent` when a later retry succeeds.

use chrono::{NaiveTime, Utc};
use mailroom_database::DbConnection;
use mailroom_entities::emails::{
    ActiveModel as EmailActiveModel, Column as EmailColumn, Entity as EmailEntity,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::EmailServiceError;
use mailroom_core::UtcDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Pending => "pending",
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EmailStatus::Pending),
            "sent" => Some(EmailStatus::Sent),
            "failed" => Some(EmailStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailRecord {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub template: String,
    pub data: serde_json::Value,
    pub tenant: String,
    pub status: String,
    pub error_message: Option<String>,
    #[schema(value_type = Option<String>, format = "date-time", example = "2024-01-01T00:00:00Z")]
    pub sent_at: Option<UtcDateTime>,
    #[schema(value_type = String, format = "date-time", example = "2024-01-01T00:00:00Z")]
    pub created_at: UtcDateTime,
}

impl From<mailroom_entities::emails::Model> for EmailRecord {
    fn from(model: mailroom_entities::emails::Model) -> Self {
        Self {
            id: model.id,
            recipient: model.recipient,
            subject: model.subject,
            template: model.template,
            data: model.data,
            tenant: model.tenant,
            status: model.status,
            error_message: model.error_message,
            sent_at: model.sent_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EmailListResponse {
    pub emails: Vec<EmailRecord>,
    pub total: u64,
}

/// Aggregate ledger counts for the admin surface
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerStats {
    pub total: u64,
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    /// Emails recorded since midnight UTC
    pub today: u64,
}

#[derive(Debug, Clone)]
pub struct RecordEmailRequest {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub data: serde_json::Value,
    pub tenant: String,
}

pub struct EmailLedger {
    db: Arc<DbConnection>,
}

impl EmailLedger {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Record an accepted submission as `pending`
    pub async fn record_pending(
        &self,
        request: RecordEmailRequest,
    ) -> Result<EmailRecord, EmailServiceError> {
        let now = Utc::now();
        let email = EmailActiveModel {
            id: Set(Uuid::new_v4()),
            recipient: Set(request.to),
            subject: Set(request.subject),
            template: Set(request.template),
            data: Set(request.data),
            tenant: Set(request.tenant),
            status: Set(EmailStatus::Pending.as_str().to_string()),
            error_message: Set(None),
            sent_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = email.insert(self.db.as_ref()).await?;
        Ok(EmailRecord::from(model))
    }

    /// Move a ledger row to a new status
    ///
    /// Returns whether the transition was applied. `sent` is terminal;
    /// `failed` may still become `sent` when a later attempt succeeds,
    /// or be overwritten with a fresher failure reason. This never
    /// returns an error so delivery workers cannot wedge on ledger
    /// bookkeeping; failures are logged instead.
    pub async fn transition(
        &self,
        email_id: Uuid,
        status: EmailStatus,
        error_message: Option<String>,
    ) -> bool {
        let model = match EmailEntity::find_by_id(email_id).one(self.db.as_ref()).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                warn!("Ledger transition for unknown email {}", email_id);
                return false;
            }
            Err(e) => {
                error!("Ledger lookup failed for {}: {}", email_id, e);
                return false;
            }
        };

        if model.status == EmailStatus::Sent.as_str() {
            warn!(
                "Ignoring transition of sent email {} to {}",
                email_id, status
            );
            return false;
        }

        let mut active: EmailActiveModel = model.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Utc::now());
        match status {
            EmailStatus::Sent => {
                active.sent_at = Set(Some(Utc::now()));
                active.error_message = Set(None);
            }
            _ => {
                active.error_message = Set(error_message);
            }
        }

        match active.update(self.db.as_ref()).await {
            Ok(_) => true,
            Err(e) => {
                error!("Ledger transition failed for {}: {}", email_id, e);
                false
            }
        }
    }

    pub async fn get(&self, email_id: Uuid) -> Result<EmailRecord, EmailServiceError> {
        let model = EmailEntity::find_by_id(email_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| EmailServiceError::NotFound(format!("Email {} not found", email_id)))?;

        Ok(EmailRecord::from(model))
    }

    /// Most recently recorded emails, newest first
    pub async fn recent(&self, limit: u64) -> Result<Vec<EmailRecord>, EmailServiceError> {
        let models = EmailEntity::find()
            .order_by_desc(EmailColumn::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;

        Ok(models.into_iter().map(EmailRecord::from).collect())
    }

    pub async fn for_tenant(
        &self,
        tenant: &str,
        page: u64,
        page_size: u64,
    ) -> Result<EmailListResponse, EmailServiceError> {
        let paginator = EmailEntity::find()
            .filter(EmailColumn::Tenant.eq(tenant))
            .order_by_desc(EmailColumn::CreatedAt)
            .paginate(self.db.as_ref(), page_size);

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(EmailListResponse {
            emails: models.into_iter().map(EmailRecord::from).collect(),
            total,
        })
    }

    pub async fn stats(&self) -> Result<LedgerStats, EmailServiceError> {
        let total = EmailEntity::find().count(self.db.as_ref()).await?;
        let pending = self.count_status(EmailStatus::Pending).await?;
        let sent = self.count_status(EmailStatus::Sent).await?;
        let failed = self.count_status(EmailStatus::Failed).await?;

        let midnight = Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        let today = EmailEntity::find()
            .filter(EmailColumn::CreatedAt.gte(midnight))
            .count(self.db.as_ref())
            .await?;

        Ok(LedgerStats {
            total,
            pending,
            sent,
            failed,
            today,
        })
    }

    async fn count_status(&self, status: EmailStatus) -> Result<u64, EmailServiceError> {
        let count = EmailEntity::find()
            .filter(EmailColumn::Status.eq(status.as_str()))
            .count(self.db.as_ref())
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailroom_database::test_utils::TestDatabase;

    async fn setup() -> (TestDatabase, EmailLedger) {
        let db = TestDatabase::with_migrations().await.unwrap();
        let ledger = EmailLedger::new(db.db.clone());
        (db, ledger)
    }

    fn record_request(tenant: &str) -> RecordEmailRequest {
        RecordEmailRequest {
            to: "user@example.com".to_string(),
            subject: "Welcome".to_string(),
            template: "welcome".to_string(),
            data: serde_json::json!({"name": "Ada"}),
            tenant: tenant.to_string(),
        }
    }

    #[tokio::test]
    async fn test_record_pending_and_get() {
        let (_db, ledger) = setup().await;

        let record = ledger.record_pending(record_request("acme")).await.unwrap();

        assert_eq!(record.status, "pending");
        assert!(record.sent_at.is_none());

        let fetched = ledger.get(record.id).await.unwrap();
        assert_eq!(fetched.recipient, "user@example.com");
        assert_eq!(fetched.tenant, "acme");
        assert_eq!(fetched.data, serde_json::json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (_db, ledger) = setup().await;

        let result = ledger.get(Uuid::new_v4()).await;

        assert!(matches!(result, Err(EmailServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transition_pending_to_sent() {
        let (_db, ledger) = setup().await;

        let record = ledger.record_pending(record_request("acme")).await.unwrap();

        assert!(ledger.transition(record.id, EmailStatus::Sent, None).await);

        let fetched = ledger.get(record.id).await.unwrap();
        assert_eq!(fetched.status, "sent");
        assert!(fetched.sent_at.is_some());
        assert!(fetched.error_message.is_none());
    }

    #[tokio::test]
    async fn test_transition_pending_to_failed_records_error() {
        let (_db, ledger) = setup().await;

        let record = ledger.record_pending(record_request("acme")).await.unwrap();

        assert!(
            ledger
                .transition(record.id, EmailStatus::Failed, Some("smtp timeout".to_string()))
                .await
        );

        let fetched = ledger.get(record.id).await.unwrap();
        assert_eq!(fetched.status, "failed");
        assert_eq!(fetched.error_message.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn test_sent_is_terminal() {
        let (_db, ledger) = setup().await;

        let record = ledger.record_pending(record_request("acme")).await.unwrap();
        ledger.transition(record.id, EmailStatus::Sent, None).await;

        let applied = ledger
            .transition(record.id, EmailStatus::Failed, Some("late failure".to_string()))
            .await;

        assert!(!applied);
        let fetched = ledger.get(record.id).await.unwrap();
        assert_eq!(fetched.status, "sent");
        assert!(fetched.error_message.is_none());
    }

    #[tokio::test]
    async fn test_failed_can_become_sent_on_retry_success() {
        let (_db, ledger) = setup().await;

        let record = ledger.record_pending(record_request("acme")).await.unwrap();
        ledger
            .transition(record.id, EmailStatus::Failed, Some("first attempt".to_string()))
            .await;

        assert!(ledger.transition(record.id, EmailStatus::Sent, None).await);

        let fetched = ledger.get(record.id).await.unwrap();
        assert_eq!(fetched.status, "sent");
        assert!(fetched.error_message.is_none());
        assert!(fetched.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_unknown_email_is_noop() {
        let (_db, ledger) = setup().await;

        assert!(!ledger.transition(Uuid::new_v4(), EmailStatus::Sent, None).await);
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let (_db, ledger) = setup().await;

        for _ in 0..5 {
            ledger.record_pending(record_request("acme")).await.unwrap();
        }

        let recent = ledger.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn test_for_tenant_is_scoped() {
        let (_db, ledger) = setup().await;

        ledger.record_pending(record_request("acme")).await.unwrap();
        ledger.record_pending(record_request("acme")).await.unwrap();
        ledger.record_pending(record_request("globex")).await.unwrap();

        let acme = ledger.for_tenant("acme", 1, 10).await.unwrap();
        assert_eq!(acme.total, 2);
        assert!(acme.emails.iter().all(|e| e.tenant == "acme"));

        let globex = ledger.for_tenant("globex", 1, 10).await.unwrap();
        assert_eq!(globex.total, 1);
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let (_db, ledger) = setup().await;

        let a = ledger.record_pending(record_request("acme")).await.unwrap();
        let b = ledger.record_pending(record_request("acme")).await.unwrap();
        ledger.record_pending(record_request("acme")).await.unwrap();

        ledger.transition(a.id, EmailStatus::Sent, None).await;
        ledger
            .transition(b.id, EmailStatus::Failed, Some("boom".to_string()))
            .await;

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.today, 3);
    }
}
