use crate::cache::{AuthCache, AuthContext, CachedAuth};
use argon2::{PasswordHasher, PasswordVerifier};
use chrono::Utc;
use mailroom_core::{SenderCredentials, UtcDateTime};
use mailroom_database::DbConnection;
use mailroom_entities::api_keys::{
    ActiveModel as ApiKeyActiveModel, Column as ApiKeyColumn, Entity as ApiKeyEntity,
};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Key format: "mk_" followed by 40 random alphanumeric characters
const KEY_PREFIX: &str = "mk_";
const KEY_RANDOM_LEN: usize = 40;
/// Stored prefix used to narrow candidate rows during validation
const LOOKUP_PREFIX_LEN: usize = 8;

// Response DTOs
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyResponse {
    pub id: i32,
    pub tenant: String,
    pub key_prefix: String,
    pub sender_address: Option<String>,
    pub is_active: bool,
    pub is_approved: bool,
    #[schema(value_type = Option<String>, format = "date-time", example = "2024-01-01T00:00:00Z")]
    pub last_used_at: Option<UtcDateTime>,
    #[schema(value_type = String, format = "date-time", example = "2024-01-01T00:00:00Z")]
    pub created_at: UtcDateTime,
}

impl From<mailroom_entities::api_keys::Model> for ApiKeyResponse {
    fn from(model: mailroom_entities::api_keys::Model) -> Self {
        Self {
            id: model.id,
            tenant: model.tenant,
            key_prefix: model.key_prefix,
            sender_address: model.sender_address,
            is_active: model.is_active,
            is_approved: model.is_approved,
            last_used_at: model.last_used_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssueKeyResponse {
    pub id: i32,
    pub tenant: String,
    pub key_prefix: String,
    pub api_key: String, // Only returned on issuance
    pub is_approved: bool,
    #[schema(value_type = String, format = "date-time", example = "2024-01-01T00:00:00Z")]
    pub created_at: UtcDateTime,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyListResponse {
    pub api_keys: Vec<ApiKeyResponse>,
    pub total: u64,
}

// Request DTOs
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IssueKeyRequest {
    #[schema(example = "acme")]
    pub tenant: String,
    #[schema(example = "noreply@acme.example")]
    pub sender_address: Option<String>,
    pub sender_secret: Option<String>,
}

#[derive(Error, Debug)]
pub enum ApiKeyServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Malformed API key: {0}")]
    MalformedKey(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

pub struct ApiKeyService {
    db: Arc<DbConnection>,
    cache: Arc<AuthCache>,
    require_approval: bool,
}

impl ApiKeyService {
    pub fn new(db: Arc<DbConnection>, cache: Arc<AuthCache>, require_approval: bool) -> Self {
        Self {
            db,
            cache,
            require_approval,
        }
    }

    pub fn cache(&self) -> Arc<AuthCache> {
        Arc::clone(&self.cache)
    }

    /// Issue a new key for a tenant
    ///
    /// The plaintext key is returned exactly once; only its hash and
    /// lookup prefix are persisted. A tenant can hold at most one key.
    pub async fn issue_key(
        &self,
        request: IssueKeyRequest,
    ) -> Result<IssueKeyResponse, ApiKeyServiceError> {
        if request.tenant.trim().is_empty() {
            return Err(ApiKeyServiceError::ValidationError(
                "Tenant must not be empty".to_string(),
            ));
        }

        let existing_key = ApiKeyEntity::find()
            .filter(ApiKeyColumn::Tenant.eq(&request.tenant))
            .one(self.db.as_ref())
            .await?;

        if existing_key.is_some() {
            return Err(ApiKeyServiceError::Conflict(format!(
                "Tenant '{}' already has an API key",
                request.tenant
            )));
        }

        let api_key = self.generate_api_key();
        let key_hash = self.hash_api_key(&api_key)?;
        let key_prefix = api_key.chars().take(LOOKUP_PREFIX_LEN).collect::<String>();

        let now = Utc::now();
        let new_api_key = ApiKeyActiveModel {
            tenant: Set(request.tenant.clone()),
            key_hash: Set(key_hash),
            key_prefix: Set(key_prefix.clone()),
            sender_address: Set(request.sender_address),
            sender_secret: Set(request.sender_secret),
            is_active: Set(true),
            is_approved: Set(!self.require_approval),
            last_used_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let api_key_model = new_api_key.insert(self.db.as_ref()).await?;

        Ok(IssueKeyResponse {
            id: api_key_model.id,
            tenant: api_key_model.tenant,
            key_prefix,
            api_key, // Only returned on issuance
            is_approved: api_key_model.is_approved,
            created_at: api_key_model.created_at,
        })
    }

    /// Validate a presented key and resolve its tenant context
    ///
    /// Consults the cache first; on a miss, candidate rows are narrowed
    /// by the stored prefix and each hash is verified. Unknown keys are
    /// negatively cached for the (shorter) negative TTL.
    pub async fn validate_key(&self, api_key: &str) -> Result<AuthContext, ApiKeyServiceError> {
        // Structurally invalid keys never reach the cache or database
        if !api_key.starts_with(KEY_PREFIX) || api_key.len() != KEY_PREFIX.len() + KEY_RANDOM_LEN {
            return Err(ApiKeyServiceError::MalformedKey(
                "Key does not match the issued format".to_string(),
            ));
        }

        match self.cache.get(api_key).await {
            Some(CachedAuth::Valid(context)) => {
                debug!(tenant = %context.tenant, "API key validated from cache");
                return Ok(context);
            }
            Some(CachedAuth::Invalid) => {
                return Err(ApiKeyServiceError::Unauthorized(
                    "Invalid API key".to_string(),
                ));
            }
            None => {}
        }

        let key_prefix = api_key.chars().take(LOOKUP_PREFIX_LEN).collect::<String>();

        let candidates = ApiKeyEntity::find()
            .filter(ApiKeyColumn::KeyPrefix.eq(&key_prefix))
            .filter(ApiKeyColumn::IsActive.eq(true))
            .all(self.db.as_ref())
            .await?;

        let argon2 = argon2::Argon2::default();
        let matched = candidates.into_iter().find(|candidate| {
            match argon2::password_hash::PasswordHash::new(&candidate.key_hash) {
                Ok(parsed) => argon2
                    .verify_password(api_key.as_bytes(), &parsed)
                    .is_ok(),
                Err(e) => {
                    warn!(key_id = candidate.id, "Unparseable key hash in database: {}", e);
                    false
                }
            }
        });

        let api_key_model = match matched {
            Some(model) => model,
            None => {
                self.cache.insert_invalid(api_key).await;
                return Err(ApiKeyServiceError::Unauthorized(
                    "Invalid API key".to_string(),
                ));
            }
        };

        if !api_key_model.is_approved {
            self.cache.insert_invalid(api_key).await;
            return Err(ApiKeyServiceError::Unauthorized(
                "API key pending approval".to_string(),
            ));
        }

        let sender = match (
            api_key_model.sender_address.clone(),
            api_key_model.sender_secret.clone(),
        ) {
            (Some(address), Some(secret)) => Some(SenderCredentials { address, secret }),
            _ => None,
        };

        let context = AuthContext {
            key_id: api_key_model.id,
            tenant: api_key_model.tenant.clone(),
            sender,
            is_approved: api_key_model.is_approved,
        };

        // Update last_used_at
        let mut api_key_active: ApiKeyActiveModel = api_key_model.into();
        api_key_active.last_used_at = Set(Some(Utc::now()));
        let _ = api_key_active.update(self.db.as_ref()).await; // Don't fail if this fails

        self.cache.insert_valid(api_key, context.clone()).await;

        Ok(context)
    }

    pub async fn list_keys(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<ApiKeyListResponse, ApiKeyServiceError> {
        let paginator = ApiKeyEntity::find()
            .order_by_desc(ApiKeyColumn::CreatedAt)
            .paginate(self.db.as_ref(), page_size);

        let total = paginator.num_items().await?;
        let api_keys_models = paginator.fetch_page(page.saturating_sub(1)).await?;

        let api_keys = api_keys_models
            .into_iter()
            .map(ApiKeyResponse::from)
            .collect();

        Ok(ApiKeyListResponse { api_keys, total })
    }

    pub async fn get_key(&self, api_key_id: i32) -> Result<ApiKeyResponse, ApiKeyServiceError> {
        let api_key = ApiKeyEntity::find_by_id(api_key_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ApiKeyServiceError::NotFound("API key not found".to_string()))?;

        Ok(ApiKeyResponse::from(api_key))
    }

    /// Approve a tenant's key so it can authenticate
    pub async fn approve_tenant(&self, tenant: &str) -> Result<ApiKeyResponse, ApiKeyServiceError> {
        let api_key = ApiKeyEntity::find()
            .filter(ApiKeyColumn::Tenant.eq(tenant))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| {
                ApiKeyServiceError::NotFound(format!("No API key for tenant '{}'", tenant))
            })?;

        let mut api_key_active: ApiKeyActiveModel = api_key.into();
        api_key_active.is_approved = Set(true);
        api_key_active.updated_at = Set(Utc::now());

        let updated = api_key_active.update(self.db.as_ref()).await?;

        self.cache.invalidate_all().await;

        Ok(ApiKeyResponse::from(updated))
    }

    pub async fn deactivate_key(&self, api_key_id: i32) -> Result<ApiKeyResponse, ApiKeyServiceError> {
        self.set_active(api_key_id, false).await
    }

    pub async fn reactivate_key(&self, api_key_id: i32) -> Result<ApiKeyResponse, ApiKeyServiceError> {
        self.set_active(api_key_id, true).await
    }

    /// Permanently delete a key
    pub async fn revoke_key(&self, api_key_id: i32) -> Result<(), ApiKeyServiceError> {
        let api_key = ApiKeyEntity::find_by_id(api_key_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ApiKeyServiceError::NotFound("API key not found".to_string()))?;

        ApiKeyEntity::delete_by_id(api_key.id)
            .exec(self.db.as_ref())
            .await?;

        self.cache.invalidate_all().await;

        Ok(())
    }

    async fn set_active(
        &self,
        api_key_id: i32,
        is_active: bool,
    ) -> Result<ApiKeyResponse, ApiKeyServiceError> {
        let api_key = ApiKeyEntity::find_by_id(api_key_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ApiKeyServiceError::NotFound("API key not found".to_string()))?;

        let mut api_key_active: ApiKeyActiveModel = api_key.into();
        api_key_active.is_active = Set(is_active);
        api_key_active.updated_at = Set(Utc::now());

        let updated = api_key_active.update(self.db.as_ref()).await?;

        self.cache.invalidate_all().await;

        Ok(ApiKeyResponse::from(updated))
    }

    fn generate_api_key(&self) -> String {
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        let mut rng = rand::thread_rng();

        let random_part: String = (0..KEY_RANDOM_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect();

        format!("{}{}", KEY_PREFIX, random_part)
    }

    pub(crate) fn hash_api_key(&self, api_key: &str) -> Result<String, ApiKeyServiceError> {
        use argon2::password_hash::{rand_core::OsRng, SaltString};
        let argon2 = argon2::Argon2::default();
        let salt = SaltString::generate(&mut OsRng);

        let hash = argon2
            .hash_password(api_key.as_bytes(), &salt)
            .map_err(|e| {
                ApiKeyServiceError::InternalServerError(format!("Failed to hash API key: {}", e))
            })?
            .to_string();

        Ok(hash)
    }
}
