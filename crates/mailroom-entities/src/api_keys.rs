use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

use mailroom_core::DBDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Tenant name; at most one credential record per tenant
    #[sea_orm(unique)]
    pub tenant: String,
    /// Argon2id PHC string of the full secret
    pub key_hash: String,
    pub key_prefix: String, // First 8 characters for narrowed lookup
    /// Sender address used when delivering on behalf of this tenant
    pub sender_address: Option<String>,
    /// Transport secret paired with the sender address
    pub sender_secret: Option<String>,
    pub is_active: bool,
    /// False while the credential awaits administrative approval
    pub is_approved: bool,
    pub last_used_at: Option<DBDateTime>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
