//! Tenant credential issuance and validation
//!
//! Keys are stored as salted one-way hashes; validation narrows
//! candidates by a stored prefix and verifies the hash. Outcomes are
//! cached with positive and negative TTLs, and every admin mutation
//! invalidates the cache.

pub mod apikey_service;
pub mod cache;

pub use apikey_service::{
    ApiKeyListResponse, ApiKeyResponse, ApiKeyService, ApiKeyServiceError, IssueKeyRequest,
    IssueKeyResponse,
};
pub use cache::{AuthCache, AuthContext, CachedAuth};
