//! Error types for the email ledger and intake surface

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmailServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Rejection reasons produced by the intake handler.
///
/// A rejected submission leaves no trace in the ledger; every variant
/// here is returned before anything is persisted or enqueued.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("Recipient domain '{domain}' is not allowed (allowed: {})", .allowed.join(", "))]
    DomainNotAllowed { domain: String, allowed: Vec<String> },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("No sender credentials configured for tenant '{0}'")]
    CredentialsNotFound(String),

    #[error("Failed to enqueue delivery: {0}")]
    QueueUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),
}
