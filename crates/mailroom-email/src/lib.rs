//! Email intake and the durable delivery ledger

pub mod errors;
pub mod intake;
pub mod ledger;

pub use errors::{EmailServiceError, IntakeError};
pub use intake::{IntakeService, SubmitEmailRequest, SubmitEmailResponse};
pub use ledger::{
    EmailLedger, EmailListResponse, EmailRecord, EmailStatus, LedgerStats, RecordEmailRequest,
};
