//! Implementation of the dispatch queue using tokio channels
//! This crate implements the DispatchQueue trait from mailroom-core
//! using a bounded mpsc channel, with retry scheduling and a
//! dead-letter store layered on top.

pub mod dead_letter;
pub mod queue;

pub use dead_letter::{DeadLetter, DeadLetterStore};
pub use queue::{DispatchQueueService, QueueServiceError, QueueStats};

// Re-export core traits for convenience
pub use mailroom_core::{DeliveryJob, DispatchQueue, QueueError};
