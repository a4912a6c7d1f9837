//! Canonical datetime aliases used across all Mailroom crates

use chrono::{DateTime as ChronoDateTime, Utc};

/// Database DateTime type for TIMESTAMPTZ columns
pub type DBDateTime = ChronoDateTime<Utc>;

/// Standard UTC DateTime type for API responses
/// (serializes as ISO 8601 with 'Z' suffix)
pub type UtcDateTime = ChronoDateTime<Utc>;
