//! Database entities for the Mailroom service

pub mod api_keys;
pub mod emails;
