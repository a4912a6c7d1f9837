pub mod api_key;
pub mod emails;
pub mod send;
pub mod worker;

pub use api_key::ApiKeyCommand;
pub use emails::EmailsCommand;
pub use send::SendCommand;
pub use worker::WorkerCommand;
