//! Asynchronous email delivery pipeline
//!
//! Workers consume jobs from the dispatch queue, render the template,
//! and hand the message to the tenant's transport. Failures are
//! retried with exponential backoff; exhausted jobs are dead-lettered.

pub mod connections;
pub mod renderer;
pub mod transport;
pub mod worker;

pub use connections::{
    MockTransportFactory, SenderConnectionPool, SmtpTransportFactory, TransportFactory,
};
pub use renderer::{MockRenderer, RenderError, RenderedEmail, Renderer, TemplateRenderer};
pub use transport::{
    DeliveryReceipt, MockTransport, OutboundEmail, SmtpTransport, Transport, TransportError,
};
pub use worker::{DeliveryContext, DeliveryWorkerPool};
