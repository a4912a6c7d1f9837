//! Outbound message transport seam

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailroom_core::SenderCredentials;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl TransportError {
    /// Whether the sender's credentials were rejected
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Auth(_))
    }
}

/// A fully rendered message ready for handoff
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Provider acknowledgement of a handoff
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, TransportError>;
}

/// SMTP transport over lettre, authenticated per sender
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(
        host: &str,
        port: u16,
        credentials: &SenderCredentials,
    ) -> Result<Self, TransportError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| TransportError::Permanent(format!("Invalid SMTP relay: {}", e)))?
            .port(port)
            .credentials(Credentials::new(
                credentials.address.clone(),
                credentials.secret.clone(),
            ))
            .build();

        Ok(Self { transport })
    }

    fn classify(e: lettre::transport::smtp::Error) -> TransportError {
        let message = e.to_string();
        // 535 is the SMTP reply for rejected authentication credentials
        if message.contains("535") {
            return TransportError::Auth(message);
        }
        if e.is_permanent() {
            TransportError::Permanent(message)
        } else {
            TransportError::Transient(message)
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, TransportError> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e| TransportError::InvalidMessage(format!("Bad from address: {}", e)))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| TransportError::InvalidMessage(format!("Bad to address: {}", e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

        debug!("Handing message for {} to SMTP relay", email.to);

        let response = self
            .transport
            .send(message)
            .await
            .map_err(Self::classify)?;

        Ok(DeliveryReceipt {
            message_id: response
                .message()
                .collect::<Vec<&str>>()
                .join(" "),
        })
    }
}

/// Mock transport for testing
#[derive(Debug, Clone)]
pub struct MockTransport {
    pub send_count: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    /// Errors returned in order before sends start succeeding
    scripted_failures: Arc<Mutex<VecDeque<TransportError>>>,
    pub should_fail_send: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            send_count: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
            scripted_failures: Arc::new(Mutex::new(VecDeque::new())),
            should_fail_send: false,
        }
    }

    /// Every send fails with a transient error
    pub fn with_send_failure(mut self) -> Self {
        self.should_fail_send = true;
        self
    }

    /// The first sends fail with the given errors, later sends succeed
    pub fn with_scripted_failures(mut self, failures: Vec<TransportError>) -> Self {
        self.scripted_failures = Arc::new(Mutex::new(failures.into()));
        self
    }

    pub fn send_call_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    pub async fn sent_messages(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, TransportError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.scripted_failures.lock().await.pop_front() {
            return Err(failure);
        }

        if self.should_fail_send {
            return Err(TransportError::Transient("Mock send failure".to_string()));
        }

        self.sent.lock().await.push(email.clone());

        Ok(DeliveryReceipt {
            message_id: format!("mock-message-{}", uuid::Uuid::new_v4()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound() -> OutboundEmail {
        OutboundEmail {
            from: "noreply@acme.example".to_string(),
            to: "user@example.com".to_string(),
            subject: "Hi".to_string(),
            html: "<p>Hi</p>".to_string(),
            text: None,
        }
    }

    #[tokio::test]
    async fn test_mock_transport_records_sends() {
        let transport = MockTransport::new();

        let receipt = transport.send(&outbound()).await.unwrap();

        assert!(receipt.message_id.starts_with("mock-message-"));
        assert_eq!(transport.send_call_count(), 1);
        assert_eq!(transport.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_transport_always_fails() {
        let transport = MockTransport::new().with_send_failure();

        let result = transport.send(&outbound()).await;

        assert!(matches!(result, Err(TransportError::Transient(_))));
        assert!(transport.sent_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_transport_scripted_failures_then_success() {
        let transport = MockTransport::new().with_scripted_failures(vec![
            TransportError::Transient("first".to_string()),
            TransportError::Auth("second".to_string()),
        ]);

        assert!(matches!(
            transport.send(&outbound()).await,
            Err(TransportError::Transient(_))
        ));
        let second = transport.send(&outbound()).await;
        assert!(matches!(second, Err(ref e) if e.is_auth()));
        assert!(transport.send(&outbound()).await.is_ok());
        assert_eq!(transport.send_call_count(), 3);
    }

    #[test]
    fn test_is_auth_classification() {
        assert!(TransportError::Auth("x".to_string()).is_auth());
        assert!(!TransportError::Transient("x".to_string()).is_auth());
        assert!(!TransportError::Permanent("x".to_string()).is_auth());
    }
}
