//! Per-tenant transport reuse
//!
//! Transports are built once per tenant and reused across deliveries.
//! An authentication failure evicts the tenant's entry so the next
//! delivery reconnects with fresh state.

use crate::transport::{SmtpTransport, Transport, TransportError};
use mailroom_core::SenderCredentials;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub trait TransportFactory: Send + Sync {
    fn create(&self, credentials: &SenderCredentials) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Builds SMTP transports against a fixed relay
pub struct SmtpTransportFactory {
    host: String,
    port: u16,
}

impl SmtpTransportFactory {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl TransportFactory for SmtpTransportFactory {
    fn create(&self, credentials: &SenderCredentials) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = SmtpTransport::new(&self.host, self.port, credentials)?;
        Ok(Arc::new(transport))
    }
}

pub struct SenderConnectionPool {
    factory: Arc<dyn TransportFactory>,
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl SenderConnectionPool {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the tenant's transport, building it on first use
    pub async fn get_or_create(
        &self,
        tenant: &str,
        credentials: &SenderCredentials,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        {
            let transports = self.transports.read().await;
            if let Some(transport) = transports.get(tenant) {
                return Ok(Arc::clone(transport));
            }
        }

        let mut transports = self.transports.write().await;
        // Another worker may have built it while we waited for the lock
        if let Some(transport) = transports.get(tenant) {
            return Ok(Arc::clone(transport));
        }

        debug!(tenant = %tenant, "Building sender transport");
        let transport = self.factory.create(credentials)?;
        transports.insert(tenant.to_string(), Arc::clone(&transport));
        Ok(transport)
    }

    /// Evict a tenant's transport
    pub async fn invalidate(&self, tenant: &str) {
        let mut transports = self.transports.write().await;
        transports.remove(tenant);
    }

    pub async fn len(&self) -> usize {
        self.transports.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transports.read().await.is_empty()
    }
}

/// Mock factory for testing
#[derive(Clone)]
pub struct MockTransportFactory {
    transport: crate::transport::MockTransport,
    pub create_count: Arc<AtomicUsize>,
}

impl MockTransportFactory {
    pub fn new(transport: crate::transport::MockTransport) -> Self {
        Self {
            transport,
            create_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn create_call_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, _credentials: &SenderCredentials) -> Result<Arc<dyn Transport>, TransportError> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.transport.clone()))
    }
}
