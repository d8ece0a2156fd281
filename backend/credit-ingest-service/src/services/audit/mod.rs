//! Best-effort audit side channel.
//!
//! Audit events are telemetry: publishing one must never fail or slow down
//! the operation being audited. [`AuditSink::publish`] therefore returns
//! `()`, bounds every send with a timeout, and only logs what went wrong.

pub mod consultation;
pub mod kafka;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AuditConfig;
use crate::metrics;
use crate::models::AuditEvent;

pub use consultation::{ConsultationAuditor, RequestContext};
pub use kafka::KafkaAuditTransport;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize audit event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit transport error: {0}")]
    Transport(String),

    #[error("audit publish timed out after {0:?}")]
    Timeout(Duration),
}

impl AuditError {
    fn outcome(&self) -> &'static str {
        match self {
            AuditError::Serialization(_) => "serialization_error",
            AuditError::Transport(_) => "transport_error",
            AuditError::Timeout(_) => "timeout",
        }
    }
}

/// Where serialized audit events go.
#[async_trait]
pub trait AuditTransport: Send + Sync {
    async fn send(&self, event: &AuditEvent, payload: &[u8]) -> Result<(), AuditError>;

    async fn flush(&self, _timeout: Duration) -> Result<(), AuditError> {
        Ok(())
    }
}

pub struct AuditSink {
    transport: Option<Arc<dyn AuditTransport>>,
    publish_timeout: Duration,
}

impl AuditSink {
    /// Kafka-backed sink, or a disabled one when no brokers are configured or
    /// the producer cannot be created.
    pub fn from_config(config: &AuditConfig) -> Self {
        if config.kafka_brokers.trim().is_empty() {
            info!("AUDIT_KAFKA_BROKERS not set, audit events will be skipped");
            return Self::disabled();
        }

        match KafkaAuditTransport::new(config) {
            Ok(transport) => {
                info!(
                    brokers = %config.kafka_brokers,
                    topic = %config.topic,
                    "Audit sink initialized"
                );
                Self::with_transport(Arc::new(transport), config.publish_timeout)
            }
            Err(e) => {
                warn!(error = %e, "Failed to create audit producer, audit events will be skipped");
                Self::disabled()
            }
        }
    }

    pub fn with_transport(transport: Arc<dyn AuditTransport>, publish_timeout: Duration) -> Self {
        Self {
            transport: Some(transport),
            publish_timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            transport: None,
            publish_timeout: Duration::ZERO,
        }
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_some()
    }

    /// Send `event` once. Never fails; errors are logged and counted.
    pub async fn publish(&self, event: &AuditEvent) {
        let Some(transport) = self.transport.as_deref() else {
            debug!(
                event_type = %event.event_type,
                operation = %event.operation,
                "Audit sink unavailable, skipping event"
            );
            metrics::record_audit("skipped");
            return;
        };

        match self.try_publish(transport, event).await {
            Ok(()) => {
                metrics::record_audit("published");
                debug!(
                    event_type = %event.event_type,
                    operation = %event.operation,
                    "Audit event published"
                );
            }
            Err(e) => {
                metrics::record_audit(e.outcome());
                error!(
                    event_type = %event.event_type,
                    operation = %event.operation,
                    error = %e,
                    "Failed to publish audit event"
                );
            }
        }
    }

    async fn try_publish(
        &self,
        transport: &dyn AuditTransport,
        event: &AuditEvent,
    ) -> Result<(), AuditError> {
        let payload = serde_json::to_vec(event)?;

        tokio::time::timeout(self.publish_timeout, transport.send(event, &payload))
            .await
            .map_err(|_| AuditError::Timeout(self.publish_timeout))?
    }

    /// Publish on a detached task so the caller never waits on the audit log.
    ///
    /// Returns `None` when the sink is unavailable and nothing was spawned.
    pub fn spawn_publish(self: &Arc<Self>, event: AuditEvent) -> Option<JoinHandle<()>> {
        if !self.is_available() {
            debug!(
                event_type = %event.event_type,
                operation = %event.operation,
                "Audit sink unavailable, skipping event"
            );
            metrics::record_audit("skipped");
            return None;
        }

        let sink = Arc::clone(self);
        Some(tokio::spawn(async move {
            sink.publish(&event).await;
        }))
    }

    /// Flush buffered events before shutdown.
    pub async fn flush(&self, timeout: Duration) {
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.flush(timeout).await {
                warn!(error = %e, "Audit sink flush incomplete");
            }
        }
    }
}
