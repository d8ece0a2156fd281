use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use super::{AuditError, AuditTransport};
use crate::config::AuditConfig;
use crate::models::AuditEvent;

const CLIENT_ID: &str = "credit-consult-audit-publisher";

/// Audit transport writing one Kafka record per event, keyed by event type.
pub struct KafkaAuditTransport {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaAuditTransport {
    pub fn new(config: &AuditConfig) -> Result<Self, AuditError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("client.id", CLIENT_ID)
            .set("acks", "all") // Wait for all replicas
            .set("enable.idempotence", "true")
            .set("message.send.max.retries", "3")
            .set("retry.backoff.ms", "100")
            .set(
                "message.timeout.ms",
                config.publish_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| AuditError::Transport(format!("producer creation failed: {}", e)))?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            queue_timeout: config.publish_timeout,
        })
    }
}

#[async_trait]
impl AuditTransport for KafkaAuditTransport {
    async fn send(&self, event: &AuditEvent, payload: &[u8]) -> Result<(), AuditError> {
        let timestamp = event.timestamp.to_rfc3339();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "timestamp",
                value: Some(timestamp.as_bytes()),
            })
            .insert(Header {
                key: "entity-type",
                value: Some(event.entity_type.as_bytes()),
            })
            .insert(Header {
                key: "operation",
                value: Some(event.operation.as_bytes()),
            });

        let record = FutureRecord::to(&self.topic)
            .key(event.event_type.as_str())
            .payload(payload)
            .headers(headers);

        self.producer
            .send(record, self.queue_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| AuditError::Transport(e.to_string()))
    }

    async fn flush(&self, timeout: Duration) -> Result<(), AuditError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| AuditError::Transport(e.to_string()))?
            .map_err(|e| AuditError::Transport(e.to_string()))
    }
}
