//! Batch publisher for the ingestion queue.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::broker::{BrokerConnection, BrokerConnector, BrokerError, BrokerSession};
use crate::metrics;
use crate::models::IngestionRecord;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Nothing was published.
    #[error(transparent)]
    Unavailable(#[from] BrokerError),

    #[error("failed to serialize record at position {index}: {source}")]
    Serialization {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The first `published` records of the batch are already on the queue.
    #[error("publish failed after {published} message(s): {source}")]
    PublishFailed {
        published: usize,
        #[source]
        source: BrokerError,
    },
}

/// Publish side of the pipeline as seen by the HTTP layer.
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    async fn publish_batch(&self, records: &[IngestionRecord]) -> Result<usize, PublishError>;

    async fn broker_ready(&self) -> bool;
}

pub struct CreditPublisher<C: BrokerConnector> {
    connection: Arc<BrokerConnection<C>>,
    publish_lock: Mutex<()>,
}

impl<C: BrokerConnector> CreditPublisher<C> {
    pub fn new(connection: Arc<BrokerConnection<C>>) -> Self {
        Self {
            connection,
            publish_lock: Mutex::new(()),
        }
    }

    pub async fn publish(&self, record: &IngestionRecord) -> Result<(), PublishError> {
        self.publish_batch(std::slice::from_ref(record))
            .await
            .map(|_| ())
    }

    /// Publish every record as one persistent message, in input order.
    ///
    /// Returns the number of messages published. Fails before publishing
    /// anything when the broker cannot be reached. A failure part-way through
    /// aborts the batch with [`PublishError::PublishFailed`]; messages already
    /// sent stay on the queue and are not compensated, so callers retrying the
    /// batch produce duplicates (at-least-once). Concurrent batches never
    /// interleave.
    pub async fn publish_batch(&self, records: &[IngestionRecord]) -> Result<usize, PublishError> {
        if records.is_empty() {
            return Ok(0);
        }

        let payloads = records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                record
                    .to_wire()
                    .map_err(|source| PublishError::Serialization { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.publish_lock.lock().await;
        let session = self.connection.acquire().await?;
        let queue = self.connection.queue_name();

        for (published, payload) in payloads.iter().enumerate() {
            if let Err(source) = session.publish(queue, payload).await {
                error!(
                    queue = %queue,
                    published,
                    total = payloads.len(),
                    error = %source,
                    "Batch publish aborted"
                );
                metrics::record_published(published);
                self.connection.invalidate().await;
                return Err(PublishError::PublishFailed { published, source });
            }
        }

        metrics::record_published(payloads.len());
        info!(queue = %queue, count = payloads.len(), "Published credit batch");
        Ok(payloads.len())
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}

#[async_trait]
impl<C: BrokerConnector> RecordPublisher for CreditPublisher<C> {
    async fn publish_batch(&self, records: &[IngestionRecord]) -> Result<usize, PublishError> {
        CreditPublisher::publish_batch(self, records).await
    }

    async fn broker_ready(&self) -> bool {
        self.connection.health_check().await
    }
}
