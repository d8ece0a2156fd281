//! Poll-based consumer for the ingestion queue.
//!
//! Each tick acquires the broker session, then drains up to
//! `max_messages_per_cycle` messages one at a time. Every fetched message is
//! acked or nacked before the next fetch.
//!
//! A failed message is requeued and the drain stops until the next tick,
//! since the broker puts it back at the head of the queue. A failure that
//! cannot go away on retry (bad payload, invalid record, row-level database
//! error) gets one redelivery; the second time it is rejected without
//! requeue, so the broker drops it or routes it to a dead-letter exchange
//! if the queue has one. Transient failures are always requeued.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerConnection, BrokerConnector, BrokerSession, QueuedMessage};
use crate::config::ConsumerConfig;
use crate::metrics;
use crate::models::{IngestionRecord, RecordError};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("malformed message: {0}")]
    MalformedMessage(#[source] serde_json::Error),

    #[error("invalid record: {0}")]
    ValidationError(#[from] RecordError),

    #[error("failed to persist credit: {0}")]
    PersistenceFailure(#[source] StoreError),

    #[error("shutdown requested before the credit was persisted")]
    Cancelled,
}

impl ProcessingError {
    /// Whether the same payload would fail the same way on redelivery.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProcessingError::MalformedMessage(_) | ProcessingError::ValidationError(_) => true,
            ProcessingError::PersistenceFailure(e) => e.is_permanent(),
            ProcessingError::Cancelled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Connecting,
    Draining,
    Stopped,
}

/// Terminal outcome of one fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acked,
    Requeued,
    /// Nacked without requeue after failing on redelivery.
    Rejected,
    /// The ack or nack itself failed; the broker redelivers once the channel
    /// is gone.
    Unreachable,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Acked => "acked",
            Outcome::Requeued => "requeued",
            Outcome::Rejected => "rejected",
            Outcome::Unreachable => "unreachable",
        }
    }
}

/// What one poll cycle did. `processed` counts every fetched message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub acked: usize,
    pub requeued: usize,
    pub rejected: usize,
    pub unreachable: usize,
}

pub struct CreditConsumer<C: BrokerConnector> {
    connection: Arc<BrokerConnection<C>>,
    store: Arc<dyn Store>,
    config: ConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl<C: BrokerConnector> CreditConsumer<C> {
    pub fn new(
        connection: Arc<BrokerConnection<C>>,
        store: Arc<dyn Store>,
        config: ConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            connection,
            store,
            config,
            state,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Poll until `shutdown` turns true, then close the broker connection.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.connection.queue_name(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_messages_per_cycle = self.config.max_messages_per_cycle,
            "Credit consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle(&shutdown).await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.connection.close().await;
        self.set_state(ConsumerState::Stopped);
        info!("Credit consumer stopped");
    }

    /// One tick: connect if needed, then drain up to the per-cycle cap.
    ///
    /// Never fails. An unreachable broker leaves the report empty.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> CycleReport {
        let mut report = CycleReport::default();
        if *shutdown.borrow() {
            return report;
        }

        self.set_state(ConsumerState::Connecting);
        let session = match self.connection.acquire().await {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "Broker unavailable, skipping poll cycle");
                metrics::record_cycle(false);
                self.set_state(ConsumerState::Idle);
                return report;
            }
        };
        metrics::record_cycle(true);

        self.set_state(ConsumerState::Draining);
        let queue = self.connection.queue_name();

        while report.processed < self.config.max_messages_per_cycle {
            if *shutdown.borrow() {
                debug!("Shutdown requested, ending drain");
                break;
            }

            let message = match session.fetch(queue).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!(queue = %queue, error = %e, "Failed to fetch from queue");
                    self.connection.invalidate().await;
                    break;
                }
            };

            report.processed += 1;
            let outcome = self.handle(session.as_ref(), message, shutdown).await;
            metrics::record_consumed(outcome.label());

            match outcome {
                Outcome::Acked => report.acked += 1,
                Outcome::Rejected => report.rejected += 1,
                Outcome::Requeued => {
                    // Fetching again would return the same message.
                    report.requeued += 1;
                    break;
                }
                Outcome::Unreachable => {
                    report.unreachable += 1;
                    self.connection.invalidate().await;
                    break;
                }
            }
        }

        if report.processed > 0 {
            debug!(
                processed = report.processed,
                acked = report.acked,
                requeued = report.requeued,
                rejected = report.rejected,
                unreachable = report.unreachable,
                "Poll cycle finished"
            );
        }

        self.set_state(ConsumerState::Idle);
        report
    }

    async fn handle(
        &self,
        session: &C::Session,
        message: QueuedMessage,
        shutdown: &watch::Receiver<bool>,
    ) -> Outcome {
        let handle = message.handle;

        match self.process(&message, shutdown).await {
            Ok(credit_id) => match session.ack(handle).await {
                Ok(()) => {
                    info!(delivery = %handle, credit_id, "Credit persisted");
                    Outcome::Acked
                }
                Err(e) => {
                    error!(
                        delivery = %handle,
                        credit_id,
                        error = %e,
                        "Failed to ack persisted credit; it will be redelivered"
                    );
                    Outcome::Unreachable
                }
            },
            Err(e) => {
                let requeue = !(e.is_permanent() && message.redelivered);
                if requeue {
                    warn!(
                        delivery = %handle,
                        redelivered = message.redelivered,
                        error = %e,
                        "Message processing failed, requeueing"
                    );
                } else {
                    error!(
                        delivery = %handle,
                        payload_bytes = message.payload.len(),
                        error = %e,
                        "Message failed again after redelivery, rejecting"
                    );
                }

                match session.nack(handle, requeue).await {
                    Ok(()) if requeue => Outcome::Requeued,
                    Ok(()) => Outcome::Rejected,
                    Err(nack_err) => {
                        error!(delivery = %handle, error = %nack_err, "Failed to nack message");
                        Outcome::Unreachable
                    }
                }
            }
        }
    }

    async fn process(
        &self,
        message: &QueuedMessage,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<i64, ProcessingError> {
        let record = IngestionRecord::from_slice(&message.payload)
            .map_err(ProcessingError::MalformedMessage)?;
        record.validate()?;

        let mut shutdown = shutdown.clone();
        tokio::select! {
            biased;
            result = self.store.add(&record) => result
                .map(|credit| credit.id)
                .map_err(ProcessingError::PersistenceFailure),
            _ = wait_for_shutdown(&mut shutdown) => Err(ProcessingError::Cancelled),
        }
    }
}

/// Resolves once the flag is true. Pends forever if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
