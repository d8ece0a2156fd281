//! Message broker access.
//!
//! The pipeline talks to the broker through two seams: a [`BrokerConnector`]
//! that opens sessions and a [`BrokerSession`] that carries one live
//! connection plus channel. [`BrokerConnection`] owns the cached session and
//! reconnects lazily; [`amqp`] is the production implementation.

pub mod amqp;
pub mod connection;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::BrokerEndpoint;

pub use amqp::{AmqpConnector, AmqpSession};
pub use connection::BrokerConnection;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("broker channel error: {0}")]
    Channel(String),
}

/// Broker-issued token for one delivered, unacknowledged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(pub u64);

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One fetched message, owned by the consumer until it is acked or nacked.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub handle: DeliveryHandle,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// A live connection and channel to the broker.
#[async_trait]
pub trait BrokerSession: Send + Sync + 'static {
    /// Both the connection and the channel are usable.
    fn is_open(&self) -> bool;

    /// Declare `queue` durable, non-exclusive and non-auto-delete.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Pull at most one message with manual acknowledgement. `None` when the
    /// queue is empty.
    async fn fetch(&self, queue: &str) -> Result<Option<QueuedMessage>, BrokerError>;

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), BrokerError>;

    async fn nack(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), BrokerError>;

    /// Publish a persistent JSON message to the default exchange, routed to
    /// `queue`.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Opens broker sessions for an endpoint.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    type Session: BrokerSession;

    async fn open(&self, endpoint: &BrokerEndpoint) -> Result<Self::Session, BrokerError>;
}
