//! Asynchronous credit ingestion.
//!
//! Batches of constituted credits are published onto a durable AMQP queue,
//! drained by a poll-based consumer into PostgreSQL, and read back over
//! HTTP. Lookups are audited to Kafka on a best-effort side channel.

pub mod background;
pub mod broker;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{AppError, Result};
