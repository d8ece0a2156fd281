//! Background task management
//!
//! The queue consumer runs on its own task for the life of the process and
//! stops through the shared `watch` shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::BrokerConnector;
use crate::services::CreditConsumer;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Background task handles for graceful shutdown
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    consumer_handle: JoinHandle<()>,
}

pub fn spawn_background_tasks<C: BrokerConnector>(
    consumer: Arc<CreditConsumer<C>>,
) -> BackgroundTasks {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_handle = tokio::spawn(async move {
        consumer.run(shutdown_rx).await;
    });
    tracing::info!("Credit consumer task spawned");

    BackgroundTasks {
        shutdown_tx,
        consumer_handle,
    }
}

/// Signal shutdown and wait for the consumer to resolve its in-flight message.
pub async fn shutdown_background_tasks(tasks: BackgroundTasks) {
    tracing::info!("Shutting down background tasks...");
    let _ = tasks.shutdown_tx.send(true);

    let mut handle = tasks.consumer_handle;
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
        Ok(Ok(())) => tracing::info!("Credit consumer shut down gracefully"),
        Ok(Err(e)) => tracing::error!(error = %e, "Credit consumer task failed"),
        Err(_) => {
            tracing::warn!("Credit consumer did not shut down within timeout, aborting");
            handle.abort();
        }
    }
}
