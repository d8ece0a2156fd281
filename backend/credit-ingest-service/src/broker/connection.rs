use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{BrokerConnector, BrokerError, BrokerSession};
use crate::config::BrokerEndpoint;

/// Lazily (re)connected broker session shared by one component.
///
/// The mutex guards acquisition only and is held across the connect, so
/// concurrent callers never open duplicate connections. Callers work on the
/// returned `Arc` outside the lock.
///
/// A failed acquisition is logged at `warn` once per outage; repeats while
/// the broker stays down go to `debug`.
pub struct BrokerConnection<C: BrokerConnector> {
    connector: C,
    endpoint: BrokerEndpoint,
    session: Mutex<Option<Arc<C::Session>>>,
    connected_once: AtomicBool,
    outage: AtomicBool,
}

impl<C: BrokerConnector> BrokerConnection<C> {
    pub fn new(connector: C, endpoint: BrokerEndpoint) -> Self {
        Self {
            connector,
            endpoint,
            session: Mutex::new(None),
            connected_once: AtomicBool::new(false),
            outage: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn queue_name(&self) -> &str {
        &self.endpoint.queue_name
    }

    /// Return the open session, reconnecting if the cached one is gone or
    /// closed.
    pub async fn acquire(&self) -> Result<Arc<C::Session>, BrokerError> {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            if session.is_open() {
                return Ok(Arc::clone(session));
            }
        }

        if let Some(stale) = slot.take() {
            if let Err(e) = stale.close().await {
                debug!(error = %e, "Ignoring error while closing stale broker session");
            }
        }

        match self.connect().await {
            Ok(session) => {
                let session = Arc::new(session);
                *slot = Some(Arc::clone(&session));

                let reconnect = self.connected_once.swap(true, Ordering::SeqCst);
                let recovered = self.outage.swap(false, Ordering::SeqCst);
                info!(
                    host = %self.endpoint.host,
                    port = self.endpoint.port,
                    queue = %self.endpoint.queue_name,
                    reconnect,
                    recovered,
                    "Connected to message broker"
                );
                Ok(session)
            }
            Err(e) => {
                if self.begin_outage() {
                    warn!(
                        host = %self.endpoint.host,
                        port = self.endpoint.port,
                        queue = %self.endpoint.queue_name,
                        error = %e,
                        "Failed to acquire broker connection"
                    );
                } else {
                    debug!(
                        queue = %self.endpoint.queue_name,
                        error = %e,
                        "Broker still unavailable"
                    );
                }
                Err(e)
            }
        }
    }

    /// True for the first failure since the last successful connect.
    fn begin_outage(&self) -> bool {
        !self.outage.swap(true, Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<C::Session, BrokerError> {
        let session = self.connector.open(&self.endpoint).await?;

        if let Err(e) = session.declare_queue(&self.endpoint.queue_name).await {
            let _ = session.close().await;
            return Err(BrokerError::ConnectionUnavailable(format!(
                "failed to declare queue {}: {}",
                self.endpoint.queue_name, e
            )));
        }

        Ok(session)
    }

    /// Drop the cached session so the next `acquire` reconnects.
    pub async fn invalidate(&self) {
        let stale = self.session.lock().await.take();
        if let Some(session) = stale {
            if let Err(e) = session.close().await {
                debug!(error = %e, "Ignoring error while closing invalidated broker session");
            }
        }
    }

    /// Readiness check: can a session be acquired right now.
    pub async fn health_check(&self) -> bool {
        match self.acquire().await {
            Ok(session) => session.is_open(),
            Err(_) => false,
        }
    }

    pub async fn close(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            match session.close().await {
                Ok(()) => info!(queue = %self.endpoint.queue_name, "Broker connection closed"),
                Err(e) => warn!(error = %e, "Error while closing broker connection"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{DeliveryHandle, QueuedMessage};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct StubSession {
        open: Arc<AtomicBool>,
        declare_fails: bool,
    }

    #[async_trait]
    impl BrokerSession for StubSession {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn declare_queue(&self, _queue: &str) -> Result<(), BrokerError> {
            if self.declare_fails {
                Err(BrokerError::Channel("PRECONDITION_FAILED".into()))
            } else {
                Ok(())
            }
        }

        async fn fetch(&self, _queue: &str) -> Result<Option<QueuedMessage>, BrokerError> {
            Ok(None)
        }

        async fn ack(&self, _handle: DeliveryHandle) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn nack(&self, _handle: DeliveryHandle, _requeue: bool) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(&self, _queue: &str, _payload: &[u8]) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), BrokerError> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubConnector {
        opens: AtomicUsize,
        refuse: AtomicBool,
        declare_fails: bool,
        last_open: std::sync::Mutex<Option<Arc<AtomicBool>>>,
    }

    #[async_trait]
    impl BrokerConnector for StubConnector {
        type Session = StubSession;

        async fn open(&self, _endpoint: &BrokerEndpoint) -> Result<StubSession, BrokerError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.refuse.load(Ordering::SeqCst) {
                return Err(BrokerError::ConnectionUnavailable("refused".into()));
            }
            let open = Arc::new(AtomicBool::new(true));
            *self.last_open.lock().unwrap() = Some(open.clone());
            Ok(StubSession {
                open,
                declare_fails: self.declare_fails,
            })
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_open_session() {
        let conn = BrokerConnection::new(StubConnector::default(), BrokerEndpoint::default());

        let first = conn.acquire().await.unwrap();
        let second = conn.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(conn.connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_reconnects_after_close() {
        let conn = BrokerConnection::new(StubConnector::default(), BrokerEndpoint::default());

        conn.acquire().await.unwrap();
        let flag = conn.connector.last_open.lock().unwrap().clone().unwrap();
        flag.store(false, Ordering::SeqCst);

        let session = conn.acquire().await.unwrap();
        assert!(session.is_open());
        assert_eq!(conn.connector.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_is_single_flight() {
        let conn = Arc::new(BrokerConnection::new(
            StubConnector::default(),
            BrokerEndpoint::default(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let conn = conn.clone();
                tokio::spawn(async move { conn.acquire().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(conn.connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_declare_failure_is_connection_unavailable() {
        let connector = StubConnector {
            declare_fails: true,
            ..Default::default()
        };
        let conn = BrokerConnection::new(connector, BrokerEndpoint::default());

        let err = conn.acquire().await.err().unwrap();
        assert!(matches!(err, BrokerError::ConnectionUnavailable(_)));
        assert!(!conn.health_check().await);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_session() {
        let conn = BrokerConnection::new(StubConnector::default(), BrokerEndpoint::default());

        let first = conn.acquire().await.unwrap();
        conn.invalidate().await;
        assert!(!first.is_open());

        let second = conn.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(conn.health_check().await);
    }

    #[tokio::test]
    async fn test_outage_warns_once_until_recovered() {
        let conn = BrokerConnection::new(StubConnector::default(), BrokerEndpoint::default());
        conn.connector.refuse.store(true, Ordering::SeqCst);

        assert!(conn.acquire().await.is_err());
        assert!(conn.outage.load(Ordering::SeqCst));
        assert!(conn.acquire().await.is_err());
        // Already in the outage: repeats are not the first failure.
        assert!(!conn.begin_outage());

        conn.connector.refuse.store(false, Ordering::SeqCst);
        conn.acquire().await.unwrap();
        assert!(!conn.outage.load(Ordering::SeqCst));
        // The next failure starts a new outage.
        assert!(conn.begin_outage());
    }
}
