//! In-memory doubles for the broker, store and audit transport.

#![allow(dead_code)]

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use credit_ingest_service::broker::{
    BrokerConnection, BrokerConnector, BrokerError, BrokerSession, DeliveryHandle, QueuedMessage,
};
use credit_ingest_service::config::BrokerEndpoint;
use credit_ingest_service::models::{AuditEvent, CreditRecord, IngestionRecord};
use credit_ingest_service::services::audit::{AuditError, AuditTransport};
use credit_ingest_service::store::{CreditFilter, Store, StoreError};
use rust_decimal::Decimal;
use tokio::sync::Notify;

pub fn record(credit_number: &str) -> IngestionRecord {
    IngestionRecord {
        credit_number: credit_number.to_string(),
        invoice_number: format!("nf-{credit_number}"),
        constitution_date: NaiveDate::from_ymd_opt(2024, 2, 25).unwrap(),
        tax_amount: Decimal::from_str("1500.75").unwrap(),
        credit_type: "ISSQN".to_string(),
        simplified_tax_regime: true,
        tax_rate: Decimal::from_str("5.00").unwrap(),
        billed_amount: Decimal::from_str("30000.00").unwrap(),
        deduction_amount: Decimal::from_str("5000.00").unwrap(),
        calculation_base: Decimal::from_str("25000.00").unwrap(),
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BrokerState {
    pub ready: VecDeque<QueuedMessage>,
    pub in_flight: Vec<QueuedMessage>,
    pub acked: Vec<DeliveryHandle>,
    pub nacked: Vec<(DeliveryHandle, bool)>,
    pub published: Vec<(String, Vec<u8>)>,
    pub declared: Vec<String>,
    pub available: bool,
    pub generation: u64,
    pub connect_count: usize,
    /// Publishing fails once this many messages are on record.
    pub fail_publish_after: Option<usize>,
    pub fail_ack: bool,
    next_tag: u64,
}

impl BrokerState {
    fn next_handle(&mut self) -> DeliveryHandle {
        self.next_tag += 1;
        DeliveryHandle(self.next_tag)
    }
}

#[derive(Clone)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                available: true,
                ..Default::default()
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn enqueue(&self, payload: impl Into<Vec<u8>>) -> DeliveryHandle {
        let mut state = self.state();
        let handle = state.next_handle();
        state.ready.push_back(QueuedMessage {
            handle,
            payload: payload.into(),
            redelivered: false,
        });
        handle
    }

    pub fn enqueue_record(&self, record: &IngestionRecord) -> DeliveryHandle {
        self.enqueue(record.to_wire().unwrap())
    }

    /// Taking the broker down closes every open session.
    pub fn set_available(&self, available: bool) {
        let mut state = self.state();
        if state.available && !available {
            state.generation += 1;
        }
        state.available = available;
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            broker: self.clone(),
        }
    }

    pub fn connection(&self, queue: &str) -> Arc<BrokerConnection<FakeConnector>> {
        let endpoint = BrokerEndpoint {
            queue_name: queue.to_string(),
            ..BrokerEndpoint::default()
        };
        Arc::new(BrokerConnection::new(self.connector(), endpoint))
    }

    pub fn published_records(&self) -> Vec<IngestionRecord> {
        self.state()
            .published
            .iter()
            .map(|(_, payload)| IngestionRecord::from_slice(payload).unwrap())
            .collect()
    }
}

pub struct FakeConnector {
    broker: FakeBroker,
}

#[async_trait]
impl BrokerConnector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self, _endpoint: &BrokerEndpoint) -> Result<FakeSession, BrokerError> {
        tokio::task::yield_now().await;
        let mut state = self.broker.state();
        state.connect_count += 1;
        if !state.available {
            return Err(BrokerError::ConnectionUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(FakeSession {
            broker: self.broker.clone(),
            generation: state.generation,
            closed: AtomicBool::new(false),
        })
    }
}

pub struct FakeSession {
    broker: FakeBroker,
    generation: u64,
    closed: AtomicBool,
}

impl FakeSession {
    fn live_state(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        let state = self.broker.state();
        if self.closed.load(Ordering::SeqCst)
            || !state.available
            || state.generation != self.generation
        {
            return Err(BrokerError::Channel("channel closed".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl BrokerSession for FakeSession {
    fn is_open(&self) -> bool {
        self.live_state().is_ok()
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.live_state()?.declared.push(queue.to_string());
        Ok(())
    }

    async fn fetch(&self, _queue: &str) -> Result<Option<QueuedMessage>, BrokerError> {
        let mut state = self.live_state()?;
        let message = state.ready.pop_front();
        if let Some(message) = &message {
            state.in_flight.push(message.clone());
        }
        Ok(message)
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), BrokerError> {
        let mut state = self.live_state()?;
        if state.fail_ack {
            return Err(BrokerError::Channel("ack on closed channel".to_string()));
        }
        state.in_flight.retain(|m| m.handle != handle);
        state.acked.push(handle);
        Ok(())
    }

    async fn nack(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.live_state()?;
        state.nacked.push((handle, requeue));

        let position = state.in_flight.iter().position(|m| m.handle == handle);
        if let Some(message) = position.map(|i| state.in_flight.remove(i)) {
            if requeue {
                let handle = state.next_handle();
                state.ready.push_front(QueuedMessage {
                    handle,
                    payload: message.payload,
                    redelivered: true,
                });
            }
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        tokio::task::yield_now().await;
        let mut state = self.live_state()?;
        if let Some(limit) = state.fail_publish_after {
            if state.published.len() >= limit {
                return Err(BrokerError::Channel("publish rejected".to_string()));
            }
        }
        state.published.push((queue.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingStore {
    credits: Mutex<Vec<CreditRecord>>,
    next_id: AtomicUsize,
    add_calls: AtomicUsize,
    fail: AtomicBool,
    reject_rows: AtomicBool,
    delay: Option<Duration>,
    pub add_started: Notify,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes `add` fail the way PostgreSQL refuses an oversized value.
    pub fn set_rejecting_rows(&self, reject: bool) {
        self.reject_rows.store(reject, Ordering::SeqCst);
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn credits(&self) -> Vec<CreditRecord> {
        self.credits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for RecordingStore {
    async fn add(&self, record: &IngestionRecord) -> Result<CreditRecord, StoreError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.add_started.notify_one();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        if self.reject_rows.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::Database(Box::new(
                ValueTooLong,
            ))));
        }

        let credit = CreditRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1,
            record: record.clone(),
        };
        self.credits.lock().unwrap().push(credit.clone());
        Ok(credit)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<CreditRecord>, StoreError> {
        Ok(self
            .credits
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn get_all(&self) -> Result<Vec<CreditRecord>, StoreError> {
        Ok(self.credits())
    }

    async fn update(&self, id: i64, record: &IngestionRecord) -> Result<CreditRecord, StoreError> {
        let mut credits = self.credits.lock().unwrap();
        let credit = credits
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound(id))?;
        credit.record = record.clone();
        Ok(credit.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut credits = self.credits.lock().unwrap();
        let before = credits.len();
        credits.retain(|c| c.id != id);
        Ok(credits.len() != before)
    }

    async fn find(&self, filter: &CreditFilter) -> Result<Vec<CreditRecord>, StoreError> {
        let mut found: Vec<CreditRecord> = self
            .credits
            .lock()
            .unwrap()
            .iter()
            .filter(|c| filter_matches(filter, &c.record))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.record.constitution_date.cmp(&a.record.constitution_date));
        Ok(found)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

fn filter_matches(filter: &CreditFilter, record: &IngestionRecord) -> bool {
    match filter {
        CreditFilter::CreditNumber(n) => &record.credit_number == n,
        CreditFilter::InvoiceNumber(n) => &record.invoice_number == n,
        CreditFilter::CreditType(t) => &record.credit_type == t,
        CreditFilter::ConstitutionDate(d) => &record.constitution_date == d,
        CreditFilter::SimplifiedTaxRegime(b) => &record.simplified_tax_regime == b,
    }
}

/// SQLSTATE 22001, string data right truncation.
#[derive(Debug)]
pub struct ValueTooLong;

impl fmt::Display for ValueTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(sqlx::error::DatabaseError::message(self))
    }
}

impl std::error::Error for ValueTooLong {}

impl sqlx::error::DatabaseError for ValueTooLong {
    fn message(&self) -> &str {
        "value too long for type character varying(50)"
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed("22001"))
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        sqlx::error::ErrorKind::Other
    }
}

// ---------------------------------------------------------------------------
// Audit transport
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(AuditEvent, Vec<u8>)>>,
    attempts: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(AuditEvent, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditTransport for RecordingTransport {
    async fn send(&self, event: &AuditEvent, payload: &[u8]) -> Result<(), AuditError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AuditError::Transport("broker down".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((event.clone(), payload.to_vec()));
        Ok(())
    }
}
