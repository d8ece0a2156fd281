use std::time::{Duration, Instant};

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpResponse};
use futures::future::{ready, LocalBoxFuture, Ready};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "credit_ingest_http_requests_total",
            "Total HTTP requests handled by credit-ingest-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create credit_ingest_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register credit_ingest_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "credit_ingest_http_request_duration_seconds",
            "HTTP request latency for credit-ingest-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create credit_ingest_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register credit_ingest_http_request_duration_seconds");
    histogram
});

/// Consumed messages by terminal outcome.
static CONSUMER_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "credit_ingest_consumer_messages_total",
            "Queue messages handled by the consumer, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create credit_ingest_consumer_messages_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register credit_ingest_consumer_messages_total");
    counter
});

static CONSUMER_CYCLES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "credit_ingest_consumer_cycles_total",
            "Consumer poll cycles, by whether the broker was reachable",
        ),
        &["broker"],
    )
    .expect("failed to create credit_ingest_consumer_cycles_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register credit_ingest_consumer_cycles_total");
    counter
});

static PUBLISHED_MESSAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "credit_ingest_published_messages_total",
        "Records published onto the ingestion queue",
    )
    .expect("failed to create credit_ingest_published_messages_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register credit_ingest_published_messages_total");
    counter
});

static AUDIT_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "credit_ingest_audit_events_total",
            "Audit events handed to the audit sink, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create credit_ingest_audit_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register credit_ingest_audit_events_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn record_consumed(outcome: &str) {
    CONSUMER_MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_cycle(broker_reachable: bool) {
    let label = if broker_reachable { "up" } else { "down" };
    CONSUMER_CYCLES_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_published(count: usize) {
    PUBLISHED_MESSAGES_TOTAL.inc_by(count as u64);
}

pub fn record_audit(outcome: &str) {
    AUDIT_EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Records count and latency per request.
///
/// Paths are labelled by their matched route pattern so ids do not explode
/// label cardinality.
pub struct RequestMetrics;

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestMetricsService { service }))
    }
}

pub struct RequestMetricsService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestMetricsService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let route = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        let method = req.method().to_string();
        let started = Instant::now();
        let response = self.service.call(req);

        Box::pin(async move {
            let result = response.await;
            let status = result
                .as_ref()
                .map(|res| res.status().as_u16())
                .unwrap_or(500);
            observe_http_request(&method, &route, status, started.elapsed());
            result
        })
    }
}
