use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use credit_ingest_service::{
    background::{shutdown_background_tasks, spawn_background_tasks},
    broker::{AmqpConnector, BrokerConnection},
    handlers::{credits, health, AppState},
    metrics,
    services::{AuditSink, ConsultationAuditor, CreditConsumer, CreditPublisher, CreditQueryService},
    store::{create_pool, run_migrations, PgCreditStore, Store},
    Config,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const AUDIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credit_ingest_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        env = %config.app.env,
        port = config.app.port,
        broker = ?config.broker,
        "Starting credit-ingest-service"
    );

    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    let store: Arc<dyn Store> = Arc::new(PgCreditStore::new(pool));

    // Publisher and consumer each get their own AMQP connection.
    let publisher_connection = Arc::new(BrokerConnection::new(AmqpConnector, config.broker.clone()));
    if let Err(e) = publisher_connection.acquire().await {
        tracing::warn!(error = %e, "Broker not reachable at startup, publishing will retry on demand");
    }
    let publisher = Arc::new(CreditPublisher::new(publisher_connection));

    let consumer_connection = Arc::new(BrokerConnection::new(AmqpConnector, config.broker.clone()));
    let consumer = Arc::new(CreditConsumer::new(
        consumer_connection,
        store.clone(),
        config.consumer.clone(),
    ));

    let audit_sink = Arc::new(AuditSink::from_config(&config.audit));
    let queries = Arc::new(CreditQueryService::new(
        store.clone(),
        ConsultationAuditor::new(audit_sink.clone()),
    ));

    let tasks = spawn_background_tasks(consumer);

    let state = web::Data::new(AppState {
        publisher: publisher.clone(),
        queries,
        store,
    });

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let server_result = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::Logger::default())
            .wrap(metrics::RequestMetrics)
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(health::register_routes)
            .configure(credits::register_routes)
    })
    .bind(&addr)
    .with_context(|| format!("Failed to bind {addr}"))?
    .run()
    .await;

    shutdown_background_tasks(tasks).await;
    audit_sink.flush(AUDIT_FLUSH_TIMEOUT).await;
    publisher.close().await;
    tracing::info!("credit-ingest-service stopped");

    server_result.context("HTTP server error")
}
