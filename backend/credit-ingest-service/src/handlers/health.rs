use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::warn;

use super::AppState;

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Ready when both the database and the broker answer.
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    let database = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Readiness: database ping failed");
            false
        }
    };
    let broker = state.publisher.broker_ready().await;

    let body = json!({
        "status": if database && broker { "ready" } else { "not_ready" },
        "checks": {
            "database": database,
            "broker": broker,
        }
    });

    if database && broker {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/ready", web::get().to(ready));
}
