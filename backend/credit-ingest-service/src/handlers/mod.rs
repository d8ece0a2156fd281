pub mod credits;
pub mod dto;
pub mod health;

use std::sync::Arc;

use actix_web::HttpRequest;

use crate::services::{CreditQueryService, RecordPublisher, RequestContext};
use crate::store::Store;

/// Shared handler state.
pub struct AppState {
    pub publisher: Arc<dyn RecordPublisher>,
    pub queries: Arc<CreditQueryService>,
    pub store: Arc<dyn Store>,
}

/// Audit context of an incoming request. The caller identity comes from the
/// `X-User-Id` header set by the gateway. The address is the socket peer;
/// forwarding headers are client-controlled and ignored.
pub fn request_context(req: &HttpRequest) -> RequestContext {
    RequestContext {
        user_id: req
            .headers()
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        ip_address: req.peer_addr().map(|addr| addr.ip().to_string()),
        path: req.path().to_string(),
        method: req.method().to_string(),
    }
}
