use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::debug;

use super::AuditSink;
use crate::models::AuditEvent;

pub const CONSULTATION_EVENT_TYPE: &str = "ConsultationRequest";
pub const CREDIT_ENTITY_TYPE: &str = "CreditConsult";

/// Who asked, from where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub path: String,
    pub method: String,
}

/// Turns read operations into `ConsultationRequest` audit events.
#[derive(Clone)]
pub struct ConsultationAuditor {
    sink: Arc<AuditSink>,
}

impl ConsultationAuditor {
    pub fn new(sink: Arc<AuditSink>) -> Self {
        Self { sink }
    }

    pub fn build_event(
        operation: &str,
        query: Value,
        result: Value,
        context: &RequestContext,
    ) -> AuditEvent {
        let mut event = AuditEvent::new(CONSULTATION_EVENT_TYPE, CREDIT_ENTITY_TYPE, operation);
        event.user_id = context.user_id.clone();
        event.ip_address = context.ip_address.clone();
        event.data = Some(json!({ "query": query, "result": result }));
        event
            .metadata
            .insert("requestPath".to_string(), Value::String(context.path.clone()));
        event
            .metadata
            .insert("requestMethod".to_string(), Value::String(context.method.clone()));
        event
    }

    /// Fire-and-forget; the returned handle is only useful to tests and
    /// shutdown code.
    pub fn record(
        &self,
        operation: &str,
        query: Value,
        result: Value,
        context: &RequestContext,
    ) -> Option<JoinHandle<()>> {
        if !self.sink.is_available() {
            debug!(operation, "Audit sink unavailable, consultation not audited");
            return None;
        }

        let event = Self::build_event(operation, query, result, context);
        self.sink.spawn_publish(event)
    }
}
