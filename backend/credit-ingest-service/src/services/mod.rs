pub mod audit;
pub mod consumer;
pub mod credit_query;
pub mod publisher;

pub use audit::{AuditSink, AuditTransport, ConsultationAuditor, RequestContext};
pub use consumer::{ConsumerState, CreditConsumer, CycleReport, ProcessingError};
pub use credit_query::CreditQueryService;
pub use publisher::{CreditPublisher, PublishError, RecordPublisher};
