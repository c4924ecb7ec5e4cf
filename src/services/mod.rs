pub mod orchestrator;
pub mod resolver;

pub use orchestrator::{PaymentCreated, PaymentLinkCreated, PaymentOrchestrator, RefundCompleted};
pub use resolver::{FallbackConfig, RoutingResolver};
