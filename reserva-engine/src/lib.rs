pub mod availability;
pub mod orchestrator;
pub mod pricing;
pub mod resiliency;
pub mod saga;

pub use availability::{AvailabilityConfig, AvailabilityService};
pub use orchestrator::{
    BookingOrchestrator, BookingServices, MockGatewayMode, MockPaymentGateway, OrchestratorConfig,
};
pub use pricing::{PricingConfig, PricingEngine};
pub use resiliency::{CircuitBreaker, CircuitState, RetryPolicy};
pub use saga::{Saga, SagaError, SagaStep};
