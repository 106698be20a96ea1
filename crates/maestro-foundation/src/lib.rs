//! Maestro Foundation: the orchestration engine.
//!
//! Entry point is [`ModelOrchestrationSystem`]. The components it wires
//! together are usable on their own:
//!
//! - [`resource`]: host memory/CPU/GPU sampling and threshold events
//! - [`quantization`]: precision choice under memory constraints
//! - [`selector`]: eligibility filtering and strategy-based ranking
//! - [`collaboration`]: multi-model sessions and cooperation protocols
//! - [`api_service`]: remote services, credentials, retry and usage
//! - [`catalog`]: an in-memory [`ModelCatalog`](maestro_kernel::ModelCatalog)

// orchestration coordinator
pub mod orchestration;

// host resource sampling
pub mod resource;

pub mod quantization;
pub mod selector;
pub mod collaboration;

// remote API services
pub mod api_service;

pub mod catalog;
pub mod config;
pub mod logging;

pub use api_service::{
    ApiRequest, ApiResponse, ApiServiceIntegration, ApiServiceStatus, ApiUsage, BackoffStrategy,
    HttpTransport, ReqwestTransport, RetryPolicy, ServiceQuery, retry_with_policy,
};
pub use catalog::InMemoryModelCatalog;
pub use collaboration::{
    CollaborationResult, CollaborationSession, CollaborationStrategy,
    CollaborativeModelOrchestrator, SessionRequest,
};
pub use config::{ApiConfig, OrchestrationConfig, ResourceConfig, ThresholdConfig};
pub use logging::{LogFormat, init_tracing, try_init_tracing};
pub use orchestration::{
    MemoryOptimizationReport, ModelAssignment, ModelOrchestrationSystem, ModelRequest,
    ModelRoute, OrchestrationEvent, OrchestrationStatus, OrchestrationSystemBuilder,
};
pub use quantization::{
    QuantizationConstraints, QuantizationDecision, QuantizationManager, QuantizationPriority,
};
pub use resource::{ResourceMonitor, ResourceSnapshot, StaticProbe, SystemProbe, ThresholdEvent};
pub use selector::{
    PerformanceRecord, SelectionCriteria, SelectionStrategy, SpecializedModelSelector,
};
