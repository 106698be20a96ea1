//! Contracts and shared types for the Maestro orchestration engine.
//!
//! This crate defines what the orchestration core talks to: model
//! descriptors, the [`ModelAdapter`](adapter::ModelAdapter) and
//! [`ModelCatalog`](catalog::ModelCatalog) seams, the
//! [`AdminSource`](admin::AdminSource) for remote services and
//! credentials, the error taxonomy and the configuration loader.
//! Implementations live in `maestro-foundation`.

pub mod adapter;
pub mod admin;
pub mod catalog;
pub mod config;
pub mod error;
pub mod model;
pub mod task;
pub mod tier;

pub use adapter::ModelAdapter;
pub use admin::{AdminSource, ApiCredentials, ApiServiceConfig, AuthType, UserSettings};
pub use catalog::{AdapterFactory, ModelCatalog};
pub use error::{
    IntoOrchestratorReport, KernelError, KernelResult, NetworkErrorKind, OrchestratorError,
    OrchestratorReport, OrchestratorResult,
};
pub use model::{
    AvailableMemory, CapabilityMetadata, LoadOptions, LoadState, MemoryRequirement,
    ModelCriteria, ModelDescriptor, ModelType, QuantizationLevel,
};
pub use task::{
    ConsensusVerdict, ExecuteOptions, ModelContribution, Subtask, TaskInput, TaskOutput,
    TokenUsage,
};
pub use tier::ModelTier;
