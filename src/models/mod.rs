//! # Stage: Model Routing
//!
//! ## Responsibility
//! Describe the available AI models ([`ModelRegistry`]) and choose the
//! primary/fallback pair for each request ([`ModelSelector`]).
//!
//! ## Guarantees
//! - Every use-case has a resolved primary and a distinct fallback
//! - Selection is deterministic: same use-case, tier and registry give the
//!   same [`Selection`]
//! - Critical-tier requests always use the emergency override model at a
//!   temperature of at most 0.3
//!
//! ## NOT Responsible For
//! - Calling the models (that belongs to `gateway`)
//! - Rate limiting (that belongs to `resilience`)

pub mod registry;
pub mod selector;

pub use registry::{ModelProfile, ModelRegistry, ModelRoute, RegistryError, RouteConfig, UseCase};
pub use selector::{ModelSelector, Selection, EMERGENCY_MAX_TEMPERATURE};
