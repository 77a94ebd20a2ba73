//! Shared data models for the GenFlow backend.
//!
//! This crate provides Serde-serializable types for:
//! - Generation jobs and their lifecycle
//! - Generation request parameters and canonical fingerprints
//! - Normalized provider status reports
//! - WebSocket message schemas

pub mod job;
pub mod provider;
pub mod request;
pub mod role;
pub mod wire;

// Re-export common types
pub use job::{Job, JobId, JobKind, JobResult, JobStatus, OwnerScope};
pub use provider::{ProviderStatus, ProviderUpdate};
pub use request::{GenerationRequest, RequestFingerprint};
pub use role::Role;
pub use wire::{ClientMessage, PresenceStatus, ServerMessage};
