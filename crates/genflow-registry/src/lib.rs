//! In-memory job registry and event stream.
//!
//! The registry is the single source of truth for job state. All
//! mutations flow through it so the terminal-state lock is enforced in
//! exactly one place, and every accepted mutation is published on a
//! broadcast stream for realtime fan-out.

pub mod event;
pub mod registry;

pub use event::JobEvent;
pub use registry::{JobRegistry, JobUpdate, RegistryConfig, RegistryError, UpdateOutcome};
