//! Status reconciliation between providers and the job registry.
//!
//! One scheduler loop polls every live job at a fixed interval;
//! webhook deliveries arrive out of band. Both paths converge on a
//! single funnel ([`Reconciler::apply_status`]) so the registry's
//! terminal-state lock is the only arbiter of racing reports.

pub mod error;
pub mod reconciler;

pub use error::{ReconcilerError, ReconcilerResult};
pub use reconciler::{Reconciler, ReconcilerConfig, StatusSource};
