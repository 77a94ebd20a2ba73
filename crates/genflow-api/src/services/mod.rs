//! Request-path and background services.

pub mod coalescer;
pub mod relay;

pub use coalescer::{CoalescerConfig, RetryPolicy, SubmitError, SubmitReceipt, SubmitService};
pub use relay::relay_job_events;
