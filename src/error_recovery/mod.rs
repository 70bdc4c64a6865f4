//! Error recovery for remote calls
//!
//! Linear-backoff retries for transient failures plus bounded-time execution
//! for device commands.

pub mod retry_policy;

// Re-export commonly used types
pub use retry_policy::{CallOutcome, RetryExecutor, RetryPolicy, RetryStats};
