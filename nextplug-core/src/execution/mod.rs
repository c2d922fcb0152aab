//! Operation execution.
//!
//! Every tool and action call passes through the same gate sequence: state
//! check, capability lookup, permission, rate limit, input schema, request
//! middleware, the handler under its timeout, then response or error
//! middleware. Calls admitted past the rate limiter are recorded in the
//! plugin's performance figures whether they succeed or not.

pub mod engine;
pub mod rate_limit;

pub use engine::{ExecutionEngine, ExecutionStats};
pub use rate_limit::RateLimiter;
