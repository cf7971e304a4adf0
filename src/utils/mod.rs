//! # Utility Modules
//!
//! Supporting utilities for logging, timing, fault isolation and metrics.
//!
//! ## Components
//! - **Fault**: panic capture around callback futures
//! - **Logging**: Structured logging configuration
//! - **Timeout**: Default timeouts and async timeout wrappers
//! - **Metrics**: Thread-safe observability counters

pub mod fault;
pub mod logging;
pub mod metrics;
pub mod timeout;
