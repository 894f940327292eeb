//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use probe_breaker::prelude::*;
//!
//! let config = BreakerConfig::default();
//! assert_eq!(config.failure_count_threshold, 10);
//! ```

pub use crate::{Breaker, BreakerConfig, BreakerError, BreakerResult, Clock, State};
