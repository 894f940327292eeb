//! # probe-breaker
//!
//! An asynchronous circuit breaker with probing windows, cooldowns and an
//! injectable clock.
//!
//! A [`Breaker`] wraps one fallible async operation and decides, call by call,
//! whether to let it run. It moves between three states:
//!
//! - **Closed**: Normal operation. The first failure opens a probing window.
//! - **Half-Open**: A probing window is active. Failures and successes are
//!   counted; once enough failures have been seen the failure rate is judged.
//!   A high rate trips the breaker, a low one starts a fresh window, and a
//!   window that runs out without tripping closes the breaker again.
//! - **Open**: Calls are rejected with [`BreakerError::Open`] without invoking
//!   the operation. When the cooldown has elapsed a single call is let through
//!   while everyone else is still rejected: if it succeeds the breaker closes,
//!   if it fails the cooldown starts over.
//!
//! Deadlines are read from a [`Clock`], so tests can drive time with
//! [`MockClock`] instead of sleeping.
//!
//! ## Basic Usage
//!
//! ```rust
//! use probe_breaker::{Breaker, BreakerError, State};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let breaker = Breaker::<String, std::io::Error>::builder()
//!     .failure_count_threshold(5) // judge the rate after 5 failures
//!     .failure_rate_threshold(50.0) // trip at 50% failures
//!     .cooldown(Duration::from_secs(30))
//!     .build(|| async { Ok("pong".to_string()) })
//!     .expect("valid configuration");
//!
//! match breaker.run().await {
//!     Ok(reply) => println!("call succeeded: {}", reply),
//!     Err(BreakerError::Open) => println!("circuit is open, call was prevented"),
//!     Err(BreakerError::Upstream(err)) => println!("call failed: {}", err),
//! }
//!
//! assert_eq!(breaker.current_state(), State::Closed);
//! # });
//! ```
//!
//! Per-call arguments are captured by a closure passed to [`Breaker::call`]:
//!
//! ```rust
//! # use probe_breaker::{Breaker, BreakerConfig};
//! # tokio_test::block_on(async {
//! async fn fetch(id: u32) -> Result<u32, std::io::Error> {
//!     Ok(id * 2)
//! }
//!
//! let breaker = Breaker::new(|| fetch(0), BreakerConfig::default()).unwrap();
//! assert_eq!(breaker.call(|| fetch(21)).await.unwrap(), 42);
//! # });
//! ```
//!
//! ## Logging
//!
//! State changes are reported through [`tracing`]: tripping at `warn`,
//! recovery and probes at `info`, window bookkeeping at `debug`. Install a
//! subscriber to see them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod clock;
mod config;
mod error;
pub mod prelude;
mod state;
mod stats;

// Re-exports
pub use breaker::{Breaker, Snapshot};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{BreakerBuilder, BreakerConfig};
pub use error::{BreakerError, BreakerResult, ConfigError};
pub use state::State;
pub use stats::Totals;
