//! SkyTrack Environment Abstraction Layer
//!
//! This crate lets the simulation engine run against either the real world
//! or a fully controlled one. Everything that would make a flight
//! non-reproducible is routed through one trait:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - Scheduling (`spawn()`)
//! - Randomness (`rand_unit()`)
//!
//! Production uses [`TokioContext`] (tokio timers, OS entropy). Tests use
//! [`SeededContext`], where sleeping advances a virtual clock and every
//! obstacle draw comes from a ChaCha8 stream derived from a single 64-bit
//! seed, so any obstacle sequence is reproducible from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use skytrack_env::Environment;
//!
//! async fn tick_loop<E: Environment>(env: &E) {
//!     loop {
//!         env.sleep(Duration::from_millis(2000)).await;
//!         if env.rand_unit() > 0.95 {
//!             // obstacle this tick
//!         }
//!     }
//! }
//! ```

mod context;
mod seeded;
mod tokio_impl;

pub use context::Environment;
pub use seeded::SeededContext;
pub use tokio_impl::TokioContext;
