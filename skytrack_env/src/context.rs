//! Core environment trait for SkyTrack components.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the simulation engine can
/// run in both production (tokio) and deterministic test environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, thread-local entropy
/// - **Tests**: `SeededContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// Engine code must never reach for `tokio::time` or `rand` directly; all
/// timing and randomness flows through this trait so a seeded context can
/// replay an exact obstacle sequence.
#[async_trait]
pub trait Environment: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since context creation.
    ///
    /// In a seeded context this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for record timestamps.
    ///
    /// In a seeded context this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`.
    /// In a seeded context: advances the virtual clock.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Draws a uniform random number in `[0, 1)`.
    ///
    /// Drives obstacle triggers and altitude jitter. The seeded context
    /// derives every draw from the master seed.
    fn rand_unit(&self) -> f64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
