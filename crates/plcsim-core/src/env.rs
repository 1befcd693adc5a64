//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples waveform generation and the update loop
//! from system resources (time, randomness). This enables:
//!
//! - Deterministic Simulation: tests drive a virtual clock and a seeded RNG,
//!   so STEP windows, SINE phases and RAMP positions can be asserted exactly.
//!
//! - Production Runtime: the server's `SystemEnv` uses real system resources
//!   without any code changes to the generators or the simulator.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time, randomness, and async sleeping.
///
/// Every wall-clock read made by a `ValueGenerator` and every sleep made by a
/// device update loop goes through this trait.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: Subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only the update loop sleeps; generators never do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Generators seed their sampling RNG from here, so a seeded environment
    /// yields reproducible RANDOM and STEP sequences.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
