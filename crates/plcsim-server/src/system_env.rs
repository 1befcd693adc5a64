//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` drives waveform clocks from `std::time::Instant`, sleeps the
//! update loop on the tokio timer, and seeds generators from the OS.

use std::time::Duration;

use plcsim_core::env::Environment;

/// Production environment using system time and OS randomness.
///
/// This implementation:
/// - Uses `std::time::Instant::now()` for time
/// - Uses `tokio::time::sleep()` for async sleeping
/// - Uses `getrandom` for generator seeds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // Fixed seed fallback
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}
