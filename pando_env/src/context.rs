//! Core environment context trait for Pando stores and runtimes.

use crate::key::Key;
use std::time::Duration;

/// The source of every non-deterministic input the engine consumes.
///
/// Stores draw fresh keys for sentinel inserts from here, and the runtime
/// reads the clock for its reports. Swapping the implementation is enough to
/// make a whole run reproducible.
///
/// # Implementations
///
/// - **Production**: `SystemContext` - wraps `Instant`, thread RNG
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
pub trait PandoContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Draws a fresh random key with the random-domain bit set.
    ///
    /// Used to resolve [`Key::SENTINEL`] inserts. Implementations must never
    /// return the sentinel itself.
    fn random_key(&self) -> Key;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
