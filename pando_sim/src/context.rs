//! Simulation context implementing PandoContext for deterministic testing.

use pando_env::{Key, PandoContext};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Simulation context backed by deterministic time and RNG.
///
/// This implements `PandoContext` using:
/// - A virtual clock that only moves when the harness advances it
/// - A seeded ChaCha8 RNG for sentinel key resolution and workload shuffles
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Deterministic RNG shared by every clone
    rng: Arc<Mutex<ChaCha8Rng>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking holder cannot leave a u64 or an RNG half-written
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        *lock(&self.virtual_time_ns) += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *lock(&self.virtual_time_ns)
    }

    /// Runs `f` with exclusive access to the seeded RNG.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut ChaCha8Rng) -> R) -> R {
        f(&mut lock(&self.rng))
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            rng: Arc::clone(&self.rng),
        }
    }
}

impl PandoContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }

    fn random_key(&self) -> Key {
        self.with_rng(|rng| loop {
            let key = Key::random_from(rng.gen::<u64>(), rng.gen(), rng.gen());
            if !key.is_sentinel() {
                return key;
            }
        })
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_sim_context_deterministic_keys() {
        let ctx1 = SimContext::new(42);
        let ctx2 = SimContext::new(42);

        let keys1: Vec<Key> = (0..5).map(|_| ctx1.random_key()).collect();
        let keys2: Vec<Key> = (0..5).map(|_| ctx2.random_key()).collect();

        // Same seed = same key sequence
        assert_eq!(keys1, keys2);
        assert!(keys1.iter().all(|k| k.is_random() && !k.is_sentinel()));

        // Different seed = different keys
        let ctx3 = SimContext::new(43);
        assert_ne!(keys1[0], ctx3.random_key());
    }

    #[test]
    fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);
    }

    #[test]
    fn test_sim_context_clone_shares_time() {
        let ctx1 = SimContext::new(42);
        let ctx2 = ctx1.clone();

        ctx1.advance_time(Duration::from_secs(5));

        // Both should see the same time
        assert_eq!(ctx1.now(), ctx2.now());
    }
}
