//! Production implementation of PandoContext.

use crate::key::Key;
use crate::PandoContext;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Production context backed by the system clock and thread-local entropy.
pub struct SystemContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl SystemContext {
    /// Creates a new SystemContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across stores and runtimes.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PandoContext for SystemContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn random_key(&self) -> Key {
        let mut rng = rand::thread_rng();
        loop {
            let key = Key::random_from(rng.gen::<u64>(), rng.gen(), rng.gen());
            if !key.is_sentinel() {
                return key;
            }
        }
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_context_time() {
        let ctx = SystemContext::new();
        let t1 = ctx.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = ctx.now();

        assert!(t2 > t1);
    }

    #[test]
    fn test_system_context_random_keys() {
        let ctx = SystemContext::new();
        let k1 = ctx.random_key();
        let k2 = ctx.random_key();

        assert!(k1.is_random());
        assert!(!k1.is_sentinel());
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_system_context_seed() {
        let ctx = SystemContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
