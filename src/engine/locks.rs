//! Identity-key lock striping.
//!
//! Resolutions that share an email or phone number must not interleave their
//! read-decide-write sequences. Each key hashes (blake3) onto one of a fixed
//! number of stripes; a resolution holds the stripes of all of its keys for
//! its whole duration. Stripes are always taken in ascending index order, so
//! two resolutions can never wait on each other in a cycle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::observation::IdentityKey;

/// Fixed set of stripes keyed by identity-key hash.
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
}

/// Holds the stripes of one resolution; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    stripes: Vec<usize>,
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl KeyGuard<'_> {
    /// Indices of the held stripes, ascending.
    #[must_use]
    pub fn stripes(&self) -> &[usize] {
        &self.stripes
    }
}

impl KeyLocks {
    /// Creates `count` stripes (at least one).
    #[must_use]
    pub fn new(count: usize) -> Self {
        let stripes = (0..count.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes }
    }

    /// Number of stripes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; there is at least one stripe.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Stripe index for `key`.
    #[must_use]
    pub fn stripe_of(&self, key: &IdentityKey<'_>) -> usize {
        let digest = blake3::hash(&key.hash_input());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (u64::from_le_bytes(prefix) % self.stripes.len() as u64) as usize;
        idx
    }

    /// Blocks until every stripe covering `keys` is held.
    pub fn acquire(&self, keys: &[IdentityKey<'_>]) -> KeyGuard<'_> {
        let mut stripes: Vec<usize> = keys.iter().map(|k| self.stripe_of(k)).collect();
        stripes.sort_unstable();
        stripes.dedup();

        // The stripes guard no data, so a poisoned stripe is still usable.
        let guards = stripes
            .iter()
            .map(|&i| self.stripes[i].lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        KeyGuard {
            stripes,
            _guards: guards,
        }
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LOCK_STRIPES)
    }
}
