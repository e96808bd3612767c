//! Nullifier mutual exclusion and cooldown.
//!
//! A nullifier is either unlocked, locked by exactly one in-flight flow, or
//! cooling down after a flow finished. Locks live in process memory; the
//! cooldown table goes through a [`CooldownStore`] so it can outlive a restart.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::nullifier::{Nullifier, NullifierKey};
use crate::error::RelayerError;
use crate::ports::store::{CooldownStore, StoreError};

struct GuardInner {
    locks: Mutex<HashSet<NullifierKey>>,
    cooldowns: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

/// Shared handle; clones refer to the same registry.
#[derive(Clone)]
pub struct NullifierGuard {
    inner: Arc<GuardInner>,
}

impl NullifierGuard {
    pub fn new(cooldowns: Arc<dyn CooldownStore>, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                locks: Mutex::new(HashSet::new()),
                cooldowns,
                clock,
                cooldown,
            }),
        }
    }

    fn locks(&self) -> MutexGuard<'_, HashSet<NullifierKey>> {
        // The set is valid after any panic mid-insert/remove.
        self.inner
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock for `key`. `false` means another flow holds it.
    pub fn acquire(&self, key: NullifierKey) -> bool {
        let acquired = self.locks().insert(key);
        debug!(%key, acquired, "nullifier lock");
        acquired
    }

    /// Drop the lock for `key`. Safe to call when not held.
    pub fn release(&self, key: NullifierKey) {
        if self.locks().remove(&key) {
            debug!(%key, "nullifier released");
        }
    }

    pub fn is_locked(&self, key: NullifierKey) -> bool {
        self.locks().contains(&key)
    }

    /// `true` if `key` may be processed now; `false` while its cooldown runs.
    pub fn check_cooldown(&self, key: NullifierKey) -> Result<bool, StoreError> {
        Ok(self.cooldown_remaining(key)?.is_none())
    }

    /// Milliseconds until the cooldown for `key` ends, if one is running.
    pub fn cooldown_remaining(&self, key: NullifierKey) -> Result<Option<u64>, StoreError> {
        let now = self.inner.clock.now_ms();
        Ok(self
            .inner
            .cooldowns
            .cooldown_until(&key)?
            .filter(|until| *until > now)
            .map(|until| until - now))
    }

    pub fn start_cooldown(&self, key: NullifierKey) -> Result<(), StoreError> {
        let until = self
            .inner
            .clock
            .now_ms()
            .saturating_add(self.inner.cooldown.as_millis() as u64);
        self.inner.cooldowns.set_cooldown(&key, until)
    }

    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        self.inner.cooldowns.purge_expired(self.inner.clock.now_ms())
    }

    fn ensure_not_cooling(&self, chain_id: u64, nullifiers: &[Nullifier]) -> Result<(), RelayerError> {
        for nullifier in nullifiers {
            let key = NullifierKey::new(chain_id, *nullifier);
            if let Some(retry_after_ms) = self.cooldown_remaining(key)? {
                return Err(RelayerError::CooldownActive {
                    nullifier: *nullifier,
                    retry_after_ms,
                });
            }
        }
        Ok(())
    }

    /// Lock every nullifier of one flow, or none of them.
    ///
    /// Cooldowns are checked before and again after locking, since another
    /// flow's lease may drop in between. If any lock is taken already, or the
    /// second check hits, the locks acquired so far are released without
    /// starting a cooldown.
    pub fn acquire_all(
        &self,
        chain_id: u64,
        nullifiers: &[Nullifier],
    ) -> Result<NullifierLease, RelayerError> {
        self.ensure_not_cooling(chain_id, nullifiers)?;

        let mut lease = NullifierLease {
            guard: self.clone(),
            keys: Vec::with_capacity(nullifiers.len()),
            cooldown_on_drop: false,
        };
        for nullifier in nullifiers {
            let key = NullifierKey::new(chain_id, *nullifier);
            if !self.acquire(key) {
                // Dropping the lease releases what was taken, without cooldown.
                return Err(RelayerError::AlreadyProcessing(*nullifier));
            }
            lease.keys.push(key);
        }
        self.ensure_not_cooling(chain_id, nullifiers)?;
        lease.cooldown_on_drop = true;
        Ok(lease)
    }
}

/// Locks held by one flow. Dropping it, on any exit path, starts the cooldown
/// for each key and then releases the locks.
pub struct NullifierLease {
    guard: NullifierGuard,
    keys: Vec<NullifierKey>,
    cooldown_on_drop: bool,
}

impl NullifierLease {
    pub fn keys(&self) -> &[NullifierKey] {
        &self.keys
    }
}

impl Drop for NullifierLease {
    fn drop(&mut self) {
        for key in &self.keys {
            if self.cooldown_on_drop {
                if let Err(e) = self.guard.start_cooldown(*key) {
                    warn!(%key, error = %e, "failed to record nullifier cooldown");
                }
            }
            self.guard.release(*key);
        }
    }
}
