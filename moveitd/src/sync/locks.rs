use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-file-name async mutexes: at most one action per name is in flight.
///
/// Slots are created on demand and dropped again once nobody holds or waits
/// for them, so the map only grows with concurrent activity.
#[derive(Debug, Default)]
pub struct NameLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub struct NameGuard<'a> {
    locks: &'a NameLocks,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLocks {
    pub async fn lock(&self, name: &str) -> NameGuard<'_> {
        let slot = Arc::clone(self.slots().entry(name.to_string()).or_default());
        let guard = slot.lock_owned().await;
        NameGuard {
            locks: self,
            name: name.to_string(),
            guard: Some(guard),
        }
    }

    pub fn active(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.locks.slots();
        if slots
            .get(&self.name)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.name);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    Upload,
    Delete,
}

#[derive(Debug, Default, Clone, Copy)]
struct Claim {
    in_flight: usize,
    touched: u64,
}

/// Tracks names the watcher asked to upload or to delete remotely, so a poll
/// cycle never acts on a snapshot that could not have seen the change yet.
///
/// Every poll cycle opens a new epoch before listing. A name is protected
/// during that cycle while its action is in flight, or when the action
/// finished at or after the cycle's epoch began. Pending uploads shield a
/// file from the deletion pass; pending deletes shield it from the download
/// pass.
#[derive(Debug, Default)]
pub struct ActionClaims {
    epoch: AtomicU64,
    claims: Mutex<HashMap<(ClaimKind, String), Claim>>,
}

pub struct ClaimGuard {
    claims: Arc<ActionClaims>,
    kind: ClaimKind,
    name: String,
}

impl ActionClaims {
    pub fn begin_snapshot(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn claim(self: &Arc<Self>, kind: ClaimKind, name: &str) -> ClaimGuard {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut claims = self.claims();
        let claim = claims.entry((kind, name.to_string())).or_default();
        claim.in_flight += 1;
        claim.touched = epoch;
        ClaimGuard {
            claims: Arc::clone(self),
            kind,
            name: name.to_string(),
        }
    }

    pub fn protects(&self, kind: ClaimKind, name: &str, snapshot_epoch: u64) -> bool {
        self.claims()
            .get(&(kind, name.to_string()))
            .is_some_and(|claim| claim.in_flight > 0 || claim.touched >= snapshot_epoch)
    }

    /// Forgets settled claims that can no longer affect `snapshot_epoch` or later.
    pub fn prune(&self, snapshot_epoch: u64) {
        self.claims()
            .retain(|_, claim| claim.in_flight > 0 || claim.touched >= snapshot_epoch);
    }

    fn release(&self, kind: ClaimKind, name: &str) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut claims = self.claims();
        if let Some(claim) = claims.get_mut(&(kind, name.to_string())) {
            claim.in_flight = claim.in_flight.saturating_sub(1);
            claim.touched = epoch;
        }
    }

    fn claims(&self) -> MutexGuard<'_, HashMap<(ClaimKind, String), Claim>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.release(self.kind, &self.name);
    }
}
