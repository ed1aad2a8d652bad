use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::host::DocumentStore;
use crate::script::{AppliedConfiguration, LoadedConfiguration, ScriptId};
use crate::stamp::InputsStamp;

/// Two-tier configuration cache: the applied map (visible to analysis) and
/// the per-script pending slot (loaded, awaiting user acceptance).
///
/// Both tiers share one mutex so that storing an applied configuration and
/// evicting the pending entry for the same script is a single atomic step.
/// The pending tier is advisory: the environment may clear it at any time
/// without breaking the engine.
#[derive(Default)]
pub struct ConfigurationCache {
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    applied: HashMap<ScriptId, AppliedConfiguration>,
    pending: HashMap<ScriptId, LoadedConfiguration>,
    /// Scripts whose applied stamp must be re-verified against the live file
    /// before it counts as up to date.
    stale: HashSet<ScriptId>,
}

impl ConfigurationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The currently applied configuration, if any.
    pub fn get(&self, id: &ScriptId) -> Option<AppliedConfiguration> {
        self.lock().applied.get(id).cloned()
    }

    /// Store an applied configuration. Evicts any pending entry for the same
    /// script. The stale mark is left as is: the stored stamp was captured
    /// when its load began, and the live file may have moved on since, so an
    /// outstanding invalidation must still force one re-verification.
    pub fn store(&self, id: &ScriptId, applied: AppliedConfiguration) {
        let mut inner = self.lock();
        inner.pending.remove(id);
        inner.applied.insert(id.clone(), applied);
    }

    /// Remove an applied configuration (reindex rollback).
    pub fn remove(&self, id: &ScriptId) {
        let mut inner = self.lock();
        inner.applied.remove(id);
        inner.stale.remove(id);
    }

    /// Replace the stamp of an existing applied entry without touching its
    /// configuration. Used when a load yields a configuration equal to the
    /// applied one: freshness checks short-circuit again, no apply happens.
    /// Any pending entry is superseded and dropped. As with
    /// [`ConfigurationCache::store`], an outstanding stale mark survives.
    pub fn refresh_stamp(&self, id: &ScriptId, inputs: InputsStamp) {
        let mut inner = self.lock();
        if let Some(entry) = inner.applied.get_mut(id) {
            entry.inputs = inputs;
            inner.pending.remove(id);
        }
    }

    /// Flag the applied entry so the next freshness check re-verifies the
    /// stamp against the live file.
    pub fn mark_stale(&self, id: &ScriptId) {
        self.lock().stale.insert(id.clone());
    }

    /// Whether the applied entry is present and up to date against the live
    /// file. Entries not marked stale since their last verification pass
    /// without I/O; marked entries are re-verified (and un-marked on
    /// success). The stamp check runs outside the cache mutex.
    pub fn up_to_date(&self, id: &ScriptId, files: &dyn DocumentStore) -> bool {
        let stamp = {
            let inner = self.lock();
            match inner.applied.get(id) {
                None => return false,
                Some(entry) => {
                    if !inner.stale.contains(id) {
                        return true;
                    }
                    entry.inputs.clone()
                }
            }
        };

        if !stamp.is_up_to_date(files, id) {
            return false;
        }

        // Un-mark only if the verified stamp is still the cached one; a
        // concurrent store means the new entry owns its own freshness.
        let mut inner = self.lock();
        if inner.applied.get(id).is_some_and(|e| e.inputs == stamp) {
            inner.stale.remove(id);
        }
        true
    }

    pub fn pending(&self, id: &ScriptId) -> Option<LoadedConfiguration> {
        self.lock().pending.get(id).cloned()
    }

    pub fn put_pending(&self, id: &ScriptId, loaded: LoadedConfiguration) {
        self.lock().pending.insert(id.clone(), loaded);
    }

    /// Remove and return the pending entry (acceptance, dismissal, and the
    /// eviction immediately before a fresh load runs).
    pub fn take_pending(&self, id: &ScriptId) -> Option<LoadedConfiguration> {
        self.lock().pending.remove(id)
    }

    pub fn has_pending(&self, id: &ScriptId) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// Snapshot of all applied entries, for root collection during reindex.
    pub fn snapshot(&self) -> Vec<(ScriptId, AppliedConfiguration)> {
        self.lock()
            .applied
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }
}
