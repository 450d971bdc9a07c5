// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-bucket-locked session table shared by every analyzer, per §4.F.
//!
//! Bucket count is fixed at construction (the donor's `sessions.rehash(...)`,
//! called once before any insert, never grown afterward) and every bucket
//! gets its own [`parking_lot::Mutex`], matching the donor's one-mutex-per-
//! bucket array. `find_or_open` and `sweep` are the two operations §4.F
//! names; both take analyzer-specific closures rather than hard-coding one
//! protocol's session-opening predicate, since the donor's BitTorrent, HTTP,
//! and PJL modules each decide "does this packet open a new session?"
//! differently.
//!
//! Generic over the key type `K`: every flow-keyed analyzer uses
//! [`crate::flow::FlowId`], but the PPS module keys its per-host counters by
//! a bare `u32` IPv4 address, so the bucket map is parameterized rather than
//! hard-coded to `FlowId`.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::slab::Slab;

pub struct SessionTable<K, S> {
    buckets: Vec<Mutex<HashMap<K, Arc<S>>>>,
}

impl<K: Eq + Hash + Copy, S> SessionTable<K, S> {
    /// `bucket_count` is fixed for the table's lifetime; analyzers size it
    /// from `max_sessions` at startup (the donor's `rehash`).
    pub fn new(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            buckets.push(Mutex::new(HashMap::new()));
        }
        SessionTable { buckets }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.buckets.len()
    }

    /// Number of sessions currently held across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// §4.F operation 1, "find-or-insert on ingress": look up `forward`;
    /// on miss look up `reverse`; on a hit, run `on_existing` with that
    /// bucket's mutex held and return its result. The `bool` passed to
    /// `on_existing` is `true` when the packet's own forward key matched (or
    /// a new session was just opened under it), `false` when the *reverse*
    /// key matched — letting a caller whose protocol is directional (HTTP,
    /// the BitTorrent tracker) tell request-direction traffic from response-
    /// direction traffic without re-deriving it from the session itself.
    ///
    /// On a double miss, calls `open` to decide whether this packet starts a
    /// new session; if it returns `Some`, allocates from `slab`, inserts
    /// under the *forward* key's bucket mutex, then runs `on_existing` on the
    /// freshly inserted handle (still under that lock, with `is_forward =
    /// true`) so first-packet initialization and steady-state updates share
    /// one code path, as in the donor's PJL and HTTP modules.
    ///
    /// Never holds two bucket mutexes at once: the forward lookup's guard
    /// is dropped before the reverse lookup is attempted.
    pub fn find_or_open<R>(
        &self,
        forward: K,
        reverse: K,
        mut on_existing: impl FnMut(&Arc<S>, bool) -> R,
        open: impl FnOnce() -> Option<S>,
        slab: &Slab,
    ) -> Option<R> {
        let idx_fwd = self.bucket_index(&forward);
        {
            let guard = self.buckets[idx_fwd].lock();
            if let Some(session) = guard.get(&forward) {
                return Some(on_existing(session, true));
            }
        }
        let idx_rev = self.bucket_index(&reverse);
        {
            let guard = self.buckets[idx_rev].lock();
            if let Some(session) = guard.get(&reverse) {
                return Some(on_existing(session, false));
            }
        }
        let value = open()?;
        let arc = slab.allocate(value)?;
        let mut guard = self.buckets[idx_fwd].lock();
        guard.insert(forward, arc.clone());
        Some(on_existing(&arc, true))
    }

    /// Single-key variant for tables with no forward/reverse pairing (PPS's
    /// per-host counters, keyed directly by IP rather than by flow).
    pub fn find_or_insert<R>(
        &self,
        key: K,
        mut on_existing: impl FnMut(&Arc<S>) -> R,
        open: impl FnOnce() -> Option<S>,
        slab: &Slab,
    ) -> Option<R> {
        let idx = self.bucket_index(&key);
        {
            let guard = self.buckets[idx].lock();
            if let Some(session) = guard.get(&key) {
                return Some(on_existing(session));
            }
        }
        let value = open()?;
        let arc = slab.allocate(value)?;
        let mut guard = self.buckets[idx].lock();
        guard.insert(key, arc.clone());
        Some(on_existing(&arc))
    }

    /// Looks up a session by its exact key without opening a new one.
    pub fn find(&self, key: &K) -> Option<Arc<S>> {
        let idx = self.bucket_index(key);
        self.buckets[idx].lock().get(key).cloned()
    }

    /// Removes a session by its exact key, e.g. when a protocol parser
    /// rejects a packet and the session must not survive the rejection
    /// (HTTP's "parser didn't consume the whole payload" case). A no-op if
    /// the key is absent.
    pub fn remove(&self, key: &K) -> Option<Arc<S>> {
        let idx = self.bucket_index(key);
        self.buckets[idx].lock().remove(key)
    }

    /// §4.F operation 2, "timed sweep on flush": for every bucket, evict
    /// every session whose `last_update(session) + idle_timeout_secs <= now`,
    /// invoking `on_expire` for each (to serialize a record or raise an
    /// alert) while that bucket's mutex is still held, matching the donor's
    /// erase-after-enumerate loop. Releasing a slot back to `slab` is the
    /// caller's responsibility inside `on_expire` (or by dropping the last
    /// `Arc` and calling `Slab::release` once it is the last reference).
    pub fn sweep(
        &self,
        idle_timeout_secs: u32,
        now: u32,
        last_update: impl Fn(&S) -> u32,
        mut on_expire: impl FnMut(K, Arc<S>),
    ) {
        for bucket in &self.buckets {
            let mut guard = bucket.lock();
            let expired: Vec<K> = guard
                .iter()
                .filter(|(_, session)| now.saturating_sub(last_update(session)) >= idle_timeout_secs)
                .map(|(key, _)| *key)
                .collect();
            for key in expired {
                if let Some(session) = guard.remove(&key) {
                    on_expire(key, session);
                }
            }
        }
    }

    /// Visits every session in every bucket under that bucket's lock,
    /// regardless of idle state, removing any for which `f` returns `true`.
    /// PPS needs this rather than `sweep`: every per-host counter is
    /// inspected (and reset) on each flush pass to compute its packets/sec
    /// rate, not just the ones that have gone idle.
    pub fn for_each_mut(&self, mut f: impl FnMut(K, &Arc<S>) -> bool) {
        for bucket in &self.buckets {
            let mut guard = bucket.lock();
            let to_erase: Vec<K> = guard
                .iter()
                .filter(|(key, session)| f(**key, session))
                .map(|(key, _)| *key)
                .collect();
            for key in to_erase {
                guard.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowId;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Session {
        last_update: AtomicU32,
        value: u32,
    }

    #[test]
    fn opens_a_new_session_on_double_miss() {
        let table: SessionTable<FlowId, Session> = SessionTable::new(4);
        let slab = Slab::new(8);
        let fwd = FlowId::new(6, 1, 2, 10, 20);
        let rev = fwd.reverse();
        let result = table.find_or_open(
            fwd,
            rev,
            |s, is_fwd| {
                assert!(is_fwd);
                s.value
            },
            || {
                Some(Session {
                    last_update: AtomicU32::new(100),
                    value: 42,
                })
            },
            &slab,
        );
        assert_eq!(result, Some(42));
        assert_eq!(table.len(), 1);
        assert!(table.find(&fwd).is_some());
    }

    #[test]
    fn finds_existing_session_via_reverse_flow() {
        let table: SessionTable<FlowId, Session> = SessionTable::new(4);
        let slab = Slab::new(8);
        let fwd = FlowId::new(17, 1, 2, 10, 20);
        let rev = fwd.reverse();
        table.find_or_open(
            fwd,
            rev,
            |s, _| s.value,
            || Some(Session { last_update: AtomicU32::new(1), value: 1 }),
            &slab,
        );
        // A later packet travelling in the opposite direction presents
        // (rev, fwd) as its own (forward, reverse) pair.
        let hit = table.find_or_open(
            rev,
            fwd,
            |s, is_fwd| {
                assert!(!is_fwd);
                s.value
            },
            || panic!("should not open a second session"),
            &slab,
        );
        assert_eq!(hit, Some(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn open_returning_none_drops_the_packet() {
        let table: SessionTable<FlowId, Session> = SessionTable::new(4);
        let slab = Slab::new(8);
        let fwd = FlowId::new(6, 1, 2, 10, 20);
        let rev = fwd.reverse();
        let result = table.find_or_open(fwd, rev, |s, _| s.value, || None, &slab);
        assert_eq!(result, None);
        assert!(table.is_empty());
    }

    /// P7 (sweep completeness).
    #[test]
    fn sweep_evicts_idle_sessions_and_keeps_fresh_ones() {
        let table: SessionTable<FlowId, Session> = SessionTable::new(4);
        let slab = Slab::new(8);
        for (i, last) in [(0u32, 10u32), (1, 990)].into_iter() {
            let fwd = FlowId::new(6, i, 99, 1000 + i as u16, 2000);
            let rev = fwd.reverse();
            table.find_or_open(
                fwd,
                rev,
                |_, _| (),
                || Some(Session { last_update: AtomicU32::new(last), value: i }),
                &slab,
            );
        }
        let mut expired = Vec::new();
        table.sweep(
            100,
            1000,
            |s| s.last_update.load(Ordering::SeqCst),
            |_flow, session| expired.push(session.value),
        );
        assert_eq!(expired, vec![0]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_or_insert_keys_directly_without_a_reverse_pairing() {
        let table: SessionTable<u32, Session> = SessionTable::new(4);
        let slab = Slab::new(8);
        table.find_or_insert(
            0x0a000001,
            |s| s.value,
            || Some(Session { last_update: AtomicU32::new(1), value: 7 }),
            &slab,
        );
        let hit = table.find_or_insert(
            0x0a000001,
            |s| s.value,
            || panic!("should not reopen"),
            &slab,
        );
        assert_eq!(hit, Some(7));
    }

    #[test]
    fn remove_drops_a_session_by_key() {
        let table: SessionTable<FlowId, Session> = SessionTable::new(4);
        let slab = Slab::new(8);
        let fwd = FlowId::new(6, 1, 2, 10, 20);
        let rev = fwd.reverse();
        table.find_or_open(
            fwd,
            rev,
            |_, _| (),
            || Some(Session { last_update: AtomicU32::new(1), value: 1 }),
            &slab,
        );
        assert!(table.remove(&fwd).is_some());
        assert!(table.is_empty());
        assert!(table.remove(&fwd).is_none());
    }
}
