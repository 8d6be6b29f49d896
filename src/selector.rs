//! Selector: the front door mapping keys to backend servers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Selection Flow                               │
//! │                                                                     │
//! │   (key, command)                                                    │
//! │        │                                                            │
//! │        ▼                                                            │
//! │   namespace prefix ── composite > MAX_KEY_LEN-1? ──► 0 (sentinel)   │
//! │        │                                                            │
//! │        ▼                                                            │
//! │   hashkit.digest(key) ──► h: u32                                    │
//! │        │                                                            │
//! │        ▼            ┌────────────────────────────────────────────┐  │
//! │   dispatch on ────► │ Modulo        h % fleet_len                │  │
//! │   strategy          │ Random        rng % fleet_len              │  │
//! │                     │ VirtualBucket table[h % buckets]           │  │
//! │                     │ Ketama        ring.lookup(h) + server stat │  │
//! │                     │ Dynamic       ring.lookup(h) + point stat  │  │
//! │                     └────────────────────────────────────────────┘  │
//! │        │                                                            │
//! │        ▼                                                            │
//! │   server index                                                      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! The selector wraps its fleet, hashkit, and strategy state in a single
//! `parking_lot::RwLock`. Selections take the read lock and record request
//! counters through relaxed atomics; fleet mutations, forced rebuilds, and
//! controller ticks take the write lock. Rings are built off to the side
//! and installed whole, so a reader never observes a partially built ring.
//!
//! ## Example Usage
//!
//! ```
//! use ringkit::builder::{Distribution, SelectorBuilder};
//! use ringkit::hash::HashAlgorithm;
//! use ringkit::selector::Command;
//!
//! let selector = SelectorBuilder::new()
//!     .distribution(Distribution::ConsistentKetama)
//!     .hash(HashAlgorithm::Md5)
//!     .build()
//!     .unwrap();
//!
//! selector.server_add("10.0.1.1", 11211).unwrap();
//! selector.server_add("10.0.1.2", 11211).unwrap();
//! selector.server_add("10.0.1.3", 11211).unwrap();
//!
//! let index = selector.select(b"user:1234", Command::Get);
//! assert!(index < 3);
//! // The same key always lands on the same server.
//! assert_eq!(selector.select(b"user:1234", Command::Get), index);
//! ```

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::bucket::VirtualBucketTable;
use crate::builder::{Distribution, SelectorBuilder};
use crate::error::SelectError;
use crate::fleet::{Fleet, ServerEntry, ServerInstance};
use crate::hash::Hashkit;
use crate::ring::dynamic::{update_dynamic, DynamicState};
use crate::ring::ketama::update_continuum;
use crate::ring::Continuum;

/// Longest hashable key, including any namespace prefix.
pub const MAX_KEY_LEN: usize = 251;

/// Request type recorded against the chosen server's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Get,
    Set,
    /// Anything else; not counted.
    Other,
}

/// Active mapping strategy and its state.
pub(crate) enum Strategy {
    Modulo,
    Random(Mutex<SmallRng>),
    VirtualBucket(VirtualBucketTable),
    Ketama(Continuum),
    Dynamic(DynamicState),
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Modulo => f.write_str("Modulo"),
            Strategy::Random(_) => f.write_str("Random"),
            Strategy::VirtualBucket(table) => f.debug_tuple("VirtualBucket").field(table).finish(),
            Strategy::Ketama(ring) => f
                .debug_struct("Ketama")
                .field("points", &ring.len())
                .finish(),
            Strategy::Dynamic(state) => f
                .debug_struct("Dynamic")
                .field("points", &state.ring().len())
                .finish(),
        }
    }
}

/// Mutable selector state guarded by the selector's lock.
#[derive(Debug)]
pub(crate) struct SelectorState {
    pub(crate) fleet: Fleet,
    pub(crate) hashkit: Hashkit,
    pub(crate) strategy: Strategy,
    /// Set when a weight above 1 joins a consistent-strategy fleet.
    pub(crate) weighted_ketama: bool,
}

impl SelectorState {
    pub(crate) fn strategy_mut(&mut self) -> &mut Strategy {
        &mut self.strategy
    }

    fn next_rebuild(&self) -> i64 {
        match &self.strategy {
            Strategy::Ketama(ring) => ring.next_rebuild(),
            Strategy::Dynamic(state) => state.ring().next_rebuild(),
            _ => 0,
        }
    }
}

/// Thread-safe server selector. See the module docs for the data flow.
#[derive(Debug)]
pub struct Selector {
    state: RwLock<SelectorState>,
    distribution: Distribution,
    namespace: Option<Vec<u8>>,
    hash_with_namespace: bool,
    use_sort_hosts: bool,
    auto_eject_hosts: bool,
    alpha: f64,
    beta: f64,
    repetition: u32,
}

impl Selector {
    /// Starts a builder with the default configuration.
    pub fn builder() -> SelectorBuilder {
        SelectorBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        hashkit: Hashkit,
        strategy: Strategy,
        distribution: Distribution,
        namespace: Option<Vec<u8>>,
        hash_with_namespace: bool,
        use_sort_hosts: bool,
        auto_eject_hosts: bool,
        alpha: f64,
        beta: f64,
        repetition: u32,
    ) -> Self {
        Self {
            state: RwLock::new(SelectorState {
                fleet: Fleet::new(),
                hashkit,
                strategy,
                weighted_ketama: distribution == Distribution::ConsistentKetamaWeighted,
            }),
            distribution,
            namespace,
            hash_with_namespace,
            use_sort_hosts,
            auto_eject_hosts,
            alpha,
            beta,
            repetition,
        }
    }

    // -- selection ---------------------------------------------------------

    /// Maps a key to a server index and records the request against the
    /// chosen server's counters.
    ///
    /// A single-server fleet always resolves to 0 without touching the
    /// ring. A namespace-plus-key composite longer than `MAX_KEY_LEN - 1`
    /// returns the diagnostic sentinel 0. The fleet must not be empty.
    pub fn select(&self, key: &[u8], command: Command) -> u32 {
        let state = self.state.read();
        match self.hash_for(&state, key) {
            Some(hash) => Self::dispatch(&state, hash, command),
            None => 0,
        }
    }

    /// Like [`select`](Self::select), but first gives the auto-eject timer
    /// a chance to rebuild the ring when an ejected server's retry deadline
    /// has passed.
    pub fn select_with_redistribution(&self, key: &[u8], command: Command) -> u32 {
        let hash = {
            let state = self.state.read();
            match self.hash_for(&state, key) {
                Some(hash) => hash,
                None => return 0,
            }
        };
        self.regen_for_auto_eject();
        let state = self.state.read();
        Self::dispatch(&state, hash, command)
    }

    /// Polls the ejection timer: rebuilds the ring when the earliest retry
    /// deadline has expired. A no-op when auto-ejection is off or nothing
    /// is ejected.
    pub fn auto_eject(&self) {
        self.regen_for_auto_eject();
    }

    fn hash_for(&self, state: &SelectorState, key: &[u8]) -> Option<u32> {
        debug_assert!(!state.fleet.is_empty(), "selection requires a non-empty fleet");
        if state.fleet.len() <= 1 {
            return None;
        }
        if self.hash_with_namespace {
            if let Some(namespace) = &self.namespace {
                let total = namespace.len() + key.len();
                if total > MAX_KEY_LEN - 1 {
                    return None;
                }
                let mut composite = [0u8; MAX_KEY_LEN];
                composite[..namespace.len()].copy_from_slice(namespace);
                composite[namespace.len()..total].copy_from_slice(key);
                return Some(state.hashkit.digest(&composite[..total]));
            }
        }
        Some(state.hashkit.digest(key))
    }

    fn dispatch(state: &SelectorState, hash: u32, command: Command) -> u32 {
        let server_count = state.fleet.len() as u32;
        match &state.strategy {
            Strategy::Modulo => hash % server_count,
            Strategy::Random(rng) => rng.lock().random::<u32>() % server_count,
            Strategy::VirtualBucket(table) => table.server(hash),
            Strategy::Ketama(ring) => {
                let point = ring.lookup(hash);
                if let Some(server) = ring.servers().get(point.index as usize) {
                    server.record(command);
                }
                point.index
            },
            Strategy::Dynamic(dynamic) => {
                let point = dynamic.ring().lookup(hash);
                point.stats.record(command);
                point.index
            },
        }
    }

    fn regen_for_auto_eject(&self) {
        if !self.auto_eject_hosts {
            return;
        }
        let deadline = self.state.read().next_rebuild();
        if deadline == 0 {
            return;
        }
        let Ok(now) = now_epoch() else {
            return;
        };
        if now > deadline {
            let mut state = self.state.write();
            // The deadline may have been refreshed between the locks.
            let deadline = state.next_rebuild();
            if deadline != 0 && now > deadline {
                let _ = self.run_distribution_locked(&mut state);
            }
        }
    }

    // -- rebuilds ----------------------------------------------------------

    /// Forces a rebuild of the active strategy from the current fleet.
    /// Idempotent while the fleet is unchanged.
    pub fn run_distribution(&self) -> Result<(), SelectError> {
        let mut state = self.state.write();
        self.run_distribution_locked(&mut state)
    }

    fn run_distribution_locked(&self, state: &mut SelectorState) -> Result<(), SelectError> {
        if self.use_sort_hosts {
            state.fleet.sort();
        }
        match &mut state.strategy {
            Strategy::Ketama(ring) => {
                let now = now_epoch()?;
                let weighted = state.weighted_ketama;
                let spy = self.distribution == Distribution::ConsistentKetamaSpy;
                update_continuum(
                    ring,
                    &state.fleet,
                    &state.hashkit,
                    spy,
                    weighted,
                    self.auto_eject_hosts,
                    now,
                )
            },
            Strategy::Dynamic(dynamic) => {
                let now = now_epoch()?;
                update_dynamic(
                    dynamic,
                    &state.fleet,
                    self.auto_eject_hosts,
                    self.repetition,
                    now,
                )
            },
            Strategy::Random(rng) => {
                *rng.lock() = SmallRng::seed_from_u64(now_epoch()? as u64);
                Ok(())
            },
            Strategy::Modulo | Strategy::VirtualBucket(_) => Ok(()),
        }
    }

    // -- fleet surface -----------------------------------------------------

    /// Adds an unweighted TCP server and rebuilds.
    pub fn server_add(&self, hostname: &str, port: u16) -> Result<(), SelectError> {
        self.server_add_with_weight(hostname, port, 0)
    }

    /// Adds a TCP server and rebuilds. A weight above 1 switches a
    /// consistent-strategy fleet into weighted mode.
    pub fn server_add_with_weight(
        &self,
        hostname: &str,
        port: u16,
        weight: u32,
    ) -> Result<(), SelectError> {
        let mut state = self.state.write();
        state.fleet.push_tcp(hostname, port, weight)?;
        self.note_weight(&mut state, weight);
        self.run_distribution_locked(&mut state)
    }

    /// Adds an unweighted unix-socket server and rebuilds.
    pub fn server_add_unix_socket(&self, path: &str) -> Result<(), SelectError> {
        self.server_add_unix_socket_with_weight(path, 0)
    }

    pub fn server_add_unix_socket_with_weight(
        &self,
        path: &str,
        weight: u32,
    ) -> Result<(), SelectError> {
        let mut state = self.state.write();
        state.fleet.push_unix(path, weight)?;
        self.note_weight(&mut state, weight);
        self.run_distribution_locked(&mut state)
    }

    /// UDP transports were retired from the protocol surface.
    pub fn server_add_udp(&self, _hostname: &str, _port: u16) -> Result<(), SelectError> {
        Err(SelectError::Deprecated)
    }

    /// Adds a pre-parsed TCP server without hostname rewriting.
    pub fn server_add_parsed(
        &self,
        hostname: &str,
        port: u16,
        weight: u32,
    ) -> Result<(), SelectError> {
        let mut state = self.state.write();
        state.fleet.push_parsed(hostname, port, weight)?;
        self.note_weight(&mut state, weight);
        self.run_distribution_locked(&mut state)
    }

    /// Bulk add: identical to adding each entry in turn, but the rebuild
    /// runs once at the end.
    pub fn server_push(&self, entries: &[ServerEntry]) -> Result<(), SelectError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for entry in entries {
            state
                .fleet
                .push_tcp(&entry.hostname, entry.port, entry.weight)?;
            self.note_weight(&mut state, entry.weight);
        }
        self.run_distribution_locked(&mut state)
    }

    /// Bulk add of fully-formed instances, preserving their transports and
    /// ejection state. Rebuilds once at the end.
    pub fn instance_push(&self, instances: Vec<ServerInstance>) -> Result<(), SelectError> {
        if instances.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for instance in instances {
            let weight = instance.weight();
            state.fleet.push_instance(instance);
            self.note_weight(&mut state, weight);
        }
        self.run_distribution_locked(&mut state)
    }

    /// Removes the first server whose hostname matches and rebuilds. The
    /// removed position is handed to the dynamic ring so it knows which
    /// points to drop.
    pub fn server_remove(&self, hostname: &str) -> Result<(), SelectError> {
        let mut state = self.state.write();
        let position = state.fleet.remove_first(hostname)?;
        if let Strategy::Dynamic(dynamic) = &mut state.strategy {
            dynamic.removing_idx = position as i32;
        }
        self.run_distribution_locked(&mut state)
    }

    /// Marks a server dead until `next_retry` (epoch seconds). This is the
    /// hook a connection layer calls after a failure. With auto-ejection on
    /// the ring rebuilds immediately so the server stops receiving keys.
    pub fn server_set_retry(
        &self,
        hostname: &str,
        port: u16,
        next_retry: i64,
    ) -> Result<(), SelectError> {
        let mut state = self.state.write();
        state.fleet.set_retry(hostname, port, next_retry)?;
        if self.auto_eject_hosts {
            self.run_distribution_locked(&mut state)
        } else {
            Ok(())
        }
    }

    fn note_weight(&self, state: &mut SelectorState, weight: u32) {
        if weight > 1 && self.distribution.is_consistent() {
            state.weighted_ketama = true;
        }
    }

    // -- introspection -----------------------------------------------------

    pub fn server_count(&self) -> usize {
        self.state.read().fleet.len()
    }

    /// Snapshot of the current fleet.
    pub fn servers(&self) -> Vec<ServerInstance> {
        self.state.read().fleet.iter().cloned().collect()
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Replaces the hash handle used for keys and ring labels. The ring is
    /// not rebuilt automatically; call
    /// [`run_distribution`](Self::run_distribution) to re-key it.
    pub fn set_hashkit(&self, hashkit: Hashkit) {
        self.state.write().hashkit = hashkit;
    }

    /// Clone of the installed hash handle.
    pub fn hashkit(&self) -> Hashkit {
        self.state.read().hashkit.clone()
    }

    /// Appends the comma-prefixed CSV of per-server prior sums recorded by
    /// the dynamic controller, stopping before `buf_len` would overflow.
    /// Strategies without dynamic statistics leave the buffer untouched.
    pub fn sched_stat(&self, buf: &mut String, buf_len: usize) -> Result<(), SelectError> {
        let state = self.state.read();
        if let Strategy::Dynamic(dynamic) = &state.strategy {
            for server in dynamic.ring().servers() {
                let start = buf.len();
                let _ = write!(buf, ",{}", server.psum);
                let digits = buf.len() - start - 1;
                if buf.len() + digits >= buf_len {
                    break;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, SelectorState> {
        self.state.write()
    }

    #[cfg(test)]
    pub(crate) fn read_state(&self) -> parking_lot::RwLockReadGuard<'_, SelectorState> {
        self.state.read()
    }
}

/// Wall-clock seconds since the epoch.
pub(crate) fn now_epoch() -> Result<i64, SelectError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .map_err(|err| SelectError::Clock(err.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SelectorBuilder;
    use crate::hash::{digest, HashAlgorithm};

    fn selector_with(distribution: Distribution, hosts: &[&str]) -> Selector {
        let selector = SelectorBuilder::new()
            .distribution(distribution)
            .hash(HashAlgorithm::Md5)
            .build()
            .unwrap();
        for host in hosts {
            selector.server_add(host, 11211).unwrap();
        }
        selector
    }

    #[test]
    fn single_server_fleet_short_circuits_to_zero() {
        for distribution in [
            Distribution::Modulo,
            Distribution::Random,
            Distribution::ConsistentKetama,
            Distribution::Dynamic,
        ] {
            let selector = selector_with(distribution, &["only"]);
            assert_eq!(selector.select(b"anything", Command::Get), 0);
            assert_eq!(selector.select(b"", Command::Set), 0);
        }
    }

    #[test]
    fn modulo_follows_the_hash() {
        let selector = selector_with(Distribution::Modulo, &["a", "b", "c"]);
        for key in [&b"foo"[..], b"bar", b"user:42", b""] {
            let expected = digest(key, HashAlgorithm::Md5) % 3;
            assert_eq!(selector.select(key, Command::Get), expected);
        }
    }

    #[test]
    fn ketama_selection_is_deterministic_and_in_range() {
        let selector = selector_with(
            Distribution::ConsistentKetama,
            &["10.0.1.1", "10.0.1.2", "10.0.1.3"],
        );
        for i in 0..200u32 {
            let key = format!("key{}", i);
            let first = selector.select(key.as_bytes(), Command::Get);
            assert!(first < 3);
            assert_eq!(selector.select(key.as_bytes(), Command::Get), first);
            assert_eq!(
                selector.select_with_redistribution(key.as_bytes(), Command::Get),
                first
            );
        }
    }

    #[test]
    fn ketama_selection_records_server_counters() {
        let selector = selector_with(Distribution::ConsistentKetama, &["a", "b", "c"]);
        let index = selector.select(b"foo", Command::Get) as usize;
        selector.select(b"foo", Command::Set);

        let state = selector.read_state();
        let Strategy::Ketama(ring) = &state.strategy else {
            panic!("expected a ketama strategy");
        };
        assert_eq!(ring.servers()[index].get_count(), 1);
        assert_eq!(ring.servers()[index].set_count(), 1);
    }

    #[test]
    fn dynamic_selection_records_point_counters() {
        let selector = selector_with(Distribution::Dynamic, &["a", "b", "c"]);
        selector.select(b"foo", Command::Get);

        let state = selector.read_state();
        let Strategy::Dynamic(dynamic) = &state.strategy else {
            panic!("expected a dynamic strategy");
        };
        let total: u32 = dynamic
            .ring()
            .points()
            .iter()
            .map(|p| p.stats.get_count())
            .sum();
        assert_eq!(total, 1);
        assert_eq!(dynamic.ring().len(), 6);
    }

    #[test]
    fn random_selection_stays_in_range_and_spreads() {
        let selector = selector_with(Distribution::Random, &["a", "b", "c"]);
        let mut seen = [false; 3];
        for _ in 0..300 {
            let index = selector.select(b"same-key", Command::Get) as usize;
            assert!(index < 3);
            seen[index] = true;
        }
        assert!(seen.iter().all(|&hit| hit), "300 draws should touch all servers");
    }

    #[test]
    fn virtual_bucket_delegates_to_the_table() {
        let table = VirtualBucketTable::new(vec![2, 0, 1]).unwrap();
        let selector = SelectorBuilder::new()
            .distribution(Distribution::VirtualBucket)
            .hash(HashAlgorithm::Md5)
            .virtual_buckets(table)
            .build()
            .unwrap();
        selector.server_add("a", 11211).unwrap();
        selector.server_add("b", 11211).unwrap();
        selector.server_add("c", 11211).unwrap();

        let hash = digest(b"foo", HashAlgorithm::Md5);
        let expected = [2u32, 0, 1][hash as usize % 3];
        assert_eq!(selector.select(b"foo", Command::Get), expected);
    }

    #[test]
    fn namespace_prefix_feeds_the_hash() {
        let plain = selector_with(Distribution::Modulo, &["a", "b", "c"]);
        let namespaced = SelectorBuilder::new()
            .distribution(Distribution::Modulo)
            .hash(HashAlgorithm::Md5)
            .namespace("app:")
            .build()
            .unwrap();
        for host in ["a", "b", "c"] {
            namespaced.server_add(host, 11211).unwrap();
        }

        assert_eq!(
            namespaced.select(b"user", Command::Get),
            plain.select(b"app:user", Command::Get)
        );
    }

    #[test]
    fn namespace_length_boundary() {
        let selector = SelectorBuilder::new()
            .distribution(Distribution::Modulo)
            .hash(HashAlgorithm::Md5)
            .namespace("ns:")
            .build()
            .unwrap();
        for host in ["a", "b", "c"] {
            selector.server_add(host, 11211).unwrap();
        }

        // Composite of exactly MAX_KEY_LEN - 1 bytes still hashes.
        let fitting = vec![b'k'; MAX_KEY_LEN - 1 - 3];
        let mut composite = b"ns:".to_vec();
        composite.extend_from_slice(&fitting);
        let expected = digest(&composite, HashAlgorithm::Md5) % 3;
        assert_eq!(selector.select(&fitting, Command::Get), expected);

        // One more byte trips the sentinel.
        let oversized = vec![b'k'; MAX_KEY_LEN - 3];
        assert_eq!(selector.select(&oversized, Command::Get), 0);
    }

    #[test]
    fn weight_above_one_switches_consistent_fleets_to_weighted() {
        let selector = SelectorBuilder::new()
            .distribution(Distribution::ConsistentKetama)
            .hash(HashAlgorithm::Md5)
            .build()
            .unwrap();
        selector.server_add_with_weight("a", 11211, 1).unwrap();
        selector.server_add_with_weight("b", 11211, 2).unwrap();
        selector.server_add_with_weight("c", 11211, 1).unwrap();

        let state = selector.read_state();
        assert!(state.weighted_ketama);
        let Strategy::Ketama(ring) = &state.strategy else {
            panic!("expected a ketama strategy");
        };
        let counts: Vec<usize> = (0..3u32)
            .map(|i| ring.points().iter().filter(|p| p.index == i).count())
            .collect();
        assert_eq!(counts, vec![120, 240, 120]);
    }

    #[test]
    fn server_push_rebuilds_once_with_everything() {
        let selector = SelectorBuilder::new()
            .distribution(Distribution::ConsistentKetama)
            .hash(HashAlgorithm::Md5)
            .build()
            .unwrap();
        selector
            .server_push(&[
                ServerEntry::new("a", 11211, 0),
                ServerEntry::new("b", 11211, 0),
                ServerEntry::new("c", 0, 0),
            ])
            .unwrap();

        assert_eq!(selector.server_count(), 3);
        let state = selector.read_state();
        let Strategy::Ketama(ring) = &state.strategy else {
            panic!("expected a ketama strategy");
        };
        assert_eq!(ring.len(), 480);
    }

    #[test]
    fn server_remove_updates_the_dynamic_ring() {
        let selector = selector_with(Distribution::Dynamic, &["a", "b", "c"]);
        selector.server_remove("b").unwrap();

        assert_eq!(selector.server_count(), 2);
        let state = selector.read_state();
        let Strategy::Dynamic(dynamic) = &state.strategy else {
            panic!("expected a dynamic strategy");
        };
        assert_eq!(dynamic.ring().len(), 4);
        assert!(dynamic.ring().points().iter().all(|p| p.index < 2));
    }

    #[test]
    fn server_remove_error_paths() {
        let selector = selector_with(Distribution::Modulo, &["a"]);
        assert_eq!(selector.server_remove("zzz"), Err(SelectError::NotFound));
        assert_eq!(selector.server_remove("a"), Err(SelectError::SomeErrors));
        assert_eq!(selector.server_count(), 1);
    }

    #[test]
    fn udp_add_is_deprecated() {
        let selector = selector_with(Distribution::Modulo, &[]);
        assert_eq!(
            selector.server_add_udp("a", 11211),
            Err(SelectError::Deprecated)
        );
        assert_eq!(selector.server_count(), 0);
    }

    #[test]
    fn run_distribution_is_idempotent() {
        let selector = selector_with(
            Distribution::ConsistentKetama,
            &["10.0.1.1", "10.0.1.2", "10.0.1.3"],
        );
        let before: Vec<u32> = {
            let state = selector.read_state();
            let Strategy::Ketama(ring) = &state.strategy else {
                panic!("expected a ketama strategy");
            };
            ring.points().iter().map(|p| p.value).collect()
        };

        selector.run_distribution().unwrap();
        selector.run_distribution().unwrap();

        let state = selector.read_state();
        let Strategy::Ketama(ring) = &state.strategy else {
            panic!("expected a ketama strategy");
        };
        let after: Vec<u32> = ring.points().iter().map(|p| p.value).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn ejection_drops_points_until_the_server_revives() {
        let selector = SelectorBuilder::new()
            .distribution(Distribution::ConsistentKetama)
            .hash(HashAlgorithm::Md5)
            .auto_eject_hosts(true)
            .build()
            .unwrap();
        for host in ["a", "b", "c"] {
            selector.server_add(host, 11211).unwrap();
        }

        let far_future = now_epoch().unwrap() + 3_600;
        selector.server_set_retry("b", 11211, far_future).unwrap();
        {
            let state = selector.read_state();
            let Strategy::Ketama(ring) = &state.strategy else {
                panic!("expected a ketama strategy");
            };
            assert_eq!(ring.len(), 320, "ejected server contributes no points");
            assert_eq!(ring.next_rebuild(), far_future);
        }

        // The deadline is in the future, so polling changes nothing.
        selector.auto_eject();
        {
            let state = selector.read_state();
            let Strategy::Ketama(ring) = &state.strategy else {
                panic!("expected a ketama strategy");
            };
            assert_eq!(ring.len(), 320);
        }

        // Reviving the server restores its points on the next rebuild.
        selector.server_set_retry("b", 11211, 0).unwrap();
        let state = selector.read_state();
        let Strategy::Ketama(ring) = &state.strategy else {
            panic!("expected a ketama strategy");
        };
        assert_eq!(ring.len(), 480);
        assert_eq!(ring.next_rebuild(), 0);
    }

    #[test]
    fn sched_stat_emits_comma_prefixed_prior_sums() {
        let selector = selector_with(Distribution::Dynamic, &["a", "b", "c"]);
        {
            let mut state = selector.write_state();
            let Strategy::Dynamic(dynamic) = state.strategy_mut() else {
                panic!("expected a dynamic strategy");
            };
            dynamic.ring.servers[0].psum = 280;
            dynamic.ring.servers[1].psum = 360;
            dynamic.ring.servers[2].psum = 42;
        }

        let mut buf = String::new();
        selector.sched_stat(&mut buf, 64).unwrap();
        assert_eq!(buf, ",280,360,42");

        // A tight buffer cuts the CSV off early instead of overflowing.
        let mut small = String::new();
        selector.sched_stat(&mut small, 7).unwrap();
        assert_eq!(small, ",280");

        // Non-dynamic strategies leave the buffer untouched.
        let modulo = selector_with(Distribution::Modulo, &["a", "b"]);
        let mut untouched = String::from("x");
        modulo.sched_stat(&mut untouched, 64).unwrap();
        assert_eq!(untouched, "x");
    }

    #[test]
    fn set_hashkit_changes_key_mapping() {
        let selector = selector_with(Distribution::Modulo, &["a", "b", "c"]);
        let before = selector.select(b"foo", Command::Get);
        assert_eq!(before, digest(b"foo", HashAlgorithm::Md5) % 3);

        selector.set_hashkit(Hashkit::new(HashAlgorithm::Crc));
        assert_eq!(
            selector.select(b"foo", Command::Get),
            digest(b"foo", HashAlgorithm::Crc) % 3
        );
        assert_eq!(selector.hashkit().algorithm(), HashAlgorithm::Crc);
    }
}
