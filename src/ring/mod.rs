//! Continuum core: the sorted ring of virtual nodes shared by the ketama
//! and dynamic strategies.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      Continuum (one strategy's ring)                 │
//! │                                                                      │
//! │   points: sorted by value on the 32-bit ring                         │
//! │   ┌──────────┬──────────┬──────────┬──────────┬──────────┐           │
//! │   │ value v0 │ value v1 │ value v2 │   ...    │ value vP │           │
//! │   │ index  2 │ index  0 │ index  1 │          │ index  0 │           │
//! │   │ stats    │ stats    │ stats    │          │ stats    │           │
//! │   └──────────┴──────────┴──────────┴──────────┴──────────┘           │
//! │        ▲                                                             │
//! │        │ lookup(h): first point with value >= h, wrapping to v0      │
//! │        │           when h is past the end of the searched range      │
//! │                                                                      │
//! │   servers: one SchedStats per fleet slot (counters + derived rates)  │
//! │   scalars: server_count, next_rebuild, max, max_id                   │
//! └──────────────────────────────────────────────────────────────────────┘
//!
//! Ownership
//! ─────────
//! A point at value v owns the keys hashing into (previous value, v], so
//! moving a boundary upward grows that point's share of the ring. Arc
//! lengths use wrapping subtraction and sum to 2^32 over the whole cycle.
//! ```
//!
//! ## Concurrency
//!
//! Request threads hold a read lock while looking up and only touch the
//! relaxed atomic `get`/`set` counters. Rebuilds and controller ticks hold
//! the write lock, so every derived field (`sum`, rates, `hashsize`) is
//! single-writer. Lost counter updates are acceptable; the counters drive
//! rebalancing heuristics, not correctness.

pub mod dynamic;
pub mod ketama;

use std::sync::atomic::{AtomicU32, Ordering};

pub use dynamic::DynamicState;

use crate::selector::Command;

/// Virtual nodes per live server on an unweighted ketama ring.
pub const POINTS_PER_SERVER: u32 = 160;
/// Ring positions carved from a single MD5 digest on weighted rings.
pub const POINTS_PER_HASH: u32 = 4;

/// Request counters plus the derived statistics the rebalance controller
/// maintains. The same shape serves both per-point and per-server slots;
/// ketama only uses the per-server side.
#[derive(Debug, Default)]
pub struct SchedStats {
    pub get: AtomicU32,
    pub set: AtomicU32,
    /// `get + set`, refreshed by the controller.
    pub sum: u32,
    /// Total arc length owned, refreshed by the controller.
    pub hashsize: u64,
    pub hitrate: f64,
    /// Hit rate normalized against the fleet maximum.
    pub nhitrate: f64,
    /// Request share relative to the busiest peer.
    pub usagerate: f64,
    /// Sum snapshot from the previous controller tick.
    pub psum: u32,
}

impl SchedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one request. Relaxed ordering is enough: these feed
    /// heuristics and tolerate lost updates.
    #[inline]
    pub fn record(&self, command: Command) {
        match command {
            Command::Get => {
                self.get.fetch_add(1, Ordering::Relaxed);
            },
            Command::Set => {
                self.set.fetch_add(1, Ordering::Relaxed);
            },
            Command::Other => {},
        }
    }

    #[inline]
    pub fn get_count(&self) -> u32 {
        self.get.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_count(&self) -> u32 {
        self.set.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_counters(&mut self) {
        self.get.store(0, Ordering::Relaxed);
        self.set.store(0, Ordering::Relaxed);
    }
}

/// One virtual node: a position on the ring owned by a fleet member.
#[derive(Debug)]
pub struct ContinuumPoint {
    pub value: u32,
    pub index: u32,
    pub stats: SchedStats,
}

impl ContinuumPoint {
    pub fn new(value: u32, index: u32) -> Self {
        Self {
            value,
            index,
            stats: SchedStats::new(),
        }
    }
}

/// Strategy-agnostic ring state: sorted points plus per-server statistics.
#[derive(Debug, Default)]
pub struct Continuum {
    pub(crate) points: Vec<ContinuumPoint>,
    pub(crate) servers: Vec<SchedStats>,
    /// Live servers at the last rebuild.
    pub(crate) server_count: u32,
    /// Earliest ejected-server retry deadline, 0 when nothing is ejected.
    pub(crate) next_rebuild: i64,
    /// Highest per-point request sum observed by the last tick.
    pub(crate) max: u32,
    pub(crate) max_id: u32,
}

impl Continuum {
    pub fn points(&self) -> &[ContinuumPoint] {
        &self.points
    }

    pub fn servers(&self) -> &[SchedStats] {
        &self.servers
    }

    pub fn server_count(&self) -> u32 {
        self.server_count
    }

    pub fn next_rebuild(&self) -> i64 {
        self.next_rebuild
    }

    /// Highest per-point request sum the last tick observed, and the fleet
    /// index owning it. Zeroed once the tick has consumed the window.
    pub fn max_observed(&self) -> (u32, u32) {
        (self.max, self.max_id)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Finds the point owning `hash`.
    ///
    /// The binary search deliberately spans only the first `len - 1` points
    /// and wraps to the start when the search runs past them, keeping the
    /// historical layout where the highest point is reached exclusively
    /// through the wrap. Peer clients share this quirk, so a faithful ring
    /// must too.
    ///
    /// The ring must be non-empty.
    #[inline]
    pub fn lookup(&self, hash: u32) -> &ContinuumPoint {
        debug_assert!(!self.points.is_empty(), "lookup on an empty continuum");
        let searched = self.points.len() - 1;
        let mut idx = self.points[..searched].partition_point(|point| point.value < hash);
        if idx == searched {
            idx = 0;
        }
        &self.points[idx]
    }

    /// Stable sort by ring position. Equal values keep their relative order
    /// so repeated sorts are deterministic.
    pub(crate) fn sort_points(&mut self) {
        self.points.sort_by_key(|point| point.value);
    }

    pub(crate) fn reset_server_slots(&mut self, count: usize) {
        self.servers = (0..count).map(|_| SchedStats::new()).collect();
    }
}

/// Clockwise distance from `a` to `b` on the 32-bit ring.
#[inline]
pub(crate) fn arc_between(a: u32, b: u32) -> u32 {
    b.wrapping_sub(a)
}

/// Counts the servers that may own ring points right now and refreshes the
/// ring's rebuild deadline from the ejected ones.
///
/// Without auto-ejection every fleet member counts as live and the deadline
/// is left untouched.
pub(crate) fn count_live(
    ring_next_rebuild: &mut i64,
    fleet: &crate::fleet::Fleet,
    auto_eject: bool,
    now: i64,
) -> u32 {
    if !auto_eject {
        return fleet.len() as u32;
    }
    *ring_next_rebuild = 0;
    let mut live = 0;
    for server in fleet.iter() {
        if server.is_live(now) {
            live += 1;
        } else if *ring_next_rebuild == 0 || server.next_retry() < *ring_next_rebuild {
            *ring_next_rebuild = server.next_retry();
        }
    }
    live
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
