//! Rebalance controller: the periodic job that turns request counters into
//! ring adjustments.
//!
//! ## Key Concepts
//!
//! - **Ketama tick**: pure observation. Per-server arc lengths and request
//!   sums are folded into usage and hit rates, a statistics snapshot is
//!   emitted, and the counters reset. Ring positions never move.
//! - **Dynamic tick**: observation plus one bounded move. After refreshing
//!   the derived statistics, the tick finds the cheapest and most expensive
//!   servers, locates the ring boundary between them with the largest cost
//!   difference, and slides that single boundary toward equilibrium. The
//!   move is always smaller than the gap to the neighbor, so the ring stays
//!   sorted and the closing re-sort is a no-op.
//! - **Cost**: `alpha * (1 - nhitrate) + beta * usagerate`. A server that
//!   misses often or carries an outsized share of requests is expensive and
//!   sheds ring space to its cheapest peer.
//!
//! The controller is an explicit handle around a shared selector; whoever
//! owns the timer decides the cadence. Ticks take the selector's writer
//! lock, so selections never observe a half-adjusted ring.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//! use ringkit::builder::{Distribution, SelectorBuilder};
//! use ringkit::sched::RebalanceController;
//!
//! let selector = Arc::new(
//!     SelectorBuilder::new()
//!         .distribution(Distribution::Dynamic)
//!         .build()
//!         .unwrap(),
//! );
//! selector.server_add("10.0.1.1", 11211).unwrap();
//! selector.server_add("10.0.1.2", 11211).unwrap();
//!
//! let controller = RebalanceController::new(Arc::clone(&selector));
//! let snapshot = controller.tick();
//! assert_eq!(snapshot.len(), 2);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::SelectError;
use crate::ring::{arc_between, Continuum, DynamicState, SchedStats};
use crate::selector::{Selector, Strategy};
use crate::stats::ServerTickStats;

/// Handle driving periodic rebalance ticks against a shared selector.
#[derive(Debug)]
pub struct RebalanceController {
    selector: Arc<Selector>,
    ticks: AtomicU32,
}

impl RebalanceController {
    pub fn new(selector: Arc<Selector>) -> Self {
        Self {
            selector,
            ticks: AtomicU32::new(0),
        }
    }

    /// Runs one tick against the active strategy and returns the per-server
    /// snapshot it observed. Strategies without a continuum return an empty
    /// snapshot.
    pub fn tick(&self) -> Vec<ServerTickStats> {
        let tick_no = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let alpha = self.selector.alpha();
        let beta = self.selector.beta();
        let mut state = self.selector.write_state();
        match state.strategy_mut() {
            Strategy::Ketama(ring) => ketama_tick(ring, alpha, beta, tick_no),
            Strategy::Dynamic(dynamic) => dynamic_tick(dynamic, alpha, beta, tick_no),
            _ => Vec::new(),
        }
    }

    /// Number of ticks run so far.
    pub fn tick_count(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Appends the comma-prefixed CSV of per-server prior sums.
    pub fn sched_stat(&self, buf: &mut String, buf_len: usize) -> Result<(), SelectError> {
        self.selector.sched_stat(buf, buf_len)
    }
}

/// Cost of a server or point given its derived statistics.
#[inline]
pub(crate) fn scost(alpha: f64, beta: f64, stats: &SchedStats) -> f64 {
    alpha * (1.0 - stats.nhitrate) + beta * stats.usagerate
}

/// Reported hit rate from the request counters, `(get - 2*set) / get`.
///
/// Under the one-set-per-miss traffic model this reports `2h - 1` for a
/// true hit fraction `h`, so rates above 50% are under-reported and the
/// paired [`hit_rate_guard`] never records rates below 50%. Both quirks are
/// load-bearing for compatibility with peers computing the same statistic.
#[inline]
pub(crate) fn hit_rate(get: u32, set: u32) -> f64 {
    (f64::from(get) - 2.0 * f64::from(set)) / f64::from(get)
}

/// Update guard for the hit rate: only `get != 0` and `set <= get - set`
/// windows refresh the stored value.
#[inline]
pub(crate) fn hit_rate_guard(get: u32, set: u32) -> bool {
    get != 0 && (set as i32) <= (get.wrapping_sub(set) as i32)
}

/// Ketama statistics tick: observe, snapshot, reset. No ring movement.
pub(crate) fn ketama_tick(
    ring: &mut Continuum,
    alpha: f64,
    beta: f64,
    tick_no: u32,
) -> Vec<ServerTickStats> {
    let point_count = ring.points.len();
    if point_count <= 1 {
        return Vec::new();
    }

    for j in 0..point_count {
        let k = (j + 1) % point_count;
        let arc = arc_between(ring.points[j].value, ring.points[k].value);
        let index = ring.points[j].index as usize;
        if let Some(server) = ring.servers.get_mut(index) {
            server.hashsize += u64::from(arc);
        }
    }

    let mut max_sum = 0u32;
    for server in ring.servers.iter_mut() {
        server.sum = server.get_count().wrapping_add(server.set_count());
        if server.sum > max_sum {
            max_sum = server.sum;
        }
    }

    let mut snapshot = Vec::with_capacity(ring.servers.len());
    for server in ring.servers.iter_mut() {
        let get = server.get_count();
        let set = server.set_count();
        if hit_rate_guard(get, set) {
            server.hitrate = hit_rate(get, set);
            server.nhitrate = server.hitrate;
        }
        server.usagerate = if max_sum > 0 {
            f64::from(server.sum) / f64::from(max_sum)
        } else {
            0.0
        };

        snapshot.push(ServerTickStats {
            hitrate: server.hitrate,
            nhitrate: server.nhitrate,
            usagerate: server.usagerate,
            cost: scost(alpha, beta, server),
            hashsize: server.hashsize,
            set,
            get,
        });

        server.reset_counters();
        server.sum = 0;
        server.hitrate = 0.0;
        server.usagerate = 0.0;
        server.hashsize = 0;
    }
    ring.max = 0;
    ring.max_id = 0;

    tracing::debug!(tick = tick_no, servers = snapshot.len(), "ketama statistics tick");
    snapshot
}

struct BoundaryMove {
    prev: usize,
    at: usize,
    next: usize,
    cost_prev: f64,
    cost_at: f64,
    cost_next: f64,
    clockwise: bool,
}

/// Dynamic tick: refresh derived statistics, then move at most one ring
/// boundary toward the cost equilibrium.
pub(crate) fn dynamic_tick(
    state: &mut DynamicState,
    alpha: f64,
    beta: f64,
    tick_no: u32,
) -> Vec<ServerTickStats> {
    let ring = &mut state.ring;
    let point_count = ring.points.len();
    if point_count <= 1 {
        return Vec::new();
    }

    // Per-point derived statistics come straight from the atomic counters.
    // The tick is the single writer of the float fields, so request threads
    // keep incrementing counters concurrently without observing torn rates.
    let mut max_point_sum = 0u32;
    let mut max_point_id = 0u32;
    for point in ring.points.iter_mut() {
        let get = point.stats.get_count();
        let set = point.stats.set_count();
        point.stats.sum = get.wrapping_add(set);
        if hit_rate_guard(get, set) {
            point.stats.hitrate = hit_rate(get, set);
            point.stats.nhitrate = point.stats.hitrate;
        }
        if point.stats.sum > max_point_sum {
            max_point_sum = point.stats.sum;
            max_point_id = point.index;
        }
    }
    for point in ring.points.iter_mut() {
        point.stats.usagerate = if max_point_sum > 0 {
            f64::from(point.stats.sum) / f64::from(max_point_sum)
        } else {
            0.0
        };
    }
    ring.max = max_point_sum;
    ring.max_id = max_point_id;

    // Server aggregation over the ring cycle.
    let server_count = ring.servers.len();
    let mut aggregate = vec![(0u32, 0u32, 0u32, 0u64); server_count];
    let mut max_server_sum = 0u32;
    for j in 0..point_count {
        let k = (j + 1) % point_count;
        let arc = arc_between(ring.points[j].value, ring.points[k].value);
        let index = ring.points[j].index as usize;
        let Some(entry) = aggregate.get_mut(index) else {
            continue;
        };
        entry.0 = entry.0.wrapping_add(ring.points[j].stats.get_count());
        entry.1 = entry.1.wrapping_add(ring.points[j].stats.set_count());
        entry.2 = entry.2.wrapping_add(ring.points[j].stats.sum);
        entry.3 += u64::from(arc);
        if entry.2 > max_server_sum {
            max_server_sum = entry.2;
        }
    }

    let mut max_hitrate = 0.0f64;
    for (server, &(get, set, sum, hashsize)) in ring.servers.iter_mut().zip(&aggregate) {
        server.get.store(get, Ordering::Relaxed);
        server.set.store(set, Ordering::Relaxed);
        server.sum = sum;
        server.hashsize = hashsize;
        if hit_rate_guard(get, set) {
            server.hitrate = hit_rate(get, set);
        }
        if server.hitrate > max_hitrate {
            max_hitrate = server.hitrate;
        }
    }

    let mut snapshot = Vec::with_capacity(server_count);
    for server in ring.servers.iter_mut() {
        let divisor = if max_hitrate == 0.0 { 1.0 } else { max_hitrate };
        server.nhitrate = server.hitrate / divisor;
        server.usagerate = if max_server_sum > 0 {
            f64::from(server.sum) / f64::from(max_server_sum)
        } else {
            0.0
        };
        server.psum = server.sum;

        snapshot.push(ServerTickStats {
            hitrate: server.hitrate,
            nhitrate: server.nhitrate,
            usagerate: server.usagerate,
            cost: scost(alpha, beta, server),
            hashsize: server.hashsize,
            set: server.set_count(),
            get: server.get_count(),
        });
    }

    // Cheapest and most expensive servers by cost. Ties keep the first.
    let mut max_cost = 0.0f64;
    let mut min_cost = 1000.0f64;
    let mut max_id = 0usize;
    let mut min_id = 0usize;
    for (index, server) in ring.servers.iter().enumerate() {
        let cost = scost(alpha, beta, server);
        if cost > max_cost {
            max_cost = cost;
            max_id = index;
        }
        if cost < min_cost {
            min_cost = cost;
            min_id = index;
        }
    }
    let servers_distinct = max_id != min_id;

    // Boundary search: among the adjacent pairs connecting the chosen
    // servers (or every pair when they coincide), pick the largest absolute
    // cost difference between the two sides.
    let mut best: Option<BoundaryMove> = None;
    let mut best_diff = 0.0f64;
    for at in 0..point_count {
        let prev = (at + point_count - 1) % point_count;
        let next = (at + 1) % point_count;
        let index_at = ring.points[at].index as usize;
        let index_next = ring.points[next].index as usize;

        if servers_distinct {
            let connects = (index_at == max_id && index_next == min_id)
                || (index_at == min_id && index_next == max_id);
            if !connects {
                continue;
            }
        }

        let cost_at = scost(alpha, beta, &ring.points[at].stats);
        let cost_next = scost(alpha, beta, &ring.points[next].stats);
        let diff = cost_at - cost_next;
        let clockwise = if servers_distinct {
            index_at == min_id
        } else {
            diff < 0.0
        };
        let diff = diff.abs();
        if diff > best_diff {
            best_diff = diff;
            best = Some(BoundaryMove {
                prev,
                at,
                next,
                cost_prev: scost(alpha, beta, &ring.points[prev].stats),
                cost_at,
                cost_next,
                clockwise,
            });
        }
    }

    if let Some(boundary) = best {
        apply_move(ring, &boundary, beta);

        // Reset for the next observation window. The server sums and hit
        // rates carry across ticks; everything else starts over.
        ring.max = 0;
        ring.max_id = 0;
        for point in ring.points.iter_mut() {
            point.stats.reset_counters();
            point.stats.sum = 0;
            point.stats.usagerate = 0.0;
        }
        for server in ring.servers.iter_mut() {
            server.reset_counters();
            server.usagerate = 0.0;
            server.hashsize = 0;
        }
        ring.sort_points();
    }

    tracing::debug!(
        tick = tick_no,
        servers = snapshot.len(),
        moved = best_diff > 0.0,
        "dynamic rebalance tick"
    );
    snapshot
}

/// Slides one boundary by `beta * (1 - rate) * gap`, where `rate` compares
/// the costs on the two sides. The move is skipped when it would reach the
/// neighbor, which keeps the ring sorted.
fn apply_move(ring: &mut Continuum, boundary: &BoundaryMove, beta: f64) {
    if boundary.clockwise {
        let rate = if boundary.cost_next > boundary.cost_at {
            boundary.cost_at / boundary.cost_next
        } else {
            boundary.cost_next / boundary.cost_at
        };
        let gap = signed_abs(
            ring.points[boundary.at]
                .value
                .wrapping_sub(ring.points[boundary.next].value),
        );
        let amount = (beta * (1.0 - rate) * f64::from(gap)) as u32;
        let remaining = signed_abs(
            ring.points[boundary.next]
                .value
                .wrapping_sub(ring.points[boundary.at].value),
        );
        if remaining > amount {
            ring.points[boundary.at].value =
                ring.points[boundary.at].value.wrapping_add(amount);
            tracing::debug!(
                from = ring.points[boundary.at].index,
                toward = ring.points[boundary.next].index,
                amount,
                "boundary moved clockwise"
            );
        }
    } else {
        let rate = if boundary.cost_at > boundary.cost_prev {
            boundary.cost_prev / boundary.cost_at
        } else {
            boundary.cost_at / boundary.cost_prev
        };
        let gap = signed_abs(
            ring.points[boundary.prev]
                .value
                .wrapping_sub(ring.points[boundary.at].value),
        );
        let amount = (beta * (1.0 - rate) * f64::from(gap)) as u32;
        let remaining = signed_abs(
            ring.points[boundary.at]
                .value
                .wrapping_sub(ring.points[boundary.prev].value),
        );
        if remaining > amount {
            ring.points[boundary.at].value =
                ring.points[boundary.at].value.wrapping_sub(amount);
            tracing::debug!(
                from = ring.points[boundary.at].index,
                toward = ring.points[boundary.prev].index,
                amount,
                "boundary moved counter-clockwise"
            );
        }
    }
}

/// Magnitude of a wrapped difference, read as a signed 32-bit distance.
#[inline]
fn signed_abs(wrapped: u32) -> u32 {
    (wrapped as i32).unsigned_abs()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::Fleet;
    use crate::ring::dynamic::update_dynamic;
    use crate::ring::ketama::update_continuum;
    use crate::hash::{HashAlgorithm, Hashkit};
    use crate::selector::Command;

    const UNIT_6: u32 = u32::MAX / 6;

    fn fleet_of(count: usize) -> Fleet {
        let mut fleet = Fleet::new();
        for i in 0..count {
            fleet.push_tcp(&format!("server-{}", i), 11211, 0).unwrap();
        }
        fleet
    }

    fn dynamic_state(count: usize) -> DynamicState {
        let mut state = DynamicState::new();
        update_dynamic(&mut state, &fleet_of(count), false, 1, 0).unwrap();
        state
    }

    fn load_point(state: &mut DynamicState, position: usize, get: u32, set: u32) {
        state.ring.points[position]
            .stats
            .get
            .store(get, Ordering::Relaxed);
        state.ring.points[position]
            .stats
            .set
            .store(set, Ordering::Relaxed);
    }

    // Ring owners after the initial three-server build: [0, 1, 2, 0, 2, 1].
    // Server 0 is loaded hot with a poor hit rate, server 2 stays cold with
    // a good one, server 1 sits in between and carries the busiest points.
    fn loaded_three_server_state() -> DynamicState {
        let mut state = dynamic_state(3);
        load_point(&mut state, 0, 100, 40);
        load_point(&mut state, 1, 150, 30);
        load_point(&mut state, 2, 20, 1);
        load_point(&mut state, 3, 100, 40);
        load_point(&mut state, 4, 20, 1);
        load_point(&mut state, 5, 150, 30);
        state
    }

    #[test]
    fn hit_rate_and_guard_shape() {
        // All hits: no sets, full rate.
        assert!(hit_rate_guard(100, 0));
        assert_eq!(hit_rate(100, 0), 1.0);
        // Every other get misses: rate collapses to zero.
        assert!(hit_rate_guard(100, 50));
        assert_eq!(hit_rate(100, 50), 0.0);
        // More sets than half the gets: the guard refuses the update.
        assert!(!hit_rate_guard(100, 51));
        assert!(!hit_rate_guard(0, 0));
    }

    #[test]
    fn cost_prefers_hitting_underloaded_servers() {
        let mut cheap = SchedStats::new();
        cheap.nhitrate = 1.0;
        cheap.usagerate = 0.1;
        let mut expensive = SchedStats::new();
        expensive.nhitrate = 0.2;
        expensive.usagerate = 0.9;

        assert!(scost(1.0, 0.1, &cheap) < scost(1.0, 0.1, &expensive));
        assert_eq!(scost(1.0, 0.1, &cheap), 0.1 * 0.1);
    }

    #[test]
    fn dynamic_tick_derives_server_rates() {
        let mut state = loaded_three_server_state();
        let snapshot = dynamic_tick(&mut state, 1.0, 0.1, 1);

        assert_eq!(snapshot.len(), 3);
        // Sums 280 / 360 / 42; the busiest server pegs usage at 1.0.
        assert!((snapshot[0].usagerate - 280.0 / 360.0).abs() < 1e-12);
        assert_eq!(snapshot[1].usagerate, 1.0);
        assert!((snapshot[2].usagerate - 42.0 / 360.0).abs() < 1e-12);

        assert_eq!(snapshot[0].hitrate, 0.2);
        assert_eq!(snapshot[1].hitrate, 0.6);
        assert_eq!(snapshot[2].hitrate, 0.9);

        // Expensive server 0, cheap server 2.
        assert!(snapshot[2].cost < snapshot[1].cost);
        assert!(snapshot[1].cost < snapshot[0].cost);
    }

    #[test]
    fn dynamic_tick_moves_the_boundary_toward_the_cheap_server() {
        let mut state = loaded_three_server_state();
        dynamic_tick(&mut state, 1.0, 0.1, 1);

        // The boundary between cheap server 2 and expensive server 0 moves
        // clockwise, growing server 2's arc by beta * (1 - rate) * gap.
        let moved = &state.ring.points[2];
        assert_eq!(moved.index, 2);
        assert_eq!(moved.value, 2_209_960_016);
        assert_eq!(moved.value - (UNIT_6 * 3), 62_476_370);

        // A single move never reorders the ring.
        let values: Vec<u32> = state.ring.points.iter().map(|p| p.value).collect();
        let mut sorted = values.clone();
        sorted.sort_unstable();
        assert_eq!(values, sorted);
    }

    #[test]
    fn dynamic_tick_resets_the_observation_window() {
        let mut state = loaded_three_server_state();
        dynamic_tick(&mut state, 1.0, 0.1, 1);

        for point in state.ring.points() {
            assert_eq!(point.stats.get_count(), 0);
            assert_eq!(point.stats.set_count(), 0);
            assert_eq!(point.stats.sum, 0);
            assert_eq!(point.stats.usagerate, 0.0);
        }
        // Server sums, hit rates, and prior sums carry into the next tick.
        assert_eq!(state.ring.servers[0].sum, 280);
        assert_eq!(state.ring.servers[0].hitrate, 0.2);
        assert_eq!(state.ring.servers[0].psum, 280);
        assert_eq!(state.ring.servers[0].usagerate, 0.0);
        assert_eq!(state.ring.servers[0].hashsize, 0);
        assert_eq!(state.ring.max_observed(), (0, 0));
    }

    #[test]
    fn dynamic_tick_without_traffic_makes_no_move() {
        let mut state = dynamic_state(3);
        let before: Vec<u32> = state.ring.points().iter().map(|p| p.value).collect();
        let snapshot = dynamic_tick(&mut state, 1.0, 0.1, 1);

        let after: Vec<u32> = state.ring.points().iter().map(|p| p.value).collect();
        assert_eq!(before, after, "zero cost difference moves nothing");
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn dynamic_tick_on_a_single_point_is_a_no_op() {
        let mut state = dynamic_state(1);
        assert!(dynamic_tick(&mut state, 1.0, 0.1, 1).is_empty());
    }

    #[test]
    fn ketama_tick_reports_and_resets() {
        let fleet = fleet_of(2);
        let mut ring = Continuum::default();
        update_continuum(
            &mut ring,
            &fleet,
            &Hashkit::new(HashAlgorithm::Md5),
            false,
            false,
            false,
            0,
        )
        .unwrap();

        for _ in 0..40 {
            ring.servers[0].record(Command::Get);
        }
        for _ in 0..10 {
            ring.servers[0].record(Command::Set);
        }
        for _ in 0..20 {
            ring.servers[1].record(Command::Get);
        }

        let snapshot = ketama_tick(&mut ring, 1.0, 0.1, 1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].get, 40);
        assert_eq!(snapshot[0].set, 10);
        assert_eq!(snapshot[0].usagerate, 1.0);
        assert_eq!(snapshot[1].usagerate, 0.4);
        assert_eq!(snapshot[0].hitrate, 0.5);
        assert_eq!(snapshot[1].hitrate, 1.0);

        // The tick owns the whole ring's arc.
        let total: u64 = snapshot.iter().map(|s| s.hashsize).sum();
        assert_eq!(total, 1u64 << 32);

        // Everything resets afterward, including the hit rate.
        assert_eq!(ring.servers[0].get_count(), 0);
        assert_eq!(ring.servers[0].hitrate, 0.0);
        assert_eq!(ring.servers[0].hashsize, 0);
    }

    #[test]
    fn controller_dispatches_by_strategy() {
        use crate::builder::{Distribution, SelectorBuilder};

        let selector = Arc::new(
            SelectorBuilder::new()
                .distribution(Distribution::Modulo)
                .build()
                .unwrap(),
        );
        selector.server_add("a", 11211).unwrap();
        let controller = RebalanceController::new(selector);

        assert!(controller.tick().is_empty(), "modulo has nothing to observe");
        assert_eq!(controller.tick_count(), 1);
    }
}
