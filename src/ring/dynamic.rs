//! Dynamic continuum: a ring whose virtual nodes start uniform and are
//! nudged at runtime by the rebalance controller.
//!
//! ## Key Concepts
//!
//! - **Incipient layout**: with `L` servers the ring holds `L·(L−1)·R`
//!   uniformly spaced points (one point total when `L = 1`). The owner
//!   sequence is a walk over the complete directed graph on the servers
//!   that uses every ordered pair of distinct neighbors exactly once, so
//!   every server borders every other server.
//! - **Membership changes** mutate the ring in place instead of rebuilding:
//!   an added server takes half of each arc owned by the busiest existing
//!   server; a removed server's points vanish and higher indices compact
//!   down by one.
//! - **Rebuilds are membership-driven**: when the live-server count matches
//!   the ring, the update is a no-op and controller-made adjustments are
//!   preserved.

use crate::error::SelectError;
use crate::fleet::Fleet;
use crate::ring::{arc_between, count_live, Continuum, ContinuumPoint};

/// Ring state for the dynamic strategy.
#[derive(Debug, Default)]
pub struct DynamicState {
    pub(crate) ring: Continuum,
    /// Fleet position recorded by the last removal, consumed by the next
    /// rebuild. Negative when no removal is pending.
    pub(crate) removing_idx: i32,
}

impl DynamicState {
    pub fn new() -> Self {
        Self {
            ring: Continuum::default(),
            removing_idx: -1,
        }
    }

    pub fn ring(&self) -> &Continuum {
        &self.ring
    }
}

/// Brings the ring in line with the fleet's live membership.
pub(crate) fn update_dynamic(
    state: &mut DynamicState,
    fleet: &Fleet,
    auto_eject: bool,
    repetition: u32,
    now: i64,
) -> Result<(), SelectError> {
    let live = count_live(&mut state.ring.next_rebuild, fleet, auto_eject, now);
    if live == 0 || state.ring.server_count == live {
        return Ok(());
    }

    if state.ring.points.is_empty() {
        initial_build(&mut state.ring, live as usize, repetition);
    } else if live > state.ring.server_count {
        grow(&mut state.ring, live);
    } else {
        shrink(state, live);
    }

    tracing::debug!(
        live_servers = live,
        points = state.ring.points.len(),
        "dynamic continuum updated"
    );
    Ok(())
}

fn initial_build(ring: &mut Continuum, live: usize, repetition: u32) {
    let points_per_server = if live == 1 { 1 } else { live - 1 };
    let set_size = live * points_per_server;
    let total_points = if live == 1 {
        1
    } else {
        set_size * repetition as usize
    };

    let order = incipient_order(live, set_size);
    let unit = u32::MAX / total_points as u32;

    let mut points = Vec::with_capacity(total_points);
    for k in 0..total_points {
        points.push(ContinuumPoint::new(
            unit * (k as u32 + 1),
            order[k % set_size],
        ));
    }
    debug_assert!(points.windows(2).all(|w| w[0].value <= w[1].value));

    ring.points = points;
    ring.server_count = live as u32;
    ring.reset_server_slots(live);
    ring.max = 0;
    ring.max_id = 0;
}

/// Owner sequence for the incipient layout: starting at node 0, repeatedly
/// take the first unused outgoing edge from the current node, scanning
/// targets round-robin from just past the previous choice.
fn incipient_order(live: usize, set_size: usize) -> Vec<u32> {
    let mut order = vec![0u32; set_size];
    let mut used = vec![vec![false; live]; live];
    for (node, row) in used.iter_mut().enumerate() {
        row[node] = true;
    }

    let mut cur_node = 0usize;
    let mut next_slot = 1usize;
    let mut scan_from = 0usize;

    for _ in 0..set_size.saturating_sub(1) {
        for step in 0..live {
            let target = (scan_from + step) % live;
            if !used[cur_node][target] {
                used[cur_node][target] = true;
                order[next_slot] = target as u32;
                next_slot += 1;
                cur_node = target;
                scan_from = (target + 1) % live;
                break;
            }
        }
    }
    order
}

/// A server joined: split every arc of the busiest existing server, giving
/// the newcomer the first half. The donor is chosen by usage rate as
/// observed by the controller.
fn grow(ring: &mut Continuum, live: u32) {
    let mut max_usage = 0.0;
    let mut donor = 0u32;
    for (index, server) in ring.servers.iter().enumerate() {
        if server.usagerate > max_usage {
            max_usage = server.usagerate;
            donor = index as u32;
        }
    }

    let values: Vec<u32> = ring.points.iter().map(|p| p.value).collect();
    let point_count = values.len();
    let donor_points = ring.points.iter().filter(|p| p.index == donor).count();

    let old_points = std::mem::take(&mut ring.points);
    let mut points = Vec::with_capacity(point_count + donor_points);
    for (j, point) in old_points.into_iter().enumerate() {
        if point.index == donor {
            let prev = values[(j + point_count - 1) % point_count];
            let half = arc_between(prev, point.value) / 2;
            points.push(ContinuumPoint::new(
                point.value.wrapping_sub(half),
                live - 1,
            ));
        }
        points.push(point);
    }

    tracing::debug!(donor, transferred = donor_points, "dynamic ring grew");

    ring.points = points;
    ring.server_count = live;
    ring.reset_server_slots(live as usize);
    ring.sort_points();
}

/// A server left: drop its points and compact the indices above it.
fn shrink(state: &mut DynamicState, live: u32) {
    let removing = state.removing_idx;
    if removing < 0 {
        return;
    }
    let removing = removing as u32;
    state.removing_idx = -1;

    let old_points = std::mem::take(&mut state.ring.points);
    let mut points = Vec::with_capacity(old_points.len());
    for mut point in old_points {
        if point.index == removing {
            continue;
        }
        if point.index > removing {
            point.index -= 1;
        }
        points.push(point);
    }

    tracing::debug!(removed = removing, points = points.len(), "dynamic ring shrank");

    state.ring.points = points;
    state.ring.server_count = live;
    state.ring.reset_server_slots(live as usize);
    state.ring.sort_points();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
