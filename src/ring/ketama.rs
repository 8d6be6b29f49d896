//! Ketama continuum construction.
//!
//! The ring layout is wire-compatible with the consistent-hashing scheme
//! shared by the classic memcache client family: peers that build a ring
//! from the same server list and hash algorithm resolve every key to the
//! same server. That compatibility hinges on three exact rules:
//!
//! 1. **Labels.** Each server emits point-source labels `"{host}-{i}"`
//!    (default port), `"{host}:{port}-{i}"` (other ports), or
//!    `"/{host}:{port}-{i}"` (spy-compatible clients), with `i` counting
//!    from 0 in every variant.
//! 2. **Point counts.** Unweighted servers emit exactly
//!    [`POINTS_PER_SERVER`] points, one per label, hashed through the
//!    configured [`Hashkit`]. Weighted servers emit
//!    `floor(weight/total · 160/4 · live)·4` points in groups of four.
//! 3. **MD5 alignment.** Weighted groups slice one MD5 digest into four
//!    little-endian `u32` ring positions.
//!
//! A rebuild constructs the new point vector off to the side and installs
//! it wholesale, so a failed build leaves the previous ring intact.

use std::fmt::Write as _;

use md5::{Digest, Md5};

use crate::error::SelectError;
use crate::fleet::{Fleet, ServerInstance, MAX_HOSTNAME};
use crate::hash::Hashkit;
use crate::ring::{count_live, Continuum, ContinuumPoint, POINTS_PER_HASH, POINTS_PER_SERVER};

/// Bound on a generated label: slash, hostname, colon, port, dash, index.
const LABEL_MAX: usize = 1 + MAX_HOSTNAME + 1 + 32 + 1 + 32;

/// Rebuilds `ring` from the fleet.
///
/// Ejected servers are skipped while `auto_eject` is on and the earliest
/// retry deadline lands in `ring.next_rebuild`. When every server is
/// ejected the previous ring is kept so selection can limp along until a
/// host revives.
pub(crate) fn update_continuum(
    ring: &mut Continuum,
    fleet: &Fleet,
    hashkit: &Hashkit,
    spy: bool,
    weighted: bool,
    auto_eject: bool,
    now: i64,
) -> Result<(), SelectError> {
    let live_servers = count_live(&mut ring.next_rebuild, fleet, auto_eject, now);
    if live_servers == 0 {
        return Ok(());
    }

    let total_weight: u64 = if weighted {
        fleet
            .iter()
            .filter(|server| !auto_eject || server.is_live(now))
            .map(|server| u64::from(server.weight()))
            .sum()
    } else {
        0
    };

    let mut points =
        Vec::with_capacity(live_servers as usize * POINTS_PER_SERVER as usize);

    for (host_index, server) in fleet.iter().enumerate() {
        if auto_eject && !server.is_live(now) {
            continue;
        }

        let (per_server, per_hash) = if weighted {
            (weighted_points(server.weight(), total_weight, live_servers), POINTS_PER_HASH)
        } else {
            (POINTS_PER_SERVER, 1)
        };

        for pointer_index in 0..per_server / per_hash {
            let label = format_label(server, spy, pointer_index)?;
            if weighted {
                let digest = Md5::digest(label.as_bytes());
                for alignment in 0..POINTS_PER_HASH as usize {
                    points.push(ContinuumPoint::new(
                        aligned_u32(&digest, alignment),
                        host_index as u32,
                    ));
                }
            } else {
                points.push(ContinuumPoint::new(
                    hashkit.digest(label.as_bytes()),
                    host_index as u32,
                ));
            }
        }
    }

    points.sort_by_key(|point| point.value);

    tracing::debug!(
        live_servers,
        points = points.len(),
        weighted,
        spy,
        "ketama continuum rebuilt"
    );

    ring.points = points;
    ring.server_count = live_servers;
    // Stats slots are addressed by fleet position and survive rebuilds;
    // they are only re-created when the fleet itself changes size.
    if ring.servers.len() != fleet.len() {
        ring.reset_server_slots(fleet.len());
    }
    Ok(())
}

/// Points for one weighted server. The float dance mirrors the historical
/// computation, including its epsilon, so weighted rings stay bit-exact
/// with peer clients.
fn weighted_points(weight: u32, total_weight: u64, live_servers: u32) -> u32 {
    let pct = weight as f32 / total_weight as f32;
    let scaled =
        (f64::from(pct * POINTS_PER_SERVER as f32 / 4.0 * live_servers as f32) + 0.000_000_000_1)
            as f32;
    (scaled.floor() as u32) * 4
}

/// One point-source label. Indices are 0-based in every variant.
pub(crate) fn format_label(
    server: &ServerInstance,
    spy: bool,
    index: u32,
) -> Result<String, SelectError> {
    let mut label = String::with_capacity(64);
    if spy {
        let _ = write!(label, "/{}:{}-{}", server.hostname(), server.port(), index);
    } else if server.uses_default_port() {
        let _ = write!(label, "{}-{}", server.hostname(), index);
    } else {
        let _ = write!(label, "{}:{}-{}", server.hostname(), server.port(), index);
    }
    if label.len() > LABEL_MAX {
        return Err(SelectError::MemoryAllocation(
            "continuum label exceeds buffer bounds".into(),
        ));
    }
    Ok(label)
}

/// Carves little-endian `u32` number `alignment` out of an MD5 digest.
#[inline]
fn aligned_u32(digest: &[u8], alignment: usize) -> u32 {
    let off = alignment * 4;
    u32::from_le_bytes([digest[off], digest[off + 1], digest[off + 2], digest[off + 3]])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
