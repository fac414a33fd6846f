//! Safety constraints applied to raw scaling targets.
//!
//! All functions here are pure; the orchestrator decides when each applies.

use dbgrid_state::ZoneDistribution;

/// Clamp a target into `[min, max]`.
pub fn clamp_replicas(target: u32, min: u32, max: u32) -> u32 {
    target.max(min).min(max)
}

/// Nudge an even target to a neighbouring odd count within bounds.
///
/// Prefers `target + 1`, then `target - 1`. A target that cannot be made
/// odd within `[min, max]` is returned unchanged.
pub fn quorum_round(target: u32, min: u32, max: u32) -> u32 {
    if target % 2 == 1 {
        return target;
    }
    if target < max {
        target + 1
    } else if target > min && target > 0 {
        target - 1
    } else {
        target
    }
}

/// Whether a `(primaries, secondaries)` pair is a viable topology.
///
/// Valid shapes are one primary with at least one secondary, or two or more
/// primaries with any number of secondaries.
pub fn topology_valid(primaries: u32, secondaries: u32) -> bool {
    match primaries {
        0 => false,
        1 => secondaries >= 1,
        _ => true,
    }
}

/// Spread `target` replicas over `zones`, in the order given.
///
/// Every zone gets `target / zones`, the first `target % zones` one more.
/// With more zones than replicas the first `target` zones get one each.
/// Any zone below `min_per_zone` is then raised to it, so the total may
/// exceed `target`.
pub fn distribute_zones(target: u32, zones: &[String], min_per_zone: u32) -> ZoneDistribution {
    let mut distribution = ZoneDistribution::new();
    if zones.is_empty() {
        return distribution;
    }

    let count = zones.len() as u32;
    let (base, remainder) = if count > target {
        (0, target)
    } else {
        (target / count, target % count)
    };

    for (idx, zone) in zones.iter().enumerate() {
        let extra = u32::from((idx as u32) < remainder);
        distribution.insert(zone.clone(), (base + extra).max(min_per_zone));
    }
    distribution
}
