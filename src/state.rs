/// Merged per-cycle state exported to downstream collaborators.
use serde::Serialize;

use crate::frame::{Report, Target, MAX_TARGETS};
use crate::zone::{ZoneEvaluation, ZONE_COUNT};

/// One decode cycle's worth of target data and zone flags.
///
/// Always built and published as a whole so readers never see target data
/// from one frame paired with zone flags from another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub occupied_global: bool,
    pub target_count_raw: u8,
    /// 1 in single-target mode while occupied, otherwise the raw count
    pub target_count_effective: u8,
    pub selected: Target,
    pub targets: [Target; MAX_TARGETS],
    pub zone_occupied: [bool; ZONE_COUNT],
    /// Bit i set iff `zone_occupied[i]`
    pub zone_bitmap: u8,
}

impl StateSnapshot {
    /// Combine a decoded report with its zone evaluation.
    pub fn from_cycle(report: &Report, eval: &ZoneEvaluation) -> Self {
        Self {
            occupied_global: report.occupied,
            target_count_raw: report.target_count,
            target_count_effective: eval.effective_count,
            selected: eval.selected,
            targets: report.targets,
            zone_occupied: eval.zone_occupied,
            zone_bitmap: eval.bitmap(),
        }
    }

    /// Raw occupancy for a reporting channel: 0 is main, 1..=5 the zones.
    pub fn channel_occupied(&self, channel: usize) -> Option<bool> {
        match channel {
            0 => Some(self.occupied_global),
            n => self.zone_occupied.get(n - 1).copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuntimeConfig, TrackingMode};
    use crate::zone::{evaluate_zones, Zone};

    fn two_target_report() -> Report {
        let mut r = Report::default();
        r.targets[0] = Target { x_mm: 0, y_mm: 900, speed: 0, present: true };
        r.targets[2] = Target { x_mm: 1200, y_mm: 2500, speed: -3, present: true };
        r.target_count = 2;
        r.occupied = true;
        r
    }

    #[test]
    fn bitmap_matches_zone_flags() {
        let mut zones = [Zone::disabled(); ZONE_COUNT];
        zones[0] = Zone::rect(-500, 0, 500, 1500);
        zones[3] = Zone::rect(1000, 2000, 1500, 3000);
        let r = two_target_report();
        let snap = StateSnapshot::from_cycle(&r, &evaluate_zones(&r, &RuntimeConfig::new(), &zones));

        assert_eq!(snap.zone_occupied, [true, false, false, true, false]);
        for (i, &occ) in snap.zone_occupied.iter().enumerate() {
            assert_eq!(snap.zone_bitmap & (1 << i) != 0, occ);
        }
        assert_eq!(snap.target_count_raw, 2);
        assert_eq!(snap.target_count_effective, 2);
    }

    #[test]
    fn single_mode_effective_count_is_one() {
        let zones = [Zone::disabled(); ZONE_COUNT];
        let cfg = RuntimeConfig { mode: TrackingMode::Single, ..RuntimeConfig::new() };
        let r = two_target_report();
        let snap = StateSnapshot::from_cycle(&r, &evaluate_zones(&r, &cfg, &zones));
        assert_eq!(snap.target_count_raw, 2);
        assert_eq!(snap.target_count_effective, 1);
        assert_eq!(snap.selected.y_mm, 900);
    }

    #[test]
    fn channel_lookup() {
        let mut snap = StateSnapshot::default();
        snap.occupied_global = true;
        snap.zone_occupied[4] = true;
        assert_eq!(snap.channel_occupied(0), Some(true));
        assert_eq!(snap.channel_occupied(1), Some(false));
        assert_eq!(snap.channel_occupied(5), Some(true));
        assert_eq!(snap.channel_occupied(6), None);
    }
}
