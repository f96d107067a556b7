/// Zone engine: point-in-polygon tests and single-target selection.
///
/// Zones are user-defined quadrilaterals in sensor-relative millimetres
/// (x lateral, y forward). All arithmetic is integer so results are
/// deterministic across targets.
use serde::{Deserialize, Serialize};

use crate::config::{RuntimeConfig, TrackingMode};
use crate::frame::{Report, Target, MAX_TARGETS};

/// Number of configurable zones
pub const ZONE_COUNT: usize = 5;

/// A point in sensor coordinates (mm)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x_mm: i16,
    pub y_mm: i16,
}

impl Point {
    pub const fn new(x_mm: i16, y_mm: i16) -> Self {
        Self { x_mm, y_mm }
    }
}

impl From<&Target> for Point {
    fn from(t: &Target) -> Self {
        Self::new(t.x_mm, t.y_mm)
    }
}

/// A four-sided zone. Vertices are expected in consistent winding order;
/// self-intersection is not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub enabled: bool,
    pub vertices: [Point; 4],
}

impl Zone {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            vertices: [Point::new(0, 0); 4],
        }
    }

    /// Axis-aligned rectangle helper.
    pub const fn rect(x1: i16, y1: i16, x2: i16, y2: i16) -> Self {
        Self {
            enabled: true,
            vertices: [
                Point::new(x1, y1),
                Point::new(x2, y1),
                Point::new(x2, y2),
                Point::new(x1, y2),
            ],
        }
    }

    /// Enabled with every vertex at the origin: almost certainly an unset zone.
    pub fn is_degenerate(&self) -> bool {
        self.enabled && self.vertices.iter().all(|v| *v == Point::default())
    }
}

/// Rejected zone updates. The table is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ZoneError {
    #[error("zone index {0} out of range (0..{ZONE_COUNT})")]
    IndexOutOfRange(usize),
    #[error("zone {0} is enabled but has no vertices")]
    Degenerate(usize),
    #[error("expected {ZONE_COUNT} zones, got {0}")]
    CountMismatch(usize),
}

/// The fixed set of zones evaluated every cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTable {
    zones: [Zone; ZONE_COUNT],
}

impl ZoneTable {
    pub const fn new() -> Self {
        Self {
            zones: [Zone::disabled(); ZONE_COUNT],
        }
    }

    pub fn zones(&self) -> &[Zone; ZONE_COUNT] {
        &self.zones
    }

    pub fn get(&self, index: usize) -> Option<&Zone> {
        self.zones.get(index)
    }

    /// Replace one zone after validation.
    pub fn set(&mut self, index: usize, zone: Zone) -> Result<(), ZoneError> {
        validate(index, &zone)?;
        self.zones[index] = zone;
        Ok(())
    }

    /// Replace all zones. Every entry is validated before anything changes.
    pub fn set_all(&mut self, zones: &[Zone]) -> Result<(), ZoneError> {
        if zones.len() != ZONE_COUNT {
            return Err(ZoneError::CountMismatch(zones.len()));
        }
        for (i, z) in zones.iter().enumerate() {
            validate(i, z)?;
        }
        self.zones.copy_from_slice(zones);
        Ok(())
    }

    /// Copy zones into `out`, which must hold exactly [`ZONE_COUNT`] entries.
    pub fn copy_to(&self, out: &mut [Zone]) -> Result<(), ZoneError> {
        if out.len() != ZONE_COUNT {
            return Err(ZoneError::CountMismatch(out.len()));
        }
        out.copy_from_slice(&self.zones);
        Ok(())
    }
}

fn validate(index: usize, zone: &Zone) -> Result<(), ZoneError> {
    if index >= ZONE_COUNT {
        return Err(ZoneError::IndexOutOfRange(index));
    }
    if zone.is_degenerate() {
        return Err(ZoneError::Degenerate(index));
    }
    Ok(())
}

/// Collinear with segment a-b and within its bounding box.
fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let (px, py) = (i64::from(p.x_mm), i64::from(p.y_mm));
    let (ax, ay) = (i64::from(a.x_mm), i64::from(a.y_mm));
    let (bx, by) = (i64::from(b.x_mm), i64::from(b.y_mm));

    let cross = (py - ay) * (bx - ax) - (px - ax) * (by - ay);
    if cross != 0 {
        return false;
    }

    px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

/// Whether `p` lies inside `zone` or on its boundary.
///
/// Ray casting toward +x over the four edges; works for concave quads.
/// Disabled zones contain nothing.
pub fn contains(zone: &Zone, p: Point) -> bool {
    if !zone.enabled {
        return false;
    }

    let v = &zone.vertices;
    let mut inside = false;
    let mut j = v.len() - 1;

    for i in 0..v.len() {
        let (a, b) = (v[j], v[i]);
        j = i;

        if on_segment(p, a, b) {
            return true;
        }

        // Horizontal edges never straddle the ray
        if (a.y_mm > p.y_mm) != (b.y_mm > p.y_mm) {
            let dy = i64::from(b.y_mm) - i64::from(a.y_mm);
            let num = (i64::from(p.y_mm) - i64::from(a.y_mm))
                * (i64::from(b.x_mm) - i64::from(a.x_mm));
            let x_int = i64::from(a.x_mm) + num / dy;
            if x_int >= i64::from(p.x_mm) {
                inside = !inside;
            }
        }
    }

    inside
}

/// Pick the single target to track.
///
/// Prefers the nearest target with a positive forward (y) coordinate; if none
/// is in front, the one with the smallest |y|. Equal distances resolve to the
/// earlier slot.
pub fn select_target(report: &Report) -> Option<Target> {
    let in_front = report
        .present()
        .filter(|t| t.y_mm > 0)
        .fold(None::<&Target>, |best, t| match best {
            Some(b) if b.y_mm <= t.y_mm => Some(b),
            _ => Some(t),
        });

    in_front
        .or_else(|| {
            report.present().fold(None::<&Target>, |best, t| match best {
                Some(b) if b.y_mm.unsigned_abs() <= t.y_mm.unsigned_abs() => Some(b),
                _ => Some(t),
            })
        })
        .copied()
}

/// Outcome of evaluating every zone against one report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneEvaluation {
    pub zone_occupied: [bool; ZONE_COUNT],
    /// Selected target (zeroed and not present if nothing is tracked)
    pub selected: Target,
    /// Target count after applying the tracking mode
    pub effective_count: u8,
}

impl ZoneEvaluation {
    /// Bit i set iff zone i is occupied.
    pub fn bitmap(&self) -> u8 {
        self.zone_occupied
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &occ)| if occ { acc | (1 << i) } else { acc })
    }
}

/// Evaluate all enabled zones for a report under the current tracking mode.
///
/// Multi mode: a zone is occupied if any present target lies in it.
/// Single mode: only the selected target counts, and the effective count
/// collapses to one while occupied.
pub fn evaluate_zones(
    report: &Report,
    config: &RuntimeConfig,
    zones: &[Zone; ZONE_COUNT],
) -> ZoneEvaluation {
    let selected = select_target(report);
    let mut eval = ZoneEvaluation {
        selected: selected.unwrap_or_default(),
        effective_count: report.target_count,
        ..ZoneEvaluation::default()
    };

    let mut candidates: heapless::Vec<Point, MAX_TARGETS> = heapless::Vec::new();
    match config.mode {
        TrackingMode::Multi => {
            for t in report.present() {
                let _ = candidates.push(Point::from(t));
            }
        }
        TrackingMode::Single => {
            if let Some(t) = &selected {
                let _ = candidates.push(Point::from(t));
            }
            if report.occupied {
                eval.effective_count = 1;
            }
        }
    }

    for (zone, occupied) in zones.iter().zip(eval.zone_occupied.iter_mut()) {
        if zone.enabled {
            *occupied = candidates.iter().any(|&p| contains(zone, p));
        }
    }

    eval
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(x: i16, y: i16) -> Target {
        Target { x_mm: x, y_mm: y, speed: 0, present: true }
    }

    fn report(targets: &[Target]) -> Report {
        let mut r = Report::default();
        for (slot, t) in r.targets.iter_mut().zip(targets) {
            *slot = *t;
        }
        r.target_count = r.targets.iter().filter(|t| t.present).count() as u8;
        r.occupied = r.target_count > 0;
        r
    }

    fn single() -> RuntimeConfig {
        RuntimeConfig { mode: TrackingMode::Single, ..RuntimeConfig::new() }
    }

    fn zones_with(index: usize, zone: Zone) -> [Zone; ZONE_COUNT] {
        let mut zones = [Zone::disabled(); ZONE_COUNT];
        zones[index] = zone;
        zones
    }

    // ── Containment ─────────────────────────────────────────────────

    #[test]
    fn square_inside_outside() {
        let z = Zone::rect(-1000, 0, 1000, 2000);
        assert!(contains(&z, Point::new(0, 1000)));
        assert!(contains(&z, Point::new(-999, 1)));
        assert!(!contains(&z, Point::new(1001, 1000)));
        assert!(!contains(&z, Point::new(0, -1)));
        assert!(!contains(&z, Point::new(0, 2500)));
    }

    #[test]
    fn boundary_is_inside() {
        let z = Zone::rect(-1000, 0, 1000, 2000);
        assert!(contains(&z, Point::new(-1000, 500))); // left edge
        assert!(contains(&z, Point::new(1000, 500))); // right edge
        assert!(contains(&z, Point::new(0, 0))); // bottom edge
        assert!(contains(&z, Point::new(0, 2000))); // top edge
        assert!(contains(&z, Point::new(1000, 2000))); // corner
    }

    #[test]
    fn diagonal_edge_boundary() {
        // Diamond centred on (0, 1000)
        let z = Zone {
            enabled: true,
            vertices: [
                Point::new(0, 0),
                Point::new(1000, 1000),
                Point::new(0, 2000),
                Point::new(-1000, 1000),
            ],
        };
        assert!(contains(&z, Point::new(500, 500)));
        assert!(contains(&z, Point::new(-500, 1500)));
        assert!(contains(&z, Point::new(0, 1000)));
        assert!(!contains(&z, Point::new(600, 500)));
        assert!(!contains(&z, Point::new(-900, 1900)));
    }

    #[test]
    fn concave_quad() {
        // Chevron: reflex vertex at (0, 500), notch opening toward the sensor
        let z = Zone {
            enabled: true,
            vertices: [
                Point::new(-1000, 0),
                Point::new(0, 500),
                Point::new(1000, 0),
                Point::new(0, 2000),
            ],
        };
        assert!(contains(&z, Point::new(0, 1000)));
        assert!(contains(&z, Point::new(500, 500)));
        assert!(contains(&z, Point::new(500, 250))); // on a notch edge
        assert!(contains(&z, Point::new(-500, 250))); // on the other notch edge
        assert!(!contains(&z, Point::new(0, 200))); // inside the notch
        assert!(!contains(&z, Point::new(500, 100)));
        assert!(!contains(&z, Point::new(900, 1500)));
        assert!(!contains(&z, Point::new(0, -10)));
    }

    #[test]
    fn disabled_zone_contains_nothing() {
        let mut z = Zone::rect(-1000, 0, 1000, 2000);
        z.enabled = false;
        assert!(!contains(&z, Point::new(0, 1000)));
    }

    #[test]
    fn extreme_coordinates_do_not_overflow() {
        let z = Zone::rect(i16::MIN, i16::MIN, i16::MAX, i16::MAX);
        assert!(contains(&z, Point::new(0, 0)));
        assert!(contains(&z, Point::new(i16::MAX, i16::MAX)));
    }

    // ── Selection ───────────────────────────────────────────────────

    #[test]
    fn selects_closest_in_front() {
        let r = report(&[target(0, 3000), target(100, 800), target(-50, 1500)]);
        assert_eq!(select_target(&r), Some(target(100, 800)));
    }

    #[test]
    fn in_front_beats_closer_behind() {
        let r = report(&[target(0, -100), target(0, 2500)]);
        assert_eq!(select_target(&r), Some(target(0, 2500)));
    }

    #[test]
    fn falls_back_to_smallest_abs_forward() {
        let r = report(&[target(10, -900), target(20, -300), target(30, 0)]);
        assert_eq!(select_target(&r), Some(target(30, 0)));
    }

    #[test]
    fn tie_goes_to_first_slot() {
        let r = report(&[target(-200, 1000), target(200, 1000)]);
        assert_eq!(select_target(&r), Some(target(-200, 1000)));
    }

    #[test]
    fn skips_absent_slots() {
        let mut r = report(&[target(0, 500), target(0, 900)]);
        r.targets[0].present = false;
        assert_eq!(select_target(&r), Some(target(0, 900)));
    }

    #[test]
    fn no_targets_no_selection() {
        assert_eq!(select_target(&Report::default()), None);
    }

    // ── Zone evaluation ─────────────────────────────────────────────

    #[test]
    fn multi_mode_any_target_occupies() {
        let zones = zones_with(2, Zone::rect(500, 2000, 1500, 3000));
        let r = report(&[target(0, 800), target(1000, 2500)]);
        let eval = evaluate_zones(&r, &RuntimeConfig::new(), &zones);
        assert_eq!(eval.zone_occupied, [false, false, true, false, false]);
        assert_eq!(eval.bitmap(), 0b0000_0100);
        assert_eq!(eval.effective_count, 2);
        assert_eq!(eval.selected, target(0, 800));
    }

    #[test]
    fn single_mode_only_selected_counts() {
        let zones = zones_with(2, Zone::rect(500, 2000, 1500, 3000));
        let r = report(&[target(0, 800), target(1000, 2500)]);
        let eval = evaluate_zones(&r, &single(), &zones);
        assert_eq!(eval.bitmap(), 0);
        assert_eq!(eval.effective_count, 1);
    }

    #[test]
    fn single_mode_selected_in_zone() {
        let zones = zones_with(0, Zone::rect(-500, 0, 500, 1000));
        let r = report(&[target(0, 2800), target(100, 700), target(0, 4000)]);
        let eval = evaluate_zones(&r, &single(), &zones);
        assert_eq!(eval.bitmap(), 0b0000_0001);
        assert_eq!(eval.effective_count, 1);
        assert_eq!(eval.selected, target(100, 700));
    }

    #[test]
    fn unoccupied_report_keeps_raw_count() {
        let zones = [Zone::rect(-500, 0, 500, 1000); ZONE_COUNT];
        let eval = evaluate_zones(&Report::default(), &single(), &zones);
        assert_eq!(eval.effective_count, 0);
        assert_eq!(eval.bitmap(), 0);
        assert!(!eval.selected.present);
    }

    #[test]
    fn disabled_zones_never_occupied() {
        let mut zone = Zone::rect(-500, 0, 500, 1000);
        zone.enabled = false;
        let zones = zones_with(1, zone);
        let r = report(&[target(0, 500)]);
        let eval = evaluate_zones(&r, &RuntimeConfig::new(), &zones);
        assert_eq!(eval.bitmap(), 0);
    }

    // ── Zone table validation ───────────────────────────────────────

    #[test]
    fn rejects_out_of_range_index() {
        let mut table = ZoneTable::new();
        assert_eq!(
            table.set(ZONE_COUNT, Zone::rect(0, 0, 10, 10)),
            Err(ZoneError::IndexOutOfRange(ZONE_COUNT))
        );
    }

    #[test]
    fn rejects_enabled_all_zero_zone() {
        let mut table = ZoneTable::new();
        let zone = Zone { enabled: true, vertices: [Point::default(); 4] };
        assert_eq!(table.set(1, zone), Err(ZoneError::Degenerate(1)));
        assert_eq!(table, ZoneTable::new());
    }

    #[test]
    fn disabled_all_zero_zone_is_fine() {
        let mut table = ZoneTable::new();
        assert!(table.set(1, Zone::disabled()).is_ok());
    }

    #[test]
    fn set_all_is_atomic() {
        let mut table = ZoneTable::new();
        let mut zones = [Zone::rect(0, 0, 100, 100); ZONE_COUNT];
        zones[4] = Zone { enabled: true, vertices: [Point::default(); 4] };
        assert_eq!(table.set_all(&zones), Err(ZoneError::Degenerate(4)));
        assert_eq!(table, ZoneTable::new());

        zones[4] = Zone::disabled();
        assert!(table.set_all(&zones).is_ok());
        assert_eq!(table.get(0), Some(&Zone::rect(0, 0, 100, 100)));
    }

    #[test]
    fn bulk_count_mismatch() {
        let mut table = ZoneTable::new();
        assert_eq!(
            table.set_all(&[Zone::disabled(); 3]),
            Err(ZoneError::CountMismatch(3))
        );
        let mut out = [Zone::disabled(); 4];
        assert_eq!(table.copy_to(&mut out), Err(ZoneError::CountMismatch(4)));
    }
}
