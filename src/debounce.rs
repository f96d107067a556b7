/// Per-channel occupancy debounce.
///
/// Each reporting channel (main + one per zone) runs its own hysteresis:
///
/// ```text
/// Clear ──raw on──▶ PendingOccupied ──delay held──▶ Occupied
///   ▲                    │ raw off (silent)             │ raw off
///   └────────────────────┘                              ▼
/// Clear ◀──cooldown held── PendingClear ◀───────────────┘
///                              │ raw on (silent) ──▶ Occupied
/// ```
///
/// Timestamps are milliseconds from a monotonic clock supplied by the caller,
/// so the state machine never sees wall-clock jumps. It is sampled on a fixed
/// cadence against the latest snapshot rather than per decoded frame.
use heapless::Vec;
use serde::Serialize;

use crate::config::{ChannelTiming, OccupancyTiming, CHANNEL_COUNT};
use crate::state::StateSnapshot;

/// A debounced reporting channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportChannel {
    Main,
    /// Zone index 0..5
    Zone(u8),
}

impl ReportChannel {
    /// Position in the timing table: 0 is main, 1..=5 the zones.
    pub fn index(&self) -> usize {
        match self {
            ReportChannel::Main => 0,
            ReportChannel::Zone(z) => 1 + *z as usize,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ReportChannel::Main),
            n if n < CHANNEL_COUNT => Some(ReportChannel::Zone((n - 1) as u8)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        const NAMES: [&str; CHANNEL_COUNT] = ["main", "zone1", "zone2", "zone3", "zone4", "zone5"];
        NAMES.get(self.index()).copied().unwrap_or("zone?")
    }

    pub fn parse(name: &str) -> Option<Self> {
        (0..CHANNEL_COUNT)
            .filter_map(Self::from_index)
            .find(|c| c.name() == name)
    }
}

/// A stable occupancy change to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupancyEvent {
    pub channel: ReportChannel,
    pub occupied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Clear,
    PendingOccupied { since_ms: u64 },
    Occupied,
    PendingClear { since_ms: u64 },
}

/// Debounce state of one channel.
#[derive(Debug, Clone, Copy)]
pub struct EndpointTimer {
    phase: Phase,
    last_report_ms: Option<u64>,
}

impl EndpointTimer {
    const fn new() -> Self {
        Self {
            phase: Phase::Clear,
            last_report_ms: None,
        }
    }

    /// Last state that was reported (or the initial clear).
    pub fn last_reported(&self) -> bool {
        matches!(self.phase, Phase::Occupied | Phase::PendingClear { .. })
    }

    /// When this channel last emitted an event.
    pub fn last_report_ms(&self) -> Option<u64> {
        self.last_report_ms
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self.phase,
            Phase::PendingOccupied { .. } | Phase::PendingClear { .. }
        )
    }

    fn step(&mut self, raw: bool, now_ms: u64, timing: &ChannelTiming) -> Option<bool> {
        self.phase = match (self.phase, raw) {
            (Phase::Clear, true) => Phase::PendingOccupied { since_ms: now_ms },
            (Phase::PendingOccupied { .. }, false) => Phase::Clear,
            (Phase::Occupied, false) => Phase::PendingClear { since_ms: now_ms },
            (Phase::PendingClear { .. }, true) => Phase::Occupied,
            (phase, _) => phase,
        };

        let settled = match self.phase {
            Phase::PendingOccupied { since_ms }
                if now_ms.saturating_sub(since_ms) >= timing.delay_ms_u64() =>
            {
                Phase::Occupied
            }
            Phase::PendingClear { since_ms }
                if now_ms.saturating_sub(since_ms) >= timing.cooldown_ms_u64() =>
            {
                Phase::Clear
            }
            _ => return None,
        };

        self.phase = settled;
        self.last_report_ms = Some(now_ms);
        Some(settled == Phase::Occupied)
    }
}

/// Hysteresis over all reporting channels.
pub struct OccupancyDebouncer {
    timers: [EndpointTimer; CHANNEL_COUNT],
    timing: OccupancyTiming,
}

impl OccupancyDebouncer {
    pub const fn new(timing: OccupancyTiming) -> Self {
        Self {
            timers: [EndpointTimer::new(); CHANNEL_COUNT],
            timing,
        }
    }

    pub fn timing(&self) -> &OccupancyTiming {
        &self.timing
    }

    /// Update one channel's delay/cooldown. Takes effect on the next tick;
    /// a transition already pending is measured against the new value.
    pub fn set_timing(&mut self, channel: ReportChannel, timing: ChannelTiming) {
        if let Some(slot) = self.timing.channels.get_mut(channel.index()) {
            *slot = timing.clamped();
        }
    }

    /// Replace every channel's timing at once.
    pub fn set_timings(&mut self, timing: OccupancyTiming) {
        for (slot, t) in self.timing.channels.iter_mut().zip(timing.channels) {
            *slot = t.clamped();
        }
    }

    pub fn timer(&self, channel: ReportChannel) -> &EndpointTimer {
        &self.timers[channel.index()]
    }

    /// Forget all pending and reported state.
    pub fn reset(&mut self) {
        self.timers = [EndpointTimer::new(); CHANNEL_COUNT];
    }

    /// Feed one raw sample for `channel`. Returns an event when the debounced
    /// state changes. Transients shorter than the delay/cooldown are dropped
    /// without an event.
    pub fn tick(&mut self, channel: ReportChannel, raw: bool, now_ms: u64) -> Option<OccupancyEvent> {
        let idx = channel.index();
        let timing = self.timing.channels.get(idx)?;
        let occupied = self.timers.get_mut(idx)?.step(raw, now_ms, timing)?;
        log::debug!(
            "{} -> {}",
            channel.name(),
            if occupied { "occupied" } else { "clear" }
        );
        Some(OccupancyEvent { channel, occupied })
    }

    /// Tick every channel against one snapshot.
    pub fn tick_snapshot(
        &mut self,
        snapshot: &StateSnapshot,
        now_ms: u64,
    ) -> Vec<OccupancyEvent, CHANNEL_COUNT> {
        let mut events = Vec::new();
        for idx in 0..CHANNEL_COUNT {
            let (Some(channel), Some(raw)) =
                (ReportChannel::from_index(idx), snapshot.channel_occupied(idx))
            else {
                continue;
            };
            if let Some(event) = self.tick(channel, raw, now_ms) {
                let _ = events.push(event);
            }
        }
        events
    }
}

impl Default for OccupancyDebouncer {
    fn default() -> Self {
        Self::new(OccupancyTiming::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: ReportChannel = ReportChannel::Main;

    fn debouncer(delay_ms: u16, cooldown_s: u16) -> OccupancyDebouncer {
        OccupancyDebouncer::new(OccupancyTiming::uniform(ChannelTiming::new(delay_ms, cooldown_s)))
    }

    fn occupied(channel: ReportChannel) -> Option<OccupancyEvent> {
        Some(OccupancyEvent { channel, occupied: true })
    }

    fn clear(channel: ReportChannel) -> Option<OccupancyEvent> {
        Some(OccupancyEvent { channel, occupied: false })
    }

    // ── Zero timing ─────────────────────────────────────────────────

    #[test]
    fn zero_delay_reports_on_first_tick() {
        let mut d = debouncer(0, 0);
        assert_eq!(d.tick(MAIN, true, 1000), occupied(MAIN));
        assert_eq!(d.tick(MAIN, true, 1100), None);
    }

    #[test]
    fn zero_cooldown_reports_on_first_tick() {
        let mut d = debouncer(0, 0);
        d.tick(MAIN, true, 0);
        assert_eq!(d.tick(MAIN, false, 100), clear(MAIN));
        assert_eq!(d.tick(MAIN, false, 200), None);
    }

    #[test]
    fn initial_clear_is_not_reported() {
        let mut d = debouncer(0, 0);
        for t in 0..10 {
            assert_eq!(d.tick(MAIN, false, t * 100), None);
        }
    }

    // ── Entry delay ─────────────────────────────────────────────────

    #[test]
    fn occupied_after_delay() {
        let mut d = debouncer(500, 0);
        assert_eq!(d.tick(MAIN, true, 1000), None);
        assert!(d.timer(MAIN).is_pending());
        assert_eq!(d.tick(MAIN, true, 1400), None);
        assert_eq!(d.tick(MAIN, true, 1500), occupied(MAIN));
        assert!(d.timer(MAIN).last_reported());
        assert_eq!(d.timer(MAIN).last_report_ms(), Some(1500));
    }

    #[test]
    fn short_pulse_never_reports_occupied() {
        let mut d = debouncer(500, 0);
        assert_eq!(d.tick(MAIN, true, 0), None);
        assert_eq!(d.tick(MAIN, true, 300), None);
        assert_eq!(d.tick(MAIN, false, 400), None);
        assert!(!d.timer(MAIN).is_pending());
        assert_eq!(d.tick(MAIN, false, 1000), None);
        assert!(!d.timer(MAIN).last_reported());
    }

    #[test]
    fn cancelled_pulse_restarts_delay() {
        let mut d = debouncer(500, 0);
        d.tick(MAIN, true, 0);
        d.tick(MAIN, false, 400);
        // New pulse measures from its own start, not the cancelled one
        assert_eq!(d.tick(MAIN, true, 600), None);
        assert_eq!(d.tick(MAIN, true, 1000), None);
        assert_eq!(d.tick(MAIN, true, 1100), occupied(MAIN));
    }

    // ── Exit cooldown ───────────────────────────────────────────────

    #[test]
    fn clear_after_cooldown() {
        let mut d = debouncer(0, 2);
        d.tick(MAIN, true, 0);
        assert_eq!(d.tick(MAIN, false, 1000), None);
        assert_eq!(d.tick(MAIN, false, 2999), None);
        assert_eq!(d.tick(MAIN, false, 3000), clear(MAIN));
        assert!(!d.timer(MAIN).last_reported());
    }

    #[test]
    fn short_gap_never_reports_clear() {
        let mut d = debouncer(0, 2);
        d.tick(MAIN, true, 0);
        assert_eq!(d.tick(MAIN, false, 1000), None);
        assert_eq!(d.tick(MAIN, true, 2500), None);
        assert!(d.timer(MAIN).last_reported());
        assert!(!d.timer(MAIN).is_pending());
        assert_eq!(d.tick(MAIN, false, 2600), None);
        assert_eq!(d.tick(MAIN, false, 4599), None);
        assert_eq!(d.tick(MAIN, false, 4600), clear(MAIN));
    }

    // ── Channels ────────────────────────────────────────────────────

    #[test]
    fn channels_are_independent() {
        let mut d = debouncer(0, 0);
        d.set_timing(ReportChannel::Zone(2), ChannelTiming::new(1000, 0));

        assert_eq!(d.tick(MAIN, true, 0), occupied(MAIN));
        assert_eq!(d.tick(ReportChannel::Zone(2), true, 0), None);
        assert_eq!(d.tick(ReportChannel::Zone(0), true, 0), occupied(ReportChannel::Zone(0)));
        assert_eq!(
            d.tick(ReportChannel::Zone(2), true, 1000),
            occupied(ReportChannel::Zone(2))
        );
    }

    #[test]
    fn snapshot_tick_covers_all_channels() {
        let mut d = debouncer(0, 0);
        let mut snap = StateSnapshot::default();
        snap.occupied_global = true;
        snap.zone_occupied[1] = true;

        let events = d.tick_snapshot(&snap, 0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], OccupancyEvent { channel: MAIN, occupied: true });
        assert_eq!(
            events[1],
            OccupancyEvent { channel: ReportChannel::Zone(1), occupied: true }
        );
        assert!(d.tick_snapshot(&snap, 100).is_empty());
    }

    #[test]
    fn cooldown_is_clamped_on_set() {
        let mut d = debouncer(0, 0);
        d.set_timing(MAIN, ChannelTiming::new(0, 5000));
        assert_eq!(d.timing().channels[0].cooldown_s, 300);
    }

    #[test]
    fn pending_transition_uses_updated_timing() {
        let mut d = debouncer(1000, 0);
        d.tick(MAIN, true, 0);
        d.set_timings(OccupancyTiming::uniform(ChannelTiming::new(200, 0)));
        assert_eq!(d.tick(MAIN, true, 200), occupied(MAIN));
    }

    #[test]
    fn reset_forgets_state() {
        let mut d = debouncer(0, 0);
        d.tick(MAIN, true, 0);
        d.reset();
        assert!(!d.timer(MAIN).last_reported());
        assert_eq!(d.tick(MAIN, true, 10), occupied(MAIN));
    }

    #[test]
    fn channel_names_round_trip() {
        for idx in 0..CHANNEL_COUNT {
            let ch = ReportChannel::from_index(idx).unwrap();
            assert_eq!(ch.index(), idx);
            assert_eq!(ReportChannel::parse(ch.name()), Some(ch));
        }
        assert_eq!(ReportChannel::from_index(CHANNEL_COUNT), None);
        assert_eq!(ReportChannel::parse("zone6"), None);
    }
}
