/// Shared state and the ingestion loop.
///
/// The loop owns the [`FrameDecoder`] and is the only writer of the published
/// [`StateSnapshot`]. Configuration collaborators write runtime config and
/// zones through [`SharedState`]; reporters read snapshots from it. Each lock
/// is held only for a copy in or out, never across a link call.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::{ChannelTiming, OccupancyTiming, RuntimeConfig, TrackingMode};
use crate::debounce::ReportChannel;
use crate::frame::{FrameDecoder, Report};
use crate::link::{Link, LinkArbiter, LinkError};
use crate::protocol::HostCommand;
use crate::state::StateSnapshot;
use crate::zone::{evaluate_zones, Zone, ZoneError, ZoneTable, ZONE_COUNT};

/// Bytes requested per link read
pub const READ_CHUNK: usize = 256;

/// Bound on each link read, so pause requests are noticed promptly
pub const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Longest single park before re-checking the stop flag
const PARK_SLICE: Duration = Duration::from_millis(500);

/// Back-off after a link error
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between ingestion, reporting and configuration.
#[derive(Debug, Default)]
pub struct SharedState {
    snapshot: Mutex<StateSnapshot>,
    runtime: Mutex<RuntimeConfig>,
    zones: Mutex<ZoneTable>,
    timing: Mutex<OccupancyTiming>,
    frames: AtomicU32,
}

impl SharedState {
    pub fn new(runtime: RuntimeConfig, zones: ZoneTable) -> Self {
        Self {
            snapshot: Mutex::new(StateSnapshot::default()),
            runtime: Mutex::new(runtime),
            zones: Mutex::new(zones),
            timing: Mutex::new(OccupancyTiming::new()),
            frames: AtomicU32::new(0),
        }
    }

    /// Latest published snapshot, copied out whole.
    pub fn snapshot(&self) -> StateSnapshot {
        *lock(&self.snapshot)
    }

    pub fn publish(&self, snapshot: StateSnapshot) {
        *lock(&self.snapshot) = snapshot;
    }

    /// Frames decoded by the ingestion loop since boot.
    pub fn frames(&self) -> u32 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn runtime(&self) -> RuntimeConfig {
        *lock(&self.runtime)
    }

    pub fn set_runtime(&self, runtime: RuntimeConfig) {
        *lock(&self.runtime) = runtime;
    }

    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.runtime).enabled = enabled;
        log::info!("Ingestion {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn set_tracking_mode(&self, mode: TrackingMode) {
        lock(&self.runtime).mode = mode;
        log::info!("Tracking mode -> {}", mode.as_str());
    }

    pub fn set_publish_coords(&self, publish: bool) {
        lock(&self.runtime).publish_coords = publish;
        log::info!("Publish coords -> {}", publish);
    }

    pub fn zones(&self) -> [Zone; ZONE_COUNT] {
        *lock(&self.zones).zones()
    }

    pub fn zone(&self, index: usize) -> Option<Zone> {
        lock(&self.zones).get(index).copied()
    }

    /// Replace one zone. Rejected updates leave the table unchanged.
    pub fn set_zone(&self, index: usize, zone: Zone) -> Result<(), ZoneError> {
        lock(&self.zones).set(index, zone)?;
        log::info!("Zone {} updated (enabled={})", index + 1, zone.enabled);
        Ok(())
    }

    /// Replace every zone at once.
    pub fn set_zones(&self, zones: &[Zone]) -> Result<(), ZoneError> {
        lock(&self.zones).set_all(zones)?;
        log::info!("Zones replaced");
        Ok(())
    }

    /// Debounce timing the reporter should apply.
    pub fn timing(&self) -> OccupancyTiming {
        *lock(&self.timing)
    }

    /// Update one channel's timing; `None` keeps the current value.
    pub fn set_channel_timing(
        &self,
        channel: ReportChannel,
        delay_ms: Option<u16>,
        cooldown_s: Option<u16>,
    ) -> ChannelTiming {
        let mut timing = lock(&self.timing);
        let slot = &mut timing.channels[channel.index()];
        *slot = ChannelTiming::new(
            delay_ms.unwrap_or(slot.delay_ms),
            cooldown_s.unwrap_or(slot.cooldown_s),
        )
        .clamped();
        let updated = *slot;
        drop(timing);
        log::info!(
            "{} timing -> delay {}ms, cooldown {}s",
            channel.name(),
            updated.delay_ms,
            updated.cooldown_s
        );
        updated
    }

    /// Apply a host configuration command. `None` if `cmd` is not a
    /// configuration command.
    pub fn apply(&self, cmd: &HostCommand) -> Option<Result<(), ZoneError>> {
        let result = match *cmd {
            HostCommand::SetEnabled { enabled } => {
                self.set_enabled(enabled);
                Ok(())
            }
            HostCommand::SetMode { mode } => {
                self.set_tracking_mode(mode);
                Ok(())
            }
            HostCommand::SetPublishCoords { enabled } => {
                self.set_publish_coords(enabled);
                Ok(())
            }
            HostCommand::SetZone { index, zone } => self.set_zone(index, zone),
            HostCommand::SetTiming {
                channel,
                delay_ms,
                cooldown_s,
            } => {
                self.set_channel_timing(channel, delay_ms, cooldown_s);
                Ok(())
            }
            _ => return None,
        };
        Some(result)
    }
}

// ── Ingestion ───────────────────────────────────────────────────────

/// What one pass of [`IngestionLoop::poll_once`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Parked for a command sequence; the link was not touched
    Paused,
    /// Read timed out with no data
    Idle,
    /// Bytes consumed but no complete frame yet
    Buffered,
    /// At least one frame decoded and a snapshot published
    Published,
}

/// Build the snapshot for one decode cycle.
pub fn cycle_snapshot(
    report: &Report,
    runtime: &RuntimeConfig,
    zones: &[Zone; ZONE_COUNT],
) -> StateSnapshot {
    if !runtime.enabled {
        return StateSnapshot::default();
    }
    StateSnapshot::from_cycle(report, &evaluate_zones(report, runtime, zones))
}

/// Reads the link, decodes frames and publishes snapshots.
pub struct IngestionLoop<L: Link> {
    link: Arc<L>,
    arbiter: Arc<LinkArbiter>,
    state: Arc<SharedState>,
    decoder: FrameDecoder,
    buf: [u8; READ_CHUNK],
    published: u32,
}

impl<L: Link> IngestionLoop<L> {
    pub fn new(link: Arc<L>, arbiter: Arc<LinkArbiter>, state: Arc<SharedState>) -> Self {
        Self {
            link,
            arbiter,
            state,
            decoder: FrameDecoder::new(),
            buf: [0; READ_CHUNK],
            published: 0,
        }
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Snapshots published so far. Lower than
    /// [`frames_decoded`](FrameDecoder::frames_decoded) when several frames
    /// arrive in one read, since only the latest is published.
    pub fn published(&self) -> u32 {
        self.published
    }

    /// One bounded step: honour a pause request, else read once and publish.
    pub fn poll_once(&mut self) -> Result<PollOutcome, LinkError> {
        if self.arbiter.checkpoint(PARK_SLICE) {
            return Ok(PollOutcome::Paused);
        }

        let n = self.link.read(&mut self.buf, READ_TIMEOUT)?;
        if n == 0 {
            return Ok(PollOutcome::Idle);
        }

        let fed = self.decoder.feed(&self.buf[..n]);
        self.state
            .frames
            .store(self.decoder.frames_decoded(), Ordering::Relaxed);
        match fed {
            Ok(true) => {}
            Ok(false) => return Ok(PollOutcome::Buffered),
            // Already logged; keep going on what is buffered
            Err(_) => return Ok(PollOutcome::Buffered),
        }

        let runtime = self.state.runtime();
        let zones = self.state.zones();
        let snapshot = cycle_snapshot(self.decoder.report(), &runtime, &zones);
        self.state.publish(snapshot);
        self.published = self.published.wrapping_add(1);
        Ok(PollOutcome::Published)
    }

    /// Poll until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) {
        log::info!("Ingestion started");
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.poll_once() {
                log::warn!("Link read failed: {}", e);
                thread::sleep(ERROR_BACKOFF);
            }
        }
        log::info!(
            "Ingestion stopped after {} frames",
            self.decoder.frames_decoded()
        );
    }
}
