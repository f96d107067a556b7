/// Radar configuration commands over the shared link.
///
/// Every operation runs as one serialized sequence:
///
/// ```text
/// pause ingestion → enable-config → settle → command → settle → disable-config → resume
/// ```
///
/// If the command itself fails, configuration mode is still exited before the
/// error is returned. A failed exit after a successful command is only logged.
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{
    region_for_limits, Ack, AckError, AckScanner, FrameTooLarge, RegionFilter, RegionKind,
    SensorCommand,
};
use crate::config::{SensorSettings, TrackingMode};
use crate::link::{write_all, Link, LinkArbiter, LinkError};
use crate::protocol::HostCommand;

/// Read chunk while scanning for an ACK
const ACK_READ_CHUNK: usize = 64;

/// Waits used by a command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTiming {
    /// Deadline for each acknowledgement
    pub ack_timeout: Duration,
    /// Pause between configuration steps
    pub settle_delay: Duration,
    /// How long to wait for ingestion to park
    pub pause_wait: Duration,
}

impl CommandTiming {
    pub const fn new() -> Self {
        Self {
            ack_timeout: Duration::from_millis(200),
            settle_delay: Duration::from_millis(50),
            pause_wait: Duration::from_millis(200),
        }
    }
}

impl Default for CommandTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// A command sequence failed. Nothing is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("command {cmd_id:#04x}: {source}")]
    Link {
        cmd_id: u8,
        #[source]
        source: LinkError,
    },
    #[error("command {cmd_id:#04x}: {source}")]
    Ack {
        cmd_id: u8,
        #[source]
        source: AckError,
    },
    #[error(transparent)]
    FrameTooLarge(#[from] FrameTooLarge),
}

impl CommandError {
    pub fn cmd_id(&self) -> Option<u8> {
        match self {
            CommandError::Link { cmd_id, .. } | CommandError::Ack { cmd_id, .. } => Some(*cmd_id),
            CommandError::FrameTooLarge(_) => None,
        }
    }
}

/// Serialized command access to the radar.
pub struct CommandChannel<L: Link> {
    link: Arc<L>,
    arbiter: Arc<LinkArbiter>,
    lock: Mutex<()>,
    timing: CommandTiming,
}

impl<L: Link> CommandChannel<L> {
    pub fn new(link: Arc<L>, arbiter: Arc<LinkArbiter>) -> Self {
        Self::with_timing(link, arbiter, CommandTiming::new())
    }

    pub fn with_timing(link: Arc<L>, arbiter: Arc<LinkArbiter>, timing: CommandTiming) -> Self {
        Self {
            link,
            arbiter,
            lock: Mutex::new(()),
            timing,
        }
    }

    pub fn timing(&self) -> &CommandTiming {
        &self.timing
    }

    // ── Operations ──────────────────────────────────────────────────

    pub fn set_single_target(&self) -> Result<(), CommandError> {
        self.run(SensorCommand::SingleTarget)
    }

    pub fn set_multi_target(&self) -> Result<(), CommandError> {
        self.run(SensorCommand::MultiTarget)
    }

    pub fn set_tracking_mode(&self, mode: TrackingMode) -> Result<(), CommandError> {
        match mode {
            TrackingMode::Single => self.set_single_target(),
            TrackingMode::Multi => self.set_multi_target(),
        }
    }

    pub fn set_bluetooth(&self, enabled: bool) -> Result<(), CommandError> {
        self.run(SensorCommand::Bluetooth(enabled))
    }

    pub fn restart(&self) -> Result<(), CommandError> {
        self.run(SensorCommand::Restart)
    }

    pub fn factory_reset(&self) -> Result<(), CommandError> {
        self.run(SensorCommand::FactoryReset)
    }

    pub fn set_region(
        &self,
        kind: RegionKind,
        x1: i16,
        y1: i16,
        x2: i16,
        y2: i16,
    ) -> Result<(), CommandError> {
        self.run(SensorCommand::Region(RegionFilter::new(kind, x1, y1, x2, y2)))
    }

    pub fn clear_region(&self) -> Result<(), CommandError> {
        self.run(SensorCommand::Region(RegionFilter::cleared()))
    }

    /// Restrict detection to a range and two field-of-view half-angles.
    pub fn apply_distance_angle(
        &self,
        max_distance_mm: u16,
        angle_left_deg: u8,
        angle_right_deg: u8,
    ) -> Result<(), CommandError> {
        let filter = region_for_limits(max_distance_mm, angle_left_deg, angle_right_deg);
        self.run(SensorCommand::Region(filter))
    }

    /// Push radar-side settings. Both steps are attempted; the first error
    /// is returned.
    pub fn apply_settings(&self, settings: &SensorSettings) -> Result<(), CommandError> {
        let bluetooth = if settings.bluetooth_disabled {
            let r = self.set_bluetooth(false);
            thread::sleep(self.timing.settle_delay);
            r
        } else {
            Ok(())
        };
        let region = self.apply_distance_angle(
            settings.max_distance_mm,
            settings.angle_left_deg,
            settings.angle_right_deg,
        );
        bluetooth.and(region)
    }

    /// Run a host command that targets the radar. `None` if `cmd` does not.
    pub fn execute(&self, cmd: &HostCommand) -> Option<Result<(), CommandError>> {
        let result = match *cmd {
            HostCommand::SensorMode { mode } => self.set_tracking_mode(mode),
            HostCommand::Bluetooth { enabled } => self.set_bluetooth(enabled),
            HostCommand::Region {
                max_dist_mm,
                angle_left,
                angle_right,
            } => self.apply_distance_angle(max_dist_mm, angle_left, angle_right),
            HostCommand::ClearRegion => self.clear_region(),
            HostCommand::Restart => self.restart(),
            HostCommand::FactoryReset => self.factory_reset(),
            _ => return None,
        };
        Some(result)
    }

    /// Run one command wrapped in enter/exit configuration.
    pub fn run(&self, cmd: SensorCommand) -> Result<(), CommandError> {
        let _serial = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _pause = self.arbiter.pause(self.timing.pause_wait);

        let result = self.sequence(cmd);
        match &result {
            Ok(()) => log::info!("Sensor {}: ok", cmd.name()),
            Err(e) => log::warn!("Sensor {}: {}", cmd.name(), e),
        }
        result
    }

    fn sequence(&self, cmd: SensorCommand) -> Result<(), CommandError> {
        self.transact(SensorCommand::EnableConfig)?;
        thread::sleep(self.timing.settle_delay);

        if let Err(e) = self.transact(cmd) {
            let _ = self.transact(SensorCommand::DisableConfig);
            return Err(e);
        }
        thread::sleep(self.timing.settle_delay);

        if let Err(e) = self.transact(SensorCommand::DisableConfig) {
            log::warn!("Exit config after {} failed: {}", cmd.name(), e);
        }
        Ok(())
    }

    /// Send one frame and wait for its acknowledgement.
    fn transact(&self, cmd: SensorCommand) -> Result<Ack, CommandError> {
        let cmd_id = cmd.id();
        let frame = cmd.encode()?;

        self.link.discard_input();
        write_all(&*self.link, &frame).map_err(|source| CommandError::Link { cmd_id, source })?;

        let ack = self.await_ack(cmd_id)?;
        if cmd == SensorCommand::EnableConfig && ack.data.len() >= 2 {
            log::debug!(
                "Config mode entered, protocol {:#06x}",
                u16::from_le_bytes([ack.data[0], ack.data[1]])
            );
        }
        Ok(ack)
    }

    fn await_ack(&self, cmd_id: u8) -> Result<Ack, CommandError> {
        let deadline = Instant::now() + self.timing.ack_timeout;
        let mut scanner = AckScanner::new(cmd_id);
        let mut buf = [0u8; ACK_READ_CHUNK];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CommandError::Ack {
                    cmd_id,
                    source: AckError::Timeout,
                });
            }
            let n = self
                .link
                .read(&mut buf, remaining)
                .map_err(|source| CommandError::Link { cmd_id, source })?;
            if let (Some(verdict), _) = scanner.push_slice(&buf[..n]) {
                return verdict.map_err(|source| CommandError::Ack { cmd_id, source });
            }
        }
    }
}
