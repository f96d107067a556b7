/// JSON message protocol between the radar bridge and a host.
///
/// All messages are newline-delimited JSON (NDJSON).
/// Uses `heapless` types so encoding works without an allocator.
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

use crate::config::TrackingMode;
use crate::debounce::ReportChannel;
use crate::frame::{Target, MAX_TARGETS};
use crate::zone::Zone;

/// Maximum length of an error detail in a result message
pub type ErrorDetail = String<64>;

/// Messages sent from the device to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// Current snapshot
    #[serde(rename = "state")]
    State {
        occupied: bool,
        /// Target count after the tracking mode is applied
        count: u8,
        /// Targets reported by the radar
        raw_count: u8,
        /// Bit i set iff zone i+1 is occupied
        zones: u8,
        /// Only present when coordinate publishing is on
        #[serde(skip_serializing_if = "Option::is_none")]
        targets: Option<&'a [Target; MAX_TARGETS]>,
        /// Only present when coordinate publishing is on
        #[serde(skip_serializing_if = "Option::is_none")]
        selected: Option<&'a Target>,
        /// Uptime in milliseconds
        ts: u32,
    },
    /// Debounced occupancy change on one channel
    #[serde(rename = "occupancy")]
    Occupancy {
        /// "main" or "zone1".."zone5"
        channel: &'static str,
        occupied: bool,
        ts: u32,
    },
    /// Outcome of a host command
    #[serde(rename = "result")]
    Result {
        cmd: &'a str,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'a str>,
    },
    /// Device status report
    #[serde(rename = "status")]
    Status {
        enabled: bool,
        mode: &'static str,
        publish_coords: bool,
        /// Uptime in seconds
        uptime: u32,
        /// Telemetry frames decoded since boot
        frames: u32,
        /// Free heap in bytes
        heap_free: u32,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
}

/// Commands sent from the host to the device.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostCommand {
    /// Request the current snapshot
    GetState,
    /// Request current status
    GetStatus,
    /// Turn snapshot publishing on or off
    SetEnabled { enabled: bool },
    /// Software tracking mode used for zone evaluation
    SetMode { mode: TrackingMode },
    SetPublishCoords { enabled: bool },
    /// Replace one zone; `index` is 0-based
    SetZone { index: usize, zone: Zone },
    /// Update debounce timing; missing values keep their current setting
    SetTiming {
        channel: ReportChannel,
        delay_ms: Option<u16>,
        cooldown_s: Option<u16>,
    },
    /// Radar-side single/multi target mode
    SensorMode { mode: TrackingMode },
    /// Radar Bluetooth on/off
    Bluetooth { enabled: bool },
    /// Radar range/angle region filter
    Region {
        max_dist_mm: u16,
        angle_left: u8,
        angle_right: u8,
    },
    ClearRegion,
    /// Restart the radar module
    Restart,
    /// Restore radar factory settings
    FactoryReset,
}

impl HostCommand {
    /// Wire name, echoed in result messages.
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::GetState => "get_state",
            HostCommand::GetStatus => "get_status",
            HostCommand::SetEnabled { .. } => "set_enabled",
            HostCommand::SetMode { .. } => "set_mode",
            HostCommand::SetPublishCoords { .. } => "set_publish_coords",
            HostCommand::SetZone { .. } => "set_zone",
            HostCommand::SetTiming { .. } => "set_timing",
            HostCommand::SensorMode { .. } => "sensor_mode",
            HostCommand::Bluetooth { .. } => "bluetooth",
            HostCommand::Region { .. } => "region",
            HostCommand::ClearRegion => "clear_region",
            HostCommand::Restart => "restart",
            HostCommand::FactoryReset => "factory_reset",
        }
    }

    /// Whether the command talks to the radar (and so blocks on the link).
    pub fn is_sensor_command(&self) -> bool {
        matches!(
            self,
            HostCommand::SensorMode { .. }
                | HostCommand::Bluetooth { .. }
                | HostCommand::Region { .. }
                | HostCommand::ClearRegion
                | HostCommand::Restart
                | HostCommand::FactoryReset
        )
    }
}

/// Wire format for host commands: a flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: String<24>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub mode: Option<String<8>>,
    /// Zone number, 1-based
    #[serde(default)]
    pub zone: Option<u8>,
    /// Four vertices flattened: x1, y1, .. x4, y4
    #[serde(default)]
    pub points: Option<Vec<i16, 8>>,
    #[serde(default)]
    pub channel: Option<String<8>>,
    #[serde(default)]
    pub delay_ms: Option<u16>,
    #[serde(default)]
    pub cooldown_s: Option<u16>,
    #[serde(default)]
    pub max_dist_mm: Option<u16>,
    #[serde(default)]
    pub angle_left: Option<u8>,
    #[serde(default)]
    pub angle_right: Option<u8>,
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;
