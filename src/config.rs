/// Runtime, sensor and reporting configuration.
///
/// Owned by the configuration collaborator and pushed into the core through
/// setters. Nothing here is persisted.
use serde::{Deserialize, Serialize};

use crate::zone::ZONE_COUNT;

/// Number of debounced reporting channels: main + one per zone
pub const CHANNEL_COUNT: usize = 1 + ZONE_COUNT;

/// Radar range limit in millimetres
pub const MAX_DISTANCE_MM: u16 = 6000;

/// Field-of-view half-angle limit in degrees
pub const MAX_ANGLE_DEG: u8 = 90;

/// Upper bound for exit cooldowns
pub const MAX_COOLDOWN_S: u16 = 300;

/// Which targets drive zone evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Every present target counts
    #[default]
    Multi,
    /// Only the selected (closest) target counts
    Single,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Multi => "multi",
            TrackingMode::Single => "single",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "multi" => Some(TrackingMode::Multi),
            "single" => Some(TrackingMode::Single),
            _ => None,
        }
    }
}

/// Software behaviour read by the ingestion loop every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// When false, frames are still consumed but the snapshot stays clear
    pub enabled: bool,
    pub mode: TrackingMode,
    /// Whether target coordinates are published downstream
    pub publish_coords: bool,
}

impl RuntimeConfig {
    pub const fn new() -> Self {
        Self {
            enabled: true,
            mode: TrackingMode::Multi,
            publish_coords: false,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Radar-side settings applied through sensor commands at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSettings {
    pub max_distance_mm: u16,
    pub angle_left_deg: u8,
    pub angle_right_deg: u8,
    pub bluetooth_disabled: bool,
}

impl SensorSettings {
    pub const fn new() -> Self {
        Self {
            max_distance_mm: MAX_DISTANCE_MM,
            angle_left_deg: 60,
            angle_right_deg: 60,
            bluetooth_disabled: true,
        }
    }
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry delay and exit cooldown for one reporting channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTiming {
    /// Raw occupancy must hold this long before "occupied" is reported
    pub delay_ms: u16,
    /// Raw clear must hold this long before "clear" is reported
    pub cooldown_s: u16,
}

impl ChannelTiming {
    pub const fn new(delay_ms: u16, cooldown_s: u16) -> Self {
        Self {
            delay_ms,
            cooldown_s,
        }
    }

    pub fn delay_ms_u64(&self) -> u64 {
        u64::from(self.delay_ms)
    }

    pub fn cooldown_ms_u64(&self) -> u64 {
        u64::from(self.cooldown_s) * 1000
    }

    /// Clamp the cooldown into its supported range.
    pub fn clamped(self) -> Self {
        Self {
            delay_ms: self.delay_ms,
            cooldown_s: self.cooldown_s.min(MAX_COOLDOWN_S),
        }
    }
}

/// Per-channel debounce timing. Index 0 is the main channel, 1..=5 the zones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyTiming {
    pub channels: [ChannelTiming; CHANNEL_COUNT],
}

impl OccupancyTiming {
    pub const fn new() -> Self {
        Self {
            channels: [ChannelTiming::new(0, 0); CHANNEL_COUNT],
        }
    }

    /// Same timing on every channel.
    pub const fn uniform(timing: ChannelTiming) -> Self {
        Self {
            channels: [timing; CHANNEL_COUNT],
        }
    }
}
