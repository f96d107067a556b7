/// Host communication — NDJSON encoding, command parsing and line framing.
///
/// The device streams state and occupancy messages as newline-delimited JSON
/// and accepts commands in the same format. Transport (console UART, USB
/// serial) is left to the binary.
use core::fmt::Write;

use crate::config::TrackingMode;
use crate::debounce::ReportChannel;
use crate::protocol::{DeviceMessage, ErrorDetail, HostCommand, MsgBuffer, RawCommand, MAX_MSG_LEN};
use crate::state::StateSnapshot;
use crate::zone::{Point, Zone, ZONE_COUNT};

/// Why a host line could not be turned into a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("malformed JSON")]
    Malformed,
    #[error("unknown command")]
    UnknownCommand,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{0}`")]
    InvalidValue(&'static str),
}

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// Serialize into an owned, newline-terminated buffer.
pub fn encode_message(msg: &DeviceMessage) -> Option<MsgBuffer> {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok()?;
    let len = serialize_message(msg, &mut buf)?;
    buf.truncate(len);
    Some(buf)
}

/// State message for a snapshot. Coordinates are only included when
/// `publish_coords` is set.
pub fn state_message(snapshot: &StateSnapshot, publish_coords: bool, ts: u32) -> DeviceMessage<'_> {
    DeviceMessage::State {
        occupied: snapshot.occupied_global,
        count: snapshot.target_count_effective,
        raw_count: snapshot.target_count_raw,
        zones: snapshot.zone_bitmap,
        targets: publish_coords.then_some(&snapshot.targets),
        selected: (publish_coords && snapshot.selected.present).then_some(&snapshot.selected),
        ts,
    }
}

/// Render an error for a result message, truncated to fit.
pub fn error_detail(err: &dyn core::fmt::Display) -> ErrorDetail {
    let mut s = ErrorDetail::new();
    let mut w = Truncating(&mut s);
    let _ = write!(w, "{}", err);
    s
}

struct Truncating<'a>(&'a mut ErrorDetail);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

// ── Command parsing ────────────────────────────────────────────────────

/// Deserialize a HostCommand from a JSON byte slice.
pub fn parse_command(data: &[u8]) -> Result<HostCommand, ProtocolError> {
    // Strip trailing newline/whitespace
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(trimmed)
        .map_err(|_| ProtocolError::Malformed)?;

    let cmd = match raw.cmd.as_str() {
        "get_state" => HostCommand::GetState,
        "get_status" => HostCommand::GetStatus,
        "set_enabled" => HostCommand::SetEnabled {
            enabled: raw.enabled.ok_or(ProtocolError::MissingField("enabled"))?,
        },
        "set_publish_coords" => HostCommand::SetPublishCoords {
            enabled: raw.enabled.ok_or(ProtocolError::MissingField("enabled"))?,
        },
        "set_mode" => HostCommand::SetMode {
            mode: parse_mode(&raw)?,
        },
        "sensor_mode" => HostCommand::SensorMode {
            mode: parse_mode(&raw)?,
        },
        "set_zone" => parse_zone(&raw)?,
        "set_timing" => {
            let name = raw.channel.as_ref().ok_or(ProtocolError::MissingField("channel"))?;
            let channel =
                ReportChannel::parse(name).ok_or(ProtocolError::InvalidValue("channel"))?;
            if raw.delay_ms.is_none() && raw.cooldown_s.is_none() {
                return Err(ProtocolError::MissingField("delay_ms"));
            }
            HostCommand::SetTiming {
                channel,
                delay_ms: raw.delay_ms,
                cooldown_s: raw.cooldown_s,
            }
        }
        "bluetooth" => HostCommand::Bluetooth {
            enabled: raw.enabled.ok_or(ProtocolError::MissingField("enabled"))?,
        },
        "region" => HostCommand::Region {
            max_dist_mm: raw.max_dist_mm.ok_or(ProtocolError::MissingField("max_dist_mm"))?,
            angle_left: raw.angle_left.ok_or(ProtocolError::MissingField("angle_left"))?,
            angle_right: raw.angle_right.ok_or(ProtocolError::MissingField("angle_right"))?,
        },
        "clear_region" => HostCommand::ClearRegion,
        "restart" => HostCommand::Restart,
        "factory_reset" => HostCommand::FactoryReset,
        _ => return Err(ProtocolError::UnknownCommand),
    };
    Ok(cmd)
}

fn parse_mode(raw: &RawCommand) -> Result<TrackingMode, ProtocolError> {
    let mode = raw.mode.as_ref().ok_or(ProtocolError::MissingField("mode"))?;
    TrackingMode::parse(mode).ok_or(ProtocolError::InvalidValue("mode"))
}

fn parse_zone(raw: &RawCommand) -> Result<HostCommand, ProtocolError> {
    let number = raw.zone.ok_or(ProtocolError::MissingField("zone"))? as usize;
    if !(1..=ZONE_COUNT).contains(&number) {
        return Err(ProtocolError::InvalidValue("zone"));
    }
    let enabled = raw.enabled.unwrap_or(true);

    let zone = match (&raw.points, enabled) {
        (Some(p), _) if p.len() == 8 => Zone {
            enabled,
            vertices: [
                Point::new(p[0], p[1]),
                Point::new(p[2], p[3]),
                Point::new(p[4], p[5]),
                Point::new(p[6], p[7]),
            ],
        },
        (Some(_), _) => return Err(ProtocolError::InvalidValue("points")),
        (None, false) => Zone::disabled(),
        (None, true) => return Err(ProtocolError::MissingField("points")),
    };

    Ok(HostCommand::SetZone {
        index: number - 1,
        zone,
    })
}

// ── Serial NDJSON reader ───────────────────────────────────────────────

/// Serial NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected. An overlong line is dropped whole.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let complete = self.pos > 0 && !self.overflowed;
            let len = self.pos;
            self.pos = 0;
            self.overflowed = false;
            if complete {
                Some(&self.buf[..len])
            } else {
                None
            }
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow: discard until the next line break
            log::warn!("Host line exceeds {} bytes, dropped", MAX_MSG_LEN);
            self.pos = 0;
            self.overflowed = true;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_whitespace(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b' ' | b'\n' | b'\r' | b'\t') {
        end -= 1;
    }
    &data[..end]
}
