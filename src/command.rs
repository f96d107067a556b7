/// LD2450 configuration protocol: command frame encoding and ACK scanning.
///
/// Command and ACK frames share the `FD FC FB FA` marker and `04 03 02 01`
/// terminator. Telemetry keeps streaming while an ACK is awaited, so the
/// scanner has to pick the ACK out of interleaved `AA FF 03 00` frames one
/// byte at a time.
///
/// ```text
/// command: FD FC FB FA | len:u16le | cmd_id 00 | value.. | 04 03 02 01
/// ack:     FD FC FB FA | len:u16le | cmd_id 01 | status:u16le | data.. | 04 03 02 01
/// ```
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const CMD_MARKER: [u8; 4] = [0xFD, 0xFC, 0xFB, 0xFA];
pub const CMD_TERMINATOR: [u8; 4] = [0x04, 0x03, 0x02, 0x01];

pub const CMD_ENABLE_CONFIG: u8 = 0xFF;
pub const CMD_DISABLE_CONFIG: u8 = 0xFE;
pub const CMD_SINGLE_TARGET: u8 = 0x80;
pub const CMD_MULTI_TARGET: u8 = 0x90;
pub const CMD_FACTORY_RESET: u8 = 0xA2;
pub const CMD_RESTART: u8 = 0xA3;
pub const CMD_BLUETOOTH: u8 = 0xA4;
pub const CMD_SET_REGION: u8 = 0xC2;

/// Second byte of an ACK's command word
pub const ACK_FLAG: u8 = 0x01;

/// Largest encoded command frame
pub const MAX_COMMAND_FRAME: usize = 64;

/// Region filter value: zone type + three 8-byte rectangles
pub const REGION_PAYLOAD_LEN: usize = 26;

/// Smallest ACK body: command word + status
pub const MIN_ACK_BODY: usize = 4;

/// Largest ACK body accepted before the length is treated as corrupt
pub const MAX_ACK_BODY: usize = 32;

/// Trailing ACK bytes after the status word
pub const MAX_ACK_DATA: usize = MAX_ACK_BODY - MIN_ACK_BODY;

/// Sensor coordinate bound used when clamping region rectangles
pub const REGION_LIMIT_MM: i16 = 6000;

pub type CommandFrame = Vec<u8, MAX_COMMAND_FRAME>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("command value of {0} bytes does not fit a frame")]
pub struct FrameTooLarge(pub usize);

/// Why an acknowledgement was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AckError {
    #[error("no acknowledgement before the deadline")]
    Timeout,
    #[error("unexpected command word {got:#06x}, expected {expected:#04x} 01")]
    CommandMismatch { expected: u8, got: u16 },
    #[error("sensor reported failure status {0:#06x}")]
    Status(u16),
    #[error("acknowledgement terminator mismatch")]
    BadTerminator,
    #[error("implausible acknowledgement length {0}")]
    BadLength(u16),
}

// ── Frame encoding ──────────────────────────────────────────────────

/// Build a command frame around `value`.
pub fn encode_frame(cmd_id: u8, value: &[u8]) -> Result<CommandFrame, FrameTooLarge> {
    let total = CMD_MARKER.len() + 2 + 2 + value.len() + CMD_TERMINATOR.len();
    if total > MAX_COMMAND_FRAME {
        return Err(FrameTooLarge(value.len()));
    }
    // Fits: checked above
    let intra_len = (2 + value.len()) as u16;
    let mut frame = CommandFrame::new();
    let _ = frame.extend_from_slice(&CMD_MARKER);
    let _ = frame.extend_from_slice(&intra_len.to_le_bytes());
    let _ = frame.extend_from_slice(&[cmd_id, 0x00]);
    let _ = frame.extend_from_slice(value);
    let _ = frame.extend_from_slice(&CMD_TERMINATOR);
    Ok(frame)
}

// ── Region filter ───────────────────────────────────────────────────

/// How the radar treats its region rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    /// No filtering
    #[default]
    Disabled,
    /// Report only targets inside the rectangle
    Include,
    /// Report only targets outside the rectangle
    Exclude,
}

impl RegionKind {
    pub fn wire(&self) -> u16 {
        match self {
            RegionKind::Disabled => 0,
            RegionKind::Include => 1,
            RegionKind::Exclude => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disabled" | "off" => Some(RegionKind::Disabled),
            "include" => Some(RegionKind::Include),
            "exclude" => Some(RegionKind::Exclude),
            _ => None,
        }
    }
}

/// Single-rectangle region filter. Only the first of the radar's three
/// rectangles is ever populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFilter {
    pub kind: RegionKind,
    pub x1: i16,
    pub y1: i16,
    pub x2: i16,
    pub y2: i16,
}

impl RegionFilter {
    pub const fn new(kind: RegionKind, x1: i16, y1: i16, x2: i16, y2: i16) -> Self {
        Self { kind, x1, y1, x2, y2 }
    }

    /// Filter that disables region filtering.
    pub const fn cleared() -> Self {
        Self::new(RegionKind::Disabled, 0, 0, 0, 0)
    }

    pub fn payload(&self) -> [u8; REGION_PAYLOAD_LEN] {
        let mut p = [0u8; REGION_PAYLOAD_LEN];
        p[0..2].copy_from_slice(&self.kind.wire().to_le_bytes());
        p[2..4].copy_from_slice(&self.x1.to_le_bytes());
        p[4..6].copy_from_slice(&self.y1.to_le_bytes());
        p[6..8].copy_from_slice(&self.x2.to_le_bytes());
        p[8..10].copy_from_slice(&self.y2.to_le_bytes());
        p
    }
}

/// Derive the include rectangle for a range limit and two field-of-view
/// half-angles. Full range with both angles at 90° means "no filter", since
/// the unrestricted case has no rectangle form.
#[cfg(feature = "std")]
pub fn region_for_limits(max_distance_mm: u16, angle_left_deg: u8, angle_right_deg: u8) -> RegionFilter {
    use crate::config::{MAX_ANGLE_DEG, MAX_DISTANCE_MM};

    let dist = max_distance_mm.min(MAX_DISTANCE_MM);
    let left = angle_left_deg.min(MAX_ANGLE_DEG);
    let right = angle_right_deg.min(MAX_ANGLE_DEG);

    if dist >= MAX_DISTANCE_MM && left >= MAX_ANGLE_DEG && right >= MAX_ANGLE_DEG {
        return RegionFilter::cleared();
    }

    let limit = f64::from(REGION_LIMIT_MM);
    let reach = |deg: u8| f64::from(dist) * f64::from(deg).to_radians().tan();
    // tan(90°) is huge, clamp before the truncating cast
    let x_left = (-reach(left)).max(-limit) as i16;
    let x_right = reach(right).min(limit) as i16;

    RegionFilter::new(RegionKind::Include, x_left, 0, x_right, dist as i16)
}

// ── Commands ────────────────────────────────────────────────────────

/// One radar command, without the enter/exit configuration wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCommand {
    EnableConfig,
    DisableConfig,
    SingleTarget,
    MultiTarget,
    FactoryReset,
    Restart,
    Bluetooth(bool),
    Region(RegionFilter),
}

impl SensorCommand {
    pub fn id(&self) -> u8 {
        match self {
            SensorCommand::EnableConfig => CMD_ENABLE_CONFIG,
            SensorCommand::DisableConfig => CMD_DISABLE_CONFIG,
            SensorCommand::SingleTarget => CMD_SINGLE_TARGET,
            SensorCommand::MultiTarget => CMD_MULTI_TARGET,
            SensorCommand::FactoryReset => CMD_FACTORY_RESET,
            SensorCommand::Restart => CMD_RESTART,
            SensorCommand::Bluetooth(_) => CMD_BLUETOOTH,
            SensorCommand::Region(_) => CMD_SET_REGION,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorCommand::EnableConfig => "enable_config",
            SensorCommand::DisableConfig => "disable_config",
            SensorCommand::SingleTarget => "single_target",
            SensorCommand::MultiTarget => "multi_target",
            SensorCommand::FactoryReset => "factory_reset",
            SensorCommand::Restart => "restart",
            SensorCommand::Bluetooth(_) => "bluetooth",
            SensorCommand::Region(_) => "region",
        }
    }

    /// Encode as a complete frame.
    pub fn encode(&self) -> Result<CommandFrame, FrameTooLarge> {
        match self {
            SensorCommand::EnableConfig => encode_frame(self.id(), &[0x01, 0x00]),
            SensorCommand::Bluetooth(on) => encode_frame(self.id(), &[u8::from(*on), 0x00]),
            SensorCommand::Region(filter) => encode_frame(self.id(), &filter.payload()),
            _ => encode_frame(self.id(), &[]),
        }
    }
}

// ── ACK scanning ────────────────────────────────────────────────────

/// A validated acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub cmd_id: u8,
    /// Bytes after the status word (e.g. protocol version on enable-config)
    pub data: Vec<u8, MAX_ACK_DATA>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Marker { matched: usize },
    Length { low: Option<u8> },
    Body { len: usize },
    Terminator { matched: usize, ok: bool },
}

/// Byte-at-a-time ACK recogniser for one expected command id.
///
/// Bytes before the command marker are skipped, telemetry frames included.
/// Returns a verdict once a complete ACK frame has been collected.
#[derive(Debug, Clone)]
pub struct AckScanner {
    expected: u8,
    stage: Stage,
    body: Vec<u8, MAX_ACK_BODY>,
    skipped: usize,
}

impl AckScanner {
    pub fn new(expected: u8) -> Self {
        Self {
            expected,
            stage: Stage::Marker { matched: 0 },
            body: Vec::new(),
            skipped: 0,
        }
    }

    pub fn expected(&self) -> u8 {
        self.expected
    }

    /// Bytes discarded while hunting for the marker.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn reset(&mut self) {
        self.stage = Stage::Marker { matched: 0 };
        self.body.clear();
    }

    /// Feed one byte. `Some` once a full frame has been seen; the scanner is
    /// then reset and may be reused.
    pub fn push(&mut self, byte: u8) -> Option<Result<Ack, AckError>> {
        match self.stage {
            Stage::Marker { matched } => {
                let matched = if byte == CMD_MARKER[matched] {
                    matched + 1
                } else {
                    // Failed extension may still start a new marker
                    self.skipped += matched;
                    if byte == CMD_MARKER[0] {
                        1
                    } else {
                        self.skipped += 1;
                        0
                    }
                };
                self.stage = if matched == CMD_MARKER.len() {
                    Stage::Length { low: None }
                } else {
                    Stage::Marker { matched }
                };
                None
            }
            Stage::Length { low: None } => {
                self.stage = Stage::Length { low: Some(byte) };
                None
            }
            Stage::Length { low: Some(low) } => {
                let len = u16::from_le_bytes([low, byte]);
                let n = len as usize;
                if !(MIN_ACK_BODY..=MAX_ACK_BODY).contains(&n) {
                    self.reset();
                    return Some(Err(AckError::BadLength(len)));
                }
                self.body.clear();
                self.stage = Stage::Body { len: n };
                None
            }
            Stage::Body { len } => {
                let _ = self.body.push(byte);
                if self.body.len() == len {
                    self.stage = Stage::Terminator { matched: 0, ok: true };
                }
                None
            }
            Stage::Terminator { matched, ok } => {
                let ok = ok && byte == CMD_TERMINATOR[matched];
                let matched = matched + 1;
                if matched < CMD_TERMINATOR.len() {
                    self.stage = Stage::Terminator { matched, ok };
                    return None;
                }
                let verdict = if ok {
                    self.validate()
                } else {
                    Err(AckError::BadTerminator)
                };
                self.reset();
                Some(verdict)
            }
        }
    }

    fn validate(&self) -> Result<Ack, AckError> {
        let b = &self.body;
        if b[0] != self.expected || b[1] != ACK_FLAG {
            return Err(AckError::CommandMismatch {
                expected: self.expected,
                got: u16::from_le_bytes([b[0], b[1]]),
            });
        }
        let status = u16::from_le_bytes([b[2], b[3]]);
        if status != 0 {
            return Err(AckError::Status(status));
        }
        let mut data = Vec::new();
        let _ = data.extend_from_slice(&b[MIN_ACK_BODY..]);
        Ok(Ack {
            cmd_id: self.expected,
            data,
        })
    }

    /// Feed a chunk, stopping at the first verdict.
    /// Returns the verdict and the number of bytes consumed.
    pub fn push_slice(&mut self, bytes: &[u8]) -> (Option<Result<Ack, AckError>>, usize) {
        for (i, &byte) in bytes.iter().enumerate() {
            if let Some(verdict) = self.push(byte) {
                return (Some(verdict), i + 1);
            }
        }
        (None, bytes.len())
    }
}

/// Encode the ACK a sensor would send for `cmd_id`.
#[cfg(test)]
pub(crate) fn ack_frame(cmd_id: u8, status: u16, data: &[u8]) -> std::vec::Vec<u8> {
    let mut f = std::vec::Vec::new();
    f.extend_from_slice(&CMD_MARKER);
    f.extend_from_slice(&((MIN_ACK_BODY + data.len()) as u16).to_le_bytes());
    f.extend_from_slice(&[cmd_id, ACK_FLAG]);
    f.extend_from_slice(&status.to_le_bytes());
    f.extend_from_slice(data);
    f.extend_from_slice(&CMD_TERMINATOR);
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FRAME_MARKER, FRAME_TERMINATOR};

    fn telemetry() -> std::vec::Vec<u8> {
        let mut f = std::vec::Vec::new();
        f.extend_from_slice(&FRAME_MARKER);
        f.extend_from_slice(&[0u8; 24]);
        f.extend_from_slice(&FRAME_TERMINATOR);
        f
    }

    fn scan(expected: u8, bytes: &[u8]) -> Option<Result<Ack, AckError>> {
        AckScanner::new(expected).push_slice(bytes).0
    }

    // ── Encoding ────────────────────────────────────────────────────

    #[test]
    fn enable_config_frame_layout() {
        let f = SensorCommand::EnableConfig.encode().unwrap();
        assert_eq!(
            f.as_slice(),
            &[0xFD, 0xFC, 0xFB, 0xFA, 0x04, 0x00, 0xFF, 0x00, 0x01, 0x00, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn bare_command_frame_layout() {
        let f = SensorCommand::Restart.encode().unwrap();
        assert_eq!(
            f.as_slice(),
            &[0xFD, 0xFC, 0xFB, 0xFA, 0x02, 0x00, 0xA3, 0x00, 0x04, 0x03, 0x02, 0x01]
        );
        assert_eq!(SensorCommand::DisableConfig.encode().unwrap()[6], 0xFE);
    }

    #[test]
    fn bluetooth_value_bytes() {
        let on = SensorCommand::Bluetooth(true).encode().unwrap();
        let off = SensorCommand::Bluetooth(false).encode().unwrap();
        assert_eq!(&on[6..10], &[0xA4, 0x00, 0x01, 0x00]);
        assert_eq!(&off[6..10], &[0xA4, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn region_frame_carries_26_byte_payload() {
        let filter = RegionFilter::new(RegionKind::Include, -1500, 0, 2000, 4000);
        let f = SensorCommand::Region(filter).encode().unwrap();
        assert_eq!(f.len(), 4 + 2 + 2 + REGION_PAYLOAD_LEN + 4);
        assert_eq!(u16::from_le_bytes([f[4], f[5]]), 28);
        let p = &f[8..8 + REGION_PAYLOAD_LEN];
        assert_eq!(u16::from_le_bytes([p[0], p[1]]), 1);
        assert_eq!(i16::from_le_bytes([p[2], p[3]]), -1500);
        assert_eq!(i16::from_le_bytes([p[4], p[5]]), 0);
        assert_eq!(i16::from_le_bytes([p[6], p[7]]), 2000);
        assert_eq!(i16::from_le_bytes([p[8], p[9]]), 4000);
        assert!(p[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_value_rejected() {
        assert_eq!(encode_frame(0x01, &[0u8; 60]), Err(FrameTooLarge(60)));
    }

    // ── Region derivation ───────────────────────────────────────────

    #[cfg(feature = "std")]
    #[test]
    fn full_range_clears_filter() {
        assert_eq!(region_for_limits(6000, 90, 90), RegionFilter::cleared());
        assert_eq!(region_for_limits(9000, 120, 255), RegionFilter::cleared());
    }

    #[cfg(feature = "std")]
    #[test]
    fn forty_five_degrees_projects_to_range() {
        let r = region_for_limits(3000, 45, 45);
        assert_eq!(r.kind, RegionKind::Include);
        assert!((r.x1 + 3000).abs() <= 1, "x1 = {}", r.x1);
        assert!((r.x2 - 3000).abs() <= 1, "x2 = {}", r.x2);
        assert_eq!((r.y1, r.y2), (0, 3000));
    }

    #[cfg(feature = "std")]
    #[test]
    fn right_angle_side_clamps_to_sensor_limit() {
        let r = region_for_limits(4000, 0, 90);
        assert_eq!(r, RegionFilter::new(RegionKind::Include, 0, 0, 6000, 4000));
    }

    #[cfg(feature = "std")]
    #[test]
    fn default_sensor_settings_region() {
        // 6000 * tan(60°) ≈ 10392, beyond the sensor bound
        let r = region_for_limits(6000, 60, 60);
        assert_eq!(r, RegionFilter::new(RegionKind::Include, -6000, 0, 6000, 6000));
    }

    // ── ACK scanning ────────────────────────────────────────────────

    #[test]
    fn ack_after_interleaved_telemetry() {
        let mut stream = telemetry();
        stream.extend_from_slice(&telemetry()[..10]);
        assert_eq!(stream.len(), 40);
        stream.extend_from_slice(&ack_frame(CMD_SINGLE_TARGET, 0, &[]));

        let mut scanner = AckScanner::new(CMD_SINGLE_TARGET);
        let (verdict, used) = scanner.push_slice(&stream);
        let ack = verdict.unwrap().unwrap();
        assert_eq!(ack.cmd_id, CMD_SINGLE_TARGET);
        assert!(ack.data.is_empty());
        assert_eq!(used, stream.len());
        assert_eq!(scanner.skipped(), 40);
    }

    #[test]
    fn ack_data_is_returned() {
        let stream = ack_frame(CMD_ENABLE_CONFIG, 0, &[0x01, 0x00, 0x40, 0x00]);
        let ack = scan(CMD_ENABLE_CONFIG, &stream).unwrap().unwrap();
        assert_eq!(ack.data.as_slice(), &[0x01, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn partial_marker_restarts_on_first_byte() {
        // FD FC FD FC FB FA: the second FD must restart the match
        let mut stream = std::vec![0xFD, 0xFC];
        stream.extend_from_slice(&ack_frame(CMD_RESTART, 0, &[]));
        assert!(scan(CMD_RESTART, &stream).unwrap().is_ok());

        let mut stream = std::vec![0xFD, 0xFD, 0xFC, 0xFB];
        stream.extend_from_slice(&ack_frame(CMD_RESTART, 0, &[]));
        assert!(scan(CMD_RESTART, &stream).unwrap().is_ok());
    }

    #[test]
    fn incomplete_ack_yields_nothing() {
        let stream = ack_frame(CMD_RESTART, 0, &[]);
        assert_eq!(scan(CMD_RESTART, &stream[..stream.len() - 1]), None);
        assert_eq!(scan(CMD_RESTART, &telemetry()), None);
    }

    #[test]
    fn wrong_command_echo_is_mismatch() {
        let stream = ack_frame(CMD_MULTI_TARGET, 0, &[]);
        assert_eq!(
            scan(CMD_SINGLE_TARGET, &stream),
            Some(Err(AckError::CommandMismatch { expected: 0x80, got: 0x0190 }))
        );
    }

    #[test]
    fn missing_ack_flag_is_mismatch() {
        let mut stream = ack_frame(CMD_RESTART, 0, &[]);
        stream[7] = 0x00;
        assert!(matches!(
            scan(CMD_RESTART, &stream),
            Some(Err(AckError::CommandMismatch { .. }))
        ));
    }

    #[test]
    fn nonzero_status_is_failure() {
        let stream = ack_frame(CMD_BLUETOOTH, 1, &[]);
        assert_eq!(scan(CMD_BLUETOOTH, &stream), Some(Err(AckError::Status(1))));
    }

    #[test]
    fn corrupt_terminator_is_rejected() {
        let mut stream = ack_frame(CMD_RESTART, 0, &[]);
        let last = stream.len() - 1;
        stream[last] = 0xFF;
        assert_eq!(scan(CMD_RESTART, &stream), Some(Err(AckError::BadTerminator)));
    }

    #[test]
    fn implausible_length_is_rejected() {
        let mut stream = CMD_MARKER.to_vec();
        stream.extend_from_slice(&[0xFF, 0x00]);
        assert_eq!(scan(CMD_RESTART, &stream), Some(Err(AckError::BadLength(255))));
    }

    #[test]
    fn scanner_reusable_after_verdict() {
        let mut scanner = AckScanner::new(CMD_RESTART);
        let bad = ack_frame(CMD_RESTART, 2, &[]);
        let good = ack_frame(CMD_RESTART, 0, &[]);
        assert_eq!(scanner.push_slice(&bad).0, Some(Err(AckError::Status(2))));
        assert!(scanner.push_slice(&good).0.unwrap().is_ok());
    }
}
