/// Streaming decoder for LD2450 telemetry ("update") frames.
///
/// The radar emits a fixed 30-byte frame roughly every 100 ms:
///
/// ```text
/// AA FF 03 00 | 3 × [x:2][y:2][speed:2][resolution:2] | 55 CC
/// ```
///
/// Bytes may arrive in any chunking, interleaved with command ACKs or line
/// noise. The decoder buffers input, scans for the frame marker, and silently
/// resynchronizes past anything that does not end with the terminator.
use alloc::vec::Vec;

use serde::Serialize;

/// Telemetry frame marker
pub const FRAME_MARKER: [u8; 4] = [0xAA, 0xFF, 0x03, 0x00];

/// Telemetry frame terminator
pub const FRAME_TERMINATOR: [u8; 2] = [0x55, 0xCC];

/// Payload length: three 8-byte target slots
pub const PAYLOAD_LEN: usize = 24;

/// Total frame length: marker + payload + terminator
pub const FRAME_LEN: usize = FRAME_MARKER.len() + PAYLOAD_LEN + FRAME_TERMINATOR.len();

/// Maximum number of targets the radar reports per frame
pub const MAX_TARGETS: usize = 3;

/// Initial buffer capacity
const INITIAL_CAPACITY: usize = 1024;

/// Buffered bytes beyond this with no marker in sight are treated as noise
const MAX_BUFFERED: usize = 8192;

/// Tail kept after a noise trim, so a marker split across reads survives
const NOISE_TAIL: usize = 64;

/// One tracked target. Absent targets carry zeroed fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Target {
    pub x_mm: i16,
    pub y_mm: i16,
    /// Raw speed value, sign convention as reported by the radar
    pub speed: i16,
    pub present: bool,
}

/// Targets decoded from the most recent frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub targets: [Target; MAX_TARGETS],
    /// Number of present targets
    pub target_count: u8,
    pub occupied: bool,
}

impl Report {
    /// Iterate over present targets only.
    pub fn present(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.present)
    }
}

/// Buffer growth failed; the decoder keeps what it already had.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to reserve {requested} bytes for the frame buffer")]
    OutOfMemory { requested: usize },
}

/// Stateful stream parser. Feed it whatever the UART returns.
pub struct FrameDecoder {
    buf: Vec<u8>,
    report: Report,
    frames: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(INITIAL_CAPACITY),
            report: Report::default(),
            frames: 0,
        }
    }

    /// Most recently decoded report. All-zero until the first frame.
    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Total frames decoded since creation.
    pub fn frames_decoded(&self) -> u32 {
        self.frames
    }

    /// Number of bytes currently held waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append `data` and decode every complete frame now in the buffer.
    ///
    /// Returns `Ok(true)` if at least one frame was decoded during this call.
    /// When several frames arrive in one chunk only the last one is kept in
    /// [`report`](Self::report).
    pub fn feed(&mut self, data: &[u8]) -> Result<bool, DecodeError> {
        if data.is_empty() {
            return Ok(false);
        }

        if self.buf.try_reserve(data.len()).is_err() {
            log::warn!(
                "Frame buffer growth failed ({} buffered + {} new)",
                self.buf.len(),
                data.len()
            );
            return Err(DecodeError::OutOfMemory {
                requested: self.buf.len() + data.len(),
            });
        }
        self.buf.extend_from_slice(data);

        if self.buf.len() > MAX_BUFFERED && find_marker(&self.buf).is_none() {
            let drop = self.buf.len() - NOISE_TAIL;
            log::debug!("Discarding {} bytes of unframed input", drop);
            self.buf.drain(..drop);
        }

        let mut parsed_any = false;

        loop {
            let Some(pos) = find_marker(&self.buf) else {
                // A marker may straddle the next read
                let keep = FRAME_MARKER.len() - 1;
                if self.buf.len() > keep {
                    let drop = self.buf.len() - keep;
                    self.buf.drain(..drop);
                }
                break;
            };

            if pos > 0 {
                self.buf.drain(..pos);
            }

            if self.buf.len() < FRAME_LEN {
                break;
            }

            let end = FRAME_MARKER.len() + PAYLOAD_LEN;
            if self.buf[end..end + FRAME_TERMINATOR.len()] != FRAME_TERMINATOR {
                // Misaligned or corrupt: step past this marker and rescan
                self.buf.drain(..1);
                continue;
            }

            let mut payload = [0u8; PAYLOAD_LEN];
            payload.copy_from_slice(&self.buf[FRAME_MARKER.len()..end]);
            self.report = decode_payload(&payload);
            self.frames = self.frames.wrapping_add(1);
            parsed_any = true;

            self.buf.drain(..FRAME_LEN);
        }

        Ok(parsed_any)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_MARKER.len())
        .position(|w| w == FRAME_MARKER)
}

/// Decode the three target slots of a frame payload.
///
/// Presence is keyed off the raw y word being non-zero, before any sign
/// handling is applied.
pub fn decode_payload(payload: &[u8; PAYLOAD_LEN]) -> Report {
    let mut report = Report::default();

    for (slot, target) in payload.chunks_exact(8).zip(report.targets.iter_mut()) {
        // [6..8] is the distance resolution, unused
        let y_raw = u16::from_le_bytes([slot[2], slot[3]]);
        if y_raw == 0 {
            continue;
        }

        *target = Target {
            x_mm: decode_signed(slot[0], slot[1]),
            y_mm: decode_y(y_raw),
            speed: decode_signed(slot[4], slot[5]),
            present: true,
        };
        report.target_count += 1;
    }

    report.occupied = report.target_count > 0;
    report
}

/// x and speed: with the high bit set the word is folded through `-v + 0x8000`
/// (as i16), otherwise it is taken as-is. Bit-exact with the radar firmware.
fn decode_signed(lo: u8, hi: u8) -> i16 {
    let raw = u16::from_le_bytes([lo, hi]);
    if hi & 0x80 != 0 {
        (0x8000_i32 - i32::from(raw as i16)) as i16
    } else {
        raw as i16
    }
}

/// y: offset by 0x8000 whenever non-zero.
fn decode_y(raw: u16) -> i16 {
    if raw != 0 {
        raw.wrapping_sub(0x8000) as i16
    } else {
        0
    }
}

/// Build a telemetry frame with targets at the given (x, y) positions.
#[cfg(test)]
pub(crate) fn telemetry_frame(targets: &[(i16, i16)]) -> [u8; FRAME_LEN] {
    let mut f = [0u8; FRAME_LEN];
    f[..4].copy_from_slice(&FRAME_MARKER);
    for (i, &(x, y)) in targets.iter().take(MAX_TARGETS).enumerate() {
        let o = FRAME_MARKER.len() + i * 8;
        let x_raw = if x >= 0 { x as u16 } else { 0x8000 | x.unsigned_abs() };
        let y_raw = (y as u16).wrapping_add(0x8000);
        f[o..o + 2].copy_from_slice(&x_raw.to_le_bytes());
        f[o + 2..o + 4].copy_from_slice(&y_raw.to_le_bytes());
    }
    f[FRAME_LEN - 2..].copy_from_slice(&FRAME_TERMINATOR);
    f
}
