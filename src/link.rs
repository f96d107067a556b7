/// Serial link abstraction and ingestion/command arbitration.
///
/// The radar exposes one UART for both its telemetry stream and its
/// configuration protocol. [`LinkArbiter`] hands the receive side from the
/// ingestion loop to a command sequence and back:
///
/// ```text
/// command side                      ingestion side
/// pause()  ── request ──────────▶   checkpoint() sees request
///          ◀───────────── parked ── parks (no reads)
/// ...exclusive reads/writes...
/// drop guard ── resume ─────────▶   unparks, reads again
/// ```
///
/// The handshake wait is bounded. If ingestion does not park in time the
/// command proceeds anyway; resuming is tied to the guard so every exit path
/// releases ingestion.
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Transport failures. Returned to the caller, never retried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link not configured")]
    NotConfigured,
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("link I/O error (code {0})")]
    Io(i32),
}

/// Byte transport to the radar.
pub trait Link: Send + Sync {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`. `Ok(0)` means
    /// nothing arrived in time.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError>;

    /// Write bytes, returning how many were accepted.
    fn write(&self, bytes: &[u8]) -> Result<usize, LinkError>;

    /// Drop any buffered receive data.
    fn discard_input(&self) {}
}

/// Write `bytes` in full or fail with [`LinkError::ShortWrite`].
pub fn write_all<L: Link + ?Sized>(link: &L, bytes: &[u8]) -> Result<(), LinkError> {
    let written = link.write(bytes)?;
    if written != bytes.len() {
        return Err(LinkError::ShortWrite {
            written,
            expected: bytes.len(),
        });
    }
    Ok(())
}

// ── Arbiter ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Handoff {
    /// Outstanding pause requests
    requests: u32,
    /// Ingestion is parked and not touching the link
    parked: bool,
}

/// Cooperative handoff of the receive side between ingestion and commands.
#[derive(Debug, Default)]
pub struct LinkArbiter {
    state: Mutex<Handoff>,
    changed: Condvar,
}

impl LinkArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Handoff> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask ingestion to park and wait up to `wait` for it to do so.
    /// Ingestion resumes when the returned guard is dropped.
    pub fn pause(&self, wait: Duration) -> PauseGuard<'_> {
        let mut st = self.lock();
        st.requests += 1;
        self.changed.notify_all();

        let (st, _) = self
            .changed
            .wait_timeout_while(st, wait, |s| !s.parked)
            .unwrap_or_else(PoisonError::into_inner);
        let acknowledged = st.parked;
        drop(st);

        if !acknowledged {
            log::warn!("ingestion did not park within {}ms, proceeding", wait.as_millis());
        }
        PauseGuard {
            arbiter: self,
            acknowledged,
        }
    }

    fn resume(&self) {
        let mut st = self.lock();
        st.requests = st.requests.saturating_sub(1);
        self.changed.notify_all();
    }

    pub fn pause_requested(&self) -> bool {
        self.lock().requests > 0
    }

    pub fn is_parked(&self) -> bool {
        self.lock().parked
    }

    /// Ingestion-side check between reads. If a pause is pending, signal the
    /// handshake and park until resumed or `max_park` elapses. Returns true if
    /// the caller parked and must re-check before touching the link.
    pub fn checkpoint(&self, max_park: Duration) -> bool {
        let mut st = self.lock();
        if st.requests == 0 {
            return false;
        }
        st.parked = true;
        self.changed.notify_all();

        let (mut st, _) = self
            .changed
            .wait_timeout_while(st, max_park, |s| s.requests > 0)
            .unwrap_or_else(PoisonError::into_inner);
        st.parked = false;
        true
    }
}

/// Held by a command sequence for the duration of its exclusive link use.
#[must_use = "ingestion resumes as soon as the guard is dropped"]
pub struct PauseGuard<'a> {
    arbiter: &'a LinkArbiter,
    acknowledged: bool,
}

impl PauseGuard<'_> {
    /// Whether ingestion confirmed it parked.
    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.arbiter.resume();
    }
}

// ── Test link ───────────────────────────────────────────────────────
