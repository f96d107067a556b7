//! ld2450 — ESP-IDF std firmware
//!
//! Thread-based bridge between an HLK-LD2450 radar on a UART and a host on the
//! console. Ingestion owns the radar link except while a sensor command runs;
//! reporting, host commands and status each get their own thread and talk to
//! the output thread over std::sync::mpsc channels.

use std::io::{Read, Write};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use ld2450::config::{RuntimeConfig, SensorSettings};
use ld2450::debounce::OccupancyDebouncer;
use ld2450::ingest::{IngestionLoop, SharedState};
use ld2450::link::{Link, LinkArbiter, LinkError};
use ld2450::protocol::{DeviceMessage, HostCommand, MsgBuffer, VERSION};
use ld2450::sensor::CommandChannel;
use ld2450::zone::ZoneTable;
use ld2450::board;
use ld2450::comm::{self, LineReader};

use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{self, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::esp_get_free_heap_size;

// The driver below is bound to UART1
const _: () = assert!(board::LD2450_UART_NUM == 1);

/// Debounce / state report cadence
const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Periodic status cadence
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Radar boot time before the first command
const SENSOR_BOOT_DELAY: Duration = Duration::from_millis(200);

/// Never set: the firmware runs until reset
static STOP: AtomicBool = AtomicBool::new(false);

/// Captured once in main for uptime.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

fn since_boot() -> Duration {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| boot.elapsed()))
        .unwrap_or_default()
}

fn uptime_secs() -> u32 {
    since_boot().as_secs() as u32
}

fn uptime_millis_u32() -> u32 {
    (since_boot().as_millis() & 0xFFFF_FFFF) as u32
}

// ── UART link ────────────────────────────────────────────────────────

/// Radar UART. Reads are bounded by the caller's timeout, so the lock is
/// never held for long.
struct UartLink {
    uart: Mutex<UartDriver<'static>>,
}

impl Link for UartLink {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        let uart = self.uart.lock().unwrap_or_else(PoisonError::into_inner);
        uart.read(buf, TickType::from(timeout).ticks())
            .map_err(|e| LinkError::Io(e.code()))
    }

    fn write(&self, bytes: &[u8]) -> Result<usize, LinkError> {
        let uart = self.uart.lock().unwrap_or_else(PoisonError::into_inner);
        uart.write(bytes).map_err(|e| LinkError::Io(e.code()))
    }

    fn discard_input(&self) {
        let uart = self.uart.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = uart.clear_rx() {
            log::warn!("UART rx flush failed: {}", e);
        }
    }
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    // Record boot time
    *BOOT_INSTANT.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

    log::info!("ld2450 v{} starting on {} (std)", VERSION, board::BOARD_NAME);

    // ── Radar UART ───────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let config = uart::config::Config::default()
        .baudrate(Hertz(board::LD2450_BAUD))
        .rx_fifo_size(board::LD2450_RX_BUFFER);
    // Safety: pin numbers come from the board constants and are not
    // claimed by any other driver in this firmware.
    let (tx, rx) = unsafe {
        (
            AnyIOPin::new(i32::from(board::LD2450_TX_GPIO)),
            AnyIOPin::new(i32::from(board::LD2450_RX_GPIO)),
        )
    };
    let uart = UartDriver::new(
        peripherals.uart1,
        tx,
        rx,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &config,
    )?;
    log::info!(
        "UART{} configured: baud={} tx={} rx={}",
        board::LD2450_UART_NUM,
        board::LD2450_BAUD,
        board::LD2450_TX_GPIO,
        board::LD2450_RX_GPIO
    );

    let link = Arc::new(UartLink {
        uart: Mutex::new(uart),
    });
    let arbiter = Arc::new(LinkArbiter::new());
    let state = Arc::new(SharedState::new(RuntimeConfig::new(), ZoneTable::new()));
    let sensor = Arc::new(CommandChannel::new(link.clone(), arbiter.clone()));

    // ── Channels ─────────────────────────────────────────────────────

    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);
    let (cmd_tx, cmd_rx) = mpsc::sync_channel::<HostCommand>(4);

    // ── Ingestion thread ─────────────────────────────────────────────

    {
        let mut ingest = IngestionLoop::new(link.clone(), arbiter.clone(), state.clone());
        thread::Builder::new()
            .name("ingest".into())
            .stack_size(6144)
            .spawn(move || ingest.run(&STOP))?;
        log::info!("Ingestion thread spawned");
    }

    // ── Output thread ────────────────────────────────────────────────

    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || output_thread(output_rx))?;
    log::info!("Output thread spawned");

    // ── Report thread ────────────────────────────────────────────────

    let report_state = state.clone();
    let report_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("report".into())
        .stack_size(4096)
        .spawn(move || report_thread(report_state, report_output_tx))?;
    log::info!("Report thread spawned");

    // ── Command thread ───────────────────────────────────────────────

    let cmd_state = state.clone();
    let cmd_sensor = sensor.clone();
    let cmd_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("command".into())
        .stack_size(6144)
        .spawn(move || command_thread(cmd_rx, cmd_state, cmd_sensor, cmd_output_tx))?;
    log::info!("Command thread spawned");

    // ── Status thread ────────────────────────────────────────────────

    let status_state = state.clone();
    let status_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("status".into())
        .stack_size(4096)
        .spawn(move || loop {
            thread::sleep(STATUS_INTERVAL);
            send_status(&status_state, &status_output_tx);
        })?;
    log::info!("Status thread spawned");

    // ── Radar settings ───────────────────────────────────────────────

    thread::sleep(SENSOR_BOOT_DELAY);
    let settings = SensorSettings::new();
    match sensor.apply_settings(&settings) {
        Ok(()) => log::info!(
            "Sensor settings applied: {}mm, {}°/{}°, bluetooth {}",
            settings.max_distance_mm,
            settings.angle_left_deg,
            settings.angle_right_deg,
            if settings.bluetooth_disabled { "off" } else { "on" }
        ),
        Err(e) => log::warn!("Sensor settings not fully applied: {}", e),
    }

    // ── Console reader (main thread) ─────────────────────────────────

    console_main(cmd_tx, output_tx)
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>) {
    log::info!("Output thread started");

    let mut stdout = std::io::stdout();
    while let Ok(msg) = output_rx.recv() {
        if stdout.write_all(&msg).and_then(|_| stdout.flush()).is_err() {
            log::warn!("Console write failed");
        }
    }
}

fn send(output_tx: &SyncSender<MsgBuffer>, msg: &DeviceMessage) {
    if let Some(buf) = comm::encode_message(msg) {
        let _ = output_tx.try_send(buf);
    }
}

// ── Report thread ────────────────────────────────────────────────────

fn report_thread(state: Arc<SharedState>, output_tx: SyncSender<MsgBuffer>) {
    log::info!("Report thread started");

    let mut debouncer = OccupancyDebouncer::new(state.timing());
    let mut last = state.snapshot();

    loop {
        thread::sleep(REPORT_INTERVAL);

        let now_ms = since_boot().as_millis() as u64;
        let ts = uptime_millis_u32();
        let snapshot = state.snapshot();

        debouncer.set_timings(state.timing());
        for event in debouncer.tick_snapshot(&snapshot, now_ms) {
            send(
                &output_tx,
                &DeviceMessage::Occupancy {
                    channel: event.channel.name(),
                    occupied: event.occupied,
                    ts,
                },
            );
        }

        if snapshot != last {
            let publish_coords = state.runtime().publish_coords;
            send(&output_tx, &comm::state_message(&snapshot, publish_coords, ts));
            last = snapshot;
        }
    }
}

// ── Status ───────────────────────────────────────────────────────────

fn send_status(state: &SharedState, output_tx: &SyncSender<MsgBuffer>) {
    let runtime = state.runtime();
    let heap_free = unsafe { esp_get_free_heap_size() };
    let msg = DeviceMessage::Status {
        enabled: runtime.enabled,
        mode: runtime.mode.as_str(),
        publish_coords: runtime.publish_coords,
        uptime: uptime_secs(),
        frames: state.frames(),
        heap_free,
        board: board::BOARD_NAME,
        version: VERSION,
    };
    send(output_tx, &msg);
}

// ── Command thread ───────────────────────────────────────────────────

fn command_thread(
    cmd_rx: mpsc::Receiver<HostCommand>,
    state: Arc<SharedState>,
    sensor: Arc<CommandChannel<UartLink>>,
    output_tx: SyncSender<MsgBuffer>,
) {
    while let Ok(cmd) = cmd_rx.recv() {
        let outcome = match cmd {
            HostCommand::GetState => {
                let snapshot = state.snapshot();
                let publish_coords = state.runtime().publish_coords;
                send(
                    &output_tx,
                    &comm::state_message(&snapshot, publish_coords, uptime_millis_u32()),
                );
                continue;
            }
            HostCommand::GetStatus => {
                send_status(&state, &output_tx);
                continue;
            }
            // Blocks on the radar link for the whole enter/command/exit sequence
            _ if cmd.is_sensor_command() => sensor
                .execute(&cmd)
                .map(|r| r.map_err(|e| comm::error_detail(&e))),
            _ => state
                .apply(&cmd)
                .map(|r| r.map_err(|e| comm::error_detail(&e))),
        };

        let Some(result) = outcome else {
            continue;
        };
        let error = result.as_ref().err().map(|e| e.as_str());
        send(
            &output_tx,
            &DeviceMessage::Result {
                cmd: cmd.name(),
                ok: error.is_none(),
                error,
            },
        );
    }
}

// ── Console reader ───────────────────────────────────────────────────

fn console_main(
    cmd_tx: SyncSender<HostCommand>,
    output_tx: SyncSender<MsgBuffer>,
) -> anyhow::Result<()> {
    log::info!("Console reader started");

    let mut stdin = std::io::stdin();
    let mut reader = LineReader::new();
    let mut byte = [0u8; 1];

    loop {
        match stdin.read(&mut byte) {
            Ok(1) => {
                if let Some(line) = reader.feed(byte[0]) {
                    match comm::parse_command(line) {
                        Ok(cmd) => {
                            if cmd_tx.try_send(cmd).is_err() {
                                log::warn!("Command queue full, dropped {}", cmd.name());
                            }
                        }
                        Err(e) => {
                            log::warn!("Bad host command: {}", e);
                            let detail = comm::error_detail(&e);
                            send(
                                &output_tx,
                                &DeviceMessage::Result {
                                    cmd: "unknown",
                                    ok: false,
                                    error: Some(detail.as_str()),
                                },
                            );
                        }
                    }
                }
            }
            // Console stdin is non-blocking on ESP-IDF
            _ => thread::sleep(Duration::from_millis(20)),
        }
    }
}
