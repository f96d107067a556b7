//! ld2450 library — HLK-LD2450 mmWave radar presence core.
//!
//! Decodes the radar's telemetry stream, evaluates targets against polygonal
//! zones, debounces per-channel occupancy and drives the radar's
//! configuration protocol over the same serial link. Everything here is
//! testable on any host with `cargo test`; the ESP32 firmware in
//! `firmware-std/` is a thin consumer that supplies the UART and a console.
//!
//! The library is organized in two code layers:
//! - **Layer 1** (always built): `frame`, `zone`, `config`, `state`,
//!   `debounce`, `command`, `protocol`, `comm`, `board`. `no_std` + `alloc`.
//! - **Layer 2** (`std` feature, default): `link`, `sensor`, `ingest`:
//!   threads, mutexes and the monotonic clock, plus the trigonometric
//!   range/angle region derivation in `command`.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod board;
pub mod comm;
pub mod command;
pub mod config;
pub mod debounce;
pub mod frame;
pub mod protocol;
pub mod state;
pub mod zone;

#[cfg(feature = "std")]
pub mod ingest;
#[cfg(feature = "std")]
pub mod link;
#[cfg(feature = "std")]
pub mod sensor;
