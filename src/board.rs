/// Hardware abstraction for supported boards.
///
/// Each board module defines the LD2450 UART wiring selected at compile
/// time via feature flags.

/// LD2450 baud rate. Fixed by the radar, not configurable.
pub const LD2450_BAUD: u32 = 256_000;

/// UART driver receive buffer size in bytes.
pub const LD2450_RX_BUFFER: usize = 2048;

#[cfg(feature = "board-h2")]
mod hw {
    pub const LD2450_UART_NUM: u8 = 1; // UART0 is the console
    pub const LD2450_TX_GPIO: u8 = 12; // ESP32 TX -> sensor RX
    pub const LD2450_RX_GPIO: u8 = 22; // ESP32 RX <- sensor TX
    pub const BOARD_NAME: &str = "esp32h2_zigbee";
}

#[cfg(all(feature = "board-devkit", not(feature = "board-h2")))]
mod hw {
    pub const LD2450_UART_NUM: u8 = 1;
    pub const LD2450_TX_GPIO: u8 = 17;
    pub const LD2450_RX_GPIO: u8 = 18;
    pub const BOARD_NAME: &str = "esp32h2_devkit";
}

#[cfg(not(any(feature = "board-h2", feature = "board-devkit")))]
mod hw {
    pub const LD2450_UART_NUM: u8 = 1;
    pub const LD2450_TX_GPIO: u8 = 12;
    pub const LD2450_RX_GPIO: u8 = 22;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
