//! pa_relay - Power Relay Driver
//!
//! Drives the amplifier chassis's power relay over a serial line. The relay
//! is wired to the DTR signal: asserting DTR energizes the relay (amplifier
//! powered on), clearing it de-energizes the relay (amplifier powered off).
//!
//! Only one process may hold the port at a time. An advisory exclusive lock
//! is taken on a side file handle to the same device path so a second
//! instance fails fast at construction instead of silently fighting the
//! first one over the DTR line.
//!
//! # Architecture
//!
//! ```text
//! AmplifierController ──close()/open()──▶ PowerRelay ──DTR──▶ chassis
//! ```

mod error;

pub use error::RelayError;

use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;

const BAUD_RATE: u32 = 9600;
const PORT_TIMEOUT: Duration = Duration::from_millis(200);

/// Serial-backed power relay for the amplifier's mains supply.
pub struct PowerRelay {
    path: PathBuf,
    port: Mutex<Box<dyn serialport::SerialPort>>,
    // Held for the lifetime of the relay; releases the advisory lock on drop.
    _lock_file: File,
    closed: Mutex<bool>,
}

impl PowerRelay {
    /// Open the relay on the given serial device path.
    ///
    /// Fails if the device does not exist, if another process already holds
    /// the advisory lock, or if the port cannot be configured for 9600 8N1.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref().to_path_buf();

        let lock_file = File::open(&path)
            .map_err(|_| RelayError::PortUnavailable(path.display().to_string()))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| RelayError::LockUnavailable(path.display().to_string()))?;

        let port = serialport::new(path.to_string_lossy(), BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| RelayError::ConfigureFailed(e.to_string()))?;

        let relay = Self {
            path,
            port: Mutex::new(port),
            _lock_file: lock_file,
            // The chassis always boots de-energized; match that state.
            closed: Mutex::new(false),
        };
        relay.set_dtr(false);
        Ok(relay)
    }

    /// Energize the relay: power on the amplifier chassis.
    pub fn close(&self) {
        self.set_dtr(true);
        *self.closed.lock() = true;
        tracing::info!(path = %self.path.display(), "power relay closed (amplifier energized)");
    }

    /// De-energize the relay: power off the amplifier chassis.
    pub fn open_relay(&self) {
        self.set_dtr(false);
        *self.closed.lock() = false;
        tracing::info!(path = %self.path.display(), "power relay opened (amplifier de-energized)");
    }

    /// Whether the relay was last commanded to close (amplifier energized).
    ///
    /// This reflects the last command issued, not a hardware readback.
    pub fn closed(&self) -> bool {
        *self.closed.lock()
    }

    /// The serial device path this relay was opened on.
    pub fn path(&self) -> String {
        self.path.display().to_string()
    }

    fn set_dtr(&self, asserted: bool) {
        let mut port = self.port.lock();
        if let Err(e) = port.write_data_terminal_ready(asserted) {
            tracing::warn!(error = %e, "failed to set DTR line; will retry on next command");
        }
    }
}

impl Drop for PowerRelay {
    fn drop(&mut self) {
        self.set_dtr(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires hardware"]
    fn test_open_and_close_relay() {
        let relay = PowerRelay::open("/dev/ttyUSB0").unwrap();
        assert!(!relay.closed());
        relay.close();
        assert!(relay.closed());
        relay.open_relay();
        assert!(!relay.closed());
    }

    #[test]
    #[ignore = "requires hardware"]
    fn test_second_open_fails_lock() {
        let _first = PowerRelay::open("/dev/ttyUSB0").unwrap();
        let second = PowerRelay::open("/dev/ttyUSB0");
        assert!(matches!(second, Err(RelayError::LockUnavailable(_))));
    }
}
