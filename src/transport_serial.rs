use std::{
    io::{Read, Write},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use crate::{error::ControlError, transport::BusTransport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    /// Per-call read/write timeout of the OS port.
    pub io_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 1_000_000,
            io_timeout: Duration::from_millis(20),
        }
    }
}

/// A real serial line. The port is closed when this value is dropped.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(cfg: &SerialConfig) -> Result<Self, ControlError> {
        let port = serialport::new(cfg.port.as_str(), cfg.baudrate)
            .timeout(cfg.io_timeout)
            .open()?;
        debug!(port = %cfg.port, baudrate = cfg.baudrate, "serial port opened");
        Ok(Self { port })
    }
}

impl BusTransport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ControlError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, ControlError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ControlError> {
        let n = self.bytes_available()?.min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        Ok(self.port.read(&mut buf[..n])?)
    }

    fn clear_input(&mut self) -> Result<(), ControlError> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
