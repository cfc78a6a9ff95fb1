//! Component A: Serial Transport.

use crate::{LidarError, Result};
use std::io::{Read, Write};
use std::time::Duration;
use tokio_serial::SerialPort;
use tracing::info;

pub const CMD_START_SCAN: [u8; 2] = [0xA5, 0x20];
pub const CMD_STOP_SCAN: [u8; 2] = [0xA5, 0x25];
pub const CMD_GET_INFO: [u8; 2] = [0xA5, 0x25];
pub const CMD_GET_HEALTH: [u8; 2] = [0xA5, 0x26];
pub const CMD_RESET: [u8; 2] = [0xA5, 0x40];

/// A byte-oriented command/response link to the sensor. Move-only: no
/// implementation may be `Clone`. `read_bytes` returning `Ok(0)` means "no
/// data yet", not an error.
pub trait Transport: Send {
    fn send_command(&mut self, bytes: &[u8]) -> Result<()>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Real serial link, opened at 460 800 8N1 with a ~1s read timeout.
pub struct SerialTransport {
    port: tokio_serial::TTYPort,
}

impl SerialTransport {
    pub fn open(device_path: &str, baud_rate: u32) -> Result<Self> {
        info!(port = device_path, baud = baud_rate, "opening lidar serial transport");
        let mut port = tokio_serial::new(device_path, baud_rate)
            .timeout(Duration::from_millis(1_000))
            .open_native()?;
        let _ = port.clear(tokio_serial::ClearBuffer::All);
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send_command(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self.port.write(bytes)?;
        if written < bytes.len() {
            return Err(LidarError::TransportWriteShort {
                written,
                requested: bytes.len(),
            });
        }
        self.port.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

// `tokio_serial::TTYPort` owns its file descriptor and closes it in its own
// `Drop` impl; `SerialTransport` needs no explicit drop logic of its own.

/// Test-only transport that replays a canned byte sequence instead of
/// talking to hardware. Required per the design notes: production code must
/// never silently fabricate points when a device can't be opened, so tests
/// inject this explicitly rather than relying on a hidden fallback.
pub struct SimulatedTransport {
    script: std::collections::VecDeque<u8>,
    commands_sent: Vec<Vec<u8>>,
}

impl SimulatedTransport {
    pub fn new(bytes: impl IntoIterator<Item = u8>) -> Self {
        Self {
            script: bytes.into_iter().collect(),
            commands_sent: Vec::new(),
        }
    }

    pub fn commands_sent(&self) -> &[Vec<u8>] {
        &self.commands_sent
    }
}

impl Transport for SimulatedTransport {
    fn send_command(&mut self, bytes: &[u8]) -> Result<()> {
        self.commands_sent.push(bytes.to_vec());
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.script.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_transport_replays_bytes() {
        let mut t = SimulatedTransport::new([1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(t.read_bytes(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(t.read_bytes(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
    }

    #[test]
    fn simulated_transport_empty_read_is_not_an_error() {
        let mut t = SimulatedTransport::new([]);
        let mut buf = [0u8; 4];
        assert_eq!(t.read_bytes(&mut buf).unwrap(), 0);
    }

    #[test]
    fn simulated_transport_records_commands() {
        let mut t = SimulatedTransport::new([]);
        t.send_command(&CMD_START_SCAN).unwrap();
        assert_eq!(t.commands_sent(), &[CMD_START_SCAN.to_vec()]);
    }
}
