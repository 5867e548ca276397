//! Serial port transport using the `serialport` crate.

use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use log::trace;
use serialport::ClearBuffer;

use crate::error::{Error, Result};
use crate::port::Port;

/// Per-read deadline on the serial line.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Settle time between opening the port and flushing stale input.
///
/// USB CDC adapters on Linux hold received bytes in the driver for a short
/// while after open; flushing immediately leaves them behind to corrupt the
/// first exchange.
const OPEN_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Serial transport at 8-N-1.
///
/// Created unopened; [`Port::open`] claims the device. All reads carry a
/// one second deadline.
pub struct NativePort {
    name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl NativePort {
    /// Create an unopened serial transport for the named port.
    pub fn new(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            port: None,
        }
    }

    /// List the names of all serial ports on this host.
    pub fn list_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }
}

impl Port for NativePort {
    fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.name, self.baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        // Let in-flight bytes reach the driver before discarding them.
        thread::sleep(OPEN_SETTLE_DELAY);
        port.clear(ClearBuffer::Input)?;

        trace!("opened {} at {} baud", self.name, self.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the handle closes the device.
        self.port.take();
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let port = self.port_mut()?;
        let mut filled = 0;
        while filled < buf.len() {
            match port.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::Timeout(format!(
                        "port closed after {filled} of {} bytes",
                        buf.len()
                    )));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(Error::Timeout(format!(
                        "read {filled} of {} bytes",
                        buf.len()
                    )));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_ports_does_not_panic() {
        let _ = NativePort::list_ports();
    }

    #[test]
    fn unopened_port_rejects_io() {
        let mut port = NativePort::new("/dev/null", 115200);
        assert!(matches!(
            port.write_all(&[0x55]),
            Err(Error::NotConnected)
        ));

        let mut buf = [0u8; 1];
        assert!(matches!(
            port.read_exact(&mut buf),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut port = NativePort::new("COM3", 9600);
        port.close();
        port.close();
        assert_eq!(port.name(), "COM3");
        assert_eq!(port.baud_rate(), 9600);
    }
}
