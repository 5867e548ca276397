//! Transport-blocking bootloader operations.
//!
//! [`Bootloader`] drives a [`Port`] through the half-duplex exchange: the
//! host writes one frame, the device echoes the frame header back, and only
//! then sends its reply. The echo is compared byte for byte against what was
//! sent, except at the two unlock positions, which the device masks out.
//!
//! No command is retried here. A failed write or erase leaves the device in
//! an unknown partial state, and only the caller can decide whether going
//! on is safe.

use byteorder::{ByteOrder, LittleEndian};
use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{result_code, Command, VersionInfo, HEADER_LEN, START_OF_FRAME};

/// Frame positions the echo comparison skips. The device substitutes its
/// own unlock bytes, so these two never match what was sent.
const ECHO_SKIP: [usize; 2] = [4, 5];

/// A bootloader session over a byte transport.
///
/// Stateless at the protocol level: every command is an independent
/// request/response pair. The only implicit state is the transport being
/// open.
pub struct Bootloader<P: Port> {
    port: P,
}

impl<P: Port> Bootloader<P> {
    /// Create a session over an unopened transport.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Open the transport.
    pub fn connect(&mut self) -> Result<()> {
        self.port.open()
    }

    /// Close the transport.
    pub fn disconnect(&mut self) {
        self.port.close();
    }

    /// Consume the session and return the transport.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Read the device's version block.
    pub fn get_version(&mut self) -> Result<VersionInfo> {
        let resp = self.exchange(Command::get_version())?;
        VersionInfo::parse(&resp)
    }

    /// Read `length` bytes of program flash starting at `address`.
    pub fn read_flash(&mut self, address: u32, length: u16) -> Result<Vec<u8>> {
        self.exchange(Command::read_flash(address, length))
    }

    /// Write `data` to program flash at `address`.
    pub fn write_flash(&mut self, address: u32, data: Vec<u8>) -> Result<()> {
        self.exchange(Command::write_flash(address, data))?;
        Ok(())
    }

    /// Erase `num_rows` erase rows of program flash starting at `address`.
    pub fn erase_flash(&mut self, address: u32, num_rows: u16) -> Result<()> {
        self.exchange(Command::erase_flash(address, num_rows))?;
        Ok(())
    }

    /// Read `length` bytes of EEPROM starting at `address`.
    pub fn read_ee(&mut self, address: u32, length: u16) -> Result<Vec<u8>> {
        self.exchange(Command::read_ee(address, length))
    }

    /// Write `data` to EEPROM at `address`.
    pub fn write_ee(&mut self, address: u32, data: Vec<u8>) -> Result<()> {
        self.exchange(Command::write_ee(address, data))?;
        Ok(())
    }

    /// Read `length` bytes of configuration memory starting at `address`.
    pub fn read_config(&mut self, address: u32, length: u16) -> Result<Vec<u8>> {
        self.exchange(Command::read_config(address, length))
    }

    /// Write `data` to configuration memory at `address`.
    pub fn write_config(&mut self, address: u32, data: Vec<u8>) -> Result<()> {
        self.exchange(Command::write_config(address, data))?;
        Ok(())
    }

    /// Ask the device to checksum `length` bytes of flash at `address`.
    ///
    /// The device sums 16-bit little-endian words; `length` must be even.
    pub fn calculate_checksum(&mut self, address: u32, length: u16) -> Result<u16> {
        let resp = self.exchange(Command::calculate_checksum(address, length))?;
        Ok(LittleEndian::read_u16(&resp))
    }

    /// Restart the device into its application.
    ///
    /// The device may drop off the bus before the echo completes; callers
    /// that treat reset as fire-and-forget should tolerate a timeout.
    pub fn reset(&mut self) -> Result<()> {
        self.exchange(Command::reset())?;
        Ok(())
    }

    /// Run one half-duplex exchange and return the response payload.
    fn exchange(&mut self, cmd: Command) -> Result<Vec<u8>> {
        let body = cmd.to_bytes();
        let mut tx = Vec::with_capacity(1 + body.len());
        tx.push(START_OF_FRAME);
        tx.extend_from_slice(&body);
        trace!("=> {tx:02X?}");
        self.port.write_all(&tx)?;

        // The echo covers the frame through the address field only.
        let mut echo = vec![0u8; 1 + HEADER_LEN];
        self.port.read_exact(&mut echo)?;
        trace!("<= {echo:02X?}");
        for (i, (&sent, &echoed)) in tx.iter().zip(echo.iter()).enumerate() {
            if sent != echoed && !ECHO_SKIP.contains(&i) {
                return Err(Error::EchoMismatch(i));
            }
        }

        if cmd.expects_success_code() {
            let mut code = [0u8; 1];
            self.port.read_exact(&mut code)?;
            if code[0] != result_code::SUCCESS {
                return Err(Error::CommandRejected { code: code[0] });
            }
        }

        let mut resp = vec![0u8; cmd.response_length()];
        if !resp.is_empty() {
            self.port.read_exact(&mut resp)?;
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Port double with scripted reads and captured writes.
    struct ScriptedPort {
        rx: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl ScriptedPort {
        fn new(replies: &[&[u8]]) -> Self {
            Self {
                rx: replies.iter().flat_map(|r| r.iter().copied()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl Port for ScriptedPort {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) {}

        fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
            let want = buf.len();
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = self
                    .rx
                    .pop_front()
                    .ok_or_else(|| Error::Timeout(format!("read {i} of {want} bytes")))?;
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn echo_tolerates_masked_unlock_bytes() {
        // Device masks the unlock bytes to zero in its echo.
        let echo = [0x55, 0x02, 0x02, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00];
        let mut bl = Bootloader::new(ScriptedPort::new(&[&echo, &[0x01]]));

        bl.write_flash(0x800, vec![0xDE, 0xAD]).unwrap();

        let port = bl.into_port();
        assert_eq!(
            port.written,
            [0x55, 0x02, 0x02, 0x00, 0x55, 0xAA, 0x00, 0x08, 0x00, 0x00, 0xDE, 0xAD]
        );
    }

    #[test]
    fn echo_mismatch_outside_unlock_window_fails() {
        let echo = [0x55, 0x07, 0x02, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00];
        let mut bl = Bootloader::new(ScriptedPort::new(&[&echo, &[0x01]]));

        let err = bl.write_flash(0x800, vec![0xDE, 0xAD]).unwrap_err();
        assert!(matches!(err, Error::EchoMismatch(1)));
    }

    #[test]
    fn rejected_command_surfaces_device_code() {
        let echo = [0x55, 0x03, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00];
        let mut bl = Bootloader::new(ScriptedPort::new(&[&echo, &[0xFE]]));

        let err = bl.erase_flash(0x800, 1).unwrap_err();
        assert!(matches!(err, Error::CommandRejected { code: 0xFE }));
    }

    #[test]
    fn get_version_decodes_the_version_block() {
        let echo = [0x55, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let block = [
            0x09, 0x01, 0x00, 0x01, 0x00, 0x00, 0xB0, 0x30, 0x00, 0x00, 0x40, 0x40, 0xAB, 0xCD,
            0xEF, 0x01,
        ];
        let mut bl = Bootloader::new(ScriptedPort::new(&[&echo, &block]));

        let info = bl.get_version().unwrap();
        assert_eq!(info.device_id, 0x30B0);
        assert_eq!(info.erase_row_size, 64);
        assert_eq!(info.write_row_size, 64);
    }

    #[test]
    fn read_flash_returns_the_requested_bytes() {
        let echo = [0x55, 0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00];
        let payload = [0x11, 0x22, 0x33, 0x44];
        let mut bl = Bootloader::new(ScriptedPort::new(&[&echo, &payload]));

        let data = bl.read_flash(0x1000, 4).unwrap();
        assert_eq!(data, payload);
    }

    #[test]
    fn checksum_response_is_little_endian() {
        let echo = [0x55, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00];
        let mut bl = Bootloader::new(ScriptedPort::new(&[&echo, &[0x04, 0x06]]));

        let sum = bl.calculate_checksum(0x800, 4).unwrap();
        assert_eq!(sum, 0x0604);
    }

    #[test]
    fn reset_awaits_only_the_echo() {
        let echo = [0x55, 0x09, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut bl = Bootloader::new(ScriptedPort::new(&[&echo]));

        bl.reset().unwrap();
        assert!(bl.into_port().rx.is_empty());
    }

    #[test]
    fn silent_device_times_out() {
        let mut bl = Bootloader::new(ScriptedPort::new(&[]));
        assert!(matches!(bl.get_version(), Err(Error::Timeout(_))));
    }
}
