//! Command frame encoding and response decoding.
//!
//! ## Frame Format
//!
//! Every command travels in a single frame:
//!
//! ```text
//! +------+--------+--------+--------+---------+----------+
//! | SOF  | Opcode | Length | Unlock | Address | Payload  |
//! +------+--------+--------+--------+---------+----------+
//! | 1    | 1      | 2 LE   | 2      | 4 LE    | 0..n     |
//! +------+--------+--------+--------+---------+----------+
//! | 0x55 |  cmd   | count  | 55 AA  |  addr   |  data    |
//! +------+--------+--------+--------+---------+----------+
//! ```
//!
//! The unlock bytes are `55 AA` on destructive commands (writes and
//! erases) and `00 00` otherwise. Multi-byte integers are little-endian.
//! The bootloader echoes the frame up to and including the address field
//! before sending any reply; payload bytes are never echoed.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Start-of-frame byte preceding every command.
pub const START_OF_FRAME: u8 = 0x55;

/// Length of the echoed portion of a frame, excluding the start-of-frame
/// byte: opcode, length, unlock, address.
pub const HEADER_LEN: usize = 9;

/// Unlock bytes required by destructive commands.
pub const UNLOCK_SEQUENCE: [u8; 2] = [0x55, 0xAA];

/// Byte count of the GetVersion response.
const VERSION_RESPONSE_LEN: usize = 16;

/// Byte count of the CalculateChecksum response.
const CHECKSUM_RESPONSE_LEN: usize = 2;

/// Bootloader command opcodes.
pub mod opcode {
    /// Read the bootloader version block.
    pub const GET_VERSION: u8 = 0x00;
    /// Read program flash.
    pub const READ_FLASH: u8 = 0x01;
    /// Write program flash.
    pub const WRITE_FLASH: u8 = 0x02;
    /// Erase program flash rows.
    pub const ERASE_FLASH: u8 = 0x03;
    /// Read EEPROM.
    pub const READ_EE: u8 = 0x04;
    /// Write EEPROM.
    pub const WRITE_EE: u8 = 0x05;
    /// Read configuration memory.
    pub const READ_CONFIG: u8 = 0x06;
    /// Write configuration memory.
    pub const WRITE_CONFIG: u8 = 0x07;
    /// Checksum a flash range on the device.
    pub const CALCULATE_CHECKSUM: u8 = 0x08;
    /// Restart into the application.
    pub const RESET: u8 = 0x09;
}

/// Result codes the device returns in the success byte.
pub mod result_code {
    /// Command accepted and executed.
    pub const SUCCESS: u8 = 0x01;
    /// Command not implemented by this bootloader.
    pub const UNSUPPORTED: u8 = 0xFF;
    /// Address outside the range the command may touch.
    pub const ADDRESS_ERROR: u8 = 0xFE;
}

/// Human-readable name of a bootloader result code.
pub fn result_code_name(code: u8) -> &'static str {
    match code {
        result_code::SUCCESS => "success",
        result_code::UNSUPPORTED => "unsupported",
        result_code::ADDRESS_ERROR => "address error",
        _ => "invalid response code",
    }
}

/// A framed bootloader command.
///
/// Built through the per-operation constructors, serialized with
/// [`Command::to_bytes`]. The expected response shape travels with the
/// command so the exchange loop stays table-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: u8,
    length: u16,
    unlock: [u8; 2],
    address: u32,
    data: Vec<u8>,
    response_length: usize,
    expects_success_code: bool,
}

impl Command {
    /// The GetVersion command.
    pub fn get_version() -> Self {
        Self {
            opcode: opcode::GET_VERSION,
            length: 0,
            unlock: [0, 0],
            address: 0,
            data: Vec::new(),
            response_length: VERSION_RESPONSE_LEN,
            expects_success_code: false,
        }
    }

    /// Read `length` bytes of program flash at `address`.
    pub fn read_flash(address: u32, length: u16) -> Self {
        Self {
            opcode: opcode::READ_FLASH,
            length,
            unlock: [0, 0],
            address,
            data: Vec::new(),
            response_length: length as usize,
            expects_success_code: false,
        }
    }

    /// Write `data` to program flash at `address`.
    pub fn write_flash(address: u32, data: Vec<u8>) -> Self {
        Self {
            opcode: opcode::WRITE_FLASH,
            length: 0,
            unlock: UNLOCK_SEQUENCE,
            address,
            data,
            response_length: 0,
            expects_success_code: true,
        }
    }

    /// Erase `num_rows` erase rows of program flash starting at `address`.
    pub fn erase_flash(address: u32, num_rows: u16) -> Self {
        Self {
            opcode: opcode::ERASE_FLASH,
            length: num_rows,
            unlock: UNLOCK_SEQUENCE,
            address,
            data: Vec::new(),
            response_length: 0,
            expects_success_code: true,
        }
    }

    /// Read `length` bytes of EEPROM at `address`.
    pub fn read_ee(address: u32, length: u16) -> Self {
        Self {
            opcode: opcode::READ_EE,
            length,
            unlock: [0, 0],
            address,
            data: Vec::new(),
            response_length: length as usize,
            expects_success_code: false,
        }
    }

    /// Write `data` to EEPROM at `address`.
    pub fn write_ee(address: u32, data: Vec<u8>) -> Self {
        Self {
            opcode: opcode::WRITE_EE,
            length: 0,
            unlock: UNLOCK_SEQUENCE,
            address,
            data,
            response_length: 0,
            expects_success_code: true,
        }
    }

    /// Read `length` bytes of configuration memory at `address`.
    pub fn read_config(address: u32, length: u16) -> Self {
        Self {
            opcode: opcode::READ_CONFIG,
            length,
            unlock: [0, 0],
            address,
            data: Vec::new(),
            response_length: length as usize,
            expects_success_code: false,
        }
    }

    /// Write `data` to configuration memory at `address`.
    pub fn write_config(address: u32, data: Vec<u8>) -> Self {
        Self {
            opcode: opcode::WRITE_CONFIG,
            length: 0,
            unlock: UNLOCK_SEQUENCE,
            address,
            data,
            response_length: 0,
            expects_success_code: true,
        }
    }

    /// Ask the device to checksum `length` bytes of flash at `address`.
    pub fn calculate_checksum(address: u32, length: u16) -> Self {
        Self {
            opcode: opcode::CALCULATE_CHECKSUM,
            length,
            unlock: [0, 0],
            address,
            data: Vec::new(),
            response_length: CHECKSUM_RESPONSE_LEN,
            expects_success_code: false,
        }
    }

    /// The Reset command. The device restarts without replying.
    pub fn reset() -> Self {
        Self {
            opcode: opcode::RESET,
            length: 0,
            unlock: [0, 0],
            address: 0,
            data: Vec::new(),
            response_length: 0,
            expects_success_code: false,
        }
    }

    /// Serialize the command, excluding the start-of-frame byte.
    ///
    /// When a payload is present its byte count overrides the length field.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // payloads are bounded by the device packet size
    pub fn to_bytes(&self) -> Vec<u8> {
        let length = if self.data.is_empty() {
            self.length
        } else {
            self.data.len() as u16
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len());
        buf.push(self.opcode);
        buf.write_u16::<LittleEndian>(length).unwrap();
        buf.extend_from_slice(&self.unlock);
        buf.write_u32::<LittleEndian>(self.address).unwrap();
        buf.extend_from_slice(&self.data);
        buf
    }

    /// The command's opcode.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Number of response bytes that follow the success code, if any.
    pub fn response_length(&self) -> usize {
        self.response_length
    }

    /// Whether the device acknowledges this command with a success code.
    pub fn expects_success_code(&self) -> bool {
        self.expects_success_code
    }
}

/// Decoded response of the GetVersion command.
///
/// `erase_row_size` and `write_row_size` drive all address arithmetic in
/// the programming engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Bootloader minor version.
    pub version_minor: u8,
    /// Bootloader major version.
    pub version_major: u8,
    /// Largest frame the bootloader accepts.
    pub max_packet_size: u16,
    /// Device identifier word.
    pub device_id: u16,
    /// Erase granularity in bytes.
    pub erase_row_size: u8,
    /// Write granularity in bytes.
    pub write_row_size: u8,
    /// Raw configuration words.
    pub config_words: [u8; 4],
}

impl VersionInfo {
    /// Decode the 16-byte GetVersion response.
    ///
    /// Any other length fails with
    /// [`Error::InvalidResponse`](crate::Error::InvalidResponse). Bytes at
    /// offsets 4-5 and 8-9 are reserved and skipped.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != VERSION_RESPONSE_LEN {
            return Err(Error::InvalidResponse(format!(
                "version block is {} bytes, expected {VERSION_RESPONSE_LEN}",
                data.len()
            )));
        }

        let mut r = data;
        let version_minor = r.read_u8()?;
        let version_major = r.read_u8()?;
        let max_packet_size = r.read_u16::<LittleEndian>()?;
        let _reserved = r.read_u16::<LittleEndian>()?;
        let device_id = r.read_u16::<LittleEndian>()?;
        let _reserved = r.read_u16::<LittleEndian>()?;
        let erase_row_size = r.read_u8()?;
        let write_row_size = r.read_u8()?;
        let mut config_words = [0u8; 4];
        std::io::Read::read_exact(&mut r, &mut config_words)?;

        Ok(Self {
            version_minor,
            version_major,
            max_packet_size,
            device_id,
            erase_row_size,
            write_row_size,
            config_words,
        })
    }
}
