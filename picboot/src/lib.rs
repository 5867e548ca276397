//! # picboot
//!
//! A library for programming 8-bit PIC microcontrollers through the
//! Microchip Unified Bootloader over a serial line.
//!
//! Three layers, leaves first:
//!
//! - [`port`]: a duplex byte transport with deadline reads, concretely a
//!   serial port at 8-N-1.
//! - [`bootloader`]: the ten-command frame set and the half-duplex
//!   echo-then-reply exchange.
//! - [`programmer`]: classification of a firmware image against a device
//!   memory map and the erase / write / verify / reset sequence.
//!
//! [`image`] loads Intel HEX files into the address-tagged segments the
//! programmer consumes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use picboot::{Bootloader, NativePort, Options, Profile, Programmer};
//!
//! fn main() -> picboot::Result<()> {
//!     let port = NativePort::new("/dev/ttyUSB0", 115200);
//!     let profile = Profile {
//!         bootloader_offset: 0x800,
//!         flash_size: 0x8000,
//!         eeprom_offset: 0x310000,
//!         eeprom_size: 256,
//!         config_offset: 0x300000,
//!         config_size: 14,
//!         id_offset: 0x200000,
//!         id_size: 8,
//!     };
//!     let options = Options {
//!         program_eeprom: true,
//!         verify_by_reading: true,
//!         ..Options::default()
//!     };
//!
//!     let mut programmer = Programmer::new(Bootloader::new(port), profile, options);
//!     programmer.connect()?;
//!     programmer.load_hex(&std::fs::read_to_string("firmware.hex")?)?;
//!     programmer.program(|_, _, _| {})?;
//!     programmer.verify()?;
//!     programmer.reset()?;
//!     Ok(())
//! }
//! ```
//!
//! Logging goes through the `log` facade and defaults to a no-op; install
//! any logger to see the wire traffic at trace level.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootloader;
pub mod error;
pub mod image;
pub mod port;
pub mod programmer;
pub mod protocol;

pub use bootloader::Bootloader;
pub use error::{Error, Operation, Result};
pub use image::parse_hex;
pub use port::{NativePort, Port};
pub use programmer::{Options, Profile, Programmer, Region, Segment};
pub use protocol::{Command, VersionInfo};
