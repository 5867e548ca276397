//! High-level programming engine.
//!
//! [`Programmer`] ties a [`Bootloader`] session to a device [`Profile`] and
//! a set of [`Options`]. A firmware image is loaded and classified into the
//! four memory regions, then programmed with the fixed sequence the silicon
//! requires: erase flash, write flash, then the optional regions, then
//! verify and reset.
//!
//! Nothing here retries. The erase-before-write ordering is mandatory, and
//! aborting between the two leaves flash indeterminate, so every failure is
//! surfaced immediately with the region and row address attached.

pub mod memory;

pub use memory::Segment;

use std::fmt;

use log::debug;
use serde::Deserialize;

use crate::bootloader::Bootloader;
use crate::error::{Error, Operation, Result};
use crate::port::Port;
use crate::protocol::VersionInfo;

/// Largest even byte count a 16-bit checksum request can cover.
const MAX_CHECKSUM_CHUNK: usize = 0xFFFE;

/// Memory map of an 8-bit PIC target.
///
/// All fields are byte addresses or byte sizes. Application flash occupies
/// `[bootloader_offset, flash_size)`; everything below `bootloader_offset`
/// is the resident bootloader and is never touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Profile {
    /// First byte of application flash.
    pub bootloader_offset: u32,
    /// Total program flash size.
    pub flash_size: u32,
    /// EEPROM window start.
    pub eeprom_offset: u32,
    /// EEPROM window size.
    pub eeprom_size: u32,
    /// Configuration memory start.
    pub config_offset: u32,
    /// Configuration memory size.
    pub config_size: u32,
    /// User ID memory start.
    pub id_offset: u32,
    /// User ID memory size.
    pub id_size: u32,
}

/// Per-run programming policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Write the EEPROM segments of the image.
    pub program_eeprom: bool,
    /// Write the configuration segments of the image.
    pub program_config: bool,
    /// Write the user ID segments of the image.
    pub program_id: bool,
    /// Verify by reading memory back instead of by on-device checksum.
    pub verify_by_reading: bool,
}

/// Target memory region of a classified segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Application program flash.
    Flash,
    /// Data EEPROM.
    Eeprom,
    /// Configuration words.
    Config,
    /// User ID words.
    Id,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flash => write!(f, "flash"),
            Self::Eeprom => write!(f, "eeprom"),
            Self::Config => write!(f, "config"),
            Self::Id => write!(f, "id"),
        }
    }
}

/// High-level programmer for 8-bit PIC targets.
///
/// Owns the classified segments from load until reset. `load_hex` may be
/// called before or after `connect`; `program` and `verify` need both.
pub struct Programmer<P: Port> {
    bootloader: Bootloader<P>,
    profile: Profile,
    options: Options,
    info: Option<VersionInfo>,

    flash: Vec<Segment>,
    eeprom: Vec<Segment>,
    config: Vec<Segment>,
    id: Vec<Segment>,
}

impl<P: Port> Programmer<P> {
    /// Create a programmer over a bootloader session.
    pub fn new(bootloader: Bootloader<P>, profile: Profile, options: Options) -> Self {
        Self {
            bootloader,
            profile,
            options,
            info: None,
            flash: Vec::new(),
            eeprom: Vec::new(),
            config: Vec::new(),
            id: Vec::new(),
        }
    }

    /// Open the transport and read the device's version block.
    ///
    /// The reported row sizes drive every erase and write that follows, so
    /// nonsense values (zero, or not a power of two) fail here rather than
    /// mid-sequence.
    pub fn connect(&mut self) -> Result<()> {
        self.bootloader.connect()?;
        let info = self.bootloader.get_version()?;
        if !info.erase_row_size.is_power_of_two() || !info.write_row_size.is_power_of_two() {
            return Err(Error::InvalidResponse(format!(
                "row sizes must be powers of two, device reported erase {} write {}",
                info.erase_row_size, info.write_row_size
            )));
        }
        debug!(
            "connected: device {:#06X}, bootloader v{}.{}, erase row {}, write row {}",
            info.device_id,
            info.version_major,
            info.version_minor,
            info.erase_row_size,
            info.write_row_size
        );
        self.info = Some(info);
        Ok(())
    }

    /// Close the transport.
    pub fn disconnect(&mut self) {
        self.bootloader.disconnect();
    }

    /// The version block cached by [`connect`](Self::connect).
    pub fn version_info(&self) -> Option<&VersionInfo> {
        self.info.as_ref()
    }

    /// Parse Intel HEX text and classify its segments.
    pub fn load_hex(&mut self, text: &str) -> Result<()> {
        let segments = crate::image::parse_hex(text)?;
        self.load_segments(segments)
    }

    /// Classify segments into the profile's memory regions.
    ///
    /// Each segment must fall entirely inside exactly one region or the
    /// load fails. Flash segments are padded to even length, and every
    /// `0xFF` in a config segment is rewritten to `0x00`: unused config
    /// bytes serialize as `0xFF` in hex images but read back as `0x00` from
    /// the device, and verification compares against what the device will
    /// report.
    pub fn load_segments(&mut self, segments: Vec<Segment>) -> Result<()> {
        let p = self.profile;
        for mut segment in segments {
            if segment.fits(p.bootloader_offset, p.flash_size - p.bootloader_offset) {
                // The write path moves 16-bit words.
                if segment.data.len() % 2 == 1 {
                    segment.data.push(0xFF);
                }
                debug!(
                    "loaded flash segment at {:#X} length {}",
                    segment.address,
                    segment.data.len()
                );
                self.flash.push(segment);
            } else if segment.fits(p.id_offset, p.id_size) {
                debug!(
                    "loaded id segment at {:#X} length {}",
                    segment.address,
                    segment.data.len()
                );
                self.id.push(segment);
            } else if segment.fits(p.config_offset, p.config_size) {
                for byte in &mut segment.data {
                    if *byte == 0xFF {
                        *byte = 0x00;
                    }
                }
                debug!(
                    "loaded config segment at {:#X} length {}",
                    segment.address,
                    segment.data.len()
                );
                self.config.push(segment);
            } else if segment.fits(p.eeprom_offset, p.eeprom_size) {
                debug!(
                    "loaded eeprom segment at {:#X} length {}",
                    segment.address,
                    segment.data.len()
                );
                self.eeprom.push(segment);
            } else {
                return Err(Error::UnclassifiedSegment(segment.address));
            }
        }
        Ok(())
    }

    /// Erase and write the loaded image.
    ///
    /// Flash is always programmed; EEPROM, config and ID only when their
    /// option is set. `progress` is called after each written block with
    /// the region, blocks done and blocks total for that region.
    ///
    /// Any failure aborts the sequence immediately. There is no way to
    /// cancel mid-sequence; stopping between erase and write leaves flash
    /// indeterminate.
    pub fn program<F>(&mut self, mut progress: F) -> Result<()>
    where
        F: FnMut(Region, usize, usize),
    {
        let (erase_row, write_row) = self.row_sizes()?;

        erase_region(&mut self.bootloader, &self.flash, erase_row, Region::Flash)?;
        write_region(
            &mut self.bootloader,
            &self.flash,
            write_row,
            Region::Flash,
            &mut progress,
            |bl, addr, block| bl.write_flash(addr, block),
        )?;

        if self.options.program_eeprom {
            // EEPROM cells erase themselves on write.
            write_region(
                &mut self.bootloader,
                &self.eeprom,
                write_row,
                Region::Eeprom,
                &mut progress,
                |bl, addr, block| bl.write_ee(addr, block),
            )?;
        }

        if self.options.program_config {
            // No erase first. The PIC18 families this targets accept
            // direct config writes.
            write_region(
                &mut self.bootloader,
                &self.config,
                write_row,
                Region::Config,
                &mut progress,
                |bl, addr, block| bl.write_config(addr, block),
            )?;
        }

        if self.options.program_id {
            // ID memory erases like flash and programs through the flash
            // command, not the config one.
            erase_region(&mut self.bootloader, &self.id, erase_row, Region::Id)?;
            write_region(
                &mut self.bootloader,
                &self.id,
                write_row,
                Region::Id,
                &mut progress,
                |bl, addr, block| bl.write_flash(addr, block),
            )?;
        }

        Ok(())
    }

    /// Verify the programmed image.
    ///
    /// Read-back mode compares every region byte for byte; checksum mode
    /// covers flash only, trading strength for wire time on large images.
    pub fn verify(&mut self) -> Result<()> {
        if self.options.verify_by_reading {
            self.verify_by_reading()
        } else {
            self.verify_by_checksum()
        }
    }

    fn verify_by_reading(&mut self) -> Result<()> {
        let (_, write_row) = self.row_sizes()?;

        verify_region(&mut self.bootloader, &self.flash, write_row, |bl, addr, len| {
            bl.read_flash(addr, len)
        })?;

        if self.options.program_eeprom {
            verify_region(&mut self.bootloader, &self.eeprom, write_row, |bl, addr, len| {
                bl.read_ee(addr, len)
            })?;
        }

        if self.options.program_config {
            verify_region(&mut self.bootloader, &self.config, write_row, |bl, addr, len| {
                bl.read_config(addr, len)
            })?;
        }

        if self.options.program_id {
            verify_region(&mut self.bootloader, &self.id, write_row, |bl, addr, len| {
                bl.read_flash(addr, len)
            })?;
        }

        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)] // chunks are capped at 0xFFFE
    fn verify_by_checksum(&mut self) -> Result<()> {
        self.row_sizes()?;

        for segment in &self.flash {
            let mut offset = 0usize;
            for chunk in segment.data.chunks(MAX_CHECKSUM_CHUNK) {
                let address = segment.address + offset as u32;
                debug!("verifying checksum of {} bytes at {address:#X}", chunk.len());
                let device = self.bootloader.calculate_checksum(address, chunk.len() as u16)?;
                let local = memory::checksum(chunk);
                if device != local {
                    return Err(Error::ChecksumMismatch {
                        address,
                        local,
                        device,
                    });
                }
                offset += chunk.len();
            }
        }
        Ok(())
    }

    /// Restart the device into its application.
    ///
    /// The device stops answering as a bootloader the moment the command
    /// lands, so a transport failure while collecting the echo is treated
    /// as success rather than masking a completed program.
    pub fn reset(&mut self) -> Result<()> {
        match self.bootloader.reset() {
            Err(Error::Timeout(_) | Error::Io(_)) => {
                debug!("no reply after reset");
                Ok(())
            }
            other => other,
        }
    }

    fn row_sizes(&self) -> Result<(usize, usize)> {
        let info = self.info.as_ref().ok_or(Error::NotConnected)?;
        Ok((info.erase_row_size as usize, info.write_row_size as usize))
    }
}

fn erase_region<P: Port>(
    bootloader: &mut Bootloader<P>,
    segments: &[Segment],
    row_size: usize,
    region: Region,
) -> Result<()> {
    for segment in segments {
        let (start, rows) = memory::erase_span(segment, row_size);
        debug!("erasing {rows} rows at {start:#X}");
        bootloader.erase_flash(start, rows).map_err(|source| Error::Programming {
            region,
            op: Operation::Erase,
            address: start,
            source: Box::new(source),
        })?;
    }
    Ok(())
}

fn write_region<P, W, F>(
    bootloader: &mut Bootloader<P>,
    segments: &[Segment],
    row_size: usize,
    region: Region,
    progress: &mut F,
    mut write: W,
) -> Result<()>
where
    P: Port,
    W: FnMut(&mut Bootloader<P>, u32, Vec<u8>) -> Result<()>,
    F: FnMut(Region, usize, usize),
{
    let blocks = memory::write_blocks(segments, row_size);
    let total = blocks.len();
    for (done, (address, block)) in blocks.into_iter().enumerate() {
        debug!("writing {} bytes at {address:#X}", block.len());
        write(bootloader, address, block).map_err(|source| Error::Programming {
            region,
            op: Operation::Write,
            address,
            source: Box::new(source),
        })?;
        progress(region, done + 1, total);
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // chunk lengths are at most one write row
fn verify_region<P, R>(
    bootloader: &mut Bootloader<P>,
    segments: &[Segment],
    stride: usize,
    mut read: R,
) -> Result<()>
where
    P: Port,
    R: FnMut(&mut Bootloader<P>, u32, u16) -> Result<Vec<u8>>,
{
    for segment in segments {
        let mut offset = 0usize;
        for chunk in segment.data.chunks(stride) {
            let address = segment.address + offset as u32;
            debug!("verifying {} bytes at {address:#X}", chunk.len());
            let device = read(bootloader, address, chunk.len() as u16)?;
            for (i, (&expected, &actual)) in chunk.iter().zip(device.iter()).enumerate() {
                if expected != actual {
                    return Err(Error::VerifyMismatch {
                        address: address + i as u32,
                        expected,
                        actual,
                    });
                }
            }
            offset += chunk.len();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::port::Port;

    fn profile() -> Profile {
        Profile {
            bootloader_offset: 0x800,
            flash_size: 0x8000,
            eeprom_offset: 0x310000,
            eeprom_size: 0x100,
            config_offset: 0x300000,
            config_size: 14,
            id_offset: 0x200000,
            id_size: 8,
        }
    }

    /// Port that refuses everything; classification never touches it.
    struct DeadPort;

    impl Port for DeadPort {
        fn open(&mut self) -> Result<()> {
            Err(Error::NotConnected)
        }
        fn close(&mut self) {}
        fn write_all(&mut self, _buf: &[u8]) -> Result<()> {
            Err(Error::NotConnected)
        }
        fn read_exact(&mut self, _buf: &mut [u8]) -> Result<()> {
            Err(Error::NotConnected)
        }
        fn name(&self) -> &str {
            "dead"
        }
    }

    fn programmer() -> Programmer<DeadPort> {
        Programmer::new(Bootloader::new(DeadPort), profile(), Options::default())
    }

    #[test]
    fn odd_flash_segment_is_padded() {
        let mut prog = programmer();
        prog.load_segments(vec![Segment::new(0x801, vec![0xAA])]).unwrap();
        assert_eq!(prog.flash, [Segment::new(0x801, vec![0xAA, 0xFF])]);
    }

    #[test]
    fn config_sentinel_bytes_are_rewritten() {
        let mut prog = programmer();
        prog.load_segments(vec![Segment::new(0x300000, vec![0xFE, 0xFF, 0x01])])
            .unwrap();
        assert_eq!(prog.config, [Segment::new(0x300000, vec![0xFE, 0x00, 0x01])]);
    }

    #[test]
    fn segments_land_in_exactly_one_region() {
        let mut prog = programmer();
        prog.load_segments(vec![
            Segment::new(0x900, vec![1, 2]),
            Segment::new(0x310010, vec![3]),
            Segment::new(0x300002, vec![4]),
            Segment::new(0x200000, vec![5, 6]),
        ])
        .unwrap();

        assert_eq!(prog.flash.len(), 1);
        assert_eq!(prog.eeprom.len(), 1);
        assert_eq!(prog.config.len(), 1);
        assert_eq!(prog.id.len(), 1);
    }

    #[test]
    fn bootloader_area_is_never_writable() {
        let mut prog = programmer();
        let err = prog
            .load_segments(vec![Segment::new(0x7FF, vec![0xAA])])
            .unwrap_err();
        assert!(matches!(err, Error::UnclassifiedSegment(0x7FF)));
    }

    #[test]
    fn segment_outside_every_region_fails_load() {
        let mut prog = programmer();
        let err = prog
            .load_segments(vec![Segment::new(0x400000, vec![0])])
            .unwrap_err();
        assert!(matches!(err, Error::UnclassifiedSegment(0x400000)));
    }

    #[test]
    fn program_requires_connect() {
        let mut prog = programmer();
        prog.load_segments(vec![Segment::new(0x900, vec![1, 2])]).unwrap();
        assert!(matches!(prog.program(|_, _, _| {}), Err(Error::NotConnected)));
        assert!(matches!(prog.verify(), Err(Error::NotConnected)));
    }
}
