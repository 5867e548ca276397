//! Row and block arithmetic for segment programming.
//!
//! The bootloader erases and writes in device-reported row units, so
//! arbitrary image segments have to be reshaped before they can go over the
//! wire: erases are widened to row boundaries, writes are merged into
//! row-aligned blocks with `0xFF` filling the gaps. `0xFF` is the erased
//! flash value and a safe filler for EEPROM and configuration memory.

use std::collections::BTreeMap;

/// An address-tagged run of contiguous bytes from a firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Absolute byte address of the first byte.
    pub address: u32,
    /// The bytes themselves.
    pub data: Vec<u8>,
}

impl Segment {
    /// Create a segment at the given address.
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// Address one past the last byte.
    pub fn end(&self) -> u64 {
        u64::from(self.address) + self.data.len() as u64
    }

    /// Whether the segment lies entirely within `[start, start + length)`.
    pub fn fits(&self, start: u32, length: u32) -> bool {
        self.address >= start && self.end() <= u64::from(start) + u64::from(length)
    }
}

/// Merge segments into row-aligned write blocks.
///
/// Every byte lands in the block covering its row; positions nobody
/// supplies stay `0xFF`. Overlapping segments are merged last-writer-wins,
/// and blocks come out in ascending row order. `row_size` must be a power
/// of two.
pub fn write_blocks(segments: &[Segment], row_size: usize) -> BTreeMap<u32, Vec<u8>> {
    let mask = !(row_size as u32 - 1);
    let mut blocks: BTreeMap<u32, Vec<u8>> = BTreeMap::new();

    for segment in segments {
        for (i, &byte) in segment.data.iter().enumerate() {
            let byte_address = segment.address + i as u32;
            let row = byte_address & mask;
            let block = blocks.entry(row).or_insert_with(|| vec![0xFF; row_size]);
            block[(byte_address - row) as usize] = byte;
        }
    }

    blocks
}

/// Erase span covering a segment: the row-aligned start address and the
/// number of rows up to the segment's end. `row_size` must be a power of
/// two.
#[allow(clippy::cast_possible_truncation)] // row counts fit u16 on 8-bit parts
pub fn erase_span(segment: &Segment, row_size: usize) -> (u32, u16) {
    let start = segment.address & !(row_size as u32 - 1);
    let end = segment.address + segment.data.len() as u32;
    let rows = (end - start).div_ceil(row_size as u32);
    (start, rows as u16)
}

/// Sum of little-endian 16-bit words modulo 2^16.
///
/// A trailing unpaired byte is ignored; flash segments always have even
/// length.
pub fn checksum(data: &[u8]) -> u16 {
    data.chunks_exact(2).fold(0u16, |sum, pair| {
        sum.wrapping_add(u16::from(pair[0]) | (u16::from(pair[1]) << 8))
    })
}
