//! Intel HEX image parsing.
//!
//! Record-level parsing (checksums, field layout) comes from the `ihex`
//! crate. This module adds what the programming engine needs on top:
//! extended-address base tracking and the joining of data records into
//! contiguous [`Segment`] runs.

use ihex::{Reader, Record};
use log::debug;

use crate::error::{Error, Result};
use crate::programmer::Segment;

/// Parse Intel HEX text into address-ordered data segments.
///
/// Extended segment and extended linear address records move the base
/// address; data records are placed relative to it. Records whose bytes
/// touch are merged into one segment regardless of their order in the
/// file. Overlapping records fail with
/// [`Error::Hex`](crate::Error::Hex).
pub fn parse_hex(text: &str) -> Result<Vec<Segment>> {
    let mut base = 0u32;
    let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();

    for record in Reader::new(text) {
        let record = record.map_err(|e| Error::Hex(e.to_string()))?;
        match record {
            Record::Data { offset, value } => {
                chunks.push((base + u32::from(offset), value));
            }
            Record::ExtendedSegmentAddress(paragraph) => {
                base = u32::from(paragraph) << 4;
            }
            Record::ExtendedLinearAddress(upper) => {
                base = u32::from(upper) << 16;
            }
            Record::EndOfFile => break,
            // Start addresses name an entry point, not data; the
            // bootloader decides where execution begins.
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
        }
    }

    chunks.sort_by_key(|&(address, _)| address);

    let mut segments: Vec<Segment> = Vec::new();
    for (address, data) in chunks {
        match segments.last_mut() {
            Some(last) if last.end() == u64::from(address) => {
                last.data.extend(data);
            }
            Some(last) if last.end() > u64::from(address) => {
                return Err(Error::Hex(format!(
                    "overlapping data records at {address:#X}"
                )));
            }
            _ => segments.push(Segment::new(address, data)),
        }
    }

    debug!("parsed {} segments from hex image", segments.len());
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ihex::create_object_file_representation as to_hex;

    #[test]
    fn contiguous_records_merge_into_one_segment() {
        let text = to_hex(&[
            Record::Data {
                offset: 0x800,
                value: vec![0x01, 0x02],
            },
            Record::Data {
                offset: 0x802,
                value: vec![0x03, 0x04],
            },
            Record::EndOfFile,
        ])
        .unwrap();

        let segments = parse_hex(&text).unwrap();
        assert_eq!(segments, [Segment::new(0x800, vec![0x01, 0x02, 0x03, 0x04])]);
    }

    #[test]
    fn gaps_split_segments() {
        let text = to_hex(&[
            Record::Data {
                offset: 0x800,
                value: vec![0xAA],
            },
            Record::Data {
                offset: 0x900,
                value: vec![0xBB],
            },
            Record::EndOfFile,
        ])
        .unwrap();

        let segments = parse_hex(&text).unwrap();
        assert_eq!(
            segments,
            [
                Segment::new(0x800, vec![0xAA]),
                Segment::new(0x900, vec![0xBB]),
            ]
        );
    }

    #[test]
    fn extended_linear_address_moves_the_base() {
        let text = to_hex(&[
            Record::Data {
                offset: 0x0000,
                value: vec![0x11],
            },
            Record::ExtendedLinearAddress(0x0030),
            Record::Data {
                offset: 0x0000,
                value: vec![0xFE, 0xFF],
            },
            Record::EndOfFile,
        ])
        .unwrap();

        let segments = parse_hex(&text).unwrap();
        assert_eq!(
            segments,
            [
                Segment::new(0x0000, vec![0x11]),
                Segment::new(0x30_0000, vec![0xFE, 0xFF]),
            ]
        );
    }

    #[test]
    fn extended_segment_address_shifts_by_four_bits() {
        let text = to_hex(&[
            Record::ExtendedSegmentAddress(0x1000),
            Record::Data {
                offset: 0x0010,
                value: vec![0x42],
            },
            Record::EndOfFile,
        ])
        .unwrap();

        let segments = parse_hex(&text).unwrap();
        assert_eq!(segments, [Segment::new(0x10010, vec![0x42])]);
    }

    #[test]
    fn out_of_order_records_still_merge() {
        let text = to_hex(&[
            Record::Data {
                offset: 0x802,
                value: vec![0x03, 0x04],
            },
            Record::Data {
                offset: 0x800,
                value: vec![0x01, 0x02],
            },
            Record::EndOfFile,
        ])
        .unwrap();

        let segments = parse_hex(&text).unwrap();
        assert_eq!(segments, [Segment::new(0x800, vec![0x01, 0x02, 0x03, 0x04])]);
    }

    #[test]
    fn overlapping_records_fail() {
        let text = to_hex(&[
            Record::Data {
                offset: 0x800,
                value: vec![0x01, 0x02, 0x03],
            },
            Record::Data {
                offset: 0x802,
                value: vec![0x04],
            },
            Record::EndOfFile,
        ])
        .unwrap();

        assert!(matches!(parse_hex(&text), Err(Error::Hex(_))));
    }

    #[test]
    fn corrupt_checksum_fails() {
        // Valid line would end in FF.
        assert!(matches!(parse_hex(":0100000000AB\n"), Err(Error::Hex(_))));
    }
}
