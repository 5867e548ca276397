//! Device profile documents.
//!
//! A profile file is a YAML document carrying the target's memory map and
//! the programming options:
//!
//! ```yaml
//! profile:
//!   bootloader_offset: 0x800
//!   flash_size: 0x8000
//!   eeprom_offset: 0x310000
//!   eeprom_size: 256
//!   config_offset: 0x300000
//!   config_size: 14
//!   id_offset: 0x200000
//!   id_size: 8
//! options:
//!   program_eeprom: true
//!   program_config: false
//!   program_id: false
//!   verify_by_reading: true
//! ```
//!
//! The `options` section may be omitted; everything then defaults to off
//! and verification runs in checksum mode.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use picboot::{Options, Profile};
use serde::Deserialize;

/// A parsed profile file: memory map plus programming options.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProfileDocument {
    /// Device memory map.
    pub profile: Profile,
    /// Programming options.
    #[serde(default)]
    pub options: Options,
}

impl ProfileDocument {
    /// Load and parse a profile file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read profile file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse profile file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_document_parses() {
        let doc: ProfileDocument = serde_yaml::from_str(
            r"
profile:
  bootloader_offset: 0x800
  flash_size: 0x8000
  eeprom_offset: 0x310000
  eeprom_size: 256
  config_offset: 0x300000
  config_size: 14
  id_offset: 0x200000
  id_size: 8
options:
  program_eeprom: true
  program_config: false
  program_id: false
  verify_by_reading: true
",
        )
        .unwrap();

        assert_eq!(doc.profile.bootloader_offset, 0x800);
        assert_eq!(doc.profile.flash_size, 0x8000);
        assert_eq!(doc.profile.eeprom_size, 256);
        assert_eq!(doc.profile.config_offset, 0x300000);
        assert!(doc.options.program_eeprom);
        assert!(!doc.options.program_config);
        assert!(doc.options.verify_by_reading);
    }

    #[test]
    fn options_section_is_optional() {
        let doc: ProfileDocument = serde_yaml::from_str(
            r"
profile:
  bootloader_offset: 2048
  flash_size: 32768
  eeprom_offset: 0
  eeprom_size: 0
  config_offset: 0
  config_size: 0
  id_offset: 0
  id_size: 0
",
        )
        .unwrap();

        assert_eq!(doc.options, Options::default());
        assert!(!doc.options.verify_by_reading);
    }

    #[test]
    fn missing_memory_map_fails() {
        let result: std::result::Result<ProfileDocument, _> =
            serde_yaml::from_str("options:\n  program_eeprom: true\n");
        assert!(result.is_err());
    }
}
