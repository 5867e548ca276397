//! Raw bootloader commands for poking a device without a profile.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use picboot::{Bootloader, NativePort};

/// Print the decoded version block.
pub fn version(bootloader: &mut Bootloader<NativePort>) -> Result<()> {
    let info = bootloader.get_version()?;
    println!("bootloader version: {}.{}", info.version_major, info.version_minor);
    println!("max packet size:    {}", info.max_packet_size);
    println!("device id:          {:#06X}", info.device_id);
    println!("erase row size:     {}", info.erase_row_size);
    println!("write row size:     {}", info.write_row_size);
    println!("config words:       {}", hex::encode_upper(info.config_words));
    Ok(())
}

/// Read and dump program flash.
pub fn read_flash(bootloader: &mut Bootloader<NativePort>, address: u32, length: u16) -> Result<()> {
    let data = bootloader.read_flash(address, length)?;
    dump(address, &data);
    Ok(())
}

/// Read and dump EEPROM.
pub fn read_ee(bootloader: &mut Bootloader<NativePort>, address: u32, length: u16) -> Result<()> {
    let data = bootloader.read_ee(address, length)?;
    dump(address, &data);
    Ok(())
}

/// Read and dump configuration memory.
pub fn read_config(bootloader: &mut Bootloader<NativePort>, address: u32, length: u16) -> Result<()> {
    let data = bootloader.read_config(address, length)?;
    dump(address, &data);
    Ok(())
}

/// Write a raw data file to program flash.
pub fn write_flash(bootloader: &mut Bootloader<NativePort>, address: u32, file: &Path) -> Result<()> {
    let data = read_data_file(file)?;
    bootloader.write_flash(address, data)?;
    Ok(())
}

/// Write a raw data file to EEPROM.
pub fn write_ee(bootloader: &mut Bootloader<NativePort>, address: u32, file: &Path) -> Result<()> {
    let data = read_data_file(file)?;
    bootloader.write_ee(address, data)?;
    Ok(())
}

/// Write a raw data file to configuration memory.
pub fn write_config(bootloader: &mut Bootloader<NativePort>, address: u32, file: &Path) -> Result<()> {
    let data = read_data_file(file)?;
    bootloader.write_config(address, data)?;
    Ok(())
}

/// Erase flash rows.
pub fn erase_flash(bootloader: &mut Bootloader<NativePort>, address: u32, rows: u16) -> Result<()> {
    bootloader.erase_flash(address, rows)?;
    Ok(())
}

/// Print the device checksum of a flash range.
pub fn checksum(bootloader: &mut Bootloader<NativePort>, address: u32, length: u16) -> Result<()> {
    let sum = bootloader.calculate_checksum(address, length)?;
    println!("checksum: {sum:04X}");
    Ok(())
}

/// Restart the device into its application.
pub fn reset(bootloader: &mut Bootloader<NativePort>) -> Result<()> {
    bootloader.reset()?;
    Ok(())
}

/// List available serial ports.
pub fn list_ports() -> Result<()> {
    let ports = NativePort::list_ports()?;
    if ports.is_empty() {
        eprintln!("no serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn read_data_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read data file {}", path.display()))
}

/// Hex dump with absolute addresses and an ASCII column.
fn dump(address: u32, data: &[u8]) {
    for (i, row) in data.chunks(16).enumerate() {
        let offset = address as usize + i * 16;
        let bytes: Vec<String> = row.iter().map(|b| format!("{b:02X}")).collect();
        let ascii: String = row
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
            .collect();
        println!("{offset:08X}  {:<47}  |{ascii}|", bytes.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_handles_partial_rows() {
        // Only checks it does not panic on awkward lengths.
        dump(0x800, &[]);
        dump(0x800, &[0x41]);
        dump(0x7F0, &(0..33).collect::<Vec<u8>>());
    }
}
