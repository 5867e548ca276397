//! Firmware image loading.

pub mod hex;

pub use hex::parse_hex;
