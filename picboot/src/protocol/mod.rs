//! Wire protocol of the Microchip Unified Bootloader.

pub mod command;

pub use command::{
    opcode, result_code, result_code_name, Command, VersionInfo, HEADER_LEN, START_OF_FRAME,
    UNLOCK_SEQUENCE,
};
