//! picboot - program 8-bit PIC microcontrollers over a serial bootloader.
//!
//! The `program` subcommand runs the full pipeline on a HEX image:
//! connect, classify, erase, write, verify, reset. The remaining
//! subcommands expose the raw bootloader operations for bring-up and
//! debugging.
//!
//! Environment variables:
//!   PICBOOT_PORT     - default serial port
//!   PICBOOT_BAUD     - default baud rate (default: 115200)
//!   PICBOOT_PROFILE  - default device profile file

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use picboot::{Bootloader, NativePort, Programmer, Region};

mod commands;
mod profile;

use profile::ProfileDocument;

/// picboot - a host-side programmer for the Microchip Unified Bootloader.
#[derive(Parser)]
#[command(name = "picboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (e.g. /dev/ttyUSB0 or COM3).
    #[arg(short, long, global = true, env = "PICBOOT_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "PICBOOT_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Program a HEX image: erase, write, verify, reset.
    Program {
        /// Intel HEX file to program.
        hex_file: PathBuf,

        /// Device profile YAML file.
        #[arg(long, env = "PICBOOT_PROFILE")]
        profile: PathBuf,

        /// Command to run before connecting.
        #[arg(long)]
        before: Option<String>,

        /// Command to run after a fully successful run.
        #[arg(long)]
        after: Option<String>,
    },

    /// Read the bootloader version block.
    Version,

    /// Read program flash.
    ReadFlash {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Byte count.
        #[arg(value_parser = parse_u16)]
        length: u16,
    },

    /// Write a raw data file to program flash.
    WriteFlash {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// File holding the bytes to write.
        file: PathBuf,
    },

    /// Erase program flash rows.
    EraseFlash {
        /// Row-aligned start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Number of erase rows.
        #[arg(value_parser = parse_u16)]
        rows: u16,
    },

    /// Read EEPROM.
    ReadEe {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Byte count.
        #[arg(value_parser = parse_u16)]
        length: u16,
    },

    /// Write a raw data file to EEPROM.
    WriteEe {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// File holding the bytes to write.
        file: PathBuf,
    },

    /// Read configuration memory.
    ReadConfig {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Byte count.
        #[arg(value_parser = parse_u16)]
        length: u16,
    },

    /// Write a raw data file to configuration memory.
    WriteConfig {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// File holding the bytes to write.
        file: PathBuf,
    },

    /// Ask the device to checksum a flash range.
    Checksum {
        /// Start address.
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Byte count, must be even.
        #[arg(value_parser = parse_u16)]
        length: u16,
    },

    /// Reset the device into its application.
    Reset,

    /// List available serial ports.
    ListPorts,
}

/// Parse a number, accepting a 0x prefix for hexadecimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

/// Parse a 16-bit number, accepting a 0x prefix for hexadecimal.
fn parse_u16(s: &str) -> Result<u16, String> {
    let value = parse_u32(s)?;
    u16::try_from(value).map_err(|_| format!("'{s}' does not fit in 16 bits"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(None)
        .init();

    debug!("picboot v{}", env!("CARGO_PKG_VERSION"));

    if matches!(cli.command, Commands::ListPorts) {
        return commands::list_ports();
    }

    let port_name = cli
        .port
        .clone()
        .context("no serial port given; use --port or PICBOOT_PORT")?;
    let quiet = cli.quiet;
    let baud = cli.baud;

    match cli.command {
        Commands::Program {
            hex_file,
            profile,
            before,
            after,
        } => cmd_program(
            quiet,
            &port_name,
            baud,
            &hex_file,
            &profile,
            before.as_deref(),
            after.as_deref(),
        ),
        Commands::Version => with_bootloader(&port_name, baud, commands::version),
        Commands::ReadFlash { address, length } => {
            with_bootloader(&port_name, baud, |bl| commands::read_flash(bl, address, length))
        }
        Commands::WriteFlash { address, file } => {
            with_bootloader(&port_name, baud, |bl| commands::write_flash(bl, address, &file))
        }
        Commands::EraseFlash { address, rows } => {
            with_bootloader(&port_name, baud, |bl| commands::erase_flash(bl, address, rows))
        }
        Commands::ReadEe { address, length } => {
            with_bootloader(&port_name, baud, |bl| commands::read_ee(bl, address, length))
        }
        Commands::WriteEe { address, file } => {
            with_bootloader(&port_name, baud, |bl| commands::write_ee(bl, address, &file))
        }
        Commands::ReadConfig { address, length } => {
            with_bootloader(&port_name, baud, |bl| commands::read_config(bl, address, length))
        }
        Commands::WriteConfig { address, file } => {
            with_bootloader(&port_name, baud, |bl| commands::write_config(bl, address, &file))
        }
        Commands::Checksum { address, length } => {
            with_bootloader(&port_name, baud, |bl| commands::checksum(bl, address, length))
        }
        Commands::Reset => with_bootloader(&port_name, baud, commands::reset),
        Commands::ListPorts => unreachable!("handled above"),
    }
}

/// Open a bootloader session, run one operation, close the port.
fn with_bootloader<F>(port_name: &str, baud: u32, f: F) -> Result<()>
where
    F: FnOnce(&mut Bootloader<NativePort>) -> Result<()>,
{
    let mut bootloader = Bootloader::new(NativePort::new(port_name, baud));
    bootloader
        .connect()
        .with_context(|| format!("failed to open {port_name}"))?;
    let result = f(&mut bootloader);
    bootloader.disconnect();
    result
}

/// The full program pipeline: hooks, connect, load, program, verify, reset.
fn cmd_program(
    quiet: bool,
    port_name: &str,
    baud: u32,
    hex_file: &Path,
    profile_path: &Path,
    before: Option<&str>,
    after: Option<&str>,
) -> Result<()> {
    let document = ProfileDocument::from_file(profile_path)?;

    if let Some(command) = before {
        status(quiet, "running before command...");
        run_hook(command)?;
    }

    let bootloader = Bootloader::new(NativePort::new(port_name, baud));
    let mut programmer = Programmer::new(bootloader, document.profile, document.options);

    status(quiet, "connecting to device...");
    programmer
        .connect()
        .context("failed to connect to bootloader")?;
    if let Some(info) = programmer.version_info() {
        status(
            quiet,
            &format!(
                "connected: device {:#06X}, bootloader v{}.{}",
                info.device_id, info.version_major, info.version_minor
            ),
        );
    }

    let text = fs::read_to_string(hex_file)
        .with_context(|| format!("failed to read hex file {}", hex_file.display()))?;
    programmer.load_hex(&text).context("failed to load hex image")?;
    status(quiet, "hex image loaded");

    status(quiet, "programming...");
    let bar = progress_bar(quiet);
    let mut current_region: Option<Region> = None;
    programmer
        .program(|region, done, total| {
            if current_region != Some(region) {
                current_region = Some(region);
                bar.set_length(total as u64);
                bar.set_position(0);
                bar.set_message(format!("writing {region}"));
            }
            bar.set_position(done as u64);
        })
        .context("programming failed")?;
    bar.finish_and_clear();

    status(quiet, "verifying...");
    programmer.verify().context("verification failed")?;

    status(quiet, "resetting...");
    programmer.reset().context("reset failed")?;
    programmer.disconnect();
    status(quiet, "complete");

    if let Some(command) = after {
        status(quiet, "running after command...");
        run_hook(command)?;
    }

    Ok(())
}

fn status(quiet: bool, message: &str) {
    if !quiet {
        eprintln!("{} {}", style("::").cyan().bold(), message);
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(1);
    #[allow(clippy::unwrap_used)] // static template string
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:40.cyan/blue}] {pos}/{len} rows {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    bar
}

/// Run an external hook command through the system shell.
fn run_hook(command: &str) -> Result<()> {
    let status = if cfg!(windows) {
        process::Command::new("cmd").args(["/C", command]).status()
    } else {
        process::Command::new("sh").args(["-c", command]).status()
    }
    .with_context(|| format!("failed to run hook command '{command}'"))?;

    anyhow::ensure!(status.success(), "hook command '{command}' exited with {status}");
    Ok(())
}
