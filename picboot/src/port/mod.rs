//! Transport abstraction over a byte-oriented duplex channel.
//!
//! The bootloader protocol only needs four things from its transport: open,
//! close, an unbuffered write, and a blocking read of an exact byte count.
//! Keeping the trait this small lets the codec run over anything that moves
//! ordered bytes; the shipped implementation is a serial port.

pub mod native;

pub use native::NativePort;

use crate::error::Result;

/// A duplex byte channel to the device.
pub trait Port: Send {
    /// Open the channel and discard any stale input.
    fn open(&mut self) -> Result<()>;

    /// Close the channel and release the underlying resource.
    fn close(&mut self);

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Fill `buf` completely, looping over short reads.
    ///
    /// Fails with [`Error::Timeout`](crate::Error::Timeout) when the
    /// per-read deadline expires before the buffer is full.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Channel name for log output.
    fn name(&self) -> &str;
}
