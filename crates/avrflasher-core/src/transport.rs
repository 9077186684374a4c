//! Transport abstraction
//!
//! The transport is the only I/O boundary of the engine: a half-duplex byte
//! channel to the target plus control over its reset line. Waiting for data
//! is expressed as a single bounded primitive ([`Transport::wait_for`]) so
//! protocol code never sleeps or polls on its own.

use core::time::Duration;

use crate::error::Result;

/// Logic level driven on the target's reset line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Reset asserted (AVR reset is active low)
    Low,
    /// Reset released
    High,
}

/// One step of a reset pulse: drive `level`, then hold it for `hold`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetStep {
    /// Level to drive
    pub level: Level,
    /// Time to hold the level before the next step
    pub hold: Duration,
}

impl ResetStep {
    /// Create a reset step
    pub const fn new(level: Level, hold: Duration) -> Self {
        Self { level, hold }
    }
}

/// Byte channel to the target device
pub trait Transport {
    /// Write all of `data`, returning the number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Number of received bytes currently buffered
    fn bytes_buffered(&mut self) -> Result<usize>;

    /// Block until at least `count` bytes are buffered or `timeout` elapses
    ///
    /// Returns the number of buffered bytes, which is less than `count` on
    /// timeout.
    fn wait_for(&mut self, count: usize, timeout: Duration) -> Result<usize>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    ///
    /// Returns the number of bytes read; fewer than `buf.len()` means the
    /// deadline passed first.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drop any buffered input
    fn discard_input(&mut self) -> Result<()>;

    /// Drive the reset line through `steps`
    fn pulse_reset(&mut self, steps: &[ResetStep]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn bytes_buffered(&mut self) -> Result<usize> {
        (**self).bytes_buffered()
    }

    fn wait_for(&mut self, count: usize, timeout: Duration) -> Result<usize> {
        (**self).wait_for(count, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn pulse_reset(&mut self, steps: &[ResetStep]) -> Result<()> {
        (**self).pulse_reset(steps)
    }
}

impl<T: Transport + ?Sized> Transport for alloc::boxed::Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn bytes_buffered(&mut self) -> Result<usize> {
        (**self).bytes_buffered()
    }

    fn wait_for(&mut self, count: usize, timeout: Duration) -> Result<usize> {
        (**self).wait_for(count, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn pulse_reset(&mut self, steps: &[ResetStep]) -> Result<()> {
        (**self).pulse_reset(steps)
    }
}
