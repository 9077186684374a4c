//! Serial port transport

use std::io::{Read, Write};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use avrflasher_core::{Level, ResetStep, Timing, Transport};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::{Result, SerialError};

/// Default baud rate of the stock bootloaders
pub const DEFAULT_BAUD: u32 = 115200;

/// Modem control line wired to the target's reset pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetLine {
    /// Data Terminal Ready
    #[default]
    Dtr,
    /// Request To Send
    Rts,
    /// Reset is not wired; the target must be reset by hand
    None,
}

impl FromStr for ResetLine {
    type Err = SerialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dtr" => Ok(Self::Dtr),
            "rts" => Ok(Self::Rts),
            "none" => Ok(Self::None),
            _ => Err(SerialError::InvalidParameter(format!(
                "unknown reset line '{}', use dtr, rts or none",
                s
            ))),
        }
    }
}

/// Options for opening a serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialOptions {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub device: String,
    /// Baud rate
    pub baud: u32,
    /// Line driving reset
    pub reset: ResetLine,
    /// Response and poll timing
    pub timing: Timing,
}

impl SerialOptions {
    /// Options with default baud rate, DTR reset and default timing
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud: DEFAULT_BAUD,
            reset: ResetLine::default(),
            timing: Timing::default(),
        }
    }
}

/// Serial port transport
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    reset: ResetLine,
    poll_interval: Duration,
}

impl SerialTransport {
    /// Open a serial port (8N1, no flow control)
    pub fn open(options: &SerialOptions) -> Result<Self> {
        let port = serialport::new(&options.device, options.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(options.timing.response)
            .open()?;

        log::info!(
            "Opened serial port {} at {} baud",
            options.device,
            options.baud
        );

        Ok(Self {
            port,
            reset: options.reset,
            poll_interval: options.timing.poll_interval,
        })
    }

    fn drive_reset(&mut self, level: Level) -> Result<()> {
        // The bridge inverts: an asserted control line pulls reset low
        let asserted = level == Level::Low;
        match self.reset {
            ResetLine::Dtr => self.port.write_data_terminal_ready(asserted)?,
            ResetLine::Rts => self.port.write_request_to_send(asserted)?,
            ResetLine::None => {}
        }
        Ok(())
    }

    fn read_until(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port.set_timeout(remaining)?;
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn poll_buffered(&mut self, count: usize, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            let buffered = self.port.bytes_to_read()? as usize;
            if buffered >= count {
                return Ok(buffered);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::trace!("serial: {} of {} bytes after timeout", buffered, count);
                return Ok(buffered);
            }
            thread::sleep(self.poll_interval.min(remaining));
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> avrflasher_core::Result<usize> {
        self.port.write_all(data).map_err(SerialError::from)?;
        self.port.flush().map_err(SerialError::from)?;
        Ok(data.len())
    }

    fn bytes_buffered(&mut self) -> avrflasher_core::Result<usize> {
        let n = self.port.bytes_to_read().map_err(SerialError::from)?;
        Ok(n as usize)
    }

    fn wait_for(&mut self, count: usize, timeout: Duration) -> avrflasher_core::Result<usize> {
        Ok(self.poll_buffered(count, timeout)?)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> avrflasher_core::Result<usize> {
        Ok(self.read_until(buf, timeout)?)
    }

    fn discard_input(&mut self) -> avrflasher_core::Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(SerialError::from)?;
        Ok(())
    }

    fn pulse_reset(&mut self, steps: &[ResetStep]) -> avrflasher_core::Result<()> {
        if self.reset == ResetLine::None {
            log::warn!("Reset line not connected, reset the target manually");
        }
        for step in steps {
            self.drive_reset(step.level)?;
            thread::sleep(step.hold);
        }
        Ok(())
    }
}
