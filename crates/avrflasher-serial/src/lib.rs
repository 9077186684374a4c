//! avrflasher-serial - Serial port transport for avrflasher
//!
//! Implements [`avrflasher_core::Transport`] on top of the `serialport`
//! crate. The target's reset pin is expected to be wired (usually through a
//! 100 nF capacitor, as on Arduino boards) to DTR or RTS of the USB-UART
//! bridge.
//!
//! # Example
//!
//! ```no_run
//! use avrflasher_core::{Session, Timing};
//! use avrflasher_serial::{ResetLine, SerialOptions, SerialTransport};
//!
//! let options = SerialOptions::new("/dev/ttyUSB0");
//! let transport = SerialTransport::open(&options)?;
//! let mut session = Session::stk500v2(transport, options.timing);
//! session.reset()?;
//! session.sync()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod transport;

pub use error::{Result, SerialError};
pub use transport::{ResetLine, SerialOptions, SerialTransport};
