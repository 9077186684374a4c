//! avrflasher-core - Bootloader protocol engine for AVR flash programming
//!
//! This crate implements the host side of the STK500v2 bootloader protocol
//! and of its older single-byte-framed predecessor (STK500, as spoken by the
//! Arduino bootloaders). It is `no_std` compatible (it needs `alloc`) so the
//! same engine can run on a host PC or on a microcontroller acting as an
//! in-circuit programmer.
//!
//! # Layers
//!
//! ```text
//! tasks        write_task / read_task (reset, sync, enter, transfer, leave)
//!   │
//! transfer     write_page / read_and_verify_page (block cursor, verify)
//!   │
//! session      Session<T, P>: state machine + protocol primitives
//!   │
//! protocol     Stk500v2 / Stk500 (sequence counter, command frames)
//!   │
//! matcher      await_v2_response / await_legacy_response
//! codec        encode_v2 / decode_v2 / encode_legacy
//!   │
//! transport    Transport trait (implemented by serial port, simulator, ...)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use avrflasher_core::{tasks, NoProgress, Stk500v2, Session, Timing, BLOCK_SIZE};
//!
//! let mut session = Session::new(transport, Stk500v2::new(Timing::default()));
//! let page = vec![0xFF; 4 * BLOCK_SIZE];
//! tasks::stk500v2_write_task(&mut session, &page, 4, &mut NoProgress)?;
//! tasks::stk500v2_read_task(&mut session, &page, 4, &mut NoProgress)?;
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod address;
pub mod codec;
pub mod error;
pub mod matcher;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod tasks;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use address::{BlockAddress, BytePairAddress, WordAddress};
pub use error::{Error, ErrorCode, FlashError, Result};
pub use profile::TargetProfile;
pub use protocol::{Protocol, Stk500, Stk500v2, Timing};
pub use session::{LegacySession, Session, SessionState, Stk500v2Session};
pub use transfer::{NoProgress, TransferKind, TransferProgress};
pub use transport::{Level, ResetStep, Transport};

/// Number of bytes transferred per block write/read request
pub const BLOCK_SIZE: usize = 256;
