//! Message codec for the STK500v2 and STK500 (legacy) bootloader protocols
//!
//! Encoding is pure: it turns a command plus its parameters into wire bytes.
//! Decoding of responses interleaves with timed reads and lives in
//! [`crate::matcher`]; [`decode_v2`] is the same validation applied to a
//! complete in-memory frame.
//!
//! STK500v2 frame layout:
//!
//! ```text
//! +-------+----------+-------------+-------+--------------+----------+
//! | 0x1B  | sequence | size (BE16) | 0x0E  | body (size)  | checksum |
//! +-------+----------+-------------+-------+--------------+----------+
//! ```
//!
//! The checksum is the XOR of every preceding byte.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// STK500v2 framing and command constants
pub mod v2 {
    /// Start-of-message byte
    pub const MESSAGE_START: u8 = 0x1B;
    /// Token byte closing the header
    pub const TOKEN: u8 = 0x0E;
    /// Header size in bytes (start, sequence, size hi, size lo, token)
    pub const HEADER_SIZE: usize = 5;
    /// Largest body the bootloader accepts (AVR068)
    pub const MAX_BODY: usize = 275;

    /// Sign on / handshake
    pub const CMD_SIGN_ON: u8 = 0x01;
    /// Load the address for the next flash access
    pub const CMD_LOAD_ADDRESS: u8 = 0x06;
    /// Enter ISP programming mode
    pub const CMD_ENTER_PROGMODE_ISP: u8 = 0x10;
    /// Leave ISP programming mode
    pub const CMD_LEAVE_PROGMODE_ISP: u8 = 0x11;
    /// Program a block of flash
    pub const CMD_PROGRAM_FLASH_ISP: u8 = 0x13;
    /// Read a block of flash
    pub const CMD_READ_FLASH_ISP: u8 = 0x14;

    /// Command succeeded
    pub const STATUS_CMD_OK: u8 = 0x00;
    /// Command failed
    pub const STATUS_CMD_FAILED: u8 = 0xC0;

    /// Bit 31 of a load-address request selects extended (>64 KiW) addressing
    pub const EXTENDED_ADDRESS: u32 = 0x8000_0000;
}

/// STK500 (version 1) constants used by the legacy variant
pub mod stk500 {
    /// Response prefix: request was understood
    pub const STK_INSYNC: u8 = 0x14;
    /// Response suffix: request was executed
    pub const STK_OK: u8 = 0x10;
    /// Request terminator
    pub const CRC_EOP: u8 = 0x20;

    /// Handshake
    pub const STK_GET_SYNC: u8 = 0x30;
    /// Set device programming parameters
    pub const STK_SET_DEVICE: u8 = 0x42;
    /// Set extended device programming parameters
    pub const STK_SET_DEVICE_EXT: u8 = 0x45;
    /// Enter programming mode
    pub const STK_ENTER_PROGMODE: u8 = 0x50;
    /// Leave programming mode
    pub const STK_LEAVE_PROGMODE: u8 = 0x51;
    /// Load word address (low byte first)
    pub const STK_LOAD_ADDRESS: u8 = 0x55;
    /// Program a page
    pub const STK_PROG_PAGE: u8 = 0x64;
    /// Read a page
    pub const STK_READ_PAGE: u8 = 0x74;

    /// Memory type selector for flash
    pub const MEMTYPE_FLASH: u8 = b'F';

    /// Largest legacy request (command, parameters and terminator)
    pub const MAX_REQUEST: usize = 32;
}

/// XOR of all bytes
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Decoded STK500v2 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sequence number
    pub sequence: u8,
    /// Number of body bytes that follow
    pub size: u16,
}

impl Header {
    /// Build a header for a body of `size` bytes
    pub fn new(sequence: u8, size: u16) -> Self {
        Self { sequence, size }
    }

    /// Parse and structurally validate raw header bytes
    pub fn parse(bytes: &[u8; v2::HEADER_SIZE]) -> Result<Self> {
        if bytes[0] != v2::MESSAGE_START || bytes[4] != v2::TOKEN {
            return Err(Error::MalformedHeader {
                start: bytes[0],
                token: bytes[4],
            });
        }
        Ok(Self {
            sequence: bytes[1],
            size: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }

    /// Wire representation
    pub fn to_bytes(self) -> [u8; v2::HEADER_SIZE] {
        let [hi, lo] = self.size.to_be_bytes();
        [v2::MESSAGE_START, self.sequence, hi, lo, v2::TOKEN]
    }
}

/// Encode an STK500v2 message
///
/// `body` holds the command byte and its parameters, `data` an optional
/// payload appended after them (block writes). The size field counts both.
pub fn encode_v2(sequence: u8, body: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let total = body.len() + data.len();
    let size = u16::try_from(total).map_err(|_| Error::RequestTooLarge {
        size: total,
        max: u16::MAX as usize,
    })?;

    let header = Header::new(sequence, size).to_bytes();
    let mut frame = Vec::with_capacity(v2::HEADER_SIZE + total + 1);
    frame.extend_from_slice(&header);
    frame.extend_from_slice(body);
    frame.extend_from_slice(data);
    frame.push(checksum(&frame));
    Ok(frame)
}

/// A complete, validated STK500v2 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sequence number
    pub sequence: u8,
    /// Body bytes (command/answer followed by any data)
    pub body: Vec<u8>,
}

/// Decode a complete STK500v2 frame held in memory
///
/// Validation order matches the response matcher: header structure, then
/// size, then checksum. Missing bytes are reported as [`Error::Timeout`],
/// the same way the matcher reports a frame that never fully arrives.
/// Trailing bytes after the checksum are rejected.
pub fn decode_v2(bytes: &[u8]) -> Result<Frame> {
    let header_bytes: &[u8; v2::HEADER_SIZE] = bytes
        .get(..v2::HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or(Error::Timeout)?;
    let header = Header::parse(header_bytes)?;

    let size = header.size as usize;
    let frame_len = v2::HEADER_SIZE + size + 1;
    if bytes.len() < frame_len {
        return Err(Error::Timeout);
    }
    if bytes.len() > frame_len {
        return Err(Error::ResponseTooLarge {
            size: bytes.len() - v2::HEADER_SIZE - 1,
            max: size,
        });
    }

    let computed = checksum(&bytes[..frame_len - 1]);
    let received = bytes[frame_len - 1];
    if computed != received {
        return Err(Error::ChecksumMismatch { computed, received });
    }

    Ok(Frame {
        sequence: header.sequence,
        body: bytes[v2::HEADER_SIZE..frame_len - 1].to_vec(),
    })
}

/// Encode a legacy STK500 request: `command ∥ params ∥ CRC_EOP`
pub fn encode_legacy(command: u8, params: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(params.len() + 2);
    bytes.push(command);
    bytes.extend_from_slice(params);
    bytes.push(stk500::CRC_EOP);
    bytes
}
