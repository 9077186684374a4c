//! Error types for avrflasher-core
//!
//! [`Error`] is the protocol-level taxonomy returned by every primitive.
//! [`FlashError`] is what the page-level operations and tasks hand back to
//! their caller: the precise cause plus the stable [`ErrorCode`] of the stage
//! that failed.

use alloc::string::String;
use core::fmt;

use crate::session::SessionState;

/// Protocol error - no_std compatible
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No (or not enough) data arrived within the allotted window
    Timeout,
    /// Response frame does not start with the STK500v2 start byte and token
    MalformedHeader {
        /// First header byte (expected 0x1B)
        start: u8,
        /// Fifth header byte (expected 0x0E)
        token: u8,
    },
    /// Response does not correlate to the most recent request
    SequenceMismatch {
        /// Sequence number of the request that was sent last
        expected: u8,
        /// Sequence number echoed by the device
        actual: u8,
    },
    /// Response checksum does not match its contents
    ChecksumMismatch {
        /// Checksum computed over the received header and body
        computed: u8,
        /// Checksum byte received on the wire
        received: u8,
    },
    /// Declared response size exceeds the caller's buffer
    ResponseTooLarge {
        /// Size announced in the response header
        size: usize,
        /// Largest body the caller accepts
        max: usize,
    },
    /// Request would exceed the documented maximum message size
    RequestTooLarge {
        /// Size of the request that was refused
        size: usize,
        /// Largest request the protocol accepts
        max: usize,
    },
    /// The device never answered the handshake (or answered without SYNC/OK)
    SyncFailure,
    /// The device answered a command with a non-OK status or wrong echo
    CommandFailed {
        /// Command that was sent
        command: u8,
        /// First byte of the answer (command echo)
        answer: u8,
        /// Status byte of the answer
        status: u8,
    },
    /// Answer body is shorter or longer than the command defines
    UnexpectedLength {
        /// Command that was sent
        command: u8,
        /// Body length the command defines
        expected: usize,
        /// Body length received
        actual: usize,
    },
    /// Device contents differ from the intended page contents
    VerificationFailed {
        /// Index of the block that differs
        block: usize,
        /// Offset inside the block of the first differing byte
        offset: usize,
        /// Byte the page holds at that position
        expected: u8,
        /// Byte read back from the device
        found: u8,
    },
    /// Operation attempted outside the session state it requires
    StateViolation {
        /// State the operation requires
        required: SessionState,
        /// State the session was in
        actual: SessionState,
    },
    /// Page length is not `block_count * BLOCK_SIZE`
    InvalidPage {
        /// Length of the supplied page
        len: usize,
        /// Number of blocks requested
        block_count: usize,
    },
    /// The underlying transport failed
    Transport(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for response"),
            Self::MalformedHeader { start, token } => write!(
                f,
                "incorrect message header: expected 0x1B and 0x0E, got 0x{:02X} and 0x{:02X}",
                start, token
            ),
            Self::SequenceMismatch { expected, actual } => write!(
                f,
                "incorrect sequence number: expected {}, got {}",
                expected, actual
            ),
            Self::ChecksumMismatch { computed, received } => write!(
                f,
                "message checksum failed: expected 0x{:02X}, got 0x{:02X}",
                computed, received
            ),
            Self::ResponseTooLarge { size, max } => {
                write!(f, "response too large: expected at most {}, got {}", max, size)
            }
            Self::RequestTooLarge { size, max } => {
                write!(f, "request too large: {} bytes (max {})", size, max)
            }
            Self::SyncFailure => write!(f, "failed to synchronize with target"),
            Self::CommandFailed {
                command,
                answer,
                status,
            } => write!(
                f,
                "command 0x{:02X} failed: answer 0x{:02X}, status 0x{:02X}",
                command, answer, status
            ),
            Self::UnexpectedLength {
                command,
                expected,
                actual,
            } => write!(
                f,
                "answer to command 0x{:02X} has {} bytes, expected {}",
                command, actual, expected
            ),
            Self::VerificationFailed {
                block,
                offset,
                expected,
                found,
            } => write!(
                f,
                "verification failed in block {} at offset {}: expected 0x{:02X}, found 0x{:02X}",
                block, offset, expected, found
            ),
            Self::StateViolation { required, actual } => write!(
                f,
                "operation requires session state {:?}, but session is {:?}",
                required, actual
            ),
            Self::InvalidPage { len, block_count } => write!(
                f,
                "page of {} bytes does not hold exactly {} blocks",
                len, block_count
            ),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

/// Stable numeric codes surfaced to callers of the flashing tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Generic failure (invalid input, transport failure during reset)
    Failure = -1,
    /// A block write was not acknowledged
    FlashWriteFailure = 100,
    /// Programming mode could not be entered (or left)
    ProgrammingModeFailure = 101,
    /// The handshake with the target failed
    SyncFailure = 102,
    /// A block read was not answered correctly
    ReadFailure = 103,
    /// Read-back contents differ from the page
    VerificationFailure = 104,
    /// The target did not accept a load-address command
    LoadAddressFailure = 105,
}

impl ErrorCode {
    /// Numeric value of a successful task
    pub const SUCCESS: i32 = 0;

    /// Numeric value of this code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Short human readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::FlashWriteFailure => "flash write failure",
            Self::ProgrammingModeFailure => "programming mode failure",
            Self::SyncFailure => "sync failure",
            Self::ReadFailure => "read failure",
            Self::VerificationFailure => "verification failure",
            Self::LoadAddressFailure => "load address failure",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Failure of a page-level operation or task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashError {
    /// Stage that failed
    pub code: ErrorCode,
    /// Block being transferred when the failure happened
    pub block: Option<usize>,
    /// Underlying protocol error
    pub cause: Error,
}

impl FlashError {
    /// Failure outside of any particular block
    pub fn new(code: ErrorCode, cause: Error) -> Self {
        Self {
            code,
            block: None,
            cause,
        }
    }

    /// Failure while transferring `block`
    pub fn at_block(code: ErrorCode, block: usize, cause: Error) -> Self {
        Self {
            code,
            block: Some(block),
            cause,
        }
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block {
            Some(block) => write!(f, "{} at block {}: {}", self.code, block, self.cause),
            None => write!(f, "{}: {}", self.code, self.cause),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FlashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Numeric status of a task result: `0` on success, the error code otherwise
pub fn status_code(result: &core::result::Result<(), FlashError>) -> i32 {
    match result {
        Ok(()) => ErrorCode::SUCCESS,
        Err(e) => e.code.code(),
    }
}
