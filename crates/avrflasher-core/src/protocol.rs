//! Protocol variants
//!
//! The page transfer engine and the session are written once against the
//! [`Protocol`] trait. Two implementations exist:
//!
//! - [`Stk500v2`]: framed messages with sequence numbers and checksums
//! - [`Stk500`]: the older `SYNC`/`OK` framing used by Arduino bootloaders
//!
//! Each primitive sends exactly one request and awaits exactly one response.

use alloc::format;
use alloc::vec::Vec;
use core::time::Duration;

use crate::address::{BlockAddress, BytePairAddress, WordAddress};
use crate::codec::{encode_legacy, encode_v2, stk500, v2};
use crate::error::{Error, Result};
use crate::matcher::{await_legacy_response, await_v2_response};
use crate::profile::TargetProfile;
use crate::transport::Transport;

/// Response timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// How long to wait for a response to arrive
    pub response: Duration,
    /// How often a polling transport checks its receive buffer
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            response: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// A bootloader protocol variant
pub trait Protocol {
    /// Address representation used by `load_address`
    type Address: BlockAddress;

    /// Variant name for logs
    const NAME: &'static str;

    /// Handshake attempts before giving up
    const SYNC_ATTEMPTS: u32;

    /// Address of the first flash block
    fn origin(&self) -> Self::Address;

    /// Send `command ∥ params`, await the acknowledged answer and return its
    /// payload (`reply_len` bytes of data expected after the acknowledgement)
    fn execute<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        command: u8,
        params: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>>;

    /// One handshake attempt
    fn sign_on<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()>;

    /// Put the target into programming mode
    fn enter_programming_mode<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
    ) -> Result<()>;

    /// Take the target out of programming mode
    fn leave_programming_mode<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
    ) -> Result<()>;

    /// Set the device pointer for the next block transfer
    fn load_address<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        address: Self::Address,
    ) -> Result<()>;

    /// Program one block at the loaded address
    fn write_block<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
        block: &[u8],
    ) -> Result<()>;

    /// Read one block of `len` bytes from the loaded address
    fn read_block<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
        len: usize,
    ) -> Result<Vec<u8>>;
}

fn send<T: Transport + ?Sized>(transport: &mut T, frame: &[u8]) -> Result<()> {
    let written = transport.write(frame)?;
    if written != frame.len() {
        return Err(Error::Transport(format!(
            "short write: {} of {} bytes",
            written,
            frame.len()
        )));
    }
    Ok(())
}

// ---- STK500v2 ----

/// Largest sign-on answer accepted (status plus "AVRISP_2")
const SIGN_ON_REPLY_MAX: usize = 11;

/// STK500v2 protocol state
///
/// Owns the sequence counter, which is bumped once per request sent.
#[derive(Debug, Clone)]
pub struct Stk500v2 {
    timing: Timing,
    sequence: u8,
}

impl Stk500v2 {
    /// Create a new protocol instance with the sequence counter at zero
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            sequence: 0,
        }
    }

    /// Sequence number the next request will carry
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Send one message and return the validated response body
    ///
    /// `max_reply` bounds the size of the body that will be accepted.
    pub fn transact<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        body: &[u8],
        data: &[u8],
        max_reply: usize,
    ) -> Result<Vec<u8>> {
        let size = body.len() + data.len();
        if size > v2::MAX_BODY {
            return Err(Error::RequestTooLarge {
                size,
                max: v2::MAX_BODY,
            });
        }

        let frame = encode_v2(self.sequence, body, data)?;
        self.sequence = self.sequence.wrapping_add(1);
        log::trace!("stk500v2: -> {:02X?}", frame);
        send(transport, &frame)?;

        await_v2_response(transport, self.sequence, max_reply, self.timing.response)
    }

    fn check_answer(command: u8, answer: &[u8]) -> Result<()> {
        match answer {
            [echo, status, ..] if *echo == command && *status == v2::STATUS_CMD_OK => Ok(()),
            [echo, status, ..] => Err(Error::CommandFailed {
                command,
                answer: *echo,
                status: *status,
            }),
            _ => Err(Error::UnexpectedLength {
                command,
                expected: 2,
                actual: answer.len(),
            }),
        }
    }

    fn execute_with_data<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        body: &[u8],
        data: &[u8],
        max_reply: usize,
    ) -> Result<Vec<u8>> {
        let command = body[0];
        let answer = self.transact(transport, body, data, max_reply)?;
        Self::check_answer(command, &answer)?;
        Ok(answer)
    }
}

impl Protocol for Stk500v2 {
    type Address = WordAddress;

    const NAME: &'static str = "stk500v2";
    const SYNC_ATTEMPTS: u32 = 5;

    fn origin(&self) -> WordAddress {
        WordAddress::ORIGIN
    }

    fn execute<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        command: u8,
        params: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(params.len() + 1);
        body.push(command);
        body.extend_from_slice(params);
        let answer = self.execute_with_data(transport, &body, &[], reply_len + 2)?;
        Ok(answer[2..].to_vec())
    }

    fn sign_on<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        let answer = self.transact(transport, &[v2::CMD_SIGN_ON], &[], SIGN_ON_REPLY_MAX)?;
        if answer.len() > 3 {
            let name = &answer[3..];
            log::debug!(
                "stk500v2: signed on as \"{}\"",
                core::str::from_utf8(name).unwrap_or("(invalid)")
            );
        }
        Ok(())
    }

    fn enter_programming_mode<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
    ) -> Result<()> {
        self.execute(
            transport,
            v2::CMD_ENTER_PROGMODE_ISP,
            &profile.enter_progmode,
            0,
        )?;
        Ok(())
    }

    fn leave_programming_mode<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
    ) -> Result<()> {
        self.execute(
            transport,
            v2::CMD_LEAVE_PROGMODE_ISP,
            &profile.leave_progmode,
            0,
        )?;
        Ok(())
    }

    fn load_address<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        address: WordAddress,
    ) -> Result<()> {
        self.execute(transport, v2::CMD_LOAD_ADDRESS, &address.to_be_bytes(), 0)?;
        Ok(())
    }

    fn write_block<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
        block: &[u8],
    ) -> Result<()> {
        let [hi, lo] = (block.len() as u16).to_be_bytes();
        let mut head = Vec::with_capacity(3 + profile.program_flash.len());
        head.extend_from_slice(&[v2::CMD_PROGRAM_FLASH_ISP, hi, lo]);
        head.extend_from_slice(&profile.program_flash);
        self.execute_with_data(transport, &head, block, 2)?;
        Ok(())
    }

    fn read_block<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
        len: usize,
    ) -> Result<Vec<u8>> {
        let [hi, lo] = (len as u16).to_be_bytes();
        let body = [v2::CMD_READ_FLASH_ISP, hi, lo, profile.read_flash_command];
        // Answer: echo, status, data, status
        let answer = self.execute_with_data(transport, &body, &[], len + 3)?;
        if answer.len() != len + 3 {
            return Err(Error::UnexpectedLength {
                command: v2::CMD_READ_FLASH_ISP,
                expected: len + 3,
                actual: answer.len(),
            });
        }
        let trailer = answer[len + 2];
        if trailer != v2::STATUS_CMD_OK {
            return Err(Error::CommandFailed {
                command: v2::CMD_READ_FLASH_ISP,
                answer: answer[0],
                status: trailer,
            });
        }
        Ok(answer[2..len + 2].to_vec())
    }
}

// ---- STK500 (legacy) ----

/// Legacy STK500 protocol
///
/// No sequence numbers or checksums: every answer is `STK_INSYNC ∥ data ∥
/// STK_OK` with a length known in advance.
#[derive(Debug, Clone)]
pub struct Stk500 {
    timing: Timing,
}

impl Stk500 {
    /// Create a new protocol instance
    pub fn new(timing: Timing) -> Self {
        Self { timing }
    }

    /// Write `frame` and await an answer carrying `reply_len` data bytes
    fn exchange<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        frame: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>> {
        log::trace!("stk500: -> {:02X?}", frame);
        send(transport, frame)?;
        await_legacy_response(transport, reply_len + 2, self.timing.response)
    }

    /// Page access parameters: size (big endian) and memory type
    fn page_params(len: usize) -> [u8; 3] {
        let [hi, lo] = (len as u16).to_be_bytes();
        [hi, lo, stk500::MEMTYPE_FLASH]
    }
}

impl Protocol for Stk500 {
    type Address = BytePairAddress;

    const NAME: &'static str = "stk500";
    const SYNC_ATTEMPTS: u32 = 1;

    fn origin(&self) -> BytePairAddress {
        BytePairAddress::ORIGIN
    }

    fn execute<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        command: u8,
        params: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>> {
        // command + params + CRC_EOP must fit the bootloader's request buffer
        let mut bounded: heapless::Vec<u8, { stk500::MAX_REQUEST - 2 }> = heapless::Vec::new();
        bounded
            .extend_from_slice(params)
            .map_err(|_| Error::RequestTooLarge {
                size: params.len() + 2,
                max: stk500::MAX_REQUEST,
            })?;
        let frame = encode_legacy(command, &bounded);
        self.exchange(transport, &frame, reply_len)
    }

    fn sign_on<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.execute(transport, stk500::STK_GET_SYNC, &[], 0)?;
        Ok(())
    }

    fn enter_programming_mode<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        profile: &TargetProfile,
    ) -> Result<()> {
        log::debug!("stk500: setting device parameters");
        self.execute(transport, stk500::STK_SET_DEVICE, &profile.device_parameters, 0)?;
        log::debug!("stk500: setting extended device parameters");
        self.execute(
            transport,
            stk500::STK_SET_DEVICE_EXT,
            &profile.extended_parameters,
            0,
        )?;
        self.execute(transport, stk500::STK_ENTER_PROGMODE, &[], 0)?;
        Ok(())
    }

    fn leave_programming_mode<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        _profile: &TargetProfile,
    ) -> Result<()> {
        self.execute(transport, stk500::STK_LEAVE_PROGMODE, &[], 0)?;
        Ok(())
    }

    fn load_address<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        address: BytePairAddress,
    ) -> Result<()> {
        self.execute(transport, stk500::STK_LOAD_ADDRESS, &address.to_params(), 0)?;
        Ok(())
    }

    fn write_block<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        _profile: &TargetProfile,
        block: &[u8],
    ) -> Result<()> {
        let mut params = Vec::with_capacity(3 + block.len());
        params.extend_from_slice(&Self::page_params(block.len()));
        params.extend_from_slice(block);
        let frame = encode_legacy(stk500::STK_PROG_PAGE, &params);
        self.exchange(transport, &frame, 0)?;
        Ok(())
    }

    fn read_block<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        _profile: &TargetProfile,
        len: usize,
    ) -> Result<Vec<u8>> {
        self.execute(transport, stk500::STK_READ_PAGE, &Self::page_params(len), len)
    }
}
