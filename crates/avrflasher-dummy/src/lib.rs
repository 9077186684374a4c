//! avrflasher-dummy - Simulated AVR bootloader for testing
//!
//! [`SimulatedTarget`] emulates a microcontroller running an STK500v2 or a
//! legacy STK500 bootloader, with its flash held in memory. It implements
//! [`Transport`] directly, so a [`Session`](avrflasher_core::Session) can
//! talk to it exactly as it would to a serial port. Every decoded request
//! is recorded as a [`DeviceEvent`], and [`Fault`]s can be injected to
//! exercise the host's error paths.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use avrflasher_core::codec::{decode_v2, encode_v2, stk500, v2};
use avrflasher_core::{BytePairAddress, ResetStep, Result, Transport};

/// `STK_NOSYNC`: request was not understood
const STK_NOSYNC: u8 = 0x15;
/// `STK_FAILED`: request was understood but could not be executed
const STK_FAILED: u8 = 0x11;
/// `STATUS_CMD_UNKNOWN`
const STATUS_CMD_UNKNOWN: u8 = 0xC9;

/// Bootloader protocol spoken by the simulated target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DummyProtocol {
    /// STK500v2 (framed, sequence numbers, checksums)
    Stk500v2,
    /// Legacy STK500 (Arduino style)
    Stk500,
}

/// Configuration for the simulated target
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Protocol the bootloader speaks
    pub protocol: DummyProtocol,
    /// Flash size in bytes
    pub size: usize,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            protocol: DummyProtocol::Stk500v2,
            size: 32 * 1024, // ATmega328P
        }
    }
}

/// Injected misbehaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never answer anything
    Silent,
    /// Corrupt the integrity of the `nth` response (1-based): the checksum
    /// byte for STK500v2, the trailing `STK_OK` for the legacy protocol
    CorruptChecksum {
        /// Response to corrupt
        nth: usize,
    },
    /// Answer every STK500v2 request with the wrong sequence number
    WrongSequence,
    /// Invert the flash byte at this offset when it is read back
    FlipOnRead {
        /// Byte offset in flash
        offset: usize,
    },
}

/// Request observed by the simulated target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Reset line pulsed
    Reset,
    /// `CMD_SIGN_ON` or `STK_GET_SYNC`
    Sync,
    /// `STK_SET_DEVICE` with its parameter block
    SetDevice(Vec<u8>),
    /// `STK_SET_DEVICE_EXT` with its parameter block
    SetDeviceExt(Vec<u8>),
    /// Programming mode entered
    EnterProgmode,
    /// Programming mode left
    LeaveProgmode,
    /// Address loaded, as sent on the wire
    LoadAddress(u32),
    /// Block programmed at the loaded address
    ProgramPage {
        /// Loaded address
        word: u32,
        /// Length in bytes
        len: usize,
    },
    /// Block read from the loaded address
    ReadPage {
        /// Loaded address
        word: u32,
        /// Length in bytes
        len: usize,
    },
    /// A request that could not be decoded or is not supported
    Rejected(Vec<u8>),
}

/// In-memory AVR bootloader
pub struct SimulatedTarget {
    config: DummyConfig,
    flash: Vec<u8>,
    rx: VecDeque<u8>,
    word_address: u32,
    programming: bool,
    events: Vec<DeviceEvent>,
    faults: Vec<Fault>,
    responses: usize,
}

impl SimulatedTarget {
    /// Create a target with erased (0xFF) flash
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![0xFF; config.size];
        Self {
            config,
            flash,
            rx: VecDeque::new(),
            word_address: 0,
            programming: false,
            events: Vec::new(),
            faults: Vec::new(),
            responses: 0,
        }
    }

    /// STK500v2 target with the default flash size
    pub fn stk500v2() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Legacy STK500 target with the default flash size
    pub fn stk500() -> Self {
        Self::new(DummyConfig {
            protocol: DummyProtocol::Stk500,
            ..DummyConfig::default()
        })
    }

    /// Add a fault
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Flash contents
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Every request observed so far
    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    /// Whether the bootloader is in programming mode
    pub fn in_programming_mode(&self) -> bool {
        self.programming
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn respond(&mut self, mut reply: Vec<u8>) {
        if self.has_fault(Fault::Silent) {
            return;
        }
        self.responses += 1;
        if self.has_fault(Fault::CorruptChecksum { nth: self.responses }) {
            if let Some(last) = reply.last_mut() {
                log::debug!("dummy: corrupting response {}", self.responses);
                *last ^= 0xFF;
            }
        }
        self.rx.extend(reply);
    }

    fn byte_offset(&self) -> usize {
        match self.config.protocol {
            DummyProtocol::Stk500v2 => self.word_address as usize * 2,
            DummyProtocol::Stk500 => BytePairAddress::from(self.word_address as u16).byte_offset(),
        }
    }

    /// Program `data` at the current address; false if out of range
    fn program(&mut self, data: &[u8]) -> bool {
        let start = self.byte_offset();
        let len = data.len();
        self.events.push(DeviceEvent::ProgramPage {
            word: self.word_address,
            len,
        });
        if !self.programming || start + len > self.flash.len() {
            log::warn!("dummy: refusing write of {} bytes at 0x{:X}", len, start);
            return false;
        }
        self.flash[start..start + len].copy_from_slice(data);
        log::debug!("dummy: wrote {} bytes at 0x{:X}", len, start);
        true
    }

    /// Read `len` bytes at the current address; None if out of range
    fn read_flash(&mut self, len: usize) -> Option<Vec<u8>> {
        let start = self.byte_offset();
        self.events.push(DeviceEvent::ReadPage {
            word: self.word_address,
            len,
        });
        if !self.programming || start + len > self.flash.len() {
            return None;
        }
        let mut data = self.flash[start..start + len].to_vec();
        for fault in &self.faults {
            if let Fault::FlipOnRead { offset } = *fault {
                if (start..start + len).contains(&offset) {
                    data[offset - start] ^= 0xFF;
                }
            }
        }
        Some(data)
    }

    fn handle_v2(&mut self, request: &[u8]) {
        let frame = match decode_v2(request) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dummy: dropping bad frame: {}", e);
                self.events.push(DeviceEvent::Rejected(request.to_vec()));
                return;
            }
        };
        let Some(&command) = frame.body.first() else {
            self.events.push(DeviceEvent::Rejected(request.to_vec()));
            return;
        };
        let body = &frame.body;

        let answer = match command {
            v2::CMD_SIGN_ON => {
                self.events.push(DeviceEvent::Sync);
                let mut answer = vec![command, v2::STATUS_CMD_OK, 8];
                answer.extend_from_slice(b"AVRISP_2");
                answer
            }
            v2::CMD_ENTER_PROGMODE_ISP => {
                self.events.push(DeviceEvent::EnterProgmode);
                self.programming = true;
                vec![command, v2::STATUS_CMD_OK]
            }
            v2::CMD_LEAVE_PROGMODE_ISP => {
                self.events.push(DeviceEvent::LeaveProgmode);
                self.programming = false;
                vec![command, v2::STATUS_CMD_OK]
            }
            v2::CMD_LOAD_ADDRESS if body.len() == 5 => {
                let raw = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
                self.word_address = raw & !v2::EXTENDED_ADDRESS;
                self.events.push(DeviceEvent::LoadAddress(self.word_address));
                vec![command, v2::STATUS_CMD_OK]
            }
            v2::CMD_PROGRAM_FLASH_ISP if body.len() >= 10 => {
                let len = u16::from_be_bytes([body[1], body[2]]) as usize;
                let data = &body[10..];
                let ok = data.len() == len && self.program(data);
                let status = if ok {
                    v2::STATUS_CMD_OK
                } else {
                    v2::STATUS_CMD_FAILED
                };
                vec![command, status]
            }
            v2::CMD_READ_FLASH_ISP if body.len() == 4 => {
                let len = u16::from_be_bytes([body[1], body[2]]) as usize;
                match self.read_flash(len) {
                    Some(data) => {
                        let mut answer = vec![command, v2::STATUS_CMD_OK];
                        answer.extend_from_slice(&data);
                        answer.push(v2::STATUS_CMD_OK);
                        answer
                    }
                    None => vec![command, v2::STATUS_CMD_FAILED],
                }
            }
            _ => {
                self.events.push(DeviceEvent::Rejected(body.clone()));
                vec![command, STATUS_CMD_UNKNOWN]
            }
        };

        let sequence = if self.has_fault(Fault::WrongSequence) {
            frame.sequence.wrapping_add(1)
        } else {
            frame.sequence
        };
        match encode_v2(sequence, &answer, &[]) {
            Ok(reply) => self.respond(reply),
            Err(e) => log::error!("dummy: cannot encode answer: {}", e),
        }
    }

    fn handle_legacy(&mut self, request: &[u8]) {
        if request.len() < 2 || request[request.len() - 1] != stk500::CRC_EOP {
            self.events.push(DeviceEvent::Rejected(request.to_vec()));
            self.respond(vec![STK_NOSYNC]);
            return;
        }
        let command = request[0];
        let params = &request[1..request.len() - 1];

        let payload = match command {
            stk500::STK_GET_SYNC => {
                self.events.push(DeviceEvent::Sync);
                Some(Vec::new())
            }
            stk500::STK_SET_DEVICE => {
                self.events.push(DeviceEvent::SetDevice(params.to_vec()));
                Some(Vec::new())
            }
            stk500::STK_SET_DEVICE_EXT => {
                self.events.push(DeviceEvent::SetDeviceExt(params.to_vec()));
                Some(Vec::new())
            }
            stk500::STK_ENTER_PROGMODE => {
                self.events.push(DeviceEvent::EnterProgmode);
                self.programming = true;
                Some(Vec::new())
            }
            stk500::STK_LEAVE_PROGMODE => {
                self.events.push(DeviceEvent::LeaveProgmode);
                self.programming = false;
                Some(Vec::new())
            }
            stk500::STK_LOAD_ADDRESS if params.len() == 2 => {
                self.word_address = u16::from_le_bytes([params[0], params[1]]) as u32;
                self.events.push(DeviceEvent::LoadAddress(self.word_address));
                Some(Vec::new())
            }
            stk500::STK_PROG_PAGE if params.len() >= 3 && params[2] == stk500::MEMTYPE_FLASH => {
                let len = u16::from_be_bytes([params[0], params[1]]) as usize;
                let data = &params[3..];
                if data.len() == len && self.program(data) {
                    Some(Vec::new())
                } else {
                    None
                }
            }
            stk500::STK_READ_PAGE if params.len() == 3 && params[2] == stk500::MEMTYPE_FLASH => {
                let len = u16::from_be_bytes([params[0], params[1]]) as usize;
                self.read_flash(len)
            }
            _ => {
                self.events.push(DeviceEvent::Rejected(request.to_vec()));
                self.respond(vec![STK_NOSYNC]);
                return;
            }
        };

        let reply = match payload {
            Some(data) => {
                let mut reply = Vec::with_capacity(data.len() + 2);
                reply.push(stk500::STK_INSYNC);
                reply.extend_from_slice(&data);
                reply.push(stk500::STK_OK);
                reply
            }
            None => vec![stk500::STK_INSYNC, STK_FAILED],
        };
        self.respond(reply);
    }
}

impl Transport for SimulatedTarget {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self.config.protocol {
            DummyProtocol::Stk500v2 => self.handle_v2(data),
            DummyProtocol::Stk500 => self.handle_legacy(data),
        }
        Ok(data.len())
    }

    fn bytes_buffered(&mut self) -> Result<usize> {
        Ok(self.rx.len())
    }

    fn wait_for(&mut self, _count: usize, _timeout: Duration) -> Result<usize> {
        Ok(self.rx.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn pulse_reset(&mut self, _steps: &[ResetStep]) -> Result<()> {
        self.events.push(DeviceEvent::Reset);
        self.rx.clear();
        self.programming = false;
        self.word_address = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avrflasher_core::error::status_code;
    use avrflasher_core::tasks::{read_task, stk500v2_read_task, stk500v2_write_task, write_task};
    use avrflasher_core::{Error, ErrorCode, NoProgress, Session, SessionState, Timing, BLOCK_SIZE};

    fn image(blocks: usize) -> Vec<u8> {
        (0..blocks * BLOCK_SIZE).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_stk500v2_write_and_verify() {
        let mut session = Session::stk500v2(SimulatedTarget::stk500v2(), Timing::default());
        let page = vec![0xAA; 512];

        stk500v2_write_task(&mut session, &page, 2, &mut NoProgress).unwrap();
        stk500v2_read_task(&mut session, &page, 2, &mut NoProgress).unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        let target = session.into_transport();
        assert_eq!(&target.flash()[..512], &page[..]);
        assert!(target.flash()[512..].iter().all(|&b| b == 0xFF));
        assert!(!target.in_programming_mode());

        let loads: Vec<u32> = target
            .events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::LoadAddress(w) => Some(*w),
                _ => None,
            })
            .collect();
        assert_eq!(loads, vec![0, 128, 0, 128]);
    }

    #[test]
    fn test_legacy_write_and_verify() {
        let mut session = Session::legacy(SimulatedTarget::stk500(), Timing::default());
        let page = image(5);

        write_task(&mut session, &page, 5, &mut NoProgress).unwrap();
        read_task(&mut session, &page, 5, &mut NoProgress).unwrap();

        let target = session.into_transport();
        assert_eq!(&target.flash()[..page.len()], &page[..]);
        assert_eq!(target.events()[0], DeviceEvent::Reset);
        assert_eq!(target.events()[1], DeviceEvent::Sync);
        assert!(matches!(target.events()[2], DeviceEvent::SetDevice(ref p) if p.len() == 20));
        assert!(matches!(target.events()[3], DeviceEvent::SetDeviceExt(_)));
        assert_eq!(target.events()[4], DeviceEvent::EnterProgmode);
        assert_eq!(target.events()[5], DeviceEvent::LoadAddress(0));
        assert_eq!(
            target.events()[6],
            DeviceEvent::ProgramPage { word: 0, len: 256 }
        );
        assert_eq!(target.events()[7], DeviceEvent::LoadAddress(0x40));
        assert_eq!(
            target.events()[8],
            DeviceEvent::ProgramPage {
                word: 0x40,
                len: 256
            }
        );
    }

    #[test]
    fn test_legacy_blocks_do_not_overlap() {
        let mut session = Session::legacy(SimulatedTarget::stk500(), Timing::default());
        let page = image(8);

        write_task(&mut session, &page, 8, &mut NoProgress).unwrap();
        read_task(&mut session, &page, 8, &mut NoProgress).unwrap();

        let target = session.into_transport();
        assert_eq!(&target.flash()[..page.len()], &page[..]);
        let loads: Vec<u32> = target
            .events()
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::LoadAddress(a) => Some(*a),
                _ => None,
            })
            .take(8)
            .collect();
        assert_eq!(loads, vec![0x000, 0x040, 0x080, 0x0C0, 0x100, 0x140, 0x180, 0x1C0]);
    }

    #[test]
    fn test_silent_target_sync_attempts() {
        let target = SimulatedTarget::stk500v2().with_fault(Fault::Silent);
        let mut session = Session::stk500v2(target, Timing::default());
        let page = image(1);
        let result = stk500v2_write_task(&mut session, &page, 1, &mut NoProgress);
        assert_eq!(status_code(&result), 102);

        let target = session.into_transport();
        let syncs = target
            .events()
            .iter()
            .filter(|e| **e == DeviceEvent::Sync)
            .count();
        assert_eq!(syncs, 5);
        assert_eq!(target.events().len(), 6);

        let target = SimulatedTarget::stk500().with_fault(Fault::Silent);
        let mut session = Session::legacy(target, Timing::default());
        let result = write_task(&mut session, &page, 1, &mut NoProgress);
        assert_eq!(status_code(&result), 102);
        assert_eq!(session.into_transport().events().len(), 2);
    }

    #[test]
    fn test_corrupt_second_write_ack() {
        // sign on, enter, load, write, load, write
        let target = SimulatedTarget::stk500v2().with_fault(Fault::CorruptChecksum { nth: 6 });
        let mut session = Session::stk500v2(target, Timing::default());
        let page = image(4);

        let err = stk500v2_write_task(&mut session, &page, 4, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::FlashWriteFailure);
        assert_eq!(err.block, Some(1));
        assert!(matches!(err.cause, Error::ChecksumMismatch { .. }));

        let target = session.into_transport();
        let loads = target
            .events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::LoadAddress(_)))
            .count();
        assert_eq!(loads, 2);
    }

    #[test]
    fn test_legacy_corrupt_ack_is_write_failure() {
        // sync, set device, set device ext, enter, load, write
        let target = SimulatedTarget::stk500().with_fault(Fault::CorruptChecksum { nth: 6 });
        let mut session = Session::legacy(target, Timing::default());
        let page = image(2);

        let err = write_task(&mut session, &page, 2, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::FlashWriteFailure);
        assert_eq!(err.block, Some(0));
        assert_eq!(err.cause, Error::SyncFailure);
    }

    #[test]
    fn test_wrong_sequence_fails_sync() {
        let target = SimulatedTarget::stk500v2().with_fault(Fault::WrongSequence);
        let mut session = Session::stk500v2(target, Timing::default());
        let page = image(1);
        let err = stk500v2_write_task(&mut session, &page, 1, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::SyncFailure);
    }

    #[test]
    fn test_flipped_byte_detected() {
        let offset = 3 * BLOCK_SIZE + 10;
        let target = SimulatedTarget::stk500v2().with_fault(Fault::FlipOnRead { offset });
        let mut session = Session::stk500v2(target, Timing::default());
        let page = image(6);

        stk500v2_write_task(&mut session, &page, 6, &mut NoProgress).unwrap();
        let err = stk500v2_read_task(&mut session, &page, 6, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::VerificationFailure);
        assert_eq!(
            err.cause,
            Error::VerificationFailed {
                block: 3,
                offset: 10,
                expected: page[offset],
                found: page[offset] ^ 0xFF,
            }
        );

        // No reads after the mismatching block
        let target = session.into_transport();
        let reads = target
            .events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::ReadPage { .. }))
            .count();
        assert_eq!(reads, 4);
    }

    #[test]
    fn test_write_past_end_of_flash() {
        let target = SimulatedTarget::new(DummyConfig {
            protocol: DummyProtocol::Stk500v2,
            size: 2 * BLOCK_SIZE,
        });
        let mut session = Session::stk500v2(target, Timing::default());
        let page = image(3);
        let err = stk500v2_write_task(&mut session, &page, 3, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::FlashWriteFailure);
        assert_eq!(err.block, Some(2));
        assert!(matches!(
            err.cause,
            Error::CommandFailed {
                command: 0x13,
                status: 0xC0,
                ..
            }
        ));
    }

    #[test]
    fn test_stale_bytes_before_sync() {
        let mut target = SimulatedTarget::stk500v2();
        target.rx.extend([0x00, 0x1B, 0x42]);
        let mut session = Session::stk500v2(target, Timing::default());
        session.sync().unwrap();
        assert_eq!(session.state(), SessionState::Synced);
    }

    #[test]
    fn test_rejects_frame_with_bad_checksum() {
        let mut target = SimulatedTarget::stk500v2();
        let mut frame = encode_v2(0, &[v2::CMD_SIGN_ON], &[]).unwrap();
        *frame.last_mut().unwrap() ^= 1;
        target.write(&frame).unwrap();
        assert_eq!(target.bytes_buffered().unwrap(), 0);
        assert!(matches!(target.events()[0], DeviceEvent::Rejected(_)));
    }
}
