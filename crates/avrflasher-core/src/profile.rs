//! Target device profile
//!
//! Parameter blocks the bootloaders expect when entering programming mode
//! and programming flash, plus reset-line timing. The defaults reproduce the
//! handshake of the stock ATmega bootloaders.

use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;

use crate::transport::{Level, ResetStep};

/// Parameters describing the target device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetProfile {
    /// Human readable name
    pub name: String,
    /// `STK_SET_DEVICE` parameter block (legacy)
    pub device_parameters: Vec<u8>,
    /// `STK_SET_DEVICE_EXT` parameter block (legacy); the first byte is the
    /// block length
    pub extended_parameters: Vec<u8>,
    /// `CMD_ENTER_PROGMODE_ISP` parameters (STK500v2): timeout, stab delay,
    /// cmd exe delay, sync loops, byte delay, poll value, poll index and the
    /// four programming-enable command bytes
    pub enter_progmode: Vec<u8>,
    /// `CMD_LEAVE_PROGMODE_ISP` parameters (STK500v2): pre and post delay
    pub leave_progmode: Vec<u8>,
    /// `CMD_PROGRAM_FLASH_ISP` parameters after the size (STK500v2): mode,
    /// delay, cmd1..cmd3, poll1, poll2
    pub program_flash: Vec<u8>,
    /// `CMD_READ_FLASH_ISP` read command byte (STK500v2)
    pub read_flash_command: u8,
    /// How long reset is held low
    pub reset_low: Duration,
    /// How long reset is held high after each low pulse
    pub reset_high: Duration,
    /// Flash size in bytes, if known
    pub flash_size: Option<u32>,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            name: String::from("atmega"),
            device_parameters: Vec::from([
                0x86, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x03, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
                0x80, 0x04, 0x00, 0x00, 0x00, 0x80, 0x00,
            ]),
            extended_parameters: Vec::from([0x05, 0x04, 0xD7, 0xC2, 0x00]),
            enter_progmode: Vec::from([
                0xC8, 0x64, 0x19, 0x20, 0x00, 0x53, 0x03, 0xEC, 0x53, 0x00, 0x00,
            ]),
            leave_progmode: Vec::from([0x01, 0x01]),
            program_flash: Vec::from([0xC1, 0x0A, 0x40, 0x4C, 0x20, 0x00, 0x00]),
            read_flash_command: 0x20,
            reset_low: Duration::from_millis(1),
            reset_high: Duration::from_millis(100),
            flash_size: None,
        }
    }
}

impl TargetProfile {
    /// Reset pulse: low, high, low, high
    pub fn reset_sequence(&self) -> [ResetStep; 4] {
        [
            ResetStep::new(Level::Low, self.reset_low),
            ResetStep::new(Level::High, self.reset_high),
            ResetStep::new(Level::Low, self.reset_low),
            ResetStep::new(Level::High, self.reset_high),
        ]
    }
}
