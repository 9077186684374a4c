//! Device addresses for block transfers
//!
//! STK500v2 addresses flash in words, so one block of [`BLOCK_SIZE`] bytes
//! moves its pointer by `BLOCK_SIZE / 2` words. The legacy byte pair moves
//! by [`LEGACY_STEP`] per block, carrying from the low into the high byte.

use core::fmt;

use crate::codec::v2::EXTENDED_ADDRESS;
use crate::BLOCK_SIZE;

/// Words covered by one block
pub const WORDS_PER_BLOCK: u32 = (BLOCK_SIZE / 2) as u32;

/// Legacy address increment per block (added to the low byte)
pub const LEGACY_STEP: u8 = 0x40;

/// An address the page transfer engine can step block by block
pub trait BlockAddress: Copy + fmt::Debug + fmt::Display + PartialEq {
    /// Address of the next block
    fn next_block(self) -> Self;

    /// Address `blocks` blocks further on
    fn advanced_by(self, blocks: usize) -> Self {
        (0..blocks).fold(self, |addr, _| addr.next_block())
    }
}

/// STK500v2 32-bit word address
///
/// Bit 31 is the extended-addressing flag and is carried through unchanged
/// by arithmetic on the lower bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordAddress(u32);

impl WordAddress {
    /// First flash word, with extended addressing requested
    pub const ORIGIN: Self = Self(EXTENDED_ADDRESS);

    /// Wrap a raw load-address value
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value as sent in `CMD_LOAD_ADDRESS`
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Word offset without the extended-addressing flag
    pub fn word(self) -> u32 {
        self.0 & !EXTENDED_ADDRESS
    }

    /// Byte offset in flash
    pub fn byte_offset(self) -> u32 {
        self.word() * 2
    }

    /// Big-endian wire encoding
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl BlockAddress for WordAddress {
    fn next_block(self) -> Self {
        Self(self.0.wrapping_add(WORDS_PER_BLOCK))
    }
}

impl fmt::Display for WordAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Legacy STK500 16-bit address, kept as a high/low byte pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BytePairAddress {
    /// High byte
    pub high: u8,
    /// Low byte
    pub low: u8,
}

impl BytePairAddress {
    /// First flash word
    pub const ORIGIN: Self = Self { high: 0, low: 0 };

    /// Create an address from its two bytes
    pub const fn new(high: u8, low: u8) -> Self {
        Self { high, low }
    }

    /// Combined 16-bit value
    pub fn word(self) -> u16 {
        u16::from_be_bytes([self.high, self.low])
    }

    /// Flash byte offset this address selects, one block per [`LEGACY_STEP`]
    pub fn byte_offset(self) -> usize {
        self.word() as usize * (BLOCK_SIZE / LEGACY_STEP as usize)
    }

    /// Parameter bytes of `STK_LOAD_ADDRESS` (low byte first)
    pub fn to_params(self) -> [u8; 2] {
        [self.low, self.high]
    }
}

impl From<u16> for BytePairAddress {
    fn from(word: u16) -> Self {
        let [high, low] = word.to_be_bytes();
        Self { high, low }
    }
}

impl BlockAddress for BytePairAddress {
    fn next_block(self) -> Self {
        let (low, carry) = self.low.overflowing_add(LEGACY_STEP);
        let high = self.high.wrapping_add(carry as u8);
        Self { high, low }
    }
}

impl fmt::Display for BytePairAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}{:02X}", self.high, self.low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_address_steps_by_half_block() {
        let start = WordAddress::ORIGIN;
        assert_eq!(start.next_block().raw(), 0x8000_0080);
        assert_eq!(start.next_block().byte_offset(), BLOCK_SIZE as u32);

        for k in 0..=1000usize {
            let addr = start.advanced_by(k);
            assert_eq!(addr.raw(), 0x8000_0000 + k as u32 * WORDS_PER_BLOCK);
        }
    }

    #[test]
    fn test_word_address_from_arbitrary_start() {
        let start = WordAddress::new(0x8000_1234);
        assert_eq!(start.advanced_by(3).raw(), 0x8000_1234 + 3 * 128);
        assert_eq!(start.to_be_bytes(), [0x80, 0x00, 0x12, 0x34]);
    }

    #[test]
    fn test_byte_pair_low_byte_steps_by_0x40() {
        let origin = BytePairAddress::ORIGIN;
        assert_eq!(origin.next_block(), BytePairAddress::new(0x00, 0x40));
        assert_eq!(origin.advanced_by(2), BytePairAddress::new(0x00, 0x80));
        assert_eq!(origin.advanced_by(4), BytePairAddress::new(0x01, 0x00));
    }

    #[test]
    fn test_byte_pair_carries_into_high() {
        let addr = BytePairAddress::new(0x00, 0xC0).next_block();
        assert_eq!(addr, BytePairAddress::new(0x01, 0x00));
        assert_eq!(addr.to_params(), [0x00, 0x01]);

        let addr = BytePairAddress::new(0xFF, 0xC0).next_block();
        assert_eq!(addr, BytePairAddress::new(0x00, 0x00));
    }

    #[test]
    fn test_byte_pair_matches_word_arithmetic() {
        for start in [0u16, 0x0040, 0x7F80, 0xFFC0] {
            let origin = BytePairAddress::from(start);
            for k in 0..=1000usize {
                let expected = start.wrapping_add((k as u16).wrapping_mul(LEGACY_STEP as u16));
                assert_eq!(origin.advanced_by(k).word(), expected, "start {} k {}", start, k);
            }
        }
    }

    #[test]
    fn test_both_representations_agree() {
        let mut wide = WordAddress::ORIGIN;
        let mut pair = BytePairAddress::ORIGIN;
        for block in 0..256usize {
            assert_eq!(wide.byte_offset() as usize, block * BLOCK_SIZE);
            assert_eq!(pair.byte_offset(), block * BLOCK_SIZE);
            wide = wide.next_block();
            pair = pair.next_block();
        }
    }
}
