//! Flash image loading
//!
//! Images are Intel HEX (files ending in `.hex` or `.ihx`) or raw binary.
//! Either way the result is a flat buffer starting at flash address 0,
//! padded with erased bytes (0xFF) to a whole number of blocks.
//!
//! Every image is bounded by the target's flash size, or by
//! [`MAX_IMAGE_SIZE`] when the target profile does not name one. HEX records
//! are checked against that bound before the buffer grows.

use std::fs;
use std::path::Path;

use avrflasher_core::BLOCK_SIZE;
use thiserror::Error;

/// Value of erased flash
const ERASED: u8 = 0xFF;

/// Largest image accepted when the flash size is unknown
pub const MAX_IMAGE_SIZE: usize = 100 * 1024;

/// Image size limit for a target with `flash_size` bytes of flash
pub fn size_limit(flash_size: Option<u32>) -> usize {
    flash_size.map_or(MAX_IMAGE_SIZE, |size| size as usize)
}

/// Image loading errors
#[derive(Debug, Error)]
pub enum ImageError {
    /// The file could not be read
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    /// A HEX record is malformed
    #[error("Line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    /// A HEX record's checksum does not match
    #[error("Line {line}: checksum mismatch (expected 0x{expected:02X}, found 0x{found:02X})")]
    Checksum { line: usize, expected: u8, found: u8 },

    /// The image does not fit the target
    #[error("Image needs {size} bytes but at most {limit} bytes fit the target")]
    TooLarge { size: usize, limit: usize },

    /// The image holds no data
    #[error("Image is empty")]
    Empty,
}

/// A flash image split into blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Image bytes, padded to `block_count * BLOCK_SIZE`
    pub data: Vec<u8>,
    /// Number of blocks
    pub block_count: usize,
    /// Bytes before padding
    pub used: usize,
}

impl Image {
    /// Build an image from raw bytes starting at address 0
    pub fn from_bytes(mut data: Vec<u8>) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        let used = data.len();
        let block_count = used.div_ceil(BLOCK_SIZE);
        data.resize(block_count * BLOCK_SIZE, ERASED);
        Ok(Self {
            data,
            block_count,
            used,
        })
    }

    /// Refuse the image if it is larger than `flash_size`
    pub fn check_fits(&self, flash_size: Option<u32>) -> Result<(), ImageError> {
        let limit = size_limit(flash_size);
        if self.data.len() > limit {
            return Err(ImageError::TooLarge {
                size: self.data.len(),
                limit,
            });
        }
        Ok(())
    }
}

fn hex_byte(s: &str, line: usize) -> Result<u8, ImageError> {
    u8::from_str_radix(s, 16).map_err(|_| ImageError::Syntax {
        line,
        reason: format!("invalid hex digits '{}'", s),
    })
}

/// Parse Intel HEX text into a flat buffer
///
/// Supports data (00), end of file (01), extended segment address (02) and
/// extended linear address (04) records. Start address records (03, 05) are
/// accepted and ignored. Data past `limit` bytes is rejected.
pub fn parse_intel_hex(text: &str, limit: usize) -> Result<Vec<u8>, ImageError> {
    let mut data: Vec<u8> = Vec::new();
    let mut base: usize = 0;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let record = raw.trim();
        if record.is_empty() {
            continue;
        }
        let digits = record.strip_prefix(':').ok_or_else(|| ImageError::Syntax {
            line,
            reason: "record does not start with ':'".to_string(),
        })?;
        if digits.len() % 2 != 0 || digits.len() < 10 || !digits.is_ascii() {
            return Err(ImageError::Syntax {
                line,
                reason: "record has an invalid length".to_string(),
            });
        }

        let bytes = (0..digits.len())
            .step_by(2)
            .map(|i| hex_byte(&digits[i..i + 2], line))
            .collect::<Result<Vec<u8>, _>>()?;

        let count = bytes[0] as usize;
        if bytes.len() != count + 5 {
            return Err(ImageError::Syntax {
                line,
                reason: format!("byte count {} does not match record length", count),
            });
        }

        let (body, checksum) = bytes.split_at(bytes.len() - 1);
        let expected = body
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
            .wrapping_neg();
        if expected != checksum[0] {
            return Err(ImageError::Checksum {
                line,
                expected,
                found: checksum[0],
            });
        }

        let offset = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let payload = &bytes[4..4 + count];
        match bytes[3] {
            0x00 => {
                let start = base.saturating_add(offset);
                let end = start.saturating_add(count);
                if end > limit {
                    return Err(ImageError::TooLarge { size: end, limit });
                }
                if data.len() < end {
                    data.resize(end, ERASED);
                }
                data[start..end].copy_from_slice(payload);
            }
            0x01 => break,
            0x02 if count == 2 => {
                base = (u16::from_be_bytes([payload[0], payload[1]]) as usize) << 4;
            }
            0x04 if count == 2 => {
                base = (u16::from_be_bytes([payload[0], payload[1]]) as usize) << 16;
            }
            0x03 | 0x05 => {}
            kind => {
                return Err(ImageError::Syntax {
                    line,
                    reason: format!("unsupported record type 0x{:02X}", kind),
                })
            }
        }
    }

    Ok(data)
}

/// Load an image file for a target with `flash_size` bytes of flash
pub fn load_image(path: &Path, flash_size: Option<u32>) -> Result<Image, ImageError> {
    let limit = size_limit(flash_size);
    let is_hex = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("hex") || e.eq_ignore_ascii_case("ihx"));

    let data = if is_hex {
        parse_intel_hex(&fs::read_to_string(path)?, limit)?
    } else {
        let size = fs::metadata(path)?.len() as usize;
        if size > limit {
            return Err(ImageError::TooLarge { size, limit });
        }
        fs::read(path)?
    };

    let image = Image::from_bytes(data)?;
    image.check_fits(flash_size)?;
    log::debug!(
        "Loaded {} ({} bytes, {} blocks)",
        path.display(),
        image.used,
        image.block_count
    );
    Ok(image)
}
