//! Target profile files
//!
//! A TOML file overrides any field of the built-in ATmega profile:
//!
//! ```toml
//! name = "atmega2560"
//! flash_size = "256 KiB"
//! reset_low_ms = 1
//! reset_high_ms = 100
//! device_parameters = [0x86, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x03,
//!                      0xff, 0xff, 0xff, 0xff, 0x01, 0x00, 0x10, 0x00,
//!                      0x00, 0x00, 0x00, 0x00]
//! enter_progmode = [0xc8, 0x64, 0x19, 0x20, 0x00, 0x53, 0x03, 0xac, 0x53, 0x00, 0x00]
//! program_flash = ["0xc1", "0x0a", "0x40", "0x4c", "0x20", "0x00", "0x00"]
//! ```
//!
//! Byte values and sizes may be written as integers or as strings in
//! decimal or `0x` hex.

use std::fs;
use std::path::Path;
use std::time::Duration;

use avrflasher_core::TargetProfile;
use serde::Deserialize;
use thiserror::Error;

/// Profile loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has wrong field types
    #[error("Invalid target profile: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Profile file structure; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlProfile {
    name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_size")]
    flash_size: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_bytes")]
    device_parameters: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "deserialize_opt_bytes")]
    extended_parameters: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "deserialize_opt_bytes")]
    enter_progmode: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "deserialize_opt_bytes")]
    leave_progmode: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "deserialize_opt_bytes")]
    program_flash: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "deserialize_opt_byte")]
    read_flash_command: Option<u8>,
    reset_low_ms: Option<u64>,
    reset_high_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u64),
    Str(String),
}

impl HexOrInt {
    fn value(self, what: &str) -> Result<u32, String> {
        match self {
            HexOrInt::Int(n) => u32::try_from(n).map_err(|_| format!("{} out of range: {}", what, n)),
            HexOrInt::Str(s) => parse_size(&s),
        }
    }

    fn byte(self) -> Result<u8, String> {
        let n = self.value("byte")?;
        u8::try_from(n).map_err(|_| format!("byte out of range: {}", n))
    }
}

fn deserialize_opt_size<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    HexOrInt::deserialize(deserializer)?
        .value("size")
        .map(Some)
        .map_err(serde::de::Error::custom)
}

fn deserialize_opt_byte<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    HexOrInt::deserialize(deserializer)?
        .byte()
        .map(Some)
        .map_err(serde::de::Error::custom)
}

fn deserialize_opt_bytes<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Vec::<HexOrInt>::deserialize(deserializer)?
        .into_iter()
        .map(HexOrInt::byte)
        .collect::<Result<Vec<u8>, String>>()
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// Parse a number that can be hex (0x...) or decimal
pub fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

/// Parse a size like "32 KiB", "0x8000" or "32768"
fn parse_size(s: &str) -> Result<u32, String> {
    let lower = s.trim().to_lowercase();
    let (num, multiplier) = if let Some(n) = lower.strip_suffix("kib") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix("k") {
        (n, 1024)
    } else {
        (lower.as_str(), 1)
    };
    parse_number(num)?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size too large: {}", s))
}

/// Parse profile TOML on top of the default profile
pub fn parse_profile(content: &str) -> Result<TargetProfile, ConfigError> {
    let file: TomlProfile = toml::from_str(content)?;
    let mut profile = TargetProfile::default();

    if let Some(name) = file.name {
        profile.name = name;
    }
    if file.flash_size.is_some() {
        profile.flash_size = file.flash_size;
    }
    if let Some(bytes) = file.device_parameters {
        profile.device_parameters = bytes;
    }
    if let Some(bytes) = file.extended_parameters {
        profile.extended_parameters = bytes;
    }
    if let Some(bytes) = file.enter_progmode {
        profile.enter_progmode = bytes;
    }
    if let Some(bytes) = file.leave_progmode {
        profile.leave_progmode = bytes;
    }
    if let Some(bytes) = file.program_flash {
        profile.program_flash = bytes;
    }
    if let Some(command) = file.read_flash_command {
        profile.read_flash_command = command;
    }
    if let Some(ms) = file.reset_low_ms {
        profile.reset_low = Duration::from_millis(ms);
    }
    if let Some(ms) = file.reset_high_ms {
        profile.reset_high = Duration::from_millis(ms);
    }

    Ok(profile)
}

/// Load a target profile, or the default one when no file is given
pub fn load_profile(path: Option<&Path>) -> Result<TargetProfile, ConfigError> {
    let Some(path) = path else {
        return Ok(TargetProfile::default());
    };
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let profile = parse_profile(&content)?;
    log::info!("Loaded target profile '{}' from {}", profile.name, path.display());
    Ok(profile)
}
