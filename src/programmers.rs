//! Programmer registration and dispatch
//!
//! A programmer string names a protocol and a transport:
//! `name[:key=value,key=value,...]`. The protocol variant is fixed by the
//! name (`stk500v2`, or `arduino`/`stk500`/`stk500v1` for the legacy
//! protocol); `dummy` selects it with `protocol=`.

use std::collections::HashMap;
use std::time::Duration;

use avrflasher_core::{
    tasks, ErrorCode, FlashError, LegacySession, NoProgress, Session, SessionState, Stk500,
    Stk500v2, Stk500v2Session, TargetProfile, Timing, TransferProgress, Transport,
};

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "serial")]
    programmers.push(ProgrammerInfo {
        name: "stk500v2",
        aliases: &["avrisp2", "wiring"],
        description: "STK500v2 bootloader over serial (dev=<port>,baud=<rate>,reset=dtr|rts|none,timeout=<ms>)",
    });

    #[cfg(feature = "serial")]
    programmers.push(ProgrammerInfo {
        name: "arduino",
        aliases: &["stk500", "stk500v1"],
        description: "Legacy STK500 (Arduino) bootloader over serial (same options as stk500v2)",
    });

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "Simulated bootloader for testing (protocol=stk500v2|stk500,size=<bytes>)",
    });

    programmers
}

/// Parsed programmer string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammerParams {
    /// Programmer name as given
    pub name: String,
    /// `key=value` options
    pub params: HashMap<String, String>,
}

/// Parse a programmer string like `stk500v2:dev=/dev/ttyUSB0,baud=115200`
pub fn parse_programmer_params(s: &str) -> Result<ProgrammerParams, Box<dyn std::error::Error>> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            } else {
                return Err(
                    format!("Invalid parameter format: '{}' (expected key=value)", opt).into(),
                );
            }
        }
    }

    Ok(ProgrammerParams {
        name: name.to_string(),
        params,
    })
}

/// Bootloader protocol variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// STK500v2
    Stk500v2,
    /// Legacy STK500
    Stk500,
}

impl Variant {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "stk500v2" | "avrisp2" | "wiring" => Some(Self::Stk500v2),
            "arduino" | "stk500" | "stk500v1" => Some(Self::Stk500),
            _ => None,
        }
    }
}

/// Read response timing from `timeout=<ms>`
fn parse_timing(params: &HashMap<String, String>) -> Result<Timing, Box<dyn std::error::Error>> {
    let mut timing = Timing::default();
    if let Some(ms) = params.get("timeout") {
        let ms: u64 = ms
            .parse()
            .map_err(|_| format!("Invalid timeout: {}", ms))?;
        timing.response = Duration::from_millis(ms);
    }
    Ok(timing)
}

/// An opened programmer: a session bound to its protocol variant
pub enum Programmer {
    /// STK500v2 session
    Stk500v2(Stk500v2Session<Box<dyn Transport>>),
    /// Legacy STK500 session
    Stk500(LegacySession<Box<dyn Transport>>),
}

impl Programmer {
    fn new(
        variant: Variant,
        transport: Box<dyn Transport>,
        timing: Timing,
        profile: TargetProfile,
    ) -> Self {
        match variant {
            Variant::Stk500v2 => Self::Stk500v2(Session::with_profile(
                transport,
                Stk500v2::new(timing),
                profile,
            )),
            Variant::Stk500 => {
                Self::Stk500(Session::with_profile(transport, Stk500::new(timing), profile))
            }
        }
    }

    /// Protocol variant in use
    pub fn variant(&self) -> Variant {
        match self {
            Self::Stk500v2(_) => Variant::Stk500v2,
            Self::Stk500(_) => Variant::Stk500,
        }
    }

    /// Reset, sync, enter programming mode and write `page`
    pub fn write(
        &mut self,
        page: &[u8],
        block_count: usize,
        progress: &mut dyn TransferProgress,
    ) -> Result<(), FlashError> {
        match self {
            Self::Stk500v2(session) => {
                tasks::stk500v2_write_task(session, page, block_count, progress)
            }
            Self::Stk500(session) => tasks::write_task(session, page, block_count, progress),
        }
    }

    /// Read back and compare `page`, then leave programming mode
    pub fn verify(
        &mut self,
        page: &[u8],
        block_count: usize,
        progress: &mut dyn TransferProgress,
    ) -> Result<(), FlashError> {
        match self {
            Self::Stk500v2(session) => {
                tasks::stk500v2_read_task(session, page, block_count, progress)
            }
            Self::Stk500(session) => tasks::read_task(session, page, block_count, progress),
        }
    }

    /// Session state
    pub fn state(&self) -> SessionState {
        match self {
            Self::Stk500v2(session) => session.state(),
            Self::Stk500(session) => session.state(),
        }
    }

    /// Leave programming mode if a write left the target in it
    pub fn finish(&mut self) -> Result<(), FlashError> {
        if self.state() != SessionState::ProgrammingMode {
            return Ok(());
        }
        let result = match self {
            Self::Stk500v2(session) => session.leave_programming_mode(),
            Self::Stk500(session) => session.leave_programming_mode(),
        };
        result.map_err(|e| FlashError::new(ErrorCode::ProgrammingModeFailure, e))
    }

    /// Reset, sync, then enter and leave programming mode
    pub fn probe(&mut self) -> Result<(), FlashError> {
        match self {
            Self::Stk500v2(session) => tasks::verify(session, &[], 0, &mut NoProgress),
            Self::Stk500(session) => tasks::verify(session, &[], 0, &mut NoProgress),
        }
    }
}

#[cfg(feature = "serial")]
fn open_serial(
    variant: Variant,
    params: &HashMap<String, String>,
    profile: TargetProfile,
) -> Result<Programmer, Box<dyn std::error::Error>> {
    use avrflasher_serial::{SerialOptions, SerialTransport};

    let device = params
        .get("dev")
        .ok_or("Missing dev= parameter (e.g. dev=/dev/ttyUSB0)")?;
    let mut options = SerialOptions::new(device.as_str());
    if let Some(baud) = params.get("baud") {
        options.baud = baud
            .parse()
            .map_err(|_| format!("Invalid baud rate: {}", baud))?;
    }
    if let Some(reset) = params.get("reset") {
        options.reset = reset.parse()?;
    }
    options.timing = parse_timing(params)?;

    let transport = SerialTransport::open(&options)?;
    Ok(Programmer::new(
        variant,
        Box::new(transport),
        options.timing,
        profile,
    ))
}

#[cfg(feature = "dummy")]
fn open_dummy(
    params: &HashMap<String, String>,
    profile: TargetProfile,
) -> Result<Programmer, Box<dyn std::error::Error>> {
    use avrflasher_dummy::{DummyConfig, DummyProtocol, SimulatedTarget};

    let variant = match params.get("protocol").map(String::as_str) {
        None => Variant::Stk500v2,
        Some(name) => Variant::from_name(name).ok_or_else(|| format!("Unknown protocol: {}", name))?,
    };

    let mut config = DummyConfig {
        protocol: match variant {
            Variant::Stk500v2 => DummyProtocol::Stk500v2,
            Variant::Stk500 => DummyProtocol::Stk500,
        },
        ..DummyConfig::default()
    };
    if let Some(size) = profile.flash_size {
        config.size = size as usize;
    }
    if let Some(size) = params.get("size") {
        config.size = crate::config::parse_number(size)? as usize;
    }

    log::info!(
        "Using simulated {:?} bootloader with {} bytes of flash",
        variant,
        config.size
    );
    let timing = parse_timing(params)?;
    Ok(Programmer::new(
        variant,
        Box::new(SimulatedTarget::new(config)),
        timing,
        profile,
    ))
}

/// Open a programmer from its programmer string
pub fn open_programmer(
    programmer: &str,
    profile: TargetProfile,
) -> Result<Programmer, Box<dyn std::error::Error>> {
    let parsed = parse_programmer_params(programmer)?;
    let name = parsed.name.to_ascii_lowercase();

    #[cfg(feature = "dummy")]
    if name == "dummy" {
        return open_dummy(&parsed.params, profile);
    }

    #[cfg(feature = "serial")]
    if let Some(variant) = Variant::from_name(&name) {
        return open_serial(variant, &parsed.params, profile);
    }

    let _ = profile;
    Err(format!(
        "Unknown programmer: {} (available: {})",
        parsed.name,
        available_programmers()
            .iter()
            .map(|p| p.name)
            .collect::<Vec<_>>()
            .join(", ")
    )
    .into())
}
