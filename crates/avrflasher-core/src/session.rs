//! Programmer session
//!
//! A [`Session`] exclusively owns the transport and the protocol state
//! (including the STK500v2 sequence counter) for one target. It tracks where
//! the target is in the programming lifecycle:
//!
//! ```text
//! Idle --sync--> Synced --enter--> ProgrammingMode --leave--> Closed
//!   ^                                                            |
//!   +------------------------------ reset -----------------------+
//! ```
//!
//! Operations that require a particular state fail with
//! [`Error::StateViolation`] before touching the transport.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::profile::TargetProfile;
use crate::protocol::{Protocol, Stk500, Stk500v2, Timing};
use crate::transport::Transport;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Freshly created or reset; not yet synchronized
    Idle,
    /// Handshake completed
    Synced,
    /// Target is in programming mode; block transfers are allowed
    ProgrammingMode,
    /// Programming mode was left
    Closed,
}

/// One programming session with one target
pub struct Session<T, P> {
    transport: T,
    protocol: P,
    profile: TargetProfile,
    state: SessionState,
}

/// Session speaking the legacy STK500 protocol
pub type LegacySession<T> = Session<T, Stk500>;

/// Session speaking STK500v2
pub type Stk500v2Session<T> = Session<T, Stk500v2>;

impl<T: Transport> Stk500v2Session<T> {
    /// STK500v2 session with the default target profile
    pub fn stk500v2(transport: T, timing: Timing) -> Self {
        Session::new(transport, Stk500v2::new(timing))
    }
}

impl<T: Transport> LegacySession<T> {
    /// Legacy STK500 session with the default target profile
    pub fn legacy(transport: T, timing: Timing) -> Self {
        Session::new(transport, Stk500::new(timing))
    }
}

impl<T: Transport, P: Protocol> Session<T, P> {
    /// Create a session using the default target profile
    pub fn new(transport: T, protocol: P) -> Self {
        Self::with_profile(transport, protocol, TargetProfile::default())
    }

    /// Create a session for a specific target profile
    pub fn with_profile(transport: T, protocol: P, profile: TargetProfile) -> Self {
        Self {
            transport,
            protocol,
            profile,
            state: SessionState::Idle,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Target profile in use
    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    /// Protocol state
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Access the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the session and return the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Address of the first flash block
    pub fn origin(&self) -> P::Address {
        self.protocol.origin()
    }

    fn require(&self, required: SessionState) -> Result<()> {
        if self.state != required {
            log::debug!(
                "{}: refusing operation in state {:?} (requires {:?})",
                P::NAME,
                self.state,
                required
            );
            return Err(Error::StateViolation {
                required,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Pulse the reset line and return to [`SessionState::Idle`]
    pub fn reset(&mut self) -> Result<()> {
        self.state = SessionState::Idle;
        log::debug!("{}: resetting target", P::NAME);
        self.transport.pulse_reset(&self.profile.reset_sequence())?;
        self.transport.discard_input()
    }

    /// Synchronize with the bootloader using the variant's attempt count
    pub fn sync(&mut self) -> Result<()> {
        self.sync_with_attempts(P::SYNC_ATTEMPTS)
    }

    /// Synchronize with the bootloader, trying at most `attempts` times
    ///
    /// Buffered input is discarded before every attempt. Transport failures
    /// end the loop early.
    pub fn sync_with_attempts(&mut self, attempts: u32) -> Result<()> {
        if self.state == SessionState::ProgrammingMode {
            return Err(Error::StateViolation {
                required: SessionState::Idle,
                actual: self.state,
            });
        }

        for attempt in 1..=attempts {
            self.transport.discard_input()?;
            match self.protocol.sign_on(&mut self.transport) {
                Ok(()) => {
                    log::debug!("{}: in sync after {} attempt(s)", P::NAME, attempt);
                    self.state = SessionState::Synced;
                    return Ok(());
                }
                Err(e @ Error::Transport(_)) => return Err(e),
                Err(e) => {
                    log::warn!("{}: sync attempt {}/{} failed: {}", P::NAME, attempt, attempts, e)
                }
            }
        }

        log::error!("{}: failed to sync after {} attempt(s)", P::NAME, attempts);
        Err(Error::SyncFailure)
    }

    /// Enter programming mode; requires [`SessionState::Synced`]
    pub fn enter_programming_mode(&mut self) -> Result<()> {
        self.require(SessionState::Synced)?;
        self.protocol
            .enter_programming_mode(&mut self.transport, &self.profile)?;
        self.state = SessionState::ProgrammingMode;
        log::info!("Entered programming mode");
        Ok(())
    }

    /// Leave programming mode; requires [`SessionState::ProgrammingMode`]
    pub fn leave_programming_mode(&mut self) -> Result<()> {
        self.require(SessionState::ProgrammingMode)?;
        self.protocol
            .leave_programming_mode(&mut self.transport, &self.profile)?;
        self.state = SessionState::Closed;
        log::info!("Left programming mode");
        Ok(())
    }

    /// Load the address for the next block transfer
    pub fn load_address(&mut self, address: P::Address) -> Result<()> {
        self.require(SessionState::ProgrammingMode)?;
        log::trace!("{}: load address {}", P::NAME, address);
        self.protocol.load_address(&mut self.transport, address)
    }

    /// Send a parameterless command and return the acknowledged payload
    pub fn exec_command(&mut self, command: u8) -> Result<Vec<u8>> {
        self.exec_with_params(command, &[], 0)
    }

    /// Send `command ∥ params` and return `reply_len` payload bytes
    pub fn exec_with_params(
        &mut self,
        command: u8,
        params: &[u8],
        reply_len: usize,
    ) -> Result<Vec<u8>> {
        self.protocol
            .execute(&mut self.transport, command, params, reply_len)
    }

    /// Program one block at the loaded address
    pub fn write_block(&mut self, block: &[u8]) -> Result<()> {
        self.require(SessionState::ProgrammingMode)?;
        self.protocol
            .write_block(&mut self.transport, &self.profile, block)
    }

    /// Read one block of `len` bytes from the loaded address
    pub fn read_block(&mut self, len: usize) -> Result<Vec<u8>> {
        self.require(SessionState::ProgrammingMode)?;
        self.protocol
            .read_block(&mut self.transport, &self.profile, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{BytePairAddress, WordAddress};
    use crate::mock::MockTransport;
    use crate::transport::Level;
    use alloc::vec;

    #[test]
    fn test_v2_sync_gives_up_after_five_attempts() {
        let mut session = Session::stk500v2(MockTransport::silent(), Timing::default());
        assert_eq!(session.sync(), Err(Error::SyncFailure));
        assert_eq!(session.state(), SessionState::Idle);

        let transport = session.into_transport();
        assert_eq!(transport.writes.len(), 5);
        assert_eq!(transport.discards, 5);
        // Each attempt is a fresh request
        for (i, write) in transport.writes.iter().enumerate() {
            assert_eq!(write[1], i as u8);
        }
    }

    #[test]
    fn test_legacy_sync_single_attempt() {
        let mut session = Session::legacy(MockTransport::silent(), Timing::default());
        assert_eq!(session.sync(), Err(Error::SyncFailure));
        let transport = session.into_transport();
        assert_eq!(transport.writes, vec![vec![0x30, 0x20]]);
        assert_eq!(transport.discards, 1);
    }

    #[test]
    fn test_sync_recovers_on_later_attempt() {
        let mut calls = 0;
        let transport = MockTransport::new(move |request| {
            calls += 1;
            if calls < 3 {
                return Vec::new();
            }
            let frame = crate::codec::decode_v2(request).unwrap();
            crate::codec::encode_v2(frame.sequence, &crate::mock::v2_answer(&frame.body, 0), &[])
                .unwrap()
        });
        let mut session = Session::stk500v2(transport, Timing::default());
        session.sync().unwrap();
        assert_eq!(session.state(), SessionState::Synced);
        assert_eq!(session.into_transport().writes.len(), 3);
    }

    #[test]
    fn test_sync_discards_stale_bytes() {
        let mut transport = MockTransport::legacy_acking(0);
        transport.feed(&[0x00, 0x00, 0x00]);
        let mut session = Session::legacy(transport, Timing::default());
        session.sync().unwrap();
        assert_eq!(session.state(), SessionState::Synced);
    }

    #[test]
    fn test_operations_fail_fast_outside_programming_mode() {
        let mut session = Session::stk500v2(MockTransport::stk500v2_acking(0), Timing::default());

        assert_eq!(
            session.enter_programming_mode(),
            Err(Error::StateViolation {
                required: SessionState::Synced,
                actual: SessionState::Idle
            })
        );
        assert!(matches!(
            session.load_address(WordAddress::ORIGIN),
            Err(Error::StateViolation { .. })
        ));
        assert!(matches!(
            session.write_block(&[0; 256]),
            Err(Error::StateViolation { .. })
        ));
        assert!(matches!(
            session.read_block(256),
            Err(Error::StateViolation { .. })
        ));
        assert!(matches!(
            session.leave_programming_mode(),
            Err(Error::StateViolation { .. })
        ));
        assert!(session.transport_mut().writes.is_empty());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut session = Session::stk500v2(MockTransport::stk500v2_acking(0), Timing::default());
        session.reset().unwrap();
        session.sync().unwrap();
        session.enter_programming_mode().unwrap();
        assert_eq!(session.state(), SessionState::ProgrammingMode);

        assert!(matches!(
            session.sync(),
            Err(Error::StateViolation { .. })
        ));

        session.load_address(session.origin()).unwrap();
        session.write_block(&[0x11; 256]).unwrap();
        assert_eq!(session.read_block(256).unwrap(), vec![0; 256]);
        session.leave_programming_mode().unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        session.reset().unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        let transport = session.into_transport();
        assert_eq!(transport.resets.len(), 2);
        let levels: Vec<Level> = transport.resets[0].iter().map(|s| s.level).collect();
        assert_eq!(levels, vec![Level::Low, Level::High, Level::Low, Level::High]);
        // sign on, enter, load, write, read, leave
        assert_eq!(transport.writes.len(), 6);
    }

    #[test]
    fn test_legacy_lifecycle() {
        let mut session = Session::legacy(MockTransport::legacy_acking(0xEE), Timing::default());
        session.sync().unwrap();
        session.enter_programming_mode().unwrap();
        session
            .load_address(BytePairAddress::new(0x00, 0x80))
            .unwrap();
        assert_eq!(session.read_block(256).unwrap(), vec![0xEE; 256]);
        session.leave_programming_mode().unwrap();

        let transport = session.into_transport();
        assert_eq!(transport.writes.last().unwrap(), &vec![0x51, 0x20]);
    }

    #[test]
    fn test_failed_enter_keeps_synced_state() {
        let transport = MockTransport::new(|request| {
            let frame = crate::codec::decode_v2(request).unwrap();
            let status = if frame.body[0] == 0x10 { 0xC0 } else { 0x00 };
            let mut answer = crate::mock::v2_answer(&frame.body, 0);
            answer[1] = status;
            crate::codec::encode_v2(frame.sequence, &answer, &[]).unwrap()
        });
        let mut session = Session::stk500v2(transport, Timing::default());
        session.sync().unwrap();
        assert!(matches!(
            session.enter_programming_mode(),
            Err(Error::CommandFailed { command: 0x10, .. })
        ));
        assert_eq!(session.state(), SessionState::Synced);
    }

    #[test]
    fn test_exec_command_legacy_bound() {
        let mut session = Session::legacy(MockTransport::legacy_acking(0), Timing::default());
        assert!(session.exec_command(0x30).unwrap().is_empty());
        assert!(matches!(
            session.exec_with_params(0x42, &[0; 64], 0),
            Err(Error::RequestTooLarge { .. })
        ));
    }
}
