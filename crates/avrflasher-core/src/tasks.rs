//! Flashing tasks
//!
//! Complete write and verify runs on top of the page transfer engine. Every
//! failure carries the [`ErrorCode`] of the stage that failed; use
//! [`crate::error::status_code`] to turn a result into its numeric status.

use crate::error::{Error, ErrorCode, FlashError};
use crate::protocol::Protocol;
use crate::session::{LegacySession, Session, SessionState, Stk500v2Session};
use crate::transfer::{read_and_verify_page, write_page, TransferProgress};
use crate::transport::Transport;

fn reset_and_sync<T: Transport, P: Protocol>(
    session: &mut Session<T, P>,
) -> Result<(), FlashError> {
    session
        .reset()
        .map_err(|e| FlashError::new(ErrorCode::Failure, e))?;
    session
        .sync()
        .map_err(|e| FlashError::new(ErrorCode::SyncFailure, e))
}

fn enter<T: Transport, P: Protocol>(session: &mut Session<T, P>) -> Result<(), FlashError> {
    session
        .enter_programming_mode()
        .map_err(|e| FlashError::new(ErrorCode::ProgrammingModeFailure, e))
}

/// Reset the target, synchronize, enter programming mode and write `page`
///
/// The session is left in programming mode so a verify can follow directly.
pub fn program<T: Transport, P: Protocol>(
    session: &mut Session<T, P>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError> {
    crate::transfer::check_page(page, block_count)?;
    reset_and_sync(session)?;
    enter(session)?;
    write_page(session, page, block_count, progress)
}

/// Read back and compare `page`, then leave programming mode
///
/// Programming mode is established first if the session is not already in
/// it. On failure the session is left where the failure happened.
pub fn verify<T: Transport, P: Protocol>(
    session: &mut Session<T, P>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError> {
    crate::transfer::check_page(page, block_count)?;
    match session.state() {
        SessionState::ProgrammingMode => {}
        SessionState::Synced => enter(session)?,
        SessionState::Idle | SessionState::Closed => {
            reset_and_sync(session)?;
            enter(session)?;
        }
    }

    read_and_verify_page(session, page, block_count, progress)?;

    session
        .leave_programming_mode()
        .map_err(|e: Error| FlashError::new(ErrorCode::ProgrammingModeFailure, e))
}

/// Legacy STK500 write task
pub fn write_task<T: Transport>(
    session: &mut LegacySession<T>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError> {
    program(session, page, block_count, progress)
}

/// Legacy STK500 read-and-verify task
pub fn read_task<T: Transport>(
    session: &mut LegacySession<T>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError> {
    verify(session, page, block_count, progress)
}

/// STK500v2 write task
pub fn stk500v2_write_task<T: Transport>(
    session: &mut Stk500v2Session<T>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError> {
    program(session, page, block_count, progress)
}

/// STK500v2 read-and-verify task
pub fn stk500v2_read_task<T: Transport>(
    session: &mut Stk500v2Session<T>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError> {
    verify(session, page, block_count, progress)
}
