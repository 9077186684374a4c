//! Page transfer engine
//!
//! Splits a page into [`BLOCK_SIZE`] blocks and moves them through a
//! [`Session`] at auto-incrementing addresses. The address cursor advances
//! only after a block succeeded, so it always names the block being
//! transferred. The first failure aborts the page; nothing is retried.

use crate::address::BlockAddress;
use crate::error::{Error, ErrorCode, FlashError};
use crate::protocol::Protocol;
use crate::session::Session;
use crate::transport::Transport;
use crate::BLOCK_SIZE;

/// Direction of a page transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Blocks are programmed
    Write,
    /// Blocks are read back and compared
    Verify,
}

/// Progress callbacks for page transfers
pub trait TransferProgress {
    /// Called before the first block with the number of blocks to transfer
    fn started(&mut self, kind: TransferKind, total_blocks: usize);

    /// Called after each block completed
    fn block_done(&mut self, kind: TransferKind, blocks_done: usize);

    /// Called when every block was transferred
    fn finished(&mut self, kind: TransferKind);
}

/// A no-op progress reporter
pub struct NoProgress;

impl TransferProgress for NoProgress {
    fn started(&mut self, _kind: TransferKind, _total_blocks: usize) {}
    fn block_done(&mut self, _kind: TransferKind, _blocks_done: usize) {}
    fn finished(&mut self, _kind: TransferKind) {}
}

/// Check that `page` holds exactly `block_count` blocks
pub fn check_page(page: &[u8], block_count: usize) -> Result<(), FlashError> {
    if block_count.checked_mul(BLOCK_SIZE) != Some(page.len()) {
        return Err(FlashError::new(
            ErrorCode::Failure,
            Error::InvalidPage {
                len: page.len(),
                block_count,
            },
        ));
    }
    Ok(())
}

/// Stage error for a failure before any block was touched
fn state_error(cause: Error) -> FlashError {
    FlashError::new(ErrorCode::ProgrammingModeFailure, cause)
}

/// Write every block of `page`, starting at the session's origin address
///
/// The session must be in programming mode.
pub fn write_page<T, P>(
    session: &mut Session<T, P>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError>
where
    T: Transport,
    P: Protocol,
{
    check_page(page, block_count)?;
    let mut address = session.origin();

    progress.started(TransferKind::Write, block_count);
    for (index, block) in page.chunks_exact(BLOCK_SIZE).enumerate() {
        log::debug!("Writing block {}/{} at {}", index + 1, block_count, address);

        session.load_address(address).map_err(|e| match e {
            Error::StateViolation { .. } => state_error(e),
            _ => FlashError::at_block(ErrorCode::LoadAddressFailure, index, e),
        })?;
        session
            .write_block(block)
            .map_err(|e| FlashError::at_block(ErrorCode::FlashWriteFailure, index, e))?;

        address = address.next_block();
        progress.block_done(TransferKind::Write, index + 1);
    }
    progress.finished(TransferKind::Write);

    log::info!("Wrote {} block(s)", block_count);
    Ok(())
}

/// Read back every block of `page` and compare it byte for byte
///
/// The session must be in programming mode. The first differing byte aborts
/// with [`ErrorCode::VerificationFailure`].
pub fn read_and_verify_page<T, P>(
    session: &mut Session<T, P>,
    page: &[u8],
    block_count: usize,
    progress: &mut dyn TransferProgress,
) -> Result<(), FlashError>
where
    T: Transport,
    P: Protocol,
{
    check_page(page, block_count)?;
    let mut address = session.origin();

    progress.started(TransferKind::Verify, block_count);
    for (index, expected) in page.chunks_exact(BLOCK_SIZE).enumerate() {
        log::debug!("Verifying block {}/{} at {}", index + 1, block_count, address);

        session.load_address(address).map_err(|e| match e {
            Error::StateViolation { .. } => state_error(e),
            _ => FlashError::at_block(ErrorCode::LoadAddressFailure, index, e),
        })?;
        let found = session
            .read_block(BLOCK_SIZE)
            .map_err(|e| FlashError::at_block(ErrorCode::ReadFailure, index, e))?;

        if let Some(offset) = expected.iter().zip(&found).position(|(a, b)| a != b) {
            let cause = Error::VerificationFailed {
                block: index,
                offset,
                expected: expected[offset],
                found: found[offset],
            };
            log::error!("{}", cause);
            return Err(FlashError::at_block(
                ErrorCode::VerificationFailure,
                index,
                cause,
            ));
        }

        address = address.next_block();
        progress.block_done(TransferKind::Verify, index + 1);
    }
    progress.finished(TransferKind::Verify);

    log::info!("Verified {} block(s)", block_count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_v2, encode_v2, v2};
    use crate::mock::{v2_answer, MockTransport};
    use crate::protocol::Timing;
    use crate::session::{SessionState, Stk500v2Session};
    use alloc::vec;
    use alloc::vec::Vec;

    fn programming(transport: MockTransport) -> Stk500v2Session<MockTransport> {
        let mut session = Session::stk500v2(transport, Timing::default());
        session.sync().unwrap();
        session.enter_programming_mode().unwrap();
        session
    }

    /// Request bodies sent after sign on and enter
    fn transfer_bodies(session: Stk500v2Session<MockTransport>) -> Vec<Vec<u8>> {
        session
            .into_transport()
            .writes
            .iter()
            .skip(2)
            .map(|w| decode_v2(w).unwrap().body)
            .collect()
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<(TransferKind, usize)>,
        finished: bool,
    }

    impl TransferProgress for Recorder {
        fn started(&mut self, _kind: TransferKind, _total_blocks: usize) {}
        fn block_done(&mut self, kind: TransferKind, blocks_done: usize) {
            self.events.push((kind, blocks_done));
        }
        fn finished(&mut self, _kind: TransferKind) {
            self.finished = true;
        }
    }

    #[test]
    fn test_write_two_blocks() {
        let mut session = programming(MockTransport::stk500v2_acking(0xFF));
        let page = vec![0xAA; 512];
        let mut progress = Recorder::default();

        write_page(&mut session, &page, 2, &mut progress).unwrap();
        assert_eq!(
            progress.events,
            vec![(TransferKind::Write, 1), (TransferKind::Write, 2)]
        );
        assert!(progress.finished);

        let bodies = transfer_bodies(session);
        assert_eq!(bodies.len(), 4);
        assert_eq!(bodies[0], vec![0x06, 0x80, 0x00, 0x00, 0x00]);
        assert_eq!(bodies[1][..3], [0x13, 0x01, 0x00]);
        assert!(bodies[1][10..].iter().all(|&b| b == 0xAA));
        assert_eq!(bodies[2], vec![0x06, 0x80, 0x00, 0x00, 0x80]);
        assert_eq!(bodies[3][..3], [0x13, 0x01, 0x00]);
    }

    #[test]
    fn test_corrupt_second_ack_aborts() {
        let mut writes = 0;
        let transport = MockTransport::new(move |request| {
            let frame = decode_v2(request).unwrap();
            let mut reply = encode_v2(frame.sequence, &v2_answer(&frame.body, 0), &[]).unwrap();
            if frame.body[0] == v2::CMD_PROGRAM_FLASH_ISP {
                writes += 1;
                if writes == 2 {
                    *reply.last_mut().unwrap() ^= 0x01;
                }
            }
            reply
        });
        let mut session = programming(transport);
        let page = vec![0x55; 3 * BLOCK_SIZE];

        let err = write_page(&mut session, &page, 3, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::FlashWriteFailure);
        assert_eq!(err.block, Some(1));
        assert!(matches!(err.cause, Error::ChecksumMismatch { .. }));

        let bodies = transfer_bodies(session);
        let loads = bodies.iter().filter(|b| b[0] == v2::CMD_LOAD_ADDRESS).count();
        assert_eq!(loads, 2);
        assert_eq!(bodies.len(), 4);
    }

    #[test]
    fn test_verify_reports_first_mismatch() {
        let mut reads = 0;
        let transport = MockTransport::new(move |request| {
            let frame = decode_v2(request).unwrap();
            let mut answer = v2_answer(&frame.body, 0x42);
            if frame.body[0] == v2::CMD_READ_FLASH_ISP {
                reads += 1;
                if reads == 4 {
                    answer[2 + 10] = 0x43;
                }
            }
            encode_v2(frame.sequence, &answer, &[]).unwrap()
        });
        let mut session = programming(transport);
        let page = vec![0x42; 5 * BLOCK_SIZE];

        let err = read_and_verify_page(&mut session, &page, 5, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::VerificationFailure);
        assert_eq!(err.block, Some(3));
        assert_eq!(
            err.cause,
            Error::VerificationFailed {
                block: 3,
                offset: 10,
                expected: 0x42,
                found: 0x43
            }
        );

        // Nothing after the mismatching block
        let bodies = transfer_bodies(session);
        assert_eq!(bodies.len(), 8);
    }

    #[test]
    fn test_verify_success() {
        let mut session = programming(MockTransport::stk500v2_acking(0xAA));
        let page = vec![0xAA; 512];
        read_and_verify_page(&mut session, &page, 2, &mut NoProgress).unwrap();
    }

    #[test]
    fn test_invalid_page_rejected_before_io() {
        let mut session = programming(MockTransport::stk500v2_acking(0));
        let err = write_page(&mut session, &[0; 300], 1, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::Failure);
        assert_eq!(
            err.cause,
            Error::InvalidPage {
                len: 300,
                block_count: 1
            }
        );
        let err = read_and_verify_page(&mut session, &[0; 256], 2, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::Failure);
        assert_eq!(transfer_bodies(session).len(), 0);
    }

    #[test]
    fn test_requires_programming_mode() {
        let mut session = Session::stk500v2(MockTransport::stk500v2_acking(0), Timing::default());
        let err = write_page(&mut session, &[0; 256], 1, &mut NoProgress).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProgrammingModeFailure);
        assert!(session.transport_mut().writes.is_empty());
    }

    #[test]
    fn test_abort_is_idempotent() {
        let mut session = programming(MockTransport::stk500v2_acking(0x00));
        let page = vec![0xFF; 2 * BLOCK_SIZE];
        let first = read_and_verify_page(&mut session, &page, 2, &mut NoProgress).unwrap_err();
        let second = read_and_verify_page(&mut session, &page, 2, &mut NoProgress).unwrap_err();
        assert_eq!(first, second);
        assert_eq!(session.state(), SessionState::ProgrammingMode);
    }

    #[test]
    fn test_zero_blocks_is_a_no_op() {
        let mut session = programming(MockTransport::stk500v2_acking(0));
        write_page(&mut session, &[], 0, &mut NoProgress).unwrap();
        assert_eq!(transfer_bodies(session).len(), 0);
    }
}
