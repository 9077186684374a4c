//! Response matching
//!
//! Reads one framed response from the transport and either returns its
//! validated body or a typed error; a partially validated result is never
//! handed out. For STK500v2 the checks run in the order structure →
//! sequence → size bound → checksum, so a hostile size field is rejected
//! before it drives a read.

use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use crate::codec::{checksum, stk500, v2, Header};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Read exactly `buf.len()` bytes or fail with [`Error::Timeout`]
fn read_exact<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<()> {
    let n = transport.read(buf, timeout)?;
    if n < buf.len() {
        log::debug!("short read: wanted {} bytes, got {}", buf.len(), n);
        return Err(Error::Timeout);
    }
    Ok(())
}

/// Await an STK500v2 response
///
/// `expected_sequence` is the session counter *after* it was incremented for
/// the request, so the device must echo `expected_sequence - 1`. Bodies
/// larger than `max_body` are refused without being read.
pub fn await_v2_response<T: Transport + ?Sized>(
    transport: &mut T,
    expected_sequence: u8,
    max_body: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    // Header plus at least the checksum byte
    let buffered = transport.wait_for(v2::HEADER_SIZE + 1, timeout)?;
    if buffered < v2::HEADER_SIZE + 1 {
        log::debug!("stk500v2: no response ({} bytes buffered)", buffered);
        return Err(Error::Timeout);
    }

    let mut raw_header = [0u8; v2::HEADER_SIZE];
    read_exact(transport, &mut raw_header, timeout)?;
    let header = Header::parse(&raw_header).inspect_err(|e| log::error!("stk500v2: {}", e))?;

    if header.sequence.wrapping_add(1) != expected_sequence {
        let err = Error::SequenceMismatch {
            expected: expected_sequence.wrapping_sub(1),
            actual: header.sequence,
        };
        log::error!("stk500v2: {}", err);
        return Err(err);
    }

    let size = header.size as usize;
    if size > max_body {
        let err = Error::ResponseTooLarge {
            size,
            max: max_body,
        };
        log::error!("stk500v2: {}", err);
        return Err(err);
    }

    let mut body = vec![0u8; size];
    read_exact(transport, &mut body, timeout)?;
    let mut received = [0u8; 1];
    read_exact(transport, &mut received, timeout)?;

    let computed = checksum(&raw_header) ^ checksum(&body);
    if computed != received[0] {
        let err = Error::ChecksumMismatch {
            computed,
            received: received[0],
        };
        log::error!("stk500v2: {}", err);
        return Err(err);
    }

    log::trace!("stk500v2: <- seq {} body {:02X?}", header.sequence, body);
    Ok(body)
}

/// Await a legacy STK500 response of exactly `expected_len` bytes
///
/// The response must be `STK_INSYNC ∥ payload ∥ STK_OK`; the payload is
/// returned. Nothing is indexed until all `expected_len` bytes have arrived.
pub fn await_legacy_response<T: Transport + ?Sized>(
    transport: &mut T,
    expected_len: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    debug_assert!(expected_len >= 2, "legacy response holds at least SYNC and OK");

    let buffered = transport.wait_for(expected_len, timeout)?;
    if buffered < expected_len {
        log::debug!(
            "stk500: serial timeout ({} of {} bytes buffered)",
            buffered,
            expected_len
        );
        return Err(Error::Timeout);
    }

    let mut response = vec![0u8; expected_len];
    read_exact(transport, &mut response, timeout)?;

    if response[0] != stk500::STK_INSYNC || response[expected_len - 1] != stk500::STK_OK {
        log::error!(
            "stk500: sync failure (got 0x{:02X} .. 0x{:02X})",
            response[0],
            response[expected_len - 1]
        );
        return Err(Error::SyncFailure);
    }

    response.pop();
    response.remove(0);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_v2;
    use crate::mock::MockTransport;

    const T: Duration = Duration::from_millis(10);

    fn fed(bytes: &[u8]) -> MockTransport {
        let mut transport = MockTransport::silent();
        transport.feed(bytes);
        transport
    }

    #[test]
    fn test_valid_response() {
        let frame = encode_v2(4, &[0x10, 0x00], &[]).unwrap();
        let mut transport = fed(&frame);
        assert_eq!(await_v2_response(&mut transport, 5, 2, T), Ok(vec![0x10, 0x00]));
        assert_eq!(transport.bytes_buffered().unwrap(), 0);
    }

    #[test]
    fn test_timeout_on_empty() {
        let mut transport = MockTransport::silent();
        assert_eq!(await_v2_response(&mut transport, 1, 2, T), Err(Error::Timeout));
    }

    #[test]
    fn test_timeout_on_truncated_body() {
        let frame = encode_v2(0, &[0x14, 0x00, 0xAA, 0xBB], &[]).unwrap();
        let mut transport = fed(&frame[..8]);
        assert_eq!(await_v2_response(&mut transport, 1, 16, T), Err(Error::Timeout));
    }

    #[test]
    fn test_malformed_header() {
        let mut frame = encode_v2(0, &[0x01], &[]).unwrap();
        frame[0] = 0x1C;
        let mut transport = fed(&frame);
        assert_eq!(
            await_v2_response(&mut transport, 1, 11, T),
            Err(Error::MalformedHeader {
                start: 0x1C,
                token: 0x0E
            })
        );
    }

    #[test]
    fn test_sequence_accepted_only_for_next_counter() {
        for seq in [0u8, 1, 127, 254, 255] {
            let frame = encode_v2(seq, &[0x06, 0x00], &[]).unwrap();
            for counter in 0..=255u8 {
                let mut transport = fed(&frame);
                let result = await_v2_response(&mut transport, counter, 2, T);
                if counter == seq.wrapping_add(1) {
                    assert!(result.is_ok(), "seq {} counter {}", seq, counter);
                } else {
                    assert_eq!(
                        result,
                        Err(Error::SequenceMismatch {
                            expected: counter.wrapping_sub(1),
                            actual: seq
                        })
                    );
                }
            }
        }
    }

    #[test]
    fn test_size_checked_before_body_read() {
        let frame = encode_v2(0, &[0x14, 0x00, 1, 2, 3, 4, 5, 6], &[]).unwrap();
        let mut transport = fed(&frame);
        assert_eq!(
            await_v2_response(&mut transport, 1, 2, T),
            Err(Error::ResponseTooLarge { size: 8, max: 2 })
        );
        // Only the header was consumed
        assert_eq!(
            transport.bytes_buffered().unwrap(),
            frame.len() - v2::HEADER_SIZE
        );
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let frame = encode_v2(9, &[0x13, 0x00, 0x5A, 0xC3], &[]).unwrap();
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                let mut transport = fed(&corrupted);
                let result = await_v2_response(&mut transport, 10, 16, T);
                if byte >= v2::HEADER_SIZE {
                    assert!(
                        matches!(result, Err(Error::ChecksumMismatch { .. })),
                        "byte {} bit {}: {:?}",
                        byte,
                        bit,
                        result
                    );
                } else {
                    assert!(result.is_err(), "byte {} bit {}", byte, bit);
                }
            }
        }
    }

    #[test]
    fn test_legacy_ok() {
        let mut transport = fed(&[0x14, 0x10]);
        assert_eq!(await_legacy_response(&mut transport, 2, T), Ok(vec![]));

        let mut transport = fed(&[0x14, 0xDE, 0xAD, 0x10]);
        assert_eq!(await_legacy_response(&mut transport, 4, T), Ok(vec![0xDE, 0xAD]));
    }

    #[test]
    fn test_legacy_bad_markers() {
        let mut transport = fed(&[0x15, 0x10]);
        assert_eq!(await_legacy_response(&mut transport, 2, T), Err(Error::SyncFailure));

        let mut transport = fed(&[0x14, 0x00, 0x00, 0x11]);
        assert_eq!(await_legacy_response(&mut transport, 4, T), Err(Error::SyncFailure));
    }

    #[test]
    fn test_legacy_short_read_is_not_indexed() {
        let mut transport = fed(&[0x14, 0x00, 0x00]);
        assert_eq!(await_legacy_response(&mut transport, 258, T), Err(Error::Timeout));
        // Nothing consumed
        assert_eq!(transport.bytes_buffered().unwrap(), 3);
    }
}
