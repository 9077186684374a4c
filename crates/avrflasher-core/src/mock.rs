//! Scripted transport for unit tests

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use crate::codec::{decode_v2, encode_v2, stk500, v2};
use crate::error::Result;
use crate::transport::{ResetStep, Transport};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

/// Transport that answers every write through a closure
pub struct MockTransport {
    rx: VecDeque<u8>,
    responder: Responder,
    pub writes: Vec<Vec<u8>>,
    pub discards: usize,
    pub resets: Vec<Vec<ResetStep>>,
}

impl MockTransport {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<u8> + 'static) -> Self {
        Self {
            rx: VecDeque::new(),
            responder: Box::new(responder),
            writes: Vec::new(),
            discards: 0,
            resets: Vec::new(),
        }
    }

    /// Transport that never answers
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// STK500v2 device that acknowledges everything; reads return `fill`
    pub fn stk500v2_acking(fill: u8) -> Self {
        Self::new(move |request| {
            let frame = decode_v2(request).unwrap();
            encode_v2(frame.sequence, &v2_answer(&frame.body, fill), &[]).unwrap()
        })
    }

    /// Legacy device that acknowledges everything; reads return `fill`
    pub fn legacy_acking(fill: u8) -> Self {
        Self::new(move |request| legacy_answer(request, fill))
    }

    /// Queue bytes as if the device had sent them
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.writes.push(data.to_vec());
        let reply = (self.responder)(data);
        self.rx.extend(reply);
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
        self.discards += 1;
        self.rx.clear();
        Ok(())
    }

    fn pulse_reset(&mut self, steps: &[ResetStep]) -> Result<()> {
        self.resets.push(steps.to_vec());
        Ok(())
    }
}

/// Acknowledging STK500v2 answer body for `request`
pub fn v2_answer(request: &[u8], fill: u8) -> Vec<u8> {
    match request[0] {
        v2::CMD_SIGN_ON => {
            let mut answer = vec![v2::CMD_SIGN_ON, v2::STATUS_CMD_OK, 8];
            answer.extend_from_slice(b"AVRISP_2");
            answer
        }
        v2::CMD_READ_FLASH_ISP => {
            let len = u16::from_be_bytes([request[1], request[2]]) as usize;
            let mut answer = vec![v2::CMD_READ_FLASH_ISP, v2::STATUS_CMD_OK];
            answer.resize(len + 2, fill);
            answer.push(v2::STATUS_CMD_OK);
            answer
        }
        command => vec![command, v2::STATUS_CMD_OK],
    }
}

/// Acknowledging legacy answer for `request`
pub fn legacy_answer(request: &[u8], fill: u8) -> Vec<u8> {
    let mut answer = vec![stk500::STK_INSYNC];
    if request[0] == stk500::STK_READ_PAGE {
        let len = u16::from_be_bytes([request[1], request[2]]) as usize;
        answer.resize(len + 1, fill);
    }
    answer.push(stk500::STK_OK);
    answer
}
