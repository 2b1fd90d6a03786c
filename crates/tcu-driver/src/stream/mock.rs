//! In-memory [`DmaChannel`] for tests.
//!
//! Buffers are plain vectors. A sender records every completed transfer in
//! order; a receiver fills each transfer from a fixed source. The channel
//! enforces the transfer/wait discipline: a second `transfer` before `wait`,
//! or a host copy touching the buffer in flight, is an error.

use super::channel::DmaChannel;
use crate::error::{Result, TcuError};

/// Handle to a mock staging buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct MockBuffer(usize);

/// Test double for one DMA direction.
#[derive(Debug)]
pub struct MockChannel {
    word_size: usize,
    max_buffer_size: usize,
    buffers: Vec<Option<Vec<u8>>>,
    in_flight: Option<usize>,
    /// `None` for a sender
    source: Option<Vec<u8>>,
    cursor: usize,
    sent: Vec<u8>,
    transfers: usize,
}

impl MockChannel {
    fn new(word_size: usize, max_buffer_size: usize, source: Option<Vec<u8>>) -> Self {
        Self {
            word_size,
            max_buffer_size,
            buffers: Vec::new(),
            in_flight: None,
            source,
            cursor: 0,
            sent: Vec::new(),
            transfers: 0,
        }
    }

    /// Outbound channel.
    pub fn sender(word_size: usize, max_buffer_size: usize) -> Self {
        Self::new(word_size, max_buffer_size, None)
    }

    /// Inbound channel delivering `source` in order.
    pub fn receiver(word_size: usize, max_buffer_size: usize, source: Vec<u8>) -> Self {
        Self::new(word_size, max_buffer_size, Some(source))
    }

    /// Bytes delivered by completed send transfers.
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Transfers started.
    pub const fn transfers(&self) -> usize {
        self.transfers
    }

    /// Buffers ever created.
    pub fn buffers_made(&self) -> usize {
        self.buffers.len()
    }

    /// Buffers not yet freed.
    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    fn buffer(&self, handle: &MockBuffer) -> Result<&Vec<u8>> {
        self.buffers
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| TcuError::invalid_argument(format!("unknown buffer {}", handle.0)))
    }

    fn idle(&self, handle: &MockBuffer) -> Result<()> {
        if self.in_flight == Some(handle.0) {
            return Err(TcuError::invalid_state(format!(
                "buffer {} accessed while in flight",
                handle.0
            )));
        }
        Ok(())
    }
}

impl DmaChannel for MockChannel {
    type Buffer = MockBuffer;

    fn word_size(&self) -> usize {
        self.word_size
    }

    fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    fn make_buffer(&mut self, size: usize) -> Result<MockBuffer> {
        if size == 0 || size > self.max_buffer_size {
            return Err(TcuError::invalid_argument(format!("bad buffer size {size}")));
        }
        self.buffers.push(Some(vec![0; size * self.word_size]));
        Ok(MockBuffer(self.buffers.len() - 1))
    }

    fn transfer(&mut self, buffer: &MockBuffer) -> Result<()> {
        self.buffer(buffer)?;
        if let Some(busy) = self.in_flight {
            return Err(TcuError::transfer_failed(format!(
                "transfer of buffer {busy} still in flight"
            )));
        }
        self.in_flight = Some(buffer.0);
        self.transfers += 1;
        Ok(())
    }

    fn wait(&mut self) -> Result<()> {
        let id = self
            .in_flight
            .take()
            .ok_or_else(|| TcuError::invalid_state("wait without transfer"))?;
        let Some(buf) = self.buffers[id].as_mut() else {
            return Err(TcuError::invalid_state(format!("buffer {id} freed in flight")));
        };
        match &self.source {
            None => self.sent.extend_from_slice(buf),
            Some(source) => {
                let end = self.cursor + buf.len();
                let chunk = source
                    .get(self.cursor..end)
                    .ok_or_else(|| TcuError::transfer_failed("receive source exhausted"))?;
                buf.copy_from_slice(chunk);
                self.cursor = end;
            }
        }
        Ok(())
    }

    fn copy_in(&mut self, src: &[u8], dst: &MockBuffer, dst_offset: usize) -> Result<()> {
        self.idle(dst)?;
        let start = dst_offset * self.word_size;
        let buf = self.buffers[dst.0]
            .as_mut()
            .ok_or_else(|| TcuError::invalid_argument("unknown buffer"))?;
        buf.get_mut(start..start + src.len())
            .ok_or_else(|| TcuError::invalid_argument("copy past end of buffer"))?
            .copy_from_slice(src);
        Ok(())
    }

    fn copy_out(&mut self, src: &MockBuffer, src_offset: usize, dst: &mut [u8]) -> Result<()> {
        self.idle(src)?;
        let start = src_offset * self.word_size;
        let buf = self.buffer(src)?;
        dst.copy_from_slice(
            buf.get(start..start + dst.len())
                .ok_or_else(|| TcuError::invalid_argument("copy past end of buffer"))?,
        );
        Ok(())
    }

    fn free(&mut self, buffer: MockBuffer) -> Result<()> {
        self.idle(&buffer)?;
        self.buffers
            .get_mut(buffer.0)
            .and_then(Option::take)
            .map(drop)
            .ok_or_else(|| TcuError::invalid_argument(format!("double free of buffer {}", buffer.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_transfer_rejected() {
        let mut ch = MockChannel::sender(1, 4);
        let a = ch.make_buffer(4).unwrap();
        let b = ch.make_buffer(4).unwrap();
        ch.transfer(&a).unwrap();
        assert!(matches!(ch.transfer(&b), Err(TcuError::TransferFailed { .. })));
        assert!(ch.copy_in(&[1], &a, 0).is_err());
        ch.copy_in(&[1, 2, 3, 4], &b, 0).unwrap();
        ch.wait().unwrap();
        assert!(ch.wait().is_err());
    }

    #[test]
    fn test_double_free() {
        let mut ch = MockChannel::sender(1, 4);
        let a = ch.make_buffer(2).unwrap();
        ch.free(a).unwrap();
        assert!(ch.free(MockBuffer(0)).is_err());
    }
}
