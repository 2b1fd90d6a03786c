//! DMA engines and the channel that stages their transfers in allocator memory.

use super::channel::DmaChannel;
use crate::allocator::{Allocator, Slice};
use crate::dma::BufferView;
use crate::error::{Result, TcuError};

/// Direction of a transfer relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host memory to device stream (MM2S)
    Send,
    /// Device stream to host memory (S2MM)
    Receive,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// A DMA engine moving whole buffers of the shared DMA memory.
///
/// Implemented by hardware engines and by the software simulator.
pub trait DmaTransport: std::fmt::Debug {
    /// Bytes per stream word
    fn word_size(&self) -> usize;

    /// Largest single transfer, in words
    fn max_buffer_size(&self) -> usize;

    /// Start moving `buffer` in `direction`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the transfer.
    fn start(&mut self, direction: Direction, buffer: &BufferView) -> Result<()>;

    /// Block until the transfer in `direction` completes.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the engine never finishes, `TransferFailed` if it
    /// reports an error.
    fn wait(&mut self, direction: Direction) -> Result<()>;
}

/// [`DmaChannel`] over a [`DmaTransport`], with staging buffers taken from
/// an [`Allocator`] whose elements are transport words.
#[derive(Debug)]
pub struct TransportChannel<'a, T: DmaTransport> {
    transport: &'a mut T,
    allocator: &'a mut Allocator,
    direction: Direction,
    max_buffer_size: usize,
}

impl<'a, T: DmaTransport> TransportChannel<'a, T> {
    fn new(
        transport: &'a mut T,
        allocator: &'a mut Allocator,
        direction: Direction,
        max_buffer_size: usize,
    ) -> Self {
        let max_buffer_size = max_buffer_size.min(transport.max_buffer_size());
        Self {
            transport,
            allocator,
            direction,
            max_buffer_size,
        }
    }

    /// Outbound channel.
    pub fn send(transport: &'a mut T, allocator: &'a mut Allocator, max_buffer_size: usize) -> Self {
        Self::new(transport, allocator, Direction::Send, max_buffer_size)
    }

    /// Inbound channel.
    pub fn receive(
        transport: &'a mut T,
        allocator: &'a mut Allocator,
        max_buffer_size: usize,
    ) -> Self {
        Self::new(transport, allocator, Direction::Receive, max_buffer_size)
    }

    fn byte_range(&self, buffer: &Slice, offset: usize, len: usize) -> Result<usize> {
        let start = offset * self.word_size();
        if start + len > buffer.view().len() {
            return Err(TcuError::invalid_argument(format!(
                "copy of {len} bytes at word {offset} exceeds {}-word buffer",
                buffer.len()
            )));
        }
        Ok(start)
    }
}

impl<T: DmaTransport> DmaChannel for TransportChannel<'_, T> {
    type Buffer = Slice;

    fn word_size(&self) -> usize {
        self.transport.word_size()
    }

    fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    fn make_buffer(&mut self, size: usize) -> Result<Slice> {
        self.allocator.allocate(size)
    }

    fn transfer(&mut self, buffer: &Slice) -> Result<()> {
        self.transport.start(self.direction, buffer.view())
    }

    fn wait(&mut self) -> Result<()> {
        self.transport.wait(self.direction)
    }

    fn copy_in(&mut self, src: &[u8], dst: &Slice, dst_offset: usize) -> Result<()> {
        let start = self.byte_range(dst, dst_offset, src.len())?;
        dst.view().write(start, src);
        Ok(())
    }

    fn copy_out(&mut self, src: &Slice, src_offset: usize, dst: &mut [u8]) -> Result<()> {
        let start = self.byte_range(src, src_offset, dst.len())?;
        src.view().read(start, dst);
        Ok(())
    }

    fn free(&mut self, buffer: Slice) -> Result<()> {
        self.allocator.free(buffer)
    }
}
