//! Streaming byte payloads through a DMA engine.
//!
//! [`Stream`] is the driver-facing end: it owns a [`DmaTransport`], borrows
//! the driver's [`Allocator`] per call for staging buffers, and hands the
//! actual pipelining to [`DoubleBufferedAdapter`].

pub mod adapter;
pub mod channel;
pub mod mock;
pub mod transport;

pub use adapter::DoubleBufferedAdapter;
pub use channel::DmaChannel;
pub use transport::{Direction, DmaTransport, TransportChannel};

use crate::allocator::Allocator;
use crate::error::{Result, TcuError};
use adapter::lcm;
use tracing::trace;

/// One DMA engine plus its transfer-size policy.
#[derive(Debug)]
pub struct Stream<T: DmaTransport> {
    transport: T,
    max_buffer_size: usize,
}

impl<T: DmaTransport> Stream<T> {
    /// Stream over `transport` using staging buffers of at most
    /// `max_buffer_size` words.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero size and `CapacityExceeded` if
    /// the engine cannot move that many words at once.
    pub fn new(transport: T, max_buffer_size: usize) -> Result<Self> {
        if max_buffer_size == 0 {
            return Err(TcuError::invalid_argument("DMA buffer size must be positive"));
        }
        if max_buffer_size > transport.max_buffer_size() {
            return Err(TcuError::CapacityExceeded {
                requested: max_buffer_size,
                max: transport.max_buffer_size(),
            });
        }
        Ok(Self {
            transport,
            max_buffer_size,
        })
    }

    /// Bytes per stream word.
    pub fn word_size(&self) -> usize {
        self.transport.word_size()
    }

    /// Largest staging buffer in words.
    pub const fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// The underlying engine.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn check_allocator(&self, allocator: &Allocator) -> Result<()> {
        if allocator.element_size() == self.word_size() {
            Ok(())
        } else {
            Err(TcuError::invalid_argument(format!(
                "allocator elements of {} bytes do not match {}-byte stream words",
                allocator.element_size(),
                self.word_size()
            )))
        }
    }

    /// Send `data` so that every transfer carries a multiple of `align`
    /// bytes.
    ///
    /// When the payload is not a whole number of `lcm(align, word)` units it
    /// is zero-padded up to the next one.
    ///
    /// # Errors
    ///
    /// Returns an error if `align` is zero, staging memory runs out, or the
    /// engine fails.
    pub fn write(&mut self, allocator: &mut Allocator, data: &[u8], align: usize) -> Result<()> {
        self.check_allocator(allocator)?;
        if align == 0 {
            return Err(TcuError::invalid_argument("alignment must be positive"));
        }
        let unit = lcm(align, self.word_size());
        let max = self.max_buffer_size;
        let mut channel = TransportChannel::send(&mut self.transport, allocator, max);
        let mut adapter = DoubleBufferedAdapter::new(&mut channel);
        if data.len() % unit == 0 {
            adapter.write(data, align)
        } else {
            let padded_len = data.len().div_ceil(unit) * unit;
            trace!("Padding {}-byte payload to {padded_len} bytes", data.len());
            let mut padded = data.to_vec();
            padded.resize(padded_len, 0);
            adapter.write(&padded, align)
        }
    }

    /// Receive `size` bytes.
    ///
    /// Whole words are transferred; bytes past `size` in the last word are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if staging memory runs out or the engine fails.
    pub fn read(&mut self, allocator: &mut Allocator, size: usize) -> Result<Vec<u8>> {
        self.check_allocator(allocator)?;
        let word = self.word_size();
        let mut out = vec![0u8; size.div_ceil(word) * word];
        let max = self.max_buffer_size;
        let mut channel = TransportChannel::receive(&mut self.transport, allocator, max);
        DoubleBufferedAdapter::new(&mut channel).read(&mut out)?;
        out.truncate(size);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::{BufferView, DmaBuffer};
    use std::sync::Arc;

    /// Engine that copies sent buffers into a log and serves reads from a
    /// counter.
    #[derive(Debug, Default)]
    struct LoopbackTransport {
        log: Vec<u8>,
        next: u8,
        started: Option<Direction>,
    }

    impl DmaTransport for LoopbackTransport {
        fn word_size(&self) -> usize {
            4
        }

        fn max_buffer_size(&self) -> usize {
            16
        }

        fn start(&mut self, direction: Direction, buffer: &BufferView) -> Result<()> {
            match direction {
                Direction::Send => self.log.extend(buffer.to_vec()),
                Direction::Receive => {
                    let bytes: Vec<u8> = (0..buffer.len())
                        .map(|_| {
                            self.next = self.next.wrapping_add(1);
                            self.next
                        })
                        .collect();
                    buffer.write(0, &bytes);
                }
            }
            self.started = Some(direction);
            Ok(())
        }

        fn wait(&mut self, direction: Direction) -> Result<()> {
            match self.started.take() {
                Some(d) if d == direction => Ok(()),
                _ => Err(TcuError::invalid_state("wait without transfer")),
            }
        }
    }

    fn allocator(word: usize) -> Allocator {
        let memory = Arc::new(DmaBuffer::allocate(1024, 0x1000).unwrap());
        Allocator::new(memory, word).unwrap()
    }

    #[test]
    fn test_write_pads_to_alignment() {
        let mut alloc = allocator(4);
        let mut stream = Stream::new(LoopbackTransport::default(), 8).unwrap();
        // 7-byte instructions over 4-byte words: units of 28 bytes
        let data: Vec<u8> = (1..=14).collect();
        stream.write(&mut alloc, &data, 7).unwrap();
        let log = &stream.transport().log;
        assert_eq!(log.len(), 28);
        assert_eq!(&log[..14], &data[..]);
        assert!(log[14..].iter().all(|&b| b == 0));
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn test_write_aligned_payload_unpadded() {
        let mut alloc = allocator(4);
        let mut stream = Stream::new(LoopbackTransport::default(), 8).unwrap();
        let data = vec![9u8; 4 * 40];
        stream.write(&mut alloc, &data, 4).unwrap();
        assert_eq!(stream.transport().log, data);
    }

    #[test]
    fn test_read_truncates() {
        let mut alloc = allocator(4);
        let mut stream = Stream::new(LoopbackTransport::default(), 8).unwrap();
        let data = stream.read(&mut alloc, 37).unwrap();
        assert_eq!(data.len(), 37);
        assert_eq!(data[0], 1);
        assert_eq!(data[36], 37);
        assert_eq!(alloc.live_count(), 0);
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(Stream::new(LoopbackTransport::default(), 0).is_err());
        assert!(matches!(
            Stream::new(LoopbackTransport::default(), 17),
            Err(TcuError::CapacityExceeded { .. })
        ));

        let mut stream = Stream::new(LoopbackTransport::default(), 8).unwrap();
        let mut wrong = allocator(8);
        assert!(stream.write(&mut wrong, &[0; 8], 8).is_err());
        let mut alloc = allocator(4);
        assert!(stream.write(&mut alloc, &[0; 8], 0).is_err());
    }
}
