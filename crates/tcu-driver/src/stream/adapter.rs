//! Double-buffered transfers of arbitrarily long word sequences.
//!
//! Data is cut into chunks of at most `buffer_size` words. Two equal
//! ping/pong buffers alternate: while one is in flight the host fills (on
//! write) or drains (on read) the other. A third buffer holds the
//! `total % buffer_size` remainder and goes first when non-empty.
//!
//! ```text
//! write:  copy[r] | xfer[r] copy[0] wait | xfer[0] copy[1] wait | xfer[1] ... wait
//! read:   xfer[r] wait | xfer[0] drain[r] wait | xfer[1] drain[0] wait | ... drain[last]
//! ```
//!
//! A host copy never touches the buffer currently in flight. If a transfer
//! fails to complete, its buffer is leaked rather than freed, since the
//! engine may still write to it.

use super::channel::DmaChannel;
use crate::error::{Result, TcuError};
use tracing::{debug, trace, warn};

const REMAINDER: usize = 2;

/// Greatest common divisor.
pub(crate) const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple.
pub(crate) const fn lcm(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        0
    } else {
        a / gcd(a, b) * b
    }
}

enum Payload<'d> {
    Write(&'d [u8]),
    Read(&'d mut [u8]),
}

impl Payload<'_> {
    fn len(&self) -> usize {
        match self {
            Self::Write(d) => d.len(),
            Self::Read(d) => d.len(),
        }
    }
}

/// Ping, pong and remainder buffers of one transfer.
struct Pool<B> {
    slots: [Option<B>; 3],
    lens: [usize; 3],
    /// Slot handed to the engine and not yet waited for
    in_flight: Option<usize>,
}

impl<B> Pool<B> {
    fn allocate<C>(channel: &mut C, buffer_size: usize, remainder: usize, full_chunks: bool) -> Result<Self>
    where
        C: DmaChannel<Buffer = B>,
    {
        let mut pool = Self {
            slots: [None, None, None],
            lens: [buffer_size, buffer_size, remainder],
            in_flight: None,
        };
        let wanted = [full_chunks, full_chunks, remainder > 0];
        for slot in 0..3 {
            if !wanted[slot] {
                continue;
            }
            match channel.make_buffer(pool.lens[slot]) {
                Ok(buffer) => pool.slots[slot] = Some(buffer),
                Err(e) => {
                    pool.release(channel)?;
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    fn get(&self, slot: usize) -> Result<&B> {
        self.slots[slot]
            .as_ref()
            .ok_or_else(|| TcuError::invalid_state(format!("staging buffer {slot} not allocated")))
    }

    fn release<C>(mut self, channel: &mut C) -> Result<()>
    where
        C: DmaChannel<Buffer = B>,
    {
        if let Some(slot) = self.in_flight {
            if self.slots[slot].take().is_some() {
                warn!("Leaking staging buffer {slot}: its transfer never completed");
            }
        }
        let mut result = Ok(());
        for buffer in self.slots.into_iter().flatten() {
            let freed = channel.free(buffer);
            if result.is_ok() {
                result = freed;
            }
        }
        result
    }
}

/// Pipelined transfer engine over any [`DmaChannel`].
#[derive(Debug)]
pub struct DoubleBufferedAdapter<'c, C: DmaChannel> {
    channel: &'c mut C,
}

impl<'c, C: DmaChannel> DoubleBufferedAdapter<'c, C> {
    /// Adapter driving `channel`.
    pub fn new(channel: &'c mut C) -> Self {
        Self { channel }
    }

    /// Largest chunk, in words, that is at most the channel's maximum and
    /// spans a whole multiple of `align` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `align` is zero or no such chunk fits.
    pub fn buffer_size(&self, align: usize) -> Result<usize> {
        if align == 0 {
            return Err(TcuError::invalid_argument("alignment must be positive"));
        }
        let word = self.channel.word_size();
        let max = self.channel.max_buffer_size();
        let align_words = align / gcd(align, word);
        let size = max - max % align_words;
        if size == 0 {
            return Err(TcuError::CapacityExceeded {
                requested: align_words,
                max,
            });
        }
        Ok(size)
    }

    /// Send `data`, keeping every chunk a multiple of `align` bytes.
    ///
    /// `data` must be a whole number of words. An empty payload moves nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not word-aligned, buffers cannot be
    /// obtained, or the channel fails.
    pub fn write(&mut self, data: &[u8], align: usize) -> Result<()> {
        self.run(Payload::Write(data), align)
    }

    /// Fill `data` from the channel.
    ///
    /// `data` must be a whole number of words. An empty payload moves nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not word-aligned, buffers cannot be
    /// obtained, or the channel fails.
    pub fn read(&mut self, data: &mut [u8]) -> Result<()> {
        self.run(Payload::Read(data), 1)
    }

    fn run(&mut self, mut payload: Payload<'_>, align: usize) -> Result<()> {
        let word = self.channel.word_size();
        if word == 0 || payload.len() % word != 0 {
            return Err(TcuError::invalid_argument(format!(
                "payload of {} bytes is not a whole number of {word}-byte words",
                payload.len()
            )));
        }
        let total = payload.len() / word;
        if total == 0 {
            trace!("zero-length transfer, nothing to do");
            return Ok(());
        }

        let buffer_size = self.buffer_size(align)?;
        let remainder = total % buffer_size;
        debug!("Transfer of {total} words: buffer_size={buffer_size}, remainder={remainder}");

        let mut pool =
            Pool::allocate(&mut *self.channel, buffer_size, remainder, total >= buffer_size)?;
        let result = self.pump(&mut pool, &mut payload, total, word);
        let released = pool.release(&mut *self.channel);
        result.and(released)
    }

    fn pump(
        &mut self,
        pool: &mut Pool<C::Buffer>,
        payload: &mut Payload<'_>,
        total: usize,
        word: usize,
    ) -> Result<()> {
        let mut current = if pool.lens[REMAINDER] > 0 { REMAINDER } else { 0 };
        let mut next = 1;
        let mut prev: Option<usize> = None;
        let mut transferred = 0;
        let mut index = 0;

        if let Payload::Write(data) = payload {
            let n = pool.lens[current];
            self.channel
                .copy_in(&data[index * word..(index + n) * word], pool.get(current)?, 0)?;
            index += n;
        }

        while transferred < total {
            self.channel.transfer(pool.get(current)?)?;
            pool.in_flight = Some(current);
            transferred += pool.lens[current];

            match payload {
                Payload::Write(data) => {
                    let n = pool.lens[next];
                    if index + n <= total {
                        self.channel
                            .copy_in(&data[index * word..(index + n) * word], pool.get(next)?, 0)?;
                        index += n;
                    }
                }
                Payload::Read(data) => {
                    if let Some(p) = prev {
                        let n = pool.lens[p];
                        self.channel
                            .copy_out(pool.get(p)?, 0, &mut data[index * word..(index + n) * word])?;
                        index += n;
                    }
                }
            }

            prev = Some(current);
            current = next;
            next = (next + 1) % 2;
            self.channel.wait()?;
            pool.in_flight = None;
        }

        if let (Payload::Read(data), Some(p)) = (payload, prev) {
            let n = pool.lens[p];
            self.channel
                .copy_out(pool.get(p)?, 0, &mut data[index * word..(index + n) * word])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::mock::MockChannel;

    const BS: usize = 8;

    fn pattern(words: usize) -> Vec<u8> {
        (0..words).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(lcm(7, 8), 56);
        assert_eq!(lcm(8, 8), 8);
        assert_eq!(lcm(0, 8), 0);
    }

    #[test]
    fn test_write_lengths() {
        for words in [BS, BS + 1, 2 * BS + 1, 5 * BS + 1, 100 * BS] {
            let data = pattern(words);
            let mut channel = MockChannel::sender(1, BS);
            DoubleBufferedAdapter::new(&mut channel).write(&data, 1).unwrap();
            assert_eq!(channel.sent(), &data[..], "length {words}");
            assert_eq!(channel.live_buffers(), 0);
        }
    }

    #[test]
    fn test_read_lengths() {
        for words in [BS, BS + 1, 2 * BS + 1, 5 * BS + 1, 100 * BS] {
            let source = pattern(words);
            let mut channel = MockChannel::receiver(1, BS, source.clone());
            let mut data = vec![0u8; words];
            DoubleBufferedAdapter::new(&mut channel).read(&mut data).unwrap();
            assert_eq!(data, source, "length {words}");
            assert_eq!(channel.live_buffers(), 0);
        }
    }

    #[test]
    fn test_short_transfer_uses_only_remainder() {
        let data = pattern(BS - 3);
        let mut channel = MockChannel::sender(1, BS);
        DoubleBufferedAdapter::new(&mut channel).write(&data, 1).unwrap();
        assert_eq!(channel.sent(), &data[..]);
        assert_eq!(channel.transfers(), 1);
        assert_eq!(channel.buffers_made(), 1);
    }

    #[test]
    fn test_exact_multiple_skips_remainder() {
        let data = pattern(3 * BS);
        let mut channel = MockChannel::sender(1, BS);
        DoubleBufferedAdapter::new(&mut channel).write(&data, 1).unwrap();
        assert_eq!(channel.transfers(), 3);
        assert_eq!(channel.buffers_made(), 2);
    }

    #[test]
    fn test_multi_byte_words() {
        let data = pattern(8 * 21);
        let mut channel = MockChannel::sender(8, 4);
        DoubleBufferedAdapter::new(&mut channel).write(&data, 8).unwrap();
        assert_eq!(channel.sent(), &data[..]);
    }

    #[test]
    fn test_alignment_shrinks_buffer() {
        let mut channel = MockChannel::sender(8, 1000);
        let adapter = DoubleBufferedAdapter::new(&mut channel);
        // 7-byte instructions on an 8-byte bus: chunks of 7 words
        assert_eq!(adapter.buffer_size(7).unwrap(), 994);
        assert_eq!(adapter.buffer_size(8).unwrap(), 1000);
        assert_eq!(adapter.buffer_size(16).unwrap(), 1000);
        assert!(adapter.buffer_size(0).is_err());

        let mut tiny = MockChannel::sender(8, 4);
        let adapter = DoubleBufferedAdapter::new(&mut tiny);
        assert!(matches!(
            adapter.buffer_size(7),
            Err(TcuError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_zero_length_is_noop() {
        let mut channel = MockChannel::sender(8, 4);
        DoubleBufferedAdapter::new(&mut channel).write(&[], 8).unwrap();
        let mut empty = [];
        DoubleBufferedAdapter::new(&mut channel).read(&mut empty).unwrap();
        assert_eq!(channel.transfers(), 0);
        assert_eq!(channel.buffers_made(), 0);
    }

    #[test]
    fn test_partial_word_rejected() {
        let mut channel = MockChannel::sender(8, 4);
        let err = DoubleBufferedAdapter::new(&mut channel).write(&[0; 12], 8);
        assert!(matches!(err, Err(TcuError::InvalidArgument { .. })));
    }

    #[test]
    fn test_failed_wait_keeps_in_flight_buffer() {
        // the second chunk never arrives
        let mut channel = MockChannel::receiver(1, BS, pattern(BS));
        let mut data = vec![0u8; 3 * BS];
        assert!(matches!(
            DoubleBufferedAdapter::new(&mut channel).read(&mut data),
            Err(TcuError::TransferFailed { .. })
        ));
        // the idle ping buffer is freed, the pong buffer stays with the engine
        assert_eq!(channel.buffers_made(), 2);
        assert_eq!(channel.live_buffers(), 1);
    }
}
