//! The DMA channel capability consumed by the double-buffered adapter.

use crate::error::Result;

/// One direction of a DMA engine, together with a way to obtain staging
/// buffers for it.
///
/// Sizes and offsets count transport words of [`DmaChannel::word_size`]
/// bytes. `transfer` starts moving a whole buffer and returns immediately;
/// `wait` blocks until the most recent transfer completed. Only one
/// transfer is in flight at a time.
pub trait DmaChannel {
    /// Staging buffer handle
    type Buffer;

    /// Bytes per transport word
    fn word_size(&self) -> usize;

    /// Largest buffer, in words, a single transfer may move
    fn max_buffer_size(&self) -> usize;

    /// Obtain a staging buffer of `size` words.
    ///
    /// # Errors
    ///
    /// Returns an error if no buffer of that size can be provided.
    fn make_buffer(&mut self, size: usize) -> Result<Self::Buffer>;

    /// Start transferring the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer cannot be started.
    fn transfer(&mut self, buffer: &Self::Buffer) -> Result<()>;

    /// Block until the transfer in flight completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer failed or never completes.
    fn wait(&mut self) -> Result<()>;

    /// Copy host bytes into a buffer at word offset `dst_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is in flight or too small.
    fn copy_in(&mut self, src: &[u8], dst: &Self::Buffer, dst_offset: usize) -> Result<()>;

    /// Copy buffer contents from word offset `src_offset` into host bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is in flight or too small.
    fn copy_out(&mut self, src: &Self::Buffer, src_offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Release a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is unknown.
    fn free(&mut self, buffer: Self::Buffer) -> Result<()>;
}
