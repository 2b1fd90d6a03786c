//! Device-visible DMA memory.
//!
//! A [`DmaBuffer`] is one physically contiguous region shared between the
//! host and the TCU. The accelerator writes it behind the compiler's back,
//! so host access never goes through Rust references into the region: every
//! read and write is a copy through the raw pointer, fenced, and polling
//! comparisons use volatile loads.
//!
//! [`BufferView`] is a bounds-checked window onto a buffer; the allocator
//! hands one out with every slice.

use crate::error::{Result, TcuError};
use rustix::mm::munmap;
use std::alloc::Layout;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

/// Page size used to align heap-backed buffers.
pub const PAGE_SIZE: usize = 4096;

#[derive(Debug)]
enum Backing {
    /// `std::alloc` allocation with this layout
    Heap(Layout),
    /// `mmap` of a DMA-capable device
    Mapped,
}

/// Contiguous device-visible memory with a known physical base address
#[derive(Debug)]
pub struct DmaBuffer {
    /// Host virtual address
    ptr: *mut u8,
    /// Size in bytes
    len: usize,
    /// Address of the first byte as seen by the device
    physical_address: u64,
    backing: Backing,
}

// SAFETY: DmaBuffer owns its memory exclusively. Moving it between threads
// doesn't invalidate the allocation or the mapping.
unsafe impl Send for DmaBuffer {}

// SAFETY: all access goes through bounds-checked raw copies and volatile loads;
// no references into the region are ever created. Overlapping writes from
// different threads are excluded by the allocator, which owns every range.
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    /// Allocate page-aligned, zeroed host memory and present it to the device
    /// at `physical_address`.
    ///
    /// Heap memory is not physically contiguous; this backing serves the
    /// software simulator, where the physical address is nominal.
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is zero or the allocation fails.
    pub fn allocate(len: usize, physical_address: u64) -> Result<Self> {
        if len == 0 {
            return Err(TcuError::invalid_argument("DMA buffer must not be empty"));
        }
        let layout = Layout::from_size_align(len, PAGE_SIZE)
            .map_err(|e| TcuError::invalid_argument(format!("Invalid DMA buffer layout: {e}")))?;

        // SAFETY: layout has non-zero size and a power-of-two alignment; the
        // pointer is released in Drop with the same layout.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(TcuError::Allocation {
                size: len,
                table: "host allocation failed".into(),
            });
        }

        tracing::debug!("Allocated DMA buffer: vaddr={ptr:p}, phys={physical_address:#x}, size={len:#x}");

        Ok(Self {
            ptr,
            len,
            physical_address,
            backing: Backing::Heap(layout),
        })
    }

    /// Wrap an existing shared mapping of a DMA-capable device.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `mmap` of `len` bytes, stay mapped until this
    /// buffer is dropped and not be unmapped by anyone else. The buffer takes
    /// ownership and unmaps it in `Drop`.
    pub(crate) unsafe fn from_mapping(ptr: *mut u8, len: usize, physical_address: u64) -> Self {
        Self {
            ptr,
            len,
            physical_address,
            backing: Backing::Mapped,
        }
    }

    /// Size in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty (never true for a constructed buffer)
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Device-side address of byte 0
    pub const fn physical_address(&self) -> u64 {
        self.physical_address
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "DMA access {offset:#x}+{len:#x} out of bounds (size {:#x})",
            self.len
        );
    }

    /// Copy bytes out of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer.
    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        fence(Ordering::Acquire);
        // SAFETY: range checked above; dst is a distinct host allocation.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len()) };
    }

    /// Copy bytes into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer.
    pub fn write(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        // SAFETY: range checked above; src is a distinct host allocation.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len()) };
        fence(Ordering::Release);
    }

    /// Copy `len` bytes from `src` to `dst` inside the buffer (ranges may overlap).
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds the buffer.
    pub fn copy_within(&self, src: usize, dst: usize, len: usize) {
        self.check(src, len);
        self.check(dst, len);
        // SAFETY: both ranges checked above; ptr::copy handles overlap.
        unsafe { std::ptr::copy(self.ptr.add(src), self.ptr.add(dst), len) };
        fence(Ordering::Release);
    }

    /// Set `len` bytes to `value`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer.
    pub fn fill(&self, offset: usize, len: usize, value: u8) {
        self.check(offset, len);
        // SAFETY: range checked above.
        unsafe { std::ptr::write_bytes(self.ptr.add(offset), value, len) };
        fence(Ordering::Release);
    }

    /// Compare buffer contents against `expected` with volatile loads, so a
    /// polling loop observes device writes.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer.
    pub fn equals(&self, offset: usize, expected: &[u8]) -> bool {
        self.check(offset, expected.len());
        fence(Ordering::Acquire);
        expected.iter().enumerate().all(|(i, &byte)| {
            // SAFETY: offset + i < offset + expected.len() <= len, checked above.
            unsafe { std::ptr::read_volatile(self.ptr.add(offset + i)) == byte }
        })
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap(layout) => {
                // SAFETY: ptr was returned by alloc_zeroed with this layout in allocate().
                unsafe { std::alloc::dealloc(self.ptr, layout) };
            }
            Backing::Mapped => {
                // SAFETY: ptr/len describe the mapping handed over in from_mapping().
                if let Err(e) = unsafe { munmap(self.ptr.cast(), self.len) } {
                    tracing::warn!("munmap of DMA buffer failed: {e}");
                }
            }
        }
        tracing::debug!("Freed DMA buffer at phys={:#x}", self.physical_address);
    }
}

/// Bounds-checked window onto a [`DmaBuffer`].
///
/// Offsets passed to the accessors are relative to the window.
#[derive(Debug, Clone)]
pub struct BufferView {
    memory: Arc<DmaBuffer>,
    offset: usize,
    len: usize,
}

impl BufferView {
    /// Window of `len` bytes starting at byte `offset` of `memory`.
    ///
    /// # Panics
    ///
    /// Panics if the window exceeds the buffer.
    pub fn new(memory: Arc<DmaBuffer>, offset: usize, len: usize) -> Self {
        memory.check(offset, len);
        Self {
            memory,
            offset,
            len,
        }
    }

    /// View of a whole buffer.
    pub fn whole(memory: Arc<DmaBuffer>) -> Self {
        let len = memory.len();
        Self::new(memory, 0, len)
    }

    /// Size in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset of the window in its buffer
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Device-side address of the window's first byte
    pub fn physical_address(&self) -> u64 {
        self.memory.physical_address() + self.offset as u64
    }

    /// Underlying buffer
    pub fn memory(&self) -> &Arc<DmaBuffer> {
        &self.memory
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "view access {offset:#x}+{len:#x} out of bounds (window {:#x})",
            self.len
        );
    }

    /// Copy bytes out of the window.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the window.
    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        self.memory.read(self.offset + offset, dst);
    }

    /// Copy bytes into the window.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the window.
    pub fn write(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        self.memory.write(self.offset + offset, src);
    }

    /// Set `len` bytes to `value`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the window.
    pub fn fill(&self, offset: usize, len: usize, value: u8) {
        self.check(offset, len);
        self.memory.fill(self.offset + offset, len, value);
    }

    /// Volatile comparison against `expected`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the window.
    pub fn equals(&self, offset: usize, expected: &[u8]) -> bool {
        self.check(offset, expected.len());
        self.memory.equals(self.offset + offset, expected)
    }

    /// Copy the whole window out.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.read(0, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zeroed() {
        let buf = DmaBuffer::allocate(8192, 0x4000_0000).unwrap();
        assert_eq!(buf.len(), 8192);
        assert_eq!(buf.physical_address(), 0x4000_0000);
        assert!(buf.equals(0, &[0u8; 8192]));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            DmaBuffer::allocate(0, 0),
            Err(TcuError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_read_write_copy() {
        let buf = DmaBuffer::allocate(64, 0).unwrap();
        buf.write(4, &[1, 2, 3, 4]);
        buf.copy_within(4, 32, 4);
        let mut out = [0u8; 4];
        buf.read(32, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        buf.fill(32, 2, 0xAA);
        assert!(buf.equals(32, &[0xAA, 0xAA, 3, 4]));
    }

    #[test]
    fn test_view_is_relative() {
        let buf = Arc::new(DmaBuffer::allocate(256, 0x1000).unwrap());
        let view = BufferView::new(Arc::clone(&buf), 64, 16);
        assert_eq!(view.physical_address(), 0x1040);
        view.write(0, &[7; 16]);
        let mut out = [0u8; 1];
        buf.read(64, &mut out);
        assert_eq!(out, [7]);
        assert_eq!(view.to_vec(), vec![7; 16]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_view_bounds() {
        let buf = Arc::new(DmaBuffer::allocate(256, 0).unwrap());
        let view = BufferView::new(buf, 0, 16);
        view.write(12, &[0; 8]);
    }
}
