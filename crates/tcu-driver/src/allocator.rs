//! First-fit allocator over the shared DMA buffer.
//!
//! The buffer is treated as an array of fixed-size elements (the transport
//! word). Live allocations are kept in an address-ordered map; the list of
//! free spans is rebuilt from it after every change, so adjacent free
//! regions are always merged.
//!
//! A [`Slice`] is the ownership token for one allocation. It is not `Clone`;
//! `free` consumes it.

use crate::dma::{BufferView, DmaBuffer};
use crate::error::{Result, TcuError};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, trace};

/// A free region, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First element
    pub address: usize,
    /// Number of elements
    pub len: usize,
}

/// One live allocation.
#[derive(Debug)]
pub struct Slice {
    address: usize,
    len: usize,
    view: BufferView,
}

impl Slice {
    /// First element
    pub const fn address(&self) -> usize {
        self.address
    }

    /// Number of elements
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the slice has no elements (never true for an allocated slice)
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte window covering the slice
    pub const fn view(&self) -> &BufferView {
        &self.view
    }

    /// Device-side address of the first element
    pub fn physical_address(&self) -> u64 {
        self.view.physical_address()
    }
}

/// First-fit allocator with physical-address alignment.
#[derive(Debug)]
pub struct Allocator {
    memory: Arc<DmaBuffer>,
    element_size: usize,
    len: usize,
    /// address -> length of every live slice
    live: BTreeMap<usize, usize>,
    available: Vec<Span>,
}

impl Allocator {
    /// Manage `memory` in elements of `element_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `element_size` is zero or the buffer holds no
    /// whole element.
    pub fn new(memory: Arc<DmaBuffer>, element_size: usize) -> Result<Self> {
        if element_size == 0 {
            return Err(TcuError::invalid_argument("element size must be positive"));
        }
        let len = memory.len() / element_size;
        if len == 0 {
            return Err(TcuError::invalid_argument(format!(
                "buffer of {} bytes holds no {element_size}-byte element",
                memory.len()
            )));
        }
        debug!(
            "Allocator over {len} elements of {element_size} bytes at phys={:#x}",
            memory.physical_address()
        );
        Ok(Self {
            memory,
            element_size,
            len,
            live: BTreeMap::new(),
            available: vec![Span { address: 0, len }],
        })
    }

    /// Allocate `size` elements anywhere.
    ///
    /// # Errors
    ///
    /// See [`Allocator::allocate_aligned`].
    pub fn allocate(&mut self, size: usize) -> Result<Slice> {
        self.allocate_aligned(1, size)
    }

    /// Allocate `size` elements whose physical address is a multiple of
    /// `block_size` bytes.
    ///
    /// The first free span that can absorb the alignment padding wins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `size` or `block_size` is zero and
    /// `Allocation` if no free span fits.
    pub fn allocate_aligned(&mut self, block_size: usize, size: usize) -> Result<Slice> {
        if size == 0 {
            return Err(TcuError::invalid_argument("allocation size must be positive"));
        }
        if block_size == 0 {
            return Err(TcuError::invalid_argument("block size must be positive"));
        }

        let block = block_size as u64;
        let found = self.available.iter().find_map(|span| {
            let phys = self.physical_address(span.address);
            let pad_bytes = (block - phys % block) % block;
            let skip = usize::try_from(pad_bytes).ok()?.div_ceil(self.element_size);
            let aligned = self.physical_address(span.address + skip) % block == 0;
            let fits = size.checked_add(skip).is_some_and(|need| span.len >= need);
            (aligned && fits).then_some(span.address + skip)
        });

        let Some(address) = found else {
            return Err(TcuError::Allocation {
                size,
                table: self.table(),
            });
        };

        self.live.insert(address, size);
        self.refresh_available();
        debug!(
            "Allocated {size} elements at {address} (phys={:#x}, block={block_size})",
            self.physical_address(address)
        );
        trace!("{}", self.table());

        Ok(Slice {
            address,
            len: size,
            view: BufferView::new(
                Arc::clone(&self.memory),
                address * self.element_size,
                size * self.element_size,
            ),
        })
    }

    /// Release a slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice was not allocated here.
    pub fn free(&mut self, slice: Slice) -> Result<()> {
        match self.live.get(&slice.address) {
            Some(&len) if len == slice.len && Arc::ptr_eq(slice.view.memory(), &self.memory) => {
                self.live.remove(&slice.address);
                self.refresh_available();
                debug!("Freed {} elements at {}", slice.len, slice.address);
                trace!("{}", self.table());
                Ok(())
            }
            _ => Err(TcuError::invalid_argument(format!(
                "slice {}+{} is not allocated",
                slice.address, slice.len
            ))),
        }
    }

    /// Physical address of element `address`.
    pub fn physical_address(&self, address: usize) -> u64 {
        self.memory.physical_address() + (address * self.element_size) as u64
    }

    /// Free spans in ascending address order.
    pub fn available(&self) -> &[Span] {
        &self.available
    }

    /// Total free elements.
    pub fn free_elements(&self) -> usize {
        self.available.iter().map(|s| s.len).sum()
    }

    /// Number of live slices.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Bytes per element.
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// Capacity in elements.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the allocator manages no elements (never true once constructed).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer being managed.
    pub fn memory(&self) -> &Arc<DmaBuffer> {
        &self.memory
    }

    fn refresh_available(&mut self) {
        self.available.clear();
        let mut cursor = 0;
        for (&address, &len) in &self.live {
            if address > cursor {
                self.available.push(Span {
                    address: cursor,
                    len: address - cursor,
                });
            }
            cursor = address + len;
        }
        if cursor < self.len {
            self.available.push(Span {
                address: cursor,
                len: self.len - cursor,
            });
        }
    }

    /// Human-readable allocation table.
    pub fn table(&self) -> String {
        let mut out = format!(
            "allocation table ({} of {} elements free):",
            self.free_elements(),
            self.len
        );
        for (&address, &len) in &self.live {
            let _ = write!(
                out,
                "\n  {address:>10} +{len:<10} phys={:#x}",
                self.physical_address(address)
            );
        }
        out
    }
}
