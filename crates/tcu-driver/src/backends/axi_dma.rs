//! Xilinx AXI DMA in simple (direct register) mode, mapped through UIO.
//!
//! The TCU overlay streams instructions in over MM2S and samples out over
//! S2MM. Each direction is started by writing its address and length
//! registers; completion is observed by polling the status register.

// Register access needs exact casts for the mmap API and 32-bit halves of
// physical addresses. Registers are naturally aligned by the IP.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_ptr_alignment)]

use crate::config::PollConfig;
use crate::dma::BufferView;
use crate::error::{Result, TcuError};
use crate::stream::{Direction, DmaTransport};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::Path;

/// AXI DMA register offsets
pub mod regs {
    /// MM2S control
    pub const MM2S_DMACR: usize = 0x00;
    /// MM2S status
    pub const MM2S_DMASR: usize = 0x04;
    /// MM2S source address, low word
    pub const MM2S_SA: usize = 0x18;
    /// MM2S source address, high word
    pub const MM2S_SA_MSB: usize = 0x1C;
    /// MM2S transfer length in bytes; writing it starts the transfer
    pub const MM2S_LENGTH: usize = 0x28;
    /// S2MM control
    pub const S2MM_DMACR: usize = 0x30;
    /// S2MM status
    pub const S2MM_DMASR: usize = 0x34;
    /// S2MM destination address, low word
    pub const S2MM_DA: usize = 0x48;
    /// S2MM destination address, high word
    pub const S2MM_DA_MSB: usize = 0x4C;
    /// S2MM buffer length in bytes; writing it starts the transfer
    pub const S2MM_LENGTH: usize = 0x58;

    /// Control register bits
    pub mod control {
        /// Run/stop
        pub const RUN: u32 = 1 << 0;
        /// Soft reset
        pub const RESET: u32 = 1 << 2;
    }

    /// Status register bits
    pub mod status {
        /// Channel halted
        pub const HALTED: u32 = 1 << 0;
        /// Channel idle: the last transfer completed
        pub const IDLE: u32 = 1 << 1;
        /// Internal, slave or decode error
        pub const ERRORS: u32 = 0b111 << 4;
    }
}

/// Largest length the simple-mode length register accepts (26-bit field).
pub const MAX_TRANSFER_BYTES: usize = (1 << 26) - 1;

/// Register block mapped into the process.
pub struct MappedRegion {
    ptr: *mut u8,
    size: usize,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .finish()
    }
}

// SAFETY: MappedRegion owns its mapping exclusively; the mapping is valid
// process-wide regardless of the thread using it.
unsafe impl Send for MappedRegion {}

// SAFETY: all access is bounds-checked volatile loads and stores of whole
// registers; there is no Rust-visible state behind the pointer.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `size` bytes of `file` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the mapping fails.
    pub fn map(file: &File, size: usize, offset: u64) -> Result<Self> {
        // SAFETY: a fresh shared mapping chosen by the kernel; the pointer is
        // valid for `size` bytes until munmap in Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                offset,
            )
        }
        .map_err(std::io::Error::from)?;
        tracing::debug!("Mapped register block at {ptr:p}, size={size:#x}");
        Ok(Self {
            ptr: ptr.cast(),
            size,
        })
    }

    /// Read a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapping.
    pub fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: in bounds and 4-byte aligned; volatile since the device
        // changes the value.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    /// Write a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapping.
    pub fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: in bounds and 4-byte aligned; volatile since the store has
        // device side effects.
        unsafe { std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value) }
    }

    /// Mapping size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size are exactly the mapping created in map().
        if let Err(e) = unsafe { munmap(self.ptr.cast(), self.size) } {
            tracing::warn!("munmap of register block failed: {e}");
        }
    }
}

/// Register offsets of one direction.
struct Channel {
    control: usize,
    status: usize,
    address: usize,
    address_msb: usize,
    length: usize,
}

const fn channel(direction: Direction) -> Channel {
    match direction {
        Direction::Send => Channel {
            control: regs::MM2S_DMACR,
            status: regs::MM2S_DMASR,
            address: regs::MM2S_SA,
            address_msb: regs::MM2S_SA_MSB,
            length: regs::MM2S_LENGTH,
        },
        Direction::Receive => Channel {
            control: regs::S2MM_DMACR,
            status: regs::S2MM_DMASR,
            address: regs::S2MM_DA,
            address_msb: regs::S2MM_DA_MSB,
            length: regs::S2MM_LENGTH,
        },
    }
}

/// One AXI DMA core.
#[derive(Debug)]
pub struct AxiDma {
    regs: MappedRegion,
    word_size: usize,
    poll: PollConfig,
}

impl AxiDma {
    /// Open the DMA core behind a UIO device such as `/dev/uio0`.
    ///
    /// `data_width_bits` is the core's memory-mapped data width.
    ///
    /// # Errors
    ///
    /// Returns an error if the device or its sysfs map size cannot be read,
    /// or the data width is not a whole number of bytes.
    pub fn open(uio: impl AsRef<Path>, data_width_bits: usize, poll: PollConfig) -> Result<Self> {
        let uio = uio.as_ref();
        let name = uio
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TcuError::invalid_argument(format!("bad UIO path {}", uio.display())))?;
        let size_path = format!("/sys/class/uio/{name}/maps/map0/size");
        let size = parse_number(&std::fs::read_to_string(&size_path)?)?;
        let file = OpenOptions::new().read(true).write(true).open(uio)?;
        let regs = MappedRegion::map(&file, size, 0)?;
        tracing::info!("Opened AXI DMA {} ({data_width_bits}-bit)", uio.display());
        Self::from_region(regs, data_width_bits, poll)
    }

    /// Drive an already mapped register block.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a data width that is not a positive
    /// multiple of 8 or a block too small for the register map.
    pub fn from_region(regs: MappedRegion, data_width_bits: usize, poll: PollConfig) -> Result<Self> {
        if data_width_bits == 0 || data_width_bits % 8 != 0 {
            return Err(TcuError::invalid_argument(format!(
                "DMA data width of {data_width_bits} bits is not whole bytes"
            )));
        }
        if regs.size() < regs::S2MM_LENGTH + 4 {
            return Err(TcuError::invalid_argument(format!(
                "register block of {} bytes too small for AXI DMA",
                regs.size()
            )));
        }
        Ok(Self {
            regs,
            word_size: data_width_bits / 8,
            poll,
        })
    }

    /// Reset both channels.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the reset bit does not clear.
    pub fn reset(&mut self) -> Result<()> {
        for direction in [Direction::Send, Direction::Receive] {
            let ch = channel(direction);
            self.regs.write32(ch.control, regs::control::RESET);
            self.poll_register(ch.control, |cr| cr & regs::control::RESET == 0, 0)?;
        }
        Ok(())
    }

    /// Status register of one direction.
    pub fn status(&self, direction: Direction) -> u32 {
        self.regs.read32(channel(direction).status)
    }

    /// Poll `reg` until `done` holds, failing as soon as a bit of
    /// `error_mask` is set.
    fn poll_register(&self, reg: usize, done: impl Fn(u32) -> bool, error_mask: u32) -> Result<u64> {
        let interval = self.poll.interval();
        for poll in 0..self.poll.max_polls {
            let value = self.regs.read32(reg);
            if done(value) {
                return Ok(poll + 1);
            }
            if value & error_mask != 0 {
                return Err(TcuError::transfer_failed(format!(
                    "DMA status {value:#010x} reports an error"
                )));
            }
            if let Some(interval) = interval {
                std::thread::sleep(interval);
            } else if self.poll.yield_interval > 0 && poll % self.poll.yield_interval == 0 {
                std::thread::yield_now();
            }
        }
        Err(TcuError::Timeout {
            polls: self.poll.max_polls,
        })
    }
}

impl DmaTransport for AxiDma {
    fn word_size(&self) -> usize {
        self.word_size
    }

    fn max_buffer_size(&self) -> usize {
        MAX_TRANSFER_BYTES / self.word_size
    }

    fn start(&mut self, direction: Direction, buffer: &BufferView) -> Result<()> {
        let len = buffer.len();
        if len == 0 || len > MAX_TRANSFER_BYTES {
            return Err(TcuError::CapacityExceeded {
                requested: len,
                max: MAX_TRANSFER_BYTES,
            });
        }
        let ch = channel(direction);
        let address = buffer.physical_address();
        self.regs.write32(ch.control, regs::control::RUN);
        self.regs.write32(ch.address, address as u32);
        self.regs.write32(ch.address_msb, (address >> 32) as u32);
        self.regs.write32(ch.length, len as u32);
        tracing::trace!("AXI DMA {direction} of {len} bytes at {address:#x}");
        Ok(())
    }

    fn wait(&mut self, direction: Direction) -> Result<()> {
        let ch = channel(direction);
        let polls = self.poll_register(
            ch.status,
            |sr| sr & regs::status::IDLE != 0,
            regs::status::ERRORS,
        )?;
        tracing::trace!("AXI DMA {direction} complete after {polls} polls");
        Ok(())
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal sysfs value.
pub(crate) fn parse_number(text: &str) -> Result<usize> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| TcuError::invalid_argument(format!("cannot parse '{text}': {e}")))
}
