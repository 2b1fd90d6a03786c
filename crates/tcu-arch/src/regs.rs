//! Configuration register map.
//!
//! Configuration registers are not memory mapped: they are written by
//! `Configure` instructions carried in the instruction stream, addressed by
//! a 4-bit register id.

/// Alignment, in bytes, of the DRAM windows in physical memory.
///
/// The DRAM address-offset registers hold physical addresses in units of
/// this block.
pub const TCU_BLOCK_SIZE: usize = 1 << 16;

/// Default value for the decoder timeout register.
pub const DEFAULT_DECODER_TIMEOUT: u64 = 100;

/// Configuration register ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// Physical base of DRAM0 in [`TCU_BLOCK_SIZE`] units.
    Dram0AddressOffset = 0x00,
    /// AXI cache attributes for DRAM0 accesses.
    Dram0CacheBehaviour = 0x01,
    /// Physical base of DRAM1 in [`TCU_BLOCK_SIZE`] units.
    Dram1AddressOffset = 0x04,
    /// AXI cache attributes for DRAM1 accesses.
    Dram1CacheBehaviour = 0x05,
    /// Decoder stall timeout.
    Timeout = 0x08,
    /// Program counter value that triggers a trace sample.
    Tracepoint = 0x09,
    /// Program counter.
    ProgramCounter = 0x0A,
    /// Cycles between performance samples; zero disables sampling.
    SampleInterval = 0x0B,
}

impl Register {
    /// All registers in id order.
    pub const ALL: [Self; 8] = [
        Self::Dram0AddressOffset,
        Self::Dram0CacheBehaviour,
        Self::Dram1AddressOffset,
        Self::Dram1CacheBehaviour,
        Self::Timeout,
        Self::Tracepoint,
        Self::ProgramCounter,
        Self::SampleInterval,
    ];

    /// Register id as encoded in a configure instruction.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Look up a register by id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.id() == id)
    }

    /// Short mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dram0AddressOffset => "DRAM0_ADDRESS_OFFSET",
            Self::Dram0CacheBehaviour => "DRAM0_CACHE_BEHAVIOUR",
            Self::Dram1AddressOffset => "DRAM1_ADDRESS_OFFSET",
            Self::Dram1CacheBehaviour => "DRAM1_CACHE_BEHAVIOUR",
            Self::Timeout => "TIMEOUT",
            Self::Tracepoint => "TRACEPOINT",
            Self::ProgramCounter => "PROGRAM_COUNTER",
            Self::SampleInterval => "SAMPLE_INTERVAL",
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Performance sample records produced when `SampleInterval` is non-zero.
///
/// ```text
/// byte 0..4   program counter (LE)
/// byte 4..6   unit flags (LE), two bits per unit: valid, ready
/// byte 6..8   reserved
/// ```
pub mod sample {
    /// Bytes per sample record.
    pub const SAMPLE_SIZE_BYTES: usize = 8;

    /// Program counter value of a sample taken while the decoder was idle.
    pub const INVALID_PROGRAM_COUNTER: u32 = u32::MAX;

    /// Units reported in the flags field, lowest bit pair first.
    pub const UNITS: [&str; 8] = [
        "Array",
        "Acc",
        "Dataflow",
        "DRAM1",
        "DRAM0",
        "MemPortB",
        "MemPortA",
        "Instruction",
    ];

    /// Flags bit pair of a unit: `(valid, ready)` masks.
    pub const fn unit_bits(unit: usize) -> (u16, u16) {
        let shift = unit * 2;
        (1 << shift, 1 << (shift + 1))
    }

    /// Systolic array.
    pub const ARRAY: usize = 0;
    /// Accumulators.
    pub const ACC: usize = 1;
    /// Dataflow between memories.
    pub const DATAFLOW: usize = 2;
    /// DRAM1 port.
    pub const DRAM1: usize = 3;
    /// DRAM0 port.
    pub const DRAM0: usize = 4;
    /// Local memory port B.
    pub const MEM_PORT_B: usize = 5;
    /// Local memory port A.
    pub const MEM_PORT_A: usize = 6;
    /// Instruction decoder.
    pub const INSTRUCTION: usize = 7;

    /// One decoded sample record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sample {
        /// Program counter at sampling time
        pub program_counter: u32,
        /// Valid/ready bit pairs, see [`unit_bits`]
        pub flags: u16,
    }

    impl Sample {
        /// Decode a record.
        pub fn from_bytes(bytes: [u8; SAMPLE_SIZE_BYTES]) -> Self {
            Self {
                program_counter: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                flags: u16::from_le_bytes([bytes[4], bytes[5]]),
            }
        }

        /// Encode a record.
        pub fn to_bytes(self) -> [u8; SAMPLE_SIZE_BYTES] {
            let mut out = [0u8; SAMPLE_SIZE_BYTES];
            out[..4].copy_from_slice(&self.program_counter.to_le_bytes());
            out[4..6].copy_from_slice(&self.flags.to_le_bytes());
            out
        }

        /// Whether the decoder was executing a program.
        pub const fn is_valid(&self) -> bool {
            self.program_counter != INVALID_PROGRAM_COUNTER
        }

        /// Whether `unit` presented valid data.
        pub const fn unit_valid(&self, unit: usize) -> bool {
            self.flags & unit_bits(unit).0 != 0
        }

        /// Whether `unit` was ready to accept data.
        pub const fn unit_ready(&self, unit: usize) -> bool {
            self.flags & unit_bits(unit).1 != 0
        }
    }
}
