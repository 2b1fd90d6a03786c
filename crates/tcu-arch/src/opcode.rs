//! Instruction opcodes and flag encodings.
//!
//! The instruction header holds the opcode in its high nibble and a
//! per-opcode flags nibble below it.

/// Instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Do nothing.
    NoOp = 0x0,
    /// Push local memory vectors through the array into accumulators.
    MatMul = 0x1,
    /// Move vectors between memories.
    DataMove = 0x2,
    /// Shift weight vectors into the array.
    LoadWeight = 0x3,
    /// Element-wise operation on accumulators.
    Simd = 0x4,
    /// Write a configuration register.
    Configure = 0xF,
}

impl Opcode {
    /// Decode an opcode nibble.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::NoOp),
            0x1 => Some(Self::MatMul),
            0x2 => Some(Self::DataMove),
            0x3 => Some(Self::LoadWeight),
            0x4 => Some(Self::Simd),
            0xF => Some(Self::Configure),
            _ => None,
        }
    }

    /// Mnemonic used in disassembly and samples.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoOp => "NoOp",
            Self::MatMul => "MatMul",
            Self::DataMove => "DataMove",
            Self::LoadWeight => "LoadWeight",
            Self::Simd => "SIMD",
            Self::Configure => "Config",
        }
    }
}

/// Direction of a `DataMove`.
///
/// Bit 0 selects the direction (set: out of local memory); bits 1..4 select
/// the remote memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataMoveFlag {
    /// DRAM0 to local memory.
    Dram0ToMemory = 0x0,
    /// Local memory to DRAM0.
    MemoryToDram0 = 0x1,
    /// DRAM1 to local memory.
    Dram1ToMemory = 0x2,
    /// Local memory to DRAM1.
    MemoryToDram1 = 0x3,
    /// Accumulators to local memory.
    AccumulatorToMemory = 0xC,
    /// Local memory to accumulators, overwriting.
    MemoryToAccumulator = 0xD,
    /// Local memory to accumulators, adding to the current value.
    MemoryToAccumulatorAccumulate = 0xF,
}

impl DataMoveFlag {
    /// All directions.
    pub const ALL: [Self; 7] = [
        Self::Dram0ToMemory,
        Self::MemoryToDram0,
        Self::Dram1ToMemory,
        Self::MemoryToDram1,
        Self::AccumulatorToMemory,
        Self::MemoryToAccumulator,
        Self::MemoryToAccumulatorAccumulate,
    ];

    /// Flags nibble.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Decode a flags nibble.
    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.bits() == bits)
    }
}

/// `MatMul` flag bits.
pub mod matmul {
    /// Add to the accumulator instead of overwriting it.
    pub const ACCUMULATE: u8 = 0b01;
    /// Feed zeroes instead of reading local memory.
    pub const ZEROES: u8 = 0b10;
}

/// `LoadWeight` flag bits.
pub mod load_weight {
    /// Shift in zero vectors instead of reading local memory.
    pub const ZEROES: u8 = 0b1;
}

/// `SIMD` flag bits.
pub mod simd {
    /// Read the input operand from the accumulators.
    pub const READ: u8 = 0b001;
    /// Write the output operand to the accumulators.
    pub const WRITE: u8 = 0b010;
    /// Add the output to the accumulator instead of overwriting it.
    pub const ACCUMULATE: u8 = 0b100;
}

/// SIMD sub-instruction operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SimdOp {
    /// Leave the destination untouched.
    NoOp = 0x00,
    /// Destination = 0.
    Zero = 0x01,
    /// Destination = left.
    Move = 0x02,
    /// Bitwise not of left.
    Not = 0x03,
    /// Bitwise and.
    And = 0x04,
    /// Bitwise or.
    Or = 0x05,
    /// left + 1.
    Increment = 0x06,
    /// left - 1.
    Decrement = 0x07,
    /// left + right.
    Add = 0x08,
    /// left - right.
    Subtract = 0x09,
    /// left × right.
    Multiply = 0x0A,
    /// |left|.
    Abs = 0x0B,
    /// 1 if left > right, else 0.
    GreaterThan = 0x0C,
    /// 1 if left >= right, else 0.
    GreaterThanEqual = 0x0D,
    /// min(left, right).
    Min = 0x0E,
    /// max(left, right).
    Max = 0x0F,
}

impl SimdOp {
    /// All operations in encoding order.
    pub const ALL: [Self; 16] = [
        Self::NoOp,
        Self::Zero,
        Self::Move,
        Self::Not,
        Self::And,
        Self::Or,
        Self::Increment,
        Self::Decrement,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Abs,
        Self::GreaterThan,
        Self::GreaterThanEqual,
        Self::Min,
        Self::Max,
    ];

    /// Operation code.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Decode an operation code.
    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.get(usize::from(bits)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for bits in 0..16u8 {
            if let Some(op) = Opcode::from_bits(bits) {
                assert_eq!(op as u8, bits);
            }
        }
        assert_eq!(Opcode::from_bits(0x5), None);
        assert_eq!(Opcode::Configure.name(), "Config");
    }

    #[test]
    fn test_data_move_flags() {
        assert_eq!(DataMoveFlag::from_bits(0xC), Some(DataMoveFlag::AccumulatorToMemory));
        assert_eq!(DataMoveFlag::from_bits(0x4), None);
        for flag in DataMoveFlag::ALL {
            assert_eq!(DataMoveFlag::from_bits(flag.bits()), Some(flag));
        }
    }

    #[test]
    fn test_simd_op_table() {
        for (i, op) in SimdOp::ALL.iter().enumerate() {
            assert_eq!(usize::from(op.bits()), i);
        }
        assert_eq!(SimdOp::from_bits(0x10), None);
    }
}
