//! Instruction word layout.
//!
//! Field widths depend on the architecture: every operand must be wide
//! enough to address the largest memory it may index, plus a stride field.
//! Each field is rounded up to whole bytes.
//!
//! ```text
//! MSB                                                                  LSB
//! [ opcode:4 | flags:4 ][ operand2 ][ operand1 (+stride1) ][ operand0 (+stride0) ]
//!   header (8 bits)
//! ```
//!
//! | Operand | Addresses |
//! |---------|-----------|
//! | 0 | local, accumulators |
//! | 1 | local, DRAM0, DRAM1, accumulators |
//! | 2 | transfer sizes and the SIMD sub-instruction |
//!
//! The widest preset needs 72 bits, so instructions are held in a `u128`.

use crate::error::{Result, TcuError};
use bytes::{BufMut, BytesMut};
use tcu_arch::opcode::{load_weight, DataMoveFlag, Opcode, SimdOp};
use tcu_arch::{Architecture, Register};

/// Bits of the SIMD sub-instruction op field.
pub const SIMD_OP_SIZE_BITS: u32 = 5;

/// Smallest `i` with `2^i >= x`.
pub fn log2_ceil(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        usize::BITS - (x - 1).leading_zeros()
    }
}

/// Round a bit count up to a whole number of bytes.
pub const fn round_size_bits(bits: u32) -> u32 {
    bits.div_ceil(8) * 8
}

const fn mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// One encoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(u128);

impl Instruction {
    /// Raw instruction word.
    pub const fn bits(self) -> u128 {
        self.0
    }

    /// Wrap a raw instruction word.
    pub const fn from_bits(bits: u128) -> Self {
        Self(bits)
    }
}

/// Raw fields of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fields {
    /// Opcode nibble
    pub opcode: u8,
    /// Flags nibble
    pub flags: u8,
    /// Operand 0 including its stride bits
    pub operand0: u64,
    /// Operand 1 including its stride bits
    pub operand1: u64,
    /// Operand 2
    pub operand2: u64,
}

/// Unpacked SIMD sub-instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdSub {
    /// Operation code
    pub op: u8,
    /// Left source register (0 = input port)
    pub left: u64,
    /// Right source register (0 = input port)
    pub right: u64,
    /// Destination register (0 = output port)
    pub dest: u64,
}

/// Typed view of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// No operation
    NoOp,
    /// Matrix multiply
    MatMul {
        /// `opcode::matmul` flag bits
        flags: u8,
        /// First local memory vector
        memory_address: u64,
        /// First accumulator vector
        accumulator_address: u64,
        /// Vectors minus one
        size: u64,
    },
    /// Move vectors between memories
    DataMove {
        /// Direction
        flag: DataMoveFlag,
        /// Local memory vector
        memory_address: u64,
        /// DRAM or accumulator vector
        remote_address: u64,
        /// Vectors minus one
        size: u64,
    },
    /// Shift weights into the array
    LoadWeight {
        /// Shift in zeroes instead of reading memory
        zeroes: bool,
        /// First local memory vector
        address: u64,
        /// Vectors minus one
        size: u64,
    },
    /// Element-wise accumulator operation
    Simd {
        /// `opcode::simd` flag bits
        flags: u8,
        /// Sub-instruction
        sub: SimdSub,
        /// Accumulator read address
        read_address: u64,
        /// Accumulator write address
        write_address: u64,
    },
    /// Configuration register write
    Configure {
        /// Register id
        register: u8,
        /// Value
        value: u64,
    },
    /// Opcode or flags this layout does not know
    Unknown {
        /// Opcode nibble
        opcode: u8,
        /// Flags nibble
        flags: u8,
    },
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::NoOp => f.write_str("NoOp"),
            Self::MatMul {
                flags,
                memory_address,
                accumulator_address,
                size,
            } => write!(
                f,
                "MatMul flags={flags:#03b} mem={memory_address} acc={accumulator_address} size={size}"
            ),
            Self::DataMove {
                flag,
                memory_address,
                remote_address,
                size,
            } => write!(
                f,
                "DataMove {flag:?} mem={memory_address} remote={remote_address} size={size}"
            ),
            Self::LoadWeight {
                zeroes,
                address,
                size,
            } => write!(f, "LoadWeight zeroes={zeroes} mem={address} size={size}"),
            Self::Simd {
                flags,
                sub,
                read_address,
                write_address,
            } => {
                let op = SimdOp::from_bits(sub.op)
                    .map_or_else(|| format!("op{:#x}", sub.op), |op| format!("{op:?}"));
                write!(
                    f,
                    "SIMD flags={flags:#05b} {op} dest={} left={} right={} read={read_address} write={write_address}",
                    sub.dest, sub.left, sub.right
                )
            }
            Self::Configure { register, value } => {
                match Register::from_id(register) {
                    Some(reg) => write!(f, "Config {reg}={value:#x}"),
                    None => write!(f, "Config reg{register:#x}={value:#x}"),
                }
            }
            Self::Unknown { opcode, flags } => write!(f, "??? opcode={opcode:#x} flags={flags:#x}"),
        }
    }
}

/// Bit layout of instructions for one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionLayout {
    header_size_bits: u32,
    stride0_size_bits: u32,
    stride1_size_bits: u32,
    simd_operand_size_bits: u32,
    simd_instruction_size_bits: u32,
    operand0_address_size_bits: u32,
    operand1_address_size_bits: u32,
    operand2_address_size_bits: u32,
    operand0_size_bits: u32,
    operand1_size_bits: u32,
    operand2_size_bits: u32,
    operands_size_bits: u32,
    instruction_size_bits: u32,
    op_shift: u32,
    flags_shift: u32,
    operand2_shift: u32,
    operand1_shift: u32,
}

impl InstructionLayout {
    /// Derive the layout for `arch`.
    ///
    /// # Errors
    ///
    /// Returns an error if a depth is zero or the operands together exceed
    /// 64 bits.
    pub fn new(arch: &Architecture) -> Result<Self> {
        if let Some(field) = arch.zero_field() {
            return Err(TcuError::invalid_argument(format!(
                "architecture {field} must be positive"
            )));
        }

        let local = log2_ceil(arch.local_depth);
        let dram0 = log2_ceil(arch.dram0_depth);
        let dram1 = log2_ceil(arch.dram1_depth);
        let acc = log2_ceil(arch.accumulator_depth);

        let stride0_size_bits = log2_ceil(arch.stride0_depth);
        let stride1_size_bits = log2_ceil(arch.stride1_depth);

        // register 0 is the input/output port
        let simd_operand_size_bits = log2_ceil(arch.simd_registers_depth + 1);
        let simd_instruction_size_bits = 3 * simd_operand_size_bits + SIMD_OP_SIZE_BITS;

        let operand0_address_size_bits = local.max(acc);
        let operand1_address_size_bits = local.max(dram0).max(dram1).max(acc);
        let operand2_address_size_bits = local
            .min(acc)
            .max(local.min(dram0))
            .max(local.min(dram1))
            .max(simd_instruction_size_bits);

        let operand0_size_bits = round_size_bits(operand0_address_size_bits + stride0_size_bits);
        let operand1_size_bits = round_size_bits(operand1_address_size_bits + stride1_size_bits);
        let operand2_size_bits = round_size_bits(operand2_address_size_bits);

        let header_size_bits = round_size_bits(8);
        let operands_size_bits = operand0_size_bits + operand1_size_bits + operand2_size_bits;
        let instruction_size_bits = header_size_bits + operands_size_bits;
        if operands_size_bits > u64::BITS {
            return Err(TcuError::invalid_argument(format!(
                "instruction of {instruction_size_bits} bits exceeds the supported width"
            )));
        }

        Ok(Self {
            header_size_bits,
            stride0_size_bits,
            stride1_size_bits,
            simd_operand_size_bits,
            simd_instruction_size_bits,
            operand0_address_size_bits,
            operand1_address_size_bits,
            operand2_address_size_bits,
            operand0_size_bits,
            operand1_size_bits,
            operand2_size_bits,
            operands_size_bits,
            instruction_size_bits,
            op_shift: operands_size_bits + 4,
            flags_shift: operands_size_bits,
            operand2_shift: operand0_size_bits + operand1_size_bits,
            operand1_shift: operand0_size_bits,
        })
    }

    /// Total instruction width in bits.
    pub const fn instruction_size_bits(&self) -> u32 {
        self.instruction_size_bits
    }

    /// Total instruction width in bytes.
    pub const fn instruction_size_bytes(&self) -> usize {
        (self.instruction_size_bits / 8) as usize
    }

    /// Header width in bits.
    pub const fn header_size_bits(&self) -> u32 {
        self.header_size_bits
    }

    /// Widths of the three operand fields.
    pub const fn operand_size_bits(&self) -> [u32; 3] {
        [
            self.operand0_size_bits,
            self.operand1_size_bits,
            self.operand2_size_bits,
        ]
    }

    /// Address widths of the three operand fields (without strides).
    pub const fn operand_address_size_bits(&self) -> [u32; 3] {
        [
            self.operand0_address_size_bits,
            self.operand1_address_size_bits,
            self.operand2_address_size_bits,
        ]
    }

    /// Stride field widths of operands 0 and 1.
    pub const fn stride_size_bits(&self) -> [u32; 2] {
        [self.stride0_size_bits, self.stride1_size_bits]
    }

    /// Width of one SIMD register index.
    pub const fn simd_operand_size_bits(&self) -> u32 {
        self.simd_operand_size_bits
    }

    /// Width of a packed SIMD sub-instruction.
    pub const fn simd_instruction_size_bits(&self) -> u32 {
        self.simd_instruction_size_bits
    }

    /// Pack an instruction.
    ///
    /// Every argument must fit its field; wider values are a programming
    /// error and are caught by debug assertions.
    pub fn instruction(&self, op: u8, flags: u8, arg0: u64, arg1: u64, arg2: u64) -> Instruction {
        debug_assert!(op <= 0xF, "opcode {op:#x} exceeds 4 bits");
        debug_assert!(flags <= 0xF, "flags {flags:#x} exceed 4 bits");
        debug_assert!(u128::from(arg0) <= mask(self.operand0_size_bits), "operand0 {arg0:#x} too wide");
        debug_assert!(u128::from(arg1) <= mask(self.operand1_size_bits), "operand1 {arg1:#x} too wide");
        debug_assert!(u128::from(arg2) <= mask(self.operand2_size_bits), "operand2 {arg2:#x} too wide");
        Instruction(
            u128::from(op) << self.op_shift
                | u128::from(flags) << self.flags_shift
                | u128::from(arg2) << self.operand2_shift
                | u128::from(arg1) << self.operand1_shift
                | u128::from(arg0),
        )
    }

    /// `NoOp`.
    pub fn no_op(&self) -> Instruction {
        self.instruction(Opcode::NoOp as u8, 0, 0, 0, 0)
    }

    /// `MatMul` of `size + 1` vectors from local memory into accumulators.
    pub fn matmul(
        &self,
        flags: u8,
        memory_address: u64,
        accumulator_address: u64,
        size: u64,
    ) -> Instruction {
        self.instruction(Opcode::MatMul as u8, flags, memory_address, accumulator_address, size)
    }

    /// `DataMove` of `size + 1` vectors.
    pub fn data_move(
        &self,
        flag: DataMoveFlag,
        memory_address: u64,
        remote_address: u64,
        size: u64,
    ) -> Instruction {
        self.instruction(
            Opcode::DataMove as u8,
            flag.bits(),
            memory_address,
            remote_address,
            size,
        )
    }

    /// `LoadWeight` of `size + 1` vectors starting at `address`.
    pub fn load_weight(&self, zeroes: bool, address: u64, size: u64) -> Instruction {
        let flags = if zeroes { load_weight::ZEROES } else { 0 };
        self.instruction(Opcode::LoadWeight as u8, flags, address, size, 0)
    }

    /// `SIMD` dispatch of a packed sub-instruction.
    pub fn simd(
        &self,
        flags: u8,
        sub_instruction: u64,
        read_address: u64,
        write_address: u64,
    ) -> Instruction {
        self.instruction(
            Opcode::Simd as u8,
            flags,
            write_address,
            read_address,
            sub_instruction,
        )
    }

    /// Pack a SIMD sub-instruction.
    pub fn simd_sub(&self, op: SimdOp, left: u64, right: u64, dest: u64) -> u64 {
        let n = self.simd_operand_size_bits;
        let reg_mask = (1u64 << n) - 1;
        debug_assert!(left <= reg_mask && right <= reg_mask && dest <= reg_mask);
        u64::from(op.bits()) << (3 * n) | left << (2 * n) | right << n | dest
    }

    /// Unpack a SIMD sub-instruction.
    pub fn unpack_simd_sub(&self, sub: u64) -> SimdSub {
        let n = self.simd_operand_size_bits;
        let reg_mask = (1u64 << n) - 1;
        #[allow(clippy::cast_possible_truncation)]
        let op = ((sub >> (3 * n)) & ((1 << SIMD_OP_SIZE_BITS) - 1)) as u8;
        SimdSub {
            op,
            left: (sub >> (2 * n)) & reg_mask,
            right: (sub >> n) & reg_mask,
            dest: sub & reg_mask,
        }
    }

    /// Configuration register write.
    pub fn configure(&self, register: Register, value: u64) -> Instruction {
        debug_assert!(
            u128::from(value) <= mask(self.operands_size_bits),
            "config value {value:#x} too wide"
        );
        Instruction(
            0xF_u128 << self.op_shift | u128::from(value) << 4 | u128::from(register.id()),
        )
    }

    /// Operand 0 carrying a stride: `stride << address_bits | offset`.
    pub fn operand0(&self, offset: u64, stride: u64) -> u64 {
        Self::strided(offset, stride, self.operand0_address_size_bits, self.stride0_size_bits)
    }

    /// Operand 1 carrying a stride: `stride << address_bits | offset`.
    pub fn operand1(&self, offset: u64, stride: u64) -> u64 {
        Self::strided(offset, stride, self.operand1_address_size_bits, self.stride1_size_bits)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn strided(offset: u64, stride: u64, address_bits: u32, stride_bits: u32) -> u64 {
        let address = u128::from(offset) & mask(address_bits);
        let stride = u128::from(stride) & mask(stride_bits);
        (stride << address_bits | address) as u64
    }

    /// Split an operand into `(address, stride)`.
    ///
    /// `index` selects operand 0 or 1.
    pub fn split_operand(&self, index: usize, operand: u64) -> (u64, u64) {
        let (address_bits, stride_bits) = if index == 0 {
            (self.operand0_address_size_bits, self.stride0_size_bits)
        } else {
            (self.operand1_address_size_bits, self.stride1_size_bits)
        };
        #[allow(clippy::cast_possible_truncation)]
        let address = (u128::from(operand) & mask(address_bits)) as u64;
        #[allow(clippy::cast_possible_truncation)]
        let stride = ((u128::from(operand) >> address_bits) & mask(stride_bits)) as u64;
        (address, stride)
    }

    /// Unpack the raw fields of an instruction.
    #[allow(clippy::cast_possible_truncation)]
    pub fn fields(&self, instruction: Instruction) -> Fields {
        let word = instruction.0;
        Fields {
            opcode: ((word >> self.op_shift) & 0xF) as u8,
            flags: ((word >> self.flags_shift) & 0xF) as u8,
            operand0: (word & mask(self.operand0_size_bits)) as u64,
            operand1: ((word >> self.operand1_shift) & mask(self.operand1_size_bits)) as u64,
            operand2: ((word >> self.operand2_shift) & mask(self.operand2_size_bits)) as u64,
        }
    }

    /// Decode an instruction into a typed [`Op`].
    pub fn decode(&self, instruction: Instruction) -> Op {
        let f = self.fields(instruction);
        match Opcode::from_bits(f.opcode) {
            Some(Opcode::NoOp) => Op::NoOp,
            Some(Opcode::MatMul) => Op::MatMul {
                flags: f.flags,
                memory_address: f.operand0,
                accumulator_address: f.operand1,
                size: f.operand2,
            },
            Some(Opcode::DataMove) => match DataMoveFlag::from_bits(f.flags) {
                Some(flag) => Op::DataMove {
                    flag,
                    memory_address: f.operand0,
                    remote_address: f.operand1,
                    size: f.operand2,
                },
                None => Op::Unknown {
                    opcode: f.opcode,
                    flags: f.flags,
                },
            },
            Some(Opcode::LoadWeight) => Op::LoadWeight {
                zeroes: f.flags & load_weight::ZEROES != 0,
                address: f.operand0,
                size: f.operand1,
            },
            Some(Opcode::Simd) => Op::Simd {
                flags: f.flags,
                sub: self.unpack_simd_sub(f.operand2),
                read_address: f.operand1,
                write_address: f.operand0,
            },
            Some(Opcode::Configure) => {
                let word = instruction.0;
                #[allow(clippy::cast_possible_truncation)]
                let value = ((word >> 4) & mask(self.operands_size_bits)) as u64;
                Op::Configure {
                    register: (word & 0xF) as u8,
                    value,
                }
            }
            None => Op::Unknown {
                opcode: f.opcode,
                flags: f.flags,
            },
        }
    }

    /// Little-endian encoding of exactly `instruction_size_bytes` bytes.
    pub fn to_bytes(&self, instruction: Instruction) -> Vec<u8> {
        instruction.0.to_le_bytes()[..self.instruction_size_bytes()].to_vec()
    }

    /// Append the encoding of `instruction` to `buf`.
    pub fn put(&self, instruction: Instruction, buf: &mut BytesMut) {
        buf.put_slice(&instruction.0.to_le_bytes()[..self.instruction_size_bytes()]);
    }

    /// Parse one instruction from its little-endian encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly one instruction long.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Instruction> {
        let n = self.instruction_size_bytes();
        if bytes.len() != n {
            return Err(TcuError::invalid_argument(format!(
                "instruction is {n} bytes, got {}",
                bytes.len()
            )));
        }
        let mut raw = [0u8; 16];
        raw[..n].copy_from_slice(bytes);
        Ok(Instruction(u128::from_le_bytes(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcu_arch::opcode::{matmul, simd};
    use tcu_arch::presets;

    fn max_of(bits: u32) -> u64 {
        (mask(bits)) as u64
    }

    #[test]
    fn test_log2_ceil() {
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(3), 2);
        assert_eq!(log2_ceil(8), 3);
        assert_eq!(log2_ceil(20480), 15);
        assert_eq!(log2_ceil(1 << 20), 20);
        assert_eq!(round_size_bits(0), 0);
        assert_eq!(round_size_bits(13), 16);
        assert_eq!(round_size_bits(24), 24);
    }

    #[test]
    fn test_pynqz1_widths() {
        let layout = InstructionLayout::new(&presets::pynqz1()).unwrap();
        assert_eq!(layout.operand_address_size_bits(), [13, 20, 13]);
        assert_eq!(layout.operand_size_bits(), [16, 24, 16]);
        assert_eq!(layout.instruction_size_bits(), 64);
        assert_eq!(layout.instruction_size_bytes(), 8);
        assert_eq!(layout.simd_operand_size_bits(), 1);
        assert_eq!(layout.simd_instruction_size_bits(), 8);
    }

    #[test]
    fn test_wide_presets() {
        let ultra96 = InstructionLayout::new(&presets::ultra96()).unwrap();
        assert_eq!(ultra96.operand_size_bits(), [24, 24, 16]);
        assert_eq!(ultra96.instruction_size_bytes(), 9);
        let uram = InstructionLayout::new(&presets::zcu104_uram()).unwrap();
        assert_eq!(uram.instruction_size_bits(), 72);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let mut arch = presets::tiny();
        arch.local_depth = 0;
        assert!(InstructionLayout::new(&arch).is_err());
    }

    #[test]
    fn test_known_encoding() {
        let layout = InstructionLayout::new(&presets::pynqz1()).unwrap();
        let instr = layout.data_move(DataMoveFlag::MemoryToDram0, 3, 5, 7);
        let expected: u64 = 0x2 << 60 | 0x1 << 56 | 7 << 40 | 5 << 16 | 3;
        assert_eq!(instr.bits(), u128::from(expected));
        assert_eq!(layout.to_bytes(instr), expected.to_le_bytes().to_vec());
        assert_eq!(layout.to_bytes(layout.no_op()), vec![0; 8]);
    }

    #[test]
    fn test_round_trip_every_builder() {
        for arch in [presets::tiny(), presets::pynqz1(), presets::ultra96(), presets::zcu104_uram()] {
            let layout = InstructionLayout::new(&arch).unwrap();
            let [w0, w1, w2] = layout.operand_size_bits();
            let w_sub = layout.simd_operand_size_bits();
            for (a0, a1, a2, reg) in [(0, 0, 0, 0), (max_of(w0), max_of(w1), max_of(w2), max_of(w_sub))] {
                assert_eq!(layout.decode(layout.no_op()), Op::NoOp);

                let op = layout.decode(layout.matmul(matmul::ACCUMULATE | matmul::ZEROES, a0, a1, a2));
                assert_eq!(
                    op,
                    Op::MatMul {
                        flags: 0b11,
                        memory_address: a0,
                        accumulator_address: a1,
                        size: a2
                    }
                );

                for flag in DataMoveFlag::ALL {
                    let op = layout.decode(layout.data_move(flag, a0, a1, a2));
                    assert_eq!(
                        op,
                        Op::DataMove {
                            flag,
                            memory_address: a0,
                            remote_address: a1,
                            size: a2
                        }
                    );
                }

                for zeroes in [false, true] {
                    let op = layout.decode(layout.load_weight(zeroes, a0, a1));
                    assert_eq!(
                        op,
                        Op::LoadWeight {
                            zeroes,
                            address: a0,
                            size: a1
                        }
                    );
                }

                let sub = layout.simd_sub(SimdOp::Max, reg, reg, reg);
                let op = layout.decode(layout.simd(simd::READ | simd::WRITE | simd::ACCUMULATE, sub, a1, a0));
                assert_eq!(
                    op,
                    Op::Simd {
                        flags: 0b111,
                        sub: SimdSub {
                            op: SimdOp::Max.bits(),
                            left: reg,
                            right: reg,
                            dest: reg
                        },
                        read_address: a1,
                        write_address: a0
                    }
                );

                let value = if a0 == 0 { 0 } else { max_of(w0 + w1 + w2) };
                for register in Register::ALL {
                    let op = layout.decode(layout.configure(register, value));
                    assert_eq!(
                        op,
                        Op::Configure {
                            register: register.id(),
                            value
                        }
                    );
                }
            }
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let layout = InstructionLayout::new(&presets::ultra96()).unwrap();
        let instr = layout.matmul(matmul::ACCUMULATE, 17, 4095, 300);
        let bytes = layout.to_bytes(instr);
        assert_eq!(bytes.len(), 9);
        assert_eq!(layout.from_bytes(&bytes).unwrap(), instr);
        assert!(layout.from_bytes(&bytes[..8]).is_err());

        let mut buf = BytesMut::new();
        layout.put(instr, &mut buf);
        assert_eq!(&buf[..], &bytes[..]);
    }

    #[test]
    fn test_strided_operands() {
        let layout = InstructionLayout::new(&presets::pynqz1()).unwrap();
        let op0 = layout.operand0(100, 3);
        assert_eq!(op0, 3 << 13 | 100);
        assert_eq!(layout.split_operand(0, op0), (100, 3));
        let op1 = layout.operand1(0xF_FFFF, 7);
        assert_eq!(layout.split_operand(1, op1), (0xF_FFFF, 7));
        // oversized fields are masked
        assert_eq!(layout.split_operand(0, layout.operand0(1 << 13, 9)), (0, 1));
    }

    #[test]
    fn test_unknown_opcode_and_display() {
        let layout = InstructionLayout::new(&presets::tiny()).unwrap();
        let op = layout.decode(layout.instruction(0x7, 0x2, 0, 0, 0));
        assert_eq!(op, Op::Unknown { opcode: 0x7, flags: 0x2 });
        let op = layout.decode(layout.instruction(0x2, 0x5, 0, 0, 0));
        assert!(matches!(op, Op::Unknown { .. }));

        let text = layout
            .decode(layout.configure(Register::Timeout, 100))
            .to_string();
        assert_eq!(text, "Config TIMEOUT=0x64");
        assert_eq!(layout.decode(layout.no_op()).to_string(), "NoOp");
    }
}
