//! Architecture parameters of a synthesised TCU and the stock presets.
//!
//! A compiled model records the architecture it was built for; the driver
//! refuses to load it unless that record equals its own field-for-field.

use crate::data_type::DataType;
use serde::{Deserialize, Serialize};

/// Static parameters of one TCU build.
///
/// Depths are counted in vectors of `array_size` scalars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Architecture {
    /// Scalar type flowing through the array.
    pub data_type: DataType,
    /// Side length of the systolic array.
    pub array_size: usize,
    /// Vectors addressable in the DRAM0 window.
    pub dram0_depth: usize,
    /// Vectors addressable in the DRAM1 window.
    pub dram1_depth: usize,
    /// Vectors of on-chip local memory.
    pub local_depth: usize,
    /// Vectors of accumulator memory.
    pub accumulator_depth: usize,
    /// Registers in the SIMD register file.
    pub simd_registers_depth: usize,
    /// Distinct strides on operand 0.
    pub stride0_depth: usize,
    /// Distinct strides on operand 1.
    pub stride1_depth: usize,
    /// Hardware threads.
    #[serde(default = "default_threads")]
    pub number_of_threads: usize,
    /// Instruction queue depth per thread.
    #[serde(default = "default_queue_depth")]
    pub thread_queue_depth: usize,
}

const fn default_threads() -> usize {
    1
}

const fn default_queue_depth() -> usize {
    8
}

impl Architecture {
    /// Bytes in one vector of `array_size` scalars.
    pub const fn vector_bytes(&self) -> usize {
        self.array_size * self.data_type.size_bytes()
    }

    /// Name of the first depth field that is zero, if any.
    ///
    /// Every depth is used as an address space, so none may be empty.
    pub fn zero_field(&self) -> Option<&'static str> {
        [
            ("array_size", self.array_size),
            ("dram0_depth", self.dram0_depth),
            ("dram1_depth", self.dram1_depth),
            ("local_depth", self.local_depth),
            ("accumulator_depth", self.accumulator_depth),
            ("simd_registers_depth", self.simd_registers_depth),
            ("stride0_depth", self.stride0_depth),
            ("stride1_depth", self.stride1_depth),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0)
        .map(|(name, _)| name)
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "tiny" => Some(presets::tiny()),
            "pynqz1" | "pynq-z1" => Some(presets::pynqz1()),
            "ultra96" => Some(presets::ultra96()),
            "zcu104" => Some(presets::zcu104()),
            "zcu104_uram" | "zcu104-uram" => Some(presets::zcu104_uram()),
            _ => None,
        }
    }
}

/// Architectures of the published TCU bitstreams.
pub mod presets {
    use super::Architecture;
    use crate::data_type::DataType;

    /// Names accepted by [`Architecture::preset`].
    pub const NAMES: &[&str] = &["tiny", "pynqz1", "ultra96", "zcu104", "zcu104_uram"];

    const fn base(array_size: usize, dram: usize, local: usize, acc: usize) -> Architecture {
        Architecture {
            data_type: DataType::Fp16Bp8,
            array_size,
            dram0_depth: dram,
            dram1_depth: dram,
            local_depth: local,
            accumulator_depth: acc,
            simd_registers_depth: 1,
            stride0_depth: 8,
            stride1_depth: 8,
            number_of_threads: 1,
            thread_queue_depth: 8,
        }
    }

    /// 4×4 array with small memories, for diagnostics and simulation.
    pub const fn tiny() -> Architecture {
        base(4, 1024, 512, 256)
    }

    /// PYNQ-Z1 (Zynq-7020).
    pub const fn pynqz1() -> Architecture {
        base(8, 1_048_576, 8192, 2048)
    }

    /// Avnet Ultra96-V2.
    pub const fn ultra96() -> Architecture {
        base(16, 2_097_152, 20480, 4096)
    }

    /// ZCU104 using block RAM.
    pub const fn zcu104() -> Architecture {
        base(32, 2_097_152, 16384, 4096)
    }

    /// ZCU104 using UltraRAM for local and accumulator memory.
    pub const fn zcu104_uram() -> Architecture {
        base(32, 2_097_152, 49152, 20480)
    }
}
