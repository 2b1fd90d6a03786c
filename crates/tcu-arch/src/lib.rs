//! Hardware model of the Tensil TCU systolic-array accelerator.
//!
//! Pure data: no I/O and no hardware access. The driver crate builds on
//! these definitions; tools that only need to reason about programs or
//! layouts can depend on this crate alone.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`architecture`] | `Architecture` parameter record and published presets |
//! | [`data_type`] | Scalar data types and fixed-point conversion |
//! | [`regs`] | Configuration register ids, block size, sample record layout |
//! | [`opcode`] | Opcodes, data-move directions, instruction flags, SIMD ops |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod architecture;
pub mod data_type;
pub mod opcode;
pub mod regs;

pub use architecture::{presets, Architecture};
pub use data_type::DataType;
pub use opcode::{DataMoveFlag, Opcode, SimdOp};
pub use regs::{Register, TCU_BLOCK_SIZE};
