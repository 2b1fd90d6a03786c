//! Host-side driver for the Tensil TCU systolic-array accelerator.
//!
//! The TCU sits behind two DMA channels: one carries instructions from the
//! host, the other optionally returns performance samples. Both DRAM
//! banks the TCU addresses live inside a single physically contiguous
//! buffer owned by the driver.
//!
//! # Backends
//!
//! ```text
//! Hardware:
//!   AxiDma       Xilinx AXI DMA core over UIO
//!   UdmaBuf      contiguous memory from the u-dma-buf module
//!
//! Development:
//!   SimulatedTcu executes the instruction stream on the host
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use tcu_arch::presets;
//! use tcu_driver::{backends::simulated_driver, DriverConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut driver = simulated_driver(presets::pynqz1(), DriverConfig::default(), false)?;
//! driver.load_model("resnet20v2_cifar_onnx_pynqz1.tmodel")?;
//!
//! let mut inputs = HashMap::new();
//! inputs.insert("x".to_string(), vec![0.0f32; 32 * 32 * 3]);
//! let outputs = driver.run(&inputs)?;
//! println!("{:?}", outputs.keys());
//! # Ok(())
//! # }
//! ```
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`allocator`] | First-fit allocator over a DMA buffer |
//! | [`layout`] | Bit-exact instruction encoding for one architecture |
//! | [`program`] | Instruction-stream builder and disassembler |
//! | [`mem`] | Typed view of DRAM as fixed-point vectors |
//! | [`stream`] | Double-buffered transfers through a DMA engine |
//! | [`driver`] | DRAM windows, model loading, execution |
//! | [`backends`] | Concrete DMA engines and memory |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod allocator;
pub mod backends;
pub mod config;
pub mod dma;
pub mod driver;
mod error;
pub mod layout;
pub mod mem;
pub mod model;
pub mod program;
pub mod stream;

pub use allocator::{Allocator, Slice, Span};
pub use config::{DriverConfig, PollConfig};
pub use dma::{BufferView, DmaBuffer};
pub use driver::{DramBank, Driver};
pub use error::{Result, TcuError};
pub use layout::{Instruction, InstructionLayout, Op};
pub use mem::Mem;
pub use model::{Model, Variable};
pub use program::{disassemble, ProgramBuilder};
pub use stream::{Direction, DmaChannel, DmaTransport, DoubleBufferedAdapter, Stream};

pub use tcu_arch::regs::sample::Sample;
pub use tcu_arch::{presets, Architecture, DataType, Register};
