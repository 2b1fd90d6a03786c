//! Concrete DMA engines and memory providers
//!
//! - **Software**: simulated TCU executing the instruction stream on the host
//! - **AXI DMA**: Xilinx AXI DMA core mapped through UIO
//! - **u-dma-buf**: physically contiguous memory from the `u-dma-buf` module

pub mod axi_dma;
pub mod software;
pub mod udmabuf;

pub use axi_dma::AxiDma;
pub use software::{simulated_driver, SimulatedTcu};
pub use udmabuf::UdmaBuf;
