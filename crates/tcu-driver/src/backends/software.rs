//! Software TCU
//!
//! A [`DmaTransport`] that decodes the instruction stream it is sent and
//! executes it against the same DMA buffer the driver writes. It lets the
//! whole driver run without an FPGA: DRAM windows are located through the
//! configured address-offset registers, exactly as the hardware would.
//!
//! ## Numeric model
//!
//! Scalars are held as signed fixed-point integers and saturate to the data
//! type's range when stored. Multiplication rounds the product back to the
//! binary point. This is a functional model for tests and diagnostics, not
//! a cycle- or bit-accurate one.
//!
//! ## Systolic array
//!
//! `LoadWeight` shifts vectors into an `array_size + 1` row window; the
//! oldest row is the bias. `MatMul` computes
//! `y[j] = bias[j] + sum_i x[i] * w[i][j]` for every input vector.
//!
//! ## Sampling
//!
//! While `SAMPLE_INTERVAL` is non-zero, every `interval`-th executed
//! instruction records a sample. [`SimulatedTcu::sample_port`] returns a
//! handle that serves these records on the receive direction, padding with
//! idle records when none are queued.

use crate::allocator::Allocator;
use crate::config::DriverConfig;
use crate::dma::{BufferView, DmaBuffer};
use crate::driver::Driver;
use crate::error::{Result, TcuError};
use crate::layout::{Instruction, InstructionLayout, Op, SimdSub};
use crate::stream::{Direction, DmaTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tcu_arch::opcode::{matmul, simd};
use tcu_arch::regs::sample::{self, Sample, INVALID_PROGRAM_COUNTER, SAMPLE_SIZE_BYTES};
use tcu_arch::{Architecture, DataMoveFlag, DataType, Register, SimdOp, TCU_BLOCK_SIZE};
use tracing::{debug, trace};

/// Stream word of the simulated AXI bus.
pub const SIMULATED_WORD_SIZE: usize = 8;

/// Largest simulated DMA transfer in words.
pub const SIMULATED_MAX_BUFFER_SIZE: usize = 1 << 20;

/// Nominal physical base of simulator memory, block aligned.
pub const SIMULATED_PHYSICAL_BASE: u64 = 0x1000_0000;

/// Sample records kept before the oldest are dropped.
const SAMPLE_QUEUE_LIMIT: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Port {
    Instructions,
    Samples,
}

/// Vector-addressed memory of signed fixed-point scalars.
#[derive(Debug)]
struct Bank {
    name: &'static str,
    array: usize,
    data: Vec<i64>,
}

impl Bank {
    fn new(name: &'static str, depth: usize, array: usize) -> Self {
        Self {
            name,
            array,
            data: vec![0; depth * array],
        }
    }

    fn range(&self, vector: u64) -> Result<std::ops::Range<usize>> {
        let start = usize::try_from(vector)
            .ok()
            .and_then(|v| v.checked_mul(self.array))
            .filter(|start| start + self.array <= self.data.len())
            .ok_or_else(|| fault(format!("{} vector {vector} out of range", self.name)))?;
        Ok(start..start + self.array)
    }

    fn get(&self, vector: u64) -> Result<Vec<i64>> {
        Ok(self.data[self.range(vector)?].to_vec())
    }

    fn set(&mut self, vector: u64, values: &[i64]) -> Result<()> {
        let range = self.range(vector)?;
        self.data[range].copy_from_slice(values);
        Ok(())
    }
}

fn fault(reason: impl std::fmt::Display) -> TcuError {
    TcuError::transfer_failed(format!("simulated TCU fault: {reason}"))
}

/// Signed fixed-point arithmetic for one data type.
#[derive(Debug, Clone, Copy)]
struct Fixed {
    data_type: DataType,
}

impl Fixed {
    fn min(self) -> i64 {
        -(1i64 << (self.data_type.width() - 1))
    }

    fn max(self) -> i64 {
        (1i64 << (self.data_type.width() - 1)) - 1
    }

    fn one(self) -> i64 {
        1i64 << self.data_type.binary_point()
    }

    fn saturate(self, value: i64) -> i64 {
        value.clamp(self.min(), self.max())
    }

    fn mul(self, a: i64, b: i64) -> i64 {
        let bp = self.data_type.binary_point();
        let product = a * b;
        if bp == 0 {
            product
        } else {
            (product + (1i64 << (bp - 1))) >> bp
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn from_raw(self, raw: u64) -> i64 {
        let width = self.data_type.width();
        let bits = (raw & self.data_type.all_ones()) as i64;
        if bits >= 1i64 << (width - 1) {
            bits - (1i64 << width)
        } else {
            bits
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn to_raw(self, value: i64) -> u64 {
        (self.saturate(value) as u64) & self.data_type.all_ones()
    }

    fn alu(self, op: SimdOp, left: i64, right: i64) -> i64 {
        let flag = |b: bool| if b { self.one() } else { 0 };
        let result = match op {
            SimdOp::NoOp | SimdOp::Move => left,
            SimdOp::Zero => 0,
            SimdOp::Not => flag(left == 0),
            SimdOp::And => flag(left != 0 && right != 0),
            SimdOp::Or => flag(left != 0 || right != 0),
            SimdOp::Increment => left + self.one(),
            SimdOp::Decrement => left - self.one(),
            SimdOp::Add => left + right,
            SimdOp::Subtract => left - right,
            SimdOp::Multiply => self.mul(left, right),
            SimdOp::Abs => left.abs(),
            SimdOp::GreaterThan => flag(left > right),
            SimdOp::GreaterThanEqual => flag(left >= right),
            SimdOp::Min => left.min(right),
            SimdOp::Max => left.max(right),
        };
        self.saturate(result)
    }
}

/// Architectural state of the simulated TCU.
#[derive(Debug)]
struct State {
    arch: Architecture,
    layout: InstructionLayout,
    fixed: Fixed,
    memory: Arc<DmaBuffer>,
    registers: [u64; 16],
    local: Bank,
    accumulators: Bank,
    /// `array_size + 1` rows, bias first
    weights: VecDeque<Vec<i64>>,
    /// `simd_registers_depth + 1` registers per lane; 0 is the I/O port
    simd_registers: Vec<Vec<i64>>,
    /// Bytes of an instruction split across transfers
    carry: Vec<u8>,
    program_counter: u32,
    executed: u64,
    samples: VecDeque<Sample>,
}

impl State {
    fn register(&self, register: Register) -> u64 {
        self.registers[usize::from(register.id())]
    }

    fn execute_stream(&mut self, bytes: &[u8]) -> Result<()> {
        let n = self.layout.instruction_size_bytes();
        self.carry.extend_from_slice(bytes);
        let whole = self.carry.len() - self.carry.len() % n;
        let stream: Vec<u8> = self.carry.drain(..whole).collect();
        for chunk in stream.chunks_exact(n) {
            let instruction = self.layout.from_bytes(chunk)?;
            self.step(instruction)?;
        }
        Ok(())
    }

    fn step(&mut self, instruction: Instruction) -> Result<()> {
        let op = self.layout.decode(instruction);
        trace!("sim pc={} {op}", self.program_counter);
        match op {
            Op::NoOp => {}
            Op::Configure { register, value } => {
                self.registers[usize::from(register & 0xF)] = value;
            }
            Op::DataMove {
                flag,
                memory_address,
                remote_address,
                size,
            } => self.data_move(flag, memory_address, remote_address, size)?,
            Op::LoadWeight {
                zeroes,
                address,
                size,
            } => self.load_weight(zeroes, address, size)?,
            Op::MatMul {
                flags,
                memory_address,
                accumulator_address,
                size,
            } => self.matmul(flags, memory_address, accumulator_address, size)?,
            Op::Simd {
                flags,
                sub,
                read_address,
                write_address,
            } => self.simd(flags, sub, read_address, write_address)?,
            Op::Unknown { opcode, flags } => {
                return Err(fault(format!(
                    "illegal instruction opcode={opcode:#x} flags={flags:#x} at pc={}",
                    self.program_counter
                )));
            }
        }
        self.record_sample();
        self.program_counter = self.program_counter.wrapping_add(1);
        Ok(())
    }

    fn record_sample(&mut self) {
        let interval = self.register(Register::SampleInterval);
        self.executed += 1;
        if interval == 0 || self.executed % interval != 0 {
            return;
        }
        let (valid, ready) = sample::unit_bits(sample::INSTRUCTION);
        if self.samples.len() == SAMPLE_QUEUE_LIMIT {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            program_counter: self.program_counter,
            flags: valid | ready,
        });
    }

    /// Addresses of `size + 1` vectors from a strided operand.
    fn addresses(&self, index: usize, operand: u64, size: u64) -> impl Iterator<Item = u64> {
        let (offset, stride) = self.layout.split_operand(index, operand);
        let step = 1u64 << stride;
        (0..=size).map(move |i| offset + i * step)
    }

    fn dram_base(&self, bank: Register) -> Result<usize> {
        let physical = self.register(bank) * TCU_BLOCK_SIZE as u64;
        physical
            .checked_sub(self.memory.physical_address())
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(|| fault(format!("{bank} points below simulator memory")))
    }

    fn dram_range(&self, bank: Register, depth: usize, vector: u64) -> Result<usize> {
        let vector = usize::try_from(vector)
            .ok()
            .filter(|&v| v < depth)
            .ok_or_else(|| fault(format!("{bank} vector {vector} out of range")))?;
        let start = self.dram_base(bank)? + vector * self.arch.vector_bytes();
        if start + self.arch.vector_bytes() > self.memory.len() {
            return Err(fault(format!("{bank} vector {vector} outside simulator memory")));
        }
        Ok(start)
    }

    fn read_dram(&self, bank: Register, depth: usize, vector: u64) -> Result<Vec<i64>> {
        let start = self.dram_range(bank, depth, vector)?;
        let mut bytes = vec![0u8; self.arch.vector_bytes()];
        self.memory.read(start, &mut bytes);
        let size = self.arch.data_type.size_bytes();
        Ok(bytes
            .chunks_exact(size)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw[..size].copy_from_slice(chunk);
                self.fixed.from_raw(u64::from_le_bytes(raw))
            })
            .collect())
    }

    fn write_dram(&self, bank: Register, depth: usize, vector: u64, values: &[i64]) -> Result<()> {
        let start = self.dram_range(bank, depth, vector)?;
        let size = self.arch.data_type.size_bytes();
        let mut bytes = Vec::with_capacity(self.arch.vector_bytes());
        for &value in values {
            bytes.extend_from_slice(&self.fixed.to_raw(value).to_le_bytes()[..size]);
        }
        self.memory.write(start, &bytes);
        Ok(())
    }

    fn data_move(&mut self, flag: DataMoveFlag, memory: u64, remote: u64, size: u64) -> Result<()> {
        let locals: Vec<u64> = self.addresses(0, memory, size).collect();
        let remotes: Vec<u64> = self.addresses(1, remote, size).collect();
        let dram0 = (Register::Dram0AddressOffset, self.arch.dram0_depth);
        let dram1 = (Register::Dram1AddressOffset, self.arch.dram1_depth);
        for (&l, &r) in locals.iter().zip(&remotes) {
            match flag {
                DataMoveFlag::Dram0ToMemory => {
                    let v = self.read_dram(dram0.0, dram0.1, r)?;
                    self.local.set(l, &v)?;
                }
                DataMoveFlag::Dram1ToMemory => {
                    let v = self.read_dram(dram1.0, dram1.1, r)?;
                    self.local.set(l, &v)?;
                }
                DataMoveFlag::MemoryToDram0 => {
                    self.write_dram(dram0.0, dram0.1, r, &self.local.get(l)?)?;
                }
                DataMoveFlag::MemoryToDram1 => {
                    self.write_dram(dram1.0, dram1.1, r, &self.local.get(l)?)?;
                }
                DataMoveFlag::AccumulatorToMemory => {
                    let v: Vec<i64> = self
                        .accumulators
                        .get(r)?
                        .into_iter()
                        .map(|x| self.fixed.saturate(x))
                        .collect();
                    self.local.set(l, &v)?;
                }
                DataMoveFlag::MemoryToAccumulator => {
                    let v = self.local.get(l)?;
                    self.accumulators.set(r, &v)?;
                }
                DataMoveFlag::MemoryToAccumulatorAccumulate => {
                    let v = self.local.get(l)?;
                    let acc = self.accumulators.get(r)?;
                    let sum: Vec<i64> = acc
                        .iter()
                        .zip(&v)
                        .map(|(a, b)| self.fixed.saturate(a + b))
                        .collect();
                    self.accumulators.set(r, &sum)?;
                }
            }
        }
        Ok(())
    }

    fn load_weight(&mut self, zeroes: bool, address: u64, size: u64) -> Result<()> {
        let rows = self.arch.array_size + 1;
        for a in self.addresses(0, address, size).collect::<Vec<_>>() {
            let row = if zeroes {
                vec![0; self.arch.array_size]
            } else {
                self.local.get(a)?
            };
            self.weights.push_back(row);
            while self.weights.len() > rows {
                self.weights.pop_front();
            }
        }
        Ok(())
    }

    fn matmul(&mut self, flags: u8, memory: u64, accumulator: u64, size: u64) -> Result<()> {
        let array = self.arch.array_size;
        let inputs: Vec<u64> = self.addresses(0, memory, size).collect();
        let outputs: Vec<u64> = self.addresses(1, accumulator, size).collect();
        for (&i, &o) in inputs.iter().zip(&outputs) {
            let x = if flags & matmul::ZEROES != 0 {
                vec![0; array]
            } else {
                self.local.get(i)?
            };
            let mut y = self.weights[0].clone();
            for (lane, &xi) in x.iter().enumerate() {
                for (yj, &w) in y.iter_mut().zip(&self.weights[lane + 1]) {
                    *yj += self.fixed.mul(xi, w);
                }
            }
            if flags & matmul::ACCUMULATE != 0 {
                for (yj, a) in y.iter_mut().zip(self.accumulators.get(o)?) {
                    *yj += a;
                }
            }
            let y: Vec<i64> = y.into_iter().map(|v| self.fixed.saturate(v)).collect();
            self.accumulators.set(o, &y)?;
        }
        Ok(())
    }

    fn simd(&mut self, flags: u8, sub: SimdSub, read: u64, write: u64) -> Result<()> {
        let op = SimdOp::from_bits(sub.op)
            .ok_or_else(|| fault(format!("illegal SIMD op {:#x}", sub.op)))?;
        let depth = self.simd_registers.len();
        let register = |r: u64| {
            usize::try_from(r)
                .ok()
                .filter(|&r| r < depth)
                .ok_or_else(|| fault(format!("SIMD register {r} out of range")))
        };
        let (left, right, dest) = (register(sub.left)?, register(sub.right)?, register(sub.dest)?);

        let input = if flags & simd::READ != 0 {
            self.accumulators.get(read)?
        } else {
            vec![0; self.arch.array_size]
        };
        let mut output = Vec::with_capacity(input.len());
        for (lane, &value) in input.iter().enumerate() {
            let operand = |reg: usize| if reg == 0 { value } else { self.simd_registers[reg][lane] };
            let result = self.fixed.alu(op, operand(left), operand(right));
            if dest != 0 {
                self.simd_registers[dest][lane] = result;
            }
            output.push(result);
        }

        if flags & simd::WRITE != 0 {
            if flags & simd::ACCUMULATE != 0 {
                let acc = self.accumulators.get(write)?;
                for (o, a) in output.iter_mut().zip(acc) {
                    *o = self.fixed.saturate(*o + a);
                }
            }
            self.accumulators.set(write, &output)?;
        }
        Ok(())
    }

    fn fill_samples(&mut self, buffer: &BufferView) {
        let records = buffer.len() / SAMPLE_SIZE_BYTES;
        let mut bytes = Vec::with_capacity(records * SAMPLE_SIZE_BYTES);
        let idle = Sample {
            program_counter: INVALID_PROGRAM_COUNTER,
            flags: 0,
        };
        for _ in 0..records {
            let record = self.samples.pop_front().unwrap_or(idle);
            bytes.extend_from_slice(&record.to_bytes());
        }
        buffer.write(0, &bytes);
    }
}

/// Software TCU attached through a simulated DMA engine.
#[derive(Debug)]
pub struct SimulatedTcu {
    state: Arc<Mutex<State>>,
    port: Port,
    in_flight: Option<Direction>,
}

impl SimulatedTcu {
    /// Simulate `arch` operating on `memory`.
    ///
    /// # Errors
    ///
    /// Returns an error if no instruction layout exists for `arch`.
    pub fn new(arch: Architecture, memory: Arc<DmaBuffer>) -> Result<Self> {
        let layout = InstructionLayout::new(&arch)?;
        let array = arch.array_size;
        let state = State {
            fixed: Fixed {
                data_type: arch.data_type,
            },
            local: Bank::new("local", arch.local_depth, array),
            accumulators: Bank::new("accumulator", arch.accumulator_depth, array),
            weights: std::iter::repeat_with(|| vec![0; array])
                .take(array + 1)
                .collect(),
            simd_registers: vec![vec![0; array]; arch.simd_registers_depth + 1],
            registers: [0; 16],
            carry: Vec::new(),
            program_counter: 0,
            executed: 0,
            samples: VecDeque::new(),
            layout,
            memory,
            arch,
        };
        debug!("Simulated TCU for array size {array}");
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            port: Port::Instructions,
            in_flight: None,
        })
    }

    /// Handle serving sample records on the receive direction.
    pub fn sample_port(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            port: Port::Samples,
            in_flight: None,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| TcuError::invalid_state("simulator state poisoned"))
    }

    /// Current value of a configuration register.
    ///
    /// # Errors
    ///
    /// Returns an error if the simulator state is poisoned.
    pub fn register(&self, register: Register) -> Result<u64> {
        Ok(self.lock()?.register(register))
    }

    /// Instructions executed so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the simulator state is poisoned.
    pub fn executed(&self) -> Result<u64> {
        Ok(self.lock()?.executed)
    }

    /// Local memory vector `vector` as raw signed fixed-point values.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector is out of range.
    pub fn local_vector(&self, vector: u64) -> Result<Vec<i64>> {
        self.lock()?.local.get(vector)
    }
}

impl DmaTransport for SimulatedTcu {
    fn word_size(&self) -> usize {
        SIMULATED_WORD_SIZE
    }

    fn max_buffer_size(&self) -> usize {
        SIMULATED_MAX_BUFFER_SIZE
    }

    fn start(&mut self, direction: Direction, buffer: &BufferView) -> Result<()> {
        if let Some(busy) = self.in_flight {
            return Err(TcuError::transfer_failed(format!(
                "{busy} transfer still in flight"
            )));
        }
        match (self.port, direction) {
            (Port::Instructions, Direction::Send) => {
                let bytes = buffer.to_vec();
                self.lock()?.execute_stream(&bytes)?;
            }
            (Port::Samples, Direction::Receive) => self.lock()?.fill_samples(buffer),
            (port, direction) => {
                return Err(TcuError::transfer_failed(format!(
                    "{port:?} port does not support {direction}"
                )));
            }
        }
        self.in_flight = Some(direction);
        Ok(())
    }

    fn wait(&mut self, direction: Direction) -> Result<()> {
        match self.in_flight.take() {
            Some(d) if d == direction => Ok(()),
            _ => Err(TcuError::invalid_state(format!("no {direction} transfer in flight"))),
        }
    }
}

/// Build a driver around a fresh simulator.
///
/// Memory is sized with [`Driver::buffer_size_bytes`] and placed at
/// [`SIMULATED_PHYSICAL_BASE`].
///
/// # Errors
///
/// Returns any error from allocating memory or bringing up the driver.
pub fn simulated_driver(
    arch: Architecture,
    config: DriverConfig,
    sampling: bool,
) -> Result<Driver<SimulatedTcu>> {
    let size = Driver::<SimulatedTcu>::buffer_size_bytes(&arch, &config, SIMULATED_WORD_SIZE, sampling);
    let memory = Arc::new(DmaBuffer::allocate(size, SIMULATED_PHYSICAL_BASE)?);
    let tcu = SimulatedTcu::new(arch.clone(), Arc::clone(&memory))?;
    let samples = sampling.then(|| tcu.sample_port());
    Driver::new(arch, config, memory, tcu, samples)
}

/// Allocator over simulator-sized memory, for exercising streams directly.
///
/// # Errors
///
/// Returns an error if the allocation fails.
pub fn simulated_allocator(bytes: usize) -> Result<Allocator> {
    let memory = Arc::new(DmaBuffer::allocate(bytes, SIMULATED_PHYSICAL_BASE)?);
    Allocator::new(memory, SIMULATED_WORD_SIZE)
}
