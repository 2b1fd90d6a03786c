//! The TCU driver: DRAM windows, model loading and program execution.
//!
//! The driver owns one DMA buffer. At construction it carves both DRAM
//! windows out of it, block-aligned, and programs their physical offsets;
//! the rest serves as staging memory for the instruction and sample streams.
//!
//! The TCU has no completion interrupt, and the DMA engine only reports that
//! bytes left the host. Every program that must be waited on therefore ends
//! with a flush probe: two data moves that copy a sentinel vector from one
//! DRAM0 scratch slot to another through local memory. Instructions retire
//! in order, so once the target slot holds the sentinel the whole program
//! has executed.

use crate::allocator::{Allocator, Slice};
use crate::config::DriverConfig;
use crate::dma::DmaBuffer;
use crate::error::{Result, TcuError};
use crate::layout::{Instruction, InstructionLayout};
use crate::mem::Mem;
use crate::model::{self, Model, Variable};
use crate::program::ProgramBuilder;
use crate::stream::{DmaTransport, Stream};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tcu_arch::regs::sample::{Sample, SAMPLE_SIZE_BYTES};
use tcu_arch::{Architecture, DataMoveFlag, Register, TCU_BLOCK_SIZE};
use tracing::{debug, info, warn};

/// One of the two DRAM windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DramBank {
    /// Activations, inputs and outputs
    Dram0,
    /// Weights and constants
    Dram1,
}

#[derive(Debug)]
struct Window {
    slice: Slice,
    mem: Mem,
}

#[derive(Debug)]
struct Windows {
    dram0: Window,
    dram1: Window,
}

/// Loaded model and its program.
#[derive(Debug)]
struct Loaded {
    model: Model,
    program: Bytes,
}

/// Host-side driver of one TCU.
#[derive(Debug)]
pub struct Driver<T: DmaTransport> {
    arch: Architecture,
    config: DriverConfig,
    layout: InstructionLayout,
    allocator: Allocator,
    windows: Option<Windows>,
    instructions: Stream<T>,
    samples: Option<Stream<T>>,
    loaded: Option<Loaded>,
}

impl<T: DmaTransport> Driver<T> {
    /// Bytes of DMA memory a driver needs for `arch` over a bus of
    /// `word_size` bytes.
    ///
    /// Covers both DRAM windows, alignment slack for each, and three staging
    /// buffers per stream.
    pub fn buffer_size_bytes(
        arch: &Architecture,
        config: &DriverConfig,
        word_size: usize,
        sampling: bool,
    ) -> usize {
        let words = |depth: usize| (depth * arch.vector_bytes()).div_ceil(word_size);
        let streams = if sampling { 2 } else { 1 };
        let total_words = words(arch.dram0_depth)
            + words(arch.dram1_depth)
            + 2 * TCU_BLOCK_SIZE.div_ceil(word_size)
            + streams * 3 * config.dma_buffer_size;
        total_words * word_size
    }

    /// Bring up a TCU.
    ///
    /// `memory` must be device-visible and at least
    /// [`Driver::buffer_size_bytes`] long. `sample_dma`, when given, enables
    /// performance sampling.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unusable architecture or bus width,
    /// `Allocation` if the DRAM windows do not fit, and any error raised
    /// while programming the configuration registers.
    pub fn new(
        arch: Architecture,
        config: DriverConfig,
        memory: Arc<DmaBuffer>,
        instruction_dma: T,
        sample_dma: Option<T>,
    ) -> Result<Self> {
        if let Some(field) = arch.zero_field() {
            return Err(TcuError::invalid_argument(format!(
                "architecture field {field} must be positive"
            )));
        }
        if arch.dram0_depth < 2 {
            return Err(TcuError::invalid_argument(
                "DRAM0 needs two vectors for the flush probe",
            ));
        }
        let word = instruction_dma.word_size();
        let scalar = arch.data_type.size_bytes();
        if word == 0 || word % scalar != 0 {
            return Err(TcuError::invalid_argument(format!(
                "DMA word of {word} bytes does not hold whole {scalar}-byte scalars"
            )));
        }
        if let Some(dma) = &sample_dma {
            if dma.word_size() != word {
                return Err(TcuError::invalid_argument(format!(
                    "sample DMA word of {} bytes differs from instruction DMA word of {word}",
                    dma.word_size()
                )));
            }
        }

        let layout = InstructionLayout::new(&arch)?;
        debug!(
            "Instruction layout: {} bytes, operands {:?}",
            layout.instruction_size_bytes(),
            layout.operand_size_bits()
        );

        let instructions = Stream::new(instruction_dma, config.dma_buffer_size)?;
        let samples = sample_dma
            .map(|dma| Stream::new(dma, config.dma_buffer_size))
            .transpose()?;

        let mut allocator = Allocator::new(memory, word)?;
        let dram0 = Self::allocate_window(&mut allocator, &arch, arch.dram0_depth, word)?;
        let dram1 = Self::allocate_window(&mut allocator, &arch, arch.dram1_depth, word)?;
        let block = TCU_BLOCK_SIZE as u64;
        let dram0_offset = dram0.slice.physical_address().div_ceil(block);
        let dram1_offset = dram1.slice.physical_address().div_ceil(block);
        info!(
            "TCU DRAM0 at block {dram0_offset:#x}, DRAM1 at block {dram1_offset:#x}, {} words free",
            allocator.free_elements()
        );

        let mut driver = Self {
            arch,
            config,
            layout,
            allocator,
            windows: Some(Windows { dram0, dram1 }),
            instructions,
            samples,
            loaded: None,
        };

        let mut registers = vec![
            (Register::Dram0AddressOffset, dram0_offset),
            (Register::Dram1AddressOffset, dram1_offset),
            (Register::Timeout, driver.config.decoder_timeout),
        ];
        if driver.samples.is_some() {
            registers.push((Register::SampleInterval, driver.config.sample_interval));
        }
        driver.configure(&registers)?;
        Ok(driver)
    }

    fn allocate_window(
        allocator: &mut Allocator,
        arch: &Architecture,
        depth: usize,
        word: usize,
    ) -> Result<Window> {
        let words = (depth * arch.vector_bytes()).div_ceil(word);
        let slice = allocator.allocate_aligned(TCU_BLOCK_SIZE, words)?;
        let mem = Mem::new(slice.view().clone(), arch.data_type);
        Ok(Window { slice, mem })
    }

    /// Architecture the driver was built for.
    pub const fn arch(&self) -> &Architecture {
        &self.arch
    }

    /// Active configuration.
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Instruction layout for this architecture.
    pub const fn layout(&self) -> &InstructionLayout {
        &self.layout
    }

    /// The shared staging allocator.
    pub const fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Currently loaded model.
    pub fn model(&self) -> Option<&Model> {
        self.loaded.as_ref().map(|l| &l.model)
    }

    /// Instruction DMA engine.
    pub const fn instruction_transport(&self) -> &T {
        self.instructions.transport()
    }

    fn windows(&self) -> Result<&Windows> {
        self.windows
            .as_ref()
            .ok_or_else(|| TcuError::invalid_state("driver is closed"))
    }

    /// Typed view of a DRAM window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after [`Driver::close`].
    pub fn dram(&self, bank: DramBank) -> Result<&Mem> {
        let windows = self.windows()?;
        Ok(match bank {
            DramBank::Dram0 => &windows.dram0.mem,
            DramBank::Dram1 => &windows.dram1.mem,
        })
    }

    fn bank_depth(&self, bank: DramBank) -> usize {
        match bank {
            DramBank::Dram0 => self.arch.dram0_depth,
            DramBank::Dram1 => self.arch.dram1_depth,
        }
    }

    /// Scalar offset of `vector`, provided `scalars` values from there fit
    /// in the bank.
    fn check_range(&self, bank: DramBank, vector: usize, scalars: usize) -> Result<usize> {
        let capacity = self.bank_depth(bank) * self.arch.array_size;
        let start = vector.checked_mul(self.arch.array_size);
        match start.and_then(|start| start.checked_add(scalars)) {
            Some(end) if end <= capacity => Ok(vector * self.arch.array_size),
            end => Err(TcuError::CapacityExceeded {
                requested: end.unwrap_or(usize::MAX),
                max: capacity,
            }),
        }
    }

    /// Write host values to a DRAM window starting at vector `vector`.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the values run past the window.
    pub fn write_dram(&self, bank: DramBank, vector: usize, values: &[f32]) -> Result<()> {
        let start = self.check_range(bank, vector, values.len())?;
        self.dram(bank)?.write_values(start, values);
        Ok(())
    }

    /// Read `scalars` host values from a DRAM window starting at vector
    /// `vector`.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the range runs past the window.
    pub fn read_dram(&self, bank: DramBank, vector: usize, scalars: usize) -> Result<Vec<f32>> {
        let start = self.check_range(bank, vector, scalars)?;
        Ok(self.dram(bank)?.read_values(start, scalars))
    }

    fn sentinel(&self, raw: u64) -> Vec<u8> {
        let size = self.arch.data_type.size_bytes();
        let bytes = raw.to_le_bytes();
        bytes[..size].repeat(self.arch.array_size)
    }

    fn probe_source_offset(&self) -> usize {
        (self.arch.dram0_depth - 1) * self.arch.vector_bytes()
    }

    fn probe_target_offset(&self) -> usize {
        (self.arch.dram0_depth - 2) * self.arch.vector_bytes()
    }

    /// Arm the flush probe and return its two instructions.
    fn prepare_flush_probe(&self) -> Result<[Instruction; 2]> {
        let dram0 = self.dram(DramBank::Dram0)?;
        dram0.write_bytes(
            self.probe_source_offset(),
            &self.sentinel(self.arch.data_type.all_ones()),
        )?;
        dram0.write_bytes(self.probe_target_offset(), &self.sentinel(0))?;

        let local = (self.arch.local_depth - 1) as u64;
        let source = (self.arch.dram0_depth - 1) as u64;
        let target = (self.arch.dram0_depth - 2) as u64;
        Ok([
            self.layout
                .data_move(DataMoveFlag::Dram0ToMemory, local, source, 0),
            self.layout
                .data_move(DataMoveFlag::MemoryToDram0, local, target, 0),
        ])
    }

    /// Poll until the probe target holds the sentinel.
    fn wait_for_flush(&self) -> Result<()> {
        let dram0 = self.dram(DramBank::Dram0)?;
        let expected = self.sentinel(self.arch.data_type.all_ones());
        let target = self.probe_target_offset();
        let policy = self.config.flush;
        let interval = policy.interval();

        for poll in 0..policy.max_polls {
            if dram0.compare_bytes(target, &expected)? {
                debug!("Flush probe observed after {} polls", poll + 1);
                return Ok(());
            }
            if let Some(interval) = interval {
                std::thread::sleep(interval);
            } else if policy.yield_interval > 0 && poll % policy.yield_interval == 0 {
                std::thread::yield_now();
            }
        }
        warn!("Flush probe not observed after {} polls", policy.max_polls);
        Err(TcuError::Timeout {
            polls: policy.max_polls,
        })
    }

    /// Stream a finished program, flush probe included, and wait for it.
    fn execute(&mut self, program: &[u8]) -> Result<()> {
        let align = self.layout.instruction_size_bytes();
        self.instructions
            .write(&mut self.allocator, program, align)?;
        self.wait_for_flush()
    }

    /// Write configuration registers and wait until they took effect.
    ///
    /// # Errors
    ///
    /// Returns an error if streaming fails or the probe times out.
    pub fn configure(&mut self, registers: &[(Register, u64)]) -> Result<()> {
        let probe = self.prepare_flush_probe()?;
        let mut builder = ProgramBuilder::new(&self.layout);
        for &(register, value) in registers {
            debug!("Configure {register} = {value:#x}");
            builder.configure(register, value);
        }
        for instruction in probe {
            builder.push(instruction);
        }
        let program = builder.finish();
        self.execute(&program)
    }

    /// Load a model manifest: check its architecture, place its constants in
    /// DRAM1 and keep its program for [`Driver::run`].
    ///
    /// # Errors
    ///
    /// Returns `ArchitectureMismatch` if the model targets a different
    /// architecture, `Io`/`Manifest` for unreadable files, and
    /// `CapacityExceeded` if a constant blob does not fit DRAM1.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let model = Model::from_file(path)?;
        if model.arch != self.arch {
            return Err(TcuError::ArchitectureMismatch {
                expected: format!("{:?}", self.arch),
                found: format!("{:?}", model.arch),
            });
        }
        // DRAM1 is about to change under the previous model.
        if let Some(previous) = self.loaded.take() {
            debug!("Unloaded model {}", previous.model.name);
        }

        let dir = model::manifest_dir(path);
        let vector_bytes = self.arch.vector_bytes();
        let dram1_bytes = self.arch.dram1_depth * vector_bytes;

        let mut blobs = Vec::with_capacity(model.consts.len());
        for consts in &model.consts {
            let data = std::fs::read(model::resolve(&dir, &consts.file_name)?)?;
            let offset = consts.base.checked_mul(vector_bytes);
            match offset.and_then(|offset| offset.checked_add(data.len())) {
                Some(end) if end <= dram1_bytes => {}
                end => {
                    return Err(TcuError::CapacityExceeded {
                        requested: end.unwrap_or(usize::MAX),
                        max: dram1_bytes,
                    })
                }
            }
            blobs.push(data);
        }

        for (consts, data) in model.consts.iter().zip(blobs) {
            debug!(
                "Constants {} ({} bytes) at DRAM1 vector {}",
                consts.file_name,
                data.len(),
                consts.base
            );
            self.dram(DramBank::Dram1)?
                .write_bytes(consts.base * vector_bytes, &data)?;
            if model.load_consts_to_local {
                self.load_consts_to_local(consts.base, consts.size)?;
            }
        }

        let program = Bytes::from(std::fs::read(model::resolve(&dir, &model.prog.file_name)?)?);
        if program.len() % self.layout.instruction_size_bytes() != 0 {
            return Err(TcuError::invalid_argument(format!(
                "program {} of {} bytes is not a whole number of {}-byte instructions",
                model.prog.file_name,
                program.len(),
                self.layout.instruction_size_bytes()
            )));
        }
        if let Some(size) = model.prog.size {
            if size != program.len() as u64 {
                warn!(
                    "Program {} is {} bytes, manifest records {size}",
                    model.prog.file_name,
                    program.len()
                );
            }
        }
        info!(
            "Loaded model {} ({} instructions)",
            model.name,
            program.len() / self.layout.instruction_size_bytes()
        );
        self.loaded = Some(Loaded { model, program });
        Ok(())
    }

    fn load_consts_to_local(&mut self, base: usize, size: usize) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let probe = self.prepare_flush_probe()?;
        let base = base as u64;
        let mut builder = ProgramBuilder::new(&self.layout);
        builder.push(self.layout.data_move(
            DataMoveFlag::Dram1ToMemory,
            base,
            base,
            size as u64 - 1,
        ));
        for instruction in probe {
            builder.push(instruction);
        }
        let program = builder.finish();
        self.execute(&program)
    }

    /// Run the loaded model.
    ///
    /// Every declared input must be present in `inputs`. Outputs declared
    /// several times under one name are concatenated in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `ModelNotLoaded` before [`Driver::load_model`],
    /// `UnknownVariable` for a missing input, `InvalidArgument` for an input
    /// longer than its variable, and streaming or timeout errors.
    pub fn run(&mut self, inputs: &HashMap<String, Vec<f32>>) -> Result<HashMap<String, Vec<f32>>> {
        let loaded = self.loaded.as_ref().ok_or(TcuError::ModelNotLoaded)?;

        for var in &loaded.model.inputs {
            let data = inputs
                .get(&var.name)
                .ok_or_else(|| TcuError::unknown_variable(&var.name))?;
            let holds = scalars(var, &self.arch)?;
            if data.len() > holds {
                return Err(TcuError::invalid_argument(format!(
                    "input {} has {} values, variable holds {holds}",
                    var.name,
                    data.len(),
                )));
            }
            self.write_dram(DramBank::Dram0, var.base, data)?;
        }
        debug!("Wrote {} inputs", loaded.model.inputs.len());

        let probe = self.prepare_flush_probe()?;
        let mut builder = ProgramBuilder::new(&self.layout);
        builder.append_program(&loaded.program)?;
        for instruction in probe {
            builder.push(instruction);
        }
        let program = builder.finish();
        self.execute(&program)?;

        let loaded = self.loaded.as_ref().ok_or(TcuError::ModelNotLoaded)?;
        let mut outputs: HashMap<String, Vec<f32>> = HashMap::new();
        for var in &loaded.model.outputs {
            let values = self.read_dram(DramBank::Dram0, var.base, scalars(var, &self.arch)?)?;
            outputs.entry(var.name.clone()).or_default().extend(values);
        }
        info!("Ran model {}", loaded.model.name);
        Ok(outputs)
    }

    /// Pull `count` performance samples from the sample stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no sample DMA is attached, and streaming
    /// errors.
    pub fn read_samples(&mut self, count: usize) -> Result<Vec<Sample>> {
        let stream = self
            .samples
            .as_mut()
            .ok_or_else(|| TcuError::invalid_state("no sample DMA attached"))?;
        let bytes = stream.read(&mut self.allocator, count * SAMPLE_SIZE_BYTES)?;
        Ok(bytes
            .chunks_exact(SAMPLE_SIZE_BYTES)
            .map(|chunk| {
                let mut record = [0u8; SAMPLE_SIZE_BYTES];
                record.copy_from_slice(chunk);
                Sample::from_bytes(record)
            })
            .collect())
    }

    /// Release the DRAM windows. Later operations fail with `InvalidState`.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator rejects a window.
    pub fn close(&mut self) -> Result<()> {
        self.loaded = None;
        if let Some(Windows { dram0, dram1 }) = self.windows.take() {
            self.allocator.free(dram0.slice)?;
            self.allocator.free(dram1.slice)?;
            info!("Driver closed");
        }
        Ok(())
    }
}

impl<T: DmaTransport> Drop for Driver<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Closing driver failed: {e}");
        }
    }
}

/// Scalars held by `var` in DRAM0.
fn scalars(var: &Variable, arch: &Architecture) -> Result<usize> {
    var.size
        .checked_mul(arch.array_size)
        .ok_or(TcuError::CapacityExceeded {
            requested: usize::MAX,
            max: arch.dram0_depth * arch.array_size,
        })
}
