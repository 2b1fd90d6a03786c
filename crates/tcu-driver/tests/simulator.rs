//! End-to-end driver tests against the software TCU
//!
//! Every test builds a driver over the simulator, so the full path is
//! exercised: DRAM window setup, register programming, instruction
//! streaming and flush-probe completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tcu_arch::opcode::simd;
use tcu_arch::regs::sample::INSTRUCTION;
use tcu_arch::{presets, Architecture, DataMoveFlag, Register, SimdOp, TCU_BLOCK_SIZE};
use tcu_driver::backends::software::SIMULATED_PHYSICAL_BASE;
use tcu_driver::backends::{simulated_driver, SimulatedTcu};
use tcu_driver::dma::BufferView;
use tcu_driver::model::{ConstsFile, Model, ProgramFile, Variable};
use tcu_driver::{
    Direction, DmaBuffer, DmaTransport, DramBank, Driver, DriverConfig, InstructionLayout, PollConfig,
    ProgramBuilder, TcuError,
};

/// Route driver logs to the test harness; `RUST_LOG=tcu_driver=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> DriverConfig {
    DriverConfig::default().with_dma_buffer_size(256)
}

fn tiny_driver() -> Driver<SimulatedTcu> {
    simulated_driver(presets::tiny(), config(), false).expect("simulated driver")
}

/// Two-layer ReLU network computing XOR of lanes 0 and 1 of `x` into lane 0
/// of `y`.
///
/// Weights live in DRAM1 vectors 0..10 and are moved into local memory at
/// load time. Layer 1 is `h = relu([a + b, a + b - 1])`, layer 2 is
/// `y = h0 - 2 h1`.
fn xor_program(layout: &InstructionLayout) -> Vec<u8> {
    let mut program = ProgramBuilder::new(layout);
    program
        .push(layout.simd(0, layout.simd_sub(SimdOp::Zero, 0, 0, 1), 0, 0))
        .push(layout.data_move(DataMoveFlag::Dram0ToMemory, 16, 0, 0))
        .push(layout.load_weight(false, 0, 4))
        .push(layout.matmul(0, 16, 0, 0))
        .push(layout.simd(
            simd::READ | simd::WRITE,
            layout.simd_sub(SimdOp::Max, 0, 1, 0),
            0,
            1,
        ))
        .push(layout.data_move(DataMoveFlag::AccumulatorToMemory, 17, 1, 0))
        .push(layout.load_weight(false, 5, 4))
        .push(layout.matmul(0, 17, 2, 0))
        .push(layout.data_move(DataMoveFlag::AccumulatorToMemory, 18, 2, 0))
        .push(layout.data_move(DataMoveFlag::MemoryToDram0, 18, 1, 0));
    program.finish().to_vec()
}

fn xor_weights() -> Vec<f32> {
    #[rustfmt::skip]
    let weights = [
        // layer 1: bias, then one row per input lane
        0.0, -1.0, 0.0, 0.0,
        1.0, 1.0, 0.0, 0.0,
        1.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
        // layer 2
        0.0, 0.0, 0.0, 0.0,
        1.0, 0.0, 0.0, 0.0,
        -2.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
    ];
    weights.to_vec()
}

fn variable(name: &str, base: usize, size: usize) -> Variable {
    Variable {
        name: name.into(),
        base,
        size,
    }
}

fn xor_model(arch: Architecture) -> Model {
    Model {
        name: "xor".into(),
        prog: ProgramFile {
            file_name: "xor.tprog".into(),
            size: None,
        },
        consts: vec![ConstsFile {
            file_name: "xor.tdata".into(),
            base: 0,
            size: 10,
        }],
        inputs: vec![variable("x", 0, 1)],
        outputs: vec![variable("y", 1, 1)],
        arch,
        load_consts_to_local: true,
    }
}

/// Write `model` and its program and constants into `dir`.
fn write_model(dir: &Path, model: &Model) -> PathBuf {
    let arch = presets::tiny();
    let layout = InstructionLayout::new(&arch).unwrap();
    std::fs::write(dir.join("xor.tprog"), xor_program(&layout)).unwrap();
    std::fs::write(dir.join("xor.tdata"), arch.data_type.encode(&xor_weights())).unwrap();
    let path = dir.join("xor.tmodel");
    std::fs::write(&path, serde_json::to_string_pretty(model).unwrap()).unwrap();
    path
}

fn inputs(a: f32, b: f32) -> HashMap<String, Vec<f32>> {
    HashMap::from([("x".to_string(), vec![a, b])])
}

#[test]
fn test_xor_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(dir.path(), &xor_model(presets::tiny()));
    let mut driver = tiny_driver();
    driver.load_model(&path).unwrap();
    assert_eq!(driver.model().map(|m| m.name.as_str()), Some("xor"));

    for (a, b, expected) in [(0.0, 0.0, 0.0), (0.0, 1.0, 1.0), (1.0, 0.0, 1.0), (1.0, 1.0, 0.0)] {
        let outputs = driver.run(&inputs(a, b)).unwrap();
        let y = &outputs["y"];
        assert_eq!(y.len(), 4);
        assert!(
            (y[0] - expected).abs() < 1e-2,
            "xor({a}, {b}) = {}, expected {expected}",
            y[0]
        );
    }
}

#[test]
fn test_consts_loaded_to_local() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(dir.path(), &xor_model(presets::tiny()));
    let mut driver = tiny_driver();
    driver.load_model(&path).unwrap();

    let one: i64 = 1 << presets::tiny().data_type.binary_point();
    let tcu = driver.instruction_transport();
    assert_eq!(tcu.local_vector(0).unwrap(), vec![0, -one, 0, 0]);
    assert_eq!(tcu.local_vector(7).unwrap(), vec![-2 * one, 0, 0, 0]);
}

#[test]
fn test_repeated_outputs_concatenate() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = xor_model(presets::tiny());
    model.outputs = vec![variable("y", 1, 1), variable("y", 0, 1)];
    let path = write_model(dir.path(), &model);
    let mut driver = tiny_driver();
    driver.load_model(&path).unwrap();

    let outputs = driver.run(&inputs(1.0, 0.0)).unwrap();
    let y = &outputs["y"];
    assert_eq!(y.len(), 8);
    assert!((y[0] - 1.0).abs() < 1e-2);
    // second declaration reads back the input vector
    assert_eq!(&y[4..6], &[1.0, 0.0]);
}

#[test]
fn test_run_errors() {
    let mut driver = tiny_driver();
    assert!(matches!(driver.run(&HashMap::new()), Err(TcuError::ModelNotLoaded)));

    let dir = tempfile::tempdir().unwrap();
    let path = write_model(dir.path(), &xor_model(presets::tiny()));
    driver.load_model(&path).unwrap();

    match driver.run(&HashMap::new()) {
        Err(TcuError::UnknownVariable { name }) => assert_eq!(name, "x"),
        other => panic!("expected UnknownVariable, got {other:?}"),
    }

    let oversize = HashMap::from([("x".to_string(), vec![0.0; 5])]);
    assert!(matches!(
        driver.run(&oversize),
        Err(TcuError::InvalidArgument { .. })
    ));
}

#[test]
fn test_architecture_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut arch = presets::tiny();
    arch.local_depth = 1024;
    let path = write_model(dir.path(), &xor_model(arch));
    let mut driver = tiny_driver();
    assert!(matches!(
        driver.load_model(&path),
        Err(TcuError::ArchitectureMismatch { .. })
    ));
    assert!(driver.model().is_none());
}

#[test]
fn test_consts_past_dram1_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = xor_model(presets::tiny());
    model.consts[0].base = presets::tiny().dram1_depth - 2;
    let path = write_model(dir.path(), &model);
    let mut driver = tiny_driver();
    assert!(matches!(
        driver.load_model(&path),
        Err(TcuError::CapacityExceeded { .. })
    ));
}

#[test]
fn test_failed_load_unloads_previous_model() {
    init_tracing();
    let arch = presets::tiny();
    let first = tempfile::tempdir().unwrap();
    let mut driver = tiny_driver();
    driver.load_model(write_model(first.path(), &xor_model(arch.clone()))).unwrap();
    let weights = driver.read_dram(DramBank::Dram1, 0, 40).unwrap();

    // first blob fits, second runs 8 bytes past DRAM1
    let second = tempfile::tempdir().unwrap();
    let mut model = xor_model(arch.clone());
    model.name = "broken".into();
    model.consts[0].base = 20;
    model.consts.push(ConstsFile {
        file_name: "tail.tdata".into(),
        base: arch.dram1_depth - 1,
        size: 2,
    });
    let path = write_model(second.path(), &model);
    std::fs::write(second.path().join("tail.tdata"), arch.data_type.encode(&[9.0; 8])).unwrap();

    match driver.load_model(&path) {
        Err(TcuError::CapacityExceeded { requested, max }) => {
            assert_eq!((requested, max), (8200, 8192));
        }
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
    assert!(driver.model().is_none());
    assert!(matches!(driver.run(&inputs(1.0, 0.0)), Err(TcuError::ModelNotLoaded)));

    // nothing was written before the range check failed
    assert_eq!(driver.read_dram(DramBank::Dram1, 0, 40).unwrap(), weights);
    assert_eq!(driver.read_dram(DramBank::Dram1, 20, 4).unwrap(), vec![0.0; 4]);
}

#[test]
fn test_overflowing_offsets_rejected() {
    let driver = tiny_driver();
    assert!(matches!(
        driver.write_dram(DramBank::Dram1, usize::MAX, &[1.0]),
        Err(TcuError::CapacityExceeded { requested: usize::MAX, .. })
    ));
    assert!(matches!(
        driver.read_dram(DramBank::Dram0, usize::MAX / 2, 4),
        Err(TcuError::CapacityExceeded { .. })
    ));

    let dir = tempfile::tempdir().unwrap();
    let mut model = xor_model(presets::tiny());
    model.consts[0].base = usize::MAX / 2;
    let path = write_model(dir.path(), &model);
    let mut driver = tiny_driver();
    assert!(matches!(
        driver.load_model(&path),
        Err(TcuError::CapacityExceeded { requested: usize::MAX, max: 8192 })
    ));

    let mut model = xor_model(presets::tiny());
    model.inputs[0].size = usize::MAX;
    let path = write_model(dir.path(), &model);
    driver.load_model(&path).unwrap();
    assert!(matches!(
        driver.run(&inputs(1.0, 1.0)),
        Err(TcuError::CapacityExceeded { .. })
    ));
}

#[test]
fn test_truncated_program_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_model(dir.path(), &xor_model(presets::tiny()));
    let program = std::fs::read(dir.path().join("xor.tprog")).unwrap();
    std::fs::write(dir.path().join("xor.tprog"), &program[..program.len() - 1]).unwrap();
    let mut driver = tiny_driver();
    assert!(matches!(
        driver.load_model(&path),
        Err(TcuError::InvalidArgument { .. })
    ));
}

#[test]
fn test_registers_programmed() {
    let mut driver = tiny_driver();
    let tcu = driver.instruction_transport();
    assert_eq!(tcu.register(Register::Timeout).unwrap(), 100);
    assert_eq!(tcu.register(Register::SampleInterval).unwrap(), 0);

    let block = TCU_BLOCK_SIZE as u64;
    let dram0 = tcu.register(Register::Dram0AddressOffset).unwrap();
    let dram1 = tcu.register(Register::Dram1AddressOffset).unwrap();
    assert!(dram0 * block >= SIMULATED_PHYSICAL_BASE);
    assert!(dram1 > dram0);

    driver.configure(&[(Register::Timeout, 42)]).unwrap();
    assert_eq!(
        driver.instruction_transport().register(Register::Timeout).unwrap(),
        42
    );
}

#[test]
fn test_flush_probe_target_holds_sentinel() {
    let mut driver = tiny_driver();
    driver.configure(&[]).unwrap();
    let arch = driver.arch().clone();
    let target = (arch.dram0_depth - 2) * arch.vector_bytes();
    let bytes = driver
        .dram(DramBank::Dram0)
        .unwrap()
        .read_bytes(target, arch.vector_bytes())
        .unwrap();
    assert!(bytes.iter().all(|&b| b == 0xFF));
}

#[test]
fn test_dram_access() {
    let driver = tiny_driver();
    driver.write_dram(DramBank::Dram1, 3, &[1.5, -2.25, 0.0, 4.0]).unwrap();
    assert_eq!(
        driver.read_dram(DramBank::Dram1, 3, 4).unwrap(),
        vec![1.5, -2.25, 0.0, 4.0]
    );
    // values round to the nearest fixed-point step
    driver.write_dram(DramBank::Dram0, 0, &[0.3]).unwrap();
    assert_eq!(driver.read_dram(DramBank::Dram0, 0, 1).unwrap(), vec![77.0 / 256.0]);

    let depth = presets::tiny().dram1_depth;
    assert!(matches!(
        driver.write_dram(DramBank::Dram1, depth - 1, &[0.0; 5]),
        Err(TcuError::CapacityExceeded { .. })
    ));
    assert!(driver.read_dram(DramBank::Dram1, depth, 1).is_err());
}

#[test]
fn test_samples() {
    let config = config().with_sample_interval(1);
    let mut driver = simulated_driver(presets::tiny(), config, true).unwrap();
    assert_eq!(
        driver.instruction_transport().register(Register::SampleInterval).unwrap(),
        1
    );

    driver.configure(&[]).unwrap();

    // sampling starts with the instruction that enabled it, the fourth of
    // the bring-up program
    let samples = driver.read_samples(4).unwrap();
    assert_eq!(samples.len(), 4);
    for (i, sample) in samples.iter().enumerate() {
        assert!(sample.is_valid());
        assert!(sample.unit_valid(INSTRUCTION));
        assert_eq!(sample.program_counter as usize, 3 + i);
    }

    // drained queue pads with idle records
    let rest = driver.read_samples(64).unwrap();
    assert!(!rest.last().unwrap().is_valid());

    let mut plain = tiny_driver();
    assert!(matches!(
        plain.read_samples(1),
        Err(TcuError::InvalidState { .. })
    ));
}

#[test]
fn test_close_is_idempotent() {
    let mut driver = tiny_driver();
    let live = driver.allocator().live_count();
    assert_eq!(live, 2);
    driver.close().unwrap();
    driver.close().unwrap();
    assert_eq!(driver.allocator().live_count(), 0);
    assert!(matches!(
        driver.dram(DramBank::Dram0),
        Err(TcuError::InvalidState { .. })
    ));
    assert!(driver.write_dram(DramBank::Dram0, 0, &[1.0]).is_err());
    assert!(matches!(driver.run(&HashMap::new()), Err(TcuError::ModelNotLoaded)));
}

/// Engine that accepts every transfer and never executes anything.
#[derive(Debug, Default)]
struct DeadTransport {
    started: Option<Direction>,
}

impl DmaTransport for DeadTransport {
    fn word_size(&self) -> usize {
        8
    }

    fn max_buffer_size(&self) -> usize {
        1 << 20
    }

    fn start(&mut self, direction: Direction, _buffer: &BufferView) -> tcu_driver::Result<()> {
        self.started = Some(direction);
        Ok(())
    }

    fn wait(&mut self, _direction: Direction) -> tcu_driver::Result<()> {
        self.started = None;
        Ok(())
    }
}

#[test]
fn test_dead_tcu_times_out() {
    init_tracing();
    let arch = presets::tiny();
    let config = config().with_flush(PollConfig {
        max_polls: 5,
        yield_interval: 0,
        interval_us: 1,
    });
    let size = Driver::<DeadTransport>::buffer_size_bytes(&arch, &config, 8, false);
    let memory = Arc::new(DmaBuffer::allocate(size, SIMULATED_PHYSICAL_BASE).unwrap());
    let result = Driver::new(arch, config, memory, DeadTransport::default(), None);
    assert!(matches!(result, Err(TcuError::Timeout { polls: 5 })));
}

#[test]
fn test_undersized_memory_rejected() {
    let arch = presets::tiny();
    let memory = Arc::new(DmaBuffer::allocate(4096, SIMULATED_PHYSICAL_BASE).unwrap());
    let tcu = SimulatedTcu::new(arch.clone(), Arc::clone(&memory)).unwrap();
    assert!(matches!(
        Driver::new(arch, config(), memory, tcu, None),
        Err(TcuError::Allocation { .. })
    ));
}

#[test]
#[ignore] // Requires hardware
fn test_pynqz1_bring_up() {
    use tcu_driver::backends::{AxiDma, UdmaBuf};

    let memory = UdmaBuf::new("udmabuf0").map().expect("u-dma-buf");
    let dma = AxiDma::open("/dev/uio0", 64, PollConfig::default()).expect("AXI DMA");
    let mut driver = Driver::new(presets::pynqz1(), DriverConfig::default(), memory, dma, None)
        .expect("driver bring-up");
    driver.configure(&[(Register::Timeout, 100)]).unwrap();
    driver.close().unwrap();
}
