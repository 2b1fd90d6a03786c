//! `tcu`: command-line interface for the Tensil TCU driver.
//!
//! ```text
//! USAGE:
//!   tcu layout --arch <preset|file.json>             Print the instruction layout
//!   tcu disasm <program> --arch <preset|file.json>   Decode a program binary
//!   tcu simulate <model> --input x=1,2,..            Run a model on the simulator
//!   tcu run <model> --uio /dev/uio0 --udmabuf udmabuf0 --input ..
//!                                                    Run a model on hardware
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tcu_arch::{presets, Architecture};
use tcu_driver::backends::{simulated_driver, AxiDma, UdmaBuf};
use tcu_driver::{disassemble, DmaTransport, Driver, DriverConfig, InstructionLayout, Model};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tcu", about = "Tensil TCU driver CLI", version)]
struct Cli {
    /// Driver configuration (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the instruction layout of an architecture.
    Layout {
        /// Preset name or architecture JSON file.
        #[arg(long, default_value = "pynqz1")]
        arch: String,
    },
    /// Decode a program binary.
    Disasm {
        /// Program binary (.tprog).
        program: PathBuf,
        /// Preset name or architecture JSON file.
        #[arg(long, default_value = "pynqz1")]
        arch: String,
    },
    /// Run a model on the software TCU.
    Simulate {
        /// Model manifest (.tmodel).
        model: PathBuf,
        /// Input as name=v1,v2,.. (repeatable).
        #[arg(long = "input", value_parser = parse_input)]
        inputs: Vec<(String, Vec<f32>)>,
    },
    /// Run a model on an FPGA TCU.
    Run {
        /// Model manifest (.tmodel).
        model: PathBuf,
        /// UIO device of the instruction AXI DMA.
        #[arg(long, default_value = "/dev/uio0")]
        uio: PathBuf,
        /// u-dma-buf buffer name.
        #[arg(long, default_value = "udmabuf0")]
        udmabuf: String,
        /// AXI stream data width in bits.
        #[arg(long, default_value_t = 64)]
        width: usize,
        /// Input as name=v1,v2,.. (repeatable).
        #[arg(long = "input", value_parser = parse_input)]
        inputs: Vec<(String, Vec<f32>)>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(?config, "Driver configuration");

    match cli.command {
        Cmd::Layout { arch } => cmd_layout(&resolve_arch(&arch)?)?,
        Cmd::Disasm { program, arch } => cmd_disasm(&program, &resolve_arch(&arch)?)?,
        Cmd::Simulate { model, inputs } => cmd_simulate(&model, config, inputs)?,
        Cmd::Run {
            model,
            uio,
            udmabuf,
            width,
            inputs,
        } => cmd_run(&model, config, &uio, &udmabuf, width, inputs)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<DriverConfig> {
    let Some(path) = path else {
        return Ok(DriverConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn resolve_arch(arch: &str) -> Result<Architecture> {
    if let Some(preset) = Architecture::preset(arch) {
        return Ok(preset);
    }
    let path = Path::new(arch);
    if !path.exists() {
        bail!(
            "unknown architecture '{arch}' (presets: {})",
            presets::NAMES.join(", ")
        );
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {arch}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {arch}"))
}

fn parse_input(arg: &str) -> std::result::Result<(String, Vec<f32>), String> {
    let (name, values) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=v1,v2,.. but got '{arg}'"))?;
    let values = values
        .split(',')
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("'{v}': {e}")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((name.to_string(), values))
}

fn cmd_layout(arch: &Architecture) -> Result<()> {
    let layout = InstructionLayout::new(arch)?;
    let [op0, op1, op2] = layout.operand_size_bits();
    let [addr0, addr1, _] = layout.operand_address_size_bits();
    let [stride0, stride1] = layout.stride_size_bits();

    println!("Data type        : {:?}", arch.data_type);
    println!("Array size       : {}", arch.array_size);
    println!(
        "Instruction      : {} bits ({} bytes)",
        layout.instruction_size_bits(),
        layout.instruction_size_bytes()
    );
    println!("Header           : {} bits", layout.header_size_bits());
    println!("Operand 0        : {op0} bits (address {addr0}, stride {stride0})");
    println!("Operand 1        : {op1} bits (address {addr1}, stride {stride1})");
    println!("Operand 2        : {op2} bits");
    println!(
        "SIMD             : {} bits, {}-bit register operands",
        layout.simd_instruction_size_bits(),
        layout.simd_operand_size_bits()
    );
    Ok(())
}

fn cmd_disasm(program: &Path, arch: &Architecture) -> Result<()> {
    let layout = InstructionLayout::new(arch)?;
    let bytes =
        std::fs::read(program).with_context(|| format!("reading {}", program.display()))?;
    for (pc, op) in disassemble(&layout, &bytes)?.iter().enumerate() {
        println!("{pc:>8}  {op}");
    }
    Ok(())
}

fn print_outputs(model: &Model, outputs: &HashMap<String, Vec<f32>>) {
    for name in model.output_names() {
        if let Some(values) = outputs.get(name) {
            println!("{name}: {values:?}");
        }
    }
}

fn run_model<T: DmaTransport>(
    driver: &mut Driver<T>,
    path: &Path,
    inputs: Vec<(String, Vec<f32>)>,
) -> Result<()> {
    driver
        .load_model(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let inputs: HashMap<String, Vec<f32>> = inputs.into_iter().collect();
    let outputs = driver.run(&inputs)?;
    if let Some(model) = driver.model() {
        print_outputs(model, &outputs);
    }
    driver.close()?;
    Ok(())
}

fn cmd_simulate(path: &Path, config: DriverConfig, inputs: Vec<(String, Vec<f32>)>) -> Result<()> {
    let model = Model::from_file(path).with_context(|| format!("reading {}", path.display()))?;
    let mut driver = simulated_driver(model.arch, config, false)?;
    run_model(&mut driver, path, inputs)
}

fn cmd_run(
    path: &Path,
    config: DriverConfig,
    uio: &Path,
    udmabuf: &str,
    width: usize,
    inputs: Vec<(String, Vec<f32>)>,
) -> Result<()> {
    let model = Model::from_file(path).with_context(|| format!("reading {}", path.display()))?;
    let memory = UdmaBuf::new(udmabuf)
        .map()
        .with_context(|| format!("mapping u-dma-buf {udmabuf}"))?;
    let mut dma = AxiDma::open(uio, width, config.flush)
        .with_context(|| format!("opening AXI DMA at {}", uio.display()))?;
    dma.reset()?;

    let required = Driver::<AxiDma>::buffer_size_bytes(&model.arch, &config, dma.word_size(), false);
    if memory.len() < required {
        bail!(
            "u-dma-buf {udmabuf} holds {} bytes, {} needs {required}",
            memory.len(),
            model.name
        );
    }
    let mut driver = Driver::new(model.arch, config, memory, dma, None)?;
    run_model(&mut driver, path, inputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        let (name, values) = parse_input("x=1, 2.5,-3").unwrap();
        assert_eq!(name, "x");
        assert_eq!(values, vec![1.0, 2.5, -3.0]);
        assert!(parse_input("x").is_err());
        assert!(parse_input("x=a").is_err());
        assert_eq!(parse_input("y=").unwrap().1, Vec::<f32>::new());
    }

    #[test]
    fn test_resolve_arch() {
        assert_eq!(resolve_arch("tiny").unwrap(), presets::tiny());
        assert!(resolve_arch("no-such-arch").is_err());
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        std::fs::write(&path, "dma_buffer_size = 4096\n\n[flush]\nmax_polls = 10\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.dma_buffer_size, 4096);
        assert_eq!(config.flush.max_polls, 10);
        assert_eq!(config.decoder_timeout, DriverConfig::default().decoder_timeout);
        assert_eq!(load_config(None).unwrap(), DriverConfig::default());
    }
}
