//! Compiled model manifests (`.tmodel`).
//!
//! A manifest is JSON naming the program binary, the constant blobs to place
//! in DRAM1 and where inputs and outputs live in DRAM0. Bases and sizes are
//! counted in vectors of `array_size` scalars. Files are resolved relative
//! to the manifest's directory.

use crate::error::{Result, TcuError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tcu_arch::Architecture;

/// Program binary reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramFile {
    /// Path relative to the manifest
    pub file_name: String,
    /// Size in bytes, when recorded
    #[serde(default)]
    pub size: Option<u64>,
}

/// Constant blob placed in DRAM1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstsFile {
    /// Path relative to the manifest
    pub file_name: String,
    /// First vector
    pub base: usize,
    /// Vectors covered
    pub size: usize,
}

/// A named range of DRAM0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Name used in input and output maps
    pub name: String,
    /// First vector
    pub base: usize,
    /// Vectors covered
    pub size: usize,
}

/// Parsed manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Model name
    pub name: String,
    /// Instruction program
    pub prog: ProgramFile,
    /// Constants for DRAM1
    #[serde(default)]
    pub consts: Vec<ConstsFile>,
    /// Inputs in DRAM0
    #[serde(default)]
    pub inputs: Vec<Variable>,
    /// Outputs in DRAM0; one name may appear several times
    #[serde(default)]
    pub outputs: Vec<Variable>,
    /// Architecture the program was compiled for
    pub arch: Architecture,
    /// Whether constants must be moved into local memory before running
    #[serde(default)]
    pub load_consts_to_local: bool,
}

impl Model {
    /// Parse a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `Manifest` if the text is not a valid manifest.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Manifest` if it does not
    /// parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Input variable by name.
    pub fn input(&self, name: &str) -> Option<&Variable> {
        self.inputs.iter().find(|v| v.name == name)
    }

    /// Distinct output names in order of first declaration.
    pub fn output_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for out in &self.outputs {
            if !names.contains(&out.name.as_str()) {
                names.push(&out.name);
            }
        }
        names
    }
}

/// Directory holding the files referenced by a manifest.
pub(crate) fn manifest_dir(path: &Path) -> PathBuf {
    path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Check that a manifest references only files inside its directory.
pub(crate) fn resolve(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let relative = Path::new(file_name);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(TcuError::invalid_argument(format!(
            "manifest file {file_name} must be relative to the manifest directory"
        )));
    }
    Ok(dir.join(relative))
}
