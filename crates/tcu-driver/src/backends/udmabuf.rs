//! Contiguous DMA memory from the `u-dma-buf` kernel module.
//!
//! The module exposes each buffer as `/dev/<name>` and publishes its
//! physical address and size under `/sys/class/u-dma-buf/<name>/`. Opening
//! the device with `O_SYNC` maps it uncached, so host copies are visible to
//! the TCU without explicit cache maintenance.

use super::axi_dma::parse_number;
use crate::dma::DmaBuffer;
use crate::error::{Result, TcuError};
use rustix::fs::OFlags;
use rustix::mm::{mmap, MapFlags, ProtFlags};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default sysfs class directory of the module.
pub const SYSFS_CLASS: &str = "/sys/class/u-dma-buf";

/// Default device directory.
pub const DEV_DIR: &str = "/dev";

/// Location of one `u-dma-buf` buffer.
#[derive(Debug, Clone)]
pub struct UdmaBuf {
    name: String,
    sysfs_class: PathBuf,
    dev_dir: PathBuf,
}

impl UdmaBuf {
    /// Buffer `name` at the standard locations.
    pub fn new(name: impl Into<String>) -> Self {
        Self::at(name, SYSFS_CLASS, DEV_DIR)
    }

    /// Buffer `name` with explicit sysfs and device directories.
    pub fn at(name: impl Into<String>, sysfs_class: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            sysfs_class: sysfs_class.into(),
            dev_dir: dev_dir.into(),
        }
    }

    fn attribute(&self, attribute: &str) -> Result<usize> {
        let path = self.sysfs_class.join(&self.name).join(attribute);
        let text = std::fs::read_to_string(&path)?;
        parse_number(&text)
    }

    /// Physical address of the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the sysfs attribute is missing or malformed.
    pub fn physical_address(&self) -> Result<u64> {
        Ok(self.attribute("phys_addr")? as u64)
    }

    /// Size of the buffer in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the sysfs attribute is missing or malformed.
    pub fn size(&self) -> Result<usize> {
        self.attribute("size")
    }

    /// Map the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the device cannot be opened or mapped and
    /// `InvalidArgument` if it reports a zero size.
    pub fn map(&self) -> Result<Arc<DmaBuffer>> {
        let physical_address = self.physical_address()?;
        let size = self.size()?;
        if size == 0 {
            return Err(TcuError::invalid_argument(format!(
                "u-dma-buf {} has zero size",
                self.name
            )));
        }
        Self::map_device(&self.dev_dir.join(&self.name), size, physical_address)
    }

    fn map_device(path: &Path, size: usize, physical_address: u64) -> Result<Arc<DmaBuffer>> {
        #[allow(clippy::cast_possible_wrap)]
        let sync = OFlags::SYNC.bits() as i32;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync)
            .open(path)?;
        // SAFETY: a fresh shared mapping of `size` bytes; ownership passes to
        // the DmaBuffer, which unmaps it on drop. The file may close: the
        // mapping keeps the device memory alive.
        let buffer = unsafe {
            let ptr = mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(std::io::Error::from)?;
            DmaBuffer::from_mapping(ptr.cast(), size, physical_address)
        };
        tracing::info!(
            "Mapped {} ({size:#x} bytes at phys={physical_address:#x})",
            path.display()
        );
        Ok(Arc::new(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake(size: usize) -> (tempfile::TempDir, UdmaBuf) {
        let root = tempfile::tempdir().unwrap();
        let class = root.path().join("class");
        let dev = root.path().join("dev");
        std::fs::create_dir_all(class.join("udmabuf0")).unwrap();
        std::fs::create_dir_all(&dev).unwrap();
        std::fs::write(class.join("udmabuf0/phys_addr"), "0x0000000070000000\n").unwrap();
        std::fs::write(class.join("udmabuf0/size"), format!("{size}\n")).unwrap();
        let file = std::fs::File::create(dev.join("udmabuf0")).unwrap();
        file.set_len(size as u64).unwrap();
        let buf = UdmaBuf::at("udmabuf0", class, dev);
        (root, buf)
    }

    #[test]
    fn test_sysfs_attributes() {
        let (_root, buf) = fake(8192);
        assert_eq!(buf.physical_address().unwrap(), 0x7000_0000);
        assert_eq!(buf.size().unwrap(), 8192);
    }

    #[test]
    fn test_map_file_backed() {
        let (_root, buf) = fake(8192);
        let memory = buf.map().unwrap();
        assert_eq!(memory.len(), 8192);
        assert_eq!(memory.physical_address(), 0x7000_0000);
        memory.write(100, &[1, 2, 3]);
        let mut out = [0u8; 3];
        memory.read(100, &mut out);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_missing_buffer() {
        let buf = UdmaBuf::at("nope", "/nonexistent/class", "/nonexistent/dev");
        assert!(matches!(buf.map(), Err(TcuError::Io { .. })));
    }

    #[test]
    #[ignore] // Requires hardware
    fn test_map_udmabuf0() {
        let memory = UdmaBuf::new("udmabuf0").map().unwrap();
        assert!(!memory.is_empty());
    }
}
