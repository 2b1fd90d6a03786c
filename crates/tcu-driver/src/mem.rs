//! Typed access to a DRAM window.
//!
//! [`Mem`] interprets a slice of the DMA buffer as an array of the
//! accelerator's scalars. Offsets and sizes of the typed accessors count
//! scalars; the `*_bytes` accessors count bytes but must stay scalar-aligned.

use crate::dma::BufferView;
use crate::error::{Result, TcuError};
use bytemuck::Pod;
use tcu_arch::DataType;

/// Host integer type that can carry raw scalars.
pub trait Scalar: Pod {}

impl Scalar for u8 {}
impl Scalar for u16 {}
impl Scalar for u32 {}
impl Scalar for u64 {}

/// Scalar-typed window over device memory.
#[derive(Debug, Clone)]
pub struct Mem {
    view: BufferView,
    data_type: DataType,
}

impl Mem {
    /// Interpret `view` as scalars of `data_type`.
    pub const fn new(view: BufferView, data_type: DataType) -> Self {
        Self { view, data_type }
    }

    /// Scalar type of the window.
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Capacity in scalars.
    pub fn len(&self) -> usize {
        self.view.len() / self.data_type.size_bytes()
    }

    /// Whether the window holds no scalars.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Underlying byte window.
    pub const fn view(&self) -> &BufferView {
        &self.view
    }

    fn check_type<T: Scalar>(&self) -> Result<()> {
        let found = std::mem::size_of::<T>();
        let expected = self.data_type.size_bytes();
        if found == expected {
            Ok(())
        } else {
            Err(TcuError::TypeMismatch { expected, found })
        }
    }

    fn check_aligned(&self, what: &str, bytes: usize) -> Result<()> {
        let size = self.data_type.size_bytes();
        if bytes % size == 0 {
            Ok(())
        } else {
            Err(TcuError::alignment(format!(
                "{what} {bytes} is not aligned with {} scalars of {size} bytes",
                self.data_type
            )))
        }
    }

    /// Write raw scalars starting at scalar `offset`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `T` is not the window's scalar size.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn write<T: Scalar>(&self, offset: usize, data: &[T]) -> Result<()> {
        self.check_type::<T>()?;
        self.view
            .write(offset * self.data_type.size_bytes(), bytemuck::cast_slice(data));
        Ok(())
    }

    /// Read `size` raw scalars starting at scalar `offset`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `T` is not the window's scalar size.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn read<T: Scalar>(&self, offset: usize, size: usize) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        let mut out = vec![T::zeroed(); size];
        self.view.read(
            offset * self.data_type.size_bytes(),
            bytemuck::cast_slice_mut(&mut out[..]),
        );
        Ok(out)
    }

    /// Whether the scalars at `offset` equal `data`, read with volatile loads.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if `T` is not the window's scalar size.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn compare<T: Scalar>(&self, offset: usize, data: &[T]) -> Result<bool> {
        self.check_type::<T>()?;
        Ok(self.compare_bytes_unchecked(
            offset * self.data_type.size_bytes(),
            bytemuck::cast_slice(data),
        ))
    }

    /// Write scalar-encoded bytes at a byte offset.
    ///
    /// # Errors
    ///
    /// Returns `Alignment` if the offset or length is not scalar-aligned.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn write_bytes(&self, offset_bytes: usize, data: &[u8]) -> Result<()> {
        self.check_aligned("offset", offset_bytes)?;
        self.check_aligned("size", data.len())?;
        self.view.write(offset_bytes, data);
        Ok(())
    }

    /// Read scalar-encoded bytes from a byte offset.
    ///
    /// # Errors
    ///
    /// Returns `Alignment` if the offset or size is not scalar-aligned.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn read_bytes(&self, offset_bytes: usize, size_bytes: usize) -> Result<Vec<u8>> {
        self.check_aligned("offset", offset_bytes)?;
        self.check_aligned("size", size_bytes)?;
        let mut out = vec![0u8; size_bytes];
        self.view.read(offset_bytes, &mut out);
        Ok(out)
    }

    /// Byte-level variant of [`Mem::compare`].
    ///
    /// # Errors
    ///
    /// Returns `Alignment` if the offset or length is not scalar-aligned.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn compare_bytes(&self, offset_bytes: usize, data: &[u8]) -> Result<bool> {
        self.check_aligned("offset", offset_bytes)?;
        self.check_aligned("size", data.len())?;
        Ok(self.compare_bytes_unchecked(offset_bytes, data))
    }

    fn compare_bytes_unchecked(&self, offset_bytes: usize, data: &[u8]) -> bool {
        self.view.equals(offset_bytes, data)
    }

    /// Write host values at scalar `offset`, converting to fixed point.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn write_values(&self, offset: usize, values: &[f32]) {
        self.view.write(
            offset * self.data_type.size_bytes(),
            &self.data_type.encode(values),
        );
    }

    /// Read `size` scalars at `offset` as host values.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the window.
    pub fn read_values(&self, offset: usize, size: usize) -> Vec<f32> {
        let bytes_per = self.data_type.size_bytes();
        let mut raw = vec![0u8; size * bytes_per];
        self.view.read(offset * bytes_per, &mut raw);
        self.data_type.decode(&raw)
    }
}
