//! Dense matrix view and bit-exact reference arithmetic
//!
//! A [`DenseMatrix`] is a `rows x cols` window over row-major storage with a
//! leading dimension (`stride`) that may exceed `cols`. It either owns a
//! page-aligned allocation or borrows caller memory, in which case it owns
//! nothing and dropping it leaves the memory untouched.
//!
//! The reference arithmetic mirrors the pipeline's fixed-point datapath
//! exactly: products accumulate in `i64`, bias and post-scale are applied to
//! the accumulator, and the result is narrowed by two's-complement
//! truncation. Results are pure functions of their inputs.

use crate::buffer::AlignedBuffer;
use crate::compare::{compare_values, CompareReport, Verdict};
use crate::numeric::{Element, Quantized};
use crate::quant::{LeakyRelu, PostScale};
use crate::{Error, Result};

/// Alignment of owned matrix storage
pub const HOST_ALIGNMENT: usize = 4096;

enum Storage<'a, T: Element> {
    Owned(AlignedBuffer<T>),
    /// Owned copy of borrowed memory, at element alignment
    Copied(Vec<T>),
    Borrowed(&'a mut [T]),
}

/// Row-major matrix with an explicit leading dimension
pub struct DenseMatrix<'a, T: Element> {
    rows: usize,
    cols: usize,
    stride: usize,
    storage: Storage<'a, T>,
}

/// A matrix that owns its storage
pub type OwnedMatrix<T> = DenseMatrix<'static, T>;

fn check_dims(rows: usize, cols: usize, stride: usize) -> Result<usize> {
    if rows == 0 || cols == 0 {
        return Err(Error::Configuration(format!(
            "Matrix dimensions must be positive, got {rows}x{cols}"
        )));
    }
    if stride < cols {
        return Err(Error::Configuration(format!(
            "Leading dimension {stride} is smaller than column count {cols}"
        )));
    }
    rows.checked_mul(stride)
        .ok_or_else(|| Error::Configuration(format!("{rows}x{stride} matrix overflows usize")))
}

impl<T: Element> DenseMatrix<'static, T> {
    /// Allocate a zeroed, page-aligned `rows x cols` matrix
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        Self::with_stride(rows, cols, cols)
    }

    /// Allocate a zeroed, page-aligned matrix with leading dimension `stride`
    pub fn with_stride(rows: usize, cols: usize, stride: usize) -> Result<Self> {
        let len = check_dims(rows, cols, stride)?;
        Ok(Self {
            rows,
            cols,
            stride,
            storage: Storage::Owned(AlignedBuffer::zeroed(len, HOST_ALIGNMENT)?),
        })
    }

    /// Allocate and copy from tightly packed row-major values
    pub fn from_row_major(rows: usize, cols: usize, values: &[T]) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(Error::shape_mismatch(
                (rows, cols),
                (values.len() / cols.max(1), cols),
                "from_row_major",
            ));
        }
        let mut matrix = Self::new(rows, cols)?;
        matrix.as_mut_slice().copy_from_slice(values);
        Ok(matrix)
    }
}

impl<'a, T: Element> DenseMatrix<'a, T> {
    /// Wrap caller-owned memory without copying
    pub fn from_slice(rows: usize, cols: usize, stride: usize, data: &'a mut [T]) -> Result<Self> {
        let len = check_dims(rows, cols, stride)?;
        if data.len() < len {
            return Err(Error::BufferTooSmall {
                required: len * std::mem::size_of::<T>(),
                available: std::mem::size_of_val(data),
            });
        }
        Ok(Self {
            rows,
            cols,
            stride,
            storage: Storage::Borrowed(&mut data[..len]),
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Leading dimension in elements
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// True if the matrix owns its allocation
    pub fn is_owned(&self) -> bool {
        !matches!(self.storage, Storage::Borrowed(_))
    }

    /// All `rows * stride` elements, padding included
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        match &self.storage {
            Storage::Owned(buffer) => buffer.as_slice(),
            Storage::Copied(data) => data,
            Storage::Borrowed(data) => data,
        }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match &mut self.storage {
            Storage::Owned(buffer) => buffer.as_mut_slice(),
            Storage::Copied(data) => data,
            Storage::Borrowed(data) => data,
        }
    }

    /// Storage bytes as transferred to the device
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    /// Element at (row, col)
    ///
    /// # Panics
    /// If `row >= rows` or `col >= stride`
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        assert!(
            row < self.rows && col < self.stride,
            "Index ({row}, {col}) out of bounds for {}x{} matrix",
            self.rows,
            self.stride
        );
        self.as_slice()[row * self.stride + col]
    }

    pub fn try_get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.rows && col < self.stride {
            Some(self.as_slice()[row * self.stride + col])
        } else {
            None
        }
    }

    /// # Panics
    /// If `row >= rows` or `col >= stride`
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        assert!(
            row < self.rows && col < self.stride,
            "Index ({row}, {col}) out of bounds for {}x{} matrix",
            self.rows,
            self.stride
        );
        let stride = self.stride;
        self.as_mut_slice()[row * stride + col] = value;
    }

    /// The `cols` logical elements of one row
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.stride;
        &self.as_slice()[start..start + self.cols]
    }

    pub fn fill_constant(&mut self, value: T) {
        self.as_mut_slice().fill(value);
    }

    /// Compare the logical `rows x cols` window against a reference
    ///
    /// Never fails on mismatching values; only on mismatching shapes.
    pub fn compare(
        &self,
        reference: &DenseMatrix<'_, T>,
        rel_tol: f64,
        abs_tol: f64,
    ) -> Result<CompareReport> {
        if self.shape() != reference.shape() {
            return Err(Error::shape_mismatch(reference.shape(), self.shape(), "compare"));
        }

        let mut report = CompareReport::default();
        for row in 0..self.rows {
            for col in 0..self.cols {
                let value = self.get(row, col).as_f64();
                let expected = reference.get(row, col).as_f64();
                let verdict = compare_values(value, expected, rel_tol, abs_tol);
                if verdict == Verdict::Mismatch && report.mismatched < 8 {
                    log::debug!("mismatch at ({row}, {col}): got {value}, expected {expected}");
                }
                report.record(row, col, value, expected, verdict);
            }
        }

        if report.passed() {
            log::debug!("compare passed: {report}");
        } else {
            log::warn!("compare failed: {report}");
        }
        Ok(report)
    }

    /// Overwrite the logical window with `f(row, col)`, row by row
    fn fill_with<F>(&mut self, f: F)
    where
        F: Fn(usize, usize) -> T + Sync + Send,
    {
        let (rows, cols, stride) = (self.rows, self.cols, self.stride);
        let data = &mut self.as_mut_slice()[..rows * stride];

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            data.par_chunks_mut(stride)
                .enumerate()
                .for_each(|(row, out)| {
                    for (col, cell) in out[..cols].iter_mut().enumerate() {
                        *cell = f(row, col);
                    }
                });
        }

        #[cfg(not(feature = "parallel"))]
        for (row, out) in data.chunks_mut(stride).enumerate() {
            for (col, cell) in out[..cols].iter_mut().enumerate() {
                *cell = f(row, col);
            }
        }
    }
}

#[inline]
fn dot<T: Quantized>(a: &DenseMatrix<'_, T>, b: &DenseMatrix<'_, T>, row: usize, col: usize) -> i64 {
    (0..a.cols).fold(0i64, |acc, k| {
        acc.wrapping_add(a.get(row, k).to_i64().wrapping_mul(b.get(k, col).to_i64()))
    })
}

impl<'a, T: Quantized> DenseMatrix<'a, T> {
    /// Fill every stored element with `min, min+1, .., max, min, ..`
    pub fn fill_range_cycling(&mut self, min: T, max: T) -> Result<()> {
        let (lo, hi) = (min.to_i64(), max.to_i64());
        if lo > hi {
            return Err(Error::Configuration(format!(
                "fill range is empty: min {lo} > max {hi}"
            )));
        }
        let mut value = lo;
        for cell in self.as_mut_slice() {
            *cell = T::wrap_from_i64(value);
            value += 1;
            if value > hi {
                value = lo;
            }
        }
        Ok(())
    }

    /// Fill every stored element with `first, (first+1) % modulus, ..`
    pub fn fill_cycling(&mut self, modulus: T, first: T) -> Result<()> {
        let modulus = modulus.to_i64();
        if modulus <= 0 {
            return Err(Error::Configuration(format!(
                "fill modulus must be positive, got {modulus}"
            )));
        }
        let mut value = first.to_i64();
        for cell in self.as_mut_slice() {
            *cell = T::wrap_from_i64(value);
            value = (value + 1) % modulus;
        }
        Ok(())
    }

    fn check_product(
        &self,
        a: &DenseMatrix<'_, T>,
        b: &DenseMatrix<'_, T>,
        context: &str,
    ) -> Result<()> {
        if a.cols != b.rows {
            return Err(Error::shape_mismatch(
                (a.cols, b.cols),
                (b.rows, b.cols),
                context,
            ));
        }
        if self.shape() != (a.rows, b.cols) {
            return Err(Error::shape_mismatch((a.rows, b.cols), self.shape(), context));
        }
        Ok(())
    }

    fn check_bias<X: Quantized>(&self, x: &DenseMatrix<'_, X>, context: &str) -> Result<()> {
        if x.shape() != self.shape() {
            return Err(Error::shape_mismatch(self.shape(), x.shape(), context));
        }
        Ok(())
    }

    /// `self = A * B`, accumulated in `i64` and truncated
    pub fn multiply(&mut self, a: &DenseMatrix<'_, T>, b: &DenseMatrix<'_, T>) -> Result<()> {
        self.check_product(a, b, "multiply")?;
        log::debug!(
            "reference multiply {}x{} * {}x{} ({})",
            a.rows,
            a.cols,
            b.rows,
            b.cols,
            T::NAME
        );
        self.fill_with(|row, col| T::wrap_from_i64(dot(a, b, row, col)));
        Ok(())
    }

    /// `self = ((A * B + X) >> scale_shift) * scale_val`
    pub fn multiply_add_scale<X: Quantized>(
        &mut self,
        a: &DenseMatrix<'_, T>,
        b: &DenseMatrix<'_, T>,
        x: &DenseMatrix<'_, X>,
        scale_val: i32,
        scale_shift: u8,
    ) -> Result<()> {
        self.check_product(a, b, "multiply_add_scale")?;
        self.check_bias(x, "multiply_add_scale")?;
        let scale = PostScale::new(scale_val, scale_shift);
        self.fill_with(|row, col| {
            let acc = dot(a, b, row, col).wrapping_add(x.get(row, col).to_i64());
            T::wrap_from_i64(scale.apply(acc))
        });
        Ok(())
    }

    /// As [`multiply_add_scale`](Self::multiply_add_scale) with packed
    /// parameters, then leaky activation on negative (narrowed) outputs
    ///
    /// `packed_scale = (scale_val << 8) | scale_shift`,
    /// `packed_leaky = (leaky_scale << 6) | leaky_shift`.
    pub fn multiply_with_scale_and_leaky_activation<X: Quantized>(
        &mut self,
        a: &DenseMatrix<'_, T>,
        b: &DenseMatrix<'_, T>,
        x: &DenseMatrix<'_, X>,
        packed_scale: i32,
        packed_leaky: i16,
    ) -> Result<()> {
        self.check_product(a, b, "multiply_with_scale_and_leaky_activation")?;
        self.check_bias(x, "multiply_with_scale_and_leaky_activation")?;
        let scale = PostScale::unpack(packed_scale);
        let leaky = LeakyRelu::unpack(packed_leaky);
        self.fill_with(|row, col| {
            let acc = dot(a, b, row, col).wrapping_add(x.get(row, col).to_i64());
            let out = T::wrap_from_i64(scale.apply(acc));
            T::wrap_from_i64(leaky.apply(out.to_i64()))
        });
        Ok(())
    }
}

impl<T: Element> Clone for DenseMatrix<'_, T> {
    /// Clones always own their storage
    fn clone(&self) -> Self {
        let storage = match &self.storage {
            Storage::Owned(buffer) => Storage::Owned(buffer.clone()),
            Storage::Copied(data) => Storage::Copied(data.clone()),
            Storage::Borrowed(data) => Storage::Copied(data.to_vec()),
        };
        Self {
            rows: self.rows,
            cols: self.cols,
            stride: self.stride,
            storage,
        }
    }
}

impl<T: Element> std::fmt::Debug for DenseMatrix<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("stride", &self.stride)
            .field("owned", &self.is_owned())
            .finish()
    }
}
