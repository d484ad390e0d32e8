//! Shared utilities for integration tests

#![allow(dead_code)]

pub use approx::assert_relative_eq;

use tilepack_core::{DenseMatrix, OwnedMatrix, Quantized};

/// Matrix filled with a cycling ramp over `[min, max]`
pub fn ramp<T: Quantized>(rows: usize, cols: usize, min: T, max: T) -> OwnedMatrix<T> {
    let mut m = DenseMatrix::new(rows, cols).unwrap();
    m.fill_range_cycling(min, max).unwrap();
    m
}

/// Schoolbook product in i64 over tightly packed row-major inputs
pub fn naive_product(a: &[i64], b: &[i64], m: usize, k: usize, n: usize) -> Vec<i64> {
    let mut c = vec![0i64; m * n];
    for i in 0..m {
        for j in 0..n {
            c[i * n + j] = (0..k).map(|p| a[i * k + p] * b[p * n + j]).sum();
        }
    }
    c
}

/// Logical elements of a matrix widened to i64, padding dropped
pub fn widen<T: Quantized>(m: &DenseMatrix<'_, T>) -> Vec<i64> {
    (0..m.rows())
        .flat_map(|r| m.row(r).iter().map(|&v| Quantized::to_i64(v)).collect::<Vec<_>>())
        .collect()
}
