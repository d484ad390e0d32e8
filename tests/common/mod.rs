//! Shared utilities for end-to-end tests

#![allow(dead_code)]

pub use approx::assert_relative_eq;

use std::mem::size_of;
use tilepack::isa::GemmOp;
use tilepack::prelude::*;
use tracing_subscriber::EnvFilter;

pub const PAGE: usize = 4096;

/// Install a test subscriber once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn read<T: bytemuck::Pod>(memory: &[u8], at: usize, count: usize) -> Vec<T> {
    bytemuck::pod_collect_to_vec(&memory[at..at + count * size_of::<T>()])
}

fn write<T: bytemuck::Pod>(memory: &mut [u8], at: usize, values: &[T]) {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    memory[at..at + bytes.len()].copy_from_slice(bytes);
}

fn run_gemm(op: &GemmOp, leaky: Option<LeakyRelu>, memory: &mut [u8], page: usize) -> Result<()> {
    let (m, k, n) = (op.shape.m as usize, op.shape.k as usize, op.shape.n as usize);
    let a = DenseMatrix::<i16>::from_row_major(m, k, &read(memory, op.a.byte_offset(page), m * k))?;
    let b = DenseMatrix::<i16>::from_row_major(k, n, &read(memory, op.b.byte_offset(page), k * n))?;
    let x = if op.x.get() == 0 {
        DenseMatrix::<i32>::new(m, n)?
    } else {
        DenseMatrix::<i32>::from_row_major(m, n, &read(memory, op.x.byte_offset(page), m * n))?
    };

    let mut c = DenseMatrix::<i16>::new(m, n)?;
    match leaky {
        None => c.multiply_add_scale(&a, &b, &x, op.post_scale.value, op.post_scale.shift)?,
        Some(leaky) => c.multiply_with_scale_and_leaky_activation(
            &a,
            &b,
            &x,
            op.post_scale.pack()?,
            leaky.pack()?,
        )?,
    }
    write(memory, op.c.byte_offset(page), c.as_slice());
    Ok(())
}

/// Host emulation of the dense and sparse instructions on `i16`/`f32` data
pub fn emulator(config: HardwareConfig) -> MemoryDevice {
    MemoryDevice::new(0x8000_0000, PAGE, 4096 * PAGE).with_kernel(move |instr, memory, page| {
        match instr {
            Instruction::Gemm(op) => run_gemm(op, None, memory, page),
            Instruction::Fcn(op) => run_gemm(&op.gemm, Some(op.leaky), memory, page),
            Instruction::Spmv(op) => {
                let (m, k) = (op.m as usize, op.k as usize);
                let layout = SingleStageLayout::<f32>::from_bytes(
                    &memory[op.a.byte_offset(page)..],
                    m,
                    k,
                    &config,
                )?;
                let x: Vec<f32> = read(memory, op.b.byte_offset(page), k);
                let mut y = vec![0f32; m];
                for t in layout.decode()?.iter() {
                    y[t.row as usize] += t.value as f32 * x[t.col as usize];
                }
                write(memory, op.c.byte_offset(page), &y);
                Ok(())
            }
            other => Err(Error::Device(format!("{:?} is not emulated", other.opcode()))),
        }
    })
}
