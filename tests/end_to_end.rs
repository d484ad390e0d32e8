//! Full pipeline: layout, registration, instruction encoding and emulated execution

mod common;

use common::{emulator, init_tracing};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tilepack::prelude::*;

fn ramp(rows: usize, cols: usize, min: i16, max: i16) -> OwnedMatrix<i16> {
    let mut m = DenseMatrix::new(rows, cols).unwrap();
    m.fill_range_cycling(min, max).unwrap();
    m
}

#[test]
fn test_two_by_two_gemm_on_device() -> anyhow::Result<()> {
    init_tracing();
    let a = DenseMatrix::<i16>::from_row_major(2, 2, &[1, 2, 3, 4])?;
    let b = DenseMatrix::<i16>::from_row_major(2, 2, &[5, 6, 7, 8])?;

    let mut ctx = ExecutionContext::new(emulator(HardwareConfig::default()))?;
    ctx.register("A", a.as_bytes())?;
    ctx.register("B", b.as_bytes())?;
    ctx.register("C", &[0u8; 8])?;
    ctx.add_gemm("A", "B", "C", None, GemmShape::new(2, 2, 2), PostScale::IDENTITY)?;
    ctx.execute(true)?;

    let mut c = [0i16; 4];
    ctx.read_back_into("C", &mut c)?;
    assert_eq!(c, [19, 22, 43, 50]);
    Ok(())
}

#[test]
fn test_fcn_matches_reference() -> anyhow::Result<()> {
    init_tracing();
    let (m, k, n) = (48, 32, 40);
    let a = ramp(m, k, -20, 20);
    let b = ramp(k, n, -7, 9);
    let mut x = DenseMatrix::<i32>::new(m, n)?;
    x.fill_cycling(31, -5)?;
    let scale = PostScale::new(3, 2);
    let leaky = LeakyRelu::new(2, 1);

    let mut reference = DenseMatrix::<i16>::new(m, n)?;
    reference.multiply_with_scale_and_leaky_activation(&a, &b, &x, scale.pack()?, leaky.pack()?)?;

    let mut ctx = ExecutionContext::new(emulator(HardwareConfig::default()))?;
    ctx.register("A", a.as_bytes())?;
    ctx.register("B", b.as_bytes())?;
    ctx.register("X", x.as_bytes())?;
    ctx.register("C", &vec![0u8; m * n * 2])?;
    ctx.add_fcn("A", "B", "C", Some("X"), GemmShape::new(m as u32, k as u32, n as u32), scale, leaky)?;
    ctx.execute(true)?;

    let mut out = vec![0i16; m * n];
    ctx.read_back_into("C", &mut out)?;
    let device_c = DenseMatrix::from_row_major(m, n, &out)?;
    let report = device_c.compare(&reference, 0.0, 0.0)?;
    assert!(report.passed(), "{report}");
    assert_eq!(report.exact, m * n);
    Ok(())
}

#[test]
fn test_chained_gemms_in_one_program() -> anyhow::Result<()> {
    let a = ramp(16, 16, -3, 3);
    let b = ramp(16, 16, 0, 4);

    let mut ctx = ExecutionContext::new(emulator(HardwareConfig::default()))?;
    ctx.register("A", a.as_bytes())?;
    ctx.register("B", b.as_bytes())?;
    ctx.register("T", &[0u8; 16 * 16 * 2])?;
    ctx.register("C", &[0u8; 16 * 16 * 2])?;
    let shape = GemmShape::new(16, 16, 16);
    ctx.add_gemm("A", "B", "T", None, shape, PostScale::IDENTITY)?;
    ctx.add_gemm("T", "B", "C", None, shape, PostScale::new(1, 4))?;
    ctx.execute(true)?;

    let mut t = DenseMatrix::<i16>::new(16, 16)?;
    t.multiply(&a, &b)?;
    let zero = DenseMatrix::<i32>::new(16, 16)?;
    let mut expected = DenseMatrix::<i16>::new(16, 16)?;
    expected.multiply_add_scale(&t, &b, &zero, 1, 4)?;

    let mut out = vec![0i16; 256];
    ctx.read_back_into("C", &mut out)?;
    assert_eq!(out.as_slice(), expected.as_slice());
    Ok(())
}

#[test]
fn test_spmv_through_layout() -> anyhow::Result<()> {
    init_tracing();
    let config = HardwareConfig::default()
        .with_tile_capacity(128, 128)
        .with_alignment_width(8)
        .with_interleave(16, 4);
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let (m, k) = (300, 200);
    let triplets = TripletSet::random(m, k, 900, &mut rng)?;
    let x: Vec<f32> = (0..k).map(|_| rng.gen_range(-5i32..=5) as f32).collect();

    let mut expected = vec![0f32; m];
    for t in &triplets {
        expected[t.row as usize] += t.value as f32 * x[t.col as usize];
    }

    let layout = SingleStageLayout::<f32>::from_triplets(&triplets, &config)?;
    let mut ctx = ExecutionContext::new(emulator(config))?;
    ctx.register("A", layout.as_bytes())?;
    ctx.register("x", bytemuck::cast_slice(&x))?;
    ctx.register("y", &vec![0u8; m * 4])?;
    ctx.add_spmv("A", "x", "y", &layout, false)?;
    ctx.execute(true)?;

    let mut y = vec![0f32; m];
    ctx.read_back_into("y", &mut y)?;
    assert_eq!(y, expected);
    Ok(())
}

#[test]
fn test_missing_operand_blocks_program() {
    let mut ctx = ExecutionContext::new(emulator(HardwareConfig::default())).unwrap();
    ctx.register("A", &[0u8; 8]).unwrap();
    let err = ctx
        .add_fcn(
            "A",
            "A",
            "C",
            None,
            GemmShape::new(2, 2, 2),
            PostScale::IDENTITY,
            LeakyRelu::IDENTITY,
        )
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(ctx.instructions().is_empty());
}

#[test]
fn test_async_launch_then_wait() -> anyhow::Result<()> {
    let mut ctx = ExecutionContext::new(emulator(HardwareConfig::default()))?;
    ctx.register("A", &[1u8; 2])?;
    ctx.register("C", &[0u8; 2])?;
    ctx.add_gemm("A", "A", "C", None, GemmShape::new(1, 1, 1), PostScale::IDENTITY)?;
    ctx.execute(false)?;
    assert_eq!(ctx.device().pending(), 1);
    ctx.device_mut().wait()?;
    assert_eq!(ctx.device().pending(), 0);
    Ok(())
}
