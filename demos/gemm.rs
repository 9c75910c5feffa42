// demos/gemm.rs — Run one GEMM on the GPU and check it against the CPU.
//
// Multiplies the benchmark's seeded inputs (A: 3.6·i + i² + 3.1,
// B: 1.2·i + 0.01·i² + 13.9), prints per-phase timings and GFLOP/s, and the
// worst relative error against the CPU reference.
//
// USAGE
//   cargo run --release --example gemm
//   GEMM_M=256 GEMM_N=256 GEMM_K=512 GEMM_WG_EDGE=16 cargo run --example gemm
//
// Exits 0 on success; on failure prints the failing stage (and, for a
// kernel build failure, the compiler diagnostic) and exits 1.

use std::process::ExitCode;
use std::time::Instant;

use gpu_gemm::gemm::{gemm_reference, max_relative_error};
use gpu_gemm::{DeviceKind, GemmConfig, GemmError, GpuGemm, Matrix};

const TOLERANCE: f32 = 1e-4;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gemm failed {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), GemmError> {
    let config = GemmConfig::from_env()?;
    let (m, n, k) = (config.m() as usize, config.n() as usize, config.k() as usize);
    println!(
        "C = A×B with M={m}, N={n}, K={k}, work-group {0}×{0}",
        config.workgroup_edge()
    );

    let a = Matrix::pattern_a(m, k);
    let b = Matrix::pattern_b(k, n);

    println!("Initialising GPU...");
    let mut gpu = GpuGemm::new(DeviceKind::Gpu, config)?;
    println!("GPU: {}", gpu.session().adapter_info);
    println!("Grid: {:?} work-groups", gpu.geometry().workgroups);

    let (c, t) = gpu.multiply_timed(&a, &b)?;
    let gflops = config.flops() as f64 / t.kernel.as_secs_f64() / 1e9;
    println!(
        "  staging {:.3} ms | kernel {:.3} ms ({gflops:.1} GFLOP/s) | readback {:.3} ms",
        t.staging.as_secs_f64() * 1000.0,
        t.kernel.as_secs_f64() * 1000.0,
        t.readback.as_secs_f64() * 1000.0,
    );

    let t0 = Instant::now();
    let want = gemm_reference(&a, &b);
    println!("  CPU reference {:.3} ms", t0.elapsed().as_secs_f64() * 1000.0);

    let err = max_relative_error(&c, &want);
    println!("  max relative error {err:.2e}");
    if err >= TOLERANCE {
        println!("  WARNING: error exceeds {TOLERANCE:.0e}");
    }
    Ok(())
}
