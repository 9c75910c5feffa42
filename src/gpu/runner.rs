// gpu/runner.rs — End-to-end GEMM on one device.
//
// Composes the three stages in dependency order:
//
//   GpuSession (device + queue)
//     └─ KernelProgram (compiled WGSL)
//          └─ GemmKernel (entry point) → DispatchPipeline (per-run buffers)
//
// Teardown is the reverse, by field drop order: the pipeline (and the
// kernel it owns) drops first, then the program, then the session. A failure
// at any stage of `new` drops whatever was built so far in the same order.

use crate::config::GemmConfig;
use crate::error::GemmError;
use crate::gpu::device::{DeviceKind, GpuSession};
use crate::gpu::dispatch::{DispatchPipeline, DispatchTimings, LaunchGeometry};
use crate::gpu::program::{render_gemm_source, KernelProgram, GEMM_ENTRY_POINT};
use crate::matrix::Matrix;

/// A device session with the GEMM kernel built and ready to launch.
///
/// # Field drop order
/// Fields drop top to bottom, so device-side objects are released before
/// the session that owns the device.
pub struct GpuGemm {
    pipeline: DispatchPipeline,
    program: KernelProgram,
    session: GpuSession,
}

impl GpuGemm {
    /// Acquire a device of `kind`, build the kernel for `config`'s work-group
    /// edge and prepare the dispatch pipeline.
    pub fn new(kind: DeviceKind, config: GemmConfig) -> Result<Self, GemmError> {
        Self::with_session(GpuSession::new(kind)?, config)
    }

    /// Build on an already opened session.
    pub fn with_session(session: GpuSession, config: GemmConfig) -> Result<Self, GemmError> {
        log::info!("{session}");
        // Reject shapes the device cannot launch before spending a compile.
        LaunchGeometry::for_config(&config, &session.limits)?;

        let source = render_gemm_source(config.workgroup_edge());
        let program = KernelProgram::compile(&session, &source)?;
        if !program.build_log().is_empty() {
            log::info!("kernel build log:\n{}", program.build_log());
        }
        let kernel = program.get_entry_point(&session, GEMM_ENTRY_POINT)?;
        let pipeline = DispatchPipeline::new(&session, kernel, config)?;

        Ok(GpuGemm { pipeline, program, session })
    }

    /// C = A×B on the device.
    ///
    /// # Errors
    /// `InvalidDimensions` if A is not M×K or B is not K×N, otherwise any
    /// dispatch-stage error. No partial C is returned.
    pub fn multiply(&mut self, a: &Matrix, b: &Matrix) -> Result<Matrix, GemmError> {
        self.multiply_timed(a, b).map(|(c, _)| c)
    }

    /// [`multiply`](Self::multiply) plus the time spent in each phase.
    pub fn multiply_timed(&mut self, a: &Matrix, b: &Matrix) -> Result<(Matrix, DispatchTimings), GemmError> {
        self.pipeline.run(&self.session, a, b)
    }

    pub fn config(&self) -> &GemmConfig {
        self.pipeline.config()
    }

    pub fn geometry(&self) -> &LaunchGeometry {
        self.pipeline.geometry()
    }

    pub fn program(&self) -> &KernelProgram {
        &self.program
    }

    pub fn session(&self) -> &GpuSession {
        &self.session
    }
}
