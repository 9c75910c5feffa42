// gpu/dispatch.rs — Dispatch pipeline: buffers in, kernel, buffer out.
//
// One call to `DispatchPipeline::run` is one kernel execution:
//
//   1. allocate   A (M×K, read-only), B (K×N, read-only), C (M×N, read-write)
//   2. stage      write A, B and C's zero state, submit, wait
//   3. bind       dims, A, B, C → bindings 0..3
//   4. geometry   (M/edge) × (N/edge) work-groups of edge × edge
//   5. launch     one compute pass, submit, drain the whole queue
//   6. read back  copy C to a MAP_READ buffer, map, wait, copy to host
//
// Every step blocks until the device has finished it, so the queue never
// holds more than one step's work and no buffer is read before its write has
// landed. The buffers are locals of `run`: whichever step fails, they are
// dropped (and released) on the way out. Only a run that completes all six
// steps produces a host matrix.
//
// WHY C IS STAGED
// ───────────────
// The kernel writes every element of C exactly once (grid = (M, N), no
// guard, divisibility enforced by `LaunchGeometry`), so C's initial contents
// never reach the result. The zero state is still uploaded so the device
// mirror starts from the same state as the host matrix.

use std::time::{Duration, Instant};

use crate::config::GemmConfig;
use crate::error::GemmError;
use crate::gpu::device::GpuSession;
use crate::gpu::program::{GemmKernel, BINDING_A, BINDING_B, BINDING_C, BINDING_DIMS};
use crate::matrix::Matrix;

// ---------------------------------------------------------------------------
// Uniform params (must match WGSL struct Dims exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
struct GemmDims {
    m: u32,
    n: u32,
    k: u32,
    pad: u32,
}

// ---------------------------------------------------------------------------
// Device buffers
// ---------------------------------------------------------------------------

/// Access intent of a device buffer, as seen by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    ReadOnly,
    ReadWrite,
}

/// Device-resident mirror of one host matrix.
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    access: BufferAccess,
    elements: usize,
}

impl DeviceBuffer {
    /// Allocate a buffer for `elements` f32 values.
    ///
    /// # Errors
    /// `AllocationFailed` if the size exceeds the device's buffer or
    /// storage-binding limits, or the device runs out of memory.
    pub fn allocate(
        session: &GpuSession,
        label: &'static str,
        elements: usize,
        access: BufferAccess,
    ) -> Result<Self, GemmError> {
        let bytes = (elements * std::mem::size_of::<f32>()) as u64;
        check_buffer_size(&session.limits, label, bytes)?;

        let usage = match access {
            BufferAccess::ReadOnly => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferAccess::ReadWrite => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC
            }
        };
        let (buffer, scope_error) = session.scoped(|| {
            session.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage,
                mapped_at_creation: false,
            })
        });
        if let Some(e) = scope_error {
            return Err(GemmError::AllocationFailed { label, bytes, reason: e.to_string() });
        }
        Ok(DeviceBuffer { buffer, access, elements })
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    /// Size in bytes; always `elements * 4`.
    pub fn byte_len(&self) -> u64 {
        self.buffer.size()
    }
}

fn check_buffer_size(limits: &wgpu::Limits, label: &'static str, bytes: u64) -> Result<(), GemmError> {
    let max = limits.max_buffer_size.min(limits.max_storage_buffer_binding_size as u64);
    if bytes > max {
        return Err(GemmError::AllocationFailed {
            label,
            bytes,
            reason: format!("exceeds the device limit of {max} bytes per storage buffer"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Launch geometry
// ---------------------------------------------------------------------------

/// A 2-D grid of `global[0] × global[1]` work units in work-groups of
/// `local[0] × local[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub global: [u32; 2],
    pub local: [u32; 2],
    pub workgroups: [u32; 2],
}

impl LaunchGeometry {
    /// Grid for an M×N output with square `edge × edge` work-groups.
    ///
    /// # Errors
    /// `InvalidLaunchGeometry` if M or N is not a multiple of the edge, or
    /// the work-group or grid exceeds the device limits.
    pub fn new(m: u32, n: u32, edge: u32, limits: &wgpu::Limits) -> Result<Self, GemmError> {
        if edge == 0 {
            return Err(GemmError::InvalidLaunchGeometry("work-group edge must be positive".into()));
        }
        if m == 0 || n == 0 {
            return Err(GemmError::InvalidLaunchGeometry(format!("empty grid {m}×{n}")));
        }
        if m % edge != 0 || n % edge != 0 {
            return Err(GemmError::InvalidLaunchGeometry(format!(
                "grid {m}×{n} is not a multiple of the {edge}×{edge} work-group"
            )));
        }
        let invocations = edge as u64 * edge as u64;
        if invocations > limits.max_compute_invocations_per_workgroup as u64 {
            return Err(GemmError::InvalidLaunchGeometry(format!(
                "{edge}×{edge} work-group has {invocations} invocations, device allows {}",
                limits.max_compute_invocations_per_workgroup
            )));
        }
        if edge > limits.max_compute_workgroup_size_x || edge > limits.max_compute_workgroup_size_y {
            return Err(GemmError::InvalidLaunchGeometry(format!(
                "work-group edge {edge} exceeds the device's {}×{} maximum",
                limits.max_compute_workgroup_size_x, limits.max_compute_workgroup_size_y
            )));
        }
        let workgroups = [m / edge, n / edge];
        let max_groups = limits.max_compute_workgroups_per_dimension;
        if workgroups.iter().any(|&g| g > max_groups) {
            return Err(GemmError::InvalidLaunchGeometry(format!(
                "{}×{} work-groups exceed the device's {max_groups} per dimension",
                workgroups[0], workgroups[1]
            )));
        }
        Ok(LaunchGeometry { global: [m, n], local: [edge, edge], workgroups })
    }

    /// Grid for the output of `config`.
    pub fn for_config(config: &GemmConfig, limits: &wgpu::Limits) -> Result<Self, GemmError> {
        Self::new(config.m(), config.n(), config.workgroup_edge(), limits)
    }

    /// Every (idx, idy) the grid visits, in work-group order then local
    /// order: `global_id = group_id * local + local_id`.
    pub fn work_units(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let [gx, gy] = self.workgroups;
        let [lx, ly] = self.local;
        (0..gy).flat_map(move |wy| {
            (0..gx).flat_map(move |wx| {
                (0..ly).flat_map(move |y| (0..lx).map(move |x| (wx * lx + x, wy * ly + y)))
            })
        })
    }

    /// Total number of work units (M·N).
    pub fn len(&self) -> u64 {
        self.global[0] as u64 * self.global[1] as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// DispatchPipeline
// ---------------------------------------------------------------------------

/// Wall-clock time spent in each blocking phase of one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchTimings {
    pub staging: Duration,
    pub kernel: Duration,
    pub readback: Duration,
}

impl DispatchTimings {
    pub fn total(&self) -> Duration {
        self.staging + self.kernel + self.readback
    }
}

/// Runs the GEMM kernel for one fixed problem size.
///
/// Create once; call [`run`](Self::run) for each multiply. Launches are
/// strictly sequential: `run` takes `&mut self` and returns only after the
/// queue has drained and C has been read back.
pub struct DispatchPipeline {
    kernel: GemmKernel,
    config: GemmConfig,
    geometry: LaunchGeometry,
}

impl DispatchPipeline {
    /// # Errors
    /// `InvalidLaunchGeometry` if the config's grid does not fit the device,
    /// or the kernel was compiled for a different work-group shape.
    pub fn new(session: &GpuSession, kernel: GemmKernel, config: GemmConfig) -> Result<Self, GemmError> {
        let geometry = LaunchGeometry::for_config(&config, &session.limits)?;
        let [lx, ly] = geometry.local;
        if kernel.workgroup_size() != [lx, ly, 1] {
            return Err(GemmError::InvalidLaunchGeometry(format!(
                "kernel `{}` is compiled for work-group {:?}, launch needs [{lx}, {ly}, 1]",
                kernel.name(),
                kernel.workgroup_size()
            )));
        }
        log::debug!(
            "launch geometry: global {:?}, local {:?}, {:?} work-groups",
            geometry.global,
            geometry.local,
            geometry.workgroups
        );
        Ok(DispatchPipeline { kernel, config, geometry })
    }

    pub fn geometry(&self) -> &LaunchGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    /// Compute C = A×B on the device.
    pub fn run(
        &mut self,
        session: &GpuSession,
        a: &Matrix,
        b: &Matrix,
    ) -> Result<(Matrix, DispatchTimings), GemmError> {
        self.config.check_operands(a, b)?;
        let (m, n) = (self.config.m() as usize, self.config.n() as usize);
        let c_host = Matrix::zeros(m, n);
        let mut timings = DispatchTimings::default();

        // 1. Allocate.
        let buf_a = DeviceBuffer::allocate(session, "gemm A", a.len(), BufferAccess::ReadOnly)?;
        let buf_b = DeviceBuffer::allocate(session, "gemm B", b.len(), BufferAccess::ReadOnly)?;
        let buf_c = DeviceBuffer::allocate(session, "gemm C", c_host.len(), BufferAccess::ReadWrite)?;
        let dims_buf = self.allocate_dims(session)?;
        debug_assert_eq!(buf_a.byte_len(), a.byte_len());
        debug_assert_eq!(buf_b.byte_len(), b.byte_len());
        debug_assert_eq!(buf_c.byte_len(), c_host.byte_len());

        // 2. Stage.
        let t0 = Instant::now();
        stage(session, &[(&buf_a, a), (&buf_b, b), (&buf_c, &c_host)])?;
        timings.staging = t0.elapsed();

        // 3. Bind.
        let bind_group = self.bind(session, &dims_buf, &buf_a, &buf_b, &buf_c)?;

        // 4 + 5. Launch on the precomputed geometry and drain the queue.
        let t1 = Instant::now();
        self.launch(session, &bind_group)?;
        timings.kernel = t1.elapsed();

        // 6. Read back.
        let t2 = Instant::now();
        let c = read_back(session, &buf_c, m, n)?;
        timings.readback = t2.elapsed();

        log::debug!(
            "gemm {}×{}×{}: staging {:?}, kernel {:?}, readback {:?}",
            self.config.m(),
            self.config.n(),
            self.config.k(),
            timings.staging,
            timings.kernel,
            timings.readback
        );
        Ok((c, timings))
    }

    fn allocate_dims(&self, session: &GpuSession) -> Result<wgpu::Buffer, GemmError> {
        let dims = GemmDims {
            m: self.config.m(),
            n: self.config.n(),
            k: self.config.k(),
            pad: 0,
        };
        let bytes = std::mem::size_of::<GemmDims>() as u64;
        let (buffer, scope_error) = session.scoped(|| {
            let buffer = session.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("gemm dims"),
                size: bytes,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            session.queue.write_buffer(&buffer, 0, bytemuck::bytes_of(&dims));
            buffer
        });
        if let Some(e) = scope_error {
            return Err(GemmError::AllocationFailed { label: "gemm dims", bytes, reason: e.to_string() });
        }
        Ok(buffer)
    }

    fn bind(
        &self,
        session: &GpuSession,
        dims: &wgpu::Buffer,
        a: &DeviceBuffer,
        b: &DeviceBuffer,
        c: &DeviceBuffer,
    ) -> Result<wgpu::BindGroup, GemmError> {
        let (bind_group, scope_error) = session.scoped(|| {
            session.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("gemm BG"),
                layout: &self.kernel.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: BINDING_DIMS, resource: dims.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: BINDING_A, resource: a.buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: BINDING_B, resource: b.buffer.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: BINDING_C, resource: c.buffer.as_entire_binding() },
                ],
            })
        });
        match scope_error {
            Some(e) => Err(GemmError::KernelLaunchFailed(format!("argument binding rejected: {e}"))),
            None => Ok(bind_group),
        }
    }

    fn launch(&mut self, session: &GpuSession, bind_group: &wgpu::BindGroup) -> Result<(), GemmError> {
        let [wg_x, wg_y] = self.geometry.workgroups;
        let ((), scope_error) = session.scoped(|| {
            let mut encoder = session.device.create_command_encoder(
                &wgpu::CommandEncoderDescriptor { label: Some("gemm dispatch") },
            );
            {
                let mut pass = encoder.begin_compute_pass(
                    &wgpu::ComputePassDescriptor { label: Some("gemm"), timestamp_writes: None },
                );
                pass.set_pipeline(&self.kernel.pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.dispatch_workgroups(wg_x, wg_y, 1);
            }
            session.queue.submit(std::iter::once(encoder.finish()));
        });
        if let Some(e) = scope_error {
            return Err(GemmError::KernelLaunchFailed(e.to_string()));
        }

        session.wait_idle();
        if let Some(reason) = session.device_lost() {
            return Err(GemmError::KernelExecutionFailed(reason));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Blocking host → device copy of each `(buffer, matrix)` pair.
fn stage(session: &GpuSession, pairs: &[(&DeviceBuffer, &Matrix)]) -> Result<(), GemmError> {
    for &(buf, host) in pairs {
        if buf.byte_len() != host.byte_len() {
            return Err(GemmError::InvalidDimensions(format!(
                "{host:?} does not fit a {} byte device buffer",
                buf.byte_len()
            )));
        }
    }
    let ((), scope_error) = session.scoped(|| {
        for &(buf, host) in pairs {
            session.queue.write_buffer(&buf.buffer, 0, bytemuck::cast_slice(host.as_slice()));
        }
        session.queue.submit(std::iter::empty());
    });
    if let Some(e) = scope_error {
        return Err(GemmError::AllocationFailed {
            label: "staging",
            bytes: pairs.iter().map(|(buf, _)| buf.byte_len()).sum(),
            reason: e.to_string(),
        });
    }
    session.wait_idle();
    Ok(())
}

/// Blocking device → host copy of C.
fn read_back(session: &GpuSession, src: &DeviceBuffer, rows: usize, cols: usize) -> Result<Matrix, GemmError> {
    let size = src.byte_len();
    let (readback, scope_error) = session.scoped(|| {
        let readback = session.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gemm readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = session.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("gemm readback") },
        );
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &readback, 0, size);
        session.queue.submit(std::iter::once(encoder.finish()));
        readback
    });
    if let Some(e) = scope_error {
        return Err(GemmError::ReadbackFailed(e.to_string()));
    }

    // Map the buffer; this is async in wgpu's API but we block here via
    // device.poll(Wait) after requesting the map.
    let slice = readback.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    session.wait_idle();
    rx.recv()
        .map_err(|_| GemmError::ReadbackFailed("map callback never fired".into()))?
        .map_err(|e| GemmError::ReadbackFailed(e.to_string()))?;
    if let Some(reason) = session.device_lost() {
        return Err(GemmError::KernelExecutionFailed(reason));
    }

    let data: Vec<f32> = {
        let mapped = slice.get_mapped_range();
        let floats: &[f32] = bytemuck::cast_slice(&mapped);
        floats.to_vec()
    };
    readback.unmap();
    Matrix::from_vec(rows, cols, data)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn limits() -> wgpu::Limits {
        // Desktop-class limits: 1024 invocations, 1024 per dimension.
        wgpu::Limits {
            max_compute_invocations_per_workgroup: 1024,
            max_compute_workgroup_size_x: 1024,
            max_compute_workgroup_size_y: 1024,
            ..wgpu::Limits::default()
        }
    }

    #[test]
    fn test_dims_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<GemmDims>(), 16);
        let dims = GemmDims { m: 1, n: 2, k: 3, pad: 0 };
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&dims));
        assert_eq!(words, &[1, 2, 3, 0]);
    }

    #[test]
    fn test_geometry_128_with_32_edge() {
        let g = LaunchGeometry::new(128, 128, 32, &limits()).unwrap();
        assert_eq!(g.global, [128, 128]);
        assert_eq!(g.local, [32, 32]);
        assert_eq!(g.workgroups, [4, 4]);
        assert_eq!(g.len(), 128 * 128);
    }

    #[test]
    fn test_geometry_single_workgroup() {
        let g = LaunchGeometry::new(32, 32, 32, &limits()).unwrap();
        assert_eq!(g.workgroups, [1, 1]);
    }

    #[test]
    fn test_geometry_rejects_non_multiple() {
        let err = LaunchGeometry::new(100, 128, 32, &limits()).unwrap_err();
        assert!(matches!(err, GemmError::InvalidLaunchGeometry(_)));
        assert!(LaunchGeometry::new(128, 33, 32, &limits()).is_err());
    }

    #[test]
    fn test_geometry_rejects_oversized_workgroup() {
        // wgpu's portable defaults allow 256 invocations: 32×32 does not fit.
        let err = LaunchGeometry::new(128, 128, 32, &wgpu::Limits::default()).unwrap_err();
        assert!(err.to_string().contains("1024 invocations"));
        assert!(LaunchGeometry::new(128, 128, 16, &wgpu::Limits::default()).is_ok());
    }

    #[test]
    fn test_geometry_rejects_too_many_workgroups() {
        let tight = wgpu::Limits { max_compute_workgroups_per_dimension: 2, ..limits() };
        assert!(LaunchGeometry::new(128, 64, 32, &tight).is_err());
        assert!(LaunchGeometry::new(64, 64, 32, &tight).is_ok());
    }

    #[test]
    fn test_work_units_cover_output_exactly_once() {
        for (m, n, edge) in [(128, 128, 32), (32, 32, 32), (64, 96, 32), (4, 4, 2)] {
            let g = LaunchGeometry::new(m, n, edge, &limits()).unwrap();
            let units: Vec<(u32, u32)> = g.work_units().collect();
            let unique: HashSet<(u32, u32)> = units.iter().copied().collect();
            assert_eq!(units.len() as u64, g.len(), "{m}×{n}: wrong count");
            assert_eq!(unique.len(), units.len(), "{m}×{n}: duplicate work units");
            for x in 0..m {
                for y in 0..n {
                    assert!(unique.contains(&(x, y)), "{m}×{n}: ({x}, {y}) missed");
                }
            }
        }
    }

    #[test]
    fn test_buffer_size_limit() {
        let small = wgpu::Limits { max_storage_buffer_binding_size: 1024, ..limits() };
        assert!(check_buffer_size(&small, "A", 1024).is_ok());
        let err = check_buffer_size(&small, "A", 1028).unwrap_err();
        assert!(matches!(err, GemmError::AllocationFailed { label: "A", bytes: 1028, .. }));
    }
}
