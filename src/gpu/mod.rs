// gpu/mod.rs — Device offload of the GEMM kernel.
//
// The CPU implementation in `crate::gemm` remains the authoritative
// reference; every GPU result is validated against it.
//
// Stages, in dependency order:
//
//   device    acquire an adapter of the requested kind, open device + queue
//   program   compile WGSL at runtime, verify the build, resolve entry points
//   dispatch  buffers, staging, argument binding, launch geometry, launch,
//             queue drain, readback
//   runner    `GpuGemm`, the three stages composed with scoped teardown

pub mod device;
pub mod dispatch;
pub mod program;
pub mod runner;

pub use device::{acquire_device, open_queue, DeviceKind, GpuSession};
pub use dispatch::{DispatchPipeline, DispatchTimings, LaunchGeometry};
pub use program::{GemmKernel, KernelProgram, GEMM_ENTRY_POINT};
pub use runner::GpuGemm;
