// gpu-gemm: naive single-precision GEMM offloaded to a wgpu compute device.
//
// C = A×B for column-major f32 matrices. The kernel is compiled from WGSL
// source at runtime and launched as a 2-D grid with one work unit per
// element of C. The CPU reference in `gemm` is the ground truth the device
// result is checked against.

pub mod config;
pub mod error;
pub mod gemm;
pub mod gpu;
pub mod matrix;

pub use config::GemmConfig;
pub use error::GemmError;
pub use gpu::{DeviceKind, GpuGemm};
pub use matrix::Matrix;
