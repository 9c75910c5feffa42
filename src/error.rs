// error.rs — Error taxonomy for the GEMM offload pipeline.
//
// Every device-runtime call site maps to exactly one variant. Nothing here is
// recoverable inside the crate: the pipeline stops at the first failure and
// every handle acquired so far is released by Drop on the way out.

use std::fmt;

/// Errors from device acquisition, kernel compilation and dispatch.
#[derive(Debug)]
pub enum GemmError {
    /// No platform, no adapter, or no adapter of the requested kind.
    DeviceUnavailable { requested: String, seen: Vec<String> },
    /// The runtime refused to create the device/queue pair.
    QueueCreationFailed(wgpu::RequestDeviceError),
    /// Kernel source did not compile. `log` holds the compiler diagnostic.
    BuildFailed { log: String },
    /// The compiled program has no compute entry point with this name.
    EntryPointNotFound { name: String, available: Vec<String> },
    /// A device buffer could not be created.
    AllocationFailed { label: &'static str, bytes: u64, reason: String },
    /// The launch grid cannot be expressed with the requested work-group.
    InvalidLaunchGeometry(String),
    /// Submission of the kernel was rejected by the runtime.
    KernelLaunchFailed(String),
    /// The device faulted (or was lost) while executing the kernel.
    KernelExecutionFailed(String),
    /// Copying C back to host memory failed.
    ReadbackFailed(String),
    /// Non-positive or mutually inconsistent matrix dimensions.
    InvalidDimensions(String),
    /// A configuration input could not be parsed.
    InvalidConfig { key: &'static str, value: String },
}

impl GemmError {
    /// Short name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            GemmError::DeviceUnavailable { .. } => "device acquisition",
            GemmError::QueueCreationFailed(_) => "queue creation",
            GemmError::BuildFailed { .. } => "kernel build",
            GemmError::EntryPointNotFound { .. } => "entry point lookup",
            GemmError::AllocationFailed { .. } => "buffer allocation",
            GemmError::InvalidLaunchGeometry(_) => "launch geometry",
            GemmError::KernelLaunchFailed(_) => "kernel launch",
            GemmError::KernelExecutionFailed(_) => "kernel execution",
            GemmError::ReadbackFailed(_) => "readback",
            GemmError::InvalidDimensions(_) => "dimension check",
            GemmError::InvalidConfig { .. } => "configuration",
        }
    }
}

impl fmt::Display for GemmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.stage())?;
        match self {
            GemmError::DeviceUnavailable { requested, seen } if seen.is_empty() => write!(
                f,
                "no {requested} device available: no adapters were enumerated"
            ),
            GemmError::DeviceUnavailable { requested, seen } => write!(
                f,
                "no {requested} device available (adapters seen: {})",
                seen.join(", ")
            ),
            GemmError::QueueCreationFailed(e) => write!(f, "device request failed: {e}"),
            GemmError::BuildFailed { log } => write!(f, "kernel build failed:\n{log}"),
            GemmError::EntryPointNotFound { name, available } => write!(
                f,
                "entry point `{name}` not found (compute entry points: [{}])",
                available.join(", ")
            ),
            GemmError::AllocationFailed { label, bytes, reason } => {
                write!(f, "could not allocate {label} ({bytes} bytes): {reason}")
            }
            GemmError::InvalidLaunchGeometry(msg) => write!(f, "{msg}"),
            GemmError::KernelLaunchFailed(msg) => write!(f, "kernel submission rejected: {msg}"),
            GemmError::KernelExecutionFailed(msg) => write!(f, "device fault: {msg}"),
            GemmError::ReadbackFailed(msg) => write!(f, "could not read back C: {msg}"),
            GemmError::InvalidDimensions(msg) => write!(f, "{msg}"),
            GemmError::InvalidConfig { key, value } => {
                write!(f, "{key}={value:?} is not a positive integer")
            }
        }
    }
}

impl std::error::Error for GemmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GemmError::QueueCreationFailed(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================
