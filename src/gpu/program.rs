// gpu/program.rs — Program builder: WGSL source → compiled kernel.
//
// BUILD VERIFICATION
// ──────────────────
// `create_shader_module` never returns an error: on failure wgpu hands back
// an invalid module and reports the problem asynchronously. A build is
// therefore checked three ways before it is trusted:
//
//   1. Host front end: the source is parsed and validated with naga, the
//      same front end wgpu uses. A failure here is rendered as a
//      source-annotated diagnostic. Needs no device.
//   2. Error scope: module creation runs inside a validation scope.
//   3. Compilation info: the module's message list is queried explicitly;
//      any `Error` message fails the build, warnings go into the build log.
//
// ENTRY POINTS
// ────────────
// The naga module is kept alongside the device module so entry points can be
// resolved by name (and their declared work-group shape read back) without
// asking the device.
//
// ARGUMENT LAYOUT
// ───────────────
// The GEMM kernel's parameters are positional bindings in group 0:
//
//   0  uniform            Dims { m, n, k }
//   1  storage, read      A
//   2  storage, read      B
//   3  storage, read_write C
//
// `GemmKernel` owns the matching bind-group layout; `gpu::dispatch` binds
// buffers against it in the same order.

use std::fmt;

use crate::error::GemmError;
use crate::gpu::device::GpuSession;

/// WGSL source of the GEMM kernel with a `{{WG_EDGE}}` placeholder for the
/// work-group edge.
pub const GEMM_KERNEL_TEMPLATE: &str = include_str!("../shaders/gemm.wgsl");

/// Name of the GEMM entry point in [`GEMM_KERNEL_TEMPLATE`].
pub const GEMM_ENTRY_POINT: &str = "gemm";

/// Binding slots of the GEMM kernel's arguments.
pub const BINDING_DIMS: u32 = 0;
pub const BINDING_A: u32 = 1;
pub const BINDING_B: u32 = 2;
pub const BINDING_C: u32 = 3;

/// Render the GEMM kernel for a square `edge × edge` work-group.
pub fn render_gemm_source(edge: u32) -> String {
    GEMM_KERNEL_TEMPLATE.replace("{{WG_EDGE}}", &edge.to_string())
}

/// Parse and validate WGSL on the host.
///
/// # Errors
/// `BuildFailed` carrying naga's source-annotated diagnostic.
pub fn parse_kernel(source: &str) -> Result<naga::Module, GemmError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| GemmError::BuildFailed {
        log: e.emit_to_string(source),
    })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| GemmError::BuildFailed { log: e.emit_to_string(source) })?;
    Ok(module)
}

/// Severity of a build-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
}

/// One diagnostic from the device compiler.
#[derive(Debug, Clone)]
pub struct BuildMessage {
    pub level: LogLevel,
    pub message: String,
    /// 1-based (line, column), when the compiler reported one.
    pub location: Option<(u32, u32)>,
}

impl fmt::Display for BuildMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
        };
        match self.location {
            Some((line, col)) => write!(f, "{level} at {line}:{col}: {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

/// Everything the compiler said about one build.
#[derive(Debug, Clone, Default)]
pub struct BuildLog {
    pub messages: Vec<BuildMessage>,
}

impl BuildLog {
    fn from_compilation_info(info: wgpu::CompilationInfo) -> Self {
        let messages = info
            .messages
            .into_iter()
            .map(|m| BuildMessage {
                level: match m.message_type {
                    wgpu::CompilationMessageType::Error => LogLevel::Error,
                    wgpu::CompilationMessageType::Warning => LogLevel::Warning,
                    wgpu::CompilationMessageType::Info => LogLevel::Info,
                },
                message: m.message,
                location: m.location.map(|loc| (loc.line_number, loc.line_position)),
            })
            .collect();
        BuildLog { messages }
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.level == LogLevel::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl fmt::Display for BuildLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.messages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

/// A compiled kernel program. Immutable once built.
pub struct KernelProgram {
    module: wgpu::ShaderModule,
    ir: naga::Module,
    log: BuildLog,
}

impl KernelProgram {
    /// Compile `source` for the session's device.
    ///
    /// # Errors
    /// `BuildFailed` with the compiler diagnostic if the host front end, the
    /// device's error scope or the module's compilation info reports an error.
    pub fn compile(session: &GpuSession, source: &str) -> Result<Self, GemmError> {
        let ir = parse_kernel(source)?;

        let (module, scope_error) = session.scoped(|| {
            session.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("gemm.wgsl"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });

        let log = BuildLog::from_compilation_info(pollster::block_on(module.get_compilation_info()));
        if let Some(e) = scope_error {
            let mut text = e.to_string();
            if !log.is_empty() {
                text = format!("{text}\n{log}");
            }
            return Err(GemmError::BuildFailed { log: text });
        }
        if log.has_errors() {
            return Err(GemmError::BuildFailed { log: log.to_string() });
        }

        for m in log.messages.iter().filter(|m| m.level == LogLevel::Warning) {
            log::warn!("kernel build: {m}");
        }
        log::debug!("kernel program built ({} compute entry points)", ir.entry_points.len());

        Ok(KernelProgram { module, ir, log })
    }

    /// Compiler output for a successful build (warnings, info).
    pub fn build_log(&self) -> &BuildLog {
        &self.log
    }

    /// Names of the program's compute entry points.
    pub fn entry_points(&self) -> Vec<String> {
        compute_entry_points(&self.ir)
    }

    /// Declared work-group shape of a compute entry point.
    pub fn workgroup_size(&self, name: &str) -> Option<[u32; 3]> {
        find_compute_entry(&self.ir, name).map(|ep| ep.workgroup_size)
    }

    /// Resolve `name` into a launchable GEMM kernel.
    ///
    /// # Errors
    /// - `EntryPointNotFound` if the program has no compute entry point `name`.
    /// - `BuildFailed` if the device rejects the pipeline (e.g. the entry
    ///   point's bindings disagree with the GEMM argument layout).
    pub fn get_entry_point(&self, session: &GpuSession, name: &str) -> Result<GemmKernel, GemmError> {
        let entry = find_compute_entry(&self.ir, name).ok_or_else(|| GemmError::EntryPointNotFound {
            name: name.to_string(),
            available: self.entry_points(),
        })?;
        let workgroup_size = entry.workgroup_size;

        let ((bind_group_layout, pipeline), scope_error) = session.scoped(|| {
            let bgl = session.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("gemm BGL"),
                entries: &[
                    uniform_entry(BINDING_DIMS),
                    storage_entry(BINDING_A, true),
                    storage_entry(BINDING_B, true),
                    storage_entry(BINDING_C, false),
                ],
            });
            let layout = session.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("gemm pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });
            let pipeline = session.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&layout),
                module: &self.module,
                entry_point: name,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            (bgl, pipeline)
        });
        if let Some(e) = scope_error {
            return Err(GemmError::BuildFailed { log: format!("pipeline for `{name}` rejected: {e}") });
        }

        Ok(GemmKernel {
            pipeline,
            bind_group_layout,
            name: name.to_string(),
            workgroup_size,
        })
    }
}

/// A resolved GEMM entry point: the reusable invocation object that
/// arguments are bound to before each launch.
pub struct GemmKernel {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    name: String,
    workgroup_size: [u32; 3],
}

impl GemmKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Work-group shape compiled into the kernel.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn find_compute_entry<'a>(ir: &'a naga::Module, name: &str) -> Option<&'a naga::EntryPoint> {
    ir.entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Compute && ep.name == name)
}

fn compute_entry_points(ir: &naga::Module) -> Vec<String> {
    ir.entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Compute)
        .map(|ep| ep.name.clone())
        .collect()
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// ============================================================
// Tests
// ============================================================
