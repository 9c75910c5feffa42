// tests/test_program.rs — Device acquisition and kernel build failures.

use gpu_gemm::gpu::device::{acquire_device, GpuSession};
use gpu_gemm::gpu::program::{parse_kernel, render_gemm_source, KernelProgram, GEMM_ENTRY_POINT};
use gpu_gemm::{DeviceKind, GemmError};

fn broken_source() -> String {
    // Missing semicolon after the accumulator declaration.
    render_gemm_source(32).replace("var acc: f32 = 0.0;", "var acc: f32 = 0.0")
}

// ===== Host-side (no device) =====

#[test]
fn syntax_error_is_build_failed_with_diagnostic() {
    match parse_kernel(&broken_source()) {
        Err(GemmError::BuildFailed { log }) => {
            assert!(!log.trim().is_empty());
            let shown = GemmError::BuildFailed { log: log.clone() }.to_string();
            assert!(shown.contains(&log), "diagnostic must be surfaced verbatim");
        }
        other => panic!("expected BuildFailed, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn type_error_is_build_failed() {
    // Parses, but assigning a u32 to an f32 accumulator fails validation.
    let src = render_gemm_source(32).replace("c[idy * dims.m + idx] = acc;", "c[idy * dims.m + idx] = idx;");
    assert!(matches!(parse_kernel(&src), Err(GemmError::BuildFailed { .. })));
}

#[test]
fn no_adapters_is_device_unavailable_not_a_crash() {
    let err = acquire_device(DeviceKind::Gpu, wgpu::Backends::empty()).err();
    assert!(matches!(err, Some(GemmError::DeviceUnavailable { .. })));
}

// ===== Device =====

#[test]
#[ignore = "requires a GPU adapter"]
fn device_build_of_broken_source_fails() {
    let session = GpuSession::new(DeviceKind::Gpu).unwrap();
    match KernelProgram::compile(&session, &broken_source()) {
        Err(GemmError::BuildFailed { log }) => assert!(!log.is_empty()),
        Err(other) => panic!("expected BuildFailed, got {other}"),
        Ok(_) => panic!("broken source compiled"),
    }
    // Nothing was allocated; the session is still healthy.
    assert!(session.device_lost().is_none());
    assert!(KernelProgram::compile(&session, &render_gemm_source(32)).is_ok());
}

#[test]
#[ignore = "requires a GPU adapter"]
fn entry_point_resolution() {
    let session = GpuSession::new(DeviceKind::Gpu).unwrap();
    let program = KernelProgram::compile(&session, &render_gemm_source(16)).unwrap();
    assert_eq!(program.entry_points(), vec![GEMM_ENTRY_POINT.to_string()]);
    assert_eq!(program.workgroup_size(GEMM_ENTRY_POINT), Some([16, 16, 1]));

    let kernel = program.get_entry_point(&session, GEMM_ENTRY_POINT).unwrap();
    assert_eq!(kernel.workgroup_size(), [16, 16, 1]);

    match program.get_entry_point(&session, "myGEMM1") {
        Err(GemmError::EntryPointNotFound { name, available }) => {
            assert_eq!(name, "myGEMM1");
            assert_eq!(available, vec![GEMM_ENTRY_POINT.to_string()]);
        }
        Err(other) => panic!("expected EntryPointNotFound, got {other}"),
        Ok(_) => panic!("resolved a missing entry point"),
    }
}

#[test]
#[ignore = "requires a software (CPU) adapter such as lavapipe"]
fn cpu_kind_selects_software_adapter() {
    let session = GpuSession::new(DeviceKind::Cpu).unwrap();
    assert_eq!(session.adapter_info.device_type, wgpu::DeviceType::Cpu);
}
