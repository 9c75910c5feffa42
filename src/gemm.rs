// gemm.rs — CPU reference for the GEMM kernel.
//
// Two references live here:
//
//   gemm_reference   the textbook triple loop. Authoritative answer.
//   gemm_emulated    runs the device kernel's per-work-unit formula on the
//                     CPU for every (idx, idy) a launch grid would visit,
//                     checking that each element of C is written exactly once.
//
// The GPU result is validated against `gemm_reference`; `gemm_emulated`
// pins down the kernel's indexing and the grid's coverage without a device.

use crate::error::GemmError;
use crate::matrix::Matrix;

/// C = A×B with the triple loop. Accumulates in f32 in k order, the same
/// order a single work unit uses.
///
/// # Panics
/// Panics if `a.cols() != b.rows()`.
pub fn gemm_reference(a: &Matrix, b: &Matrix) -> Matrix {
    assert_eq!(
        a.cols(),
        b.rows(),
        "inner dimensions differ: A is {a:?}, B is {b:?}"
    );
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let (a, b) = (a.as_slice(), b.as_slice());

    let mut c = Matrix::zeros(m, n);
    let out = c.as_mut_slice();
    for col in 0..n {
        for row in 0..m {
            let mut acc = 0.0f32;
            for p in 0..k {
                acc += a[p * m + row] * b[col * k + p];
            }
            out[col * m + row] = acc;
        }
    }
    c
}

/// The kernel body for one work unit: `Σ_k A[k·M + idx] · B[idy·K + k]`.
#[inline]
pub fn gemm_work_unit(m: usize, k: usize, a: &[f32], b: &[f32], idx: usize, idy: usize) -> f32 {
    let mut acc = 0.0f32;
    for p in 0..k {
        acc += a[p * m + idx] * b[idy * k + p];
    }
    acc
}

/// Run the kernel formula for every work unit yielded by `work_units`,
/// writing `C[idy·M + idx]`.
///
/// # Errors
/// `InvalidLaunchGeometry` if a work unit falls outside C, writes an element
/// a second time, or if some element of C is never written.
pub fn gemm_emulated(
    work_units: impl IntoIterator<Item = (u32, u32)>,
    a: &Matrix,
    b: &Matrix,
) -> Result<Matrix, GemmError> {
    if a.cols() != b.rows() {
        return Err(GemmError::InvalidDimensions(format!(
            "inner dimensions differ: A is {a:?}, B is {b:?}"
        )));
    }
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let mut c = Matrix::zeros(m, n);
    let mut written = vec![false; m * n];

    for (idx, idy) in work_units {
        let (idx, idy) = (idx as usize, idy as usize);
        if idx >= m || idy >= n {
            return Err(GemmError::InvalidLaunchGeometry(format!(
                "work unit ({idx}, {idy}) lies outside the {m}×{n} output"
            )));
        }
        let slot = idy * m + idx;
        if std::mem::replace(&mut written[slot], true) {
            return Err(GemmError::InvalidLaunchGeometry(format!(
                "work unit ({idx}, {idy}) writes C[{slot}] a second time"
            )));
        }
        c.as_mut_slice()[slot] = gemm_work_unit(m, k, a.as_slice(), b.as_slice(), idx, idy);
    }

    if let Some(gap) = written.iter().position(|w| !w) {
        return Err(GemmError::InvalidLaunchGeometry(format!(
            "C[{gap}] (row {}, col {}) was never written",
            gap % m,
            gap / m
        )));
    }
    Ok(c)
}

/// Largest per-element relative error of `got` against `want`.
///
/// Elements whose reference magnitude is below 1.0 are compared absolutely,
/// so exact zeros in the reference do not blow the ratio up.
///
/// # Panics
/// Panics if the shapes differ.
pub fn max_relative_error(got: &Matrix, want: &Matrix) -> f32 {
    assert_eq!(
        (got.rows(), got.cols()),
        (want.rows(), want.cols()),
        "shape mismatch: {got:?} vs {want:?}"
    );
    got.as_slice()
        .iter()
        .zip(want.as_slice())
        .map(|(&g, &w)| (g - w).abs() / w.abs().max(1.0))
        .fold(0.0f32, f32::max)
}

// ============================================================
// Tests
// ============================================================
