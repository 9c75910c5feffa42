// config.rs — Problem size and launch shape for one GEMM run.
//
// The four recognised inputs are {rows, cols, inner dimension, work-group
// edge}. They are validated when the config is built, so a `GemmConfig`
// that exists is always positive and divisible. Device-specific limits
// (how large a work-group the adapter accepts) are checked later, in
// `gpu::dispatch::LaunchGeometry`, once a device is known.

use crate::error::GemmError;
use crate::matrix::Matrix;

/// Environment variables read by [`GemmConfig::from_env`].
pub const ENV_M: &str = "GEMM_M";
pub const ENV_N: &str = "GEMM_N";
pub const ENV_K: &str = "GEMM_K";
pub const ENV_WG_EDGE: &str = "GEMM_WG_EDGE";

/// Dimensions of C = A×B with A: M×K, B: K×N, C: M×N, plus the edge of the
/// square work-group used to launch the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmConfig {
    m: u32,
    n: u32,
    k: u32,
    workgroup_edge: u32,
}

impl Default for GemmConfig {
    /// 128×128×128 with 32×32 work-groups.
    fn default() -> Self {
        GemmConfig { m: 128, n: 128, k: 128, workgroup_edge: 32 }
    }
}

impl GemmConfig {
    /// Validate and build a config.
    ///
    /// # Errors
    /// - `InvalidDimensions` if any of M, N, K is zero.
    /// - `InvalidLaunchGeometry` if the edge is zero or does not divide M and N.
    pub fn new(m: u32, n: u32, k: u32, workgroup_edge: u32) -> Result<Self, GemmError> {
        if m == 0 || n == 0 || k == 0 {
            return Err(GemmError::InvalidDimensions(format!(
                "M, N and K must be positive (got M={m}, N={n}, K={k})"
            )));
        }
        if workgroup_edge == 0 {
            return Err(GemmError::InvalidLaunchGeometry(
                "work-group edge must be positive".into(),
            ));
        }
        for (name, extent) in [("M", m), ("N", n)] {
            if extent % workgroup_edge != 0 {
                return Err(GemmError::InvalidLaunchGeometry(format!(
                    "{name}={extent} is not a multiple of the work-group edge {workgroup_edge}"
                )));
            }
        }
        Ok(GemmConfig { m, n, k, workgroup_edge })
    }

    /// Square problem: M = N = K = `size`.
    pub fn square(size: u32, workgroup_edge: u32) -> Result<Self, GemmError> {
        Self::new(size, size, size, workgroup_edge)
    }

    /// Read `GEMM_M`, `GEMM_N`, `GEMM_K` and `GEMM_WG_EDGE`, falling back to
    /// the defaults for unset variables.
    pub fn from_env() -> Result<Self, GemmError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GemmError> {
        let defaults = Self::default();
        let read = |key: &'static str, default: u32| -> Result<u32, GemmError> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| GemmError::InvalidConfig { key, value: raw }),
            }
        };
        Self::new(
            read(ENV_M, defaults.m)?,
            read(ENV_N, defaults.n)?,
            read(ENV_K, defaults.k)?,
            read(ENV_WG_EDGE, defaults.workgroup_edge)?,
        )
    }

    #[inline]
    pub fn m(&self) -> u32 {
        self.m
    }

    #[inline]
    pub fn n(&self) -> u32 {
        self.n
    }

    #[inline]
    pub fn k(&self) -> u32 {
        self.k
    }

    #[inline]
    pub fn workgroup_edge(&self) -> u32 {
        self.workgroup_edge
    }

    /// Floating-point operations in one multiply (2·M·N·K).
    pub fn flops(&self) -> u64 {
        2 * self.m as u64 * self.n as u64 * self.k as u64
    }

    /// Check that A is M×K and B is K×N.
    pub fn check_operands(&self, a: &Matrix, b: &Matrix) -> Result<(), GemmError> {
        let (m, n, k) = (self.m as usize, self.n as usize, self.k as usize);
        if (a.rows(), a.cols()) != (m, k) {
            return Err(GemmError::InvalidDimensions(format!(
                "A is {}×{}, expected M×K = {m}×{k}",
                a.rows(),
                a.cols()
            )));
        }
        if (b.rows(), b.cols()) != (k, n) {
            return Err(GemmError::InvalidDimensions(format!(
                "B is {}×{}, expected K×N = {k}×{n}",
                b.rows(),
                b.cols()
            )));
        }
        Ok(())
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_128_with_32_edge() {
        let c = GemmConfig::default();
        assert_eq!((c.m(), c.n(), c.k(), c.workgroup_edge()), (128, 128, 128, 32));
        assert_eq!(c.flops(), 2 * 128 * 128 * 128);
    }

    #[test]
    fn test_rejects_zero_dimension() {
        let err = GemmConfig::new(0, 32, 32, 32).unwrap_err();
        assert!(matches!(err, GemmError::InvalidDimensions(_)));
    }

    #[test]
    fn test_rejects_non_divisible_extent() {
        let err = GemmConfig::new(100, 128, 128, 32).unwrap_err();
        assert!(matches!(err, GemmError::InvalidLaunchGeometry(_)));
        let err = GemmConfig::new(128, 96 + 1, 128, 32).unwrap_err();
        assert!(err.to_string().contains("N=97"));
    }

    #[test]
    fn test_k_need_not_be_divisible() {
        // K is the loop bound inside each work unit, not a grid extent.
        assert!(GemmConfig::new(32, 32, 7, 32).is_ok());
    }

    #[test]
    fn test_rejects_zero_edge() {
        assert!(GemmConfig::new(32, 32, 32, 0).is_err());
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([(ENV_M, "64"), (ENV_WG_EDGE, " 16 ")]);
        let c = GemmConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!((c.m(), c.n(), c.k(), c.workgroup_edge()), (64, 128, 128, 16));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = GemmConfig::from_lookup(|k| (k == ENV_K).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, GemmError::InvalidConfig { key: ENV_K, .. }));
    }

    #[test]
    fn test_check_operands() {
        let cfg = GemmConfig::new(4, 8, 2, 4).unwrap();
        assert!(cfg.check_operands(&Matrix::zeros(4, 2), &Matrix::zeros(2, 8)).is_ok());
        assert!(cfg.check_operands(&Matrix::zeros(2, 4), &Matrix::zeros(2, 8)).is_err());
        assert!(cfg.check_operands(&Matrix::zeros(4, 2), &Matrix::zeros(8, 2)).is_err());
    }
}
