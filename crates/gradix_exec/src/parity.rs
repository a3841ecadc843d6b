use crate::{
    executor::{Executor, HostTensor},
    program::Program,
};
use gradix_core::{
    dtype::DType,
    error::{Error, Result},
};

/// Largest absolute difference accepted between two executors, per
/// compute dtype.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Tolerance {
    pub f32: f64,
    pub f16: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { f32: 1e-4, f16: 1e-2 }
    }
}

impl Tolerance {
    pub fn for_dtype(&self, dtype: DType) -> f64 {
        if dtype.is_half() {
            self.f16
        } else {
            self.f32
        }
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Failed to deserialize tolerance from JSON: {}", e)))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchReport {
    pub name: String,
    pub max_abs_diff: f64,
    pub tolerance: f64,
    pub within: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParityReport {
    pub fetches: Vec<FetchReport>,
}

impl ParityReport {
    pub fn passed(&self) -> bool {
        self.fetches.iter().all(|f| f.within)
    }

    /// Fetch with the largest difference relative to its tolerance.
    pub fn worst(&self) -> Option<&FetchReport> {
        self.fetches
            .iter()
            .max_by(|a, b| (a.max_abs_diff / a.tolerance).total_cmp(&(b.max_abs_diff / b.tolerance)))
    }
}

/// Runs `program` on both executors and measures how far `candidate`'s
/// fetches are from `reference`'s.
///
/// The tolerance is picked by the dtype `candidate` computes in, falling
/// back to the fetch dtype. NaN on either side counts as a mismatch unless
/// both sides are NaN.
pub fn compare(
    program: &Program,
    feeds: &[HostTensor],
    reference: &dyn Executor,
    candidate: &dyn Executor,
    tolerance: &Tolerance,
) -> Result<ParityReport> {
    let span = tracing::info_span!("parity", reference = reference.name(), candidate = candidate.name());
    let _enter = span.enter();

    let expected = reference.run(program, feeds)?;
    let actual = candidate.run(program, feeds)?;

    let mut report = ParityReport::default();
    for ((name, want), got) in program.fetches().iter().zip(&expected).zip(&actual) {
        if want.shape() != got.shape() {
            return Err(Error::DimensionMismatch {
                expected: want.shape().to_vec(),
                got: got.shape().to_vec(),
            });
        }
        let tol = tolerance.for_dtype(candidate.precision().unwrap_or_else(|| want.dtype()));
        let max_abs_diff = want
            .to_vec_f64()
            .into_iter()
            .zip(got.to_vec_f64())
            .map(|(a, b)| match (a.is_nan(), b.is_nan()) {
                (true, true) => 0.0,
                (false, false) => (a - b).abs(),
                _ => f64::INFINITY,
            })
            .fold(0.0, f64::max);
        let within = max_abs_diff <= tol;
        if !within {
            tracing::warn!(fetch = %name, max_abs_diff, tolerance = tol, "executors disagree");
        }
        report.fetches.push(FetchReport {
            name: name.clone(),
            max_abs_diff,
            tolerance: tol,
            within,
        });
    }

    Ok(report)
}

/// Like [`compare`], but fails with [`Error::ParityMismatch`] naming the
/// worst fetch when any fetch is out of tolerance.
pub fn assert_parity(
    program: &Program,
    feeds: &[HostTensor],
    reference: &dyn Executor,
    candidate: &dyn Executor,
    tolerance: &Tolerance,
) -> Result<ParityReport> {
    let report = compare(program, feeds, reference, candidate, tolerance)?;
    if let Some(worst) = report.worst().filter(|_| !report.passed()) {
        return Err(Error::ParityMismatch {
            fetch: worst.name.clone(),
            max_abs_diff: worst.max_abs_diff,
            tolerance: worst.tolerance,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_follows_dtype() {
        let tol = Tolerance::default();
        assert_eq!(tol.for_dtype(DType::F32), 1e-4);
        assert_eq!(tol.for_dtype(DType::F16), 1e-2);
    }

    #[test]
    fn worst_is_relative_to_tolerance() {
        let report = ParityReport {
            fetches: vec![
                FetchReport {
                    name: "a".into(),
                    max_abs_diff: 5e-3,
                    tolerance: 1e-2,
                    within: true,
                },
                FetchReport {
                    name: "b".into(),
                    max_abs_diff: 2e-4,
                    tolerance: 1e-4,
                    within: false,
                },
            ],
        };
        assert!(!report.passed());
        assert_eq!(report.worst().map(|f| f.name.as_str()), Some("b"));
    }
}
