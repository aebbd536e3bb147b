//! Verification of an artifact against a reference fixture
//!
//! Every sampled pair is evaluated and recorded. A pair passes when
//! `|actual - expected| <= atol + rtol * |expected|`. Tolerance violations
//! are collected into the report; structural errors from the predictor abort
//! the run immediately.

use crate::errors::{ForestError, Result};
use crate::fixture::ReferenceFixture;
use crate::predictor::Predictor;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Default relative tolerance
pub const DEFAULT_RTOL: f64 = 1e-7;
/// Default absolute tolerance
pub const DEFAULT_ATOL: f64 = 1e-6;

/// Allowed deviation between expected and actual predictions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
        }
    }
}

impl Tolerance {
    pub fn new(rtol: f64, atol: f64) -> Result<Self> {
        for (name, value) in [("rtol", rtol), ("atol", atol)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ForestError::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        Ok(Self { rtol, atol })
    }

    pub fn allows(&self, expected: f64, actual: f64) -> bool {
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// Relative deviation; zero when both values are zero, infinite when only
/// the expected value is.
fn relative_deviation(expected: f64, abs_deviation: f64) -> f64 {
    if abs_deviation == 0.0 {
        0.0
    } else if expected == 0.0 {
        f64::INFINITY
    } else {
        abs_deviation / expected.abs()
    }
}

/// Result of comparing one fixture pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairOutcome {
    /// Index of the pair in the fixture
    pub row: usize,
    pub expected: f64,
    pub actual: f64,
    pub abs_deviation: f64,
    pub rel_deviation: f64,
    pub passed: bool,
}

/// Outcome of a verification run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    /// One entry per checked pair, in fixture order
    pub outcomes: Vec<PairOutcome>,
    pub max_abs_deviation: f64,
    pub max_rel_deviation: f64,
}

impl VerificationReport {
    fn from_outcomes(outcomes: Vec<PairOutcome>) -> Self {
        let max_abs_deviation = outcomes
            .iter()
            .map(|o| o.abs_deviation)
            .fold(0.0, f64::max);
        let max_rel_deviation = outcomes
            .iter()
            .map(|o| o.rel_deviation)
            .fold(0.0, f64::max);
        Self {
            outcomes,
            max_abs_deviation,
            max_rel_deviation,
        }
    }

    pub fn checked(&self) -> usize {
        self.outcomes.len()
    }

    pub fn violations(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }

    /// True when at least one pair was checked and none violated tolerance
    pub fn passed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.passed)
    }

    /// Fail with the largest absolute deviation among violating pairs
    pub fn ensure_passed(&self) -> Result<()> {
        if self.outcomes.is_empty() {
            return Err(ForestError::EmptyFixture);
        }
        let worst = self
            .violations()
            .max_by(|a, b| a.abs_deviation.total_cmp(&b.abs_deviation));

        match worst {
            None => Ok(()),
            Some(worst) => Err(ForestError::ToleranceViolation {
                failed: self.violations().count(),
                checked: self.checked(),
                worst_row: worst.row,
                expected: worst.expected,
                actual: worst.actual,
            }),
        }
    }
}

/// Runs a predictor over a fixture and compares the results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationHarness {
    tolerance: Tolerance,
    sample_size: Option<usize>,
    seed: u64,
}

impl VerificationHarness {
    pub fn new(tolerance: Tolerance, sample_size: Option<usize>, seed: u64) -> Self {
        Self {
            tolerance,
            sample_size,
            seed,
        }
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Check the fixture shape against `num_features` without predicting
    pub fn check_fixture(&self, fixture: &ReferenceFixture, num_features: usize) -> Result<()> {
        if fixture.is_empty() {
            return Err(ForestError::EmptyFixture);
        }
        if self.sample_size == Some(0) {
            return Err(ForestError::InvalidConfig(
                "sample size must be positive".to_string(),
            ));
        }
        match fixture.width() {
            Some(width) if width != num_features => Err(ForestError::FeatureWidth {
                row: 0,
                expected: num_features,
                found: width,
            }),
            _ => Ok(()),
        }
    }

    pub fn run<P: Predictor + ?Sized>(
        &self,
        fixture: &ReferenceFixture,
        predictor: &P,
    ) -> Result<VerificationReport> {
        self.check_fixture(fixture, predictor.num_features())?;

        let indices = fixture.sample_indices(self.sample_size, self.seed);
        let mut outcomes = Vec::with_capacity(indices.len());

        for row in indices {
            let expected = fixture.expected(row);
            let actual = predictor.predict(fixture.features(row))?;
            let abs_deviation = (actual - expected).abs();
            let passed = self.tolerance.allows(expected, actual);
            if !passed {
                warn!(
                    "Row {}: expected {}, got {} (deviation {:e})",
                    row, expected, actual, abs_deviation
                );
            }
            outcomes.push(PairOutcome {
                row,
                expected,
                actual,
                abs_deviation,
                rel_deviation: relative_deviation(expected, abs_deviation),
                passed,
            });
        }

        let report = VerificationReport::from_outcomes(outcomes);
        info!(
            "Verified {} of {} fixture pairs: {} failed, max abs deviation {:e}",
            report.checked(),
            fixture.len(),
            report.violations().count(),
            report.max_abs_deviation
        );
        Ok(report)
    }
}
