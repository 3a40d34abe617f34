// ========================================================================================
//
//                      The engine: a pure, deterministic age transform
//
// ========================================================================================
//
// This module holds the only numeric logic of the clock. It performs no I/O, holds no
// state, and can be called from any number of threads at once. Validation lives
// upstream; the engine only re-checks its length precondition and fails fast.

use crate::coefficients::CoefficientTable;
use crate::types::{AgeEstimate, MethylationVector, NUM_CPG_SITES};
use thiserror::Error;

/// The adult-age calibration constant of the Horvath transform. The transform is
/// logarithmic below this age and linear above it.
pub const ADULT_AGE: f64 = 20.0;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// The caller handed the engine a vector or table that breaks the site-count
    /// precondition. This is a programming error upstream, never a user error.
    #[error(
        "Invariant violation: engine received {vector_len} beta values and {weights_len} weights, expected {expected} of each."
    )]
    InvariantViolation {
        vector_len: usize,
        weights_len: usize,
        expected: usize,
    },
}

/// Estimates the epigenetic age of one validated sample.
pub fn estimate_age(
    vector: &MethylationVector,
    table: &CoefficientTable,
) -> Result<AgeEstimate, EngineError> {
    estimate_age_from_betas(vector.as_slice(), table)
}

/// Slice-level entry point. Refuses to truncate or pad a mis-sized input.
pub fn estimate_age_from_betas(
    betas: &[f64],
    table: &CoefficientTable,
) -> Result<AgeEstimate, EngineError> {
    let weights = table.weights();
    if betas.len() != NUM_CPG_SITES || weights.len() != NUM_CPG_SITES {
        return Err(EngineError::InvariantViolation {
            vector_len: betas.len(),
            weights_len: weights.len(),
            expected: NUM_CPG_SITES,
        });
    }
    let l = linear_predictor(betas, weights, table.intercept());
    Ok(AgeEstimate(calibrated_age(l)))
}

/// `intercept + Σ weight[i] * beta[i]`, accumulated strictly left to right so that
/// identical inputs always produce bit-identical sums.
#[inline]
pub fn linear_predictor(betas: &[f64], weights: &[f64], intercept: f64) -> f64 {
    betas
        .iter()
        .zip(weights)
        .fold(intercept, |acc, (&beta, &weight)| acc + weight * beta)
}

/// Maps the linear predictor from transformed-age space back to years.
///
/// `L <= 0` takes the exponential branch, `(1 + 20) * e^L - 1`; otherwise the linear
/// branch `(1 + 20) * L + 20`. Both branches give 20 at `L = 0`.
#[inline]
pub fn calibrated_age(l: f64) -> f64 {
    if l <= 0.0 {
        (1.0 + ADULT_AGE) * l.exp() - 1.0
    } else {
        (1.0 + ADULT_AGE) * l + ADULT_AGE
    }
}

/// The forward transform, from years into the model's transformed-age space.
/// Inverse of [`calibrated_age`] for `age > -1`.
#[inline]
pub fn age_transform(age: f64) -> f64 {
    if age <= ADULT_AGE {
        (age + 1.0).ln() - (ADULT_AGE + 1.0).ln()
    } else {
        (age - ADULT_AGE) / (ADULT_AGE + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_betas;
    use approx::assert_abs_diff_eq;

    fn zero_table() -> CoefficientTable {
        let ids = (0..NUM_CPG_SITES).map(|i| format!("s{i}")).collect();
        CoefficientTable::new("zero", ids, vec![0.0; NUM_CPG_SITES], 0.0).unwrap()
    }

    fn uniform_vector(value: f64) -> MethylationVector {
        validate_betas(vec![value; NUM_CPG_SITES]).unwrap()
    }

    #[test]
    fn zero_model_yields_adult_age() {
        let table = zero_table();
        for value in [0.0, 0.37, 1.0] {
            let age = estimate_age(&uniform_vector(value), &table).unwrap();
            assert_eq!(age.years(), 20.0);
        }
    }

    #[test]
    fn branches_agree_at_zero() {
        let exponential = (1.0 + ADULT_AGE) * 0.0_f64.exp() - 1.0;
        let linear = (1.0 + ADULT_AGE) * 0.0 + ADULT_AGE;
        assert_abs_diff_eq!(exponential, linear, epsilon = 1e-12);
        assert_abs_diff_eq!(calibrated_age(0.0), 20.0, epsilon = 1e-12);
        // Approaching from either side converges on the same value.
        assert_abs_diff_eq!(calibrated_age(-1e-12), calibrated_age(1e-12), epsilon = 1e-9);
    }

    #[test]
    fn transform_branches_match_reference_formulas() {
        assert_abs_diff_eq!(calibrated_age(-1.0), 21.0 * (-1.0_f64).exp() - 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(calibrated_age(1.0), 41.0, epsilon = 1e-12);
        assert_abs_diff_eq!(calibrated_age(2.5), 72.5, epsilon = 1e-12);
    }

    #[test]
    fn forward_transform_inverts_calibration() {
        for age in [0.0, 5.5, 20.0, 47.25, 90.0] {
            assert_abs_diff_eq!(calibrated_age(age_transform(age)), age, epsilon = 1e-9);
        }
    }

    #[test]
    fn calibrated_age_is_monotonic() {
        let mut previous = calibrated_age(-10.0);
        for step in -99..=100 {
            let current = calibrated_age(step as f64 / 10.0);
            assert!(current > previous);
            previous = current;
        }
    }

    #[test]
    fn repeated_estimates_are_bit_identical() {
        let table = CoefficientTable::bundled().unwrap();
        let betas: Vec<f64> = (0..NUM_CPG_SITES)
            .map(|i| ((i * 37) % 101) as f64 / 100.0)
            .collect();
        let vector = validate_betas(betas).unwrap();
        let first = estimate_age(&vector, &table).unwrap();
        let second = estimate_age(&vector, &table).unwrap();
        assert_eq!(first.years().to_bits(), second.years().to_bits());
    }

    #[test]
    fn bundled_table_golden_value() {
        // 0.56 + 0.5 * (sum of key-site weights = 0.69) = 0.905 → 21 * 0.905 + 20
        let table = CoefficientTable::bundled().unwrap();
        let age = estimate_age(&uniform_vector(0.5), &table).unwrap();
        assert_abs_diff_eq!(age.years(), 39.005, epsilon = 1e-9);
    }

    #[test]
    fn mis_sized_input_fails_fast() {
        let table = zero_table();
        let err = estimate_age_from_betas(&[0.5; 340], &table).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvariantViolation {
                vector_len: 340,
                weights_len: NUM_CPG_SITES,
                expected: NUM_CPG_SITES,
            }
        );
        assert!(estimate_age_from_betas(&[0.5; 354], &table).is_err());
    }

    #[test]
    fn linear_predictor_starts_from_intercept() {
        assert_eq!(linear_predictor(&[], &[], 1.25), 1.25);
        assert_abs_diff_eq!(
            linear_predictor(&[0.5, 1.0, 0.0], &[2.0, -0.5, 9.0], 0.1),
            0.6,
            epsilon = 1e-12
        );
    }
}
