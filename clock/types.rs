// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;

/// The number of CpG sites the clock is defined over. Both the input vector and the
/// coefficient table are indexed by this fixed, ordered set of sites.
pub const NUM_CPG_SITES: usize = 353;

/// An ordered vector of exactly [`NUM_CPG_SITES`] beta values, each in `[0.0, 1.0]`.
///
/// The only way to obtain one is through the validators in [`crate::validate`], which
/// makes a mis-sized or out-of-domain vector an unrepresentable state downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct MethylationVector {
    betas: Vec<f64>,
}

impl MethylationVector {
    /// Wraps values that have already passed cardinality, finiteness and domain checks.
    pub(crate) fn from_validated(betas: Vec<f64>) -> Self {
        debug_assert_eq!(betas.len(), NUM_CPG_SITES);
        Self { betas }
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.betas
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.betas.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }
}

/// The model output in years, at full precision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct AgeEstimate(pub f64);

impl AgeEstimate {
    #[inline]
    pub fn years(self) -> f64 {
        self.0
    }
}

impl fmt::Display for AgeEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Presentation rounding only; the stored value keeps full precision.
        write!(f, "{:.1}", self.0)
    }
}
