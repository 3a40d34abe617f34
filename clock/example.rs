//! Example input generation: uniformly random beta values, optionally seeded, formatted
//! the way a calculator form expects them.

use crate::types::NUM_CPG_SITES;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws `NUM_CPG_SITES` values uniformly from `[0, 1]`. The same seed always yields
/// the same vector.
pub fn random_betas(seed: Option<u64>) -> Vec<f64> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (0..NUM_CPG_SITES)
        .map(|_| rng.gen_range(0.0..=1.0))
        .collect()
}

/// Comma-separated, six decimals per value.
pub fn format_betas(betas: &[f64]) -> String {
    betas.iter().map(|b| format!("{b:.6}")).join(", ")
}
