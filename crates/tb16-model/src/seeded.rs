//! Deterministic seeded weight generation.
//!
//! Used by tests, benchmarks, and the CLI. Magnitudes are chosen so the
//! attention scores of a 16-token block stay inside the exponential LUT's
//! clamped [-8, 8] domain: projections in ±0.5, embeddings in ±1.

use crate::weights::{LayerNormParams, WeightSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tb16_chip::fixed::Q5_10;
use tb16_chip::matrix::Matrix;

fn random_matrix(rng: &mut StdRng, dim: usize, span: f32) -> Matrix {
    Matrix::from_fn(dim, dim, |_, _| {
        Q5_10::from_f32(rng.gen_range(-span..=span))
    })
}

impl WeightSet {
    /// Deterministic weight set for a given seed.
    #[must_use]
    pub fn seeded(dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let embedding = random_matrix(&mut rng, dim, 1.0);
        let wq = random_matrix(&mut rng, dim, 0.5);
        let wk = random_matrix(&mut rng, dim, 0.5);
        let wv = random_matrix(&mut rng, dim, 0.5);
        let wff1 = random_matrix(&mut rng, dim, 0.5);
        let wff2 = random_matrix(&mut rng, dim, 0.5);
        let wout = random_matrix(&mut rng, dim, 0.5);

        let mut ln = || LayerNormParams {
            gamma: (0..dim)
                .map(|_| Q5_10::from_f32(rng.gen_range(0.8..=1.2)))
                .collect(),
            beta: (0..dim)
                .map(|_| Q5_10::from_f32(rng.gen_range(-0.1..=0.1)))
                .collect(),
        };
        let ln_input = ln();
        let ln_attn = ln();
        let ln_ff = ln();

        Self {
            dim,
            embedding,
            wq,
            wk,
            wv,
            wff1,
            wff2,
            wout,
            ln_input,
            ln_attn,
            ln_ff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_weights() {
        assert_eq!(WeightSet::seeded(16, 3), WeightSet::seeded(16, 3));
    }

    #[test]
    fn different_seeds_differ() {
        assert_ne!(WeightSet::seeded(16, 3), WeightSet::seeded(16, 4));
    }

    #[test]
    fn magnitudes_stay_bounded() {
        let w = WeightSet::seeded(16, 11);
        for e in w.wq.elements() {
            assert!(e.to_f32().abs() <= 0.5 + 1.0 / 1024.0);
        }
        for g in &w.ln_input.gamma {
            let g = g.to_f32();
            assert!((0.8..=1.2).contains(&g));
        }
    }
}
