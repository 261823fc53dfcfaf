//! Three-stage LayerNorm pipeline.
//!
//! ```text
//! row ──▶ Preprocess(9) ──▶ InvSqrtUnit(8) ──▶ Postprocess(3) ──▶ row'
//!          mean/var/diff       var → 1/σ         γ·diff·1/σ + β
//! ```
//!
//! Total latency 20 cycles; a new row may enter every cycle once the
//! pipeline is filled. The variance carries the epsilon floor (one LSB),
//! so a constant input row yields `variance == ε` exactly and an all-zero
//! normalized output.

use crate::invsqrt::{InvSqrtOutput, InvSqrtUnit, VarianceToken};
use crate::pipeline::DelayLine;
use tb16_chip::fixed::{saturate_i32, Q5_10};

/// Preprocess stage depth.
pub const PRE_LATENCY: usize = 9;
/// Postprocess stage depth.
pub const POST_LATENCY: usize = 3;
/// Whole-pipeline latency.
pub const LATENCY: usize = PRE_LATENCY + crate::invsqrt::LATENCY + POST_LATENCY;

/// Mean, epsilon-floored variance, and difference vector of one row.
#[derive(Debug, Clone)]
pub struct RowStats {
    /// `Σx / n`.
    pub mean: Q5_10,
    /// `Σ(x − mean)² / n + ε`.
    pub variance: Q5_10,
    /// `x_i − mean`, saturating.
    pub diff: Vec<Q5_10>,
}

/// Compute a row's statistics the way the silicon does: truncating signed
/// division for the mean, per-element squared differences rescaled before
/// accumulation, epsilon added last.
#[must_use]
pub fn row_stats(row: &[Q5_10]) -> RowStats {
    #[allow(clippy::cast_possible_wrap)]
    let n = row.len() as i32;

    let sum: i32 = row.iter().map(|x| i32::from(x.raw())).sum();
    let mean_raw = saturate_i32(sum / n);
    let mean = Q5_10::from_raw(mean_raw);

    let diff: Vec<Q5_10> = row.iter().map(|x| x.saturating_sub(mean)).collect();

    let sum_sq: i64 = diff
        .iter()
        .map(|d| i64::from((i32::from(d.raw()) * i32::from(d.raw())) >> 10))
        .sum();
    #[allow(clippy::cast_possible_truncation)]
    let variance_raw = saturate_i32((sum_sq / i64::from(n)) as i32 + 1);

    RowStats {
        mean,
        variance: Q5_10::from_raw(variance_raw),
        diff,
    }
}

/// The mean/variance/difference front stage.
#[derive(Debug, Clone)]
pub struct Preprocess {
    line: DelayLine<RowStats>,
}

impl Preprocess {
    /// An empty preprocess pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            line: DelayLine::new(PRE_LATENCY),
        }
    }

    /// Advance one clock.
    pub fn tick(&mut self, input: Option<&[Q5_10]>) -> Option<RowStats> {
        self.line.tick(input.map(row_stats))
    }

    /// Drop in-flight rows (global reset).
    pub fn reset(&mut self) {
        self.line.flush();
    }
}

impl Default for Preprocess {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct ScaleShift {
    gamma: Vec<Q5_10>,
    beta: Vec<Q5_10>,
}

/// The γ·diff·1/σ + β back stage.
#[derive(Debug, Clone)]
struct Postprocess {
    params: ScaleShift,
    line: DelayLine<Vec<Q5_10>>,
}

impl Postprocess {
    fn new(dim: usize) -> Self {
        Self {
            params: ScaleShift {
                gamma: vec![Q5_10::ONE; dim],
                beta: vec![Q5_10::ZERO; dim],
            },
            line: DelayLine::new(POST_LATENCY),
        }
    }

    fn apply(&self, t: &InvSqrtOutput) -> Vec<Q5_10> {
        t.diff
            .iter()
            .zip(self.params.gamma.iter().zip(self.params.beta.iter()))
            .map(|(d, (g, b))| {
                g.saturating_mul(*d)
                    .saturating_mul(t.inv_sigma)
                    .saturating_add(*b)
            })
            .collect()
    }

    fn tick(&mut self, input: Option<InvSqrtOutput>) -> Option<Vec<Q5_10>> {
        let scaled = input.map(|t| self.apply(&t));
        self.line.tick(scaled)
    }
}

/// The full three-stage LayerNorm pipeline.
#[derive(Debug, Clone)]
pub struct LayerNormPipeline {
    pre: Preprocess,
    inv: InvSqrtUnit,
    post: Postprocess,
}

impl LayerNormPipeline {
    /// A pipeline for rows of `dim` elements, with identity γ/β.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            pre: Preprocess::new(),
            inv: InvSqrtUnit::new(),
            post: Postprocess::new(dim),
        }
    }

    /// Install the per-element scale/shift parameters (learned weights,
    /// supplied out-of-band before the instance's rows are streamed).
    pub fn set_params(&mut self, gamma: &[Q5_10], beta: &[Q5_10]) {
        self.post.params = ScaleShift {
            gamma: gamma.to_vec(),
            beta: beta.to_vec(),
        };
    }

    /// Advance one clock; valid-in at cycle t yields valid-out at t + 20.
    pub fn tick(&mut self, input: Option<&[Q5_10]>) -> Option<Vec<Q5_10>> {
        let stats = self.pre.tick(input);
        let token = stats.map(|s| VarianceToken {
            variance: s.variance,
            mean: s.mean,
            diff: s.diff,
        });
        let refined = self.inv.tick(token);
        self.post.tick(refined)
    }

    /// Drop every in-flight row (global reset).
    pub fn reset(&mut self) {
        self.pre.reset();
        self.inv.reset();
        self.post.line.flush();
    }
}
