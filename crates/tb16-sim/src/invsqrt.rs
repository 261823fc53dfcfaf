//! LUT-seeded Newton-Raphson inverse square root.
//!
//! Eight pipeline stages: a seed lookup, two Newton refinement stages
//! (`x' = x(3 − v·x²)/2`), and register stages between them. The mean and
//! per-element difference vector ride along unmodified so the LayerNorm
//! postprocess never re-reads the original row.
//!
//! Divergence is the unit's critical edge case: with a poor seed for an
//! extreme variance the `3 − v·x²` term goes non-positive and an unguarded
//! iteration would silently produce a wrong finite number (fixed point has
//! no NaN). A diverging step keeps the last good estimate and flags the
//! token instead.

use crate::pipeline::DelayLine;
use tb16_chip::fixed::Q5_10;
use tb16_chip::rom::{newton_inv_sqrt_step, InvSqrtSeedLut};

/// Pipeline depth: seed lookup + two Newton stages + registers.
pub const LATENCY: usize = 8;

/// Stage indices at which the two refinement steps fire.
const NEWTON_STAGES: [usize; 2] = [3, 6];

/// Input token: a variance with its pass-through payload.
#[derive(Debug, Clone)]
pub struct VarianceToken {
    /// Variance, epsilon-floored by the producer.
    pub variance: Q5_10,
    /// Row mean (pass-through).
    pub mean: Q5_10,
    /// Per-element differences (pass-through).
    pub diff: Vec<Q5_10>,
}

/// Output token: `variance → inv_sigma`, payload unchanged.
#[derive(Debug, Clone)]
pub struct InvSqrtOutput {
    /// Approximation of `1/√variance`.
    pub inv_sigma: Q5_10,
    /// Row mean (passed through).
    pub mean: Q5_10,
    /// Per-element differences (passed through).
    pub diff: Vec<Q5_10>,
    /// False if either refinement step hit the divergence guard.
    pub converged: bool,
}

#[derive(Debug, Clone)]
struct InFlight {
    v: Q5_10,
    x: Q5_10,
    mean: Q5_10,
    diff: Vec<Q5_10>,
    converged: bool,
}

/// Indicates a Newton step whose denominator term went non-positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diverged;

/// One guarded refinement step.
///
/// # Errors
///
/// Returns [`Diverged`] when `3 − v·x²` is non-positive; the caller must
/// fall back to its previous estimate rather than propagate the step.
pub fn refine(v: Q5_10, x: Q5_10) -> Result<Q5_10, Diverged> {
    newton_inv_sqrt_step(v, x).ok_or(Diverged)
}

/// The pipelined inverse-sqrt unit.
#[derive(Debug, Clone)]
pub struct InvSqrtUnit {
    seeds: &'static InvSqrtSeedLut,
    line: DelayLine<InFlight>,
}

impl InvSqrtUnit {
    /// A unit using the shared seed table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seeds: InvSqrtSeedLut::shared(),
            line: DelayLine::new(LATENCY),
        }
    }

    /// Advance one clock; valid-in at cycle t yields valid-out at t + 8.
    pub fn tick(&mut self, input: Option<VarianceToken>) -> Option<InvSqrtOutput> {
        let entering = input.map(|tok| {
            // Epsilon floor guards the degenerate zero/negative variance.
            let v = if tok.variance.raw() < 1 {
                Q5_10::EPSILON
            } else {
                tok.variance
            };
            InFlight {
                v,
                x: self.seeds.lookup(v),
                mean: tok.mean,
                diff: tok.diff,
                converged: true,
            }
        });

        let out = self.line.tick(entering);

        for stage in NEWTON_STAGES {
            if let Some(s) = self.line.stage_mut(stage) {
                if s.converged {
                    match refine(s.v, s.x) {
                        Ok(x) => s.x = x,
                        Err(Diverged) => s.converged = false,
                    }
                }
            }
        }

        out.map(|s| InvSqrtOutput {
            inv_sigma: s.x,
            mean: s.mean,
            diff: s.diff,
            converged: s.converged,
        })
    }

    /// Drop all in-flight tokens (global reset).
    pub fn reset(&mut self) {
        self.line.flush();
    }
}

impl Default for InvSqrtUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(v: f32) -> Q5_10 {
        Q5_10::from_f32(v)
    }

    fn token(variance: f32) -> VarianceToken {
        VarianceToken {
            variance: fx(variance),
            mean: Q5_10::ZERO,
            diff: vec![Q5_10::ZERO; 16],
        }
    }

    fn run_one(variance: f32) -> InvSqrtOutput {
        let mut unit = InvSqrtUnit::new();
        let mut input = Some(token(variance));
        for cycle in 0..LATENCY + 2 {
            if let Some(out) = unit.tick(input.take()) {
                assert_eq!(cycle, LATENCY, "output must appear exactly at latency");
                return out;
            }
        }
        panic!("no output within latency window");
    }

    #[track_caller]
    fn assert_rel_err(variance: f32, expected: f32, tolerance: f32) {
        let out = run_one(variance);
        let got = out.inv_sigma.to_f32();
        let rel = (got - expected).abs() / expected.max(0.001);
        assert!(
            rel <= tolerance,
            "1/sqrt({variance}): got {got}, expected {expected}, rel err {rel:.3}"
        );
    }

    #[test]
    fn unity_variance() {
        // Two Newton iterations: allow 20 % relative error.
        assert_rel_err(1.0, 1.0, 0.2);
    }

    #[test]
    fn quarter_variance() {
        assert_rel_err(0.25, 2.0, 0.25);
    }

    #[test]
    fn four_variance() {
        assert_rel_err(4.0, 0.5, 0.25);
    }

    #[test]
    fn extreme_variances_stay_finite_and_positive() {
        for variance in [0.01, 0.1, 10.0, 16.0, 30.0] {
            let out = run_one(variance);
            assert!(
                out.inv_sigma.raw() > 0,
                "1/sqrt({variance}) produced non-positive {}",
                out.inv_sigma.to_f32()
            );
        }
    }

    #[test]
    fn zero_variance_is_epsilon_floored() {
        let out = run_one(0.0);
        // True 1/sqrt(epsilon) is 32; the bucket-granular seed bounds how
        // far two iterations get, but the result must stay large and
        // positive rather than dividing by zero.
        assert!(out.inv_sigma.to_f32() > 2.0);
    }

    #[test]
    fn payload_passes_through_unmodified() {
        let mut unit = InvSqrtUnit::new();
        let diffs: Vec<Q5_10> = [0.25, 0.5, 0.75, 1.0]
            .iter()
            .map(|&d| fx(d))
            .chain(std::iter::repeat(Q5_10::ZERO).take(12))
            .collect();
        let tok = VarianceToken {
            variance: fx(1.0),
            mean: fx(1.5),
            diff: diffs.clone(),
        };
        let mut input = Some(tok);
        for _ in 0..LATENCY {
            if let Some(out) = unit.tick(input.take()) {
                assert_eq!(out.mean, fx(1.5));
                assert_eq!(out.diff, diffs);
                return;
            }
        }
        let out = unit.tick(None).expect("output at latency");
        assert_eq!(out.mean, fx(1.5));
        assert_eq!(out.diff, diffs);
    }

    #[test]
    fn streaming_throughput_one_per_cycle() {
        let mut unit = InvSqrtUnit::new();
        let variances = [1.0, 4.0, 0.25];
        let mut out_cycles = Vec::new();
        for cycle in 0..LATENCY + 6 {
            let input = variances.get(cycle).map(|&v| token(v));
            if unit.tick(input).is_some() {
                out_cycles.push(cycle);
            }
        }
        assert_eq!(out_cycles, vec![LATENCY, LATENCY + 1, LATENCY + 2]);
    }
}
