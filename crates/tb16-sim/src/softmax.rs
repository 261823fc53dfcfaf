//! Two-stage Softmax pipeline.
//!
//! ```text
//! row ──▶ Frontend(6) ──▶ Backend(17) ──▶ probabilities
//!          exp LUT + Σ      1/Σ, then exp_i·1/Σ
//! ```
//!
//! The frontend looks up `exp(x_i)` for every element of a row and
//! accumulates the widened running sum; the backend computes the
//! reciprocal with a shift-subtract restoring divider and scales each
//! exponential. The backend consumes a row only on the frontend's
//! valid-out — the handshake is structural, not a same-cycle coincidence.

use crate::pipeline::DelayLine;
use tb16_chip::fixed::{saturate_i32, Q5_10};
use tb16_chip::rom::ExpLut;

/// Frontend pipeline depth.
pub const FRONT_LATENCY: usize = 6;
/// Backend (reciprocal divider) pipeline depth.
pub const BACK_LATENCY: usize = 17;
/// Whole-pipeline latency.
pub const LATENCY: usize = FRONT_LATENCY + BACK_LATENCY;

/// Reciprocal fixed-point position: `recip = 2^26 / sum`, so that
/// `(exp · recip) >> 16` equals `exp · 1024 / sum`.
const RECIP_SHIFT: u32 = 26;

/// A row of exponentials with their widened sum.
#[derive(Debug, Clone)]
pub struct ExpRow {
    /// `exp(x_i)` per element, Q5.10.
    pub exp: Vec<Q5_10>,
    /// Raw Q5.10 sum in a wide accumulator (16·MAX fits with headroom).
    pub sum: u32,
}

/// Exponentiation-LUT frontend.
#[derive(Debug, Clone)]
pub struct SoftmaxFrontend {
    lut: &'static ExpLut,
    line: DelayLine<ExpRow>,
}

impl SoftmaxFrontend {
    /// A frontend using the shared exponential LUT.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lut: ExpLut::shared(),
            line: DelayLine::new(FRONT_LATENCY),
        }
    }

    /// Advance one clock; valid-in at cycle t yields valid-out at t + 6.
    pub fn tick(&mut self, input: Option<&[Q5_10]>) -> Option<ExpRow> {
        let entering = input.map(|row| {
            let exp: Vec<Q5_10> = row.iter().map(|&x| self.lut.lookup(x)).collect();
            #[allow(clippy::cast_sign_loss)]
            let sum = exp.iter().map(|e| u32::from(e.raw() as u16)).sum();
            ExpRow { exp, sum }
        });
        self.line.tick(entering)
    }

    /// Drop in-flight rows (global reset).
    pub fn reset(&mut self) {
        self.line.flush();
    }
}

impl Default for SoftmaxFrontend {
    fn default() -> Self {
        Self::new()
    }
}

/// Shift-subtract restoring division, one quotient bit per iteration —
/// the same dataflow the pipelined divider implements in silicon.
#[must_use]
pub fn restoring_divide(numerator: u64, divisor: u64, quotient_bits: u32) -> u64 {
    debug_assert!(divisor > 0, "divider requires a non-zero divisor");
    let mut remainder: u64 = 0;
    let mut quotient: u64 = 0;
    for bit in (0..quotient_bits).rev() {
        remainder = (remainder << 1) | ((numerator >> bit) & 1);
        quotient <<= 1;
        if remainder >= divisor {
            remainder -= divisor;
            quotient |= 1;
        }
    }
    quotient
}

/// Pipelined reciprocal-divide backend.
#[derive(Debug, Clone)]
pub struct SoftmaxBackend {
    line: DelayLine<Vec<Q5_10>>,
}

impl SoftmaxBackend {
    /// An empty backend pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            line: DelayLine::new(BACK_LATENCY),
        }
    }

    /// The divider's reciprocal term for a row sum.
    ///
    /// A zero sum (every exponential underflowed to zero) is floored to
    /// one divisor LSB — the same clamped-fallback discipline as the
    /// inverse-sqrt divergence guard, instead of an undefined divide.
    #[must_use]
    pub fn reciprocal(sum: u32) -> u64 {
        restoring_divide(1 << RECIP_SHIFT, u64::from(sum.max(1)), RECIP_SHIFT + 1)
    }

    fn scale(row: &ExpRow) -> Vec<Q5_10> {
        let recip = Self::reciprocal(row.sum);
        row.exp
            .iter()
            .map(|e| {
                #[allow(clippy::cast_sign_loss)]
                let product = u64::from(e.raw() as u16) * recip;
                #[allow(clippy::cast_possible_truncation)]
                Q5_10::from_raw(saturate_i32((product >> 16) as i32))
            })
            .collect()
    }

    /// Advance one clock; valid-in at cycle t yields valid-out at t + 17.
    pub fn tick(&mut self, input: Option<ExpRow>) -> Option<Vec<Q5_10>> {
        self.line.tick(input.map(|row| Self::scale(&row)))
    }

    /// Drop in-flight rows (global reset).
    pub fn reset(&mut self) {
        self.line.flush();
    }
}

impl Default for SoftmaxBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Frontend and backend chained behind the valid handshake.
#[derive(Debug, Clone)]
pub struct SoftmaxPipeline {
    front: SoftmaxFrontend,
    back: SoftmaxBackend,
}

impl SoftmaxPipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            front: SoftmaxFrontend::new(),
            back: SoftmaxBackend::new(),
        }
    }

    /// Advance one clock; valid-in at cycle t yields valid-out at t + 23.
    pub fn tick(&mut self, input: Option<&[Q5_10]>) -> Option<Vec<Q5_10>> {
        let summed = self.front.tick(input);
        self.back.tick(summed)
    }

    /// Drop every in-flight row (global reset).
    pub fn reset(&mut self) {
        self.front.reset();
        self.back.reset();
    }
}

impl Default for SoftmaxPipeline {
    fn default() -> Self {
        Self::new()
    }
}
