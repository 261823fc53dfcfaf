//! Systolic processing element — one multiply-accumulate cell.

use tb16_chip::fixed::Q5_10;

/// A single MAC cell of the systolic array.
///
/// Operands pass through to the east/south neighbours one cycle after
/// arriving, regardless of `enable`; the accumulator only moves on an
/// enabled cycle. `clear` zeroes the accumulator unconditionally and takes
/// priority over accumulation — it is asserted the cycle a new dot-product
/// sequence begins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingElement {
    a_out: Q5_10,
    b_out: Q5_10,
    acc: Q5_10,
}

impl ProcessingElement {
    /// A cell with cleared registers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one clock with the given operand inputs and controls.
    pub fn tick(&mut self, a_in: Q5_10, b_in: Q5_10, enable: bool, clear: bool) {
        if clear {
            self.acc = Q5_10::ZERO;
        } else if enable {
            self.acc = self.acc.saturating_add(a_in.saturating_mul(b_in));
        }
        self.a_out = a_in;
        self.b_out = b_in;
    }

    /// Operand forwarded to the east neighbour.
    #[must_use]
    pub const fn a_out(&self) -> Q5_10 {
        self.a_out
    }

    /// Operand forwarded to the south neighbour.
    #[must_use]
    pub const fn b_out(&self) -> Q5_10 {
        self.b_out
    }

    /// Running accumulator.
    #[must_use]
    pub const fn acc(&self) -> Q5_10 {
        self.acc
    }
}
