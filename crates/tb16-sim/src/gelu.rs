//! Single-cycle GELU ROM unit.
//!
//! Address decode (operand high byte) plus ROM read — no iteration, no
//! further stages. Accuracy is bounded by the 0.25-wide address buckets,
//! not the GELU formula.

use crate::pipeline::DelayLine;
use tb16_chip::fixed::Q5_10;
use tb16_chip::rom::GeluRom;

/// ROM read latency.
pub const LATENCY: usize = 1;

/// The elementwise GELU unit.
#[derive(Debug, Clone)]
pub struct GeluUnit {
    rom: &'static GeluRom,
    line: DelayLine<Vec<Q5_10>>,
}

impl GeluUnit {
    /// A unit using the shared ROM.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rom: GeluRom::shared(),
            line: DelayLine::new(LATENCY),
        }
    }

    /// Advance one clock; a row fed at cycle t emerges activated at t + 1.
    pub fn tick(&mut self, input: Option<&[Q5_10]>) -> Option<Vec<Q5_10>> {
        let activated =
            input.map(|row| row.iter().map(|&x| self.rom.lookup(x)).collect::<Vec<_>>());
        self.line.tick(activated)
    }

    /// Drop the in-flight row (global reset).
    pub fn reset(&mut self) {
        self.line.flush();
    }
}

impl Default for GeluUnit {
    fn default() -> Self {
        Self::new()
    }
}
