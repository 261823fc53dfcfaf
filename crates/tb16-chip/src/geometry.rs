//! Array geometry and cycle arithmetic.
//!
//! The reference device processes a 16-token block: every matrix on the
//! datapath is 16×16 Q5.10. A 64×64 tile variant exists for the wide host
//! link; both share the same dataflow, so the dimension is a parameter
//! everywhere in `tb16-sim` and only the two named sizes are wired up.

/// Tokens per block = rows per matrix = model width.
pub const SEQ_LEN: usize = 16;

/// Vocabulary size of the reference device (one embedding row per token id).
pub const VOCAB: usize = 16;

/// Edge length of the wide tile variant.
pub const TILE_64: usize = 64;

/// Bytes per element on the host link (two, MSB first).
pub const ELEMENT_BYTES: usize = 2;

/// Systolic-array timing for an N×N output-stationary multiply.
///
/// Operands enter skewed along the west and north edges; cell (i, j)
/// receives its last operand pair at cycle `i + j + N - 1`, so the final
/// accumulator settles one cycle later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystolicTiming {
    /// Array edge length.
    pub n: usize,
}

impl SystolicTiming {
    /// Timing for an N×N array.
    #[must_use]
    pub const fn new(n: usize) -> Self {
        Self { n }
    }

    /// Cycles before the far corner cell sees its first operand pair.
    #[must_use]
    pub const fn fill_cycles(&self) -> usize {
        2 * (self.n - 1)
    }

    /// Active cycles for a complete N×N×N product (fill + compute).
    #[must_use]
    pub const fn total_cycles(&self) -> usize {
        3 * self.n - 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_block_timing() {
        let t = SystolicTiming::new(SEQ_LEN);
        assert_eq!(t.fill_cycles(), 30);
        assert_eq!(t.total_cycles(), 46);
    }

    #[test]
    fn tile_variant_timing() {
        let t = SystolicTiming::new(TILE_64);
        assert_eq!(t.total_cycles(), 190);
    }
}
