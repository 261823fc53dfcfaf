//! LUT/ROM contents and the procedures that generate them.
//!
//! Three tables sit on the Q5.10 datapath, each 256 entries deep and
//! indexed by the high byte of a Q5.10 operand (one entry per 0.25-wide
//! input bucket):
//!
//! | Table | Entry | Consumer |
//! |-------|-------|----------|
//! | [`ExpLut`] | `exp(clamp(x, -8, 8))` | Softmax frontend |
//! | [`GeluRom`] | `GELU(addr << 8)` | GELU unit |
//! | [`InvSqrtSeedLut`] | Newton seed, found by per-bucket search | inverse-sqrt unit |
//!
//! Tables are materialized once per process and only indexed afterwards;
//! the runtime never regenerates them. [`dump_hex`](ExpLut::dump_hex)
//! emits the same contents as the Verilog-style hex file the synthesis
//! flow consumes (one 4-digit entry per line, `$readmemh` layout).
//!
//! A Q8.8 exponential table from the earlier utility lineage is kept for
//! dump parity ([`exp_q8_8_table`]); nothing on the Q5.10 datapath may
//! index it.

use crate::fixed::{Q5_10, Q8_8};
use std::sync::OnceLock;

/// Entries per table: one per high-byte address.
pub const TABLE_DEPTH: usize = 256;

/// High-byte address of a Q5.10 operand (`raw[15:8]`).
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn high_byte(value: Q5_10) -> usize {
    ((value.raw() as u16) >> 8) as usize
}

/// The Q5.10 value a high-byte address represents (`addr << 8`, signed).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const fn address_value(addr: usize) -> Q5_10 {
    Q5_10::from_raw(((addr as u16) << 8) as i16)
}

fn dump_hex_entries(entries: &[Q5_10; TABLE_DEPTH]) -> String {
    let mut out = String::with_capacity(TABLE_DEPTH * 5);
    for e in entries {
        #[allow(clippy::cast_sign_loss)]
        let word = e.raw() as u16;
        out.push_str(&format!("{word:04x}\n"));
    }
    out
}

// ── Exponential LUT ──────────────────────────────────────────────────────────

/// Exponential lookup table for the Softmax frontend.
///
/// The input domain is restricted to [-8, 8] at generation time; addresses
/// outside that band hold the clamped endpoint's exponential. Entries
/// saturate at the Q5.10 maximum (`exp(x)` exceeds 32 from x ≈ 3.47 up).
#[derive(Debug, Clone)]
pub struct ExpLut {
    entries: [Q5_10; TABLE_DEPTH],
}

impl ExpLut {
    /// Generate the table.
    #[must_use]
    pub fn generate() -> Self {
        let mut entries = [Q5_10::ZERO; TABLE_DEPTH];
        for (addr, entry) in entries.iter_mut().enumerate() {
            let x = f64::from(address_value(addr).to_f32()).clamp(-8.0, 8.0);
            #[allow(clippy::cast_possible_truncation)]
            {
                *entry = Q5_10::from_f32(x.exp() as f32);
            }
        }
        Self { entries }
    }

    /// Process-wide shared table.
    pub fn shared() -> &'static Self {
        static LUT: OnceLock<ExpLut> = OnceLock::new();
        LUT.get_or_init(Self::generate)
    }

    /// `exp` of the operand's bucket.
    #[must_use]
    pub fn lookup(&self, x: Q5_10) -> Q5_10 {
        self.entries[high_byte(x)]
    }

    /// Verilog-style hex dump, one entry per line.
    #[must_use]
    pub fn dump_hex(&self) -> String {
        dump_hex_entries(&self.entries)
    }
}

// ── GELU ROM ─────────────────────────────────────────────────────────────────

/// GELU activation ROM.
///
/// `rom[addr] = GELU(addr << 8)` in Q5.10 — a piecewise-constant
/// approximation over 0.25-wide buckets; accuracy is bounded by that
/// quantization, not by the GELU formula.
#[derive(Debug, Clone)]
pub struct GeluRom {
    entries: [Q5_10; TABLE_DEPTH],
}

/// GELU, tanh form.
#[must_use]
pub fn gelu_reference(x: f64) -> f64 {
    let sqrt_2_over_pi = (2.0 / std::f64::consts::PI).sqrt();
    0.5 * x * (1.0 + (sqrt_2_over_pi * (x + 0.044_715 * x * x * x)).tanh())
}

impl GeluRom {
    /// Generate the ROM.
    #[must_use]
    pub fn generate() -> Self {
        let mut entries = [Q5_10::ZERO; TABLE_DEPTH];
        for (addr, entry) in entries.iter_mut().enumerate() {
            let x = f64::from(address_value(addr).to_f32());
            #[allow(clippy::cast_possible_truncation)]
            {
                *entry = Q5_10::from_f32(gelu_reference(x) as f32);
            }
        }
        Self { entries }
    }

    /// Process-wide shared ROM.
    pub fn shared() -> &'static Self {
        static ROM: OnceLock<GeluRom> = OnceLock::new();
        ROM.get_or_init(Self::generate)
    }

    /// `GELU` of the operand's bucket.
    #[must_use]
    pub fn lookup(&self, x: Q5_10) -> Q5_10 {
        self.entries[high_byte(x)]
    }

    /// Verilog-style hex dump, one entry per line.
    #[must_use]
    pub fn dump_hex(&self) -> String {
        dump_hex_entries(&self.entries)
    }
}

// ── Newton-Raphson inverse square root ───────────────────────────────────────

/// One Newton-Raphson step `x' = x·(3 − v·x²)/2` toward `1/√v`, entirely
/// in Q5.10.
///
/// Returns `None` when the `3 − v·x²` term goes non-positive — the
/// iteration is diverging and the caller must substitute a clamped
/// fallback rather than let a negative or runaway value propagate.
#[must_use]
pub fn newton_inv_sqrt_step(v: Q5_10, x: Q5_10) -> Option<Q5_10> {
    let three = Q5_10::from_raw(3 << 10);
    let x_sq = x.saturating_mul(x);
    let term = three.saturating_sub(v.saturating_mul(x_sq));
    if term.raw() <= 0 {
        return None;
    }
    Some(Q5_10::from_raw(x.saturating_mul(term).raw() >> 1))
}

/// Seed table for the inverse-sqrt unit, indexed by the high byte of the
/// (epsilon-floored, therefore non-negative) variance.
///
/// The seed boundaries have no closed form; each bucket's entry is found
/// empirically — sweep log-spaced candidates, run the two fixed-point
/// Newton iterations against the bucket midpoint, keep the candidate with
/// minimal error. Candidates that trip the divergence guard are rejected
/// during the sweep.
#[derive(Debug, Clone)]
pub struct InvSqrtSeedLut {
    entries: [Q5_10; TABLE_DEPTH],
}

impl InvSqrtSeedLut {
    /// Run the per-bucket seed search and build the table.
    #[must_use]
    pub fn generate() -> Self {
        let mut entries = [Q5_10::ONE; TABLE_DEPTH];
        for (addr, entry) in entries.iter_mut().enumerate() {
            *entry = Self::search_bucket(addr);
        }
        Self { entries }
    }

    /// Process-wide shared table.
    pub fn shared() -> &'static Self {
        static LUT: OnceLock<InvSqrtSeedLut> = OnceLock::new();
        LUT.get_or_init(Self::generate)
    }

    /// Seed for the operand's bucket.
    #[must_use]
    pub fn lookup(&self, v: Q5_10) -> Q5_10 {
        self.entries[high_byte(v)]
    }

    /// Verilog-style hex dump, one entry per line.
    #[must_use]
    pub fn dump_hex(&self) -> String {
        dump_hex_entries(&self.entries)
    }

    /// Representative variance for a bucket: its midpoint, floored at one
    /// LSB. Addresses with the sign bit set cannot occur after the epsilon
    /// floor; they alias to the first bucket so the table stays total.
    fn bucket_midpoint(addr: usize) -> Q5_10 {
        let addr = if addr >= TABLE_DEPTH / 2 { 0 } else { addr };
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let raw = (((addr as u16) << 8) | 0x80) as i16;
        Q5_10::from_raw(raw.max(1))
    }

    fn search_bucket(addr: usize) -> Q5_10 {
        let v = Self::bucket_midpoint(addr);
        let target = 1.0 / f64::from(v.to_f32()).sqrt();

        let mut best: Option<(f64, Q5_10)> = None;
        for step in 0..=60 {
            let exponent = f64::from(step) / 4.0;
            #[allow(clippy::cast_possible_truncation)]
            let raw = 2.0_f64.powf(exponent).round() as i16;
            let seed = Q5_10::from_raw(raw);

            let Some(x1) = newton_inv_sqrt_step(v, seed) else {
                continue;
            };
            let Some(x2) = newton_inv_sqrt_step(v, x1) else {
                continue;
            };

            let err = (f64::from(x2.to_f32()) - target).abs();
            if best.map_or(true, |(e, _)| err < e) {
                best = Some((err, seed));
            }
        }

        // Every bucket has at least one converging candidate (the exact
        // reciprocal root converges trivially), so the fallback arm is
        // only reachable if the sweep grid were emptied.
        #[allow(clippy::cast_possible_truncation)]
        best.map_or_else(|| Q5_10::from_f32(target as f32), |(_, seed)| seed)
    }
}

// ── Q8.8 exponential table (alternate lineage) ───────────────────────────────

/// Q8.8 exponential table: index i maps linearly onto x ∈ [-8, 8].
///
/// Kept for the alternate LUT-generation utility; the Q5.10 datapath never
/// indexes it.
#[must_use]
pub fn exp_q8_8_table() -> Vec<Q8_8> {
    (0..TABLE_DEPTH)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let x = (i as f64 / 255.0) * 16.0 - 8.0;
            #[allow(clippy::cast_possible_truncation)]
            Q8_8::from_f32(x.exp().min(255.996) as f32)
        })
        .collect()
}

/// Hex dump of the Q8.8 exponential table.
#[must_use]
pub fn dump_exp_q8_8_hex() -> String {
    let mut out = String::with_capacity(TABLE_DEPTH * 5);
    for e in exp_q8_8_table() {
        #[allow(clippy::cast_sign_loss)]
        let word = e.raw() as u16;
        out.push_str(&format!("{word:04x}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_byte_addressing_matches_hardware() {
        assert_eq!(high_byte(Q5_10::from_f32(0.0)), 0x00);
        assert_eq!(high_byte(Q5_10::from_f32(1.0)), 0x04);
        assert_eq!(high_byte(Q5_10::from_f32(2.0)), 0x08);
        assert_eq!(high_byte(Q5_10::from_f32(-1.0)), 0xFC);
        assert_eq!(high_byte(Q5_10::from_f32(-4.0)), 0xF0);
    }

    #[test]
    fn exp_lut_key_points() {
        let lut = ExpLut::generate();
        assert_eq!(lut.lookup(Q5_10::ZERO), Q5_10::from_f32(1.0));
        let e1 = lut.lookup(Q5_10::from_f32(1.0)).to_f32();
        assert!((e1 - 2.718).abs() < 0.01, "exp(1.0) bucket gave {e1}");
        let em1 = lut.lookup(Q5_10::from_f32(-1.0)).to_f32();
        assert!((em1 - 0.368).abs() < 0.01, "exp(-1.0) bucket gave {em1}");
    }

    #[test]
    fn exp_lut_saturates_large_arguments() {
        let lut = ExpLut::generate();
        // exp(8) ≈ 2981, far past the Q5.10 maximum.
        assert_eq!(lut.lookup(Q5_10::from_f32(8.0)), Q5_10::MAX);
    }

    #[test]
    fn gelu_rom_key_points() {
        let rom = GeluRom::generate();
        let cases = [(0.0, 0.0), (1.0, 0.841), (-1.0, -0.159), (2.0, 1.955)];
        for (x, want) in cases {
            let got = rom.lookup(Q5_10::from_f32(x)).to_f32();
            assert!(
                (got - want).abs() < 0.2,
                "GELU({x}) bucket gave {got}, wanted ≈{want}"
            );
        }
    }

    #[test]
    fn gelu_rom_negative_tail_is_near_zero() {
        let rom = GeluRom::generate();
        let far = rom.lookup(Q5_10::from_f32(-8.0)).to_f32();
        assert!(far.abs() < 0.01, "GELU(-8) bucket gave {far}");
    }

    #[test]
    fn newton_step_converges_from_good_seed() {
        let v = Q5_10::from_f32(1.0);
        let x1 = newton_inv_sqrt_step(v, Q5_10::from_f32(1.2)).expect("step 1");
        let x2 = newton_inv_sqrt_step(v, x1).expect("step 2");
        assert!((x2.to_f32() - 1.0).abs() < 0.1);
    }

    #[test]
    fn newton_step_flags_divergence() {
        // v·x² far past 3: the term goes non-positive.
        let v = Q5_10::from_f32(16.0);
        assert!(newton_inv_sqrt_step(v, Q5_10::from_f32(4.0)).is_none());
    }

    #[test]
    fn every_seed_survives_its_own_bucket() {
        let lut = InvSqrtSeedLut::generate();
        for addr in 0..TABLE_DEPTH / 2 {
            let v = InvSqrtSeedLut::bucket_midpoint(addr);
            let seed = lut.entries[addr];
            let x1 = newton_inv_sqrt_step(v, seed)
                .unwrap_or_else(|| panic!("bucket {addr}: seed diverged at step 1"));
            assert!(
                newton_inv_sqrt_step(v, x1).is_some(),
                "bucket {addr}: seed diverged at step 2"
            );
        }
    }

    #[test]
    fn hex_dump_shape() {
        let dump = ExpLut::generate().dump_hex();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), TABLE_DEPTH);
        assert!(lines.iter().all(|l| l.len() == 4));
    }

    #[test]
    fn q8_8_table_endpoints() {
        let t = exp_q8_8_table();
        assert_eq!(t.len(), TABLE_DEPTH);
        // exp(-8) ≈ 0.000335 rounds to zero in Q8.8; exp(8) clamps.
        assert_eq!(t[0].raw(), 0);
        assert_eq!(t[255], Q8_8::MAX);
    }
}
