//! Block-level controller: a 24-phase FSM sequencing the compute units
//! over one transformer block.
//!
//! Exactly one sub-unit is active per phase. The controller asserts that
//! unit's start on phase entry and advances only on its completion event;
//! transitions live in an explicit table keyed by (phase, event), so a
//! completion signal arriving in any other phase is a detectable hazard
//! (two units pulsing done in the same cycle cannot be represented at
//! all). Intermediate matrices are single-writer by construction: no phase
//! writes storage another phase still reads.

use crate::error::{Result, TbError};
use crate::gelu::GeluUnit;
use crate::layernorm::LayerNormPipeline;
use crate::softmax::SoftmaxPipeline;
use crate::systolic::MatMulUnit;
use tb16_chip::fixed::Q5_10;
use tb16_chip::matrix::Matrix;
use tb16_model::WeightSet;

/// Controller phase. Discriminants match the silicon state encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)] // Phase names are the documentation.
pub enum Phase {
    Idle = 0,
    Embedding = 1,
    LayernormInput = 2,
    SaveLnInput = 3,
    ComputeQ = 4,
    SaveQ = 5,
    ComputeK = 6,
    SaveK = 7,
    ComputeV = 8,
    SaveV = 9,
    ComputeScores = 10,
    SoftmaxScores = 11,
    ComputeAttn = 12,
    AddResidual1 = 13,
    Layernorm1 = 14,
    SaveLn1 = 15,
    ComputeFf1 = 16,
    GeluFf1 = 17,
    ComputeFf2 = 18,
    AddResidual2 = 19,
    Layernorm2 = 20,
    ComputeOutput = 21,
    SoftmaxOutput = 22,
    Done = 23,
}

impl Phase {
    /// Phase name as the silicon debug tooling prints it.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Embedding => "EMBEDDING",
            Self::LayernormInput => "LAYERNORM_INPUT",
            Self::SaveLnInput => "SAVE_LN_INPUT",
            Self::ComputeQ => "COMPUTE_Q",
            Self::SaveQ => "SAVE_Q",
            Self::ComputeK => "COMPUTE_K",
            Self::SaveK => "SAVE_K",
            Self::ComputeV => "COMPUTE_V",
            Self::SaveV => "SAVE_V",
            Self::ComputeScores => "COMPUTE_SCORES",
            Self::SoftmaxScores => "SOFTMAX_SCORES",
            Self::ComputeAttn => "COMPUTE_ATTN",
            Self::AddResidual1 => "ADD_RESIDUAL_1",
            Self::Layernorm1 => "LAYERNORM_1",
            Self::SaveLn1 => "SAVE_LN1",
            Self::ComputeFf1 => "COMPUTE_FF1",
            Self::GeluFf1 => "GELU_FF1",
            Self::ComputeFf2 => "COMPUTE_FF2",
            Self::AddResidual2 => "ADD_RESIDUAL_2",
            Self::Layernorm2 => "LAYERNORM_2",
            Self::ComputeOutput => "COMPUTE_OUTPUT",
            Self::SoftmaxOutput => "SOFTMAX_OUTPUT",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sub-unit completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitEvent {
    /// Systolic multiplier latched its product.
    MatMulDone,
    /// LayerNorm pipeline emitted its last row.
    LayerNormDone,
    /// Softmax pipeline emitted its last row.
    SoftmaxDone,
    /// GELU unit emitted its last row.
    GeluDone,
    /// Controller-internal copy (embedding, save, residual add) finished.
    CopyDone,
}

impl UnitEvent {
    const fn name(self) -> &'static str {
        match self {
            Self::MatMulDone => "matmul_done",
            Self::LayerNormDone => "layernorm_done",
            Self::SoftmaxDone => "softmax_done",
            Self::GeluDone => "gelu_done",
            Self::CopyDone => "copy_done",
        }
    }
}

/// The transition table.
///
/// # Errors
///
/// Returns [`TbError::PhaseHazard`] for any (phase, event) pair without a
/// table entry — the structural encoding of "a done pulse from the wrong
/// unit is a defect, not a state change".
pub fn next_phase(phase: Phase, event: UnitEvent) -> Result<Phase> {
    use {Phase as P, UnitEvent as E};
    let next = match (phase, event) {
        (P::Embedding, E::CopyDone) => P::LayernormInput,
        (P::LayernormInput, E::LayerNormDone) => P::SaveLnInput,
        (P::SaveLnInput, E::CopyDone) => P::ComputeQ,
        (P::ComputeQ, E::MatMulDone) => P::SaveQ,
        (P::SaveQ, E::CopyDone) => P::ComputeK,
        (P::ComputeK, E::MatMulDone) => P::SaveK,
        (P::SaveK, E::CopyDone) => P::ComputeV,
        (P::ComputeV, E::MatMulDone) => P::SaveV,
        (P::SaveV, E::CopyDone) => P::ComputeScores,
        (P::ComputeScores, E::MatMulDone) => P::SoftmaxScores,
        (P::SoftmaxScores, E::SoftmaxDone) => P::ComputeAttn,
        (P::ComputeAttn, E::MatMulDone) => P::AddResidual1,
        (P::AddResidual1, E::CopyDone) => P::Layernorm1,
        (P::Layernorm1, E::LayerNormDone) => P::SaveLn1,
        (P::SaveLn1, E::CopyDone) => P::ComputeFf1,
        (P::ComputeFf1, E::MatMulDone) => P::GeluFf1,
        (P::GeluFf1, E::GeluDone) => P::ComputeFf2,
        (P::ComputeFf2, E::MatMulDone) => P::AddResidual2,
        (P::AddResidual2, E::CopyDone) => P::Layernorm2,
        (P::Layernorm2, E::LayerNormDone) => P::ComputeOutput,
        (P::ComputeOutput, E::MatMulDone) => P::SoftmaxOutput,
        (P::SoftmaxOutput, E::SoftmaxDone) => P::Done,
        (phase, event) => {
            return Err(TbError::PhaseHazard {
                phase: phase.name(),
                event: event.name(),
            })
        }
    };
    Ok(next)
}

/// Intermediate matrix storage between phases. One writer at a time by
/// construction of the FSM.
#[derive(Debug, Clone)]
struct Intermediates {
    input: Matrix,
    ln_input: Matrix,
    q: Matrix,
    k: Matrix,
    v: Matrix,
    scores: Matrix,
    attn_weights: Matrix,
    attn: Matrix,
    resid1: Matrix,
    ln1: Matrix,
    ff1: Matrix,
    gelu_ff1: Matrix,
    ff2: Matrix,
    resid2: Matrix,
    ln2: Matrix,
    logits: Matrix,
    probs: Matrix,
}

impl Intermediates {
    fn zeroed(dim: usize) -> Self {
        let z = || Matrix::zeroed(dim, dim);
        Self {
            input: z(),
            ln_input: z(),
            q: z(),
            k: z(),
            v: z(),
            scores: z(),
            attn_weights: z(),
            attn: z(),
            resid1: z(),
            ln1: z(),
            ff1: z(),
            gelu_ff1: z(),
            ff2: z(),
            resid2: z(),
            ln2: z(),
            logits: z(),
            probs: z(),
        }
    }
}

/// The block controller: weights, compute units, intermediate storage,
/// and the phase register.
#[derive(Debug, Clone)]
pub struct BlockController {
    dim: usize,
    phase: Phase,
    weights: WeightSet,
    tokens: Vec<u8>,
    store: Intermediates,
    matmul: MatMulUnit,
    layernorm: LayerNormPipeline,
    softmax: SoftmaxPipeline,
    gelu: GeluUnit,
    /// Rows fed into the active streaming unit this phase.
    rows_fed: usize,
    /// Rows collected from the active streaming unit this phase.
    rows_done: usize,
    /// Streaming unit output, committed at the phase's save point.
    stream_out: Matrix,
    cycle: u64,
}

impl BlockController {
    /// A controller in IDLE holding the given weight set.
    #[must_use]
    pub fn new(weights: WeightSet) -> Self {
        let dim = weights.dim;
        Self {
            dim,
            phase: Phase::Idle,
            weights,
            tokens: Vec::new(),
            store: Intermediates::zeroed(dim),
            matmul: MatMulUnit::new(dim),
            layernorm: LayerNormPipeline::new(dim),
            softmax: SoftmaxPipeline::new(),
            gelu: GeluUnit::new(),
            rows_fed: 0,
            rows_done: 0,
            stream_out: Matrix::zeroed(dim, dim),
            cycle: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Cycles elapsed since reset.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Matrix dimension.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// True once the block result is valid.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// The final softmax output, valid in DONE.
    #[must_use]
    pub fn probabilities(&self) -> Option<&Matrix> {
        self.is_done().then_some(&self.store.probs)
    }

    /// Begin a block over the given token ids.
    ///
    /// Legal only from IDLE or DONE (DONE is terminal until the next
    /// external start).
    ///
    /// # Errors
    ///
    /// Returns an error mid-computation, on a wrong token count, or on a
    /// token id outside the embedding table.
    pub fn start(&mut self, tokens: &[u8]) -> Result<()> {
        if self.phase != Phase::Idle && self.phase != Phase::Done {
            return Err(TbError::invalid_state(format!(
                "start asserted in {}",
                self.phase
            )));
        }
        if tokens.len() != self.dim {
            return Err(TbError::DimensionMismatch {
                got: tokens.len(),
                expected: self.dim,
            });
        }
        if let Some(&bad) = tokens.iter().find(|&&t| usize::from(t) >= self.dim) {
            return Err(TbError::invalid_state(format!(
                "token id {bad} outside embedding table"
            )));
        }

        self.tokens = tokens.to_vec();
        self.store = Intermediates::zeroed(self.dim);
        self.stream_out = Matrix::zeroed(self.dim, self.dim);
        tracing::info!("block start: {} tokens", tokens.len());
        self.enter(Phase::Embedding)
    }

    /// Global reset: back to IDLE, all in-flight pipeline tokens dropped.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.layernorm.reset();
        self.softmax.reset();
        self.gelu.reset();
        self.matmul = MatMulUnit::new(self.dim);
        self.rows_fed = 0;
        self.rows_done = 0;
        self.cycle = 0;
        tracing::debug!("controller reset");
    }

    /// Advance one clock.
    ///
    /// # Errors
    ///
    /// Propagates phase hazards — a completion event with no transition
    /// table entry for the current phase.
    pub fn tick(&mut self) -> Result<()> {
        self.cycle += 1;
        if let Some(event) = self.tick_active()? {
            let next = next_phase(self.phase, event)?;
            tracing::debug!(
                "cycle {}: {} --{}--> {}",
                self.cycle,
                self.phase,
                event.name(),
                next
            );
            self.enter(next)?;
        }
        Ok(())
    }

    /// Run until DONE or the cycle budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`TbError::Timeout`] if the budget runs out, or any hazard
    /// raised while ticking.
    pub fn run_until_done(&mut self, max_cycles: u64) -> Result<u64> {
        let start = self.cycle;
        while !self.is_done() {
            if self.cycle - start >= max_cycles {
                return Err(TbError::Timeout { cycles: max_cycles });
            }
            self.tick()?;
        }
        Ok(self.cycle - start)
    }

    // ── Phase entry actions ──────────────────────────────────────────────────

    fn enter(&mut self, next: Phase) -> Result<()> {
        self.rows_fed = 0;
        self.rows_done = 0;

        match next {
            Phase::ComputeQ => self.matmul.start(&self.store.ln_input, &self.weights.wq)?,
            Phase::ComputeK => self.matmul.start(&self.store.ln_input, &self.weights.wk)?,
            Phase::ComputeV => self.matmul.start(&self.store.ln_input, &self.weights.wv)?,
            Phase::ComputeScores => {
                let kt = self.store.k.transposed();
                self.matmul.start(&self.store.q, &kt)?;
            }
            Phase::ComputeAttn => self.matmul.start(&self.store.attn_weights, &self.store.v)?,
            Phase::ComputeFf1 => self.matmul.start(&self.store.ln1, &self.weights.wff1)?,
            Phase::ComputeFf2 => self.matmul.start(&self.store.gelu_ff1, &self.weights.wff2)?,
            Phase::ComputeOutput => self.matmul.start(&self.store.ln2, &self.weights.wout)?,

            Phase::LayernormInput => {
                self.layernorm.reset();
                let p = &self.weights.ln_input;
                self.layernorm.set_params(&p.gamma, &p.beta);
            }
            Phase::Layernorm1 => {
                self.layernorm.reset();
                let p = &self.weights.ln_attn;
                self.layernorm.set_params(&p.gamma, &p.beta);
            }
            Phase::Layernorm2 => {
                self.layernorm.reset();
                let p = &self.weights.ln_ff;
                self.layernorm.set_params(&p.gamma, &p.beta);
            }

            Phase::SoftmaxScores => {
                self.softmax.reset();
                self.store.scores = self.take_product()?;
            }
            Phase::SoftmaxOutput => {
                self.softmax.reset();
                self.store.logits = self.take_product()?;
            }
            Phase::GeluFf1 => {
                self.gelu.reset();
                self.store.ff1 = self.take_product()?;
            }
            Phase::AddResidual1 => self.store.attn = self.take_product()?,
            Phase::AddResidual2 => self.store.ff2 = self.take_product()?,

            Phase::Done => tracing::info!("block complete after {} cycles", self.cycle),
            _ => {}
        }

        self.phase = next;
        Ok(())
    }

    fn take_product(&mut self) -> Result<Matrix> {
        self.matmul
            .take_result()
            .ok_or_else(|| TbError::invalid_state("matmul result consumed before done"))
    }

    // ── Per-cycle phase work ─────────────────────────────────────────────────

    fn tick_active(&mut self) -> Result<Option<UnitEvent>> {
        let dim = self.dim;
        let event = match self.phase {
            Phase::Idle | Phase::Done => None,

            Phase::Embedding => {
                // Token-id → embedding-row copy, one row per cycle.
                let r = self.rows_fed;
                let token = usize::from(self.tokens[r]);
                let row = self.weights.embedding.row(token).to_vec();
                self.store.input.set_row(r, &row);
                self.rows_fed += 1;
                (self.rows_fed == dim).then_some(UnitEvent::CopyDone)
            }

            Phase::SaveLnInput => {
                self.store.ln_input = self.stream_out.clone();
                Some(UnitEvent::CopyDone)
            }
            Phase::SaveLn1 => {
                self.store.ln1 = self.stream_out.clone();
                Some(UnitEvent::CopyDone)
            }
            Phase::SaveQ => {
                self.store.q = self.take_product()?;
                Some(UnitEvent::CopyDone)
            }
            Phase::SaveK => {
                self.store.k = self.take_product()?;
                Some(UnitEvent::CopyDone)
            }
            Phase::SaveV => {
                self.store.v = self.take_product()?;
                Some(UnitEvent::CopyDone)
            }

            Phase::ComputeQ
            | Phase::ComputeK
            | Phase::ComputeV
            | Phase::ComputeScores
            | Phase::ComputeAttn
            | Phase::ComputeFf1
            | Phase::ComputeFf2
            | Phase::ComputeOutput => {
                self.matmul.tick();
                self.matmul.done().then_some(UnitEvent::MatMulDone)
            }

            Phase::AddResidual1 => {
                let r = self.rows_fed;
                let sum = Self::add_rows(self.store.input.row(r), self.store.attn.row(r));
                self.store.resid1.set_row(r, &sum);
                self.rows_fed += 1;
                (self.rows_fed == dim).then_some(UnitEvent::CopyDone)
            }
            Phase::AddResidual2 => {
                let r = self.rows_fed;
                let sum = Self::add_rows(self.store.resid1.row(r), self.store.ff2.row(r));
                self.store.resid2.set_row(r, &sum);
                self.rows_fed += 1;
                (self.rows_fed == dim).then_some(UnitEvent::CopyDone)
            }

            Phase::LayernormInput
            | Phase::Layernorm1
            | Phase::Layernorm2
            | Phase::SoftmaxScores
            | Phase::SoftmaxOutput
            | Phase::GeluFf1 => self.tick_stream(),
        };
        Ok(event)
    }

    /// Feed one row per cycle into the active streaming unit and collect
    /// its outputs; the phase completes when the last row emerges.
    fn tick_stream(&mut self) -> Option<UnitEvent> {
        let dim = self.dim;
        let row: Option<Vec<Q5_10>> = (self.rows_fed < dim).then(|| {
            let src = match self.phase {
                Phase::LayernormInput => &self.store.input,
                Phase::Layernorm1 => &self.store.resid1,
                Phase::Layernorm2 => &self.store.resid2,
                Phase::SoftmaxScores => &self.store.scores,
                Phase::SoftmaxOutput => &self.store.logits,
                _ => &self.store.ff1, // GeluFf1
            };
            src.row(self.rows_fed).to_vec()
        });
        if row.is_some() {
            self.rows_fed += 1;
        }

        let out = match self.phase {
            Phase::LayernormInput | Phase::Layernorm1 | Phase::Layernorm2 => {
                self.layernorm.tick(row.as_deref())
            }
            Phase::SoftmaxScores | Phase::SoftmaxOutput => self.softmax.tick(row.as_deref()),
            _ => self.gelu.tick(row.as_deref()),
        };

        let Some(values) = out else { return None };
        self.stream_out.set_row(self.rows_done, &values);
        self.rows_done += 1;
        if self.rows_done < dim {
            return None;
        }

        let finished = std::mem::replace(&mut self.stream_out, Matrix::zeroed(dim, dim));
        match self.phase {
            Phase::SoftmaxScores => {
                self.store.attn_weights = finished;
                Some(UnitEvent::SoftmaxDone)
            }
            Phase::SoftmaxOutput => {
                self.store.probs = finished;
                Some(UnitEvent::SoftmaxDone)
            }
            Phase::GeluFf1 => {
                self.store.gelu_ff1 = finished;
                Some(UnitEvent::GeluDone)
            }
            Phase::Layernorm2 => {
                // No save phase after the second LayerNorm in the silicon
                // state list; the result commits here.
                self.store.ln2 = finished;
                Some(UnitEvent::LayerNormDone)
            }
            _ => {
                // LAYERNORM_INPUT / LAYERNORM_1 commit in their SAVE phase.
                self.stream_out = finished;
                Some(UnitEvent::LayerNormDone)
            }
        }
    }

    fn add_rows(a: &[Q5_10], b: &[Q5_10]) -> Vec<Q5_10> {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.saturating_add(*y))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_visits_every_phase_in_order() {
        use {Phase as P, UnitEvent as E};
        let expected = [
            (P::Embedding, E::CopyDone),
            (P::LayernormInput, E::LayerNormDone),
            (P::SaveLnInput, E::CopyDone),
            (P::ComputeQ, E::MatMulDone),
            (P::SaveQ, E::CopyDone),
            (P::ComputeK, E::MatMulDone),
            (P::SaveK, E::CopyDone),
            (P::ComputeV, E::MatMulDone),
            (P::SaveV, E::CopyDone),
            (P::ComputeScores, E::MatMulDone),
            (P::SoftmaxScores, E::SoftmaxDone),
            (P::ComputeAttn, E::MatMulDone),
            (P::AddResidual1, E::CopyDone),
            (P::Layernorm1, E::LayerNormDone),
            (P::SaveLn1, E::CopyDone),
            (P::ComputeFf1, E::MatMulDone),
            (P::GeluFf1, E::GeluDone),
            (P::ComputeFf2, E::MatMulDone),
            (P::AddResidual2, E::CopyDone),
            (P::Layernorm2, E::LayerNormDone),
            (P::ComputeOutput, E::MatMulDone),
            (P::SoftmaxOutput, E::SoftmaxDone),
        ];
        let mut phase = P::Embedding;
        for (at, event) in expected {
            assert_eq!(phase, at);
            phase = next_phase(phase, event).unwrap();
        }
        assert_eq!(phase, P::Done);
    }

    #[test]
    fn wrong_unit_done_is_a_hazard() {
        let err = next_phase(Phase::ComputeQ, UnitEvent::SoftmaxDone).unwrap_err();
        assert!(matches!(err, TbError::PhaseHazard { .. }));
        assert!(next_phase(Phase::Idle, UnitEvent::MatMulDone).is_err());
        assert!(next_phase(Phase::Done, UnitEvent::CopyDone).is_err());
    }

    #[test]
    fn every_active_phase_has_exactly_one_successor() {
        use Phase as P;
        let events = [
            UnitEvent::MatMulDone,
            UnitEvent::LayerNormDone,
            UnitEvent::SoftmaxDone,
            UnitEvent::GeluDone,
            UnitEvent::CopyDone,
        ];
        let active = [
            P::Embedding,
            P::LayernormInput,
            P::SaveLnInput,
            P::ComputeQ,
            P::SaveQ,
            P::ComputeK,
            P::SaveK,
            P::ComputeV,
            P::SaveV,
            P::ComputeScores,
            P::SoftmaxScores,
            P::ComputeAttn,
            P::AddResidual1,
            P::Layernorm1,
            P::SaveLn1,
            P::ComputeFf1,
            P::GeluFf1,
            P::ComputeFf2,
            P::AddResidual2,
            P::Layernorm2,
            P::ComputeOutput,
            P::SoftmaxOutput,
        ];
        for phase in active {
            let successors = events
                .iter()
                .filter(|&&e| next_phase(phase, e).is_ok())
                .count();
            assert_eq!(successors, 1, "{phase} must have exactly one successor");
        }
    }

    #[test]
    fn start_rejected_mid_computation() {
        let mut c = BlockController::new(WeightSet::seeded(16, 1));
        let tokens: Vec<u8> = (0..16).collect();
        c.start(&tokens).unwrap();
        assert!(c.start(&tokens).is_err(), "start is only legal from IDLE/DONE");
    }

    #[test]
    fn start_validates_tokens() {
        let mut c = BlockController::new(WeightSet::seeded(16, 1));
        assert!(c.start(&[0; 3]).is_err(), "wrong token count");
        let mut bad = vec![0u8; 16];
        bad[5] = 200;
        assert!(c.start(&bad).is_err(), "token id outside embedding table");
    }

    #[test]
    fn block_runs_to_done_and_again() {
        let mut c = BlockController::new(WeightSet::seeded(16, 42));
        let tokens: Vec<u8> = (0..16).collect();
        c.start(&tokens).unwrap();
        let cycles = c.run_until_done(10_000).unwrap();
        assert!(c.is_done());
        assert!(cycles > 0);
        assert!(c.probabilities().is_some());

        // DONE is terminal until the next external start.
        c.tick().unwrap();
        assert!(c.is_done());

        // A fresh start from DONE reruns the block deterministically.
        c.start(&tokens).unwrap();
        let cycles2 = c.run_until_done(10_000).unwrap();
        assert_eq!(cycles, cycles2, "identical input must take identical cycles");
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut c = BlockController::new(WeightSet::seeded(16, 9));
        let tokens: Vec<u8> = (0..16).collect();
        c.start(&tokens).unwrap();
        for _ in 0..50 {
            c.tick().unwrap();
        }
        c.reset();
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(c.cycle(), 0);
        assert!(c.probabilities().is_none());
    }
}
