//! Device facade: staging matrices, the controller, and the status word.
//!
//! The host sees three things: an input staging matrix it writes row by
//! row, a result matrix it reads row by row, and a status byte. Row 0 of
//! the staging matrix carries the block's token ids in the element low
//! bits — the same convention the host-link tooling uses — while
//! [`load_tokens`](TbDevice::load_tokens) sets them directly.

use crate::controller::{BlockController, Phase};
use crate::error::{Result, TbError};
use tb16_chip::fixed::Q5_10;
use tb16_chip::link::status;
use tb16_chip::matrix::Matrix;
use tb16_model::WeightSet;

/// One simulated TB16 device.
#[derive(Debug, Clone)]
pub struct TbDevice {
    controller: BlockController,
    staging: Matrix,
    /// DONE latches until the next start.
    completed: bool,
}

impl TbDevice {
    /// A device holding the given weight set, ready for commands.
    #[must_use]
    pub fn new(weights: WeightSet) -> Self {
        let dim = weights.dim;
        Self {
            controller: BlockController::new(weights),
            staging: Matrix::zeroed(dim, dim),
            completed: false,
        }
    }

    /// Matrix dimension.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.controller.dim()
    }

    /// Write one row of the input staging matrix.
    ///
    /// # Errors
    ///
    /// Returns an error for an out-of-range row index, a wrong element
    /// count, or while a computation is running.
    pub fn write_row(&mut self, row: usize, elements: &[Q5_10]) -> Result<()> {
        if self.busy() {
            return Err(TbError::invalid_state("row write while busy"));
        }
        let dim = self.dim();
        if row >= dim {
            return Err(TbError::RowOutOfRange { row, rows: dim });
        }
        if elements.len() != dim {
            return Err(TbError::DimensionMismatch {
                got: elements.len(),
                expected: dim,
            });
        }
        self.staging.set_row(row, elements);
        Ok(())
    }

    /// Read one row of the result matrix (the final softmax output, or
    /// zeros before the first completion).
    ///
    /// # Errors
    ///
    /// Returns an error for an out-of-range row index.
    pub fn read_row(&self, row: usize) -> Result<Vec<Q5_10>> {
        let dim = self.dim();
        if row >= dim {
            return Err(TbError::RowOutOfRange { row, rows: dim });
        }
        Ok(self
            .controller
            .probabilities()
            .map_or_else(|| vec![Q5_10::ZERO; dim], |m| m.row(row).to_vec()))
    }

    /// Set the token ids directly (row 0 of the staging matrix).
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong token count or while busy.
    pub fn load_tokens(&mut self, tokens: &[u8]) -> Result<()> {
        let row: Vec<Q5_10> = tokens
            .iter()
            .map(|&t| Q5_10::from_raw(i16::from(t)))
            .collect();
        self.write_row(0, &row)
    }

    /// Start the block computation over the staged token ids.
    ///
    /// # Errors
    ///
    /// Returns an error while busy or on invalid token ids.
    pub fn start(&mut self) -> Result<()> {
        if self.busy() {
            return Err(TbError::invalid_state("start while busy"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let tokens: Vec<u8> = self
            .staging
            .row(0)
            .iter()
            .map(|e| (e.raw() & 0xFF) as u8)
            .collect();
        self.completed = false;
        self.controller.start(&tokens)
    }

    /// Advance the system clock one cycle.
    ///
    /// # Errors
    ///
    /// Propagates controller phase hazards.
    pub fn step(&mut self) -> Result<()> {
        self.controller.tick()?;
        if self.controller.is_done() {
            self.completed = true;
        }
        Ok(())
    }

    /// Run until the controller reaches DONE.
    ///
    /// # Errors
    ///
    /// Returns [`TbError::Timeout`] when the budget is exhausted.
    pub fn run_until_done(&mut self, max_cycles: u64) -> Result<u64> {
        let cycles = self.controller.run_until_done(max_cycles)?;
        self.completed = true;
        Ok(cycles)
    }

    /// True while a block is computing.
    #[must_use]
    pub fn busy(&self) -> bool {
        !matches!(self.controller.phase(), Phase::Idle | Phase::Done)
    }

    /// Status byte: bit0 ready, bit1 busy, bit2 done.
    #[must_use]
    pub fn status(&self) -> u8 {
        let mut s = 0;
        if !self.busy() {
            s |= status::READY;
        } else {
            s |= status::BUSY;
        }
        if self.completed {
            s |= status::DONE;
        }
        s
    }

    /// Global reset: controller to IDLE, staging cleared, status READY.
    pub fn reset(&mut self) {
        let dim = self.dim();
        self.controller.reset();
        self.staging = Matrix::zeroed(dim, dim);
        self.completed = false;
    }

    /// The controller, for phase introspection.
    #[must_use]
    pub const fn controller(&self) -> &BlockController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> TbDevice {
        TbDevice::new(WeightSet::seeded(16, 42))
    }

    fn sequential_tokens() -> Vec<u8> {
        (0..16).collect()
    }

    #[test]
    fn fresh_device_is_ready_not_done() {
        let dev = device();
        assert_eq!(dev.status(), status::READY);
    }

    #[test]
    fn status_lifecycle() {
        let mut dev = device();
        dev.load_tokens(&sequential_tokens()).unwrap();
        dev.start().unwrap();
        assert_eq!(dev.status() & status::BUSY, status::BUSY);
        assert_eq!(dev.status() & status::READY, 0);

        dev.run_until_done(10_000).unwrap();
        assert_eq!(dev.status() & status::READY, status::READY);
        assert_eq!(dev.status() & status::DONE, status::DONE);
    }

    #[test]
    fn writes_rejected_while_busy() {
        let mut dev = device();
        dev.load_tokens(&sequential_tokens()).unwrap();
        dev.start().unwrap();
        let row = vec![Q5_10::ZERO; 16];
        assert!(dev.write_row(1, &row).is_err());
        assert!(dev.start().is_err());
    }

    #[test]
    fn result_rows_zero_before_completion() {
        let dev = device();
        assert!(dev.read_row(0).unwrap().iter().all(|&e| e == Q5_10::ZERO));
        assert!(dev.read_row(16).is_err());
    }

    #[test]
    fn reset_clears_done() {
        let mut dev = device();
        dev.load_tokens(&sequential_tokens()).unwrap();
        dev.start().unwrap();
        dev.run_until_done(10_000).unwrap();
        dev.reset();
        assert_eq!(dev.status(), status::READY);
    }
}
