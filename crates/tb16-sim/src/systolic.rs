//! N×N systolic array and the start/done matrix-multiply wrapper.

use crate::error::{Result, TbError};
use crate::pe::ProcessingElement;
use tb16_chip::fixed::Q5_10;
use tb16_chip::geometry::SystolicTiming;
use tb16_chip::matrix::Matrix;

/// Grid of processing elements with skewed west/north operand feeds.
///
/// Operand index k of output cell (i, j) — `A[i][k]` from the west and
/// `B[k][j]` from the north — meets at that cell on cycle `k + i + j + 1`
/// (one clear cycle precedes the feed), so the far corner settles after
/// `3N − 2` active cycles. Accumulation order is the dataflow order: k
/// ascending.
#[derive(Debug, Clone)]
pub struct SystolicArray {
    n: usize,
    cells: Vec<ProcessingElement>,
}

impl SystolicArray {
    /// An N×N array of cleared cells.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            n,
            cells: vec![ProcessingElement::new(); n * n],
        }
    }

    /// Edge length.
    #[must_use]
    pub const fn n(&self) -> usize {
        self.n
    }

    /// Advance one clock with the given edge feeds.
    ///
    /// `west[i]` enters row i at column 0; `north[j]` enters column j at
    /// row 0. Interior cells consume their neighbours' previous-cycle
    /// outputs, establishing the one-cycle forwarding delay.
    pub fn tick(&mut self, west: &[Q5_10], north: &[Q5_10], enable: bool, clear: bool) {
        let n = self.n;
        let prev: Vec<(Q5_10, Q5_10)> = self.cells.iter().map(|c| (c.a_out(), c.b_out())).collect();

        for i in 0..n {
            for j in 0..n {
                let a_in = if j == 0 { west[i] } else { prev[i * n + j - 1].0 };
                let b_in = if i == 0 { north[j] } else { prev[(i - 1) * n + j].1 };
                self.cells[i * n + j].tick(a_in, b_in, enable, clear);
            }
        }
    }

    /// Accumulator of cell (i, j).
    #[must_use]
    pub fn acc(&self, i: usize, j: usize) -> Q5_10 {
        self.cells[i * self.n + j].acc()
    }
}

#[derive(Debug, Clone)]
struct Job {
    a: Matrix,
    b: Matrix,
    cycle: usize,
}

/// Matrix-multiply unit: start with two operand matrices, tick until done,
/// take the product.
///
/// The unit is idle until [`start`](Self::start); it then runs the clear
/// cycle plus `3N − 2` feed cycles and latches the result. `done` stays
/// high until the result is taken or a new job starts.
#[derive(Debug, Clone)]
pub struct MatMulUnit {
    array: SystolicArray,
    job: Option<Job>,
    result: Option<Matrix>,
}

impl MatMulUnit {
    /// A unit for N×N operands.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            array: SystolicArray::new(n),
            job: None,
            result: None,
        }
    }

    /// Latch operands and begin a product `C = A×B`.
    ///
    /// # Errors
    ///
    /// Returns an error if a job is already in flight or the operand
    /// shapes do not match the array.
    pub fn start(&mut self, a: &Matrix, b: &Matrix) -> Result<()> {
        if self.job.is_some() {
            return Err(TbError::invalid_state("matmul start while busy"));
        }
        let n = self.array.n();
        for (rows, cols) in [(a.rows(), a.cols()), (b.rows(), b.cols())] {
            if rows != n || cols != n {
                return Err(TbError::DimensionMismatch {
                    got: rows.max(cols),
                    expected: n,
                });
            }
        }
        tracing::debug!("matmul start: {n}×{n}");
        self.result = None;
        self.job = Some(Job {
            a: a.clone(),
            b: b.clone(),
            cycle: 0,
        });
        Ok(())
    }

    /// Advance one clock.
    pub fn tick(&mut self) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let n = self.array.n();
        let t = job.cycle;

        if t == 0 {
            // Clear cycle: zero every accumulator before the skewed feed.
            let zeros = vec![Q5_10::ZERO; n];
            self.array.tick(&zeros, &zeros, false, true);
        } else {
            let west: Vec<Q5_10> = (0..n)
                .map(|i| {
                    (t - 1).checked_sub(i).map_or(Q5_10::ZERO, |k| {
                        if k < n {
                            job.a.get(i, k)
                        } else {
                            Q5_10::ZERO
                        }
                    })
                })
                .collect();
            let north: Vec<Q5_10> = (0..n)
                .map(|j| {
                    (t - 1).checked_sub(j).map_or(Q5_10::ZERO, |k| {
                        if k < n {
                            job.b.get(k, j)
                        } else {
                            Q5_10::ZERO
                        }
                    })
                })
                .collect();
            self.array.tick(&west, &north, true, false);
        }

        job.cycle += 1;
        if job.cycle > SystolicTiming::new(n).total_cycles() {
            let result = Matrix::from_fn(n, n, |i, j| self.array.acc(i, j));
            tracing::debug!("matmul done after {} cycles", job.cycle);
            self.result = Some(result);
            self.job = None;
        }
    }

    /// True while a job is in flight.
    #[must_use]
    pub const fn busy(&self) -> bool {
        self.job.is_some()
    }

    /// True once a result is latched.
    #[must_use]
    pub const fn done(&self) -> bool {
        self.result.is_some()
    }

    /// Take the latched product, clearing `done`.
    pub fn take_result(&mut self) -> Option<Matrix> {
        self.result.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb16_chip::geometry::SystolicTiming;

    fn fx(v: f32) -> Q5_10 {
        Q5_10::from_f32(v)
    }

    fn run_product(a: &Matrix, b: &Matrix) -> (Matrix, usize) {
        let mut unit = MatMulUnit::new(a.rows());
        unit.start(a, b).unwrap();
        let mut cycles = 0;
        while !unit.done() {
            unit.tick();
            cycles += 1;
            assert!(cycles < 1000, "matmul never finished");
        }
        (unit.take_result().unwrap(), cycles)
    }

    #[test]
    fn two_by_two_product() {
        // [[1,2],[3,4]] × [[5,6],[7,8]] = [[19,22],[43,50]]
        let a = Matrix::from_fn(2, 2, |i, j| fx([[1.0, 2.0], [3.0, 4.0]][i][j]));
        let b = Matrix::from_fn(2, 2, |i, j| fx([[5.0, 6.0], [7.0, 8.0]][i][j]));
        let (c, _) = run_product(&a, &b);
        let want = [[19.0, 22.0], [43.0, 50.0]];
        for i in 0..2 {
            for j in 0..2 {
                assert!(
                    (c.get(i, j).to_f32() - want[i][j]).abs() < 0.01,
                    "C[{i}][{j}]"
                );
            }
        }
    }

    #[test]
    fn identity_product_is_identity() {
        let n = 16;
        let eye = Matrix::from_fn(n, n, |i, j| if i == j { Q5_10::ONE } else { Q5_10::ZERO });
        let m = Matrix::from_fn(n, n, |i, j| fx((i as f32 - j as f32) * 0.125));
        let (c, _) = run_product(&eye, &m);
        assert_eq!(c, m);
    }

    #[test]
    fn sixteen_by_sixteen_matches_reference() {
        let n = 16;
        let a = Matrix::from_fn(n, n, |i, j| fx(((i + j) % 5) as f32 * 0.25 - 0.5));
        let b = Matrix::from_fn(n, n, |i, j| fx(((3 * i + j) % 7) as f32 * 0.125 - 0.375));
        let (c, _) = run_product(&a, &b);

        for i in 0..n {
            for j in 0..n {
                let want: f32 = (0..n)
                    .map(|k| a.get(i, k).to_f32() * b.get(k, j).to_f32())
                    .sum();
                assert!(
                    (c.get(i, j).to_f32() - want).abs() < 0.05,
                    "C[{i}][{j}] = {}, reference {want}",
                    c.get(i, j).to_f32()
                );
            }
        }
    }

    #[test]
    fn latency_is_fill_plus_compute() {
        let n = 16;
        let a = Matrix::zeroed(n, n);
        let (_, cycles) = run_product(&a, &a);
        // Clear cycle + 3N−2 feed cycles.
        assert_eq!(cycles, SystolicTiming::new(n).total_cycles() + 1);
    }

    #[test]
    fn start_while_busy_is_rejected() {
        let a = Matrix::zeroed(4, 4);
        let mut unit = MatMulUnit::new(4);
        unit.start(&a, &a).unwrap();
        assert!(unit.start(&a, &a).is_err());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut unit = MatMulUnit::new(4);
        let bad = Matrix::zeroed(3, 3);
        assert!(matches!(
            unit.start(&bad, &bad),
            Err(TbError::DimensionMismatch { .. })
        ));
    }
}
