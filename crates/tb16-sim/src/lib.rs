//! Cycle-accurate simulator for the TB16 transformer-block accelerator.
//!
//! Everything advances under a single global clock: each component moves at
//! most one logical step per `tick()`, in-flight pipeline state is held in
//! explicit per-stage records, and "waiting" is a stage holding its value
//! until a downstream valid/done signal. No async, no threads.
//!
//! # Unit hierarchy
//!
//! ```text
//! BlockController (24-phase FSM)
//! ├── MatMulUnit       N×N systolic array, 3N−2 active cycles
//! ├── LayerNormPipeline  preprocess(9) → inv-sqrt(8) → postprocess(3)
//! ├── SoftmaxPipeline    exp-LUT frontend(6) → reciprocal backend(17)
//! └── GeluUnit         single-cycle ROM lookup
//! ```
//!
//! The controller asserts exactly one sub-unit start per phase and waits
//! for that unit's done before advancing; transitions live in an explicit
//! table, so a completion signal arriving in the wrong phase is a
//! detectable hazard rather than a silent corruption.
//!
//! # Quick start
//!
//! ```
//! use tb16_model::WeightSet;
//! use tb16_sim::TbDevice;
//!
//! # fn main() -> tb16_sim::Result<()> {
//! let mut dev = TbDevice::new(WeightSet::seeded(16, 42));
//! dev.load_tokens(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15])?;
//! dev.start()?;
//! let cycles = dev.run_until_done(100_000)?;
//! println!("block finished in {cycles} cycles");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod controller;
mod device;
mod error;
pub mod gelu;
pub mod invsqrt;
pub mod layernorm;
pub mod pe;
pub mod pipeline;
mod port;
pub mod softmax;
pub mod systolic;

pub use controller::{next_phase, BlockController, Phase, UnitEvent};
pub use device::TbDevice;
pub use error::{Result, TbError};
pub use gelu::GeluUnit;
pub use invsqrt::{InvSqrtOutput, InvSqrtUnit, VarianceToken};
pub use layernorm::{LayerNormPipeline, Preprocess, RowStats};
pub use pe::ProcessingElement;
pub use pipeline::DelayLine;
pub use port::CommandPort;
pub use softmax::{SoftmaxBackend, SoftmaxFrontend, SoftmaxPipeline};
pub use systolic::{MatMulUnit, SystolicArray};

/// Commonly used types.
pub mod prelude {
    pub use crate::{BlockController, CommandPort, Phase, Result, TbDevice, TbError};
}
