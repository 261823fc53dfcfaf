#![forbid(unsafe_code)]

//! Weight sets for the TB16 transformer-block accelerator.
//!
//! A block computation consumes one [`WeightSet`]: the embedding table, the
//! six projection matrices, and per-instance LayerNorm scale/shift
//! parameters. Weights are supplied once before computation and treated as
//! read-only constants for the block's duration.
//!
//! # Blob format
//!
//! Weight sets cross process boundaries as a packed little-endian blob:
//!
//! - **Header** (8 bytes): magic `TB16`, format version, matrix dimension
//! - **Matrices**: embedding, Wq, Wk, Wv, Wff1, Wff2, Wout — `dim²` raw
//!   i16 words each
//! - **LayerNorm params**: gamma then beta for the input, post-attention,
//!   and post-feed-forward instances — `dim` words each
//!
//! # Example
//!
//! ```
//! use tb16_model::WeightSet;
//!
//! # fn main() -> tb16_model::Result<()> {
//! let weights = WeightSet::seeded(16, 42);
//! let blob = weights.pack();
//! let restored = WeightSet::from_blob(&blob)?;
//! assert_eq!(weights, restored);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod error;
mod seeded;
mod weights;

pub use error::{ModelError, Result};
pub use weights::{LayerNormParams, WeightSet, BLOB_MAGIC, BLOB_VERSION};
