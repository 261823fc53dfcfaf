//! Weight-set container and the packed blob format.

use crate::error::{ModelError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tb16_chip::fixed::Q5_10;
use tb16_chip::geometry::{SEQ_LEN, TILE_64};
use tb16_chip::matrix::Matrix;

/// Magic bytes opening a packed weight blob.
pub const BLOB_MAGIC: [u8; 4] = *b"TB16";

/// Current blob format version.
pub const BLOB_VERSION: u16 = 1;

/// Per-instance LayerNorm scale/shift parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerNormParams {
    /// Per-element scale (learned).
    pub gamma: Vec<Q5_10>,
    /// Per-element shift (learned).
    pub beta: Vec<Q5_10>,
}

impl LayerNormParams {
    /// Identity parameters: gamma = 1, beta = 0.
    #[must_use]
    pub fn identity(dim: usize) -> Self {
        Self {
            gamma: vec![Q5_10::ONE; dim],
            beta: vec![Q5_10::ZERO; dim],
        }
    }
}

/// Every constant a block computation reads: the embedding table, the six
/// projection matrices, and three LayerNorm parameter pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSet {
    /// Matrix dimension (16 for the reference device, 64 for the tile).
    pub dim: usize,
    /// Token-id → embedding-row table.
    pub embedding: Matrix,
    /// Query projection.
    pub wq: Matrix,
    /// Key projection.
    pub wk: Matrix,
    /// Value projection.
    pub wv: Matrix,
    /// First feed-forward projection.
    pub wff1: Matrix,
    /// Second feed-forward projection.
    pub wff2: Matrix,
    /// Output (vocabulary) projection.
    pub wout: Matrix,
    /// LayerNorm over the embedded input.
    pub ln_input: LayerNormParams,
    /// LayerNorm after the attention residual.
    pub ln_attn: LayerNormParams,
    /// LayerNorm after the feed-forward residual.
    pub ln_ff: LayerNormParams,
}

impl WeightSet {
    /// All-zero weights with identity LayerNorm parameters.
    #[must_use]
    pub fn zeroed(dim: usize) -> Self {
        Self {
            dim,
            embedding: Matrix::zeroed(dim, dim),
            wq: Matrix::zeroed(dim, dim),
            wk: Matrix::zeroed(dim, dim),
            wv: Matrix::zeroed(dim, dim),
            wff1: Matrix::zeroed(dim, dim),
            wff2: Matrix::zeroed(dim, dim),
            wout: Matrix::zeroed(dim, dim),
            ln_input: LayerNormParams::identity(dim),
            ln_attn: LayerNormParams::identity(dim),
            ln_ff: LayerNormParams::identity(dim),
        }
    }

    /// Blob size in bytes for a given dimension.
    #[must_use]
    pub const fn blob_len(dim: usize) -> usize {
        8 + 7 * dim * dim * 2 + 3 * 2 * dim * 2
    }

    /// Serialize into the packed blob format.
    #[must_use]
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::blob_len(self.dim));
        buf.put_slice(&BLOB_MAGIC);
        buf.put_u16_le(BLOB_VERSION);
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u16_le(self.dim as u16);

        for m in self.matrices() {
            for e in m.elements() {
                buf.put_i16_le(e.raw());
            }
        }
        for ln in [&self.ln_input, &self.ln_attn, &self.ln_ff] {
            for e in ln.gamma.iter().chain(ln.beta.iter()) {
                buf.put_i16_le(e.raw());
            }
        }

        tracing::debug!("packed weight blob: dim={} bytes={}", self.dim, buf.len());
        buf.freeze()
    }

    /// Deserialize a packed blob.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad magic, an unknown version, an unsupported
    /// dimension, or a blob shorter than its header implies.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() < 8 {
            return Err(ModelError::BlobTooShort {
                got: blob.len(),
                expected: 8,
            });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&blob[0..4]);
        if magic != BLOB_MAGIC {
            return Err(ModelError::BadMagic { found: magic });
        }
        let version = u16::from_le_bytes([blob[4], blob[5]]);
        if version != BLOB_VERSION {
            return Err(ModelError::UnsupportedVersion { version });
        }
        let dim = usize::from(u16::from_le_bytes([blob[6], blob[7]]));
        if dim != SEQ_LEN && dim != TILE_64 {
            return Err(ModelError::UnsupportedDimension { dim });
        }
        let expected = Self::blob_len(dim);
        if blob.len() < expected {
            return Err(ModelError::BlobTooShort {
                got: blob.len(),
                expected,
            });
        }

        let mut cursor = 8usize;
        let mut next_words = |count: usize| {
            let words: Vec<Q5_10> = blob[cursor..cursor + count * 2]
                .chunks_exact(2)
                .map(|c| Q5_10::from_raw(i16::from_le_bytes([c[0], c[1]])))
                .collect();
            cursor += count * 2;
            words
        };

        let mut matrix = |rows: usize, cols: usize| -> Matrix {
            Matrix::from_vec(rows, cols, next_words(rows * cols))
        };

        let embedding = matrix(dim, dim);
        let wq = matrix(dim, dim);
        let wk = matrix(dim, dim);
        let wv = matrix(dim, dim);
        let wff1 = matrix(dim, dim);
        let wff2 = matrix(dim, dim);
        let wout = matrix(dim, dim);

        let mut ln = || LayerNormParams {
            gamma: next_words(dim),
            beta: next_words(dim),
        };
        let ln_input = ln();
        let ln_attn = ln();
        let ln_ff = ln();

        tracing::debug!("unpacked weight blob: dim={dim}");
        Ok(Self {
            dim,
            embedding,
            wq,
            wk,
            wv,
            wff1,
            wff2,
            wout,
            ln_input,
            ln_attn,
            ln_ff,
        })
    }

    /// The seven matrices in blob order.
    fn matrices(&self) -> [&Matrix; 7] {
        [
            &self.embedding,
            &self.wq,
            &self.wk,
            &self.wv,
            &self.wff1,
            &self.wff2,
            &self.wout,
        ]
    }
}
