//! Silicon model for the TB16 transformer-block accelerator.
//!
//! This crate has **no dependencies** and **no simulator state** — it is a
//! pure model of the silicon: fixed-point number formats, LUT/ROM contents
//! and the procedures that generate them, the host-link command protocol,
//! and the array geometry.
//!
//! The device itself is a deterministic, bounded-latency pipeline that
//! computes one 16-token transformer block entirely in Q5.10 fixed point:
//! a systolic matrix multiplier for the projections, a three-stage LayerNorm
//! pipeline, a two-stage Softmax pipeline, and a single-cycle GELU ROM,
//! sequenced by a ~24-phase controller. The cycle-accurate model of those
//! units lives in `tb16-sim`; everything they index or decode is defined
//! here.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`fixed`] | Q5.10 / Q8.8 / Q4.12 saturating fixed-point formats |
//! | [`matrix`] | Owned Q5.10 matrices moved between phases |
//! | [`geometry`] | Array dimensions and systolic cycle arithmetic |
//! | [`rom`] | Exp / GELU / inverse-sqrt-seed tables and hex dumps |
//! | [`link`] | Host-link command bytes and status bits |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod fixed;
pub mod geometry;
pub mod link;
pub mod matrix;
pub mod rom;
