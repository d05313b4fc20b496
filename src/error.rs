//! Crate error type.
//!
//! Mirrors spec.md §7's error taxonomy where it is representable as a
//! `Result`: configuration mistakes and lattice-construction failure.
//! Invariant corruption is a `panic!` (spec.md: "Fatal; abort"); frame
//! underflow and "no hypothesis" are encoded as `Ok(false)` / `None` rather
//! than errors, since spec.md treats them as expected, non-exceptional
//! outcomes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown FSG grammar: {name}")]
    UnknownFsg { name: String },

    #[error("no FSG grammar is currently selected")]
    NoActiveFsg,

    #[error("invalid configuration: {msg}")]
    Config { msg: String },

    #[error("lattice construction failed: {msg}")]
    LatticeConstruction { msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;
