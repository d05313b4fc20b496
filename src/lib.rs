//! FSM-constrained Viterbi beam-search decoder core.
//!
//! The crate exposes [`Search`] (frame engine + public decoder surface,
//! §4.2/§6), built on a small set of collaborator traits — [`dict::Dictionary`],
//! [`fsg::FsgModel`], [`hmm::Hmm`]/[`hmm::HmmContext`], [`acoustic::AcousticScorer`],
//! [`lattice::LatticeAlgorithms`] — each with one concrete, in-memory reference
//! implementation good enough to drive the crate's own tests. Dictionary
//! loading, grammar compilation, acoustic model evaluation, and lattice
//! toolkits proper are external collaborators, not implemented here.

pub mod acoustic;
pub mod active;
pub mod config;
pub mod ctx;
pub mod dict;
pub mod error;
pub mod extractor;
pub mod fsg;
pub mod history;
pub mod hmm;
pub mod lattice;
pub mod lextree;
pub mod search;
pub mod trace_init;

pub use config::DecoderConfig;
pub use error::{Error, Result};
pub use search::{Search, Stats};
