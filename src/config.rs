//! Decoder configuration.
//!
//! Holds every key from spec.md §6's configuration table. This is an ambient
//! concern spec.md's Non-goals exclude as a *feature* (no CLI/file-format
//! parsing is implemented), but the typed struct and its TOML deserializer
//! are kept regardless, matching the teacher's settings-from-TOML
//! convention (see `api::settings_load_config` / `romaji_load_config` in the
//! teacher, both of which deserialize a TOML string into a typed settings
//! struct via `serde`).

use serde::Deserialize;

use crate::error::{Error, Result};

/// All scores in this crate are integer log-domain values; beams are
/// non-positive (0 = "as good as the best", more negative = worse). See
/// spec.md §3 "Invariants" and §9 "Score scaling".
pub type LogScore = i32;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// HMM beam width (log-domain, non-positive).
    pub beam: LogScore,
    /// Phone-exit beam width.
    pub pbeam: LogScore,
    /// Word-exit beam width.
    pub wbeam: LogScore,
    /// Absolute active-HMM cap; <= 0 disables dynamic beam narrowing.
    pub maxhmmpf: i64,
    /// Linguistic weight, already folded into transition probabilities by
    /// the FSG/dictionary loader; kept here only so callers constructing
    /// penalties by hand can reproduce the same scaling.
    pub lw: f32,
    /// Phone insertion penalty, pre-multiplied by `lw` (see spec.md §9).
    pub pip: LogScore,
    /// Word insertion penalty, pre-multiplied by `lw`.
    pub wip: LogScore,
    /// Self-loop probability for `<sil>`, linear domain (0, 1].
    pub silprob: f32,
    /// Self-loop probability for filler words, linear domain (0, 1].
    pub fillprob: f32,
    /// Acoustic-score scale used for posteriors.
    pub ascale: f32,
    /// Enable lattice best-path on the final hypothesis.
    pub bestpath: bool,
    /// Auto-add silence/filler self-loops on `FsgSet::add`.
    pub fsgusefiller: bool,
    /// Auto-add alternate pronunciations on `FsgSet::add`.
    pub fsgusealtpron: bool,
    /// Path to a default FSG to select at init, if any. Loading from disk is
    /// out of scope for this crate (spec.md §1 non-goals); this field is
    /// kept so callers can plumb a path through their own loader.
    pub fsg: Option<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            beam: -2_000,
            pbeam: -1_500,
            wbeam: -3_000,
            maxhmmpf: -1,
            lw: 6.5,
            pip: -300,
            wip: -700,
            silprob: 0.1,
            fillprob: 0.1,
            ascale: 1.0 / 15.0,
            bestpath: false,
            fsgusefiller: true,
            fsgusealtpron: true,
            fsg: None,
        }
    }
}

impl DecoderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config { msg: e.to_string() })
    }

    /// Convert `silprob` into the integer log-domain score `FsgSet` and the
    /// lattice builder both expect, per spec.md §4.4's literal formula
    /// `log(silprob)*lw`. The same value is reused for the FSG's `<sil>`
    /// self-loop insertion logprob and the lattice's filler-bypass penalty,
    /// since both are "this crate's single converted form of `silprob`"
    /// rather than two independently tuned constants.
    pub fn sil_logprob(&self) -> LogScore {
        (self.silprob.ln() as f64 * self.lw as f64) as i32
    }

    /// As [`Self::sil_logprob`], for `fillprob` (spec.md §4.4 `fillpen`).
    pub fn fill_logprob(&self) -> LogScore {
        (self.fillprob.ln() as f64 * self.lw as f64) as i32
    }

    pub fn validate(&self) -> Result<()> {
        if self.beam > 0 || self.pbeam > 0 || self.wbeam > 0 {
            return Err(Error::Config {
                msg: "beam widths must be non-positive log scores".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.silprob) || !(0.0..=1.0).contains(&self.fillprob) {
            return Err(Error::Config {
                msg: "silprob/fillprob must be probabilities in (0, 1]".into(),
            });
        }
        Ok(())
    }
}
