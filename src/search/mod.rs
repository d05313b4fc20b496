//! Frame engine and public decoder surface (spec.md §4.2, §6).
//!
//! `Search` is the handle the rest of this crate builds towards: it owns the
//! HMM context, the history table, the lextree, and both active sets
//! (spec.md §5 "Resource ownership"), and drives the `start`/`step`/`finish`
//! lifecycle in the exact sub-stage order spec.md §4.2/§5 specify. Grounded
//! in the teacher's `api::session::LexSession` for the "single owning
//! handle, explicit lifecycle methods" shape, though unlike that type this
//! crate does not wrap itself in a `Mutex` (spec.md's concurrency model is a
//! single-threaded caller, not a shared FFI session — see §5).

pub(crate) mod frame;

use tracing::{debug, info, warn};

use crate::acoustic::AcousticScorer;
use crate::active::ActiveSet;
use crate::config::{DecoderConfig, LogScore};
use crate::ctx::CiPhone;
use crate::dict::Dictionary;
use crate::error::{Error, Result};
use crate::extractor::{self, Segment};
use crate::fsg::set::FsgSet;
use crate::fsg::FsgModel;
use crate::hmm::HmmContext;
use crate::history::HistoryTable;
use crate::lattice::{self, DefaultLatticeAlgorithms, Lattice, LatticeAlgorithms};
use crate::lextree::{self, LexTree};

/// Running counters reported at `finish()` (spec.md §4.2 "logs statistics")
/// and checked against spec.md §8 invariant 6 (`n_hmm_eval <= n_pnode *
/// frame_count`).
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub n_hmm_eval: u64,
    pub n_frame: u32,
    pub n_hmm_active_total: u64,
}

impl Stats {
    pub fn mean_active(&self) -> f64 {
        if self.n_frame == 0 {
            0.0
        } else {
            self.n_hmm_active_total as f64 / self.n_frame as f64
        }
    }
}

/// The FSM-constrained Viterbi beam-search decoder core (spec.md §§1-2).
///
/// Owns everything spec.md §5 "Resource ownership" lists as exclusively the
/// search handle's: the HMM context, the history table, the lextree, and
/// both active sets. FSG models live in its embedded [`FsgSet`]; the
/// acoustic model and dictionary are supplied at [`Search::init`] and held
/// for the handle's lifetime.
pub struct Search {
    config: DecoderConfig,
    dict: Box<dyn Dictionary>,
    hmm_ctx: Box<dyn HmmContext>,
    acoustic: Box<dyn AcousticScorer>,
    fsg_set: FsgSet,
    lextree: Option<LexTree>,
    history: HistoryTable,
    active_cur: ActiveSet,
    active_next: ActiveSet,
    frame: i32,
    bestscore: LogScore,
    beam: LogScore,
    pbeam: LogScore,
    wbeam: LogScore,
    beam_factor: f32,
    final_: bool,
    sil_ci_phone: CiPhone,
    lattice_cache: Option<(i32, Lattice)>,
    stats: Stats,
}

impl Search {
    /// spec.md §6 `init(config, acmod, dict)`. `hmm_ctx` stands in for the
    /// acoustic model's HMM-topology half (spec.md §6 `context_init`); the
    /// senone-scoring half is `acoustic`.
    pub fn init(
        config: DecoderConfig,
        dict: Box<dyn Dictionary>,
        hmm_ctx: Box<dyn HmmContext>,
        acoustic: Box<dyn AcousticScorer>,
    ) -> Result<Self> {
        config.validate()?;
        if config.fsg.is_some() {
            // Loading an FSG from disk is out of scope (spec.md §1); the
            // caller is expected to have parsed it already and to register
            // it via `add_fsg`/`select_fsg`/`reinit`.
            debug!(path = ?config.fsg, "config names a default FSG path; caller must load and register it");
        }

        let sil_wid = dict.to_id("<sil>");
        let sil_ci_phone = if sil_wid >= 0 {
            dict.phones(sil_wid).last().copied().unwrap_or(CiPhone(0))
        } else {
            CiPhone(0)
        };

        let fsg_set = FsgSet::new(config.fsgusefiller, config.fsgusealtpron, config.sil_logprob(), config.fill_logprob());

        Ok(Self {
            beam: config.beam,
            pbeam: config.pbeam,
            wbeam: config.wbeam,
            config,
            dict,
            hmm_ctx,
            acoustic,
            fsg_set,
            lextree: None,
            history: HistoryTable::new(),
            active_cur: ActiveSet::new(),
            active_next: ActiveSet::new(),
            frame: -1,
            bestscore: 0,
            beam_factor: 1.0,
            final_: false,
            sil_ci_phone,
            lattice_cache: None,
            stats: Stats::default(),
        })
    }

    /// spec.md §4.1 `add(name, fsg)`, including silence/filler and
    /// alternate-pronunciation augmentation per the handle's config.
    pub fn add_fsg(&mut self, name: &str, fsg: Box<dyn FsgModel>) {
        self.fsg_set.add(name, fsg, self.dict.as_ref());
    }

    /// spec.md §4.1 `remove(name)`. Tears down the lextree and detaches the
    /// history first if `name` was the active grammar (spec.md §5).
    pub fn remove_fsg(&mut self, name: &str) -> bool {
        let was_active = self.fsg_set.remove(name);
        if was_active {
            self.lextree = None;
            self.history.detach_fsg();
        }
        was_active
    }

    /// spec.md §4.1 `select(name)`. Invalidates the lextree and detaches the
    /// history; call [`Search::reinit`] before the next `start()`.
    pub fn select_fsg(&mut self, name: &str) -> Result<()> {
        self.fsg_set.select(name)?;
        self.lextree = None;
        self.history.detach_fsg();
        Ok(())
    }

    pub fn active_fsg_name(&self) -> Option<&str> {
        self.fsg_set.active_name()
    }

    /// spec.md §4.1 `reinit`: build a new lextree from the active FSG and
    /// bind the history to the `(fsg, dict)` pair.
    pub fn reinit(&mut self) -> Result<()> {
        let name = self.fsg_set.active_name().ok_or(Error::NoActiveFsg)?.to_string();
        let fsg = self.fsg_set.active().ok_or(Error::NoActiveFsg)?;
        let tree = lextree::build(fsg, self.dict.as_ref(), self.hmm_ctx.as_ref(), self.config.wip, self.config.pip);
        self.lextree = Some(tree);
        self.history.set_fsg(&name);
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn frame(&self) -> i32 {
        self.frame
    }

    pub fn bestscore(&self) -> LogScore {
        self.bestscore
    }

    pub fn beam_factor(&self) -> f32 {
        self.beam_factor
    }

    pub fn is_final(&self) -> bool {
        self.final_
    }

    fn ensure_lattice(&mut self) -> Result<()> {
        let rebuild = !matches!(&self.lattice_cache, Some((f, _)) if *f == self.frame);
        if rebuild {
            let fsg = self.fsg_set.active().ok_or(Error::NoActiveFsg)?;
            let lat = lattice::build_lattice(
                &self.history,
                fsg,
                self.dict.as_ref(),
                self.frame,
                self.config.sil_logprob(),
                self.config.fill_logprob(),
            )?;
            self.lattice_cache = Some((self.frame, lat));
        }
        Ok(())
    }

    /// spec.md §6 `lattice() -> dag | ∅`. Memoised by frame count (spec.md
    /// §4.4/§8 "Lattice memoisation": two calls with no intervening `step`
    /// return the same object).
    pub fn lattice(&mut self) -> Option<&Lattice> {
        self.ensure_lattice().ok()?;
        self.lattice_cache.as_ref().map(|(_, l)| l)
    }

    /// spec.md §6 `hyp(out_score) -> string | ∅`, §4.5.
    pub fn hyp(&mut self) -> Option<(String, LogScore)> {
        if self.config.bestpath && self.final_ {
            self.ensure_lattice().ok()?;
            let ascale = self.config.ascale;
            let fsg = self.fsg_set.active()?;
            let lattice = self.lattice_cache.as_ref().map(|(_, l)| l)?;
            let algo = DefaultLatticeAlgorithms;
            let (path, score) = algo.bestpath(lattice, ascale)?;
            let words: Vec<&str> = path
                .iter()
                .filter_map(|&n| {
                    let node = &lattice.nodes[n];
                    if node.wid < 0 || fsg.is_filler(node.wid) {
                        None
                    } else {
                        Some(fsg.word_str(node.wid))
                    }
                })
                .collect();
            Some((words.join(" "), score))
        } else {
            let fsg = self.fsg_set.active()?;
            let exit = extractor::find_exit(&self.history, -1, self.final_, fsg);
            let Some(exit) = exit else {
                if self.final_ {
                    info!("no history entry reaches the FSG final state; no hypothesis");
                }
                return None;
            };
            let score = self.history.entry(exit).score;
            Some((extractor::hyp(&self.history, fsg, exit), score))
        }
    }

    /// spec.md §6 `seg_iter(out_score) -> iterator | ∅`, §4.5.
    pub fn seg_iter(&mut self) -> Option<Vec<Segment<'_>>> {
        if self.config.bestpath && self.final_ {
            self.ensure_lattice().ok()?;
            let ascale = self.config.ascale;
            let fsg = self.fsg_set.active()?;
            let lattice = self.lattice_cache.as_ref().map(|(_, l)| l)?;
            let algo = DefaultLatticeAlgorithms;
            let (path, _) = algo.bestpath(lattice, ascale)?;
            // Iterate every node on the path, not just `windows(2)`'s second
            // element of each pair: `path[0]` (`lattice.start`) is a real
            // word node whenever `build_lattice` found exactly one start
            // candidate (no synthetic `<s>` wrapper), and must still surface
            // as the first segment, the same way `hyp`'s bestpath branch
            // above iterates `path.iter()` over every node including the
            // first.
            let segs: Vec<Segment> = path
                .iter()
                .enumerate()
                .filter_map(|(k, &node_idx)| {
                    let node = &lattice.nodes[node_idx];
                    if node.wid < 0 {
                        return None;
                    }
                    // Lattice links do not keep the FSG transition's own
                    // linguistic log-prob separate from the acoustic
                    // contribution the way history entries do, so `lscr` is
                    // not recoverable here; left at 0 for the bestpath path.
                    let (ascr, ef) = if k == 0 {
                        // No incoming link for the path's first node; its own
                        // node fields already carry its best exit score and
                        // last end-frame.
                        (node.best_exit, node.lef)
                    } else {
                        let from = path[k - 1];
                        let link = lattice.links.iter().find(|l| l.from == from && l.to == node_idx)?;
                        (link.ascr, link.end_frame)
                    };
                    Some(Segment {
                        word: fsg.word_str(node.wid),
                        sf: node.sf,
                        ef,
                        lscr: 0,
                        ascr,
                        lback: 1,
                        prob: 0,
                    })
                })
                .collect();
            Some(segs)
        } else {
            let fsg = self.fsg_set.active()?;
            let exit = extractor::find_exit(&self.history, -1, self.final_, fsg);
            let Some(exit) = exit else {
                if self.final_ {
                    info!("no history entry reaches the FSG final state; no segmentation");
                }
                return None;
            };
            Some(extractor::seg_iter(&self.history, fsg, exit))
        }
    }

    /// spec.md §6 `prob() -> log-posterior | 0`.
    pub fn prob(&mut self) -> LogScore {
        if !(self.config.bestpath && self.final_) {
            return 0;
        }
        if self.ensure_lattice().is_err() {
            return 0;
        }
        let ascale = self.config.ascale;
        let Some(lattice) = self.lattice_cache.as_ref().map(|(_, l)| l) else {
            return 0;
        };
        let algo = DefaultLatticeAlgorithms;
        let Some((_, best)) = algo.bestpath(lattice, ascale) else {
            return 0;
        };
        let logz = algo.posterior_logz(lattice, ascale);
        if logz.is_finite() {
            (best as f64 - logz).round() as LogScore
        } else {
            0
        }
    }
}
