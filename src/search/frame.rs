//! Frame-engine sub-stages (spec.md §4.2, sub-stages a-g), in the
//! load-bearing order spec.md §5 specifies: activation -> scoring ->
//! evaluation -> prune-propagate -> `end_frame` -> null closure ->
//! `end_frame` -> cross-word -> active-set rotation.

use tracing::{debug, error, info, warn};

use crate::config::LogScore;
use crate::ctx::CtxSet;
use crate::error::{Error, Result};
use crate::fsg::FsgLink;
use crate::hmm::{Hmm, NEG_INF};
use crate::lextree::PnodeId;

use super::Search;

impl Search {
    /// spec.md §4.2 `start()`.
    pub fn start(&mut self) -> Result<()> {
        if self.lextree.is_none() {
            return Err(Error::NoActiveFsg);
        }

        self.beam_factor = 1.0;
        self.beam = self.config.beam;
        self.pbeam = self.config.pbeam;
        self.wbeam = self.config.wbeam;

        self.history.utt_start();
        self.final_ = false;
        self.frame = -1;
        self.bestscore = 0;
        self.active_cur.clear();
        self.active_next.clear();
        self.lattice_cache = None;
        self.stats = super::Stats::default();

        let start_state = self.fsg_set.active().ok_or(Error::NoActiveFsg)?.start_state();
        let sentinel = self.history.add(None, -1, 0, -1, self.sil_ci_phone, CtxSet::Any);

        self.propagate_null_closure(sentinel)?;
        self.activate_cross_word(sentinel)?;

        self.active_cur.swap(&mut self.active_next);
        self.active_next.clear();
        self.frame = 0;

        debug!(start_state, n_active = self.active_cur.len(), "utterance started");
        Ok(())
    }

    /// spec.md §4.2 `step()`. Returns `Ok(false)` on frame underflow (no
    /// acoustic frame ready) without touching any state.
    pub fn step(&mut self) -> Result<bool> {
        if self.lextree.is_none() {
            return Err(Error::NoActiveFsg);
        }

        // (a) senone activation
        if !self.acoustic.compallsen() {
            self.acoustic.clear_active();
            let lextree = self.lextree.as_ref().expect("checked above");
            for id in self.active_cur.iter() {
                for &senone in lextree.node(id).hmm.active_senones() {
                    self.acoustic.activate_senone(senone);
                }
            }
        }

        // (b) acoustic scoring
        let Some(senscores) = self.acoustic.score(self.frame.max(0) as usize) else {
            return Ok(false);
        };

        // (c) HMM evaluation & dynamic beam adaptation
        let bpidx_start = self.history.n_entries();
        self.evaluate(&senscores)?;

        // (d) prune & propagate
        self.prune_propagate()?;

        // (e) null-transition closure
        self.propagate_null_closure(bpidx_start)?;

        // (f) cross-word transitions
        self.activate_cross_word(bpidx_start)?;

        // (g) deactivation & swap
        self.deactivate_and_rotate();

        self.stats.n_frame += 1;
        Ok(true)
    }

    /// spec.md §4.2 `finish()`.
    pub fn finish(&mut self) {
        if let Some(lextree) = self.lextree.as_mut() {
            for id in self.active_cur.iter() {
                lextree.node_mut(id).hmm.deactivate();
            }
            for id in self.active_next.iter() {
                lextree.node_mut(id).hmm.deactivate();
            }
        }
        self.active_cur.clear();
        self.active_next.clear();
        self.final_ = true;

        let n_pnode = self.lextree.as_ref().map_or(0, |t| t.n_pnode() as u64);
        let expected_max = n_pnode * self.stats.n_frame as u64;
        if self.stats.n_hmm_eval > expected_max {
            warn!(
                n_hmm_eval = self.stats.n_hmm_eval,
                expected_max, "HMM evaluation count exceeds lextree size times frame count"
            );
        }
        info!(
            frames = self.stats.n_frame,
            n_hmm_eval = self.stats.n_hmm_eval,
            mean_active = self.stats.mean_active(),
            "utterance finished"
        );
    }

    /// Sub-stage (c). Returns the number of pnodes evaluated this frame.
    fn evaluate(&mut self, senscores: &[i32]) -> Result<usize> {
        let ids: Vec<PnodeId> = self.active_cur.iter().collect();
        let n = ids.len();

        let lextree = self.lextree.as_mut().expect("lextree built by reinit before start");
        if n > lextree.n_pnode() {
            panic!(
                "active HMM count ({n}) exceeds lextree size ({}): history/active-set corruption",
                lextree.n_pnode()
            );
        }

        let mut best = NEG_INF;
        for &id in &ids {
            let score = lextree.node_mut(id).hmm.vit_eval(senscores);
            if score > best {
                best = score;
            }
        }

        if n == 0 {
            error!(frame = self.frame, "no active HMMs this frame");
        } else {
            self.bestscore = best;
        }

        if self.config.maxhmmpf > 0 && n as i64 > self.config.maxhmmpf {
            self.beam_factor = (self.beam_factor * 0.9).max(0.1);
        } else {
            self.beam_factor = 1.0;
        }
        self.beam = scale_beam(self.config.beam, self.beam_factor);
        self.pbeam = scale_beam(self.config.pbeam, self.beam_factor);
        self.wbeam = scale_beam(self.config.wbeam, self.beam_factor);

        self.stats.n_hmm_eval += n as u64;
        self.stats.n_hmm_active_total += n as u64;

        Ok(n)
    }

    /// Sub-stage (d): survive/propagate-within-word/record-word-exit, per
    /// active pnode, then finalise the frame's history additions.
    fn prune_propagate(&mut self) -> Result<()> {
        let thresh = self.bestscore + self.beam;
        let phone_thresh = self.bestscore + self.pbeam;
        let word_thresh = self.bestscore + self.wbeam;
        let next_frame = self.frame + 1;
        let start_state = self.fsg_set.active().ok_or(Error::NoActiveFsg)?.start_state();

        let cur_ids: Vec<PnodeId> = self.active_cur.iter().collect();

        for id in cur_ids {
            let lextree = self.lextree.as_mut().expect("lextree built by reinit before start");
            let best = lextree.node(id).hmm.best_score();
            if best < thresh {
                continue;
            }

            let already_next = lextree.node(id).hmm.frame() == next_frame;
            if !already_next {
                lextree.node_mut(id).hmm.survive(next_frame);
                self.active_next.push(id);
            }

            let exit_score = lextree.node(id).hmm.out_score();
            let is_leaf = lextree.node(id).is_leaf();

            if !is_leaf {
                if exit_score < phone_thresh {
                    continue;
                }
                let out_hist = lextree.node(id).hmm.out_history();
                let children = lextree.children(id);
                for child in children {
                    let entry_logprob = lextree.node(child).entry_logprob;
                    let new = exit_score + entry_logprob;
                    if new < thresh {
                        continue;
                    }
                    let in_score = lextree.node(child).hmm.in_score();
                    if new <= in_score {
                        continue;
                    }
                    let child_already_next = lextree.node(child).hmm.frame() == next_frame;
                    lextree.node_mut(child).hmm.enter(new, out_hist, next_frame);
                    if !child_already_next {
                        self.active_next.push(child);
                    }
                }
            } else if exit_score >= word_thresh {
                let node = lextree.node(id);
                let leaf = node.leaf.expect("is_leaf() implies leaf is Some");
                let is_filler = self.fsg_set.active().ok_or(Error::NoActiveFsg)?.is_filler(leaf.wid);
                // spec.md §4.2d: filler or single-phone words get
                // right-context-independent word exits.
                let rc = if node.is_single_phone_word() || is_filler { CtxSet::Any } else { node.ctxt };
                let lc = node.ci_ext;
                let out_hist = node.hmm.out_history();
                self.history.add(
                    Some(FsgLink {
                        wid: leaf.wid,
                        logprob: leaf.logprob,
                        to_state: leaf.to_state,
                    }),
                    self.frame,
                    exit_score,
                    out_hist,
                    lc,
                    rc,
                );
            }
        }

        self.history.end_frame(start_state);
        Ok(())
    }

    /// Sub-stage (e): one-step null-transition propagation (the FSG's null
    /// closure is precomputed, so one step suffices — spec.md §9).
    fn propagate_null_closure(&mut self, bpidx_start: usize) -> Result<()> {
        let word_thresh = self.bestscore + self.wbeam;
        let start_state = self.fsg_set.active().ok_or(Error::NoActiveFsg)?.start_state();
        let indices: Vec<usize> = self.history.live_since(bpidx_start).collect();

        for i in indices {
            let entry = *self.history.entry(i);
            let s = self.history.dest_state(i, start_state);
            let dests: Vec<u32> = {
                let fsg = self.fsg_set.active().ok_or(Error::NoActiveFsg)?;
                fsg.null_dests(s).to_vec()
            };
            for d in dests {
                let null_link = {
                    let fsg = self.fsg_set.active().ok_or(Error::NoActiveFsg)?;
                    fsg.null_trans(s, d)
                };
                let Some(null_link) = null_link else { continue };
                let new = entry.score + null_link.logprob;
                if new >= word_thresh {
                    self.history.add(Some(null_link), entry.frame, new, i as i32, entry.lc, entry.rc);
                }
            }
        }

        self.history.end_frame(start_state);
        Ok(())
    }

    /// Sub-stage (f): enter lextree roots reachable from each live history
    /// entry added since `bpidx_start` (including this frame's
    /// null-propagated entries).
    fn activate_cross_word(&mut self, bpidx_start: usize) -> Result<()> {
        let thresh = self.bestscore + self.beam;
        let next_frame = self.frame + 1;
        let start_state = self.fsg_set.active().ok_or(Error::NoActiveFsg)?.start_state();
        let indices: Vec<usize> = self.history.live_since(bpidx_start).collect();

        for i in indices {
            let entry = *self.history.entry(i);
            let dest_state = self.history.dest_state(i, start_state);
            let roots: Vec<PnodeId> = self
                .lextree
                .as_ref()
                .expect("lextree built by reinit before start")
                .roots(dest_state)
                .to_vec();

            for root in roots {
                let lextree = self.lextree.as_mut().expect("lextree built by reinit before start");
                let (root_ctxt, root_ci_ext, entry_logprob) = {
                    let node = lextree.node(root);
                    (node.ctxt, node.ci_ext, node.entry_logprob)
                };

                // Left-context admissible iff the root's context bit-set
                // contains the entry's last CI-phone; right-context
                // admissible iff the entry's rc bit-set contains the root's
                // own CI-phone extension.
                if !root_ctxt.contains(entry.lc) || !entry.rc.contains(root_ci_ext) {
                    continue;
                }

                let new = entry.score + entry_logprob;
                if new < thresh {
                    continue;
                }
                let in_score = lextree.node(root).hmm.in_score();
                if new <= in_score {
                    continue;
                }

                let already_next = lextree.node(root).hmm.frame() == next_frame;
                lextree.node_mut(root).hmm.enter(new, i as i32, next_frame);
                if !already_next {
                    self.active_next.push(root);
                }
            }
        }

        Ok(())
    }

    /// Sub-stage (g): deactivate pnodes that did not survive, rotate the
    /// active sets, and advance `frame`.
    fn deactivate_and_rotate(&mut self) {
        let ids: Vec<PnodeId> = self.active_cur.iter().collect();
        let frame = self.frame;
        if let Some(lextree) = self.lextree.as_mut() {
            for id in ids {
                if lextree.node(id).hmm.frame() == frame {
                    lextree.node_mut(id).hmm.deactivate();
                }
            }
        }
        self.active_cur.swap(&mut self.active_next);
        self.active_next.clear();
        self.frame += 1;
    }
}

fn scale_beam(beam: LogScore, factor: f32) -> LogScore {
    (beam as f32 * factor) as LogScore
}
