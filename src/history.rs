//! History table (spec.md §3/§4.3): an append-only backpointer store with
//! per-frame boundary finalisation.
//!
//! Grounded in the teacher's `converter/lattice.rs`, which keeps its DAG as
//! a flat `Vec` of nodes addressed by index rather than a pointer graph —
//! the same arena-by-index idiom applies here to backpointer entries, per
//! spec.md §9's "Graph ownership" note.

use std::collections::HashMap;

use crate::ctx::{CiPhone, CtxSet};
use crate::fsg::FsgLink;

#[derive(Debug, Clone, Copy)]
pub struct HistEntry {
    pub link: Option<FsgLink>,
    pub frame: i32,
    pub score: i32,
    pub pred: i32,
    pub lc: CiPhone,
    pub rc: CtxSet,
}

#[derive(Debug, Default)]
pub struct HistoryTable {
    entries: Vec<HistEntry>,
    /// Entries superseded by a same-key, same-segment entry with a better
    /// score. Kept (not removed) because earlier entries may already be
    /// referenced as someone else's `pred`; `live_since` filters them out
    /// of further propagation so coalescing still bounds the branching
    /// factor the way spec.md describes.
    dead: Vec<bool>,
    last_boundary: usize,
    fsg_name: Option<String>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, link: Option<FsgLink>, frame: i32, score: i32, pred: i32, lc: CiPhone, rc: CtxSet) -> usize {
        let idx = self.entries.len();
        self.entries.push(HistEntry { link, frame, score, pred, lc, rc });
        self.dead.push(false);
        idx
    }

    pub fn entry(&self, i: usize) -> &HistEntry {
        &self.entries[i]
    }

    pub fn n_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_live(&self, i: usize) -> bool {
        !self.dead[i]
    }

    /// The FSG state an entry leads into: its link's destination state, or
    /// `start_state` for the sentinel (link = None).
    pub fn dest_state(&self, i: usize, start_state: u32) -> u32 {
        self.entries[i].link.map(|l| l.to_state).unwrap_or(start_state)
    }

    /// Idempotent: finalises entries added since the previous call by
    /// coalescing same-`(to-state, rc)` entries within this segment down to
    /// the best score, per spec.md §4.3.
    pub fn end_frame(&mut self, start_state: u32) {
        let start = self.last_boundary;
        let end = self.entries.len();
        if start >= end {
            return;
        }
        let mut best: HashMap<(u32, CtxSet), (usize, i32)> = HashMap::new();
        for i in start..end {
            if self.dead[i] {
                continue;
            }
            let key = (self.dest_state(i, start_state), self.entries[i].rc);
            match best.get(&key).copied() {
                Some((_, best_score)) if best_score >= self.entries[i].score => {
                    self.dead[i] = true;
                }
                Some((prev_idx, _)) => {
                    self.dead[prev_idx] = true;
                    best.insert(key, (i, self.entries[i].score));
                }
                None => {
                    best.insert(key, (i, self.entries[i].score));
                }
            }
        }
        self.last_boundary = end;
    }

    /// Live entries added since `start` (an earlier `n_entries()` snapshot).
    pub fn live_since(&self, start: usize) -> impl Iterator<Item = usize> + '_ {
        (start..self.entries.len()).filter(move |&i| self.is_live(i))
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.dead.clear();
        self.last_boundary = 0;
    }

    pub fn utt_start(&mut self) {
        self.reset();
    }

    pub fn set_fsg(&mut self, fsg_name: &str) {
        self.fsg_name = Some(fsg_name.to_string());
    }

    /// spec.md §4.1/§5: `select`/`remove` of the active FSG detaches the
    /// history's grammar association; a subsequent `reinit` re-binds it via
    /// [`Self::set_fsg`].
    pub fn detach_fsg(&mut self) {
        self.fsg_name = None;
    }

    pub fn bound_fsg(&self) -> Option<&str> {
        self.fsg_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(to_state: u32) -> FsgLink {
        FsgLink { wid: 1, logprob: -10, to_state }
    }

    #[test]
    fn add_returns_increasing_indices() {
        let mut h = HistoryTable::new();
        let a = h.add(None, -1, 0, -1, CiPhone(0), CtxSet::Any);
        let b = h.add(Some(link(1)), 0, -50, a as i32, CiPhone(0), CtxSet::Any);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(h.n_entries(), 2);
    }

    #[test]
    fn end_frame_is_idempotent() {
        let mut h = HistoryTable::new();
        h.add(None, 0, -10, -1, CiPhone(0), CtxSet::Any);
        h.end_frame(0);
        let live_before: Vec<_> = h.live_since(0).collect();
        h.end_frame(0); // nothing new since last call
        let live_after: Vec<_> = h.live_since(0).collect();
        assert_eq!(live_before, live_after);
    }

    #[test]
    fn end_frame_coalesces_same_key_keeping_best_score() {
        let mut h = HistoryTable::new();
        let worse = h.add(Some(link(2)), 0, -500, -1, CiPhone(0), CtxSet::Any);
        let better = h.add(Some(link(2)), 0, -100, -1, CiPhone(0), CtxSet::Any);
        h.end_frame(0);
        assert!(!h.is_live(worse), "lower-scoring entry is superseded");
        assert!(h.is_live(better), "higher-scoring entry survives");
    }

    #[test]
    fn reset_clears_everything() {
        let mut h = HistoryTable::new();
        h.add(None, 0, 0, -1, CiPhone(0), CtxSet::Any);
        h.set_fsg("g1");
        h.reset();
        assert_eq!(h.n_entries(), 0);
        assert_eq!(h.bound_fsg(), Some("g1")); // reset clears entries, not fsg binding
    }

    #[test]
    fn detach_fsg_clears_binding_without_touching_entries() {
        let mut h = HistoryTable::new();
        h.add(None, 0, 0, -1, CiPhone(0), CtxSet::Any);
        h.set_fsg("g1");
        h.detach_fsg();
        assert_eq!(h.bound_fsg(), None);
        assert_eq!(h.n_entries(), 1);
    }

    #[test]
    fn same_frame_predecessors_remain_valid_after_coalescing() {
        let mut h = HistoryTable::new();
        let sentinel = h.add(None, -1, 0, -1, CiPhone(0), CtxSet::Any);
        let null_prop = h.add(Some(link(2)), -1, -5, sentinel as i32, CiPhone(0), CtxSet::Any);
        h.end_frame(0);
        // A later stage's own predecessor pointer must still resolve.
        assert_eq!(h.entry(null_prop).pred, sentinel as i32);
    }
}
