//! FSG model: a weighted finite-state transducer over words.
//!
//! spec.md §3: states `{0..S-1}`, a distinguished start and final state, and
//! directed transitions each carrying a word id (or null) and a
//! log-probability. The model exposes transitions `s -> d`, the unique null
//! transition `s -> d` (transitive closure precomputed, spec.md §9
//! "Null-closure precondition"), the vocabulary, and per-word silence/filler
//! flags.
//!
//! Grounded in the teacher's `Dictionary` trait / `TrieDictionary` pair the
//! same way `dict.rs` is: a trait for what the frame engine needs, plus one
//! concrete, in-memory reference model (`SimpleFsg`) good enough to drive
//! tests without a real JSGF/FSG-file loader (out of scope per spec.md §1).

pub mod set;

use std::collections::HashMap;

/// A non-null FSG transition: carries a word id and a log-probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsgLink {
    pub wid: i32,
    pub logprob: i32,
    pub to_state: u32,
}

pub trait FsgModel: Send + Sync {
    fn n_state(&self) -> u32;
    fn start_state(&self) -> u32;
    fn final_state(&self) -> u32;

    /// Non-null transitions from `s` directly to `d`.
    fn trans(&self, s: u32, d: u32) -> Vec<FsgLink>;
    /// All non-null outgoing transitions from `s`.
    fn trans_from(&self, s: u32) -> &[FsgLink];
    /// The unique null transition from `s` to `d`, if the (precomputed,
    /// transitively closed) null graph connects them.
    fn null_trans(&self, s: u32, d: u32) -> Option<FsgLink>;
    /// All states directly null-reachable from `s` (post-closure).
    fn null_dests(&self, s: u32) -> &[u32];

    fn word_str(&self, wid: i32) -> &str;
    fn is_filler(&self, wid: i32) -> bool;

    fn word_add(&mut self, word: &str) -> i32;
    fn add_trans(&mut self, s: u32, d: u32, wid: i32, logprob: i32);
    fn add_null_trans(&mut self, s: u32, d: u32, logprob: i32);
    /// Mark `word` as a silence/filler word and add a self-loop transition
    /// on `state` at the given (already `lw`-scaled) log-probability.
    fn add_silence(&mut self, word: i32, state: u32, logprob: i32);
    /// Record that `alt` is an alternate pronunciation of `base` (bookkeeping
    /// only; duplicating transitions onto `alt` is the caller's job — see
    /// `set::FsgSet`, which owns the augmentation policy).
    fn add_alt(&mut self, base: i32, alt: i32);

    fn has_sil(&self) -> bool;
    fn has_alt(&self) -> bool;
    fn set_has_sil(&mut self, v: bool);

    /// Recompute the transitive closure of null transitions. Must be called
    /// after any `add_null_trans` call before the model is used for
    /// decoding — spec.md §9 requires the closure to be precomputed, never
    /// re-derived by repeated one-step propagation at decode time.
    fn close_null_transitions(&mut self);
}

/// In-memory reference FSG. Not a JSGF/FSG-file loader — spec.md §1 treats
/// grammar loading as an external collaborator.
#[derive(Debug, Default)]
pub struct SimpleFsg {
    n_state: u32,
    start: u32,
    final_state: u32,
    trans: Vec<Vec<FsgLink>>,
    raw_null: Vec<(u32, u32, i32)>,
    null_closed: HashMap<(u32, u32), FsgLink>,
    null_dests: Vec<Vec<u32>>,
    words: Vec<String>,
    word_ids: HashMap<String, i32>,
    filler: std::collections::HashSet<i32>,
    has_sil: bool,
    has_alt: bool,
}

impl SimpleFsg {
    pub fn new(n_state: u32, start: u32, final_state: u32) -> Self {
        Self {
            n_state,
            start,
            final_state,
            trans: vec![Vec::new(); n_state as usize],
            raw_null: Vec::new(),
            null_closed: HashMap::new(),
            null_dests: vec![Vec::new(); n_state as usize],
            words: Vec::new(),
            word_ids: HashMap::new(),
            filler: std::collections::HashSet::new(),
            has_sil: false,
            has_alt: false,
        }
    }
}

impl FsgModel for SimpleFsg {
    fn n_state(&self) -> u32 {
        self.n_state
    }

    fn start_state(&self) -> u32 {
        self.start
    }

    fn final_state(&self) -> u32 {
        self.final_state
    }

    fn trans(&self, s: u32, d: u32) -> Vec<FsgLink> {
        self.trans[s as usize]
            .iter()
            .filter(|l| l.to_state == d)
            .copied()
            .collect()
    }

    fn trans_from(&self, s: u32) -> &[FsgLink] {
        &self.trans[s as usize]
    }

    fn null_trans(&self, s: u32, d: u32) -> Option<FsgLink> {
        self.null_closed.get(&(s, d)).copied()
    }

    fn null_dests(&self, s: u32) -> &[u32] {
        &self.null_dests[s as usize]
    }

    fn word_str(&self, wid: i32) -> &str {
        &self.words[wid as usize]
    }

    fn is_filler(&self, wid: i32) -> bool {
        self.filler.contains(&wid)
    }

    fn word_add(&mut self, word: &str) -> i32 {
        if let Some(&id) = self.word_ids.get(word) {
            return id;
        }
        let id = self.words.len() as i32;
        self.words.push(word.to_string());
        self.word_ids.insert(word.to_string(), id);
        id
    }

    fn add_trans(&mut self, s: u32, d: u32, wid: i32, logprob: i32) {
        self.trans[s as usize].push(FsgLink {
            wid,
            logprob,
            to_state: d,
        });
    }

    fn add_null_trans(&mut self, s: u32, d: u32, logprob: i32) {
        self.raw_null.push((s, d, logprob));
    }

    fn add_silence(&mut self, word: i32, state: u32, logprob: i32) {
        self.filler.insert(word);
        self.add_trans(state, state, word, logprob);
    }

    fn add_alt(&mut self, _base: i32, _alt: i32) {
        self.has_alt = true;
    }

    fn has_sil(&self) -> bool {
        self.has_sil
    }

    fn has_alt(&self) -> bool {
        self.has_alt
    }

    fn set_has_sil(&mut self, v: bool) {
        self.has_sil = v;
    }

    fn close_null_transitions(&mut self) {
        let n = self.n_state as usize;
        let mut dist: Vec<Vec<Option<i32>>> = vec![vec![None; n]; n];
        for &(s, d, lp) in &self.raw_null {
            let slot = &mut dist[s as usize][d as usize];
            *slot = Some(slot.map_or(lp, |cur| cur.max(lp)));
        }
        // Floyd–Warshall over the "maximize log-prob sum" semiring: every
        // edge weight is <= 0, so chaining more hops never helps — this
        // just finds, for every connected pair, the best of possibly
        // several null chains between them.
        for k in 0..n {
            for i in 0..n {
                let Some(dik) = dist[i][k] else { continue };
                for j in 0..n {
                    let Some(dkj) = dist[k][j] else { continue };
                    let candidate = dik + dkj;
                    let slot = &mut dist[i][j];
                    *slot = Some(slot.map_or(candidate, |cur| cur.max(candidate)));
                }
            }
        }

        self.null_closed.clear();
        self.null_dests = vec![Vec::new(); n];
        for i in 0..n {
            for j in 0..n {
                if let Some(lp) = dist[i][j] {
                    self.null_closed.insert(
                        (i as u32, j as u32),
                        FsgLink {
                            wid: -1,
                            logprob: lp,
                            to_state: j as u32,
                        },
                    );
                    self.null_dests[i].push(j as u32);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_transition_roundtrips() {
        let mut fsg = SimpleFsg::new(2, 0, 1);
        fsg.add_trans(0, 1, 7, -100);
        let links = fsg.trans(0, 1);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].wid, 7);
        assert_eq!(links[0].logprob, -100);
    }

    #[test]
    fn null_closure_single_hop() {
        let mut fsg = SimpleFsg::new(2, 0, 1);
        fsg.add_null_trans(0, 1, -50);
        fsg.close_null_transitions();
        let n = fsg.null_trans(0, 1).unwrap();
        assert_eq!(n.logprob, -50);
        assert_eq!(n.wid, -1);
    }

    #[test]
    fn null_closure_transitive_chain() {
        // 0 -ε(-10)-> 1 -ε(-20)-> 2 must close to 0 -ε(-30)-> 2
        let mut fsg = SimpleFsg::new(3, 0, 2);
        fsg.add_null_trans(0, 1, -10);
        fsg.add_null_trans(1, 2, -20);
        fsg.close_null_transitions();
        assert_eq!(fsg.null_trans(0, 2).unwrap().logprob, -30);
        assert_eq!(fsg.null_trans(0, 1).unwrap().logprob, -10);
        assert_eq!(fsg.null_trans(1, 2).unwrap().logprob, -20);
        assert!(fsg.null_trans(2, 0).is_none());
    }

    #[test]
    fn null_closure_keeps_best_of_parallel_chains() {
        let mut fsg = SimpleFsg::new(3, 0, 2);
        fsg.add_null_trans(0, 2, -100); // direct, worse
        fsg.add_null_trans(0, 1, -10);
        fsg.add_null_trans(1, 2, -10); // chained, -20 total: better
        fsg.close_null_transitions();
        assert_eq!(fsg.null_trans(0, 2).unwrap().logprob, -20);
    }

    #[test]
    fn word_add_is_idempotent() {
        let mut fsg = SimpleFsg::new(1, 0, 0);
        let a = fsg.word_add("<s>");
        let b = fsg.word_add("<s>");
        assert_eq!(a, b);
        assert_eq!(fsg.word_str(a), "<s>");
    }

    #[test]
    fn silence_self_loop_marks_filler() {
        let mut fsg = SimpleFsg::new(1, 0, 0);
        let sil = fsg.word_add("<sil>");
        fsg.add_silence(sil, 0, -200);
        assert!(fsg.is_filler(sil));
        let links = fsg.trans(0, 0);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].wid, sil);
    }
}
