//! The opaque phonetic HMM (spec.md §3/§6).
//!
//! spec.md treats HMM topology evaluation as an external collaborator: the
//! core only needs best/in/out score, out-history, a frame stamp, and
//! `enter`/`vit_eval`. This module defines that contract as a trait plus one
//! concrete, reference left-to-right HMM (`SimpleHmm`) so the crate's own
//! tests can exercise `search` end to end. Grounded in the teacher's
//! `ConnectionMatrix` (flat, index-addressed score table with an explicit
//! "missing" fallback) for the transition-matrix representation, and in the
//! `CostFunction` trait (`converter/cost.rs`) for the shape of "small trait
//! for a pluggable scorer, one default implementation" used throughout this
//! crate.

/// Sentinel for "this state has never been scored" — chosen so that adding
/// a senone score (also bounded, see below) cannot overflow `i32`.
pub const NEG_INF: i32 = i32::MIN / 4;

pub trait Hmm: Send + Sync {
    fn best_score(&self) -> i32;
    fn in_score(&self) -> i32;
    fn out_score(&self) -> i32;
    fn out_history(&self) -> i32;
    /// The frame this HMM's current scores belong to. `-1` if never entered.
    fn frame(&self) -> i32;
    /// Inject (or improve) a path entering this HMM's first state.
    fn enter(&mut self, score: i32, bp: i32, frame: i32);
    /// Run one Viterbi recurrence step using this frame's senone scores,
    /// returning the new best score across all states.
    fn vit_eval(&mut self, senscores: &[i32]) -> i32;
    /// Advance the frame stamp without otherwise touching state, for a
    /// pnode that survives beam pruning by simply persisting into
    /// `active[next]` (as opposed to a fresh `enter` from a parent or
    /// cross-word root, which reseeds state 0). spec.md §4.2g's "did not
    /// survive" test is exactly `frame() == <the frame just evaluated>`
    /// after this call has (or hasn't) run.
    fn survive(&mut self, frame: i32);
    /// Senone ids this HMM would need scored this frame (spec.md §4.2a).
    fn active_senones(&self) -> &[u16];
    fn deactivate(&mut self);
    fn is_active(&self) -> bool;
}

/// A strict left-to-right HMM: `n` emitting states, a self-loop and a
/// forward (no-skip) transition per state, plus a single exit
/// log-probability applied when leaving the last state. This is a
/// simplification of the 3- or 5-state skip topologies real acoustic models
/// use; spec.md treats the HMM as opaque, so any topology satisfying the
/// trait's contract is a faithful reference implementation.
#[derive(Debug, Clone)]
pub struct SimpleHmm {
    senone_seq: Vec<u16>,
    tmat_self: Vec<i32>,
    tmat_next: Vec<i32>,
    exit_logprob: i32,
    state_score: Vec<i32>,
    state_hist: Vec<i32>,
    frame: i32,
    active: bool,
}

impl SimpleHmm {
    /// `senone_seq[i]` is the tied senone id scored in state `i`.
    /// `tmat_self[i]` / `tmat_next[i]` are the (non-positive, log-domain)
    /// self-loop and forward transition probabilities out of state `i`
    /// (`tmat_next` has no entry for the last state; use `exit_logprob`
    /// for leaving the chain instead).
    pub fn new(senone_seq: Vec<u16>, tmat_self: Vec<i32>, tmat_next: Vec<i32>, exit_logprob: i32) -> Self {
        let n = senone_seq.len();
        assert_eq!(tmat_self.len(), n);
        assert_eq!(tmat_next.len(), n.saturating_sub(1));
        Self {
            senone_seq,
            tmat_self,
            tmat_next,
            exit_logprob,
            state_score: vec![NEG_INF; n],
            state_hist: vec![-1; n],
            frame: -1,
            active: false,
        }
    }

    fn n_state(&self) -> usize {
        self.senone_seq.len()
    }
}

impl Hmm for SimpleHmm {
    fn best_score(&self) -> i32 {
        self.state_score.iter().copied().max().unwrap_or(NEG_INF)
    }

    fn in_score(&self) -> i32 {
        self.state_score[0]
    }

    fn out_score(&self) -> i32 {
        let last = self.n_state() - 1;
        if self.state_score[last] <= NEG_INF {
            NEG_INF
        } else {
            self.state_score[last] + self.exit_logprob
        }
    }

    fn out_history(&self) -> i32 {
        self.state_hist[self.n_state() - 1]
    }

    fn frame(&self) -> i32 {
        self.frame
    }

    fn enter(&mut self, score: i32, bp: i32, frame: i32) {
        if !self.active || self.frame < frame {
            // Reactivating after being dormant, or the first incoming path
            // for a new target frame: reset every other state so no stale
            // score from a previous utterance/pnode lifetime leaks through.
            self.state_score = vec![NEG_INF; self.n_state()];
            self.state_hist = vec![-1; self.n_state()];
            self.state_score[0] = score;
            self.state_hist[0] = bp;
            self.frame = frame;
            self.active = true;
        } else if frame == self.frame && score > self.state_score[0] {
            self.state_score[0] = score;
            self.state_hist[0] = bp;
        }
    }

    fn vit_eval(&mut self, senscores: &[i32]) -> i32 {
        let n = self.n_state();
        let mut new_score = vec![NEG_INF; n];
        let mut new_hist = vec![-1i32; n];
        for i in (0..n).rev() {
            let self_loop = if self.state_score[i] > NEG_INF {
                Some(self.state_score[i] + self.tmat_self[i])
            } else {
                None
            };
            let from_prev = if i > 0 && self.state_score[i - 1] > NEG_INF {
                Some(self.state_score[i - 1] + self.tmat_next[i - 1])
            } else {
                None
            };
            let chosen = match (self_loop, from_prev) {
                (Some(a), Some(b)) if b > a => Some((b, self.state_hist[i - 1])),
                (Some(a), _) => Some((a, self.state_hist[i])),
                (None, Some(b)) => Some((b, self.state_hist[i - 1])),
                (None, None) => None,
            };
            if let Some((score, hist)) = chosen {
                new_score[i] = score + senscores[self.senone_seq[i] as usize];
                new_hist[i] = hist;
            }
        }
        self.state_score = new_score;
        self.state_hist = new_hist;
        self.best_score()
    }

    fn survive(&mut self, frame: i32) {
        self.frame = frame;
    }

    fn active_senones(&self) -> &[u16] {
        &self.senone_seq
    }

    fn deactivate(&mut self) {
        self.state_score = vec![NEG_INF; self.n_state()];
        self.state_hist = vec![-1; self.n_state()];
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Shared topology holder the lextree builder uses to mint `Hmm` instances
/// per CI phone (spec.md §6: "`context_init(n_emit_state, tmat, tp, sseq)`").
/// Kept distinct from `Hmm` itself, matching the teacher's split between
/// `CostFunction` (per-edge scorer) and the lattice it scores over — one
/// shared object describing topology, many per-node instances carrying
/// state.
pub trait HmmContext: Send + Sync {
    fn n_emit_state(&self) -> usize;
    /// Build a fresh, inactive HMM instance tied to `phone`'s senone
    /// sequence.
    fn make_hmm(&self, phone: crate::ctx::CiPhone) -> Box<dyn Hmm>;
}

/// Reference `HmmContext`: one shared left-to-right topology (self-loop and
/// forward transitions, single exit probability) reused across every CI
/// phone, with a per-phone senone sequence registered explicitly. Phones
/// with no registered sequence fall back to a one-senone-per-state sequence
/// derived from the phone id itself, which is enough to give distinct
/// phones distinct (if synthetic) acoustics in tests.
#[derive(Debug, Clone)]
pub struct SimpleHmmContext {
    n_emit_state: usize,
    tmat_self: Vec<i32>,
    tmat_next: Vec<i32>,
    exit_logprob: i32,
    senone_seq_for: std::collections::HashMap<crate::ctx::CiPhone, Vec<u16>>,
}

impl SimpleHmmContext {
    pub fn new(n_emit_state: usize, tmat_self: Vec<i32>, tmat_next: Vec<i32>, exit_logprob: i32) -> Self {
        assert_eq!(tmat_self.len(), n_emit_state);
        assert_eq!(tmat_next.len(), n_emit_state.saturating_sub(1));
        Self {
            n_emit_state,
            tmat_self,
            tmat_next,
            exit_logprob,
            senone_seq_for: std::collections::HashMap::new(),
        }
    }

    pub fn set_senone_seq(&mut self, phone: crate::ctx::CiPhone, senones: Vec<u16>) {
        assert_eq!(senones.len(), self.n_emit_state);
        self.senone_seq_for.insert(phone, senones);
    }
}

impl HmmContext for SimpleHmmContext {
    fn n_emit_state(&self) -> usize {
        self.n_emit_state
    }

    fn make_hmm(&self, phone: crate::ctx::CiPhone) -> Box<dyn Hmm> {
        let seq = self
            .senone_seq_for
            .get(&phone)
            .cloned()
            .unwrap_or_else(|| vec![phone.0; self.n_emit_state]);
        Box::new(SimpleHmm::new(seq, self.tmat_self.clone(), self.tmat_next.clone(), self.exit_logprob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_state_hmm(senone: u16, exit_logprob: i32) -> SimpleHmm {
        SimpleHmm::new(vec![senone], vec![-100], vec![], exit_logprob)
    }

    #[test]
    fn fresh_hmm_is_inactive_with_neg_inf_scores() {
        let hmm = single_state_hmm(0, 0);
        assert!(!hmm.is_active());
        assert_eq!(hmm.frame(), -1);
        assert_eq!(hmm.best_score(), NEG_INF);
    }

    #[test]
    fn enter_then_eval_produces_finite_score() {
        let mut hmm = single_state_hmm(0, -10);
        hmm.enter(0, 5, 0);
        assert!(hmm.is_active());
        let score = hmm.vit_eval(&[-200]);
        assert_eq!(score, -200); // enter(0) + senscore(-200), no self-loop applied yet
        assert_eq!(hmm.out_score(), -200 + -10);
        assert_eq!(hmm.out_history(), 5);
    }

    #[test]
    fn enter_keeps_best_of_multiple_incoming_paths_same_frame() {
        let mut hmm = single_state_hmm(0, 0);
        hmm.enter(-500, 1, 0);
        hmm.enter(-100, 2, 0); // better score, same target frame
        assert_eq!(hmm.in_score(), -100);
        hmm.enter(-900, 3, 0); // worse, should not overwrite
        assert_eq!(hmm.in_score(), -100);
    }

    #[test]
    fn reentering_a_newer_frame_resets_state() {
        let mut hmm = single_state_hmm(0, 0);
        hmm.enter(-100, 1, 0);
        hmm.vit_eval(&[-10]);
        hmm.enter(-50, 2, 1);
        assert_eq!(hmm.in_score(), -50);
        assert_eq!(hmm.frame(), 1);
    }

    #[test]
    fn self_loop_accumulates_over_frames() {
        let mut hmm = single_state_hmm(0, 0);
        hmm.enter(0, 0, 0);
        let first = hmm.vit_eval(&[-10]);
        // Re-"enter" is not called between frames in this unit test; a real
        // frame engine would call enter(..., frame+1, ...) before the next
        // vit_eval. Here we just confirm the self-loop transition is wired.
        hmm.state_score[0] = first; // simulate carry-over for the next step
        let second = hmm.vit_eval(&[-10]);
        assert_eq!(second, first - 100 - 10);
    }

    #[test]
    fn survive_bumps_frame_without_touching_scores() {
        let mut hmm = single_state_hmm(0, 0);
        hmm.enter(0, 7, 0);
        hmm.vit_eval(&[-10]);
        let before = hmm.best_score();
        hmm.survive(1);
        assert_eq!(hmm.frame(), 1);
        assert_eq!(hmm.best_score(), before);
    }

    #[test]
    fn deactivate_clears_state() {
        let mut hmm = single_state_hmm(0, 0);
        hmm.enter(0, 0, 0);
        hmm.vit_eval(&[-10]);
        hmm.deactivate();
        assert!(!hmm.is_active());
        assert_eq!(hmm.best_score(), NEG_INF);
    }

    #[test]
    fn multi_state_chain_propagates_history_forward() {
        let mut hmm = SimpleHmm::new(vec![0, 1, 2], vec![-50, -50, -50], vec![-10, -10], -5);
        hmm.enter(0, 42, 0);
        hmm.vit_eval(&[-1, -1000, -1000]); // only state 0 scores meaningfully
        assert_eq!(hmm.out_history(), -1, "state 2 not reached yet");
        // Manually march two more recurrences without re-entering, letting
        // the forward transition carry state 0's history into state 2.
        hmm.vit_eval(&[-1, -1, -1000]);
        hmm.vit_eval(&[-1, -1, -1]);
        assert_eq!(hmm.out_history(), 42);
    }

    #[test]
    fn context_makes_distinct_hmms_per_phone_by_default() {
        use crate::ctx::CiPhone;
        let ctx = SimpleHmmContext::new(1, vec![-10], vec![], -5);
        let mut a = ctx.make_hmm(CiPhone(3));
        let mut b = ctx.make_hmm(CiPhone(7));
        a.enter(0, 0, 0);
        b.enter(0, 0, 0);
        // Senone ids default to the phone id, so the same senscore vector
        // scores them differently once the vector is long enough.
        let senscores: Vec<i32> = (0..8).map(|i| -(i as i32)).collect();
        assert_ne!(a.vit_eval(&senscores), b.vit_eval(&senscores));
    }

    #[test]
    fn context_honours_registered_senone_sequence() {
        use crate::ctx::CiPhone;
        let mut ctx = SimpleHmmContext::new(2, vec![-1, -1], vec![-1], 0);
        ctx.set_senone_seq(CiPhone(0), vec![5, 6]);
        let mut hmm = ctx.make_hmm(CiPhone(0));
        hmm.enter(0, 0, 0);
        let score = hmm.vit_eval(&[0, 0, 0, 0, 0, 0, -42, -43]);
        assert_eq!(score, -42);
    }
}
