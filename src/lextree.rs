//! Lextree interface and reference builder (spec.md §2 "external", §3, §4.1
//! "reinit").
//!
//! spec.md treats lextree construction as an external collaborator; this
//! crate supplies one concrete, in-memory reference builder (`build`) good
//! enough to drive the frame engine's own tests, plus a low-level
//! `LexTree::add_root`/`add_child` API for tests that need precise control
//! over a pnode's context bit-sets (e.g. right-context admission scenarios
//! the automatic builder does not attempt to model). Grounded in the
//! teacher's arena style (`converter/lattice.rs`'s flat, index-addressed
//! node `Vec`): pnodes live in one arena and reference each other by
//! `PnodeId`, never by pointer, matching spec.md §9's "pnodes may remain
//! pointer-linked ... because their topology is fixed after reinit" —
//! "pointer-linked" is realised here as arena indices, idiomatic Rust's
//! usual substitute for the raw node pointers the description has in mind.

use std::collections::HashMap;

use crate::ctx::{CiPhone, CtxSet};
use crate::dict::Dictionary;
use crate::fsg::FsgModel;
use crate::hmm::{Hmm, HmmContext};

pub type PnodeId = u32;

/// Present only on leaf pnodes (word ends): the FSG link this word exit
/// corresponds to.
#[derive(Debug, Clone, Copy)]
pub struct LeafInfo {
    pub wid: i32,
    pub logprob: i32,
    pub to_state: u32,
}

pub struct Pnode {
    pub hmm: Box<dyn Hmm>,
    pub entry_logprob: i32,
    pub ci_ext: CiPhone,
    /// Dual-purpose per spec.md §3/§4.2: on a tree root, the left-context
    /// admission set (which preceding-word last-phones this pronunciation
    /// variant accepts); on a leaf, the right-context bit-set carried onto
    /// the word-exit history entry. A one-phone word's pnode is both.
    pub ctxt: CtxSet,
    pub sibling: Option<PnodeId>,
    pub first_child: Option<PnodeId>,
    pub leaf: Option<LeafInfo>,
    /// True for a pnode reached via [`LexTree::add_root`] rather than
    /// [`LexTree::add_child`]. A pnode that is both root and leaf is a
    /// single-phone word, which spec.md §4.2d's word-exit rule treats the
    /// same as a filler word (right-context independence).
    pub is_root: bool,
}

impl Pnode {
    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }

    /// spec.md §4.2d: "the word is filler *or* a single-phone word" get
    /// right-context-independent word exits.
    pub fn is_single_phone_word(&self) -> bool {
        self.is_root && self.leaf.is_some()
    }
}

#[derive(Default)]
pub struct LexTree {
    arena: Vec<Pnode>,
    roots_by_state: HashMap<u32, Vec<PnodeId>>,
}

impl LexTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_pnode(&self) -> usize {
        self.arena.len()
    }

    pub fn node(&self, id: PnodeId) -> &Pnode {
        &self.arena[id as usize]
    }

    pub fn node_mut(&mut self, id: PnodeId) -> &mut Pnode {
        &mut self.arena[id as usize]
    }

    pub fn roots(&self, state: u32) -> &[PnodeId] {
        self.roots_by_state.get(&state).map_or(&[], |v| v.as_slice())
    }

    /// Every state with at least one attached root.
    pub fn root_states(&self) -> impl Iterator<Item = u32> + '_ {
        self.roots_by_state.keys().copied()
    }

    pub fn children(&self, id: PnodeId) -> Vec<PnodeId> {
        let mut out = Vec::new();
        let mut cur = self.arena[id as usize].first_child;
        while let Some(c) = cur {
            out.push(c);
            cur = self.arena[c as usize].sibling;
        }
        out
    }

    /// Append a new tree root attached to FSG state `state`.
    pub fn add_root(&mut self, state: u32, hmm: Box<dyn Hmm>, entry_logprob: i32, ci_ext: CiPhone, ctxt: CtxSet) -> PnodeId {
        let id = self.arena.len() as PnodeId;
        self.arena.push(Pnode {
            hmm,
            entry_logprob,
            ci_ext,
            ctxt,
            sibling: None,
            first_child: None,
            leaf: None,
            is_root: true,
        });
        self.roots_by_state.entry(state).or_default().push(id);
        id
    }

    /// Append a new child of `parent`.
    pub fn add_child(&mut self, parent: PnodeId, hmm: Box<dyn Hmm>, entry_logprob: i32, ci_ext: CiPhone, ctxt: CtxSet) -> PnodeId {
        let id = self.arena.len() as PnodeId;
        self.arena.push(Pnode {
            hmm,
            entry_logprob,
            ci_ext,
            ctxt,
            sibling: None,
            first_child: None,
            leaf: None,
            is_root: false,
        });
        let old_first = self.arena[parent as usize].first_child;
        self.arena[id as usize].sibling = old_first;
        self.arena[parent as usize].first_child = Some(id);
        id
    }

    pub fn mark_leaf(&mut self, id: PnodeId, leaf: LeafInfo) {
        self.arena[id as usize].leaf = Some(leaf);
    }
}

/// Build a lextree from `fsg`'s non-null word transitions: for every
/// `s -> d` transition labelled `wid`, lay out a linear pnode chain (one
/// pnode per pronunciation phone) rooted at `s`, with the last pnode marked
/// as a leaf carrying the FSG link. `wip`/`pip` (already `lw`-scaled per
/// spec.md §9) are folded into entry log-probabilities: the root's entry
/// score includes the transition's own log-prob plus `wip`; every
/// non-initial phone's entry score includes `pip`.
///
/// This reference builder does not attempt real triphone-conditioned
/// context sets: roots accept any left context and leaves carry any right
/// context (`CtxSet::Any`), which is a strict superset of — and therefore
/// never wrongly rejects — whatever a real triphone-aware builder would
/// compute. Tests that need to exercise genuine context rejection build
/// their pnodes directly via `LexTree::add_root`/`add_child`.
pub fn build(fsg: &dyn FsgModel, dict: &dyn Dictionary, hmm_ctx: &dyn HmmContext, wip: i32, pip: i32) -> LexTree {
    let mut tree = LexTree::new();
    for s in 0..fsg.n_state() {
        for link in fsg.trans_from(s) {
            if link.wid < 0 {
                continue;
            }
            let phones = dict.phones(link.wid);
            if phones.is_empty() {
                continue;
            }
            let mut parent: Option<PnodeId> = None;
            let mut last = 0;
            for (i, &phone) in phones.iter().enumerate() {
                let entry_logprob = if i == 0 { link.logprob + wip } else { pip };
                let id = match parent {
                    None => tree.add_root(s, hmm_ctx.make_hmm(phone), entry_logprob, phone, CtxSet::Any),
                    Some(p) => tree.add_child(p, hmm_ctx.make_hmm(phone), entry_logprob, phone, CtxSet::Any),
                };
                parent = Some(id);
                last = id;
            }
            tree.mark_leaf(
                last,
                LeafInfo {
                    wid: link.wid,
                    logprob: link.logprob,
                    to_state: link.to_state,
                },
            );
        }
    }
    tree
}
