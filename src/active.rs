//! Active-node sets (spec.md §3/§4.2): two alternating ordered collections
//! of pnode references, `active[cur]` and `active[next]`.
//!
//! Grounded in the teacher's preference for plain `Vec`-backed collections
//! over interior-mutable shared structures (`converter/lattice.rs` walks
//! nodes by index rather than `Rc<RefCell<_>>`) — here an `ActiveSet` is
//! just an order-preserving `Vec<PnodeId>`. Deduplication is *not* done by
//! this type: spec.md says "an HMM's frame stamp is used to detect whether
//! it has already been added to next", so the frame engine consults the
//! pnode's own `Hmm::frame()` before calling `push`, and this type only
//! guarantees insertion order and O(1) swap-and-clear.

use crate::lextree::PnodeId;

#[derive(Debug, Default)]
pub struct ActiveSet {
    nodes: Vec<PnodeId>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pnode: PnodeId) {
        self.nodes.push(pnode);
    }

    pub fn iter(&self) -> impl Iterator<Item = PnodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Swap this set's contents with `other`'s, leaving `other` with what
    /// used to be here. Used at the end of `start`/each `step` to rotate
    /// `active[next]` into `active[cur]` without reallocating (spec.md
    /// §4.2g: "Release `active[cur]`; move `active[next] -> active[cur]`").
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.nodes, &mut other.nodes);
    }
}
