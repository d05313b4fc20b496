//! Lattice builder (spec.md §3/§4.4): turns the history table into an
//! acyclic word graph with timing and link scores, synthesising start/end
//! nodes and bypassing fillers.
//!
//! Grounded in the teacher's `converter/lattice.rs`: a flat `Vec<Node>` /
//! `Vec<Link>` arena addressed by index, built in two scanning passes (node
//! creation, then link creation) exactly like the teacher's lattice builder
//! separates "insert all candidate nodes" from "wire transitions between
//! them".

use std::collections::{HashMap, VecDeque};

use crate::dict::Dictionary;
use crate::error::{Error, Result};
use crate::fsg::FsgModel;
use crate::history::HistoryTable;

/// Synthetic word ids for the boundary nodes spec.md §4.4 has the builder
/// synthesise when the utterance has more than one start/end candidate.
/// Negative and distinct from `FsgLink::wid`'s `-1` (null transition), so a
/// synthetic node is never mistaken for a null-transition entry.
const SYNTHETIC_START_WID: i32 = -2;
const SYNTHETIC_END_WID: i32 = -3;

#[derive(Debug, Clone)]
pub struct LatticeNode {
    pub sf: i32,
    pub wid: i32,
    pub dict_wid: i32,
    pub base_wid: i32,
    pub fef: i32,
    pub lef: i32,
    pub best_exit: i32,
    pub reachable: bool,
    pub entries: Vec<usize>,
    pub exits: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct LatticeLink {
    pub from: usize,
    pub to: usize,
    pub ascr: i32,
    pub end_frame: i32,
}

#[derive(Debug, Clone)]
pub struct Lattice {
    pub nodes: Vec<LatticeNode>,
    pub links: Vec<LatticeLink>,
    pub start: usize,
    pub end: usize,
}

/// spec.md §4.4. `final_frame` is the frame count the utterance ran for
/// (`Search::frame` at the time of the call).
pub fn build_lattice(
    history: &HistoryTable,
    fsg: &dyn FsgModel,
    dict: &dyn Dictionary,
    final_frame: i32,
    silpen: i32,
    fillpen: i32,
) -> Result<Lattice> {
    let mut nodes: Vec<LatticeNode> = Vec::new();
    let mut node_by_key: HashMap<(i32, i32), usize> = HashMap::new();
    let mut entry_to_node: HashMap<usize, usize> = HashMap::new();
    let mut entry_ascr: HashMap<usize, i32> = HashMap::new();

    for i in 0..history.n_entries() {
        let entry = *history.entry(i);
        let Some(link) = entry.link else { continue };
        if link.wid < 0 {
            continue;
        }
        let sf = if entry.pred >= 0 {
            history.entry(entry.pred as usize).frame + 1
        } else {
            0
        };
        let ef = entry.frame;
        let ascr = if entry.pred >= 0 {
            entry.score - history.entry(entry.pred as usize).score
        } else {
            entry.score
        };
        entry_ascr.insert(i, ascr);

        let key = (sf, link.wid);
        let node_idx = *node_by_key.entry(key).or_insert_with(|| {
            nodes.push(LatticeNode {
                sf,
                wid: link.wid,
                dict_wid: -1,
                base_wid: -1,
                fef: ef,
                lef: ef,
                best_exit: ascr,
                reachable: false,
                entries: Vec::new(),
                exits: Vec::new(),
            });
            nodes.len() - 1
        });
        let node = &mut nodes[node_idx];
        node.fef = node.fef.min(ef);
        node.lef = node.lef.max(ef);
        node.best_exit = node.best_exit.max(ascr);
        entry_to_node.insert(i, node_idx);
    }

    let mut links: Vec<LatticeLink> = Vec::new();
    for i in 0..history.n_entries() {
        let Some(&src) = entry_to_node.get(&i) else { continue };
        let entry = *history.entry(i);
        let link = entry.link.expect("entry_to_node only maps entries with a link (first pass filters)");
        let ascr = entry_ascr[&i];
        let to_state = link.to_state;

        let mut try_link = |dest_state: u32, links: &mut Vec<LatticeLink>, nodes: &mut [LatticeNode]| {
            for t in fsg.trans_from(dest_state) {
                if let Some(&dest) = node_by_key.get(&(entry.frame + 1, t.wid)) {
                    let link_idx = links.len();
                    links.push(LatticeLink {
                        from: src,
                        to: dest,
                        ascr,
                        end_frame: entry.frame,
                    });
                    nodes[src].exits.push(link_idx);
                    nodes[dest].entries.push(link_idx);
                }
            }
        };

        try_link(to_state, &mut links, &mut nodes);
        for &j in fsg.null_dests(to_state) {
            try_link(j, &mut links, &mut nodes);
        }
    }

    if nodes.is_empty() {
        return Err(Error::LatticeConstruction {
            msg: "no word-exit history entries to build a lattice from".into(),
        });
    }

    let start_candidates: Vec<usize> = (0..nodes.len()).filter(|&n| nodes[n].sf == 0 && !nodes[n].exits.is_empty()).collect();
    let start = if start_candidates.len() == 1 {
        start_candidates[0]
    } else {
        synthesize_boundary_node(&mut nodes, &mut links, 0, &start_candidates, true)
    };

    let end_candidates: Vec<usize> = (0..nodes.len())
        .filter(|&n| nodes[n].lef == final_frame - 1 && !nodes[n].entries.is_empty())
        .collect();
    let end = if end_candidates.len() == 1 {
        end_candidates[0]
    } else {
        synthesize_boundary_node(&mut nodes, &mut links, final_frame, &end_candidates, false)
    };

    if start >= nodes.len() || end >= nodes.len() {
        return Err(Error::LatticeConstruction {
            msg: "failed to synthesise start/end node".into(),
        });
    }

    prune_unreachable(&mut nodes, &links, end);

    for node in &mut nodes {
        // Synthetic boundary nodes (`<s>`/`</s>`) carry negative ids that
        // don't round-trip through the FSG's own vocabulary.
        let surface = match node.wid {
            SYNTHETIC_START_WID => "<s>",
            SYNTHETIC_END_WID => "</s>",
            wid => fsg.word_str(wid),
        };
        let dict_wid = dict.to_id(surface);
        node.dict_wid = dict_wid;
        node.base_wid = if dict_wid >= 0 { dict.base_wid(dict_wid) } else { -1 };
    }

    let mut lattice = Lattice { nodes, links, start, end };
    bypass_fillers(&mut lattice, fsg, silpen, fillpen);
    Ok(lattice)
}

/// Creates the synthesised `<s>`/`</s>` boundary node and wires it to every
/// candidate (ε-linked into candidates for `<s>`, linked from candidates'
/// `best_exit` score for `</s>`), per spec.md §4.4.
fn synthesize_boundary_node(
    nodes: &mut Vec<LatticeNode>,
    links: &mut Vec<LatticeLink>,
    frame: i32,
    candidates: &[usize],
    is_start: bool,
) -> usize {
    let wid = if is_start { SYNTHETIC_START_WID } else { SYNTHETIC_END_WID };
    let idx = nodes.len();
    nodes.push(LatticeNode {
        sf: frame,
        wid,
        dict_wid: -1,
        base_wid: -1,
        fef: frame,
        lef: frame,
        best_exit: 0,
        reachable: false,
        entries: Vec::new(),
        exits: Vec::new(),
    });
    for &cand in candidates {
        let link_idx = links.len();
        if is_start {
            links.push(LatticeLink { from: idx, to: cand, ascr: 0, end_frame: frame });
            nodes[idx].exits.push(link_idx);
            nodes[cand].entries.push(link_idx);
        } else {
            let score = nodes[cand].best_exit;
            links.push(LatticeLink { from: cand, to: idx, ascr: score, end_frame: frame });
            nodes[cand].exits.push(link_idx);
            nodes[idx].entries.push(link_idx);
        }
    }
    idx
}

fn prune_unreachable(nodes: &mut [LatticeNode], links: &[LatticeLink], end: usize) {
    let mut stack = vec![end];
    nodes[end].reachable = true;
    while let Some(n) = stack.pop() {
        for &link_idx in &nodes[n].entries {
            let from = links[link_idx].from;
            if !nodes[from].reachable {
                nodes[from].reachable = true;
                stack.push(from);
            }
        }
    }
    for node in nodes.iter_mut() {
        if !node.reachable {
            node.entries.clear();
            node.exits.clear();
        }
    }
}

/// spec.md §4.4 "Post-processing": for every filler-word node, add a direct
/// link from each of its predecessors to each of its successors carrying
/// the filler's own acoustic contribution plus a configured penalty, so a
/// consumer can traverse the lattice while skipping explicit filler words.
fn bypass_fillers(lattice: &mut Lattice, fsg: &dyn FsgModel, silpen: i32, fillpen: i32) {
    let filler_nodes: Vec<usize> = (0..lattice.nodes.len())
        .filter(|&n| lattice.nodes[n].reachable && fsg.is_filler(lattice.nodes[n].wid))
        .collect();

    for n in filler_nodes {
        let penalty = if fsg.word_str(lattice.nodes[n].wid) == "<sil>" { silpen } else { fillpen };
        let entries = lattice.nodes[n].entries.clone();
        let exits = lattice.nodes[n].exits.clone();
        for &e_idx in &entries {
            for &x_idx in &exits {
                let e = lattice.links[e_idx];
                let x = lattice.links[x_idx];
                let ascr = e.ascr + lattice.nodes[n].best_exit + x.ascr + penalty;
                let new_idx = lattice.links.len();
                lattice.links.push(LatticeLink { from: e.from, to: x.to, ascr, end_frame: x.end_frame });
                lattice.nodes[e.from].exits.push(new_idx);
                lattice.nodes[x.to].entries.push(new_idx);
            }
        }
    }
}

/// Best-path / posterior computation over a constructed lattice (spec.md §1,
/// listed as an external collaborator: "Best-path / posterior computation
/// over a constructed lattice — provided by a *lattice algorithm library*").
/// As with `AcousticScorer`/`HmmContext`, this crate defines the seam as a
/// trait plus one concrete reference implementation good enough to drive the
/// decoder's own tests and `Search::hyp`/`seg_iter`/`prob` when `bestpath` is
/// enabled, not a production-grade lattice toolkit.
pub trait LatticeAlgorithms: Send + Sync {
    /// Highest-scoring path from `lattice.start` to `lattice.end` under
    /// `ascale`-scaled link scores. Returns the node-index path (inclusive of
    /// both endpoints) and its total scaled score, or `None` if `end` is
    /// unreachable from `start`.
    fn bestpath(&self, lattice: &Lattice, ascale: f32) -> Option<(Vec<usize>, i32)>;

    /// Total log-probability mass (natural-log sum over every start-to-end
    /// path, `ascale`-scaled) flowing through the lattice, via a forward
    /// log-sum-exp pass. `f64::NEG_INFINITY` if `end` is unreachable.
    fn posterior_logz(&self, lattice: &Lattice, ascale: f32) -> f64;
}

/// Reference [`LatticeAlgorithms`]: Kahn's-algorithm topological order, then
/// a single forward DP pass for `bestpath` (longest path under non-positive
/// log scores) and a second forward pass in the log-sum-exp semiring for
/// `posterior_logz`. The lattice is acyclic by construction (§4.4: links only
/// ever run from an earlier to a later frame), so both passes are linear.
pub struct DefaultLatticeAlgorithms;

impl DefaultLatticeAlgorithms {
    fn topo_order_and_adjacency(lattice: &Lattice) -> (Vec<usize>, Vec<Vec<usize>>) {
        let n = lattice.nodes.len();
        let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indeg = vec![0usize; n];
        for (li, l) in lattice.links.iter().enumerate() {
            out[l.from].push(li);
            indeg[l.to] += 1;
        }
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indeg[i] == 0).collect();
        let mut topo = Vec::with_capacity(n);
        while let Some(u) = queue.pop_front() {
            topo.push(u);
            for &li in &out[u] {
                let v = lattice.links[li].to;
                indeg[v] -= 1;
                if indeg[v] == 0 {
                    queue.push_back(v);
                }
            }
        }
        (topo, out)
    }
}

impl LatticeAlgorithms for DefaultLatticeAlgorithms {
    fn bestpath(&self, lattice: &Lattice, ascale: f32) -> Option<(Vec<usize>, i32)> {
        let (topo, out) = Self::topo_order_and_adjacency(lattice);
        let n = lattice.nodes.len();
        let mut best = vec![i32::MIN; n];
        let mut best_link_in: Vec<Option<usize>> = vec![None; n];
        best[lattice.start] = 0;

        for &u in &topo {
            if best[u] == i32::MIN {
                continue;
            }
            for &li in &out[u] {
                let link = lattice.links[li];
                let scaled = (link.ascr as f32 * ascale) as i32;
                let candidate = best[u] + scaled;
                if candidate > best[link.to] {
                    best[link.to] = candidate;
                    best_link_in[link.to] = Some(li);
                }
            }
        }

        if best[lattice.end] == i32::MIN {
            return None;
        }
        let mut path = vec![lattice.end];
        let mut cur = lattice.end;
        while let Some(li) = best_link_in[cur] {
            cur = lattice.links[li].from;
            path.push(cur);
        }
        path.reverse();
        Some((path, best[lattice.end]))
    }

    fn posterior_logz(&self, lattice: &Lattice, ascale: f32) -> f64 {
        let (topo, out) = Self::topo_order_and_adjacency(lattice);
        let n = lattice.nodes.len();
        let mut forward = vec![f64::NEG_INFINITY; n];
        forward[lattice.start] = 0.0;

        for &u in &topo {
            if forward[u] == f64::NEG_INFINITY {
                continue;
            }
            for &li in &out[u] {
                let link = lattice.links[li];
                let weight = link.ascr as f64 * ascale as f64;
                forward[link.to] = logsumexp(forward[link.to], forward[u] + weight);
            }
        }
        forward[lattice.end]
    }
}

fn logsumexp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::{CiPhone, CtxSet};
    use crate::dict::SimpleDictionary;
    use crate::fsg::{FsgLink, SimpleFsg};

    fn phones(ids: &[u16]) -> Vec<CiPhone> {
        ids.iter().map(|&i| CiPhone(i)).collect()
    }

    fn simple_case() -> (HistoryTable, SimpleFsg, SimpleDictionary) {
        let mut dict = SimpleDictionary::new();
        let wid = dict.add_word("HELLO", &phones(&[1]));
        let mut fsg = SimpleFsg::new(2, 0, 1);
        fsg.word_add("HELLO");
        fsg.add_trans(0, 1, wid, -10);

        let mut history = HistoryTable::new();
        let sentinel = history.add(None, -1, 0, -1, CiPhone(0), CtxSet::Any);
        let link = FsgLink { wid, logprob: -10, to_state: 1 };
        history.add(Some(link), 4, -500, sentinel as i32, CiPhone(0), CtxSet::Any);
        (history, fsg, dict)
    }

    #[test]
    fn builds_single_node_lattice_with_synthetic_boundaries() {
        let (history, fsg, dict) = simple_case();
        let lattice = build_lattice(&history, &fsg, &dict, 5, -100, -100).unwrap();
        assert_eq!(lattice.nodes.len(), 3); // HELLO + <s> + </s>
        assert_eq!(lattice.nodes[lattice.start].wid, SYNTHETIC_START_WID);
        assert_eq!(lattice.nodes[lattice.end].wid, SYNTHETIC_END_WID);
    }

    #[test]
    fn fails_on_empty_history() {
        let (_, fsg, dict) = simple_case();
        let history = HistoryTable::new();
        assert!(build_lattice(&history, &fsg, &dict, 0, -100, -100).is_err());
    }

    #[test]
    fn reachability_prunes_dead_ends() {
        let mut dict = SimpleDictionary::new();
        let reachable_wid = dict.add_word("HELLO", &phones(&[1]));
        let dead_wid = dict.add_word("DEAD", &phones(&[2]));
        let mut fsg = SimpleFsg::new(3, 0, 1);
        fsg.word_add("HELLO");
        fsg.word_add("DEAD");
        fsg.add_trans(0, 1, reachable_wid, -10);
        fsg.add_trans(0, 2, dead_wid, -10);

        let mut history = HistoryTable::new();
        let sentinel = history.add(None, -1, 0, -1, CiPhone(0), CtxSet::Any);
        history.add(
            Some(FsgLink { wid: reachable_wid, logprob: -10, to_state: 1 }),
            4,
            -500,
            sentinel as i32,
            CiPhone(0),
            CtxSet::Any,
        );
        history.add(
            Some(FsgLink { wid: dead_wid, logprob: -10, to_state: 2 }),
            4,
            -900,
            sentinel as i32,
            CiPhone(0),
            CtxSet::Any,
        );

        let lattice = build_lattice(&history, &fsg, &dict, 5, -100, -100).unwrap();
        // The DEAD node ends at state 2, which is not the FSG's final state
        // (1) and has no further transitions, so it never reaches `</s>`.
        let dead_node = lattice.nodes.iter().position(|n| n.wid == dead_wid).unwrap();
        assert!(!lattice.nodes[dead_node].reachable);
    }

    #[test]
    fn bestpath_picks_the_single_available_path() {
        let (history, fsg, dict) = simple_case();
        let lattice = build_lattice(&history, &fsg, &dict, 5, -100, -100).unwrap();
        let algo = DefaultLatticeAlgorithms;
        let (path, score) = algo.bestpath(&lattice, 1.0).unwrap();
        assert_eq!(path.first().copied(), Some(lattice.start));
        assert_eq!(path.last().copied(), Some(lattice.end));
        // start(0) -> HELLO(-500) -> end(0), scaled by ascale=1.0
        assert_eq!(score, -500);
    }

    #[test]
    fn bestpath_prefers_higher_scoring_of_two_parallel_words() {
        let mut dict = SimpleDictionary::new();
        let good_wid = dict.add_word("GOOD", &phones(&[1]));
        let bad_wid = dict.add_word("BAD", &phones(&[2]));
        let mut fsg = SimpleFsg::new(2, 0, 1);
        fsg.word_add("GOOD");
        fsg.word_add("BAD");
        fsg.add_trans(0, 1, good_wid, -10);
        fsg.add_trans(0, 1, bad_wid, -10);

        let mut history = HistoryTable::new();
        let sentinel = history.add(None, -1, 0, -1, CiPhone(0), CtxSet::Any);
        history.add(
            Some(FsgLink { wid: good_wid, logprob: -10, to_state: 1 }),
            4,
            -100,
            sentinel as i32,
            CiPhone(0),
            CtxSet::Any,
        );
        history.add(
            Some(FsgLink { wid: bad_wid, logprob: -10, to_state: 1 }),
            4,
            -900,
            sentinel as i32,
            CiPhone(0),
            CtxSet::Any,
        );

        let lattice = build_lattice(&history, &fsg, &dict, 5, -100, -100).unwrap();
        let algo = DefaultLatticeAlgorithms;
        let (path, _) = algo.bestpath(&lattice, 1.0).unwrap();
        let chosen = path.iter().find(|&&n| lattice.nodes[n].wid == good_wid || lattice.nodes[n].wid == bad_wid).unwrap();
        assert_eq!(lattice.nodes[*chosen].wid, good_wid);
    }

    #[test]
    fn posterior_logz_is_finite_when_end_reachable() {
        let (history, fsg, dict) = simple_case();
        let lattice = build_lattice(&history, &fsg, &dict, 5, -100, -100).unwrap();
        let algo = DefaultLatticeAlgorithms;
        let logz = algo.posterior_logz(&lattice, 1.0);
        assert!(logz.is_finite());
    }
}
