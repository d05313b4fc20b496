//! Result extractor (spec.md §3/§4.5): hypothesis string and segmentation
//! from the history table, with an optional lattice best-path shortcut.
//!
//! Grounded in the teacher's `converter/reranker.rs`, which also walks a
//! scored backtrace structure to emit a final ranked string — the same
//! "walk predecessors, filter what shouldn't surface, join" shape, applied
//! here to FSG word ids instead of morpheme candidates.

use crate::fsg::FsgModel;
use crate::history::HistoryTable;

/// spec.md §4.5 `find_exit`: locate the best-scoring history entry in a
/// target frame, optionally restricted to entries reaching the FSG's final
/// state. `frame = -1` means "the last frame any entry was added in".
pub fn find_exit(history: &HistoryTable, frame: i32, final_required: bool, fsg: &dyn FsgModel) -> Option<usize> {
    let n = history.n_entries();
    if n == 0 {
        return None;
    }
    let target = if frame < 0 { history.entry(n - 1).frame } else { frame };

    let mut best: Option<(usize, i32)> = None;
    for i in (0..n).rev() {
        let entry = history.entry(i);
        if entry.frame != target {
            continue;
        }
        if final_required {
            let reaches_final = entry.link.map(|l| l.to_state) == Some(fsg.final_state());
            if !reaches_final {
                continue;
            }
        }
        if best.map_or(true, |(_, s)| entry.score > s) {
            best = Some((i, entry.score));
        }
    }
    best.map(|(i, _)| i)
}

/// spec.md §4.5 hypothesis string: walk predecessors from `exit_idx`,
/// dropping null transitions and filler words, and join the remainder in
/// forward order.
pub fn hyp(history: &HistoryTable, fsg: &dyn FsgModel, exit_idx: usize) -> String {
    let mut words = Vec::new();
    let mut cur = exit_idx as i32;
    while cur >= 0 {
        let entry = history.entry(cur as usize);
        if let Some(link) = entry.link {
            if link.wid >= 0 && !fsg.is_filler(link.wid) {
                words.push(fsg.word_str(link.wid));
            }
        }
        cur = entry.pred;
    }
    words.reverse();
    words.join(" ")
}

#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub word: &'a str,
    pub sf: i32,
    pub ef: i32,
    pub lscr: i32,
    pub ascr: i32,
    pub lback: u32,
    pub prob: i32,
}

/// spec.md §4.5 segmentation iterator: every entry on the chosen backtrace,
/// in forward order, each annotated with start/end frame and score split.
pub fn seg_iter<'a>(history: &'a HistoryTable, fsg: &'a dyn FsgModel, exit_idx: usize) -> Vec<Segment<'a>> {
    let mut chain = Vec::new();
    let mut cur = exit_idx as i32;
    while cur >= 0 {
        chain.push(cur as usize);
        cur = history.entry(cur as usize).pred;
    }
    chain.reverse();

    chain
        .into_iter()
        .filter_map(|i| {
            let entry = history.entry(i);
            let link = entry.link?;
            if link.wid < 0 {
                // Null-transition entry: consumes no word, so it contributes
                // no segment (same "drop" spec.md §4.5 already applies to
                // filler words in `hyp`).
                return None;
            }
            let pred_frame = if entry.pred >= 0 { history.entry(entry.pred as usize).frame } else { -1 };
            let pred_score = if entry.pred >= 0 { history.entry(entry.pred as usize).score } else { 0 };
            let mut sf = pred_frame + 1;
            let ef = entry.frame;
            if sf > ef {
                sf = ef; // null transitions occupy zero frames; never invert sf/ef
            }
            let lscr = link.logprob;
            let ascr = entry.score - pred_score - lscr;
            Some(Segment {
                word: fsg.word_str(link.wid),
                sf,
                ef,
                lscr,
                ascr,
                lback: 1,
                prob: 0,
            })
        })
        .collect()
}
