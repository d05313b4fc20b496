//! FSG set manager (spec.md §4.1).
//!
//! A named collection of FSG models with a pointer to the currently
//! selected grammar, plus the silence/filler and alternate-pronunciation
//! augmentation policy. Grounded in the teacher's resource-ownership style
//! (`api::resources` owning named, reference-counted handles the rest of
//! the engine borrows from) but kept single-owner (`HashMap<String, Box<dyn
//! FsgModel>>`) since spec.md §5 describes a single-threaded, single-owner
//! search handle rather than a multi-session server.

use std::collections::HashMap;

use crate::dict::Dictionary;
use crate::error::{Error, Result};
use crate::fsg::{FsgLink, FsgModel};

pub struct FsgSet {
    models: HashMap<String, Box<dyn FsgModel>>,
    active: Option<String>,
    fsgusefiller: bool,
    fsgusealtpron: bool,
    /// Already `lw`-scaled log-probabilities for the silence/filler
    /// self-loops `add` installs, per spec.md §9 "Score scaling" — computed
    /// once by the caller (`Search::init`/`reinit`) from `DecoderConfig`,
    /// the same convention `lextree::build`'s `wip`/`pip` parameters follow.
    sil_logprob: i32,
    fill_logprob: i32,
}

impl FsgSet {
    pub fn new(fsgusefiller: bool, fsgusealtpron: bool, sil_logprob: i32, fill_logprob: i32) -> Self {
        Self {
            models: HashMap::new(),
            active: None,
            fsgusefiller,
            fsgusealtpron,
            sil_logprob,
            fill_logprob,
        }
    }

    /// Register `fsg` under `name`, applying silence/filler and
    /// alternate-pronunciation augmentation per spec.md §4.1.
    pub fn add(&mut self, name: &str, mut fsg: Box<dyn FsgModel>, dict: &dyn Dictionary) {
        if self.fsgusefiller {
            augment_with_scores(fsg.as_mut(), dict, self.sil_logprob, self.fill_logprob);
        }
        if self.fsgusealtpron {
            augment_alt_pronunciations(fsg.as_mut(), dict);
        }
        fsg.close_null_transitions();
        self.models.insert(name.to_string(), fsg);
    }

    /// Remove `name`. If it was the active grammar, the caller must treat
    /// the lextree as invalidated and the history as detached — spec.md
    /// §5: "`remove` of the currently selected FSG must tear down the
    /// lextree and detach the history first", which is why this returns
    /// whether `name` was the active grammar rather than doing that
    /// teardown itself (the lextree/history live on the search handle, not
    /// here).
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.models.remove(name).is_some();
        if removed && self.active.as_deref() == Some(name) {
            self.active = None;
            return true;
        }
        removed
    }

    pub fn select(&mut self, name: &str) -> Result<()> {
        if !self.models.contains_key(name) {
            return Err(Error::UnknownFsg {
                name: name.to_string(),
            });
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&dyn FsgModel> {
        self.active
            .as_ref()
            .and_then(|n| self.models.get(n))
            .map(|b| b.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn FsgModel> {
        self.models.get(name).map(|b| b.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// spec.md §4.1: add a self-loop on every FSG state labelled with the
/// silence word at probability `silprob`, then for every dictionary word
/// classified as filler, add a self-loop at `fillprob`. Skipped if the FSG
/// is already marked as containing silences.
///
/// The probabilities themselves come from the model's own config at
/// construction time; since this crate keeps `FsgModel` purely in the
/// log-integer domain (see `fsg::FsgLink`), the caller is expected to have
/// pre-scaled `silprob`/`fillprob` the same way `pip`/`wip` are pre-scaled
/// by `lw` (spec.md §9 "Score scaling"). To keep the augmentation routine
/// itself config-agnostic it takes already-converted log scores.
pub fn augment_silence_and_fillers(fsg: &mut dyn FsgModel, dict: &dyn Dictionary) {
    augment_with_scores(fsg, dict, default_logprob(0.1), default_logprob(0.1))
}

/// Same as [`augment_silence_and_fillers`] but with explicit, already
/// `lw`-scaled log-probabilities for the silence and filler self-loops.
pub fn augment_with_scores(
    fsg: &mut dyn FsgModel,
    dict: &dyn Dictionary,
    sil_logprob: i32,
    fill_logprob: i32,
) {
    if fsg.has_sil() {
        return;
    }

    let sil_wid = dict.to_id("<sil>");
    if sil_wid < 0 {
        return;
    }
    let sil_word = fsg.word_add(dict.word_str(sil_wid));
    for s in 0..fsg.n_state() {
        fsg.add_silence(sil_word, s, sil_logprob);
    }

    // spec.md §4.1: "every dictionary word classified as filler
    // (implementation: every word id after <sil> except <s>/</s>)".
    for wid in (sil_wid + 1)..dict.n_words() as i32 {
        let surface = dict.word_str(wid);
        if surface == "<s>" || surface == "</s>" {
            continue;
        }
        let fsg_word = fsg.word_add(surface);
        for s in 0..fsg.n_state() {
            fsg.add_silence(fsg_word, s, fill_logprob);
        }
    }

    fsg.set_has_sil(true);
}

fn default_logprob(linear_prob: f32) -> i32 {
    (linear_prob.ln() * 1000.0) as i32
}

/// spec.md §4.1: "for every FSG word with dictionary alternates, register
/// each alternate pronunciation as an alias on every transition carrying
/// the base word."
pub fn augment_alt_pronunciations(fsg: &mut dyn FsgModel, dict: &dyn Dictionary) {
    // Collect (state, link) for every existing transition up front: the
    // loop below mutates `fsg` by adding new transitions, and must not see
    // those additions as further aliasing candidates.
    let existing: Vec<(u32, FsgLink)> = (0..fsg.n_state())
        .flat_map(|s| fsg.trans_from(s).iter().map(move |l| (s, *l)).collect::<Vec<_>>())
        .collect();

    for (s, link) in existing {
        if link.wid < 0 {
            continue;
        }
        let base = dict.base_wid(link.wid);
        if base != link.wid {
            // Only originate aliasing from the base pronunciation's own
            // transitions, so a grammar authored against an alternate
            // directly doesn't get double-aliased.
            continue;
        }
        let mut alt = dict.next_alt(base);
        let mut any = false;
        while let Some(alt_wid) = alt {
            fsg.add_trans(s, link.to_state, alt_wid, link.logprob);
            fsg.add_alt(base, alt_wid);
            any = true;
            alt = dict.next_alt(alt_wid);
        }
        let _ = any;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::CiPhone;
    use crate::dict::SimpleDictionary;
    use crate::fsg::SimpleFsg;

    fn phones(ids: &[u16]) -> Vec<CiPhone> {
        ids.iter().map(|&i| CiPhone(i)).collect()
    }

    #[test]
    fn add_remove_roundtrips() {
        let mut dict = SimpleDictionary::new();
        dict.add_word("<sil>", &phones(&[0]));
        let mut set = FsgSet::new(false, false, -2302, -2302);
        let before = set.len();
        set.add("g1", Box::new(SimpleFsg::new(2, 0, 1)), &dict);
        assert_eq!(set.len(), before + 1);
        assert!(set.remove("g1"));
        assert_eq!(set.len(), before);
    }

    #[test]
    fn select_unknown_fails() {
        let mut set = FsgSet::new(false, false, -2302, -2302);
        assert!(set.select("nope").is_err());
    }

    #[test]
    fn select_and_remove_active_reports_invalidation() {
        let dict = SimpleDictionary::new();
        let mut set = FsgSet::new(false, false, -2302, -2302);
        set.add("g1", Box::new(SimpleFsg::new(1, 0, 0)), &dict);
        set.select("g1").unwrap();
        assert!(set.remove("g1"), "removing the active FSG invalidates it");
        assert!(set.active_name().is_none());
    }

    #[test]
    fn filler_augmentation_adds_self_loops_per_state() {
        let mut dict = SimpleDictionary::new();
        dict.add_word("<s>", &phones(&[]));
        dict.add_word("</s>", &phones(&[]));
        dict.add_word("<sil>", &phones(&[1]));
        dict.add_word("<uh>", &phones(&[2]));

        let mut set = FsgSet::new(true, false, -2302, -2302);
        set.add("g1", Box::new(SimpleFsg::new(2, 0, 1)), &dict);
        let fsg = set.get("g1").unwrap();
        assert!(fsg.has_sil());
        for s in 0..2 {
            let loops: Vec<_> = fsg.trans(s, s).into_iter().collect();
            // one <sil> loop + one <uh> loop
            assert_eq!(loops.len(), 2);
        }
    }

    #[test]
    fn filler_augmentation_skipped_when_already_marked() {
        let mut dict = SimpleDictionary::new();
        dict.add_word("<sil>", &phones(&[1]));
        let mut fsg = SimpleFsg::new(1, 0, 0);
        fsg.set_has_sil(true);
        augment_silence_and_fillers(&mut fsg, &dict);
        assert!(fsg.trans(0, 0).is_empty());
    }

    #[test]
    fn alt_pronunciation_augmentation_aliases_existing_transitions() {
        let mut dict = SimpleDictionary::new();
        let base = dict.add_word("READ", &phones(&[1, 2]));
        let alt = dict.add_alt("READ", &phones(&[3]));

        let mut fsg = SimpleFsg::new(2, 0, 1);
        fsg.add_trans(0, 1, base, -100);
        augment_alt_pronunciations(&mut fsg, &dict);

        let links = fsg.trans(0, 1);
        let wids: Vec<i32> = links.iter().map(|l| l.wid).collect();
        assert!(wids.contains(&base));
        assert!(wids.contains(&alt));
        assert!(fsg.has_alt());
    }
}
