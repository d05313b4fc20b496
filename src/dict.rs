//! Pronunciation dictionary.
//!
//! spec.md §3: "Maps word strings to word ids; supports pronunciation
//! length, base-word resolution, and alternate-pronunciation chains."
//!
//! Grounded in the teacher's `Dictionary` trait / `TrieDictionary` pair
//! (`dict/mod.rs`, `dict/trie_dict.rs`): a small trait for the operations
//! the rest of the crate needs, plus one concrete, in-memory implementation
//! good enough to drive tests. The teacher backs its dictionary with a
//! double-array trie because its dictionaries hold hundreds of thousands of
//! kana readings; spec.md's dictionary is keyed by FSG vocabulary size
//! (typically tens to low thousands of words), so a `HashMap` is the
//! appropriate, non-over-engineered analogue rather than importing a trie
//! crate for a problem this size.

use std::collections::HashMap;

use crate::ctx::CiPhone;

/// Sentinel returned by `Dictionary::to_id` for an unknown word string.
pub const NO_WORD: i32 = -1;

#[derive(Debug, Clone)]
pub struct WordEntry {
    pub surface: String,
    pub phones: Vec<CiPhone>,
    /// The base (first, canonical) pronunciation's word id. Equal to this
    /// entry's own id when the entry itself is the base pronunciation.
    pub base_wid: i32,
    /// Next alternate pronunciation in the chain, if any.
    pub next_alt: Option<i32>,
}

pub trait Dictionary: Send + Sync {
    fn n_words(&self) -> usize;
    fn to_id(&self, word: &str) -> i32;
    fn word_str(&self, wid: i32) -> &str;
    fn pronlen(&self, wid: i32) -> usize;
    fn phones(&self, wid: i32) -> &[CiPhone];
    fn next_alt(&self, wid: i32) -> Option<i32>;
    fn base_wid(&self, wid: i32) -> i32;
}

/// In-memory reference dictionary. Not a production loader — spec.md §1
/// treats dictionary loading/parsing as an external collaborator; this type
/// exists so the crate's own tests can construct a `Dictionary` without one.
#[derive(Debug, Default)]
pub struct SimpleDictionary {
    by_str: HashMap<String, i32>,
    entries: Vec<WordEntry>,
}

impl SimpleDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a base pronunciation for `surface`. Panics if `surface` is
    /// already known — use [`Self::add_alt`] to add further pronunciations
    /// for an existing word.
    pub fn add_word(&mut self, surface: &str, phones: &[CiPhone]) -> i32 {
        assert!(
            !self.by_str.contains_key(surface),
            "word {surface:?} already has a base pronunciation; use add_alt"
        );
        let wid = self.entries.len() as i32;
        self.entries.push(WordEntry {
            surface: surface.to_string(),
            phones: phones.to_vec(),
            base_wid: wid,
            next_alt: None,
        });
        self.by_str.insert(surface.to_string(), wid);
        wid
    }

    /// Add an alternate pronunciation chained off `base_surface`'s existing
    /// chain. Returns the new alternate's word id. The alternate is *not*
    /// separately addressable by string lookup (spec.md: alternates are
    /// reached by walking `next_alt` from the base, not by name), matching
    /// how `READ(2)` in spec.md §8 scenario 3 is an alias reachable only
    /// through `READ`'s chain.
    pub fn add_alt(&mut self, base_surface: &str, phones: &[CiPhone]) -> i32 {
        let base = *self
            .by_str
            .get(base_surface)
            .unwrap_or_else(|| panic!("no base pronunciation for {base_surface:?}"));
        let mut tail = base;
        while let Some(next) = self.entries[tail as usize].next_alt {
            tail = next;
        }
        let wid = self.entries.len() as i32;
        self.entries.push(WordEntry {
            surface: self.entries[base as usize].surface.clone(),
            phones: phones.to_vec(),
            base_wid: base,
            next_alt: None,
        });
        self.entries[tail as usize].next_alt = Some(wid);
        wid
    }
}

impl Dictionary for SimpleDictionary {
    fn n_words(&self) -> usize {
        self.entries.len()
    }

    fn to_id(&self, word: &str) -> i32 {
        self.by_str.get(word).copied().unwrap_or(NO_WORD)
    }

    fn word_str(&self, wid: i32) -> &str {
        &self.entries[wid as usize].surface
    }

    fn pronlen(&self, wid: i32) -> usize {
        self.entries[wid as usize].phones.len()
    }

    fn phones(&self, wid: i32) -> &[CiPhone] {
        &self.entries[wid as usize].phones
    }

    fn next_alt(&self, wid: i32) -> Option<i32> {
        self.entries[wid as usize].next_alt
    }

    fn base_wid(&self, wid: i32) -> i32 {
        self.entries[wid as usize].base_wid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phones(ids: &[u16]) -> Vec<CiPhone> {
        ids.iter().map(|&i| CiPhone(i)).collect()
    }

    #[test]
    fn lookup_roundtrip() {
        let mut dict = SimpleDictionary::new();
        let wid = dict.add_word("HELLO", &phones(&[1, 2, 3]));
        assert_eq!(dict.to_id("HELLO"), wid);
        assert_eq!(dict.word_str(wid), "HELLO");
        assert_eq!(dict.pronlen(wid), 3);
    }

    #[test]
    fn unknown_word_is_no_word() {
        let dict = SimpleDictionary::new();
        assert_eq!(dict.to_id("NOPE"), NO_WORD);
    }

    #[test]
    fn alt_pronunciations_chain_and_resolve_to_base() {
        let mut dict = SimpleDictionary::new();
        let base = dict.add_word("READ", &phones(&[10, 11]));
        let alt1 = dict.add_alt("READ", &phones(&[12, 13]));
        let alt2 = dict.add_alt("READ", &phones(&[14]));

        assert_eq!(dict.next_alt(base), Some(alt1));
        assert_eq!(dict.next_alt(alt1), Some(alt2));
        assert_eq!(dict.next_alt(alt2), None);

        assert_eq!(dict.base_wid(alt1), base);
        assert_eq!(dict.base_wid(alt2), base);
        assert_eq!(dict.word_str(alt1), "READ");
    }

    #[test]
    #[should_panic]
    fn duplicate_base_word_panics() {
        let mut dict = SimpleDictionary::new();
        dict.add_word("HELLO", &phones(&[1]));
        dict.add_word("HELLO", &phones(&[2]));
    }
}
