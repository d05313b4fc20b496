//! Context-independent phone ids and right-context bit-sets.
//!
//! Grounded in the teacher's `ConnectionMatrix` (a dense, index-addressed
//! cost table keyed by small integer ids) — the same "pack small ids into a
//! flat bit-vector" idiom, applied here to phone-context admission instead
//! of morpheme transition costs. See spec.md §9 "Right-context bit-sets".

/// Context-independent phone id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CiPhone(pub u16);

/// Up to 128 distinct CI phones fit in this bit-set; real phone inventories
/// (CMU-style ~50, IPA-derived sets up to ~100) fit comfortably.
const MAX_PHONES: u32 = 128;

/// A right-context bit-set, or the "matches anything" sentinel.
///
/// spec.md §9: "An all-contexts value is a sentinel that matches anything;
/// represent it explicitly so filler/single-phone exits can be
/// distinguished" — `CtxSet::Any` is that explicit sentinel, distinct from
/// a dense set that happens to contain every phone currently known to the
/// dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtxSet {
    Any,
    Phones(u128),
}

impl CtxSet {
    pub fn empty() -> Self {
        CtxSet::Phones(0)
    }

    pub fn single(phone: CiPhone) -> Self {
        let mut s = Self::empty();
        s.insert(phone);
        s
    }

    pub fn insert(&mut self, phone: CiPhone) {
        match self {
            CtxSet::Any => {}
            CtxSet::Phones(bits) => {
                debug_assert!((phone.0 as u32) < MAX_PHONES, "CI phone id out of range");
                *bits |= 1u128 << (phone.0 as u32 % MAX_PHONES);
            }
        }
    }

    /// Admission test: does this context set admit `phone`?
    pub fn contains(&self, phone: CiPhone) -> bool {
        match self {
            CtxSet::Any => true,
            CtxSet::Phones(bits) => (bits >> (phone.0 as u32 % MAX_PHONES)) & 1 == 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        let any = CtxSet::Any;
        assert!(any.contains(CiPhone(0)));
        assert!(any.contains(CiPhone(127)));
    }

    #[test]
    fn empty_matches_nothing() {
        let empty = CtxSet::empty();
        assert!(!empty.contains(CiPhone(5)));
    }

    #[test]
    fn single_matches_only_itself() {
        let s = CtxSet::single(CiPhone(3));
        assert!(s.contains(CiPhone(3)));
        assert!(!s.contains(CiPhone(4)));
    }

    #[test]
    fn insert_accumulates() {
        let mut s = CtxSet::empty();
        s.insert(CiPhone(1));
        s.insert(CiPhone(65));
        assert!(s.contains(CiPhone(1)));
        assert!(s.contains(CiPhone(65)));
        assert!(!s.contains(CiPhone(2)));
    }
}
