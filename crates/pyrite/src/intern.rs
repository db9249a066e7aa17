//! String interning for identifiers and literals.
//!
//! Names are interned once during parsing and referenced everywhere else
//! by [`StringId`], which keeps the AST and IR `Copy`-friendly and makes
//! name comparison an integer compare. Lookups are only needed for error
//! messages and emission.

use ahash::AHashMap;

/// Index into the interner's storage.
///
/// Uses `u32` to save space; four billion unique names is more than any
/// compilation unit needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Append-only string table.
#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    ids: AHashMap<Box<str>, StringId>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning the existing id when already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.ids.get(s) {
            return *id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("interner overflow"));
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.ids.insert(boxed, id);
        id
    }

    /// # Panics
    /// Panics on an id from a different interner.
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Interner;

    #[test]
    fn interning_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("speak");
        let b = interner.intern("name");
        let c = interner.intern("speak");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.get(a), "speak");
        assert_eq!(interner.len(), 2);
    }
}
