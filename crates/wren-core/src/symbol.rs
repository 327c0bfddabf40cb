//! Append-only symbol tables.
//!
//! The VM keeps one global table for method names and one per module for
//! variable names. Symbols are dense `u32` indices assigned in insertion
//! order, which is what lets a subclass copy its superclass's method table
//! by plain index. Callers are expected to cache the indices they care
//! about.

use string_interner::{backend::StringBackend, DefaultSymbol, StringInterner};

/// An append-only string interner handing out dense `u32` symbols.
#[derive(Clone)]
pub struct SymbolTable {
    interner: StringInterner<StringBackend<DefaultSymbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            interner: StringInterner::new(),
        }
    }

    /// Interns `name`, returning its symbol. Returns the existing symbol if
    /// the name is already present.
    #[inline]
    pub fn ensure(&mut self, name: &str) -> u32 {
        use string_interner::Symbol as _;
        self.interner.get_or_intern(name).to_usize() as u32
    }

    /// Looks a name up without interning it.
    #[inline]
    pub fn find(&self, name: &str) -> Option<u32> {
        use string_interner::Symbol as _;
        self.interner.get(name).map(|s| s.to_usize() as u32)
    }

    /// Resolves a symbol back to its name.
    #[inline]
    pub fn name(&self, symbol: u32) -> Option<&str> {
        use string_interner::Symbol as _;
        DefaultSymbol::try_from_usize(symbol as usize).and_then(|s| self.interner.resolve(s))
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.interner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.interner.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("count", &self.interner.len())
            .finish()
    }
}
