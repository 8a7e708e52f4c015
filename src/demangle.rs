//! Symbol demangling capability.
//!
//! C++ symbols from the linked object arrive mangled (Itanium ABI, `_Z...`).
//! The symbol table indexes them under both spellings so hooks can name a
//! function either way. Demangling is a pure name-to-name mapping behind the
//! [`Demangle`] trait; the default implementation wraps the `cpp_demangle`
//! crate and memoizes per raw name, since the same symbols are looked up
//! repeatedly while hooks resolve.

use std::collections::HashMap;

pub trait Demangle {
    /// Demangle a raw symbol name. Returns `None` when the name does not
    /// parse as a mangled symbol.
    fn demangle(&mut self, raw: &str) -> Option<String>;
}

/// Itanium-ABI demangler with a per-name cache.
#[derive(Default)]
pub struct ItaniumDemangler {
    cache: HashMap<String, Option<String>>,
}

impl ItaniumDemangler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Demangle for ItaniumDemangler {
    fn demangle(&mut self, raw: &str) -> Option<String> {
        if let Some(hit) = self.cache.get(raw) {
            return hit.clone();
        }
        let demangled = cpp_demangle::Symbol::new(raw)
            .ok()
            .and_then(|sym| sym.demangle(&cpp_demangle::DemangleOptions::default()).ok());
        self.cache.insert(raw.to_string(), demangled.clone());
        demangled
    }
}
