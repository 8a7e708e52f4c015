//! Symbol table management.
//!
//! Tracks symbols referenced by hooks and discovered in the externally
//! linked object, and resolves lookups by raw or demangled name. Population
//! happens in two passes: the linked object's symbol table first, manual
//! override files second. A symbol that already carries a source file is
//! never touched by an override: the compiled object wins.

use std::collections::HashMap;

use object::{Object, ObjectSection, ObjectSymbol, SectionKind};

use crate::addr::{Address, AddressSpace};
use crate::demangle::{Demangle, ItaniumDemangler};
use crate::error::{PatchError, Result};
use crate::utils::parse_hex_u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolFlags {
    pub function: bool,
    pub data: bool,
    pub bss: bool,
    pub rodata: bool,
    pub weak: bool,
    pub absolute: bool,
    pub undefined: bool,
    /// GCC's Itanium ABI emits two constructors; C1 is the complete object
    /// constructor, C2 the base object constructor.
    pub complete_ctor: bool,
    pub base_ctor: bool,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub demangled: Option<String>,
    pub address: Option<Address>,
    pub size: u32,
    pub section: String,
    pub source_file: String,
    pub flags: SymbolFlags,
}

impl Symbol {
    fn referenced(name: &str) -> Self {
        Symbol {
            name: name.to_string(),
            demangled: None,
            address: None,
            size: 0,
            section: String::new(),
            source_file: String::new(),
            flags: SymbolFlags { undefined: true, ..SymbolFlags::default() },
        }
    }

    /// C-linkage names are anything that is not an Itanium `_Z` mangling.
    pub fn is_c_linkage(&self) -> bool {
        !self.name.starts_with("_Z")
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.demangled, self.address) {
            (Some(d), Some(a)) => write!(f, "{} ({}) @ {}", self.name, d, a),
            (Some(d), None) => write!(f, "{} ({}) @ ??", self.name, d),
            (None, Some(a)) => write!(f, "{} @ {}", self.name, a),
            (None, None) => write!(f, "{} @ ??", self.name),
        }
    }
}

/// Session-owned symbol dictionary. C++ symbols are additionally indexed by
/// their demangled spelling, so hooks can name a function either way.
pub struct SymbolTable {
    entries: Vec<Symbol>,
    index: HashMap<String, usize>,
    demangler: Box<dyn Demangle>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::with_demangler(Box::new(ItaniumDemangler::new()))
    }

    pub fn with_demangler(demangler: Box<dyn Demangle>) -> Self {
        SymbolTable { entries: Vec::new(), index: HashMap::new(), demangler }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.entries.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Ensure an entry exists for `name`, creating an empty referenced
    /// symbol on first sight. Returns its slot.
    pub fn touch(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.entries.len();
        let mut symbol = Symbol::referenced(name);
        if !symbol.is_c_linkage() {
            if let Some(demangled) = self.demangler.demangle(name) {
                self.index.insert(demangled.clone(), i);
                symbol.demangled = Some(demangled);
            }
        }
        self.entries.push(symbol);
        self.index.insert(name.to_string(), i);
        i
    }

    /// First population pass: the linked object's symbol table.
    ///
    /// Local symbols are skipped; a weak definition never displaces a strong
    /// one already in the table. Addresses outside the target's address
    /// space are left unresolved.
    pub fn load_object(&mut self, data: &[u8], space: AddressSpace, source: &str) -> Result<usize> {
        let obj = object::File::parse(data)?;
        let mut loaded = 0usize;
        for sym in obj.symbols() {
            let name = sym.name()?;
            if name.is_empty() || sym.is_local() {
                continue;
            }
            if sym.is_undefined() {
                self.touch(name);
                continue;
            }

            let slot = self.touch(name);
            let existing = &self.entries[slot];
            if !existing.flags.undefined && existing.address.is_some() && sym.is_weak() {
                continue;
            }

            let mut flags = SymbolFlags {
                weak: sym.is_weak(),
                absolute: sym.section() == object::SymbolSection::Absolute,
                ..SymbolFlags::default()
            };
            let mut section_name = String::new();
            if let Some(index) = sym.section_index() {
                let section = obj.section_by_index(index)?;
                section_name = section.name()?.to_string();
                match section.kind() {
                    SectionKind::Text => flags.function = true,
                    SectionKind::Data => flags.data = true,
                    SectionKind::UninitializedData => flags.bss = true,
                    SectionKind::ReadOnlyData | SectionKind::ReadOnlyString => flags.rodata = true,
                    _ => {}
                }
            }
            if name.starts_with("_Z") {
                flags.complete_ctor = name.contains("C1");
                flags.base_ctor = name.contains("C2");
            }

            let address = match space.address(sym.address() as u32) {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::trace!(
                        "symbol {} at {:#x} is outside the target address space",
                        name,
                        sym.address()
                    );
                    None
                }
            };

            let entry = &mut self.entries[slot];
            entry.address = address;
            entry.size = sym.size() as u32;
            entry.section = section_name;
            entry.flags = flags;
            if entry.source_file.is_empty() {
                entry.source_file = source.to_string();
            }
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Second population pass: one manual override file.
    ///
    /// Line-oriented `name = 0xADDRESS` pairs; `//` starts a comment. The
    /// section the definitions belong to is conventionally the file stem
    /// (a `text.txt` file defines `.text` symbols). Only symbols already in
    /// the table are filled in, and a symbol attributed to a source file is
    /// skipped outright.
    pub fn load_overrides(&mut self, section: &str, text: &str, space: AddressSpace) -> Result<usize> {
        let mut applied = 0usize;
        for raw_line in text.lines() {
            let line = raw_line.split("//").next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (name, address) = line
                .rsplit_once(" = ")
                .map(|(n, a)| (n.trim(), a.trim()))
                .ok_or_else(|| PatchError::OverrideParse(line.to_string()))?;
            let value =
                parse_hex_u32(address).ok_or_else(|| PatchError::OverrideParse(line.to_string()))?;
            let Some(&slot) = self.index.get(name) else {
                continue;
            };
            let entry = &mut self.entries[slot];
            if !entry.source_file.is_empty() {
                // Defined by the compiled object; the override loses.
                continue;
            }
            entry.address = Some(space.address(value)?);
            entry.section = section.to_string();
            entry.flags.absolute = true;
            entry.flags.undefined = false;
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::GAMECUBE_ADDRESS_SPACE;

    #[test]
    fn touch_is_idempotent() {
        let mut t = SymbolTable::new();
        let a = t.touch("OSReport");
        let b = t.touch("OSReport");
        assert_eq!(a, b);
        assert_eq!(t.len(), 1);
        assert!(t.lookup("OSReport").unwrap().flags.undefined);
    }

    #[test]
    fn cpp_symbols_index_under_both_spellings() {
        let mut t = SymbolTable::new();
        t.touch("_Z3foov");
        let by_raw = t.lookup("_Z3foov").unwrap();
        assert_eq!(by_raw.demangled.as_deref(), Some("foo()"));
        let by_demangled = t.lookup("foo()").unwrap();
        assert_eq!(by_demangled.name, "_Z3foov");
    }

    #[test]
    fn overrides_fill_referenced_symbols() {
        let mut t = SymbolTable::new();
        t.touch("OSReport");
        let n = t
            .load_overrides(
                ".text",
                "OSReport = 0x800A1B2C // from the retail map\n\n// comment only\n",
                GAMECUBE_ADDRESS_SPACE,
            )
            .unwrap();
        assert_eq!(n, 1);
        let sym = t.lookup("OSReport").unwrap();
        assert_eq!(sym.address.unwrap().virtual_address(), 0x800A_1B2C);
        assert_eq!(sym.section, ".text");
        assert!(sym.flags.absolute);
        assert!(!sym.flags.undefined);
    }

    #[test]
    fn overrides_never_displace_compiled_symbols() {
        let mut t = SymbolTable::new();
        let slot = t.touch("main");
        t.entries[slot].source_file = "main.c".to_string();
        t.entries[slot].address = Some(GAMECUBE_ADDRESS_SPACE.address(0x8130_0000).unwrap());
        t.load_overrides(".text", "main = 0x80003100", GAMECUBE_ADDRESS_SPACE).unwrap();
        assert_eq!(t.lookup("main").unwrap().address.unwrap().virtual_address(), 0x8130_0000);
    }

    #[test]
    fn overrides_ignore_unknown_symbols() {
        let mut t = SymbolTable::new();
        let n = t.load_overrides(".data", "never_referenced = 0x80400000", GAMECUBE_ADDRESS_SPACE).unwrap();
        assert_eq!(n, 0);
        assert!(!t.contains("never_referenced"));
    }

    #[test]
    fn malformed_override_lines_are_reported() {
        let mut t = SymbolTable::new();
        assert!(matches!(
            t.load_overrides(".text", "just a stray line", GAMECUBE_ADDRESS_SPACE),
            Err(PatchError::OverrideParse(_))
        ));
        t.touch("foo");
        assert!(matches!(
            t.load_overrides(".text", "foo = banana", GAMECUBE_ADDRESS_SPACE),
            Err(PatchError::OverrideParse(_))
        ));
    }
}
