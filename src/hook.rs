//! Hook set: the ordered collection of patch requests.
//!
//! A hook ties one target address to either a symbol or a literal payload.
//! The variant set is closed (branch, pointer, string, 16-bit immediate,
//! 12-bit paired-singles immediate, nop), so resolution and application
//! match exhaustively instead of dispatching through an open class
//! hierarchy.
//!
//! Session policy: every hook resolves before any hook applies, and every
//! resolution failure is aggregated into one report instead of stopping at
//! the first.

use std::collections::HashMap;

use crate::addr::Address;
use crate::asm;
use crate::dol::Container;
use crate::error::{PatchError, Result};
use crate::symbol::SymbolTable;

/// Small-data-area base symbols, defined at link time by the external step.
const SDA_BASE: &str = "_SDA_BASE_";
const SDA2_BASE: &str = "_SDA2_BASE_";

/// Relocation view of a symbol's address for immediate hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmModifier {
    /// `@h`: high 16 bits.
    Hi,
    /// `@l`: low 16 bits.
    Lo,
    /// `@ha`: carry-adjusted high 16 bits.
    Ha,
    /// `@sda`: offset from `_SDA_BASE_` (r13-relative).
    Sda,
    /// `@sda2`: offset from `_SDA2_BASE_` (r2-relative).
    Sda2,
}

impl ImmModifier {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "@h" => Some(ImmModifier::Hi),
            "@l" => Some(ImmModifier::Lo),
            "@ha" => Some(ImmModifier::Ha),
            "@sda" => Some(ImmModifier::Sda),
            "@sda2" => Some(ImmModifier::Sda2),
            _ => None,
        }
    }
}

/// How a string hook's literal is turned into target bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StringEncoding {
    /// Strict 7-bit ASCII; anything outside it refuses to resolve.
    #[default]
    Ascii,
    Utf8,
}

impl StringEncoding {
    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        match self {
            StringEncoding::Ascii if !text.is_ascii() => {
                Err(PatchError::StringEncode(text.to_string()))
            }
            _ => Ok(text.as_bytes().to_vec()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum HookKind {
    /// Overwrite the instruction at the target with a branch to `symbol`.
    Branch { symbol: String, link: bool },
    /// Overwrite the word at the target with `symbol`'s address.
    Pointer { symbol: String },
    /// Replace the NUL-terminated string at the target in place.
    String { text: String, encoding: StringEncoding },
    /// Rewrite a 16-bit immediate field with a relocation view of `symbol`.
    Immediate16 { symbol: String, modifier: ImmModifier },
    /// Rewrite a paired-singles 12-bit immediate field, repacking the W and
    /// I bits alongside the offset.
    Immediate12 { symbol: String, modifier: ImmModifier, w: u8, i: u8 },
    /// Overwrite the instruction at the target with a nop.
    Nop,
}

#[derive(Debug, Clone)]
enum Payload {
    Word(u32),
    Half(u16),
    Bytes(Vec<u8>),
}

/// Where a hook was declared, for duplicate and resolution reports.
#[derive(Debug, Clone)]
pub struct HookOrigin {
    pub file: String,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Hook {
    target: Address,
    kind: HookKind,
    payload: Option<Payload>,
    origin: Option<HookOrigin>,
}

impl Hook {
    pub fn new(target: Address, kind: HookKind) -> Self {
        Hook { target, kind, payload: None, origin: None }
    }

    pub fn with_origin(mut self, file: &str, line: usize) -> Self {
        self.origin = Some(HookOrigin { file: file.to_string(), line });
        self
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn kind(&self) -> &HookKind {
        &self.kind
    }

    /// The symbol this hook resolves against, if any.
    pub fn symbol_name(&self) -> Option<&str> {
        match &self.kind {
            HookKind::Branch { symbol, .. }
            | HookKind::Pointer { symbol }
            | HookKind::Immediate16 { symbol, .. }
            | HookKind::Immediate12 { symbol, .. } => Some(symbol),
            HookKind::String { .. } | HookKind::Nop => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.payload.is_some()
    }

    fn symbol_address(symbols: &SymbolTable, name: &str) -> Option<Address> {
        symbols.lookup(name).and_then(|s| s.address)
    }

    fn immediate_view(
        symbols: &SymbolTable,
        name: &str,
        modifier: ImmModifier,
    ) -> Result<Option<i64>> {
        let Some(addr) = Self::symbol_address(symbols, name) else {
            return Ok(None);
        };
        let value = addr.virtual_address();
        let view = match modifier {
            ImmModifier::Hi => asm::hi(value),
            ImmModifier::Lo => asm::lo(value),
            ImmModifier::Ha => asm::hia(value),
            ImmModifier::Sda | ImmModifier::Sda2 => {
                // The base register's own symbol must already be resolved.
                let base = if modifier == ImmModifier::Sda { SDA_BASE } else { SDA2_BASE };
                let Some(base_addr) = Self::symbol_address(symbols, base) else {
                    return Ok(None);
                };
                let delta = addr - base_addr;
                asm::mask_field(delta, 16, true)?;
                delta
            }
        };
        Ok(Some(view))
    }

    /// The symbol that actually blocked resolution: the hook's own symbol
    /// when it has no address, otherwise the SDA base an immediate modifier
    /// depends on.
    fn missing_symbol(&self, symbols: &SymbolTable) -> Option<&str> {
        let name = self.symbol_name()?;
        if Self::symbol_address(symbols, name).is_none() {
            return Some(name);
        }
        let modifier = match &self.kind {
            HookKind::Immediate16 { modifier, .. } | HookKind::Immediate12 { modifier, .. } => {
                modifier
            }
            _ => return None,
        };
        let base = match modifier {
            ImmModifier::Sda => SDA_BASE,
            ImmModifier::Sda2 => SDA2_BASE,
            _ => return None,
        };
        if Self::symbol_address(symbols, base).is_none() {
            Some(base)
        } else {
            None
        }
    }

    /// Compute this hook's payload from the symbol table. Returns whether
    /// the target value is now known; range overflows are hard errors.
    pub fn resolve(&mut self, symbols: &SymbolTable) -> Result<bool> {
        let payload = match &self.kind {
            HookKind::Branch { symbol, link } => {
                match Self::symbol_address(symbols, symbol) {
                    Some(dest) => {
                        Some(Payload::Word(asm::assemble_branch(self.target, dest, *link, false)?))
                    }
                    None => None,
                }
            }
            HookKind::Pointer { symbol } => {
                Self::symbol_address(symbols, symbol).map(|a| Payload::Word(a.virtual_address()))
            }
            HookKind::String { text, encoding } => {
                let mut bytes = encoding.encode(text)?;
                bytes.push(0);
                Some(Payload::Bytes(bytes))
            }
            HookKind::Immediate16 { symbol, modifier } => {
                match Self::immediate_view(symbols, symbol, *modifier)? {
                    Some(view) => Some(Payload::Half(asm::mask_field(view, 16, true)? as u16)),
                    None => None,
                }
            }
            HookKind::Immediate12 { symbol, modifier, w, i } => {
                match Self::immediate_view(symbols, symbol, *modifier)? {
                    Some(view) => {
                        let mut field = asm::mask_field(view, 12, true)?;
                        field |= asm::mask_field(*i as i64, 1, false)? << 12;
                        field |= asm::mask_field(*w as i64, 3, false)? << 13;
                        Some(Payload::Half(field as u16))
                    }
                    None => None,
                }
            }
            HookKind::Nop => Some(Payload::Word(asm::nop())),
        };
        self.payload = payload;
        Ok(self.is_resolved())
    }

    /// Write the payload at the target. Returns whether anything was
    /// written: an unresolved hook or an unmapped target is a no-op, and a
    /// string longer than the original refuses to overwrite past it.
    pub fn apply(&self, dol: &mut Container) -> bool {
        let va = self.target.virtual_address();
        match &self.payload {
            None => false,
            Some(Payload::Word(word)) => dol.write_u32(va, *word),
            Some(Payload::Half(half)) => dol.write_u16(va, *half),
            Some(Payload::Bytes(bytes)) => {
                let Some(original) = dol.read_c_string(va) else {
                    return false;
                };
                let original_len = original.len();
                if bytes.len() > original_len {
                    tracing::warn!(
                        "string at {} is {} bytes; replacement needs {} and would overwrite past it",
                        self.target,
                        original_len,
                        bytes.len()
                    );
                    return false;
                }
                // Zero-pad shorter replacements out to the original length.
                let mut padded = bytes.clone();
                padded.resize(original_len, 0);
                dol.write_bytes(va, &padded)
            }
        }
    }

    /// One status line for reports, in `[Kind] address --> symbol` form.
    pub fn describe(&self) -> String {
        let arrow = if self.is_resolved() { "-->" } else { "-X>" };
        match &self.kind {
            HookKind::Branch { symbol, link: false } => {
                format!("[Branch]      {} {} {}", self.target, arrow, symbol)
            }
            HookKind::Branch { symbol, link: true } => {
                format!("[Branchlink]  {} {} {}", self.target, arrow, symbol)
            }
            HookKind::Pointer { symbol } => {
                format!("[Pointer]     {} {} {}", self.target, arrow, symbol)
            }
            HookKind::String { text, .. } => {
                format!("[String]      {} {} \"{}\"", self.target, arrow, text)
            }
            HookKind::Immediate16 { symbol, .. } => {
                format!("[Immediate16] {} {} {}", self.target, arrow, symbol)
            }
            HookKind::Immediate12 { symbol, .. } => {
                format!("[Immediate12] {} {} {}", self.target, arrow, symbol)
            }
            HookKind::Nop => format!("[Nop]         {}", self.target),
        }
    }
}

/// Ordered hook collection with duplicate-target detection.
#[derive(Default)]
pub struct HookSet {
    hooks: Vec<Hook>,
    /// First symbol registered per target address; symbol-less hooks (nop,
    /// string) never claim an address.
    first_symbol_at: HashMap<u32, String>,
    duplicates: Vec<String>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hook> {
        self.hooks.iter()
    }

    /// Add a hook, recording a conflict when a hook at the same target
    /// address names a different symbol.
    pub fn add(&mut self, hook: Hook) {
        if let Some(name) = hook.symbol_name() {
            let va = hook.target.virtual_address();
            match self.first_symbol_at.get(&va) {
                Some(first) if first.as_str() != name => {
                    let origin = hook
                        .origin
                        .as_ref()
                        .map(|o| format!(" (from {}:{})", o.file, o.line))
                        .unwrap_or_default();
                    self.duplicates.push(format!(
                        "{}: {} conflicts with {}{}",
                        hook.target, name, first, origin
                    ));
                }
                Some(_) => {}
                None => {
                    self.first_symbol_at.insert(va, name.to_string());
                }
            }
        }
        self.hooks.push(hook);
    }

    /// Configuration check, run before resolution. Reports every conflict.
    pub fn assert_no_duplicates(&self) -> Result<()> {
        if self.duplicates.is_empty() {
            Ok(())
        } else {
            Err(PatchError::DuplicateHookTargets(self.duplicates.clone()))
        }
    }

    /// Resolve every hook and return the symbols that stayed unresolved, in
    /// first-reference order without repeats.
    pub fn resolve_all(&mut self, symbols: &SymbolTable) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for hook in &mut self.hooks {
            if hook.resolve(symbols)? {
                continue;
            }
            let Some(name) = hook.missing_symbol(symbols) else {
                continue;
            };
            let source = symbols
                .lookup(name)
                .map(|s| s.source_file.as_str())
                .filter(|s| !s.is_empty());
            let line = match source {
                Some(file) => format!("{} (referenced from \"{}\")", name, file),
                None => name.to_string(),
            };
            if !missing.contains(&line) {
                missing.push(line);
            }
        }
        Ok(missing)
    }

    /// Apply every resolved hook. Returns `(status line, applied)` pairs in
    /// hook order.
    pub fn apply_all(&self, dol: &mut Container) -> Vec<(String, bool)> {
        self.hooks
            .iter()
            .map(|hook| {
                let applied = hook.apply(dol);
                (hook.describe(), applied)
            })
            .collect()
    }
}
