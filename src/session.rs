//! Patch session orchestration.
//!
//! A session owns one container copy plus everything that patches it: the
//! symbol table, the hook set, the Gecko table, and the injected blob. It
//! applies them in a fixed order with an all-or-nothing guarantee: the
//! fatal checks (duplicate hooks, unresolved symbols, container capacity)
//! run before any byte of the working copy is mutated, and the source
//! container handed to [`PatchSession::new`] is never written back unless
//! the whole session succeeds.

use std::fs;
use std::path::Path;

use object::{Object, ObjectSection, SectionKind as ObjSectionKind};

use crate::arena::{self, ArenaLayout};
use crate::dol::Container;
use crate::error::{PatchError, Result};
use crate::gecko::{self, CodeMeta, GeckoCodeTable};
use crate::hook::{Hook, HookSet};
use crate::map;
use crate::pragma;
use crate::profile::Profile;
use crate::symbol::SymbolTable;
use crate::utils::align_up;

/// One hook's outcome: its status line and whether its payload landed.
#[derive(Debug, Clone)]
pub struct HookReport {
    pub line: String,
    pub applied: bool,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub hooks: Vec<HookReport>,
    pub codes: Vec<CodeMeta>,
    pub injection_address: u32,
    pub blob_size: usize,
    pub arena: Option<ArenaLayout>,
}

pub struct PatchSession {
    profile: Profile,
    source: Container,
    patched: Option<Container>,
    symbols: SymbolTable,
    hooks: HookSet,
    gecko: GeckoCodeTable,
    blob: Vec<u8>,
    injection: u32,
}

impl PatchSession {
    /// Start a session over a parsed container. Without an explicit
    /// injection address, injected code goes directly after the image's
    /// last section, 32-byte aligned.
    pub fn new(profile: Profile, dol: Container, injection: Option<u32>) -> Self {
        let injection = match injection {
            Some(address) => {
                if address % 32 != 0 {
                    tracing::warn!(
                        "injection address {:#010x} is not 32-byte aligned; OSResetSystem may misbehave",
                        address
                    );
                }
                address
            }
            None => {
                let address = align_up(dol.rom_end(), 32);
                tracing::info!("injection address auto-set from end of image: {:#010x}", address);
                address
            }
        };
        PatchSession {
            profile,
            source: dol,
            patched: None,
            symbols: SymbolTable::new(),
            hooks: HookSet::new(),
            gecko: GeckoCodeTable::new(),
            blob: Vec::new(),
            injection,
        }
    }

    pub fn injection_address(&self) -> u32 {
        self.injection
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn add_hook(&mut self, hook: Hook) {
        if let Some(name) = hook.symbol_name() {
            self.symbols.touch(name);
        }
        self.hooks.add(hook);
    }

    /// Scan one patch source file for `#pragma` hook declarations.
    pub fn scan_source(&mut self, text: &str, path: &str) -> Result<usize> {
        let found = pragma::scan_source(text, path, self.profile.address_space)?;
        let count = found.len();
        for hook in found {
            self.add_hook(hook);
        }
        tracing::debug!("{}: {} hook pragmas", path, count);
        Ok(count)
    }

    /// Load the externally linked object: its symbol table populates the
    /// session's, and its allocatable sections at or above the injection
    /// address become the injected blob.
    pub fn load_object(&mut self, data: &[u8], source: &str) -> Result<()> {
        let loaded = self.symbols.load_object(data, self.profile.address_space, source)?;
        tracing::debug!("{}: {} symbols", source, loaded);

        let obj = object::File::parse(data)?;
        for section in obj.sections() {
            let keep = matches!(
                section.kind(),
                ObjSectionKind::Text
                    | ObjSectionKind::Data
                    | ObjSectionKind::ReadOnlyData
                    | ObjSectionKind::ReadOnlyString
            );
            if !keep || section.address() < self.injection as u64 {
                continue;
            }
            let bytes = section.data()?;
            if bytes.is_empty() {
                continue;
            }
            let offset = (section.address() as u32 - self.injection) as usize;
            if self.blob.len() < offset + bytes.len() {
                self.blob.resize(offset + bytes.len(), 0);
            }
            self.blob[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Load one `name = 0xADDRESS` override file; the section its symbols
    /// belong to is the file stem (`text.txt` defines `.text` symbols).
    pub fn load_override_file(&mut self, path: &Path) -> Result<usize> {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("text");
        let section = format!(".{stem}");
        let text = fs::read_to_string(path)?;
        let applied = self.symbols.load_overrides(&section, &text, self.profile.address_space)?;
        tracing::debug!("{}: {} overrides applied", path.display(), applied);
        Ok(applied)
    }

    pub fn load_gecko(&mut self, text: &str) -> Result<()> {
        self.gecko.parse(text)
    }

    /// Resolve and apply everything, in order: duplicate check, full symbol
    /// resolution, capacity check, hooks, Gecko merge, section append,
    /// boot-arena patch.
    pub fn run(&mut self) -> Result<SessionReport> {
        self.hooks.assert_no_duplicates()?;

        let missing = self.hooks.resolve_all(&self.symbols)?;
        if !missing.is_empty() {
            return Err(PatchError::UnresolvedSymbols(missing));
        }

        let needs_section = !self.blob.is_empty() || self.gecko.has_pending_inserts();
        if needs_section && !self.source.can_append() {
            return Err(PatchError::ContainerFull);
        }

        let mut working = self.source.clone();
        let mut blob = self.blob.clone();

        let hooks = self
            .hooks
            .apply_all(&mut working)
            .into_iter()
            .map(|(line, applied)| {
                if applied {
                    tracing::info!("{}", line);
                } else {
                    tracing::warn!("{} (target not mapped)", line);
                }
                HookReport { line, applied }
            })
            .collect();

        let codes = gecko::merge(
            &self.gecko,
            &mut working,
            &mut blob,
            self.injection,
            self.profile.address_space,
        )?;

        let blob_size = blob.len();
        let mut arena = None;
        if !blob.is_empty() {
            let kind = working.append_auto(self.injection, blob)?;
            tracing::info!(
                "appended {:#x} bytes at {:#010x} as a {:?} section",
                blob_size,
                self.injection,
                kind
            );
            let rom_end = working.rom_end();
            arena = Some(arena::patch_boot_arena(&mut working, &self.profile, rom_end)?);
        }

        let report = SessionReport {
            hooks,
            codes,
            injection_address: self.injection,
            blob_size,
            arena,
        };
        self.patched = Some(working);
        Ok(report)
    }

    /// The patched image; available only after a successful [`run`].
    ///
    /// [`run`]: PatchSession::run
    pub fn patched(&self) -> Option<&Container> {
        self.patched.as_ref()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let Some(patched) = &self.patched else {
            return Err(PatchError::ContainerParse("session has not been run".to_string()));
        };
        fs::write(path, patched.to_bytes())?;
        Ok(())
    }

    pub fn write_map(&self, out: &mut impl std::io::Write, codes: &[CodeMeta]) -> Result<()> {
        map::write_map(out, &self.symbols, self.injection, codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dol::SectionKind;
    use crate::hook::HookKind;

    fn base_dol() -> Container {
        let mut dol = Container::empty(&Profile::gamecube());
        dol.append_section(SectionKind::Text, 0x8000_3000, vec![0; 0x1000]).unwrap();
        dol
    }

    fn session() -> PatchSession {
        PatchSession::new(Profile::gamecube(), base_dol(), Some(0x8130_0000))
    }

    fn hook_at(session: &mut PatchSession, va: u32, symbol: &str) {
        let target = Profile::gamecube().address_space.address(va).unwrap();
        session.add_hook(Hook::new(target, HookKind::Branch { symbol: symbol.into(), link: false }));
    }

    fn define(session: &mut PatchSession, name: &str, va: u32) {
        session
            .symbols
            .load_overrides(".text", &format!("{name} = {va:#x}"), Profile::gamecube().address_space)
            .unwrap();
    }

    #[test]
    fn injection_address_auto_selects_past_the_image() {
        let session = PatchSession::new(Profile::gamecube(), base_dol(), None);
        assert_eq!(session.injection_address(), 0x8000_4000);
    }

    #[test]
    fn unresolved_symbols_abort_before_any_write() {
        let mut s = session();
        hook_at(&mut s, 0x8000_3000, "known");
        hook_at(&mut s, 0x8000_3004, "missing_one");
        hook_at(&mut s, 0x8000_3008, "missing_two");
        define(&mut s, "known", 0x8000_3800);

        match s.run() {
            Err(PatchError::UnresolvedSymbols(names)) => {
                assert_eq!(names, vec!["missing_one".to_string(), "missing_two".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(s.patched().is_none());
        // The source container never saw the resolved hook either.
        assert_eq!(s.source.read_u32(0x8000_3000), Some(0));
    }

    #[test]
    fn duplicate_hooks_abort_before_resolution() {
        let mut s = session();
        hook_at(&mut s, 0x8000_3000, "foo");
        hook_at(&mut s, 0x8000_3000, "bar");
        assert!(matches!(s.run(), Err(PatchError::DuplicateHookTargets(_))));
    }

    #[test]
    fn hooks_and_gecko_land_in_the_working_copy_only() {
        let mut s = session();
        hook_at(&mut s, 0x8000_3000, "OnSpawn");
        define(&mut s, "OnSpawn", 0x8000_3800);
        s.load_gecko("$Tweak\n04003010 0000002A\n").unwrap();

        let report = s.run().unwrap();
        assert!(report.hooks[0].applied);
        let patched = s.patched().unwrap();
        assert_eq!(patched.read_u32(0x8000_3000), Some(0x4800_0800));
        assert_eq!(patched.read_u32(0x8000_3010), Some(0x2A));
        assert_eq!(s.source.read_u32(0x8000_3000), Some(0));
        assert_eq!(s.source.read_u32(0x8000_3010), Some(0));
    }

    #[test]
    fn gecko_inserts_append_a_section_and_move_the_arena() {
        let mut s = session();
        s.load_gecko("$Insert\nC2003100 00000001\n60000000 00000000\n").unwrap();
        let report = s.run().unwrap();

        assert_eq!(report.codes[0].inserts[0].address, 0x8130_0000);
        let patched = s.patched().unwrap();
        assert!(patched.is_mapped(0x8130_0000));
        assert_eq!(patched.section_count(SectionKind::Text), 2);
        assert!(report.arena.is_some());
        assert_eq!(patched.rom_end(), 0x8130_0008);
    }

    #[test]
    fn a_full_container_is_fatal_before_any_write() {
        let mut dol = base_dol();
        for i in 0..6 {
            dol.append_section(SectionKind::Text, 0x8010_0000 + i * 0x100, vec![0; 0x10]).unwrap();
        }
        for i in 0..11 {
            dol.append_section(SectionKind::Data, 0x8020_0000 + i * 0x100, vec![0; 0x10]).unwrap();
        }
        let mut s = PatchSession::new(Profile::gamecube(), dol, Some(0x8130_0000));
        hook_at(&mut s, 0x8000_3000, "OnSpawn");
        define(&mut s, "OnSpawn", 0x8000_3800);
        s.load_gecko("$Insert\nC2003100 00000001\n60000000 00000000\n").unwrap();

        assert!(matches!(s.run(), Err(PatchError::ContainerFull)));
        assert_eq!(s.source.read_u32(0x8000_3000), Some(0));
    }
}
