//! Boot-arena relocation.
//!
//! Injected sections land past the original image, in memory the stock boot
//! code hands to the heap arena. The boot routines load the stack and arena
//! bounds with `lis`/`ori` pairs at fixed sites, so moving the whole runtime
//! stack above the injected code is a handful of immediate rewrites.

use crate::asm;
use crate::dol::Container;
use crate::error::Result;
use crate::profile::{ArenaValue, Profile};

/// The recomputed boot memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    pub stack_top: u32,
    pub stack_end: u32,
    pub debug_stack_top: u32,
    pub debug_stack_end: u32,
    pub arena_lo: u32,
    pub debug_arena_lo: u32,
}

impl ArenaLayout {
    /// Place the main stack directly above `rom_end` and the debug stack
    /// above that, each with 0x100 bytes of headroom and 8-byte alignment;
    /// each arena boundary sits 32-byte aligned above its stack.
    pub fn compute(profile: &Profile, rom_end: u32) -> Self {
        let stack_top = (rom_end + profile.boot.stack_size + 7 + 0x100) & !7;
        let stack_end = stack_top - profile.boot.stack_size;
        let debug_stack_top = (stack_top + profile.boot.debug_stack_size + 7 + 0x100) & !7;
        let debug_stack_end = debug_stack_top - profile.boot.debug_stack_size;
        let arena_lo = (stack_top + 31) & !31;
        let debug_arena_lo = (debug_stack_top + 31) & !31;
        ArenaLayout {
            stack_top,
            stack_end,
            debug_stack_top,
            debug_stack_end,
            arena_lo,
            debug_arena_lo,
        }
    }

    fn value(&self, which: ArenaValue) -> u32 {
        match which {
            ArenaValue::StackTop => self.stack_top,
            ArenaValue::StackEnd => self.stack_end,
            ArenaValue::DebugStackEnd => self.debug_stack_end,
            ArenaValue::ArenaLo => self.arena_lo,
            ArenaValue::DebugArenaLo => self.debug_arena_lo,
        }
    }
}

/// Rewrite every boot patch site for the given image end. Sites that fall
/// outside the image (a trimmed or non-stock boot) are skipped with a
/// warning rather than failing the session.
pub fn patch_boot_arena(dol: &mut Container, profile: &Profile, rom_end: u32) -> Result<ArenaLayout> {
    let layout = ArenaLayout::compute(profile, rom_end);
    tracing::debug!(
        "boot arena: stack top {:#010x}, arena lo {:#010x}",
        layout.stack_top,
        layout.arena_lo
    );
    for site in &profile.boot.sites {
        if !dol.is_mapped(site.lis_address) || !dol.is_mapped(site.ori_address) {
            tracing::warn!(
                "boot patch site {:#010x} is not mapped; skipping {:?}",
                site.lis_address,
                site.value
            );
            continue;
        }
        let value = layout.value(site.value);
        let lis = asm::assemble_lis(site.lis_register, asm::hi(value))?;
        let ori = asm::assemble_ori(site.ori_dest, site.ori_source, (value & 0xFFFF) as i64)?;
        dol.write_u32(site.lis_address, lis);
        dol.write_u32(site.ori_address, ori);
    }
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dol::SectionKind;

    #[test]
    fn layout_math_matches_the_stock_boot() {
        let layout = ArenaLayout::compute(&Profile::gamecube(), 0x8130_5E39);
        assert_eq!(layout.stack_top, 0x8131_5F40);
        assert_eq!(layout.stack_end, 0x8130_5F40);
        assert_eq!(layout.debug_stack_top, 0x8131_8040);
        assert_eq!(layout.debug_stack_end, 0x8131_6040);
        assert_eq!(layout.arena_lo, 0x8131_5F40);
        assert_eq!(layout.debug_arena_lo, 0x8131_8040);
        assert_eq!(layout.stack_top % 8, 0);
        assert_eq!(layout.debug_stack_top % 8, 0);
        assert_eq!(layout.arena_lo % 32, 0);
        assert_eq!(layout.debug_arena_lo % 32, 0);
    }

    #[test]
    fn debug_stack_sits_above_the_main_stack() {
        let layout = ArenaLayout::compute(&Profile::gamecube(), 0x8130_0000);
        assert!(layout.debug_stack_end >= layout.stack_top);
        assert!(layout.debug_arena_lo >= layout.debug_stack_top);
        assert_eq!(layout.debug_stack_top - layout.debug_stack_end, 0x2000);
    }

    #[test]
    fn mapped_sites_get_lis_ori_pairs() {
        let profile = Profile::gamecube();
        let mut dol = Container::empty(&profile);
        dol.append_section(SectionKind::Text, 0x8000_5400, vec![0; 0x20]).unwrap();

        let layout = patch_boot_arena(&mut dol, &profile, 0x8044_5E40).unwrap();
        // Only __init_registers is mapped in this image.
        let lis = dol.read_u32(0x8000_5410).unwrap();
        let ori = dol.read_u32(0x8000_5414).unwrap();
        assert_eq!(lis >> 26, 15);
        assert_eq!(ori >> 26, 24);
        let hi = lis & 0xFFFF;
        let lo = ori & 0xFFFF;
        assert_eq!(hi << 16 | lo, layout.stack_top);
    }

    #[test]
    fn unmapped_sites_are_skipped() {
        let profile = Profile::gamecube();
        let mut dol = Container::empty(&profile);
        dol.append_section(SectionKind::Text, 0x8000_3000, vec![0x60; 0x40]).unwrap();
        patch_boot_arena(&mut dol, &profile, 0x8130_0000).unwrap();
        assert_eq!(dol.read_u32(0x8000_3000), Some(0x6060_6060));
    }
}
