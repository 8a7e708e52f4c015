//! Target profiles.
//!
//! A profile fixes everything that is specific to one console target: the
//! flat physical/virtual address mapping, the container format's section
//! maxima, and the boot-arena patch sites in the target's startup routines.
//! The patch sites are address literals into a known boot routine, not
//! generic relocations; they must be re-derived whenever the target's boot
//! code changes.

use crate::addr::{AddressSpace, GAMECUBE_ADDRESS_SPACE};

/// Which recomputed boot value a patch site installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaValue {
    StackTop,
    StackEnd,
    DebugStackEnd,
    ArenaLo,
    DebugArenaLo,
}

/// One `lis`/`ori` pair in the boot routine that loads a memory-layout
/// constant into a register.
#[derive(Debug, Clone, Copy)]
pub struct ArenaSite {
    /// Virtual address of the `lis` instruction.
    pub lis_address: u32,
    /// Virtual address of the `ori` instruction (not always adjacent).
    pub ori_address: u32,
    pub lis_register: u32,
    pub ori_dest: u32,
    pub ori_source: u32,
    pub value: ArenaValue,
}

/// Runtime stack sizes and the instruction sites that set up the boot arena.
#[derive(Debug, Clone)]
pub struct BootLayout {
    pub stack_size: u32,
    pub debug_stack_size: u32,
    pub sites: Vec<ArenaSite>,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub name: &'static str,
    pub address_space: AddressSpace,
    pub max_text_sections: usize,
    pub max_data_sections: usize,
    pub boot: BootLayout,
}

impl Profile {
    /// The retail GameCube profile: 7 text / 11 data section slots, and the
    /// stock SDK boot routines (`__init_registers`, `OSInit`,
    /// `__OSThreadInit`).
    pub fn gamecube() -> Self {
        Profile {
            name: "gamecube",
            address_space: GAMECUBE_ADDRESS_SPACE,
            max_text_sections: 7,
            max_data_sections: 11,
            boot: BootLayout {
                stack_size: 0x10000,
                debug_stack_size: 0x2000,
                sites: vec![
                    // __init_registers: r1 = top of stack.
                    ArenaSite {
                        lis_address: 0x8000_5410,
                        ori_address: 0x8000_5414,
                        lis_register: 1,
                        ori_dest: 1,
                        ori_source: 1,
                        value: ArenaValue::StackTop,
                    },
                    // OSInit: OSSetArenaLo(db_osarena_lo).
                    ArenaSite {
                        lis_address: 0x800E_B36C,
                        ori_address: 0x800E_B370,
                        lis_register: 3,
                        ori_dest: 3,
                        ori_source: 3,
                        value: ArenaValue::DebugArenaLo,
                    },
                    // OSInit: OSSetArenaLo(osarena_lo) on the retail path.
                    ArenaSite {
                        lis_address: 0x800E_B3A4,
                        ori_address: 0x800E_B3A8,
                        lis_register: 3,
                        ori_dest: 3,
                        ori_source: 3,
                        value: ArenaValue::ArenaLo,
                    },
                    // __OSThreadInit: DefaultThread->stackBase = db_stack_end.
                    ArenaSite {
                        lis_address: 0x800F_18BC,
                        ori_address: 0x800F_18C0,
                        lis_register: 3,
                        ori_dest: 0,
                        ori_source: 3,
                        value: ArenaValue::DebugStackEnd,
                    },
                    // __OSThreadInit: DefaultThread->stackEnd = stack_end.
                    // The lis and ori are separated by an unrelated store.
                    ArenaSite {
                        lis_address: 0x800F_18C4,
                        ori_address: 0x800F_18CC,
                        lis_register: 3,
                        ori_dest: 0,
                        ori_source: 3,
                        value: ArenaValue::StackEnd,
                    },
                ],
            },
        }
    }
}
