//! Gecko code-table parsing and merging.
//!
//! Gecko codes are community patch lists distributed as text: `$`-named
//! codes made of 8-digit hex word pairs, with the command kind in the first
//! word's top byte. Only an allow-listed subset of command kinds can be
//! baked into a container; a code containing anything else is tagged
//! Omitted and left entirely unapplied, but still reported.
//!
//! ASM-insert commands target single-instruction patch sites too small for
//! their payload, so merging relocates the payload into the injected blob
//! and reaches it with a branch: site branches to the trampoline, the
//! trampoline holds the inserted instructions minus the command's trailing
//! pad word, and a generated branch returns to the instruction after the
//! site.

use crate::addr::AddressSpace;
use crate::asm;
use crate::dol::Container;
use crate::error::{PatchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeckoCommand {
    /// `00`: write a byte `count` times at ascending addresses.
    Write8 { address: u32, count: u32, value: u8 },
    /// `02`: write a halfword `count` times.
    Write16 { address: u32, count: u32, value: u16 },
    /// `04`: write one word.
    Write32 { address: u32, value: u32 },
    /// `06`: write an arbitrary byte string.
    WriteString { address: u32, data: Vec<u8> },
    /// `08`: patterned serial write with address and value strides.
    WriteSerial {
        address: u32,
        initial: u32,
        /// 0 = byte, 1 = halfword, 2 = word.
        size: u8,
        count: u32,
        address_step: u32,
        value_step: u32,
    },
    /// `C6`: overwrite the instruction at the address with a branch.
    WriteBranch { address: u32, target: u32, link: bool },
    /// `C2`: insert assembled code at a single-instruction patch site.
    AsmInsert { address: u32, code: Vec<u8> },
    /// `F2`: as `C2`, with a runtime checksum guard the merge carries along.
    AsmInsertXor { address: u32, code: Vec<u8>, checksum: u16, xor_lines: u8 },
    /// Anything outside the allow-list.
    Unsupported { kind: u8 },
}

impl GeckoCommand {
    pub fn is_supported(&self) -> bool {
        !matches!(self, GeckoCommand::Unsupported { .. })
    }

    fn is_insert(&self) -> bool {
        matches!(self, GeckoCommand::AsmInsert { .. } | GeckoCommand::AsmInsertXor { .. })
    }
}

/// Commands embed a 25-bit offset from the start of the virtual window.
fn embedded_address(word: u32) -> u32 {
    (word & 0x01FF_FFFF) | 0x8000_0000
}

fn gather_bytes(words: &[u32], lines: usize, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(lines * 8);
    for pair in 0..lines * 2 {
        let word = words
            .get(pair)
            .ok_or_else(|| PatchError::GeckoParse("code data truncated mid-command".to_string()))?;
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes.truncate(len);
    Ok(bytes)
}

/// Decode one command from the word stream; returns the command and how many
/// words it consumed.
fn decode(words: &[u32]) -> Result<(GeckoCommand, usize)> {
    let [first, second, ..] = *words else {
        return Err(PatchError::GeckoParse("dangling half-command".to_string()));
    };
    let kind = (first >> 24) as u8;
    let address = embedded_address(first);
    let command = match kind {
        0x00 => GeckoCommand::Write8 {
            address,
            count: (second >> 16) + 1,
            value: second as u8,
        },
        0x02 => GeckoCommand::Write16 {
            address,
            count: (second >> 16) + 1,
            value: second as u16,
        },
        0x04 => GeckoCommand::Write32 { address, value: second },
        0x06 => {
            let len = second as usize;
            let lines = len.div_ceil(8);
            let data = gather_bytes(&words[2..], lines, len)?;
            return Ok((GeckoCommand::WriteString { address, data }, 2 + lines * 2));
        }
        0x08 => {
            let [_, _, third, fourth, ..] = *words else {
                return Err(PatchError::GeckoParse("serial write truncated".to_string()));
            };
            return Ok((
                GeckoCommand::WriteSerial {
                    address,
                    initial: second,
                    size: (third >> 28) as u8,
                    count: ((third >> 16) & 0x0FFF) + 1,
                    address_step: third & 0xFFFF,
                    value_step: fourth,
                },
                4,
            ));
        }
        0xC6 => GeckoCommand::WriteBranch {
            address: address & !0x3,
            target: second,
            link: first & 1 != 0,
        },
        0xC2 => {
            let lines = second as usize;
            let code = gather_bytes(&words[2..], lines, lines * 8)?;
            return Ok((GeckoCommand::AsmInsert { address, code }, 2 + lines * 2));
        }
        0xF2 => {
            let lines = (second & 0xFF) as usize;
            let code = gather_bytes(&words[2..], lines, lines * 8)?;
            return Ok((
                GeckoCommand::AsmInsertXor {
                    address,
                    code,
                    checksum: (second >> 16) as u16,
                    xor_lines: (second >> 8) as u8,
                },
                2 + lines * 2,
            ));
        }
        _ => GeckoCommand::Unsupported { kind },
    };
    Ok((command, 2))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeStatus {
    Enabled,
    Disabled,
    Omitted,
}

impl std::fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CodeStatus::Enabled => "ENABLED",
            CodeStatus::Disabled => "DISABLED",
            CodeStatus::Omitted => "OMITTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct GeckoCode {
    pub name: String,
    pub enabled: bool,
    pub commands: Vec<GeckoCommand>,
}

impl GeckoCode {
    pub fn status(&self) -> CodeStatus {
        if !self.enabled {
            CodeStatus::Disabled
        } else if self.commands.iter().all(GeckoCommand::is_supported) {
            CodeStatus::Enabled
        } else {
            CodeStatus::Omitted
        }
    }

    pub fn unsupported_kinds(&self) -> Vec<u8> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                GeckoCommand::Unsupported { kind } => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

/// All codes from one or more Dolphin-format text files.
#[derive(Debug, Clone, Default)]
pub struct GeckoCodeTable {
    codes: Vec<GeckoCode>,
}

impl GeckoCodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> &[GeckoCode] {
        &self.codes
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Whether any enabled code will grow the injected blob when merged.
    pub fn has_pending_inserts(&self) -> bool {
        self.codes.iter().any(|c| {
            c.status() == CodeStatus::Enabled && c.commands.iter().any(GeckoCommand::is_insert)
        })
    }

    /// Parse Dolphin's `[Gecko]` / `[Gecko_Enabled]` ini layout and fold the
    /// codes into the table. Text without section headers is treated as a
    /// bare code list with every code enabled.
    pub fn parse(&mut self, text: &str) -> Result<()> {
        #[derive(PartialEq)]
        enum Block {
            Codes,
            Enabled,
            Other,
        }

        let mut block = Block::Codes;
        let mut saw_header = false;
        let mut pending: Option<(String, Vec<u32>)> = None;
        let mut parsed: Vec<(String, Vec<u32>)> = Vec::new();
        let mut enabled_names: Vec<String> = Vec::new();

        let mut flush = |pending: &mut Option<(String, Vec<u32>)>| {
            if let Some(code) = pending.take() {
                parsed.push(code);
            }
        };

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('*') {
                continue;
            }
            if line.starts_with('[') {
                saw_header = true;
                flush(&mut pending);
                block = match line {
                    "[Gecko]" => Block::Codes,
                    "[Gecko_Enabled]" => Block::Enabled,
                    _ => Block::Other,
                };
                continue;
            }
            match block {
                Block::Other => {}
                Block::Enabled => {
                    if let Some(name) = line.strip_prefix('$') {
                        enabled_names.push(name.trim().to_string());
                    }
                }
                Block::Codes => {
                    if let Some(name) = line.strip_prefix('$') {
                        flush(&mut pending);
                        pending = Some((name.trim().to_string(), Vec::new()));
                        continue;
                    }
                    let Some((_, words)) = pending.as_mut() else {
                        return Err(PatchError::GeckoParse(format!(
                            "code data before any $name: {line:?}"
                        )));
                    };
                    for token in line.split_whitespace() {
                        let word = u32::from_str_radix(token, 16).map_err(|_| {
                            PatchError::GeckoParse(format!("bad hex word {token:?}"))
                        })?;
                        words.push(word);
                    }
                }
            }
        }
        flush(&mut pending);

        for (name, words) in parsed {
            let mut commands = Vec::new();
            let mut cursor = 0usize;
            while cursor < words.len() {
                let (command, consumed) = decode(&words[cursor..])?;
                commands.push(command);
                cursor += consumed;
            }
            let enabled = !saw_header || enabled_names.iter().any(|n| n == &name);
            self.codes.push(GeckoCode { name, enabled, commands });
        }
        Ok(())
    }
}

/// One relocated ASM insert, for the report and symbol-map export. Omitted
/// inserts keep a zero address.
#[derive(Debug, Clone)]
pub struct InsertMeta {
    pub address: u32,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct CodeMeta {
    pub name: String,
    pub status: CodeStatus,
    pub inserts: Vec<InsertMeta>,
}

fn apply_direct(command: &GeckoCommand, dol: &mut Container, space: AddressSpace) -> Result<bool> {
    let done = match *command {
        GeckoCommand::Write8 { address, count, value } => {
            (0..count).all(|i| dol.write_bytes(address + i, &[value]))
        }
        GeckoCommand::Write16 { address, count, value } => {
            (0..count).all(|i| dol.write_u16(address + i * 2, value))
        }
        GeckoCommand::Write32 { address, value } => dol.write_u32(address, value),
        GeckoCommand::WriteString { address, ref data } => dol.write_bytes(address, data),
        GeckoCommand::WriteSerial { address, initial, size, count, address_step, value_step } => {
            let mut target = address;
            let mut value = initial;
            let mut done = true;
            for _ in 0..count {
                done &= match size {
                    0 => dol.write_bytes(target, &[value as u8]),
                    1 => dol.write_u16(target, value as u16),
                    _ => dol.write_u32(target, value),
                };
                target = target.wrapping_add(address_step);
                value = value.wrapping_add(value_step);
            }
            done
        }
        GeckoCommand::WriteBranch { address, target, link } => {
            let word =
                asm::assemble_branch(space.address(address)?, space.address(target)?, link, false)?;
            dol.write_u32(address, word)
        }
        GeckoCommand::AsmInsert { .. }
        | GeckoCommand::AsmInsertXor { .. }
        | GeckoCommand::Unsupported { .. } => true,
    };
    Ok(done)
}

/// Fold the table into the container and the injected blob.
///
/// Inserts from enabled codes become trampolines appended to `blob`
/// (addressed from `injection`); direct writes land in the container.
/// Disabled and Omitted codes write nothing.
pub fn merge(
    table: &GeckoCodeTable,
    dol: &mut Container,
    blob: &mut Vec<u8>,
    injection: u32,
    space: AddressSpace,
) -> Result<Vec<CodeMeta>> {
    while blob.len() % 4 != 0 {
        blob.push(0);
    }

    let mut report = Vec::new();
    for code in table.codes() {
        let status = code.status();
        let mut inserts = Vec::new();
        match status {
            CodeStatus::Omitted => {
                tracing::warn!(
                    "${} uses unsupported command kinds {:02X?}; omitted",
                    code.name,
                    code.unsupported_kinds()
                );
                for command in &code.commands {
                    if let GeckoCommand::AsmInsert { code: bytes, .. }
                    | GeckoCommand::AsmInsertXor { code: bytes, .. } = command
                    {
                        inserts.push(InsertMeta { address: 0, size: bytes.len() });
                    }
                }
            }
            CodeStatus::Disabled => {
                tracing::debug!("${} is disabled", code.name);
            }
            CodeStatus::Enabled => {
                for command in &code.commands {
                    if !command.is_insert() {
                        if !apply_direct(command, dol, space)? {
                            tracing::warn!(
                                "${}: write to an unmapped address skipped",
                                code.name
                            );
                        }
                        continue;
                    }
                    let (site, bytes) = match command {
                        GeckoCommand::AsmInsert { address, code } => (*address, code),
                        GeckoCommand::AsmInsertXor { address, code, .. } => (*address, code),
                        _ => unreachable!(),
                    };
                    let trampoline = injection + blob.len() as u32;
                    let entry = asm::assemble_branch(
                        space.address(site)?,
                        space.address(trampoline)?,
                        false,
                        false,
                    )?;
                    if !dol.write_u32(site, entry) {
                        tracing::warn!(
                            "${}: insert site {:#010x} is not mapped; skipped",
                            code.name,
                            site
                        );
                        continue;
                    }
                    // Drop the command's own trailing pad word and return to
                    // the instruction after the patch site.
                    blob.extend_from_slice(&bytes[..bytes.len().saturating_sub(4)]);
                    let back = asm::assemble_branch(
                        space.address(injection + blob.len() as u32)?,
                        space.address(site + 4)?,
                        false,
                        false,
                    )?;
                    blob.extend_from_slice(&back.to_be_bytes());
                    inserts.push(InsertMeta { address: trampoline, size: bytes.len() });
                }
            }
        }
        tracing::info!("{:8} ${}", status.to_string(), code.name);
        report.push(CodeMeta { name: code.name.clone(), status, inserts });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::GAMECUBE_ADDRESS_SPACE;
    use crate::dol::SectionKind;
    use crate::profile::Profile;

    fn parse(text: &str) -> GeckoCodeTable {
        let mut table = GeckoCodeTable::new();
        table.parse(text).unwrap();
        table
    }

    fn patchable_dol() -> Container {
        let mut dol = Container::empty(&Profile::gamecube());
        dol.append_section(SectionKind::Text, 0x8000_3000, vec![0; 0x1000]).unwrap();
        dol
    }

    #[test]
    fn dolphin_sections_gate_enablement() {
        let table = parse(
            "[Gecko]\n\
             $First Code\n\
             04003000 DEADBEEF\n\
             $Second Code\n\
             04003004 00000001\n\
             [Gecko_Enabled]\n\
             $First Code\n",
        );
        assert_eq!(table.codes().len(), 2);
        assert_eq!(table.codes()[0].status(), CodeStatus::Enabled);
        assert_eq!(table.codes()[1].status(), CodeStatus::Disabled);
    }

    #[test]
    fn headerless_text_enables_everything() {
        let table = parse("$Only Code\n04003000 00000000\n* a comment\n");
        assert_eq!(table.codes().len(), 1);
        assert!(table.codes()[0].enabled);
    }

    #[test]
    fn unsupported_kinds_mark_the_whole_code_omitted() {
        let table = parse("$Mixed\n04003000 00000000\n28003000 00FF0001\n");
        assert_eq!(table.codes()[0].status(), CodeStatus::Omitted);
        assert_eq!(table.codes()[0].unsupported_kinds(), vec![0x28]);
    }

    #[test]
    fn omitted_codes_write_nothing() {
        let table = parse("$Mixed\n04003000 DEADBEEF\n28003000 00FF0001\n");
        let mut dol = patchable_dol();
        let mut blob = Vec::new();
        let report =
            merge(&table, &mut dol, &mut blob, 0x8130_0000, GAMECUBE_ADDRESS_SPACE).unwrap();
        assert_eq!(report[0].status, CodeStatus::Omitted);
        assert_eq!(dol.read_u32(0x8000_3000), Some(0));
        assert!(blob.is_empty());
    }

    #[test]
    fn direct_writes_land_in_the_container() {
        let table = parse(
            "$Writes\n\
             04003000 DEADBEEF\n\
             02003008 0001ABCD\n\
             0000300C 000300AA\n",
        );
        let mut dol = patchable_dol();
        let mut blob = Vec::new();
        merge(&table, &mut dol, &mut blob, 0x8130_0000, GAMECUBE_ADDRESS_SPACE).unwrap();
        assert_eq!(dol.read_u32(0x8000_3000), Some(0xDEAD_BEEF));
        // halfword repeated twice
        assert_eq!(dol.read_u32(0x8000_3008), Some(0xABCD_ABCD));
        // byte repeated four times
        assert_eq!(dol.read_u32(0x8000_300C), Some(0xAAAA_AAAA));
    }

    #[test]
    fn string_write_decodes_its_length() {
        let table = parse("$Str\n06003000 00000005\n48454C4C 4F000000\n");
        match &table.codes()[0].commands[0] {
            GeckoCommand::WriteString { address, data } => {
                assert_eq!(*address, 0x8000_3000);
                assert_eq!(data, b"HELLO");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn serial_write_strides_address_and_value() {
        let table = parse("$Serial\n08003000 00000001 20030004 00000010\n");
        let mut dol = patchable_dol();
        let mut blob = Vec::new();
        merge(&table, &mut dol, &mut blob, 0x8130_0000, GAMECUBE_ADDRESS_SPACE).unwrap();
        assert_eq!(dol.read_u32(0x8000_3000), Some(0x1));
        assert_eq!(dol.read_u32(0x8000_3004), Some(0x11));
        assert_eq!(dol.read_u32(0x8000_3008), Some(0x21));
        assert_eq!(dol.read_u32(0x8000_300C), Some(0x31));
        assert_eq!(dol.read_u32(0x8000_3010), Some(0));
    }

    #[test]
    fn asm_insert_builds_a_trampoline() {
        // Two lines: one real instruction (nop) plus the pad word.
        let table = parse("$Insert\nC2003100 00000001\n60000000 00000000\n");
        let mut dol = patchable_dol();
        let mut blob = vec![0xAA; 8];
        let report =
            merge(&table, &mut dol, &mut blob, 0x8130_0000, GAMECUBE_ADDRESS_SPACE).unwrap();

        let trampoline = 0x8130_0008;
        assert_eq!(report[0].inserts[0].address, trampoline);
        // Site branches into the blob.
        let entry = dol.read_u32(0x8000_3100).unwrap();
        let delta = crate::asm::sign_extend(entry >> 2, 24) * 4;
        assert_eq!(0x8000_3100i64 + delta, trampoline as i64);
        // Blob holds the instruction and a branch back to site + 4.
        assert_eq!(&blob[8..12], &0x6000_0000u32.to_be_bytes());
        let back = u32::from_be_bytes(blob[12..16].try_into().unwrap());
        let delta = crate::asm::sign_extend(back >> 2, 24) * 4;
        assert_eq!(0x8130_000Ci64 + delta, 0x8000_3104);
    }

    #[test]
    fn truncated_commands_are_parse_errors() {
        let mut table = GeckoCodeTable::new();
        assert!(matches!(
            table.parse("$Bad\nC2003100 00000002\n60000000 00000000\n"),
            Err(PatchError::GeckoParse(_))
        ));
        assert!(matches!(
            table.parse("$Bad\n04003000\n"),
            Err(PatchError::GeckoParse(_))
        ));
    }
}
