//! DOL container model.
//!
//! A DOL is the GameCube's executable image: a 0x100-byte header listing up
//! to 7 text and 11 data sections (file offset, load address, size), an
//! entry point and a bss descriptor, followed by the raw section bytes. The
//! in-memory [`Container`] supports bounds-checked reads and writes at
//! virtual addresses, appending new sections within the format's slot
//! limits, and bit-exact serialization: the output is byte-identical to the
//! input except for patched sites and appended sections.

use crate::error::{PatchError, Result};
use crate::profile::Profile;
use crate::utils::align_up;

pub const HEADER_SIZE: u32 = 0x100;

// Header table offsets; text slots come first, then data slots.
const FORMAT_TEXT_SLOTS: usize = 7;
const FORMAT_DATA_SLOTS: usize = 11;
const OFFSET_TABLE: usize = 0x00;
const ADDRESS_TABLE: usize = 0x48;
const SIZE_TABLE: usize = 0x90;
const BSS_ADDRESS: usize = 0xD8;
const BSS_SIZE: usize = 0xDC;
const ENTRY_POINT: usize = 0xE0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    Data,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub kind: SectionKind,
    pub address: u32,
    pub file_offset: u32,
    pub data: Vec<u8>,
}

impl Section {
    fn end_address(&self) -> u32 {
        self.address + self.data.len() as u32
    }

    fn end_offset(&self) -> u32 {
        self.file_offset + self.data.len() as u32
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    sections: Vec<Section>,
    pub bss_address: u32,
    pub bss_size: u32,
    pub entry_point: u32,
    max_text: usize,
    max_data: usize,
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let slice = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| PatchError::ContainerParse(format!("header truncated at {offset:#x}")))?;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

impl Container {
    /// Parse a DOL image. The profile supplies the section maxima used for
    /// later appends; it may not exceed the format's slot counts.
    pub fn parse(bytes: &[u8], profile: &Profile) -> Result<Self> {
        assert!(profile.max_text_sections <= FORMAT_TEXT_SLOTS);
        assert!(profile.max_data_sections <= FORMAT_DATA_SLOTS);
        if bytes.len() < HEADER_SIZE as usize {
            return Err(PatchError::ContainerParse("image smaller than the header".to_string()));
        }

        let mut sections = Vec::new();
        for slot in 0..FORMAT_TEXT_SLOTS + FORMAT_DATA_SLOTS {
            let offset = read_u32(bytes, OFFSET_TABLE + slot * 4)?;
            let address = read_u32(bytes, ADDRESS_TABLE + slot * 4)?;
            let size = read_u32(bytes, SIZE_TABLE + slot * 4)?;
            if size == 0 || offset == 0 {
                continue;
            }
            let data = bytes
                .get(offset as usize..(offset + size) as usize)
                .ok_or_else(|| {
                    PatchError::ContainerParse(format!(
                        "section at file offset {offset:#x} (size {size:#x}) exceeds the image"
                    ))
                })?
                .to_vec();
            let kind = if slot < FORMAT_TEXT_SLOTS { SectionKind::Text } else { SectionKind::Data };
            sections.push(Section { kind, address, file_offset: offset, data });
        }

        Ok(Container {
            sections,
            bss_address: read_u32(bytes, BSS_ADDRESS)?,
            bss_size: read_u32(bytes, BSS_SIZE)?,
            entry_point: read_u32(bytes, ENTRY_POINT)?,
            max_text: profile.max_text_sections,
            max_data: profile.max_data_sections,
        })
    }

    /// An empty container for the given profile limits.
    pub fn empty(profile: &Profile) -> Self {
        Container {
            sections: Vec::new(),
            bss_address: 0,
            bss_size: 0,
            entry_point: 0,
            max_text: profile.max_text_sections,
            max_data: profile.max_data_sections,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_count(&self, kind: SectionKind) -> usize {
        self.sections.iter().filter(|s| s.kind == kind).count()
    }

    /// Highest mapped virtual address, exclusive (end of read-only image).
    pub fn rom_end(&self) -> u32 {
        self.sections.iter().map(Section::end_address).max().unwrap_or(0)
    }

    pub fn is_mapped(&self, virtual_address: u32) -> bool {
        self.find_section(virtual_address).is_some()
    }

    fn find_section(&self, virtual_address: u32) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| virtual_address >= s.address && virtual_address < s.end_address())
    }

    pub fn read_bytes(&self, virtual_address: u32, len: usize) -> Option<&[u8]> {
        let section = &self.sections[self.find_section(virtual_address)?];
        let start = (virtual_address - section.address) as usize;
        section.data.get(start..start + len)
    }

    pub fn read_u32(&self, virtual_address: u32) -> Option<u32> {
        let bytes = self.read_bytes(virtual_address, 4)?;
        Some(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// The NUL-terminated string at `virtual_address`, terminator included.
    pub fn read_c_string(&self, virtual_address: u32) -> Option<&[u8]> {
        let section = &self.sections[self.find_section(virtual_address)?];
        let start = (virtual_address - section.address) as usize;
        let tail = &section.data[start..];
        let nul = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..=nul])
    }

    /// Write raw bytes at a virtual address. Returns false when the target
    /// is unmapped or the write would cross the section's end.
    pub fn write_bytes(&mut self, virtual_address: u32, bytes: &[u8]) -> bool {
        let Some(index) = self.find_section(virtual_address) else {
            return false;
        };
        let section = &mut self.sections[index];
        let start = (virtual_address - section.address) as usize;
        let Some(slot) = section.data.get_mut(start..start + bytes.len()) else {
            return false;
        };
        slot.copy_from_slice(bytes);
        true
    }

    pub fn write_u32(&mut self, virtual_address: u32, value: u32) -> bool {
        self.write_bytes(virtual_address, &value.to_be_bytes())
    }

    pub fn write_u16(&mut self, virtual_address: u32, value: u16) -> bool {
        self.write_bytes(virtual_address, &value.to_be_bytes())
    }

    /// Whether at least one section slot of either kind remains.
    pub fn can_append(&self) -> bool {
        self.section_count(SectionKind::Text) < self.max_text
            || self.section_count(SectionKind::Data) < self.max_data
    }

    /// Append a section of a specific kind; fails `ContainerFull` exactly
    /// when that kind's count has reached the profile maximum.
    pub fn append_section(&mut self, kind: SectionKind, address: u32, data: Vec<u8>) -> Result<()> {
        let (count, max) = match kind {
            SectionKind::Text => (self.section_count(SectionKind::Text), self.max_text),
            SectionKind::Data => (self.section_count(SectionKind::Data), self.max_data),
        };
        if count >= max {
            return Err(PatchError::ContainerFull);
        }
        let end = self.sections.iter().map(Section::end_offset).max().unwrap_or(HEADER_SIZE);
        let file_offset = align_up(end.max(HEADER_SIZE), 32);
        self.sections.push(Section { kind, address, file_offset, data });
        Ok(())
    }

    /// Append injected bytes wherever a slot is free: text slots first,
    /// falling back to data slots once text is exhausted.
    pub fn append_auto(&mut self, address: u32, data: Vec<u8>) -> Result<SectionKind> {
        if self.section_count(SectionKind::Text) < self.max_text {
            self.append_section(SectionKind::Text, address, data)?;
            Ok(SectionKind::Text)
        } else if self.section_count(SectionKind::Data) < self.max_data {
            self.append_section(SectionKind::Data, address, data)?;
            Ok(SectionKind::Data)
        } else {
            Err(PatchError::ContainerFull)
        }
    }

    /// Serialize back to DOL bytes. Existing sections keep their original
    /// file offsets; appended sections were placed past the previous end of
    /// file, so untouched bytes reproduce the input image exactly.
    pub fn to_bytes(&self) -> Vec<u8> {
        let total = self
            .sections
            .iter()
            .map(Section::end_offset)
            .max()
            .unwrap_or(HEADER_SIZE)
            .max(HEADER_SIZE);
        let mut out = vec![0u8; total as usize];

        let mut put = |offset: usize, value: u32| {
            out[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
        };
        let mut text_slot = 0usize;
        let mut data_slot = 0usize;
        for section in &self.sections {
            let slot = match section.kind {
                SectionKind::Text => {
                    let s = text_slot;
                    text_slot += 1;
                    s
                }
                SectionKind::Data => {
                    let s = FORMAT_TEXT_SLOTS + data_slot;
                    data_slot += 1;
                    s
                }
            };
            put(OFFSET_TABLE + slot * 4, section.file_offset);
            put(ADDRESS_TABLE + slot * 4, section.address);
            put(SIZE_TABLE + slot * 4, section.data.len() as u32);
        }
        put(BSS_ADDRESS, self.bss_address);
        put(BSS_SIZE, self.bss_size);
        put(ENTRY_POINT, self.entry_point);

        for section in &self.sections {
            let start = section.file_offset as usize;
            out[start..start + section.data.len()].copy_from_slice(&section.data);
        }
        out
    }
}
