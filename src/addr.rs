//! Target address model.
//!
//! Patch targets arrive as raw integers from pragmas, override files and
//! Gecko codes. An [`AddressSpace`] validates a raw integer against its
//! physical and virtual windows and turns it into an [`Address`], which can
//! then be viewed as either a physical (file-style) offset or a virtual
//! address. Subtracting two addresses yields the signed delta used for
//! branch-range checks.

use crate::error::{PatchError, Result};

/// One flat physical/virtual mapping for a target profile.
///
/// Invariant: both windows have the same size, so an offset is meaningful in
/// either view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpace {
    pub min_physical: u32,
    pub max_physical: u32,
    pub min_virtual: u32,
    pub max_virtual: u32,
}

/// The GameCube's 24 MiB main memory window.
pub const GAMECUBE_ADDRESS_SPACE: AddressSpace = AddressSpace {
    min_physical: 0x0000_0000,
    max_physical: 0x017F_FFFF,
    min_virtual: 0x8000_0000,
    max_virtual: 0x817F_FFFF,
};

impl AddressSpace {
    pub fn new(min_physical: u32, max_physical: u32, min_virtual: u32, max_virtual: u32) -> Self {
        debug_assert_eq!(max_virtual - min_virtual, max_physical - min_physical);
        Self { min_physical, max_physical, min_virtual, max_virtual }
    }

    /// Size of the mapped window in bytes.
    pub fn size(&self) -> u32 {
        self.max_virtual - self.min_virtual
    }

    /// Validate a raw integer as an address in this space.
    ///
    /// The integer may be given in either the physical or the virtual window
    /// (both endpoints inclusive); anything else is `OutOfBounds`.
    pub fn address(&self, raw: u32) -> Result<Address> {
        let offset = if raw >= self.min_physical && raw <= self.max_physical {
            raw - self.min_physical
        } else if raw >= self.min_virtual && raw <= self.max_virtual {
            raw - self.min_virtual
        } else {
            return Err(PatchError::OutOfBounds(raw as u64));
        };
        Ok(Address { space: *self, offset })
    }
}

/// A validated location inside one [`AddressSpace`]. Immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    space: AddressSpace,
    offset: u32,
}

impl Address {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn physical(&self) -> u32 {
        self.space.min_physical + self.offset
    }

    pub fn virtual_address(&self) -> u32 {
        self.space.min_virtual + self.offset
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.virtual_address())
    }
}

impl std::ops::Sub for Address {
    type Output = i64;

    fn sub(self, rhs: Address) -> i64 {
        self.virtual_address() as i64 - rhs.virtual_address() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_and_virtual_views_round_trip() {
        let space = GAMECUBE_ADDRESS_SPACE;
        for raw in [0x8000_0000u32, 0x8000_3000, 0x817F_FFFF] {
            let addr = space.address(raw).unwrap();
            assert_eq!(addr.virtual_address(), raw);
            let back = space.address(addr.physical()).unwrap();
            assert_eq!(back.virtual_address(), raw);
        }
        for raw in [0x0u32, 0x3000, 0x017F_FFFF] {
            let addr = space.address(raw).unwrap();
            assert_eq!(addr.physical(), raw);
            let back = space.address(addr.virtual_address()).unwrap();
            assert_eq!(back.physical(), raw);
        }
    }

    #[test]
    fn outside_both_windows_is_out_of_bounds() {
        let space = GAMECUBE_ADDRESS_SPACE;
        for raw in [0x0180_0000u32, 0x7FFF_FFFF, 0x8180_0000, 0xFFFF_FFFF] {
            assert!(matches!(space.address(raw), Err(PatchError::OutOfBounds(_))));
        }
    }

    #[test]
    fn subtraction_yields_signed_delta() {
        let space = GAMECUBE_ADDRESS_SPACE;
        let a = space.address(0x8000_3000).unwrap();
        let b = space.address(0x8000_3010).unwrap();
        assert_eq!(b - a, 16);
        assert_eq!(a - b, -16);
        assert_eq!(a - a, 0);
    }

    #[test]
    fn window_sizes_match() {
        let s = GAMECUBE_ADDRESS_SPACE;
        assert_eq!(s.max_virtual - s.min_virtual, s.max_physical - s.min_physical);
        assert_eq!(s.size(), 0x017F_FFFF);
    }
}
