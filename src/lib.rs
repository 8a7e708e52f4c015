//! stevedore: a hook-resolution and binary-patch engine for GameCube DOL
//! executables.
//!
//! The engine splices externally compiled code into an already-linked,
//! fixed image without relinking it. A [`session::PatchSession`] ties the
//! pieces together: symbols come from the linked object and manual override
//! files, patch requests come from `#pragma` annotations and Gecko code
//! tables, and everything lands in an in-memory [`dol::Container`] that is
//! persisted only when the whole session succeeds.

pub mod addr;
pub mod arena;
pub mod asm;
pub mod config;
pub mod demangle;
pub mod dol;
pub mod error;
pub mod gecko;
pub mod hook;
pub mod map;
pub mod pragma;
pub mod profile;
pub mod session;
pub mod symbol;
pub mod utils;

pub use addr::{Address, AddressSpace, GAMECUBE_ADDRESS_SPACE};
pub use dol::{Container, SectionKind};
pub use error::{PatchError, Result};
pub use hook::{Hook, HookKind, HookSet, ImmModifier, StringEncoding};
pub use profile::Profile;
pub use session::{PatchSession, SessionReport};
