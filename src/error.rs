//! Crate error type.
//!
//! Patch failures fall into a small closed set of kinds. The two aggregate
//! variants (`UnresolvedSymbols`, `DuplicateHookTargets`) carry every
//! offender, not just the first, so a failed session reports the whole
//! problem in one pass.

/// Errors produced while resolving and applying patches.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("address {0:#010x} lies outside both the physical and virtual windows")]
    OutOfBounds(u64),

    #[error("container is full: no text or data section slots remain")]
    ContainerFull,

    /// Session-fatal: every hook whose symbol could not be resolved.
    #[error("could not resolve hook symbols:\n{}", .0.join("\n"))]
    UnresolvedSymbols(Vec<String>),

    #[error("value {value:#x} does not fit a {bits}-bit {} field", if *.signed { "signed" } else { "unsigned" })]
    FieldOverflow { value: i64, bits: u32, signed: bool },

    /// Hooks at one target address that disagree on the symbol they install.
    #[error("conflicting hooks share a target address:\n{}", .0.join("\n"))]
    DuplicateHookTargets(Vec<String>),

    #[error("branch delta {0:#x} is not a multiple of 4")]
    MisalignedBranch(i64),

    #[error("string {0:?} cannot be encoded for the target")]
    StringEncode(String),

    #[error("malformed gecko code text: {0}")]
    GeckoParse(String),

    #[error("malformed symbol override line: {0}")]
    OverrideParse(String),

    #[error("malformed pragma: {0}")]
    PragmaParse(String),

    #[error("malformed container: {0}")]
    ContainerParse(String),

    #[error("object file error: {0}")]
    Object(#[from] object::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PatchError>;
