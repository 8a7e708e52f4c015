//! Configuration module.
//!
//! Defines the command-line interface for the patcher using `clap`: the
//! input/output container paths, the linked object, the patch inputs
//! (sources, overrides, Gecko tables) and the injection address.

use clap::Parser;
use std::path::PathBuf;

use crate::utils::parse_hex_u32;

fn hex_address(s: &str) -> Result<u32, String> {
    parse_hex_u32(s).ok_or_else(|| format!("{s:?} is not a hex address"))
}

/// A hook-resolution and binary-patch tool for GameCube DOL executables.
///
/// Splices externally compiled code and community Gecko codes into a linked
/// DOL image: symbols resolve against the linked object and manual override
/// files, hooks come from `#pragma` annotations in the patch sources, and
/// the injected code lands in a freshly appended section.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input DOL image
    pub input: PathBuf,

    /// Output DOL image
    #[arg(short, long, default_value = "patched.dol", help = "Path to the patched image")]
    pub output: PathBuf,

    /// Linked PowerPC ELF object holding the injected code and symbols
    #[arg(long)]
    pub object: Option<PathBuf>,

    /// Virtual address the injected section loads at (default: end of image)
    #[arg(long, value_parser = hex_address)]
    pub injection_address: Option<u32>,

    /// Patch source files to scan for #pragma hooks
    #[arg(long = "source", value_name = "FILE")]
    pub sources: Vec<PathBuf>,

    /// Symbol override files (the stem names the section: text.txt -> .text)
    #[arg(long = "symbols", value_name = "FILE")]
    pub symbol_files: Vec<PathBuf>,

    /// Gecko code-table text files
    #[arg(long = "gecko", value_name = "FILE")]
    pub gecko_files: Vec<PathBuf>,

    /// Write a Dolphin symbol map here
    #[arg(long)]
    pub map: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_addresses_parse_with_or_without_prefix() {
        assert_eq!(hex_address("0x81300000"), Ok(0x8130_0000));
        assert_eq!(hex_address("81300000"), Ok(0x8130_0000));
        assert!(hex_address("not-hex").is_err());
    }

    #[test]
    fn minimal_invocation_parses() {
        let config = Config::parse_from(["stevedore", "game.dol"]);
        assert_eq!(config.input, PathBuf::from("game.dol"));
        assert_eq!(config.output, PathBuf::from("patched.dol"));
        assert!(config.injection_address.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn full_invocation_parses() {
        let config = Config::parse_from([
            "stevedore",
            "game.dol",
            "-o",
            "out.dol",
            "--object",
            "mod.o",
            "--injection-address",
            "0x81300000",
            "--source",
            "hooks.c",
            "--symbols",
            "text.txt",
            "--gecko",
            "codes.txt",
            "--map",
            "game.map",
        ]);
        assert_eq!(config.injection_address, Some(0x8130_0000));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.symbol_files.len(), 1);
        assert_eq!(config.gecko_files.len(), 1);
        assert!(config.map.is_some());
    }
}
