//! Entry point for the stevedore patcher.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Load the input DOL and open a patch session for the GameCube profile.
//! 3. Feed it the patch inputs: pragma sources, the linked object, symbol
//!    overrides, Gecko tables.
//! 4. Run the session and persist the patched image (and optional map).
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs;
use std::fs::File;
use object::{Architecture as ObjArch, Object};

use stevedore::config::Config;
use stevedore::dol::Container;
use stevedore::profile::Profile;
use stevedore::session::PatchSession;

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let profile = Profile::gamecube();
    let image = fs::read(&config.input)
        .with_context(|| format!("failed to read {}", config.input.display()))?;
    let dol = Container::parse(&image, &profile)
        .with_context(|| format!("failed to parse {}", config.input.display()))?;

    let mut session = PatchSession::new(profile, dol, config.injection_address);

    for path in &config.sources {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        session.scan_source(&text, &path.to_string_lossy())?;
    }

    if let Some(path) = &config.object {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };

        // Architecture check
        let obj = object::File::parse(&*mmap).context("failed to parse object file")?;
        if obj.architecture() != ObjArch::PowerPc {
            anyhow::bail!(
                "Unsupported architecture in {}: {:?}. Only PowerPC is supported.",
                path.display(),
                obj.architecture()
            );
        }

        session.load_object(&mmap, &path.to_string_lossy())?;
    }

    for path in &config.symbol_files {
        session.load_override_file(path)?;
    }

    for path in &config.gecko_files {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        session.load_gecko(&text)?;
    }

    let report = session.run().context("patch session failed")?;

    for hook in &report.hooks {
        println!("{}", hook.line);
    }
    for code in &report.codes {
        println!("{:8} ${}", code.status.to_string(), code.name);
    }

    session.save(&config.output)?;
    println!("Patched successfully to {}", config.output.display());

    if let Some(path) = &config.map {
        let mut out = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        session.write_map(&mut out, &report.codes)?;
        println!("Symbol map written to {}", path.display());
    }

    Ok(())
}
