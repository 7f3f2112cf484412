use anyhow::{Context, Result};
use clap::Parser;
use zsalvage::cli::{Cli, Method};
use zsalvage::recovery::Recovery;
use zsalvage::writer::FileWriter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level.to_filter())
        .with_target(false)
        .init();

    let writer = FileWriter::new(&cli.destination).with_context(|| {
        format!(
            "preparing destination directory {}",
            cli.destination.display()
        )
    })?;

    let mut recovery = Recovery::new(&cli.disk, writer)?;

    if cli.cache_enabled() {
        recovery.build_cache();
    }

    if matches!(cli.method, Method::Uber | Method::All) {
        recovery.find_uber();
        recovery.write_uber()?;
    }

    if matches!(cli.method, Method::Brute | Method::All) {
        recovery.find_brute();
        recovery.write_brute()?;
    }

    Ok(())
}
