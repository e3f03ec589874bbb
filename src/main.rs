//! CLI for exporting a Whisper checkpoint pair as one graph bundle.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use whisper_export::export_pair;

#[derive(Parser)]
#[command(name = "whisper-export")]
#[command(about = "Convert an English/multilingual Whisper checkpoint pair into one graph bundle")]
struct Cli {
    /// Path to the English-only checkpoint.
    en_checkpoint: PathBuf,

    /// Path to the multilingual checkpoint. The archive is named after this
    /// file's stem.
    ml_checkpoint: PathBuf,
}

fn main() -> Result<()> {
    env_logger::builder().filter_level(LevelFilter::Info).init();
    let cli = Cli::parse();

    let archive = export_pair(&cli.en_checkpoint, &cli.ml_checkpoint, ".".as_ref())?;
    println!("{}", archive.display());
    Ok(())
}
