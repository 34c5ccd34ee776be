use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use idzip::api::{dz_path, remove_source};
use idzip::{compress_file_with, decompress_file, WriterConfig, MAX_MEMBER_SIZE};

#[derive(Parser)]
#[command(name = "idzip")]
#[command(about = "Compress or decompress files as random-access gzip (.dz)")]
struct Cli {
    /// Decompress instead of compress
    #[arg(short, long)]
    decompress: bool,

    /// Keep input files after conversion
    #[arg(short, long)]
    keep: bool,

    /// Overwrite existing output files
    #[arg(short, long)]
    force: bool,

    /// Largest member written, in uncompressed bytes
    #[arg(long, default_value_t = MAX_MEMBER_SIZE)]
    sync_size: usize,

    /// Files to convert
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut failed = 0usize;
    for input in &cli.files {
        if let Err(err) = convert(&cli, input) {
            eprintln!("idzip: {}: {err:#}", input.display());
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} files failed", cli.files.len());
    }
    Ok(())
}

fn convert(cli: &Cli, input: &Path) -> Result<()> {
    let output = if cli.decompress {
        match input.extension() {
            Some(ext) if ext == "dz" => input.with_extension(""),
            _ => bail!("unknown suffix, expected .dz"),
        }
    } else {
        dz_path(input)
    };
    if output.exists() && !cli.force {
        bail!("{} already exists", output.display());
    }

    if cli.decompress {
        decompress_file(input, Some(&output)).context("decompress")?;
    } else {
        let config = WriterConfig {
            sync_size: cli.sync_size,
            ..WriterConfig::default()
        };
        let members = compress_file_with(input, &output, config).context("compress")?;
        info!("{} -> {} ({members} members)", input.display(), output.display());
    }

    if !cli.keep {
        remove_source(input).with_context(|| format!("remove {}", input.display()))?;
    }
    Ok(())
}
