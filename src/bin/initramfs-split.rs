use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Result};
use initramfs_split::error::is_validation_error;
use initramfs_split::{extract_image, rebuild_image, scan_image, Config, ValidationError};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

fn usage() -> &'static str {
    "Usage:\n  initramfs-split <image> <empty-dir>        split an image into segment directories\n  initramfs-split <extracted-dir> <output>   rebuild an image from segment directories\n  initramfs-split <image>                    list the segments of an image\n\nSet INITRAMFS_SPLIT_CONFIG to a TOML file to override defaults; RUST_LOG controls verbosity."
}

#[derive(Debug)]
struct UsageError;

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(usage())
    }
}

impl std::error::Error for UsageError {}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.downcast_ref::<UsageError>().is_some() => {
            eprintln!("{err}");
            ExitCode::from(EXIT_USAGE)
        }
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            if !is_validation_error(&err) {
                log::debug!("{err:?}");
            }
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: &[String]) -> Result<()> {
    let config = Config::load()?;

    match args {
        [source, output] if Path::new(source).is_dir() => {
            rebuild_image(Path::new(source), Path::new(output), &config)?;
            Ok(())
        }
        [image, dest] => {
            extract_image(Path::new(image), Path::new(dest), &config)?;
            Ok(())
        }
        [source] if Path::new(source).is_dir() => Err(ValidationError::MissingOutputPath.into()),
        [image] => list(Path::new(image), &config),
        _ => bail!(UsageError),
    }
}

fn list(image: &Path, config: &Config) -> Result<()> {
    let report = scan_image(image, config)?;
    for listing in &report.segments {
        let summary = &listing.summary;
        println!(
            "segment {}: offset {}, {} bytes, compression={} extra_args={}",
            summary.index,
            summary.offset,
            summary.byte_length,
            summary.descriptor.compression,
            summary.descriptor.codec_args
        );
        for entry in &listing.entries {
            println!("  {} {: >10} {}", entry.kind.tag(), entry.size, entry.name);
        }
    }
    println!("({})", report.end);
    Ok(())
}
