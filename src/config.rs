//! Tool configuration.
//!
//! Defaults cover the common case. A TOML file named by the
//! `INITRAMFS_SPLIT_CONFIG` environment variable overrides any subset of the
//! fields:
//!
//! ```toml
//! block_size = 512
//! gzip_level = 9
//! ownership = "root"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ValidationError;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "INITRAMFS_SPLIT_CONFIG";

/// Boundary unit used by `cpio -o` when it pads archives.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Owner recorded for entries when a segment directory is re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    /// Copy uid/gid from the files on disk.
    #[default]
    Preserve,
    /// Record every entry as owned by 0:0.
    Root,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Segment boundaries are rounded up to this many bytes.
    pub block_size: usize,
    /// Gzip level used when a descriptor carries no level flag.
    pub gzip_level: u32,
    /// Zstd level used when a descriptor carries no level flag.
    pub zstd_level: i32,
    pub ownership: Ownership,
    /// Create device nodes and fifos on extraction (needs CAP_MKNOD for devices).
    pub device_nodes: bool,
    /// Where decompressed segments are staged. `None` means the system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            gzip_level: 6,
            zstd_level: 3,
            ownership: Ownership::Preserve,
            device_nodes: true,
            scratch_dir: None,
        }
    }
}

impl Config {
    /// Load the config named by [`CONFIG_ENV`], or defaults when it is unset.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config '{}'", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size < 4 || !self.block_size.is_power_of_two() {
            return Err(ValidationError::InvalidConfig(format!(
                "block_size must be a power of two >= 4, got {}",
                self.block_size
            ))
            .into());
        }
        if !(1..=9).contains(&self.gzip_level) {
            return Err(ValidationError::InvalidConfig(format!(
                "gzip_level must be 1-9, got {}",
                self.gzip_level
            ))
            .into());
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(ValidationError::InvalidConfig(format!(
                "zstd_level must be 1-22, got {}",
                self.zstd_level
            ))
            .into());
        }
        Ok(())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
