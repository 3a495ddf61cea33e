//! Shared test utilities for initramfs-split tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const BLOCK: usize = 512;

/// Test environment with a scratch directory for images and trees.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            base,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    /// Create an empty directory under the environment and return its path.
    pub fn empty_dir(&self, name: &str) -> PathBuf {
        let dir = self.path(name);
        fs::create_dir_all(&dir).expect("Failed to create dir");
        dir
    }

    /// Write `bytes` to a file under the environment and return its path.
    pub fn write_image(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, bytes).expect("Failed to write image");
        path
    }
}

/// One entry for [`newc`]. Directories have mode `0o040755`.
pub struct Item<'a> {
    pub name: &'a str,
    pub mode: u32,
    pub data: &'a [u8],
}

pub fn dir(name: &str) -> Item<'_> {
    Item {
        name,
        mode: 0o040755,
        data: b"",
    }
}

pub fn file<'a>(name: &'a str, data: &'a [u8]) -> Item<'a> {
    Item {
        name,
        mode: 0o100644,
        data,
    }
}

/// Encode `items` as a newc archive ending in a trailer, without block padding.
pub fn newc(items: &[Item<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let mut writer = cpio::NewcBuilder::new(item.name)
            .ino(i as u32 + 1)
            .mode(item.mode)
            .nlink(if item.mode & 0o170000 == 0o040000 { 2 } else { 1 })
            .write(out, item.data.len() as u32);
        writer.write_all(item.data).expect("Failed to write entry");
        out = writer.finish().expect("Failed to finish entry");
    }
    cpio::newc::trailer(out).expect("Failed to write trailer")
}

/// Zero-pad `data` to the next block boundary.
pub fn pad(mut data: Vec<u8>) -> Vec<u8> {
    let len = data.len().div_ceil(BLOCK) * BLOCK;
    data.resize(len, 0);
    data
}

pub fn gzip(data: &[u8], level: u32) -> Vec<u8> {
    let mut encoder = flate2::GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), flate2::Compression::new(level));
    encoder.write_all(data).expect("Failed to gzip");
    encoder.finish().expect("Failed to finish gzip")
}

pub fn zstd(data: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(data, 3).expect("Failed to zstd")
}

/// Regular file contents of a tree, keyed by path relative to `root`.
pub fn tree_files(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.expect("Failed to walk tree"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("entry outside root")
                .to_string_lossy()
                .into_owned();
            let data = fs::read(entry.path()).expect("Failed to read file");
            (rel, data)
        })
        .collect()
}

/// Text of `segment{index}.meta` under `root`.
pub fn meta(root: &Path, index: usize) -> String {
    fs::read_to_string(root.join(format!("segment{index}.meta")))
        .expect("Failed to read descriptor")
}

/// Names of the `segment{N}` directories under `root`, sorted.
pub fn segment_dirs(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .expect("Failed to read dir")
        .map(|entry| entry.expect("Failed to read entry"))
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("segment"))
        .collect();
    names.sort();
    names
}
