//! CPIO "newc" archives.
//!
//! [`decode`] walks one archive up to its `TRAILER!!!` entry and reports how
//! many payload bytes that took; the count is what marks where the next
//! segment of an image starts. Entries are handed to an [`EntrySink`], which
//! either materializes them on disk ([`DirectorySink`]) or just records them
//! ([`ListingSink`]).
//!
//! [`encode`] is the reverse: it turns a directory tree into a newc archive
//! the kernel will accept as an initramfs segment.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use nix::errno::Errno;
use nix::sys::stat::{major, makedev, minor, mknod, Mode, SFlag};
use walkdir::WalkDir;

use super::counting::CountingReader;
use crate::config::{Config, Ownership};

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;
const PERMISSION_BITS: u32 = 0o7777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown(u32),
}

impl EntryKind {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => Self::Directory,
            S_IFREG => Self::File,
            S_IFLNK => Self::Symlink,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            other => Self::Unknown(other),
        }
    }

    /// Single-letter tag in the style of `ls -l`.
    pub fn tag(self) -> char {
        match self {
            Self::Directory => 'd',
            Self::File => '-',
            Self::Symlink => 'l',
            Self::CharDevice => 'c',
            Self::BlockDevice => 'b',
            Self::Fifo => 'p',
            Self::Socket => 's',
            Self::Unknown(_) => '?',
        }
    }
}

/// A decoded archive member with its name made relative and safe to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub ino: u32,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    pub size: u32,
}

impl ArchiveEntry {
    fn from_newc(name: String, entry: &cpio::newc::Entry) -> Self {
        Self {
            name,
            kind: EntryKind::from_mode(entry.mode()),
            mode: entry.mode(),
            uid: entry.uid(),
            gid: entry.gid(),
            nlink: entry.nlink(),
            mtime: entry.mtime(),
            ino: entry.ino(),
            dev_major: entry.dev_major(),
            dev_minor: entry.dev_minor(),
            rdev_major: entry.rdev_major(),
            rdev_minor: entry.rdev_minor(),
            size: entry.file_size(),
        }
    }
}

/// Outcome of reading one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The trailer was reached after `consumed` payload bytes.
    Complete { consumed: u64, entries: usize },
    /// Bad magic, truncation or an unusable name. Carries a description.
    Malformed(String),
}

/// Receives archive members as [`decode`] reads them.
pub trait EntrySink {
    fn entry(&mut self, entry: &ArchiveEntry, data: &[u8]) -> Result<()>;

    /// Called once after the trailer; not called for malformed archives.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Read one newc archive from `payload`, feeding every member to `sink`.
///
/// Problems with the archive itself come back as [`Decoded::Malformed`].
/// Errors raised by the sink (disk full, permission denied) are returned as
/// `Err` and are fatal to the caller.
pub fn decode<R: Read, S: EntrySink>(payload: R, sink: &mut S) -> Result<Decoded> {
    let mut input = CountingReader::new(payload);
    let mut entries = 0usize;

    loop {
        let mut reader = match cpio::NewcReader::new(&mut input) {
            Ok(reader) => reader,
            Err(err) => {
                return Ok(Decoded::Malformed(format!(
                    "header of entry {}: {err}",
                    entries + 1
                )))
            }
        };
        if reader.entry().is_trailer() {
            break;
        }

        let raw_name = reader.entry().name().to_string();
        let name = match normalize_name(&raw_name) {
            Ok(name) => name,
            Err(reason) => return Ok(Decoded::Malformed(reason)),
        };
        let entry = name.map(|name| ArchiveEntry::from_newc(name, reader.entry()));

        let expected = reader.entry().file_size() as usize;
        let mut data = Vec::with_capacity(expected);
        if let Err(err) = reader.read_to_end(&mut data) {
            return Ok(Decoded::Malformed(format!("data of '{raw_name}': {err}")));
        }
        if data.len() != expected {
            return Ok(Decoded::Malformed(format!(
                "data of '{raw_name}' truncated: {} of {expected} bytes",
                data.len()
            )));
        }
        if let Err(err) = reader.finish() {
            return Ok(Decoded::Malformed(format!("padding after '{raw_name}': {err}")));
        }

        entries += 1;
        if let Some(entry) = entry {
            log::debug!("{} {} ({} bytes)", entry.kind.tag(), entry.name, entry.size);
            sink.entry(&entry, &data)?;
        }
    }

    sink.finish()?;
    Ok(Decoded::Complete {
        consumed: input.count(),
        entries,
    })
}

/// Strip `./` and `/` prefixes; `None` for the archive root itself.
fn normalize_name(raw: &str) -> std::result::Result<Option<String>, String> {
    let mut parts = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(format!("entry '{raw}' escapes the archive root")),
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

/// Writes archive members into a fresh directory.
pub struct DirectorySink<'a> {
    dest: PathBuf,
    config: &'a Config,
    created: bool,
    /// First path seen for each hard-link group, keyed by (ino, dev).
    links: HashMap<(u32, u32, u32), PathBuf>,
    file_modes: Vec<(PathBuf, u32)>,
    dir_modes: Vec<(PathBuf, u32)>,
}

impl<'a> DirectorySink<'a> {
    /// `dest` must not exist yet; it is created with the first member.
    pub fn new(dest: &Path, config: &'a Config) -> Result<Self> {
        if fs::symlink_metadata(dest).is_ok() {
            bail!("segment directory '{}' already exists", dest.display());
        }
        Ok(Self {
            dest: dest.to_path_buf(),
            config,
            created: false,
            links: HashMap::new(),
            file_modes: Vec::new(),
            dir_modes: Vec::new(),
        })
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Remove whatever this sink wrote so far.
    pub fn discard(self) -> Result<()> {
        if self.created {
            fs::remove_dir_all(&self.dest).with_context(|| {
                format!("removing partial segment '{}'", self.dest.display())
            })?;
        }
        Ok(())
    }

    fn ensure_root(&mut self) -> Result<()> {
        if !self.created {
            fs::create_dir(&self.dest)
                .with_context(|| format!("creating '{}'", self.dest.display()))?;
            self.created = true;
        }
        Ok(())
    }

    /// Refuse to write through a symlink planted by an earlier member.
    fn check_parents(&self, name: &str) -> Result<()> {
        let mut cursor = self.dest.clone();
        let rel = Path::new(name);
        let Some(parent) = rel.parent() else {
            return Ok(());
        };
        for component in parent.components() {
            cursor.push(component);
            if let Ok(meta) = fs::symlink_metadata(&cursor) {
                if meta.file_type().is_symlink() {
                    bail!(
                        "entry '{}' would be written through symlink '{}'",
                        name,
                        cursor.display()
                    );
                }
            }
        }
        Ok(())
    }

    fn write_file(&mut self, entry: &ArchiveEntry, path: &Path, data: &[u8]) -> Result<()> {
        if entry.nlink > 1 {
            let key = (entry.ino, entry.dev_major, entry.dev_minor);
            match self.links.get(&key) {
                Some(first) if first != path => {
                    remove_existing(path)?;
                    fs::hard_link(first, path).with_context(|| {
                        format!("linking '{}' -> '{}'", path.display(), first.display())
                    })?;
                    // newc may put the shared data on any member of the group.
                    if !data.is_empty() {
                        fs::write(path, data)
                            .with_context(|| format!("writing '{}'", path.display()))?;
                    }
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    self.links.insert(key, path.to_path_buf());
                }
            }
        }

        remove_existing(path)?;
        fs::write(path, data).with_context(|| format!("writing '{}'", path.display()))?;
        self.file_modes.push((path.to_path_buf(), entry.mode));
        Ok(())
    }

    fn make_node(&mut self, entry: &ArchiveEntry, path: &Path) -> Result<()> {
        if !self.config.device_nodes {
            log::debug!("skipping special file {}", entry.name);
            return Ok(());
        }
        let kind = match entry.kind {
            EntryKind::CharDevice => SFlag::S_IFCHR,
            EntryKind::BlockDevice => SFlag::S_IFBLK,
            _ => SFlag::S_IFIFO,
        };
        remove_existing(path)?;

        let perm = Mode::from_bits_truncate((entry.mode & PERMISSION_BITS) as _);
        let dev = make_dev(entry.rdev_major, entry.rdev_minor);
        match mknod(path, kind, perm, dev) {
            Ok(()) => Ok(()),
            Err(Errno::EPERM | Errno::EACCES) => {
                log::warn!(
                    "cannot create {} {} ({}:{}) without privileges; skipped",
                    entry.kind.tag(),
                    entry.name,
                    entry.rdev_major,
                    entry.rdev_minor
                );
                Ok(())
            }
            Err(errno) => Err(io::Error::from(errno))
                .with_context(|| format!("creating node '{}'", path.display())),
        }
    }
}

impl EntrySink for DirectorySink<'_> {
    fn entry(&mut self, entry: &ArchiveEntry, data: &[u8]) -> Result<()> {
        self.ensure_root()?;
        self.check_parents(&entry.name)?;

        let path = self.dest.join(&entry.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating '{}'", parent.display()))?;
        }

        match entry.kind {
            EntryKind::Directory => {
                let is_dir = fs::symlink_metadata(&path)
                    .map(|meta| meta.is_dir())
                    .unwrap_or(false);
                if !is_dir {
                    remove_existing(&path)?;
                    fs::create_dir(&path)
                        .with_context(|| format!("creating '{}'", path.display()))?;
                }
                self.dir_modes.push((path, entry.mode));
            }
            EntryKind::File => self.write_file(entry, &path, data)?,
            EntryKind::Symlink => {
                remove_existing(&path)?;
                std::os::unix::fs::symlink(OsStr::from_bytes(data), &path)
                    .with_context(|| format!("creating symlink '{}'", path.display()))?;
            }
            EntryKind::CharDevice | EntryKind::BlockDevice | EntryKind::Fifo => {
                self.make_node(entry, &path)?
            }
            EntryKind::Socket | EntryKind::Unknown(_) => {
                log::warn!("skipping unsupported entry {} (mode {:o})", entry.name, entry.mode);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.ensure_root()?;
        for (path, mode) in self.file_modes.drain(..) {
            set_mode(&path, mode)?;
        }
        // Deepest first, so a read-only parent never blocks its children.
        self.dir_modes
            .sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (path, mode) in self.dir_modes.drain(..) {
            set_mode(&path, mode)?;
        }
        Ok(())
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode & PERMISSION_BITS))
        .with_context(|| format!("setting mode {:o} on '{}'", mode, path.display()))
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)
            .with_context(|| format!("replacing directory '{}'", path.display())),
        Ok(_) => {
            fs::remove_file(path).with_context(|| format!("replacing '{}'", path.display()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("inspecting '{}'", path.display())),
    }
}

/// One line of an archive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u32,
}

/// Collects member names without touching the filesystem.
#[derive(Debug, Default)]
pub struct ListingSink {
    pub entries: Vec<ListedEntry>,
}

impl EntrySink for ListingSink {
    fn entry(&mut self, entry: &ArchiveEntry, _data: &[u8]) -> Result<()> {
        self.entries.push(ListedEntry {
            name: entry.name.clone(),
            kind: entry.kind,
            size: entry.size,
        });
        Ok(())
    }
}

/// Result of [`encode`].
#[derive(Debug)]
pub struct Encoded<W> {
    pub writer: W,
    pub entries: usize,
}

struct TreeItem {
    path: PathBuf,
    name: String,
    meta: fs::Metadata,
}

#[derive(Debug, Clone, Copy)]
struct InodeSlot {
    ino: u32,
    nlink: u32,
    carries_data: bool,
}

/// Encode every entry below `root` as a newc archive, trailer included.
///
/// Entries are emitted depth-first with siblings sorted by name, so the
/// same tree always yields the same archive.
pub fn encode<W: Write>(root: &Path, out: W, ownership: Ownership) -> Result<Encoded<W>> {
    let items = collect_tree(root)?;
    let slots = plan_inodes(&items);

    let mut out = out;
    for (item, slot) in items.iter().zip(&slots) {
        out = write_entry(item, *slot, ownership, out)
            .with_context(|| format!("encoding '{}'", item.path.display()))?;
    }
    let out = cpio::newc::trailer(out).context("writing cpio trailer")?;

    Ok(Encoded {
        writer: out,
        entries: items.len(),
    })
}

fn collect_tree(root: &Path) -> Result<Vec<TreeItem>> {
    let mut items = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        let rel = entry.path().strip_prefix(root)?;
        let name = rel
            .to_str()
            .ok_or_else(|| anyhow!("path '{}' is not valid UTF-8", entry.path().display()))?
            .to_string();
        let meta = entry
            .metadata()
            .with_context(|| format!("reading metadata of '{}'", entry.path().display()))?;
        items.push(TreeItem {
            path: entry.path().to_path_buf(),
            name,
            meta,
        });
    }
    Ok(items)
}

/// Number entries sequentially; hard-linked files share one number and
/// only the last member of each group carries the data.
fn plan_inodes(items: &[TreeItem]) -> Vec<InodeSlot> {
    let mut slots: Vec<InodeSlot> = items
        .iter()
        .enumerate()
        .map(|(i, item)| InodeSlot {
            ino: i as u32 + 1,
            nlink: if item.meta.is_dir() { 2 } else { 1 },
            carries_data: true,
        })
        .collect();

    let mut groups: HashMap<(u64, u64), Vec<usize>> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        if item.meta.is_file() && item.meta.nlink() > 1 {
            groups
                .entry((item.meta.dev(), item.meta.ino()))
                .or_default()
                .push(i);
        }
    }
    for members in groups.values().filter(|members| members.len() > 1) {
        let ino = slots[members[0]].ino;
        let last = members[members.len() - 1];
        for &member in members {
            slots[member] = InodeSlot {
                ino,
                nlink: members.len() as u32,
                carries_data: member == last,
            };
        }
    }
    slots
}

fn write_entry<W: Write>(
    item: &TreeItem,
    slot: InodeSlot,
    ownership: Ownership,
    out: W,
) -> Result<W> {
    let meta = &item.meta;
    let (uid, gid) = match ownership {
        Ownership::Preserve => (meta.uid(), meta.gid()),
        Ownership::Root => (0, 0),
    };
    let mtime = u32::try_from(meta.mtime().max(0)).unwrap_or(u32::MAX);
    let mut builder = cpio::NewcBuilder::new(&item.name)
        .ino(slot.ino)
        .mode(meta.mode())
        .uid(uid)
        .gid(gid)
        .nlink(slot.nlink)
        .mtime(mtime);

    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let target = fs::read_link(&item.path)?;
        let bytes = target.as_os_str().as_bytes();
        let mut writer = builder.write(out, data_len(bytes.len() as u64)?);
        writer.write_all(bytes)?;
        return Ok(writer.finish()?);
    }

    if file_type.is_file() {
        if !slot.carries_data {
            return Ok(builder.write(out, 0).finish()?);
        }
        let size = data_len(meta.len())?;
        let file = File::open(&item.path)?;
        let mut writer = builder.write(out, size);
        io::copy(&mut file.take(u64::from(size)), &mut writer)?;
        return Ok(writer.finish()?);
    }

    if file_type.is_char_device() || file_type.is_block_device() {
        let (major, minor) = split_dev(meta.rdev());
        builder = builder.rdev_major(major).rdev_minor(minor);
    }
    Ok(builder.write(out, 0).finish()?)
}

fn data_len(len: u64) -> Result<u32> {
    u32::try_from(len).map_err(|_| anyhow!("{len} bytes exceeds the 4 GiB newc entry limit"))
}

fn split_dev(dev: u64) -> (u32, u32) {
    let dev = dev as nix::libc::dev_t;
    (major(dev) as u32, minor(dev) as u32)
}

fn make_dev(major: u32, minor: u32) -> nix::libc::dev_t {
    makedev(u64::from(major), u64::from(minor))
}
