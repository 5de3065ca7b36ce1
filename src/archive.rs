//! Deterministic cpio newc archive assembly and compression.
//!
//! Items are collected into a list kept sorted by archive name, then
//! streamed out in that order through the configured compressor. Given the
//! same host filesystem state, the output bytes are identical run to run:
//! mtimes stay zero and codecs carry no timestamps.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cpio::newc::{self, ModeFileType};
use flate2::write::GzEncoder;
use tracing::warn;

use crate::filelist::FileList;
use crate::osutil;

/// Outer compression applied to the whole cpio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressFormat {
    Gzip,
    Lzma,
    Lz4,
    Zstd,
    None,
}

impl CompressFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressFormat::Gzip => "gzip",
            CompressFormat::Lzma => "lzma",
            CompressFormat::Lz4 => "lz4",
            CompressFormat::Zstd => "zstd",
            CompressFormat::None => "none",
        }
    }
}

/// Compression effort, mapped per format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressLevel {
    Default,
    Fast,
    Best,
}

impl CompressLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressLevel::Default => "default",
            CompressLevel::Fast => "fast",
            CompressLevel::Best => "best",
        }
    }
}

/// Parse `format[:level]`. An unknown format falls back to gzip, an
/// unknown or missing level to the default; lzma takes no level. Always
/// returns something usable.
pub fn extract_format_level(s: &str) -> (CompressFormat, CompressLevel) {
    let (f, l) = match s.split_once(':') {
        Some((f, l)) => (f, l),
        None => (s, "default"),
    };

    let mut level = match l.to_lowercase().as_str() {
        "default" => CompressLevel::Default,
        "fast" => CompressLevel::Fast,
        "best" => CompressLevel::Best,
        _ => {
            warn!("Unknown or no compression level set, using default");
            CompressLevel::Default
        }
    };

    let format = match f.to_lowercase().as_str() {
        "gzip" => CompressFormat::Gzip,
        "lzma" => {
            warn!("Format lzma doesn't support a compression level, using default settings");
            level = CompressLevel::Default;
            CompressFormat::Lzma
        }
        "lz4" => CompressFormat::Lz4,
        "zstd" => CompressFormat::Zstd,
        "none" => CompressFormat::None,
        _ => {
            warn!("Unknown or no compression format set, using gzip");
            CompressFormat::Gzip
        }
    };

    (format, level)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemKind {
    File { size: u64, mode: u32 },
    Dir,
    Symlink { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ArchiveItem {
    source: PathBuf,
    /// Archive-relative name, no leading slash.
    name: String,
    kind: ItemKind,
}

/// Archive items kept sorted ascending by name. Duplicate names are
/// dropped at insertion, so the first writer of a name wins.
#[derive(Debug, Default)]
struct ArchiveItems {
    items: Vec<ArchiveItem>,
}

impl ArchiveItems {
    fn add(&mut self, item: ArchiveItem) {
        match self
            .items
            .binary_search_by(|probe| probe.name.as_str().cmp(&item.name))
        {
            Ok(_) => {} // already in list
            Err(idx) => self.items.insert(idx, item),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.items
            .binary_search_by(|probe| probe.name.as_str().cmp(name))
            .is_ok()
    }

    fn iter(&self) -> std::slice::Iter<'_, ArchiveItem> {
        self.items.iter()
    }
}

/// Builds one initramfs archive: a sorted set of items streamed out as
/// cpio newc through the configured compressor.
pub struct Archive {
    items: ArchiveItems,
    format: CompressFormat,
    level: CompressLevel,
    merged_usr: bool,
}

impl Archive {
    pub fn new(format: CompressFormat, level: CompressLevel) -> Self {
        Self::with_merged_usr(format, level, osutil::has_merged_usr())
    }

    /// Like [`Archive::new`], but with the merged-/usr layout decision
    /// supplied by the caller instead of probed from the running system.
    pub fn with_merged_usr(
        format: CompressFormat,
        level: CompressLevel,
        merged_usr: bool,
    ) -> Self {
        Self {
            items: ArchiveItems::default(),
            format,
            level,
            merged_usr,
        }
    }

    /// Add every entry of the file list.
    pub fn add_items(&mut self, list: &FileList) -> Result<()> {
        for entry in list.entries() {
            self.add_item(&entry.source, &entry.dest)?;
        }
        Ok(())
    }

    /// Like [`Archive::add_items`], skipping entries whose exact
    /// `(source, dest)` pair appears in `exclude`.
    pub fn add_items_exclude(&mut self, list: &FileList, exclude: &FileList) -> Result<()> {
        for entry in list.entries() {
            if exclude.get(&entry.source).as_deref() == Some(entry.dest.as_path()) {
                continue;
            }
            self.add_item(&entry.source, &entry.dest)?;
        }
        Ok(())
    }

    /// Add the file or directory at `source` to the archive at `dest`.
    pub fn add_item(&mut self, source: &Path, dest: &Path) -> Result<()> {
        let (source, dest) = if self.merged_usr {
            (osutil::merge_usr(source), osutil::merge_usr(dest))
        } else {
            (source.to_path_buf(), dest.to_path_buf())
        };

        let meta = match fs::symlink_metadata(&source) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // not on the host filesystem: a new directory to create
                return self.add_dir(&dest);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {:?}", source))
            }
        };

        // a symlink to a directory doesn't carry the dir bit here, so the
        // symlink check comes first
        if meta.file_type().is_symlink() {
            self.add_symlink(&source, &dest)
        } else if meta.is_dir() {
            self.add_dir(&dest)
        } else {
            self.add_file(&source, &dest, &meta)
        }
    }

    fn add_symlink(&mut self, source: &Path, dest: &Path) -> Result<()> {
        let target = fs::read_link(source)
            .with_context(|| format!("failed to get symlink target for {:?}", source))?;

        // recording the entry before chasing the target ends link cycles
        let name = archive_name(dest);
        if self.items.contains(&name) {
            return Ok(());
        }
        let target_str = target.to_string_lossy().into_owned();
        self.items.add(ArchiveItem {
            source: source.to_path_buf(),
            name,
            kind: ItemKind::Symlink { target: target_str },
        });

        // the linked-to file belongs in the archive too
        let target_abs = if target.is_absolute() {
            target
        } else {
            let dir = source.parent().unwrap_or_else(|| Path::new("/"));
            osutil::resolve_rel_symlink(&target, dir)
        };
        self.add_item(&target_abs, &target_abs)
    }

    fn add_file(&mut self, source: &Path, dest: &Path, meta: &fs::Metadata) -> Result<()> {
        if let Some(parent) = dest.parent() {
            self.add_dir(parent)?;
        }

        self.items.add(ArchiveItem {
            source: source.to_path_buf(),
            name: archive_name(dest),
            kind: ItemKind::File {
                size: meta.len(),
                mode: meta.permissions().mode() & 0o777,
            },
        });
        Ok(())
    }

    /// Header-only entries for `dir` and every missing parent.
    fn add_dir(&mut self, dir: &Path) -> Result<()> {
        let mut dir = dir.to_string_lossy().into_owned();
        if dir == "/" {
            dir = ".".to_string();
        }

        let mut path = String::new();
        for part in dir.trim_start_matches('/').split('/') {
            if part.is_empty() {
                continue;
            }
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(part);
            self.items.add(ArchiveItem {
                source: PathBuf::from(&path),
                name: path.clone(),
                kind: ItemKind::Dir,
            });
        }
        Ok(())
    }

    /// Write the archive to `path` through the configured codec, fsync it
    /// and chmod it to `mode`.
    pub fn write(&mut self, path: &Path, mode: u32) -> Result<()> {
        if self.merged_usr {
            // reflect the host's merged-usr links in the archive
            for dir in ["/bin", "/sbin", "/lib"] {
                self.add_symlink(Path::new(dir), Path::new(dir))?;
            }
        }

        let fd = File::create(path)
            .with_context(|| format!("unable to create archive file {:?}", path))?;
        let encoder = Encoder::new(fd, self.format, self.level)
            .with_context(|| format!("unable to set up {} compressor", self.format.as_str()))?;

        let encoder = self
            .write_cpio(encoder)
            .with_context(|| format!("unable to write archive to {:?}", path))?;

        let fd = encoder
            .finish()
            .with_context(|| format!("unable to finish {} stream", self.format.as_str()))?;
        fd.sync_all()
            .with_context(|| format!("unable to fsync {:?}", path))?;
        drop(fd);

        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("unable to chmod {:?}", path))?;
        Ok(())
    }

    fn write_cpio(&self, mut encoder: Encoder) -> Result<Encoder> {
        for item in self.items.iter() {
            encoder = write_item(item, encoder)
                .with_context(|| format!("couldn't process {:?}", item.source))?;
        }
        newc::trailer(encoder).context("unable to write archive trailer")
    }
}

fn archive_name(dest: &Path) -> String {
    dest.to_string_lossy().trim_start_matches('/').to_string()
}

fn write_item(item: &ArchiveItem, encoder: Encoder) -> Result<Encoder> {
    match &item.kind {
        ItemKind::Dir => {
            let writer = newc::Builder::new(&item.name)
                .mode(0o755)
                .set_mode_file_type(ModeFileType::Directory)
                .write(encoder, 0);
            Ok(writer.finish()?)
        }
        ItemKind::Symlink { target } => {
            // the body of a symlink is just the link target
            let mut writer = newc::Builder::new(&item.name)
                .mode(0o644)
                .set_mode_file_type(ModeFileType::Symlink)
                .write(encoder, target.len() as u32);
            writer.write_all(target.as_bytes())?;
            Ok(writer.finish()?)
        }
        ItemKind::File { size, mode } => {
            let mut fd = File::open(&item.source)
                .with_context(|| format!("unable to open file {:?}", item.source))?;
            let mut writer = newc::Builder::new(&item.name)
                .mode(*mode)
                .set_mode_file_type(ModeFileType::Regular)
                .write(encoder, *size as u32);
            io::copy(&mut fd, &mut writer)?;
            Ok(writer.finish()?)
        }
    }
}

/// Write adapter applying the selected codec to the cpio byte stream.
enum Encoder {
    Gzip(GzEncoder<File>),
    Zstd(zstd::stream::write::Encoder<'static, File>),
    Lz4(Lz4LegacyEncoder<File>),
    Xz(xz2::write::XzEncoder<File>),
    None(File),
}

impl Encoder {
    fn new(fd: File, format: CompressFormat, level: CompressLevel) -> Result<Self> {
        Ok(match format {
            CompressFormat::Gzip => {
                let level = match level {
                    CompressLevel::Fast => 1,
                    CompressLevel::Default => 6,
                    CompressLevel::Best => 9,
                };
                Encoder::Gzip(GzEncoder::new(fd, flate2::Compression::new(level)))
            }
            CompressFormat::Zstd => {
                // preset mapping may need tuning against boot-loader size limits
                let level = match level {
                    CompressLevel::Fast => 1,
                    CompressLevel::Default => 3,
                    CompressLevel::Best => 19,
                };
                Encoder::Zstd(zstd::stream::write::Encoder::new(fd, level)?)
            }
            CompressFormat::Lz4 => Encoder::Lz4(Lz4LegacyEncoder::new(fd, level)),
            CompressFormat::Lzma => Encoder::Xz(xz2::write::XzEncoder::new(fd, 6)),
            CompressFormat::None => Encoder::None(fd),
        })
    }

    fn finish(self) -> Result<File> {
        Ok(match self {
            Encoder::Gzip(e) => e.finish()?,
            Encoder::Zstd(e) => e.finish()?,
            Encoder::Lz4(e) => e.finish()?,
            Encoder::Xz(e) => e.finish()?,
            Encoder::None(fd) => fd,
        })
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Zstd(e) => e.write(buf),
            Encoder::Lz4(e) => e.write(buf),
            Encoder::Xz(e) => e.write(buf),
            Encoder::None(fd) => fd.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(e) => e.flush(),
            Encoder::Zstd(e) => e.flush(),
            Encoder::Lz4(e) => e.flush(),
            Encoder::Xz(e) => e.flush(),
            Encoder::None(fd) => fd.flush(),
        }
    }
}

/// The legacy lz4 frame magic the kernel decompressor expects.
const LZ4_LEGACY_MAGIC: u32 = 0x184C2102;
/// Uncompressed block size of the legacy frame layout.
const LZ4_LEGACY_BLOCK_SIZE: usize = 8 << 20;

/// lz4 writer emitting the legacy frame layout: the legacy magic followed
/// by blocks of at most 8 MiB uncompressed input, each prefixed with its
/// compressed length as a little-endian u32.
struct Lz4LegacyEncoder<W: Write> {
    inner: W,
    buf: Vec<u8>,
    high_compression: bool,
    wrote_magic: bool,
}

impl<W: Write> Lz4LegacyEncoder<W> {
    fn new(inner: W, level: CompressLevel) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            // fast mode is also the reference tooling's default
            high_compression: level == CompressLevel::Best,
            wrote_magic: false,
        }
    }

    fn write_block(&mut self, block: &[u8]) -> io::Result<()> {
        if !self.wrote_magic {
            self.inner.write_all(&LZ4_LEGACY_MAGIC.to_le_bytes())?;
            self.wrote_magic = true;
        }
        let mode = if self.high_compression {
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(12))
        } else {
            None
        };
        let compressed = lz4::block::compress(block, mode, false)?;
        self.inner
            .write_all(&(compressed.len() as u32).to_le_bytes())?;
        self.inner.write_all(&compressed)
    }

    fn finish(mut self) -> io::Result<W> {
        let buf = std::mem::take(&mut self.buf);
        if !buf.is_empty() {
            self.write_block(&buf)?;
        }
        if !self.wrote_magic {
            self.inner.write_all(&LZ4_LEGACY_MAGIC.to_le_bytes())?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for Lz4LegacyEncoder<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= LZ4_LEGACY_BLOCK_SIZE {
            let rest = self.buf.split_off(LZ4_LEGACY_BLOCK_SIZE);
            let block = std::mem::replace(&mut self.buf, rest);
            self.write_block(&block)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
