//! JAR entry normalization.
//!
//! Writers disagree on what makes a ZIP entry a directory: some flag
//! `.class` files as directories, others store directories with content.
//! [`normalize`] rewrites an archive in a single pass so that every entry
//! is unambiguously one or the other:
//!
//! 1. The trailing `/` is stripped to get the canonical path.
//! 2. `*.class` entries are always files.
//! 3. Entries that declare themselves directories and are empty are directories.
//! 4. Everything else is a file.
//!
//! Directories are written once, and every file (or directory) is preceded
//! by entries for all of its ancestors, outermost first.

use flate2::Compression;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::error::NormalizeError;
use crate::io::{LocalFileReader, ReadAt};
use crate::zip::{
    CompressionMethod, EntryHeader, ZipFileEntry, ZipReader, ZipWriter, file_external_attrs,
    flags,
};

/// Suffix of compiled classes, which are never directories
pub const CLASS_SUFFIX: &str = ".class";

/// How an entry is written to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// Classification of one source entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    /// Stored name bytes without trailing separator
    pub name: Vec<u8>,
    /// `name` decoded for display
    pub path: String,
    pub kind: EntryKind,
    /// Whether the source entry claimed to be a directory
    pub declared_directory: bool,
}

impl ResolvedEntry {
    /// A directory-flagged entry that is being written as a file
    pub fn is_reclassified(&self) -> bool {
        self.declared_directory && self.kind == EntryKind::File
    }
}

/// Decide whether a source entry is a directory or a file.
pub fn classify(entry: &ZipFileEntry) -> ResolvedEntry {
    let name = entry.canonical_name().to_vec();
    let path = String::from_utf8_lossy(&name).into_owned();
    let declared_directory = entry.is_dir();

    let kind = if name.ends_with(CLASS_SUFFIX.as_bytes()) {
        EntryKind::File
    } else if declared_directory && entry.uncompressed_size == 0 {
        EntryKind::Directory
    } else {
        EntryKind::File
    };

    ResolvedEntry {
        name,
        path,
        kind,
        declared_directory,
    }
}

/// Parent of a canonical path, or `None` at the archive root
pub fn parent_path(path: &[u8]) -> Option<&[u8]> {
    let slash = path.iter().rposition(|&b| b == b'/')?;
    let end = path[..slash]
        .iter()
        .rposition(|&b| b != b'/')
        .map_or(0, |i| i + 1);
    (end > 0).then(|| &path[..end])
}

/// Directory paths already written to the output, as stored name bytes
#[derive(Debug, Default)]
pub struct SeenDirs {
    dirs: HashSet<Vec<u8>>,
}

impl SeenDirs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &[u8]) -> bool {
        self.dirs.contains(path)
    }

    /// Record `path`, returning `false` if it was already present
    pub fn insert(&mut self, path: &[u8]) -> bool {
        if self.dirs.contains(path) {
            return false;
        }
        self.dirs.insert(path.to_vec())
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Claim every unseen ancestor of `path`, outermost first.
    ///
    /// The walk goes child to root and stops at the first ancestor already
    /// seen, since all of its own ancestors were claimed with it.
    pub fn claim_ancestors(&mut self, path: &[u8]) -> Vec<Vec<u8>> {
        let mut missing = Vec::new();
        let mut current = parent_path(path);
        while let Some(dir) = current {
            if !self.insert(dir) {
                break;
            }
            missing.push(dir.to_vec());
            current = parent_path(dir);
        }
        missing.reverse();
        missing
    }
}

/// Tuning knobs for a normalization run
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Deflate level for file entries, 0-9
    pub compression_level: u32,
    /// Check each source entry's CRC-32 after decompressing it
    pub verify_crc: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            verify_crc: true,
        }
    }
}

/// Counts of what a run wrote
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizeReport {
    /// File entries written
    pub files: usize,
    /// Directory entries carried over from the source
    pub directories: usize,
    /// Directory entries created for ancestors missing from the source
    pub synthesized_directories: usize,
    /// Directory entries dropped because the path was already written
    pub duplicate_directories: usize,
    /// Directory-flagged source entries written as files
    pub reclassified: usize,
    /// Entries naming the archive root, which are dropped
    pub skipped: usize,
}

impl NormalizeReport {
    /// Total number of entries in the output archive
    pub fn entries_written(&self) -> usize {
        self.files + self.directories + self.synthesized_directories
    }
}

/// Normalize the archive at `input` into a new archive at `output`.
pub async fn normalize(input: &Path, output: &Path) -> Result<NormalizeReport, NormalizeError> {
    normalize_with(input, output, &NormalizeOptions::default()).await
}

/// [`normalize`] with explicit options.
///
/// The output is created or truncated. On error it is left as far as it
/// got; discarding it is up to the caller.
pub async fn normalize_with(
    input: &Path,
    output: &Path,
    options: &NormalizeOptions,
) -> Result<NormalizeReport, NormalizeError> {
    info!(input = %input.display(), output = %output.display(), "normalizing archive");

    let open_failed = |source: anyhow::Error| NormalizeError::OpenInputFailed {
        path: input.to_path_buf(),
        source,
    };
    let reader = Arc::new(LocalFileReader::new(input).map_err(open_failed)?);
    let central = ZipReader::new(reader.clone())
        .read_central_directory()
        .await
        .map_err(open_failed)?;
    debug!(entries = central.entries.len(), "read central directory");

    if is_same_file(input, output) {
        return Err(NormalizeError::CreateOutputFailed {
            path: output.to_path_buf(),
            source: anyhow::anyhow!("output would overwrite the input archive"),
        });
    }

    let file = tokio::fs::File::create(output)
        .await
        .map_err(|e| NormalizeError::CreateOutputFailed {
            path: output.to_path_buf(),
            source: e.into(),
        })?;

    let normalizer = Normalizer::new(reader, BufWriter::new(file), options);
    let (report, mut out) = normalizer.run(&central.entries, &central.comment).await?;
    out.shutdown()
        .await
        .map_err(|e| NormalizeError::FinalizeOutputFailed { source: e.into() })?;

    info!(
        files = report.files,
        directories = report.directories,
        synthesized = report.synthesized_directories,
        duplicates = report.duplicate_directories,
        reclassified = report.reclassified,
        "archive normalized"
    );
    Ok(report)
}

/// Whether both paths resolve to the same existing file
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// One normalization pass: owns the output writer and the seen-directory
/// set for the duration of the run.
pub struct Normalizer<R: ReadAt, W: AsyncWrite + Unpin> {
    reader: ZipReader<R>,
    writer: ZipWriter<W>,
    seen: SeenDirs,
    report: NormalizeReport,
    verify_crc: bool,
}

impl<R: ReadAt, W: AsyncWrite + Unpin> Normalizer<R, W> {
    pub fn new(reader: Arc<R>, output: W, options: &NormalizeOptions) -> Self {
        Self {
            reader: ZipReader::new(reader),
            writer: ZipWriter::with_compression(
                output,
                Compression::new(options.compression_level.min(9)),
            ),
            seen: SeenDirs::new(),
            report: NormalizeReport::default(),
            verify_crc: options.verify_crc,
        }
    }

    /// Rewrite `entries` in order, then write the central directory.
    ///
    /// Returns the report and the flushed output stream.
    pub async fn run(
        mut self,
        entries: &[ZipFileEntry],
        comment: &[u8],
    ) -> Result<(NormalizeReport, W), NormalizeError> {
        for entry in entries {
            self.process(entry).await?;
        }

        let out = self
            .writer
            .finish(comment)
            .await
            .map_err(|source| NormalizeError::FinalizeOutputFailed { source })?;
        Ok((self.report, out))
    }

    async fn process(&mut self, entry: &ZipFileEntry) -> Result<(), NormalizeError> {
        let resolved = classify(entry);

        if resolved.name.is_empty() {
            warn!(name = %entry.file_name, "skipping entry for the archive root");
            self.report.skipped += 1;
            return Ok(());
        }

        if resolved.is_reclassified() {
            warn!(
                path = %resolved.path,
                size = entry.uncompressed_size,
                "directory-flagged entry rewritten as a file"
            );
            self.report.reclassified += 1;
        }

        self.emit_ancestors(&resolved.name).await?;

        match resolved.kind {
            EntryKind::Directory => self.emit_directory(&resolved).await,
            EntryKind::File => self.emit_file(entry, &resolved).await,
        }
    }

    /// Write entries for every ancestor of `name` not written yet
    async fn emit_ancestors(&mut self, name: &[u8]) -> Result<(), NormalizeError> {
        for dir in self.seen.claim_ancestors(name) {
            debug!(path = %String::from_utf8_lossy(&dir), "synthesizing parent directory");
            self.write_directory(&dir).await?;
            self.report.synthesized_directories += 1;
        }
        Ok(())
    }

    async fn emit_directory(&mut self, resolved: &ResolvedEntry) -> Result<(), NormalizeError> {
        if !self.seen.insert(&resolved.name) {
            debug!(path = %resolved.path, "skipping duplicate directory");
            self.report.duplicate_directories += 1;
            return Ok(());
        }
        debug!(path = %resolved.path, "directory");
        self.write_directory(&resolved.name).await?;
        self.report.directories += 1;
        Ok(())
    }

    async fn write_directory(&mut self, name: &[u8]) -> Result<(), NormalizeError> {
        self.writer
            .add_directory(name)
            .await
            .map_err(|source| NormalizeError::EntryWriteFailed {
                name: format!("{}/", String::from_utf8_lossy(name)),
                source,
            })
    }

    async fn emit_file(
        &mut self,
        entry: &ZipFileEntry,
        resolved: &ResolvedEntry,
    ) -> Result<(), NormalizeError> {
        let path = resolved.path.as_str();
        let opened = self.reader.open_entry(entry).await.map_err(|source| {
            NormalizeError::EntryOpenFailed {
                name: path.to_string(),
                source,
            }
        })?;
        let copy_failed = |source: anyhow::Error| NormalizeError::ContentCopyFailed {
            name: path.to_string(),
            source,
        };
        let data = self
            .reader
            .read_to_vec(&opened, self.verify_crc)
            .await
            .map_err(copy_failed)?;

        let mut header = EntryHeader::from_entry(entry);
        header.name = resolved.name.clone();
        header.flags &= !flags::DATA_DESCRIPTOR;
        header.external_attrs = file_external_attrs(entry.version_made_by, entry.external_attrs);
        header.compression_method = CompressionMethod::Deflate;

        let prepared = self
            .writer
            .prepare_entry(header, &data)
            .map_err(copy_failed)?;
        debug!(
            path = %prepared.name(),
            size = prepared.uncompressed_size(),
            compressed = prepared.compressed_size(),
            "deflated"
        );
        self.writer
            .write_entry(prepared)
            .await
            .map_err(|source| NormalizeError::EntryWriteFailed {
                name: path.to_string(),
                source,
            })?;

        self.report.files += 1;
        Ok(())
    }
}
