//! # jarfix
//!
//! Normalize JAR archives so that every entry is unambiguously a file or a
//! directory.
//!
//! Tools that write JARs disagree on ZIP semantics: some store compiled
//! classes with directory attributes, others produce directory entries that
//! carry content, and many skip the entries for intermediate directories.
//! This crate rewrites such an archive in one pass:
//!
//! - `*.class` entries are always files
//! - empty entries that declare themselves directories stay directories
//! - directory-flagged entries with content become files
//! - missing parent directories are added, each exactly once and before
//!   anything nested under it
//! - every file is re-deflated with a clean header
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let report = jarfix::normalize(Path::new("broken.jar"), Path::new("fixed.jar")).await?;
//!     println!("{} files, {} directories added", report.files, report.synthesized_directories);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod normalize;
pub mod zip;

pub use cli::Cli;
pub use error::NormalizeError;
pub use io::{LocalFileReader, ReadAt};
pub use normalize::{
    EntryKind, NormalizeOptions, NormalizeReport, Normalizer, ResolvedEntry, SeenDirs, classify,
    normalize, normalize_with,
};
pub use zip::{EntryHeader, ZipFileEntry, ZipReader, ZipWriter};
