//! ZIP archive reading and writing.
//!
//! This module provides just enough of the ZIP format to rewrite a JAR
//! entry by entry, supporting both standard ZIP format and ZIP64 extensions
//! for large archives.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`reader`]: Entry listing and content decoding
//! - [`writer`]: Sequential archive writer
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The reader trusts the Central Directory and only consults local headers
//! to find where data starts. The writer emits local headers with final
//! sizes, then the Central Directory and EOCD once every entry is written.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED (no compression) method
//! - DEFLATE compression method
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod parser;
mod reader;
mod structures;
mod writer;

pub use parser::{CentralDirectory, ZipParser};
pub use reader::{OpenedEntry, ZipReader};
pub use structures::*;
pub use writer::{EntryHeader, PreparedEntry, ZipWriter};
