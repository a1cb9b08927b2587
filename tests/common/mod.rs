#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use jarfix::zip::{CompressionMethod, EntryHeader, ZipFileEntry, ZipReader, ZipWriter, mode};

pub const DIR_ATTRS: u32 = (mode::S_IFDIR | 0o755) << 16;
pub const FILE_ATTRS: u32 = (mode::S_IFREG | 0o644) << 16;

/// One entry of a hand-built input archive
pub struct Fixture {
    pub header: EntryHeader,
    pub data: Vec<u8>,
}

/// A regular deflated file
pub fn file(name: &str, data: &[u8]) -> Fixture {
    Fixture {
        header: EntryHeader::file(name),
        data: data.to_vec(),
    }
}

/// An entry with Unix directory mode bits, stored, with whatever content
pub fn dir_flagged(name: &str, data: &[u8]) -> Fixture {
    let mut header = EntryHeader::file(name);
    header.external_attrs = DIR_ATTRS;
    header.compression_method = CompressionMethod::Stored;
    Fixture {
        header,
        data: data.to_vec(),
    }
}

pub async fn build_archive(entries: Vec<Fixture>, comment: &[u8]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Vec::new());
    for entry in entries {
        writer.add_entry(entry.header, &entry.data).await.unwrap();
    }
    writer.finish(comment).await.unwrap()
}

pub async fn write_archive(path: &Path, entries: Vec<Fixture>) {
    let bytes = build_archive(entries, &[]).await;
    std::fs::write(path, bytes).unwrap();
}

pub fn open(path: &Path) -> ZipReader<Vec<u8>> {
    ZipReader::new(Arc::new(std::fs::read(path).unwrap()))
}

pub async fn list(path: &Path) -> Vec<ZipFileEntry> {
    open(path).list_files().await.unwrap()
}

pub fn names(entries: &[ZipFileEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.file_name.as_str()).collect()
}

/// Deterministic, poorly compressible bytes
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
