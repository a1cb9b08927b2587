//! Sequential ZIP archive writer.
//!
//! Entries are fully resolved before any of their bytes hit the output:
//! content is compressed and checksummed in memory, so every Local File
//! Header carries its final sizes and CRC and no data descriptors are
//! needed. The Central Directory is accumulated and written by
//! [`ZipWriter::finish`], with ZIP64 records added only when a size,
//! offset or entry count overflows the classic fields.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;
use tokio::io::AsyncWrite;

use anyhow::{Result, bail};

use super::structures::*;

/// Header fields of an entry about to be written
#[derive(Debug, Clone)]
pub struct EntryHeader {
    /// Name bytes as they go on disk
    pub name: Vec<u8>,
    pub compression_method: CompressionMethod,
    pub flags: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub version_made_by: u16,
    pub external_attrs: u32,
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
}

impl EntryHeader {
    /// A deflated regular file with default metadata
    pub fn file(name: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            compression_method: CompressionMethod::Deflate,
            flags: 0,
            last_mod_time: DOS_EPOCH_TIME,
            last_mod_date: DOS_EPOCH_DATE,
            version_made_by: VERSION_MADE_BY_UNIX,
            external_attrs: (mode::S_IFREG | 0o644) << 16,
            extra_field: Vec::new(),
            comment: Vec::new(),
        }
    }

    /// A directory entry: trailing `/`, directory mode bits, no content
    pub fn directory(path: impl AsRef<[u8]>) -> Self {
        let path = path.as_ref();
        let end = path.iter().rposition(|&b| b != b'/').map_or(0, |i| i + 1);
        let mut name = path[..end].to_vec();
        name.push(b'/');
        Self {
            compression_method: CompressionMethod::Stored,
            external_attrs: directory_external_attrs(),
            ..Self::file(name)
        }
    }

    /// Start from the metadata of an existing entry
    pub fn from_entry(entry: &ZipFileEntry) -> Self {
        Self {
            name: entry.file_name_raw.clone(),
            compression_method: entry.compression_method,
            flags: entry.flags,
            last_mod_time: entry.last_mod_time,
            last_mod_date: entry.last_mod_date,
            version_made_by: entry.version_made_by,
            external_attrs: entry.external_attrs,
            extra_field: entry.extra_field.clone(),
            comment: entry.comment.clone(),
        }
    }
}

/// An entry that has been compressed and checksummed, ready to be written
#[derive(Debug)]
pub struct PreparedEntry {
    header: EntryHeader,
    data: Vec<u8>,
    crc32: u32,
    uncompressed_size: u64,
}

impl PreparedEntry {
    /// Entry name for display
    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.header.name)
    }

    pub fn compressed_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }
}

/// What the Central Directory needs to remember about a written entry
struct CentralRecord {
    header: EntryHeader,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
}

/// ZIP file writer
pub struct ZipWriter<W: AsyncWrite + Unpin> {
    inner: W,
    /// Bytes written so far, i.e. the offset of the next record
    offset: u64,
    records: Vec<CentralRecord>,
    compression: Compression,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_compression(inner, Compression::default())
    }

    pub fn with_compression(inner: W, compression: Compression) -> Self {
        Self {
            inner,
            offset: 0,
            records: Vec::new(),
            compression,
        }
    }

    /// Number of entries written so far
    pub fn entry_count(&self) -> usize {
        self.records.len()
    }

    /// Compress and checksum `data` according to the header's method
    pub fn prepare_entry(&self, mut header: EntryHeader, data: &[u8]) -> Result<PreparedEntry> {
        if header.name.len() > u16::MAX as usize {
            bail!("Entry name too long ({} bytes)", header.name.len());
        }
        if header.comment.len() > u16::MAX as usize {
            bail!("Entry comment too long ({} bytes)", header.comment.len());
        }
        // Room for a full ZIP64 block in the central header
        if header.extra_field.len() > u16::MAX as usize - 28 {
            bail!("Extra field too long ({} bytes)", header.extra_field.len());
        }

        let compressed = match header.compression_method {
            CompressionMethod::Stored => data.to_vec(),
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), self.compression);
                encoder.write_all(data)?;
                encoder.finish()?
            }
            CompressionMethod::Unknown(method) => {
                bail!("Cannot write compression method {}", method)
            }
        };

        // Sizes and CRC always precede the data, and nothing is encrypted
        header.flags &= !(flags::DATA_DESCRIPTOR | flags::ENCRYPTED);
        // Names that aren't UTF-8 are kept as-is in the legacy encoding
        if !header.name.is_ascii() && std::str::from_utf8(&header.name).is_ok() {
            header.flags |= flags::UTF8;
        }

        Ok(PreparedEntry {
            header,
            crc32: crc32fast::hash(data),
            uncompressed_size: data.len() as u64,
            data: compressed,
        })
    }

    /// Write a prepared entry's Local File Header followed by its data
    pub async fn write_entry(&mut self, prepared: PreparedEntry) -> Result<()> {
        let PreparedEntry {
            header,
            data,
            crc32,
            uncompressed_size,
        } = prepared;
        let compressed_size = data.len() as u64;
        let zip64 = compressed_size >= ZIP64_LIMIT || uncompressed_size >= ZIP64_LIMIT;

        let capacity = LFH_SIZE + header.name.len() + header.extra_field.len() + 20;
        let mut lfh = Vec::with_capacity(capacity);
        lfh.extend_from_slice(LFH_SIGNATURE);
        lfh.write_u16::<LittleEndian>(if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT })?;
        lfh.write_u16::<LittleEndian>(header.flags)?;
        lfh.write_u16::<LittleEndian>(header.compression_method.as_u16())?;
        lfh.write_u16::<LittleEndian>(header.last_mod_time)?;
        lfh.write_u16::<LittleEndian>(header.last_mod_date)?;
        lfh.write_u32::<LittleEndian>(crc32)?;

        let mut extra = Vec::new();
        if zip64 {
            // The local ZIP64 block must carry both sizes
            lfh.write_u32::<LittleEndian>(ZIP64_LIMIT as u32)?;
            lfh.write_u32::<LittleEndian>(ZIP64_LIMIT as u32)?;
            extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            extra.write_u16::<LittleEndian>(16)?;
            extra.write_u64::<LittleEndian>(uncompressed_size)?;
            extra.write_u64::<LittleEndian>(compressed_size)?;
        } else {
            lfh.write_u32::<LittleEndian>(compressed_size as u32)?;
            lfh.write_u32::<LittleEndian>(uncompressed_size as u32)?;
        }
        extra.extend_from_slice(&header.extra_field);

        lfh.write_u16::<LittleEndian>(header.name.len() as u16)?;
        lfh.write_u16::<LittleEndian>(extra.len() as u16)?;
        lfh.extend_from_slice(&header.name);
        lfh.extend_from_slice(&extra);

        let lfh_offset = self.offset;
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, &lfh).await?;
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, &data).await?;
        self.offset += lfh.len() as u64 + compressed_size;

        self.records.push(CentralRecord {
            header,
            crc32,
            compressed_size,
            uncompressed_size,
            lfh_offset,
        });

        Ok(())
    }

    /// Compress and write an entry in one step
    pub async fn add_entry(&mut self, header: EntryHeader, data: &[u8]) -> Result<()> {
        let prepared = self.prepare_entry(header, data)?;
        self.write_entry(prepared).await
    }

    /// Write a directory entry for `path` (with or without trailing `/`)
    pub async fn add_directory(&mut self, path: impl AsRef<[u8]>) -> Result<()> {
        self.add_entry(EntryHeader::directory(path), &[]).await
    }

    /// Write the Central Directory and End of Central Directory records.
    ///
    /// Consumes the writer and hands back the flushed inner stream.
    pub async fn finish(mut self, comment: &[u8]) -> Result<W> {
        if comment.len() > u16::MAX as usize {
            bail!("Archive comment too long ({} bytes)", comment.len());
        }

        let cd_offset = self.offset;
        let mut cd = Vec::new();
        for record in &self.records {
            write_cdfh(&mut cd, record)?;
        }
        let cd_size = cd.len() as u64;
        let total_entries = self.records.len() as u64;

        let zip64 = total_entries >= ZIP64_ENTRY_LIMIT
            || cd_offset >= ZIP64_LIMIT
            || cd_size >= ZIP64_LIMIT;

        let mut tail = Vec::new();
        if zip64 {
            let eocd64_offset = cd_offset + cd_size;
            Zip64EOCD {
                // Size of the record after the size field itself
                eocd64_size: (Zip64EOCD::MIN_SIZE - 12) as u64,
                version_made_by: ((host::UNIX as u16) << 8) | VERSION_ZIP64,
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: total_entries,
                total_entries,
                cd_size,
                cd_offset,
            }
            .write_to(&mut tail)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .write_to(&mut tail)?;
        }

        let entries16 = total_entries.min(ZIP64_ENTRY_LIMIT) as u16;
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries16,
            total_entries: entries16,
            cd_size: cd_size.min(ZIP64_LIMIT) as u32,
            cd_offset: cd_offset.min(ZIP64_LIMIT) as u32,
            comment_len: comment.len() as u16,
        }
        .write_to(&mut tail)?;
        tail.extend_from_slice(comment);

        tokio::io::AsyncWriteExt::write_all(&mut self.inner, &cd).await?;
        tokio::io::AsyncWriteExt::write_all(&mut self.inner, &tail).await?;
        tokio::io::AsyncWriteExt::flush(&mut self.inner).await?;
        self.offset += cd_size + tail.len() as u64;

        Ok(self.inner)
    }
}

/// Serialize one Central Directory File Header
fn write_cdfh(out: &mut Vec<u8>, record: &CentralRecord) -> Result<()> {
    let header = &record.header;

    // Only saturated fields get a slot in the ZIP64 block, in this order
    let mut zip64 = Vec::new();
    if record.uncompressed_size >= ZIP64_LIMIT {
        zip64.write_u64::<LittleEndian>(record.uncompressed_size)?;
    }
    if record.compressed_size >= ZIP64_LIMIT {
        zip64.write_u64::<LittleEndian>(record.compressed_size)?;
    }
    if record.lfh_offset >= ZIP64_LIMIT {
        zip64.write_u64::<LittleEndian>(record.lfh_offset)?;
    }

    let mut extra = Vec::with_capacity(zip64.len() + 4 + header.extra_field.len());
    if !zip64.is_empty() {
        extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        extra.write_u16::<LittleEndian>(zip64.len() as u16)?;
        extra.extend_from_slice(&zip64);
    }
    extra.extend_from_slice(&header.extra_field);

    let version_needed = if zip64.is_empty() {
        VERSION_DEFAULT
    } else {
        VERSION_ZIP64
    };

    out.extend_from_slice(CDFH_SIGNATURE);
    out.write_u16::<LittleEndian>(header.version_made_by)?;
    out.write_u16::<LittleEndian>(version_needed)?;
    out.write_u16::<LittleEndian>(header.flags)?;
    out.write_u16::<LittleEndian>(header.compression_method.as_u16())?;
    out.write_u16::<LittleEndian>(header.last_mod_time)?;
    out.write_u16::<LittleEndian>(header.last_mod_date)?;
    out.write_u32::<LittleEndian>(record.crc32)?;
    out.write_u32::<LittleEndian>(record.compressed_size.min(ZIP64_LIMIT) as u32)?;
    out.write_u32::<LittleEndian>(record.uncompressed_size.min(ZIP64_LIMIT) as u32)?;
    out.write_u16::<LittleEndian>(header.name.len() as u16)?;
    out.write_u16::<LittleEndian>(extra.len() as u16)?;
    out.write_u16::<LittleEndian>(header.comment.len() as u16)?;
    out.write_u16::<LittleEndian>(0)?; // disk number start
    out.write_u16::<LittleEndian>(0)?; // internal attributes
    out.write_u32::<LittleEndian>(header.external_attrs)?;
    out.write_u32::<LittleEndian>(record.lfh_offset.min(ZIP64_LIMIT) as u32)?;
    out.extend_from_slice(&header.name);
    out.extend_from_slice(&extra);
    out.extend_from_slice(&header.comment);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::ZipReader;
    use std::sync::Arc;

    fn reopen(bytes: Vec<u8>) -> ZipReader<Vec<u8>> {
        ZipReader::new(Arc::new(bytes))
    }

    #[tokio::test]
    async fn writes_readable_archive() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_directory("com/example").await.unwrap();
        let body = b"public class Main {}".repeat(20);
        writer
            .add_entry(EntryHeader::file("com/example/Main.class"), &body)
            .await
            .unwrap();
        assert_eq!(writer.entry_count(), 2);
        let bytes = writer.finish(b"built by jarfix").await.unwrap();

        let reader = reopen(bytes);
        let cd = reader.read_central_directory().await.unwrap();
        assert_eq!(cd.comment, b"built by jarfix");
        assert_eq!(cd.entries.len(), 2);

        let dir = &cd.entries[0];
        assert_eq!(dir.file_name, "com/example/");
        assert!(dir.is_dir());
        assert_eq!(dir.compression_method, CompressionMethod::Stored);
        assert_eq!(dir.uncompressed_size, 0);

        let file = &cd.entries[1];
        assert!(!file.is_dir());
        assert_eq!(file.compression_method, CompressionMethod::Deflate);
        assert!(file.compressed_size < file.uncompressed_size);
        assert_eq!(reader.read_entry(file, true).await.unwrap(), body);
    }

    #[tokio::test]
    async fn stored_entries_keep_raw_bytes() {
        let mut header = EntryHeader::file("META-INF/MANIFEST.MF");
        header.compression_method = CompressionMethod::Stored;

        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_entry(header, b"Manifest-Version: 1.0\r\n")
            .await
            .unwrap();
        let bytes = writer.finish(&[]).await.unwrap();

        let reader = reopen(bytes);
        let entries = reader.list_files().await.unwrap();
        assert_eq!(entries[0].compressed_size, entries[0].uncompressed_size);
        assert_eq!(
            reader.read_entry(&entries[0], true).await.unwrap(),
            b"Manifest-Version: 1.0\r\n"
        );
    }

    #[tokio::test]
    async fn clears_descriptor_and_sets_utf8_flags() {
        let mut header = EntryHeader::file("données/é.txt");
        header.flags = flags::DATA_DESCRIPTOR;

        let mut writer = ZipWriter::new(Vec::new());
        writer.add_entry(header, b"x").await.unwrap();
        let bytes = writer.finish(&[]).await.unwrap();

        let entries = reopen(bytes).list_files().await.unwrap();
        assert_eq!(entries[0].file_name, "données/é.txt");
        assert_eq!(entries[0].flags & flags::DATA_DESCRIPTOR, 0);
        assert_ne!(entries[0].flags & flags::UTF8, 0);
    }

    #[tokio::test]
    async fn extra_fields_and_comments_survive() {
        let mut header = EntryHeader::file("a.txt");
        // 0xCAFE is the JAR marker extra field, with an empty payload
        header.extra_field = vec![0xFE, 0xCA, 0x00, 0x00];
        header.comment = b"note".to_vec();

        let mut writer = ZipWriter::new(Vec::new());
        writer.add_entry(header, b"hello").await.unwrap();
        let bytes = writer.finish(&[]).await.unwrap();

        let entries = reopen(bytes).list_files().await.unwrap();
        assert_eq!(entries[0].extra_field, vec![0xFE, 0xCA, 0x00, 0x00]);
        assert_eq!(entries[0].comment, b"note");
    }

    #[tokio::test]
    async fn empty_archive_is_valid() {
        let bytes = ZipWriter::new(Vec::new()).finish(&[]).await.unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        assert!(reopen(bytes).list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn crc_mismatch_is_detected() {
        let mut header = EntryHeader::file("a.txt");
        header.compression_method = CompressionMethod::Stored;
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_entry(header, b"hello").await.unwrap();
        let mut bytes = writer.finish(&[]).await.unwrap();

        // Corrupt the first content byte (right after the 30-byte header and name)
        bytes[LFH_SIZE + "a.txt".len()] ^= 0xFF;

        let reader = reopen(bytes);
        let entries = reader.list_files().await.unwrap();
        assert!(reader.read_entry(&entries[0], true).await.is_err());
        assert!(reader.read_entry(&entries[0], false).await.is_ok());
    }

    #[tokio::test]
    async fn legacy_encoded_names_are_written_verbatim() {
        // CP437 "é" without the UTF-8 flag, as old JAR tools write it
        let name = b"caf\x82.txt".to_vec();
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_entry(EntryHeader::file(name.clone()), b"x")
            .await
            .unwrap();
        let bytes = writer.finish(&[]).await.unwrap();

        let entries = reopen(bytes).list_files().await.unwrap();
        assert_eq!(entries[0].file_name_raw, name);
        assert_eq!(entries[0].flags & flags::UTF8, 0);
    }

    #[test]
    fn directory_header_normalizes_trailing_slashes() {
        assert_eq!(EntryHeader::directory("a/b").name, b"a/b/");
        assert_eq!(EntryHeader::directory("a/b//").name, b"a/b/");
        assert_eq!(EntryHeader::directory(b"x\x82").name, b"x\x82/");
    }

    #[tokio::test]
    async fn zip64_end_records_once_entry_count_saturates() {
        const COUNT: usize = 70_000;
        let mut writer = ZipWriter::new(Vec::new());
        for i in 0..COUNT {
            let mut header = EntryHeader::file(format!("e/{i}"));
            header.compression_method = CompressionMethod::Stored;
            writer.add_entry(header, &[]).await.unwrap();
        }
        let bytes = writer.finish(&[]).await.unwrap();

        let eocd_at = bytes.len() - EndOfCentralDirectory::SIZE;
        let eocd = EndOfCentralDirectory::from_bytes(&bytes[eocd_at..]).unwrap();
        assert_eq!(eocd.total_entries, 0xFFFF);
        assert!(eocd.is_zip64());

        let locator_at = eocd_at - Zip64EOCDLocator::SIZE;
        let locator = Zip64EOCDLocator::from_bytes(&bytes[locator_at..eocd_at]).unwrap();
        let eocd64_at = locator.eocd64_offset as usize;
        assert_eq!(&bytes[eocd64_at..eocd64_at + 4], Zip64EOCD::SIGNATURE);
        let eocd64 = Zip64EOCD::from_bytes(&bytes[eocd64_at..]).unwrap();
        assert_eq!(eocd64.total_entries, COUNT as u64);

        let entries = reopen(bytes).list_files().await.unwrap();
        assert_eq!(entries.len(), COUNT);
        assert_eq!(entries[COUNT - 1].file_name, format!("e/{}", COUNT - 1));
    }

    #[test]
    fn unknown_method_cannot_be_prepared() {
        let mut header = EntryHeader::file("a.bin");
        header.compression_method = CompressionMethod::Unknown(14);
        let writer = ZipWriter::new(Vec::new());
        assert!(writer.prepare_entry(header, b"data").is_err());
    }
}
