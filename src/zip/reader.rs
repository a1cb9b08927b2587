use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::parser::{CentralDirectory, ZipParser};
use super::structures::{CompressionMethod, ZipFileEntry};

/// Upper bound on the buffer reserved up front from a header's size claim
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// An entry whose local header has been located and whose data is readable
#[derive(Debug, Clone)]
pub struct OpenedEntry {
    pub name: String,
    pub data_offset: u64,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
}

/// ZIP archive reader
pub struct ZipReader<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipReader<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// List all files along with the archive comment
    pub async fn read_central_directory(&self) -> Result<CentralDirectory> {
        self.parser.read_central_directory().await
    }

    /// Locate an entry's data, rejecting entries whose content we can't decode
    pub async fn open_entry(&self, entry: &ZipFileEntry) -> Result<OpenedEntry> {
        if entry.is_encrypted() {
            bail!("Encrypted entries are not supported");
        }
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            bail!(
                "Unsupported compression method: {} (only STORED and DEFLATE are supported)",
                method
            );
        }

        let data_offset = self.parser.get_data_offset(entry).await?;

        Ok(OpenedEntry {
            name: entry.file_name.clone(),
            data_offset,
            compression_method: entry.compression_method,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            crc32: entry.crc32,
        })
    }

    /// Read and decompress an opened entry into memory.
    ///
    /// The decompressed length must match the Central Directory; the CRC-32
    /// is checked too when `verify_crc` is set.
    pub async fn read_to_vec(&self, opened: &OpenedEntry, verify_crc: bool) -> Result<Vec<u8>> {
        let mut raw = vec![0u8; opened.compressed_size as usize];
        self.parser
            .reader()
            .read_exact_at(opened.data_offset, &mut raw)
            .await?;

        let data = match opened.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => {
                let capacity = opened.uncompressed_size.min(MAX_PREALLOC) as usize;
                let mut out = Vec::with_capacity(capacity);
                // One byte past the declared size is enough to detect a lie
                DeflateDecoder::new(&raw[..])
                    .take(opened.uncompressed_size.saturating_add(1))
                    .read_to_end(&mut out)
                    .context("Corrupt deflate stream")?;
                if out.len() as u64 > opened.uncompressed_size {
                    bail!(
                        "Size mismatch: stream inflates past the declared {} bytes",
                        opened.uncompressed_size
                    );
                }
                out
            }
            CompressionMethod::Unknown(method) => {
                bail!("Unsupported compression method: {}", method)
            }
        };

        if data.len() as u64 != opened.uncompressed_size {
            bail!(
                "Size mismatch: expected {} bytes, got {}",
                opened.uncompressed_size,
                data.len()
            );
        }

        if verify_crc {
            let actual = crc32fast::hash(&data);
            if actual != opened.crc32 {
                bail!(
                    "CRC-32 mismatch: expected {:08x}, got {:08x}",
                    opened.crc32,
                    actual
                );
            }
        }

        Ok(data)
    }

    /// Open and read an entry in one step
    pub async fn read_entry(&self, entry: &ZipFileEntry, verify_crc: bool) -> Result<Vec<u8>> {
        let opened = self.open_entry(entry).await?;
        self.read_to_vec(&opened, verify_crc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::{CDFH_SIGNATURE, EndOfCentralDirectory};
    use crate::zip::{EntryHeader, ZipWriter};

    /// Overwrite the uncompressed size of the first Central Directory header
    fn patch_declared_size(bytes: &mut [u8], size: u32) {
        let eocd = EndOfCentralDirectory::from_bytes(&bytes[bytes.len() - 22..]).unwrap();
        let cdfh = eocd.cd_offset as usize;
        assert_eq!(&bytes[cdfh..cdfh + 4], CDFH_SIGNATURE);
        bytes[cdfh + 24..cdfh + 28].copy_from_slice(&size.to_le_bytes());
    }

    #[tokio::test]
    async fn inflation_stops_at_declared_size() {
        let body = vec![0u8; 1024 * 1024];
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_entry(EntryHeader::file("bomb.bin"), &body)
            .await
            .unwrap();
        let mut bytes = writer.finish(&[]).await.unwrap();
        patch_declared_size(&mut bytes, 10);

        let reader = ZipReader::new(Arc::new(bytes));
        let entries = reader.list_files().await.unwrap();
        assert_eq!(entries[0].uncompressed_size, 10);

        let err = reader.read_entry(&entries[0], false).await.unwrap_err();
        assert!(err.to_string().contains("declared 10 bytes"), "{err}");
    }

    #[tokio::test]
    async fn short_deflate_stream_is_a_size_mismatch() {
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_entry(EntryHeader::file("a.txt"), b"hello")
            .await
            .unwrap();
        let mut bytes = writer.finish(&[]).await.unwrap();
        patch_declared_size(&mut bytes, 50);

        let reader = ZipReader::new(Arc::new(bytes));
        let entries = reader.list_files().await.unwrap();
        let err = reader.read_entry(&entries[0], false).await.unwrap_err();
        assert!(err.to_string().contains("expected 50 bytes, got 5"), "{err}");
    }

    #[tokio::test]
    async fn encrypted_entries_are_refused() {
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_entry(EntryHeader::file("secret.txt"), b"hello")
            .await
            .unwrap();
        let bytes = writer.finish(&[]).await.unwrap();

        let reader = ZipReader::new(Arc::new(bytes));
        let mut entry = reader.list_files().await.unwrap().remove(0);
        entry.flags |= crate::zip::flags::ENCRYPTED;
        assert!(reader.open_entry(&entry).await.is_err());
    }
}
