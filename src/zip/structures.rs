use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use anyhow::{Result, bail};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose bit flags
pub mod flags {
    /// Entry is encrypted
    pub const ENCRYPTED: u16 = 0x0001;
    /// Sizes and CRC follow the data in a data descriptor. Some JAR writers
    /// (mis)use this bit to mark directories, so it is cleared on every file
    /// we emit.
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// File name and comment are UTF-8
    pub const UTF8: u16 = 0x0800;
}

/// Host system recorded in the upper byte of "version made by"
pub mod host {
    pub const MSDOS: u8 = 0;
    pub const UNIX: u8 = 3;
    pub const NTFS: u8 = 11;
    pub const VFAT: u8 = 14;
    pub const OSX: u8 = 19;
}

/// File mode bits stored in the external attributes
pub mod mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFREG: u32 = 0o100000;
    /// MS-DOS directory attribute (low byte of external attributes)
    pub const MSDOS_DIR: u32 = 0x10;
    /// Permissions given to synthesized directories
    pub const DIR_PERMISSIONS: u32 = 0o755;
}

/// ZIP format version we write: 2.0 (deflate, directories)
pub const VERSION_DEFAULT: u16 = 20;
/// ZIP format version required once ZIP64 records are involved
pub const VERSION_ZIP64: u16 = 45;
/// "Version made by" for entries we create: Unix host, format 2.0
pub const VERSION_MADE_BY_UNIX: u16 = ((host::UNIX as u16) << 8) | VERSION_DEFAULT;

/// Saturated 32-bit field value announcing a ZIP64 extra field
pub const ZIP64_LIMIT: u64 = 0xFFFF_FFFF;
/// Saturated 16-bit entry count announcing a ZIP64 EOCD
pub const ZIP64_ENTRY_LIMIT: u64 = 0xFFFF;
/// Extra field header id of the ZIP64 extended information field
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// 1980-01-01 00:00:00, the earliest DOS timestamp
pub const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;
pub const DOS_EPOCH_TIME: u16 = 0;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid End of Central Directory");
        }

        // Verify signature
        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid End of Central Directory");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Serialize the record (without the trailing comment bytes)
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(Self::SIGNATURE);
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(self.comment_len)?;
        Ok(())
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(Self::SIGNATURE);
        out.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        out.write_u64::<LittleEndian>(self.eocd64_offset)?;
        out.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(Self::SIGNATURE);
        out.write_u64::<LittleEndian>(self.eocd64_size)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u32::<LittleEndian>(self.disk_number)?;
        out.write_u32::<LittleEndian>(self.disk_with_cd)?;
        out.write_u64::<LittleEndian>(self.disk_entries)?;
        out.write_u64::<LittleEndian>(self.total_entries)?;
        out.write_u64::<LittleEndian>(self.cd_size)?;
        out.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(())
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    /// Name for display and classification; not valid UTF-8 names are
    /// decoded lossily
    pub file_name: String,
    /// Name exactly as stored in the Central Directory
    pub file_name_raw: Vec<u8>,
    pub version_made_by: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub external_attrs: u32,
    /// Extra field with any ZIP64 block removed (sizes are rewritten on output)
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
}

impl ZipFileEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Host system that created the entry
    pub fn host_system(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    /// Unix mode bits, when the creator host stores them
    pub fn unix_mode(&self) -> Option<u32> {
        match self.host_system() {
            host::UNIX | host::OSX => Some(self.external_attrs >> 16),
            _ => None,
        }
    }

    /// Whether the entry declares itself a directory.
    ///
    /// A trailing `/` in the name always counts. Otherwise the external
    /// attributes are consulted according to the creator host: the Unix
    /// file type for Unix/OS X, the MS-DOS directory attribute for
    /// DOS/NTFS/VFAT.
    pub fn is_dir(&self) -> bool {
        if self.file_name.ends_with('/') {
            return true;
        }
        match self.host_system() {
            host::UNIX | host::OSX => {
                (self.external_attrs >> 16) & mode::S_IFMT == mode::S_IFDIR
            }
            host::MSDOS | host::NTFS | host::VFAT => self.external_attrs & mode::MSDOS_DIR != 0,
            _ => false,
        }
    }

    /// Stored name without trailing separators
    pub fn canonical_name(&self) -> &[u8] {
        let end = self
            .file_name_raw
            .iter()
            .rposition(|&b| b != b'/')
            .map_or(0, |i| i + 1);
        &self.file_name_raw[..end]
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }
}

/// External attributes with every directory marker removed.
///
/// A Unix directory type becomes a regular file (permission bits are kept);
/// the MS-DOS directory attribute is dropped.
pub fn file_external_attrs(version_made_by: u16, external_attrs: u32) -> u32 {
    let mut attrs = external_attrs & !mode::MSDOS_DIR;
    let host_system = (version_made_by >> 8) as u8;
    if matches!(host_system, host::UNIX | host::OSX) {
        let unix = attrs >> 16;
        if unix & mode::S_IFMT == mode::S_IFDIR {
            let unix = (unix & !mode::S_IFMT) | mode::S_IFREG;
            attrs = (unix << 16) | (attrs & 0xFFFF);
        }
    }
    attrs
}

/// External attributes for a directory we write ourselves
pub fn directory_external_attrs() -> u32 {
    ((mode::S_IFDIR | mode::DIR_PERMISSIONS) << 16) | mode::MSDOS_DIR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, version_made_by: u16, external_attrs: u32) -> ZipFileEntry {
        ZipFileEntry {
            file_name: name.to_string(),
            file_name_raw: name.as_bytes().to_vec(),
            version_made_by,
            flags: 0,
            compression_method: CompressionMethod::Stored,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: DOS_EPOCH_DATE,
            external_attrs,
            extra_field: Vec::new(),
            comment: Vec::new(),
        }
    }

    #[test]
    fn trailing_slash_is_directory() {
        assert!(entry("META-INF/", 20, 0).is_dir());
        assert!(!entry("META-INF/MANIFEST.MF", 20, 0).is_dir());
    }

    #[test]
    fn canonical_name_strips_every_trailing_slash() {
        assert_eq!(entry("a/b//", 20, 0).canonical_name(), b"a/b");
        assert_eq!(entry("a.txt", 20, 0).canonical_name(), b"a.txt");
        assert_eq!(entry("/", 20, 0).canonical_name(), b"");
    }

    #[test]
    fn unix_mode_marks_directory() {
        let attrs = (mode::S_IFDIR | 0o755) << 16;
        assert!(entry("Foo.class", VERSION_MADE_BY_UNIX, attrs).is_dir());

        let attrs = (mode::S_IFREG | 0o644) << 16;
        assert!(!entry("Foo.class", VERSION_MADE_BY_UNIX, attrs).is_dir());
    }

    #[test]
    fn msdos_attribute_marks_directory() {
        assert!(entry("lib", 20, mode::MSDOS_DIR).is_dir());
        let ntfs = ((host::NTFS as u16) << 8) | 20;
        assert!(entry("lib", ntfs, mode::MSDOS_DIR).is_dir());
        // Unix hosts ignore the DOS byte
        assert!(!entry("lib", VERSION_MADE_BY_UNIX, mode::MSDOS_DIR).is_dir());
    }

    #[test]
    fn file_attrs_drop_directory_markers() {
        let attrs = directory_external_attrs();
        let cleared = file_external_attrs(VERSION_MADE_BY_UNIX, attrs);
        assert_eq!(cleared >> 16, mode::S_IFREG | 0o755);
        assert_eq!(cleared & mode::MSDOS_DIR, 0);

        let regular = (mode::S_IFREG | 0o644) << 16;
        assert_eq!(file_external_attrs(VERSION_MADE_BY_UNIX, regular), regular);
    }

    #[test]
    fn dos_epoch_decodes() {
        let e = entry("a", 20, 0);
        assert_eq!(e.mod_date(), (1980, 1, 1));
        assert_eq!(e.mod_time(), (0, 0, 0));
    }

    #[test]
    fn eocd_serializes_back() {
        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 3,
            total_entries: 3,
            cd_size: 150,
            cd_offset: 1024,
            comment_len: 0,
        };
        let mut buf = Vec::new();
        eocd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), EndOfCentralDirectory::SIZE);

        let parsed = EndOfCentralDirectory::from_bytes(&buf).unwrap();
        assert_eq!(parsed.total_entries, 3);
        assert_eq!(parsed.cd_offset, 1024);
        assert!(!parsed.is_zip64());
    }
}
