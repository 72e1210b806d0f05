//! ZIP archive reader used to verify streamed archives
//!
//! Reads the central directory of any `Read + Seek` source (an in-memory
//! response body, a downloaded file) and extracts entries with CRC-32
//! verification.

use crate::error::{Result, ZipStreamError};
use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use std::io::{Cursor, Read, Seek, SeekFrom};

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub offset: u64,
    pub dos_time: u16,
    pub dos_date: u16,
}

/// ZIP archive reader
pub struct ZipArchiveReader<R: Read + Seek> {
    source: R,
    entries: Vec<ZipEntry>,
}

impl ZipArchiveReader<Cursor<Vec<u8>>> {
    /// Open an archive held entirely in memory
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new(Cursor::new(bytes.into()))
    }
}

impl<R: Read + Seek> ZipArchiveReader<R> {
    /// Read the central directory of `source`
    pub fn new(mut source: R) -> Result<Self> {
        let entries = read_central_directory(&mut source)?;
        Ok(Self { source, entries })
    }

    /// Get list of all entries in the ZIP
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Entry names in central directory order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry's decompressed data, verifying its CRC-32
    pub fn read_entry(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        self.source.seek(SeekFrom::Start(entry.offset))?;

        let signature = read_u32_le(&mut self.source)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ZipStreamError::InvalidFormat(
                "Invalid local file header signature".to_string(),
            ));
        }

        // version, flags, method, time, date, crc, sizes
        self.source.seek(SeekFrom::Current(22))?;
        let filename_len = read_u16_le(&mut self.source)? as i64;
        let extra_len = read_u16_le(&mut self.source)? as i64;
        self.source
            .seek(SeekFrom::Current(filename_len + extra_len))?;

        let mut compressed_data = vec![0u8; entry.compressed_size as usize];
        self.source.read_exact(&mut compressed_data)?;

        let data = match entry.compression_method {
            0 => compressed_data,
            8 => {
                let mut decoder = DeflateDecoder::new(&compressed_data[..]);
                let mut decompressed = Vec::with_capacity(entry.uncompressed_size as usize);
                decoder.read_to_end(&mut decompressed)?;
                decompressed
            }
            other => return Err(ZipStreamError::UnsupportedCompression(other)),
        };

        let mut crc = Crc32::new();
        crc.update(&data);
        let actual = crc.finalize();
        if actual != entry.crc32 {
            return Err(ZipStreamError::InvalidFormat(format!(
                "CRC mismatch for {}: expected 0x{:08x}, got 0x{:08x}",
                entry.name, entry.crc32, actual
            )));
        }
        if data.len() as u64 != entry.uncompressed_size {
            return Err(ZipStreamError::InvalidFormat(format!(
                "Size mismatch for {}: expected {}, got {}",
                entry.name,
                entry.uncompressed_size,
                data.len()
            )));
        }

        Ok(data)
    }

    /// Read an entry by name
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ZipStreamError::EntryNotFound(name.to_string()))?
            .clone();

        self.read_entry(&entry)
    }
}

fn read_central_directory<R: Read + Seek>(source: &mut R) -> Result<Vec<ZipEntry>> {
    let eocd_offset = find_eocd(source)?;
    source.seek(SeekFrom::Start(eocd_offset + 4))?;

    // Skip disk number fields
    source.seek(SeekFrom::Current(4))?;
    let _entries_on_disk = read_u16_le(source)?;
    let total_entries_16 = read_u16_le(source)?;
    let cd_size_32 = read_u32_le(source)?;
    let cd_offset_32 = read_u32_le(source)?;

    let mut total_entries = total_entries_16 as u64;
    let mut cd_offset = cd_offset_32 as u64;

    if total_entries_16 == 0xFFFF || cd_size_32 == 0xFFFFFFFF || cd_offset_32 == 0xFFFFFFFF {
        let (zip64_entries, zip64_offset) = read_zip64_eocd(source, eocd_offset)?;
        total_entries = zip64_entries;
        cd_offset = zip64_offset;
    }

    source.seek(SeekFrom::Start(cd_offset))?;

    let mut entries = Vec::with_capacity(total_entries.min(65_536) as usize);
    for _ in 0..total_entries {
        let signature = read_u32_le(source)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(ZipStreamError::InvalidFormat(format!(
                "Invalid central directory signature: 0x{:08x}",
                signature
            )));
        }

        // version made by, version needed, flags
        source.seek(SeekFrom::Current(6))?;
        let compression_method = read_u16_le(source)?;
        let dos_time = read_u16_le(source)?;
        let dos_date = read_u16_le(source)?;
        let crc32 = read_u32_le(source)?;
        let mut compressed_size = read_u32_le(source)? as u64;
        let mut uncompressed_size = read_u32_le(source)? as u64;
        let filename_len = read_u16_le(source)? as usize;
        let extra_len = read_u16_le(source)? as usize;
        let comment_len = read_u16_le(source)? as i64;

        // disk number, internal attributes, external attributes
        source.seek(SeekFrom::Current(8))?;
        let mut offset = read_u32_le(source)? as u64;

        let mut filename_buf = vec![0u8; filename_len];
        source.read_exact(&mut filename_buf)?;
        let name = String::from_utf8_lossy(&filename_buf).to_string();

        let mut extra_buf = vec![0u8; extra_len];
        source.read_exact(&mut extra_buf)?;
        source.seek(SeekFrom::Current(comment_len))?;

        // ZIP64 extended information: only the saturated fields are present, in order
        let mut pos = 0;
        while pos + 4 <= extra_buf.len() {
            let id = u16::from_le_bytes([extra_buf[pos], extra_buf[pos + 1]]);
            let size = u16::from_le_bytes([extra_buf[pos + 2], extra_buf[pos + 3]]) as usize;
            let data_start = pos + 4;
            let data_end = (data_start + size).min(extra_buf.len());
            if id == 0x0001 {
                let mut fields = extra_buf[data_start..data_end].chunks_exact(8).map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    u64::from_le_bytes(b)
                });
                if uncompressed_size == 0xFFFFFFFF {
                    uncompressed_size = fields.next().unwrap_or(uncompressed_size);
                }
                if compressed_size == 0xFFFFFFFF {
                    compressed_size = fields.next().unwrap_or(compressed_size);
                }
                if offset == 0xFFFFFFFF {
                    offset = fields.next().unwrap_or(offset);
                }
            }
            pos = data_start + size;
        }

        entries.push(ZipEntry {
            name,
            crc32,
            compressed_size,
            uncompressed_size,
            compression_method,
            offset,
            dos_time,
            dos_date,
        });
    }

    Ok(entries)
}

/// Returns `(total_entries, central_directory_offset)` from the ZIP64 EOCD record
fn read_zip64_eocd<R: Read + Seek>(source: &mut R, eocd_offset: u64) -> Result<(u64, u64)> {
    if eocd_offset < 20 {
        return Err(ZipStreamError::InvalidFormat(
            "ZIP64 locator missing".to_string(),
        ));
    }
    source.seek(SeekFrom::Start(eocd_offset - 20))?;
    if read_u32_le(source)? != ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE {
        return Err(ZipStreamError::InvalidFormat(
            "ZIP64 locator signature not found".to_string(),
        ));
    }
    source.seek(SeekFrom::Current(4))?;
    let zip64_eocd_offset = read_u64_le(source)?;

    source.seek(SeekFrom::Start(zip64_eocd_offset))?;
    if read_u32_le(source)? != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ZipStreamError::InvalidFormat(
            "Invalid ZIP64 end of central directory signature".to_string(),
        ));
    }
    // record size, versions, disk numbers, entries on disk
    source.seek(SeekFrom::Current(8 + 4 + 8 + 8))?;
    let total_entries = read_u64_le(source)?;
    let _cd_size = read_u64_le(source)?;
    let cd_offset = read_u64_le(source)?;

    Ok((total_entries, cd_offset))
}

/// Find the end of central directory record by scanning from the end
fn find_eocd<R: Read + Seek>(source: &mut R) -> Result<u64> {
    let size = source.seek(SeekFrom::End(0))?;

    // EOCD is at least 22 bytes, search last 65KB (max comment size + EOCD)
    let search_start = size.saturating_sub(65557);
    source.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    source.read_to_end(&mut buffer)?;

    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    if buffer.len() >= 22 {
        for i in (0..=buffer.len() - 22).rev() {
            if buffer[i..i + 4] == signature {
                return Ok(search_start + i as u64);
            }
        }
    }

    Err(ZipStreamError::InvalidFormat(
        "End of central directory not found".to_string(),
    ))
}

fn read_u16_le<R: Read>(source: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(source: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64_le<R: Read>(source: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
