//! Async streaming ZIP writer that compresses data on-the-fly into any sink
//!
//! The output only needs to implement [`AsyncWrite`]: offsets for the central
//! directory are tracked as a virtual position, so the writer can feed
//! non-seekable destinations such as an HTTP response body.
//!
//! Each entry is compressed into a small [`CompressedBuffer`] that is drained
//! to the output whenever it crosses its flush threshold, so memory use stays
//! bounded by one chunk plus the encoder window regardless of archive size.

use crate::error::{Result, ZipStreamError};
use async_compression::tokio::write::DeflateEncoder;
use chrono::{DateTime, Datelike, Timelike, Utc};
use crc32fast::Hasher as Crc32;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncWrite, AsyncWriteExt};

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Bit 3 (sizes in data descriptor) and bit 11 (UTF-8 names)
const GENERAL_PURPOSE_FLAGS: u16 = 0x0008 | 0x0800;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;

const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// Default compressed-buffer size before it is drained to the output
pub const DEFAULT_FLUSH_THRESHOLD: usize = 16 * 1024;

/// Compression method to use for ZIP entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression (stored)
    Stored,
    /// DEFLATE compression (most common)
    Deflate,
}

impl CompressionMethod {
    pub(crate) fn to_zip_method(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// Entry already written, kept for the central directory
struct ZipEntry {
    name: String,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    compression_method: u16,
    dos_time: u16,
    dos_date: u16,
    zip64: bool,
}

/// Async streaming ZIP writer that compresses data on-the-fly
pub struct AsyncStreamingZipWriter<W: AsyncWrite + Unpin> {
    output: W,
    position: u64,
    entries: Vec<ZipEntry>,
    current_entry: Option<CurrentEntry>,
    compression_level: u32,
    compression_method: CompressionMethod,
}

struct CurrentEntry {
    name: String,
    local_header_offset: u64,
    encoder: Box<dyn AsyncCompressorWrite>,
    counter: CrcCounter,
    compression_method: u16,
    dos_time: u16,
    dos_date: u16,
    zip64: bool,
}

/// Trait for async compression encoders
trait AsyncCompressorWrite: AsyncWrite + Unpin + Send {
    fn finish_compression(
        self: Box<Self>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<CompressedBuffer>> + Send>>;
    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer;
}

struct DeflateCompressor {
    encoder: DeflateEncoder<CompressedBuffer>,
}

impl AsyncWrite for DeflateCompressor {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.encoder).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.encoder).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.encoder).poll_shutdown(cx)
    }
}

impl AsyncCompressorWrite for DeflateCompressor {
    fn finish_compression(
        mut self: Box<Self>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<CompressedBuffer>> + Send>> {
        Box::pin(async move {
            self.encoder.shutdown().await?;
            Ok(self.encoder.into_inner())
        })
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        self.encoder.get_mut()
    }
}

/// Pass-through "encoder" for stored entries
struct StoredCompressor {
    buffer: CompressedBuffer,
}

impl AsyncWrite for StoredCompressor {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.buffer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.buffer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.buffer).poll_shutdown(cx)
    }
}

impl AsyncCompressorWrite for StoredCompressor {
    fn finish_compression(
        self: Box<Self>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<CompressedBuffer>> + Send>> {
        Box::pin(async move { Ok(self.buffer) })
    }

    fn get_buffer_mut(&mut self) -> &mut CompressedBuffer {
        &mut self.buffer
    }
}

/// CRC and byte counts for the entry being written
struct CrcCounter {
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
}

impl CrcCounter {
    fn new() -> Self {
        Self {
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
        }
    }

    fn update_uncompressed(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.uncompressed_count += data.len() as u64;
    }

    fn add_compressed(&mut self, count: u64) {
        self.compressed_count += count;
    }

    fn finalize(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

/// Buffer for compressed data with a drain threshold
pub struct CompressedBuffer {
    buffer: Vec<u8>,
    flush_threshold: usize,
}

impl CompressedBuffer {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(DEFAULT_FLUSH_THRESHOLD),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }
}

impl AsyncWrite for CompressedBuffer {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncStreamingZipWriter<W> {
    /// Create a new async ZIP writer from an arbitrary writer with default compression level (6) using DEFLATE
    pub fn from_writer(writer: W) -> Self {
        Self::from_writer_with_compression(writer, 6)
    }

    /// Create a new async ZIP writer from an arbitrary writer with custom compression level (0-9)
    pub fn from_writer_with_compression(writer: W, compression_level: u32) -> Self {
        Self::from_writer_with_method(writer, CompressionMethod::Deflate, compression_level)
    }

    /// Create a new async ZIP writer from an arbitrary writer with specified compression method and level
    ///
    /// # Arguments
    /// * `writer` - Any writer implementing AsyncWrite + Unpin; it is never seeked
    /// * `method` - Compression method to use (Deflate or Stored)
    /// * `compression_level` - Compression level (0-9, ignored for Stored)
    pub fn from_writer_with_method(
        writer: W,
        method: CompressionMethod,
        compression_level: u32,
    ) -> Self {
        Self {
            output: writer,
            position: 0,
            entries: Vec::new(),
            current_entry: None,
            compression_level,
            compression_method: method,
        }
    }

    /// Total bytes handed to the output so far
    pub fn bytes_written(&self) -> u64 {
        self.position
    }

    /// Number of entries completed so far
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Start a new entry (file) in the ZIP stamped with the current time
    pub async fn start_entry(&mut self, name: &str) -> Result<()> {
        self.start_entry_with_time(name, SystemTime::now()).await
    }

    /// Start a new entry (file) in the ZIP with an explicit modification time
    pub async fn start_entry_with_time(&mut self, name: &str, modified: SystemTime) -> Result<()> {
        self.begin_entry(name, modified, false).await
    }

    /// Start a new entry whose expected uncompressed size is known up front.
    ///
    /// Entries that may reach 4 GiB get a ZIP64 local header, so streaming
    /// readers expect the 64-bit data descriptor that follows them.
    pub async fn start_entry_with_size_hint(
        &mut self,
        name: &str,
        modified: SystemTime,
        size_hint: u64,
    ) -> Result<()> {
        self.begin_entry(name, modified, may_need_zip64(size_hint))
            .await
    }

    async fn begin_entry(&mut self, name: &str, modified: SystemTime, zip64: bool) -> Result<()> {
        // Finish previous entry if any
        self.finish_current_entry().await?;

        if name.len() > u16::MAX as usize {
            return Err(ZipStreamError::InvalidFormat(format!(
                "Entry name too long ({} bytes)",
                name.len()
            )));
        }

        let local_header_offset = self.position;
        let compression_method = self.compression_method.to_zip_method();
        let (dos_time, dos_date) = dos_datetime(modified);

        // Sizes live in the data descriptor; a ZIP64 header marks them 0xFFFFFFFF
        // and carries zeroed 64-bit sizes in its extra field.
        let (version_needed, size_placeholder, extra_field) = if zip64 {
            let mut extra = Vec::with_capacity(20);
            extra.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
            extra.extend_from_slice(&16u16.to_le_bytes());
            extra.extend_from_slice(&0u64.to_le_bytes()); // uncompressed size
            extra.extend_from_slice(&0u64.to_le_bytes()); // compressed size
            (VERSION_ZIP64, u32::MAX, extra)
        } else {
            (VERSION_DEFAULT, 0u32, Vec::new())
        };

        let mut header = Vec::with_capacity(30 + name.len() + extra_field.len());
        header.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        header.extend_from_slice(&version_needed.to_le_bytes());
        header.extend_from_slice(&GENERAL_PURPOSE_FLAGS.to_le_bytes());
        header.extend_from_slice(&compression_method.to_le_bytes());
        header.extend_from_slice(&dos_time.to_le_bytes());
        header.extend_from_slice(&dos_date.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // crc32 placeholder
        header.extend_from_slice(&size_placeholder.to_le_bytes()); // compressed size
        header.extend_from_slice(&size_placeholder.to_le_bytes()); // uncompressed size
        header.extend_from_slice(&(name.len() as u16).to_le_bytes());
        header.extend_from_slice(&(extra_field.len() as u16).to_le_bytes());
        header.extend_from_slice(name.as_bytes());
        header.extend_from_slice(&extra_field);
        self.write_out(&header).await?;

        let encoder: Box<dyn AsyncCompressorWrite> = match self.compression_method {
            CompressionMethod::Deflate => Box::new(DeflateCompressor {
                encoder: DeflateEncoder::with_quality(
                    CompressedBuffer::new(),
                    deflate_level(self.compression_level),
                ),
            }),
            CompressionMethod::Stored => Box::new(StoredCompressor {
                buffer: CompressedBuffer::new(),
            }),
        };

        self.current_entry = Some(CurrentEntry {
            name: name.to_string(),
            local_header_offset,
            encoder,
            counter: CrcCounter::new(),
            compression_method,
            dos_time,
            dos_date,
            zip64,
        });

        Ok(())
    }

    /// Write uncompressed data to current entry (will be compressed on-the-fly)
    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let entry = self
            .current_entry
            .as_mut()
            .ok_or_else(|| ZipStreamError::InvalidFormat("No entry started".to_string()))?;

        entry.counter.update_uncompressed(data);
        entry.encoder.write_all(data).await?;

        // Drain compressed bytes as soon as a chunk's worth is ready
        let buffer = entry.encoder.get_buffer_mut();
        if buffer.should_flush() {
            let compressed_data = buffer.take();
            entry.counter.add_compressed(compressed_data.len() as u64);
            self.output.write_all(&compressed_data).await?;
            self.position += compressed_data.len() as u64;
        }

        Ok(())
    }

    /// Finish current entry and write data descriptor
    async fn finish_current_entry(&mut self) -> Result<()> {
        if let Some(mut entry) = self.current_entry.take() {
            let mut buffer = entry.encoder.finish_compression().await?;

            let remaining_data = buffer.take();
            if !remaining_data.is_empty() {
                self.write_out(&remaining_data).await?;
                entry.counter.add_compressed(remaining_data.len() as u64);
            }

            let crc = entry.counter.finalize();
            let compressed_size = entry.counter.compressed_count;
            let uncompressed_size = entry.counter.uncompressed_count;

            let mut descriptor = Vec::with_capacity(24);
            descriptor.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
            descriptor.extend_from_slice(&crc.to_le_bytes());
            // ZIP64 data descriptor carries 64-bit sizes
            if entry.zip64 || exceeds_u32(compressed_size) || exceeds_u32(uncompressed_size) {
                descriptor.extend_from_slice(&compressed_size.to_le_bytes());
                descriptor.extend_from_slice(&uncompressed_size.to_le_bytes());
            } else {
                descriptor.extend_from_slice(&(compressed_size as u32).to_le_bytes());
                descriptor.extend_from_slice(&(uncompressed_size as u32).to_le_bytes());
            }
            self.write_out(&descriptor).await?;

            self.entries.push(ZipEntry {
                name: entry.name,
                local_header_offset: entry.local_header_offset,
                crc32: crc,
                compressed_size,
                uncompressed_size,
                compression_method: entry.compression_method,
                dos_time: entry.dos_time,
                dos_date: entry.dos_date,
                zip64: entry.zip64,
            });
        }
        Ok(())
    }

    /// Finish ZIP file: write central directory, shut the output down and return it
    pub async fn finish(self) -> Result<W> {
        self.finish_counted().await.map(|(output, _)| output)
    }

    /// Like [`finish`](Self::finish), also returning the total archive size in bytes
    pub async fn finish_counted(mut self) -> Result<(W, u64)> {
        self.finish_current_entry().await?;

        let central_dir_offset = self.position;

        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            let record = central_directory_record(entry);
            self.write_out(&record).await?;
        }

        let central_dir_size = self.position - central_dir_offset;

        let need_zip64 = entries.len() >= u16::MAX as usize
            || exceeds_u32(central_dir_size)
            || exceeds_u32(central_dir_offset);

        let mut trailer = Vec::with_capacity(98);
        if need_zip64 {
            let zip64_eocd_pos = central_dir_offset + central_dir_size;

            // ZIP64 End of Central Directory Record
            trailer.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
            trailer.extend_from_slice(&44u64.to_le_bytes()); // size of remaining record
            trailer.extend_from_slice(&VERSION_ZIP64.to_le_bytes()); // version made by
            trailer.extend_from_slice(&VERSION_ZIP64.to_le_bytes()); // version needed
            trailer.extend_from_slice(&0u32.to_le_bytes()); // this disk
            trailer.extend_from_slice(&0u32.to_le_bytes()); // disk with central dir
            trailer.extend_from_slice(&(entries.len() as u64).to_le_bytes());
            trailer.extend_from_slice(&(entries.len() as u64).to_le_bytes());
            trailer.extend_from_slice(&central_dir_size.to_le_bytes());
            trailer.extend_from_slice(&central_dir_offset.to_le_bytes());

            // ZIP64 EOCD locator
            trailer
                .extend_from_slice(&ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE.to_le_bytes());
            trailer.extend_from_slice(&0u32.to_le_bytes());
            trailer.extend_from_slice(&zip64_eocd_pos.to_le_bytes());
            trailer.extend_from_slice(&1u32.to_le_bytes()); // total disks
        }

        // Classic end of central directory, saturated when ZIP64 is in use
        let entry_count = entries.len().min(u16::MAX as usize) as u16;
        trailer.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        trailer.extend_from_slice(&0u16.to_le_bytes()); // disk number
        trailer.extend_from_slice(&0u16.to_le_bytes()); // disk with central dir
        trailer.extend_from_slice(&entry_count.to_le_bytes());
        trailer.extend_from_slice(&entry_count.to_le_bytes());
        trailer.extend_from_slice(&saturate_u32(central_dir_size).to_le_bytes());
        trailer.extend_from_slice(&saturate_u32(central_dir_offset).to_le_bytes());
        trailer.extend_from_slice(&0u16.to_le_bytes()); // comment len
        self.write_out(&trailer).await?;
        self.entries = entries;

        // shutdown() is what tells a channel-backed sink the stream is complete
        self.output.flush().await?;
        self.output.shutdown().await?;

        Ok((self.output, self.position))
    }

    async fn write_out(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(bytes).await?;
        self.position += bytes.len() as u64;
        Ok(())
    }
}

/// Whether a size or offset needs its ZIP64 form; 0xFFFFFFFF itself is the marker
fn exceeds_u32(value: u64) -> bool {
    value >= u32::MAX as u64
}

/// Deflate can grow incompressible input a little, so leave headroom below 4 GiB
fn may_need_zip64(size_hint: u64) -> bool {
    exceeds_u32(size_hint.saturating_add(size_hint / 1024 + 1024))
}

/// Deflate levels map one to one, 0 (no compression) through 9 (best)
fn deflate_level(level: u32) -> async_compression::Level {
    async_compression::Level::Precise(level.min(9) as i32)
}

fn saturate_u32(value: u64) -> u32 {
    if exceeds_u32(value) {
        u32::MAX
    } else {
        value as u32
    }
}

fn central_directory_record(entry: &ZipEntry) -> Vec<u8> {
    // ZIP64 extra field, holding only the values that overflow
    let mut zip64_data: Vec<u8> = Vec::new();
    if exceeds_u32(entry.uncompressed_size) {
        zip64_data.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
    }
    if exceeds_u32(entry.compressed_size) {
        zip64_data.extend_from_slice(&entry.compressed_size.to_le_bytes());
    }
    if exceeds_u32(entry.local_header_offset) {
        zip64_data.extend_from_slice(&entry.local_header_offset.to_le_bytes());
    }
    let mut extra_field: Vec<u8> = Vec::new();
    if !zip64_data.is_empty() {
        extra_field.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
        extra_field.extend_from_slice(&(zip64_data.len() as u16).to_le_bytes());
        extra_field.extend_from_slice(&zip64_data);
    }
    let version_needed = if entry.zip64 || !extra_field.is_empty() {
        VERSION_ZIP64
    } else {
        VERSION_DEFAULT
    };

    let mut record = Vec::with_capacity(46 + entry.name.len() + extra_field.len());
    record.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
    record.extend_from_slice(&version_needed.to_le_bytes()); // version made by
    record.extend_from_slice(&version_needed.to_le_bytes()); // version needed
    record.extend_from_slice(&GENERAL_PURPOSE_FLAGS.to_le_bytes());
    record.extend_from_slice(&entry.compression_method.to_le_bytes());
    record.extend_from_slice(&entry.dos_time.to_le_bytes());
    record.extend_from_slice(&entry.dos_date.to_le_bytes());
    record.extend_from_slice(&entry.crc32.to_le_bytes());
    record.extend_from_slice(&saturate_u32(entry.compressed_size).to_le_bytes());
    record.extend_from_slice(&saturate_u32(entry.uncompressed_size).to_le_bytes());
    record.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
    record.extend_from_slice(&(extra_field.len() as u16).to_le_bytes());
    record.extend_from_slice(&0u16.to_le_bytes()); // file comment len
    record.extend_from_slice(&0u16.to_le_bytes()); // disk number start
    record.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
    record.extend_from_slice(&0u32.to_le_bytes()); // external attrs
    record.extend_from_slice(&saturate_u32(entry.local_header_offset).to_le_bytes());
    record.extend_from_slice(entry.name.as_bytes());
    record.extend_from_slice(&extra_field);
    record
}

/// Convert a timestamp to MS-DOS `(time, date)`, in UTC.
///
/// DOS dates cover 1980-01-01 to 2107-12-31; anything outside is clamped.
pub(crate) fn dos_datetime(time: SystemTime) -> (u16, u16) {
    const EARLIEST: (u16, u16) = (0, (1 << 5) | 1);
    const LATEST: (u16, u16) = ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);

    let secs = match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_secs()).map_or(i64::MIN, |s| -s),
    };
    let Some(utc) = DateTime::<Utc>::from_timestamp(secs, 0) else {
        return if secs < 0 { EARLIEST } else { LATEST };
    };

    match utc.year() {
        year if year < 1980 => EARLIEST,
        year if year > 2107 => LATEST,
        year => {
            let dos_time = (utc.hour() << 11) | (utc.minute() << 5) | (utc.second() / 2);
            let dos_date = (((year - 1980) as u32) << 9) | (utc.month() << 5) | utc.day();
            (dos_time as u16, dos_date as u16)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_dos_datetime_known_value() {
        // 2000-01-01 12:30:10 UTC
        let t = UNIX_EPOCH + Duration::from_secs(946_729_810);
        let (time, date) = dos_datetime(t);
        assert_eq!(date, (20 << 9) | (1 << 5) | 1);
        assert_eq!(time, (12 << 11) | (30 << 5) | 5);
    }

    #[test]
    fn test_dos_datetime_clamps_before_1980() {
        let (time, date) = dos_datetime(UNIX_EPOCH);
        assert_eq!(time, 0);
        assert_eq!(date, (1 << 5) | 1);
    }

    #[test]
    fn test_dos_datetime_leap_day() {
        // 2024-02-29 23:59:59 UTC
        let t = UNIX_EPOCH + Duration::from_secs(1_709_251_199);
        let (time, date) = dos_datetime(t);
        assert_eq!(date, (44 << 9) | (2 << 5) | 29);
        assert_eq!(time, (23 << 11) | (59 << 5) | 29);
    }

    #[test]
    fn test_dos_datetime_clamps_after_2107() {
        // 2200-01-01 00:00:00 UTC
        let t = UNIX_EPOCH + Duration::from_secs(7_258_118_400);
        let (time, date) = dos_datetime(t);
        assert_eq!(date, (127 << 9) | (12 << 5) | 31);
        assert_eq!(time, (23 << 11) | (59 << 5) | 29);
    }

    #[test]
    fn test_zip64_threshold_includes_marker_value() {
        assert!(!exceeds_u32(u32::MAX as u64 - 1));
        assert!(exceeds_u32(u32::MAX as u64));
        assert!(!may_need_zip64(1024 * 1024 * 1024));
        assert!(may_need_zip64(u32::MAX as u64 - 1));
    }

    #[test]
    fn test_deflate_levels_map_one_to_one() {
        for level in 0..=9u32 {
            assert!(matches!(
                deflate_level(level),
                async_compression::Level::Precise(l) if l == level as i32
            ));
        }
        assert!(matches!(deflate_level(42), async_compression::Level::Precise(9)));
    }

    #[tokio::test]
    async fn test_large_size_hint_writes_zip64_local_header() {
        let name = "huge.bin";
        let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
        writer
            .start_entry_with_size_hint(name, SystemTime::now(), 5 * 1024 * 1024 * 1024)
            .await
            .unwrap();
        writer.write_data(b"just a little").await.unwrap();
        let output = writer.finish().await.unwrap();

        let u16_at = |pos: usize| u16::from_le_bytes([output[pos], output[pos + 1]]);
        let u32_at = |pos: usize| {
            u32::from_le_bytes([output[pos], output[pos + 1], output[pos + 2], output[pos + 3]])
        };
        assert_eq!(u16_at(4), VERSION_ZIP64);
        assert_eq!(u32_at(18), u32::MAX);
        assert_eq!(u32_at(22), u32::MAX);
        assert_eq!(u16_at(28), 20);
        assert_eq!(u16_at(30 + name.len()), ZIP64_EXTRA_FIELD_ID);
        assert_eq!(u16_at(32 + name.len()), 16);

        // 64-bit descriptor: signature, crc, two u64 sizes right before the central directory
        let cd_pos = output
            .windows(4)
            .rposition(|w| w == CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())
            .unwrap();
        let descriptor = &output[cd_pos - 24..cd_pos];
        assert_eq!(&descriptor[..4], &DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        let uncompressed = u64::from_le_bytes(descriptor[16..24].try_into().unwrap());
        assert_eq!(uncompressed, b"just a little".len() as u64);

        let mut reader = crate::reader::ZipArchiveReader::from_bytes(output).unwrap();
        assert_eq!(reader.read_entry_by_name(name).unwrap(), b"just a little");
    }

    #[tokio::test]
    async fn test_small_size_hint_keeps_classic_header() {
        let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
        writer
            .start_entry_with_size_hint("small.txt", SystemTime::now(), 5)
            .await
            .unwrap();
        writer.write_data(b"small").await.unwrap();
        let output = writer.finish().await.unwrap();
        assert_eq!(u16::from_le_bytes([output[4], output[5]]), VERSION_DEFAULT);
        assert_eq!(u16::from_le_bytes([output[28], output[29]]), 0);
    }

    #[test]
    fn test_saturate_u32() {
        assert_eq!(saturate_u32(10), 10);
        assert_eq!(saturate_u32(u32::MAX as u64), u32::MAX);
        assert_eq!(saturate_u32(u64::MAX), u32::MAX);
    }

    #[tokio::test]
    async fn test_write_data_without_entry_fails() {
        let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
        let err = writer.write_data(b"orphan").await.unwrap_err();
        assert!(matches!(err, ZipStreamError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn test_position_tracks_output_length() {
        let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
        writer.start_entry("a.txt").await.unwrap();
        writer.write_data(b"hello").await.unwrap();
        let reported_before_finish = writer.bytes_written();
        assert!(reported_before_finish >= 30 + 5);

        let output = writer.finish().await.unwrap();
        assert_eq!(&output[..4], &LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
    }
}
