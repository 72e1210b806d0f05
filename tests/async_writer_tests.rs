//! Tests for the async ZIP writer over non-seekable outputs

use std::time::{Duration, UNIX_EPOCH};
use tokio::io::AsyncReadExt;
use zipstream::{AsyncStreamingZipWriter, CompressionMethod, Result, ZipArchiveReader};

#[tokio::test]
async fn test_async_writer_basic() -> Result<()> {
    let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
    writer.start_entry("test.txt").await?;
    writer.write_data(b"Hello, async!").await?;
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    assert_eq!(reader.entries().len(), 1);
    assert_eq!(reader.entries()[0].name, "test.txt");
    assert_eq!(reader.read_entry_by_name("test.txt")?, b"Hello, async!");

    Ok(())
}

#[tokio::test]
async fn test_async_writer_multiple_entries() -> Result<()> {
    let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());

    writer.start_entry("file1.txt").await?;
    writer.write_data(b"First file").await?;

    writer.start_entry("dir/file2.txt").await?;
    writer.write_data(b"Second file").await?;

    writer.start_entry("dir/nested/file3.txt").await?;
    writer.write_data(b"Third file").await?;

    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    assert_eq!(
        reader.names(),
        vec!["file1.txt", "dir/file2.txt", "dir/nested/file3.txt"]
    );
    assert_eq!(reader.read_entry_by_name("file1.txt")?, b"First file");
    assert_eq!(reader.read_entry_by_name("dir/file2.txt")?, b"Second file");
    assert_eq!(reader.read_entry_by_name("dir/nested/file3.txt")?, b"Third file");

    Ok(())
}

#[tokio::test]
async fn test_async_writer_large_data() -> Result<()> {
    // 2MB forces several drains of the compressed buffer
    let large_data: Vec<u8> = (0..2 * 1024 * 1024u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
        .collect();

    let mut writer = AsyncStreamingZipWriter::from_writer_with_compression(Vec::new(), 9);
    writer.start_entry("large.bin").await?;
    for chunk in large_data.chunks(64 * 1024) {
        writer.write_data(chunk).await?;
    }
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    let data = reader.read_entry_by_name("large.bin")?;
    assert_eq!(data.len(), large_data.len());
    assert_eq!(data, large_data);

    Ok(())
}

#[tokio::test]
async fn test_async_writer_multiple_writes() -> Result<()> {
    let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
    writer.start_entry("chunks.txt").await?;
    writer.write_data(b"Chunk 1\n").await?;
    writer.write_data(b"Chunk 2\n").await?;
    writer.write_data(b"Chunk 3\n").await?;
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    assert_eq!(
        reader.read_entry_by_name("chunks.txt")?,
        b"Chunk 1\nChunk 2\nChunk 3\n"
    );

    Ok(())
}

#[tokio::test]
async fn test_async_writer_streaming_from_file() -> Result<()> {
    let source_file = tempfile::NamedTempFile::new().unwrap();
    let source_data = b"This is source data that will be streamed";
    std::fs::write(source_file.path(), source_data).unwrap();

    let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
    writer.start_entry("streamed.txt").await?;

    let mut file = tokio::fs::File::open(source_file.path()).await?;
    let mut buffer = vec![0u8; 8192];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write_data(&buffer[..n]).await?;
    }
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    assert_eq!(reader.read_entry_by_name("streamed.txt")?, source_data);

    Ok(())
}

#[tokio::test]
async fn test_async_writer_max_compression_shrinks_text() -> Result<()> {
    let text = "Compress this text with maximum compression!".repeat(100);

    let mut writer = AsyncStreamingZipWriter::from_writer_with_compression(Vec::new(), 9);
    writer.start_entry("compressed.txt").await?;
    writer.write_data(text.as_bytes()).await?;
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    let entry = reader.find_entry("compressed.txt").unwrap().clone();
    assert_eq!(entry.compression_method, 8);
    assert!(entry.compressed_size < entry.uncompressed_size / 10);
    assert_eq!(reader.read_entry(&entry)?, text.as_bytes());

    Ok(())
}

#[tokio::test]
async fn test_async_writer_stored_method() -> Result<()> {
    let mut writer =
        AsyncStreamingZipWriter::from_writer_with_method(Vec::new(), CompressionMethod::Stored, 0);
    writer.start_entry("raw.bin").await?;
    writer.write_data(&[1, 2, 3, 4, 5]).await?;
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    let entry = reader.find_entry("raw.bin").unwrap().clone();
    assert_eq!(entry.compression_method, 0);
    assert_eq!(entry.compressed_size, 5);
    assert_eq!(reader.read_entry(&entry)?, vec![1, 2, 3, 4, 5]);

    Ok(())
}

#[tokio::test]
async fn test_async_writer_empty_file() -> Result<()> {
    let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
    writer.start_entry("empty.txt").await?;
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    assert_eq!(reader.read_entry_by_name("empty.txt")?.len(), 0);

    Ok(())
}

#[tokio::test]
async fn test_async_writer_no_entries_is_valid_archive() -> Result<()> {
    let writer = AsyncStreamingZipWriter::from_writer(Vec::new());
    let (bytes, size) = writer.finish_counted().await?;

    // Just the end of central directory record
    assert_eq!(bytes.len(), 22);
    assert_eq!(size, 22);
    let reader = ZipArchiveReader::from_bytes(bytes)?;
    assert!(reader.entries().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_async_writer_records_modification_time() -> Result<()> {
    // 2021-06-15 08:42:18 UTC
    let modified = UNIX_EPOCH + Duration::from_secs(1_623_746_538);

    let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
    writer.start_entry_with_time("dated.txt", modified).await?;
    writer.write_data(b"timestamped").await?;
    let bytes = writer.finish().await?;

    let reader = ZipArchiveReader::from_bytes(bytes)?;
    let entry = reader.find_entry("dated.txt").unwrap();
    assert_eq!(entry.dos_date, (41 << 9) | (6 << 5) | 15);
    assert_eq!(entry.dos_time, (8 << 11) | (42 << 5) | 9);

    Ok(())
}

#[tokio::test]
async fn test_async_writer_unicode_names() -> Result<()> {
    let mut writer = AsyncStreamingZipWriter::from_writer(Vec::new());
    writer.start_entry("données/été.txt").await?;
    writer.write_data(b"utf-8").await?;
    let bytes = writer.finish().await?;

    let mut reader = ZipArchiveReader::from_bytes(bytes)?;
    assert_eq!(reader.read_entry_by_name("données/été.txt")?, b"utf-8");

    Ok(())
}
