//! # zipstream: stream a directory as a ZIP download
//!
//! `zipstream` serves one directory as a ZIP archive that is built on demand
//! and streamed straight into the HTTP response body. Nothing is buffered
//! whole: files are read in chunks, compressed on-the-fly and handed to the
//! client as soon as the compressed bytes exist.
//!
//! ## Features
//!
//! - **Streaming Write**: ZIP writer over any `AsyncWrite`, no seeking, no temp files
//! - **Backpressure**: a slow client slows the archive builder down
//! - **Early errors**: unreadable sources are reported as `500` before the body starts
//! - **No silent truncation**: failures after the body started abort the connection
//! - **Per-request state**: every download owns its archive builder
//!
//! ## Quick Start
//!
//! ### Building an archive into any writer
//!
//! ```no_run
//! use zipstream::{ArchiveRequest, ArchiveState};
//!
//! # async fn example() -> zipstream::Result<()> {
//! let mut request = ArchiveRequest::new("./files");
//! let plan = request.plan().await?;
//!
//! let file = tokio::fs::File::create("files.zip").await?;
//! let report = request.stream_into(&plan, file).await?;
//!
//! assert_eq!(request.state(), ArchiveState::Completed);
//! println!("{} entries, {} bytes", report.entries, report.archive_bytes);
//! # Ok(())
//! # }
//! ```
//!
//! ### Serving it over HTTP
//!
//! ```no_run
//! use zipstream::{router, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let listener = tokio::net::TcpListener::bind(config.address()).await?;
//! axum::serve(listener, router(config)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading an archive back
//!
//! ```no_run
//! use zipstream::ZipArchiveReader;
//!
//! let bytes = std::fs::read("files.zip")?;
//! let mut reader = ZipArchiveReader::from_bytes(bytes)?;
//! for entry in reader.entries() {
//!     println!("{}: {} bytes", entry.name, entry.uncompressed_size);
//! }
//! let data = reader.read_entry_by_name("a.txt")?;
//! # Ok::<(), zipstream::ZipStreamError>(())
//! ```

pub mod config;
pub mod error;
pub mod reader;
pub mod server;
pub mod sink;
pub mod streamer;
pub mod writer;

pub use config::Config;
pub use error::{Result, ZipStreamError};
pub use reader::{ZipArchiveReader, ZipEntry};
pub use server::{router, stream_archive, ApiError, AppState};
pub use sink::{BodyStream, ResponseSink, SinkHandle};
pub use streamer::{
    ArchivePlan, ArchiveReport, ArchiveRequest, ArchiveState, PlannedEntry,
    MAX_COMPRESSION_LEVEL,
};
pub use writer::{AsyncStreamingZipWriter, CompressionMethod};
