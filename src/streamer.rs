//! Archive streamer: builds a ZIP of a directory straight into a byte sink.
//!
//! A build runs in two phases:
//!
//! 1. [`ArchivePlan::scan`] walks the source directory on the blocking pool,
//!    collects every regular file in a stable order and opens each one once to
//!    make sure it is readable. Nothing has been written yet, so a failure here
//!    can still be reported as a normal error response.
//! 2. [`ArchiveRequest::stream_into`] opens one file at a time, compresses it
//!    chunk by chunk into the sink and finally writes the central directory.
//!
//! Every request owns its own [`ArchiveRequest`]; the state machine
//! `Idle -> Building -> {Completed | Failed}` makes finalization explicit and
//! rejects a second completion.

use crate::error::{Result, ZipStreamError};
use crate::writer::AsyncStreamingZipWriter;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Deflate level used for downloads
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Lifecycle of one archive build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Idle,
    Building,
    Completed,
    Failed,
}

impl ArchiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveState::Idle => "idle",
            ArchiveState::Building => "building",
            ArchiveState::Completed => "completed",
            ArchiveState::Failed => "failed",
        }
    }

    /// Completed and Failed are terminal
    pub fn is_finalized(&self) -> bool {
        matches!(self, ArchiveState::Completed | ArchiveState::Failed)
    }

    fn can_transition_to(&self, next: ArchiveState) -> bool {
        matches!(
            (self, next),
            (ArchiveState::Idle, ArchiveState::Building)
                | (ArchiveState::Idle, ArchiveState::Failed)
                | (ArchiveState::Building, ArchiveState::Completed)
                | (ArchiveState::Building, ArchiveState::Failed)
        )
    }
}

impl std::fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file selected for the archive
#[derive(Debug, Clone)]
pub struct PlannedEntry {
    /// Absolute or root-relative path on disk
    pub path: PathBuf,
    /// Name inside the archive, `/`-separated, relative to the source root
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// Ordered list of files to archive
#[derive(Debug, Clone, Default)]
pub struct ArchivePlan {
    entries: Vec<PlannedEntry>,
}

impl ArchivePlan {
    /// Walk `root` recursively and check every file can be opened.
    pub async fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::scan_blocking(&root))
            .await
            .map_err(|e| ZipStreamError::Traversal(format!("scan task failed: {}", e)))?
    }

    fn scan_blocking(root: &Path) -> Result<Self> {
        let metadata = match std::fs::metadata(root) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ZipStreamError::SourceNotFound(root.to_path_buf()))
            }
            Err(e) => return Err(with_path(e, root).into()),
        };
        if !metadata.is_dir() {
            return Err(ZipStreamError::NotADirectory(root.to_path_buf()));
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name();

        for item in walker {
            let item = item?;
            let file_type = item.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                tracing::debug!(path = %item.path().display(), "skipping non-regular file");
                continue;
            }

            let metadata = item.metadata()?;
            // Readability preflight; the handle is closed right away
            std::fs::File::open(item.path()).map_err(|e| with_path(e, item.path()))?;

            entries.push(PlannedEntry {
                path: item.path().to_path_buf(),
                name: entry_name(root, item.path())?,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PlannedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of file sizes as seen during the scan
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Archive name for `path` relative to `root`
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        ZipStreamError::Traversal(format!(
            "{} is outside {}",
            path.display(),
            root.display()
        ))
    })?;

    // Names are stored as UTF-8; a lossy conversion could merge distinct files
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            let part = part.to_str().ok_or_else(|| {
                ZipStreamError::Traversal(format!(
                    "{} is not valid UTF-8 and cannot be named in the archive",
                    path.display()
                ))
            })?;
            parts.push(part);
        }
    }

    if parts.is_empty() {
        return Err(ZipStreamError::Traversal(format!(
            "{} has no name relative to {}",
            path.display(),
            root.display()
        )));
    }
    Ok(parts.join("/"))
}

fn with_path(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", path.display(), err))
}

/// Summary of a completed build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveReport {
    pub entries: usize,
    pub uncompressed_bytes: u64,
    pub archive_bytes: u64,
}

/// "Produce an archive of this directory into that sink", for one request
#[derive(Debug)]
pub struct ArchiveRequest {
    source_dir: PathBuf,
    compression_level: u32,
    state: ArchiveState,
    cancel: CancellationToken,
}

impl ArchiveRequest {
    /// New request at the maximum compression level
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            compression_level: MAX_COMPRESSION_LEVEL,
            state: ArchiveState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the Deflate level (0-9)
    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression_level = level.min(MAX_COMPRESSION_LEVEL);
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state.is_finalized()
    }

    /// Token that stops the build at the next chunk boundary when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&mut self, next: ArchiveState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ZipStreamError::InvalidState {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Scan the source directory; marks the request failed on error
    pub async fn plan(&mut self) -> Result<ArchivePlan> {
        if self.state != ArchiveState::Idle {
            return Err(ZipStreamError::InvalidState {
                from: self.state.as_str(),
                to: ArchiveState::Building.as_str(),
            });
        }
        match ArchivePlan::scan(&self.source_dir).await {
            Ok(plan) => Ok(plan),
            Err(e) => {
                self.state = ArchiveState::Failed;
                Err(e)
            }
        }
    }

    /// Build the archive described by `plan` into `sink`.
    ///
    /// On success the sink has received the complete archive and has been
    /// shut down. On failure no further bytes are written and the sink is
    /// dropped without shutdown; signalling the failure to whoever reads the
    /// sink is up to the caller.
    pub async fn stream_into<W>(&mut self, plan: &ArchivePlan, sink: W) -> Result<ArchiveReport>
    where
        W: AsyncWrite + Unpin,
    {
        self.transition(ArchiveState::Building)?;

        match self.build(plan, sink).await {
            Ok(report) => {
                self.transition(ArchiveState::Completed)?;
                tracing::debug!(
                    entries = report.entries,
                    bytes = report.archive_bytes,
                    "archive completed"
                );
                Ok(report)
            }
            Err(e) => {
                self.transition(ArchiveState::Failed)?;
                Err(e)
            }
        }
    }

    async fn build<W>(&self, plan: &ArchivePlan, sink: W) -> Result<ArchiveReport>
    where
        W: AsyncWrite + Unpin,
    {
        let mut writer =
            AsyncStreamingZipWriter::from_writer_with_compression(sink, self.compression_level);
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        let mut uncompressed_bytes = 0u64;

        for entry in plan.entries() {
            self.check_cancelled()?;

            let mut file = tokio::fs::File::open(&entry.path)
                .await
                .map_err(|e| with_path(e, &entry.path))?;
            writer
                .start_entry_with_size_hint(&entry.name, entry.modified, entry.size)
                .await?;
            tracing::trace!(name = %entry.name, size = entry.size, "adding entry");

            loop {
                self.check_cancelled()?;
                let n = file
                    .read(&mut buffer)
                    .await
                    .map_err(|e| with_path(e, &entry.path))?;
                if n == 0 {
                    break;
                }
                writer.write_data(&buffer[..n]).await?;
                uncompressed_bytes += n as u64;
            }
        }

        let (_, archive_bytes) = writer.finish_counted().await?;

        Ok(ArchiveReport {
            entries: plan.len(),
            uncompressed_bytes,
            archive_bytes,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ZipStreamError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "archive build cancelled: sink closed",
            )));
        }
        Ok(())
    }
}
