//! Server configuration from CLI arguments and environment variables
//!
//! ```bash
//! zipstream --port 8080 --source-dir ./files --archive-name export
//! ZIPSTREAM_PORT=9000 ZIPSTREAM_SOURCE_DIR=/srv/share zipstream
//! ```

use crate::sink::DEFAULT_CHANNEL_CAPACITY;
use crate::streamer::MAX_COMPRESSION_LEVEL;
use clap::Parser;
use std::path::PathBuf;

/// zipstream server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "zipstream")]
#[command(about = "Stream a ZIP archive of a directory over HTTP")]
#[command(version)]
pub struct Config {
    /// Host/IP to listen on
    #[arg(long, default_value = "127.0.0.1", env = "ZIPSTREAM_HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "ZIPSTREAM_PORT")]
    pub port: u16,

    /// Directory whose contents are served as a ZIP archive
    #[arg(long, default_value = "./files", env = "ZIPSTREAM_SOURCE_DIR")]
    pub source_dir: PathBuf,

    /// Download file name, without the `.zip` suffix
    #[arg(long, default_value = "archive", env = "ZIPSTREAM_ARCHIVE_NAME")]
    pub archive_name: String,

    /// Chunks buffered between the archive builder and a slow client
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY, env = "ZIPSTREAM_CHANNEL_CAPACITY")]
    pub channel_capacity: usize,

    /// Deflate level, 0-9. Downloads use 9 unless an operator lowers it
    /// to trade ratio for CPU.
    #[arg(long, default_value_t = MAX_COMPRESSION_LEVEL, env = "ZIPSTREAM_COMPRESSION_LEVEL")]
    pub compression_level: u32,
}

impl Config {
    /// Address to bind (host:port)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `Content-Disposition` file name
    pub fn download_file_name(&self) -> String {
        format!("{}.zip", self.archive_name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port must be >= 1".to_string());
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(format!(
                "Compression level must be 0-{}",
                MAX_COMPRESSION_LEVEL
            ));
        }
        if self.channel_capacity == 0 {
            return Err("Channel capacity must be >= 1".to_string());
        }
        if self.archive_name.is_empty() {
            return Err("Archive name must not be empty".to_string());
        }
        if self
            .archive_name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '"') || c.is_control())
        {
            return Err("Archive name must not contain path separators or quotes".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            source_dir: PathBuf::from("./files"),
            archive_name: "archive".to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            compression_level: MAX_COMPRESSION_LEVEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.compression_level, 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_address() {
        let mut config = Config::default();
        assert_eq!(config.address(), "127.0.0.1:8080");
        config.host = "0.0.0.0".to_string();
        config.port = 3000;
        assert_eq!(config.address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_download_file_name() {
        let config = Config::default();
        assert_eq!(config.download_file_name(), "archive.zip");
    }

    #[test]
    fn test_parse_cli_args() {
        let config = Config::try_parse_from([
            "zipstream",
            "--port",
            "9000",
            "--source-dir",
            "/srv/share",
            "--archive-name",
            "export",
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.source_dir, PathBuf::from("/srv/share"));
        assert_eq!(config.download_file_name(), "export.zip");
    }

    #[test]
    fn test_validate_port_zero() {
        let mut config = Config::default();
        config.port = 0;
        assert!(config.validate().unwrap_err().contains("Port"));
    }

    #[test]
    fn test_validate_compression_level() {
        let mut config = Config::default();
        config.compression_level = 10;
        assert!(config.validate().unwrap_err().contains("Compression level"));
    }

    #[test]
    fn test_validate_channel_capacity() {
        let mut config = Config::default();
        config.channel_capacity = 0;
        assert!(config.validate().unwrap_err().contains("Channel capacity"));
    }

    #[test]
    fn test_validate_archive_name() {
        let mut config = Config::default();
        config.archive_name = String::new();
        assert!(config.validate().is_err());
        config.archive_name = "../etc/passwd".to_string();
        assert!(config.validate().is_err());
        config.archive_name = "say \"hi\"".to_string();
        assert!(config.validate().is_err());
    }
}
