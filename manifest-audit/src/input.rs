//! Opening manifest inputs.
//!
//! Inventories are often stored zstd-compressed; a `.zst` suffix selects
//! streaming decompression. `-` reads standard input.

use crate::utils::errors::Result;
use async_compression::tokio::bufread::ZstdDecoder;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::debug;

/// Read buffer for manifest files
const READ_BUFFER_SIZE: usize = 1024 * 1024;

pub type InputReader = Box<dyn AsyncBufRead + Unpin + Send>;

pub fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "zst")
}

/// Open `path` as a buffered line source
pub async fn open_input(path: &Path) -> Result<InputReader> {
    if path.as_os_str() == "-" {
        debug!("Reading from standard input");
        return Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, tokio::io::stdin())));
    }

    let file = BufReader::with_capacity(READ_BUFFER_SIZE, File::open(path).await?);
    if is_compressed(path) {
        debug!("Decompressing {}", path.display());
        let mut decoder = ZstdDecoder::new(file);
        decoder.multiple_members(true);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::write::ZstdEncoder;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    async fn read_lines(mut reader: InputReader) -> Vec<String> {
        let mut lines = Vec::new();
        let mut line = String::new();
        while reader.read_line(&mut line).await.unwrap() > 0 {
            lines.push(line.trim_end().to_string());
            line.clear();
        }
        lines
    }

    #[tokio::test]
    async fn test_plain_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filelist.txt");
        std::fs::write(&path, "1 2 /a\n3 4 /b\n").unwrap();

        let lines = read_lines(open_input(&path).await.unwrap()).await;
        assert_eq!(lines, vec!["1 2 /a", "3 4 /b"]);
    }

    #[tokio::test]
    async fn test_zstd_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("filelist.txt.zst");
        let mut encoder = ZstdEncoder::new(File::create(&path).await.unwrap());
        encoder.write_all(b"1 2 /a\n3 4 /b c\n").await.unwrap();
        encoder.shutdown().await.unwrap();

        assert!(is_compressed(&path));
        let lines = read_lines(open_input(&path).await.unwrap()).await;
        assert_eq!(lines, vec!["1 2 /a", "3 4 /b c"]);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = TempDir::new().unwrap();
        assert!(open_input(&dir.path().join("absent.txt")).await.is_err());
    }
}
