//! Local filesystem backend (C3, §4.3, §6 `file:` scheme).

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::OnceCell;

use crate::buffer::ByteBuf;
use crate::error::IoError;
use crate::range_reader::{dispatch_read, RangeReader, RangeSource};

/// Reads byte ranges from a local file via positional reads.
pub struct FileRangeReader {
    path: std::path::PathBuf,
    identity: String,
    size: OnceCell<Option<u64>>,
}

impl FileRangeReader {
    /// Open `path`, deferring the metadata probe to first use.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        let path = path.into();
        let identity = format!("file://{}", path.display());
        Self {
            path,
            identity,
            size: OnceCell::new(),
        }
    }
}

#[async_trait]
impl RangeSource for FileRangeReader {
    async fn fetch_into(
        &self,
        offset: u64,
        length: usize,
        target: &mut ByteBuf,
    ) -> Result<usize, IoError> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| map_open_err(&self.identity, e))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(IoError::from)?;

        let mut remaining = length;
        let mut total = 0usize;
        let mut chunk = vec![0u8; length];
        while remaining > 0 {
            let n = file
                .read(&mut chunk[total..total + remaining])
                .await
                .map_err(IoError::from)?;
            if n == 0 {
                break;
            }
            total += n;
            remaining -= n;
        }
        target.put_slice(&chunk[..total]);
        Ok(total)
    }

    async fn probe_size(&self) -> Result<Option<u64>, IoError> {
        let size = self
            .size
            .get_or_try_init(|| async {
                let meta = tokio::fs::metadata(&self.path)
                    .await
                    .map_err(|e| map_open_err(&self.identity, e))?;
                Ok::<_, IoError>(Some(meta.len()))
            })
            .await?;
        Ok(*size)
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

fn map_open_err(identity: &str, e: std::io::Error) -> IoError {
    match e.kind() {
        std::io::ErrorKind::NotFound => IoError::NotFound(identity.to_string()),
        std::io::ErrorKind::PermissionDenied => IoError::permission_denied(identity, e.to_string()),
        _ => IoError::io(identity, e.to_string()),
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_into(
        &self,
        offset: u64,
        length: usize,
        target: &mut ByteBuf,
    ) -> Result<usize, IoError> {
        dispatch_read(self, offset, length, target).await
    }

    async fn size(&self) -> Result<Option<u64>, IoError> {
        self.probe_size().await
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_range_from_a_real_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        tmp.write_all(&(0..=255u16).map(|i| (i % 256) as u8).collect::<Vec<u8>>())
            .unwrap();

        let reader = FileRangeReader::new(tmp.path());
        assert_eq!(reader.size().await.unwrap(), Some(256));

        let buf = reader.read(10, 20).await.unwrap();
        let expected: Vec<u8> = (10u16..30).map(|i| (i % 256) as u8).collect();
        assert_eq!(buf.written(), expected.as_slice());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let reader = FileRangeReader::new("/nonexistent/path/does-not-exist");
        let err = reader.size().await.unwrap_err();
        assert!(matches!(err, IoError::NotFound(_)));
    }

    #[tokio::test]
    async fn clamps_read_past_eof() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        tmp.write_all(b"hello world").unwrap();

        let reader = FileRangeReader::new(tmp.path());
        let buf = reader.read(6, 100).await.unwrap();
        assert_eq!(buf.written(), b"world");
    }
}
