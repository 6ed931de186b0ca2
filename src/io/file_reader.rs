//! Local file range reader.
//!
//! On Unix the file is read with `pread`-style positioned reads, which need no
//! shared cursor, so any number of region reads can run against the same
//! handle at once. Elsewhere reads seek a shared cursor and are serialized
//! behind a per-handle lock.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// `RangeReader` over a file on local disk.
///
/// The descriptor stays open for the reader's lifetime and is closed when the
/// last clone drops.
#[derive(Clone)]
pub struct FileRangeReader {
    file: Arc<PositionedFile>,
    size: u64,
    identifier: String,
}

impl FileRangeReader {
    /// Open `path` and record its size.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, IoError> {
        let path = path.into();
        let identifier = format!("file://{}", path.display());

        let opened = tokio::task::spawn_blocking(move || -> Result<(File, u64), IoError> {
            let file = File::open(&path).map_err(|e| map_open_error(&path, e))?;
            let meta = file
                .metadata()
                .map_err(|e| IoError::File(format!("{}: {}", path.display(), e)))?;
            if !meta.is_file() {
                return Err(IoError::NotFound(path.display().to_string()));
            }
            Ok((file, meta.len()))
        })
        .await
        .map_err(|e| IoError::File(format!("open task failed: {}", e)))??;

        let (file, size) = opened;
        Ok(Self {
            file: Arc::new(PositionedFile::new(file)),
            size,
            identifier,
        })
    }
}

fn map_open_error(path: &Path, err: std::io::Error) -> IoError {
    if err.kind() == std::io::ErrorKind::NotFound {
        IoError::NotFound(path.display().to_string())
    } else {
        IoError::File(format!("{}: {}", path.display(), err))
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.read_at(offset, len))
            .await
            .map_err(|e| IoError::File(format!("read task failed: {}", e)))?
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(unix)]
struct PositionedFile(File);

#[cfg(unix)]
impl PositionedFile {
    fn new(file: File) -> Self {
        Self(file)
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        use std::os::unix::fs::FileExt;

        let mut buf = vec![0u8; len];
        self.0
            .read_exact_at(&mut buf, offset)
            .map_err(|e| IoError::File(format!("read {} bytes at {}: {}", len, offset, e)))?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(not(unix))]
struct PositionedFile(std::sync::Mutex<File>);

#[cfg(not(unix))]
impl PositionedFile {
    fn new(file: File) -> Self {
        Self(std::sync::Mutex::new(file))
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self
            .0
            .lock()
            .map_err(|_| IoError::File("file lock poisoned".to_string()))?;
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| IoError::File(format!("read {} bytes at {}: {}", len, offset, e)))?;
        Ok(Bytes::from(buf))
    }
}
