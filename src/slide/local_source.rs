use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::IoError;
use crate::io::FileRangeReader;

use super::SlideSource;

/// Extensions tried, in order, when the id doesn't name a file as-is.
pub const SLIDE_EXTENSIONS: [&str; 4] = ["svs", "tif", "tiff", "btf"];

/// Slides stored as files in one directory.
///
/// A slide id is a single file name, with or without its extension. Ids that
/// could escape the directory are rejected before touching the filesystem.
#[derive(Debug, Clone)]
pub struct LocalSlideSource {
    root: PathBuf,
}

impl LocalSlideSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths to try for `slide_id`, most specific first.
    pub fn candidates(&self, slide_id: &str) -> Result<Vec<PathBuf>, IoError> {
        validate_slide_id(slide_id)?;

        let mut paths = Vec::with_capacity(1 + SLIDE_EXTENSIONS.len());
        paths.push(self.root.join(slide_id));
        for ext in SLIDE_EXTENSIONS {
            paths.push(self.root.join(format!("{}.{}", slide_id, ext)));
        }
        Ok(paths)
    }
}

/// Reject ids that are empty or could name anything outside the root.
pub fn validate_slide_id(slide_id: &str) -> Result<(), IoError> {
    let bad = slide_id.is_empty()
        || slide_id == "."
        || slide_id.contains("..")
        || slide_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(IoError::InvalidId(format!(
            "slide id {:?} must be a single file name",
            slide_id
        )));
    }
    Ok(())
}

#[async_trait]
impl SlideSource for LocalSlideSource {
    type Reader = FileRangeReader;

    async fn create_reader(&self, slide_id: &str) -> Result<FileRangeReader, IoError> {
        for path in self.candidates(slide_id)? {
            match FileRangeReader::open(path).await {
                Err(IoError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(IoError::NotFound(slide_id.to_string()))
    }
}
