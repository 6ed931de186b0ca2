use async_trait::async_trait;
use aws_sdk_s3::Client;

use crate::error::IoError;
use crate::io::S3RangeReader;

use super::SlideSource;

/// Slides stored as objects in an S3 bucket.
///
/// The object key is the optional prefix followed by the slide id, so
/// `prefix = "slides/"` maps id `img1.svs` to `slides/img1.svs`.
#[derive(Clone)]
pub struct S3SlideSource {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3SlideSource {
    pub fn new(client: Client, bucket: String) -> Self {
        Self::with_prefix(client, bucket, String::new())
    }

    pub fn with_prefix(client: Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object_key(&self, slide_id: &str) -> String {
        format!("{}{}", self.prefix, slide_id)
    }
}

#[async_trait]
impl SlideSource for S3SlideSource {
    type Reader = S3RangeReader;

    async fn create_reader(&self, slide_id: &str) -> Result<Self::Reader, IoError> {
        if slide_id.is_empty() || slide_id.contains("..") || slide_id.contains('\0') {
            return Err(IoError::InvalidId(format!("invalid slide id {:?}", slide_id)));
        }
        S3RangeReader::new(
            self.client.clone(),
            self.bucket.clone(),
            self.object_key(slide_id),
        )
        .await
    }
}
