use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// `RangeReader` over an object in S3 or S3-compatible storage.
///
/// The object size is fetched once with HEAD; every read is a ranged GET.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3RangeReader {
    /// HEAD the object and build a reader for it.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let identifier = format!("s3://{}/{}", bucket, key);

        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || e.raw_response()
                        .map(|r| r.status().as_u16() == 404)
                        .unwrap_or(false);

                if not_found {
                    IoError::NotFound(identifier.clone())
                } else {
                    IoError::S3(e.to_string())
                }
            })?;

        let size = head.content_length().unwrap_or(0).max(0) as u64;

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // HTTP ranges are inclusive on both ends.
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if data.len() != len {
            return Err(IoError::Connection(format!(
                "short read from {}: expected {} bytes, got {}",
                self.identifier,
                len,
                data.len()
            )));
        }

        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Build an S3 client for `region`, optionally against a custom endpoint.
///
/// Custom endpoints (MinIO and friends) get path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
