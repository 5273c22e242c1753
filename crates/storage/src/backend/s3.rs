//! S3-compatible storage backend.

use crate::backend::FileInfoStream;
use crate::error::{ErrorKind, Result};
use crate::path::normalize;
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const MAX_REQUESTS_IN_FLIGHT: usize = 100;

/// An S3-compatible bucket (AWS, Backblaze B2, MinIO), optionally under a
/// key prefix. Credentials come from the configuration file, never the
/// environment.
///
/// # Examples
///
/// ```no_run
/// use rlogsync_storage::backend::S3Backend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "b2",
///     "my-bucket",
///     Some("rlogs/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// `endpoint` is only needed for non-AWS services. `region` is whatever
    /// the provider calls it (`us-west-004` on B2).
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(normalize)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidKey(p)))
            .transpose()?;
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "rlogsync-config-file");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // B2 and MinIO need path-style addressing.
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(MAX_REQUESTS_IN_FLIGHT)),
        })
    }

    fn full_key(&self, path: &Path) -> Result<String> {
        let key = normalize(path)?;
        match key.to_str() {
            Some(relative) => Ok(join_key(self.prefix.as_deref(), relative)),
            None => exn::bail!(ErrorKind::InvalidKey(key)),
        }
    }

    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        normalize(strip_key(self.prefix.as_deref(), key))
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::Remote("S3 rate limiter closed".to_string()))
    }

}

fn last_modified(at: Option<&DateTime>) -> Result<OffsetDateTime> {
    match at {
        Some(at) => OffsetDateTime::from_unix_timestamp_nanos(at.as_nanos())
            .or_raise(|| ErrorKind::Remote(format!("timestamp out of range: {at}"))),
        None => Ok(OffsetDateTime::UNIX_EPOCH),
    }
}

fn join_key(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path),
        None => path.to_string(),
    }
}

fn strip_key<'a>(prefix: Option<&str>, key: &'a str) -> &'a str {
    match prefix {
        Some(prefix) => {
            key.strip_prefix(prefix.trim_end_matches('/')).and_then(|rest| rest.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        Box::pin(stream! {
            // The trailing slash keeps `tici/D1` from matching `tici/D1_part2`.
            let key_prefix = match prefix {
                Some(prefix) => match self.full_key(prefix) {
                    Ok(key) => Some(format!("{key}/")),
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                },
                None => self.prefix.as_ref().map(|root| format!("{}/", root.trim_end_matches('/'))),
            };
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(key_prefix)
                .into_paginator()
                .send();
            loop {
                let _permit = match self.acquire_permit().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                };
                let page = match pages.next().await {
                    None => return,
                    Some(Ok(page)) => page,
                    Some(Err(err)) => {
                        yield Err(exn::Exn::from(ErrorKind::Network(err.to_string())));
                        return;
                    },
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    yield self
                        .relative_path(key)
                        .and_then(|path| Ok(FileInfo::new(path, size, last_modified(object.last_modified())?)));
                }
            }
        })
    }

    async fn upload(&self, local: &Path, path: &Path) -> Result<()> {
        let key = self.full_key(path)?;
        let body = ByteStream::from_path(local)
            .await
            .or_raise(|| ErrorKind::NotFound(local.to_path_buf()))?;
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("put {key}")))?;
        tracing::debug!(backend = %self.name, key, "uploaded object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "tici/D1/D1--rlog.zst", "tici/D1/D1--rlog.zst")]
    #[case(Some("rlogs"), "tici/D1/D1--rlog.zst", "rlogs/tici/D1/D1--rlog.zst")]
    #[case(Some("rlogs/"), "tici/D1/D1--rlog.zst", "rlogs/tici/D1/D1--rlog.zst")]
    fn joins_prefix(#[case] prefix: Option<&str>, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(join_key(prefix, path), expected);
    }

    #[rstest]
    #[case(None, "tici/D1/D1--rlog.zst", "tici/D1/D1--rlog.zst")]
    #[case(Some("rlogs"), "rlogs/tici/D1/D1--rlog.zst", "tici/D1/D1--rlog.zst")]
    #[case(Some("rlogs/"), "rlogs/tici/D1/D1--rlog.zst", "tici/D1/D1--rlog.zst")]
    fn strips_prefix(#[case] prefix: Option<&str>, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(strip_key(prefix, key), expected);
    }

    #[test]
    fn keys_are_normalised() {
        let backend = S3Backend::new("b2", "bucket", Some("rlogs".into()), "us-east-1", None::<String>, "id", "secret")
            .unwrap();
        assert_eq!(backend.full_key(Path::new("tici/D1/x")).unwrap(), "rlogs/tici/D1/x");
        assert!(backend.full_key(Path::new("../x")).is_err());
        assert_eq!(backend.relative_path("rlogs/tici/D1/x").unwrap(), PathBuf::from("tici/D1/x"));
    }
}
