//! Google Cloud Storage backend (C3, §4.3, §6 `gs://bucket/object` and the
//! HTTPS JSON-API download URL shape).
//!
//! GCS objects are plain range-capable HTTPS resources once translated to
//! their JSON API download URL, so this backend is a thin wrapper around
//! [`HttpRangeReader`] rather than a new wire protocol (§9 "no separate
//! streaming-callback variant" applies here too).

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::Authenticator;
use crate::backend::http::HttpRangeReader;
use crate::buffer::ByteBuf;
use crate::error::IoError;
use crate::range_reader::RangeReader;

const GCS_HOST: &str = "storage.googleapis.com";

/// Reads byte ranges from a GCS object via the JSON API's `alt=media`
/// download URL.
pub struct GcsRangeReader {
    inner: HttpRangeReader,
    identity: String,
}

impl GcsRangeReader {
    pub fn new(
        bucket: &str,
        object: &str,
        auth: Option<Arc<dyn Authenticator>>,
    ) -> Result<Self, IoError> {
        let url = download_url(bucket, object)?;
        let identity = format!("gs://{bucket}/{object}");
        let inner = HttpRangeReader::with_client(url, default_client()?, auth)?;
        Ok(Self { inner, identity })
    }
}

fn default_client() -> Result<reqwest::Client, IoError> {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()
        .map_err(|e| IoError::io("gcs", e.to_string()))
}

/// Percent-encode a path segment: unreserved characters pass through
/// untouched, everything else (including `/`, since the object name is one
/// opaque segment here) becomes `%XX`.
fn percent_encode_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn percent_decode_segment(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Build the JSON API download URL for `bucket`/`object` (§6).
pub fn download_url(bucket: &str, object: &str) -> Result<url::Url, IoError> {
    let encoded_object = percent_encode_segment(object);
    let raw = format!("https://{GCS_HOST}/storage/v1/b/{bucket}/o/{encoded_object}?alt=media");
    url::Url::parse(&raw).map_err(|e| IoError::invalid_argument("gcs", e.to_string()))
}

/// If `url` matches the GCS JSON API download shape, extract the bucket and
/// (decoded) object name. Used by both `can_process` (static, scheme-based)
/// and the GCS provider's `can_process_headers` disambiguation (§4.8).
pub fn matches_download_shape(url: &url::Url) -> Option<(String, String)> {
    if url.scheme() != "https" || url.host_str() != Some(GCS_HOST) {
        return None;
    }
    let mut segments = url.path_segments()?;
    if segments.next()? != "storage" || segments.next()? != "v1" || segments.next()? != "b" {
        return None;
    }
    let bucket = segments.next()?.to_string();
    if segments.next()? != "o" {
        return None;
    }
    let object = percent_decode_segment(segments.next()?);
    Some((bucket, object))
}

#[async_trait]
impl RangeReader for GcsRangeReader {
    async fn read_into(
        &self,
        offset: u64,
        length: usize,
        target: &mut ByteBuf,
    ) -> Result<usize, IoError> {
        self.inner.read_into(offset, length, target).await
    }

    async fn size(&self) -> Result<Option<u64>, IoError> {
        self.inner.size().await
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn close(&self) -> Result<(), IoError> {
        self.inner.close().await
    }
}

/// Parse a `gs://bucket/object` URI (§6).
pub fn parse_gs_uri(uri: &url::Url) -> Result<(String, String), IoError> {
    if uri.scheme() != "gs" {
        return Err(IoError::invalid_argument(uri.as_str(), "not a gs:// URI"));
    }
    let bucket = uri
        .host_str()
        .ok_or_else(|| IoError::invalid_argument(uri.as_str(), "gs:// URI missing bucket host"))?
        .to_string();
    let object = uri.path().trim_start_matches('/').to_string();
    if object.is_empty() {
        return Err(IoError::invalid_argument(uri.as_str(), "gs:// URI missing object name"));
    }
    Ok((bucket, object))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gs_scheme_uri() {
        let uri = url::Url::parse("gs://my-bucket/a/b/c.bin").unwrap();
        let (bucket, object) = parse_gs_uri(&uri).unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(object, "a/b/c.bin");
    }

    #[test]
    fn builds_a_valid_download_url() {
        let url = download_url("my-bucket", "a/b/c.bin").unwrap();
        assert_eq!(url.host_str(), Some(GCS_HOST));
        assert!(url.as_str().contains("alt=media"));
    }

    #[test]
    fn recognizes_its_own_download_url_shape() {
        let url = download_url("my-bucket", "object.bin").unwrap();
        let (bucket, object) = matches_download_shape(&url).unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(object, "object.bin");
    }

    #[test]
    fn does_not_match_unrelated_https_url() {
        let url = url::Url::parse("https://example.com/foo").unwrap();
        assert!(matches_download_shape(&url).is_none());
    }
}
