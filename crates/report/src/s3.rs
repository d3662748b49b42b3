//! S3-compatible object storage destination.
//!
//! Keys mirror the file layout: `<name>.json`, `<name>.more/<attachment>`,
//! and `<name>.more/index.html` when at least one attachment was stored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hidra_core::config::S3ReportConfig;
use hidra_core::Report;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, RetryConfig};
use tracing::{debug, info, warn};

use crate::error::ReportError;
use crate::traits::{attachment_file_name, ReportDestination};

pub struct S3Destination {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl S3Destination {
    /// Build an S3 client from config. A bare `endpoint` host gets a scheme
    /// picked by `use_ssl`; custom endpoints always use path-style requests.
    pub fn from_config(config: &S3ReportConfig) -> Result<Self, ReportError> {
        if config.bucket.is_empty() {
            return Err(ReportError::Config("report.s3.bucket is not set".to_string()));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_retry(RetryConfig {
                max_retries: 2,
                retry_timeout: Duration::from_secs(10),
                ..Default::default()
            });

        if !config.access_key_id.is_empty() {
            builder = builder.with_access_key_id(&config.access_key_id);
        }
        if !config.secret_access_key.is_empty() {
            builder = builder.with_secret_access_key(&config.secret_access_key);
        }
        if config.access_key_id.is_empty() && config.secret_access_key.is_empty() {
            builder = builder.with_skip_signature(true);
        }

        if config.endpoint.is_empty() {
            builder = builder.with_virtual_hosted_style_request(!config.force_path_style);
        } else {
            let endpoint = if config.endpoint.starts_with("http://")
                || config.endpoint.starts_with("https://")
            {
                config.endpoint.clone()
            } else if config.use_ssl {
                format!("https://{}", config.endpoint)
            } else {
                format!("http://{}", config.endpoint)
            };
            builder = builder
                .with_endpoint(&endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build()?;
        info!(bucket = %config.bucket, region = %config.region, "S3 report destination ready");
        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), ReportError> {
        let path = ObjectPath::from(key);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type(key).into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&path, Bytes::from(data).into(), opts)
            .await?;
        Ok(())
    }
}

/// Content type guessed from the key's extension.
pub fn content_type(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "txt" | "log" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "xml" => "application/xml",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn index_html(sample: &str, files: &[String]) -> String {
    let items: String = files
        .iter()
        .map(|f| {
            let f = escape_html(f);
            format!("    <li><a href=\"{f}\">{f}</a></li>\n")
        })
        .collect();
    let title = escape_html(sample);
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n<body>\n  <h1>{title}</h1>\n  <ul>\n{items}  </ul>\n</body>\n</html>\n"
    )
}

#[async_trait]
impl ReportDestination for S3Destination {
    fn name(&self) -> &str {
        "s3"
    }

    async fn write(&self, report: &Report) -> Result<(), ReportError> {
        self.put(&format!("{}.json", report.name), report.to_json()?.into_bytes())
            .await?;

        let mut uploaded = Vec::new();
        for (name, bytes) in &report.attachments {
            let Some(file_name) = attachment_file_name(name) else {
                warn!(sample = %report.name, attachment = %name, "skipping attachment with invalid name");
                continue;
            };
            let key = format!("{}.more/{}", report.name, file_name);
            match self.put(&key, bytes.clone()).await {
                Ok(()) => uploaded.push(file_name.to_string()),
                Err(e) => warn!(bucket = %self.bucket, key = %key, error = %e, "attachment upload failed"),
            }
        }

        if !uploaded.is_empty() {
            let index = index_html(&report.name, &uploaded);
            self.put(&format!("{}.more/index.html", report.name), index.into_bytes())
                .await?;
        }

        debug!(bucket = %self.bucket, sample = %report.name, attachments = uploaded.len(), "report uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    async fn read(store: &InMemory, key: &str) -> Option<Vec<u8>> {
        let result = store.get(&ObjectPath::from(key)).await.ok()?;
        result.bytes().await.ok().map(|b| b.to_vec())
    }

    #[tokio::test]
    async fn uploads_report_attachments_and_index() {
        let store = Arc::new(InMemory::new());
        let dest = S3Destination::with_store(store.clone(), "reports");

        let mut report = Report {
            name: "homepage".to_string(),
            last_error: "boom".to_string(),
            ..Default::default()
        };
        report
            .attachments
            .insert("body.html".to_string(), b"<p>boom</p>".to_vec());
        dest.write(&report).await.unwrap();

        let json = read(&store, "homepage.json").await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["last_error"], "boom");
        assert_eq!(read(&store, "homepage.more/body.html").await.unwrap(), b"<p>boom</p>");
        let index = String::from_utf8(read(&store, "homepage.more/index.html").await.unwrap()).unwrap();
        assert!(index.contains("<a href=\"body.html\">body.html</a>"));
    }

    #[tokio::test]
    async fn no_index_without_attachments() {
        let store = Arc::new(InMemory::new());
        let dest = S3Destination::with_store(store.clone(), "reports");
        let report = Report {
            name: "dns".to_string(),
            ..Default::default()
        };
        dest.write(&report).await.unwrap();

        assert!(read(&store, "dns.json").await.is_some());
        assert!(read(&store, "dns.more/index.html").await.is_none());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type("a.more/body.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("a.json"), "application/json");
        assert_eq!(content_type("a.more/shot.PNG"), "image/png");
        assert_eq!(content_type("a.more/trace"), "application/octet-stream");
    }

    #[test]
    fn missing_bucket_is_a_config_error() {
        let err = S3Destination::from_config(&S3ReportConfig::default()).err().unwrap();
        assert!(matches!(err, ReportError::Config(_)));
    }
}
