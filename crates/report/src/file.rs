//! Local filesystem destination.
//!
//! Layout: `<base>/<name>.json` plus `<base>/<name>.more/<attachment>`.
//! Existing files are overwritten.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hidra_core::Report;
use tracing::{debug, warn};

use crate::error::ReportError;
use crate::traits::{attachment_file_name, ReportDestination};

pub struct FileDestination {
    base: PathBuf,
}

impl FileDestination {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), ReportError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn create_dir(path: &Path) -> Result<(), ReportError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl ReportDestination for FileDestination {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, report: &Report) -> Result<(), ReportError> {
        create_dir(&self.base).await?;
        let json_path = self.base.join(format!("{}.json", report.name));
        write_file(&json_path, report.to_json()?.as_bytes()).await?;

        if !report.attachments.is_empty() {
            let more = self.base.join(format!("{}.more", report.name));
            create_dir(&more).await?;
            for (name, bytes) in &report.attachments {
                let Some(file_name) = attachment_file_name(name) else {
                    warn!(sample = %report.name, attachment = %name, "skipping attachment with invalid name");
                    continue;
                };
                write_file(&more.join(file_name), bytes).await?;
            }
        }

        debug!(
            sample = %report.name,
            path = %json_path.display(),
            attachments = report.attachments.len(),
            "report written"
        );
        Ok(())
    }
}
