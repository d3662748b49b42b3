use async_trait::async_trait;
use hidra_core::Report;

use crate::error::ReportError;

/// A place failed-run reports are delivered to.
#[async_trait]
pub trait ReportDestination: Send + Sync {
    /// Short name used in logs and errors (e.g. "file", "s3").
    fn name(&self) -> &str;

    async fn write(&self, report: &Report) -> Result<(), ReportError>;
}

/// Attachment names reduced to their final path component so a report can
/// never write outside its `<name>.more` directory.
pub(crate) fn attachment_file_name(name: &str) -> Option<&str> {
    std::path::Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_names_are_flattened() {
        assert_eq!(attachment_file_name("body.html"), Some("body.html"));
        assert_eq!(attachment_file_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(attachment_file_name(".."), None);
        assert_eq!(attachment_file_name(""), None);
    }
}
