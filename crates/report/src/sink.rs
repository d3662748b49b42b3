//! Routes a report to every configured destination.
//!
//! Destinations are attempted in order. A failing destination never blocks
//! the ones after it; the first failure is returned once all have run.

use async_trait::async_trait;
use hidra_core::config::ReportConfig;
use hidra_core::Report;
use hidra_runtime::Reporter;
use tracing::{info, warn};

use crate::callback::CallbackDestination;
use crate::error::ReportError;
use crate::file::FileDestination;
use crate::s3::S3Destination;
use crate::traits::ReportDestination;

pub struct ReportSink {
    destinations: Vec<Box<dyn ReportDestination>>,
}

impl ReportSink {
    pub fn new(destinations: Vec<Box<dyn ReportDestination>>) -> Self {
        Self { destinations }
    }

    /// Build the sink described by `config`. Returns `None` when reporting
    /// is disabled or no destination is configured.
    pub fn from_config(config: &ReportConfig) -> Result<Option<Self>, ReportError> {
        if !config.enabled {
            return Ok(None);
        }

        let mut destinations: Vec<Box<dyn ReportDestination>> = Vec::new();
        if let Some(path) = &config.file.path {
            destinations.push(Box::new(FileDestination::new(path)));
        }
        if config.s3.is_configured() {
            destinations.push(Box::new(S3Destination::from_config(&config.s3)?));
        }
        if config.callback.is_configured() {
            destinations.push(Box::new(CallbackDestination::new(&config.callback.url)?));
        }

        if destinations.is_empty() {
            warn!("reporting is enabled but no destination is configured");
            return Ok(None);
        }
        let names: Vec<&str> = destinations.iter().map(|d| d.name()).collect();
        info!(destinations = ?names, "report sink ready");
        Ok(Some(Self::new(destinations)))
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Deliver `report` to every destination.
    pub async fn dispatch(&self, report: &Report) -> Result<(), ReportError> {
        let mut first_error = None;

        for destination in &self.destinations {
            let start = std::time::Instant::now();
            let result = destination.write(report).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(()) => info!(
                    sample = %report.name,
                    destination = destination.name(),
                    duration_ms,
                    "report delivered"
                ),
                Err(e) => {
                    warn!(
                        sample = %report.name,
                        destination = destination.name(),
                        error = %e,
                        duration_ms,
                        "report delivery failed"
                    );
                    first_error.get_or_insert(ReportError::Destination {
                        destination: destination.name().to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Reporter for ReportSink {
    async fn publish(&self, report: &Report) -> anyhow::Result<()> {
        self.dispatch(report).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct MockDestination {
        name: &'static str,
        fail: bool,
        writes: Arc<AtomicUsize>,
    }

    impl MockDestination {
        fn boxed(name: &'static str, fail: bool) -> (Box<dyn ReportDestination>, Arc<AtomicUsize>) {
            let writes = Arc::new(AtomicUsize::new(0));
            let dest = Self {
                name,
                fail,
                writes: writes.clone(),
            };
            (Box::new(dest), writes)
        }
    }

    #[async_trait]
    impl ReportDestination for MockDestination {
        fn name(&self) -> &str {
            self.name
        }

        async fn write(&self, _report: &Report) -> Result<(), ReportError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ReportError::Config(format!("{} is down", self.name)))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn failure_does_not_block_later_destinations() {
        let (file, file_writes) = MockDestination::boxed("file", false);
        let (s3, s3_writes) = MockDestination::boxed("s3", true);
        let (callback, callback_writes) = MockDestination::boxed("callback", false);
        let sink = ReportSink::new(vec![file, s3, callback]);

        let err = sink.dispatch(&Report::default()).await.unwrap_err();

        assert_eq!(file_writes.load(Ordering::SeqCst), 1);
        assert_eq!(s3_writes.load(Ordering::SeqCst), 1);
        assert_eq!(callback_writes.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "s3 destination failed: configuration error: s3 is down");
    }

    #[tokio::test]
    async fn first_error_wins() {
        let (a, _) = MockDestination::boxed("file", true);
        let (b, _) = MockDestination::boxed("callback", true);
        let err = ReportSink::new(vec![a, b])
            .dispatch(&Report::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Destination { ref destination, .. } if destination == "file"));
    }

    #[test]
    fn disabled_or_empty_config_builds_no_sink() {
        let mut config = ReportConfig::default();
        assert!(ReportSink::from_config(&config).unwrap().is_none());

        config.enabled = true;
        assert!(ReportSink::from_config(&config).unwrap().is_none());

        config.file.path = Some(std::env::temp_dir());
        config.callback.enabled = true;
        config.callback.url = "http://127.0.0.1:9/hook".to_string();
        let sink = ReportSink::from_config(&config).unwrap().unwrap();
        assert_eq!(sink.len(), 2);
    }
}
