//! Exporter configuration file.
//!
//! The file is YAML. Every key except `samples_path` has a default, and a
//! few keys may be overridden from the environment after parsing.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::duration;
use crate::error::{ConfigError, Result};

/// Load `.env` from the working directory, if present.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub log_level: String,
    pub http_server: HttpServerConfig,
    pub samples_path: PathBuf,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub report: ReportConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            http_server: HttpServerConfig::default(),
            samples_path: PathBuf::new(),
            scheduler: SchedulerConfig::default(),
            worker: WorkerConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    pub listen_address: String,
    pub metrics_path: String,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_address: ":19090".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl HttpServerConfig {
    /// Bindable socket address. `:PORT` binds every interface.
    pub fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "duration::serde_str")]
    pub refresh_samples_interval: Duration,
    #[serde(with = "duration::serde_str")]
    pub enqueue_samples_interval: Duration,
    #[serde(with = "duration::serde_str")]
    pub gc_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_samples_interval: Duration::from_secs(60),
            enqueue_samples_interval: Duration::from_secs(5),
            gc_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub parallel_jobs: usize,
    pub max_queue_size: usize,
    #[serde(with = "duration::serde_str")]
    pub sleep_between_jobs: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallel_jobs: 16,
            max_queue_size: 1000,
            sleep_between_jobs: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    pub file: FileReportConfig,
    pub s3: S3ReportConfig,
    pub callback: CallbackReportConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileReportConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3ReportConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: String,
    pub force_path_style: bool,
    pub use_ssl: bool,
}

impl Default for S3ReportConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            endpoint: String::new(),
            force_path_style: false,
            use_ssl: true,
        }
    }
}

impl S3ReportConfig {
    pub fn is_configured(&self) -> bool {
        !self.bucket.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallbackReportConfig {
    pub enabled: bool,
    pub url: String,
}

impl CallbackReportConfig {
    pub fn is_configured(&self) -> bool {
        self.enabled && !self.url.is_empty()
    }
}

impl ExporterConfig {
    /// Read, parse, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(path, &contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: &Path, contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `HIDRA_LOG_LEVEL`, `HIDRA_SAMPLES_PATH` and `HIDRA_LISTEN_ADDRESS`
    /// take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = env_opt("HIDRA_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = env_opt("HIDRA_SAMPLES_PATH") {
            self.samples_path = PathBuf::from(path);
        }
        if let Some(addr) = env_opt("HIDRA_LISTEN_ADDRESS") {
            self.http_server.listen_address = addr;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.samples_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("samples_path".to_string()));
        }
        if self.worker.parallel_jobs == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.parallel_jobs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker.max_queue_size == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.max_queue_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("scheduler.refresh_samples_interval", self.scheduler.refresh_samples_interval),
            ("scheduler.enqueue_samples_interval", self.scheduler.enqueue_samples_interval),
            ("scheduler.gc_interval", self.scheduler.gc_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if !self.http_server.metrics_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "http_server.metrics_path".to_string(),
                reason: "must start with '/'".to_string(),
            });
        }
        Ok(())
    }

    /// Log a summary of the effective configuration. Secrets are never logged.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  http:      listen={}, metrics_path={}",
            self.http_server.listen_address,
            self.http_server.metrics_path
        );
        tracing::info!("  samples:   path={}", self.samples_path.display());
        tracing::info!(
            "  scheduler: refresh={:?}, enqueue={:?}, gc={:?}",
            self.scheduler.refresh_samples_interval,
            self.scheduler.enqueue_samples_interval,
            self.scheduler.gc_interval
        );
        tracing::info!(
            "  worker:    parallel_jobs={}, max_queue_size={}, sleep_between_jobs={:?}",
            self.worker.parallel_jobs,
            self.worker.max_queue_size,
            self.worker.sleep_between_jobs
        );
        tracing::info!(
            "  report:    enabled={}, file={}, s3_bucket={}, callback={}",
            self.report.enabled,
            self.report
                .file
                .path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            if self.report.s3.is_configured() { self.report.s3.bucket.as_str() } else { "(none)" },
            self.report.callback.is_configured()
        );
    }
}
