//! Startup wiring and orderly shutdown.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use hidra_core::ExporterConfig;
use hidra_metrics::MetricsEmitter;
use hidra_report::ReportSink;
use hidra_runtime::{PluginContext, SampleRunner, TaskDrainer, TaskQueue};
use hidra_scheduler::{SampleLoader, SampleWatcher, Scheduler, SchedulerHandle};
use tracing::info;

use crate::server;

/// Every long-lived component, built but not yet running.
pub struct Exporter {
    config: ExporterConfig,
    scheduler: Arc<Scheduler>,
    watcher: SampleWatcher,
    tasks: TaskQueue,
    drainer: TaskDrainer,
}

/// A started exporter. Call [`RunningExporter::shutdown`] to stop it.
pub struct RunningExporter {
    handle: SchedulerHandle,
    tasks: TaskQueue,
    drainer: TaskDrainer,
    router: Router,
}

impl Exporter {
    /// Load samples and build the registry, runner, emitter and scheduler.
    /// Must be called inside a tokio runtime.
    pub fn build(config: ExporterConfig) -> anyhow::Result<Self> {
        let loader = SampleLoader::new(config.samples_path.clone())
            .with_context(|| format!("samples directory {}", config.samples_path.display()))?;
        let (watcher, samples) = SampleWatcher::initial(loader)?;
        info!(samples = samples.len(), path = %config.samples_path.display(), "samples loaded");

        let registry = hidra_plugins::default_registry()?;
        info!(plugins = ?registry.names(), "plugin registry ready");

        let (tasks, drainer) = TaskQueue::start();
        let ctx = PluginContext {
            registry: Arc::new(registry),
            tasks: tasks.clone(),
        };

        let mut runner = SampleRunner::new(ctx);
        if let Some(sink) = ReportSink::from_config(&config.report)? {
            runner = runner.with_reporter(Arc::new(sink));
        }

        let emitter = Arc::new(MetricsEmitter::new(hidra_metrics::tag_schema(&samples))?);
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            config.worker.clone(),
            samples,
            runner,
            emitter,
        );

        Ok(Self {
            config,
            scheduler: Arc::new(scheduler),
            watcher,
            tasks,
            drainer,
        })
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn router(&self) -> Router {
        server::router(
            Arc::clone(self.scheduler.emitter()),
            &self.config.http_server.metrics_path,
        )
    }

    /// Spawn the scheduler loops and worker pool.
    pub fn start(self) -> RunningExporter {
        let router = self.router();
        let handle = self.scheduler.start(self.watcher);
        RunningExporter {
            handle,
            tasks: self.tasks,
            drainer: self.drainer,
            router,
        }
    }

    /// Bind the listener, run until a shutdown signal arrives, then drain.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.http_server.bind_address();
        let metrics_path = self.config.http_server.metrics_path.clone();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        let running = self.start();
        info!("Metrics listening on http://{}{}", addr, metrics_path);
        axum::serve(listener, running.router())
            .with_graceful_shutdown(server::shutdown_signal())
            .await?;

        running.shutdown().await;
        Ok(())
    }
}

impl RunningExporter {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.handle.scheduler()
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Stop scheduling, let workers drain the queue, then flush background
    /// tasks.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        self.tasks.close();
        let flushed = self.drainer.flush().await;
        info!(background_tasks = flushed, "exporter stopped");
    }
}
