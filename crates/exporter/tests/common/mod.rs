#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use hidra_core::ExporterConfig;
use hidra_exporter::{Exporter, RunningExporter};

/// Probe target with a healthy and a failing endpoint.
pub async fn target() -> String {
    let app = Router::new()
        .route("/ok", get(|| async { "all good" }))
        .route(
            "/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Html("<p>boom</p>")) }),
        );
    serve(app).await
}

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn config(samples: &Path) -> ExporterConfig {
    let mut config = ExporterConfig::default();
    config.samples_path = samples.to_path_buf();
    config.scheduler.enqueue_samples_interval = Duration::from_millis(20);
    config.scheduler.refresh_samples_interval = Duration::from_millis(50);
    config.worker.parallel_jobs = 4;
    config.worker.sleep_between_jobs = Duration::ZERO;
    config
}

pub fn write_sample(dir: &Path, name: &str, yaml: &str) {
    std::fs::write(dir.join(format!("{name}.yml")), yaml).unwrap();
}

/// Start the exporter and serve its router. Returns the metrics URL.
pub async fn start(config: ExporterConfig) -> (RunningExporter, String) {
    let running = Exporter::build(config).unwrap().start();
    let base = serve(running.router()).await;
    (running, format!("{base}/metrics"))
}

pub async fn scrape(url: &str) -> String {
    reqwest::get(url).await.unwrap().text().await.unwrap()
}

/// Value of the first series of `family` whose labels contain `label`.
pub fn series_value(text: &str, family: &str, label: &str) -> Option<f64> {
    text.lines()
        .filter(|l| l.starts_with(&format!("{family}{{")))
        .find(|l| l.contains(label))
        .and_then(|l| l.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
