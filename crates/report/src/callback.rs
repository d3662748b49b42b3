//! HTTP callback destination: POSTs the report JSON to a fixed URL.

use std::time::Duration;

use async_trait::async_trait;
use hidra_core::Report;
use tracing::debug;

use crate::error::ReportError;
use crate::traits::ReportDestination;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct CallbackDestination {
    url: String,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl CallbackDestination {
    pub fn new(url: impl Into<String>) -> Result<Self, ReportError> {
        let url = url.into();
        if url.is_empty() {
            return Err(ReportError::Config("report.callback.url is not set".to_string()));
        }
        let client = reqwest::Client::builder().timeout(CALLBACK_TIMEOUT).build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReportDestination for CallbackDestination {
    fn name(&self) -> &str {
        "callback"
    }

    async fn write(&self, report: &Report) -> Result<(), ReportError> {
        let body = report.to_json()?;
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::CallbackStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        debug!(url = %self.url, sample = %report.name, %status, "report delivered to callback");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    use super::*;

    async fn serve(status: StatusCode) -> (String, Arc<Mutex<Vec<String>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let app = Router::new().route(
            "/hook",
            post(move |body: String| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), received)
    }

    fn report() -> Report {
        Report {
            name: "homepage".to_string(),
            last_error: "expected status code 200 but got 500".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn posts_report_json() {
        let (url, received) = serve(StatusCode::OK).await;
        CallbackDestination::new(url).unwrap().write(&report()).await.unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(value["name"], "homepage");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, _received) = serve(StatusCode::BAD_GATEWAY).await;
        let err = CallbackDestination::new(url).unwrap().write(&report()).await.unwrap_err();
        assert!(matches!(err, ReportError::CallbackStatus { status: 502, .. }));
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(matches!(CallbackDestination::new(""), Err(ReportError::Config(_))));
    }
}
