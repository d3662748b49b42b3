//! HTTP(S) requests and assertions over the last response.
//!
//! Request options (`setHeader`, `forceIP`, ...) are staged in the evaluation
//! state and consumed by the next `request`. Assertions read the stored
//! [`HttpExchange`] and body.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hidra_core::Metric;
use hidra_runtime::plugin::{ON_CLOSE, ON_FAILURE};
use hidra_runtime::{
    EvaluationState, HttpExchange, Plugin, PluginContext, StateKey, StateValue, StepDefinition,
    StepError, StepRequest,
};
use reqwest::redirect::Policy;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Budget for the follow-up connectivity probe queued after a failure.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REDIRECTS: usize = 10;
const USER_AGENT: &str = concat!("hidra/", env!("CARGO_PKG_VERSION"));

pub struct HttpPlugin;

impl HttpPlugin {
    pub fn new() -> Self {
        Self
    }

    fn staged_headers(state: &EvaluationState) -> BTreeMap<String, String> {
        match state.get(StateKey::HttpHeaders) {
            Some(StateValue::Headers(h)) => h.clone(),
            _ => BTreeMap::new(),
        }
    }

    fn set_header(state: &mut EvaluationState, name: &str, value: &str) {
        let mut headers = Self::staged_headers(state);
        headers.insert(name.to_ascii_lowercase(), value.to_string());
        state.insert(StateKey::HttpHeaders, StateValue::Headers(headers));
    }

    async fn request(
        &self,
        state: &mut EvaluationState,
        step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        let raw_url = step.require("url")?;
        let url = Url::parse(raw_url)
            .map_err(|e| StepError::execution(format!("invalid url '{raw_url}': {e}")))?;
        let method_name = step
            .arg("method")
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .map_err(|_| StepError::execution(format!("invalid HTTP method '{method_name}'")))?;

        let follow = !matches!(
            state.get(StateKey::HttpFollowRedirects),
            Some(StateValue::Flag(false))
        );
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(state.flag(StateKey::HttpInsecureSkipVerify))
            .redirect(if follow { Policy::limited(MAX_REDIRECTS) } else { Policy::none() })
            .timeout(state.remaining());

        if let Some(forced) = state.text(StateKey::HttpForceIp) {
            let ip: IpAddr = forced
                .parse()
                .map_err(|e| StepError::execution(format!("invalid forced IP '{forced}': {e}")))?;
            let host = url
                .host_str()
                .ok_or_else(|| StepError::execution(format!("url '{raw_url}' has no host")))?;
            let port = url.port_or_known_default().unwrap_or(80);
            builder = builder.resolve(host, SocketAddr::new(ip, port));
        }

        let client = builder
            .build()
            .map_err(|e| StepError::execution(format!("failed to build HTTP client: {e}")))?;

        let mut request = client.request(method, url.clone());
        for (name, value) in Self::staged_headers(state) {
            request = request.header(name, value);
        }
        if let Some(body) = step.arg("body") {
            request = request.body(body.to_string());
        }

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| StepError::execution(format!("request to {raw_url} failed: {e}")))?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let remote = response.remote_addr();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(&value);
                })
                .or_insert(value);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| StepError::execution(format!("failed to read body from {raw_url}: {e}")))?;
        let elapsed = start.elapsed();

        debug!(url = %raw_url, status = status_code, elapsed_ms = elapsed.as_millis() as u64, "http response");

        out.push(
            Metric::new("http_response_status_code", status_code as f64)
                .label("url", raw_url)
                .label("method", method_name.as_str())
                .description("HTTP status code of the response"),
        );
        out.push(
            Metric::new("http_response_time", elapsed.as_secs_f64() * 1000.0)
                .label("url", raw_url)
                .label("method", method_name.as_str())
                .description("Time to receive the full response in milliseconds"),
        );
        out.push(
            Metric::new("http_response_content_length", body.len() as f64)
                .label("url", raw_url)
                .label("method", method_name.as_str())
                .description("Response body size in bytes"),
        );

        if let Some(addr) = remote {
            state.set_text(StateKey::ConnectionIp, addr.ip().to_string());
        }
        state.set_text(StateKey::HttpUrl, raw_url);
        state.set_text(StateKey::HttpMethod, method_name.clone());
        state.insert(
            StateKey::HttpResponse,
            StateValue::HttpResponse(HttpExchange {
                url: raw_url.to_string(),
                final_url,
                method: method_name,
                status_code,
                headers,
                elapsed,
            }),
        );
        state.insert(StateKey::HttpBody, StateValue::Bytes(body.to_vec()));
        Ok(())
    }

    fn status_code_should_be(state: &EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let raw = step.require("statusCode")?;
        let expected: u16 = raw
            .trim()
            .parse()
            .map_err(|_| StepError::execution(format!("invalid status code '{raw}'")))?;
        let response = state.http_response()?;
        if response.status_code == expected {
            Ok(())
        } else {
            Err(StepError::execution(format!(
                "expected status code {expected} but got {}",
                response.status_code
            )))
        }
    }

    fn body_should_contain(state: &EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let search = step.require("search")?;
        let body = state.bytes(StateKey::HttpBody)?;
        if String::from_utf8_lossy(body).contains(search) {
            Ok(())
        } else {
            Err(StepError::execution(format!("expected body to contain '{search}'")))
        }
    }

    fn header_should_contain(state: &EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let name = step.require("header")?.to_ascii_lowercase();
        let search = step.require("search")?;
        let response = state.http_response()?;
        match response.headers.get(&name) {
            Some(value) if value.contains(search) => Ok(()),
            Some(value) => Err(StepError::execution(format!(
                "expected header '{name}' to contain '{search}' but got '{value}'"
            ))),
            None => Err(StepError::execution(format!("header '{name}' not present"))),
        }
    }

    fn should_redirect_to(state: &EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let target = step.require("url")?;
        let response = state.http_response()?;

        // Without redirect following the target is only visible in Location.
        let actual = if response.final_url != response.url {
            Some(response.final_url.clone())
        } else {
            response.headers.get("location").map(|loc| {
                Url::parse(&response.url)
                    .and_then(|base| base.join(loc))
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| loc.clone())
            })
        };

        let normalize = |u: &str| Url::parse(u).map(|u| u.to_string()).unwrap_or_else(|_| u.to_string());
        match actual {
            Some(actual) if normalize(&actual) == normalize(target) => Ok(()),
            Some(actual) => Err(StepError::execution(format!(
                "expected redirect to {target} but got {actual}"
            ))),
            None => Err(StepError::execution(format!(
                "expected redirect to {target} but response was not redirected"
            ))),
        }
    }

    /// Attach the response body and queue a connectivity probe to the host.
    fn on_failure(ctx: &PluginContext, state: &mut EvaluationState) -> Result<(), StepError> {
        let body = state.bytes(StateKey::HttpBody).ok().map(<[u8]>::to_vec);
        if let Some(body) = body {
            let content_type = state
                .http_response()
                .ok()
                .and_then(|r| r.headers.get("content-type").cloned())
                .unwrap_or_default();
            state.attach(attachment_name(&content_type), body);
        }

        let target = state
            .text(StateKey::HttpUrl)
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| Some((u.host_str()?.to_string(), u.port_or_known_default()?)));
        if let Some((host, port)) = target {
            schedule_probe(ctx, host, port);
        }
        Ok(())
    }
}

impl Default for HttpPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn attachment_name(content_type: &str) -> &'static str {
    if content_type.contains("html") {
        "body.html"
    } else if content_type.contains("json") {
        "body.json"
    } else if content_type.contains("xml") {
        "body.xml"
    } else {
        "body.txt"
    }
}

/// Check raw TCP reachability of the failed host off the measurement path.
/// The `tcp` plugin is looked up through the registry.
fn schedule_probe(ctx: &PluginContext, host: String, port: u16) {
    let probe_ctx = ctx.clone();
    ctx.tasks.enqueue(format!("tcp-probe {host}:{port}"), async move {
        let tcp = probe_ctx
            .registry
            .get("tcp")
            .ok_or_else(|| anyhow::anyhow!("tcp plugin not registered"))?;

        let mut state = EvaluationState::new(Instant::now() + PROBE_TIMEOUT);
        let mut connect = StepRequest::new("tcp", "connect");
        connect.args.insert("host".to_string(), host.clone());
        connect.args.insert("port".to_string(), port.to_string());

        let mut metrics = Vec::new();
        tcp.run_step(&probe_ctx, &mut state, &connect, &mut metrics)
            .await
            .map_err(|e| anyhow::anyhow!("{host}:{port} unreachable after failure: {e}"))?;
        let close = StepRequest::new("tcp", ON_CLOSE);
        let _ = tcp.run_step(&probe_ctx, &mut state, &close, &mut metrics).await;

        let connect_ms = metrics.first().map(|m| m.value).unwrap_or_default();
        info!(host = %host, port, connect_ms, "post-failure connectivity probe succeeded");
        Ok(())
    });
}

#[async_trait]
impl Plugin for HttpPlugin {
    fn name(&self) -> &str {
        "http"
    }

    fn steps(&self) -> BTreeMap<String, StepDefinition> {
        BTreeMap::from([
            (
                "request".to_string(),
                StepDefinition::new("Send an HTTP request and record the response")
                    .required("url", "target URL")
                    .optional("method", "HTTP method (default GET)")
                    .optional("body", "request body"),
            ),
            (
                "setHeader".to_string(),
                StepDefinition::new("Add a header to subsequent requests")
                    .required("name", "header name")
                    .required("value", "header value"),
            ),
            (
                "setUserAgent".to_string(),
                StepDefinition::new("Override the User-Agent header")
                    .required("userAgent", "user agent string"),
            ),
            (
                "allowInsecureTLS".to_string(),
                StepDefinition::new("Skip TLS certificate verification")
                    .optional("allow", "true or false (default true)"),
            ),
            (
                "followRedirects".to_string(),
                StepDefinition::new("Enable or disable redirect following")
                    .optional("follow", "true or false (default true)"),
            ),
            (
                "forceIP".to_string(),
                StepDefinition::new("Connect to a fixed IP regardless of DNS")
                    .required("ip", "IP address to connect to"),
            ),
            (
                "statusCodeShouldBe".to_string(),
                StepDefinition::new("Fail unless the last status code matches")
                    .required("statusCode", "expected status code"),
            ),
            (
                "bodyShouldContain".to_string(),
                StepDefinition::new("Fail unless the last body contains a substring")
                    .required("search", "substring to look for"),
            ),
            (
                "headerShouldContain".to_string(),
                StepDefinition::new("Fail unless a response header contains a substring")
                    .required("header", "header name")
                    .required("search", "substring to look for"),
            ),
            (
                "shouldRedirectTo".to_string(),
                StepDefinition::new("Fail unless the response redirected to a URL")
                    .required("url", "expected redirect target"),
            ),
            (
                ON_FAILURE.to_string(),
                StepDefinition::new("Attach the response body and probe the host"),
            ),
        ])
    }

    async fn run_step(
        &self,
        ctx: &PluginContext,
        state: &mut EvaluationState,
        step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        match step.action.as_str() {
            "request" => self.request(state, step, out).await,
            "setHeader" => {
                Self::set_header(state, step.require("name")?, step.require("value")?);
                Ok(())
            }
            "setUserAgent" => {
                Self::set_header(state, "user-agent", step.require("userAgent")?);
                Ok(())
            }
            "allowInsecureTLS" => {
                let allow = step.parse_or("allow", true)?;
                state.insert(StateKey::HttpInsecureSkipVerify, StateValue::Flag(allow));
                Ok(())
            }
            "followRedirects" => {
                let follow = step.parse_or("follow", true)?;
                state.insert(StateKey::HttpFollowRedirects, StateValue::Flag(follow));
                Ok(())
            }
            "forceIP" => {
                let ip = step.require("ip")?;
                ip.parse::<IpAddr>()
                    .map_err(|e| StepError::execution(format!("invalid IP '{ip}': {e}")))?;
                state.set_text(StateKey::HttpForceIp, ip);
                Ok(())
            }
            "statusCodeShouldBe" => Self::status_code_should_be(state, step),
            "bodyShouldContain" => Self::body_should_contain(state, step),
            "headerShouldContain" => Self::header_should_contain(state, step),
            "shouldRedirectTo" => Self::should_redirect_to(state, step),
            ON_FAILURE => Self::on_failure(ctx, state),
            other => Err(StepError::UnknownAction {
                plugin: self.name().to_string(),
                action: other.to_string(),
            }),
        }
    }
}
