//! Per-run evaluation state shared by the steps of one sample run.
//!
//! Keys come from a closed vocabulary ([`StateKey`]); values are a closed
//! set of variants ([`StateValue`]). Handlers match on the variant they
//! need and report [`StepError::MissingContext`] otherwise.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::StepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Timeouts,
    Sample,
    Variables,
    DnsInfo,
    FtpConnection,
    FtpHost,
    Output,
    HttpInsecureSkipVerify,
    HttpForceIp,
    ConnectionIp,
    HttpFollowRedirects,
    HttpHeaders,
    HttpMethod,
    HttpUrl,
    HttpResponse,
    HttpBody,
    Attachment,
    TcpConnection,
    TlsConnection,
    TlsHost,
    TlsCertificates,
    UdpConnection,
    LastError,
    BrowserSession,
}

impl StateKey {
    pub const ALL: [StateKey; 24] = [
        StateKey::Timeouts,
        StateKey::Sample,
        StateKey::Variables,
        StateKey::DnsInfo,
        StateKey::FtpConnection,
        StateKey::FtpHost,
        StateKey::Output,
        StateKey::HttpInsecureSkipVerify,
        StateKey::HttpForceIp,
        StateKey::ConnectionIp,
        StateKey::HttpFollowRedirects,
        StateKey::HttpHeaders,
        StateKey::HttpMethod,
        StateKey::HttpUrl,
        StateKey::HttpResponse,
        StateKey::HttpBody,
        StateKey::Attachment,
        StateKey::TcpConnection,
        StateKey::TlsConnection,
        StateKey::TlsHost,
        StateKey::TlsCertificates,
        StateKey::UdpConnection,
        StateKey::LastError,
        StateKey::BrowserSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Timeouts => "timeouts",
            StateKey::Sample => "sample",
            StateKey::Variables => "variables",
            StateKey::DnsInfo => "dns.info",
            StateKey::FtpConnection => "ftp.connection",
            StateKey::FtpHost => "ftp.host",
            StateKey::Output => "output",
            StateKey::HttpInsecureSkipVerify => "http.tlsinsecureskipverify",
            StateKey::HttpForceIp => "http.forceip",
            StateKey::ConnectionIp => "connection.ip",
            StateKey::HttpFollowRedirects => "http.followredirects",
            StateKey::HttpHeaders => "http.headers",
            StateKey::HttpMethod => "http.method",
            StateKey::HttpUrl => "http.url",
            StateKey::HttpResponse => "http.response",
            StateKey::HttpBody => "http.body",
            StateKey::Attachment => "attachment",
            StateKey::TcpConnection => "tcp.connection",
            StateKey::TlsConnection => "tls.connection",
            StateKey::TlsHost => "tls.host",
            StateKey::TlsCertificates => "tls.certificates",
            StateKey::UdpConnection => "udp.connection",
            StateKey::LastError => "last.error",
            StateKey::BrowserSession => "browser.session",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StateKey::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown evaluation state key '{s}'"))
    }
}

/// Summary of the last HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpExchange {
    pub url: String,
    pub final_url: String,
    pub method: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum StateValue {
    Text(String),
    Flag(bool),
    Deadline(Instant),
    Headers(BTreeMap<String, String>),
    HttpResponse(HttpExchange),
    Bytes(Vec<u8>),
    Addresses(Vec<IpAddr>),
    Attachments(BTreeMap<String, Vec<u8>>),
    Variables(BTreeMap<String, String>),
    Tcp(Arc<Mutex<TcpStream>>),
    Udp(Arc<UdpSocket>),
}

impl StateValue {
    /// Text form exposed to templates through `ctx(key)`.
    pub fn render(&self) -> String {
        match self {
            StateValue::Text(s) => s.clone(),
            StateValue::Flag(b) => b.to_string(),
            StateValue::Deadline(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .as_millis()
                .to_string(),
            StateValue::Headers(h) | StateValue::Variables(h) => {
                serde_json::to_string(h).unwrap_or_default()
            }
            StateValue::HttpResponse(r) => r.status_code.to_string(),
            StateValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            StateValue::Addresses(addrs) => addrs
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(","),
            StateValue::Attachments(a) => a.keys().cloned().collect::<Vec<_>>().join(","),
            StateValue::Tcp(stream) => stream
                .try_lock()
                .ok()
                .and_then(|s| s.peer_addr().ok())
                .map(|a| a.to_string())
                .unwrap_or_default(),
            StateValue::Udp(socket) => socket
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Mutable bag threaded through every step of one run.
///
/// Only one step touches a given state at a time.
#[derive(Debug)]
pub struct EvaluationState {
    values: HashMap<StateKey, StateValue>,
}

impl EvaluationState {
    /// Fresh state with the run deadline and an empty attachment map.
    pub fn new(deadline: Instant) -> Self {
        let mut values = HashMap::new();
        values.insert(StateKey::Timeouts, StateValue::Deadline(deadline));
        values.insert(StateKey::Attachment, StateValue::Attachments(BTreeMap::new()));
        Self { values }
    }

    pub fn get(&self, key: StateKey) -> Option<&StateValue> {
        self.values.get(&key)
    }

    pub fn insert(&mut self, key: StateKey, value: StateValue) -> Option<StateValue> {
        self.values.insert(key, value)
    }

    pub fn remove(&mut self, key: StateKey) -> Option<StateValue> {
        self.values.remove(&key)
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn set_text(&mut self, key: StateKey, value: impl Into<String>) {
        self.values.insert(key, StateValue::Text(value.into()));
    }

    pub fn text(&self, key: StateKey) -> Option<&str> {
        match self.values.get(&key) {
            Some(StateValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn flag(&self, key: StateKey) -> bool {
        matches!(self.values.get(&key), Some(StateValue::Flag(true)))
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.values.get(&StateKey::Timeouts) {
            Some(StateValue::Deadline(d)) => Some(*d),
            _ => None,
        }
    }

    /// Time left before the run deadline. Zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.text(StateKey::LastError)
    }

    pub fn set_last_error(&mut self, message: impl Into<String>) {
        self.set_text(StateKey::LastError, message);
    }

    pub fn variables(&self) -> BTreeMap<String, String> {
        match self.values.get(&StateKey::Variables) {
            Some(StateValue::Variables(v)) => v.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// Add a named attachment, replacing any previous one with that name.
    pub fn attach(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        let entry = self
            .values
            .entry(StateKey::Attachment)
            .or_insert_with(|| StateValue::Attachments(BTreeMap::new()));
        match entry {
            StateValue::Attachments(map) => {
                map.insert(name.into(), bytes);
            }
            other => {
                let mut map = BTreeMap::new();
                map.insert(name.into(), bytes);
                *other = StateValue::Attachments(map);
            }
        }
    }

    pub fn take_attachments(&mut self) -> BTreeMap<String, Vec<u8>> {
        match self.values.insert(StateKey::Attachment, StateValue::Attachments(BTreeMap::new())) {
            Some(StateValue::Attachments(map)) => map,
            _ => BTreeMap::new(),
        }
    }

    pub fn http_response(&self) -> Result<&HttpExchange, StepError> {
        match self.values.get(&StateKey::HttpResponse) {
            Some(StateValue::HttpResponse(r)) => Ok(r),
            _ => Err(missing(StateKey::HttpResponse)),
        }
    }

    pub fn bytes(&self, key: StateKey) -> Result<&[u8], StepError> {
        match self.values.get(&key) {
            Some(StateValue::Bytes(b)) => Ok(b.as_slice()),
            Some(StateValue::Text(s)) => Ok(s.as_bytes()),
            _ => Err(missing(key)),
        }
    }

    pub fn tcp(&self) -> Result<Arc<Mutex<TcpStream>>, StepError> {
        match self.values.get(&StateKey::TcpConnection) {
            Some(StateValue::Tcp(s)) => Ok(Arc::clone(s)),
            _ => Err(missing(StateKey::TcpConnection)),
        }
    }

    pub fn udp(&self) -> Result<Arc<UdpSocket>, StepError> {
        match self.values.get(&StateKey::UdpConnection) {
            Some(StateValue::Udp(s)) => Ok(Arc::clone(s)),
            _ => Err(missing(StateKey::UdpConnection)),
        }
    }

    /// Every present key rendered as text, for template `ctx()` lookups.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.render()))
            .collect()
    }
}

pub fn missing(key: StateKey) -> StepError {
    StepError::MissingContext(key.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_vocabulary_round_trips_through_strings() {
        for key in StateKey::ALL {
            assert_eq!(key.as_str().parse::<StateKey>().unwrap(), key);
        }
        assert!("http.nope".parse::<StateKey>().is_err());
    }

    #[tokio::test]
    async fn new_state_carries_deadline_and_empty_attachments() {
        let deadline = Instant::now() + Duration::from_secs(10);
        let state = EvaluationState::new(deadline);
        assert_eq!(state.deadline(), Some(deadline));
        assert!(state.remaining() <= Duration::from_secs(10));
        assert!(matches!(
            state.get(StateKey::Attachment),
            Some(StateValue::Attachments(m)) if m.is_empty()
        ));
    }

    #[tokio::test]
    async fn attachments_accumulate_and_drain() {
        let mut state = EvaluationState::new(Instant::now());
        state.attach("body.html", b"<p>hi</p>".to_vec());
        state.attach("trace.txt", b"hop 1".to_vec());

        let taken = state.take_attachments();
        assert_eq!(taken.len(), 2);
        assert!(state.take_attachments().is_empty());
    }

    #[tokio::test]
    async fn typed_accessors_report_missing_context() {
        let state = EvaluationState::new(Instant::now());
        assert_eq!(
            state.http_response().unwrap_err(),
            StepError::MissingContext("http.response".to_string())
        );
        assert!(state.tcp().is_err());
        assert!(state.bytes(StateKey::HttpBody).is_err());
    }

    #[tokio::test]
    async fn snapshot_renders_present_keys() {
        let mut state = EvaluationState::new(Instant::now());
        state.set_text(StateKey::Output, "hello");
        state.insert(StateKey::HttpFollowRedirects, StateValue::Flag(false));
        state.insert(
            StateKey::DnsInfo,
            StateValue::Addresses(vec!["127.0.0.1".parse().unwrap()]),
        );

        let snap = state.snapshot();
        assert_eq!(snap["output"], "hello");
        assert_eq!(snap["http.followredirects"], "false");
        assert_eq!(snap["dns.info"], "127.0.0.1");
        assert!(!snap.contains_key("last.error"));
    }
}
