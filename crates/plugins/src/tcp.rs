//! Raw TCP connect/write/read.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use hidra_core::Metric;
use hidra_runtime::plugin::ON_CLOSE;
use hidra_runtime::{
    EvaluationState, Plugin, PluginContext, StateKey, StateValue, StepDefinition, StepError,
    StepRequest,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

pub struct TcpPlugin;

impl TcpPlugin {
    const DEFAULT_READ_BYTES: usize = 1024;

    pub fn new() -> Self {
        Self
    }

    async fn connect(
        &self,
        state: &mut EvaluationState,
        step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        let host = step.require("host")?;
        let port: u16 = step.parse_or("port", 0)?;
        if port == 0 {
            return Err(StepError::MissingArgument("port".to_string()));
        }

        let budget = state.remaining();
        let start = std::time::Instant::now();
        let stream = tokio::time::timeout(budget, TcpStream::connect((host, port)))
            .await
            .map_err(|_| StepError::Timeout(budget))?
            .map_err(|e| StepError::execution(format!("tcp connect to {host}:{port} failed: {e}")))?;
        let elapsed = start.elapsed();

        if let Ok(peer) = stream.peer_addr() {
            state.set_text(StateKey::ConnectionIp, peer.ip().to_string());
        }
        debug!(host, port, elapsed_ms = elapsed.as_millis() as u64, "tcp connected");
        state.insert(StateKey::TcpConnection, StateValue::Tcp(Arc::new(Mutex::new(stream))));

        out.push(
            Metric::new("tcp_connect_time", elapsed.as_secs_f64() * 1000.0)
                .label("host", host)
                .label("port", port.to_string())
                .description("TCP connect time in milliseconds"),
        );
        Ok(())
    }

    async fn write(&self, state: &mut EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let data = step.require("data")?;
        let stream = state.tcp()?;
        let mut stream = stream.lock().await;
        stream
            .write_all(data.as_bytes())
            .await
            .map_err(|e| StepError::execution(format!("tcp write failed: {e}")))
    }

    async fn read(&self, state: &mut EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let limit: usize = step.parse_or("bytes", Self::DEFAULT_READ_BYTES)?;
        let stream = state.tcp()?;
        let mut buf = vec![0u8; limit.max(1)];
        let n = {
            let mut stream = stream.lock().await;
            stream
                .read(&mut buf)
                .await
                .map_err(|e| StepError::execution(format!("tcp read failed: {e}")))?
        };
        buf.truncate(n);
        state.set_text(StateKey::Output, String::from_utf8_lossy(&buf).into_owned());
        Ok(())
    }

    async fn close(&self, state: &mut EvaluationState) -> Result<(), StepError> {
        let Some(StateValue::Tcp(stream)) = state.remove(StateKey::TcpConnection) else {
            return Ok(());
        };
        let mut stream = stream.lock().await;
        stream
            .shutdown()
            .await
            .map_err(|e| StepError::execution(format!("tcp shutdown failed: {e}")))
    }
}

impl Default for TcpPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for TcpPlugin {
    fn name(&self) -> &str {
        "tcp"
    }

    fn steps(&self) -> BTreeMap<String, StepDefinition> {
        BTreeMap::from([
            (
                "connect".to_string(),
                StepDefinition::new("Open a TCP connection")
                    .required("host", "host name or IP")
                    .required("port", "TCP port"),
            ),
            (
                "write".to_string(),
                StepDefinition::new("Write data to the open connection").required("data", "payload"),
            ),
            (
                "read".to_string(),
                StepDefinition::new("Read from the open connection into output")
                    .optional("bytes", "maximum bytes to read (default 1024)"),
            ),
            (ON_CLOSE.to_string(), StepDefinition::new("Close the connection")),
        ])
    }

    async fn run_step(
        &self,
        _ctx: &PluginContext,
        state: &mut EvaluationState,
        step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        match step.action.as_str() {
            "connect" => self.connect(state, step, out).await,
            "write" => self.write(state, step).await,
            "read" => self.read(state, step).await,
            ON_CLOSE => self.close(state).await,
            other => Err(StepError::UnknownAction {
                plugin: self.name().to_string(),
                action: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use tokio::net::TcpListener;

    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });
        port
    }

    fn step(action: &str, args: &[(&str, &str)]) -> StepRequest {
        let mut step = StepRequest::new("tcp", action);
        for (k, v) in args {
            step.args.insert(k.to_string(), v.to_string());
        }
        step
    }

    #[tokio::test]
    async fn connect_write_read_close() {
        let port = echo_server().await.to_string();
        let (ctx, _drainer) = testing::context();
        let mut state = testing::state();
        let mut out = Vec::new();
        let plugin = TcpPlugin::new();

        plugin
            .run_step(&ctx, &mut state, &step("connect", &[("host", "127.0.0.1"), ("port", port.as_str())]), &mut out)
            .await
            .unwrap();
        assert_eq!(state.text(StateKey::ConnectionIp), Some("127.0.0.1"));
        assert_eq!(out[0].name, "tcp_connect_time");
        assert_eq!(out[0].labels["port"], port);

        plugin
            .run_step(&ctx, &mut state, &step("write", &[("data", "ping")]), &mut out)
            .await
            .unwrap();
        plugin
            .run_step(&ctx, &mut state, &step("read", &[]), &mut out)
            .await
            .unwrap();
        assert_eq!(state.text(StateKey::Output), Some("ping"));

        plugin
            .run_step(&ctx, &mut state, &step(ON_CLOSE, &[]), &mut out)
            .await
            .unwrap();
        assert!(!state.contains(StateKey::TcpConnection));
    }

    #[tokio::test]
    async fn write_without_connection_is_missing_context() {
        let (ctx, _drainer) = testing::context();
        let mut state = testing::state();
        let err = TcpPlugin::new()
            .run_step(&ctx, &mut state, &step("write", &[("data", "x")]), &mut Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err, StepError::MissingContext("tcp.connection".to_string()));
    }

    #[tokio::test]
    async fn refused_connection_is_execution_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        drop(listener);

        let (ctx, _drainer) = testing::context();
        let mut state = testing::state();
        let err = TcpPlugin::new()
            .run_step(&ctx, &mut state, &step("connect", &[("host", "127.0.0.1"), ("port", port.as_str())]), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
    }
}
