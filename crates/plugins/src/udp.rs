use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hidra_core::Metric;
use hidra_runtime::plugin::ON_CLOSE;
use hidra_runtime::{
    EvaluationState, Plugin, PluginContext, StateKey, StateValue, StepDefinition, StepError,
    StepRequest,
};
use tokio::net::{lookup_host, UdpSocket};

/// Connected UDP socket for request/response probes.
pub struct UdpPlugin;

impl UdpPlugin {
    const DEFAULT_READ_BYTES: usize = 1500;

    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, state: &mut EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let host = step.require("host")?;
        let port: u16 = step.parse_or("port", 0)?;
        if port == 0 {
            return Err(StepError::MissingArgument("port".to_string()));
        }

        let target: SocketAddr = lookup_host((host, port))
            .await
            .map_err(|e| StepError::execution(format!("failed to resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| StepError::execution(format!("no address found for {host}")))?;

        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| StepError::execution(format!("udp bind failed: {e}")))?;
        socket
            .connect(target)
            .await
            .map_err(|e| StepError::execution(format!("udp connect to {target} failed: {e}")))?;

        state.set_text(StateKey::ConnectionIp, target.ip().to_string());
        state.insert(StateKey::UdpConnection, StateValue::Udp(Arc::new(socket)));
        Ok(())
    }

    async fn write(&self, state: &mut EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let data = step.require("data")?;
        let socket = state.udp()?;
        socket
            .send(data.as_bytes())
            .await
            .map_err(|e| StepError::execution(format!("udp send failed: {e}")))?;
        Ok(())
    }

    async fn read(&self, state: &mut EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let limit: usize = step.parse_or("bytes", Self::DEFAULT_READ_BYTES)?;
        let socket = state.udp()?;
        let mut buf = vec![0u8; limit.max(1)];
        let budget = state.remaining();
        let n = tokio::time::timeout(budget, socket.recv(&mut buf))
            .await
            .map_err(|_| StepError::Timeout(budget))?
            .map_err(|e| StepError::execution(format!("udp recv failed: {e}")))?;
        buf.truncate(n);
        state.set_text(StateKey::Output, String::from_utf8_lossy(&buf).into_owned());
        Ok(())
    }
}

impl Default for UdpPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for UdpPlugin {
    fn name(&self) -> &str {
        "udp"
    }

    fn steps(&self) -> BTreeMap<String, StepDefinition> {
        BTreeMap::from([
            (
                "connect".to_string(),
                StepDefinition::new("Open a connected UDP socket")
                    .required("host", "host name or IP")
                    .required("port", "UDP port"),
            ),
            (
                "write".to_string(),
                StepDefinition::new("Send a datagram").required("data", "payload"),
            ),
            (
                "read".to_string(),
                StepDefinition::new("Receive one datagram into output")
                    .optional("bytes", "buffer size (default 1500)"),
            ),
            (ON_CLOSE.to_string(), StepDefinition::new("Drop the socket")),
        ])
    }

    async fn run_step(
        &self,
        _ctx: &PluginContext,
        state: &mut EvaluationState,
        step: &StepRequest,
        _out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        match step.action.as_str() {
            "connect" => self.connect(state, step).await,
            "write" => self.write(state, step).await,
            "read" => self.read(state, step).await,
            ON_CLOSE => {
                state.remove(StateKey::UdpConnection);
                Ok(())
            }
            other => Err(StepError::UnknownAction {
                plugin: self.name().to_string(),
                action: other.to_string(),
            }),
        }
    }
}
