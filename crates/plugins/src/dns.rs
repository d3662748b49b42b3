//! Name resolution through the system resolver.

use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use hidra_core::Metric;
use hidra_runtime::state::missing;
use hidra_runtime::{
    EvaluationState, Plugin, PluginContext, StateKey, StateValue, StepDefinition, StepError,
    StepRequest,
};
use tokio::net::lookup_host;
use tracing::debug;

pub struct DnsPlugin;

impl DnsPlugin {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(
        &self,
        state: &mut EvaluationState,
        step: &StepRequest,
        out: &mut Vec<Metric>,
    ) -> Result<(), StepError> {
        let host = step.require("host")?;
        let budget = state.remaining();
        let start = std::time::Instant::now();

        let resolved = tokio::time::timeout(budget, lookup_host((host, 0)))
            .await
            .map_err(|_| StepError::Timeout(budget))?
            .map_err(|e| StepError::execution(format!("failed to resolve {host}: {e}")))?;
        let elapsed = start.elapsed();

        let mut addresses: Vec<IpAddr> = resolved.map(|a| a.ip()).collect();
        addresses.sort();
        addresses.dedup();
        if addresses.is_empty() {
            return Err(StepError::execution(format!("no address found for {host}")));
        }
        debug!(host, count = addresses.len(), "resolved host");

        out.push(
            Metric::new("dns_resolve_time", elapsed.as_secs_f64() * 1000.0)
                .label("host", host)
                .description("DNS resolution time in milliseconds"),
        );
        for address in &addresses {
            out.push(
                Metric::new("dns_addresses", 1.0)
                    .label("host", host)
                    .label("address", address.to_string())
                    .description("Addresses returned for the host")
                    .purge_on(&["address"]),
            );
        }

        state.set_text(StateKey::ConnectionIp, addresses[0].to_string());
        state.insert(StateKey::DnsInfo, StateValue::Addresses(addresses));
        Ok(())
    }

    fn address_should_be(&self, state: &EvaluationState, step: &StepRequest) -> Result<(), StepError> {
        let expected: IpAddr = step
            .require("address")?
            .parse()
            .map_err(|e| StepError::execution(format!("invalid address: {e}")))?;
        let Some(StateValue::Addresses(addresses)) = state.get(StateKey::DnsInfo) else {
            return Err(missing(StateKey::DnsInfo));
        };
        if addresses.contains(&expected) {
            Ok(())
        } else {
            let got: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
            Err(StepError::execution(format!(
                "expected address {expected} but got {}",
                got.join(", ")
            )))
        }
    }
}

impl Default for DnsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DnsPlugin {
    fn name(&self) -> &str {
        "dns"
    }

    fn steps(&self) -> BTreeMap<String, StepDefinition> {
        BTreeMap::from([
            (
                "resolve".to_string(),
                StepDefinition::new("Resolve a host name").required("host", "name to resolve"),
            ),
            (
                "addressShouldBe".to_string(),
                StepDefinition::new("Fail unless the resolved set contains an address")
                    .required("address", "expected IP address"),
            ),
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
            "resolve" => self.resolve(state, step, out).await,
            "addressShouldBe" => self.address_should_be(state, step),
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

    fn step(action: &str, key: &str, value: &str) -> StepRequest {
        let mut step = StepRequest::new("dns", action);
        step.args.insert(key.to_string(), value.to_string());
        step
    }

    #[tokio::test]
    async fn resolves_ip_literal() {
        let (ctx, _drainer) = testing::context();
        let mut state = testing::state();
        let mut out = Vec::new();
        let plugin = DnsPlugin::new();

        plugin
            .run_step(&ctx, &mut state, &step("resolve", "host", "127.0.0.1"), &mut out)
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[1].name, "dns_addresses");
        assert!(out[1].purge);
        assert_eq!(state.text(StateKey::ConnectionIp), Some("127.0.0.1"));

        plugin
            .run_step(&ctx, &mut state, &step("addressShouldBe", "address", "127.0.0.1"), &mut out)
            .await
            .unwrap();
        let err = plugin
            .run_step(&ctx, &mut state, &step("addressShouldBe", "address", "10.0.0.1"), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("expected address 10.0.0.1"));
    }

    #[tokio::test]
    async fn assertion_before_resolve_is_missing_context() {
        let (ctx, _drainer) = testing::context();
        let mut state = testing::state();
        let err = DnsPlugin::new()
            .run_step(&ctx, &mut state, &step("addressShouldBe", "address", "127.0.0.1"), &mut Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err, StepError::MissingContext("dns.info".to_string()));
    }
}
