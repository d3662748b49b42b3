//! Built-in collectors.
//!
//! Each plugin is a value type implementing [`hidra_runtime::Plugin`];
//! [`default_registry`] wires them all into a registry at startup.

pub mod dns;
pub mod http;
pub mod string;
pub mod tcp;
pub mod udp;

#[cfg(test)]
mod testing;

use hidra_runtime::{PluginRegistry, RegistryError};

pub use dns::DnsPlugin;
pub use http::HttpPlugin;
pub use string::StringPlugin;
pub use tcp::TcpPlugin;
pub use udp::UdpPlugin;

/// Registry with every built-in plugin.
pub fn default_registry() -> Result<PluginRegistry, RegistryError> {
    let mut registry = PluginRegistry::new();
    registry.register(HttpPlugin::new())?;
    registry.register(TcpPlugin::new())?;
    registry.register(UdpPlugin::new())?;
    registry.register(DnsPlugin::new())?;
    registry.register(StringPlugin::new())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_builtins() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.names(), vec!["dns", "http", "string", "tcp", "udp"]);
        assert!(registry.has_action("http", "onFailure"));
        assert!(registry.has_action("tcp", "onClose"));
        assert!(!registry.has_action("string", "onFailure"));
    }
}
