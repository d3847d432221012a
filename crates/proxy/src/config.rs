//! Proxy manager configuration.

use corelib::Tier;
use serde::{Deserialize, Serialize};

/// Topic the proxy protocol is multiplexed under.
pub const DEFAULT_TOPIC: &str = "proxy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Tier this manager runs on. Used for log context only; addressing
    /// always comes from the transport.
    pub local_tier: Tier,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

impl ProxyConfig {
    pub fn new(local_tier: Tier) -> Self {
        Self {
            local_tier,
            topic: default_topic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_defaults_when_absent() {
        let config: ProxyConfig = serde_json::from_str(r#"{"local_tier":"server"}"#).unwrap();
        assert_eq!(config, ProxyConfig::new(Tier::Server));
        assert_eq!(config.topic, "proxy");
    }
}
