//! Execution tiers and the composite keys derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the execution environments hosting part of the engine.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Phone,
    Server,
    Cloud,
}

impl Tier {
    /// Every tier, in declaration order.
    pub const ALL: [Tier; 3] = [Tier::Phone, Tier::Server, Tier::Cloud];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Phone => "phone",
            Tier::Server => "server",
            Tier::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phone" => Ok(Tier::Phone),
            "server" => Ok(Tier::Server),
            "cloud" => Ok(Tier::Cloud),
            other => Err(format!("invalid tier '{}'", other)),
        }
    }
}

/// Registry key combining a channel id with a tier: `"<channelId>-<tier>"`.
///
/// On the requesting side the tier is the tier hosting the real channel; on
/// the hosting side it is the tier that asked for it.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FullId(String);

impl FullId {
    pub fn new(channel_id: &str, tier: Tier) -> Self {
        FullId(format!("{}-{}", channel_id, tier))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FullId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_id_format() {
        assert_eq!(FullId::new("test", Tier::Server).as_str(), "test-server");
        assert_eq!(FullId::new("a-b", Tier::Phone).to_string(), "a-b-phone");
    }

    #[test]
    fn test_tier_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Tier::Cloud).unwrap(), "\"cloud\"");
        let tier: Tier = serde_json::from_str("\"phone\"").unwrap();
        assert_eq!(tier, Tier::Phone);
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!("SERVER".parse::<Tier>(), Ok(Tier::Server));
        assert!("desktop".parse::<Tier>().is_err());
    }
}
