//! Host platform abstraction.
//!
//! The capability table is owned by whoever embeds the engine (the Android
//! service, the home server, a cloud instance) and injected into every
//! channel when it is constructed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Platform features a channel may require before it can be constructed.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    LongRunning,
    BigStorage,
    ReliableConnectivity,
    ServerConnectivity,
    StableIp,
    LocalDiscovery,
    Bluetooth,
}

/// Kind of host the process runs on.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Android,
    Server,
    Cloud,
}

/// Host platform queried by channels for their support check.
pub trait Platform: Send + Sync + 'static {
    fn kind(&self) -> PlatformKind;

    fn has_capability(&self, capability: Capability) -> bool;
}

/// Platform backed by a fixed capability table.
#[derive(Clone, Debug)]
pub struct StaticPlatform {
    kind: PlatformKind,
    capabilities: HashSet<Capability>,
}

impl StaticPlatform {
    /// A platform of the given kind with no capabilities.
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            capabilities: HashSet::new(),
        }
    }

    pub fn with_capabilities(
        kind: PlatformKind,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            kind,
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

impl Platform for StaticPlatform {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}
