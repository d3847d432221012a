//! CLI subcommands.

use anyhow::{anyhow, ensure};
use clap::Subcommand;
use corelib::channels::{self, test, TestChannel, TestChannelConfig};
use corelib::{
    network, Channel, ChannelArg, ChannelCatalog, ChannelExt, DeviceDatabase, Platform, PlatformKind,
    StaticPlatform, Tier,
};
use proxy::{MemoryNetwork, ProxyConfig, ProxyManager};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub type CommandResult = anyhow::Result<()>;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Proxy the test channel from one in-process tier to another.
    Demo {
        /// Tier that opens the proxy.
        #[arg(long, default_value = "server")]
        requester: Tier,
        /// Tier hosting the real channel. Only phones support it.
        #[arg(long, default_value = "phone")]
        host: Tier,
        /// Events to receive before closing.
        #[arg(long, default_value_t = 3)]
        events: usize,
        /// Test channel period in milliseconds.
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },
    /// Print the name and addresses this machine would advertise.
    Addresses {
        #[arg(long, default_value = "localhost")]
        hostname: String,
    },
}

impl Command {
    pub async fn execute(self) -> CommandResult {
        match self {
            Command::Demo {
                requester,
                host,
                events,
                interval_ms,
            } => demo(requester, host, events, Duration::from_millis(interval_ms)).await,
            Command::Addresses { hostname } => addresses(&hostname).await,
        }
    }
}

fn platform_for(tier: Tier) -> Arc<dyn Platform> {
    let kind = match tier {
        Tier::Phone => PlatformKind::Android,
        Tier::Server => PlatformKind::Server,
        Tier::Cloud => PlatformKind::Cloud,
    };
    Arc::new(StaticPlatform::new(kind))
}

/// One tier of the demo: its platform, catalog and proxy manager.
fn start_tier(network: &MemoryNetwork, tier: Tier, test_config: &TestChannelConfig) -> Arc<ProxyManager> {
    let platform = platform_for(tier);
    let catalog = Arc::new(ChannelCatalog::new(Arc::clone(&platform)));
    channels::register_builtin(&catalog, test_config.clone());
    ProxyManager::new(
        ProxyConfig::new(tier),
        network.endpoint(tier),
        catalog,
        Arc::new(DeviceDatabase::new()),
        platform,
    )
}

async fn demo(requester: Tier, host: Tier, events: usize, interval: Duration) -> CommandResult {
    ensure!(requester != host, "requester and host must be different tiers");

    let network = MemoryNetwork::new();
    let test_config = TestChannelConfig { interval };
    let host_manager = start_tier(&network, host, &test_config);
    let manager = start_tier(&network, requester, &test_config);

    let local = TestChannel::new(test::KIND, platform_for(requester), test_config);
    if local.is_supported() {
        tracing::warn!(%requester, "test channel is supported locally, proxying anyway");
    }
    let proxy = manager.get_proxy_channel(&local, host, vec![ChannelArg::from(test::KIND)]);

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    proxy.subscribe(Arc::new(move |data: &Value| {
        let _ = tx.send(data.clone());
    }));
    proxy.open().await?;
    network.connect(requester, host);

    let patience = interval * 2 + Duration::from_secs(2);
    for n in 1..=events {
        let data = tokio::time::timeout(patience, rx.recv())
            .await
            .map_err(|_| anyhow!("no event from {} after {:?}; is the channel supported there?", host, patience))?
            .ok_or_else(|| anyhow!("event stream closed"))?;
        println!("[{}/{}] {} -> {}: {}", n, events, host, requester, data);
    }

    proxy.send_event(json!({"demo": "done"}))?;
    proxy.close().await?;
    manager.shutdown().await;
    host_manager.shutdown().await;
    Ok(())
}

async fn addresses(hostname: &str) -> CommandResult {
    let candidates: Vec<IpAddr> = local_ipaddress::get()
        .and_then(|ip| ip.parse().ok())
        .into_iter()
        .collect();
    tracing::debug!(?candidates, "local address candidates");

    let name = network::server_name(hostname, &candidates).await;
    println!("server name: {}", name.as_deref().unwrap_or("<none>"));
    for ip in network::server_addresses(&candidates, name.as_deref()) {
        println!("address: {}", ip);
    }
    Ok(())
}
