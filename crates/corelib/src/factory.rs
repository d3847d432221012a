//! Channel factory: turns a lookup request into a live channel.

use crate::arg::ChannelArg;
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::platform::Platform;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Resolves channel lookups to channel instances.
///
/// # Thread Safety
///
/// Shared by every stub build of a tier, which run as concurrent tasks, so
/// implementations must be `Send + Sync`.
#[async_trait]
pub trait ChannelFactory: Send + Sync + 'static {
    /// Obtain the channel described by `args`.
    ///
    /// # Arguments
    /// * `internal` - Leading lookup flag of the engine's factory convention;
    ///   lookups on behalf of a remote tier pass `false`
    /// * `args` - Lookup arguments, channel kind first
    ///
    /// # Returns
    /// The channel, unopened. Callers open it through
    /// [`ChannelExt`](crate::ChannelExt) and may receive an instance others
    /// already hold open.
    async fn resolve_channel(&self, internal: bool, args: Vec<ChannelArg>) -> Result<Arc<dyn Channel>>;
}

/// Everything a channel constructor receives.
pub struct ChannelContext {
    /// Unique id assigned by the catalog.
    pub unique_id: String,
    pub platform: Arc<dyn Platform>,
    /// Lookup arguments after the channel kind.
    pub args: Vec<ChannelArg>,
}

/// Builds a channel of one kind.
pub type ChannelConstructor = Arc<dyn Fn(ChannelContext) -> Result<Arc<dyn Channel>> + Send + Sync>;

/// Factory backed by registered constructors.
///
/// The first lookup argument names the channel kind. The unique id is the
/// kind followed by the remaining arguments (device ids, plain values)
/// joined with `-`. One live instance is kept per unique id, so every
/// requester of the same id shares one real channel.
pub struct ChannelCatalog {
    platform: Arc<dyn Platform>,
    constructors: DashMap<String, ChannelConstructor>,
    instances: DashMap<String, Weak<dyn Channel>>,
}

impl ChannelCatalog {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            constructors: DashMap::new(),
            instances: DashMap::new(),
        }
    }

    pub fn register(&self, kind: impl Into<String>, constructor: ChannelConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    /// Look up a channel of `kind` with no further arguments.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn Channel>> {
        self.lookup(vec![ChannelArg::from(kind)])
    }

    fn lookup(&self, mut args: Vec<ChannelArg>) -> Result<Arc<dyn Channel>> {
        if args.is_empty() {
            return Err(Error::UnknownChannel("<no channel kind>".to_string()));
        }
        let kind = match args.remove(0) {
            ChannelArg::Value(Value::String(kind)) => kind,
            other => return Err(Error::UnknownChannel(format!("{:?}", other))),
        };
        let constructor = self
            .constructors
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnknownChannel(kind.clone()))?;
        let unique_id = unique_id_for(&kind, &args)?;

        match self.instances.entry(unique_id.clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(live) = entry.get().upgrade() {
                    return Ok(live);
                }
                let channel = build(&constructor, unique_id, &self.platform, args)?;
                entry.insert(Arc::downgrade(&channel));
                Ok(channel)
            }
            Entry::Vacant(entry) => {
                let channel = build(&constructor, unique_id, &self.platform, args)?;
                entry.insert(Arc::downgrade(&channel));
                Ok(channel)
            }
        }
    }
}

fn build(
    constructor: &ChannelConstructor,
    unique_id: String,
    platform: &Arc<dyn Platform>,
    args: Vec<ChannelArg>,
) -> Result<Arc<dyn Channel>> {
    let channel = constructor(ChannelContext {
        unique_id: unique_id.clone(),
        platform: Arc::clone(platform),
        args,
    })?;
    if !channel.is_supported() {
        return Err(Error::Unsupported(unique_id));
    }
    tracing::debug!(channel_id = %unique_id, "constructed channel");
    Ok(channel)
}

fn unique_id_for(kind: &str, args: &[ChannelArg]) -> Result<String> {
    let mut parts = vec![kind.to_string()];
    for arg in args {
        let part = match arg {
            ChannelArg::Value(Value::String(s)) => s.clone(),
            ChannelArg::Value(value @ (Value::Null | Value::Bool(_) | Value::Number(_))) => value.to_string(),
            ChannelArg::Device(device) => device.unique_id().to_string(),
            ChannelArg::Value(_) | ChannelArg::Callback(_) => {
                return Err(Error::UnknownChannel(format!("{} with unkeyable argument {:?}", kind, arg)))
            }
        };
        parts.push(part);
    }
    Ok(parts.join("-"))
}

#[async_trait]
impl ChannelFactory for ChannelCatalog {
    async fn resolve_channel(&self, internal: bool, args: Vec<ChannelArg>) -> Result<Arc<dyn Channel>> {
        tracing::debug!(internal, args = args.len(), "resolving channel");
        self.lookup(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelBase;
    use crate::device::{DeviceHandle, SimpleDevice};
    use crate::platform::{Capability, PlatformKind, StaticPlatform};
    use serde_json::json;

    struct Plain {
        base: ChannelBase,
        capabilities: Vec<Capability>,
    }

    impl Channel for Plain {
        fn base(&self) -> &ChannelBase {
            &self.base
        }

        fn required_capabilities(&self) -> &[Capability] {
            &self.capabilities
        }
    }

    fn catalog() -> ChannelCatalog {
        let catalog = ChannelCatalog::new(Arc::new(StaticPlatform::new(PlatformKind::Server)));
        catalog.register(
            "plain",
            Arc::new(|ctx: ChannelContext| -> Result<Arc<dyn Channel>> {
                Ok(Arc::new(Plain {
                    base: ChannelBase::new(ctx.unique_id, ctx.platform),
                    capabilities: Vec::new(),
                }) as Arc<dyn Channel>)
            }),
        );
        catalog.register(
            "radio",
            Arc::new(|ctx: ChannelContext| -> Result<Arc<dyn Channel>> {
                Ok(Arc::new(Plain {
                    base: ChannelBase::new(ctx.unique_id, ctx.platform),
                    capabilities: vec![Capability::Bluetooth],
                }) as Arc<dyn Channel>)
            }),
        );
        catalog
    }

    #[test]
    fn test_instances_are_shared_while_alive() {
        let catalog = catalog();
        let first = catalog.get("plain").unwrap();
        let second = catalog.get("plain").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.unique_id(), "plain");
    }

    #[test]
    fn test_unique_id_includes_arguments() {
        let catalog = catalog();
        let device: DeviceHandle = Arc::new(SimpleDevice::new("lamp-1", "lamp"));
        let channel = catalog
            .lookup(vec!["plain".into(), ChannelArg::Device(device), json!(3).into()])
            .unwrap();
        assert_eq!(channel.unique_id(), "plain-lamp-1-3");
    }

    #[test]
    fn test_unknown_and_unsupported() {
        let catalog = catalog();
        assert_eq!(
            catalog.get("missing").unwrap_err(),
            Error::UnknownChannel("missing".to_string())
        );
        assert_eq!(
            catalog.get("radio").unwrap_err(),
            Error::Unsupported("radio".to_string())
        );
    }
}
