//! Built-in channel implementations.


pub use test::{TestChannel, TestChannelConfig};

use crate::channel::Channel;
use crate::factory::{ChannelCatalog, ChannelContext};
use std::sync::Arc;

/// Register every built-in channel kind with `catalog`.
pub fn register_builtin(catalog: &ChannelCatalog, test_config: TestChannelConfig) {
    catalog.register(
        test::KIND,
        Arc::new(move |ctx: ChannelContext| -> crate::Result<Arc<dyn Channel>> {
            Ok(Arc::new(TestChannel::new(ctx.unique_id, ctx.platform, test_config.clone())))
        }),
    );
}
