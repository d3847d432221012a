//! In-process channel construction arguments.

use crate::device::DeviceHandle;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Callback argument. Usable in-process only; it can never cross a tier.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// A value passed to the channel factory when a channel is looked up.
#[derive(Clone)]
pub enum ChannelArg {
    /// Plain JSON value.
    Value(Value),
    /// Reference to a registered device.
    Device(DeviceHandle),
    Callback(Callback),
}

impl ChannelArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ChannelArg::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceHandle> {
        match self {
            ChannelArg::Device(device) => Some(device),
            _ => None,
        }
    }
}

impl From<Value> for ChannelArg {
    fn from(value: Value) -> Self {
        ChannelArg::Value(value)
    }
}

impl From<&str> for ChannelArg {
    fn from(value: &str) -> Self {
        ChannelArg::Value(Value::String(value.to_string()))
    }
}

impl From<DeviceHandle> for ChannelArg {
    fn from(device: DeviceHandle) -> Self {
        ChannelArg::Device(device)
    }
}

impl fmt::Debug for ChannelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelArg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            ChannelArg::Device(device) => f.debug_tuple("Device").field(&device.unique_id()).finish(),
            ChannelArg::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}
