//! Argument marshaling.
//!
//! Primitives and null cross the wire unchanged, devices travel as
//! `{class: "device", uniqueId}` and are resolved through the device
//! registry on arrival. Everything else is rejected.

use crate::error::ProxyError;
use corelib::{ChannelArg, DeviceRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport-safe form of a [`ChannelArg`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarshaledArg {
    Device(DeviceRef),
    /// Any other JSON value. Only primitives and null are valid.
    Plain(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    class: ArgClass,
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ArgClass {
    Device,
}

impl MarshaledArg {
    pub fn device(unique_id: impl Into<String>) -> Self {
        MarshaledArg::Device(DeviceRef {
            class: ArgClass::Device,
            unique_id: unique_id.into(),
        })
    }
}

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

pub fn marshal_arg(arg: &ChannelArg) -> Result<MarshaledArg, ProxyError> {
    match arg {
        ChannelArg::Callback(_) => Err(ProxyError::MarshalFunction),
        ChannelArg::Value(value) if is_primitive(value) => Ok(MarshaledArg::Plain(value.clone())),
        ChannelArg::Value(other) => Err(ProxyError::MarshalObject(other.to_string())),
        ChannelArg::Device(device) => Ok(MarshaledArg::device(device.unique_id())),
    }
}

pub fn marshal_args(args: &[ChannelArg]) -> Result<Vec<MarshaledArg>, ProxyError> {
    args.iter().map(marshal_arg).collect()
}

pub fn unmarshal_arg(arg: MarshaledArg, devices: &dyn DeviceRegistry) -> Result<ChannelArg, ProxyError> {
    match arg {
        MarshaledArg::Device(reference) => Ok(ChannelArg::Device(devices.get_device(&reference.unique_id)?)),
        MarshaledArg::Plain(value) if is_primitive(&value) => Ok(ChannelArg::Value(value)),
        MarshaledArg::Plain(Value::Object(fields)) => {
            let class = fields
                .get("class")
                .and_then(Value::as_str)
                .unwrap_or("undefined")
                .to_string();
            Err(ProxyError::UnmarshalObject(class))
        }
        MarshaledArg::Plain(_) => Err(ProxyError::UnmarshalObject("array".to_string())),
    }
}

pub fn unmarshal_args(args: Vec<MarshaledArg>, devices: &dyn DeviceRegistry) -> Result<Vec<ChannelArg>, ProxyError> {
    args.into_iter().map(|arg| unmarshal_arg(arg, devices)).collect()
}
