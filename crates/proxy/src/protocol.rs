//! Wire protocol of the proxy topic.
//!
//! Every message is a JSON object carrying `target` (the topic), `op` and
//! `channelId`, plus op-specific fields:
//!
//! ```text
//! { op: "request-channel",          channelId, args: MarshaledArg[] }
//! { op: "release-channel",          channelId }
//! { op: "channel-request-complete", channelId, result: "ok" | error }
//! { op: "channel-source-data",      channelId, data }
//! { op: "channel-sink-data",        channelId, data }
//! ```

use crate::codec::MarshaledArg;
use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `result` of a successful `channel-request-complete`.
pub const RESULT_OK: &str = "ok";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ProxyMessage {
    RequestChannel {
        #[serde(rename = "channelId")]
        channel_id: String,
        args: Vec<MarshaledArg>,
    },
    ReleaseChannel {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    ChannelRequestComplete {
        #[serde(rename = "channelId")]
        channel_id: String,
        result: String,
    },
    ChannelSourceData {
        #[serde(rename = "channelId")]
        channel_id: String,
        data: Value,
    },
    ChannelSinkData {
        #[serde(rename = "channelId")]
        channel_id: String,
        data: Value,
    },
}

impl ProxyMessage {
    /// Wire name of the op.
    pub fn op(&self) -> &'static str {
        match self {
            ProxyMessage::RequestChannel { .. } => "request-channel",
            ProxyMessage::ReleaseChannel { .. } => "release-channel",
            ProxyMessage::ChannelRequestComplete { .. } => "channel-request-complete",
            ProxyMessage::ChannelSourceData { .. } => "channel-source-data",
            ProxyMessage::ChannelSinkData { .. } => "channel-sink-data",
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            ProxyMessage::RequestChannel { channel_id, .. }
            | ProxyMessage::ReleaseChannel { channel_id }
            | ProxyMessage::ChannelRequestComplete { channel_id, .. }
            | ProxyMessage::ChannelSourceData { channel_id, .. }
            | ProxyMessage::ChannelSinkData { channel_id, .. } => channel_id,
        }
    }
}

/// Serialize `message` and address it to `topic`.
pub fn encode(topic: &str, message: &ProxyMessage) -> Result<Value, ProxyError> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(fields) = &mut value {
        fields.insert("target".to_string(), Value::String(topic.to_string()));
    }
    Ok(value)
}

/// Parse an incoming message. The `target` field is ignored.
pub fn decode(value: Value) -> Result<ProxyMessage, ProxyError> {
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_layout() {
        let message = ProxyMessage::ChannelRequestComplete {
            channel_id: "test".to_string(),
            result: RESULT_OK.to_string(),
        };
        assert_eq!(
            encode("proxy", &message).unwrap(),
            json!({"target": "proxy", "op": "channel-request-complete", "channelId": "test", "result": "ok"})
        );
    }

    #[test]
    fn test_decode_request_with_device_arg() {
        let message = decode(json!({
            "target": "proxy",
            "op": "request-channel",
            "channelId": "lamp",
            "args": ["test", null, 3, {"class": "device", "uniqueId": "lamp-1"}],
        }))
        .unwrap();

        assert_eq!(message.op(), "request-channel");
        assert_eq!(
            message,
            ProxyMessage::RequestChannel {
                channel_id: "lamp".to_string(),
                args: vec![
                    MarshaledArg::Plain(json!("test")),
                    MarshaledArg::Plain(Value::Null),
                    MarshaledArg::Plain(json!(3)),
                    MarshaledArg::device("lamp-1"),
                ],
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_op() {
        assert!(decode(json!({"op": "subscribe", "channelId": "x"})).is_err());
        assert!(decode(json!("not an object")).is_err());
    }
}
