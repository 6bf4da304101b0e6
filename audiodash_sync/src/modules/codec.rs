use crate::protocol::{InboundMessage, OutboundCommand};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid json: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame has no string `type` tag")]
    MissingTag,
    #[error("no handler for message type {0:?}")]
    UnknownTag(String),
    #[error("invalid `{tag}` payload: {source}")]
    Schema {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decodes one text frame. The tag is checked against the closed set of message kinds
/// before the payload is validated, so an unknown kind is distinguishable from a broken one.
pub fn decode_frame(text: &str) -> Result<InboundMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingTag)?
        .to_string();

    if !InboundMessage::TAGS.contains(&tag.as_str()) {
        return Err(DecodeError::UnknownTag(tag));
    }

    serde_json::from_value(value).map_err(|source| DecodeError::Schema { tag, source })
}

pub fn encode_command(cmd: &OutboundCommand) -> Result<String, serde_json::Error> {
    serde_json::to_string(cmd)
}
