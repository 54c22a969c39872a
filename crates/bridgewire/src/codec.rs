//! # Codec
//!
//! Frames travel as JSON text. The transport never looks inside.

use serde_json::Value;

use crate::error::Result;
use crate::frame::CallId;
use crate::frame::Frame;

/// Key of the marker object that stands for a live object passed by handle.
pub const HANDLE_KEY: &str = "$handle";

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let frame: Frame = serde_json::from_slice(bytes)?;
        frame.validate()?;
        Ok(frame)
    }

    /// The call id of bytes that look like a reply but failed to decode,
    /// so the waiting caller can be failed instead of left pending.
    pub fn salvage_reply_id(bytes: &[u8]) -> Option<CallId> {
        let raw: Value = serde_json::from_slice(bytes).ok()?;
        let call_id = raw.get("Reply")?.get("call_id")?.as_str()?;
        (!call_id.is_empty()).then(|| CallId::from(call_id))
    }
}

/// Builds `{"$handle": id}`.
pub fn handle_marker(id: impl Into<String>) -> Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(HANDLE_KEY.to_string(), Value::String(id.into()));
    Value::Object(map)
}

/// Recognises a handle marker: an object whose only key is `$handle` with a string value.
pub fn as_handle_marker(value: &Value) -> Option<&str> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get(HANDLE_KEY)?.as_str()
}
