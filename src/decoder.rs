//! Decoding rendered mock text into response frames.
//!
//! Every frame is a JSON object. A top-level `delay` field (milliseconds) is a
//! control instruction: it is removed from the frame and never reaches the
//! caller.

use crate::error::MockError;
use serde_json::{Map, Value};
use std::time::Duration;

const DELAY_FIELD: &str = "delay";

/// One decoded response message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Message body with `delay` stripped
    pub body: Map<String, Value>,
    /// How long to hold the message before emitting it
    pub delay: Duration,
}

impl Frame {
    /// Build a frame from a JSON object, extracting its delay.
    pub fn from_object(mut body: Map<String, Value>) -> Self {
        let delay = body
            .remove(DELAY_FIELD)
            .map(|v| parse_delay(&v))
            .unwrap_or_default();
        Self { body, delay }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// A bidirectional exchange: `data` per inbound message, `end` on completion.
#[derive(Debug, Clone, PartialEq)]
pub struct BidiExchange {
    pub data: Frame,
    pub end: Option<Frame>,
}

/// Non-negative integer milliseconds; anything else counts as no delay.
fn parse_delay(value: &Value) -> Duration {
    let millis = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    };
    Duration::from_millis(millis)
}

fn parse_object(text: &str) -> Result<Map<String, Value>, MockError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(MockError::decode("expected a JSON object", text)),
        Err(e) => Err(MockError::decode(e.to_string(), text)),
    }
}

/// Decode a unary or client-streaming response.
pub fn decode_frame(text: &str) -> Result<Frame, MockError> {
    parse_object(text).map(Frame::from_object)
}

/// Split a server-streaming document on `separator` and decode each segment.
///
/// Segments are independent: a malformed one yields an error in its own slot.
/// Blank segments are skipped, so an empty document is an empty stream.
pub fn decode_stream(text: &str, separator: &str) -> Vec<Result<Frame, MockError>> {
    text.split(separator)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(decode_frame)
        .collect()
}

/// Decode a bidirectional mock of the shape `{"data": {..}, "end": {..}}`.
pub fn decode_bidi(text: &str) -> Result<BidiExchange, MockError> {
    let mut doc = parse_object(text)?;

    let data = match doc.remove("data") {
        Some(Value::Object(map)) => Frame::from_object(map),
        Some(_) => return Err(MockError::decode("`data` must be a JSON object", text)),
        None => return Err(MockError::decode("missing `data` section", text)),
    };

    let end = match doc.remove("end") {
        Some(Value::Object(map)) => Some(Frame::from_object(map)),
        Some(Value::Null) | None => None,
        Some(_) => return Err(MockError::decode("`end` must be a JSON object", text)),
    };

    Ok(BidiExchange { data, end })
}
