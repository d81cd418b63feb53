//! Untyped view of a queue message body, used at the dispatch boundary.

use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Envelope parsed from a raw message body before routing.
///
/// `action` stays a plain string so that event kinds this process does not
/// know about still parse (and can be ignored instead of failing).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawEvent {
    pub action: String,
    pub payload: JsonValue,
}

impl RawEvent {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}
