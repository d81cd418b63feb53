use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kinds of events exchanged over the work queues.
///
/// The wire name (`action`) is the only routing key; there is no schema
/// version field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "product.updated")]
    ProductUpdated,
    #[serde(rename = "product.low-stock")]
    ProductLowStock,
    #[serde(rename = "sale.created")]
    SaleCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::ProductUpdated,
        EventKind::ProductLowStock,
        EventKind::SaleCreated,
    ];

    /// Stable wire name (e.g. `"sale.created"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProductUpdated => "product.updated",
            EventKind::ProductLowStock => "product.low-stock",
            EventKind::SaleCreated => "sale.created",
        }
    }
}

impl core::fmt::Display for EventKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an `action` string does not name a known [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event action: {0}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// A typed event as it travels in a queue message body:
/// `{ "action": "<kind>", "payload": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    pub action: EventKind,
    pub payload: P,
}

impl<P> Event<P> {
    pub fn new(action: EventKind, payload: P) -> Self {
        Self { action, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde_names() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_action_does_not_parse() {
        let err = "order.shipped".parse::<EventKind>().unwrap_err();
        assert_eq!(err, UnknownEventKind("order.shipped".to_string()));
    }

    #[test]
    fn event_serializes_with_action_and_payload() {
        let ev = Event::new(EventKind::SaleCreated, serde_json::json!({ "saleId": "s-1" }));
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "action": "sale.created", "payload": { "saleId": "s-1" } })
        );
    }
}
