//! Responses pushed onto a client's outbound queue.

use serde::Serialize;
use serde_json::Value;

/// Acknowledgement for a `subscribe` request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubscribeAck {
    /// Subscription name.
    pub subscribe: String,
    /// Clock at the start of the initial query.
    pub clock: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Reply to an `unsubscribe` request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnsubscribeAck {
    pub unsubscribe: String,
    /// Whether a subscription by that name existed and was removed.
    pub deleted: bool,
}

/// Unilateral push carrying a subscription's changed files.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubscriptionResults {
    /// Previous baseline; only present for tick-based baselines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    pub is_fresh_instance: bool,
    /// New baseline.
    pub clock: String,
    pub files: Vec<Value>,
    pub root: String,
    pub subscription: String,
    pub unilateral: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Error reply to a malformed request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Anything the daemon sends a client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Subscribe(SubscribeAck),
    Unsubscribe(UnsubscribeAck),
    Results(SubscriptionResults),
    Error(ErrorResponse),
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            error: message.into(),
        })
    }

    /// True for pushes that are not replies to a request.
    pub fn is_unilateral(&self) -> bool {
        matches!(self, Response::Results(r) if r.unilateral)
    }

    /// JSON form as it goes on the wire.
    pub fn to_json(&self) -> Value {
        // Every variant is a plain struct of JSON-representable fields
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
