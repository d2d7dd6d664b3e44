//! Wire frames and response status.
//!
//! Every message in either direction is one WebSocket text frame:
//!
//! ```json
//! {
//!   "topics": { "TO": "P", "FROM": "UI" },
//!   "contents": { "COMMAND": "reset" }
//! }
//! ```
//!
//! Responses report success through a status field in `contents`
//! (`STATUS` or `status`): `0` or `"ok"` is success, anything else is
//! failure.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::topic::Topics;

// ============================================================================
// Types
// ============================================================================

/// Message body: a JSON object.
pub type Contents = Map<String, Value>;

/// Callback invoked with the contents of a matching inbound frame.
pub type Listener = Arc<dyn Fn(&Contents) + Send + Sync>;

/// Status keys checked in order.
const STATUS_KEYS: [&str; 2] = ["STATUS", "status"];

// ============================================================================
// Frame
// ============================================================================

/// A decoded wire frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Routing descriptor.
    pub topics: Topics,

    /// Message body. Absent contents decode as an empty object.
    #[serde(default)]
    pub contents: Contents,
}

impl Frame {
    /// Creates a frame.
    #[inline]
    #[must_use]
    pub fn new(topics: Topics, contents: Contents) -> Self {
        Self { topics, contents }
    }

    /// Decodes a frame from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a `{topics, contents}` object.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes the frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// OutgoingMessage
// ============================================================================

/// A frame to send, optionally paired with a response expectation.
///
/// A response expectation needs both halves: the topics the reply will
/// arrive on and the callback that receives it. Supplying only one is
/// rejected by [`OutgoingMessage::validate`] before anything is written.
///
/// # Example
///
/// ```
/// use parlay_link::{OutgoingMessage, Topics};
///
/// let message = OutgoingMessage::new(Topics::new().with("TO", "P"))
///     .content("cmd", 1)
///     .response_topics(Topics::new().with("TO", "UI").with("FROM", "P"))
///     .on_response(|contents| println!("{contents:?}"));
/// assert!(message.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct OutgoingMessage {
    /// Routing descriptor.
    pub topics: Topics,
    /// Message body.
    pub contents: Contents,
    /// Topics the reply is expected on.
    pub response_topics: Option<Topics>,
    /// One-shot reply callback.
    pub response_callback: Option<Listener>,
}

impl fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("topics", &self.topics)
            .field("contents", &self.contents)
            .field("response_topics", &self.response_topics)
            .field("has_response_callback", &self.response_callback.is_some())
            .finish()
    }
}

impl OutgoingMessage {
    /// Creates a message with empty contents.
    #[inline]
    #[must_use]
    pub fn new(topics: Topics) -> Self {
        Self {
            topics,
            contents: Contents::new(),
            response_topics: None,
            response_callback: None,
        }
    }

    /// Replaces the contents.
    #[inline]
    #[must_use]
    pub fn contents(mut self, contents: Contents) -> Self {
        self.contents = contents;
        self
    }

    /// Sets a single contents entry.
    #[inline]
    #[must_use]
    pub fn content(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.contents.insert(key.into(), value.into());
        self
    }

    /// Sets the topics the reply will arrive on.
    #[inline]
    #[must_use]
    pub fn response_topics(mut self, topics: Topics) -> Self {
        self.response_topics = Some(topics);
        self
    }

    /// Sets the one-shot reply callback.
    #[inline]
    #[must_use]
    pub fn on_response<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Contents) + Send + Sync + 'static,
    {
        self.response_callback = Some(Arc::new(callback));
        self
    }

    /// Sets the one-shot reply callback from an existing [`Listener`].
    #[inline]
    #[must_use]
    pub fn on_response_listener(mut self, listener: Listener) -> Self {
        self.response_callback = Some(listener);
        self
    }

    /// Checks that response topics and callback are supplied together.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if exactly one of them is present.
    pub fn validate(&self) -> Result<()> {
        match (&self.response_topics, &self.response_callback) {
            (Some(_), None) => Err(Error::invalid_argument(
                "response topics given without a response callback",
            )),
            (None, Some(_)) => Err(Error::invalid_argument(
                "response callback given without response topics",
            )),
            _ => Ok(()),
        }
    }

    /// Splits the message into its wire frame and response expectation.
    pub(crate) fn into_parts(self) -> (Frame, Option<(Topics, Listener)>) {
        let response = match (self.response_topics, self.response_callback) {
            (Some(topics), Some(callback)) => Some((topics, callback)),
            _ => None,
        };
        (Frame::new(self.topics, self.contents), response)
    }
}

// ============================================================================
// ResponseStatus
// ============================================================================

/// Outcome reported by a response's status field.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseStatus {
    /// Status `0` or `"ok"`.
    Success,
    /// Any other status value.
    Failure(Value),
    /// No status field present. Treated as failure.
    Missing,
}

impl ResponseStatus {
    /// Reads the status field of response contents.
    #[must_use]
    pub fn of(contents: &Contents) -> Self {
        let Some(status) = STATUS_KEYS.iter().find_map(|key| contents.get(*key)) else {
            return Self::Missing;
        };

        let success = match status {
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s == "ok",
            _ => false,
        };

        if success {
            Self::Success
        } else {
            Self::Failure(status.clone())
        }
    }

    /// Returns `true` for [`ResponseStatus::Success`].
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Resolves response contents into `Ok` on success or a rejection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteRejection`] carrying the whole response when
    /// the status is not a success.
    pub fn check(contents: Contents) -> Result<Contents> {
        match Self::of(&contents) {
            Self::Success => Ok(contents),
            Self::Failure(status) => Err(Error::remote_rejection(status, contents)),
            Self::Missing => Err(Error::remote_rejection(Value::Null, contents)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn contents(value: Value) -> Contents {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_frame_decode() {
        let frame = Frame::decode(r#"{"topics":{"TO":"UI"},"contents":{"value":42}}"#)
            .expect("decode");
        assert_eq!(frame.topics.get_str("TO"), Some("UI"));
        assert_eq!(frame.contents.get("value"), Some(&json!(42)));
    }

    #[test]
    fn test_frame_decode_without_contents() {
        let frame = Frame::decode(r#"{"topics":{"TO":"UI"}}"#).expect("decode");
        assert!(frame.contents.is_empty());
    }

    #[test]
    fn test_frame_decode_rejects_non_mapping_topics() {
        assert!(Frame::decode(r#"{"topics":[1,2],"contents":{}}"#).is_err());
        assert!(Frame::decode("not json").is_err());
    }

    #[test]
    fn test_frame_encode_shape() {
        let frame = Frame::new(Topics::new().with("TO", "P"), contents(json!({"cmd": 1})));
        let text = frame.encode().expect("encode");
        let value: Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value, json!({"topics": {"TO": "P"}, "contents": {"cmd": 1}}));
    }

    #[test]
    fn test_validate_requires_both_halves() {
        let topics_only = OutgoingMessage::new(Topics::new())
            .response_topics(Topics::new().with("TO", "UI"));
        assert!(matches!(
            topics_only.validate(),
            Err(Error::InvalidArgument { .. })
        ));

        let callback_only = OutgoingMessage::new(Topics::new()).on_response(|_| {});
        assert!(matches!(
            callback_only.validate(),
            Err(Error::InvalidArgument { .. })
        ));

        assert!(OutgoingMessage::new(Topics::new()).validate().is_ok());
    }

    #[test]
    fn test_into_parts() {
        let (frame, response) = OutgoingMessage::new(Topics::new().with("TO", "P"))
            .content("cmd", 1)
            .response_topics(Topics::new().with("FROM", "P"))
            .on_response(|_| {})
            .into_parts();

        assert_eq!(frame.contents.get("cmd"), Some(&json!(1)));
        let (topics, _) = response.expect("response expectation");
        assert_eq!(topics.get_str("FROM"), Some("P"));
    }

    #[test]
    fn test_status_success_values() {
        assert!(ResponseStatus::of(&contents(json!({"STATUS": 0}))).is_success());
        assert!(ResponseStatus::of(&contents(json!({"status": 0}))).is_success());
        assert!(ResponseStatus::of(&contents(json!({"status": "ok"}))).is_success());
        assert!(ResponseStatus::of(&contents(json!({"STATUS": 0.0}))).is_success());
    }

    #[test]
    fn test_status_failure_values() {
        assert_eq!(
            ResponseStatus::of(&contents(json!({"STATUS": -1}))),
            ResponseStatus::Failure(json!(-1))
        );
        assert_eq!(
            ResponseStatus::of(&contents(json!({"status": "error"}))),
            ResponseStatus::Failure(json!("error"))
        );
        assert_eq!(
            ResponseStatus::of(&contents(json!({"value": 1}))),
            ResponseStatus::Missing
        );
    }

    #[test]
    fn test_check_keeps_payload_on_failure() {
        let err = ResponseStatus::check(contents(json!({"STATUS": 3, "why": "busy"})))
            .unwrap_err();
        let response = err.response().expect("payload");
        assert_eq!(response.get("why"), Some(&json!("busy")));
    }
}
