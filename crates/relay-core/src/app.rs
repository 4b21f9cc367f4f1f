//! Application messages the HTTP ingest endpoints put on the wire.
//!
//! The relay never interprets payloads coming from sockets. These types exist
//! only for the two endpoints that act *as* a peer: transcript ingest speaks
//! as the phone, log retrieval sends a request as the phone and waits for the
//! workstation's answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application protocol version stamped on messages the relay originates.
pub const VERSION: u8 = 1;

/// Tagged application message (`{"type": "user_text", ...}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppMessage {
    /// Text produced by an input device; may be partial or final.
    UserText {
        /// Protocol version.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        v: Option<u8>,
        /// Client-supplied id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// The text.
        text: String,
        /// Producer: `phone`, `tui`, `api`, ...
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        /// Whether this is the final transcript for the utterance.
        #[serde(rename = "final_", default, skip_serializing_if = "is_false")]
        is_final: bool,
    },
    /// Request for the workstation's recent log entries.
    GetLogs {
        /// Correlation id echoed back in [`AppMessage::Logs`].
        id: String,
        /// Maximum number of entries.
        limit: usize,
    },
    /// Answer to [`AppMessage::GetLogs`].
    Logs {
        /// Correlation id of the request.
        #[serde(rename = "replyTo")]
        reply_to: String,
        /// Opaque entries.
        #[serde(default)]
        items: Vec<Value>,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

impl AppMessage {
    /// A versioned `user_text` message.
    pub fn user_text(
        text: impl Into<String>,
        id: Option<String>,
        source: Option<String>,
        is_final: bool,
    ) -> Self {
        Self::UserText {
            v: Some(VERSION),
            id,
            text: text.into(),
            source,
            is_final,
        }
    }

    /// Parse a relayed text payload, if it is an application message at all.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Serialize for relaying.
    pub fn to_json(&self) -> String {
        // Serialization of these variants cannot fail: no maps with non-string keys
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn user_text_wire_shape() {
        let msg = AppMessage::user_text("hello", Some("u1".into()), Some("api".into()), true);
        let v: Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(
            v,
            json!({"type": "user_text", "v": 1, "id": "u1", "text": "hello", "source": "api", "final_": true})
        );
    }

    #[test]
    fn partial_user_text_omits_final_flag() {
        let msg = AppMessage::user_text("hel", None, None, false);
        let v: Value = serde_json::to_value(&msg).unwrap();
        assert!(v.get("final_").is_none());
        assert!(v.get("id").is_none());
    }

    #[test]
    fn get_logs_shape() {
        let msg = AppMessage::GetLogs { id: "c1".into(), limit: 50 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "get_logs", "id": "c1", "limit": 50})
        );
    }

    #[test]
    fn logs_reply_parses_with_camel_case_reply_to() {
        let msg = AppMessage::parse(r#"{"type":"logs","replyTo":"c1","items":[{"line":"a"}]}"#);
        assert_matches!(msg, Some(AppMessage::Logs { ref reply_to, ref items }) if reply_to == "c1" && items.len() == 1);
    }

    #[test]
    fn logs_without_items_defaults_to_empty() {
        let msg = AppMessage::parse(r#"{"type":"logs","replyTo":"c1"}"#);
        assert_matches!(msg, Some(AppMessage::Logs { ref items, .. }) if items.is_empty());
    }

    #[test]
    fn opaque_payloads_are_not_app_messages() {
        assert!(AppMessage::parse("ping-1").is_none());
        assert!(AppMessage::parse(r#"{"type":"something_else"}"#).is_none());
    }
}
