use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

// ============================================================================
// Domain Types
// ============================================================================

/// A message as deposited by its sender
///
/// Receivers are de-duplicated on validation, so each identity gets exactly
/// one copy of the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub content: Value,
}

impl Message {
    pub fn validate(mut self) -> AppResult<Self> {
        if self.receivers.is_empty() {
            return Err(AppError::validation("No receivers"));
        }
        if is_empty_content(&self.content) {
            return Err(AppError::validation("No content"));
        }
        require_identity(&self.sender, "sender")?;

        let mut unique: Vec<String> = Vec::with_capacity(self.receivers.len());
        for receiver in self.receivers.drain(..) {
            require_identity(&receiver, "receiver")?;
            if !unique.contains(&receiver) {
                unique.push(receiver);
            }
        }
        self.receivers = unique;
        Ok(self)
    }
}

/// One receiver's copy of a message
///
/// `id` is only assigned by stores with addressable messages; `read` only
/// ever moves from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub receiver: String,
    pub sender: String,
    pub content: Value,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ReadRequest {
    #[serde(default)]
    pub receiver: String,
    /// Opaque client correlation id, echoed back in the response
    #[serde(default, alias = "requestId")]
    pub request_id: Option<i64>,
    #[serde(default, alias = "onlyUnread")]
    pub only_unread: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetReadRequest {
    #[serde(default)]
    pub receiver: String,
    #[serde(alias = "messageId")]
    pub message_id: i64,
    #[serde(default = "default_read")]
    pub read: bool,
}

fn default_read() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountUnreadRequest {
    #[serde(default)]
    pub receiver: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub receiver: String,
    #[serde(alias = "messageId")]
    pub message_id: i64,
}

impl ReadRequest {
    pub fn validate(self) -> AppResult<Self> {
        require_identity(&self.receiver, "receiver")?;
        Ok(self)
    }
}

impl SetReadRequest {
    pub fn validate(self) -> AppResult<Self> {
        require_identity(&self.receiver, "receiver")?;
        if !self.read {
            return Err(AppError::validation("Messages cannot be marked as unread"));
        }
        Ok(self)
    }
}

impl CountUnreadRequest {
    pub fn validate(self) -> AppResult<Self> {
        require_identity(&self.receiver, "receiver")?;
        Ok(self)
    }
}

impl DeleteRequest {
    pub fn validate(self) -> AppResult<Self> {
        require_identity(&self.receiver, "receiver")?;
        Ok(self)
    }
}

/// Parses a request body, reporting malformed JSON as a validation error
pub fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("Invalid request body: {}", e)))
}

fn require_identity(identity: &str, field: &str) -> AppResult<()> {
    if identity.trim().is_empty() {
        return Err(AppError::validation(format!("No {}", field)));
    }
    Ok(())
}

fn is_empty_content(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    pub success: bool,
    pub request_id: Option<i64>,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub success: bool,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(body: Value) -> Message {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_send_without_receivers() {
        let err = message(json!({"sender": "alice", "receivers": [], "content": {"text": "hi"}}))
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "No receivers");

        let err = message(json!({"sender": "alice", "content": {"text": "hi"}}))
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "No receivers");
    }

    #[test]
    fn test_send_without_content() {
        for content in [json!(null), json!({}), json!(""), json!([])] {
            let err = message(json!({"sender": "alice", "receivers": ["bob"], "content": content}))
                .validate()
                .unwrap_err();
            assert_eq!(err.to_string(), "No content");
        }
    }

    #[test]
    fn test_send_requires_identities() {
        let err = message(json!({"receivers": ["bob"], "content": {"text": "hi"}}))
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "No sender");

        let err = message(json!({"sender": "alice", "receivers": ["bob", " "], "content": "hi"}))
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "No receiver");
    }

    #[test]
    fn test_receivers_are_deduplicated_in_order() {
        let msg = message(json!({
            "sender": "alice",
            "receivers": ["bob", "carol", "bob"],
            "content": {"text": "hi"}
        }))
        .validate()
        .unwrap();
        assert_eq!(msg.receivers, vec!["bob", "carol"]);
    }

    #[test]
    fn test_read_request_accepts_camel_case() {
        let req: ReadRequest =
            parse_body(br#"{"receiver":"bob","requestId":42,"onlyUnread":true}"#).unwrap();
        assert_eq!(req.request_id, Some(42));
        assert!(req.only_unread);

        let req: ReadRequest = parse_body(br#"{"receiver":"bob","request_id":7}"#).unwrap();
        assert_eq!(req.request_id, Some(7));
        assert!(!req.only_unread);
    }

    #[test]
    fn test_set_read_rejects_unread() {
        let req: SetReadRequest =
            parse_body(br#"{"receiver":"bob","message_id":1,"read":false}"#).unwrap();
        assert!(req.validate().is_err());

        let req: SetReadRequest = parse_body(br#"{"receiver":"bob","messageId":1}"#).unwrap();
        assert!(req.read);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_malformed_body() {
        let err = parse_body::<ReadRequest>(b"not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid request body"));
    }

    #[test]
    fn test_stored_message_omits_missing_id() {
        let stored = StoredMessage {
            id: None,
            receiver: "bob".to_string(),
            sender: "alice".to_string(),
            content: json!({"text": "hi"}),
            read: false,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["content"], json!({"text": "hi"}));
        assert_eq!(value["read"], json!(false));
    }
}
