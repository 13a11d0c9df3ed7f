use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod history;
pub mod protocol;

pub use history::{HistoryStore, Keyed};
pub use protocol::{
    ACK_BODY, DEFAULT_PORT, DEV_PORT, DecodedBody, SYNC_PATH, SyncMessage, default_port,
};

pub const MAX_ADDRESS_HISTORY: usize = 10;
pub const MAX_CLIPBOARD_HISTORY: usize = 50;
pub const MAX_SYNC_RECORDS: usize = 50;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("content must not be empty")]
    EmptyContent,
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A receiver address the sender has used, keyed by `address`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressHistoryEntry {
    pub address: String,
    pub last_used_at_millis: i64,
}

impl AddressHistoryEntry {
    #[must_use]
    pub fn touched_now(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            last_used_at_millis: now_unix_ms(),
        }
    }
}

impl Keyed for AddressHistoryEntry {
    fn key(&self) -> &str {
        &self.address
    }
}

/// One piece of text the receiver put on the clipboard.
///
/// Items are never deduplicated by content; `id` is the only identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClipboardHistoryItem {
    pub id: String,
    pub content: String,
    pub received_at: i64,
}

impl ClipboardHistoryItem {
    #[must_use]
    pub fn received_now(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            received_at: now_unix_ms(),
        }
    }
}

impl Keyed for ClipboardHistoryItem {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Outcome of one send attempt, as shown in the sender's log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRecord {
    pub timestamp: String,
    pub content: String,
    pub success: bool,
    pub message: String,
}

pub fn validate_content(content: &str) -> Result<(), CoreError> {
    if content.is_empty() {
        return Err(CoreError::EmptyContent);
    }
    Ok(())
}

pub fn now_unix_ms() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub fn now_unix_secs() -> i64 {
    now_unix_ms() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_is_rejected() {
        assert!(matches!(validate_content(""), Err(CoreError::EmptyContent)));
        assert!(validate_content(" ").is_ok());
    }

    #[test]
    fn identical_clipboard_content_gets_distinct_ids() {
        let a = ClipboardHistoryItem::received_now("same");
        let b = ClipboardHistoryItem::received_now("same");
        assert_ne!(a.id, b.id);
        assert_eq!(a.content, b.content);
    }

    #[test]
    fn address_entry_serializes_with_camel_case_fields() {
        let entry = AddressHistoryEntry {
            address: "192.168.1.20:4500".to_owned(),
            last_used_at_millis: 1_735_000_000_000,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"address":"192.168.1.20:4500","lastUsedAtMillis":1735000000000}"#
        );
    }
}
