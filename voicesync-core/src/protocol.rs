//! The `/sync` request contract shared by sender and receiver.
//!
//! A request body is either a structured JSON [`SyncMessage`] or, for legacy
//! senders, the raw text itself. The receiver tells them apart by content, not
//! by header: see [`DecodedBody::decode`].

use serde::{Deserialize, Serialize};

use crate::{CoreError, now_unix_secs};

pub const SYNC_PATH: &str = "/sync";
pub const ACK_BODY: &str = "Success";
pub const DEFAULT_PORT: u16 = 4500;
pub const DEV_PORT: u16 = 4501;

/// Port used when none is configured: 4501 for debug builds, 4500 otherwise.
pub fn default_port() -> u16 {
    if cfg!(debug_assertions) {
        DEV_PORT
    } else {
        DEFAULT_PORT
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub content: String,
    /// Whole seconds since the unix epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub auto_enter: bool,
}

impl SyncMessage {
    #[must_use]
    pub fn new(content: impl Into<String>, auto_enter: bool) -> Self {
        Self {
            content: content.into(),
            timestamp: now_unix_secs(),
            auto_enter,
        }
    }

    pub fn encode(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|err| CoreError::Serialization(err.to_string()))
    }
}

/// Which body encoding a request used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBody {
    Structured(SyncMessage),
    RawText(String),
}

impl DecodedBody {
    /// Structured parse first, raw text as the fallback.
    ///
    /// A body that is not UTF-8 decodes to empty raw text, which the server
    /// rejects as empty content.
    pub fn decode(body: &[u8]) -> Self {
        let Ok(text) = std::str::from_utf8(body) else {
            return DecodedBody::RawText(String::new());
        };

        match serde_json::from_str::<SyncMessage>(text) {
            Ok(message) => DecodedBody::Structured(message),
            Err(_) => DecodedBody::RawText(text.to_owned()),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            DecodedBody::Structured(message) => &message.content,
            DecodedBody::RawText(text) => text,
        }
    }

    pub fn auto_enter(&self) -> bool {
        match self {
            DecodedBody::Structured(message) => message.auto_enter,
            DecodedBody::RawText(_) => false,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, DecodedBody::Structured(_))
    }

    /// Raw-text bodies carry no timestamp, so they are stamped on arrival.
    pub fn into_message(self) -> SyncMessage {
        match self {
            DecodedBody::Structured(message) => message,
            DecodedBody::RawText(text) => SyncMessage::new(text, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_encoding_escapes_and_roundtrips() {
        let original = "He said \"hi\"\nNext line\\";
        let message = SyncMessage {
            content: original.to_owned(),
            timestamp: 1_735_000_000,
            auto_enter: true,
        };

        let encoded = message.encode().unwrap();
        assert!(encoded.contains(r#"He said \"hi\"\nNext line\\"#), "{encoded}");
        assert!(encoded.contains(r#""timestamp":1735000000"#));
        assert!(encoded.contains(r#""autoEnter":true"#));

        let decoded = DecodedBody::decode(encoded.as_bytes());
        assert!(decoded.is_structured());
        assert_eq!(decoded.content(), original);
        assert!(decoded.auto_enter());
    }

    #[test]
    fn carriage_return_is_escaped() {
        let encoded = SyncMessage::new("a\r\nb", false).encode().unwrap();
        assert!(encoded.contains(r#""a\r\nb""#), "{encoded}");
    }

    #[test]
    fn legacy_client_without_auto_enter_defaults_to_false() {
        let decoded = DecodedBody::decode(br#"{"content":"hello","timestamp":12}"#);
        match decoded {
            DecodedBody::Structured(message) => {
                assert_eq!(message.content, "hello");
                assert_eq!(message.timestamp, 12);
                assert!(!message.auto_enter);
            }
            other => panic!("expected structured body, got {other:?}"),
        }
    }

    #[test]
    fn content_is_the_only_required_field() {
        let decoded = DecodedBody::decode(br#"{"content":"only"}"#);
        assert_eq!(decoded, DecodedBody::Structured(SyncMessage {
            content: "only".to_owned(),
            timestamp: 0,
            auto_enter: false,
        }));
    }

    #[test]
    fn plain_text_falls_back_to_raw() {
        let decoded = DecodedBody::decode("打开 the door {not json".as_bytes());
        assert_eq!(
            decoded,
            DecodedBody::RawText("打开 the door {not json".to_owned())
        );
        assert!(!decoded.auto_enter());
    }

    #[test]
    fn json_without_content_is_taken_verbatim() {
        let body = r#"{"text":"hello"}"#;
        assert_eq!(
            DecodedBody::decode(body.as_bytes()),
            DecodedBody::RawText(body.to_owned())
        );

        let quoted = r#""just a string""#;
        assert_eq!(
            DecodedBody::decode(quoted.as_bytes()),
            DecodedBody::RawText(quoted.to_owned())
        );
    }

    #[test]
    fn invalid_utf8_decodes_to_empty_content() {
        let decoded = DecodedBody::decode(&[0xff, 0xfe, 0x00]);
        assert_eq!(decoded.content(), "");
    }

    #[test]
    fn raw_text_is_stamped_on_conversion() {
        let message = DecodedBody::RawText("x".to_owned()).into_message();
        assert_eq!(message.content, "x");
        assert!(message.timestamp > 0);
        assert!(!message.auto_enter);
    }
}
