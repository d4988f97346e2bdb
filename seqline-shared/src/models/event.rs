//! Raw conversation events and their enumerated types.

use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::timestamp::Timestamp;

/// Enumerated event type carried in the `type` field of a raw event.
///
/// Only a handful of kinds matter to the ordering engine itself (membership,
/// media presence and transfers); everything else is opaque and preserved
/// verbatim in [`EventKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// `member:joined`
    MemberJoined,
    /// `member:invited`
    MemberInvited,
    /// `member:left`
    MemberLeft,
    /// `member:media`, a change of a member's media legs.
    MemberMedia,
    /// `rtc:transfer`, a call moved into this conversation.
    RtcTransfer,
    /// `rtc:hangup`
    RtcHangup,
    /// `text`
    Text,
    /// `image`
    Image,
    /// `custom`
    Custom,
    /// Any other type string, kept verbatim.
    Other(String),
}

impl EventKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::MemberJoined => "member:joined",
            Self::MemberInvited => "member:invited",
            Self::MemberLeft => "member:left",
            Self::MemberMedia => "member:media",
            Self::RtcTransfer => "rtc:transfer",
            Self::RtcHangup => "rtc:hangup",
            Self::Text => "text",
            Self::Image => "image",
            Self::Custom => "custom",
            Self::Other(raw) => raw,
        }
    }
}

impl Default for EventKind {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "member:joined" => Self::MemberJoined,
            "member:invited" => Self::MemberInvited,
            "member:left" => Self::MemberLeft,
            "member:media" => Self::MemberMedia,
            "rtc:transfer" => Self::RtcTransfer,
            "rtc:hangup" => Self::RtcHangup,
            "text" => Self::Text,
            "image" => Self::Image,
            "custom" => Self::Custom,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-pushed event as it arrives off the wire.
///
/// `id` is kept in its textual form: the server encodes it as a numeric
/// string, but some feeds send a bare JSON number. Anything that does not
/// parse as an integer simply makes the event unsequenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Sequence id within the conversation, in textual form.
    #[serde(
        default,
        deserialize_with = "deserialize_event_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Conversation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Event type.
    #[serde(rename = "type", default)]
    pub kind: EventKind,
    /// Member that originated the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Server time of the event. Values that are neither RFC 3339 strings nor
    /// epoch milliseconds are dropped rather than rejecting the event.
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<Timestamp>,
    /// Type-specific payload, opaque to the engine.
    #[serde(default)]
    pub body: Value,
}

impl RawEvent {
    /// Builds a sequenced event with an empty body.
    pub fn sequenced(cid: impl Into<String>, id: i64, kind: impl Into<EventKind>) -> Self {
        Self {
            id: Some(id.to_string()),
            cid: Some(cid.into()),
            kind: kind.into(),
            from: None,
            timestamp: None,
            body: Value::Null,
        }
    }

    /// Sets the originating member.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Numeric sequence id, if the textual id parses as an integer.
    #[must_use]
    pub fn sequence_id(&self) -> Option<i64> {
        self.id.as_deref()?.trim().parse().ok()
    }

    /// Conversation id and sequence id, or `None` when the event cannot take
    /// part in ordering.
    #[must_use]
    pub fn sequence_key(&self) -> Option<(&str, i64)> {
        let cid = self.cid.as_deref().filter(|cid| !cid.is_empty())?;
        Some((cid, self.sequence_id()?))
    }

    /// `body.channel.id`, present on joins that carry a media leg.
    #[must_use]
    pub fn channel_id(&self) -> Option<&str> {
        self.body.pointer("/channel/id").and_then(Value::as_str)
    }

    /// Whether `body.media.audio` advertises an audio capability.
    #[must_use]
    pub fn has_audio(&self) -> bool {
        match self.body.pointer("/media/audio") {
            None | Some(Value::Null | Value::Bool(false)) => false,
            Some(Value::Object(settings)) => settings
                .get("enabled")
                .is_none_or(|enabled| enabled.as_bool().unwrap_or(true)),
            Some(_) => true,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
    Other(Value),
}

fn deserialize_event_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let id = Option::<WireId>::deserialize(deserializer)?;
    Ok(id.and_then(|id| match id {
        WireId::Text(text) => Some(text),
        WireId::Signed(value) => Some(value.to_string()),
        WireId::Unsigned(value) => Some(value.to_string()),
        WireId::Other(Value::Null) => None,
        WireId::Other(value) => Some(value.to_string()),
    }))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|parsed| Timestamp(parsed.to_utc())),
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(Timestamp),
        _ => None,
    })
}
