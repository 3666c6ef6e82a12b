//! Relay Protocol Types
//!
//! Messages exchanged between performer clients and the relay. Every frame is
//! a JSON object carrying a `type` tag. The control kinds below are handled by
//! the server; any other tag is an edit payload that is relayed verbatim.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Client identifier. Allocated from 0 upwards; negative values are reserved.
pub type ClientId = i64;

/// Sender id used on notices that originate from the server itself.
pub const SERVER_ID: ClientId = -1;

/// Handshake reply for a rejected password.
pub const AUTH_FAILED: ClientId = -1;

/// Tags the server interprets. Anything else is an [`EditPayload`].
const CONTROL_TAGS: &[&str] = &[
    "password",
    "join",
    "full_state",
    "full_state_request",
    "departed",
    "notice",
];

/// Cursor position of a performer, as last reported by their edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub row: u32,
    pub col: u32,
}

/// Handshake credentials: the hex SHA-256 digest of the performer's password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub password: String,
}

/// Introduces a peer. Inbound joins only need `name`; the server fills in
/// the rest when it announces the peer to others, so whatever a client puts
/// in those fields is accepted and ignored if it does not fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(default = "unassigned", deserialize_with = "lenient_id")]
    pub client_id: ClientId,
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub hostname: String,
    #[serde(default, deserialize_with = "lenient")]
    pub port: u16,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub row: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub col: Option<u32>,
}

fn unassigned() -> ClientId {
    SERVER_ID
}

/// Decode a field the server overwrites anyway, falling back to the default
/// when the client sent something of the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_id<'de, D>(deserializer: D) -> Result<ClientId, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_i64().unwrap_or(SERVER_ID))
}

/// Whole-document payload, routed to exactly one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullState {
    #[serde(default = "unassigned")]
    pub sender_id: ClientId,
    pub document: Value,
    pub target_client_id: ClientId,
}

/// Asks the leader to push its document to `target_client_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullStateRequest {
    pub requester_id: ClientId,
    pub target_client_id: ClientId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Departed {
    pub client_id: ClientId,
}

/// Informational text. `sender_id == SERVER_ID` for server notices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    #[serde(default = "unassigned")]
    pub sender_id: ClientId,
    pub text: String,
}

/// An edit operation the relay does not interpret.
///
/// The `type` tag and every field other than `src_id` are preserved exactly
/// as received. The payload is echoed back to its sender unless it carries a
/// `reply` field whose value is anything other than `1` (or `true`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_id: Option<ClientId>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EditPayload {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            src_id: None,
            fields: Map::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn suppresses_echo(&self) -> bool {
        match self.fields.get("reply") {
            None => false,
            Some(Value::Bool(echo)) => !echo,
            Some(Value::Number(n)) => n.as_f64() != Some(1.0),
            Some(_) => true,
        }
    }

    /// Cursor carried by position-bearing edits (`row` and `col`).
    pub fn cursor(&self) -> Option<Cursor> {
        let row = self.fields.get("row")?.as_u64()?;
        let col = self.fields.get("col")?.as_u64()?;
        Some(Cursor {
            row: u32::try_from(row).ok()?,
            col: u32::try_from(col).ok()?,
        })
    }
}

/// Every frame the relay understands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum Message {
    Password(Credentials),
    Join(PeerInfo),
    FullState(FullState),
    FullStateRequest(FullStateRequest),
    Departed(Departed),
    Notice(Notice),
    Edit(EditPayload),
}

/// Owned, tag-driven view of the control kinds, used for decoding.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Control {
    Password(Credentials),
    Join(PeerInfo),
    FullState(FullState),
    FullStateRequest(FullStateRequest),
    Departed(Departed),
    Notice(Notice),
}

impl From<Control> for Message {
    fn from(control: Control) -> Self {
        match control {
            Control::Password(m) => Message::Password(m),
            Control::Join(m) => Message::Join(m),
            Control::FullState(m) => Message::FullState(m),
            Control::FullStateRequest(m) => Message::FullStateRequest(m),
            Control::Departed(m) => Message::Departed(m),
            Control::Notice(m) => Message::Notice(m),
        }
    }
}

impl TryFrom<Value> for Message {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Some(tag) = value.get("type").and_then(Value::as_str) else {
            return Err(serde::de::Error::custom(
                "message has no string `type` tag",
            ));
        };
        if CONTROL_TAGS.contains(&tag) {
            serde_json::from_value::<Control>(value).map(Message::from)
        } else {
            serde_json::from_value::<EditPayload>(value).map(Message::Edit)
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        enum Tagged<'a> {
            Password(&'a Credentials),
            Join(&'a PeerInfo),
            FullState(&'a FullState),
            FullStateRequest(&'a FullStateRequest),
            Departed(&'a Departed),
            Notice(&'a Notice),
        }

        match self {
            Message::Password(m) => Tagged::Password(m).serialize(serializer),
            Message::Join(m) => Tagged::Join(m).serialize(serializer),
            Message::FullState(m) => Tagged::FullState(m).serialize(serializer),
            Message::FullStateRequest(m) => Tagged::FullStateRequest(m).serialize(serializer),
            Message::Departed(m) => Tagged::Departed(m).serialize(serializer),
            Message::Notice(m) => Tagged::Notice(m).serialize(serializer),
            Message::Edit(edit) => edit.serialize(serializer),
        }
    }
}

impl Message {
    /// Server-originated informational notice.
    pub fn server_notice(text: impl Into<String>) -> Self {
        Message::Notice(Notice {
            sender_id: SERVER_ID,
            text: text.into(),
        })
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Message::Password(_) => "password",
            Message::Join(_) => "join",
            Message::FullState(_) => "full_state",
            Message::FullStateRequest(_) => "full_state_request",
            Message::Departed(_) => "departed",
            Message::Notice(_) => "notice",
            Message::Edit(edit) => &edit.kind,
        }
    }

    /// Stamp the relaying client's id onto the message's source field.
    pub fn stamp_source(&mut self, id: ClientId) {
        match self {
            Message::Edit(edit) => edit.src_id = Some(id),
            Message::Notice(notice) => notice.sender_id = id,
            Message::FullState(state) => state.sender_id = id,
            Message::FullStateRequest(request) => request.requester_id = id,
            Message::Password(_) | Message::Join(_) | Message::Departed(_) => {}
        }
    }

    pub fn suppresses_echo(&self) -> bool {
        matches!(self, Message::Edit(edit) if edit.suppresses_echo())
    }

    pub fn cursor(&self) -> Option<Cursor> {
        match self {
            Message::Edit(edit) => edit.cursor(),
            _ => None,
        }
    }
}
