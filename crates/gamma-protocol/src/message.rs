//! Protocol message type.
//!
//! Every unit exchanged on a worker channel or on the wire is one
//! [`Message`]: a `command` tag plus a flat map of JSON fields. Requests,
//! responses, and unsolicited events all share this shape, so workers can
//! route messages without knowing every field in advance.

use crate::error::ProtocolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command tags used on the wire and between workers.
pub mod tags {
    pub const PING: &str = "ping";
    pub const PING_OK: &str = "ping_ok";
    pub const CLOSE: &str = "close";
    pub const CLOSE_OK: &str = "close_ok";
    /// Worker-internal acknowledgement of `close`, never sent on the wire.
    pub const CLOSED: &str = "closed";

    pub const DETECTOR_CONFIG: &str = "detector_config";
    pub const DETECTOR_CONFIG_SUCCESS: &str = "detector_config_success";
    pub const DETECTOR_CONFIG_BUSY: &str = "detector_config_busy";
    pub const DETECTOR_CONFIG_ERROR: &str = "detector_config_error";

    pub const START_SESSION: &str = "start_session";
    pub const START_SESSION_SUCCESS: &str = "start_session_success";
    pub const START_SESSION_BUSY: &str = "start_session_busy";

    pub const STOP_SESSION: &str = "stop_session";
    pub const STOP_SESSION_SUCCESS: &str = "stop_session_success";
    pub const STOP_SESSION_NONE: &str = "stop_session_none";

    pub const DUMP_SESSION: &str = "dump_session";
    pub const DUMP_SESSION_SUCCESS: &str = "dump_session_success";
    pub const DUMP_SESSION_NONE: &str = "dump_session_none";

    pub const SET_GAIN: &str = "set_gain";
    pub const SET_GAIN_OK: &str = "set_gain_ok";

    pub const GET_STATUS: &str = "get_status";
    pub const STATUS: &str = "status";

    /// Unsolicited, one per completed acquisition.
    pub const SPECTRUM: &str = "spectrum";
    /// Unsolicited error report with a `message` field.
    pub const ERROR: &str = "error";
    pub const UNKNOWN_COMMAND: &str = "unknown_command";

    /// Worker-internal notice that a session stopped itself after
    /// repeated acquisition failures.
    pub const SESSION_ABORTED: &str = "session_aborted";
}

/// One protocol message: a command tag plus arbitrary sibling fields.
///
/// Serializes to a flat JSON object, e.g.
/// `{"command":"start_session","session_name":"S1","livetime":2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Command tag identifying the message
    pub command: String,

    /// All remaining fields of the JSON object
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    /// Creates a message with no fields.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Creates a message whose fields are the serialized form of `payload`.
    ///
    /// The payload must serialize to a JSON object; its keys become the
    /// message fields alongside `command`.
    pub fn from_payload<T: Serialize>(
        command: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(payload).map_err(ProtocolError::malformed)?;
        match value {
            Value::Object(fields) => Ok(Self {
                command: command.into(),
                fields,
            }),
            other => Err(ProtocolError::Malformed {
                reason: format!("payload must be a JSON object, got {other}"),
            }),
        }
    }

    /// Deserializes the message fields into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(ProtocolError::malformed)
    }

    /// Creates an unsolicited `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::info(tags::ERROR, message)
    }

    /// Creates a response carrying only a human-readable `message` field.
    ///
    /// Used for every typed negative response (`*_busy`, `*_none`,
    /// `*_error`, `unknown_command`).
    pub fn info(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(command).with("message", message.into())
    }

    /// Creates a response echoing the fields of a request under a new
    /// command tag, the way the original controller acknowledged commands.
    pub fn echo(command: impl Into<String>, request: &Message) -> Self {
        Self {
            command: command.into(),
            fields: request.fields.clone(),
        }
    }

    /// Returns a string field, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Returns a numeric field as f64, if present.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Returns a numeric field as u64, if present.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }
}
