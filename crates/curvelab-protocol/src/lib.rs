//! # Curvelab Protocol Crate
//!
//! This crate defines the message formats exchanged between session
//! clients and the session hub. It is the single source of truth for the
//! wire schema: JSON over a persistent full-duplex text channel, with
//! change blobs carried as arrays of unsigned bytes.

use curvelab_common::{Point, PresenceRecord};
use serde::{Deserialize, Serialize};

/// Protocol version for message compatibility.
pub const PROTOCOL_VERSION: u32 = 1;

/// The session id used when none is given explicitly.
pub const DEFAULT_SESSION_ID: &str = "default";

/// All messages exchanged between client and hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Client asks the hub for the authoritative session state.
    #[serde(rename = "sync-request", rename_all = "camelCase")]
    SyncRequest { sender_id: String },

    /// Hub answers a sync request. The client must load `document_state`
    /// before doing anything else; a first user then replays its local
    /// store into the session.
    #[serde(rename = "sync-response", rename_all = "camelCase")]
    SyncResponse {
        session_id: String,
        document_state: Vec<u8>,
        is_first_user: bool,
    },

    /// A replicated-document change blob, flowing either direction.
    #[serde(rename = "change", rename_all = "camelCase")]
    Change { sender_id: String, changes: Vec<u8> },

    /// Presence fan-out; the hub relays these without interpretation.
    #[serde(rename = "presence", rename_all = "camelCase")]
    Presence {
        sender_id: String,
        presence: PresencePayload,
    },
}

/// Structured presence payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    #[serde(rename = "type")]
    pub kind: PresenceKind,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_curve_id: Option<String>,
    /// The full presence record, carried on updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<PresenceRecord>,
}

/// Kinds of presence notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    /// Cursor or selection moved, or the user record changed.
    Update,
    /// The user's connection closed; peers should drop their cursor.
    Leave,
}

impl WireMessage {
    /// Sender id of the message, where one exists.
    pub fn sender_id(&self) -> Option<&str> {
        match self {
            WireMessage::SyncRequest { sender_id }
            | WireMessage::Change { sender_id, .. }
            | WireMessage::Presence { sender_id, .. } => Some(sender_id),
            WireMessage::SyncResponse { .. } => None,
        }
    }

    /// Encode to the JSON text frame sent over the channel.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode a received text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Errors from encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}
