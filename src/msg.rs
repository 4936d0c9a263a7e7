//! Messages exchanged with the nodes.
//!
//! The field names and semantics of these messages are shared with node deployments. How they
//! are encoded is up to the transport: [`NodeMsg::to_bytes`] and [`NodeResult::to_bytes`] provide
//! a compact binary encoding for byte-oriented transports, while all messages can also be
//! (de-)serialized with any serde format.
use std::fmt::Debug;

use bincode::Options;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::value::Value;

/// A message sent from the client to a node.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMsg {
    /// The node's share of a secret input.
    DistributeShare {
        /// The session the input belongs to.
        session_id: Uuid,
        /// Name of the input. A later share with the same name replaces an earlier one.
        input_name: String,
        /// The share for the receiving node.
        share_payload: Vec<u8>,
    },
    /// A public input, identical for all nodes.
    DistributePublic {
        /// The session the input belongs to.
        session_id: Uuid,
        /// Name of the input. A later value with the same name replaces an earlier one.
        input_name: String,
        /// The cleartext value.
        value: Value,
    },
    /// Start executing the program on the distributed inputs.
    Execute {
        /// The session to execute.
        session_id: Uuid,
        /// The program the node is expected to run.
        program_id: String,
    },
    /// Stop working on the session and drop its state.
    Abandon {
        /// The abandoned session.
        session_id: Uuid,
    },
}

impl NodeMsg {
    /// The session this message belongs to.
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::DistributeShare { session_id, .. }
            | Self::DistributePublic { session_id, .. }
            | Self::Execute { session_id, .. }
            | Self::Abandon { session_id } => *session_id,
        }
    }

    /// A short name of the message kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DistributeShare { .. } => "DISTRIBUTE_SHARE",
            Self::DistributePublic { .. } => "DISTRIBUTE_PUBLIC",
            Self::Execute { .. } => "EXECUTE",
            Self::Abandon { .. } => "ABANDON",
        }
    }

    /// Encode the message for a byte-oriented transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        to_bytes(self)
    }

    /// Decode a message encoded with [`NodeMsg::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        from_bytes(bytes)
    }
}

/// The result a node reports for a session it executed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The executed session.
    pub session_id: Uuid,
    /// Index of the reporting node.
    pub node_index: usize,
    /// The node's share of the output, or the reason its local execution failed.
    pub payload: Result<Vec<u8>, String>,
}

impl NodeResult {
    /// Encode the result for a byte-oriented transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        to_bytes(self)
    }

    /// Decode a result encoded with [`NodeResult::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        from_bytes(bytes)
    }
}

/// A message could not be (de-)serialized.
#[derive(Debug, thiserror::Error)]
#[error("unable to {op} message")]
pub struct EncodingError {
    op: &'static str,
    #[source]
    source: bincode::Error,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

pub(crate) fn to_bytes(msg: &impl Serialize) -> Result<Vec<u8>, EncodingError> {
    options().serialize(msg).map_err(|source| EncodingError {
        op: "serialize",
        source,
    })
}

/// Length prefixes are bounded by the size of `bytes`, trailing bytes are rejected.
pub(crate) fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EncodingError> {
    options()
        .with_limit(bytes.len() as u64)
        .deserialize(bytes)
        .map_err(|source| EncodingError {
            op: "deserialize",
            source,
        })
}

impl Debug for NodeMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DistributeShare {
                session_id,
                input_name,
                share_payload,
            } => f
                .debug_struct("DistributeShare")
                .field("session_id", session_id)
                .field("input_name", input_name)
                .field("share_len", &share_payload.len())
                .finish(),
            Self::DistributePublic {
                session_id,
                input_name,
                value,
            } => f
                .debug_struct("DistributePublic")
                .field("session_id", session_id)
                .field("input_name", input_name)
                .field("value", value)
                .finish(),
            Self::Execute {
                session_id,
                program_id,
            } => f
                .debug_struct("Execute")
                .field("session_id", session_id)
                .field("program_id", program_id)
                .finish(),
            Self::Abandon { session_id } => f
                .debug_struct("Abandon")
                .field("session_id", session_id)
                .finish(),
        }
    }
}

impl Debug for NodeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("NodeResult");
        s.field("session_id", &self.session_id)
            .field("node_index", &self.node_index);
        match &self.payload {
            Ok(data) => s.field("data_len", &data.len()),
            Err(err) => s.field("error", err),
        };
        s.finish()
    }
}
