//! Request bodies of the node routes.
//!
//! The bodies carry the fields of the corresponding [`NodeMsg`] variant as a flat JSON object.
use mpc_session_client::{NodeMsg, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /distribute/share`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    /// The session the input belongs to.
    pub session_id: Uuid,
    /// Name of the input.
    pub input_name: String,
    /// The node's share.
    pub share_payload: Vec<u8>,
}

/// Body of `POST /distribute/public`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicRequest {
    /// The session the input belongs to.
    pub session_id: Uuid,
    /// Name of the input.
    pub input_name: String,
    /// The cleartext value.
    pub value: Value,
}

/// Body of `POST /execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// The session to execute.
    pub session_id: Uuid,
    /// The program the node is expected to run.
    pub program_id: String,
}

/// Body of `POST /abandon`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbandonRequest {
    /// The abandoned session.
    pub session_id: Uuid,
}

/// The route of a message and its JSON body.
pub(crate) fn route(msg: NodeMsg) -> (&'static str, serde_json::Result<serde_json::Value>) {
    match msg {
        NodeMsg::DistributeShare {
            session_id,
            input_name,
            share_payload,
        } => (
            "distribute/share",
            serde_json::to_value(ShareRequest {
                session_id,
                input_name,
                share_payload,
            }),
        ),
        NodeMsg::DistributePublic {
            session_id,
            input_name,
            value,
        } => (
            "distribute/public",
            serde_json::to_value(PublicRequest {
                session_id,
                input_name,
                value,
            }),
        ),
        NodeMsg::Execute {
            session_id,
            program_id,
        } => (
            "execute",
            serde_json::to_value(ExecuteRequest {
                session_id,
                program_id,
            }),
        ),
        NodeMsg::Abandon { session_id } => {
            ("abandon", serde_json::to_value(AbandonRequest { session_id }))
        }
    }
}
