//! Errors raised by the session client.
//!
//! Failures are split by the point at which they occur: [`ValidationError`]s are raised
//! before any network I/O, [`NetworkError`]s describe a single node and are tolerated as long as
//! the threshold can still be met, and [`ExecutionError`]s are terminal for a session.

use std::time::Duration;

use url::Url;
use uuid::Uuid;

use crate::{msg::EncodingError, session::SessionState};

/// A boxed error of a transport or collaborator implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid configuration or input, detected before anything is sent to a node.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// The network config does not list a single node.
    #[error("network config must specify at least one node")]
    NoNodes,
    /// The same node address appears twice in the network config.
    #[error("node {address} is listed more than once")]
    DuplicateNode {
        /// The repeated address.
        address: Url,
    },
    /// The threshold is zero or larger than the number of nodes.
    #[error("threshold must be between 1 and {nodes} (number of nodes) but is {threshold}")]
    InvalidThreshold {
        /// The configured threshold.
        threshold: usize,
        /// The number of configured nodes.
        nodes: usize,
    },
    /// No program id was configured.
    #[error("program_id must be specified, the network runs a specific program")]
    MissingProgramId,
    /// A configured timeout is zero.
    #[error("{which} timeout must be larger than zero")]
    ZeroTimeout {
        /// Which timeout is zero.
        which: &'static str,
    },
    /// The same input name is used twice within one execution request.
    #[error("input name '{name}' is used more than once")]
    DuplicateName {
        /// The duplicate name.
        name: String,
    },
    /// An execution was requested without any inputs.
    #[error("no inputs provided, set secret or public inputs before running")]
    NoInputs,
    /// The network config could not be parsed.
    #[error("invalid network config: {reason}")]
    Malformed {
        /// Parser message.
        reason: String,
    },
}

/// A failure to reach a single node.
///
/// These are absorbed by the session as long as enough other nodes remain reachable.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NetworkError {
    /// The node is marked unreachable and was skipped.
    #[error("node {index} is unreachable")]
    Unreachable {
        /// Index of the node.
        index: usize,
    },
    /// The node did not answer in time.
    #[error("node {index} did not respond within {after:?}")]
    Timeout {
        /// Index of the node.
        index: usize,
        /// The elapsed timeout.
        after: Duration,
    },
    /// The transport reported an error.
    #[error("transport error for node {index}")]
    Transport {
        /// Index of the node.
        index: usize,
        /// The transport error.
        #[source]
        source: BoxError,
    },
    /// There is no node with this index.
    #[error("no node with index {index}")]
    UnknownNode {
        /// The requested index.
        index: usize,
    },
}

impl NetworkError {
    /// Index of the node this error refers to.
    pub fn node_index(&self) -> usize {
        match self {
            Self::Unreachable { index }
            | Self::Timeout { index, .. }
            | Self::Transport { index, .. }
            | Self::UnknownNode { index } => *index,
        }
    }
}

/// Reconstructing a value from partial results failed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReconstructionError {
    /// Fewer partial results than the threshold were provided.
    #[error("{got} partial results are not enough, threshold is {threshold}")]
    NotEnoughPartials {
        /// Number of provided partials.
        got: usize,
        /// Required threshold.
        threshold: usize,
    },
    /// A partial result could not be decoded.
    #[error("partial result of node {index} is malformed: {reason}")]
    Malformed {
        /// Index of the offending node.
        index: usize,
        /// What is wrong with the payload.
        reason: String,
    },
    /// The partial results do not describe the same value.
    #[error("partial results are inconsistent: {reason}")]
    Inconsistent {
        /// What did not agree.
        reason: String,
    },
}

/// A value could not be secret shared.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ShareError {
    /// The threshold or number of shares is not supported.
    #[error("cannot create {n} shares with threshold {threshold}")]
    InvalidParameters {
        /// Requested number of shares.
        n: usize,
        /// Requested threshold.
        threshold: usize,
    },
    /// An integer does not fit into the engine's value range.
    #[error("integer {value} is outside of the shareable range")]
    ValueOutOfRange {
        /// The offending integer.
        value: i64,
    },
    /// A value is nested deeper than the engine supports.
    #[error("value is nested more than {max} levels deep")]
    TooDeep {
        /// Maximum supported nesting of lists.
        max: usize,
    },
    /// The engine returned a different number of shares than requested.
    #[error("expected {expected} shares but the engine produced {actual}")]
    WrongShareCount {
        /// Number of nodes.
        expected: usize,
        /// Number of produced shares.
        actual: usize,
    },
    /// A share could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// A session-level failure. Always terminal for the session it occurred in.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// The execution deadline elapsed before a quorum of results arrived.
    #[error(
        "session {session_id} timed out after {after:?} with {responded} of {threshold} required results"
    )]
    Timeout {
        /// The failed session.
        session_id: Uuid,
        /// The elapsed execution timeout.
        after: Duration,
        /// Number of valid partial results received.
        responded: usize,
        /// The required threshold.
        threshold: usize,
    },
    /// Too many nodes failed for a quorum to be reachable.
    #[error(
        "session {session_id} cannot reach quorum: {reachable} nodes remain but threshold is {threshold}"
    )]
    InsufficientNodes {
        /// The failed session.
        session_id: Uuid,
        /// Nodes that can still contribute a result.
        reachable: usize,
        /// The required threshold.
        threshold: usize,
    },
    /// The partial results could not be reconstructed into a single value.
    #[error("session {session_id} failed: partial results do not reconstruct to a value")]
    ReconstructionMismatch {
        /// The failed session.
        session_id: Uuid,
        /// Why reconstruction failed.
        #[source]
        source: ReconstructionError,
    },
    /// The caller cancelled the session.
    #[error("session {session_id} was cancelled")]
    Cancelled {
        /// The cancelled session.
        session_id: Uuid,
    },
    /// The session is not in a state that allows the requested step.
    #[error("session {session_id} is {state:?}")]
    NotReady {
        /// The session.
        session_id: Uuid,
        /// Its current state.
        state: SessionState,
    },
}

impl ExecutionError {
    /// The session the error occurred in.
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::Timeout { session_id, .. }
            | Self::InsufficientNodes { session_id, .. }
            | Self::ReconstructionMismatch { session_id, .. }
            | Self::Cancelled { session_id }
            | Self::NotReady { session_id, .. } => *session_id,
        }
    }
}
