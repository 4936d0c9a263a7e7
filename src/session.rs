//! A single execution attempt against the node network.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    sync::Arc,
};

use tokio::time::Instant;
use uuid::Uuid;

use crate::{config::NetworkConfig, value::Visibility};

/// Lifecycle of a [`Session`].
///
/// ```text
/// Created -> InputsDistributed -> Executing -> QuorumReached -> Complete
///                                          \-> Failed        \-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No inputs were distributed yet.
    Created,
    /// Inputs were delivered to at least one node.
    InputsDistributed,
    /// The execution trigger was sent, results are being collected.
    Executing,
    /// A threshold of results arrived and is being reconstructed.
    QuorumReached,
    /// The result was reconstructed.
    Complete,
    /// The session ended without a result.
    Failed,
}

impl SessionState {
    /// Whether the session can no longer change its state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Delivery state of one named input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInput {
    /// Whether the input was shared or sent in cleartext.
    pub visibility: Visibility,
    /// Nodes that acknowledged the input.
    pub delivered_to: BTreeSet<usize>,
}

/// The result reported by one node.
#[derive(Clone, PartialEq, Eq)]
pub struct PartialResult {
    /// The reporting node.
    pub node_index: usize,
    /// The node's share of the output, or its local execution error.
    pub payload: Result<Vec<u8>, String>,
}

impl Debug for PartialResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("PartialResult");
        s.field("node_index", &self.node_index);
        match &self.payload {
            Ok(data) => s.field("data_len", &data.len()),
            Err(err) => s.field("error", err),
        };
        s.finish()
    }
}

/// One execution attempt, identified by a fresh id.
///
/// Sessions are never reused: every run of the client creates a new one. The state is only
/// changed by the [`ExecutionCoordinator`](crate::ExecutionCoordinator).
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    config: Arc<NetworkConfig>,
    state: SessionState,
    pending_inputs: BTreeMap<String, PendingInput>,
    dispatched_at: Option<Instant>,
    partial_results: BTreeMap<usize, PartialResult>,
}

impl Session {
    /// Create a session with a random id.
    pub fn new(config: Arc<NetworkConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            state: SessionState::Created,
            pending_inputs: BTreeMap::new(),
            dispatched_at: None,
            partial_results: BTreeMap::new(),
        }
    }

    /// The session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The network the session runs on.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Delivery state of the distributed inputs, by name.
    pub fn pending_inputs(&self) -> &BTreeMap<String, PendingInput> {
        &self.pending_inputs
    }

    /// When the execution trigger was sent.
    pub fn dispatched_at(&self) -> Option<Instant> {
        self.dispatched_at
    }

    /// The results received so far, by node index.
    pub fn partial_results(&self) -> &BTreeMap<usize, PartialResult> {
        &self.partial_results
    }

    /// Nodes that acknowledged every distributed input.
    pub fn delivered_nodes(&self) -> BTreeSet<usize> {
        let mut inputs = self.pending_inputs.values();
        let Some(first) = inputs.next() else {
            return BTreeSet::new();
        };
        inputs.fold(first.delivered_to.clone(), |acc, input| {
            acc.intersection(&input.delivered_to).copied().collect()
        })
    }

    /// Number of successful results.
    pub fn ok_results(&self) -> usize {
        self.partial_results
            .values()
            .filter(|r| r.payload.is_ok())
            .count()
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        tracing::debug!(session_id = %self.id, from = ?self.state, to = ?state, "session transition");
        self.state = state;
    }

    /// Record the delivery of an input, replacing an earlier input with the same name.
    pub(crate) fn record_input(
        &mut self,
        name: String,
        visibility: Visibility,
        delivered_to: BTreeSet<usize>,
    ) {
        self.pending_inputs.insert(
            name,
            PendingInput {
                visibility,
                delivered_to,
            },
        );
    }

    pub(crate) fn mark_dispatched(&mut self, at: Instant) {
        self.dispatched_at = Some(at);
    }

    /// Store a node's result. Returns `false` if the node already reported one.
    pub(crate) fn insert_partial(&mut self, result: PartialResult) -> bool {
        match self.partial_results.entry(result.node_index) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(result);
                true
            }
        }
    }
}
