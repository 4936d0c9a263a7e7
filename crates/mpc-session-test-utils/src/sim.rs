//! A simulated network of MPC nodes.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use mpc_session_client::{
    NetworkConfig, NodeEndpoint, NodeMsg, NodeResult, NodeTransport, ResultSender,
    ShamirShare, ShamirShareEngine, ShareEngine, Timeouts, Value,
    share::shamir::ShareDecodeError,
};
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::programs::{NodeInputs, Program};

/// How a simulated node behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeBehavior {
    /// Stores inputs and reports its share of the output right after `EXECUTE`.
    #[default]
    Honest,
    /// Refuses connections and messages.
    Unreachable,
    /// Accepts all messages but never reports a result.
    Silent,
    /// Reports that its local execution failed.
    FailExecution,
    /// Reports a well-formed share of a boolean instead of its share of the output.
    Corrupt,
    /// Like [`NodeBehavior::Honest`], but reports its result after the delay.
    Delayed(Duration),
}

/// Errors returned by the simulated nodes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SimError {
    /// The node is [`NodeBehavior::Unreachable`].
    #[error("node {index} is unreachable")]
    Unreachable {
        /// Index of the node.
        index: usize,
    },
    /// The endpoint does not belong to the simulated network.
    #[error("no simulated node at {address}")]
    UnknownNode {
        /// Address of the endpoint.
        address: Url,
    },
    /// A share payload could not be decoded.
    #[error("node {index} received an invalid share")]
    InvalidShare {
        /// Index of the node.
        index: usize,
        /// The decoding error.
        #[source]
        source: ShareDecodeError,
    },
    /// A share meant for another node was delivered.
    #[error("node {index} received the share of node {owner}")]
    MisroutedShare {
        /// Index of the receiving node.
        index: usize,
        /// Index the share was created for.
        owner: usize,
    },
}

/// An in-process network of simulated nodes.
///
/// Cloning a `SimNetwork` is cheap and all clones share the same nodes, so a test can keep a
/// clone around to inspect the nodes after handing another one to a client.
#[derive(Clone)]
pub struct SimNetwork {
    inner: Arc<Inner>,
}

struct Inner {
    threshold: usize,
    program: Program,
    engine: ShamirShareEngine,
    nodes: Vec<Mutex<SimNode>>,
}

#[derive(Default)]
struct SimNode {
    behavior: NodeBehavior,
    results: Option<ResultSender>,
    sessions: HashMap<Uuid, NodeInputs>,
    abandoned: HashSet<Uuid>,
    received: BTreeMap<&'static str, usize>,
}

impl SimNetwork {
    /// A network of `n` honest nodes that run `program`, for sessions with the given `threshold`.
    pub fn new(n: usize, threshold: usize, program: Program) -> Self {
        Self {
            inner: Arc::new(Inner {
                threshold,
                program,
                engine: ShamirShareEngine::seeded(n as u64),
                nodes: (0..n).map(|_| Mutex::new(SimNode::default())).collect(),
            }),
        }
    }

    /// Set the behavior of node `index`, builder style.
    pub fn with_behavior(self, index: usize, behavior: NodeBehavior) -> Self {
        self.set_behavior(index, behavior);
        self
    }

    /// Change the behavior of node `index`, effective for the next message it receives.
    ///
    /// # Panics
    ///
    /// Panics if there is no node at `index`.
    pub fn set_behavior(&self, index: usize, behavior: NodeBehavior) {
        self.node(index).behavior = behavior;
    }

    /// The address of node `index`.
    pub fn address(index: usize) -> Url {
        Url::parse(&format!("http://node{index}.sim:9000")).expect("simulated node url")
    }

    /// A config for this network with short timeouts.
    pub fn config(&self, program_id: &str) -> NetworkConfig {
        let nodes = (0..self.inner.nodes.len()).map(Self::address).collect();
        NetworkConfig::new(nodes, self.inner.threshold, "sim_client", program_id, None)
            .and_then(|config| {
                config.with_timeouts(Timeouts {
                    connect: Duration::from_millis(500),
                    send: Duration::from_millis(500),
                    execution: Duration::from_secs(2),
                })
            })
            .expect("the simulated network has a valid config")
    }

    /// How many messages of `kind` (e.g. `"EXECUTE"`) node `index` received.
    pub fn received(&self, index: usize, kind: &str) -> usize {
        self.node(index).received.get(kind).copied().unwrap_or(0)
    }

    /// The number of messages received by all nodes.
    pub fn total_received(&self) -> usize {
        (0..self.inner.nodes.len())
            .map(|index| self.node(index).received.values().sum::<usize>())
            .sum()
    }

    /// The inputs node `index` currently stores for `session_id`.
    pub fn inputs(&self, index: usize, session_id: Uuid) -> Option<NodeInputs> {
        self.node(index).sessions.get(&session_id).cloned()
    }

    /// Whether node `index` received `ABANDON` for `session_id`.
    pub fn is_abandoned(&self, index: usize, session_id: Uuid) -> bool {
        self.node(index).abandoned.contains(&session_id)
    }

    /// Whether node `index` is connected to a client.
    pub fn is_connected(&self, index: usize) -> bool {
        self.node(index).results.is_some()
    }

    fn node(&self, index: usize) -> MutexGuard<'_, SimNode> {
        self.inner.nodes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, endpoint: &NodeEndpoint) -> Result<MutexGuard<'_, SimNode>, SimError> {
        if endpoint.index >= self.inner.nodes.len() || endpoint.address != Self::address(endpoint.index)
        {
            return Err(SimError::UnknownNode {
                address: endpoint.address.clone(),
            });
        }
        let node = self.node(endpoint.index);
        if node.behavior == NodeBehavior::Unreachable {
            return Err(SimError::Unreachable {
                index: endpoint.index,
            });
        }
        Ok(node)
    }

    /// The payload node `index` reports for a session, `None` if it stays silent.
    fn output(
        &self,
        index: usize,
        behavior: &NodeBehavior,
        inputs: &NodeInputs,
    ) -> Option<Result<Vec<u8>, String>> {
        let n = self.inner.nodes.len();
        let payload = match behavior {
            NodeBehavior::Unreachable | NodeBehavior::Silent => return None,
            NodeBehavior::FailExecution => Err(format!("node {index} failed to execute")),
            NodeBehavior::Corrupt => self
                .inner
                .engine
                .share(&Value::Bool(true), n, self.inner.threshold)
                .map_err(|e| e.to_string())
                .and_then(|shares| match shares.get(index) {
                    Some(share) => Ok(share.as_bytes().to_vec()),
                    None => Err(format!("no share for node {index}")),
                }),
            NodeBehavior::Honest | NodeBehavior::Delayed(_) => (self.inner.program)(inputs)
                .and_then(|share| share.to_bytes().map_err(|e| e.to_string())),
        };
        Some(payload)
    }
}

impl NodeTransport for SimNetwork {
    type Error = SimError;

    async fn connect(&self, node: &NodeEndpoint, results: ResultSender) -> Result<(), SimError> {
        let mut sim = self.lookup(node)?;
        sim.results = Some(results);
        debug!(node = node.index, "simulated node connected");
        Ok(())
    }

    async fn send(&self, node: &NodeEndpoint, msg: NodeMsg) -> Result<(), SimError> {
        let index = node.index;
        let mut sim = self.lookup(node)?;
        *sim.received.entry(msg.kind()).or_default() += 1;
        trace!(node = index, kind = msg.kind(), "simulated node received message");
        match msg {
            NodeMsg::DistributeShare {
                session_id,
                input_name,
                share_payload,
            } => {
                let share = ShamirShare::from_bytes(&share_payload)
                    .map_err(|source| SimError::InvalidShare { index, source })?;
                if share.node_index() != index {
                    return Err(SimError::MisroutedShare {
                        index,
                        owner: share.node_index(),
                    });
                }
                let inputs = sim.sessions.entry(session_id).or_default();
                inputs.shares.insert(input_name, share);
            }
            NodeMsg::DistributePublic {
                session_id,
                input_name,
                value,
            } => {
                let inputs = sim.sessions.entry(session_id).or_default();
                inputs.publics.insert(input_name, value);
            }
            NodeMsg::Execute { session_id, .. } => {
                let inputs = sim.sessions.get(&session_id).cloned().unwrap_or_default();
                let Some(payload) = self.output(index, &sim.behavior, &inputs) else {
                    return Ok(());
                };
                let Some(results) = sim.results.clone() else {
                    return Ok(());
                };
                let delay = match sim.behavior {
                    NodeBehavior::Delayed(delay) => delay,
                    _ => Duration::ZERO,
                };
                drop(sim);
                let network = self.clone();
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if network.is_abandoned(index, session_id) {
                        return;
                    }
                    let result = NodeResult {
                        session_id,
                        node_index: index,
                        payload,
                    };
                    if !results.deliver(result).await {
                        debug!(node = index, "client no longer accepts results");
                    }
                });
            }
            NodeMsg::Abandon { session_id } => {
                sim.sessions.remove(&session_id);
                sim.abandoned.insert(session_id);
            }
        }
        Ok(())
    }

    async fn disconnect(&self, node: &NodeEndpoint) {
        if node.index < self.inner.nodes.len() {
            self.node(node.index).results = None;
        }
    }
}
