//! Connections to the fixed set of nodes.
//!
//! The [`NodeEndpointPool`] addresses nodes by their index and delegates the actual I/O to a
//! [`NodeTransport`]. Every call is bounded by the configured timeouts and reports its outcome per
//! node: a node that fails or times out never fails the whole batch.
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use futures::future;
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, warn};

use crate::{
    config::{NetworkConfig, NodeEndpoint},
    error::NetworkError,
    msg::{NodeMsg, NodeResult},
};

/// The transport used to talk to the nodes.
///
/// Implementations deliver [`NodeMsg`]s to a node and forward every [`NodeResult`] the node
/// produces into the [`ResultSender`] passed to [`NodeTransport::connect`]. Results may be
/// forwarded at any time and in any order.
pub trait NodeTransport: Send + Sync + 'static {
    /// The error returned by the transport.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish a connection to the node.
    fn connect(
        &self,
        node: &NodeEndpoint,
        results: ResultSender,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a message and wait until the node acknowledged it.
    fn send(
        &self,
        node: &NodeEndpoint,
        msg: NodeMsg,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the connection to the node.
    fn disconnect(&self, node: &NodeEndpoint) -> impl Future<Output = ()> + Send;
}

/// Sending half of the client's result inbox, handed to the transport.
#[derive(Debug, Clone)]
pub struct ResultSender(mpsc::Sender<NodeResult>);

impl ResultSender {
    /// Deliver a node result to the client.
    ///
    /// Returns `false` if the client no longer accepts results, e.g. because it disconnected.
    pub async fn deliver(&self, result: NodeResult) -> bool {
        self.0.send(result).await.is_ok()
    }

    /// Whether the client dropped the inbox.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Receiving half of the client's result inbox.
pub type ResultInbox = mpsc::Receiver<NodeResult>;

/// Create a result inbox for `nodes` nodes.
pub fn result_inbox(nodes: usize) -> (ResultSender, ResultInbox) {
    let (tx, rx) = mpsc::channel((4 * nodes).max(16));
    (ResultSender(tx), rx)
}

/// Reachability of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// No connection attempt was made yet.
    Disconnected,
    /// The last connection attempt succeeded.
    Reachable,
    /// The last connection attempt failed, the node is skipped until it reconnects.
    Unreachable,
}

/// Outcome of an operation, per node index.
pub type PerNode<T = ()> = BTreeMap<usize, Result<T, NetworkError>>;

/// The addressable connections to all nodes of a [`NetworkConfig`].
pub struct NodeEndpointPool<T> {
    transport: Arc<T>,
    endpoints: Vec<NodeEndpoint>,
    status: Vec<NodeStatus>,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl<T> Clone for NodeEndpointPool<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            endpoints: self.endpoints.clone(),
            status: self.status.clone(),
            connect_timeout: self.connect_timeout,
            send_timeout: self.send_timeout,
        }
    }
}

impl<T: NodeTransport> NodeEndpointPool<T> {
    /// Create a pool for the nodes of `config`. No connection is made yet.
    pub fn new(config: &NetworkConfig, transport: Arc<T>) -> Self {
        let timeouts = config.timeouts();
        Self {
            transport,
            endpoints: config.nodes().to_vec(),
            status: vec![NodeStatus::Disconnected; config.node_count()],
            connect_timeout: timeouts.connect,
            send_timeout: timeouts.send,
        }
    }

    /// The transport of this pool.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Connect to all nodes concurrently.
    ///
    /// Returns the outcome per node. Nodes that could not be connected are marked
    /// [`NodeStatus::Unreachable`].
    pub async fn connect_all(&mut self, results: &ResultSender) -> PerNode {
        let connects = self
            .endpoints
            .iter()
            .map(|node| self.connect_node(node, results.clone()));
        let outcomes = future::join_all(connects).await;
        let mut report = PerNode::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            self.status[index] = match outcome {
                Ok(()) => NodeStatus::Reachable,
                Err(_) => NodeStatus::Unreachable,
            };
            report.insert(index, outcome);
        }
        report
    }

    /// Retry connecting a single node.
    pub async fn reconnect(
        &mut self,
        index: usize,
        results: &ResultSender,
    ) -> Result<(), NetworkError> {
        let node = self
            .endpoints
            .get(index)
            .ok_or(NetworkError::UnknownNode { index })?;
        let outcome = self.connect_node(node, results.clone()).await;
        self.status[index] = match outcome {
            Ok(()) => NodeStatus::Reachable,
            Err(_) => NodeStatus::Unreachable,
        };
        outcome
    }

    async fn connect_node(
        &self,
        node: &NodeEndpoint,
        results: ResultSender,
    ) -> Result<(), NetworkError> {
        let index = node.index;
        match timeout(self.connect_timeout, self.transport.connect(node, results)).await {
            Ok(Ok(())) => {
                debug!(index, address = %node.address, "connected to node");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(index, address = %node.address, %err, "unable to connect to node");
                Err(NetworkError::Transport {
                    index,
                    source: Box::new(err),
                })
            }
            Err(_) => {
                warn!(index, address = %node.address, "connecting to node timed out");
                Err(NetworkError::Timeout {
                    index,
                    after: self.connect_timeout,
                })
            }
        }
    }

    /// Send a message to a single node.
    pub async fn send_to(&self, index: usize, msg: NodeMsg) -> Result<(), NetworkError> {
        let node = self
            .endpoints
            .get(index)
            .ok_or(NetworkError::UnknownNode { index })?;
        if self.status[index] != NodeStatus::Reachable {
            return Err(NetworkError::Unreachable { index });
        }
        let kind = msg.kind();
        match timeout(self.send_timeout, self.transport.send(node, msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                debug!(index, kind, %err, "sending to node failed");
                Err(NetworkError::Transport {
                    index,
                    source: Box::new(err),
                })
            }
            Err(_) => {
                debug!(index, kind, "sending to node timed out");
                Err(NetworkError::Timeout {
                    index,
                    after: self.send_timeout,
                })
            }
        }
    }

    /// Send the same message to every node.
    pub async fn broadcast(&self, msg: &NodeMsg) -> PerNode {
        self.broadcast_to(0..self.endpoints.len(), msg).await
    }

    /// Send the same message to the nodes with the given indices.
    pub async fn broadcast_to(
        &self,
        indices: impl IntoIterator<Item = usize>,
        msg: &NodeMsg,
    ) -> PerNode {
        self.send_each(indices.into_iter().map(|i| (i, vec![msg.clone()])))
            .await
    }

    /// Send a sequence of messages to each node.
    ///
    /// Nodes are served concurrently; the messages for one node are sent in order and the first
    /// failure ends that node's sequence.
    pub async fn send_each(
        &self,
        batches: impl IntoIterator<Item = (usize, Vec<NodeMsg>)>,
    ) -> PerNode {
        let sends = batches.into_iter().map(|(index, msgs)| async move {
            let mut outcome = Ok(());
            for msg in msgs {
                if let Err(err) = self.send_to(index, msg).await {
                    outcome = Err(err);
                    break;
                }
            }
            (index, outcome)
        });
        future::join_all(sends).await.into_iter().collect()
    }

    /// Disconnect from all nodes.
    pub async fn disconnect_all(&mut self) {
        let disconnects = self
            .endpoints
            .iter()
            .zip(&self.status)
            .filter(|(_, status)| **status == NodeStatus::Reachable)
            .map(|(node, _)| self.transport.disconnect(node));
        future::join_all(disconnects).await;
        self.status.fill(NodeStatus::Disconnected);
    }

    /// The reachability of every node, in index order.
    pub fn statuses(&self) -> &[NodeStatus] {
        &self.status
    }

    /// Indices of the nodes that are currently reachable.
    pub fn reachable_indices(&self) -> Vec<usize> {
        self.status
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == NodeStatus::Reachable)
            .map(|(i, _)| i)
            .collect()
    }

    /// The endpoints of the pool.
    pub fn endpoints(&self) -> &[NodeEndpoint] {
        &self.endpoints
    }
}
