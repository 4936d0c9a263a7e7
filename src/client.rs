//! The session client, composing distribution, execution and reconstruction.
use std::{collections::BTreeMap, sync::Arc};

use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    config::NetworkConfig,
    coordinator::{CancelHandle, ExecutionCoordinator},
    distributor::{DistributeError, InputDistributor, validate_inputs},
    error::{BoxError, ExecutionError, ValidationError},
    local::{ArtifactId, DryRunError, LocalExecutor, dry_run},
    metadata::{MetadataExchange, MetadataRequest, MetadataResponse},
    pool::{
        NodeEndpointPool, NodeStatus, NodeTransport, PerNode, ResultInbox, ResultSender,
        result_inbox,
    },
    reconstruct::{ReconstructedResult, ResultReconstructor},
    session::Session,
    share::{ShamirShareEngine, ShareEngine},
    value::{NamedInput, Value, Visibility},
};

/// Connection state of a [`MpcSessionClient`].
///
/// ```text
/// Disconnected -> Connecting -> Connected -> SessionActive -> Connected -> Disconnected
///                           \-> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to the nodes.
    Disconnected,
    /// Connecting to the nodes.
    Connecting,
    /// Connected to at least one node and idle.
    Connected,
    /// A session is running.
    SessionActive,
}

/// Errors returned by the [`MpcSessionClient`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The config or the inputs are invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The inputs could not be distributed.
    #[error(transparent)]
    Distribute(#[from] DistributeError),
    /// The session failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// A local dry run failed.
    #[error(transparent)]
    DryRun(#[from] DryRunError),
    /// The operation is not possible in the current state.
    #[error("cannot {op} while the client is {state:?}")]
    InvalidState {
        /// The attempted operation.
        op: &'static str,
        /// The client's state.
        state: ClientState,
    },
    /// Not a single node could be connected.
    #[error("unable to connect to any of the {nodes} nodes")]
    Connect {
        /// Number of configured nodes.
        nodes: usize,
    },
    /// The metadata exchange with the coordinator service failed.
    #[error("metadata exchange with the coordinator failed")]
    Coordinator(#[source] BoxError),
}

/// A snapshot of the client's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    /// Connection state.
    pub state: ClientState,
    /// Id of this client.
    pub client_id: String,
    /// The program the node network runs.
    pub program_id: String,
    /// The optional coordinator service.
    pub coordinator_url: Option<Url>,
    /// Reachability of every node, in index order.
    pub nodes: Vec<(Url, NodeStatus)>,
    /// Id of the most recent session.
    pub last_session_id: Option<Uuid>,
    /// Number of secret inputs that are set.
    pub secret_input_count: usize,
    /// Number of public inputs that are set.
    pub public_input_count: usize,
}

/// The program the network runs and the inputs prepared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    /// The program id.
    pub program_id: String,
    /// Names of the secret inputs that are set.
    pub secret_inputs: Vec<String>,
    /// Names of the public inputs that are set.
    pub public_inputs: Vec<String>,
    /// Number of reachable nodes.
    pub nodes_available: usize,
}

/// Runs programs on a fixed network of nodes.
///
/// The client owns its [`NetworkConfig`]; several clients with different configs can be used
/// in the same process. Every call to [`MpcSessionClient::run`] creates a new [`Session`], so a
/// failed run can simply be retried.
///
/// ```rust,ignore
/// let mut client = MpcSessionClient::new(config, transport);
/// client.set_secret_input("a", 25_i64);
/// client.set_secret_input("b", 17_i64);
/// client.set_public_input("threshold_val", 50_i64);
/// let result = client.run().await?;
/// client.disconnect().await;
/// ```
pub struct MpcSessionClient<T, E = ShamirShareEngine> {
    config: Arc<NetworkConfig>,
    pool: NodeEndpointPool<T>,
    results: ResultSender,
    inbox: ResultInbox,
    distributor: InputDistributor<E>,
    coordinator: ExecutionCoordinator,
    reconstructor: ResultReconstructor<E>,
    metadata: Option<Box<dyn MetadataExchange>>,
    metadata_response: Option<MetadataResponse>,
    state: ClientState,
    inputs: BTreeMap<String, NamedInput>,
    last_session_id: Option<Uuid>,
}

impl<T: NodeTransport> MpcSessionClient<T> {
    /// Create a client using the default [`ShamirShareEngine`].
    pub fn new(config: NetworkConfig, transport: T) -> Self {
        Self::with_engine(config, transport, ShamirShareEngine::new())
    }
}

impl<T: NodeTransport, E: ShareEngine> MpcSessionClient<T, E> {
    /// Create a client sharing secrets with `engine`.
    pub fn with_engine(config: NetworkConfig, transport: T, engine: E) -> Self {
        let engine = Arc::new(engine);
        let pool = NodeEndpointPool::new(&config, Arc::new(transport));
        let (results, inbox) = result_inbox(config.node_count());
        info!(
            client_id = config.client_id(),
            program_id = config.program_id(),
            nodes = config.node_count(),
            threshold = config.threshold(),
            "initialized session client"
        );
        Self {
            config: Arc::new(config),
            pool,
            results,
            inbox,
            distributor: InputDistributor::new(Arc::clone(&engine)),
            coordinator: ExecutionCoordinator::new(),
            reconstructor: ResultReconstructor::new(engine),
            metadata: None,
            metadata_response: None,
            state: ClientState::Disconnected,
            inputs: BTreeMap::new(),
            last_session_id: None,
        }
    }

    /// Exchange metadata with a coordinator service on every [`MpcSessionClient::connect`].
    pub fn with_metadata_exchange(mut self, exchange: impl MetadataExchange + 'static) -> Self {
        self.metadata = Some(Box::new(exchange));
        self
    }

    /// The network config.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The connection state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The response of the last metadata exchange.
    pub fn metadata(&self) -> Option<&MetadataResponse> {
        self.metadata_response.as_ref()
    }

    /// Connect to all nodes.
    ///
    /// If a coordinator service is installed, metadata is exchanged first and a failed exchange
    /// fails the connect. Nodes that cannot be reached are skipped; the connect only fails if
    /// no node at all is reachable.
    #[tracing::instrument(level = "debug", skip_all, fields(client_id = self.config.client_id()))]
    pub async fn connect(&mut self) -> Result<PerNode, ClientError> {
        if self.state != ClientState::Disconnected {
            return Err(ClientError::InvalidState {
                op: "connect",
                state: self.state,
            });
        }
        // back to `Disconnected` unless connected, even if this future is dropped
        let state = StateGuard::enter(
            &mut self.state,
            ClientState::Connecting,
            ClientState::Disconnected,
        );
        if let Some(exchange) = &self.metadata {
            let req = MetadataRequest {
                client_id: self.config.client_id().to_string(),
                program_id: self.config.program_id().to_string(),
            };
            match exchange.exchange(req).await {
                Ok(res) => {
                    debug!(entries = res.entries.len(), "exchanged metadata with coordinator");
                    self.metadata_response = Some(res);
                }
                Err(err) => {
                    error!(%err, "metadata exchange with coordinator failed");
                    return Err(ClientError::Coordinator(err));
                }
            }
        }

        let report = self.pool.connect_all(&self.results).await;
        let nodes = self.config.node_count();
        let reachable = report.values().filter(|outcome| outcome.is_ok()).count();
        if reachable == 0 {
            error!(nodes, "unable to connect to any node");
            return Err(ClientError::Connect { nodes });
        }
        if reachable < self.config.threshold() {
            warn!(
                reachable,
                threshold = self.config.threshold(),
                "fewer nodes than the threshold are reachable, sessions will fail"
            );
        }
        info!(reachable, nodes, "connected to node network");
        state.leave(ClientState::Connected);
        Ok(report)
    }

    /// Set a secret input, replacing any input with the same name.
    pub fn set_secret_input(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let input = NamedInput::secret(name, value);
        debug!(name = %input.name, "set secret input");
        self.inputs.insert(input.name.clone(), input);
    }

    /// Set a public input, replacing any input with the same name.
    pub fn set_public_input(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let input = NamedInput::public(name, value);
        debug!(name = %input.name, value = ?input.value, "set public input");
        self.inputs.insert(input.name.clone(), input);
    }

    /// Set several inputs at once, replacing inputs with the same names.
    pub fn set_inputs(&mut self, inputs: impl IntoIterator<Item = NamedInput>) {
        for input in inputs {
            self.inputs.insert(input.name.clone(), input);
        }
    }

    /// Remove all inputs.
    pub fn clear_inputs(&mut self) {
        self.inputs.clear();
    }

    /// Distribute the inputs, execute the program and reconstruct its output.
    ///
    /// Connects first if the client is disconnected.
    pub async fn run(&mut self) -> Result<ReconstructedResult, ClientError> {
        if self.state == ClientState::Disconnected {
            self.connect().await?;
        }
        if self.state != ClientState::Connected {
            return Err(ClientError::InvalidState {
                op: "run",
                state: self.state,
            });
        }
        let (secret, public) = self.split_inputs();
        validate_inputs(&secret, &public)?;

        let mut session = Session::new(Arc::clone(&self.config));
        self.last_session_id = Some(session.id());
        info!(session_id = %session.id(), program_id = self.config.program_id(), "running program");
        // back to `Connected` when the run ends, even if this future is dropped
        let _state = StateGuard::enter(
            &mut self.state,
            ClientState::SessionActive,
            ClientState::Connected,
        );

        let report = self
            .distributor
            .distribute(&session, &self.pool, &secret, &public)
            .await?;
        self.coordinator.record_distribution(&mut session, report)?;
        let result = self
            .coordinator
            .execute(&mut session, &self.pool, &mut self.inbox, &self.reconstructor)
            .await?;
        Ok(result)
    }

    /// Replace the inputs with `inputs` and [`run`](MpcSessionClient::run).
    pub async fn run_with_inputs(
        &mut self,
        inputs: impl IntoIterator<Item = NamedInput>,
    ) -> Result<ReconstructedResult, ClientError> {
        self.clear_inputs();
        self.set_inputs(inputs);
        self.run().await
    }

    /// Disconnect from all nodes. The inputs are kept.
    pub async fn disconnect(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        info!("disconnecting from node network");
        self.pool.disconnect_all().await;
        self.state = ClientState::Disconnected;
    }

    /// A handle to cancel a running session from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.coordinator.cancel_handle()
    }

    /// A snapshot of the client's state.
    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            state: self.state,
            client_id: self.config.client_id().to_string(),
            program_id: self.config.program_id().to_string(),
            coordinator_url: self.config.coordinator_url().cloned(),
            nodes: self
                .pool
                .endpoints()
                .iter()
                .zip(self.pool.statuses())
                .map(|(node, status)| (node.address.clone(), *status))
                .collect(),
            last_session_id: self.last_session_id,
            secret_input_count: self.count_inputs(Visibility::Secret),
            public_input_count: self.count_inputs(Visibility::Public),
        }
    }

    /// Whether the client is connected and has inputs to run with.
    pub fn is_ready(&self) -> bool {
        self.state == ClientState::Connected && !self.inputs.is_empty()
    }

    /// The program and the prepared inputs.
    pub fn program_info(&self) -> ProgramInfo {
        let names = |visibility: Visibility| -> Vec<String> {
            self.inputs
                .values()
                .filter(|input| input.visibility == visibility)
                .map(|input| input.name.clone())
                .collect()
        };
        ProgramInfo {
            program_id: self.config.program_id().to_string(),
            secret_inputs: names(Visibility::Secret),
            public_inputs: names(Visibility::Public),
            nodes_available: self.pool.reachable_indices().len(),
        }
    }

    /// Execute the program locally with the prepared inputs, without any network I/O.
    pub fn dry_run<X: LocalExecutor>(
        &self,
        executor: &X,
        artifact: &ArtifactId,
    ) -> Result<Value, ClientError> {
        if self.inputs.is_empty() {
            return Err(ValidationError::NoInputs.into());
        }
        let inputs: Vec<NamedInput> = self.inputs.values().cloned().collect();
        Ok(dry_run(executor, artifact, &inputs)?)
    }

    fn split_inputs(&self) -> (Vec<NamedInput>, Vec<NamedInput>) {
        self.inputs
            .values()
            .cloned()
            .partition(|input| input.visibility == Visibility::Secret)
    }

    fn count_inputs(&self, visibility: Visibility) -> usize {
        self.inputs
            .values()
            .filter(|input| input.visibility == visibility)
            .count()
    }
}

/// Holds a client in a transient state and moves it on when dropped.
struct StateGuard<'a> {
    state: &'a mut ClientState,
    on_drop: ClientState,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a mut ClientState, during: ClientState, on_drop: ClientState) -> Self {
        *state = during;
        Self { state, on_drop }
    }

    fn leave(mut self, to: ClientState) {
        self.on_drop = to;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.state = self.on_drop;
    }
}
