//! Configuration of the node network a client talks to.
use std::{collections::HashSet, fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;

/// Client id used when the config does not provide one.
pub const DEFAULT_CLIENT_ID: &str = "default_client";

/// An addressable MPC node.
///
/// The `index` is the node's position in [`NetworkConfig::nodes`] and determines which share
/// the node receives. It never changes for the lifetime of a config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// The address at which the node can be reached.
    pub address: Url,
    /// Position of the node in the config, `0..N`.
    pub index: usize,
}

/// Timeouts applied to network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to connect to a single node.
    pub connect: Duration,
    /// Maximum time for a single node to acknowledge a message.
    pub send: Duration,
    /// Maximum time to wait for a quorum of results once execution started.
    pub execution: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            send: Duration::from_secs(5),
            execution: Duration::from_secs(30),
        }
    }
}

/// The validated network config of one client.
///
/// A `NetworkConfig` can only be obtained through [`NetworkConfig::new`] or
/// [`NetworkConfig::from_json`], both of which reject configs whose threshold is larger than the
/// number of nodes.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawNetworkConfig")]
pub struct NetworkConfig {
    nodes: Vec<NodeEndpoint>,
    threshold: usize,
    client_id: String,
    program_id: String,
    coordinator_url: Option<Url>,
    timeouts: Timeouts,
}

impl NetworkConfig {
    /// Create and validate a config.
    pub fn new(
        nodes: Vec<Url>,
        threshold: usize,
        client_id: impl Into<String>,
        program_id: impl Into<String>,
        coordinator_url: Option<Url>,
    ) -> Result<Self, ValidationError> {
        if nodes.is_empty() {
            return Err(ValidationError::NoNodes);
        }
        let mut seen = HashSet::new();
        for address in &nodes {
            if !seen.insert(address) {
                return Err(ValidationError::DuplicateNode {
                    address: address.clone(),
                });
            }
        }
        if threshold == 0 || threshold > nodes.len() {
            return Err(ValidationError::InvalidThreshold {
                threshold,
                nodes: nodes.len(),
            });
        }
        let program_id = program_id.into();
        if program_id.is_empty() {
            return Err(ValidationError::MissingProgramId);
        }
        let nodes = nodes
            .into_iter()
            .enumerate()
            .map(|(index, address)| NodeEndpoint { address, index })
            .collect();
        Ok(Self {
            nodes,
            threshold,
            client_id: client_id.into(),
            program_id,
            coordinator_url,
            timeouts: Timeouts::default(),
        })
    }

    /// Replace the default [`Timeouts`].
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Result<Self, ValidationError> {
        for (which, timeout) in [
            ("connect", timeouts.connect),
            ("send", timeouts.send),
            ("execution", timeouts.execution),
        ] {
            if timeout.is_zero() {
                return Err(ValidationError::ZeroTimeout { which });
            }
        }
        self.timeouts = timeouts;
        Ok(self)
    }

    /// Parse and validate a JSON config.
    ///
    /// JSON that does not describe a config is [`ValidationError::Malformed`], invalid configs
    /// fail with the same errors as [`NetworkConfig::new`].
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let raw: RawNetworkConfig =
            serde_json::from_str(json).map_err(|err| ValidationError::Malformed {
                reason: err.to_string(),
            })?;
        NetworkConfig::try_from(raw)
    }

    /// The nodes in share index order.
    pub fn nodes(&self) -> &[NodeEndpoint] {
        &self.nodes
    }

    /// Number of nodes `N`.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Minimum number of node results required to reconstruct a value.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Id of this client.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Id of the program the nodes are configured to run.
    pub fn program_id(&self) -> &str {
        &self.program_id
    }

    /// The optional coordinator service used for metadata exchange.
    pub fn coordinator_url(&self) -> Option<&Url> {
        self.coordinator_url.as_ref()
    }

    /// The configured timeouts.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}

impl Debug for NetworkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<_> = self.nodes.iter().map(|n| n.address.as_str()).collect();
        f.debug_struct("NetworkConfig")
            .field("nodes", &nodes)
            .field("threshold", &self.threshold)
            .field("client_id", &self.client_id)
            .field("program_id", &self.program_id)
            .field("coordinator_url", &self.coordinator_url.as_ref().map(Url::as_str))
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Unvalidated on-disk form of a [`NetworkConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNetworkConfig {
    /// Node addresses, order determines the share index.
    pub nodes: Vec<Url>,
    /// Defaults to a majority of the nodes.
    #[serde(default)]
    pub threshold: Option<usize>,
    /// Defaults to [`DEFAULT_CLIENT_ID`].
    #[serde(default)]
    pub client_id: Option<String>,
    /// Required, an empty id is rejected.
    #[serde(default)]
    pub program_id: String,
    /// Optional coordinator service for metadata exchange.
    #[serde(default)]
    pub coordinator_url: Option<Url>,
    /// Per-call timeouts.
    #[serde(default)]
    pub timeouts: RawTimeouts,
}

/// Timeouts in milliseconds, any missing value uses the [`Timeouts`] default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct RawTimeouts {
    pub connect_ms: Option<u64>,
    pub send_ms: Option<u64>,
    pub execution_ms: Option<u64>,
}

impl TryFrom<RawNetworkConfig> for NetworkConfig {
    type Error = ValidationError;

    fn try_from(raw: RawNetworkConfig) -> Result<Self, Self::Error> {
        let threshold = raw.threshold.unwrap_or(raw.nodes.len() / 2 + 1);
        let defaults = Timeouts::default();
        let ms_or = |ms: Option<u64>, default| ms.map(Duration::from_millis).unwrap_or(default);
        let timeouts = Timeouts {
            connect: ms_or(raw.timeouts.connect_ms, defaults.connect),
            send: ms_or(raw.timeouts.send_ms, defaults.send),
            execution: ms_or(raw.timeouts.execution_ms, defaults.execution),
        };
        NetworkConfig::new(
            raw.nodes,
            threshold,
            raw.client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            raw.program_id,
            raw.coordinator_url,
        )?
        .with_timeouts(timeouts)
    }
}
