//! Delivery of named inputs to the nodes.
//!
//! Secret inputs are split with the [`ShareEngine`] and every node only receives its own share;
//! public inputs are sent unchanged to every node. Nodes store inputs by name, so distributing
//! an input with the same name again replaces the earlier value instead of adding to it.
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
};

use futures::future;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{NetworkError, ShareError, ValidationError},
    msg::NodeMsg,
    pool::{NodeEndpointPool, NodeTransport, PerNode},
    session::{Session, SessionState},
    share::ShareEngine,
    value::{NamedInput, Visibility},
};

/// Errors that prevent a distribution from starting.
///
/// Per-node delivery failures are not errors, they are recorded in the [`DistributionReport`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DistributeError {
    /// The inputs are invalid, nothing was sent.
    #[error("invalid inputs")]
    Validation(#[from] ValidationError),
    /// A secret input could not be shared, nothing was sent.
    #[error("unable to share secret input '{name}'")]
    Share {
        /// Name of the input.
        name: String,
        /// Why sharing failed.
        #[source]
        source: ShareError,
    },
    /// The session does not accept inputs anymore.
    #[error("session {session_id} is {state:?} and does not accept inputs")]
    SessionState {
        /// The session.
        session_id: Uuid,
        /// Its current state.
        state: SessionState,
    },
}

/// Delivery outcome of one input.
#[derive(Debug)]
pub struct InputDelivery {
    /// How the input was delivered.
    pub visibility: Visibility,
    /// Per node outcome. Nodes that are missing were not attempted because an earlier input
    /// could not be delivered to them.
    pub nodes: PerNode,
}

impl InputDelivery {
    fn delivered(&self) -> BTreeSet<usize> {
        self.nodes
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(index, _)| *index)
            .collect()
    }
}

/// The per input and per node outcome of a distribution.
#[derive(Debug)]
pub struct DistributionReport {
    session_id: Uuid,
    node_count: usize,
    outcomes: BTreeMap<String, InputDelivery>,
}

impl DistributionReport {
    fn new(session_id: Uuid, node_count: usize) -> Self {
        Self {
            session_id,
            node_count,
            outcomes: BTreeMap::new(),
        }
    }

    /// The session the inputs were distributed for.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The outcome per input name.
    pub fn outcomes(&self) -> &BTreeMap<String, InputDelivery> {
        &self.outcomes
    }

    /// The outcome of delivering input `name` to node `index`.
    pub fn outcome(&self, name: &str, index: usize) -> Option<&Result<(), NetworkError>> {
        self.outcomes.get(name)?.nodes.get(&index)
    }

    /// Nodes that acknowledged every input of the report.
    pub fn delivered_nodes(&self) -> BTreeSet<usize> {
        let mut all: BTreeSet<usize> = (0..self.node_count).collect();
        for delivery in self.outcomes.values() {
            let delivered = delivery.delivered();
            all.retain(|index| delivered.contains(index));
        }
        all
    }

    /// Nodes that failed to acknowledge at least one input.
    pub fn failed_nodes(&self) -> BTreeSet<usize> {
        let delivered = self.delivered_nodes();
        (0..self.node_count)
            .filter(|index| !delivered.contains(index))
            .collect()
    }

    /// Add the outcomes of a later distribution, replacing inputs with the same name.
    pub fn merge(&mut self, other: DistributionReport) {
        self.outcomes.extend(other.outcomes);
    }

    pub(crate) fn into_inputs(self) -> impl Iterator<Item = (String, Visibility, BTreeSet<usize>)> {
        self.outcomes.into_iter().map(|(name, delivery)| {
            let delivered = delivery.delivered();
            (name, delivery.visibility, delivered)
        })
    }
}

/// Check that input names are unique across both sets and that there is at least one input.
pub fn validate_inputs(
    secret_inputs: &[NamedInput],
    public_inputs: &[NamedInput],
) -> Result<(), ValidationError> {
    if secret_inputs.is_empty() && public_inputs.is_empty() {
        return Err(ValidationError::NoInputs);
    }
    let mut names = HashSet::new();
    for input in secret_inputs.iter().chain(public_inputs) {
        if !names.insert(input.name.as_str()) {
            return Err(ValidationError::DuplicateName {
                name: input.name.clone(),
            });
        }
    }
    Ok(())
}

/// Distributes secret and public inputs of a session.
pub struct InputDistributor<E> {
    engine: Arc<E>,
}

impl<E> Clone for InputDistributor<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: ShareEngine> InputDistributor<E> {
    /// Create a distributor sharing secrets with `engine`.
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// Deliver the inputs of `session` to all nodes of `pool`.
    ///
    /// The set an input is passed in decides how it is delivered, [`NamedInput::visibility`]
    /// is not consulted. All validation and sharing happens before the first message is sent.
    /// Nodes are served concurrently, the inputs for one node are sent in order and the first
    /// failed delivery skips the remaining inputs for that node.
    #[tracing::instrument(level = "debug", skip_all, fields(session_id = %session.id()))]
    pub async fn distribute<T: NodeTransport>(
        &self,
        session: &Session,
        pool: &NodeEndpointPool<T>,
        secret_inputs: &[NamedInput],
        public_inputs: &[NamedInput],
    ) -> Result<DistributionReport, DistributeError> {
        let session_id = session.id();
        match session.state() {
            SessionState::Created | SessionState::InputsDistributed => {}
            state => return Err(DistributeError::SessionState { session_id, state }),
        }
        validate_inputs(secret_inputs, public_inputs)?;

        let n = session.config().node_count();
        let threshold = session.config().threshold();
        let mut batches: Vec<Vec<(String, NodeMsg)>> = vec![Vec::new(); n];
        for input in secret_inputs {
            let shares = self
                .engine
                .share(&input.value, n, threshold)
                .and_then(|shares| {
                    if shares.len() == n {
                        Ok(shares)
                    } else {
                        Err(ShareError::WrongShareCount {
                            expected: n,
                            actual: shares.len(),
                        })
                    }
                })
                .map_err(|source| DistributeError::Share {
                    name: input.name.clone(),
                    source,
                })?;
            for (batch, share) in batches.iter_mut().zip(shares) {
                let msg = NodeMsg::DistributeShare {
                    session_id,
                    input_name: input.name.clone(),
                    share_payload: share.into_bytes(),
                };
                batch.push((input.name.clone(), msg));
            }
        }
        for input in public_inputs {
            let msg = NodeMsg::DistributePublic {
                session_id,
                input_name: input.name.clone(),
                value: input.value.clone(),
            };
            for batch in &mut batches {
                batch.push((input.name.clone(), msg.clone()));
            }
        }
        info!(
            secret = secret_inputs.len(),
            public = public_inputs.len(),
            nodes = n,
            "distributing inputs"
        );

        let sends = batches.into_iter().enumerate().map(|(index, batch)| async move {
            let mut delivered = Vec::with_capacity(batch.len());
            for (name, msg) in batch {
                let outcome = pool.send_to(index, msg).await;
                let failed = outcome.is_err();
                delivered.push((name, outcome));
                if failed {
                    break;
                }
            }
            (index, delivered)
        });
        let per_node = future::join_all(sends).await;

        let mut report = DistributionReport::new(session_id, n);
        for input in secret_inputs {
            report.outcomes.insert(
                input.name.clone(),
                InputDelivery {
                    visibility: Visibility::Secret,
                    nodes: PerNode::new(),
                },
            );
        }
        for input in public_inputs {
            report.outcomes.insert(
                input.name.clone(),
                InputDelivery {
                    visibility: Visibility::Public,
                    nodes: PerNode::new(),
                },
            );
        }
        for (index, delivered) in per_node {
            for (name, outcome) in delivered {
                if let Err(err) = &outcome {
                    debug!(index, input = %name, %err, "input not delivered");
                }
                if let Some(delivery) = report.outcomes.get_mut(&name) {
                    delivery.nodes.insert(index, outcome);
                }
            }
        }
        let failed = report.failed_nodes();
        if !failed.is_empty() {
            warn!(?failed, "inputs could not be delivered to all nodes");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_across_sets() {
        let secret = [NamedInput::secret("a", 25_i64), NamedInput::secret("b", 17_i64)];
        let public = [NamedInput::public("a", 50_i64)];
        assert_eq!(
            validate_inputs(&secret, &public),
            Err(ValidationError::DuplicateName { name: "a".into() })
        );
        assert_eq!(
            validate_inputs(&[NamedInput::secret("a", 1_i64), NamedInput::secret("a", 2_i64)], &[]),
            Err(ValidationError::DuplicateName { name: "a".into() })
        );
        assert_eq!(validate_inputs(&[], &[]), Err(ValidationError::NoInputs));
        assert_eq!(validate_inputs(&secret, &[]), Ok(()));
    }

    #[test]
    fn report_delivered_and_failed() {
        let mut report = DistributionReport::new(Uuid::nil(), 3);
        let mut nodes = PerNode::new();
        nodes.insert(0, Ok(()));
        nodes.insert(1, Ok(()));
        nodes.insert(2, Err(NetworkError::Unreachable { index: 2 }));
        report.outcomes.insert(
            "a".into(),
            InputDelivery {
                visibility: Visibility::Secret,
                nodes,
            },
        );
        let mut nodes = PerNode::new();
        nodes.insert(0, Ok(()));
        nodes.insert(1, Err(NetworkError::Unreachable { index: 1 }));
        report.outcomes.insert(
            "b".into(),
            InputDelivery {
                visibility: Visibility::Public,
                nodes,
            },
        );
        assert_eq!(report.delivered_nodes(), BTreeSet::from([0]));
        assert_eq!(report.failed_nodes(), BTreeSet::from([1, 2]));

        // redistributing "b" replaces its earlier outcome
        let mut retry = DistributionReport::new(Uuid::nil(), 3);
        let mut nodes = PerNode::new();
        nodes.insert(0, Ok(()));
        nodes.insert(1, Ok(()));
        retry.outcomes.insert(
            "b".into(),
            InputDelivery {
                visibility: Visibility::Public,
                nodes,
            },
        );
        report.merge(retry);
        assert_eq!(report.delivered_nodes(), BTreeSet::from([0, 1]));
        assert!(matches!(report.outcome("b", 1), Some(Ok(()))));
        assert!(report.outcome("b", 2).is_none());
    }
}
