//! Turning partial results into the session's output.
use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::{
    error::{ExecutionError, ReconstructionError},
    session::{Session, SessionState},
    share::ShareEngine,
    value::Value,
};

/// The output of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedResult {
    /// The session that produced the value.
    pub session_id: Uuid,
    /// The reconstructed output.
    pub value: Value,
    /// Indices of the nodes whose partial results were combined.
    pub contributors: Vec<usize>,
}

/// Reconstructs the output of a session that reached quorum.
pub struct ResultReconstructor<E> {
    engine: Arc<E>,
}

impl<E> Clone for ResultReconstructor<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: ShareEngine> ResultReconstructor<E> {
    /// Create a reconstructor using `engine`.
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// Combine the successful partial results of `session`.
    ///
    /// Errors reported by nodes are skipped. Every [`ReconstructionError`] is escalated to
    /// [`ExecutionError::ReconstructionMismatch`], a value is never returned unless the engine
    /// accepted all partials it was given.
    pub fn reconstruct(&self, session: &Session) -> Result<ReconstructedResult, ExecutionError> {
        let session_id = session.id();
        let threshold = session.config().threshold();
        if session.state() != SessionState::QuorumReached {
            return Err(ExecutionError::NotReady {
                session_id,
                state: session.state(),
            });
        }
        let partials: Vec<(usize, &[u8])> = session
            .partial_results()
            .values()
            .filter_map(|r| match &r.payload {
                Ok(data) => Some((r.node_index, data.as_slice())),
                Err(_) => None,
            })
            .collect();
        let contributors: Vec<usize> = partials.iter().map(|(i, _)| *i).collect();
        let result = if partials.len() < threshold {
            Err(ReconstructionError::NotEnoughPartials {
                got: partials.len(),
                threshold,
            })
        } else {
            self.engine.reconstruct(&partials, threshold)
        };
        match result {
            Ok(value) => {
                info!(%session_id, ?contributors, "reconstructed session output");
                Ok(ReconstructedResult {
                    session_id,
                    value,
                    contributors,
                })
            }
            Err(source) => {
                error!(%session_id, ?contributors, %source, "reconstruction failed");
                Err(ExecutionError::ReconstructionMismatch { session_id, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::NetworkConfig,
        session::PartialResult,
        share::{ShamirShareEngine, ShareEngine},
    };

    use super::*;

    fn session(threshold: usize) -> Session {
        let nodes = ["http://a:1", "http://b:1", "http://c:1"]
            .iter()
            .map(|n| n.parse().unwrap())
            .collect();
        let config = NetworkConfig::new(nodes, threshold, "client", "program", None).unwrap();
        Session::new(Arc::new(config))
    }

    #[test]
    fn skips_node_errors() {
        let engine = Arc::new(ShamirShareEngine::seeded(1));
        let shares = engine.share(&Value::Int(42), 3, 2).unwrap();
        let mut session = session(2);
        for i in [0, 2] {
            session.insert_partial(PartialResult {
                node_index: i,
                payload: Ok(shares.get(i).unwrap().as_bytes().to_vec()),
            });
        }
        session.insert_partial(PartialResult {
            node_index: 1,
            payload: Err("out of memory".into()),
        });
        session.set_state(SessionState::QuorumReached);
        let result = ResultReconstructor::new(engine).reconstruct(&session).unwrap();
        assert_eq!(result.value, Value::Int(42));
        assert_eq!(result.contributors, vec![0, 2]);
        assert_eq!(result.session_id, session.id());
    }

    #[test]
    fn only_after_quorum() {
        let reconstructor = ResultReconstructor::new(Arc::new(ShamirShareEngine::seeded(2)));
        let session = session(2);
        assert!(matches!(
            reconstructor.reconstruct(&session),
            Err(ExecutionError::NotReady { .. })
        ));
    }

    #[test]
    fn garbage_is_a_mismatch() {
        let reconstructor = ResultReconstructor::new(Arc::new(ShamirShareEngine::seeded(3)));
        let mut session = session(2);
        for i in 0..2 {
            session.insert_partial(PartialResult {
                node_index: i,
                payload: Ok(vec![i as u8; 4]),
            });
        }
        session.set_state(SessionState::QuorumReached);
        let err = reconstructor.reconstruct(&session).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ReconstructionMismatch {
                source: ReconstructionError::Malformed { .. },
                ..
            }
        ));
    }
}
