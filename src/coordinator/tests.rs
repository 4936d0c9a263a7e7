use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

use crate::{
    config::{NetworkConfig, NodeEndpoint, Timeouts},
    distributor::InputDistributor,
    pool::{ResultSender, result_inbox},
    share::{ShamirShareEngine, ShareEngine},
    value::{NamedInput, Value},
};

use super::*;

const EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
#[error("node {0} refused the connection")]
struct Refused(usize);

/// Acknowledges every message of a reachable node and answers EXECUTE with a canned result.
#[derive(Default)]
struct TestTransport {
    unreachable: BTreeSet<usize>,
    responses: BTreeMap<usize, (Duration, Result<Vec<u8>, String>)>,
    sent: Mutex<Vec<(usize, NodeMsg)>>,
    results: Mutex<Option<ResultSender>>,
}

impl TestTransport {
    fn respond(mut self, index: usize, payload: Result<Vec<u8>, String>) -> Self {
        self.responses.insert(index, (Duration::ZERO, payload));
        self
    }

    fn respond_after(
        mut self,
        index: usize,
        delay: Duration,
        payload: Result<Vec<u8>, String>,
    ) -> Self {
        self.responses.insert(index, (delay, payload));
        self
    }

    fn unreachable(mut self, index: usize) -> Self {
        self.unreachable.insert(index);
        self
    }

    fn sent_kinds(&self, kind: &str) -> Vec<usize> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, msg)| msg.kind() == kind)
            .map(|(i, _)| *i)
            .collect()
    }
}

impl NodeTransport for TestTransport {
    type Error = Refused;

    async fn connect(&self, node: &NodeEndpoint, results: ResultSender) -> Result<(), Refused> {
        if self.unreachable.contains(&node.index) {
            return Err(Refused(node.index));
        }
        *self.results.lock().unwrap() = Some(results);
        Ok(())
    }

    async fn send(&self, node: &NodeEndpoint, msg: NodeMsg) -> Result<(), Refused> {
        if self.unreachable.contains(&node.index) {
            return Err(Refused(node.index));
        }
        self.sent.lock().unwrap().push((node.index, msg.clone()));
        if let NodeMsg::Execute { session_id, .. } = msg {
            if let Some((delay, payload)) = self.responses.get(&node.index).cloned() {
                let results = self.results.lock().unwrap().clone().unwrap();
                let node_index = node.index;
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    results
                        .deliver(NodeResult {
                            session_id,
                            node_index,
                            payload,
                        })
                        .await;
                });
            }
        }
        Ok(())
    }

    async fn disconnect(&self, _node: &NodeEndpoint) {}
}

struct Harness {
    transport: Arc<TestTransport>,
    config: Arc<NetworkConfig>,
    pool: NodeEndpointPool<TestTransport>,
    results: ResultSender,
    inbox: ResultInbox,
    engine: Arc<ShamirShareEngine>,
    reconstructor: ResultReconstructor<ShamirShareEngine>,
    coordinator: ExecutionCoordinator,
}

impl Harness {
    async fn new(n: usize, t: usize, transport: TestTransport) -> Self {
        let nodes = (0..n)
            .map(|i| format!("http://node{i}.test:8000").parse().unwrap())
            .collect();
        let config = NetworkConfig::new(nodes, t, "client", "secure_addition_v1", None)
            .unwrap()
            .with_timeouts(Timeouts {
                connect: Duration::from_secs(1),
                send: Duration::from_secs(1),
                execution: EXECUTION_TIMEOUT,
            })
            .unwrap();
        let transport = Arc::new(transport);
        let mut pool = NodeEndpointPool::new(&config, Arc::clone(&transport));
        let (results, inbox) = result_inbox(n);
        pool.connect_all(&results).await;
        let engine = Arc::new(ShamirShareEngine::seeded(42));
        Self {
            transport,
            config: Arc::new(config),
            pool,
            results,
            inbox,
            reconstructor: ResultReconstructor::new(Arc::clone(&engine)),
            engine,
            coordinator: ExecutionCoordinator::new(),
        }
    }

    async fn distributed_session(&self) -> Session {
        let mut session = Session::new(Arc::clone(&self.config));
        let report = InputDistributor::new(Arc::clone(&self.engine))
            .distribute(
                &session,
                &self.pool,
                &[NamedInput::secret("a", 25_i64)],
                &[NamedInput::public("threshold_val", 50_i64)],
            )
            .await
            .unwrap();
        self.coordinator
            .record_distribution(&mut session, report)
            .unwrap();
        assert_eq!(session.state(), SessionState::InputsDistributed);
        session
    }

    async fn execute(&mut self, session: &mut Session) -> ExecutionOutcome {
        self.coordinator
            .execute(session, &self.pool, &mut self.inbox, &self.reconstructor)
            .await
    }
}

fn output_shares(value: i64, n: usize, t: usize) -> Vec<Vec<u8>> {
    ShamirShareEngine::seeded(7)
        .share(&Value::Int(value), n, t)
        .unwrap()
        .into_iter()
        .map(|s| s.into_bytes())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn quorum_while_one_node_is_silent() {
    let _g = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default();

    let shares = output_shares(42, 3, 2);
    let transport = TestTransport::default()
        .respond(0, Ok(shares[0].clone()))
        .respond(1, Ok(shares[1].clone()));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    let result = h.execute(&mut session).await.unwrap();
    assert_eq!(result.value, Value::Int(42));
    assert_eq!(result.session_id, session.id());
    assert_eq!(result.contributors, vec![0, 1]);
    assert_eq!(session.state(), SessionState::Complete);
    assert_eq!(h.transport.sent_kinds("EXECUTE"), vec![0, 1, 2]);
    assert!(h.coordinator.cancel_handle().active_session().is_none());
}

#[tokio::test(start_paused = true)]
async fn queued_results_are_used_at_quorum() {
    let shares = output_shares(42, 3, 2);
    let transport = TestTransport::default()
        .respond(0, Ok(shares[0].clone()))
        .respond(1, Ok(shares[1].clone()))
        .respond(2, Ok(shares[2].clone()));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    // all three results are queued before the coordinator looks at the first one
    let result = h.execute(&mut session).await.unwrap();
    assert_eq!(result.value, Value::Int(42));
    assert_eq!(result.contributors, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn node_errors_fail_fast() {
    let shares = output_shares(42, 3, 2);
    let transport = TestTransport::default()
        .respond(0, Ok(shares[0].clone()))
        .respond(1, Err("division by zero".into()))
        .respond(2, Err("division by zero".into()));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    let start = Instant::now();
    let err = h.execute(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::InsufficientNodes {
            reachable: 1,
            threshold: 2,
            ..
        }
    ));
    assert!(start.elapsed() < EXECUTION_TIMEOUT);
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn timeout_abandons_session() {
    let shares = output_shares(42, 3, 2);
    let transport = TestTransport::default().respond(0, Ok(shares[0].clone()));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    let err = h.execute(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Timeout {
            responded: 1,
            threshold: 2,
            ..
        }
    ));
    assert_eq!(err.session_id(), session.id());
    assert_eq!(session.state(), SessionState::Failed);

    // abandon is sent from a background task
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.transport.sent_kinds("ABANDON"), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn no_trigger_without_enough_reachable_nodes() {
    let transport = TestTransport::default().unreachable(1).unreachable(2);
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    let err = h.execute(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::InsufficientNodes {
            reachable: 1,
            threshold: 2,
            ..
        }
    ));
    assert!(h.transport.sent_kinds("EXECUTE").is_empty());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn inconsistent_results_are_a_mismatch() {
    let int = output_shares(42, 3, 2);
    let engine = ShamirShareEngine::seeded(7);
    let flag = engine.share(&Value::Bool(true), 3, 2).unwrap();
    let transport = TestTransport::default()
        .respond(0, Ok(int[0].clone()))
        .respond_after(
            1,
            Duration::from_millis(5),
            Ok(flag.get(1).unwrap().as_bytes().to_vec()),
        );
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    let err = h.execute(&mut session).await.unwrap_err();
    assert!(
        matches!(
            err,
            ExecutionError::ReconstructionMismatch {
                source: crate::error::ReconstructionError::Inconsistent { .. },
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_execution() {
    let shares = output_shares(42, 3, 2);
    let transport = TestTransport::default()
        .respond_after(0, Duration::from_secs(5), Ok(shares[0].clone()))
        .respond_after(1, Duration::from_secs(5), Ok(shares[1].clone()));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;
    let handle = h.coordinator.cancel_handle();
    assert!(matches!(
        handle.cancel().await,
        Err(HandleError::Coordinator(CancelError::NoActiveSession))
    ));

    let session_id = session.id();
    let (outcome, cancelled) = tokio::join!(h.execute(&mut session), async {
        while handle.active_session().is_none() {
            tokio::task::yield_now().await;
        }
        handle.cancel().await
    });
    assert!(matches!(outcome, Err(ExecutionError::Cancelled { .. })));
    assert_eq!(cancelled.unwrap(), session_id);
    assert_eq!(session.state(), SessionState::Failed);

    // results arriving after the cancellation are never applied
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(session.partial_results().is_empty());
    assert_eq!(h.transport.sent_kinds("ABANDON"), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn stale_and_foreign_results_are_discarded() {
    let shares = output_shares(42, 3, 2);
    let transport = TestTransport::default()
        .respond_after(1, Duration::from_millis(5), Ok(shares[1].clone()))
        .respond_after(2, Duration::from_millis(5), Ok(shares[2].clone()));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    // a late result of an earlier session is waiting in the inbox
    h.results
        .deliver(NodeResult {
            session_id: Uuid::new_v4(),
            node_index: 0,
            payload: Ok(shares[0].clone()),
        })
        .await;
    let result = h.execute(&mut session).await.unwrap();
    assert_eq!(result.value, Value::Int(42));
    assert_eq!(result.contributors, vec![1, 2]);
    assert!(!session.partial_results().contains_key(&0));
}

#[tokio::test]
async fn execute_requires_distribution() {
    let mut h = Harness::new(3, 2, TestTransport::default()).await;
    let mut session = Session::new(Arc::clone(&h.config));
    let err = h.execute(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::NotReady {
            state: SessionState::Created,
            ..
        }
    ));
    assert!(h.transport.sent_kinds("EXECUTE").is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropped_execution_abandons_session() {
    let shares = output_shares(42, 3, 2);
    let transport = TestTransport::default().respond(0, Ok(shares[0].clone()));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;
    let handle = h.coordinator.cancel_handle();

    let elapsed = tokio::time::timeout(Duration::from_millis(100), h.execute(&mut session)).await;
    assert!(elapsed.is_err());
    assert!(handle.active_session().is_none());
    assert!(matches!(
        handle.cancel().await,
        Err(HandleError::Coordinator(CancelError::NoActiveSession))
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.transport.sent_kinds("ABANDON"), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn deeply_nested_result_is_malformed() {
    let shares = output_shares(42, 3, 2);
    let mut nested = 2u64.to_le_bytes().to_vec();
    for _ in 0..20_000 {
        nested.extend(3u32.to_le_bytes());
        nested.extend(1u64.to_le_bytes());
    }
    let transport = TestTransport::default()
        .respond(0, Ok(shares[0].clone()))
        .respond_after(1, Duration::from_millis(5), Ok(nested));
    let mut h = Harness::new(3, 2, transport).await;
    let mut session = h.distributed_session().await;

    let err = h.execute(&mut session).await.unwrap_err();
    assert!(
        matches!(
            err,
            ExecutionError::ReconstructionMismatch {
                source: crate::error::ReconstructionError::Malformed { index: 1, .. },
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(session.state(), SessionState::Failed);
}
