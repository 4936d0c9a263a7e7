//! Execution of a session whose inputs were distributed.
//!
//! The [`ExecutionCoordinator`] is the single owner of a [`Session`] while it executes. Node
//! results, cancel requests and the execution deadline are all consumed by one loop, so the
//! quorum condition is evaluated for one result at a time and can only be reached once.
use std::{collections::BTreeSet, future::Future, time::Duration};

use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    distributor::DistributionReport,
    error::ExecutionError,
    msg::{NodeMsg, NodeResult},
    pool::{NodeEndpointPool, NodeTransport, ResultInbox},
    reconstruct::{ReconstructedResult, ResultReconstructor},
    session::{PartialResult, Session, SessionState},
    share::ShareEngine,
};

#[cfg(test)]
mod tests;

/// The result of executing a session.
pub type ExecutionOutcome = Result<ReconstructedResult, ExecutionError>;

type Ret<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub(crate) enum SessionCmd {
    Cancel(Ret<Uuid>),
}

#[derive(Debug, Clone)]
struct ActiveSession {
    session_id: Uuid,
    cmd: mpsc::Sender<SessionCmd>,
}

/// Errors when cancelling a session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CancelError {
    /// No session is executing.
    #[error("no session is executing")]
    NoActiveSession,
}

/// Errors when sending a command to an executing session.
#[derive(Debug, thiserror::Error)]
pub enum HandleError<E> {
    /// The session finished before the command was handled.
    #[error("session ended before the command was handled")]
    SessionEnded,
    /// An error returned by the coordinator.
    #[error("{0}")]
    Coordinator(E),
}

impl<T, E> From<mpsc::error::SendError<T>> for HandleError<E> {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::SessionEnded
    }
}

impl<E> From<oneshot::error::RecvError> for HandleError<E> {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::SessionEnded
    }
}

/// A handle to cancel whichever session its coordinator currently executes.
///
/// This handle is cheap to clone and can be moved to other tasks.
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Receiver<Option<ActiveSession>>);

impl CancelHandle {
    /// The id of the executing session, if any.
    pub fn active_session(&self) -> Option<Uuid> {
        self.0.borrow().as_ref().map(|active| active.session_id)
    }

    /// Cancel the executing session.
    ///
    /// The session fails with [`ExecutionError::Cancelled`] and the nodes are asked to abandon
    /// it. Returns the id of the cancelled session.
    pub fn cancel(&self) -> impl Future<Output = Result<Uuid, HandleError<CancelError>>> + use<> {
        let active = self.0.borrow().clone();
        let (ret_tx, ret_rx) = oneshot::channel();
        async move {
            let active = active.ok_or(HandleError::Coordinator(CancelError::NoActiveSession))?;
            active.cmd.send(SessionCmd::Cancel(ret_tx)).await?;
            Ok(ret_rx.await?)
        }
    }
}

enum Accepted {
    Ok,
    Failed,
    Ignored,
}

/// Drives sessions from distribution to their terminal state.
#[derive(Debug)]
pub struct ExecutionCoordinator {
    active: watch::Sender<Option<ActiveSession>>,
}

impl Default for ExecutionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionCoordinator {
    /// Create an idle coordinator.
    pub fn new() -> Self {
        let (active, _) = watch::channel(None);
        Self { active }
    }

    /// A handle to cancel the session this coordinator executes.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.active.subscribe())
    }

    /// Record the outcome of a distribution, moving the session to
    /// [`SessionState::InputsDistributed`].
    ///
    /// Inputs that were distributed before under the same name are replaced.
    pub fn record_distribution(
        &self,
        session: &mut Session,
        report: DistributionReport,
    ) -> Result<(), ExecutionError> {
        let session_id = session.id();
        match session.state() {
            SessionState::Created | SessionState::InputsDistributed => {}
            state => return Err(ExecutionError::NotReady { session_id, state }),
        }
        if report.session_id() != session_id {
            warn!(
                %session_id,
                report = %report.session_id(),
                "ignoring distribution report of another session"
            );
            return Ok(());
        }
        for (name, visibility, delivered) in report.into_inputs() {
            session.record_input(name, visibility, delivered);
        }
        session.set_state(SessionState::InputsDistributed);
        Ok(())
    }

    /// Trigger the execution of `session` and wait for its output.
    ///
    /// Only nodes that received every input and are reachable are triggered. If fewer of them
    /// than the threshold remain, the session fails without sending the trigger. Results are
    /// taken from `inbox`; results of other sessions, of nodes that were not triggered and
    /// repeated results of a node are discarded.
    #[tracing::instrument(level = "info", skip_all, fields(session_id = %session.id()))]
    pub async fn execute<T: NodeTransport, E: ShareEngine>(
        &self,
        session: &mut Session,
        pool: &NodeEndpointPool<T>,
        inbox: &mut ResultInbox,
        reconstructor: &ResultReconstructor<E>,
    ) -> ExecutionOutcome {
        let session_id = session.id();
        let threshold = session.config().threshold();
        if session.state() != SessionState::InputsDistributed {
            return Err(ExecutionError::NotReady {
                session_id,
                state: session.state(),
            });
        }
        drain_stale(inbox);

        let reachable: BTreeSet<usize> = pool.reachable_indices().into_iter().collect();
        let eligible: Vec<usize> = session
            .delivered_nodes()
            .intersection(&reachable)
            .copied()
            .collect();
        if eligible.len() < threshold {
            warn!(
                eligible = eligible.len(),
                threshold, "not enough nodes received the inputs, not triggering execution"
            );
            session.set_state(SessionState::Failed);
            return Err(ExecutionError::InsufficientNodes {
                session_id,
                reachable: eligible.len(),
                threshold,
            });
        }

        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        self.active.send_replace(Some(ActiveSession {
            session_id,
            cmd: cmd_tx,
        }));
        // also runs if this future is dropped before the session ends
        let mut guard = ExecutionGuard {
            active: &self.active,
            pool,
            session_id,
            abandon: eligible.iter().copied().collect(),
        };
        let dispatched_at = Instant::now();
        session.set_state(SessionState::Executing);
        session.mark_dispatched(dispatched_at);

        let trigger = NodeMsg::Execute {
            session_id,
            program_id: session.config().program_id().to_string(),
        };
        let triggered: BTreeSet<usize> = pool
            .broadcast_to(eligible, &trigger)
            .await
            .into_iter()
            .filter_map(|(index, outcome)| outcome.ok().map(|()| index))
            .collect();
        info!(?triggered, "execution triggered");
        guard.abandon.clone_from(&triggered);

        let execution_timeout = session.config().timeouts().execution;
        let quorum = if triggered.len() < threshold {
            Err(ExecutionError::InsufficientNodes {
                session_id,
                reachable: triggered.len(),
                threshold,
            })
        } else {
            await_quorum(
                session,
                inbox,
                &mut cmd_rx,
                &triggered,
                dispatched_at + execution_timeout,
                execution_timeout,
            )
            .await
        };
        if quorum.is_ok() {
            guard.abandon.clear();
        }
        drop(guard);

        let outcome = match quorum {
            Ok(()) => {
                session.set_state(SessionState::QuorumReached);
                // results that are already queued are used as well
                while let Ok(result) = inbox.try_recv() {
                    accept(session, &triggered, result);
                }
                reconstructor.reconstruct(session)
            }
            Err(err) => {
                warn!(%err, "execution failed");
                Err(err)
            }
        };
        session.set_state(match outcome {
            Ok(_) => SessionState::Complete,
            Err(_) => SessionState::Failed,
        });
        outcome
    }
}

async fn await_quorum(
    session: &mut Session,
    inbox: &mut ResultInbox,
    cmd_rx: &mut mpsc::Receiver<SessionCmd>,
    triggered: &BTreeSet<usize>,
    deadline: Instant,
    after: Duration,
) -> Result<(), ExecutionError> {
    let session_id = session.id();
    let threshold = session.config().threshold();
    let mut failed = 0;
    let deadline = sleep_until(deadline);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            biased;
            Some(cmd) = cmd_rx.recv() => match cmd {
                SessionCmd::Cancel(ret) => {
                    info!("session cancelled");
                    let _ = ret.send(session_id);
                    return Err(ExecutionError::Cancelled { session_id });
                }
            },
            result = inbox.recv() => {
                let Some(result) = result else {
                    // no transport holds a result sender anymore
                    return Err(ExecutionError::InsufficientNodes {
                        session_id,
                        reachable: session.ok_results(),
                        threshold,
                    });
                };
                match accept(session, triggered, result) {
                    Accepted::Ok if session.ok_results() >= threshold => {
                        info!(responded = session.ok_results(), "quorum reached");
                        return Ok(());
                    }
                    Accepted::Failed => {
                        failed += 1;
                        let remaining = triggered.len() - failed;
                        if remaining < threshold {
                            return Err(ExecutionError::InsufficientNodes {
                                session_id,
                                reachable: remaining,
                                threshold,
                            });
                        }
                    }
                    Accepted::Ok | Accepted::Ignored => {}
                }
            }
            () = &mut deadline => {
                return Err(ExecutionError::Timeout {
                    session_id,
                    after,
                    responded: session.ok_results(),
                    threshold,
                });
            }
        }
    }
}

fn accept(session: &mut Session, triggered: &BTreeSet<usize>, result: NodeResult) -> Accepted {
    let NodeResult {
        session_id,
        node_index,
        payload,
    } = result;
    if session_id != session.id() {
        debug!(node_index, other = %session_id, "discarding result of another session");
        return Accepted::Ignored;
    }
    if !triggered.contains(&node_index) {
        warn!(node_index, "discarding result of a node that was not triggered");
        return Accepted::Ignored;
    }
    let ok = payload.is_ok();
    let node_error = payload.as_ref().err().cloned();
    if !session.insert_partial(PartialResult {
        node_index,
        payload,
    }) {
        debug!(node_index, "discarding repeated result");
        return Accepted::Ignored;
    }
    if ok {
        debug!(node_index, "received partial result");
        Accepted::Ok
    } else {
        warn!(node_index, error = node_error.as_deref(), "node failed to execute");
        Accepted::Failed
    }
}

fn drain_stale(inbox: &mut ResultInbox) {
    while let Ok(stale) = inbox.try_recv() {
        debug!(
            node_index = stale.node_index,
            session_id = %stale.session_id,
            "discarding result received outside of an execution"
        );
    }
}

/// Clears the active session and asks the nodes in `abandon` to drop it.
struct ExecutionGuard<'a, T: NodeTransport> {
    active: &'a watch::Sender<Option<ActiveSession>>,
    pool: &'a NodeEndpointPool<T>,
    session_id: Uuid,
    abandon: BTreeSet<usize>,
}

impl<T: NodeTransport> Drop for ExecutionGuard<'_, T> {
    fn drop(&mut self) {
        self.active.send_replace(None);
        if !self.abandon.is_empty() {
            let nodes = std::mem::take(&mut self.abandon);
            abandon(self.pool.clone(), self.session_id, nodes);
        }
    }
}

fn abandon<T: NodeTransport>(
    pool: NodeEndpointPool<T>,
    session_id: Uuid,
    nodes: BTreeSet<usize>,
) {
    let Ok(runtime) = Handle::try_current() else {
        warn!(%session_id, "no runtime to notify nodes about abandoned session");
        return;
    };
    debug!(%session_id, ?nodes, "abandoning session");
    runtime.spawn(async move {
        let msg = NodeMsg::Abandon { session_id };
        for (index, outcome) in pool.broadcast_to(nodes, &msg).await {
            if let Err(err) = outcome {
                debug!(index, %session_id, %err, "unable to notify node about abandoned session");
            }
        }
    });
}
