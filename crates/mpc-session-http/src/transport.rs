//! The [`NodeTransport`] over HTTP, results are polled from each node.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use mpc_session_client::{NodeEndpoint, NodeMsg, NodeResult, NodeTransport, ResultSender};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use tokio::{task::AbortHandle, time::Instant};
use tracing::{Instrument, Level, debug, debug_span, error, warn};
use url::Url;
use uuid::Uuid;

use crate::{api, format_error_chain};

/// Options of the [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportOpts {
    /// Time between two requests for a node's result.
    pub poll_interval: Duration,
    /// Stop polling a node that did not report a result after this long.
    pub max_poll: Duration,
    /// Total time transient request failures are retried.
    pub retry_duration: Duration,
}

impl Default for HttpTransportOpts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_poll: Duration::from_secs(10 * 60),
            retry_duration: Duration::from_secs(30),
        }
    }
}

/// A [`NodeTransport`] that talks to the nodes over HTTP.
///
/// Node addresses are used as the base URL of the routes, so an address with a path must end
/// with a `/`.
#[derive(Clone)]
pub struct HttpTransport {
    client: ClientWithMiddleware,
    opts: HttpTransportOpts,
    conns: Arc<Mutex<HashMap<Url, NodeConn>>>,
}

struct NodeConn {
    results: ResultSender,
    polls: HashMap<Uuid, AbortHandle>,
}

/// Errors of the [`HttpTransport`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HttpTransportError {
    /// The route is not a valid URL relative to the node address.
    #[error("invalid url for route {route} at {base}")]
    Url {
        /// The node address.
        base: Url,
        /// The route.
        route: String,
        /// The parse error.
        source: url::ParseError,
    },
    /// The request body could not be serialized.
    #[error("unable to serialize request body")]
    Encode(#[from] serde_json::Error),
    /// The request failed.
    #[error("failed request to {url}")]
    Request {
        /// The requested url.
        url: Url,
        /// The request error.
        source: reqwest_middleware::Error,
    },
    /// The node answered with an error status.
    #[error("{route} request failed with status {status}: {body}")]
    Status {
        /// The route.
        route: String,
        /// The returned status.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// The response body could not be decoded.
    #[error("invalid response from {url}")]
    Decode {
        /// The requested url.
        url: Url,
        /// The decoding error.
        source: reqwest::Error,
    },
}

/// Build the HTTP client with retries of transient failures.
pub(crate) fn client(retry_duration: Duration) -> Result<ClientWithMiddleware, reqwest::Error> {
    #[allow(unused_mut)]
    let mut builder = reqwest::ClientBuilder::new();

    #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
    {
        builder = builder.tcp_user_timeout(Duration::from_secs(60));
    }

    let reqwest_client = builder.build()?;
    let retry_policy =
        ExponentialBackoff::builder().build_with_total_retry_duration(retry_duration);
    Ok(reqwest_middleware::ClientBuilder::new(reqwest_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build())
}

pub(crate) fn join(base: &Url, route: &str) -> Result<Url, HttpTransportError> {
    base.join(route).map_err(|source| HttpTransportError::Url {
        base: base.clone(),
        route: route.to_string(),
        source,
    })
}

pub(crate) async fn error_body(resp: reqwest::Response) -> String {
    resp.text()
        .await
        .unwrap_or_else(|err| format_error_chain(&err))
}

impl HttpTransport {
    /// A transport with its own HTTP client.
    pub fn new(opts: HttpTransportOpts) -> Result<Self, reqwest::Error> {
        let client = client(opts.retry_duration)?;
        Ok(Self::with_client(client, opts))
    }

    /// A transport using an existing HTTP client.
    pub fn with_client(client: ClientWithMiddleware, opts: HttpTransportOpts) -> Self {
        Self {
            client,
            opts,
            conns: Arc::default(),
        }
    }

    fn conns(&self) -> MutexGuard<'_, HashMap<Url, NodeConn>> {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn make_request(
        &self,
        node: &NodeEndpoint,
        route: &'static str,
        body: serde_json::Value,
    ) -> Result<(), HttpTransportError> {
        let url = join(&node.address, route)?;
        let resp = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|source| HttpTransportError::Request { url, source })?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let err = HttpTransportError::Status {
                route: route.to_string(),
                status: resp.status(),
                body: error_body(resp).await,
            };
            error!(%err, node = node.index);
            Err(err)
        }
    }

    /// Poll the node for its result of `session_id` in the background.
    fn start_polling(&self, node: &NodeEndpoint, session_id: Uuid) -> Result<(), HttpTransportError> {
        let url = join(&node.address, &format!("result/{session_id}"))?;
        let mut conns = self.conns();
        let Some(conn) = conns.get_mut(&node.address) else {
            warn!(node = node.index, "executing on a node that is not connected");
            return Ok(());
        };
        let poll = ResultPoll {
            client: self.client.clone(),
            url,
            node_index: node.index,
            results: conn.results.clone(),
            interval: self.opts.poll_interval,
            deadline: Instant::now() + self.opts.max_poll,
        };
        let span = debug_span!("poll_result", node = node.index, %session_id);
        let handle = tokio::spawn(poll.run().instrument(span));
        conn.polls.retain(|_, poll| !poll.is_finished());
        if let Some(previous) = conn.polls.insert(session_id, handle.abort_handle()) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_polling(&self, node: &NodeEndpoint, session_id: Uuid) {
        if let Some(poll) = self
            .conns()
            .get_mut(&node.address)
            .and_then(|conn| conn.polls.remove(&session_id))
        {
            poll.abort();
        }
    }
}

struct ResultPoll {
    client: ClientWithMiddleware,
    url: Url,
    node_index: usize,
    results: ResultSender,
    interval: Duration,
    deadline: Instant,
}

impl ResultPoll {
    async fn run(self) {
        loop {
            if self.results.is_closed() {
                return;
            }
            if Instant::now() >= self.deadline {
                warn!("node did not report a result in time, giving up");
                return;
            }
            match self.fetch().await {
                Ok(Some(mut result)) => {
                    if result.node_index != self.node_index {
                        warn!(reported = result.node_index, "node reported a wrong index");
                        result.node_index = self.node_index;
                    }
                    if !self.results.deliver(result).await {
                        debug!("client no longer accepts results");
                    }
                    return;
                }
                Ok(None) => {}
                Err(err) => warn!(err = %format_error_chain(&err), "unable to fetch result"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn fetch(&self) -> Result<Option<NodeResult>, HttpTransportError> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|source| HttpTransportError::Request {
                url: self.url.clone(),
                source,
            })?;
        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                resp.json::<NodeResult>()
                    .await
                    .map(Some)
                    .map_err(|source| HttpTransportError::Decode {
                        url: self.url.clone(),
                        source,
                    })
            }
            status => Err(HttpTransportError::Status {
                route: "result".to_string(),
                status,
                body: error_body(resp).await,
            }),
        }
    }
}

impl NodeTransport for HttpTransport {
    type Error = HttpTransportError;

    #[tracing::instrument(level = Level::DEBUG, skip_all, fields(node = node.index))]
    async fn connect(
        &self,
        node: &NodeEndpoint,
        results: ResultSender,
    ) -> Result<(), HttpTransportError> {
        let url = join(&node.address, "health")?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| HttpTransportError::Request { url, source })?;
        if !resp.status().is_success() {
            return Err(HttpTransportError::Status {
                route: "health".to_string(),
                status: resp.status(),
                body: error_body(resp).await,
            });
        }
        let previous = self.conns().insert(
            node.address.clone(),
            NodeConn {
                results,
                polls: HashMap::new(),
            },
        );
        if let Some(previous) = previous {
            previous.polls.values().for_each(AbortHandle::abort);
        }
        Ok(())
    }

    #[tracing::instrument(level = Level::DEBUG, skip_all, fields(node = node.index, kind = msg.kind()))]
    async fn send(&self, node: &NodeEndpoint, msg: NodeMsg) -> Result<(), HttpTransportError> {
        let session_id = msg.session_id();
        let execute = matches!(msg, NodeMsg::Execute { .. });
        if matches!(msg, NodeMsg::Abandon { .. }) {
            self.stop_polling(node, session_id);
        }
        let (route, body) = api::route(msg);
        self.make_request(node, route, body?).await?;
        if execute {
            self.start_polling(node, session_id)?;
        }
        Ok(())
    }

    async fn disconnect(&self, node: &NodeEndpoint) {
        if let Some(conn) = self.conns().remove(&node.address) {
            conn.polls.values().for_each(AbortHandle::abort);
        }
    }
}
