//! A node that serves the HTTP routes of the transport and computes on its shares in memory.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mpc_session_client::{
    NodeResult, ShamirShare,
    metadata::{MetadataRequest, MetadataResponse},
};
use mpc_session_http::api::{AbandonRequest, ExecuteRequest, PublicRequest, ShareRequest};
use mpc_session_test_utils::{NodeInputs, Program};
use tower_http::{classify::StatusInRangeAsFailures, trace::TraceLayer};
use url::Url;
use uuid::Uuid;

#[derive(Clone)]
pub(crate) struct MockNode {
    inner: Arc<Mutex<NodeState>>,
}

struct NodeState {
    index: usize,
    program: Program,
    reject_execute: bool,
    inputs: HashMap<Uuid, NodeInputs>,
    results: HashMap<Uuid, NodeResult>,
    abandoned: Vec<Uuid>,
}

type Rejection = (StatusCode, String);

impl MockNode {
    pub(crate) fn new(index: usize, program: Program) -> Self {
        Self {
            inner: Arc::new(Mutex::new(NodeState {
                index,
                program,
                reject_execute: false,
                inputs: HashMap::new(),
                results: HashMap::new(),
                abandoned: vec![],
            })),
        }
    }

    /// Answer `POST /execute` with 422.
    pub(crate) fn rejecting_execute(self) -> Self {
        self.inner.lock().expect("poisoned").reject_execute = true;
        self
    }

    pub(crate) fn abandoned(&self) -> Vec<Uuid> {
        self.inner.lock().expect("poisoned").abandoned.clone()
    }

    /// Serve the node on a random local port and return its address.
    pub(crate) async fn serve(self) -> Url {
        let classifier = StatusInRangeAsFailures::new(400..=599).into_make_classifier();
        let app = Router::new()
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/distribute/share", post(share))
            .route("/distribute/public", post(public))
            .route("/execute", post(execute))
            .route("/abandon", post(abandon))
            .route("/result/{session_id}", get(result))
            .with_state(self)
            .layer(TraceLayer::new(classifier));
        serve(app).await
    }
}

pub(crate) async fn serve(app: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("binding to addr");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("starting axum server")
    });
    Url::parse(&format!("http://{addr}/")).expect("url parse")
}

/// A coordinator that answers every metadata request with an `epoch` and the client id.
pub(crate) async fn serve_coordinator() -> Url {
    let app = Router::new().route(
        "/metadata",
        post(|Json(req): Json<MetadataRequest>| async move {
            let mut res = MetadataResponse::default();
            res.entries.insert("epoch".into(), 7.into());
            res.entries.insert("client".into(), req.client_id.into());
            Json(res)
        }),
    );
    serve(app).await
}

async fn share(
    State(node): State<MockNode>,
    Json(req): Json<ShareRequest>,
) -> Result<(), Rejection> {
    let share = ShamirShare::from_bytes(&req.share_payload)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let mut state = node.inner.lock().expect("poisoned");
    if share.node_index() != state.index {
        return Err((StatusCode::BAD_REQUEST, "share of another node".into()));
    }
    let inputs = state.inputs.entry(req.session_id).or_default();
    inputs.shares.insert(req.input_name, share);
    Ok(())
}

async fn public(State(node): State<MockNode>, Json(req): Json<PublicRequest>) {
    let mut state = node.inner.lock().expect("poisoned");
    let inputs = state.inputs.entry(req.session_id).or_default();
    inputs.publics.insert(req.input_name, req.value);
}

async fn execute(
    State(node): State<MockNode>,
    Json(req): Json<ExecuteRequest>,
) -> Result<(), Rejection> {
    let mut state = node.inner.lock().expect("poisoned");
    if state.reject_execute {
        return Err((StatusCode::UNPROCESSABLE_ENTITY, "execution disabled".into()));
    }
    let inputs = state.inputs.get(&req.session_id).cloned().unwrap_or_default();
    let payload = (state.program)(&inputs)
        .and_then(|share| share.to_bytes().map_err(|e| e.to_string()));
    let result = NodeResult {
        session_id: req.session_id,
        node_index: state.index,
        payload,
    };
    state.results.insert(req.session_id, result);
    Ok(())
}

async fn abandon(State(node): State<MockNode>, Json(req): Json<AbandonRequest>) {
    let mut state = node.inner.lock().expect("poisoned");
    state.inputs.remove(&req.session_id);
    state.results.remove(&req.session_id);
    state.abandoned.push(req.session_id);
}

async fn result(State(node): State<MockNode>, Path(session_id): Path<Uuid>) -> Response {
    let state = node.inner.lock().expect("poisoned");
    match state.results.get(&session_id) {
        Some(result) => Json(result.clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
