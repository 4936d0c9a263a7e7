// The module is built separately for each integration test, so if some items
// are only used in one test but not the other, this will result in warnings
#![allow(dead_code)]

use std::time::Duration;

use mpc_session_client::{NetworkConfig, Timeouts};
use mpc_session_http::{HttpTransport, HttpTransportOpts};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};
use url::Url;

pub(crate) mod mock_node;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .try_init();
}

pub(crate) fn transport() -> HttpTransport {
    HttpTransport::new(HttpTransportOpts {
        poll_interval: Duration::from_millis(20),
        max_poll: Duration::from_secs(5),
        retry_duration: Duration::from_millis(500),
    })
    .expect("building http transport")
}

pub(crate) fn config(nodes: Vec<Url>, threshold: usize, coordinator: Option<Url>) -> NetworkConfig {
    NetworkConfig::new(nodes, threshold, "http_test_client", "sum", coordinator)
        .and_then(|config| {
            config.with_timeouts(Timeouts {
                connect: Duration::from_secs(2),
                send: Duration::from_secs(2),
                execution: Duration::from_secs(5),
            })
        })
        .expect("valid config")
}
