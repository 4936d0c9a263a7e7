//! An HTTP transport for the MPC session client.
//!
//! This crate implements the [`NodeTransport`] of [`mpc_session_client`] on top of plain HTTP
//! requests. Every message is sent as a JSON `POST` to the node, the node's result is fetched by
//! polling `GET /result/{session_id}` after `EXECUTE` was acknowledged:
//!
//! | Message             | Route                      |
//! |---------------------|----------------------------|
//! | connect             | `GET /health`              |
//! | `DISTRIBUTE_SHARE`  | `POST /distribute/share`   |
//! | `DISTRIBUTE_PUBLIC` | `POST /distribute/public`  |
//! | `EXECUTE`           | `POST /execute`            |
//! | `ABANDON`           | `POST /abandon`            |
//! | result              | `GET /result/{session_id}` |
//!
//! The optional coordinator service is reached through [`HttpMetadataExchange`] at
//! `POST /metadata`.
//!
//! # CAUTION: Authentication
//!
//! Requests are not authenticated. Secret shares are sent as part of the request bodies, so the
//! nodes must only be reached through TLS (`https://` node addresses) or an authenticating proxy.
//!
//! [`NodeTransport`]: mpc_session_client::NodeTransport
use std::fmt::Write;

pub mod api;
mod metadata;
mod transport;

pub use metadata::HttpMetadataExchange;
pub use transport::{HttpTransport, HttpTransportError, HttpTransportOpts};

/// Format an error and all of its sources, one per line.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = anyhow::Chain::new(err).peekable();
    let mut f = String::new();
    if let Some(err) = chain.next() {
        let _ = writeln!(&mut f, "Error: {err}");
    }
    if chain.peek().is_some() {
        let _ = writeln!(&mut f, "\nCaused by:");
    }
    for err in chain {
        let _ = writeln!(&mut f, "\t{err}");
    }
    f
}
