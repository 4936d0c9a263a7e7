//! Optional metadata exchange with a coordinator service.
//!
//! The coordinator is a plain request/response peer for application metadata. Node addresses
//! always come from the [`NetworkConfig`](crate::NetworkConfig), never from the coordinator.
use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::BoxError;

/// Sent to the coordinator when the client connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRequest {
    /// Id of the connecting client.
    pub client_id: String,
    /// The program the node network runs.
    pub program_id: String,
}

/// The coordinator's answer, free-form application metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataResponse {
    /// Metadata entries by key.
    #[serde(default)]
    pub entries: BTreeMap<String, serde_json::Value>,
}

/// A coordinator service the client exchanges metadata with.
pub trait MetadataExchange: Send + Sync {
    /// Send `req` and wait for the coordinator's response.
    fn exchange(&self, req: MetadataRequest) -> BoxFuture<'_, Result<MetadataResponse, BoxError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_entries_default_to_empty() {
        let res: MetadataResponse = serde_json::from_str("{}").unwrap();
        assert!(res.entries.is_empty());
        let res: MetadataResponse =
            serde_json::from_str(r#"{"entries": {"epoch": 3, "region": "eu"}}"#).unwrap();
        assert_eq!(res.entries["epoch"], 3);
        assert_eq!(res.entries["region"], "eu");
    }
}
