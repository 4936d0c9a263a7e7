//! A client for running secure multi-party computation (MPC) sessions on a fixed network of
//! nodes.
//!
//! The client turns the inputs of a program into a session across all nodes of a network and
//! turns the nodes' partial outputs back into a single result. Secret inputs are split into
//! shares so that no single node learns them, public inputs are sent to every node in the clear.
//! A result is only returned once at least `threshold` nodes reported consistent partial results.
//!
//! ## Main Components
//!
//! * [`NodeEndpointPool`]: Connections to the nodes, on top of a pluggable [`NodeTransport`].
//! * [`ShareEngine`]: The secret sharing boundary, with [`ShamirShareEngine`] as the default.
//! * [`InputDistributor`]: Shares secret inputs and delivers all inputs to the nodes.
//! * [`ExecutionCoordinator`]: Triggers execution and waits for a quorum of results.
//! * [`ResultReconstructor`]: Combines the partial results into the output.
//! * [`MpcSessionClient`]: The facade composing all of the above.
//!
//! ## Example
//!
//! ```ignore
//! use mpc_session_client::{MpcSessionClient, NetworkConfig};
//!
//! # async fn example(transport: impl mpc_session_client::NodeTransport) -> Result<(), Box<dyn std::error::Error>> {
//! let config = NetworkConfig::from_json(
//!     r#"{
//!         "nodes": ["http://node1:9000", "http://node2:9000", "http://node3:9000"],
//!         "threshold": 2,
//!         "program_id": "secure_addition_v1"
//!     }"#,
//! )?;
//! let mut client = MpcSessionClient::new(config, transport);
//! client.set_secret_input("a", 25_i64);
//! client.set_secret_input("b", 17_i64);
//! client.set_public_input("threshold_val", 50_i64);
//!
//! let result = client.run().await?;
//! println!("Computation result: {:?}", result.value);
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! Shares and secret inputs are never logged. Reconstruction never returns a value unless every
//! partial result it was given is consistent with the others; a mismatch always fails the
//! session instead of returning a single node's unverified value.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod config;
pub mod coordinator;
pub mod distributor;
pub mod error;
pub mod local;
pub mod metadata;
pub mod msg;
pub mod pool;
pub mod reconstruct;
pub mod session;
pub mod share;
pub mod value;

pub use client::{ClientError, ClientState, ClientStatus, MpcSessionClient, ProgramInfo};
pub use config::{NetworkConfig, NodeEndpoint, Timeouts};
pub use coordinator::{
    CancelError, CancelHandle, ExecutionCoordinator, ExecutionOutcome, HandleError,
};
pub use distributor::{DistributeError, DistributionReport, InputDistributor};
pub use error::{ExecutionError, NetworkError, ReconstructionError, ShareError, ValidationError};
pub use msg::{NodeMsg, NodeResult};
pub use pool::{NodeEndpointPool, NodeStatus, NodeTransport, ResultSender};
pub use reconstruct::{ReconstructedResult, ResultReconstructor};
pub use session::{PartialResult, Session, SessionState};
pub use share::{ShamirShare, ShamirShareEngine, Share, ShareEngine, ShareSet};
pub use value::{NamedInput, Value, Visibility};
