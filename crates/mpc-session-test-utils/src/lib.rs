//! Test utilities for MPC session clients.
//!
//! [`SimNetwork`] is an in-process network of simulated nodes that implements
//! [`NodeTransport`](mpc_session_client::NodeTransport). Every node stores the inputs it receives
//! per session, runs a [`Program`] on its shares when asked to execute and reports its share of
//! the output through the client's result inbox. Individual nodes can be made to misbehave with a
//! [`NodeBehavior`].
pub mod programs;
pub mod sim;

pub use programs::{NodeInputs, Program, sum_secrets, sum_secrets_and_publics};
pub use sim::{NodeBehavior, SimError, SimNetwork};
