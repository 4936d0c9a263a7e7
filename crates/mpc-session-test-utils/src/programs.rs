//! Programs the simulated nodes can run on their shares.
use std::{collections::BTreeMap, sync::Arc};

use mpc_session_client::{ShamirShare, Value};

/// The inputs a simulated node received for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInputs {
    /// The node's shares of the secret inputs, by name.
    pub shares: BTreeMap<String, ShamirShare>,
    /// The public inputs, by name.
    pub publics: BTreeMap<String, Value>,
}

/// Computes a node's share of the output from its inputs.
///
/// Only linear operations on [`ShamirShare`]s are available, so the programs are limited to sums
/// and scaling. An `Err` is reported to the client as a failed local execution.
pub type Program = Arc<dyn Fn(&NodeInputs) -> Result<ShamirShare, String> + Send + Sync>;

/// Sums all secret inputs, ignoring the public ones.
pub fn sum_secrets() -> Program {
    Arc::new(sum)
}

/// Sums all secret inputs and adds every public integer input.
pub fn sum_secrets_and_publics() -> Program {
    Arc::new(|inputs: &NodeInputs| {
        let mut total = sum(inputs)?;
        for (name, value) in &inputs.publics {
            total = total
                .add_public(value)
                .map_err(|e| format!("cannot add public input '{name}': {e}"))?;
        }
        Ok(total)
    })
}

fn sum(inputs: &NodeInputs) -> Result<ShamirShare, String> {
    let mut shares = inputs.shares.iter();
    let Some((_, first)) = shares.next() else {
        return Err("no secret inputs".to_string());
    };
    shares.try_fold(first.clone(), |total, (name, share)| {
        total
            .add(share)
            .map_err(|e| format!("cannot add secret input '{name}': {e}"))
    })
}
