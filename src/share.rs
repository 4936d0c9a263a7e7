//! The secret sharing boundary.
//!
//! The session logic only ever sees opaque byte payloads: a [`ShareEngine`] turns a [`Value`]
//! into one [`Share`] per node and turns a set of partial results back into a value. Which
//! scheme, field or encoding is used is entirely up to the engine.
use std::fmt::Debug;

use crate::{
    error::{ReconstructionError, ShareError},
    value::Value,
};

pub mod shamir;

pub use shamir::{ShamirShare, ShamirShareEngine, Shape};

/// A pluggable secret sharing scheme.
pub trait ShareEngine: Send + Sync + 'static {
    /// Split `value` into exactly `n` shares such that any `threshold` of them reconstruct it.
    ///
    /// The share at position `i` is meant for the node with index `i`. Shares may be
    /// randomized, only their number is deterministic.
    fn share(&self, value: &Value, n: usize, threshold: usize) -> Result<ShareSet, ShareError>;

    /// Reconstruct a value from `(node index, payload)` pairs.
    ///
    /// Must succeed for any set of at least `threshold` valid partials and must return
    /// [`ReconstructionError::Inconsistent`] or [`ReconstructionError::Malformed`] instead of a
    /// corrupted value if a partial is invalid or does not agree with the others.
    fn reconstruct(
        &self,
        partials: &[(usize, &[u8])],
        threshold: usize,
    ) -> Result<Value, ReconstructionError>;
}

/// A single opaque share.
#[derive(Clone, PartialEq, Eq)]
pub struct Share(Vec<u8>);

impl Share {
    /// The encoded share.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the share, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Share {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share").field("len", &self.0.len()).finish()
    }
}

/// The shares of one secret value, ordered by node index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSet(Vec<Share>);

impl ShareSet {
    /// Create a share set, the share at position `i` belongs to node `i`.
    pub fn new(shares: Vec<Share>) -> Self {
        Self(shares)
    }

    /// Number of shares.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set contains no shares.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The share of the node with the given index.
    pub fn get(&self, index: usize) -> Option<&Share> {
        self.0.get(index)
    }
}

impl IntoIterator for ShareSet {
    type Item = Share;
    type IntoIter = std::vec::IntoIter<Share>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
