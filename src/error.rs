//! Error types for the call batching layer.

use alloy::{
    primitives::{Address, Bytes},
    transports::TransportError,
};
use std::sync::Arc;
use thiserror::Error;

/// An individual call within an aggregate batch reverted.
///
/// Carries the original call descriptor and the raw revert payload, so a caller can
/// tell a single failed call apart from a batch-wide transport failure and decide
/// whether retrying just this call makes sense.
#[derive(Debug, Clone, Error)]
#[error("batched call to {target} failed")]
pub struct CallFailedError {
    /// Address the failed call targeted.
    pub target: Address,
    /// Calldata of the failed call.
    pub call_data: Bytes,
    /// Raw (possibly empty) revert payload returned by the aggregator.
    pub return_data: Bytes,
}

/// Failure modes of a batched call.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// A single call in the batch reverted. Siblings in the same batch are unaffected.
    #[error(transparent)]
    CallFailed(#[from] CallFailedError),
    /// The aggregate request itself failed. Every call in the batch receives this
    /// error; no partial results are fabricated.
    #[error("aggregate call failed: {0}")]
    Aggregate(Arc<TransportError>),
    /// The aggregator response did not match the expected shape. Batch-wide, since it
    /// indicates an aggregator or node problem rather than an individual revert.
    #[error("invalid aggregate response: {0}")]
    Decode(String),
}

impl BatchError {
    /// Wraps a transport-level failure of the aggregate request.
    pub(crate) fn aggregate(err: TransportError) -> Self {
        Self::Aggregate(Arc::new(err))
    }
}
