//! # Batched Transport
//!
//! An alloy transport layer that transparently batches JSON-RPC read calls.
//!
//! Concurrent `eth_call` requests issued within a short debounce window against the
//! same block reference are merged into a single Multicall3 `aggregate3` invocation
//! and fanned back out to their callers; `eth_getBalance` is served through the
//! aggregator's balance helper. Requests that carry per-call overrides, conflict with
//! the live batch's block reference, or target a chain without a known aggregator
//! deployment are forwarded directly, so the layered service remains a drop-in
//! transport.

mod batcher;
pub mod error;
pub mod layer;
pub mod metrics;
pub mod multicall;

pub use error::{BatchError, CallFailedError};
pub use layer::{CallBatchLayer, CallBatchService, DEFAULT_BATCHING_DELAY, DEFAULT_SAMPLE_INTERVAL};

pub(crate) const ETH_CALL: &str = "eth_call";
pub(crate) const ETH_GET_BALANCE: &str = "eth_getBalance";
