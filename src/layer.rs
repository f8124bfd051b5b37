//! Call batching transport layer.
//!
//! Routes every intercepted read between the live batch and the underlying transport.

use crate::{
    ETH_CALL, ETH_GET_BALANCE,
    batcher::CallBatcher,
    metrics::{BatchRatioSampler, Route},
    multicall::{self, Call3, aggregate3Call},
};
use alloy::{
    eips::BlockId,
    primitives::{Address, ChainId, TxKind},
    rpc::{
        json_rpc::{Id, RequestPacket, Response, ResponsePacket, ResponsePayload, SerializedRequest},
        types::TransactionRequest,
    },
    sol_types::SolCall,
    transports::{Transport, TransportError, TransportErrorKind, TransportFut},
};
use futures_util::FutureExt;
use serde_json::value::to_raw_value;
use std::{
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tower::{Layer, Service};

/// Debounce delay applied after the most recent enqueue before a batch is flushed.
pub const DEFAULT_BATCHING_DELAY: Duration = Duration::from_millis(10);

/// Interval at which the batching ratio is sampled.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// A [`tower::Layer`] that batches `eth_call` requests into Multicall3 `aggregate3`
/// invocations.
///
/// Calls issued within the debounce delay of each other against the same block
/// reference are merged into a single aggregate request; the layered service is a
/// drop-in transport, so callers need no awareness that batching occurs underneath.
/// Chains without a known aggregator deployment forward everything directly.
#[derive(Debug, Clone)]
pub struct CallBatchLayer {
    aggregator: Option<Address>,
    delay: Duration,
    sample_interval: Duration,
}

impl CallBatchLayer {
    /// Creates a layer for the given chain, resolving the aggregator address from the
    /// fixed deployment table.
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            aggregator: multicall::aggregator_address(chain_id),
            delay: DEFAULT_BATCHING_DELAY,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }

    /// Configures the debounce delay.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Configures the ratio sampling interval.
    pub const fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Whether batching is enabled for the configured chain.
    pub const fn is_enabled(&self) -> bool {
        self.aggregator.is_some()
    }
}

impl<T> Layer<T> for CallBatchLayer {
    type Service = CallBatchService<T>;

    fn layer(&self, inner: T) -> Self::Service {
        CallBatchService {
            inner,
            aggregator: self.aggregator,
            batcher: Arc::new(CallBatcher::new(self.delay)),
            sampler: Arc::new(BatchRatioSampler::new(self.sample_interval)),
        }
    }
}

/// An [`alloy::transports::Transport`] that transparently batches read calls.
#[derive(Debug, Clone)]
pub struct CallBatchService<T> {
    /// The underlying transport.
    inner: T,
    /// Aggregator contract address, if one is deployed on this chain.
    aggregator: Option<Address>,
    /// The live batch shared by every clone of this service.
    batcher: Arc<CallBatcher>,
    sampler: Arc<BatchRatioSampler>,
}

impl<T> Service<RequestPacket> for CallBatchService<T>
where
    T: Transport + Clone,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RequestPacket) -> Self::Future {
        if req.as_single().is_some_and(|r| r.method() == ETH_CALL) {
            return self.eth_call(req);
        }
        if req.as_single().is_some_and(|r| r.method() == ETH_GET_BALANCE) {
            return self.eth_get_balance(req);
        }

        // Anything we do not intercept is forwarded unchanged.
        self.inner.call(req)
    }
}

impl<T> CallBatchService<T>
where
    T: Transport + Clone,
{
    fn eth_call(&mut self, req: RequestPacket) -> TransportFut<'static> {
        // No aggregator on this chain: batching stays disabled entirely.
        let Some(aggregator) = self.aggregator else {
            return self.inner.call(req);
        };

        let Some(parsed) = req.as_single().and_then(parse_call_request) else {
            // Params we cannot interpret are forwarded untouched.
            self.sampler.record(Route::Direct);
            return self.inner.call(req);
        };

        if !parsed.batchable() || parsed.is_aggregate_call(aggregator) {
            self.sampler.record(Route::Direct);
            return self.inner.call(req);
        }

        let (id, block, call) = parsed.into_call();

        // Conflict check and enqueue are one atomic step; a block reference that
        // clashes with a non-empty batch falls back to the direct path and leaves the
        // batch untouched.
        let Some((rx, epoch)) = self.batcher.try_enqueue(call, block) else {
            self.sampler.record(Route::Direct);
            return self.inner.call(req);
        };

        self.sampler.record(Route::Batched);
        self.batcher.schedule_flush(epoch, self.inner.clone(), aggregator);

        async move {
            match rx.await {
                Ok(Ok(data)) => success_response(id, &data),
                Ok(Err(err)) => Err(TransportErrorKind::custom(err)),
                Err(_) => Err(TransportErrorKind::custom_str("call batcher dropped before settling")),
            }
        }
        .boxed()
    }

    fn eth_get_balance(&mut self, req: RequestPacket) -> TransportFut<'static> {
        let Some(aggregator) = self.aggregator else {
            return self.inner.call(req);
        };

        let Some((id, addr, block)) = req.as_single().and_then(parse_balance_request) else {
            return self.inner.call(req);
        };

        // Balance reads are batched differently: each becomes its own direct
        // aggregator call instead of joining the call queue.
        let request = match multicall::balance_request(aggregator, addr, block) {
            Ok(request) => request,
            Err(err) => return Box::pin(async move { Err::<ResponsePacket, _>(err) }),
        };

        let mut inner = self.inner.clone();
        async move {
            let resp = inner.call(request).await?;
            let balance = multicall::decode_balance(resp).map_err(TransportErrorKind::custom)?;
            success_response(id, &balance)
        }
        .boxed()
    }
}

/// An `eth_call` request pulled apart for routing.
#[derive(Debug)]
struct ParsedCall {
    id: Id,
    tx: TransactionRequest,
    block: BlockId,
    has_state_override: bool,
}

impl ParsedCall {
    /// Overrides the aggregator cannot carry with per-call semantics force the direct
    /// path.
    fn batchable(&self) -> bool {
        !self.has_state_override
            && self.tx.from.is_none()
            && self.tx.gas.is_none()
            && self.tx.gas_price.is_none()
            && self.tx.max_fee_per_gas.is_none()
            && self.tx.max_priority_fee_per_gas.is_none()
            && self.tx.value.is_none()
            && self.target().is_some()
    }

    /// A call that already encodes an `aggregate3` invocation against the aggregator
    /// itself is never wrapped a second time.
    fn is_aggregate_call(&self, aggregator: Address) -> bool {
        self.target() == Some(aggregator)
            && self
                .tx
                .input
                .input()
                .is_some_and(|data| data.starts_with(&aggregate3Call::SELECTOR))
    }

    fn target(&self) -> Option<Address> {
        match self.tx.to {
            Some(TxKind::Call(target)) => Some(target),
            _ => None,
        }
    }

    fn into_call(self) -> (Id, BlockId, Call3) {
        let target = self.target().expect("checked by batchable");
        let call = Call3 {
            target,
            allowFailure: true,
            callData: self.tx.input.input().cloned().unwrap_or_default(),
        };
        (self.id, self.block, call)
    }
}

fn parse_call_request(req: &SerializedRequest) -> Option<ParsedCall> {
    let params = request_params(req)?;
    let params = params.as_array()?;
    let tx: TransactionRequest = serde_json::from_value(params.first()?.clone()).ok()?;
    let block = parse_block(params.get(1))?;
    Some(ParsedCall {
        id: req.meta().id.clone(),
        tx,
        block,
        has_state_override: params.len() > 2,
    })
}

fn parse_balance_request(req: &SerializedRequest) -> Option<(Id, Address, BlockId)> {
    let params = request_params(req)?;
    let params = params.as_array()?;
    let addr: Address = serde_json::from_value(params.first()?.clone()).ok()?;
    let block = parse_block(params.get(1))?;
    Some((req.meta().id.clone(), addr, block))
}

fn request_params(req: &SerializedRequest) -> Option<serde_json::Value> {
    let mut request: serde_json::Value = serde_json::from_str(req.serialized().get()).ok()?;
    Some(request.get_mut("params")?.take())
}

/// An absent or null block parameter means the symbolic latest state.
fn parse_block(value: Option<&serde_json::Value>) -> Option<BlockId> {
    match value {
        None | Some(serde_json::Value::Null) => Some(BlockId::latest()),
        Some(value) => serde_json::from_value(value.clone()).ok(),
    }
}

fn success_response<V: serde::Serialize>(id: Id, value: &V) -> Result<ResponsePacket, TransportError> {
    let payload = to_raw_value(value).map_err(TransportError::SerError)?;
    Ok(ResponsePacket::Single(Response { id, payload: ResponsePayload::Success(payload) }))
}
