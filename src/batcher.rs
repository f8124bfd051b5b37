//! Accumulation and debounced dispatch of batched calls.

use crate::{
    error::{BatchError, CallFailedError},
    multicall::{self, Call3},
};
use alloy::{
    eips::BlockId,
    primitives::{Address, Bytes},
    transports::Transport,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Terminal outcome of a single batched call.
pub(crate) type CallOutcome = Result<Bytes, BatchError>;

/// The live, not-yet-dispatched batch.
///
/// `calls` and `senders` are co-indexed and always the same length: position `i`'s
/// sender is settled with position `i`'s result.
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    block: BlockId,
    calls: Vec<Call3>,
    senders: Vec<oneshot::Sender<CallOutcome>>,
}

impl PendingBatch {
    /// Sends the batch as one `aggregate3` call and settles every sender.
    ///
    /// Never propagates an error past its boundary: aggregate-level failures are
    /// fanned out to all callers, so no caller is left hanging.
    pub(crate) async fn dispatch<T>(self, mut inner: T, aggregator: Address)
    where
        T: Transport + Clone,
    {
        let Self { block, calls, senders } = self;
        debug_assert_eq!(calls.len(), senders.len());
        debug!(calls = calls.len(), ?block, "dispatching call batch");

        let (request, calls) = match multicall::aggregate_request(aggregator, calls, block) {
            Ok(encoded) => encoded,
            Err(err) => return settle_all(senders, BatchError::aggregate(err)),
        };

        let results = match inner.call(request).await {
            Ok(resp) => multicall::decode_aggregate(resp, calls.len()),
            Err(err) => Err(BatchError::aggregate(err)),
        };

        match results {
            Ok(results) => {
                for ((call, result), sender) in calls.into_iter().zip(results).zip(senders) {
                    let outcome = if result.success {
                        Ok(result.returnData)
                    } else {
                        Err(CallFailedError {
                            target: call.target,
                            call_data: call.callData,
                            return_data: result.returnData,
                        }
                        .into())
                    };
                    let _ = sender.send(outcome);
                }
            }
            Err(err) => settle_all(senders, err),
        }
    }
}

fn settle_all(senders: Vec<oneshot::Sender<CallOutcome>>, err: BatchError) {
    for sender in senders {
        let _ = sender.send(Err(err.clone()));
    }
}

/// Collects batchable calls and flushes them after a quiet period.
///
/// Each enqueue restarts the debounce window by arming a fresh timer stamped with the
/// batch epoch. Timers superseded by a later enqueue observe a newer epoch on wake and
/// do nothing; epochs are never reused, so a batch is dispatched at most once, by the
/// last timer armed for it.
#[derive(Debug)]
pub(crate) struct CallBatcher {
    delay: Duration,
    state: Mutex<BatchState>,
}

#[derive(Debug, Default)]
struct BatchState {
    epoch: u64,
    batch: PendingBatch,
}

impl CallBatcher {
    pub(crate) fn new(delay: Duration) -> Self {
        Self { delay, state: Mutex::new(BatchState::default()) }
    }

    /// Appends a call to the live batch, unless its block reference conflicts with a
    /// non-empty batch.
    ///
    /// The first call admitted into an empty batch stamps the batch's block reference.
    /// Returns the outcome receiver and the epoch to arm the flush timer with, or
    /// `None` on conflict (the existing batch is left untouched).
    pub(crate) fn try_enqueue(
        &self,
        call: Call3,
        block: BlockId,
    ) -> Option<(oneshot::Receiver<CallOutcome>, u64)> {
        let mut state = self.state.lock().unwrap();

        if state.batch.calls.is_empty() {
            state.batch.block = block;
        } else if state.batch.block != block {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        state.batch.calls.push(call);
        state.batch.senders.push(tx);
        state.epoch += 1;
        trace!(queued = state.batch.calls.len(), epoch = state.epoch, "enqueued batchable call");

        Some((rx, state.epoch))
    }

    /// Swaps the live batch out for dispatch if `epoch` still identifies it.
    ///
    /// Stale epochs (a newer enqueue restarted the window, or the batch was already
    /// taken) yield `None`. Calls arriving after the swap start a new batch instead of
    /// racing with the in-flight one.
    pub(crate) fn take_if_current(&self, epoch: u64) -> Option<PendingBatch> {
        let mut state = self.state.lock().unwrap();
        if state.epoch != epoch || state.batch.calls.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut state.batch))
    }

    /// Arms the debounce timer for `epoch` and dispatches the batch when it fires.
    pub(crate) fn schedule_flush<T>(self: &Arc<Self>, epoch: u64, inner: T, aggregator: Address)
    where
        T: Transport + Clone,
    {
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(batcher.delay).await;
            if let Some(batch) = batcher.take_if_current(epoch) {
                batch.dispatch(inner, aggregator).await;
            }
        });
    }
}
