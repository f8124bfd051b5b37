//! Batching ratio instrumentation.

use metrics::counter;
use std::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

/// How an intercepted `eth_call` was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Absorbed into the live batch.
    Batched,
    /// Forwarded straight to the underlying transport.
    Direct,
}

impl Route {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Batched => "batched",
            Self::Direct => "direct",
        }
    }
}

/// Samples the batched-to-direct call ratio at a fixed interval.
///
/// Purely informational: recording never blocks and never influences the routing
/// outcome.
#[derive(Debug)]
pub struct BatchRatioSampler {
    interval: Duration,
    state: Mutex<SamplerState>,
}

#[derive(Debug, Default)]
struct SamplerState {
    batched: u64,
    direct: u64,
    last_reset: Option<Instant>,
}

impl BatchRatioSampler {
    /// Creates a sampler that reports and resets every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval, state: Mutex::new(SamplerState::default()) }
    }

    /// Records a routing decision, reporting the ratio once per interval.
    pub fn record(&self, route: Route) {
        counter!("transport.call.count", "route" => route.as_str()).increment(1);

        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        match state.last_reset {
            None => state.last_reset = Some(now),
            Some(last) => {
                if now.duration_since(last) >= self.interval && state.direct > 0 {
                    let ratio = state.batched as f64 / state.direct as f64;
                    debug!(
                        batched = state.batched,
                        direct = state.direct,
                        ratio,
                        "call batching ratio"
                    );
                    *state = SamplerState { last_reset: Some(now), ..Default::default() };
                }
            }
        }

        match route {
            Route::Batched => state.batched += 1,
            Route::Direct => state.direct += 1,
        }
    }

    #[cfg(test)]
    fn counts(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.batched, state.direct)
    }
}
