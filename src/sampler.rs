use crate::provider::{CounterId, CounterProvider, ProviderError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub const DEFAULT_PROBE_COUNT: u32 = 5;
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Shared handle to the counter provider. Checks run strictly sequentially,
/// so the lock is uncontended; it is scoped to a single instantaneous read
/// and never held across the inter-probe sleep.
pub type SharedProvider = Arc<Mutex<dyn CounterProvider>>;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("probe count must be greater than zero")]
    NoProbes,
    #[error("sampling was cancelled")]
    Cancelled,
    #[error("failed to read {counter}: {source}")]
    Read {
        counter: String,
        #[source]
        source: ProviderError,
    },
}

/// Takes `probe_count` successive instantaneous readings, sleeping
/// `interval` between them, and returns the arithmetic mean. The calling
/// task is occupied for the whole probe_count x interval window; the sleep
/// honors the shutdown signal and bails out with `Cancelled`.
pub struct MetricSampler {
    provider: SharedProvider,
    probe_count: u32,
    interval: Duration,
}

impl MetricSampler {
    pub fn new(provider: SharedProvider) -> Self {
        Self::with_probes(provider, DEFAULT_PROBE_COUNT, DEFAULT_PROBE_INTERVAL)
    }

    pub fn with_probes(provider: SharedProvider, probe_count: u32, interval: Duration) -> Self {
        Self {
            provider,
            probe_count,
            interval,
        }
    }

    pub async fn sample(
        &self,
        counter: &CounterId,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<f64, SampleError> {
        if self.probe_count == 0 {
            return Err(SampleError::NoProbes);
        }

        let mut total = 0.0;
        for probe in 0..self.probe_count {
            let value = {
                let mut provider = match self.provider.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                provider
                    .read_instantaneous(counter)
                    .map_err(|source| SampleError::Read {
                        counter: counter.to_string(),
                        source,
                    })?
            };
            total += value;

            if probe + 1 < self.probe_count {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = cancel.changed() => return Err(SampleError::Cancelled),
                }
            }
        }

        Ok(total / f64::from(self.probe_count))
    }

    /// Combined reading over several targets: the sum of independently
    /// averaged per-target samples, not the average of one merged counter.
    /// A target that appears or disappears between probes therefore cannot
    /// skew the others. An empty target set sums to zero.
    pub async fn sample_sum(
        &self,
        counters: &[CounterId],
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<f64, SampleError> {
        let mut sum = 0.0;
        for counter in counters {
            sum += self.sample(counter, cancel).await?;
        }
        Ok(sum)
    }
}
