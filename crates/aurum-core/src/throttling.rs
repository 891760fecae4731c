use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::provider::SourceError;
use crate::provider_policy::ProviderPolicy;
use crate::ProviderId;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Concurrency and request-quota gate in front of one provider.
#[derive(Clone)]
pub struct ProviderThrottle {
    provider_id: ProviderId,
    permits: Arc<Semaphore>,
    limiter: Arc<DirectRateLimiter>,
}

impl ProviderThrottle {
    pub fn from_policy(policy: &ProviderPolicy) -> Self {
        Self {
            provider_id: policy.provider_id,
            permits: Arc::new(Semaphore::new(policy.max_concurrency.max(1))),
            limiter: Arc::new(RateLimiter::direct(quota_from_window(
                policy.quota_window,
                policy.quota_limit,
            ))),
        }
    }

    pub const fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    /// Wait until the quota admits one more upstream call.
    pub async fn admit(&self) {
        if self.limiter.check().is_err() {
            tracing::debug!(provider = %self.provider_id, "request quota exhausted, waiting");
            self.limiter.until_ready().await;
        }
    }

    /// Take a concurrency slot, then quota. The slot is held until the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, SourceError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SourceError::internal(format!("{} throttle is closed", self.provider_id)))?;
        self.admit().await;
        Ok(permit)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// One throttle per provider, keyed by id.
#[derive(Clone, Default)]
pub struct ThrottleSet {
    throttles: HashMap<ProviderId, ProviderThrottle>,
}

impl ThrottleSet {
    /// Default policies for every known provider with concurrency capped at `max_concurrency`.
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        let throttles = ProviderId::ALL
            .into_iter()
            .map(|provider| {
                let policy =
                    ProviderPolicy::default_for(provider).with_max_concurrency(max_concurrency);
                (provider, ProviderThrottle::from_policy(&policy))
            })
            .collect();
        Self { throttles }
    }

    pub fn with_policy(mut self, policy: &ProviderPolicy) -> Self {
        self.throttles
            .insert(policy.provider_id, ProviderThrottle::from_policy(policy));
        self
    }

    pub fn get(&self, provider: ProviderId) -> Option<&ProviderThrottle> {
        self.throttles.get(&provider)
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit).unwrap_or(NonZeroU32::MIN);
    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);

    Quota::with_period(Duration::from_secs_f64(seconds_per_cell))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_concurrency: usize, quota_limit: u32) -> ProviderPolicy {
        ProviderPolicy {
            provider_id: ProviderId::Sina,
            max_concurrency,
            quota_window: Duration::from_secs(60),
            quota_limit,
        }
    }

    #[tokio::test]
    async fn permits_bound_concurrent_calls() {
        let throttle = ProviderThrottle::from_policy(&policy(2, 100));

        let first = throttle.acquire().await.expect("first permit");
        let _second = throttle.acquire().await.expect("second permit");
        assert_eq!(throttle.available_permits(), 0);

        drop(first);
        assert_eq!(throttle.available_permits(), 1);
    }

    #[tokio::test]
    async fn quota_burst_admits_without_waiting() {
        let throttle = ProviderThrottle::from_policy(&policy(1, 3));

        let admitted = tokio::time::timeout(Duration::from_millis(100), async {
            for _ in 0..3 {
                throttle.admit().await;
            }
        })
        .await;
        assert!(admitted.is_ok());
    }

    #[test]
    fn zero_limit_quota_still_allows_one_call() {
        let quota = quota_from_window(Duration::from_secs(60), 0);
        assert_eq!(quota.burst_size().get(), 1);
    }

    #[test]
    fn set_caps_every_provider() {
        let set = ThrottleSet::with_max_concurrency(1);
        for provider in ProviderId::ALL {
            let throttle = set.get(provider).expect("throttle registered");
            assert_eq!(throttle.available_permits(), 1);
        }
    }
}
