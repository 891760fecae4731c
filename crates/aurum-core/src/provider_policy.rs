use std::time::Duration;

use crate::ProviderId;

/// Request budget for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    /// Concurrent single-entity calls allowed at once.
    pub max_concurrency: usize,
    pub quota_window: Duration,
    pub quota_limit: u32,
}

impl ProviderPolicy {
    pub fn eastmoney_default() -> Self {
        Self {
            provider_id: ProviderId::Eastmoney,
            max_concurrency: 4,
            quota_window: Duration::from_secs(60),
            quota_limit: 120,
        }
    }

    pub fn sina_default() -> Self {
        Self {
            provider_id: ProviderId::Sina,
            max_concurrency: 4,
            quota_window: Duration::from_secs(60),
            quota_limit: 120,
        }
    }

    pub fn frankfurter_default() -> Self {
        Self {
            provider_id: ProviderId::Frankfurter,
            max_concurrency: 4,
            quota_window: Duration::from_secs(60),
            quota_limit: 60,
        }
    }

    /// open.er-api.com refreshes once a day and asks clients to stay gentle.
    pub fn exchange_rate_api_default() -> Self {
        Self {
            provider_id: ProviderId::ExchangeRateApi,
            max_concurrency: 2,
            quota_window: Duration::from_secs(60),
            quota_limit: 30,
        }
    }

    pub fn imf_default() -> Self {
        Self {
            provider_id: ProviderId::Imf,
            max_concurrency: 2,
            quota_window: Duration::from_secs(60),
            quota_limit: 20,
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Eastmoney => Self::eastmoney_default(),
            ProviderId::Sina => Self::sina_default(),
            ProviderId::Frankfurter => Self::frankfurter_default(),
            ProviderId::ExchangeRateApi => Self::exchange_rate_api_default(),
            ProviderId::Imf => Self::imf_default(),
        }
    }

    /// Cap concurrency at a configured ceiling; zero is raised to one.
    pub fn with_max_concurrency(mut self, ceiling: usize) -> Self {
        self.max_concurrency = self.max_concurrency.min(ceiling).max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_provider_has_a_policy() {
        for provider in ProviderId::ALL {
            let policy = ProviderPolicy::default_for(provider);
            assert_eq!(policy.provider_id, provider);
            assert!(policy.max_concurrency >= 1);
            assert!(policy.quota_limit >= 1);
        }
    }

    #[test]
    fn configured_ceiling_never_drops_to_zero() {
        let policy = ProviderPolicy::eastmoney_default().with_max_concurrency(0);
        assert_eq!(policy.max_concurrency, 1);

        let policy = ProviderPolicy::imf_default().with_max_concurrency(16);
        assert_eq!(policy.max_concurrency, 2);
    }
}
