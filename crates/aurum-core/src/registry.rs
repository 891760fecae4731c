use std::collections::HashMap;

use crate::{EntityClass, ProviderId};

/// Ordered provider chains per entity class.
///
/// The order is the try-order: index 0 is always attempted first. Built once
/// from configuration and injected into the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRegistry {
    chains: HashMap<EntityClass, Vec<ProviderId>>,
    fallback_enabled: bool,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::builder()
            .chain(
                EntityClass::Quote,
                [ProviderId::Eastmoney, ProviderId::Sina],
            )
            .chain(
                EntityClass::Rate,
                [ProviderId::Frankfurter, ProviderId::ExchangeRateApi],
            )
            .chain(EntityClass::Reserve, [ProviderId::Imf])
            .build()
    }
}

impl SourceRegistry {
    pub fn builder() -> SourceRegistryBuilder {
        SourceRegistryBuilder {
            chains: HashMap::new(),
            fallback_enabled: true,
        }
    }

    /// Providers to try for `class`, in order. Empty when none are configured.
    pub fn providers_for(&self, class: EntityClass) -> &[ProviderId] {
        self.chains.get(&class).map_or(&[], Vec::as_slice)
    }

    pub const fn fallback_enabled(&self) -> bool {
        self.fallback_enabled
    }

    /// The prefix of the chain that will actually be tried.
    pub fn attempt_order(&self, class: EntityClass) -> &[ProviderId] {
        let chain = self.providers_for(class);
        if self.fallback_enabled {
            chain
        } else {
            &chain[..chain.len().min(1)]
        }
    }
}

pub struct SourceRegistryBuilder {
    chains: HashMap<EntityClass, Vec<ProviderId>>,
    fallback_enabled: bool,
}

impl SourceRegistryBuilder {
    /// Set the chain for `class`; repeated ids keep their first position.
    pub fn chain(mut self, class: EntityClass, providers: impl IntoIterator<Item = ProviderId>) -> Self {
        let mut ordered = Vec::new();
        for provider in providers {
            if !ordered.contains(&provider) {
                ordered.push(provider);
            }
        }
        self.chains.insert(class, ordered);
        self
    }

    pub fn fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn build(self) -> SourceRegistry {
        SourceRegistry {
            chains: self.chains,
            fallback_enabled: self.fallback_enabled,
        }
    }
}
