use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::gateways::{
    BankWireGateway, LunaPayGateway, NovaPaysGateway, OrientPayGateway, SwiftPaceGateway,
    TetherLinkGateway,
};
use crate::providers::types::ProviderId;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Static routing table from provider id to adapter instance. Built once at
/// startup and shared; the engine resolves through it on every pay/payout.
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.providers.insert(adapter.name(), adapter);
    }

    pub fn get(&self, id: ProviderId) -> ProviderResult<Arc<dyn ProviderAdapter>> {
        self.providers
            .get(&id)
            .cloned()
            .ok_or_else(|| ProviderError::Config {
                provider: id.to_string(),
                message: "provider not enabled".to_string(),
            })
    }

    pub fn list(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }

    /// Build the registry from `ENABLED_PROVIDERS` (comma-separated) and the
    /// per-provider credential environment.
    pub fn from_env() -> ProviderResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PROVIDERS")
            .unwrap_or_else(|_| "orientpay,swiftpace,lunapay,novapays,bankwire,tetherlink".to_string());

        let mut registry = Self::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let id = ProviderId::from_str(value)?;
            let adapter: Arc<dyn ProviderAdapter> = match id {
                ProviderId::OrientPay => Arc::new(OrientPayGateway::from_env()?),
                ProviderId::SwiftPace => Arc::new(SwiftPaceGateway::from_env()?),
                ProviderId::LunaPay => Arc::new(LunaPayGateway::from_env()?),
                ProviderId::NovaPays => Arc::new(NovaPaysGateway::from_env()?),
                ProviderId::BankWire => Arc::new(BankWireGateway::from_env()?),
                ProviderId::TetherLink => Arc::new(TetherLinkGateway::from_env()?),
            };
            registry.register(adapter);
        }

        Ok(registry)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::gateways::BankWireConfig;

    #[test]
    fn registry_resolves_registered_providers_only() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(BankWireGateway::new(BankWireConfig {
            bank_name: "b".to_string(),
            account_name: "a".to_string(),
            account_number: "n".to_string(),
            internal_secret: "s".to_string(),
        })));

        assert!(registry.get(ProviderId::BankWire).is_ok());
        assert!(matches!(
            registry.get(ProviderId::OrientPay),
            Err(ProviderError::Config { .. })
        ));
        assert_eq!(registry.list(), vec![ProviderId::BankWire]);
    }
}
