//! BankWire: the manual/offline bank-transfer flow. There is no outbound
//! wire call; `pay` hands back the receiving account plus a memo the payer
//! must quote so operations can match the transfer. The "callback" is the
//! internal confirmation posted by the back-office tooling, signed with
//! HMAC-SHA256 over the sorted fields using the internal shared secret.

use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::signing::{hmac_sha256_hex, signature_eq, sorted_query};
use crate::providers::types::{
    CallbackRequest, PayInitiation, PayNotification, PayRequest, PayTarget, PayoutInitiation,
    PayoutNotification, PayoutRequest, ProviderId, SettleState,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{info, warn};

const PROVIDER: &str = "bankwire";

#[derive(Debug, Clone)]
pub struct BankWireConfig {
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    /// Shared secret between this service and the back-office confirmation
    /// tooling. Not a third-party credential.
    pub internal_secret: String,
}

impl BankWireConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: format!("{} is required", name),
            })
        };

        Ok(Self {
            bank_name: require("BANKWIRE_BANK_NAME")?,
            account_name: require("BANKWIRE_ACCOUNT_NAME")?,
            account_number: require("BANKWIRE_ACCOUNT_NUMBER")?,
            internal_secret: require("BANKWIRE_INTERNAL_SECRET")?,
        })
    }
}

pub struct BankWireGateway {
    config: BankWireConfig,
}

impl BankWireGateway {
    pub fn new(config: BankWireConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> ProviderResult<Self> {
        Ok(Self::new(BankWireConfig::from_env()?))
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let query = sorted_query(params, &["sig"]);
        hmac_sha256_hex(query.as_bytes(), &self.config.internal_secret)
    }

    /// The memo the payer must quote: short enough for a bank transfer
    /// reference field, unique enough to match the order.
    fn memo_for(order_id: &str) -> String {
        let tail: String = order_id
            .chars()
            .rev()
            .take(8)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("PD-{}", tail.to_uppercase())
    }
}

#[async_trait]
impl ProviderAdapter for BankWireGateway {
    fn name(&self) -> ProviderId {
        ProviderId::BankWire
    }

    async fn pay(&self, request: &PayRequest) -> ProviderResult<PayInitiation> {
        let memo = Self::memo_for(&request.order_id);
        info!(
            provider = PROVIDER,
            order_id = %request.order_id,
            amount = request.amount,
            memo = %memo,
            "issued manual transfer instructions"
        );

        Ok(PayInitiation {
            target: PayTarget::BankTransfer {
                bank_name: self.config.bank_name.clone(),
                account_name: self.config.account_name.clone(),
                account_number: self.config.account_number.clone(),
                memo,
            },
            external_order_id: None,
        })
    }

    async fn withdraw(&self, _request: &PayoutRequest) -> ProviderResult<PayoutInitiation> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER.to_string(),
            operation: "withdraw",
        })
    }

    fn pay_callback(&self, request: &CallbackRequest) -> ProviderResult<PayNotification> {
        let params = request.form_params(PROVIDER)?;

        let received_sig = params.get("sig").cloned().unwrap_or_default();
        if !signature_eq(&self.sign(&params), &received_sig) {
            warn!(provider = PROVIDER, "confirmation signature mismatch");
            return Err(ProviderError::InvalidSignature {
                provider: PROVIDER.to_string(),
            });
        }

        let order_id = params
            .get("orderno")
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "confirmation missing orderno".to_string(),
            })?;

        let settled_amount = params
            .get("amount")
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "confirmation missing or invalid amount".to_string(),
            })?;

        let state = match params.get("status").map(String::as_str) {
            Some("confirmed") => SettleState::Success,
            Some("rejected") => SettleState::Cancelled,
            other => {
                return Err(ProviderError::Malformed {
                    provider: PROVIDER.to_string(),
                    message: format!("unknown status {:?}", other),
                })
            }
        };

        Ok(PayNotification {
            order_id,
            settled_amount,
            state,
            signature: received_sig,
            crypto_hash: None,
            ack: "accepted".to_string(),
        })
    }

    fn withdraw_callback(&self, _request: &CallbackRequest) -> ProviderResult<PayoutNotification> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER.to_string(),
            operation: "withdraw_callback",
        })
    }
}
