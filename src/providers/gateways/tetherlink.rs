//! TetherLink: stablecoin deposit rail. `pay` requests a deposit address and
//! a quoted exchange rate; the callback carries the on-chain transaction
//! hash and the settled amount already converted to platform minor units at
//! the quoted rate. Off-chain transfers need a human amount-confirmation
//! step, so the adapter is flagged `requires_manual_review` and deposits
//! park in `Reviewing` instead of settling straight from the callback.

use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::GatewayHttpClient;
use crate::providers::signing::{sha256_hex, signature_eq, sorted_query};
use crate::providers::types::{
    CallbackRequest, PayInitiation, PayNotification, PayRequest, PayTarget, PayoutInitiation,
    PayoutNotification, PayoutRequest, ProviderId, SettleState,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

const PROVIDER: &str = "tetherlink";
const ACK: &str = r#"{"ok":true}"#;

#[derive(Debug, Clone)]
pub struct TetherLinkConfig {
    pub merchant_code: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl TetherLinkConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let merchant_code =
            std::env::var("TETHERLINK_MERCHANT_CODE").map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: "TETHERLINK_MERCHANT_CODE is required".to_string(),
            })?;
        let secret_key =
            std::env::var("TETHERLINK_SECRET_KEY").map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: "TETHERLINK_SECRET_KEY is required".to_string(),
            })?;

        Ok(Self {
            merchant_code,
            secret_key,
            base_url: std::env::var("TETHERLINK_BASE_URL")
                .unwrap_or_else(|_| "https://api.tetherlink.example".to_string()),
            timeout_secs: std::env::var("TETHERLINK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(8),
        })
    }
}

pub struct TetherLinkGateway {
    config: TetherLinkConfig,
    http: GatewayHttpClient,
}

impl TetherLinkGateway {
    pub fn new(config: TetherLinkConfig) -> ProviderResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(TetherLinkConfig::from_env()?)
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let query = sorted_query(params, &["sign"]);
        sha256_hex(&format!("{}&key={}", query, self.config.secret_key))
    }
}

#[derive(Debug, Deserialize)]
struct TetherLinkReply {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    rate: Option<String>,
}

#[async_trait]
impl ProviderAdapter for TetherLinkGateway {
    fn name(&self) -> ProviderId {
        ProviderId::TetherLink
    }

    fn requires_manual_review(&self) -> bool {
        true
    }

    async fn pay(&self, request: &PayRequest) -> ProviderResult<PayInitiation> {
        let mut params = BTreeMap::new();
        params.insert("merchant".to_string(), self.config.merchant_code.clone());
        params.insert("order".to_string(), request.order_id.clone());
        params.insert("amount".to_string(), request.amount.to_string());
        params.insert("notify".to_string(), request.notify_url.clone());
        let sign = self.sign(&params);

        let payload = json!({
            "merchant": self.config.merchant_code,
            "order": request.order_id,
            "amount": request.amount,
            "notify": request.notify_url,
            "sign": sign,
        });

        let body = self
            .http
            .post_json(
                &format!("{}/v1/deposit/address", self.config.base_url),
                &payload,
            )
            .await?;

        let reply: TetherLinkReply =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid address reply: {}", e),
            })?;

        if reply.code != 0 {
            return Err(ProviderError::Envelope {
                provider: PROVIDER.to_string(),
                code: Some(reply.code.to_string()),
                message: reply.msg.unwrap_or_default(),
            });
        }

        let address = reply.address.ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "address reply missing address".to_string(),
        })?;
        let rate = reply.rate.ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "address reply missing rate".to_string(),
        })?;

        Ok(PayInitiation {
            target: PayTarget::CryptoAddress { address, rate },
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
        let value = request.json_body(PROVIDER)?;
        let object = value.as_object().ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "callback is not a JSON object".to_string(),
        })?;

        let mut params = BTreeMap::new();
        for (key, field) in object {
            let text = match field {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                other => other.to_string(),
            };
            params.insert(key.clone(), text);
        }

        let received_sign = params.get("sign").cloned().unwrap_or_default();
        if !signature_eq(&self.sign(&params), &received_sign) {
            warn!(provider = PROVIDER, "callback signature mismatch");
            return Err(ProviderError::InvalidSignature {
                provider: PROVIDER.to_string(),
            });
        }

        let order_id = params
            .get("order")
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "callback missing order".to_string(),
            })?;
        let settled_amount = params
            .get("amount")
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "callback missing or invalid amount".to_string(),
            })?;

        let state = match params.get("status").map(String::as_str) {
            Some("confirmed") => SettleState::Success,
            Some("pending") => SettleState::Confirming,
            Some("failed") => SettleState::Cancelled,
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
            signature: received_sign,
            crypto_hash: params.get("txhash").cloned().filter(|v| !v.is_empty()),
            ack: ACK.to_string(),
        })
    }

    fn withdraw_callback(&self, _request: &CallbackRequest) -> ProviderResult<PayoutNotification> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER.to_string(),
            operation: "withdraw_callback",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> TetherLinkGateway {
        TetherLinkGateway::new(TetherLinkConfig {
            merchant_code: "T500".to_string(),
            secret_key: "tether_secret".to_string(),
            base_url: "https://api.tetherlink.example".to_string(),
            timeout_secs: 8,
        })
        .expect("gateway init")
    }

    #[test]
    fn adapter_is_flagged_for_manual_review() {
        assert!(gateway().requires_manual_review());
    }

    #[test]
    fn confirmed_callback_carries_tx_hash_fields() {
        let gw = gateway();
        let mut params = BTreeMap::new();
        params.insert("merchant".to_string(), "T500".to_string());
        params.insert("order".to_string(), "D999".to_string());
        params.insert("txhash".to_string(), "0xabc123".to_string());
        params.insert("amount".to_string(), "715000".to_string());
        params.insert("status".to_string(), "confirmed".to_string());
        let sign = gw.sign(&params);

        let request = CallbackRequest::json(&json!({
            "merchant": "T500",
            "order": "D999",
            "txhash": "0xabc123",
            "amount": "715000",
            "status": "confirmed",
            "sign": sign,
        }));
        let notification = gw.pay_callback(&request).expect("callback should verify");
        assert_eq!(notification.order_id, "D999");
        assert_eq!(notification.settled_amount, 715_000);
        assert_eq!(notification.state, SettleState::Success);
        assert_eq!(notification.crypto_hash.as_deref(), Some("0xabc123"));
    }

    #[test]
    fn tampered_txhash_invalidates_signature() {
        let gw = gateway();
        let mut params = BTreeMap::new();
        params.insert("merchant".to_string(), "T500".to_string());
        params.insert("order".to_string(), "D999".to_string());
        params.insert("txhash".to_string(), "0xabc123".to_string());
        params.insert("amount".to_string(), "715000".to_string());
        params.insert("status".to_string(), "confirmed".to_string());
        let sign = gw.sign(&params);

        let request = CallbackRequest::json(&json!({
            "merchant": "T500",
            "order": "D999",
            "txhash": "0xEVIL",
            "amount": "715000",
            "status": "confirmed",
            "sign": sign,
        }));
        assert!(matches!(
            gw.pay_callback(&request),
            Err(ProviderError::InvalidSignature { .. })
        ));
    }
}
