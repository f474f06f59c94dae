//! LunaPay: form-encoded gateway, MD5 upper-case signature. Wire amounts
//! are two-decimal-place major-unit strings ("1000.00"); the adapter
//! converts from and to minor units at the boundary. Deposit only.

use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::GatewayHttpClient;
use crate::providers::signing::{md5_hex_upper, signature_eq, sorted_query};
use crate::providers::types::{
    decimal_string_to_minor, minor_to_decimal_string, CallbackRequest, PayInitiation,
    PayNotification, PayRequest, PayTarget, PayoutInitiation, PayoutNotification, PayoutRequest,
    ProviderId, SettleState,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

const PROVIDER: &str = "lunapay";

#[derive(Debug, Clone)]
pub struct LunaPayConfig {
    pub merchant_no: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl LunaPayConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let merchant_no =
            std::env::var("LUNAPAY_MERCHANT_NO").map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: "LUNAPAY_MERCHANT_NO is required".to_string(),
            })?;
        let secret_key = std::env::var("LUNAPAY_SECRET_KEY").map_err(|_| ProviderError::Config {
            provider: PROVIDER.to_string(),
            message: "LUNAPAY_SECRET_KEY is required".to_string(),
        })?;

        Ok(Self {
            merchant_no,
            secret_key,
            base_url: std::env::var("LUNAPAY_BASE_URL")
                .unwrap_or_else(|_| "https://pay.lunapay.example".to_string()),
            timeout_secs: std::env::var("LUNAPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(8),
        })
    }
}

pub struct LunaPayGateway {
    config: LunaPayConfig,
    http: GatewayHttpClient,
}

impl LunaPayGateway {
    pub fn new(config: LunaPayConfig) -> ProviderResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(LunaPayConfig::from_env()?)
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let query = sorted_query(params, &["sign"]);
        md5_hex_upper(&format!("{}{}", query, self.config.secret_key))
    }
}

#[derive(Debug, Deserialize)]
struct LunaPayReply {
    result: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payform: Option<String>,
    #[serde(default)]
    tradeno: Option<String>,
}

#[async_trait]
impl ProviderAdapter for LunaPayGateway {
    fn name(&self) -> ProviderId {
        ProviderId::LunaPay
    }

    async fn pay(&self, request: &PayRequest) -> ProviderResult<PayInitiation> {
        let mut params = BTreeMap::new();
        params.insert("merno".to_string(), self.config.merchant_no.clone());
        params.insert("orderid".to_string(), request.order_id.clone());
        params.insert(
            "money".to_string(),
            minor_to_decimal_string(request.amount),
        );
        params.insert("paytype".to_string(), request.channel_code.clone());
        params.insert("notifyurl".to_string(), request.notify_url.clone());
        let sign = self.sign(&params);
        params.insert("sign".to_string(), sign);

        let body = self
            .http
            .post_form(&format!("{}/trade/create", self.config.base_url), &params)
            .await?;

        let reply: LunaPayReply =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid pay reply: {}", e),
            })?;

        if reply.result != "success" {
            return Err(ProviderError::Envelope {
                provider: PROVIDER.to_string(),
                code: Some(reply.result),
                message: reply.message.unwrap_or_default(),
            });
        }

        let payform = reply.payform.ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "pay reply missing payform".to_string(),
        })?;

        Ok(PayInitiation {
            target: PayTarget::FormHtml(payform),
            external_order_id: reply.tradeno,
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

        let received_sign = params.get("sign").cloned().unwrap_or_default();
        if !signature_eq(&self.sign(&params), &received_sign) {
            warn!(provider = PROVIDER, "callback signature mismatch");
            return Err(ProviderError::InvalidSignature {
                provider: PROVIDER.to_string(),
            });
        }

        let order_id = params
            .get("orderid")
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "callback missing orderid".to_string(),
            })?;

        let money = params.get("money").ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "callback missing money".to_string(),
        })?;
        let settled_amount = decimal_string_to_minor(PROVIDER, money)?;

        let state = match params.get("state").map(String::as_str) {
            Some("paid") => SettleState::Success,
            Some("waiting") => SettleState::Confirming,
            Some("closed") => SettleState::Cancelled,
            other => {
                return Err(ProviderError::Malformed {
                    provider: PROVIDER.to_string(),
                    message: format!("unknown state {:?}", other),
                })
            }
        };

        Ok(PayNotification {
            order_id,
            settled_amount,
            state,
            signature: received_sign,
            crypto_hash: None,
            ack: "OK".to_string(),
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

    fn gateway() -> LunaPayGateway {
        LunaPayGateway::new(LunaPayConfig {
            merchant_no: "L300".to_string(),
            secret_key: "luna_secret".to_string(),
            base_url: "https://pay.lunapay.example".to_string(),
            timeout_secs: 8,
        })
        .expect("gateway init")
    }

    #[test]
    fn decimal_wire_amount_converts_to_minor_units() {
        let gw = gateway();
        let mut params = BTreeMap::new();
        params.insert("merno".to_string(), "L300".to_string());
        params.insert("orderid".to_string(), "D555".to_string());
        params.insert("money".to_string(), "1000.00".to_string());
        params.insert("state".to_string(), "paid".to_string());
        let sign = gw.sign(&params);
        let request = CallbackRequest::form(&[
            ("merno", "L300"),
            ("orderid", "D555"),
            ("money", "1000.00"),
            ("state", "paid"),
            ("sign", &sign),
        ]);

        let notification = gw.pay_callback(&request).expect("callback should verify");
        assert_eq!(notification.settled_amount, 100_000);
        assert_eq!(notification.state, SettleState::Success);
        assert_eq!(notification.ack, "OK");
    }

    #[test]
    fn signature_without_separators_matches_convention() {
        // LunaPay concatenates the secret directly, no "&key=" separator.
        let gw = gateway();
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), "1".to_string());
        assert_eq!(gw.sign(&params), md5_hex_upper("a=1luna_secret"));
    }

    #[test]
    fn closed_state_maps_to_cancelled() {
        let gw = gateway();
        let mut params = BTreeMap::new();
        params.insert("merno".to_string(), "L300".to_string());
        params.insert("orderid".to_string(), "D556".to_string());
        params.insert("money".to_string(), "50.00".to_string());
        params.insert("state".to_string(), "closed".to_string());
        let sign = gw.sign(&params);
        let request = CallbackRequest::form(&[
            ("merno", "L300"),
            ("orderid", "D556"),
            ("money", "50.00"),
            ("state", "closed"),
            ("sign", &sign),
        ]);
        let notification = gw.pay_callback(&request).unwrap();
        assert_eq!(notification.state, SettleState::Cancelled);
    }
}
