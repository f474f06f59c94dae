//! OrientPay: form-encoded gateway, MD5 lowercase signature over the sorted
//! `key=value` concatenation with a `&key=` secret suffix. Wire amounts are
//! integer minor units, same as the canonical convention. Deposit only.

use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::GatewayHttpClient;
use crate::providers::signing::{md5_hex, signature_eq, sorted_query};
use crate::providers::types::{
    CallbackRequest, PayInitiation, PayNotification, PayRequest, PayTarget, PayoutInitiation,
    PayoutNotification, PayoutRequest, ProviderId, SettleState,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

const PROVIDER: &str = "orientpay";

#[derive(Debug, Clone)]
pub struct OrientPayConfig {
    pub merchant_id: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl OrientPayConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let merchant_id =
            std::env::var("ORIENTPAY_MERCHANT_ID").map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: "ORIENTPAY_MERCHANT_ID is required".to_string(),
            })?;
        let secret_key =
            std::env::var("ORIENTPAY_SECRET_KEY").map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: "ORIENTPAY_SECRET_KEY is required".to_string(),
            })?;

        Ok(Self {
            merchant_id,
            secret_key,
            base_url: std::env::var("ORIENTPAY_BASE_URL")
                .unwrap_or_else(|_| "https://gateway.orientpay.example".to_string()),
            timeout_secs: std::env::var("ORIENTPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(8),
        })
    }
}

pub struct OrientPayGateway {
    config: OrientPayConfig,
    http: GatewayHttpClient,
}

impl OrientPayGateway {
    pub fn new(config: OrientPayConfig) -> ProviderResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(OrientPayConfig::from_env()?)
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let query = sorted_query(params, &["sign"]);
        md5_hex(&format!("{}&key={}", query, self.config.secret_key))
    }
}

#[derive(Debug, Deserialize)]
struct OrientPayReply {
    code: String,
    msg: Option<String>,
    payurl: Option<String>,
    sysorderno: Option<String>,
}

#[async_trait]
impl ProviderAdapter for OrientPayGateway {
    fn name(&self) -> ProviderId {
        ProviderId::OrientPay
    }

    async fn pay(&self, request: &PayRequest) -> ProviderResult<PayInitiation> {
        let mut params = BTreeMap::new();
        params.insert("merchant".to_string(), self.config.merchant_id.clone());
        params.insert("orderno".to_string(), request.order_id.clone());
        params.insert("amount".to_string(), request.amount.to_string());
        params.insert("channel".to_string(), request.channel_code.clone());
        params.insert("notifyurl".to_string(), request.notify_url.clone());
        if let Some(bank) = &request.bank_hint {
            params.insert("bankcode".to_string(), bank.clone());
        }
        if let Some(url) = &request.return_url {
            params.insert("returnurl".to_string(), url.clone());
        }
        let sign = self.sign(&params);
        params.insert("sign".to_string(), sign);

        let body = self
            .http
            .post_form(&format!("{}/gateway/pay", self.config.base_url), &params)
            .await?;

        let reply: OrientPayReply =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid pay reply: {}", e),
            })?;

        if reply.code != "0000" {
            return Err(ProviderError::Envelope {
                provider: PROVIDER.to_string(),
                code: Some(reply.code),
                message: reply.msg.unwrap_or_default(),
            });
        }

        let payurl = reply.payurl.ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "pay reply missing payurl".to_string(),
        })?;

        Ok(PayInitiation {
            target: PayTarget::RedirectUrl(payurl),
            external_order_id: reply.sysorderno,
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
        let expected = self.sign(&params);
        if !signature_eq(&expected, &received_sign) {
            warn!(provider = PROVIDER, "callback signature mismatch");
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
                message: "callback missing orderno".to_string(),
            })?;

        let settled_amount = params
            .get("amount")
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "callback missing or invalid amount".to_string(),
            })?;

        let state = match params.get("status").map(String::as_str) {
            Some("1") => SettleState::Success,
            Some("0") => SettleState::Confirming,
            Some("2") => SettleState::Cancelled,
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
            crypto_hash: None,
            ack: "success".to_string(),
        })
    }

    fn withdraw_callback(&self, _request: &CallbackRequest) -> ProviderResult<PayoutNotification> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER.to_string(),
            operation: "withdraw_callback",
        })
    }
}
