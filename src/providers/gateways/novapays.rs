//! NovaPays: form-encoded gateway with a double-MD5 signature
//! (`md5(md5(query) + key)`). Wire amounts are in thousandths of a major
//! unit, i.e. ten wire units per minor unit; the adapter converts both
//! directions and rejects callbacks with sub-minor-unit precision.
//! Supports payouts and payout callbacks.

use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::GatewayHttpClient;
use crate::providers::signing::{double_md5, signature_eq, sorted_query};
use crate::providers::types::{
    CallbackRequest, PayInitiation, PayNotification, PayRequest, PayTarget, PayoutInitiation,
    PayoutNotification, PayoutRequest, PayoutState, ProviderId, SettleState,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

const PROVIDER: &str = "novapays";

/// 1 major unit = 100 minor units = 1000 NovaPays wire units.
const WIRE_PER_MINOR: i64 = 10;

#[derive(Debug, Clone)]
pub struct NovaPaysConfig {
    pub uid: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl NovaPaysConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let uid = std::env::var("NOVAPAYS_UID").map_err(|_| ProviderError::Config {
            provider: PROVIDER.to_string(),
            message: "NOVAPAYS_UID is required".to_string(),
        })?;
        let secret_key = std::env::var("NOVAPAYS_SECRET_KEY").map_err(|_| ProviderError::Config {
            provider: PROVIDER.to_string(),
            message: "NOVAPAYS_SECRET_KEY is required".to_string(),
        })?;

        Ok(Self {
            uid,
            secret_key,
            base_url: std::env::var("NOVAPAYS_BASE_URL")
                .unwrap_or_else(|_| "https://open.novapays.example".to_string()),
            timeout_secs: std::env::var("NOVAPAYS_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(8),
        })
    }
}

pub struct NovaPaysGateway {
    config: NovaPaysConfig,
    http: GatewayHttpClient,
}

impl NovaPaysGateway {
    pub fn new(config: NovaPaysConfig) -> ProviderResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(NovaPaysConfig::from_env()?)
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let query = sorted_query(params, &["sign"]);
        double_md5(&query, &self.config.secret_key)
    }

    fn wire_to_minor(value: &str) -> ProviderResult<i64> {
        let wire = value
            .parse::<i64>()
            .map_err(|_| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid wire amount: {}", value),
            })?;
        if wire % WIRE_PER_MINOR != 0 {
            return Err(ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("wire amount {} has sub-minor-unit precision", wire),
            });
        }
        Ok(wire / WIRE_PER_MINOR)
    }
}

#[derive(Debug, Deserialize)]
struct NovaPaysReply {
    errcode: i64,
    #[serde(default)]
    errmsg: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    txid: Option<String>,
}

#[async_trait]
impl ProviderAdapter for NovaPaysGateway {
    fn name(&self) -> ProviderId {
        ProviderId::NovaPays
    }

    async fn pay(&self, request: &PayRequest) -> ProviderResult<PayInitiation> {
        let mut params = BTreeMap::new();
        params.insert("uid".to_string(), self.config.uid.clone());
        params.insert("order".to_string(), request.order_id.clone());
        params.insert(
            "value".to_string(),
            (request.amount * WIRE_PER_MINOR).to_string(),
        );
        params.insert("type".to_string(), request.channel_code.clone());
        params.insert("notify".to_string(), request.notify_url.clone());
        let sign = self.sign(&params);
        params.insert("sign".to_string(), sign);

        let body = self
            .http
            .post_form(&format!("{}/api/pay", self.config.base_url), &params)
            .await?;

        let reply: NovaPaysReply =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid pay reply: {}", e),
            })?;

        if reply.errcode != 0 {
            return Err(ProviderError::Envelope {
                provider: PROVIDER.to_string(),
                code: Some(reply.errcode.to_string()),
                message: reply.errmsg.unwrap_or_default(),
            });
        }

        let url = reply.url.ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "pay reply missing url".to_string(),
        })?;

        Ok(PayInitiation {
            target: PayTarget::RedirectUrl(url),
            external_order_id: reply.txid,
        })
    }

    async fn withdraw(&self, request: &PayoutRequest) -> ProviderResult<PayoutInitiation> {
        let mut params = BTreeMap::new();
        params.insert("uid".to_string(), self.config.uid.clone());
        params.insert("order".to_string(), request.order_id.clone());
        params.insert(
            "value".to_string(),
            (request.amount * WIRE_PER_MINOR).to_string(),
        );
        params.insert("name".to_string(), request.account_name.clone());
        params.insert("cardno".to_string(), request.account_number.clone());
        params.insert("bank".to_string(), request.bank_name.clone());
        params.insert("notify".to_string(), request.notify_url.clone());
        let sign = self.sign(&params);
        params.insert("sign".to_string(), sign);

        let body = self
            .http
            .post_form(&format!("{}/api/remit", self.config.base_url), &params)
            .await?;

        let reply: NovaPaysReply =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid remit reply: {}", e),
            })?;

        if reply.errcode != 0 {
            return Err(ProviderError::Envelope {
                provider: PROVIDER.to_string(),
                code: Some(reply.errcode.to_string()),
                message: reply.errmsg.unwrap_or_default(),
            });
        }

        Ok(PayoutInitiation {
            external_order_id: reply.txid,
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
            .get("order")
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "callback missing order".to_string(),
            })?;

        let value = params.get("value").ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "callback missing value".to_string(),
        })?;
        let settled_amount = Self::wire_to_minor(value)?;

        let state = match params.get("result").map(String::as_str) {
            Some("success") => SettleState::Success,
            Some("pending") => SettleState::Confirming,
            Some("fail") => SettleState::Cancelled,
            other => {
                return Err(ProviderError::Malformed {
                    provider: PROVIDER.to_string(),
                    message: format!("unknown result {:?}", other),
                })
            }
        };

        Ok(PayNotification {
            order_id,
            settled_amount,
            state,
            signature: received_sign,
            crypto_hash: None,
            ack: "ok".to_string(),
        })
    }

    fn withdraw_callback(&self, request: &CallbackRequest) -> ProviderResult<PayoutNotification> {
        let params = request.form_params(PROVIDER)?;

        let received_sign = params.get("sign").cloned().unwrap_or_default();
        if !signature_eq(&self.sign(&params), &received_sign) {
            warn!(provider = PROVIDER, "payout callback signature mismatch");
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
                message: "payout callback missing order".to_string(),
            })?;

        let state = match params.get("result").map(String::as_str) {
            Some("success") => PayoutState::Success,
            Some("dealing") => PayoutState::Dealing,
            Some("fail") => PayoutState::AutoPayFailed,
            other => {
                return Err(ProviderError::Malformed {
                    provider: PROVIDER.to_string(),
                    message: format!("unknown result {:?}", other),
                })
            }
        };

        Ok(PayoutNotification {
            order_id,
            state,
            signature: received_sign,
            ack: "ok".to_string(),
        })
    }
}
