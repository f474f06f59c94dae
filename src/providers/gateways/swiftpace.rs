//! SwiftPace: JSON gateway, SHA-256 upper-case signature over the sorted
//! `key=value` concatenation with a `&secret=` suffix. Wire amounts are
//! integer minor units. Supports payouts and payout callbacks.

use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{ProviderError, ProviderResult};
use crate::providers::http::GatewayHttpClient;
use crate::providers::signing::{sha256_hex_upper, signature_eq, sorted_query};
use crate::providers::types::{
    CallbackRequest, PayInitiation, PayNotification, PayRequest, PayTarget, PayoutInitiation,
    PayoutNotification, PayoutRequest, PayoutState, ProviderId, SettleState,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

const PROVIDER: &str = "swiftpace";
const ACK: &str = r#"{"code":0}"#;

#[derive(Debug, Clone)]
pub struct SwiftPaceConfig {
    pub merchant_id: String,
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl SwiftPaceConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let merchant_id =
            std::env::var("SWIFTPACE_MERCHANT_ID").map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: "SWIFTPACE_MERCHANT_ID is required".to_string(),
            })?;
        let secret_key =
            std::env::var("SWIFTPACE_SECRET_KEY").map_err(|_| ProviderError::Config {
                provider: PROVIDER.to_string(),
                message: "SWIFTPACE_SECRET_KEY is required".to_string(),
            })?;

        Ok(Self {
            merchant_id,
            secret_key,
            base_url: std::env::var("SWIFTPACE_BASE_URL")
                .unwrap_or_else(|_| "https://api.swiftpace.example".to_string()),
            timeout_secs: std::env::var("SWIFTPACE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(8),
        })
    }
}

pub struct SwiftPaceGateway {
    config: SwiftPaceConfig,
    http: GatewayHttpClient,
}

impl SwiftPaceGateway {
    pub fn new(config: SwiftPaceConfig) -> ProviderResult<Self> {
        let http = GatewayHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(SwiftPaceConfig::from_env()?)
    }

    fn sign(&self, params: &BTreeMap<String, String>) -> String {
        let query = sorted_query(params, &["sign"]);
        sha256_hex_upper(&format!("{}&secret={}", query, self.config.secret_key))
    }

    /// Flatten the top level of a JSON object to string fields, the form the
    /// signature is computed over.
    fn flatten(provider: &str, value: &JsonValue) -> ProviderResult<BTreeMap<String, String>> {
        let object = value.as_object().ok_or_else(|| ProviderError::Malformed {
            provider: provider.to_string(),
            message: "callback is not a JSON object".to_string(),
        })?;

        let mut params = BTreeMap::new();
        for (key, field) in object {
            let text = match field {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                JsonValue::Null => String::new(),
                other => other.to_string(),
            };
            params.insert(key.clone(), text);
        }
        Ok(params)
    }
}

#[derive(Debug, Deserialize)]
struct SwiftPaceReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<SwiftPaceReplyData>,
}

#[derive(Debug, Deserialize)]
struct SwiftPaceReplyData {
    #[serde(default)]
    pay_url: Option<String>,
    #[serde(default)]
    trade_no: Option<String>,
}

#[async_trait]
impl ProviderAdapter for SwiftPaceGateway {
    fn name(&self) -> ProviderId {
        ProviderId::SwiftPace
    }

    async fn pay(&self, request: &PayRequest) -> ProviderResult<PayInitiation> {
        let mut params = BTreeMap::new();
        params.insert("mch_id".to_string(), self.config.merchant_id.clone());
        params.insert("mch_order_no".to_string(), request.order_id.clone());
        params.insert("amount".to_string(), request.amount.to_string());
        params.insert("pay_type".to_string(), request.channel_code.clone());
        params.insert("notify_url".to_string(), request.notify_url.clone());
        let sign = self.sign(&params);

        let payload = json!({
            "mch_id": self.config.merchant_id,
            "mch_order_no": request.order_id,
            "amount": request.amount,
            "pay_type": request.channel_code,
            "notify_url": request.notify_url,
            "sign": sign,
        });

        let body = self
            .http
            .post_json(
                &format!("{}/api/v2/collect/create", self.config.base_url),
                &payload,
            )
            .await?;

        let reply: SwiftPaceReply =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid pay reply: {}", e),
            })?;

        if reply.status != "ok" {
            return Err(ProviderError::Envelope {
                provider: PROVIDER.to_string(),
                code: Some(reply.status),
                message: reply.message.unwrap_or_default(),
            });
        }

        let data = reply.data.ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "pay reply missing data".to_string(),
        })?;
        let pay_url = data.pay_url.ok_or_else(|| ProviderError::Malformed {
            provider: PROVIDER.to_string(),
            message: "pay reply missing pay_url".to_string(),
        })?;

        Ok(PayInitiation {
            target: PayTarget::RedirectUrl(pay_url),
            external_order_id: data.trade_no,
        })
    }

    async fn withdraw(&self, request: &PayoutRequest) -> ProviderResult<PayoutInitiation> {
        let mut params = BTreeMap::new();
        params.insert("mch_id".to_string(), self.config.merchant_id.clone());
        params.insert("mch_order_no".to_string(), request.order_id.clone());
        params.insert("amount".to_string(), request.amount.to_string());
        params.insert("acc_name".to_string(), request.account_name.clone());
        params.insert("acc_no".to_string(), request.account_number.clone());
        params.insert("bank_name".to_string(), request.bank_name.clone());
        params.insert("notify_url".to_string(), request.notify_url.clone());
        let sign = self.sign(&params);

        let payload = json!({
            "mch_id": self.config.merchant_id,
            "mch_order_no": request.order_id,
            "amount": request.amount,
            "acc_name": request.account_name,
            "acc_no": request.account_number,
            "bank_name": request.bank_name,
            "notify_url": request.notify_url,
            "sign": sign,
        });

        let body = self
            .http
            .post_json(
                &format!("{}/api/v2/payout/create", self.config.base_url),
                &payload,
            )
            .await?;

        let reply: SwiftPaceReply =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: format!("invalid payout reply: {}", e),
            })?;

        if reply.status != "ok" {
            return Err(ProviderError::Envelope {
                provider: PROVIDER.to_string(),
                code: Some(reply.status),
                message: reply.message.unwrap_or_default(),
            });
        }

        Ok(PayoutInitiation {
            external_order_id: reply.data.and_then(|d| d.trade_no),
        })
    }

    fn pay_callback(&self, request: &CallbackRequest) -> ProviderResult<PayNotification> {
        let value = request.json_body(PROVIDER)?;
        let params = Self::flatten(PROVIDER, &value)?;

        let received_sign = params.get("sign").cloned().unwrap_or_default();
        if !signature_eq(&self.sign(&params), &received_sign) {
            warn!(provider = PROVIDER, "callback signature mismatch");
            return Err(ProviderError::InvalidSignature {
                provider: PROVIDER.to_string(),
            });
        }

        let order_id = params
            .get("mch_order_no")
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "callback missing mch_order_no".to_string(),
            })?;
        let settled_amount = params
            .get("amount")
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "callback missing or invalid amount".to_string(),
            })?;

        let state = match params.get("trade_status").map(String::as_str) {
            Some("SUCCESS") => SettleState::Success,
            Some("PAYING") => SettleState::Confirming,
            Some("CLOSED") => SettleState::Cancelled,
            other => {
                return Err(ProviderError::Malformed {
                    provider: PROVIDER.to_string(),
                    message: format!("unknown trade_status {:?}", other),
                })
            }
        };

        Ok(PayNotification {
            order_id,
            settled_amount,
            state,
            signature: received_sign,
            crypto_hash: None,
            ack: ACK.to_string(),
        })
    }

    fn withdraw_callback(&self, request: &CallbackRequest) -> ProviderResult<PayoutNotification> {
        let value = request.json_body(PROVIDER)?;
        let params = Self::flatten(PROVIDER, &value)?;

        let received_sign = params.get("sign").cloned().unwrap_or_default();
        if !signature_eq(&self.sign(&params), &received_sign) {
            warn!(provider = PROVIDER, "payout callback signature mismatch");
            return Err(ProviderError::InvalidSignature {
                provider: PROVIDER.to_string(),
            });
        }

        let order_id = params
            .get("mch_order_no")
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: PROVIDER.to_string(),
                message: "payout callback missing mch_order_no".to_string(),
            })?;

        let state = match params.get("trade_status").map(String::as_str) {
            Some("SUCCESS") => PayoutState::Success,
            Some("DEALING") => PayoutState::Dealing,
            Some("FAILED") => PayoutState::AutoPayFailed,
            other => {
                return Err(ProviderError::Malformed {
                    provider: PROVIDER.to_string(),
                    message: format!("unknown trade_status {:?}", other),
                })
            }
        };

        Ok(PayoutNotification {
            order_id,
            state,
            signature: received_sign,
            ack: ACK.to_string(),
        })
    }
}
