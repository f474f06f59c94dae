use crate::providers::error::ProviderError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// The providers this deployment can route money through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    OrientPay,
    SwiftPace,
    LunaPay,
    NovaPays,
    BankWire,
    TetherLink,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OrientPay => "orientpay",
            ProviderId::SwiftPace => "swiftpace",
            ProviderId::LunaPay => "lunapay",
            ProviderId::NovaPays => "novapays",
            ProviderId::BankWire => "bankwire",
            ProviderId::TetherLink => "tetherlink",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "orientpay" => Ok(ProviderId::OrientPay),
            "swiftpace" => Ok(ProviderId::SwiftPace),
            "lunapay" => Ok(ProviderId::LunaPay),
            "novapays" => Ok(ProviderId::NovaPays),
            "bankwire" => Ok(ProviderId::BankWire),
            "tetherlink" => Ok(ProviderId::TetherLink),
            _ => Err(ProviderError::Config {
                provider: value.to_string(),
                message: "unsupported provider".to_string(),
            }),
        }
    }
}

/// Canonical deposit request handed to an adapter. `amount` is always in
/// minor units; each adapter owns the conversion to its wire convention.
#[derive(Debug, Clone)]
pub struct PayRequest {
    pub order_id: String,
    pub channel_code: String,
    pub amount: i64,
    pub user_id: String,
    pub bank_hint: Option<String>,
    pub notify_url: String,
    pub return_url: Option<String>,
}

/// What the user must be shown or sent to in order to complete payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayTarget {
    /// Redirect-style provider: send the user to this URL.
    RedirectUrl(String),
    /// Provider returned a self-submitting HTML form.
    FormHtml(String),
    /// Manual/offline flow: show transfer instructions, the memo must be
    /// quoted by the payer so the transfer can be matched.
    BankTransfer {
        bank_name: String,
        account_name: String,
        account_number: String,
        memo: String,
    },
    /// Stablecoin flow: pay to this address at the quoted rate.
    CryptoAddress { address: String, rate: String },
}

#[derive(Debug, Clone)]
pub struct PayInitiation {
    pub target: PayTarget,
    pub external_order_id: Option<String>,
}

/// Canonical payout request for auto-pay withdrawals.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub order_id: String,
    pub amount: i64,
    pub account_name: String,
    pub account_number: String,
    pub bank_name: String,
    pub notify_url: String,
}

#[derive(Debug, Clone)]
pub struct PayoutInitiation {
    pub external_order_id: Option<String>,
}

/// Canonical deposit settlement state reported by a provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleState {
    Confirming,
    Success,
    Cancelled,
}

/// Canonical payout state reported by a provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutState {
    Dealing,
    Success,
    AutoPayFailed,
}

/// Raw inbound callback as received from the wire, before any trust is
/// placed in it.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl CallbackRequest {
    pub fn form(fields: &[(&str, &str)]) -> Self {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
            .collect::<Vec<_>>()
            .join("&");
        Self {
            content_type: "application/x-www-form-urlencoded".to_string(),
            body: body.into_bytes(),
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            content_type: "application/json".to_string(),
            body: value.to_string().into_bytes(),
        }
    }

    /// Decode the body as form parameters, sorted by key.
    pub fn form_params(&self, provider: &str) -> Result<BTreeMap<String, String>, ProviderError> {
        let text = std::str::from_utf8(&self.body).map_err(|_| ProviderError::Malformed {
            provider: provider.to_string(),
            message: "callback body is not valid UTF-8".to_string(),
        })?;

        let mut params = BTreeMap::new();
        for pair in text.split('&').filter(|p| !p.is_empty()) {
            let mut it = pair.splitn(2, '=');
            let key = it.next().unwrap_or_default();
            let value = it.next().unwrap_or_default();
            params.insert(urldecode(key), urldecode(value));
        }
        Ok(params)
    }

    /// Decode the body as JSON.
    pub fn json_body(&self, provider: &str) -> Result<serde_json::Value, ProviderError> {
        serde_json::from_slice(&self.body).map_err(|e| ProviderError::Malformed {
            provider: provider.to_string(),
            message: format!("invalid JSON callback: {}", e),
        })
    }
}

/// Verified deposit notification in canonical form. `settled_amount` is in
/// minor units regardless of the provider's wire convention, and `ack` is
/// the exact body the provider expects back on acceptance.
#[derive(Debug, Clone)]
pub struct PayNotification {
    pub order_id: String,
    pub settled_amount: i64,
    pub state: SettleState,
    pub signature: String,
    /// On-chain transaction hash, for crypto rails only.
    pub crypto_hash: Option<String>,
    pub ack: String,
}

/// Verified payout notification in canonical form.
#[derive(Debug, Clone)]
pub struct PayoutNotification {
    pub order_id: String,
    pub state: PayoutState,
    pub signature: String,
    pub ack: String,
}

/// Format minor units as a two-decimal-place major-unit string, for
/// providers whose wire format takes decimal amounts.
pub fn minor_to_decimal_string(minor: i64) -> String {
    let value = Decimal::new(minor, 2);
    format!("{:.2}", value)
}

/// Parse a two-decimal-place major-unit string back to minor units.
pub fn decimal_string_to_minor(provider: &str, text: &str) -> Result<i64, ProviderError> {
    let value = Decimal::from_str(text.trim()).map_err(|_| ProviderError::Malformed {
        provider: provider.to_string(),
        message: format!("invalid decimal amount: {}", text),
    })?;
    let scaled = value * Decimal::new(100, 0);
    if scaled.fract() != Decimal::ZERO {
        return Err(ProviderError::Malformed {
            provider: provider.to_string(),
            message: format!("amount {} has sub-minor-unit precision", text),
        });
    }
    scaled.to_i64().ok_or_else(|| ProviderError::Malformed {
        provider: provider.to_string(),
        message: format!("amount {} out of range", text),
    })
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn urldecode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_round_trips() {
        for id in [
            ProviderId::OrientPay,
            ProviderId::SwiftPace,
            ProviderId::LunaPay,
            ProviderId::NovaPays,
            ProviderId::BankWire,
            ProviderId::TetherLink,
        ] {
            assert_eq!(ProviderId::from_str(id.as_str()).unwrap(), id);
        }
        assert!(ProviderId::from_str("unknown").is_err());
    }

    #[test]
    fn form_params_round_trip() {
        let request = CallbackRequest::form(&[
            ("orderid", "D20260824x1"),
            ("amount", "100.00"),
            ("memo", "a b&c"),
        ]);
        let params = request.form_params("test").unwrap();
        assert_eq!(params["orderid"], "D20260824x1");
        assert_eq!(params["amount"], "100.00");
        assert_eq!(params["memo"], "a b&c");
    }

    #[test]
    fn decimal_string_conversion() {
        assert_eq!(minor_to_decimal_string(100_000), "1000.00");
        assert_eq!(minor_to_decimal_string(5), "0.05");
        assert_eq!(decimal_string_to_minor("t", "1000.00").unwrap(), 100_000);
        assert_eq!(decimal_string_to_minor("t", "0.05").unwrap(), 5);
        assert!(decimal_string_to_minor("t", "0.005").is_err());
        assert!(decimal_string_to_minor("t", "abc").is_err());
    }
}
