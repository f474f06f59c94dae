use crate::providers::error::{ProviderError, ProviderResult};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// HTTP client for outbound provider calls.
///
/// Every call has a bounded timeout and is logged with full request and
/// response bodies; a failed call is surfaced, never retried in-request.
#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    provider: String,
    timeout: Duration,
}

impl GatewayHttpClient {
    pub fn new(provider: &str, timeout: Duration) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network {
                provider: provider.to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider: provider.to_string(),
            timeout,
        })
    }

    pub async fn post_form(
        &self,
        url: &str,
        params: &BTreeMap<String, String>,
    ) -> ProviderResult<String> {
        info!(
            provider = %self.provider,
            url,
            request = %form_preview(params),
            "provider request"
        );

        let response = self
            .client
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.read_body(response).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> ProviderResult<String> {
        info!(
            provider = %self.provider,
            url,
            request = %payload,
            "provider request"
        );

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.read_body(response).await
    }

    async fn read_body(&self, response: reqwest::Response) -> ProviderResult<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network {
                provider: self.provider.clone(),
                message: format!("failed to read provider response: {}", e),
            })?;

        info!(
            provider = %self.provider,
            status = status.as_u16(),
            response = %body,
            "provider response"
        );

        if !status.is_success() {
            return Err(ProviderError::Envelope {
                provider: self.provider.clone(),
                code: Some(status.as_u16().to_string()),
                message: body,
            });
        }

        Ok(body)
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: self.provider.clone(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            ProviderError::Network {
                provider: self.provider.clone(),
                message: err.to_string(),
            }
        }
    }
}

fn form_preview(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_preview_is_sorted() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());
        assert_eq!(form_preview(&params), "a=1&b=2");
    }
}
