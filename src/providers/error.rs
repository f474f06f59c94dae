use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by provider adapters. None of these are retried
/// automatically within the same request; the caller is told to try
/// another channel.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider {provider} network error: {message}")]
    Network { provider: String, message: String },

    #[error("Provider {provider} timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("Provider {provider} rejected the request: {message}")]
    Envelope {
        provider: String,
        code: Option<String>,
        message: String,
    },

    #[error("Provider {provider} callback signature mismatch")]
    InvalidSignature { provider: String },

    #[error("Provider {provider} sent a malformed payload: {message}")]
    Malformed { provider: String, message: String },

    #[error("Provider {provider} does not support {operation}")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },

    #[error("Provider {provider} misconfigured: {message}")]
    Config { provider: String, message: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Network { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Envelope { provider, .. }
            | ProviderError::InvalidSignature { provider }
            | ProviderError::Malformed { provider, .. }
            | ProviderError::Unsupported { provider, .. }
            | ProviderError::Config { provider, .. } => provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_is_reachable_from_every_variant() {
        let err = ProviderError::Timeout {
            provider: "swiftpace".to_string(),
            timeout_secs: 8,
        };
        assert_eq!(err.provider(), "swiftpace");
    }
}
