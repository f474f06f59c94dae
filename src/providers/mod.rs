//! Payment-provider adapter layer: the uniform contract each third-party
//! gateway implements, the canonical request/callback vocabulary, signing
//! helpers, and the registry the engine resolves adapters through.

pub mod adapter;
pub mod error;
pub mod gateways;
pub mod http;
pub mod registry;
pub mod signing;
pub mod types;

pub use adapter::ProviderAdapter;
pub use error::{ProviderError, ProviderResult};
pub use registry::ProviderRegistry;
pub use types::{
    CallbackRequest, PayInitiation, PayNotification, PayRequest, PayTarget, PayoutInitiation,
    PayoutNotification, PayoutRequest, PayoutState, ProviderId, SettleState,
};
