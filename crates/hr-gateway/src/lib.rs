//! AI request gateway over an OpenAI-compatible completion provider.

mod extract;
mod gateway;
mod governance;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod provider;
mod settings;

pub use extract::extract_json_object;
pub use gateway::{
    AiDomain, AiGateway, Analysis, AuditContext, CallOptions, Completion, GatewayError, RetryPolicy,
};
pub use governance::{bias_score, GovernanceHook, DEFAULT_REVIEW_THRESHOLD};
pub use hr_types::ChatMessage;
pub use provider::{
    CompletionProvider, CompletionRequest, OpenAiCompatibleProvider, ProviderError,
    DEFAULT_API_URL, REQUEST_TIMEOUT,
};
pub use settings::{AiSettings, EnvSettings, SettingsSource, SharedSettings};

#[cfg(any(test, feature = "test-util"))]
pub use mock::ScriptedProvider;
