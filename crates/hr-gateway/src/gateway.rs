//! Centralized AI caller: kill switch, credential check, bounded retries on the primary
//! model, one fallback attempt, structured-output extraction and governance logging.

use crate::extract::extract_json_object;
use crate::governance::GovernanceHook;
use crate::provider::{CompletionProvider, CompletionRequest, ProviderError};
use crate::settings::SettingsSource;
use hr_types::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Business domain a call belongs to; used for coordination and governance records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiDomain {
    Interview,
    Resume,
    Wellbeing,
    Audit,
    Documents,
    Payroll,
    Leave,
    #[default]
    General,
}

impl AiDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            AiDomain::Interview => "interview",
            AiDomain::Resume => "resume",
            AiDomain::Wellbeing => "wellbeing",
            AiDomain::Audit => "audit",
            AiDomain::Documents => "documents",
            AiDomain::Payroll => "payroll",
            AiDomain::Leave => "leave",
            AiDomain::General => "general",
        }
    }
}

impl std::fmt::Display for AiDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interview" => Ok(AiDomain::Interview),
            "resume" => Ok(AiDomain::Resume),
            "wellbeing" => Ok(AiDomain::Wellbeing),
            "audit" => Ok(AiDomain::Audit),
            "documents" => Ok(AiDomain::Documents),
            "payroll" => Ok(AiDomain::Payroll),
            "leave" => Ok(AiDomain::Leave),
            "general" => Ok(AiDomain::General),
            other => Err(format!("unknown AI domain: {}", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("AI service configuration error: {0}")]
    Configuration(String),
    #[error("AI services are currently offline for maintenance")]
    ServiceUnavailable,
    /// Provider cause; only ever returned boxed inside [`GatewayError::Aggregate`].
    #[error("transient AI provider failure: {0}")]
    Transient(#[source] ProviderError),
    /// Non-retryable provider cause (4xx); like `Transient`, only seen inside `Aggregate`.
    #[error("AI provider rejected the request: {0}")]
    Rejected(#[source] ProviderError),
    #[error("failed to parse AI response: {0}")]
    Parse(String),
    #[error("AI service completely unavailable (primary: {primary}, fallback: {fallback})")]
    Aggregate {
        primary: Box<GatewayError>,
        fallback: Box<GatewayError>,
    },
}

impl GatewayError {
    fn from_provider(e: ProviderError) -> Self {
        if e.is_transient() {
            GatewayError::Transient(e)
        } else {
            GatewayError::Rejected(e)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    /// Stable code for the HTTP surface.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::ServiceUnavailable => "AI_KILL_SWITCH_ACTIVE",
            GatewayError::Parse(_) => "AI_PARSE_ERROR",
            _ => "AI_SERVICE_UNAVAILABLE",
        }
    }
}

/// Backoff for transient failures on the primary model: doubling from `initial_backoff`,
/// capped at `max_backoff`, at most `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Supplying an audit context turns on governance logging for the call.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub temperature: f32,
    pub structured: bool,
    pub domain: AiDomain,
    pub organization_id: Option<i64>,
    pub audit: Option<AuditContext>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            structured: false,
            domain: AiDomain::General,
            organization_id: None,
            audit: None,
        }
    }
}

impl CallOptions {
    pub fn new(domain: AiDomain) -> Self {
        Self {
            domain,
            ..Self::default()
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn structured(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    pub fn organization(mut self, organization_id: i64) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn audit(mut self, ctx: AuditContext) -> Self {
        self.audit = Some(ctx);
        self
    }
}

/// Successful gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub used_fallback_model: bool,
}

/// Structured answer decoded by [`AiGateway::analyze_with_model`].
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub value: Value,
    pub model: String,
    pub used_fallback_model: bool,
}

/// Gateway every AI feature goes through.
#[derive(Clone)]
pub struct AiGateway {
    provider: Arc<dyn CompletionProvider>,
    settings: Arc<dyn SettingsSource>,
    retry: RetryPolicy,
    governance: Option<GovernanceHook>,
}

impl AiGateway {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: Arc<dyn SettingsSource>) -> Self {
        Self {
            provider,
            settings,
            retry: RetryPolicy::default(),
            governance: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_governance(mut self, hook: GovernanceHook) -> Self {
        self.governance = Some(hook);
        self
    }

    /// Call the primary model (with retries), then the fallback model once. Returns the
    /// response text, or the first JSON object in it when `opts.structured` is set.
    pub async fn call(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<String, GatewayError> {
        self.complete(messages, opts).await.map(|c| c.text)
    }

    /// Like [`AiGateway::call`], also reporting which model answered.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<Completion, GatewayError> {
        let request_id = opts
            .audit
            .as_ref()
            .and_then(|a| a.request_id.clone())
            .unwrap_or_default();
        let span = tracing::info_span!("ai_call", domain = %opts.domain, request_id = %request_id);
        self.call_inner(messages, opts).instrument(span).await
    }

    async fn call_inner(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<Completion, GatewayError> {
        tracing::info!("AI coordination request");
        let settings = self.settings.current();
        if settings.kill_switch {
            tracing::warn!("AI kill switch is active; blocking request");
            return Err(GatewayError::ServiceUnavailable);
        }
        let api_key = match settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(k) => k,
            None => {
                tracing::error!("AI provider credential missing");
                return Err(GatewayError::Configuration(
                    "provider credential is not configured".to_string(),
                ));
            }
        };

        let (model_used, text) = match self
            .complete_with_retry(api_key, &settings.model_name, messages, opts.temperature)
            .await
        {
            Ok(text) => (settings.model_name.as_str(), text),
            Err(primary) => {
                tracing::warn!(
                    model = %settings.model_name,
                    error = %primary,
                    "primary model failed; attempting fallback"
                );
                let request = CompletionRequest {
                    model: &settings.fallback_model,
                    messages,
                    temperature: opts.temperature,
                };
                match self.provider.complete(api_key, &request).await {
                    Ok(text) => (settings.fallback_model.as_str(), text),
                    Err(e) => {
                        let fallback = GatewayError::from_provider(e);
                        tracing::error!(
                            model = %settings.fallback_model,
                            error = %fallback,
                            "fallback model also failed"
                        );
                        return Err(GatewayError::Aggregate {
                            primary: Box::new(primary),
                            fallback: Box::new(fallback),
                        });
                    }
                }
            }
        };

        let text = if opts.structured {
            match extract_json_object(&text) {
                Some(json) => json.to_string(),
                None => {
                    tracing::error!(model = %model_used, "no JSON object in structured AI response");
                    return Err(GatewayError::Parse(
                        "response contained no JSON object".to_string(),
                    ));
                }
            }
        } else {
            text
        };

        if let (Some(ctx), Some(hook)) = (&opts.audit, &self.governance) {
            hook.record(
                opts.domain,
                opts.organization_id,
                ctx.request_id.as_deref(),
                model_used,
                messages,
                &text,
            )
            .await;
        }
        Ok(Completion {
            text,
            model: model_used.to_string(),
            used_fallback_model: model_used == settings.fallback_model
                && settings.fallback_model != settings.model_name,
        })
    }

    async fn complete_with_retry(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, GatewayError> {
        let request = CompletionRequest {
            model,
            messages,
            temperature,
        };
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            tracing::info!(model = %model, attempt, "calling AI model");
            match self.provider.complete(api_key, &request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        model = %model,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient AI failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(GatewayError::from_provider(e)),
            }
        }
    }

    /// System + user prompt in structured mode, parsed to JSON.
    pub async fn analyze(
        &self,
        system_prompt: &str,
        user_content: &str,
        opts: CallOptions,
    ) -> Result<Value, GatewayError> {
        self.analyze_with_model(system_prompt, user_content, opts)
            .await
            .map(|analysis| analysis.value)
    }

    /// [`AiGateway::analyze`] plus which model answered.
    pub async fn analyze_with_model(
        &self,
        system_prompt: &str,
        user_content: &str,
        opts: CallOptions,
    ) -> Result<Analysis, GatewayError> {
        let messages = [
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_content),
        ];
        let completion = self.complete(&messages, &opts.structured(true)).await?;
        let value = serde_json::from_str(&completion.text).map_err(|e| {
            tracing::error!(error = %e, "failed to decode AI JSON response");
            GatewayError::Parse(e.to_string())
        })?;
        Ok(Analysis {
            value,
            model: completion.model,
            used_fallback_model: completion.used_fallback_model,
        })
    }

    /// Domain-task entry point for multi-step features; currently one analysis call.
    pub async fn coordinate(
        &self,
        task: &str,
        context: &Value,
        opts: CallOptions,
    ) -> Result<Value, GatewayError> {
        tracing::info!(domain = %opts.domain, task = %task, "coordinating AI task");
        let system_prompt = format!("You are an AI coordinator for {}.", opts.domain);
        let user_content = format!("Task: {}\nContext: {}", task, context);
        self.analyze(&system_prompt, &user_content, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;
    use crate::settings::{AiSettings, EnvSettings, SettingsSource, SharedSettings};
    use hr_audit::InMemoryAuditStore;
    use hr_types::GovernanceStore;

    fn settings(kill: bool) -> Arc<SharedSettings> {
        Arc::new(SharedSettings::new(AiSettings {
            api_key: Some("sk-test".to_string()),
            model_name: "primary".to_string(),
            fallback_model: "fallback".to_string(),
            kill_switch: kill,
        }))
    }

    fn gateway(provider: Arc<ScriptedProvider>, settings: Arc<SharedSettings>) -> AiGateway {
        AiGateway::new(provider, settings).with_retry_policy(RetryPolicy::no_delay(3))
    }

    fn msgs() -> Vec<ChatMessage> {
        vec![ChatMessage::user("hello")]
    }

    #[tokio::test]
    async fn kill_switch_blocks_without_network() {
        let provider = Arc::new(ScriptedProvider::new().respond("primary", "never"));
        let gw = gateway(provider.clone(), settings(true));
        let err = gw.call(&msgs(), &CallOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceUnavailable));
        assert!(!err.is_retryable());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn kill_switch_flip_applies_to_next_call() {
        let provider = Arc::new(ScriptedProvider::new().respond("primary", "ok"));
        let s = settings(false);
        let gw = gateway(provider.clone(), s.clone());
        s.set_kill_switch(true);
        assert!(gw.call(&msgs(), &CallOptions::default()).await.is_err());
        s.set_kill_switch(false);
        assert_eq!(gw.call(&msgs(), &CallOptions::default()).await.unwrap(), "ok");
    }

    // Only test in the crate that touches these variables.
    #[tokio::test]
    async fn env_settings_are_reread_on_every_call() {
        std::env::set_var("OPENROUTER_API_KEY", "sk-env");
        std::env::set_var("AI_MODEL_NAME", "env-primary");
        std::env::set_var("AI_KILL_SWITCH", "false");

        let provider = Arc::new(ScriptedProvider::new().respond("env-primary", "ok"));
        let gw = AiGateway::new(provider.clone(), Arc::new(EnvSettings))
            .with_retry_policy(RetryPolicy::no_delay(3));
        assert!(!EnvSettings.current().kill_switch);
        assert_eq!(gw.call(&msgs(), &CallOptions::default()).await.unwrap(), "ok");

        std::env::set_var("AI_KILL_SWITCH", "TRUE");
        assert!(EnvSettings.current().kill_switch);
        let err = gw.call(&msgs(), &CallOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceUnavailable));
        assert_eq!(provider.call_count(), 1);

        for var in ["OPENROUTER_API_KEY", "AI_MODEL_NAME", "AI_KILL_SWITCH"] {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    async fn missing_credential_is_configuration_error() {
        let provider = Arc::new(ScriptedProvider::new());
        let s = Arc::new(SharedSettings::new(AiSettings::default()));
        let gw = AiGateway::new(provider.clone(), s);
        let err = gw.call(&msgs(), &CallOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn primary_timeouts_then_fallback_ok() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .respond("fallback", "ok"),
        );
        let gw = gateway(provider.clone(), settings(false));
        let out = gw.complete(&msgs(), &CallOptions::default()).await.unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(out.model, "fallback");
        assert!(out.used_fallback_model);
        assert_eq!(
            provider.calls(),
            vec!["primary", "primary", "primary", "fallback"]
        );
    }

    #[tokio::test]
    async fn transient_then_success_stays_on_primary() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(
                    "primary",
                    ProviderError::Status {
                        status: 502,
                        body: String::new(),
                    },
                )
                .respond("primary", "recovered"),
        );
        let gw = gateway(provider.clone(), settings(false));
        assert_eq!(
            gw.call(&msgs(), &CallOptions::default()).await.unwrap(),
            "recovered"
        );
        assert_eq!(provider.calls(), vec!["primary", "primary"]);
    }

    #[tokio::test]
    async fn client_error_skips_retries_but_uses_fallback() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail(
                    "primary",
                    ProviderError::Status {
                        status: 400,
                        body: "bad model".to_string(),
                    },
                )
                .respond("fallback", "from fallback"),
        );
        let gw = gateway(provider.clone(), settings(false));
        assert_eq!(
            gw.call(&msgs(), &CallOptions::default()).await.unwrap(),
            "from fallback"
        );
        assert_eq!(provider.calls(), vec!["primary", "fallback"]);
    }

    #[tokio::test]
    async fn rejected_on_both_models_surfaces_inside_aggregate() {
        let rejected = || ProviderError::Status {
            status: 401,
            body: "invalid key".to_string(),
        };
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail("primary", rejected())
                .fail("fallback", rejected()),
        );
        let gw = gateway(provider.clone(), settings(false));
        let err = gw.call(&msgs(), &CallOptions::default()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), "AI_SERVICE_UNAVAILABLE");
        match err {
            GatewayError::Aggregate { primary, fallback } => {
                assert!(matches!(*primary, GatewayError::Rejected(_)));
                assert!(matches!(*fallback, GatewayError::Rejected(_)));
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
        assert_eq!(provider.calls(), vec!["primary", "fallback"]);
    }

    #[tokio::test]
    async fn both_fail_is_one_aggregate_error() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .fail("fallback", ProviderError::Network("refused".to_string())),
        );
        let gw = gateway(provider.clone(), settings(false));
        let err = gw.call(&msgs(), &CallOptions::default()).await.unwrap_err();
        match err {
            GatewayError::Aggregate { primary, fallback } => {
                assert!(matches!(*primary, GatewayError::Transient(ProviderError::Timeout)));
                assert!(matches!(
                    *fallback,
                    GatewayError::Transient(ProviderError::Network(_))
                ));
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn structured_mode_extracts_object() {
        let provider = Arc::new(
            ScriptedProvider::new().respond("primary", "Sure! ```json\n{\"score\": 70}\n```"),
        );
        let gw = gateway(provider, settings(false));
        let out = gw
            .call(&msgs(), &CallOptions::default().structured(true))
            .await
            .unwrap();
        assert_eq!(out, "{\"score\": 70}");
    }

    #[tokio::test]
    async fn parse_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new().respond("primary", "no json at all"));
        let gw = gateway(provider.clone(), settings(false));
        let err = gw
            .call(&msgs(), &CallOptions::default().structured(true))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn analyze_returns_json_value() {
        let provider = Arc::new(
            ScriptedProvider::new().respond("primary", r#"{"risk_level": "low"}"#),
        );
        let gw = gateway(provider.clone(), settings(false));
        let v = gw
            .analyze("system", "user", CallOptions::new(AiDomain::Wellbeing))
            .await
            .unwrap();
        assert_eq!(v["risk_level"], "low");
        let sent = provider.last_messages().unwrap();
        assert_eq!(sent[0].role, "system");
        assert_eq!(sent[1].content, "user");
    }

    #[tokio::test]
    async fn coordinate_builds_domain_prompt() {
        let provider = Arc::new(ScriptedProvider::new().respond("primary", r#"{"ok": true}"#));
        let gw = gateway(provider.clone(), settings(false));
        gw.coordinate(
            "schedule",
            &serde_json::json!({"slots": 3}),
            CallOptions::new(AiDomain::Interview),
        )
        .await
        .unwrap();
        let sent = provider.last_messages().unwrap();
        assert_eq!(sent[0].content, "You are an AI coordinator for interview.");
        assert!(sent[1].content.contains("\"slots\":3"));
    }

    #[tokio::test]
    async fn governance_written_only_with_audit_context() {
        let store = InMemoryAuditStore::new();
        let provider = Arc::new(
            ScriptedProvider::new()
                .respond("primary", "fine")
                .respond("primary", "fine"),
        );
        let gw = gateway(provider, settings(false))
            .with_governance(GovernanceHook::new(Arc::new(store.clone())));

        gw.call(&msgs(), &CallOptions::default().organization(1))
            .await
            .unwrap();
        assert!(store.list_governance(Some(1), 10).await.unwrap().is_empty());

        let opts = CallOptions::default().organization(1).audit(AuditContext {
            request_id: Some("r-1".to_string()),
        });
        gw.call(&msgs(), &opts).await.unwrap();
        let logs = store.list_governance(Some(1), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].model_name, "primary");
        assert_eq!(logs[0].request_id.as_deref(), Some("r-1"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_for(1), Duration::from_secs(4));
        assert_eq!(p.backoff_for(2), Duration::from_secs(8));
        assert_eq!(p.backoff_for(3), Duration::from_secs(10));
    }

    #[test]
    fn domain_parses_case_insensitively() {
        assert_eq!("Resume".parse::<AiDomain>().unwrap(), AiDomain::Resume);
        assert!("astrology".parse::<AiDomain>().is_err());
    }
}
