//! Wrap AI output with trust metadata and record it in the audit ledger.

use hr_audit::{AuditLedger, AuditRecord};
use hr_types::{SourceCitation, TrustMetadata, TrustedResponse};
use serde_json::{json, Map, Value};

pub const DEFAULT_FALLBACK_REASON: &str = "Unable to process request.";

/// Display text used when structured output is moved into `data`.
pub const STRUCTURED_PLACEHOLDER: &str = "Structured AI Response";

/// Prefixed to the reasoning of answers produced by the fallback model.
pub const FALLBACK_MODEL_NOTE: &str =
    "Answered by the fallback model; confidence is self-reported.";

/// Who the wrapped action is attributed to.
#[derive(Debug, Clone)]
pub struct Actor {
    pub organization_id: i64,
    pub actor_id: Option<i64>,
    pub actor_role: String,
    pub request_id: Option<String>,
}

impl Actor {
    pub fn new(organization_id: i64, actor_id: Option<i64>, actor_role: impl Into<String>) -> Self {
        Self {
            organization_id,
            actor_id,
            actor_role: actor_role.into(),
            request_id: None,
        }
    }

    /// Background work with no human actor.
    pub fn system(organization_id: i64) -> Self {
        Self::new(organization_id, None, "system")
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Raw model output: free text or an already-parsed structured value.
#[derive(Debug, Clone, PartialEq)]
pub enum AiContent {
    Text(String),
    Structured(Value),
}

impl From<String> for AiContent {
    fn from(s: String) -> Self {
        AiContent::Text(s)
    }
}

impl From<&str> for AiContent {
    fn from(s: &str) -> Self {
        AiContent::Text(s.to_string())
    }
}

impl From<Value> for AiContent {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => AiContent::Text(s),
            other => AiContent::Structured(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WrapRequest {
    content: AiContent,
    action_type: String,
    entity_type: String,
    entity_id: Option<i64>,
    confidence_score: f64,
    sources: Vec<SourceCitation>,
    model_name: String,
    reasoning: Option<String>,
    is_fallback: bool,
    fallback_reason: Option<String>,
    requires_human_confirmation: bool,
    fallback_model_answered: bool,
    details: Option<Value>,
    data: Option<Value>,
}

impl WrapRequest {
    pub fn new(
        content: impl Into<AiContent>,
        action_type: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            action_type: action_type.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            confidence_score: 0.0,
            sources: Vec::new(),
            model_name: "unknown".to_string(),
            reasoning: None,
            is_fallback: false,
            fallback_reason: None,
            requires_human_confirmation: false,
            fallback_model_answered: false,
            details: None,
            data: None,
        }
    }

    pub fn entity(mut self, entity_id: i64) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn confidence(mut self, score: f64) -> Self {
        self.confidence_score = score;
        self
    }

    pub fn sources(mut self, sources: Vec<SourceCitation>) -> Self {
        self.sources = sources;
        self
    }

    pub fn model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn fallback(mut self, reason: Option<String>) -> Self {
        self.is_fallback = true;
        self.fallback_reason = reason;
        self
    }

    pub fn requires_human_confirmation(mut self, flag: bool) -> Self {
        self.requires_human_confirmation = flag;
        self
    }

    /// Mark output produced by the secondary model: always routed to a human, with a
    /// note in the reasoning.
    pub fn answered_by_fallback_model(mut self, flag: bool) -> Self {
        self.fallback_model_answered = flag;
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn metadata(&self, request_id: Option<String>) -> TrustMetadata {
        let mut trust = if self.is_fallback {
            let reason = self
                .fallback_reason
                .clone()
                .unwrap_or_else(|| DEFAULT_FALLBACK_REASON.to_string());
            TrustMetadata::fallback(self.model_name.clone(), reason)
        } else {
            TrustMetadata::from_score(self.confidence_score, self.model_name.clone())
        };
        trust.sources = self.sources.clone();
        trust.reasoning = match (&self.reasoning, self.fallback_model_answered) {
            (Some(r), true) => Some(format!("{} {}", FALLBACK_MODEL_NOTE, r)),
            (None, true) => Some(FALLBACK_MODEL_NOTE.to_string()),
            (r, false) => r.clone(),
        };
        trust.requires_human_confirmation =
            self.requires_human_confirmation || self.fallback_model_answered;
        trust.request_id = request_id;
        trust
    }
}

/// Every AI result passes through here before reaching a caller.
#[derive(Clone)]
pub struct TrustWrapper {
    ledger: AuditLedger,
}

impl TrustWrapper {
    pub fn new(ledger: AuditLedger) -> Self {
        Self { ledger }
    }

    /// Build the envelope and audit it. An audit failure is reported as a critical event
    /// but never withholds the response.
    pub async fn wrap(&self, actor: &Actor, req: WrapRequest) -> TrustedResponse {
        let trust = req.metadata(actor.request_id.clone());
        let trust_json = match serde_json::to_value(&trust) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize trust metadata");
                Value::Null
            }
        };

        let mut details = match req.details.clone() {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                let mut m = Map::new();
                m.insert("value".to_string(), other);
                m
            }
        };
        details.insert("confidence_score".to_string(), json!(trust.confidence_score));
        details.insert("model".to_string(), json!(trust.model_name));
        details.insert("is_fallback".to_string(), json!(trust.is_fallback));
        details.insert("trust_metadata".to_string(), trust_json.clone());
        if let Some(ref request_id) = actor.request_id {
            details.insert("request_id".to_string(), json!(request_id));
        }

        let record =
            AuditRecord::new(&req.action_type, &req.entity_type, actor.organization_id)
                .entity(req.entity_id)
                .actor(actor.actor_id, &actor.actor_role)
                .ai_recommended(true)
                .details(&Value::Object(details))
                .after(&json!({ "trust_metadata": trust_json }));
        if self.ledger.record(record).await.is_none() {
            tracing::error!(
                critical = true,
                action = %req.action_type,
                organization_id = actor.organization_id,
                "failed to audit AI action"
            );
        }

        let (content, data) = match (req.content, req.data) {
            (AiContent::Text(text), data) => (text, data),
            (AiContent::Structured(value), None) => (STRUCTURED_PLACEHOLDER.to_string(), Some(value)),
            (AiContent::Structured(value), Some(data)) => (value.to_string(), Some(data)),
        };
        TrustedResponse {
            content,
            trust,
            data,
        }
    }
}
