//! Built-in AI task handlers. Each calls the gateway, wraps the answer with trust
//! metadata and stores the resulting envelope as the task result.

use crate::registry::{HandlerError, TypedTaskHandler};
use async_trait::async_trait;
use hr_gateway::{AiDomain, AiGateway, AuditContext, CallOptions, GatewayError};
use hr_trust::{Actor, TrustWrapper, TrustedResponse, WrapRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const RESUME_SYSTEM_PROMPT: &str = "You are an expert resume reviewer. Analyze resumes against job requirements and provide a score (0-100) and detailed feedback. Always respond in JSON format: {\"score\": <number>, \"feedback\": \"<text>\", \"confidence\": <0-1>}";

const BURNOUT_SYSTEM_PROMPT: &str = "You are an HR AI expert specializing in burnout detection. Analyze the employee's work data.\nRisk Levels: low, medium, high, critical.\nRespond in valid JSON only.\nFormat: {\"risk_level\": \"...\", \"indicators\": [\"...\"], \"recommendations\": [\"...\"], \"analysis\": \"...\", \"confidence\": <0-1>}";

/// Confidence used when the model does not report one.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Gateway failures that cannot be fixed by retrying the task are permanent.
fn classify(e: GatewayError) -> HandlerError {
    match e {
        GatewayError::Configuration(_) => HandlerError::Permanent(e.to_string()),
        other => HandlerError::Retryable(other.to_string()),
    }
}

fn reported_confidence(value: &Value) -> f64 {
    value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_CONFIDENCE)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResumeAnalysisPayload {
    pub resume_text: String,
    pub job_requirements: String,
    #[serde(default)]
    pub resume_id: Option<i64>,
    #[serde(default)]
    pub actor_id: Option<i64>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeAnalysis {
    pub score: f64,
    pub feedback: String,
}

impl ResumeAnalysis {
    fn from_model(value: &Value) -> Self {
        let score = match value.get("score") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(50.0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(50.0),
            _ => 50.0,
        };
        let feedback = value
            .get("feedback")
            .and_then(Value::as_str)
            .unwrap_or("No feedback provided.")
            .to_string();
        Self {
            score: if score.is_nan() { 50.0 } else { score.clamp(0.0, 100.0) },
            feedback,
        }
    }
}

/// Scores a resume against job requirements (0-100) with feedback. Hiring decisions
/// always require human confirmation.
#[derive(Clone)]
pub struct ResumeAnalysisHandler {
    gateway: AiGateway,
    trust: TrustWrapper,
}

impl ResumeAnalysisHandler {
    pub fn new(gateway: AiGateway, trust: TrustWrapper) -> Self {
        Self { gateway, trust }
    }
}

#[async_trait]
impl TypedTaskHandler for ResumeAnalysisHandler {
    type Payload = ResumeAnalysisPayload;
    type Output = TrustedResponse;

    async fn run(
        &self,
        organization_id: i64,
        payload: ResumeAnalysisPayload,
    ) -> Result<TrustedResponse, HandlerError> {
        let user_content = format!(
            "Job Requirements:\n{}\n\nResume:\n{}\n\nAnalyze this resume and provide a score (0-100) and detailed feedback in JSON format.",
            payload.job_requirements, payload.resume_text
        );
        let mut opts = CallOptions::new(AiDomain::Resume)
            .temperature(0.5)
            .organization(organization_id);
        if let Some(ref rid) = payload.request_id {
            opts = opts.audit(AuditContext {
                request_id: Some(rid.clone()),
            });
        }
        let answer = self
            .gateway
            .analyze_with_model(RESUME_SYSTEM_PROMPT, &user_content, opts)
            .await
            .map_err(classify)?;

        let analysis = ResumeAnalysis::from_model(&answer.value);
        let mut actor = Actor::new(organization_id, payload.actor_id, "ai_system");
        if let Some(rid) = payload.request_id {
            actor = actor.with_request_id(rid);
        }
        let mut req = WrapRequest::new(
            serde_json::to_value(&analysis)
                .map_err(|e| HandlerError::Permanent(e.to_string()))?,
            "resume_screening",
            "resume",
        )
        .confidence(reported_confidence(&answer.value))
        .model(answer.model)
        .reasoning(analysis.feedback.clone())
        .requires_human_confirmation(true)
        .answered_by_fallback_model(answer.used_fallback_model);
        if let Some(id) = payload.resume_id {
            req = req.entity(id);
        }
        Ok(self.trust.wrap(&actor, req).await)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkPatterns {
    #[serde(default)]
    pub overtime_days: u32,
    #[serde(default)]
    pub weekend_work: u32,
    #[serde(default)]
    pub total_metrics: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BurnoutPayload {
    pub employee_id: i64,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub patterns: WorkPatterns,
    /// Recent metric lines, e.g. `2024-05-01: work_hours = 11`.
    #[serde(default)]
    pub recent_metrics: Vec<String>,
    #[serde(default)]
    pub actor_id: Option<i64>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnoutAssessment {
    pub risk_level: String,
    pub indicators: Vec<String>,
    pub recommendations: Vec<String>,
    pub analysis: String,
}

impl BurnoutAssessment {
    fn insufficient_data() -> Self {
        Self {
            risk_level: "unknown".to_string(),
            indicators: vec!["No data available".to_string()],
            recommendations: vec!["Start tracking work hours to enable analysis".to_string()],
            analysis: "Insufficient data to perform analysis.".to_string(),
        }
    }

    fn from_model(value: &Value) -> Self {
        let strings = |key: &str, default: &str| -> Vec<String> {
            match value.get(key).and_then(Value::as_array) {
                Some(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                None => vec![default.to_string()],
            }
        };
        let risk_level = value
            .get("risk_level")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| matches!(s.as_str(), "low" | "medium" | "high" | "critical"))
            .unwrap_or_else(|| "medium".to_string());
        Self {
            risk_level,
            indicators: strings("indicators", "Analysis incomplete"),
            recommendations: strings("recommendations", "Consult with HR"),
            analysis: value
                .get("analysis")
                .and_then(Value::as_str)
                .unwrap_or("AI analysis completed.")
                .to_string(),
        }
    }
}

/// Burnout risk from work patterns and recent metrics.
#[derive(Clone)]
pub struct BurnoutAssessmentHandler {
    gateway: AiGateway,
    trust: TrustWrapper,
}

impl BurnoutAssessmentHandler {
    pub fn new(gateway: AiGateway, trust: TrustWrapper) -> Self {
        Self { gateway, trust }
    }
}

#[async_trait]
impl TypedTaskHandler for BurnoutAssessmentHandler {
    type Payload = BurnoutPayload;
    type Output = TrustedResponse;

    async fn run(
        &self,
        organization_id: i64,
        payload: BurnoutPayload,
    ) -> Result<TrustedResponse, HandlerError> {
        let mut actor = Actor::new(organization_id, payload.actor_id, "ai_system");
        if let Some(ref rid) = payload.request_id {
            actor = actor.with_request_id(rid.clone());
        }
        let to_value = |a: &BurnoutAssessment| {
            serde_json::to_value(a).map_err(|e| HandlerError::Permanent(e.to_string()))
        };

        if payload.recent_metrics.is_empty() {
            tracing::info!(employee_id = payload.employee_id, "no metrics for burnout assessment");
            let assessment = BurnoutAssessment::insufficient_data();
            let req = WrapRequest::new(to_value(&assessment)?, "burnout_assessment", "employee")
                .entity(payload.employee_id)
                .fallback(Some("No work metrics available".to_string()));
            return Ok(self.trust.wrap(&actor, req).await);
        }

        let name = payload
            .employee_name
            .clone()
            .unwrap_or_else(|| format!("Employee {}", payload.employee_id));
        let user_content = format!(
            "Employee: {}\nWork Patterns (Last 30 days): Overtime Days: {}, Weekend Work: {}, Total Records: {}\nRecent Metrics:\n{}\n\nAnalyze for burnout risk based on overtime, irregular hours, and workload consistency.",
            name,
            payload.patterns.overtime_days,
            payload.patterns.weekend_work,
            payload.patterns.total_metrics,
            payload.recent_metrics.join("\n")
        );
        let mut opts = CallOptions::new(AiDomain::Wellbeing)
            .temperature(0.4)
            .organization(organization_id);
        if let Some(rid) = payload.request_id {
            opts = opts.audit(AuditContext {
                request_id: Some(rid),
            });
        }
        let answer = self
            .gateway
            .analyze_with_model(BURNOUT_SYSTEM_PROMPT, &user_content, opts)
            .await
            .map_err(classify)?;

        let assessment = BurnoutAssessment::from_model(&answer.value);
        let requires_review = matches!(assessment.risk_level.as_str(), "high" | "critical");
        let req = WrapRequest::new(to_value(&assessment)?, "burnout_assessment", "employee")
            .entity(payload.employee_id)
            .confidence(reported_confidence(&answer.value))
            .model(answer.model)
            .reasoning(assessment.analysis.clone())
            .requires_human_confirmation(requires_review)
            .answered_by_fallback_model(answer.used_fallback_model);
        Ok(self.trust.wrap(&actor, req).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{DispatchOutcome, ExecutorConfig, TaskExecutor};
    use crate::kind::TaskKind;
    use crate::memory::InMemoryTaskStore;
    use crate::registry::HandlerRegistry;
    use hr_audit::{AuditLedger, AuditQuery, InMemoryAuditStore};
    use hr_gateway::{
        AiSettings, ProviderError, RetryPolicy, ScriptedProvider, SharedSettings,
    };
    use hr_types::{ConfidenceLevel, TaskStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn settings() -> Arc<SharedSettings> {
        Arc::new(SharedSettings::new(AiSettings {
            api_key: Some("sk-test".to_string()),
            model_name: "primary".to_string(),
            fallback_model: "fallback".to_string(),
            kill_switch: false,
        }))
    }

    struct Harness {
        exec: TaskExecutor,
        ledger: AuditLedger,
    }

    fn harness(provider: ScriptedProvider, settings: Arc<SharedSettings>) -> Harness {
        let ledger = AuditLedger::new(Arc::new(InMemoryAuditStore::new()));
        let gateway = AiGateway::new(Arc::new(provider), settings)
            .with_retry_policy(RetryPolicy::no_delay(3));
        let trust = TrustWrapper::new(ledger.clone());
        let mut registry = HandlerRegistry::new();
        registry
            .register_typed(
                TaskKind::ResumeAnalysis,
                ResumeAnalysisHandler::new(gateway.clone(), trust.clone()),
            )
            .register_typed(
                TaskKind::BurnoutAssessment,
                BurnoutAssessmentHandler::new(gateway, trust),
            );
        let exec = TaskExecutor::new(
            Arc::new(InMemoryTaskStore::new()),
            registry,
            ExecutorConfig::default(),
        );
        Harness { exec, ledger }
    }

    #[tokio::test]
    async fn resume_task_stores_trusted_response() {
        let h = harness(
            ScriptedProvider::new().respond(
                "primary",
                "```json\n{\"score\": 140, \"feedback\": \"Strong Rust\", \"confidence\": 0.85}\n```",
            ),
            settings(),
        );
        let task = h
            .exec
            .enqueue(
                TaskKind::ResumeAnalysis,
                json!({"resume_text": "Rust dev", "job_requirements": "Rust", "resume_id": 12}),
                1,
            )
            .await
            .unwrap();
        assert_eq!(
            h.exec.dispatch(&task.id).await.unwrap(),
            DispatchOutcome::Completed
        );

        let done = h.exec.get(1, &task.id).await.unwrap().unwrap();
        let resp: TrustedResponse = serde_json::from_value(done.result.unwrap()).unwrap();
        assert_eq!(resp.content, hr_trust::STRUCTURED_PLACEHOLDER);
        assert_eq!(resp.data.as_ref().unwrap()["score"], 100.0);
        assert_eq!(resp.trust.confidence_level, ConfidenceLevel::High);
        assert_eq!(resp.trust.model_name, "primary");
        assert!(resp.trust.requires_human_confirmation);

        let audits = h
            .ledger
            .query(&AuditQuery::for_organization(1))
            .await
            .unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].action, "resume_screening");
        assert_eq!(audits[0].entity_id, Some(12));
        assert!(audits[0].ai_recommended);
    }

    #[tokio::test]
    async fn gateway_outage_leaves_task_retrying() {
        let h = harness(
            ScriptedProvider::new()
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .fail("fallback", ProviderError::Timeout),
            settings(),
        );
        let task = h
            .exec
            .enqueue(
                TaskKind::ResumeAnalysis,
                json!({"resume_text": "x", "job_requirements": "y"}),
                1,
            )
            .await
            .unwrap();
        assert_eq!(
            h.exec.dispatch(&task.id).await.unwrap(),
            DispatchOutcome::Retrying
        );
        let t = h.exec.get(1, &task.id).await.unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Retrying);
        assert!(t.error.unwrap().contains("completely unavailable"));
    }

    #[tokio::test]
    async fn missing_credential_fails_task_permanently() {
        let s = Arc::new(SharedSettings::new(AiSettings::default()));
        let h = harness(ScriptedProvider::new(), s);
        let task = h
            .exec
            .enqueue(
                TaskKind::ResumeAnalysis,
                json!({"resume_text": "x", "job_requirements": "y"}),
                1,
            )
            .await
            .unwrap();
        assert_eq!(
            h.exec.dispatch(&task.id).await.unwrap(),
            DispatchOutcome::Failed
        );
        let t = h.exec.get(1, &task.id).await.unwrap().unwrap();
        assert_eq!(t.retries, 0);
    }

    #[tokio::test]
    async fn burnout_without_metrics_skips_the_model() {
        let h = harness(ScriptedProvider::new(), settings());
        let task = h
            .exec
            .enqueue(TaskKind::BurnoutAssessment, json!({"employee_id": 5}), 2)
            .await
            .unwrap();
        h.exec.dispatch(&task.id).await.unwrap();
        let done = h.exec.get(2, &task.id).await.unwrap().unwrap();
        let resp: TrustedResponse = serde_json::from_value(done.result.unwrap()).unwrap();
        assert_eq!(resp.data.as_ref().unwrap()["risk_level"], "unknown");
        assert!(resp.trust.is_fallback);
        assert_eq!(resp.trust.confidence_level, ConfidenceLevel::Low);
    }

    #[tokio::test]
    async fn burnout_defaults_fill_missing_fields() {
        let h = harness(
            ScriptedProvider::new().respond("primary", r#"{"risk_level": "HIGH"}"#),
            settings(),
        );
        let task = h
            .exec
            .enqueue(
                TaskKind::BurnoutAssessment,
                json!({
                    "employee_id": 5,
                    "patterns": {"overtime_days": 12, "weekend_work": 4, "total_metrics": 20},
                    "recent_metrics": ["2024-05-01: work_hours = 11"]
                }),
                2,
            )
            .await
            .unwrap();
        h.exec.dispatch(&task.id).await.unwrap();
        let done = h.exec.get(2, &task.id).await.unwrap().unwrap();
        let resp: TrustedResponse = serde_json::from_value(done.result.unwrap()).unwrap();
        let data = resp.data.unwrap();
        assert_eq!(data["risk_level"], "high");
        assert_eq!(data["indicators"], json!(["Analysis incomplete"]));
        assert!(resp.trust.requires_human_confirmation);
        assert_eq!(resp.trust.confidence_level, ConfidenceLevel::Medium);
    }

    #[tokio::test]
    async fn fallback_model_answer_is_routed_to_a_human() {
        let h = harness(
            ScriptedProvider::new()
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .fail("primary", ProviderError::Timeout)
                .respond(
                    "fallback",
                    r#"{"risk_level": "low", "analysis": "Steady hours", "confidence": 0.95}"#,
                ),
            settings(),
        );
        let task = h
            .exec
            .enqueue(
                TaskKind::BurnoutAssessment,
                json!({"employee_id": 5, "recent_metrics": ["2024-05-01: work_hours = 8"]}),
                2,
            )
            .await
            .unwrap();
        assert_eq!(
            h.exec.dispatch(&task.id).await.unwrap(),
            DispatchOutcome::Completed
        );
        let done = h.exec.get(2, &task.id).await.unwrap().unwrap();
        let resp: TrustedResponse = serde_json::from_value(done.result.unwrap()).unwrap();
        assert_eq!(resp.data.as_ref().unwrap()["risk_level"], "low");
        assert_eq!(resp.trust.model_name, "fallback");
        assert!(resp.trust.requires_human_confirmation);
        let reasoning = resp.trust.reasoning.unwrap();
        assert!(reasoning.starts_with(hr_trust::FALLBACK_MODEL_NOTE));
        assert!(reasoning.ends_with("Steady hours"));
    }

    #[test]
    fn resume_score_is_clamped_and_defaulted() {
        assert_eq!(ResumeAnalysis::from_model(&json!({"score": -5})).score, 0.0);
        assert_eq!(ResumeAnalysis::from_model(&json!({"score": "72"})).score, 72.0);
        let empty = ResumeAnalysis::from_model(&json!({}));
        assert_eq!(empty.score, 50.0);
        assert_eq!(empty.feedback, "No feedback provided.");
    }
}
