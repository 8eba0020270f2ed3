//! Governance telemetry for successful AI calls. Best-effort: nothing here propagates.

use crate::gateway::AiDomain;
use chrono::Utc;
use hr_audit::{AuditLedger, AuditRecord};
use hr_types::{ChatMessage, GovernanceLogEntry, GovernanceStore};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Bias score above which an entry is flagged for human review.
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.5;

const ADVERSE_TERMS: &[&str] = &[
    "reject",
    "deny",
    "denied",
    "terminat",
    "disqualif",
    "unsuitable",
    "dismiss",
];

const PROTECTED_ATTRIBUTES: &[&str] = &[
    "age",
    "aged",
    "gender",
    "pregnan",
    "religio",
    "ethnic",
    "race",
    "racial",
    "disabilit",
    "disabled",
    "nationality",
    "marital",
];

const MAX_MESSAGE_CHARS: usize = 500;
const MAX_OUTPUT_CHARS: usize = 2000;

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Short stems (< 5 chars) must match a whole word; longer stems match word prefixes.
fn stem_matches(token: &str, stem: &str) -> bool {
    if stem.len() < 5 {
        token == stem
    } else {
        token.starts_with(stem)
    }
}

fn hits<'a>(toks: &[String], stems: &[&'a str]) -> Vec<&'a str> {
    stems
        .iter()
        .copied()
        .filter(|s| toks.iter().any(|t| stem_matches(t, s)))
        .collect()
}

/// Heuristic bias indicator in [0, 1]: 0.2 for adverse-decision vocabulary, plus 0.35
/// per protected attribute mentioned alongside it.
pub fn bias_score(output: &str) -> f64 {
    let toks = tokens(output);
    let adverse = hits(&toks, ADVERSE_TERMS);
    if adverse.is_empty() {
        return 0.0;
    }
    let protected = hits(&toks, PROTECTED_ATTRIBUTES);
    (0.2 + 0.35 * protected.len() as f64).min(1.0)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Self-reported confidence from structured output (`confidence` or `confidence_score`),
/// else a neutral 0.5.
fn reported_confidence(output: &str) -> f64 {
    serde_json::from_str::<Value>(output)
        .ok()
        .and_then(|v| {
            v.get("confidence")
                .or_else(|| v.get("confidence_score"))
                .and_then(Value::as_f64)
        })
        .map(hr_types::clamp_unit)
        .unwrap_or(0.5)
}

/// Writes a [`GovernanceLogEntry`] per successful call and, when flagged, an extra
/// `high_bias_detected` audit entry.
#[derive(Clone)]
pub struct GovernanceHook {
    store: Arc<dyn GovernanceStore>,
    ledger: Option<AuditLedger>,
    review_threshold: f64,
}

impl GovernanceHook {
    pub fn new(store: Arc<dyn GovernanceStore>) -> Self {
        Self {
            store,
            ledger: None,
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
        }
    }

    pub fn with_ledger(mut self, ledger: AuditLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_review_threshold(mut self, threshold: f64) -> Self {
        self.review_threshold = threshold;
        self
    }

    pub async fn record(
        &self,
        domain: AiDomain,
        organization_id: Option<i64>,
        request_id: Option<&str>,
        model_name: &str,
        messages: &[ChatMessage],
        output: &str,
    ) -> Option<GovernanceLogEntry> {
        let toks = tokens(output);
        let bias = bias_score(output);
        let flagged = bias > self.review_threshold;
        let summarized: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role, "content": truncate(&m.content, MAX_MESSAGE_CHARS)}))
            .collect();
        let entry = GovernanceLogEntry {
            id: Uuid::new_v4().to_string(),
            organization_id,
            domain: domain.to_string(),
            request_id: request_id.map(str::to_string),
            model_name: model_name.to_string(),
            input_summary: json!({ "messages": summarized }),
            output_summary: json!({ "text": truncate(output, MAX_OUTPUT_CHARS) }),
            confidence_score: reported_confidence(output),
            bias_score: bias,
            flagged_for_review: flagged,
            checks: json!({
                "automated_bias_check": true,
                "adverse_terms": hits(&toks, ADVERSE_TERMS),
                "protected_attributes": hits(&toks, PROTECTED_ATTRIBUTES),
            }),
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.append_governance(entry.clone()).await {
            tracing::error!(error = %e, domain = %domain, "failed to log AI governance data");
            return None;
        }

        if flagged {
            match (&self.ledger, organization_id) {
                (Some(ledger), Some(org)) => {
                    ledger
                        .record(
                            AuditRecord::new("high_bias_detected", "ai_governance", org)
                                .actor(None, "ai_system")
                                .details(&json!({
                                    "score": bias,
                                    "request_id": entry.request_id,
                                    "governance_log_id": entry.id,
                                })),
                        )
                        .await;
                }
                _ => tracing::warn!(
                    bias_score = bias,
                    domain = %domain,
                    "high bias detected without an organization to audit against"
                ),
            }
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hr_audit::{AuditQuery, InMemoryAuditStore};

    #[test]
    fn neutral_output_scores_zero() {
        assert_eq!(bias_score("The candidate has strong Rust experience."), 0.0);
    }

    #[test]
    fn adverse_language_alone_is_below_threshold() {
        let s = bias_score("We recommend to reject this application.");
        assert!((s - 0.2).abs() < 1e-9);
        assert!(s <= DEFAULT_REVIEW_THRESHOLD);
    }

    #[test]
    fn adverse_with_protected_attribute_is_flagged() {
        let s = bias_score("Reject: the candidate's age is a concern.");
        assert!(s > DEFAULT_REVIEW_THRESHOLD);
    }

    #[test]
    fn short_stems_need_whole_words() {
        // "manager" / "average" must not count as "age"
        assert!((bias_score("deny: average manager") - 0.2).abs() < 1e-9);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("hi", 5), "hi");
    }

    #[tokio::test]
    async fn flagged_entry_writes_audit_record() {
        let store = InMemoryAuditStore::new();
        let ledger = AuditLedger::new(Arc::new(store.clone()));
        let hook = GovernanceHook::new(Arc::new(store.clone())).with_ledger(ledger.clone());
        let entry = hook
            .record(
                AiDomain::Resume,
                Some(5),
                Some("req-9"),
                "m",
                &[ChatMessage::user("review")],
                "Reject due to pregnancy and age",
            )
            .await
            .unwrap();
        assert!(entry.flagged_for_review);
        assert_eq!(store.list_governance(Some(5), 10).await.unwrap().len(), 1);
        let audits = ledger
            .query(&AuditQuery {
                action: Some("high_bias_detected".to_string()),
                ..AuditQuery::for_organization(5)
            })
            .await
            .unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].details["request_id"], "req-9");
    }

    #[tokio::test]
    async fn reported_confidence_is_used_when_present() {
        let store = InMemoryAuditStore::new();
        let hook = GovernanceHook::new(Arc::new(store));
        let entry = hook
            .record(AiDomain::General, None, None, "m", &[], r#"{"confidence": 0.8}"#)
            .await
            .unwrap();
        assert_eq!(entry.confidence_score, 0.8);
        assert!(!entry.flagged_for_review);
    }
}
