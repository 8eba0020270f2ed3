//! Trust metadata attached to every AI-derived response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence band derived from a score in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// score >= 0.8
    High,
    /// 0.5 <= score < 0.8
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub const HIGH_THRESHOLD: f64 = 0.8;
    pub const MEDIUM_THRESHOLD: f64 = 0.5;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            ConfidenceLevel::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp into [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A reference to a document chunk used in generating a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub document_id: i64,
    pub filename: String,
    pub chunk_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default)]
    pub similarity_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_date: Option<String>,
}

impl SourceCitation {
    pub fn new(
        document_id: i64,
        filename: impl Into<String>,
        chunk_index: u32,
        similarity_score: f64,
    ) -> Self {
        Self {
            document_id,
            filename: filename.into(),
            chunk_index,
            snippet: None,
            similarity_score: clamp_unit(similarity_score),
            version: None,
            source_date: None,
        }
    }
}

/// Confidence and provenance envelope. Never persisted on its own: it is embedded in
/// the audit entry's `after_state` and in the response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustMetadata {
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,
    #[serde(default)]
    pub sources: Vec<SourceCitation>,
    #[serde(rename = "ai_model")]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub requires_human_confirmation: bool,
    pub is_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl TrustMetadata {
    /// Metadata for a scored (non-fallback) response; the level is derived from the clamped score.
    pub fn from_score(score: f64, model_name: impl Into<String>) -> Self {
        let score = clamp_unit(score);
        Self {
            confidence_score: score,
            confidence_level: ConfidenceLevel::from_score(score),
            sources: Vec::new(),
            model_name: model_name.into(),
            model_version: None,
            reasoning: None,
            requires_human_confirmation: false,
            is_fallback: false,
            fallback_reason: None,
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    /// Fallback output is never presented as confident: score 0, level LOW.
    pub fn fallback(model_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            is_fallback: true,
            fallback_reason: Some(reason.into()),
            ..Self::from_score(0.0, model_name)
        }
    }
}

/// Standard envelope returned by every AI-backed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedResponse {
    pub content: String,
    pub trust: TrustMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
