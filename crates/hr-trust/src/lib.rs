//! Trust wrapper: turns raw model output into a confidence-scored, audited response.

mod wrapper;

pub use hr_types::{ConfidenceLevel, SourceCitation, TrustMetadata, TrustedResponse};
pub use wrapper::{
    Actor, AiContent, TrustWrapper, WrapRequest, DEFAULT_FALLBACK_REASON, FALLBACK_MODEL_NOTE,
    STRUCTURED_PLACEHOLDER,
};
