//! Handler registry keyed by [`TaskKind`].

use crate::kind::TaskKind;
use async_trait::async_trait;
use hr_types::Task;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The attempt failed but may succeed later; counts against the retry budget.
    #[error("{0}")]
    Retryable(String),
    /// Retrying cannot help (bad payload, missing configuration).
    #[error("{0}")]
    Permanent(String),
}

/// Untyped handler as stored in the registry.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<Value, HandlerError>;
}

/// Handler over a typed payload and output. Registered through
/// [`HandlerRegistry::register_typed`], which takes care of (de)serialization.
#[async_trait]
pub trait TypedTaskHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn run(
        &self,
        organization_id: i64,
        payload: Self::Payload,
    ) -> Result<Self::Output, HandlerError>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: TypedTaskHandler> TaskHandler for Typed<H> {
    async fn handle(&self, task: &Task) -> Result<Value, HandlerError> {
        let payload: H::Payload = serde_json::from_value(task.payload.clone())
            .map_err(|e| HandlerError::Permanent(format!("invalid payload: {}", e)))?;
        let output = self.0.run(task.organization_id, payload).await?;
        serde_json::to_value(output)
            .map_err(|e| HandlerError::Permanent(format!("unserializable result: {}", e)))
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> &mut Self {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!(kind = %kind, "replacing task handler");
        }
        self
    }

    pub fn register_typed<H: TypedTaskHandler>(&mut self, kind: TaskKind, handler: H) -> &mut Self {
        self.register(kind, Arc::new(Typed(handler)))
    }

    /// Handler for a stored type string. `None` for unknown strings and unregistered kinds.
    pub fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        let kind: TaskKind = task_type.parse().ok()?;
        self.handlers.get(&kind).cloned()
    }

    pub fn is_registered(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Echo {
        text: String,
    }

    struct EchoHandler;

    #[async_trait]
    impl TypedTaskHandler for EchoHandler {
        type Payload = Echo;
        type Output = Value;

        async fn run(&self, org: i64, payload: Echo) -> Result<Value, HandlerError> {
            Ok(json!({"org": org, "echo": payload.text}))
        }
    }

    #[tokio::test]
    async fn typed_handler_round_trips_payload() {
        let mut reg = HandlerRegistry::new();
        reg.register_typed(TaskKind::ResumeAnalysis, EchoHandler);
        let handler = reg.resolve("resume_analysis").unwrap();
        let task = Task::new("resume_analysis", json!({"text": "hi"}), 4, 3);
        let out = handler.handle(&task).await.unwrap();
        assert_eq!(out, json!({"org": 4, "echo": "hi"}));
    }

    #[tokio::test]
    async fn bad_payload_is_permanent() {
        let mut reg = HandlerRegistry::new();
        reg.register_typed(TaskKind::ResumeAnalysis, EchoHandler);
        let handler = reg.resolve("resume_analysis").unwrap();
        let task = Task::new("resume_analysis", json!({"wrong": 1}), 1, 3);
        assert!(matches!(
            handler.handle(&task).await,
            Err(HandlerError::Permanent(_))
        ));
    }

    #[test]
    fn unknown_or_unregistered_types_do_not_resolve() {
        let mut reg = HandlerRegistry::new();
        reg.register_typed(TaskKind::ResumeAnalysis, EchoHandler);
        assert!(reg.resolve("bogus").is_none());
        assert!(reg.resolve("burnout_assessment").is_none());
        assert!(reg.is_registered(TaskKind::ResumeAnalysis));
    }
}
