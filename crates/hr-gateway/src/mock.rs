//! Scripted provider for tests: per-model queues of canned results.

use crate::provider::{CompletionProvider, CompletionRequest, ProviderError};
use async_trait::async_trait;
use hr_types::ChatMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct Script {
    queues: HashMap<String, VecDeque<Result<String, ProviderError>>>,
    calls: Vec<String>,
    last_messages: Option<Vec<ChatMessage>>,
}

/// Answers each call with the next scripted result for the requested model. An empty
/// queue yields a network error.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, model: &str, result: Result<String, ProviderError>) -> Self {
        if let Ok(mut s) = self.script.lock() {
            s.queues
                .entry(model.to_string())
                .or_default()
                .push_back(result);
        }
        self
    }

    pub fn respond(self, model: &str, text: impl Into<String>) -> Self {
        self.push(model, Ok(text.into()))
    }

    pub fn fail(self, model: &str, error: ProviderError) -> Self {
        self.push(model, Err(error))
    }

    /// Models called, in order.
    pub fn calls(&self) -> Vec<String> {
        self.script
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.script.lock().ok().and_then(|s| s.last_messages.clone())
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        _api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> Result<String, ProviderError> {
        let mut s = self
            .script
            .lock()
            .map_err(|_| ProviderError::Network("script lock poisoned".to_string()))?;
        s.calls.push(request.model.to_string());
        s.last_messages = Some(request.messages.to_vec());
        s.queues
            .get_mut(request.model)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ProviderError::Network("no scripted response".to_string())))
    }
}
