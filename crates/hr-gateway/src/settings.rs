//! Process-wide AI settings, read on every gateway call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
pub const DEFAULT_FALLBACK_MODEL: &str = "google/gemini-2.0-flash-lite-preview-02-05:free";

#[derive(Clone, PartialEq)]
pub struct AiSettings {
    pub api_key: Option<String>,
    pub model_name: String,
    pub fallback_model: String,
    pub kill_switch: bool,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model_name: DEFAULT_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            kill_switch: false,
        }
    }
}

impl AiSettings {
    /// Read `OPENROUTER_API_KEY`, `AI_MODEL_NAME`, `AI_FALLBACK_MODEL`, `AI_KILL_SWITCH`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let model_name =
            std::env::var("AI_MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let fallback_model = std::env::var("AI_FALLBACK_MODEL")
            .unwrap_or_else(|_| DEFAULT_FALLBACK_MODEL.to_string());
        let kill_switch = std::env::var("AI_KILL_SWITCH")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            api_key,
            model_name,
            fallback_model,
            kill_switch,
        }
    }
}

impl fmt::Debug for AiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model_name", &self.model_name)
            .field("fallback_model", &self.fallback_model)
            .field("kill_switch", &self.kill_switch)
            .finish()
    }
}

/// Source of the current settings. The gateway asks on every call, so operators can
/// flip the kill switch or swap models without a restart.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> AiSettings;
}

/// Re-reads the process environment on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSettings;

impl SettingsSource for EnvSettings {
    fn current(&self) -> AiSettings {
        AiSettings::from_env()
    }
}

/// In-process settings; the kill switch is an atomic flag.
pub struct SharedSettings {
    kill_switch: AtomicBool,
    rest: RwLock<AiSettings>,
}

impl SharedSettings {
    pub fn new(settings: AiSettings) -> Self {
        Self {
            kill_switch: AtomicBool::new(settings.kill_switch),
            rest: RwLock::new(settings),
        }
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }

    pub fn set_kill_switch(&self, active: bool) {
        self.kill_switch.store(active, Ordering::SeqCst);
        tracing::warn!(active, "AI kill switch updated");
    }

    /// Replace models and credential. The kill switch keeps its own value.
    pub fn update(&self, settings: AiSettings) {
        match self.rest.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

impl SettingsSource for SharedSettings {
    fn current(&self) -> AiSettings {
        let mut s = match self.rest.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        s.kill_switch = self.kill_switch_active();
        s
    }
}
