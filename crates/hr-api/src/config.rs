//! Server configuration from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// SQLite file for audit, governance and task data. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    pub retention_days: u32,
    pub task_max_retries: u32,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            database_path: None,
            retention_days: hr_audit::DEFAULT_RETENTION_DAYS,
            task_max_retries: 3,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        _ => Ok(None),
    }
}

impl ServerConfig {
    /// `HR_LISTEN`, `HR_DATABASE_PATH`, `HR_RETENTION_DAYS`, `HR_TASK_MAX_RETRIES`,
    /// `HR_TASK_SWEEP_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            listen: parsed("HR_LISTEN")?.unwrap_or(defaults.listen),
            database_path: std::env::var("HR_DATABASE_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            retention_days: parsed("HR_RETENTION_DAYS")?.unwrap_or(defaults.retention_days),
            task_max_retries: parsed("HR_TASK_MAX_RETRIES")?.unwrap_or(defaults.task_max_retries),
            sweep_interval: parsed::<u64>("HR_TASK_SWEEP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        })
    }
}
