//! HR AI reliability layer server.

use hr_api::config::ServerConfig;
use hr_api::server::{self, AppState};
use hr_audit::{AuditLedger, AuditStore, GovernanceStore, InMemoryAuditStore, SqliteAuditStore};
use hr_gateway::{AiGateway, AiSettings, GovernanceHook, OpenAiCompatibleProvider, SharedSettings};
use hr_tasks::{
    BurnoutAssessmentHandler, ExecutorConfig, HandlerRegistry, InMemoryTaskStore,
    ResumeAnalysisHandler, SqliteTaskStore, TaskExecutor, TaskKind, TaskStore,
};
use hr_trust::TrustWrapper;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();
    let config = ServerConfig::from_env()?;

    let (audit, governance, tasks): (
        Arc<dyn AuditStore>,
        Arc<dyn GovernanceStore>,
        Arc<dyn TaskStore>,
    ) = match config.database_path {
        Some(ref path) => {
            tracing::info!(path = %path.display(), "using SQLite persistence");
            let store = Arc::new(SqliteAuditStore::new(path)?);
            let audit: Arc<dyn AuditStore> = store.clone();
            let governance: Arc<dyn GovernanceStore> = store;
            let tasks: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(path)?);
            (audit, governance, tasks)
        }
        None => {
            tracing::warn!("HR_DATABASE_PATH not set; audit and task data are kept in memory");
            let store = InMemoryAuditStore::new();
            let audit: Arc<dyn AuditStore> = Arc::new(store.clone());
            let governance: Arc<dyn GovernanceStore> = Arc::new(store);
            let tasks: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
            (audit, governance, tasks)
        }
    };

    let ledger = AuditLedger::new(audit).with_governance(Arc::clone(&governance));
    let settings = Arc::new(SharedSettings::new(AiSettings::from_env()));
    let gateway = AiGateway::new(
        Arc::new(OpenAiCompatibleProvider::from_env()),
        settings.clone(),
    )
    .with_governance(GovernanceHook::new(governance).with_ledger(ledger.clone()));
    let trust = TrustWrapper::new(ledger.clone());

    let mut registry = HandlerRegistry::new();
    registry
        .register_typed(
            TaskKind::ResumeAnalysis,
            ResumeAnalysisHandler::new(gateway.clone(), trust.clone()),
        )
        .register_typed(
            TaskKind::BurnoutAssessment,
            BurnoutAssessmentHandler::new(gateway.clone(), trust.clone()),
        );
    let executor = TaskExecutor::new(
        tasks,
        registry,
        ExecutorConfig {
            max_retries: config.task_max_retries,
            ..ExecutorConfig::default()
        },
    );
    executor.spawn_worker();
    executor.spawn_sweeper(config.sweep_interval);

    let state = Arc::new(AppState {
        gateway,
        trust,
        ledger,
        executor,
        settings,
        retention_days: config.retention_days,
    });
    let app = server::router(state);
    tracing::info!("HR API listening on {}", config.listen);
    axum::serve(
        tokio::net::TcpListener::bind(config.listen).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
