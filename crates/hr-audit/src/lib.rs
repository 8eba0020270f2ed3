//! Audit ledger: append-only, tenant-scoped record of state changes and AI actions.

mod ledger;
mod memory;
mod sanitize;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use hr_types::{
    AuditEntry, AuditQuery, AuditStore, AuditStoreError, GovernanceLogEntry, GovernanceStore,
    GovernanceStoreError, RetentionReport,
};
pub use ledger::{AuditLedger, AuditRecord, RetentionError, DEFAULT_RETENTION_DAYS};
pub use memory::InMemoryAuditStore;
pub use sanitize::{plainify, sanitize, SanitizeError, MAX_DEPTH};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAuditStore;
