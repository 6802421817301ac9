//! Event codes and severities for the structured event sink.
//!
//! Every significant state transition and fault is reported with a unique
//! numeric code so operators can alert on specific conditions without
//! parsing message text. Codes are grouped by subsystem:
//!
//! - 1xx  service and root setup
//! - 2xx  bootstrap and reconciliation
//! - 3xx  ingestion batch processor
//! - 4xx  aging sweep
//! - 5xx  cache persistence
//! - 6xx  filesystem watch
//! - 9xx  configuration

use serde::{Deserialize, Serialize};

pub type EventCode = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Info,
  Warning,
  Error,
}

impl std::fmt::Display for Severity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Severity::Info => f.write_str("info"),
      Severity::Warning => f.write_str("warning"),
      Severity::Error => f.write_str("error"),
    }
  }
}

// Service and root setup.
pub const SERVICE_STARTING: EventCode = 100;
pub const SERVICE_STOPPING: EventCode = 101;
pub const ROOT_SETUP_FAILED: EventCode = 110;

// Bootstrap and reconciliation.
pub const BOOTSTRAP_START: EventCode = 200;
pub const BOOTSTRAP_COMPLETE: EventCode = 201;
pub const CACHE_FILE_STALE: EventCode = 210;
pub const CACHE_FILE_LOADED: EventCode = 211;
pub const CACHE_FILE_UNREADABLE: EventCode = 212;
pub const RECONCILE_REMOVED_DEAD: EventCode = 220;
pub const RECONCILE_ADDED_NEW: EventCode = 221;
pub const RECONCILE_MISMATCH_REBUILD: EventCode = 222;
pub const SINGLE_FILE_CACHE_INVALID: EventCode = 223;

// Ingestion batch processor.
pub const INGEST_SKIPPED_BOOTSTRAPPING: EventCode = 300;
pub const INGEST_SKIPPED_BUSY: EventCode = 301;
pub const CHANGED_RECORD_PENDING: EventCode = 310;
pub const CHANGED_DELETE_ECHO: EventCode = 311;
pub const RENAME_TARGET_MISSING: EventCode = 312;

// Aging sweep.
pub const AGING_SKIPPED_BOOTSTRAPPING: EventCode = 400;
pub const AGING_SKIPPED_BUSY: EventCode = 401;
pub const AGING_ROOT_MISSING: EventCode = 402;
pub const AGED_FILE_DELETED: EventCode = 410;
pub const AGED_FILE_DELETE_FAILED: EventCode = 411;
pub const AGED_FILE_KEPT_BY_GROUP: EventCode = 412;
pub const AGED_DIR_DELETED: EventCode = 413;
pub const AGED_DIR_DELETE_FAILED: EventCode = 414;
pub const AGED_DIR_WINDOW_RESET: EventCode = 415;
pub const AGED_RECORD_MISSING: EventCode = 416;

// Cache persistence.
pub const PERSIST_SKIPPED_BUSY: EventCode = 500;
pub const PERSIST_FAILED: EventCode = 501;

// Filesystem watch.
pub const WATCH_ERROR: EventCode = 600;
pub const WATCH_OVERFLOW: EventCode = 601;

// Configuration.
pub const CONFIG_BAD_ALGORITHM: EventCode = 900;
pub const CONFIG_UNKNOWN_OVERRIDE: EventCode = 901;
pub const CONFIG_BAD_OVERRIDE_VALUE: EventCode = 902;
