//! Cache persistence: periodic serialization of the record map.
//!
//! Each root's map is written as one JSON document so the engine can
//! resume after a restart without losing or duplicating age information.
//! A failed write is logged and retried on the next interval; it never
//! blocks or crashes the root.

use crate::session::RootSession;
use crate::sink::EventSink;
use agekeeper_core::events::{self, Severity};
use agekeeper_core::record::TrackedRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::debug;

#[derive(Error, Debug)]
pub enum PersistError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

/// Serialize the full cache map for a session. Returns the entry count.
pub fn write_snapshot(session: &RootSession, state_dir: &Path) -> Result<usize, PersistError> {
  let map: BTreeMap<PathBuf, TrackedRecord> = session
    .cache
    .iter()
    .map(|entry| (entry.key().clone(), entry.value().clone()))
    .collect();

  let json = serde_json::to_string(&map)?;
  std::fs::write(session.cache_file_path(state_dir), json)?;
  Ok(map.len())
}

/// Read a previously persisted snapshot.
pub fn read_snapshot(path: &Path) -> Result<BTreeMap<PathBuf, TrackedRecord>, PersistError> {
  Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// Timer shell: persists the cache on a fixed interval, gated against its
/// own previous run only; aging and persistence may overlap freely.
pub async fn persist_loop(
  session: Arc<RootSession>,
  state_dir: PathBuf,
  sink: Arc<dyn EventSink>,
  mut shutdown: broadcast::Receiver<()>,
) {
  let period = Duration::from_millis(session.settings.persist_interval_ms);
  tokio::select! {
    _ = tokio::time::sleep(period) => {}
    _ = shutdown.recv() => return,
  }

  let mut ticker = interval(period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        let Some(guard) = session.persist_gate.try_enter() else {
          sink.emit(
            events::PERSIST_SKIPPED_BUSY,
            Severity::Info,
            &format!("persistence worker {} still running, tick skipped", session.config_key),
          );
          continue;
        };

        let session = Arc::clone(&session);
        let sink = Arc::clone(&sink);
        let state_dir = state_dir.clone();
        tokio::task::spawn_blocking(move || {
          let _guard = guard;
          match write_snapshot(&session, &state_dir) {
            Ok(count) => debug!(root = %session.config_key, entries = count, "cache persisted"),
            Err(e) => {
              sink.emit(
                events::PERSIST_FAILED,
                Severity::Warning,
                &format!("could not persist cache for {}: {e}", session.config_key),
              );
            }
          }
        });
      }
      _ = shutdown.recv() => break,
    }
  }
}
