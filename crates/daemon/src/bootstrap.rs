//! Bootstrap and reconciliation for a root session.
//!
//! The cache comes from two disagreeing sources: a possibly-stale on-disk
//! snapshot and the live filesystem. Bootstrap walks the session through
//! `Empty → Loading → Verifying → Ready`, reconciling the two or, when
//! they cannot be reconciled, discarding history and rebuilding from a
//! full scan. Guessing is never an option: an unrecoverable cache means
//! every object is considered new.

use crate::persist;
use crate::session::{RootSession, SessionState, SetupError};
use crate::sink::EventSink;
use agekeeper_core::events::{self, Severity};
use agekeeper_core::fsobj::{self, ObjectKind};
use agekeeper_core::now_ms;
use agekeeper_core::record::TrackedRecord;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What bootstrap did, for logging and tests.
#[derive(Debug, Default)]
pub struct BootstrapReport {
  /// True when history was discarded and the cache rebuilt from a scan.
  pub rebuilt: bool,
  /// Entries deserialized from the snapshot, when one was used.
  pub loaded: usize,
  /// Records removed because their object no longer exists.
  pub removed_dead: usize,
  /// Fresh records added for objects missing from the snapshot.
  pub added_new: usize,
  /// Cache size once the session reached `Ready`.
  pub final_entries: usize,
}

/// Bring a session from `Empty` to `Ready`.
pub fn initialize(session: &RootSession, state_dir: &Path, sink: &dyn EventSink) -> Result<BootstrapReport, SetupError> {
  let now = now_ms();
  let mut report = BootstrapReport::default();

  session.set_state(SessionState::Loading);
  sink.emit(
    events::BOOTSTRAP_START,
    Severity::Info,
    &format!("bootstrap start for {}", session.config_key),
  );

  match load_snapshot_if_fresh(session, state_dir, sink) {
    None => {
      rebuild(session, now)?;
      report.rebuilt = true;
    }
    Some(map) => {
      report.loaded = map.len();
      for (path, record) in map {
        session.cache.insert(path, record);
      }

      session.set_state(SessionState::Verifying);
      if !verify(session, now, &mut report, sink)? {
        session.cache.clear();
        rebuild(session, now)?;
        report.rebuilt = true;
      }
    }
  }

  report.final_entries = session.cache.len();
  session.set_state(SessionState::Ready);
  sink.emit(
    events::BOOTSTRAP_COMPLETE,
    Severity::Info,
    &format!(
      "bootstrap complete for {} - {} entries{}",
      session.config_key,
      report.final_entries,
      if report.rebuilt { " (rebuilt)" } else { "" }
    ),
  );

  Ok(report)
}

/// Load the persisted snapshot unless it is absent, older than the
/// configured threshold, or unreadable. A stale snapshot is not even
/// deserialized, since its ages are no longer trustworthy.
fn load_snapshot_if_fresh(
  session: &RootSession,
  state_dir: &Path,
  sink: &dyn EventSink,
) -> Option<BTreeMap<PathBuf, TrackedRecord>> {
  let path = session.cache_file_path(state_dir);
  let metadata = std::fs::metadata(&path).ok()?;
  let modified = metadata.modified().ok()?;
  let age_days = modified.elapsed().unwrap_or_default().as_secs_f64() / 86_400.0;

  if age_days > session.settings.cache_stale_days {
    sink.emit(
      events::CACHE_FILE_STALE,
      Severity::Warning,
      &format!(
        "cache for {} is {age_days:.1} days old, rebuilding",
        session.config_key
      ),
    );
    return None;
  }

  match persist::read_snapshot(&path) {
    Ok(map) => {
      sink.emit(
        events::CACHE_FILE_LOADED,
        Severity::Info,
        &format!("loaded {} cached entries for {}", map.len(), session.config_key),
      );
      Some(map)
    }
    Err(e) => {
      sink.emit(
        events::CACHE_FILE_UNREADABLE,
        Severity::Warning,
        &format!("cache for {} unreadable, rebuilding: {e}", session.config_key),
      );
      None
    }
  }
}

/// Full rebuild: enumerate the root and create a fresh record per object,
/// every preservation window starting now.
fn rebuild(session: &RootSession, now_ms: i64) -> Result<(), SetupError> {
  let kind = fsobj::object_kind(&session.root);
  let entries = fsobj::list_entries(&session.root, kind, session.recursive, true, true)?;

  let policy = session.policy();
  let records: Vec<TrackedRecord> = entries
    .into_par_iter()
    .map(|path| TrackedRecord::discover(path, &policy, now_ms))
    .collect();

  for record in records {
    session.cache.insert(record.path.clone(), record);
  }
  Ok(())
}

/// Reconcile a deserialized cache against live filesystem state. Returns
/// false when the cache is unrecoverable and must be rebuilt.
fn verify(session: &RootSession, now_ms: i64, report: &mut BootstrapReport, sink: &dyn EventSink) -> Result<bool, SetupError> {
  match fsobj::object_kind(&session.root) {
    ObjectKind::File => {
      let valid = session.cache.len() == 1 && session.cache.contains_key(&session.root);
      if !valid {
        sink.emit(
          events::SINGLE_FILE_CACHE_INVALID,
          Severity::Warning,
          &format!("single-file cache for {} does not match its root", session.config_key),
        );
      }
      Ok(valid)
    }
    ObjectKind::Directory => {
      // (a) drop records whose object no longer exists.
      let dead: Vec<PathBuf> = session
        .cache
        .iter()
        .filter(|entry| fsobj::object_kind(entry.key()) == ObjectKind::Missing)
        .map(|entry| entry.key().clone())
        .collect();
      for path in &dead {
        session.cache.remove(path);
      }
      report.removed_dead = dead.len();
      if !dead.is_empty() {
        sink.emit(
          events::RECONCILE_REMOVED_DEAD,
          Severity::Info,
          &format!("{} removed {} records for vanished objects", session.config_key, dead.len()),
        );
      }

      // (b) add fresh records for live objects the snapshot never saw.
      let live = fsobj::list_entries(&session.root, ObjectKind::Directory, session.recursive, true, true)?;
      let policy = session.policy();
      let fresh: Vec<TrackedRecord> = live
        .par_iter()
        .filter(|path| !session.cache.contains_key(*path))
        .map(|path| TrackedRecord::discover(path.clone(), &policy, now_ms))
        .collect();
      report.added_new = fresh.len();
      if !fresh.is_empty() {
        sink.emit(
          events::RECONCILE_ADDED_NEW,
          Severity::Info,
          &format!("{} added {} records missing from cache", session.config_key, fresh.len()),
        );
      }
      for record in fresh {
        session.cache.insert(record.path.clone(), record);
      }

      // (c) any remaining disagreement means the cache cannot be trusted.
      if live.len() != session.cache.len() {
        sink.emit(
          events::RECONCILE_MISMATCH_REBUILD,
          Severity::Error,
          &format!(
            "could not reconcile {} ({} live vs {} cached), rebuilding - all objects considered new",
            session.config_key,
            live.len(),
            session.cache.len()
          ),
        );
        return Ok(false);
      }

      Ok(true)
    }
    ObjectKind::Missing => Err(SetupError::RootMissing(session.root.clone())),
  }
}
