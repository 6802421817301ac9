//! Aging sweep: deletes objects whose preservation window has elapsed.
//!
//! A sweep computes a single cutoff, walks the cache for records older
//! than it that sit deeper than the preservation depth, and dispatches on
//! object kind. Deletion failures are never fatal; the record stays put
//! and the next sweep retries.

use crate::session::RootSession;
use crate::sink::EventSink;
use agekeeper_core::events::{self, Severity};
use agekeeper_core::fsobj::{self, ObjectKind};
use agekeeper_core::now_ms;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

/// Counters from one sweep, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
  pub examined: usize,
  pub files_deleted: usize,
  pub files_failed: usize,
  pub kept_by_group: usize,
  pub dirs_deleted: usize,
  pub dirs_failed: usize,
  pub dirs_reset: usize,
  pub missing: usize,
}

/// Run one aging sweep against the cache with an explicit `now`.
pub fn run_sweep(session: &RootSession, now_ms: i64, sink: &dyn EventSink) -> SweepStats {
  let mut stats = SweepStats::default();
  let settings = &session.settings;

  if !settings.allow_aging {
    return stats;
  }

  let cutoff = now_ms - settings.retention_window_ms();

  // Snapshot eligible paths first so per-record work never holds the map
  // iterator. Depth 1 is an immediate child; eligibility requires depth
  // strictly greater than the configured preservation depth.
  let candidates: Vec<PathBuf> = session
    .cache
    .iter()
    .filter(|entry| entry.value().preserved_since_ms < cutoff)
    .filter(|entry| {
      entry
        .value()
        .depth_below(&session.root)
        .is_some_and(|depth| depth > settings.preservation_depth)
    })
    .map(|entry| entry.key().clone())
    .collect();

  // Group mode needs the newest sibling file per directory. One pass over
  // the cache up front replaces the original per-candidate rescan; results
  // are identical because deletions never move preservation starts.
  let group_newest: Option<HashMap<PathBuf, i64>> = settings.delete_contents_as_group.then(|| {
    let mut newest: HashMap<PathBuf, i64> = HashMap::new();
    for entry in session.cache.iter() {
      if entry.value().kind != ObjectKind::File {
        continue;
      }
      if let Some(parent) = entry.key().parent() {
        let slot = newest.entry(parent.to_path_buf()).or_insert(i64::MIN);
        *slot = (*slot).max(entry.value().preserved_since_ms);
      }
    }
    newest
  });

  for path in candidates {
    stats.examined += 1;

    let Some(mut entry) = session.cache.get_mut(&path) else {
      // Removed by the batch processor since the snapshot.
      continue;
    };

    let kind = entry.refresh_kind_if_stale(now_ms, settings.kind_check_tolerance_ms());
    if entry.preserved_since_ms >= cutoff {
      // The refresh reset the window; the object is no longer aged.
      continue;
    }

    match kind {
      ObjectKind::File => {
        drop(entry);

        if let Some(newest) = &group_newest {
          let newest_sibling = path
            .parent()
            .and_then(|parent| newest.get(parent).copied())
            .unwrap_or(i64::MIN);
          if newest_sibling >= cutoff {
            stats.kept_by_group += 1;
            sink.emit(
              events::AGED_FILE_KEPT_BY_GROUP,
              Severity::Info,
              &format!("{} aged but a sibling is still preserved", path.display()),
            );
            continue;
          }
        }

        match std::fs::remove_file(&path) {
          Ok(()) => {
            stats.files_deleted += 1;
            sink.emit(
              events::AGED_FILE_DELETED,
              Severity::Info,
              &format!(
                "deleted file {} - older than {}min",
                path.display(),
                settings.retention_minutes
              ),
            );
            // The record stays; the watcher's delete notification removes it.
          }
          Err(e) => {
            stats.files_failed += 1;
            sink.emit(
              events::AGED_FILE_DELETE_FAILED,
              Severity::Error,
              &format!("could not delete aged file {}: {e}", path.display()),
            );
          }
        }
      }
      ObjectKind::Directory => {
        if settings.never_delete_directories {
          if settings.reset_expired_directories {
            // Stops this directory from being re-examined every sweep.
            // Turning never-delete off later costs one retention window
            // before the directory ages out again.
            entry.preserved_since_ms = now_ms;
            stats.dirs_reset += 1;
            drop(entry);
            sink.emit(
              events::AGED_DIR_WINDOW_RESET,
              Severity::Info,
              &format!("reset preservation on directory {}", path.display()),
            );
          }
          continue;
        }

        drop(entry);
        let contents = match fsobj::list_entries(&path, ObjectKind::Directory, true, true, true) {
          Ok(contents) => contents,
          // Vanished since the kind check; the next sweep sees it as missing.
          Err(_) => continue,
        };
        if !contents.is_empty() {
          // Non-empty directories age out naturally once their children go.
          continue;
        }

        match std::fs::remove_dir(&path) {
          Ok(()) => {
            stats.dirs_deleted += 1;
            sink.emit(
              events::AGED_DIR_DELETED,
              Severity::Info,
              &format!(
                "deleted empty directory {} - older than {}min",
                path.display(),
                settings.retention_minutes
              ),
            );
          }
          Err(e) => {
            stats.dirs_failed += 1;
            sink.emit(
              events::AGED_DIR_DELETE_FAILED,
              Severity::Error,
              &format!("could not delete aged directory {}: {e}", path.display()),
            );
          }
        }
      }
      ObjectKind::Missing => {
        stats.missing += 1;
        sink.emit(
          events::AGED_RECORD_MISSING,
          Severity::Info,
          &format!("aged record {} no longer exists on disk", path.display()),
        );
      }
    }
  }

  stats
}

/// Timer shell: runs sweeps on a fixed interval. A tick is skipped while
/// any root is bootstrapping, when the root cannot be located, or while a
/// previous sweep still holds the gate.
pub async fn aging_loop(
  session: Arc<RootSession>,
  sink: Arc<dyn EventSink>,
  bootstrapping: Arc<AtomicUsize>,
  mut shutdown: broadcast::Receiver<()>,
) {
  tokio::select! {
    _ = tokio::time::sleep(Duration::from_millis(session.settings.aging_initial_delay_ms)) => {}
    _ = shutdown.recv() => return,
  }

  let mut ticker = interval(Duration::from_millis(session.settings.aging_interval_ms));
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        if bootstrapping.load(Ordering::Acquire) > 0 {
          sink.emit(
            events::AGING_SKIPPED_BOOTSTRAPPING,
            Severity::Info,
            &format!("aging worker {} idle while roots bootstrap", session.config_key),
          );
          continue;
        }

        if fsobj::object_kind(&session.root) == ObjectKind::Missing {
          sink.emit(
            events::AGING_ROOT_MISSING,
            Severity::Warning,
            &format!("aging worker cannot locate root {}", session.root.display()),
          );
          continue;
        }

        let Some(guard) = session.aging_gate.try_enter() else {
          sink.emit(
            events::AGING_SKIPPED_BUSY,
            Severity::Info,
            &format!("aging worker {} still running, tick skipped", session.config_key),
          );
          continue;
        };

        let session = Arc::clone(&session);
        let sink = Arc::clone(&sink);
        tokio::task::spawn_blocking(move || {
          let _guard = guard;
          let stats = run_sweep(&session, now_ms(), sink.as_ref());
          if stats.examined > 0 {
            info!(
              root = %session.config_key,
              examined = stats.examined,
              files_deleted = stats.files_deleted,
              dirs_deleted = stats.dirs_deleted,
              kept_by_group = stats.kept_by_group,
              failed = stats.files_failed + stats.dirs_failed,
              "aging sweep complete",
            );
          }
        });
      }
      _ = shutdown.recv() => break,
    }
  }
}
