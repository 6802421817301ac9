//! Change ingestion batch processor.
//!
//! On each tick the four pending queues are drained and applied to the
//! cache as one mutually-exclusive batch, in a fixed order: created →
//! changed → renamed → deleted. The order matters: a create followed by a
//! delete inside one window must net out correctly, and renames must
//! resolve before deletes that might reference a since-renamed path.

use crate::session::{QueueReceivers, RenamedPair, RootSession};
use crate::sink::EventSink;
use agekeeper_core::events::{self, Severity};
use agekeeper_core::fsobj::{self, ObjectKind};
use agekeeper_core::record::TrackedRecord;
use agekeeper_core::now_ms;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// One drained batch of raw notifications.
#[derive(Debug, Default)]
pub struct ChangeBatch {
  pub created: Vec<PathBuf>,
  pub changed: Vec<PathBuf>,
  pub renamed: Vec<RenamedPair>,
  pub deleted: Vec<PathBuf>,
}

impl ChangeBatch {
  pub fn is_empty(&self) -> bool {
    self.created.is_empty() && self.changed.is_empty() && self.renamed.is_empty() && self.deleted.is_empty()
  }
}

/// Counters from applying one batch, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
  pub created: usize,
  pub created_vanished: usize,
  pub changed: usize,
  pub changed_ignored_created: usize,
  pub changed_requeued: usize,
  pub renamed: usize,
  pub deleted: usize,
}

/// Pull everything currently queued. Non-blocking; notifications arriving
/// after the drain wait for the next batch.
pub fn drain_queues(receivers: &mut QueueReceivers) -> ChangeBatch {
  let mut batch = ChangeBatch::default();
  while let Ok(path) = receivers.created.try_recv() {
    batch.created.push(path);
  }
  while let Ok(path) = receivers.changed.try_recv() {
    batch.changed.push(path);
  }
  while let Ok(pair) = receivers.renamed.try_recv() {
    batch.renamed.push(pair);
  }
  while let Ok(path) = receivers.deleted.try_recv() {
    batch.deleted.push(path);
  }
  batch
}

/// Apply one batch to the cache in the fixed created → changed → renamed →
/// deleted order. Creates, changes, and renames touch independent paths and
/// run with bounded parallelism.
pub fn apply_batch(session: &RootSession, batch: ChangeBatch, now_ms: i64, sink: &dyn EventSink) -> BatchStats {
  let mut stats = BatchStats::default();

  let created_this_batch: HashSet<PathBuf> = batch.created.iter().cloned().collect();

  let vanished = AtomicUsize::new(0);
  batch.created.par_iter().for_each(|path| {
    if !process_created(session, path.clone(), now_ms) {
      vanished.fetch_add(1, Ordering::Relaxed);
    }
  });
  stats.created = batch.created.len();
  stats.created_vanished = vanished.into_inner();

  // De-duplicate change notifications for the same path within the batch.
  let mut seen = HashSet::new();
  let mut distinct: Vec<PathBuf> = Vec::new();
  for path in batch.changed {
    if seen.insert(path.clone()) {
      distinct.push(path);
    }
  }

  let relevant: Vec<PathBuf> = if session.settings.ignore_changed_when_created_this_batch {
    let before = distinct.len();
    let kept: Vec<PathBuf> = distinct
      .into_iter()
      .filter(|path| !created_this_batch.contains(path))
      .collect();
    stats.changed_ignored_created = before - kept.len();
    kept
  } else {
    distinct
  };

  let requeued = AtomicUsize::new(0);
  relevant.par_iter().for_each(|path| {
    if process_changed(session, path, now_ms, sink) == ChangedOutcome::Requeued {
      requeued.fetch_add(1, Ordering::Relaxed);
    }
  });
  stats.changed = relevant.len();
  stats.changed_requeued = requeued.into_inner();

  batch.renamed.par_iter().for_each(|pair| {
    process_renamed(session, pair, now_ms, sink);
  });
  stats.renamed = batch.renamed.len();

  for path in &batch.deleted {
    // Absence is benign: the object may never have been tracked, or the
    // record was already removed.
    if session.cache.remove(path).is_none() {
      debug!("delete for untracked path {}", path.display());
    }
  }
  stats.deleted = batch.deleted.len();

  stats
}

/// Resolve a created path into a fresh record. Returns false when the
/// object no longer exists by the time the batch runs.
fn process_created(session: &RootSession, path: PathBuf, now_ms: i64) -> bool {
  let record = TrackedRecord::discover(path, &session.policy(), now_ms);
  if record.kind == ObjectKind::Missing {
    debug!("created object vanished before processing: {}", record.path.display());
    return false;
  }
  session.cache.insert(record.path.clone(), record);
  true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangedOutcome {
  Updated,
  Unchanged,
  /// Record not yet in the cache but the object exists, typically a file
  /// still being written. Requeued for the next batch instead of dropped.
  Requeued,
  /// Neither record nor object; nothing to retry.
  Dropped,
  /// Change notification echoing a delete.
  DeleteEcho,
}

fn process_changed(session: &RootSession, path: &PathBuf, now_ms: i64, sink: &dyn EventSink) -> ChangedOutcome {
  let tolerance = session.settings.kind_check_tolerance_ms();

  let Some(mut entry) = session.cache.get_mut(path) else {
    if fsobj::object_kind(path) != ObjectKind::Missing {
      sink.emit(
        events::CHANGED_RECORD_PENDING,
        Severity::Info,
        &format!("change for {} arrived before its record; requeueing", path.display()),
      );
      session.queues.push_changed(path.clone());
      return ChangedOutcome::Requeued;
    }
    return ChangedOutcome::Dropped;
  };

  if entry.refresh_kind_if_stale(now_ms, tolerance) == ObjectKind::Missing {
    sink.emit(
      events::CHANGED_DELETE_ECHO,
      Severity::Info,
      &format!("change for {} is an echo of a delete", path.display()),
    );
    return ChangedOutcome::DeleteEcho;
  }

  if entry.apply_change(now_ms) {
    ChangedOutcome::Updated
  } else {
    ChangedOutcome::Unchanged
  }
}

fn process_renamed(session: &RootSession, pair: &RenamedPair, now_ms: i64, sink: &dyn EventSink) {
  match fsobj::object_kind(&pair.new) {
    ObjectKind::File => rename_record(session, &pair.old, &pair.new, now_ms),
    ObjectKind::Directory => rename_subtree(session, pair, now_ms),
    ObjectKind::Missing => {
      // Raced with a fast subsequent delete.
      sink.emit(
        events::RENAME_TARGET_MISSING,
        Severity::Warning,
        &format!("rename target vanished: {} -> {}", pair.old.display(), pair.new.display()),
      );
    }
  }
}

/// Move one record to a new key, signalling the rename to the record. With
/// no record at the old path this is a synthetic create at the new path.
fn rename_record(session: &RootSession, old: &PathBuf, new: &PathBuf, now_ms: i64) {
  match session.cache.remove(old) {
    Some((_, mut record)) => {
      record.apply_rename(new.clone(), now_ms);
      session.cache.insert(record.path.clone(), record);
    }
    None => {
      debug!("rename without record, treating as create: {}", new.display());
      process_created(session, new.clone(), now_ms);
    }
  }
}

/// Directory rename: the watch subsystem emits one notification for the
/// moved root only, so every record nested under the old prefix is
/// rewritten here as a cascade.
fn rename_subtree(session: &RootSession, pair: &RenamedPair, now_ms: i64) {
  rename_record(session, &pair.old, &pair.new, now_ms);

  let descendants: Vec<PathBuf> = session
    .cache
    .iter()
    .map(|entry| entry.key().clone())
    .filter(|key| key.starts_with(&pair.old))
    .collect();

  descendants.par_iter().for_each(|key| {
    if let Ok(relative) = key.strip_prefix(&pair.old) {
      let target = pair.new.join(relative);
      rename_record(session, key, &target, now_ms);
    }
  });
}

/// Timer shell: drains and applies batches on a fixed interval. A tick is
/// skipped while any root is bootstrapping or while the previous batch is
/// still running; the queues keep accumulating either way.
pub async fn ingest_loop(
  session: Arc<RootSession>,
  mut receivers: QueueReceivers,
  sink: Arc<dyn EventSink>,
  bootstrapping: Arc<AtomicUsize>,
  mut shutdown: broadcast::Receiver<()>,
) {
  tokio::select! {
    _ = tokio::time::sleep(Duration::from_millis(session.settings.ingest_initial_delay_ms)) => {}
    _ = shutdown.recv() => return,
  }

  let mut ticker = interval(Duration::from_millis(session.settings.ingest_interval_ms));
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = ticker.tick() => {
        if bootstrapping.load(Ordering::Acquire) > 0 {
          sink.emit(
            events::INGEST_SKIPPED_BOOTSTRAPPING,
            Severity::Info,
            &format!("batch processor {} idle while roots bootstrap", session.config_key),
          );
          continue;
        }

        let Some(guard) = session.ingest_gate.try_enter() else {
          sink.emit(
            events::INGEST_SKIPPED_BUSY,
            Severity::Info,
            &format!("batch processor {} still running, tick skipped", session.config_key),
          );
          continue;
        };

        let batch = drain_queues(&mut receivers);
        if batch.is_empty() {
          continue;
        }

        let session = Arc::clone(&session);
        let sink = Arc::clone(&sink);
        tokio::task::spawn_blocking(move || {
          let _guard = guard;
          let stats = apply_batch(&session, batch, now_ms(), sink.as_ref());
          info!(
            root = %session.config_key,
            created = stats.created,
            changed = stats.changed,
            renamed = stats.renamed,
            deleted = stats.deleted,
            requeued = stats.changed_requeued,
            "batch applied",
          );
        });
      }
      _ = shutdown.recv() => break,
    }
  }
}
