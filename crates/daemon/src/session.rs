//! Per-root session state: the concurrent record cache, the pending-event
//! queues, and the worker gates.
//!
//! The cache map is the only resource shared between the three workers; it
//! supports concurrent reads and inserts/removals on its own. The gates
//! exist purely so that two runs of the *same* worker never overlap; they
//! never serialize different workers against each other.

use agekeeper_core::config::{ConfigError, RootSettings, RootSpec};
use agekeeper_core::fsobj::{self, FsError, ObjectKind};
use agekeeper_core::record::{RecordPolicy, TrackedRecord};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SetupError {
  #[error("Root does not exist: {0}")]
  RootMissing(PathBuf),
  #[error(transparent)]
  Fs(#[from] FsError),
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
  #[error("Watch error: {0}")]
  Watch(#[from] notify::Error),
  #[error("Internal error: {0}")]
  Internal(String),
}

/// Bootstrap progression for a root. Workers only operate once `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
  Empty = 0,
  Loading = 1,
  Verifying = 2,
  Ready = 3,
}

/// Non-blocking exclusion token for one worker on one root.
///
/// A tick either takes the gate immediately or abandons the run entirely;
/// nothing ever queues behind a held gate. Modelled as an explicit
/// idle/running flag rather than a lock so tests can observe it.
#[derive(Clone, Default)]
pub struct WorkerGate {
  running: Arc<AtomicBool>,
}

impl WorkerGate {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take the gate if it is idle. The returned guard releases on drop and
  /// may be moved into a blocking task.
  pub fn try_enter(&self) -> Option<GateGuard> {
    self
      .running
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| GateGuard {
        running: Arc::clone(&self.running),
      })
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }
}

pub struct GateGuard {
  running: Arc<AtomicBool>,
}

impl Drop for GateGuard {
  fn drop(&mut self) {
    self.running.store(false, Ordering::Release);
  }
}

/// A rename notification carries both ends of the move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedPair {
  pub old: PathBuf,
  pub new: PathBuf,
}

/// Senders for the four per-root pending-event queues. Appending must stay
/// cheap and non-blocking: the watcher invokes these from its own callback
/// thread.
#[derive(Clone)]
pub struct PendingQueues {
  created: mpsc::UnboundedSender<PathBuf>,
  changed: mpsc::UnboundedSender<PathBuf>,
  deleted: mpsc::UnboundedSender<PathBuf>,
  renamed: mpsc::UnboundedSender<RenamedPair>,
}

impl PendingQueues {
  pub fn push_created(&self, path: PathBuf) {
    let _ = self.created.send(path);
  }

  pub fn push_changed(&self, path: PathBuf) {
    let _ = self.changed.send(path);
  }

  pub fn push_deleted(&self, path: PathBuf) {
    let _ = self.deleted.send(path);
  }

  pub fn push_renamed(&self, old: PathBuf, new: PathBuf) {
    let _ = self.renamed.send(RenamedPair { old, new });
  }
}

/// Receive halves of the queues, owned by the ingestion worker.
pub struct QueueReceivers {
  pub created: mpsc::UnboundedReceiver<PathBuf>,
  pub changed: mpsc::UnboundedReceiver<PathBuf>,
  pub deleted: mpsc::UnboundedReceiver<PathBuf>,
  pub renamed: mpsc::UnboundedReceiver<RenamedPair>,
}

/// Everything one monitored root owns.
pub struct RootSession {
  /// The path-and-suffix part of the configured root line. Persisted cache
  /// filenames derive from this, so it is stable across restarts.
  pub config_key: String,
  pub root: PathBuf,
  pub recursive: bool,
  pub settings: RootSettings,
  /// Invariants: every key equals its record's `path`; no two live records
  /// share a path; a `Missing` kind appears only transiently before the
  /// record is removed.
  pub cache: DashMap<PathBuf, TrackedRecord>,
  pub queues: PendingQueues,
  state: AtomicU8,
  pub ingest_gate: WorkerGate,
  pub aging_gate: WorkerGate,
  pub persist_gate: WorkerGate,
}

impl RootSession {
  /// Build a session from a parsed root line. The root must exist; a
  /// malformed or vanished root aborts setup for this root only.
  pub fn new(spec: RootSpec) -> Result<(Arc<Self>, QueueReceivers), SetupError> {
    if fsobj::object_kind(&spec.root) == ObjectKind::Missing {
      return Err(SetupError::RootMissing(spec.root));
    }

    let (created_tx, created_rx) = mpsc::unbounded_channel();
    let (changed_tx, changed_rx) = mpsc::unbounded_channel();
    let (deleted_tx, deleted_rx) = mpsc::unbounded_channel();
    let (renamed_tx, renamed_rx) = mpsc::unbounded_channel();

    let session = Arc::new(Self {
      config_key: spec.config_key,
      root: spec.root,
      recursive: spec.recursive,
      settings: spec.settings,
      cache: DashMap::new(),
      queues: PendingQueues {
        created: created_tx,
        changed: changed_tx,
        deleted: deleted_tx,
        renamed: renamed_tx,
      },
      state: AtomicU8::new(SessionState::Empty as u8),
      ingest_gate: WorkerGate::new(),
      aging_gate: WorkerGate::new(),
      persist_gate: WorkerGate::new(),
    });

    let receivers = QueueReceivers {
      created: created_rx,
      changed: changed_rx,
      deleted: deleted_rx,
      renamed: renamed_rx,
    };

    Ok((session, receivers))
  }

  pub fn state(&self) -> SessionState {
    match self.state.load(Ordering::Acquire) {
      0 => SessionState::Empty,
      1 => SessionState::Loading,
      2 => SessionState::Verifying,
      _ => SessionState::Ready,
    }
  }

  pub fn set_state(&self, state: SessionState) {
    self.state.store(state as u8, Ordering::Release);
  }

  /// Reset policy and hash configuration stamped onto new records.
  pub fn policy(&self) -> RecordPolicy {
    RecordPolicy::from(&self.settings)
  }

  /// Where this root's cache is persisted. The filename hashes the root's
  /// configuration string and carries the algorithm name, so distinct
  /// roots and distinct algorithm choices never collide.
  pub fn cache_file_path(&self, state_dir: &Path) -> PathBuf {
    let stem = fsobj::string_fingerprint(&self.config_key, self.settings.algorithm);
    state_dir.join(format!("{stem}.{}", self.settings.algorithm.name()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use agekeeper_core::config::RootSettings;
  use tempfile::TempDir;

  fn spec_for(dir: &TempDir, overrides: &str) -> RootSpec {
    let line = format!("{}/...{overrides}", dir.path().display());
    RootSpec::parse(&line, &RootSettings::default()).unwrap()
  }

  #[test]
  fn missing_root_aborts_setup() {
    let spec = RootSpec::parse("/definitely/not/here", &RootSettings::default()).unwrap();
    assert!(matches!(RootSession::new(spec), Err(SetupError::RootMissing(_))));
  }

  #[test]
  fn gate_excludes_second_entry_until_released() {
    let gate = WorkerGate::new();
    let guard = gate.try_enter().expect("gate starts idle");
    assert!(gate.is_running());
    assert!(gate.try_enter().is_none());
    drop(guard);
    assert!(!gate.is_running());
    assert!(gate.try_enter().is_some());
  }

  #[test]
  fn session_starts_empty_and_tracks_state() {
    let dir = TempDir::new().unwrap();
    let (session, _rx) = RootSession::new(spec_for(&dir, "")).unwrap();
    assert_eq!(session.state(), SessionState::Empty);
    session.set_state(SessionState::Ready);
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.cache.is_empty());
    assert!(session.recursive);
  }

  #[test]
  fn cache_filenames_vary_by_root_and_algorithm() {
    let dir = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();

    let (fast, _rx) = RootSession::new(spec_for(&dir, "")).unwrap();
    let (sha1, _rx) = RootSession::new(spec_for(&dir, "|algorithm:sha1")).unwrap();
    let path_fast = fast.cache_file_path(state.path());
    let path_sha1 = sha1.cache_file_path(state.path());

    assert_ne!(path_fast, path_sha1);
    assert!(path_fast.to_string_lossy().ends_with(".fast"));
    assert!(path_sha1.to_string_lossy().ends_with(".sha1"));
    assert_eq!(path_sha1.extension().unwrap(), "sha1");
  }

  #[test]
  fn queue_pushes_survive_until_drained() {
    let dir = TempDir::new().unwrap();
    let (session, mut rx) = RootSession::new(spec_for(&dir, "")).unwrap();

    session.queues.push_created(PathBuf::from("/a"));
    session.queues.push_renamed(PathBuf::from("/a"), PathBuf::from("/b"));

    assert_eq!(rx.created.try_recv().unwrap(), PathBuf::from("/a"));
    assert_eq!(
      rx.renamed.try_recv().unwrap(),
      RenamedPair {
        old: PathBuf::from("/a"),
        new: PathBuf::from("/b"),
      }
    );
  }
}
