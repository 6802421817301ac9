//! The unit of tracked state for one filesystem object.
//!
//! A record carries its own reset policy and hash configuration, copied
//! from the owning root at creation, so it can recompute itself without a
//! reference back to configuration. Every field round-trips through the
//! persisted cache document; resuming from disk must not lose or invent
//! age information.

use crate::config::{HashAlgorithm, RootSettings};
use crate::fsobj::{self, ObjectKind, UNREADABLE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reset policy and hash configuration stamped onto each record.
#[derive(Debug, Clone, Copy)]
pub struct RecordPolicy {
  pub reset_on_kind_change: bool,
  pub reset_on_fingerprint_change: bool,
  pub reset_on_rename: bool,
  pub algorithm: HashAlgorithm,
  pub hash_directory_contents: bool,
}

impl From<&RootSettings> for RecordPolicy {
  fn from(settings: &RootSettings) -> Self {
    Self {
      reset_on_kind_change: settings.reset_on_kind_change,
      reset_on_fingerprint_change: settings.reset_on_fingerprint_change,
      reset_on_rename: settings.reset_on_rename,
      algorithm: settings.algorithm,
      hash_directory_contents: settings.hash_directory_contents,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRecord {
  /// Current full path; rewritten on rename. Always equals the cache key.
  pub path: PathBuf,
  pub kind: ObjectKind,
  /// Empty iff `kind` is `Missing`, or `kind` is `Directory` and
  /// whole-directory hashing is disabled.
  pub fingerprint: String,
  /// When the preservation window last started, epoch milliseconds. Never
  /// decreases; only an enabled reset policy moves it forward.
  pub preserved_since_ms: i64,
  /// When the kind was last re-derived from disk.
  pub last_kind_check_ms: i64,
  pub reset_on_kind_change: bool,
  pub reset_on_fingerprint_change: bool,
  pub reset_on_rename: bool,
  pub algorithm: HashAlgorithm,
  pub hash_directory_contents: bool,
}

impl TrackedRecord {
  /// Build a record by inspecting the object on disk right now.
  pub fn discover(path: PathBuf, policy: &RecordPolicy, now_ms: i64) -> Self {
    let kind = fsobj::object_kind(&path);
    let fingerprint = fsobj::fingerprint(&path, kind, policy.algorithm, policy.hash_directory_contents);

    Self {
      path,
      kind,
      fingerprint,
      preserved_since_ms: now_ms,
      last_kind_check_ms: now_ms,
      reset_on_kind_change: policy.reset_on_kind_change,
      reset_on_fingerprint_change: policy.reset_on_fingerprint_change,
      reset_on_rename: policy.reset_on_rename,
      algorithm: policy.algorithm,
      hash_directory_contents: policy.hash_directory_contents,
    }
  }

  /// Re-derive the kind from disk when the last check is older than the
  /// tolerance, recomputing the fingerprint (and applying the kind-change
  /// reset policy) when the kind actually changed. Returns the current
  /// kind either way.
  ///
  /// Callers that need the freshest state (the batch processor and the
  /// aging sweep) invoke this explicitly; nothing mutates behind a read.
  pub fn refresh_kind_if_stale(&mut self, now_ms: i64, tolerance_ms: i64) -> ObjectKind {
    if now_ms - self.last_kind_check_ms > tolerance_ms {
      let current = fsobj::object_kind(&self.path);
      if current != self.kind {
        self.kind = current;
        self.fingerprint = fsobj::fingerprint(&self.path, current, self.algorithm, self.hash_directory_contents);
        if self.reset_on_kind_change {
          self.preserved_since_ms = now_ms;
        }
      }
      self.last_kind_check_ms = now_ms;
    }
    self.kind
  }

  /// Recompute the fingerprint after a change notification. Returns true
  /// when a genuine content change was recorded. An unreadable file is not
  /// a change; the next cycle retries it.
  pub fn apply_change(&mut self, now_ms: i64) -> bool {
    let new = fsobj::fingerprint(&self.path, self.kind, self.algorithm, self.hash_directory_contents);
    if new == self.fingerprint || new == UNREADABLE {
      return false;
    }

    if self.reset_on_fingerprint_change {
      self.preserved_since_ms = now_ms;
    }
    self.fingerprint = new;
    true
  }

  /// Rewrite the path after a rename, applying the rename reset policy.
  pub fn apply_rename(&mut self, new_path: PathBuf, now_ms: i64) {
    self.path = new_path;
    if self.reset_on_rename {
      self.preserved_since_ms = now_ms;
    }
  }

  /// Path-segment distance below the owning root; see [`fsobj::depth_below`].
  pub fn depth_below(&self, root: &Path) -> Option<usize> {
    fsobj::depth_below(root, &self.path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn policy() -> RecordPolicy {
    RecordPolicy::from(&RootSettings::default())
  }

  #[test]
  fn discover_file_has_fingerprint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"hello").unwrap();

    let record = TrackedRecord::discover(path.clone(), &policy(), 1_000);
    assert_eq!(record.kind, ObjectKind::File);
    assert_eq!(record.path, path);
    assert!(!record.fingerprint.is_empty());
    assert_eq!(record.preserved_since_ms, 1_000);
    assert_eq!(record.last_kind_check_ms, 1_000);
  }

  #[test]
  fn discover_directory_without_whole_hash_is_empty() {
    let dir = TempDir::new().unwrap();
    let record = TrackedRecord::discover(dir.path().to_path_buf(), &policy(), 1_000);
    assert_eq!(record.kind, ObjectKind::Directory);
    assert_eq!(record.fingerprint, "");
  }

  #[test]
  fn discover_missing_is_empty() {
    let record = TrackedRecord::discover(PathBuf::from("/definitely/not/here"), &policy(), 1_000);
    assert_eq!(record.kind, ObjectKind::Missing);
    assert_eq!(record.fingerprint, "");
  }

  #[test]
  fn change_resets_window_when_policy_enabled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"v1").unwrap();

    let mut record = TrackedRecord::discover(path.clone(), &policy(), 1_000);
    fs::write(&path, b"v2").unwrap();

    assert!(record.apply_change(5_000));
    assert_eq!(record.preserved_since_ms, 5_000);
  }

  #[test]
  fn change_without_reset_policy_keeps_window() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"v1").unwrap();

    let mut p = policy();
    p.reset_on_fingerprint_change = false;
    let mut record = TrackedRecord::discover(path.clone(), &p, 1_000);
    fs::write(&path, b"v2").unwrap();

    assert!(record.apply_change(5_000));
    assert_eq!(record.preserved_since_ms, 1_000);
  }

  #[test]
  fn unchanged_content_is_not_a_change() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"same").unwrap();

    let mut record = TrackedRecord::discover(path, &policy(), 1_000);
    assert!(!record.apply_change(5_000));
    assert_eq!(record.preserved_since_ms, 1_000);
  }

  #[test]
  fn rename_reset_follows_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"x").unwrap();

    let mut p = policy();
    p.reset_on_rename = true;
    let mut record = TrackedRecord::discover(path, &p, 1_000);
    record.apply_rename(dir.path().join("b.txt"), 9_000);
    assert_eq!(record.path, dir.path().join("b.txt"));
    assert_eq!(record.preserved_since_ms, 9_000);

    let mut record = TrackedRecord::discover(dir.path().join("b.txt"), &policy(), 1_000);
    record.apply_rename(dir.path().join("c.txt"), 9_000);
    assert_eq!(record.preserved_since_ms, 1_000);
  }

  #[test]
  fn kind_check_is_rate_limited() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"x").unwrap();

    let mut record = TrackedRecord::discover(path.clone(), &policy(), 1_000);
    fs::remove_file(&path).unwrap();

    // Inside the tolerance the cached kind is trusted.
    assert_eq!(record.refresh_kind_if_stale(2_000, 60_000), ObjectKind::File);
    // Outside it, the kind is re-derived and the fingerprint cleared.
    assert_eq!(record.refresh_kind_if_stale(120_000, 60_000), ObjectKind::Missing);
    assert_eq!(record.fingerprint, "");
    assert_eq!(record.last_kind_check_ms, 120_000);
  }

  #[test]
  fn kind_change_reset_follows_policy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("thing");
    fs::write(&path, b"x").unwrap();

    let mut record = TrackedRecord::discover(path.clone(), &policy(), 1_000);
    fs::remove_file(&path).unwrap();
    fs::create_dir(&path).unwrap();

    record.refresh_kind_if_stale(120_000, 60_000);
    assert_eq!(record.kind, ObjectKind::Directory);
    assert_eq!(record.preserved_since_ms, 120_000);
  }

  #[test]
  fn serde_round_trips_every_field() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, b"payload").unwrap();

    let mut p = policy();
    p.reset_on_rename = true;
    p.algorithm = HashAlgorithm::Md5;
    let record = TrackedRecord::discover(path, &p, 123_456);

    let json = serde_json::to_string(&record).unwrap();
    let back: TrackedRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
    assert_eq!(back.algorithm, HashAlgorithm::Md5);
    assert!(back.reset_on_rename);
    assert_eq!(back.preserved_since_ms, 123_456);
  }
}
