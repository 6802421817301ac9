//! Integration tests for the aging/eviction sweep.
//!
//! Sweeps take an explicit `now`, so retention windows are exercised with
//! synthetic clocks instead of real waiting.

mod common;

use agekeeper_core::events;
use agekeeper_core::record::TrackedRecord;
use common::{CaptureSink, session_with};
use daemon::aging::run_sweep;
use daemon::session::RootSession;
use std::fs;
use std::path::Path;
use std::sync::Arc;

const MINUTE_MS: i64 = 60_000;

/// Insert a record for an on-disk object with a chosen preservation start.
fn track(session: &Arc<RootSession>, path: &Path, preserved_since_ms: i64) {
  let record = TrackedRecord::discover(path.to_path_buf(), &session.policy(), preserved_since_ms);
  session.cache.insert(path.to_path_buf(), record);
}

#[test]
fn file_survives_at_30s_and_dies_at_61s_with_one_minute_retention() {
  let (dir, session, _rx) = session_with("|retention_minutes:1");
  let path = dir.path().join("a.txt");
  fs::write(&path, b"doomed").unwrap();
  track(&session, &path, 0);

  let stats = run_sweep(&session, 30_000, &CaptureSink::new());
  assert_eq!(stats.files_deleted, 0);
  assert!(path.exists());

  let sink = CaptureSink::new();
  let stats = run_sweep(&session, 61_000, &sink);
  assert_eq!(stats.files_deleted, 1);
  assert!(!path.exists());
  assert!(sink.saw(events::AGED_FILE_DELETED));
}

#[test]
fn preservation_depth_exempts_shallow_objects() {
  let (dir, session, _rx) = session_with("|retention_minutes:1|preservation_depth:1");
  let shallow = dir.path().join("keep.txt");
  fs::write(&shallow, b"shallow").unwrap();
  fs::create_dir(dir.path().join("sub")).unwrap();
  let deep = dir.path().join("sub/kill.txt");
  fs::write(&deep, b"deep").unwrap();

  track(&session, &shallow, 0);
  track(&session, &deep, 0);

  let stats = run_sweep(&session, 10 * MINUTE_MS, &CaptureSink::new());
  assert_eq!(stats.files_deleted, 1);
  assert!(shallow.exists(), "depth 1 is not beyond preservation_depth 1");
  assert!(!deep.exists());
}

#[test]
fn group_mode_keeps_files_while_any_sibling_is_preserved() {
  let (dir, session, _rx) = session_with("|retention_minutes:1|delete_contents_as_group:true");
  let old = dir.path().join("old.txt");
  let young = dir.path().join("young.txt");
  fs::write(&old, b"old").unwrap();
  fs::write(&young, b"young").unwrap();

  let now = 2 * MINUTE_MS;
  track(&session, &old, 0);
  track(&session, &young, now - 10_000);

  let sink = CaptureSink::new();
  let stats = run_sweep(&session, now, &sink);
  assert_eq!(stats.files_deleted, 0);
  assert_eq!(stats.kept_by_group, 1);
  assert!(old.exists() && young.exists());
  assert!(sink.saw(events::AGED_FILE_KEPT_BY_GROUP));

  // Once every sibling has aged past the cutoff the group goes together.
  let stats = run_sweep(&session, now + 5 * MINUTE_MS, &CaptureSink::new());
  assert_eq!(stats.files_deleted, 2);
  assert!(!old.exists() && !young.exists());
}

#[test]
fn never_delete_directories_bumps_expired_windows() {
  let (dir, session, _rx) = session_with("|retention_minutes:1");
  assert!(session.settings.never_delete_directories);
  assert!(session.settings.reset_expired_directories);

  let sub = dir.path().join("aged-dir");
  fs::create_dir(&sub).unwrap();
  track(&session, &sub, 0);

  let now = 5 * MINUTE_MS;
  let sink = CaptureSink::new();
  let stats = run_sweep(&session, now, &sink);

  assert!(sub.exists(), "directory is never removed from disk");
  assert_eq!(stats.dirs_reset, 1);
  assert_eq!(session.cache.get(&sub).unwrap().preserved_since_ms, now);
  assert!(sink.saw(events::AGED_DIR_WINDOW_RESET));

  // The bump keeps it out of the very next sweep.
  let stats = run_sweep(&session, now + 1_000, &CaptureSink::new());
  assert_eq!(stats.examined, 0);
}

#[test]
fn empty_aged_directory_is_deleted_when_allowed() {
  let (dir, session, _rx) = session_with("|retention_minutes:1|never_delete_directories:false");
  let empty = dir.path().join("empty");
  let full = dir.path().join("full");
  fs::create_dir(&empty).unwrap();
  fs::create_dir(&full).unwrap();
  fs::write(full.join("child.txt"), b"still here").unwrap();

  track(&session, &empty, 0);
  track(&session, &full, 0);

  let stats = run_sweep(&session, 5 * MINUTE_MS, &CaptureSink::new());
  assert_eq!(stats.dirs_deleted, 1);
  assert!(!empty.exists());
  // Non-empty directories wait for their contents to age out.
  assert!(full.exists());
}

#[test]
fn missing_objects_are_logged_only() {
  let (dir, session, _rx) = session_with("|retention_minutes:1|reset_on_kind_change:false");
  let path = dir.path().join("ghost.txt");
  fs::write(&path, b"x").unwrap();
  track(&session, &path, 0);
  fs::remove_file(&path).unwrap();

  // Past the kind-check tolerance the record resolves to missing.
  let sink = CaptureSink::new();
  let stats = run_sweep(&session, 5 * MINUTE_MS, &sink);
  assert_eq!(stats.missing, 1);
  assert_eq!(stats.files_deleted, 0);
  assert!(sink.saw(events::AGED_RECORD_MISSING));
}

#[test]
fn disabled_aging_is_a_no_op() {
  let (dir, session, _rx) = session_with("|retention_minutes:1|allow_aging:false");
  let path = dir.path().join("safe.txt");
  fs::write(&path, b"safe").unwrap();
  track(&session, &path, 0);

  let stats = run_sweep(&session, 10 * MINUTE_MS, &CaptureSink::new());
  assert_eq!(stats.examined, 0);
  assert!(path.exists());
}

#[test]
fn kind_change_reset_shields_a_just_refreshed_record() {
  // A record whose refresh resets its window must not be acted on with
  // stale age data in the same sweep.
  let (dir, session, _rx) = session_with("|retention_minutes:1");
  let path = dir.path().join("was-file");
  fs::write(&path, b"x").unwrap();
  track(&session, &path, 0);
  fs::remove_file(&path).unwrap();
  fs::create_dir(&path).unwrap();

  let now = 5 * MINUTE_MS;
  let stats = run_sweep(&session, now, &CaptureSink::new());
  assert_eq!(stats.missing, 0);
  assert_eq!(stats.dirs_reset, 0);
  assert_eq!(session.cache.get(&path).unwrap().preserved_since_ms, now);
  assert!(path.exists());
}
