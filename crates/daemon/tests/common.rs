//! Common test utilities for daemon integration tests.
//!
//! Tests drive the worker cores (batch apply, aging sweep, bootstrap)
//! directly with injected timestamps, so none of them have to wait out a
//! real retention window.

use agekeeper_core::config::{RootSettings, RootSpec};
use agekeeper_core::events::{EventCode, Severity};
use daemon::session::{QueueReceivers, RootSession};
use daemon::sink::EventSink;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Sink that records every emitted event code.
#[derive(Default)]
pub struct CaptureSink {
  pub codes: Mutex<Vec<EventCode>>,
}

impl CaptureSink {
  pub fn new() -> Self {
    Self::default()
  }

  #[allow(dead_code)]
  pub fn saw(&self, code: EventCode) -> bool {
    self.codes.lock().unwrap().contains(&code)
  }
}

impl EventSink for CaptureSink {
  fn emit(&self, code: EventCode, _severity: Severity, _message: &str) {
    self.codes.lock().unwrap().push(code);
  }
}

/// Build a recursive session over a fresh temp directory, with per-line
/// overrides appended to the root line.
#[allow(dead_code)]
pub fn session_with(overrides: &str) -> (TempDir, Arc<RootSession>, QueueReceivers) {
  let dir = TempDir::new().expect("Failed to create temp root");
  let line = format!("{}/...{overrides}", dir.path().display());
  let spec = RootSpec::parse(&line, &RootSettings::default()).expect("Failed to parse root line");
  let (session, receivers) = RootSession::new(spec).expect("Failed to build session");
  (dir, session, receivers)
}
