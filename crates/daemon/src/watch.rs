//! Bridge from the native filesystem watch subsystem onto the per-root
//! pending-event queues.
//!
//! The notify callback runs on the watcher's own thread, so all it does is
//! classify the event and append to the matching unbounded queue. A
//! "rescan needed" flag from the backend means the OS event buffer
//! overflowed and notifications were lost; that is reported through the
//! sink but triggers no forced reconciliation here.

use crate::session::{PendingQueues, RootSession};
use crate::sink::EventSink;
use agekeeper_core::events::{self, Severity};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use tracing::debug;

/// Keeps the underlying watcher alive; dropping it stops the stream.
pub struct WatchHandle {
  _watcher: RecommendedWatcher,
}

/// Start watching a session's root, routing raw events onto its queues.
pub fn spawn_watcher(session: &Arc<RootSession>, sink: Arc<dyn EventSink>) -> Result<WatchHandle, notify::Error> {
  let queues = session.queues.clone();
  let root = session.root.clone();

  let mut watcher = notify::recommended_watcher(move |result: Result<Event, notify::Error>| match result {
    Ok(event) => route_event(&queues, &event, sink.as_ref()),
    Err(e) => {
      sink.emit(
        events::WATCH_ERROR,
        Severity::Error,
        &format!("watcher error on {}: {e}", root.display()),
      );
    }
  })?;

  let mode = if session.recursive {
    RecursiveMode::Recursive
  } else {
    RecursiveMode::NonRecursive
  };
  watcher.watch(&session.root, mode)?;

  Ok(WatchHandle { _watcher: watcher })
}

/// Classify one raw event onto the created/changed/deleted/renamed queues.
///
/// Backends disagree on how renames surface: a paired rename arrives as
/// one event with both paths, while an unpaired half degrades to a delete
/// (`From`) or a create (`To`); the batch processor copes with either.
pub(crate) fn route_event(queues: &PendingQueues, event: &Event, sink: &dyn EventSink) {
  if event.need_rescan() {
    sink.emit(
      events::WATCH_OVERFLOW,
      Severity::Error,
      "watch buffer overflow, some notifications were lost",
    );
  }

  match event.kind {
    EventKind::Create(_) => {
      for path in &event.paths {
        queues.push_created(path.clone());
      }
    }
    EventKind::Remove(_) => {
      for path in &event.paths {
        queues.push_deleted(path.clone());
      }
    }
    EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
      (RenameMode::Both, [old, new, ..]) => queues.push_renamed(old.clone(), new.clone()),
      (RenameMode::From, [old, ..]) => queues.push_deleted(old.clone()),
      (RenameMode::To, [new, ..]) => queues.push_created(new.clone()),
      (_, [old, new, ..]) => queues.push_renamed(old.clone(), new.clone()),
      (_, [path]) => queues.push_changed(path.clone()),
      (_, []) => {}
    },
    EventKind::Modify(_) => {
      for path in &event.paths {
        queues.push_changed(path.clone());
      }
    }
    EventKind::Access(_) | EventKind::Any | EventKind::Other => {
      debug!("ignoring event {:?}", event.kind);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::{QueueReceivers, RenamedPair, RootSession};
  use agekeeper_core::config::{RootSettings, RootSpec};
  use agekeeper_core::events::EventCode;
  use notify::event::{CreateKind, DataChange, MetadataKind, ModifyKind, RemoveKind};
  use std::path::PathBuf;
  use std::sync::Mutex;
  use tempfile::TempDir;

  struct CaptureSink(Mutex<Vec<EventCode>>);

  impl EventSink for CaptureSink {
    fn emit(&self, code: EventCode, _severity: Severity, _message: &str) {
      self.0.lock().unwrap().push(code);
    }
  }

  fn session() -> (Arc<RootSession>, QueueReceivers, TempDir) {
    let dir = TempDir::new().unwrap();
    let spec = RootSpec::parse(&format!("{}/...", dir.path().display()), &RootSettings::default()).unwrap();
    let (session, rx) = RootSession::new(spec).unwrap();
    (session, rx, dir)
  }

  fn event(kind: EventKind, paths: &[&str]) -> Event {
    let mut event = Event::new(kind);
    for path in paths {
      event = event.add_path(PathBuf::from(path));
    }
    event
  }

  #[test]
  fn creates_and_removes_route_to_their_queues() {
    let (s, mut rx, _dir) = session();
    let sink = CaptureSink(Mutex::new(Vec::new()));

    route_event(&s.queues, &event(EventKind::Create(CreateKind::File), &["/r/a"]), &sink);
    route_event(&s.queues, &event(EventKind::Remove(RemoveKind::File), &["/r/b"]), &sink);

    assert_eq!(rx.created.try_recv().unwrap(), PathBuf::from("/r/a"));
    assert_eq!(rx.deleted.try_recv().unwrap(), PathBuf::from("/r/b"));
  }

  #[test]
  fn content_modify_routes_to_changed() {
    let (s, mut rx, _dir) = session();
    let sink = CaptureSink(Mutex::new(Vec::new()));

    route_event(
      &s.queues,
      &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/r/a"]),
      &sink,
    );
    route_event(
      &s.queues,
      &event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)), &["/r/a"]),
      &sink,
    );

    assert_eq!(rx.changed.try_recv().unwrap(), PathBuf::from("/r/a"));
    assert_eq!(rx.changed.try_recv().unwrap(), PathBuf::from("/r/a"));
  }

  #[test]
  fn paired_rename_routes_both_paths() {
    let (s, mut rx, _dir) = session();
    let sink = CaptureSink(Mutex::new(Vec::new()));

    route_event(
      &s.queues,
      &event(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &["/r/old", "/r/new"]),
      &sink,
    );

    assert_eq!(
      rx.renamed.try_recv().unwrap(),
      RenamedPair {
        old: PathBuf::from("/r/old"),
        new: PathBuf::from("/r/new"),
      }
    );
  }

  #[test]
  fn unpaired_rename_halves_degrade() {
    let (s, mut rx, _dir) = session();
    let sink = CaptureSink(Mutex::new(Vec::new()));

    route_event(
      &s.queues,
      &event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/r/old"]),
      &sink,
    );
    route_event(
      &s.queues,
      &event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/r/new"]),
      &sink,
    );

    assert_eq!(rx.deleted.try_recv().unwrap(), PathBuf::from("/r/old"));
    assert_eq!(rx.created.try_recv().unwrap(), PathBuf::from("/r/new"));
  }

  #[test]
  fn rescan_flag_reports_overflow() {
    let (s, _rx, _dir) = session();
    let sink = CaptureSink(Mutex::new(Vec::new()));

    let overflow = event(EventKind::Other, &[]).set_flag(notify::event::Flag::Rescan);
    route_event(&s.queues, &overflow, &sink);

    assert_eq!(*sink.0.lock().unwrap(), vec![events::WATCH_OVERFLOW]);
  }
}
