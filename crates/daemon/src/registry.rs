//! Registry of monitored roots.
//!
//! Owns every root session and hands each worker a direct handle to its
//! session at construction: no global list, no lookup by name. The
//! registry also carries the global bootstrapping counter that gates
//! ingestion and aging across all roots while any root is still building
//! its cache.

use crate::session::{QueueReceivers, RootSession, SetupError};
use crate::sink::EventSink;
use crate::{aging, bootstrap, ingest, persist, watch};
use agekeeper_core::config::{RootSettings, RootSpec};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::info;

struct RootHandle {
  session: Arc<RootSession>,
  /// Keeps the notify watcher alive for this root.
  _watcher: watch::WatchHandle,
  tasks: Vec<JoinHandle<()>>,
}

pub struct RootRegistry {
  state_dir: PathBuf,
  sink: Arc<dyn EventSink>,
  roots: RwLock<HashMap<String, RootHandle>>,
  /// Number of roots currently bootstrapping. Workers for every root skip
  /// their tick while this is nonzero, so nothing acts on a partially
  /// built cache.
  bootstrapping: Arc<AtomicUsize>,
  shutdown_tx: broadcast::Sender<()>,
}

impl RootRegistry {
  pub fn new(state_dir: PathBuf, sink: Arc<dyn EventSink>) -> Self {
    let (shutdown_tx, _) = broadcast::channel(4);
    Self {
      state_dir,
      sink,
      roots: RwLock::new(HashMap::new()),
      bootstrapping: Arc::new(AtomicUsize::new(0)),
      shutdown_tx,
    }
  }

  pub fn state_dir(&self) -> &PathBuf {
    &self.state_dir
  }

  /// Parse a root line, bootstrap its cache, and start its watcher and
  /// three workers. Errors abort this root only; the caller decides
  /// whether that stops the service.
  pub async fn add_root(&self, line: &str, defaults: &RootSettings) -> Result<(), SetupError> {
    let spec = RootSpec::parse(line, defaults)?;
    let (session, receivers) = RootSession::new(spec)?;

    self.bootstrap_session(&session).await?;
    self.start_workers(session, receivers).await?;
    Ok(())
  }

  async fn bootstrap_session(&self, session: &Arc<RootSession>) -> Result<(), SetupError> {
    self.bootstrapping.fetch_add(1, Ordering::AcqRel);

    let result = {
      let session = Arc::clone(session);
      let state_dir = self.state_dir.clone();
      let sink = Arc::clone(&self.sink);
      tokio::task::spawn_blocking(move || bootstrap::initialize(&session, &state_dir, sink.as_ref())).await
    };

    self.bootstrapping.fetch_sub(1, Ordering::AcqRel);

    let report = result.map_err(|e| SetupError::Internal(format!("bootstrap task failed: {e}")))??;
    info!(
      root = %session.config_key,
      entries = report.final_entries,
      rebuilt = report.rebuilt,
      removed_dead = report.removed_dead,
      added_new = report.added_new,
      "root ready",
    );
    Ok(())
  }

  async fn start_workers(&self, session: Arc<RootSession>, receivers: QueueReceivers) -> Result<(), SetupError> {
    let watcher = watch::spawn_watcher(&session, Arc::clone(&self.sink))?;

    let tasks = vec![
      tokio::spawn(ingest::ingest_loop(
        Arc::clone(&session),
        receivers,
        Arc::clone(&self.sink),
        Arc::clone(&self.bootstrapping),
        self.shutdown_tx.subscribe(),
      )),
      tokio::spawn(aging::aging_loop(
        Arc::clone(&session),
        Arc::clone(&self.sink),
        Arc::clone(&self.bootstrapping),
        self.shutdown_tx.subscribe(),
      )),
      tokio::spawn(persist::persist_loop(
        Arc::clone(&session),
        self.state_dir.clone(),
        Arc::clone(&self.sink),
        self.shutdown_tx.subscribe(),
      )),
    ];

    let handle = RootHandle {
      session: Arc::clone(&session),
      _watcher: watcher,
      tasks,
    };
    self.roots.write().await.insert(session.config_key.clone(), handle);
    Ok(())
  }

  /// Look up a session by its configured root line key.
  pub async fn session(&self, config_key: &str) -> Option<Arc<RootSession>> {
    self.roots.read().await.get(config_key).map(|h| Arc::clone(&h.session))
  }

  pub async fn root_count(&self) -> usize {
    self.roots.read().await.len()
  }

  /// Stop issuing ticks and wait for in-flight worker loops. Running units
  /// of work are not interrupted; a final snapshot is written per root so
  /// no age information is lost across the restart.
  pub async fn shutdown(&self) {
    let _ = self.shutdown_tx.send(());

    let mut roots = self.roots.write().await;
    for (key, handle) in roots.drain() {
      for task in handle.tasks {
        let _ = task.await;
      }
      match persist::write_snapshot(&handle.session, &self.state_dir) {
        Ok(count) => info!(root = %key, entries = count, "final snapshot written"),
        Err(e) => tracing::warn!(root = %key, "final snapshot failed: {e}"),
      }
    }
  }
}
