//! Daemon lifecycle: build the sink, set up every configured root, run
//! until interrupted, then shut down cleanly.

use crate::registry::RootRegistry;
use crate::session::SetupError;
use crate::sink::{EventSink, FanoutSink, LogSink, WebhookSink};
use agekeeper_core::config::{ConfigError, EngineConfig};
use agekeeper_core::events::{self, Severity};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
  #[error("Root setup error: {0}")]
  Setup(#[from] SetupError),
}

pub struct Daemon {
  config: EngineConfig,
}

impl Daemon {
  pub fn new(config: EngineConfig) -> Self {
    Self { config }
  }

  fn build_sink(&self) -> Arc<dyn EventSink> {
    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(LogSink)];
    if let Some(url) = &self.config.webhook_url {
      sinks.push(Arc::new(WebhookSink::spawn(url.clone())));
    }
    Arc::new(FanoutSink::new(sinks))
  }

  /// Run the engine until Ctrl-C. A root that fails setup stops the whole
  /// service; every later fault is contained to its own root.
  pub async fn run(self) -> Result<(), LifecycleError> {
    let sink = self.build_sink();
    sink.emit(
      events::SERVICE_STARTING,
      Severity::Info,
      &format!("agekeeper starting with {} roots", self.config.roots.len()),
    );

    let registry = RootRegistry::new(self.config.state_dir(), Arc::clone(&sink));

    for line in &self.config.roots {
      if let Err(e) = registry.add_root(line, &self.config.defaults).await {
        sink.emit(
          events::ROOT_SETUP_FAILED,
          Severity::Error,
          &format!("root setup failed for {line}: {e}"),
        );
        return Err(e.into());
      }
    }

    signal::ctrl_c().await?;

    sink.emit(events::SERVICE_STOPPING, Severity::Info, "agekeeper stopping");
    registry.shutdown().await;
    Ok(())
  }
}
