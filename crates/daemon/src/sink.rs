//! Structured event sink.
//!
//! Workers report faults and state transitions as `(code, severity,
//! message)` triples; where those end up is this module's problem, not
//! theirs. The default wiring routes everything to the tracing subscriber
//! and optionally forwards warnings and errors to a chat webhook.

use agekeeper_core::events::{EventCode, Severity};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub trait EventSink: Send + Sync {
  fn emit(&self, code: EventCode, severity: Severity, message: &str);
}

/// Routes events to the tracing subscriber.
pub struct LogSink;

impl EventSink for LogSink {
  fn emit(&self, code: EventCode, severity: Severity, message: &str) {
    match severity {
      Severity::Info => info!(code, "{message}"),
      Severity::Warning => warn!(code, "{message}"),
      Severity::Error => error!(code, "{message}"),
    }
  }
}

/// Forwards warning and error events to a chat webhook.
///
/// Delivery is fire-and-forget from a dedicated task; a failed POST is
/// logged and never propagated back into the engine.
pub struct WebhookSink {
  tx: mpsc::UnboundedSender<String>,
}

impl WebhookSink {
  /// Spawn the delivery task. Must be called from within a tokio runtime.
  pub fn spawn(url: String) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
      let client = reqwest::Client::new();
      while let Some(text) = rx.recv().await {
        let payload = serde_json::json!({ "text": text });
        if let Err(e) = client.post(&url).json(&payload).send().await {
          warn!("webhook delivery failed: {e}");
        }
      }
    });

    Self { tx }
  }
}

impl EventSink for WebhookSink {
  fn emit(&self, code: EventCode, severity: Severity, message: &str) {
    if matches!(severity, Severity::Info) {
      return;
    }
    let _ = self.tx.send(format!("agekeeper - {code:05} - {severity} - {message}"));
  }
}

/// Fans each event out to every configured sink.
pub struct FanoutSink {
  sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
  pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
    Self { sinks }
  }
}

impl EventSink for FanoutSink {
  fn emit(&self, code: EventCode, severity: Severity, message: &str) {
    for sink in &self.sinks {
      sink.emit(code, severity, message);
    }
  }
}
