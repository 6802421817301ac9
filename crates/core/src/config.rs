//! Configuration model for the retention engine.
//!
//! Settings come from a TOML file with a `[defaults]` table and a list of
//! root lines. A root line is a path, optionally suffixed with `/...` to
//! monitor the whole subtree, optionally followed by `|key:value` overrides
//! that replace individual defaults for that root only:
//!
//! ```text
//! roots = [
//!   "/srv/scratch/...",
//!   "/srv/drops/...|retention_minutes:120|delete_contents_as_group:true",
//! ]
//! ```

use crate::events;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Config parse error: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("Empty root line")]
  EmptyRoot,
}

/// Content hash algorithm for fingerprinting tracked objects.
///
/// `Fast` is the default and by far the cheapest; the cryptographic options
/// exist for installations that need collision resistance on fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
  #[default]
  Fast,
  Sha1,
  Md5,
}

impl HashAlgorithm {
  /// Name used in persisted cache filenames.
  pub fn name(&self) -> &'static str {
    match self {
      HashAlgorithm::Fast => "fast",
      HashAlgorithm::Sha1 => "sha1",
      HashAlgorithm::Md5 => "md5",
    }
  }
}

impl std::fmt::Display for HashAlgorithm {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for HashAlgorithm {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "fast" | "fast-hash" => Ok(HashAlgorithm::Fast),
      "sha1" => Ok(HashAlgorithm::Sha1),
      "md5" => Ok(HashAlgorithm::Md5),
      other => Err(format!("unknown hash algorithm: {other}")),
    }
  }
}

/// Per-root policy settings.
///
/// A copy of these lives on every root session; the reset flags and hash
/// options are additionally copied onto each record so a record can
/// recompute itself without reaching back into configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RootSettings {
  /// How long an object is preserved after it was first seen or last reset.
  pub retention_minutes: u64,
  /// Fingerprint algorithm for this root.
  pub algorithm: HashAlgorithm,
  /// Fingerprint whole directory subtrees. Expensive; off by default.
  pub hash_directory_contents: bool,
  /// Object type change restarts the preservation window.
  pub reset_on_kind_change: bool,
  /// Fingerprint change restarts the preservation window.
  pub reset_on_fingerprint_change: bool,
  /// Rename restarts the preservation window.
  pub reset_on_rename: bool,
  /// Drop change notifications for paths created in the same batch,
  /// suppressing the change event the OS emits right after a create.
  pub ignore_changed_when_created_this_batch: bool,
  /// Persisted caches older than this many days are discarded unread.
  pub cache_stale_days: f64,
  /// Master switch for the aging sweep. When false the worker still runs
  /// but takes no deletion action.
  pub allow_aging: bool,
  /// Minimum path-segment distance below the root that must be exceeded
  /// before an object is eligible for aging. 0 = immediate children are
  /// eligible.
  pub preservation_depth: usize,
  /// Never delete directories, only files.
  pub never_delete_directories: bool,
  /// With `never_delete_directories`, bump expired directories' windows so
  /// they stop showing up in every sweep. Turning this off later costs one
  /// full retention window before directory deletes resume.
  pub reset_expired_directories: bool,
  /// Only delete a file once every sibling file in its directory is also
  /// past the retention window.
  pub delete_contents_as_group: bool,
  /// How long a record's cached object type is trusted before it is
  /// re-derived from disk.
  pub kind_check_tolerance_secs: u64,
  /// Batch processor interval.
  pub ingest_interval_ms: u64,
  /// Delay before the first batch runs, letting bootstrap settle.
  pub ingest_initial_delay_ms: u64,
  /// Aging sweep interval.
  pub aging_interval_ms: u64,
  /// Delay before the first aging sweep.
  pub aging_initial_delay_ms: u64,
  /// Cache persistence interval.
  pub persist_interval_ms: u64,
}

impl Default for RootSettings {
  fn default() -> Self {
    Self {
      retention_minutes: 24 * 60,
      algorithm: HashAlgorithm::Fast,
      hash_directory_contents: false,
      reset_on_kind_change: true,
      reset_on_fingerprint_change: true,
      reset_on_rename: false,
      ignore_changed_when_created_this_batch: true,
      cache_stale_days: 7.0,
      allow_aging: true,
      preservation_depth: 0,
      never_delete_directories: true,
      reset_expired_directories: true,
      delete_contents_as_group: false,
      kind_check_tolerance_secs: 60,
      ingest_interval_ms: 5_000,
      ingest_initial_delay_ms: 10_000,
      aging_interval_ms: 60_000,
      aging_initial_delay_ms: 30_000,
      persist_interval_ms: 60_000,
    }
  }
}

impl RootSettings {
  pub fn retention_window_ms(&self) -> i64 {
    self.retention_minutes as i64 * 60_000
  }

  pub fn kind_check_tolerance_ms(&self) -> i64 {
    self.kind_check_tolerance_secs as i64 * 1_000
  }

  /// Apply one `key:value` override in place. Unknown keys and unparseable
  /// values are logged and skipped; the default stays in effect.
  fn apply_override(&mut self, key: &str, value: &str) {
    fn set<T: FromStr>(slot: &mut T, key: &str, value: &str)
    where
      T::Err: std::fmt::Display,
    {
      match value.parse::<T>() {
        Ok(v) => *slot = v,
        Err(e) => {
          warn!(code = events::CONFIG_BAD_OVERRIDE_VALUE, key, value, "could not parse override: {e}");
        }
      }
    }

    match key {
      "retention_minutes" => set(&mut self.retention_minutes, key, value),
      "algorithm" => {
        // An unparseable algorithm falls back to the fastest one.
        if let Err(e) = value.parse::<HashAlgorithm>().map(|a| self.algorithm = a) {
          warn!(code = events::CONFIG_BAD_ALGORITHM, "{e}; using {}", HashAlgorithm::Fast);
          self.algorithm = HashAlgorithm::Fast;
        }
      }
      "hash_directory_contents" => set(&mut self.hash_directory_contents, key, value),
      "reset_on_kind_change" => set(&mut self.reset_on_kind_change, key, value),
      "reset_on_fingerprint_change" => set(&mut self.reset_on_fingerprint_change, key, value),
      "reset_on_rename" => set(&mut self.reset_on_rename, key, value),
      "ignore_changed_when_created_this_batch" => {
        set(&mut self.ignore_changed_when_created_this_batch, key, value)
      }
      "cache_stale_days" => set(&mut self.cache_stale_days, key, value),
      "allow_aging" => set(&mut self.allow_aging, key, value),
      "preservation_depth" => set(&mut self.preservation_depth, key, value),
      "never_delete_directories" => set(&mut self.never_delete_directories, key, value),
      "reset_expired_directories" => set(&mut self.reset_expired_directories, key, value),
      "delete_contents_as_group" => set(&mut self.delete_contents_as_group, key, value),
      "kind_check_tolerance_secs" => set(&mut self.kind_check_tolerance_secs, key, value),
      "ingest_interval_ms" => set(&mut self.ingest_interval_ms, key, value),
      "ingest_initial_delay_ms" => set(&mut self.ingest_initial_delay_ms, key, value),
      "aging_interval_ms" => set(&mut self.aging_interval_ms, key, value),
      "aging_initial_delay_ms" => set(&mut self.aging_initial_delay_ms, key, value),
      "persist_interval_ms" => set(&mut self.persist_interval_ms, key, value),
      other => {
        warn!(code = events::CONFIG_UNKNOWN_OVERRIDE, key = other, "unknown root override, skipping");
      }
    }
  }
}

/// A parsed root line: the watch path, recursion flag, and the settings
/// that apply to it (defaults plus any per-line overrides).
#[derive(Debug, Clone)]
pub struct RootSpec {
  /// The path-and-suffix part of the line, before any overrides. Persisted
  /// cache filenames are derived from this string, so it must be stable
  /// across restarts.
  pub config_key: String,
  /// The filesystem path to watch.
  pub root: PathBuf,
  /// Whether the whole subtree is monitored (`/...` suffix).
  pub recursive: bool,
  pub settings: RootSettings,
}

impl RootSpec {
  /// Parse one root line against a set of defaults.
  pub fn parse(line: &str, defaults: &RootSettings) -> Result<Self, ConfigError> {
    let mut parts = line.split('|');
    let config_key = parts.next().unwrap_or_default().trim().to_string();
    if config_key.is_empty() {
      return Err(ConfigError::EmptyRoot);
    }

    let (raw_root, recursive) = match config_key.strip_suffix("/...") {
      Some(stripped) => (stripped, true),
      None => (config_key.as_str(), false),
    };
    let root = PathBuf::from(raw_root);

    let mut settings = defaults.clone();
    for part in parts {
      match part.split_once(':') {
        Some((key, value)) => settings.apply_override(key.trim(), value.trim()),
        None => {
          warn!(code = events::CONFIG_UNKNOWN_OVERRIDE, part, "root override without ':', skipping");
        }
      }
    }

    Ok(Self {
      config_key,
      root,
      recursive,
      settings,
    })
  }
}

/// Top-level engine configuration, loaded from `agekeeper.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
  /// Where persisted caches live. Defaults to the running binary's
  /// directory when unset.
  pub state_dir: Option<PathBuf>,
  /// Optional chat webhook for warning/error events.
  pub webhook_url: Option<String>,
  /// Global defaults applied to every root.
  pub defaults: RootSettings,
  /// Root lines; see the module docs for the syntax.
  pub roots: Vec<String>,
}

impl EngineConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
  }

  /// Resolve the state directory, falling back to the directory the
  /// running binary lives in, then the working directory.
  pub fn state_dir(&self) -> PathBuf {
    if let Some(dir) = &self.state_dir {
      return dir.clone();
    }
    std::env::current_exe()
      .ok()
      .and_then(|exe| exe.parent().map(Path::to_path_buf))
      .unwrap_or_else(|| PathBuf::from("."))
  }
}
