//! Filesystem primitives: object typing, content fingerprints, listing.
//!
//! These are pure functions over the filesystem with no shared state. The
//! daemon calls them from bootstrap, the batch processor, and the aging
//! sweep; records call them when recomputing themselves.

use crate::config::HashAlgorithm;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

/// Fingerprint value for a file that could not be read (typically locked
/// mid-write). Callers treat it as "no change detected yet" and retry on a
/// later cycle; it never counts as a content change.
pub const UNREADABLE: &str = "unreadable";

#[derive(Error, Debug)]
pub enum FsError {
  #[error("Root does not exist: {0}")]
  RootMissing(PathBuf),
}

/// What a tracked path currently is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
  File,
  Directory,
  Missing,
}

impl std::fmt::Display for ObjectKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ObjectKind::File => f.write_str("file"),
      ObjectKind::Directory => f.write_str("directory"),
      ObjectKind::Missing => f.write_str("missing"),
    }
  }
}

/// Derive the object kind from a direct existence check. No caching here;
/// records decide how often to call this.
pub fn object_kind(path: &Path) -> ObjectKind {
  if path.is_dir() {
    ObjectKind::Directory
  } else if path.is_file() {
    ObjectKind::File
  } else {
    ObjectKind::Missing
  }
}

/// Incremental hasher over the configured algorithm.
enum ContentHasher {
  Fast(Box<blake3::Hasher>),
  Sha1(Sha1),
  Md5(Md5),
}

impl ContentHasher {
  fn new(algorithm: HashAlgorithm) -> Self {
    match algorithm {
      HashAlgorithm::Fast => ContentHasher::Fast(Box::new(blake3::Hasher::new())),
      HashAlgorithm::Sha1 => ContentHasher::Sha1(Sha1::new()),
      HashAlgorithm::Md5 => ContentHasher::Md5(Md5::new()),
    }
  }

  fn update(&mut self, data: &[u8]) {
    match self {
      ContentHasher::Fast(h) => {
        h.update(data);
      }
      ContentHasher::Sha1(h) => h.update(data),
      ContentHasher::Md5(h) => h.update(data),
    }
  }

  fn finalize_hex(self) -> String {
    match self {
      ContentHasher::Fast(h) => h.finalize().to_hex().to_string(),
      ContentHasher::Sha1(h) => hex::encode(h.finalize()),
      ContentHasher::Md5(h) => hex::encode(h.finalize()),
    }
  }
}

/// Hash an arbitrary string. Used for deriving persisted-cache filenames
/// from root configuration strings.
pub fn string_fingerprint(data: &str, algorithm: HashAlgorithm) -> String {
  let mut hasher = ContentHasher::new(algorithm);
  hasher.update(data.as_bytes());
  hasher.finalize_hex()
}

/// Compute the content fingerprint for an object of a known kind.
///
/// Files stream through the selected algorithm and yield [`UNREADABLE`] on
/// an I/O error. Directories yield the empty string unless whole-directory
/// hashing is enabled, in which case every file in the subtree contributes
/// its case-normalized relative path and its content, in path-sorted order.
/// Missing objects always yield the empty string.
pub fn fingerprint(path: &Path, kind: ObjectKind, algorithm: HashAlgorithm, hash_directory_contents: bool) -> String {
  match kind {
    ObjectKind::File => match hash_file(path, algorithm) {
      Ok(hex) => hex,
      Err(e) => {
        warn!("could not read {} for fingerprint: {e}", path.display());
        UNREADABLE.to_string()
      }
    },
    ObjectKind::Directory if hash_directory_contents => hash_directory(path, algorithm),
    ObjectKind::Directory => String::new(),
    ObjectKind::Missing => String::new(),
  }
}

fn hash_file(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
  let mut file = std::fs::File::open(path)?;
  let mut hasher = ContentHasher::new(algorithm);
  let mut buf = [0u8; 64 * 1024];
  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(hasher.finalize_hex())
}

/// Aggregate fingerprint over a directory subtree. Expensive; only invoked
/// when whole-directory hashing is enabled for the root.
fn hash_directory(path: &Path, algorithm: HashAlgorithm) -> String {
  let files = match list_entries(path, ObjectKind::Directory, true, false, true) {
    Ok(files) => files,
    // Directory vanished between the kind check and the listing.
    Err(_) => return String::new(),
  };

  // The fast algorithm has no incremental construction worth keeping for
  // the aggregate, so directories always use a cryptographic hash.
  let aggregate_algorithm = match algorithm {
    HashAlgorithm::Fast => HashAlgorithm::Sha1,
    other => other,
  };

  let mut hasher = ContentHasher::new(aggregate_algorithm);
  for file in &files {
    let relative = file
      .strip_prefix(path)
      .unwrap_or(file)
      .to_string_lossy()
      .to_lowercase();
    hasher.update(relative.as_bytes());

    match std::fs::read(file) {
      Ok(content) => hasher.update(&content),
      Err(e) => {
        warn!("could not read {} for directory fingerprint: {e}", file.display());
        return UNREADABLE.to_string();
      }
    }
  }
  hasher.finalize_hex()
}

/// List entries under a root, sorted lexicographically.
///
/// Files and directories are requested independently so callers can list
/// just one kind. A file root lists as itself. A missing root is a
/// structural fault.
pub fn list_entries(
  root: &Path,
  kind: ObjectKind,
  recursive: bool,
  include_dirs: bool,
  include_files: bool,
) -> Result<Vec<PathBuf>, FsError> {
  match kind {
    ObjectKind::File => Ok(vec![root.to_path_buf()]),
    ObjectKind::Missing => Err(FsError::RootMissing(root.to_path_buf())),
    ObjectKind::Directory => {
      let mut walker = WalkDir::new(root).min_depth(1);
      if !recursive {
        walker = walker.max_depth(1);
      }

      let mut entries = Vec::new();
      for entry in walker {
        let entry = match entry {
          Ok(entry) => entry,
          Err(e) => {
            // Unreadable entries are transient faults, not structural ones.
            warn!("skipping unreadable entry under {}: {e}", root.display());
            continue;
          }
        };
        let is_dir = entry.file_type().is_dir();
        if (is_dir && include_dirs) || (!is_dir && include_files) {
          entries.push(entry.into_path());
        }
      }
      entries.sort();
      Ok(entries)
    }
  }
}

/// Path-segment distance of `path` below `root`. `None` when `path` is not
/// under `root`; an immediate child is depth 1.
pub fn depth_below(root: &Path, path: &Path) -> Option<usize> {
  path.strip_prefix(root).ok().map(|rel| rel.components().count())
}
