//! The agekeeper retention daemon.
//!
//! One [`registry::RootRegistry`] owns every monitored root. Each root gets
//! a [`session::RootSession`] (the concurrent cache plus pending-event
//! queues), a filesystem watcher bridge, and three timer-driven workers:
//! the ingestion batch processor, the aging sweep, and the cache
//! persistence worker. Workers for one root never queue behind themselves;
//! an overlapping tick is skipped via a non-blocking gate.

pub mod aging;
pub mod bootstrap;
pub mod ingest;
pub mod lifecycle;
pub mod persist;
pub mod registry;
pub mod session;
pub mod sink;
pub mod watch;
