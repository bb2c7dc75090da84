//! # Ember Core
//!
//! Log-structured storage engine for Ember - an embedded key-value store
//! with an append-only segment log, an in-memory position index, atomic
//! write batches, and hint-assisted compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Database                         │
//! │  (open, put/get/delete, merge, batch, iterator)      │
//! └───────────┬───────────────────────────┬──────────────┘
//!             │                           │
//! ┌───────────▼───────────┐   ┌───────────▼──────────────┐
//! │       Indexer         │   │        DataFile          │
//! │  (key → position;     │   │  (record codec, append,  │
//! │   btree / skiplist /  │   │   positional read)       │
//! │   persistent b+tree)  │   │                          │
//! └───────────────────────┘   └───────────┬──────────────┘
//!                                         │
//! ┌───────────────────────────────────────▼──────────────┐
//! │                 IoBackend (trait)                    │
//! │     (opaque byte store: File, Mmap, InMemory)        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! - Records are never mutated in place; the log is the serialization point
//! - Indexed positions always reference live, checksum-valid records
//! - A batch is visible either completely or not at all, across crashes
//! - Exactly one process owns a data directory at a time
//!
//! ## Example
//!
//! ```no_run
//! use ember_core::{Config, Database};
//!
//! let db = Database::open(Config::new().dir_path("/tmp/ember-demo"))?;
//! db.put(b"name", b"ember")?;
//! assert_eq!(db.get(b"name")?, b"ember");
//! db.delete(b"name")?;
//! db.close()?;
//! # Ok::<(), ember_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod data;
mod database;
mod error;
mod index;
mod iterator;
mod merge;
mod stats;
mod util;

pub use batch::WriteBatch;
pub use config::{Config, IndexType, IteratorOptions, WriteBatchOptions};
pub use data::{LogRecord, RecordPosition, RecordType};
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use index::{IndexIterator, Indexer};
pub use iterator::DbIterator;
pub use stats::Stat;
