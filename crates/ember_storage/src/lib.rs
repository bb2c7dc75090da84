//! # Ember Storage
//!
//! I/O backend trait and implementations for Ember.
//!
//! This crate provides the lowest-level I/O abstraction for Ember's
//! append-only segment files. Backends are **opaque byte stores** - they
//! do not interpret the data they store.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (positional read, append, sync)
//! - No knowledge of Ember record formats, segments, or indexes
//! - Must be `Send + Sync` for concurrent access
//! - Ember owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - Buffered positional read and append over OS files
//! - [`MmapBackend`] - Read-only memory-mapped reads for cold segment loads
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//!
//! ## Example
//!
//! ```rust
//! use ember_storage::{InMemoryBackend, IoBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.append(b"hello world").unwrap();
//! let mut buf = [0u8; 11];
//! backend.read_at(&mut buf, 0).unwrap();
//! assert_eq!(&buf, b"hello world");
//! ```

#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod mmap;

pub use backend::{new_io_backend, IoBackend, IoKind};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use mmap::MmapBackend;
