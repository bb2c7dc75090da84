//! # Ember Redis
//!
//! Redis-style data structures (string, hash, set, list, sorted set)
//! layered over the Ember storage engine.
//!
//! Every structure is mapped onto plain key-value records:
//!
//! - Strings live directly under the user key behind a
//!   `type | expire` prefix; expiry is checked lazily on read.
//! - Composite types keep a *metadata* record under the user key
//!   (type, expiry, version, element count, list bounds) and store their
//!   elements under composite keys stamped with the metadata version.
//!   Deleting or expiring the key bumps the version, orphaning the old
//!   elements for the next merge.
//! - Mutations that touch metadata and an element record commit through
//!   the engine's atomic write batch.
//!
//! ## Example
//!
//! ```no_run
//! use ember_core::Config;
//! use ember_redis::RedisStore;
//!
//! let store = RedisStore::open(Config::new().dir_path("/tmp/ember-redis"))?;
//! store.hset(b"user:1", b"name", b"ember")?;
//! assert_eq!(store.hget(b"user:1", b"name")?, Some(b"ember".to_vec()));
//! # Ok::<(), ember_redis::RedisError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod meta;
mod types;

pub use error::{RedisError, RedisResult};
pub use types::{RedisStore, RedisType};
