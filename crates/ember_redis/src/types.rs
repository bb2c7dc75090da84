//! Redis-style data structures over the engine.
//!
//! Strings store their payload directly under the user key behind a small
//! `type | expire` prefix. Composite types (hash, set, list, sorted set)
//! keep a metadata record under the user key and their elements under
//! composite keys; mutations that touch both go through the engine's
//! write-batch protocol so readers never observe half an update.

use crate::error::{RedisError, RedisResult};
use crate::meta::{
    float_from_bytes, float_to_bytes, hash_internal_key, list_internal_key, set_internal_key,
    zset_member_key, zset_score_key, Metadata,
};
use ember_core::{Config, CoreError, Database, WriteBatchOptions};
use integer_encoding::VarInt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The data type stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RedisType {
    /// Plain byte-string value.
    String = 1,
    /// Field-to-value map.
    Hash = 2,
    /// Unordered member set.
    Set = 3,
    /// Double-ended list.
    List = 4,
    /// Members ordered by score.
    ZSet = 5,
}

impl RedisType {
    /// Converts a byte to a data type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::String),
            2 => Some(Self::Hash),
            3 => Some(Self::Set),
            4 => Some(Self::List),
            5 => Some(Self::ZSet),
            _ => None,
        }
    }

    /// Converts the data type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Redis-style data structure service over an Ember [`Database`].
///
/// # Example
///
/// ```no_run
/// use ember_core::Config;
/// use ember_redis::RedisStore;
///
/// let store = RedisStore::open(Config::new().dir_path("/tmp/ember-redis"))?;
/// store.set(b"greeting", None, b"hello")?;
/// assert_eq!(store.get(b"greeting")?, Some(b"hello".to_vec()));
/// # Ok::<(), ember_redis::RedisError>(())
/// ```
pub struct RedisStore {
    db: Database,
}

impl RedisStore {
    /// Opens a store backed by an engine at `config.dir_path`.
    pub fn open(config: Config) -> RedisResult<Self> {
        Ok(Self {
            db: Database::open(config)?,
        })
    }

    /// Closes the underlying engine.
    pub fn close(self) -> RedisResult<()> {
        self.db.close()?;
        Ok(())
    }

    /// Returns the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Database {
        &self.db
    }

    // === generic commands ===

    /// Removes `key` of any type.
    ///
    /// Element records of composite types are left for the next merge;
    /// deleting the metadata makes them unreachable.
    pub fn del(&self, key: &[u8]) -> RedisResult<()> {
        self.db.delete(key)?;
        Ok(())
    }

    /// Returns the data type stored under `key`, or `None` if absent.
    pub fn key_type(&self, key: &[u8]) -> RedisResult<Option<RedisType>> {
        let Some(value) = self.engine_get(key)? else {
            return Ok(None);
        };
        let type_byte = *value.first().ok_or(RedisError::MalformedValue)?;
        Ok(Some(
            RedisType::from_byte(type_byte).ok_or(RedisError::MalformedValue)?,
        ))
    }

    // === string commands ===

    /// Stores `value` under `key`, optionally expiring after `ttl`.
    ///
    /// Empty values are stored like any other payload.
    pub fn set(&self, key: &[u8], ttl: Option<Duration>, value: &[u8]) -> RedisResult<()> {
        let expire = match ttl {
            Some(ttl) => now_nanos() + ttl.as_nanos() as i64,
            None => 0,
        };

        let mut encoded = Vec::with_capacity(1 + 10 + value.len());
        encoded.push(RedisType::String.as_byte());
        encoded.extend_from_slice(&expire.encode_var_vec());
        encoded.extend_from_slice(value);

        self.db.put(key, &encoded)?;
        Ok(())
    }

    /// Returns the string stored under `key`.
    ///
    /// Absent and expired keys both read as `None`.
    pub fn get(&self, key: &[u8]) -> RedisResult<Option<Vec<u8>>> {
        let Some(encoded) = self.engine_get(key)? else {
            return Ok(None);
        };

        if *encoded.first().ok_or(RedisError::MalformedValue)? != RedisType::String.as_byte() {
            return Err(RedisError::WrongTypeOperation);
        }

        let (expire, n) = i64::decode_var(&encoded[1..]).ok_or(RedisError::MalformedValue)?;
        if expire > 0 && expire <= now_nanos() {
            return Ok(None);
        }

        Ok(Some(encoded[1 + n..].to_vec()))
    }

    // === hash commands ===

    /// Stores `value` under `field` of the hash at `key`.
    ///
    /// Returns true if the field was newly created.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> RedisResult<bool> {
        let mut meta = self.find_metadata(key, RedisType::Hash)?;
        let internal_key = hash_internal_key(key, meta.version, field);
        let exists = self.engine_get(&internal_key)?.is_some();

        let wb = self.db.new_write_batch(WriteBatchOptions::default());
        if !exists {
            meta.size += 1;
            wb.put(key, &meta.encode())?;
        }
        wb.put(&internal_key, value)?;
        wb.commit()?;

        Ok(!exists)
    }

    /// Returns the value of `field` in the hash at `key`.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> RedisResult<Option<Vec<u8>>> {
        let meta = self.find_metadata(key, RedisType::Hash)?;
        if meta.size == 0 {
            return Ok(None);
        }
        self.engine_get(&hash_internal_key(key, meta.version, field))
    }

    /// Removes `field` from the hash at `key`; returns whether it existed.
    pub fn hdel(&self, key: &[u8], field: &[u8]) -> RedisResult<bool> {
        let mut meta = self.find_metadata(key, RedisType::Hash)?;
        if meta.size == 0 {
            return Ok(false);
        }

        let internal_key = hash_internal_key(key, meta.version, field);
        let exists = self.engine_get(&internal_key)?.is_some();
        if exists {
            let wb = self.db.new_write_batch(WriteBatchOptions::default());
            meta.size -= 1;
            wb.put(key, &meta.encode())?;
            wb.delete(&internal_key)?;
            wb.commit()?;
        }
        Ok(exists)
    }

    // === set commands ===

    /// Adds `member` to the set at `key`; returns whether it was new.
    pub fn sadd(&self, key: &[u8], member: &[u8]) -> RedisResult<bool> {
        let mut meta = self.find_metadata(key, RedisType::Set)?;
        let internal_key = set_internal_key(key, meta.version, member);
        if self.engine_get(&internal_key)?.is_some() {
            return Ok(false);
        }

        let wb = self.db.new_write_batch(WriteBatchOptions::default());
        meta.size += 1;
        wb.put(key, &meta.encode())?;
        wb.put(&internal_key, &[])?;
        wb.commit()?;
        Ok(true)
    }

    /// Returns whether `member` is in the set at `key`.
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> RedisResult<bool> {
        let meta = self.find_metadata(key, RedisType::Set)?;
        if meta.size == 0 {
            return Ok(false);
        }
        Ok(self
            .engine_get(&set_internal_key(key, meta.version, member))?
            .is_some())
    }

    /// Removes `member` from the set at `key`; returns whether it existed.
    pub fn srem(&self, key: &[u8], member: &[u8]) -> RedisResult<bool> {
        let mut meta = self.find_metadata(key, RedisType::Set)?;
        if meta.size == 0 {
            return Ok(false);
        }

        let internal_key = set_internal_key(key, meta.version, member);
        if self.engine_get(&internal_key)?.is_none() {
            return Ok(false);
        }

        let wb = self.db.new_write_batch(WriteBatchOptions::default());
        meta.size -= 1;
        wb.put(key, &meta.encode())?;
        wb.delete(&internal_key)?;
        wb.commit()?;
        Ok(true)
    }

    // === list commands ===

    /// Prepends `element` to the list at `key`; returns the new length.
    pub fn lpush(&self, key: &[u8], element: &[u8]) -> RedisResult<u32> {
        self.push_inner(key, element, true)
    }

    /// Appends `element` to the list at `key`; returns the new length.
    pub fn rpush(&self, key: &[u8], element: &[u8]) -> RedisResult<u32> {
        self.push_inner(key, element, false)
    }

    /// Removes and returns the first element of the list at `key`.
    pub fn lpop(&self, key: &[u8]) -> RedisResult<Option<Vec<u8>>> {
        self.pop_inner(key, true)
    }

    /// Removes and returns the last element of the list at `key`.
    pub fn rpop(&self, key: &[u8]) -> RedisResult<Option<Vec<u8>>> {
        self.pop_inner(key, false)
    }

    fn push_inner(&self, key: &[u8], element: &[u8], is_left: bool) -> RedisResult<u32> {
        let mut meta = self.find_metadata(key, RedisType::List)?;

        let index = if is_left { meta.head - 1 } else { meta.tail };
        let internal_key = list_internal_key(key, meta.version, index);

        meta.size += 1;
        if is_left {
            meta.head -= 1;
        } else {
            meta.tail += 1;
        }

        let wb = self.db.new_write_batch(WriteBatchOptions::default());
        wb.put(key, &meta.encode())?;
        wb.put(&internal_key, element)?;
        wb.commit()?;

        Ok(meta.size)
    }

    fn pop_inner(&self, key: &[u8], is_left: bool) -> RedisResult<Option<Vec<u8>>> {
        let mut meta = self.find_metadata(key, RedisType::List)?;
        if meta.size == 0 {
            return Ok(None);
        }

        let index = if is_left { meta.head } else { meta.tail - 1 };
        let element = self
            .engine_get(&list_internal_key(key, meta.version, index))?
            .ok_or(RedisError::MalformedValue)?;

        meta.size -= 1;
        if is_left {
            meta.head += 1;
        } else {
            meta.tail -= 1;
        }
        // The popped element record becomes garbage for the next merge.
        self.db.put(key, &meta.encode())?;

        Ok(Some(element))
    }

    // === sorted-set commands ===

    /// Adds `member` with `score` to the sorted set at `key`.
    ///
    /// Returns true if the member was newly created; updating the score of
    /// an existing member returns false.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> RedisResult<bool> {
        let mut meta = self.find_metadata(key, RedisType::ZSet)?;

        let member_key = zset_member_key(key, meta.version, member);
        let old_score = self.engine_get(&member_key)?;
        if let Some(old) = &old_score {
            if float_from_bytes(old) == Some(score) {
                return Ok(false);
            }
        }

        let wb = self.db.new_write_batch(WriteBatchOptions::default());
        if old_score.is_none() {
            meta.size += 1;
            wb.put(key, &meta.encode())?;
        }
        if let Some(old) = &old_score {
            // Two records per entry; drop the stale score-ordered twin.
            let old_score = float_from_bytes(old).ok_or(RedisError::MalformedValue)?;
            wb.delete(&zset_score_key(key, meta.version, old_score, member))?;
        }
        wb.put(&member_key, &float_to_bytes(score))?;
        wb.put(&zset_score_key(key, meta.version, score, member), &[])?;
        wb.commit()?;

        Ok(old_score.is_none())
    }

    /// Returns the score of `member` in the sorted set at `key`.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> RedisResult<Option<f64>> {
        let meta = self.find_metadata(key, RedisType::ZSet)?;
        if meta.size == 0 {
            return Ok(None);
        }

        match self.engine_get(&zset_member_key(key, meta.version, member))? {
            Some(score) => Ok(Some(
                float_from_bytes(&score).ok_or(RedisError::MalformedValue)?,
            )),
            None => Ok(None),
        }
    }

    // === helpers ===

    /// Loads the metadata of a composite key, or fresh metadata when the
    /// key is absent or expired.
    fn find_metadata(&self, key: &[u8], data_type: RedisType) -> RedisResult<Metadata> {
        match self.engine_get(key)? {
            Some(encoded) => {
                let type_byte = *encoded.first().ok_or(RedisError::MalformedValue)?;
                let stored = RedisType::from_byte(type_byte).ok_or(RedisError::MalformedValue)?;
                if stored != data_type {
                    return Err(RedisError::WrongTypeOperation);
                }
                let meta = Metadata::decode(&encoded).ok_or(RedisError::MalformedValue)?;
                if meta.expire != 0 && meta.expire <= now_nanos() {
                    return Ok(Metadata::fresh(data_type, now_nanos()));
                }
                Ok(meta)
            }
            None => Ok(Metadata::fresh(data_type, now_nanos())),
        }
    }

    /// Engine read with the miss mapped to `None`.
    fn engine_get(&self, key: &[u8]) -> RedisResult<Option<Vec<u8>>> {
        match self.db.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(CoreError::KeyNotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Current wall clock as unix nanoseconds.
fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> RedisStore {
        RedisStore::open(Config::new().dir_path(dir)).unwrap()
    }

    #[test]
    fn string_set_get() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.set(b"k1", None, b"v1").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);

        store.close().unwrap();
    }

    #[test]
    fn empty_string_overwrites() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.set(b"k", None, b"old").unwrap();
        store.set(b"k", None, b"").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(Vec::new()));

        store.close().unwrap();
    }

    #[test]
    fn string_expiry() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store
            .set(b"ephemeral", Some(Duration::from_millis(200)), b"v")
            .unwrap();
        assert!(store.get(b"ephemeral").unwrap().is_some());

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(store.get(b"ephemeral").unwrap(), None);

        store.close().unwrap();
    }

    #[test]
    fn del_and_type() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        // Deleting an absent key is allowed.
        store.del(b"nothing").unwrap();

        store.set(b"k1", None, b"v").unwrap();
        assert_eq!(store.key_type(b"k1").unwrap(), Some(RedisType::String));

        store.del(b"k1").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), None);
        assert_eq!(store.key_type(b"k1").unwrap(), None);

        store.hset(b"h", b"f", b"v").unwrap();
        assert_eq!(store.key_type(b"h").unwrap(), Some(RedisType::Hash));

        store.close().unwrap();
    }

    #[test]
    fn wrong_type_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.hset(b"h", b"f", b"v").unwrap();
        assert!(matches!(
            store.get(b"h"),
            Err(RedisError::WrongTypeOperation)
        ));
        assert!(matches!(
            store.sadd(b"h", b"m"),
            Err(RedisError::WrongTypeOperation)
        ));

        store.close().unwrap();
    }

    #[test]
    fn hash_operations() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(store.hset(b"h", b"f1", b"v1").unwrap());
        assert!(!store.hset(b"h", b"f1", b"v1-updated").unwrap());
        assert!(store.hset(b"h", b"f2", b"v2").unwrap());

        assert_eq!(store.hget(b"h", b"f1").unwrap(), Some(b"v1-updated".to_vec()));
        assert_eq!(store.hget(b"h", b"f2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.hget(b"h", b"f3").unwrap(), None);

        assert!(store.hdel(b"h", b"f1").unwrap());
        assert!(!store.hdel(b"h", b"f1").unwrap());
        assert_eq!(store.hget(b"h", b"f1").unwrap(), None);

        store.close().unwrap();
    }

    #[test]
    fn hash_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.hset(b"h", b"f", b"v").unwrap();
            store.close().unwrap();
        }

        let store = open_store(dir.path());
        assert_eq!(store.hget(b"h", b"f").unwrap(), Some(b"v".to_vec()));
        store.close().unwrap();
    }

    #[test]
    fn set_operations() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(store.sadd(b"s", b"m1").unwrap());
        assert!(!store.sadd(b"s", b"m1").unwrap());
        assert!(store.sadd(b"s", b"m2").unwrap());

        assert!(store.sismember(b"s", b"m1").unwrap());
        assert!(!store.sismember(b"s", b"m3").unwrap());

        assert!(store.srem(b"s", b"m1").unwrap());
        assert!(!store.srem(b"s", b"m1").unwrap());
        assert!(!store.sismember(b"s", b"m1").unwrap());

        store.close().unwrap();
    }

    #[test]
    fn list_push_pop_order() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert_eq!(store.rpush(b"l", b"b").unwrap(), 1);
        assert_eq!(store.rpush(b"l", b"c").unwrap(), 2);
        assert_eq!(store.lpush(b"l", b"a").unwrap(), 3);

        assert_eq!(store.lpop(b"l").unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.rpop(b"l").unwrap(), Some(b"c".to_vec()));
        assert_eq!(store.lpop(b"l").unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.lpop(b"l").unwrap(), None);
        assert_eq!(store.rpop(b"l").unwrap(), None);

        store.close().unwrap();
    }

    #[test]
    fn zset_operations() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert!(store.zadd(b"z", 113.0, b"m1").unwrap());
        // Same member, same score: no-op.
        assert!(!store.zadd(b"z", 113.0, b"m1").unwrap());
        // Same member, new score: update, not a creation.
        assert!(!store.zadd(b"z", 339.5, b"m1").unwrap());

        assert_eq!(store.zscore(b"z", b"m1").unwrap(), Some(339.5));
        assert_eq!(store.zscore(b"z", b"m2").unwrap(), None);

        store.close().unwrap();
    }
}
