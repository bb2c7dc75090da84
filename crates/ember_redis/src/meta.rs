//! Metadata records and composite key encodings.
//!
//! Composite types keep one metadata record under the user key and their
//! elements under composite keys that concatenate the user key, the
//! metadata version, and a type-specific discriminator. Bumping the
//! version on recreation makes the old elements unreachable at once.

use crate::types::RedisType;
use integer_encoding::VarInt;

/// First list index of a fresh list; pushes grow in both directions.
pub(crate) const INITIAL_LIST_SEQ: u64 = u64::MAX / 2;

/// Metadata stored under the user key of every composite type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Metadata {
    /// Data type of the key.
    pub data_type: RedisType,
    /// Expiry as unix nanoseconds; zero means no expiry.
    pub expire: i64,
    /// Version stamped into every element key.
    pub version: i64,
    /// Number of elements.
    pub size: u32,
    /// First list index; list type only.
    pub head: u64,
    /// One past the last list index; list type only.
    pub tail: u64,
}

impl Metadata {
    /// Creates fresh metadata for `data_type` with the given version.
    pub(crate) fn fresh(data_type: RedisType, version: i64) -> Self {
        Self {
            data_type,
            expire: 0,
            version,
            size: 0,
            head: INITIAL_LIST_SEQ,
            tail: INITIAL_LIST_SEQ,
        }
    }

    /// Encodes the metadata record value.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 3 * 10 + 2 * 10);
        buf.push(self.data_type.as_byte());
        buf.extend_from_slice(&self.expire.encode_var_vec());
        buf.extend_from_slice(&self.version.encode_var_vec());
        buf.extend_from_slice(&i64::from(self.size).encode_var_vec());
        if self.data_type == RedisType::List {
            buf.extend_from_slice(&self.head.encode_var_vec());
            buf.extend_from_slice(&self.tail.encode_var_vec());
        }
        buf
    }

    /// Decodes a metadata record value.
    pub(crate) fn decode(buf: &[u8]) -> Option<Self> {
        let data_type = RedisType::from_byte(*buf.first()?)?;
        let mut index = 1;

        let (expire, n) = i64::decode_var(&buf[index..])?;
        index += n;
        let (version, n) = i64::decode_var(&buf[index..])?;
        index += n;
        let (size, n) = i64::decode_var(&buf[index..])?;
        index += n;

        let (mut head, mut tail) = (INITIAL_LIST_SEQ, INITIAL_LIST_SEQ);
        if data_type == RedisType::List {
            let (h, n) = u64::decode_var(&buf[index..])?;
            index += n;
            let (t, _) = u64::decode_var(&buf[index..])?;
            head = h;
            tail = t;
        }

        Some(Self {
            data_type,
            expire,
            version,
            size: size as u32,
            head,
            tail,
        })
    }
}

/// `key ‖ version ‖ field` - one record per hash field.
pub(crate) fn hash_internal_key(key: &[u8], version: i64, field: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 8 + field.len());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(field);
    buf
}

/// `key ‖ version ‖ member ‖ member_len` - one record per set member.
pub(crate) fn set_internal_key(key: &[u8], version: i64, member: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 8 + member.len() + 4);
    buf.extend_from_slice(key);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(member);
    buf.extend_from_slice(&(member.len() as u32).to_le_bytes());
    buf
}

/// `key ‖ version ‖ index` - one record per list slot. The index is
/// big-endian so slot keys sort in list order.
pub(crate) fn list_internal_key(key: &[u8], version: i64, index: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 8 + 8);
    buf.extend_from_slice(key);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&index.to_be_bytes());
    buf
}

/// `key ‖ version ‖ member` - looks a sorted-set member up by name.
pub(crate) fn zset_member_key(key: &[u8], version: i64, member: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 8 + member.len());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(member);
    buf
}

/// `key ‖ version ‖ score ‖ member ‖ member_len` - the score-ordered twin
/// record of a sorted-set entry.
pub(crate) fn zset_score_key(key: &[u8], version: i64, score: f64, member: &[u8]) -> Vec<u8> {
    let score_bytes = float_to_bytes(score);
    let mut buf = Vec::with_capacity(key.len() + 8 + score_bytes.len() + member.len() + 4);
    buf.extend_from_slice(key);
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&score_bytes);
    buf.extend_from_slice(member);
    buf.extend_from_slice(&(member.len() as u32).to_le_bytes());
    buf
}

/// Encodes a score as its decimal string.
pub(crate) fn float_to_bytes(value: f64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decodes a score stored by [`float_to_bytes`].
pub(crate) fn float_from_bytes(buf: &[u8]) -> Option<f64> {
    std::str::from_utf8(buf).ok()?.parse().ok()
}
