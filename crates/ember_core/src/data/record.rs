//! Log record types and serialization.
//!
//! Records are persisted in the envelope
//!
//! ```text
//! | crc32_le (4) | type (1) | key_size (varint) | value_size (varint) | key | value |
//! ```
//!
//! where the sizes are zig-zag varints and the CRC covers every byte after
//! the CRC field itself. Keys written to segments carry a zig-zag varint
//! batch sequence number prefix; `0` marks a non-batch write.

use crate::error::CoreResult;
use bytes::{BufMut, Bytes, BytesMut};
use integer_encoding::VarInt;

/// Sequence number carried by records written outside a batch.
pub const NON_TXN_SEQ_NO: u64 = 0;

/// Fixed part of the record header: crc (4) + type (1).
const FIXED_HEADER_SIZE: usize = 5;

/// Largest possible record header: crc (4) + type (1) + two 5-byte varints.
pub(crate) const MAX_RECORD_HEADER_SIZE: usize = FIXED_HEADER_SIZE + 2 * 5;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key-value pair.
    Normal = 0,
    /// Marks a key as deleted; carries no value.
    Tombstone = 1,
    /// Terminates a batch; all records of the batch's sequence number
    /// precede it on disk.
    TxnFinished = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::Tombstone),
            2 => Some(Self::TxnFinished),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A record appended to a data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record key, including the sequence number prefix when persisted.
    pub key: Vec<u8>,
    /// Record value; empty for tombstones and batch terminators.
    pub value: Vec<u8>,
    /// Record type.
    pub rec_type: RecordType,
}

impl LogRecord {
    /// Creates a live record.
    #[must_use]
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            rec_type: RecordType::Normal,
        }
    }

    /// Creates a tombstone record.
    #[must_use]
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: RecordType::Tombstone,
        }
    }

    /// Encodes the record, returning the bytes and the total encoded size.
    #[must_use]
    pub fn encode(&self) -> (Bytes, u64) {
        let mut header = [0u8; MAX_RECORD_HEADER_SIZE];
        header[4] = self.rec_type.as_byte();

        let mut index = FIXED_HEADER_SIZE;
        index += (self.key.len() as i64).encode_var(&mut header[index..]);
        index += (self.value.len() as i64).encode_var(&mut header[index..]);

        let total = index + self.key.len() + self.value.len();
        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(&header[..index]);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());

        (buf.freeze(), total as u64)
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    /// Checksum over everything after the CRC field.
    pub crc: u32,
    /// Raw record type byte.
    pub type_byte: u8,
    /// Length of the key in bytes.
    pub key_size: u32,
    /// Length of the value in bytes.
    pub value_size: u32,
}

/// Decodes a record header from the front of `buf`.
///
/// Returns `None` if the buffer is shorter than the minimum header or the
/// varint sizes are truncated - the caller treats this as the end of the
/// segment.
pub(crate) fn decode_header(buf: &[u8]) -> Option<(RecordHeader, usize)> {
    if buf.len() < FIXED_HEADER_SIZE {
        return None;
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let type_byte = buf[4];

    let mut index = FIXED_HEADER_SIZE;
    let (key_size, n) = i64::decode_var(&buf[index..])?;
    index += n;
    let (value_size, n) = i64::decode_var(&buf[index..])?;
    index += n;

    Some((
        RecordHeader {
            crc,
            type_byte,
            key_size: key_size as u32,
            value_size: value_size as u32,
        },
        index,
    ))
}

/// Recomputes the checksum of a decoded record.
///
/// `header_tail` is the encoded header without its leading CRC field.
pub(crate) fn record_crc(record: &LogRecord, header_tail: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_tail);
    hasher.update(&record.key);
    hasher.update(&record.value);
    hasher.finalize()
}

/// Location of a record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    /// Segment holding the record.
    pub file_id: u32,
    /// Byte offset of the record within the segment.
    pub offset: u64,
    /// Total encoded size of the record.
    ///
    /// Zero when the position was restored from a hint file or the
    /// persistent index; such entries do not count toward the reclaimable
    /// size until the key is written again.
    pub size: u32,
}

impl RecordPosition {
    /// Encodes the position as two zig-zag varints (file id, then offset).
    ///
    /// The size field is not persisted.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 5 + 10];
        let mut index = 0;
        index += (i64::from(self.file_id)).encode_var(&mut buf[index..]);
        index += (self.offset as i64).encode_var(&mut buf[index..]);
        buf.truncate(index);
        buf
    }

    /// Decodes a position previously produced by [`RecordPosition::encode`].
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let (file_id, n) = i64::decode_var(buf)?;
        let (offset, _) = i64::decode_var(&buf[n..])?;
        Some(Self {
            file_id: file_id as u32,
            offset: offset as u64,
            size: 0,
        })
    }
}

/// Prepends the batch sequence number to a user key.
#[must_use]
pub(crate) fn encode_record_key(key: &[u8], seq_no: u64) -> Vec<u8> {
    let seq = seq_no as i64;
    let mut buf = Vec::with_capacity(seq.required_space() + key.len());
    buf.extend_from_slice(&seq.encode_var_vec());
    buf.extend_from_slice(key);
    buf
}

/// Splits an on-disk key into the user key and its batch sequence number.
pub(crate) fn parse_record_key(key: &[u8]) -> CoreResult<(Vec<u8>, u64)> {
    let (seq, n) = i64::decode_var(key).ok_or_else(|| {
        crate::error::CoreError::data_directory_corrupted("record key has no sequence prefix")
    })?;
    Ok((key[n..].to_vec(), seq as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn record_type_roundtrip() {
        for t in [
            RecordType::Normal,
            RecordType::Tombstone,
            RecordType::TxnFinished,
        ] {
            assert_eq!(RecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(RecordType::from_byte(7), None);
    }

    #[test]
    fn encode_and_decode_header() {
        let record = LogRecord::normal(b"name".to_vec(), b"ember".to_vec());
        let (buf, size) = record.encode();
        assert_eq!(buf.len() as u64, size);

        let (header, header_size) = decode_header(&buf).unwrap();
        assert_eq!(header.type_byte, RecordType::Normal.as_byte());
        assert_eq!(header.key_size, 4);
        assert_eq!(header.value_size, 5);
        assert_eq!(header_size as u64 + 4 + 5, size);

        let crc = record_crc(&record, &buf[4..header_size]);
        assert_eq!(crc, header.crc);
    }

    #[test]
    fn encode_empty_value() {
        let record = LogRecord::tombstone(b"gone".to_vec());
        let (buf, _) = record.encode();

        let (header, header_size) = decode_header(&buf).unwrap();
        assert_eq!(header.type_byte, RecordType::Tombstone.as_byte());
        assert_eq!(header.value_size, 0);
        assert_eq!(record_crc(&record, &buf[4..header_size]), header.crc);
    }

    #[test]
    fn short_buffer_has_no_header() {
        assert!(decode_header(&[]).is_none());
        assert!(decode_header(&[0, 1, 2, 3]).is_none());
    }

    #[test]
    fn corruption_changes_crc() {
        let record = LogRecord::normal(b"key".to_vec(), b"value".to_vec());
        let (buf, _) = record.encode();
        let mut corrupted = buf.to_vec();
        // Flip a byte inside the key.
        corrupted[8] ^= 0xFF;

        let (header, header_size) = decode_header(&corrupted).unwrap();
        let decoded = LogRecord {
            key: corrupted[header_size..header_size + header.key_size as usize].to_vec(),
            value: corrupted[header_size + header.key_size as usize..].to_vec(),
            rec_type: RecordType::Normal,
        };
        assert_ne!(
            record_crc(&decoded, &corrupted[4..header_size]),
            header.crc
        );
    }

    #[test]
    fn position_roundtrip_drops_size() {
        let pos = RecordPosition {
            file_id: 3,
            offset: 12_345,
            size: 99,
        };
        let decoded = RecordPosition::decode(&pos.encode()).unwrap();
        assert_eq!(decoded.file_id, 3);
        assert_eq!(decoded.offset, 12_345);
        assert_eq!(decoded.size, 0);
    }

    #[test]
    fn record_key_roundtrip() {
        let encoded = encode_record_key(b"user:1", 42);
        let (key, seq) = parse_record_key(&encoded).unwrap();
        assert_eq!(key, b"user:1");
        assert_eq!(seq, 42);

        let plain = encode_record_key(b"plain", NON_TXN_SEQ_NO);
        let (key, seq) = parse_record_key(&plain).unwrap();
        assert_eq!(key, b"plain");
        assert_eq!(seq, NON_TXN_SEQ_NO);
    }

    proptest! {
        #[test]
        fn any_record_header_roundtrips(
            key in prop::collection::vec(any::<u8>(), 1..256),
            value in prop::collection::vec(any::<u8>(), 0..1024),
        ) {
            let record = LogRecord::normal(key.clone(), value.clone());
            let (buf, size) = record.encode();
            prop_assert_eq!(buf.len() as u64, size);

            let (header, header_size) = decode_header(&buf).unwrap();
            prop_assert_eq!(header.key_size as usize, key.len());
            prop_assert_eq!(header.value_size as usize, value.len());
            prop_assert_eq!(record_crc(&record, &buf[4..header_size]), header.crc);
        }

        #[test]
        fn any_record_key_roundtrips(
            key in prop::collection::vec(any::<u8>(), 1..128),
            seq in 0u64..u64::MAX / 2,
        ) {
            let encoded = encode_record_key(&key, seq);
            let (parsed, parsed_seq) = parse_record_key(&encoded).unwrap();
            prop_assert_eq!(parsed, key);
            prop_assert_eq!(parsed_seq, seq);
        }
    }
}
