//! On-disk record format and segment file access.

mod data_file;
mod record;

pub use data_file::{
    DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
pub use record::{LogRecord, RecordPosition, RecordType, NON_TXN_SEQ_NO};

pub(crate) use data_file::{data_file_path, DataFile};
pub(crate) use record::{encode_record_key, parse_record_key};
