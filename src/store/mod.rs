//! Persisted record store: JSON arrays on disk.

mod records;

pub(crate) use records::files_with_suffix;
pub use records::{
    EntryCounts, FileCount, LoadedRecord, append_records, count_entries, load_dir, load_path,
    load_records, timestamped_path, write_records,
};
