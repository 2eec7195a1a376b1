//! JSON-array record files.
//!
//! Writes are atomic: the new content goes to a temp file next to the
//! target and is renamed over it. The previous file is kept as `.bak`.

use crate::models::{PrefgenError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A record read from a store file, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRecord {
    pub file: String,
    pub index: usize,
    pub value: Value,
}

impl LoadedRecord {
    pub fn new(file: impl Into<String>, index: usize, value: Value) -> Self {
        Self {
            file: file.into(),
            index,
            value,
        }
    }

    /// `file:index` label used in reports.
    pub fn source(&self) -> String {
        format!("{}:{}", self.file, self.index)
    }

    /// The record's `id` field, if it is a string.
    pub fn id(&self) -> Option<&str> {
        self.value.get("id").and_then(Value::as_str)
    }
}

/// Entry counts for one store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCount {
    pub file: String,
    pub entries: usize,
}

/// Entry counts for a directory of store files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryCounts {
    pub files: Vec<FileCount>,
    pub unreadable: Vec<String>,
    pub total: usize,
}

fn parse_error(path: &Path, e: serde_json::Error) -> PrefgenError {
    PrefgenError::ParseError(format!("{}: {e}", path.display()))
}

fn read_json(path: &Path) -> Result<Value> {
    let file = File::open(path)
        .map_err(|e| PrefgenError::io(format!("opening {}", path.display()), e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| parse_error(path, e))
}

fn into_records(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    }
}

/// Load the records of one store file.
///
/// A missing file is an empty store; a top-level object is one record.
pub fn load_records(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    match read_json(path)? {
        value @ (Value::Array(_) | Value::Object(_)) => Ok(into_records(value)),
        _ => Err(PrefgenError::ParseError(format!(
            "{}: expected a JSON array of records",
            path.display()
        ))),
    }
}

/// Replace the store at `path` with `records`.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| PrefgenError::io(format!("creating {}", parent.display()), e))?;
    }

    if path.exists() {
        fs::copy(path, sibling(path, "bak"))
            .map_err(|e| PrefgenError::io("backing up store", e))?;
    }

    let temp_path = sibling(path, "tmp");
    let file = File::create(&temp_path)
        .map_err(|e| PrefgenError::io("creating temp store", e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)
        .map_err(|e| PrefgenError::Internal(format!("Serializing records: {e}")))?;
    writer
        .flush()
        .map_err(|e| PrefgenError::io("flushing temp store", e))?;
    drop(writer);

    fs::rename(&temp_path, path).map_err(|e| PrefgenError::io("renaming store", e))?;

    debug!(path = %path.display(), records = records.len(), "Store written");
    Ok(())
}

/// Append `records` to the store at `path`, returning the new length.
pub fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<usize> {
    let mut all = load_records(path)?;
    for record in records {
        let value = serde_json::to_value(record)
            .map_err(|e| PrefgenError::Internal(format!("Serializing record: {e}")))?;
        all.push(value);
    }
    write_records(path, &all)?;
    Ok(all.len())
}

/// Load every `*.json` store file in `dir`, sorted by file name.
///
/// Files that fail to parse are logged and skipped.
pub fn load_dir(dir: &Path) -> Result<Vec<LoadedRecord>> {
    let mut records = Vec::new();
    for path in json_files(dir)? {
        let name = file_name(&path);
        match read_json(&path) {
            Ok(value) => {
                let items = into_records(value);
                debug!(file = %name, records = items.len(), "Loaded store file");
                records.extend(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(index, value)| LoadedRecord::new(name.clone(), index, value)),
                );
            }
            Err(e) => warn!(file = %name, error = %e, "Skipping unreadable store file"),
        }
    }
    Ok(records)
}

/// Load records from a single store file or a directory of them.
pub fn load_path(path: &Path) -> Result<Vec<LoadedRecord>> {
    if path.is_dir() {
        return load_dir(path);
    }
    if !path.exists() {
        return Err(PrefgenError::io(
            format!("reading {}", path.display()),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }
    let name = file_name(path);
    Ok(load_records(path)?
        .into_iter()
        .enumerate()
        .map(|(index, value)| LoadedRecord::new(name.clone(), index, value))
        .collect())
}

/// Count entries per `*.json` file in `dir`.
///
/// Arrays count their length, objects count one, anything else zero.
pub fn count_entries(dir: &Path) -> Result<EntryCounts> {
    let mut counts = EntryCounts::default();
    for path in json_files(dir)? {
        let name = file_name(&path);
        match read_json(&path) {
            Ok(value) => {
                let entries = match &value {
                    Value::Array(items) => items.len(),
                    Value::Object(_) => 1,
                    _ => 0,
                };
                counts.total += entries;
                counts.files.push(FileCount {
                    file: name,
                    entries,
                });
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Could not count entries");
                counts.unreadable.push(name);
            }
        }
    }
    Ok(counts)
}

/// `<dir>/<prefix>_<ddHHMMSS>.json` for the current local time.
pub fn timestamped_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%d%H%M%S");
    dir.join(format!("{prefix}_{stamp}.json"))
}

/// Files in `dir` matching `*<suffix>`, sorted.
///
/// `dir` and `suffix` are matched literally, glob metacharacters included.
pub(crate) fn files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let escaped_dir = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = Path::new(&escaped_dir).join(format!("*{}", glob::Pattern::escape(suffix)));
    let pattern_str = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob::glob(&pattern_str)
        .map_err(|e| PrefgenError::Internal(format!("Invalid glob pattern: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    files_with_suffix(dir, ".json")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_store_is_empty() {
        let temp = TempDir::new().unwrap();
        let records = load_records(&temp.path().join("nope.json")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_append_concatenates_and_keeps_backup() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("store.json");

        assert_eq!(append_records(&path, &[json!({"id": "a"})]).unwrap(), 1);
        assert_eq!(
            append_records(&path, &[json!({"id": "b"}), json!({"id": "c"})]).unwrap(),
            3
        );

        let records = load_records(&path).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let backup = load_records(&temp.path().join("out").join("store.json.bak")).unwrap();
        assert_eq!(backup.len(), 1);
        assert!(!temp.path().join("out").join("store.json.tmp").exists());
    }

    #[test]
    fn test_load_records_rejects_scalar() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, "42").unwrap();
        assert!(matches!(
            load_records(&path),
            Err(PrefgenError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_dir_sorted_with_sources_and_skips_bad_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("b.json"), r#"{"id": "solo"}"#).unwrap();
        fs::write(temp.path().join("a.json"), r#"[{"id": "x"}, {"id": "y"}]"#).unwrap();
        fs::write(temp.path().join("c.json"), "not json").unwrap();
        fs::write(temp.path().join("notes.txt"), "[]").unwrap();

        let records = load_dir(temp.path()).unwrap();
        let sources: Vec<_> = records.iter().map(LoadedRecord::source).collect();
        assert_eq!(sources, vec!["a.json:0", "a.json:1", "b.json:0"]);
        assert_eq!(records[2].id(), Some("solo"));
    }

    #[test]
    fn test_load_path_file_and_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("one.json");
        fs::write(&path, r#"[{"id": "a"}, {"id": "b"}]"#).unwrap();

        let from_file = load_path(&path).unwrap();
        assert_eq!(from_file[1].source(), "one.json:1");
        assert_eq!(load_path(temp.path()).unwrap(), from_file);
        assert!(load_path(&temp.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_dir_with_glob_metacharacters() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data[1]");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("a.json"), r#"[{"id": "x"}]"#).unwrap();
        fs::write(dir.join("b.json"), r#"[{"id": "y"}, {"id": "z"}]"#).unwrap();

        assert_eq!(files_with_suffix(&dir, ".json").unwrap().len(), 2);
        assert_eq!(load_dir(&dir).unwrap().len(), 3);
        assert_eq!(count_entries(&dir).unwrap().total, 3);
    }

    #[test]
    fn test_count_entries() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.json"), r#"[1, 2, 3]"#).unwrap();
        fs::write(temp.path().join("b.json"), r#"{"k": 1}"#).unwrap();
        fs::write(temp.path().join("c.json"), r#""text""#).unwrap();
        fs::write(temp.path().join("d.json"), "{").unwrap();

        let counts = count_entries(temp.path()).unwrap();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.files.len(), 3);
        assert_eq!(counts.files[2].entries, 0);
        assert_eq!(counts.unreadable, vec!["d.json"]);
    }

    #[test]
    fn test_timestamped_path_shape() {
        let path = timestamped_path(Path::new("rlhf"), "rlhf_batch");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("rlhf_batch_"));
        assert!(name.ends_with(".json"));
        let stamp = &name["rlhf_batch_".len()..name.len() - ".json".len()];
        assert_eq!(stamp.len(), 8);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }
}
