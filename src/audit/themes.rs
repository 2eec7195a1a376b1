//! Theme file checks.

use super::Issue;
use crate::models::{Result, THEME_KEYS};
use crate::store::files_with_suffix;
use serde_json::Value;
use std::path::Path;

/// Issues for every `*<suffix>` theme file in `dir`.
///
/// A file may hold one theme object or an array of them.
pub fn check_themes(dir: &Path, suffix: &str) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();

    for path in files_with_suffix(dir, suffix)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<Value>(&content).map_err(|e| e.to_string())
            });
        let value = match parsed {
            Ok(value) => value,
            Err(e) => {
                issues.push(Issue::new(&name, format!("unreadable: {e}")));
                continue;
            }
        };

        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for (index, item) in items.iter().enumerate() {
            let source = format!("{name}:{index}");
            let Some(object) = item.as_object() else {
                issues.push(Issue::new(source, "theme is not a JSON object"));
                continue;
            };
            let missing: Vec<&str> = THEME_KEYS
                .iter()
                .copied()
                .filter(|key| !object.contains_key(*key))
                .collect();
            if !missing.is_empty() {
                issues.push(Issue::new(
                    source,
                    format!("missing keys: {}", missing.join(", ")),
                ));
            }
        }
    }

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_themes() {
        let temp = TempDir::new().unwrap();
        let good = r#"{"theme": "t", "description": "d", "examples": [], "use_case": "u", "metadata": {}}"#;
        std::fs::write(temp.path().join("a.json.txt"), good).unwrap();
        std::fs::write(
            temp.path().join("b.json.txt"),
            r#"[{"theme": "t", "description": "d"}, 3]"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("c.json.txt"), "{oops").unwrap();
        std::fs::write(temp.path().join("ignored.json"), "{oops").unwrap();

        let issues = check_themes(temp.path(), ".json.txt").unwrap();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].source, "b.json.txt:0");
        assert_eq!(issues[0].message, "missing keys: examples, use_case, metadata");
        assert_eq!(issues[1].source, "b.json.txt:1");
        assert_eq!(issues[2].source, "c.json.txt");
    }
}
