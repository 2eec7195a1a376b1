//! Theme loading.

use crate::models::{PrefgenError, Result, Theme};
use crate::store::files_with_suffix;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// Load every theme from `*<suffix>` files in `dir`, files in name order.
///
/// A file holds one theme object or an array of them. Unparsable files and
/// non-object entries are logged and skipped.
pub fn load_themes(dir: &Path, suffix: &str) -> Result<Vec<Theme>> {
    if !dir.is_dir() {
        return Err(PrefgenError::Configuration(format!(
            "themes directory {} does not exist",
            dir.display()
        )));
    }

    let mut themes = Vec::new();
    for path in files_with_suffix(dir, suffix)? {
        let name = path.display().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| PrefgenError::io(format!("reading {name}"), e))?;

        let value: Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!(file = %name, error = %e, "Could not parse theme file");
                continue;
            }
        };

        let items = match value {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            _ => {
                warn!(file = %name, "Skipping theme file with unexpected format");
                continue;
            }
        };

        let before = themes.len();
        for item in items {
            match serde_json::from_value::<Theme>(item) {
                Ok(theme) => themes.push(theme),
                Err(e) => warn!(file = %name, error = %e, "Skipping malformed theme"),
            }
        }
        debug!(file = %name, themes = themes.len() - before, "Loaded theme file");
    }

    Ok(themes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_themes_objects_and_arrays() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("a.json.txt"),
            r#"[{"theme": "grief", "examples": ["lost a pet"]}, {"theme": "honesty"}]"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("b.json.txt"), r#"{"theme": "power"}"#).unwrap();
        std::fs::write(temp.path().join("c.json.txt"), "garbage").unwrap();
        std::fs::write(temp.path().join("d.json.txt"), r#"[42]"#).unwrap();

        let themes = load_themes(temp.path(), ".json.txt").unwrap();
        let names: Vec<_> = themes.iter().map(|t| t.theme.as_str()).collect();
        assert_eq!(names, vec!["grief", "honesty", "power"]);
        assert_eq!(themes[0].examples.len(), 1);
    }

    #[test]
    fn test_missing_dir_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let err = load_themes(&temp.path().join("nope"), ".json.txt").unwrap_err();
        assert!(matches!(err, PrefgenError::Configuration(_)));
    }
}
