use std::fmt::Write as _;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::IndexError;

pub const WHOLE_SHEET_NAME: &str = "output";
pub const REPORT_NAME: &str = "report";

/// Canonical export name for a run scope: `output`, or `row_<n>` for one row.
pub fn output_name(row: Option<u32>) -> String {
    match row {
        Some(row) => format!("row_{row}"),
        None => WHOLE_SHEET_NAME.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub json_written: bool,
    pub text_written: bool,
}

/// Export directory holding `<name>.json` / `<name>.txt` pairs.
#[derive(Debug, Clone)]
pub struct ExportStore {
    root: Utf8PathBuf,
}

impl ExportStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn json_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(format!("{name}.json"))
    }

    pub fn text_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(format!("{name}.txt"))
    }

    /// A scope is cached once its JSON form exists; that is what gets re-served.
    pub fn is_cached(&self, name: &str) -> bool {
        self.json_path(name).as_std_path().exists()
    }

    pub fn load(&self, name: &str) -> Result<Option<Value>, IndexError> {
        let path = self.json_path(name);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| IndexError::Filesystem(format!("read {path}: {err}")))?;
        let value = serde_json::from_str(&content)
            .map_err(|err| IndexError::Serialization(format!("{path}: {err}")))?;
        Ok(Some(value))
    }

    /// Writes each form that is missing, or both when `force` is set.
    pub fn save(&self, name: &str, data: &Value, force: bool) -> Result<SaveOutcome, IndexError> {
        let text_path = self.text_path(name);
        let json_path = self.json_path(name);
        let mut outcome = SaveOutcome::default();

        if force || !text_path.as_std_path().exists() {
            write_atomic(&text_path, render_plain(data).as_bytes())?;
            outcome.text_written = true;
        }
        if force || !json_path.as_std_path().exists() {
            let json = serde_json::to_vec_pretty(data)
                .map_err(|err| IndexError::Serialization(err.to_string()))?;
            write_atomic(&json_path, &json)?;
            outcome.json_written = true;
        }

        if outcome.json_written || outcome.text_written {
            info!(export = name, root = %self.root, "export written");
        } else {
            debug!(export = name, "export already present, kept");
        }
        Ok(outcome)
    }
}

fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), IndexError> {
    let parent = path
        .parent()
        .ok_or_else(|| IndexError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| IndexError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("agrovoc-export")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| IndexError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| IndexError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| IndexError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Indented key/value dump for human inspection.
pub fn render_plain(value: &Value) -> String {
    let mut out = String::new();
    render_node(&mut out, value, 0);
    out
}

fn render_node(out: &mut String, value: &Value, depth: usize) {
    let indent = "    ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                render_entry(out, &indent, key, child, depth);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                render_entry(out, &indent, &format!("[{index}]"), child, depth);
            }
        }
        scalar => {
            let _ = writeln!(out, "{indent}{}", scalar_text(scalar));
        }
    }
}

fn render_entry(out: &mut String, indent: &str, key: &str, child: &Value, depth: usize) {
    match child {
        Value::Object(map) if map.is_empty() => {
            let _ = writeln!(out, "{indent}{key}: {{}}");
        }
        Value::Array(items) if items.is_empty() => {
            let _ = writeln!(out, "{indent}{key}: []");
        }
        Value::Object(_) | Value::Array(_) => {
            let _ = writeln!(out, "{indent}{key}:");
            render_node(out, child, depth + 1);
        }
        scalar => {
            let _ = writeln!(out, "{indent}{key}: {}", scalar_text(scalar));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> (tempfile::TempDir, ExportStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("export")).unwrap();
        (temp, ExportStore::new(root))
    }

    #[test]
    fn output_names() {
        assert_eq!(output_name(None), "output");
        assert_eq!(output_name(Some(7)), "row_7");
    }

    #[test]
    fn save_without_force_keeps_first_write() {
        let (_temp, store) = store();
        let first = store.save("output", &json!({"run": 1}), false).unwrap();
        assert_eq!(
            first,
            SaveOutcome {
                json_written: true,
                text_written: true
            }
        );
        let second = store.save("output", &json!({"run": 2}), false).unwrap();
        assert_eq!(second, SaveOutcome::default());
        assert_eq!(store.load("output").unwrap(), Some(json!({"run": 1})));
        let text = fs::read_to_string(store.text_path("output").as_std_path()).unwrap();
        assert_eq!(text, "run: 1\n");
    }

    #[test]
    fn forced_save_rewrites_both_forms() {
        let (_temp, store) = store();
        store.save("row_2", &json!({"run": 1}), false).unwrap();
        let outcome = store.save("row_2", &json!({"run": 2}), true).unwrap();
        assert!(outcome.json_written && outcome.text_written);
        assert_eq!(store.load("row_2").unwrap(), Some(json!({"run": 2})));
        let text = fs::read_to_string(store.text_path("row_2").as_std_path()).unwrap();
        assert_eq!(text, "run: 2\n");
    }

    #[test]
    fn missing_form_is_filled_independently() {
        let (_temp, store) = store();
        store.save("output", &json!({"run": 1}), false).unwrap();
        fs::remove_file(store.text_path("output").as_std_path()).unwrap();
        let outcome = store.save("output", &json!({"run": 2}), false).unwrap();
        assert!(outcome.text_written);
        assert!(!outcome.json_written);
        assert!(store.is_cached("output"));
    }

    #[test]
    fn plain_dump_nests_objects_and_arrays() {
        let text = render_plain(&json!({"a": {"b": [1, "x"], "c": {}}, "d": null}));
        assert_eq!(text, "a:\n    b:\n        [0]: 1\n        [1]: x\n    c: {}\nd: null\n");
    }
}
