use serde_json::{Map, Value, json};
use tracing::debug;

use crate::dataverse::citation_fields_mut;
use crate::extract::KeywordAnnotation;

pub const KEYWORD_FIELD: &str = "keyword";
pub const KEYWORD_VALUE: &str = "keywordValue";
pub const KEYWORD_VOCABULARY: &str = "keywordVocabulary";
pub const KEYWORD_VOCABULARY_URI: &str = "keywordVocabularyURI";

/// Folds a row's keyword annotation into a citation field list.
///
/// The `keyword` field always ends up holding exactly one compound entry: the
/// last prior entry with its three sub-fields overwritten, or a fresh entry
/// when there was none. Earlier entries are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordFieldMerger {
    /// Record the replaced sub-field values under `old_values`.
    pub audit: bool,
}

impl KeywordFieldMerger {
    pub fn new(audit: bool) -> Self {
        Self { audit }
    }

    /// Returns the rewritten field list; `fields` itself is left untouched.
    pub fn merge(
        &self,
        fields: &[Value],
        annotation: &KeywordAnnotation,
        row_label: &str,
    ) -> Vec<Value> {
        let mut merged = fields.to_vec();
        self.merge_in_place(&mut merged, annotation, row_label);
        merged
    }

    /// Rewrites the citation fields of a dataset document. Returns `false`
    /// without touching the document when it carries no citation payload.
    pub fn merge_document(
        &self,
        document: &mut Value,
        annotation: &KeywordAnnotation,
        row_label: &str,
    ) -> bool {
        match citation_fields_mut(document) {
            Some(fields) => {
                self.merge_in_place(fields, annotation, row_label);
                true
            }
            None => {
                debug!(row = row_label, "no citation fields to merge");
                false
            }
        }
    }

    pub fn merge_in_place(
        &self,
        fields: &mut Vec<Value>,
        annotation: &KeywordAnnotation,
        row_label: &str,
    ) {
        debug!(row = row_label, "merging keyword field");
        let position = fields.iter().position(is_keyword_field);
        let field = match position {
            Some(index) => &mut fields[index],
            None => {
                fields.push(json!({
                    "typeName": KEYWORD_FIELD,
                    "multiple": true,
                    "typeClass": "compound",
                    "value": [],
                }));
                let last = fields.len() - 1;
                &mut fields[last]
            }
        };
        if !field.is_object() {
            *field = json!({ "typeName": KEYWORD_FIELD });
        }

        let entries = field
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let updated = self.upsert_entry(&entries, annotation);
        if let Some(object) = field.as_object_mut() {
            object.insert("value".to_string(), Value::Array(vec![Value::Object(updated)]));
        }
    }

    fn upsert_entry(
        &self,
        entries: &[Value],
        annotation: &KeywordAnnotation,
    ) -> Map<String, Value> {
        let mut target = entries
            .last()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let updates = [
            (KEYWORD_VALUE, annotation.value.as_deref()),
            (KEYWORD_VOCABULARY, annotation.vocabulary.as_deref()),
            (KEYWORD_VOCABULARY_URI, annotation.vocabulary_uri.as_deref()),
        ];
        for (type_name, value) in updates {
            let value = value.unwrap_or_default().trim().to_string();
            let previous = self.audit.then(|| previous_values(entries, type_name));
            match target.get_mut(type_name).and_then(Value::as_object_mut) {
                Some(sub_field) => {
                    if let Some(previous) = previous {
                        sub_field.insert("old_values".to_string(), Value::Array(previous));
                    }
                    sub_field.insert("value".to_string(), Value::String(value));
                }
                None => {
                    let mut sub_field = Map::new();
                    sub_field.insert("typeName".to_string(), json!(type_name));
                    sub_field.insert("multiple".to_string(), Value::Bool(false));
                    sub_field.insert("typeClass".to_string(), json!("primitive"));
                    if self.audit {
                        sub_field.insert("old_values".to_string(), Value::Null);
                    }
                    sub_field.insert("value".to_string(), Value::String(value));
                    target.insert(type_name.to_string(), Value::Object(sub_field));
                }
            }
        }
        target
    }
}

/// Prior values of one sub-field across every entry, `null` where absent.
fn previous_values(entries: &[Value], type_name: &str) -> Vec<Value> {
    entries
        .iter()
        .map(|entry| {
            entry
                .get(type_name)
                .and_then(|sub_field| sub_field.get("value"))
                .and_then(Value::as_str)
                .map(|value| Value::String(value.trim().to_string()))
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn is_keyword_field(field: &Value) -> bool {
    field.get("typeName").and_then(Value::as_str) == Some(KEYWORD_FIELD)
}

/// Entries of the `keyword` field, if present.
pub fn keyword_entries(fields: &[Value]) -> Option<&Vec<Value>> {
    fields
        .iter()
        .find(|field| is_keyword_field(field))
        .and_then(|field| field.get("value"))
        .and_then(Value::as_array)
}
