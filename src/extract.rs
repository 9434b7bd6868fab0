use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::schema::{ColumnSchema, OrderedPairs, lookup, upsert};
use crate::sheet::Worksheet;

pub const VALUE_SUBKEY: &str = "value";
pub const URI_SUBKEY: &str = "uri";
pub const VOCABULARY_FIELD: &str = "Vocabulary";

/// Non-empty cells of one data row, split into plain fields and keyword subkeys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowRecord {
    fields: Vec<(String, String)>,
    keywords: Vec<(String, String)>,
}

impl RowRecord {
    pub fn extract(sheet: &dyn Worksheet, schema: &ColumnSchema, row: u32) -> Self {
        Self::from_cells(
            schema,
            schema
                .columns()
                .iter()
                .map(|column| sheet.cell(row, column.index)),
        )
    }

    /// Builds the record from cells given in schema column order.
    pub fn from_cells<I, S>(schema: &ColumnSchema, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut record = Self::default();
        for (column, cell) in schema.columns().iter().zip(cells) {
            let value = cell.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match &column.group {
                Some(group) => upsert(&mut record.keywords, &group.subkey, value),
                None => upsert(&mut record.fields, &column.title, value),
            }
        }
        record
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        lookup(&self.fields, name)
    }

    pub fn keyword(&self, subkey: &str) -> Option<&str> {
        lookup(&self.keywords, subkey)
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn keywords(&self) -> &[(String, String)] {
        &self.keywords
    }

    pub fn annotation(&self) -> KeywordAnnotation {
        KeywordAnnotation::from_row(self)
    }

    pub(crate) fn serialize_entries<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        if !self.keywords.is_empty() {
            map.serialize_entry("_keywords", &OrderedPairs(&self.keywords))?;
        }
        Ok(())
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.fields.len() + usize::from(!self.keywords.is_empty())
    }
}

impl Serialize for RowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entry_count()))?;
        self.serialize_entries(&mut map)?;
        map.end()
    }
}

/// The single (value, vocabulary, vocabulary URI) triple a row contributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordAnnotation {
    pub value: Option<String>,
    pub vocabulary: Option<String>,
    pub vocabulary_uri: Option<String>,
}

impl KeywordAnnotation {
    /// `value`/`uri` subkeys and the `Vocabulary` column take precedence. A row
    /// without a `value` subkey uses its first other keyword cell, and that
    /// subkey names the vocabulary when no `Vocabulary` column is filled.
    pub fn from_row(row: &RowRecord) -> Self {
        let explicit_value = find_subkey(row, VALUE_SUBKEY);
        let fallback = row.keywords().iter().find(|(subkey, _)| {
            !subkey.eq_ignore_ascii_case(URI_SUBKEY) && !subkey.eq_ignore_ascii_case(VALUE_SUBKEY)
        });

        let value = explicit_value
            .map(str::to_string)
            .or_else(|| fallback.map(|(_, value)| value.clone()));
        let vocabulary = row
            .field(VOCABULARY_FIELD)
            .map(str::to_string)
            .or_else(|| match explicit_value {
                Some(_) => None,
                None => fallback.map(|(subkey, _)| subkey.clone()),
            });

        Self {
            value,
            vocabulary,
            vocabulary_uri: find_subkey(row, URI_SUBKEY).map(str::to_string),
        }
    }
}

fn find_subkey<'a>(row: &'a RowRecord, subkey: &str) -> Option<&'a str> {
    row.keywords()
        .iter()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(subkey))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::GridSheet;

    #[test]
    fn extracts_group_cells_under_keywords() {
        let schema = ColumnSchema::from_header(["id", "Vocabulary__AGROVOC"]);
        let record = RowRecord::from_cells(&schema, ["https://doi.org/10.1234/x", "Agriculture"]);
        assert_eq!(record.keyword("AGROVOC"), Some("Agriculture"));
        assert_eq!(record.field("id"), Some("https://doi.org/10.1234/x"));
        assert_eq!(record.keywords().len(), 1);
    }

    #[test]
    fn skips_blank_cells_and_keeps_case() {
        let schema = ColumnSchema::from_header(["id", "title", "Keyword__value"]);
        let record = RowRecord::from_cells(&schema, ["x", "   ", " lowercase term "]);
        assert_eq!(record.field("title"), None);
        assert_eq!(record.keyword("value"), Some("lowercase term"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let sheet = GridSheet::from_rows(
            "s.xlsx",
            vec![
                vec!["id", "Keyword__value", "Keyword__uri", "Vocabulary"],
                vec!["hdl", "Maize", "http://aims.fao.org/c_12332", "AGROVOC"],
            ],
        );
        let schema = ColumnSchema::resolve(&sheet);
        assert_eq!(
            RowRecord::extract(&sheet, &schema, 2),
            RowRecord::extract(&sheet, &schema, 2)
        );
    }

    #[test]
    fn annotation_from_explicit_columns() {
        let schema = ColumnSchema::from_header(["id", "Keyword__value", "Keyword__uri", "Vocabulary"]);
        let record = RowRecord::from_cells(
            &schema,
            ["x", "Maize", "http://aims.fao.org/aos/agrovoc/c_12332", "AGROVOC"],
        );
        let annotation = record.annotation();
        assert_eq!(annotation.value.as_deref(), Some("Maize"));
        assert_eq!(annotation.vocabulary.as_deref(), Some("AGROVOC"));
        assert_eq!(
            annotation.vocabulary_uri.as_deref(),
            Some("http://aims.fao.org/aos/agrovoc/c_12332")
        );
    }

    #[test]
    fn annotation_falls_back_to_named_subkey() {
        let schema = ColumnSchema::from_header(["id", "Vocabulary__AGROVOC"]);
        let record = RowRecord::from_cells(&schema, ["x", "Agriculture"]);
        let annotation = record.annotation();
        assert_eq!(annotation.value.as_deref(), Some("Agriculture"));
        assert_eq!(annotation.vocabulary.as_deref(), Some("AGROVOC"));
        assert_eq!(annotation.vocabulary_uri, None);
    }

    #[test]
    fn row_record_serializes_keywords_last() {
        let schema = ColumnSchema::from_header(["Keyword__value", "id"]);
        let record = RowRecord::from_cells(&schema, ["Rice", "x"]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":"x","_keywords":{"value":"Rice"}}"#);
    }
}
