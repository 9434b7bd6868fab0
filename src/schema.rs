use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::sheet::{Worksheet, column_letter};

/// Separator between group name and subkey in a keyword-group column title.
pub const GROUP_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub index: u32,
    pub letter: String,
    pub title: String,
    pub group: Option<KeywordGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordGroup {
    pub name: String,
    pub subkey: String,
}

impl ColumnSpec {
    pub fn is_first(&self) -> bool {
        self.index == 1
    }
}

/// Header classification shared by every row extraction of a sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: Vec<ColumnSpec>,
}

impl ColumnSchema {
    pub fn from_header<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = titles
            .into_iter()
            .enumerate()
            .map(|(position, title)| {
                let index = position as u32 + 1;
                let title = title.into();
                ColumnSpec {
                    index,
                    letter: column_letter(index),
                    group: parse_group(&title),
                    title,
                }
            })
            .collect();
        Self { columns }
    }

    pub fn resolve(sheet: &dyn Worksheet) -> Self {
        Self::from_header((1..=sheet.highest_column()).map(|column| sheet.cell(1, column)))
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn find_by_title(&self, title: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.title == title)
    }

    /// Header-derived labels; the first column is always retained.
    pub fn label_record(&self) -> LabelRecord {
        let mut record = LabelRecord::default();
        for column in &self.columns {
            match &column.group {
                Some(group) => {
                    if !group.subkey.trim().is_empty() || column.is_first() {
                        upsert(&mut record.keywords, &column.letter, &group.subkey);
                    }
                }
                None => {
                    if !column.title.trim().is_empty() || column.is_first() {
                        upsert(&mut record.labels, &column.letter, &capitalize(&column.title));
                    }
                }
            }
        }
        record
    }
}

fn parse_group(title: &str) -> Option<KeywordGroup> {
    let mut parts = title.split(GROUP_SEPARATOR);
    let name = parts.next()?;
    let subkey = parts.next()?;
    Some(KeywordGroup {
        name: name.to_string(),
        subkey: subkey.to_string(),
    })
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(crate) fn upsert(entries: &mut Vec<(String, String)>, key: &str, value: &str) {
    match entries.iter_mut().find(|(existing, _)| existing == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => entries.push((key.to_string(), value.to_string())),
    }
}

/// Column letter to label, plus the `_keywords` map of column letter to subkey.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelRecord {
    pub labels: Vec<(String, String)>,
    pub keywords: Vec<(String, String)>,
}

impl LabelRecord {
    pub fn label(&self, letter: &str) -> Option<&str> {
        lookup(&self.labels, letter)
    }

    pub fn keyword_subkey(&self, letter: &str) -> Option<&str> {
        lookup(&self.keywords, letter)
    }
}

pub(crate) fn lookup<'a>(entries: &'a [(String, String)], key: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|(existing, _)| existing == key)
        .map(|(_, value)| value.as_str())
}

impl Serialize for LabelRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let has_keywords = !self.keywords.is_empty();
        let mut map = serializer.serialize_map(Some(self.labels.len() + usize::from(has_keywords)))?;
        if has_keywords {
            map.serialize_entry("_keywords", &OrderedPairs(&self.keywords))?;
        }
        for (letter, label) in &self.labels {
            map.serialize_entry(letter, label)?;
        }
        map.end()
    }
}

/// Serializes key/value pairs as a JSON object, keeping insertion order.
pub(crate) struct OrderedPairs<'a>(pub &'a [(String, String)]);

impl Serialize for OrderedPairs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
