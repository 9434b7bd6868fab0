use std::path::PathBuf;

use agrovoc_indexing::extract::RowRecord;
use agrovoc_indexing::identifier::{IdentifierResolver, Scheme};
use agrovoc_indexing::schema::ColumnSchema;
use agrovoc_indexing::sheet::{GridSheet, Worksheet};

fn sheet() -> GridSheet {
    GridSheet::from_rows(
        "resultAgrovoc.xlsx",
        vec![
            vec!["id", "title", "Keyword__value", "Keyword__uri", "Vocabulary"],
            vec![
                "https://hdl.handle.net/1902.1/21919",
                "Seed systems survey",
                "seed systems",
                "http://aims.fao.org/aos/agrovoc/c_331583",
                "AGROVOC",
            ],
            vec!["https://doi.org/10.7910/DVN/ABC", "", "", "", ""],
        ],
    )
}

#[test]
fn header_and_rows_extract_deterministically() {
    let sheet = sheet();
    let schema = ColumnSchema::resolve(&sheet);
    let labels = schema.label_record();

    assert_eq!(labels, ColumnSchema::resolve(&sheet).label_record());
    assert_eq!(labels.label("B"), Some("Title"));
    assert_eq!(labels.keyword_subkey("C"), Some("value"));
    assert_eq!(labels.keyword_subkey("D"), Some("uri"));

    let record = RowRecord::extract(&sheet, &schema, 2);
    assert_eq!(record, RowRecord::extract(&sheet, &schema, 2));
    assert_eq!(record.field("title"), Some("Seed systems survey"));
    assert_eq!(record.keyword("value"), Some("seed systems"));

    let annotation = record.annotation();
    assert_eq!(annotation.value.as_deref(), Some("seed systems"));
    assert_eq!(annotation.vocabulary.as_deref(), Some("AGROVOC"));
    assert_eq!(
        annotation.vocabulary_uri.as_deref(),
        Some("http://aims.fao.org/aos/agrovoc/c_331583")
    );
}

#[test]
fn sparse_row_keeps_only_identifier() {
    let sheet = sheet();
    let schema = ColumnSchema::resolve(&sheet);
    let record = RowRecord::extract(&sheet, &schema, 3);
    assert_eq!(record.fields().len(), 1);
    assert!(record.keywords().is_empty());
    assert_eq!(record.annotation().value, None);
}

#[test]
fn identifier_cells_resolve_by_host() {
    let sheet = sheet();
    let resolver = IdentifierResolver::default();
    let handle = resolver.resolve(&sheet.cell(2, 1));
    let doi = resolver.resolve(&sheet.cell(3, 1));
    assert_eq!(handle.scheme, Scheme::Handle);
    assert_eq!(handle.persistent_id(), "hdl:1902.1/21919");
    assert_eq!(doi.scheme, Scheme::Doi);
    assert_eq!(doi.id, "10.7910/DVN/ABC");
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[test]
fn workbook_rows_carry_hidden_flags() {
    let sheet = GridSheet::open(&fixture("hidden_rows.xlsx")).unwrap();
    assert_eq!(sheet.name(), "hidden_rows.xlsx");
    assert_eq!(sheet.highest_row(), 4);
    assert_eq!(sheet.highest_column(), 3);
    assert_eq!(sheet.cell(1, 2), "Keyword__value");
    assert_eq!(sheet.cell(3, 2), "Rice");
    assert!(sheet.is_row_visible(2));
    assert!(!sheet.is_row_visible(3));
    assert!(sheet.is_row_visible(4));
}
