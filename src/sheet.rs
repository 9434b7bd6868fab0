use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Seek};
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use quick_xml::Reader as XmlReader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::IndexError;

/// Read-only view of the active worksheet.
///
/// Rows and columns are 1-based, matching spreadsheet addressing: row 1 is the
/// header row and column 1 is `A`.
pub trait Worksheet {
    /// File name the sheet was loaded from, used as the aggregate document key.
    fn name(&self) -> &str;
    fn highest_row(&self) -> u32;
    fn highest_column(&self) -> u32;
    /// Raw cell text; empty when the cell is absent.
    fn cell(&self, row: u32, column: u32) -> String;
    fn is_row_visible(&self, row: u32) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct GridSheet {
    name: String,
    rows: Vec<Vec<String>>,
    hidden: BTreeSet<u32>,
}

impl GridSheet {
    pub fn from_rows<R, C>(name: &str, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            name: name.to_string(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
            hidden: BTreeSet::new(),
        }
    }

    pub fn with_hidden_rows(mut self, rows: impl IntoIterator<Item = u32>) -> Self {
        self.hidden.extend(rows);
        self
    }

    /// Loads the first worksheet of an xlsx/xls/ods workbook.
    ///
    /// Row visibility is read from the sheet part of xlsx/xlsm packages; rows
    /// of other formats are all visible.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let mut workbook = open_workbook_auto(path).map_err(|err| IndexError::Workbook {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| IndexError::MissingWorksheet(path.to_path_buf()))?
            .map_err(|err| IndexError::Workbook {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let (row_offset, column_offset) = range.start().unwrap_or((0, 0));
        let mut rows = vec![Vec::new(); row_offset as usize];
        for row in range.rows() {
            let mut cells = vec![String::new(); column_offset as usize];
            cells.extend(row.iter().map(cell_text));
            rows.push(cells);
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_package = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| {
                extension.eq_ignore_ascii_case("xlsx") || extension.eq_ignore_ascii_case("xlsm")
            });
        let hidden = if is_package {
            hidden_rows(path)?
        } else {
            BTreeSet::new()
        };
        Ok(Self { name, rows, hidden })
    }
}

impl Worksheet for GridSheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn highest_row(&self) -> u32 {
        self.rows.len() as u32
    }

    fn highest_column(&self) -> u32 {
        self.rows
            .iter()
            .filter_map(|row| row.iter().rposition(|cell| !cell.trim().is_empty()))
            .max()
            .map(|index| index as u32 + 1)
            .unwrap_or(0)
    }

    fn cell(&self, row: u32, column: u32) -> String {
        if row == 0 || column == 0 {
            return String::new();
        }
        self.rows
            .get(row as usize - 1)
            .and_then(|cells| cells.get(column as usize - 1))
            .cloned()
            .unwrap_or_default()
    }

    fn is_row_visible(&self, row: u32) -> bool {
        !self.hidden.contains(&row)
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        other => other.to_string(),
    }
}

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const DEFAULT_SHEET_PART: &str = "xl/worksheets/sheet1.xml";

/// Rows flagged `hidden` in the first worksheet of an xlsx package.
pub fn hidden_rows(path: &Path) -> Result<BTreeSet<u32>, IndexError> {
    let workbook_error = |message: String| IndexError::Workbook {
        path: path.to_path_buf(),
        message,
    };
    let file = fs::File::open(path).map_err(|err| workbook_error(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| workbook_error(err.to_string()))?;

    let workbook = read_part(&mut archive, WORKBOOK_PART).map_err(workbook_error)?;
    let relationships = read_part(&mut archive, WORKBOOK_RELS_PART).map_err(workbook_error)?;
    let sheet_part = match (workbook, relationships) {
        (Some(workbook), Some(relationships)) => {
            first_sheet_part(&workbook, &relationships).map_err(workbook_error)?
        }
        _ => None,
    }
    .unwrap_or_else(|| DEFAULT_SHEET_PART.to_string());

    match read_part(&mut archive, &sheet_part).map_err(workbook_error)? {
        Some(sheet) => parse_hidden_rows(&sheet).map_err(workbook_error),
        None => Ok(BTreeSet::new()),
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, String> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.to_string()),
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|err| format!("{name}: {err}"))?;
    Ok(Some(content))
}

/// Package path of the first `<sheet>` in the workbook, via its relationship.
fn first_sheet_part(workbook: &str, relationships: &str) -> Result<Option<String>, String> {
    let mut reader = XmlReader::from_str(workbook);
    let relation = loop {
        match reader.read_event().map_err(|err| err.to_string())? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"sheet" =>
            {
                break attribute(&element, b"id")?;
            }
            Event::Eof => break None,
            _ => {}
        }
    };
    let Some(relation) = relation else {
        return Ok(None);
    };

    let mut reader = XmlReader::from_str(relationships);
    loop {
        match reader.read_event().map_err(|err| err.to_string())? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"Relationship" =>
            {
                if attribute(&element, b"Id")?.as_deref() == Some(relation.as_str()) {
                    return Ok(attribute(&element, b"Target")?.map(|target| package_path(&target)));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Relationship targets are relative to `xl/` unless absolute.
fn package_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

/// Sheet rows carrying `hidden="1"`. Rows without an `r` attribute follow the
/// previous row.
fn parse_hidden_rows(sheet: &str) -> Result<BTreeSet<u32>, String> {
    let mut reader = XmlReader::from_str(sheet);
    let mut hidden = BTreeSet::new();
    let mut current = 0;
    loop {
        match reader.read_event().map_err(|err| err.to_string())? {
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"row" =>
            {
                current = attribute(&element, b"r")?
                    .and_then(|row| row.parse::<u32>().ok())
                    .unwrap_or(current + 1);
                if matches!(attribute(&element, b"hidden")?.as_deref(), Some("1" | "true")) {
                    hidden.insert(current);
                }
            }
            Event::Eof => return Ok(hidden),
            _ => {}
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(String::from_utf8_lossy(&attr.value).into_owned()));
        }
    }
    Ok(None)
}

/// Spreadsheet letter for a 1-based column index (`1` is `A`, `27` is `AA`).
pub fn column_letter(index: u32) -> String {
    let mut letters = Vec::new();
    let mut remaining = index;
    while remaining > 0 {
        let rem = (remaining - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(6), "F");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(703), "AAA");
        assert_eq!(column_letter(0), "");
    }

    #[test]
    fn grid_dimensions_ignore_trailing_blanks() {
        let sheet = GridSheet::from_rows(
            "sheet.xlsx",
            vec![vec!["id", "Vocabulary", "", " "], vec!["x", "", "", ""]],
        );
        assert_eq!(sheet.highest_row(), 2);
        assert_eq!(sheet.highest_column(), 2);
        assert_eq!(sheet.cell(1, 2), "Vocabulary");
        assert_eq!(sheet.cell(3, 1), "");
        assert_eq!(sheet.cell(0, 1), "");
    }

    #[test]
    fn parses_hidden_row_flags() {
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1"/></row>
            <row r="2" hidden="1"/>
            <row spans="1:2" hidden="true"/>
            <row r="7" hidden="0"/>
        </sheetData></worksheet>"#;
        let hidden = parse_hidden_rows(sheet).unwrap();
        assert_eq!(hidden.into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn first_sheet_part_follows_relationship() {
        let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
            <sheets><sheet name="Data" sheetId="1" r:id="rId3"/><sheet name="B" sheetId="2" r:id="rId1"/></sheets>
        </workbook>"#;
        let relationships = r#"<Relationships>
            <Relationship Id="rId1" Target="worksheets/sheet1.xml"/>
            <Relationship Id="rId3" Target="/xl/worksheets/data.xml"/>
        </Relationships>"#;
        assert_eq!(
            first_sheet_part(workbook, relationships).unwrap().as_deref(),
            Some("xl/worksheets/data.xml")
        );
        assert_eq!(package_path("worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }

    #[test]
    fn hidden_rows_are_not_visible() {
        let sheet = GridSheet::from_rows("s", vec![vec!["id"], vec!["a"], vec!["b"]])
            .with_hidden_rows([3]);
        assert!(sheet.is_row_visible(2));
        assert!(!sheet.is_row_visible(3));
    }
}
