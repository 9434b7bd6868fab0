use std::time::{Duration, Instant};

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::dataverse::{DataverseClient, FetchFailure, citation_fields};
use crate::error::IndexError;
use crate::export::{ExportStore, REPORT_NAME, output_name};
use crate::extract::RowRecord;
use crate::identifier::{Identifier, IdentifierResolver, UriParts};
use crate::merge::KeywordFieldMerger;
use crate::schema::{ColumnSchema, LabelRecord};
use crate::sheet::{Worksheet, column_letter};

pub const ID_COLUMN: &str = "id";
pub const VISIBLE_BUCKET: &str = "visible";
pub const HIDDEN_BUCKET: &str = "not visible";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Single-row mode when set; otherwise the whole sheet is processed.
    pub row: Option<u32>,
    /// Skip persistence and keep an audit trail of replaced keyword values.
    pub debug: bool,
    /// Stop after the first processed row and return only its citation fields.
    pub only_fields: bool,
    /// Recompute and overwrite even when an export already exists.
    pub force: bool,
    /// After each visible row, re-merge every processed row of the bucket.
    pub remerge: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A previous export was re-served.
    Cached { document: Value, report: Vec<String> },
    Completed { document: Value, report: Vec<String> },
    OnlyFields(Value),
    /// The requested row lies outside `2..=highest_row`.
    OutOfRange,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress to the tracing subscriber.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                let elapsed_ms = elapsed.as_millis() as u64;
                info!(elapsed_ms, "{}", event.message)
            }
            None => info!("{}", event.message),
        }
    }
}

/// Sheet-level state built once per run and passed to every row step.
pub struct RunContext<'a> {
    pub sheet: &'a dyn Worksheet,
    pub schema: ColumnSchema,
    pub labels: LabelRecord,
    pub highest_row: u32,
    pub highest_column: u32,
}

impl<'a> RunContext<'a> {
    pub fn new(sheet: &'a dyn Worksheet) -> Self {
        let schema = ColumnSchema::resolve(sheet);
        let labels = schema.label_record();
        Self {
            sheet,
            highest_row: sheet.highest_row(),
            highest_column: sheet.highest_column(),
            schema,
            labels,
        }
    }

    /// Data rows are `2..=highest_row`; row 1 is the header.
    pub fn contains_row(&self, row: u32) -> bool {
        row > 1 && row <= self.highest_row
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub code: u16,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetStats {
    pub columns: ColumnStats,
    pub rows: RowStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub count: u32,
    pub highest: String,
    #[serde(rename = "_labels")]
    pub labels: LabelRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowStats {
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct RowDocument {
    pub label: String,
    pub record: RowRecord,
    pub dataset: Option<DatasetBlock>,
}

impl Serialize for RowDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.record.entry_count() + usize::from(self.dataset.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        self.record.serialize_entries(&mut map)?;
        if let Some(dataset) = &self.dataset {
            map.serialize_entry("dataset", dataset)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetBlock {
    pub source: DatasetSource,
    pub target: DatasetTarget,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_results"
    )]
    pub results: Option<Result<Value, FetchFailure>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSource {
    pub doi: SourceIdentifier,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceIdentifier {
    pub uri: UriParts,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetTarget {
    pub dataset_api_url: String,
}

impl DatasetBlock {
    fn new(identifier: &Identifier) -> Self {
        Self {
            source: DatasetSource {
                doi: SourceIdentifier {
                    uri: identifier.uri.clone(),
                    value: identifier.id.clone(),
                },
            },
            target: DatasetTarget {
                dataset_api_url: identifier.lookup_url.clone(),
            },
            results: None,
        }
    }
}

fn serialize_results<S: Serializer>(
    results: &Option<Result<Value, FetchFailure>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match results {
        Some(Ok(document)) => document.serialize(serializer),
        Some(Err(failure)) => failure.serialize(serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bucket {
    pub contents: Vec<RowDocument>,
}

impl Serialize for Bucket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Contents<'a>(&'a [RowDocument]);

        impl Serialize for Contents<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for row in self.0 {
                    map.serialize_entry(&row.label, row)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("contents", &Contents(&self.contents))?;
        map.end()
    }
}

/// The whole-run document: status, sheet statistics and every processed row.
#[derive(Debug, Clone)]
pub struct AggregateDocument {
    pub status: RunStatus,
    pub sheet: String,
    pub stats: SheetStats,
    pub visible: Bucket,
    pub hidden: Bucket,
}

impl AggregateDocument {
    pub fn new(context: &RunContext<'_>) -> Self {
        Self {
            status: RunStatus {
                code: 200,
                date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            },
            sheet: context.sheet.name().to_string(),
            stats: SheetStats {
                columns: ColumnStats {
                    count: context.highest_column,
                    highest: column_letter(context.highest_column),
                    labels: context.labels.clone(),
                },
                rows: RowStats {
                    count: context.highest_row,
                },
            },
            visible: Bucket::default(),
            hidden: Bucket::default(),
        }
    }

    pub fn bucket_mut(&mut self, visible: bool) -> &mut Bucket {
        if visible {
            &mut self.visible
        } else {
            &mut self.hidden
        }
    }

    pub fn to_value(&self) -> Result<Value, IndexError> {
        serde_json::to_value(self).map_err(|err| IndexError::Serialization(err.to_string()))
    }
}

impl Serialize for AggregateDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Rows<'a>(&'a AggregateDocument);

        impl Serialize for Rows<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(None)?;
                if !self.0.visible.contents.is_empty() {
                    map.serialize_entry(VISIBLE_BUCKET, &self.0.visible)?;
                }
                if !self.0.hidden.contents.is_empty() {
                    map.serialize_entry(HIDDEN_BUCKET, &self.0.hidden)?;
                }
                map.end()
            }
        }

        struct SheetSection<'a>(&'a AggregateDocument);

        impl Serialize for SheetSection<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("stats", &self.0.stats)?;
                map.serialize_entry("rows", &Rows(self.0))?;
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry(&self.sheet, &SheetSection(self))?;
        map.end()
    }
}

pub fn row_label(row: u32) -> String {
    format!("row {row}")
}

pub struct Indexer<C: DataverseClient> {
    store: ExportStore,
    client: C,
    resolver: IdentifierResolver,
}

impl<C: DataverseClient> Indexer<C> {
    pub fn new(store: ExportStore, client: C, resolver: IdentifierResolver) -> Self {
        Self {
            store,
            client,
            resolver,
        }
    }

    pub fn store(&self) -> &ExportStore {
        &self.store
    }

    /// Re-serves a cached export when one exists, otherwise opens the sheet
    /// and processes it.
    pub fn run<W, F>(
        &self,
        sheet_name: &str,
        open_sheet: F,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunOutcome, IndexError>
    where
        W: Worksheet,
        F: FnOnce() -> Result<W, IndexError>,
    {
        let name = output_name(options.row);
        if !options.force {
            if let Some(document) = self.store.load(&name)? {
                sink.event(ProgressEvent {
                    message: format!("phase=Cache; re-serving {name}"),
                    elapsed: None,
                });
                let report = missing_dataset_report(&document, sheet_name);
                self.save_report(&report, options)?;
                return Ok(RunOutcome::Cached { document, report });
            }
        }

        let sheet = open_sheet()?;
        self.process(&sheet, options, sink)
    }

    /// Processes the sheet without consulting the cache.
    pub fn process(
        &self,
        sheet: &dyn Worksheet,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunOutcome, IndexError> {
        let context = RunContext::new(sheet);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Stats; {} rows, {} columns",
                context.highest_row, context.highest_column
            ),
            elapsed: None,
        });
        let mut aggregate = AggregateDocument::new(&context);
        let merger = KeywordFieldMerger::new(options.debug);

        let rows = match options.row {
            Some(row) if !context.contains_row(row) => {
                warn!(row, highest = context.highest_row, "requested row out of range");
                return Ok(RunOutcome::OutOfRange);
            }
            Some(row) => row..=row,
            None => 2..=context.highest_row,
        };

        for row in rows {
            let visible = sheet.is_row_visible(row);
            let start = Instant::now();
            self.process_row(&context, &mut aggregate, &merger, row, visible, options.remerge);
            sink.event(ProgressEvent {
                message: format!("phase=Row; {} ({})", row_label(row), bucket_name(visible)),
                elapsed: Some(start.elapsed()),
            });

            if options.only_fields {
                let fields = aggregate
                    .bucket_mut(visible)
                    .contents
                    .last()
                    .and_then(|row| row.dataset.as_ref())
                    .and_then(|dataset| dataset.results.as_ref())
                    .and_then(|results| results.as_ref().ok())
                    .and_then(citation_fields)
                    .map(|fields| Value::Array(fields.clone()))
                    .unwrap_or(Value::Null);
                return Ok(RunOutcome::OnlyFields(fields));
            }
        }

        let document = aggregate.to_value()?;
        let report = missing_dataset_report(&document, sheet.name());
        if !options.debug {
            self.store
                .save(&output_name(options.row), &document, options.force)?;
            self.save_report(&report, options)?;
        }
        Ok(RunOutcome::Completed { document, report })
    }

    fn process_row(
        &self,
        context: &RunContext<'_>,
        aggregate: &mut AggregateDocument,
        merger: &KeywordFieldMerger,
        row: u32,
        visible: bool,
        remerge: bool,
    ) {
        let label = row_label(row);
        let record = RowRecord::extract(context.sheet, &context.schema, row);

        let dataset = context.schema.find_by_title(ID_COLUMN).map(|column| {
            let identifier = self.resolver.resolve(&context.sheet.cell(row, column.index));
            let mut dataset = DatasetBlock::new(&identifier);
            if visible {
                let mut results = self.client.fetch_dataset(&identifier.lookup_url);
                if let Ok(document) = results.as_mut() {
                    merger.merge_document(document, &record.annotation(), &label);
                }
                dataset.results = Some(results);
            }
            dataset
        });

        let bucket = aggregate.bucket_mut(visible);
        bucket.contents.push(RowDocument {
            label,
            record,
            dataset,
        });

        if visible && remerge {
            remerge_bucket(bucket, merger);
        }
    }

    fn save_report(&self, report: &[String], options: &RunOptions) -> Result<(), IndexError> {
        if options.debug || report.is_empty() {
            return Ok(());
        }
        self.store.save(REPORT_NAME, &json!(report), options.force)?;
        Ok(())
    }
}

/// Re-applies each processed row's own annotation to its own document.
fn remerge_bucket(bucket: &mut Bucket, merger: &KeywordFieldMerger) {
    for row in &mut bucket.contents {
        let annotation = row.record.annotation();
        if let Some(Ok(document)) = row
            .dataset
            .as_mut()
            .and_then(|dataset| dataset.results.as_mut())
            .map(Result::as_mut)
        {
            merger.merge_document(document, &annotation, &row.label);
        }
    }
}

fn bucket_name(visible: bool) -> &'static str {
    if visible {
        VISIBLE_BUCKET
    } else {
        HIDDEN_BUCKET
    }
}

/// One line per visible row whose lookup produced no dataset payload.
pub fn missing_dataset_report(document: &Value, sheet_name: &str) -> Vec<String> {
    let Some(contents) = document
        .get(sheet_name)
        .and_then(|sheet| sheet.pointer("/rows/visible/contents"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    contents
        .iter()
        .filter(|(_, row)| row.pointer("/dataset/results/data").is_none())
        .map(|(label, row)| {
            let keyword = row
                .pointer("/_keywords/value")
                .and_then(Value::as_str)
                .unwrap_or_default();
            format!(
                "{label} with new keyword \"{keyword}\" does not exists in Dataverse\nCheck the dataset url schema!"
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::output::JsonOutput;
    use crate::sheet::GridSheet;

    struct FakeDataverse {
        calls: RefCell<Vec<String>>,
    }

    impl DataverseClient for FakeDataverse {
        fn fetch_dataset(&self, lookup_url: &str) -> Result<Value, FetchFailure> {
            self.calls.borrow_mut().push(lookup_url.to_string());
            Ok(json!({
                "status": "OK",
                "data": {"latestVersion": {"metadataBlocks": {"citation": {"fields": []}}}}
            }))
        }
    }

    #[test]
    fn hidden_rows_are_resolved_but_not_fetched() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = ExportStore::new(root);
        let sheet = GridSheet::from_rows(
            "sheet.xlsx",
            vec![
                vec!["id", "Keyword__value"],
                vec!["https://doi.org/10.1/a", "Rice"],
                vec!["https://hdl.handle.net/1902.1/b", "Maize"],
            ],
        )
        .with_hidden_rows([3]);
        let indexer = Indexer::new(
            store,
            FakeDataverse {
                calls: RefCell::new(Vec::new()),
            },
            IdentifierResolver::default(),
        );

        let outcome = indexer
            .process(&sheet, &RunOptions::default(), &JsonOutput)
            .unwrap();
        assert_eq!(indexer.client.calls.borrow().len(), 1);
        let RunOutcome::Completed { document, report } = outcome else {
            panic!("expected completed run");
        };
        assert!(report.is_empty());
        let hidden = &document["sheet.xlsx"]["rows"]["not visible"]["contents"]["row 3"];
        assert_eq!(
            hidden["dataset"]["target"]["dataset_api_url"],
            "https://dataverse.harvard.edu/api/datasets/:persistentId?persistentId=hdl:1902.1/b"
        );
        assert!(hidden["dataset"].get("results").is_none());
    }
}
