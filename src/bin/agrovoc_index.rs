use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use agrovoc_indexing::app::{Indexer, RunOptions, RunOutcome, TracingSink};
use agrovoc_indexing::config::ConfigLoader;
use agrovoc_indexing::dataverse::DataverseHttpClient;
use agrovoc_indexing::error::IndexError;
use agrovoc_indexing::export::ExportStore;
use agrovoc_indexing::identifier::IdentifierResolver;
use agrovoc_indexing::output::{JsonOutput, OutputFormat};
use agrovoc_indexing::sheet::GridSheet;

#[derive(Parser)]
#[command(name = "agrovoc-index")]
#[command(about = "Merge spreadsheet AGROVOC keywords into Dataverse citation metadata")]
#[command(version, author)]
struct Cli {
    /// Workbook to index (defaults to the configured input)
    input: Option<Utf8PathBuf>,

    /// Process a single sheet row (2 is the first data row)
    #[arg(long)]
    row: Option<u32>,

    /// Do not save exports; record replaced keyword values as `old_values`
    #[arg(long)]
    debug: bool,

    /// Print only the merged citation fields of the first processed row
    #[arg(long)]
    only_fields: bool,

    /// Recompute and overwrite existing exports
    #[arg(long)]
    force: bool,

    /// Re-merge all processed rows of a bucket after each visible row
    #[arg(long)]
    remerge: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    export_dir: Option<Utf8PathBuf>,

    /// Print the plain-text dump instead of JSON
    #[arg(long)]
    plain: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<IndexError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IndexError) -> u8 {
    match error {
        IndexError::Workbook { .. }
        | IndexError::MissingWorksheet(_)
        | IndexError::ConfigRead(_)
        | IndexError::ConfigParse(_) => 2,
        IndexError::DataverseHttp(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(input) = cli.input {
        settings.input = input;
    }
    if let Some(export_dir) = cli.export_dir {
        settings.export_dir = export_dir;
    }

    let client = DataverseHttpClient::new(settings.timeout, Some(settings.error_log.clone()))?;
    let resolver = IdentifierResolver::new(&settings.base_url, &settings.handle_prefix);
    let indexer = Indexer::new(ExportStore::new(settings.export_dir.clone()), client, resolver);

    let options = RunOptions {
        row: cli.row,
        debug: cli.debug,
        only_fields: cli.only_fields,
        force: cli.force,
        remerge: cli.remerge,
    };
    let format = if cli.plain {
        OutputFormat::Plain
    } else {
        OutputFormat::Json
    };

    let sheet_name = settings.input.file_name().unwrap_or(settings.input.as_str());
    let input = settings.input.clone();
    let outcome = indexer.run(
        sheet_name,
        || GridSheet::open(input.as_std_path()),
        &options,
        &TracingSink,
    )?;

    match outcome {
        RunOutcome::Cached { document, report } | RunOutcome::Completed { document, report } => {
            for line in &report {
                tracing::warn!("{line}");
            }
            JsonOutput::print(&document, format).into_diagnostic()?;
        }
        RunOutcome::OnlyFields(fields) => {
            JsonOutput::print_json(&fields).into_diagnostic()?;
        }
        RunOutcome::OutOfRange => {
            JsonOutput::print_json(&serde_json::Value::Null).into_diagnostic()?;
        }
    }
    Ok(())
}
