use std::io::{self, Write};

use serde::Serialize;

use crate::export::render_plain;

#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Plain,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print(value: &serde_json::Value, format: OutputFormat) -> io::Result<()> {
        match format {
            OutputFormat::Json => Self::print_json(value),
            OutputFormat::Plain => {
                let mut stdout = io::stdout();
                stdout.write_all(render_plain(value).as_bytes())?;
                Ok(())
            }
        }
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}
