use std::io::Write as _;
use std::path::PathBuf;

use csv_core::WriteResult;

use crate::coordinator::Snapshot;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the standard output.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not create the output file {1:?}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("could not write to {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write to the standard output")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not encode a JSON record")]
    Json(#[source] serde_json::Error),
    #[error("could not encode a CSV field")]
    Csv,
    #[error("column headers must precede all records")]
    LateHeaders,
}

/// A result that can be shown both as a row of cells and as a JSON object.
pub trait Record: serde::Serialize {
    fn cells(&self) -> Vec<String>;
}

/// One decoded value, as listed in tables and CSV.
#[derive(serde::Serialize)]
struct ValueRow<'a> {
    block: &'a str,
    key: String,
    value: String,
}

impl Record for ValueRow<'_> {
    fn cells(&self) -> Vec<String> {
        vec![self.block.to_string(), self.key.clone(), self.value.clone()]
    }
}

#[derive(serde::Serialize)]
struct SnapshotRecord<'a> {
    block: &'a str,
    available: bool,
    values: &'a Snapshot,
}

struct Sink {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
}

impl Sink {
    fn error(&self, e: std::io::Error) -> Error {
        match &self.path {
            Some(path) => Error::WriteFile(e, path.clone()),
            None => Error::WriteStdout(e),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.io.write_all(bytes).map_err(|e| self.error(e))
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.io.flush().map_err(|e| self.error(e))
    }
}

enum Renderer {
    Table(comfy_table::Table),
    Csv { started: bool },
    Jsonl,
}

pub struct Output {
    sink: Sink,
    renderer: Renderer,
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io: Box<dyn std::io::Write> = match &self.output {
            None => Box::new(std::io::stdout().lock()),
            Some(path) => Box::new(
                std::fs::File::create(path).map_err(|e| Error::Create(e, path.clone()))?,
            ),
        };
        let renderer = match self.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                Renderer::Table(table)
            }
            Format::Csv => Renderer::Csv { started: false },
            Format::Jsonl => Renderer::Jsonl,
        };
        Ok(Output { sink: Sink { path: self.output, io }, renderer })
    }
}

/// Encode one CSV line, growing the buffer until every field fits.
fn csv_line<S: AsRef<str>>(fields: &[S]) -> Result<Vec<u8>, Error> {
    let mut writer = csv_core::Writer::new();
    let mut line = Vec::new();
    let mut buffer = vec![0; 64];
    for (index, field) in fields.iter().enumerate() {
        if index != 0 {
            let (WriteResult::InputEmpty, n) = writer.delimiter(&mut buffer) else {
                return Err(Error::Csv);
            };
            line.extend_from_slice(&buffer[..n]);
        }
        let mut input = field.as_ref().as_bytes();
        loop {
            let (result, read, written) = writer.field(input, &mut buffer);
            line.extend_from_slice(&buffer[..written]);
            input = &input[read..];
            match result {
                WriteResult::InputEmpty => break,
                WriteResult::OutputFull => buffer.resize(buffer.len() * 2, 0),
            }
        }
    }
    let (WriteResult::InputEmpty, n) = writer.terminator(&mut buffer) else {
        return Err(Error::Csv);
    };
    line.extend_from_slice(&buffer[..n]);
    Ok(line)
}

impl Output {
    /// Set the column names. JSON lines carry their own field names and ignore these.
    pub fn table_headers(&mut self, headers: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.renderer {
            Renderer::Table(table) => {
                table.set_header(headers);
            }
            Renderer::Csv { started: true } => return Err(Error::LateHeaders),
            Renderer::Csv { started } => {
                *started = true;
                let line = csv_line(&headers)?;
                self.sink.write(&line)?;
            }
            Renderer::Jsonl => {}
        }
        Ok(())
    }

    pub fn record(&mut self, record: &impl Record) -> Result<(), Error> {
        match &mut self.renderer {
            Renderer::Table(table) => {
                table.add_row(record.cells());
            }
            Renderer::Csv { started } => {
                *started = true;
                let line = csv_line(&record.cells())?;
                self.sink.write(&line)?;
            }
            Renderer::Jsonl => {
                let mut line = serde_json::to_vec(record).map_err(Error::Json)?;
                line.push(b'\n');
                self.sink.write(&line)?;
            }
        }
        Ok(())
    }

    /// Output a snapshot: one row per value, or a single JSON object for the whole block.
    pub fn snapshot(
        &mut self,
        block: &str,
        available: bool,
        snapshot: &Snapshot,
    ) -> Result<(), Error> {
        if let Renderer::Jsonl = self.renderer {
            let record = SnapshotRecord { block, available, values: snapshot };
            let mut line = serde_json::to_vec(&record).map_err(Error::Json)?;
            line.push(b'\n');
            return self.sink.write(&line);
        }
        for (key, value) in snapshot.values() {
            self.record(&ValueRow { block, key: key.to_string(), value: value.to_string() })?;
        }
        Ok(())
    }

    /// Push out what has been written so far. Tables are only rendered by [`Self::commit`].
    pub fn flush(&mut self) -> Result<(), Error> {
        self.sink.flush()
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if let Renderer::Table(table) = &self.renderer {
            let rendered = format!("{table}\n");
            self.sink.write(rendered.as_bytes())?;
        }
        self.sink.flush()
    }
}
