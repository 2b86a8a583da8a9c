use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone, Debug)]
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
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<dyn std::io::Write>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ),
        };
        Ok(Output::new(self, io))
    }
}

/// Tabular results rendered as a terminal table, JSON lines or CSV.
pub struct Output {
    args: Args,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { header_written: bool },
    Table { comfy: comfy_table::Table, headers: Vec<&'static str>, rows: usize },
    Jsonl,
}

fn new_table(headers: &[&'static str]) -> comfy_table::Table {
    let mut comfy = comfy_table::Table::new();
    comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
    if !headers.is_empty() {
        comfy.set_header(headers.to_vec());
    }
    comfy
}

impl Output {
    fn new(args: Args, io: Box<dyn std::io::Write>) -> Self {
        let formatter = match args.format {
            Format::Table => {
                Formatter::Table { comfy: new_table(&[]), headers: Vec::new(), rows: 0 }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { header_written: false },
        };
        Self { args, io, formatter }
    }

    /// Column headers for the table and CSV formats. Must be called before the first result.
    pub fn table_headers(&mut self, hdrs: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { header_written } => {
                if *header_written {
                    return Ok(());
                }
                *header_written = true;
                self.write_csv_row(&hdrs)?;
            }
            Formatter::Table { comfy, headers, .. } => {
                comfy.set_header(hdrs.clone());
                *headers = hdrs;
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        let mut output = vec![0; 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0)];
        let mut row = Vec::new();
        let mut writer = csv_core::Writer::new();
        for (index, value) in values.iter().enumerate() {
            if index != 0 {
                let (_, written) = writer.delimiter(&mut output);
                row.extend_from_slice(&output[..written]);
            }
            let mut input = value.as_bytes();
            loop {
                let (result, read, written) = writer.field(input, &mut output);
                row.extend_from_slice(&output[..written]);
                input = &input[read..];
                if let WriteResult::InputEmpty = result {
                    break;
                }
            }
        }
        let (_, written) = writer.terminator(&mut output);
        row.extend_from_slice(&output[..written]);
        self.io.write_all(&row).map_err(|e| self.write_error(e))
    }

    pub fn result<R: serde::Serialize>(
        &mut self,
        table_row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { .. } => {
                let values = table_row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy, rows, .. } => {
                comfy.add_row(table_row());
                *rows += 1;
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &serde_record())
                    .map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.args.output {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.into()),
        }
    }

    /// Write out everything buffered so far, without ending the output.
    ///
    /// Tables are rendered as a whole, so a long running command emits one table per batch.
    pub fn flush(&mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy, headers, rows } = &mut self.formatter {
            let table = std::mem::replace(comfy, new_table(headers));
            if std::mem::take(rows) != 0 {
                writeln!(self.io, "{table}").map_err(|e| self.write_error(e))?;
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    pub fn commit(mut self) -> Result<(), Error> {
        self.flush()
    }
}
