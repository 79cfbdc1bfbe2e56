// Output sink: decides where an aggregated result goes (terminal, file or
// dump directory) and in which form (JSON, CSV or raw rule bodies).

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::normalize::{to_rules, to_table, Rule, Shape, Table, UNSUPPORTED_CSV};
use crate::paginate::AggregatedResult;
use crate::query::Query;

/// Output encoding selected with `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Csv,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Terminal,
    File(PathBuf),
}

/// Whether a file destination already existed when the run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Append,
}

/// Where and how the result of one run is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub destination: Destination,
    pub format: Format,
    pub mode: Mode,
}

impl OutputTarget {
    /// Resolve the target from the optional `--outfile` base path. The
    /// format's extension is appended to the base path, and the mode is
    /// `Append` when that file already exists.
    pub fn new(outfile: Option<&Path>, format: Format) -> Self {
        let Some(base) = outfile else {
            return OutputTarget {
                destination: Destination::Terminal,
                format,
                mode: Mode::Create,
            };
        };
        let path = with_extension(base, format.extension());
        let mode = if path.exists() { Mode::Append } else { Mode::Create };
        OutputTarget {
            destination: Destination::File(path),
            format,
            mode,
        }
    }
}

/// `base` + `.ext`, keeping any dots already in the file name.
fn with_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Writes results to their target. Terminal output goes to `out`.
pub struct Sink<W: Write> {
    target: OutputTarget,
    dump_dir: Option<PathBuf>,
    out: W,
}

impl<W: Write> Sink<W> {
    pub fn new(target: OutputTarget, dump_dir: Option<PathBuf>, out: W) -> Self {
        Sink { target, dump_dir, out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write `result` for `query` according to the target.
    ///
    /// Exports always produce rule bodies, whatever the format. CSV for a
    /// query without a tabular shape prints [`UNSUPPORTED_CSV`] and writes
    /// nothing.
    pub fn emit(&mut self, query: &Query, result: &AggregatedResult) -> Result<()> {
        match (Shape::for_query(query), self.target.format) {
            (Some(Shape::Rules), _) => self.write_rules(&to_rules(result)),
            (_, Format::Json) => self.write_json(&result.to_json()),
            (Some(Shape::Table(layout)), Format::Csv) => self.write_table(&to_table(layout, result)),
            (None, Format::Csv) => {
                writeln!(self.out, "{UNSUPPORTED_CSV}")?;
                Ok(())
            }
        }
    }

    fn write_json(&mut self, document: &Value) -> Result<()> {
        match &self.target.destination {
            Destination::Terminal => {
                writeln!(self.out, "{}", serde_json::to_string_pretty(document)?)?;
                Ok(())
            }
            Destination::File(path) => append_json(path, self.target.mode, document.clone()),
        }
    }

    fn write_table(&mut self, table: &Table) -> Result<()> {
        match &self.target.destination {
            Destination::Terminal => {
                if table.is_empty() {
                    return Ok(());
                }
                let mut writer = csv::Writer::from_writer(&mut self.out);
                write_rows(&mut writer, table, &table.columns, true)?;
                writer.flush()?;
                Ok(())
            }
            Destination::File(path) => append_csv(path, self.target.mode, table),
        }
    }

    fn write_rules(&mut self, rules: &[Rule]) -> Result<()> {
        if let Destination::File(path) = &self.target.destination {
            if self.dump_dir.is_none() {
                warn!("{} is ignored for rule exports; use --dump-dir to write rule files", path.display());
            }
        }

        let Some(dir) = &self.dump_dir else {
            for rule in rules {
                writeln!(self.out, "{}", rule.id_text())?;
                writeln!(self.out, "{}", rule.content)?;
            }
            return Ok(());
        };

        let mut written = 0usize;
        for rule in rules {
            let Some(name) = rule.file_name() else {
                warn!("rule without a name or id; not written");
                continue;
            };
            let path = dir.join(name);
            fs::write(&path, &rule.content)?;
            debug!("wrote {}", path.display());
            written += 1;
        }
        info!("wrote {written} rule files to {}", dir.display());
        Ok(())
    }
}

/// Add `document` as one more element of the JSON array stored at `path`,
/// creating a one-element array when the file is new. The whole file is
/// rewritten.
pub fn append_json(path: &Path, mode: Mode, document: Value) -> Result<()> {
    let mut contents = match mode {
        Mode::Create => Vec::new(),
        Mode::Append => match serde_json::from_slice(&fs::read(path)?)? {
            Value::Array(items) => items,
            _ => {
                return Err(Error::NotAnArray {
                    path: path.display().to_string(),
                })
            }
        },
    };
    contents.push(document);
    fs::write(path, serde_json::to_vec(&Value::Array(contents))?)?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Write `table` to the CSV file at `path`. The header is written only
/// when the file is empty; rows appended to an existing file are laid out
/// against that file's header.
pub fn append_csv(path: &Path, mode: Mode, table: &Table) -> Result<()> {
    let existing_header = match mode {
        Mode::Append if fs::metadata(path)?.len() > 0 => Some(read_header(path)?),
        _ => None,
    };

    let file = match mode {
        Mode::Create => fs::File::create(path)?,
        Mode::Append => OpenOptions::new().append(true).open(path)?,
    };
    let mut writer = csv::Writer::from_writer(file);
    match &existing_header {
        Some(columns) if !columns.is_empty() => {
            let dropped = table.columns_outside(columns);
            if !dropped.is_empty() {
                warn!(
                    ?dropped,
                    "{} has no column for {}; those values are not written",
                    path.display(),
                    dropped.join(", ")
                );
            }
            write_rows(&mut writer, table, columns, false)?
        }
        Some(_) => write_rows(&mut writer, table, &table.columns, false)?,
        None => write_rows(&mut writer, table, &table.columns, !table.is_empty())?,
    }
    writer.flush()?;
    info!("wrote {} rows to {}", table.rows.len(), path.display());
    Ok(())
}

fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_path(path)?;
    let mut record = csv::StringRecord::new();
    if !reader.read_record(&mut record)? {
        return Ok(Vec::new());
    }
    Ok(record.iter().map(str::to_string).collect())
}

fn write_rows<T: Write>(
    writer: &mut csv::Writer<T>,
    table: &Table,
    columns: &[String],
    header: bool,
) -> Result<()> {
    if header {
        writer.write_record(columns)?;
    }
    for row in &table.rows {
        writer.write_record(Table::project(row, columns))?;
    }
    Ok(())
}
