//! Tabular file reader for lead imports.
//!
//! CSV goes through the `csv` crate, spreadsheets (xlsx, xls, ods) through
//! `calamine`. Either way the caller gets normalized column names and one map
//! per data row, with empty cells left out.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;

/// Why a file could not be turned into rows. The messages are shown to the
/// uploader as-is.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImportError {
    #[error("Ungültiges Dateiformat. Erlaubt: CSV, XLSX, XLS")]
    UnsupportedFormat,

    #[error("Fehler beim Lesen der Datei: {0}")]
    Read(String),

    #[error("Spalte '{0}' nicht gefunden")]
    MissingColumn(&'static str),
}

/// Columns the importer understands, each accepted under two spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    FirstName,
    LastName,
    Email,
    Phone,
    Company,
}

impl Field {
    /// Accepted column names, preferred spelling first.
    pub fn synonyms(&self) -> [&'static str; 2] {
        match self {
            Field::FirstName => ["vorname", "first_name"],
            Field::LastName => ["nachname", "last_name"],
            Field::Email => ["email", "e-mail"],
            Field::Phone => ["telefon", "phone"],
            Field::Company => ["firma", "company"],
        }
    }
}

/// Normalizes a header cell: trimmed and lower-cased.
pub fn normalize_column(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Supported input encodings, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Spreadsheet,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Result<Self, ImportError> {
        let lower = filename.trim().to_lowercase();
        if lower.ends_with(".csv") {
            Ok(FileKind::Csv)
        } else if [".xlsx", ".xls", ".ods"].iter().any(|ext| lower.ends_with(ext)) {
            Ok(FileKind::Spreadsheet)
        } else {
            Err(ImportError::UnsupportedFormat)
        }
    }
}

/// A parsed table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularData {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
}

impl TabularData {
    /// Builds a table from a header row and raw data rows, normalizing column
    /// names and dropping empty cells.
    pub fn from_rows<H, R, C>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let columns: Vec<String> = headers
            .into_iter()
            .map(|h| normalize_column(h.as_ref()))
            .collect();

        let rows = rows
            .into_iter()
            .map(|cells| {
                columns
                    .iter()
                    .zip(cells)
                    .filter_map(|(column, cell)| {
                        let value = cell.as_ref().trim();
                        (!column.is_empty() && !value.is_empty())
                            .then(|| (column.clone(), value.to_string()))
                    })
                    .collect::<HashMap<_, _>>()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    /// The column holding `field`, under whichever spelling the file uses.
    pub fn column_for(&self, field: Field) -> Option<&str> {
        field
            .synonyms()
            .into_iter()
            .find_map(|name| self.columns.iter().find(|c| c.as_str() == name))
            .map(String::as_str)
    }

    /// Fails with the first required field that has no column.
    pub fn require(&self, fields: &[Field]) -> Result<(), ImportError> {
        match fields.iter().find(|f| self.column_for(**f).is_none()) {
            Some(missing) => Err(ImportError::MissingColumn(missing.synonyms()[0])),
            None => Ok(()),
        }
    }
}

/// Value of `field` in `row`, trying each spelling in turn.
pub fn field_value<'a>(row: &'a HashMap<String, String>, field: Field) -> Option<&'a str> {
    field
        .synonyms()
        .into_iter()
        .find_map(|name| row.get(name))
        .map(String::as_str)
}

/// Reads an uploaded file into a table.
pub fn read_table(filename: &str, bytes: &[u8]) -> Result<TabularData, ImportError> {
    match FileKind::from_filename(filename)? {
        FileKind::Csv => read_csv(bytes),
        FileKind::Spreadsheet => read_spreadsheet(bytes),
    }
}

fn read_csv(bytes: &[u8]) -> Result<TabularData, ImportError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| ImportError::Read(e.to_string()))?
        .clone();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Read(e.to_string()))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        records.push(record);
    }

    Ok(TabularData::from_rows(headers.iter(), records.iter().map(|r| r.iter())))
}

fn read_spreadsheet(bytes: &[u8]) -> Result<TabularData, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Read(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::Read("Arbeitsmappe enthält keine Tabelle".to_string()))?
        .map_err(|e| ImportError::Read(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(cell_text).collect(),
        None => return Ok(TabularData::default()),
    };

    let data: Vec<Vec<String>> = rows
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
        .collect();

    Ok(TabularData::from_rows(headers, data))
}

/// Renders a spreadsheet cell as text. Whole-number floats lose their
/// fractional part so phone numbers and zip codes survive.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("{:?}", e),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}
