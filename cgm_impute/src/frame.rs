//! CSV-backed columnar table.
//!
//! Columns stay as the raw text read from disk until something asks for
//! them as numbers, so columns the pipeline never touches are written back
//! cell-for-cell as they were read. Quoting is normalized to what the CSV
//! writer needs; the input's line terminator (LF or CRLF) is kept.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::ImputeError;

#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Text(Vec<String>),
    Numeric(Vec<Option<f64>>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Column::Text(v) => v.len(),
            Column::Numeric(v) => v.len(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    headers: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
    crlf: bool,
}

impl Frame {
    pub fn read_csv(path: &Path) -> Result<Self, ImputeError> {
        let bytes = fs::read(path).map_err(|e| ImputeError::io(path, e))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ImputeError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(csv::Error::from)?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ImputeError> {
        let crlf = first_line_is_crlf(bytes);
        let mut csv_reader = csv::ReaderBuilder::new().from_reader(bytes);
        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        let mut rows = 0;
        for record in csv_reader.records() {
            let record = record?;
            for (col, cell) in cells.iter_mut().zip(record.iter()) {
                col.push(cell.to_string());
            }
            rows += 1;
        }
        Ok(Self {
            headers,
            columns: cells.into_iter().map(Column::Text).collect(),
            rows,
            crlf,
        })
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// One cell as text, whatever the column's current representation.
    pub fn cell(&self, col: usize, row: usize) -> Cow<'_, str> {
        match &self.columns[col] {
            Column::Text(v) => Cow::Borrowed(v[row].as_str()),
            Column::Numeric(v) => Cow::Owned(format_value(v[row])),
        }
    }

    /// All cells of a column as owned text.
    pub fn strings(&self, col: usize) -> Vec<String> {
        (0..self.rows).map(|row| self.cell(col, row).into_owned()).collect()
    }

    /// Numeric copy of a column. The frame itself is left untouched.
    pub fn numeric_values(&self, col: usize) -> Result<Vec<Option<f64>>, ImputeError> {
        match &self.columns[col] {
            Column::Numeric(values) => Ok(values.clone()),
            Column::Text(cells) => cells
                .iter()
                .enumerate()
                .map(|(row, cell)| {
                    parse_value(cell).ok_or_else(|| {
                        ImputeError::SchemaMismatch(format!(
                            "column '{}' row {}: '{}' is not numeric",
                            self.headers[col], row, cell
                        ))
                    })
                })
                .collect(),
        }
    }

    /// Write values into an existing column, or append a new column.
    pub fn set_numeric(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<(), ImputeError> {
        if values.len() != self.rows {
            return Err(ImputeError::SchemaMismatch(format!(
                "column '{}' has {} rows, expected {}",
                name,
                values.len(),
                self.rows
            )));
        }
        match self.column_index(name) {
            Some(idx) => self.columns[idx] = Column::Numeric(values),
            None => {
                self.headers.push(name.to_string());
                self.columns.push(Column::Numeric(values));
            }
        }
        Ok(())
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), ImputeError> {
        Ok(self.write_records(writer)?)
    }

    fn write_records<W: Write>(&self, writer: W) -> csv::Result<()> {
        debug_assert!(self.columns.iter().all(|c| c.len() == self.rows));
        let terminator = if self.crlf {
            csv::Terminator::CRLF
        } else {
            csv::Terminator::Any(b'\n')
        };
        let mut csv_writer = csv::WriterBuilder::new()
            .terminator(terminator)
            .from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in 0..self.rows {
            let record: Vec<Cow<'_, str>> =
                (0..self.columns.len()).map(|col| self.cell(col, row)).collect();
            csv_writer.write_record(record.iter().map(|c| c.as_bytes()))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Write to `path` via a temporary sibling, so readers never observe a
    /// partially written file.
    pub fn write_csv(&self, path: &Path) -> Result<(), ImputeError> {
        let tmp = temp_sibling(path);
        let file = File::create(&tmp).map_err(|e| ImputeError::io(&tmp, e))?;
        if let Err(err) = self.write_records(file) {
            let _ = fs::remove_file(&tmp);
            return Err(write_error(path, err));
        }
        fs::rename(&tmp, path).map_err(|e| ImputeError::io(path, e))
    }
}

/// I/O failures while writing carry the destination path.
fn write_error(path: &Path, err: csv::Error) -> ImputeError {
    let io_parts = match err.kind() {
        csv::ErrorKind::Io(source) => Some((source.kind(), source.to_string())),
        _ => None,
    };
    match io_parts {
        Some((kind, message)) => ImputeError::io(path, io::Error::new(kind, message)),
        None => ImputeError::Csv(err),
    }
}

fn first_line_is_crlf(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .position(|&b| b == b'\n')
        .map_or(false, |pos| pos > 0 && bytes[pos - 1] == b'\r')
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// `Some(None)` for a missing cell, `None` if the cell is not a number.
pub fn parse_value(cell: &str) -> Option<Option<f64>> {
    let text = cell.trim();
    if text.is_empty() {
        return Some(None);
    }
    match text.to_ascii_lowercase().as_str() {
        "nan" | "na" | "n/a" | "null" | "none" => return Some(None),
        _ => {}
    }
    let value: f64 = text.parse().ok()?;
    Some(value.is_finite().then_some(value))
}

/// Render a numeric cell; missing is an empty cell, integral values keep a
/// trailing `.0` like the upstream dataset writers.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        None => String::new(),
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{:.1}", v),
        Some(v) => format!("{}", v),
    }
}

/// Parse a train/test flag cell.
pub fn parse_flag(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" | "yes" | "t" => Some(true),
        "false" | "0" | "0.0" | "no" | "f" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "date,id,CGM,note,is_test\n\
2018-01-01 00:00:00,559,101.0,a b,False\n\
2018-01-01 00:05:00,559,,\"x,y\",False\n\
2018-01-01 00:10:00,559,NaN,,True\n";

    #[test]
    fn untouched_columns_round_trip() {
        let frame = Frame::from_reader(SAMPLE.as_bytes()).unwrap();
        let mut out = Vec::new();
        frame.to_writer(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), SAMPLE);
    }

    #[test]
    fn crlf_input_keeps_crlf_and_cells() {
        let input = "date,note\r\n2018-01-01 00:00:00,\"abc\"\r\n2018-01-01 00:05:00,\"x,y\"\r\n";
        let frame = Frame::from_reader(input.as_bytes()).unwrap();
        let mut out = Vec::new();
        frame.to_writer(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "date,note\r\n2018-01-01 00:00:00,abc\r\n2018-01-01 00:05:00,\"x,y\"\r\n"
        );
    }

    #[test]
    fn write_failure_names_destination() {
        let err = write_error(
            Path::new("out/ohio_imputed.csv"),
            csv::Error::from(io::Error::new(io::ErrorKind::Other, "disk full")),
        );
        match err {
            ImputeError::Io { path, source } => {
                assert_eq!(path, PathBuf::from("out/ohio_imputed.csv"));
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn numeric_parse_treats_nan_as_missing() {
        let frame = Frame::from_reader(SAMPLE.as_bytes()).unwrap();
        let cgm = frame.column_index("CGM").unwrap();
        assert_eq!(frame.numeric_values(cgm).unwrap(), vec![Some(101.0), None, None]);
        assert_eq!(frame.cell(cgm, 0), "101.0");
    }

    #[test]
    fn non_numeric_column_is_schema_mismatch() {
        let frame = Frame::from_reader(SAMPLE.as_bytes()).unwrap();
        let date = frame.column_index("date").unwrap();
        assert!(matches!(
            frame.numeric_values(date),
            Err(ImputeError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn set_numeric_appends_then_replaces() {
        let mut frame = Frame::from_reader(SAMPLE.as_bytes()).unwrap();
        frame
            .set_numeric("CGM_smoothed", vec![Some(100.0), None, Some(99.5)])
            .unwrap();
        frame
            .set_numeric("CGM_smoothed", vec![Some(100.0), Some(98.0), Some(99.5)])
            .unwrap();
        assert_eq!(frame.headers().len(), 6);
        let idx = frame.column_index("CGM_smoothed").unwrap();
        assert_eq!(frame.cell(idx, 1), "98.0");
        assert_eq!(frame.cell(idx, 2), "99.5");
        assert!(frame.set_numeric("short", vec![None]).is_err());
    }

    #[test]
    fn format_and_flags() {
        assert_eq!(format_value(None), "");
        assert_eq!(format_value(Some(5.0)), "5.0");
        assert_eq!(format_value(Some(0.25)), "0.25");
        assert_eq!(parse_flag("False"), Some(false));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn write_csv_replaces_target_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "stale").unwrap();
        let frame = Frame::from_reader(SAMPLE.as_bytes()).unwrap();
        frame.write_csv(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
        assert!(!dir.path().join(".out.csv.tmp").exists());
    }
}
