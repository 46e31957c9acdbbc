//! Append-only CSV tables.
//!
//! Each table is opened once per run. The header goes in only when the file
//! is empty, and every row is flushed as soon as it is written. Fields
//! holding a comma, quote or line break are quoted RFC 4180 style.

use crate::measure::MeasurementError;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A row type with a fixed column layout.
pub trait CsvRow {
    const HEADER: &'static [&'static str];

    fn fields(&self) -> Vec<String>;
}

pub struct CsvTable<R: CsvRow> {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
    _row: PhantomData<R>,
}

impl<R: CsvRow> CsvTable<R> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MeasurementError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| MeasurementError::io(&path, e))?;
        let empty = file
            .metadata()
            .map_err(|e| MeasurementError::io(&path, e))?
            .len()
            == 0;

        let mut table = Self {
            path,
            writer: BufWriter::new(file),
            rows: 0,
            _row: PhantomData,
        };
        if empty {
            let header = R::HEADER.join(",");
            table.write_line(&header)?;
        }
        Ok(table)
    }

    pub fn append(&mut self, row: &R) -> Result<(), MeasurementError> {
        let line = row
            .fields()
            .iter()
            .map(|f| escape_field(f))
            .collect::<Vec<_>>()
            .join(",");
        self.write_line(&line)?;
        self.rows += 1;
        Ok(())
    }

    /// Rows appended through this handle.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &str) -> Result<(), MeasurementError> {
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| MeasurementError::io(&self.path, e))
    }
}

fn escape_field(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

impl<R: CsvRow> std::fmt::Debug for CsvTable<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvTable")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair(u64, &'static str);

    impl CsvRow for Pair {
        const HEADER: &'static [&'static str] = &["n", "label"];

        fn fields(&self) -> Vec<String> {
            vec![self.0.to_string(), self.1.to_string()]
        }
    }

    #[test]
    fn test_header_written_once_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");

        let mut table = CsvTable::<Pair>::open(&path).unwrap();
        table.append(&Pair(200, "a")).unwrap();
        drop(table);

        let mut table = CsvTable::<Pair>::open(&path).unwrap();
        table.append(&Pair(400, "b")).unwrap();
        assert_eq!(table.rows(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "n,label\n200,a\n400,b\n");
    }

    #[test]
    fn test_rows_visible_without_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let mut table = CsvTable::<Pair>::open(&path).unwrap();
        table.append(&Pair(1, "x")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "n,label\n1,x\n");
    }

    #[test]
    fn test_fields_with_separators_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let mut table = CsvTable::<Pair>::open(&path).unwrap();
        table.append(&Pair(1, "day,1.tsv.gz")).unwrap();
        table.append(&Pair(2, "say \"hi\"")).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "n,label\n1,\"day,1.tsv.gz\"\n2,\"say \"\"hi\"\"\"\n"
        );
    }

    #[test]
    fn test_open_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvTable::<Pair>::open(dir.path().join("nope").join("t.csv")).unwrap_err();
        assert!(matches!(err, MeasurementError::Io { .. }));
    }
}
