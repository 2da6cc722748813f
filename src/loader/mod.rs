//! CSV import and export helpers
//!
//! Every data row of a CSV file becomes one record keyed by its 1-based row
//! number. The header row is skipped and the payload is the row written back
//! as a single canonical CSV line.

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::btree::IndexKey;
use crate::record::Record;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Row {row} is not valid UTF-8 once re-encoded")]
    Encoding { row: usize },

    #[error("Too many rows: keys stop at {}", IndexKey::MAX)]
    TooManyRows,
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// Read every data row of the CSV file at `path`
pub fn read_records<P: AsRef<Path>>(path: P) -> LoaderResult<Vec<Record>> {
    let file = File::open(path.as_ref())?;
    let records = records_from_reader(file)?;
    debug!(
        "Read {} rows from {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

/// Same as [`read_records`] over any reader
pub fn records_from_reader<R: Read>(reader: R) -> LoaderResult<Vec<Record>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let fields = result?;
        let key = IndexKey::try_from(row + 1).map_err(|_| LoaderError::TooManyRows)?;
        records.push(Record::new(key, canonical_line(&fields, row + 1)?));
    }
    Ok(records)
}

/// Write payloads one per line, in the order given
pub fn write_payloads<W: Write>(mut out: W, records: &[Record]) -> LoaderResult<()> {
    for record in records {
        out.write_all(record.payload.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// The row re-serialized without its line terminator
fn canonical_line(fields: &StringRecord, row: usize) -> LoaderResult<String> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;

    let bytes = writer
        .into_inner()
        .map_err(|err| io::Error::new(err.error().kind(), err.to_string()))?;
    let mut line = String::from_utf8(bytes).map_err(|_| LoaderError::Encoding { row })?;
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}
