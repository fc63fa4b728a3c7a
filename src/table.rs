//! Reading uploaded phone sheets and writing filtered results.
//!
//! Input is CSV (a plain one-number-per-line file is a one-column CSV). The
//! phone column is found by header name; without a recognizable header the
//! first column is used and the first row counts as data. Cells are kept as
//! text end to end, so leading zeros survive.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use thiserror::Error;

use crate::storage::PhoneRecord;

/// Header names (lowercased) that mark the phone column.
const PHONE_HEADERS: &[&str] = &[
    "phone",
    "phone_number",
    "phone number",
    "phonenumber",
    "mobile",
    "tel",
    "telephone",
    "number",
    "เบอร์",
    "เบอร์โทร",
    "เบอร์โทรศัพท์",
];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How the phone column is written back out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum PhoneCell {
    /// `="0812345678"`, which spreadsheet tools load as a string.
    #[default]
    Text,
    /// The raw text as read.
    Plain,
}

impl PhoneCell {
    fn render(self, cell: &str) -> String {
        match self {
            PhoneCell::Text if !cell.is_empty() => {
                format!("=\"{}\"", cell.replace('"', "\"\""))
            }
            _ => cell.to_string(),
        }
    }
}

/// An uploaded sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Option<Vec<String>>,
    pub phone_column: usize,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read_path(path: &Path) -> Result<Self, TableError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let detected = rows.first().and_then(|first| phone_header_column(first));
        let table = match detected {
            Some(column) => {
                let header = rows.remove(0);
                Table {
                    header: Some(header),
                    phone_column: column,
                    rows,
                }
            }
            None => Table {
                header: None,
                phone_column: 0,
                rows,
            },
        };

        tracing::debug!(
            target: "dupcheck.table",
            rows = table.rows.len(),
            phone_column = table.phone_column,
            has_header = table.header.is_some(),
            "sheet loaded"
        );
        Ok(table)
    }

    /// Raw phone text of a row; missing cells read as empty.
    pub fn phone_of(&self, row: &[String]) -> String {
        row.get(self.phone_column).cloned().unwrap_or_default()
    }

    /// A copy of this sheet's layout holding only `rows`.
    pub fn with_rows(&self, rows: Vec<Vec<String>>) -> Self {
        Table {
            header: self.header.clone(),
            phone_column: self.phone_column,
            rows,
        }
    }

    /// Write the sheet as CSV, rendering the phone column per `phone_cell`.
    pub fn write<W: Write>(&self, writer: W, phone_cell: PhoneCell) -> Result<(), TableError> {
        let mut out = WriterBuilder::new()
            .flexible(true)
            .quote_style(QuoteStyle::Necessary)
            .from_writer(writer);

        if let Some(header) = &self.header {
            out.write_record(header)?;
        }
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    if i == self.phone_column {
                        phone_cell.render(cell)
                    } else {
                        cell.clone()
                    }
                })
                .collect();
            out.write_record(&cells)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn write_path(&self, path: &Path, phone_cell: PhoneCell) -> Result<(), TableError> {
        let file = File::create(path)?;
        self.write(BufWriter::new(file), phone_cell)
    }
}

fn phone_header_column(row: &[String]) -> Option<usize> {
    row.iter().position(|cell| {
        let name = cell.trim_start_matches('\u{feff}').trim().to_lowercase();
        PHONE_HEADERS.contains(&name.as_str())
    })
}

// ---------------------------------------------------------------------------
// Record export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Write exported records in the chosen format.
pub fn write_records<W: Write>(
    records: &[PhoneRecord],
    writer: W,
    format: ExportFormat,
) -> Result<(), TableError> {
    match format {
        ExportFormat::Csv => {
            let mut out = WriterBuilder::new().from_writer(writer);
            for record in records {
                out.serialize(record)?;
            }
            out.flush()?;
        }
        ExportFormat::Json => {
            let mut writer = writer;
            serde_json::to_writer_pretty(&mut writer, records)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(text: &str) -> Table {
        Table::from_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_headerless_single_column() {
        let table = read("0812345678\n0899999999\n");
        assert_eq!(table.header, None);
        assert_eq!(table.phone_column, 0);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.phone_of(&table.rows[0]), "0812345678");
    }

    #[test]
    fn test_detects_phone_header_in_any_column() {
        let table = read("name,Phone Number,note\nann,0812345678,x\nbob,0899999999,y\n");
        assert_eq!(table.phone_column, 1);
        assert_eq!(
            table.header,
            Some(vec!["name".into(), "Phone Number".into(), "note".into()])
        );
        assert_eq!(table.phone_of(&table.rows[1]), "0899999999");
    }

    #[test]
    fn test_thai_header_and_bom() {
        let table = read("\u{feff}เบอร์โทร\n0812345678\n");
        assert!(table.header.is_some());
        assert_eq!(table.rows, vec![vec!["0812345678".to_string()]]);
    }

    #[test]
    fn test_missing_cell_reads_empty() {
        let table = read("name,phone\nann\n");
        assert_eq!(table.phone_of(&table.rows[0]), "");
    }

    fn written(table: &Table, phone_cell: PhoneCell) -> String {
        let mut out = Vec::new();
        table.write(&mut out, phone_cell).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_plain_write_keeps_leading_zeros_and_header() {
        let table = read("name,tel\nann,0812345678\n");
        assert_eq!(
            written(&table, PhoneCell::Plain),
            "name,tel\nann,0812345678\n"
        );
    }

    #[test]
    fn test_default_phone_cell_is_text() {
        let table = read("phone\n0812345678\n");
        assert_eq!(
            written(&table, PhoneCell::default()),
            "phone\n\"=\"\"0812345678\"\"\"\n"
        );
    }

    #[test]
    fn test_text_cell_only_touches_phone_column() {
        let table = read("name,tel\nann,0812345678\nbob,\n");
        assert_eq!(
            written(&table, PhoneCell::Text),
            "name,tel\nann,\"=\"\"0812345678\"\"\"\nbob,\n"
        );
    }

    #[test]
    fn test_text_cell_doubles_embedded_quotes() {
        assert_eq!(PhoneCell::Text.render("0812\"345678"), "=\"0812\"\"345678\"");
        assert_eq!(PhoneCell::Text.render(""), "");
        assert_eq!(PhoneCell::Plain.render("0812\"345678"), "0812\"345678");
    }

    #[test]
    fn test_write_records_csv() {
        let records = vec![PhoneRecord {
            id: 1,
            raw_value: "0812345678".into(),
            dedup_key: "812345678".into(),
            source_label: "a.csv".into(),
            recorded_at: 1_700_000_000,
        }];
        let mut out = Vec::new();
        write_records(&records, &mut out, ExportFormat::Csv).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            concat!(
                "id,raw_value,dedup_key,source_label,recorded_at\n",
                "1,0812345678,812345678,a.csv,1700000000\n",
            )
        );
    }

    #[test]
    fn test_write_records_json() {
        let mut out = Vec::new();
        write_records(&[], &mut out, ExportFormat::Json).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[]\n");
    }
}
