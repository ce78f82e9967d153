//! Spreadsheet sources
//!
//! Workbooks are not line oriented, so they skip the splitter and are read
//! sheet-first: the first worksheet is loaded, its first non-empty row becomes
//! the header and every following non-empty row becomes a record.

use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

use super::decoder::{Header, RawRecord};
use super::{ImportError, Result};

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

/// Whether an object key names a spreadsheet
pub fn is_workbook(key: &str) -> bool {
    key.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            WORKBOOK_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        // Numeric identifiers (NPIs, ZIP codes) come back as floats
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|v| v.trim().is_empty())
}

/// Rows of the first worksheet
#[derive(Debug)]
pub struct WorkbookReader {
    header: Arc<Header>,
    rows: VecDeque<RawRecord>,
    total_rows: u64,
    byte_len: u64,
}

impl WorkbookReader {
    pub fn open(data: Bytes) -> Result<Self> {
        let byte_len = data.len() as u64;
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(data))
            .map_err(|e| ImportError::ParseFatal(format!("unreadable workbook: {}", e)))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| ImportError::ParseFatal("workbook has no worksheets".to_string()))?
            .map_err(|e| ImportError::ParseFatal(format!("unreadable worksheet: {}", e)))?;

        let first_row = range.start().map(|(row, _)| u64::from(row)).unwrap_or(0);

        let mut header = None;
        let mut rows = VecDeque::new();

        for (offset, cells) in range.rows().enumerate() {
            let values: Vec<String> = cells.iter().map(cell_text).collect();
            if is_blank_row(&values) {
                continue;
            }

            match &header {
                None => header = Some(Arc::new(Header::new(values))),
                Some(header) => {
                    let row_number = first_row + offset as u64 + 1;
                    rows.push_back(RawRecord::new(Arc::clone(header), values, row_number));
                },
            }
        }

        let header =
            header.ok_or_else(|| ImportError::ParseFatal("worksheet has no header row".to_string()))?;
        let total_rows = rows.len() as u64;

        debug!(columns = header.len(), total_rows, "Loaded worksheet");

        Ok(Self {
            header,
            rows,
            total_rows,
            byte_len,
        })
    }

    pub fn header(&self) -> Arc<Header> {
        Arc::clone(&self.header)
    }

    pub fn next_record(&mut self) -> Option<RawRecord> {
        self.rows.pop_front()
    }

    /// Data rows in the sheet, known before decoding starts
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_workbook_by_extension() {
        assert!(is_workbook("uploads/roster.xlsx"));
        assert!(is_workbook("uploads/ROSTER.XLS"));
        assert!(is_workbook("a.b/clinics.ods"));
        assert!(!is_workbook("uploads/roster.csv"));
        assert!(!is_workbook("uploads/xlsx"));
    }

    #[test]
    fn test_cell_text_formats_whole_floats_as_integers() {
        assert_eq!(cell_text(&Data::Float(1234567890.0)), "1234567890");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::String("  Austin ".into())), "Austin");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn test_header_is_first_non_blank_row() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(2, 1, "name").unwrap();
        sheet.write_string(2, 2, "zip").unwrap();
        sheet.write_string(3, 1, "Harbor Clinic").unwrap();
        sheet.write_number(3, 2, 98104.0).unwrap();
        sheet.write_string(5, 1, "Ridge Dental").unwrap();
        let data = Bytes::from(workbook.save_to_buffer().unwrap());

        let mut reader = WorkbookReader::open(data).unwrap();
        assert_eq!(reader.header().names(), &["name", "zip"]);
        assert_eq!(reader.total_rows(), 2);

        let first = reader.next_record().unwrap();
        assert_eq!(first.row_number(), 4);
        assert_eq!(first.values(), &["Harbor Clinic", "98104"]);
        let second = reader.next_record().unwrap();
        assert_eq!(second.row_number(), 6);
        assert_eq!(second.values(), &["Ridge Dental", ""]);
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_sheet_without_values_has_no_header() {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.add_worksheet().write_string(0, 0, "  ").unwrap();
        let data = Bytes::from(workbook.save_to_buffer().unwrap());

        let err = WorkbookReader::open(data).unwrap_err();
        assert!(matches!(err, ImportError::ParseFatal(_)));
    }

    #[test]
    fn test_garbage_is_parse_fatal() {
        let err = WorkbookReader::open(Bytes::from_static(b"definitely not a workbook")).unwrap_err();
        assert!(matches!(err, ImportError::ParseFatal(_)));
    }
}
