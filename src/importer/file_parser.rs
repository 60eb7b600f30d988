// ==========================================
// Ratebook ingestion - file parsers
// ==========================================
// Raw bytes -> RawTable. No header interpretation happens here;
// shape detection decides where the real table starts.
// Supports: CSV (.csv/.txt), workbooks (.xlsx/.xlsm/.xlsb/.xls/.ods)
// ==========================================

use crate::domain::{CellValue, RawTable};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::ratebook_importer_trait::FileParser;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::ReaderBuilder;
use std::io::Cursor;
use std::path::Path;

/// File format inferred from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Workbook,
}

impl FileFormat {
    pub fn from_file_name(file_name: &str) -> ImportResult<Self> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "csv" | "txt" => Ok(FileFormat::Csv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(FileFormat::Workbook),
            _ => Err(ImportError::UnsupportedFormat(file_name.to_string())),
        }
    }
}

// ==========================================
// CSV parser
// ==========================================
pub struct CsvParser;

impl CsvParser {
    fn parse(&self, bytes: &[u8]) -> ImportResult<RawTable> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // title and count rows are shorter than data rows
            .from_reader(bytes);

        let mut rows = Vec::new();
        for result in reader.byte_records() {
            let record = result?;
            let row: Vec<CellValue> = record
                .iter()
                .map(|field| CellValue::from(String::from_utf8_lossy(field).into_owned()))
                .collect();
            rows.push(row);
        }

        Ok(RawTable::new(rows))
    }
}

impl FileParser for CsvParser {
    fn parse_bytes(&self, file_name: &str, bytes: &[u8]) -> ImportResult<RawTable> {
        if FileFormat::from_file_name(file_name)? != FileFormat::Csv {
            return Err(ImportError::UnsupportedFormat(file_name.to_string()));
        }
        self.parse(bytes)
    }
}

// ==========================================
// Workbook parser
// ==========================================
pub struct ExcelParser;

impl ExcelParser {
    fn parse(&self, bytes: &[u8]) -> ImportResult<RawTable> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

        let sheet_names = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(ImportError::ExcelParseError("workbook has no sheets".to_string()));
        }

        // first sheet that actually holds cells
        for sheet_name in &sheet_names {
            let range = workbook.worksheet_range(sheet_name)?;
            if range.is_empty() {
                continue;
            }
            let rows = range
                .rows()
                .map(|row| row.iter().map(Self::convert_cell).collect())
                .collect();
            return Ok(RawTable::new(rows));
        }

        Err(ImportError::EmptyTable)
    }

    fn convert_cell(cell: &Data) -> CellValue {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::from(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from(s.clone()),
            Data::Error(_) => CellValue::Empty,
        }
    }
}

impl FileParser for ExcelParser {
    fn parse_bytes(&self, file_name: &str, bytes: &[u8]) -> ImportResult<RawTable> {
        if FileFormat::from_file_name(file_name)? != FileFormat::Workbook {
            return Err(ImportError::UnsupportedFormat(file_name.to_string()));
        }
        self.parse(bytes)
    }
}

// ==========================================
// Universal parser (dispatch by extension)
// ==========================================
pub struct UniversalFileParser;

impl FileParser for UniversalFileParser {
    fn parse_bytes(&self, file_name: &str, bytes: &[u8]) -> ImportResult<RawTable> {
        let table = match FileFormat::from_file_name(file_name)? {
            FileFormat::Csv => CsvParser.parse(bytes)?,
            FileFormat::Workbook => ExcelParser.parse(bytes)?,
        };

        if table.is_empty() {
            return Err(ImportError::EmptyTable);
        }
        Ok(table)
    }
}
