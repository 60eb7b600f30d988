// ==========================================
// Ratebook ingestion - importer layer
// ==========================================
// Raw provider files -> canonical rate records
// Supports: CSV, Excel (xlsx/xls/xlsb), ODS
// Layouts: flat header table, rental matrix
// ==========================================

pub mod cell_normalizer;
pub mod column_mapping;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod matrix_transposer;
pub mod ratebook_importer_impl;
pub mod ratebook_importer_trait;
pub mod shape_detector;

// Core types
pub use column_mapping::{ColumnMappingResolver, MappingResolution};
pub use error::{ImportError, ImportResult};
pub use field_mapper::{CanonicalRow, FieldIndex, RateRecordMapper, RowContext};
pub use file_parser::{CsvParser, ExcelParser, FileFormat, UniversalFileParser};
pub use matrix_transposer::{MatrixTable, MatrixTransposer};
pub use ratebook_importer_impl::{content_hash, ImportSettings, RatebookImporterImpl};
pub use shape_detector::ShapeDetector;

// Trait seams
pub use ratebook_importer_trait::{
    FieldMapper, FileParser, MappingSuggestionService, RatebookImporter, ScoringService,
    VehicleLookup,
};
