// ==========================================
// Ratebook ingestion - domain type definitions
// ==========================================
// Canonical field set, table shapes and batch status enums.
// Serialized forms match the stored column values.
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// CanonicalField
// ==========================================
// Serialized as the camelCase key used by stored mappings and the
// suggestion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    CapCode,
    Manufacturer,
    Model,
    Variant,
    ModelYear,
    Term,
    AnnualMileage,
    TotalRental,
    LeaseRental,
    ServiceRental,
    P11d,
    Co2Gkm,
    FuelType,
    Transmission,
    BodyStyle,
    ExcessMileagePpm,
    WholeLifeCost,
    OtrPrice,
    BasicListPrice,
    InsuranceGroup,
    MpgCombined,
    WltpEvRange,
    EuroRating,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 23] = [
        CanonicalField::CapCode,
        CanonicalField::Manufacturer,
        CanonicalField::Model,
        CanonicalField::Variant,
        CanonicalField::ModelYear,
        CanonicalField::Term,
        CanonicalField::AnnualMileage,
        CanonicalField::TotalRental,
        CanonicalField::LeaseRental,
        CanonicalField::ServiceRental,
        CanonicalField::P11d,
        CanonicalField::Co2Gkm,
        CanonicalField::FuelType,
        CanonicalField::Transmission,
        CanonicalField::BodyStyle,
        CanonicalField::ExcessMileagePpm,
        CanonicalField::WholeLifeCost,
        CanonicalField::OtrPrice,
        CanonicalField::BasicListPrice,
        CanonicalField::InsuranceGroup,
        CanonicalField::MpgCombined,
        CanonicalField::WltpEvRange,
        CanonicalField::EuroRating,
    ];

    pub const REQUIRED: [CanonicalField; 6] = [
        CanonicalField::CapCode,
        CanonicalField::Manufacturer,
        CanonicalField::Model,
        CanonicalField::Term,
        CanonicalField::AnnualMileage,
        CanonicalField::TotalRental,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            CanonicalField::CapCode => "capCode",
            CanonicalField::Manufacturer => "manufacturer",
            CanonicalField::Model => "model",
            CanonicalField::Variant => "variant",
            CanonicalField::ModelYear => "modelYear",
            CanonicalField::Term => "term",
            CanonicalField::AnnualMileage => "annualMileage",
            CanonicalField::TotalRental => "totalRental",
            CanonicalField::LeaseRental => "leaseRental",
            CanonicalField::ServiceRental => "serviceRental",
            CanonicalField::P11d => "p11d",
            CanonicalField::Co2Gkm => "co2Gkm",
            CanonicalField::FuelType => "fuelType",
            CanonicalField::Transmission => "transmission",
            CanonicalField::BodyStyle => "bodyStyle",
            CanonicalField::ExcessMileagePpm => "excessMileagePpm",
            CanonicalField::WholeLifeCost => "wholeLifeCost",
            CanonicalField::OtrPrice => "otrPrice",
            CanonicalField::BasicListPrice => "basicListPrice",
            CanonicalField::InsuranceGroup => "insuranceGroup",
            CanonicalField::MpgCombined => "mpgCombined",
            CanonicalField::WltpEvRange => "wltpEvRange",
            CanonicalField::EuroRating => "euroRating",
        }
    }

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    /// Fields stored as integer minor currency units.
    pub fn is_monetary(&self) -> bool {
        matches!(
            self,
            CanonicalField::TotalRental
                | CanonicalField::LeaseRental
                | CanonicalField::ServiceRental
                | CanonicalField::P11d
                | CanonicalField::WholeLifeCost
                | CanonicalField::OtrPrice
                | CanonicalField::BasicListPrice
        )
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        CanonicalField::ALL
            .iter()
            .copied()
            .find(|field| field.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown canonical field: {}", s))
    }
}

// ==========================================
// TableShape
// ==========================================
// Computed once per RawTable, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TableShape {
    Flat {
        header_row_index: usize,
    },
    Matrix {
        term_row_index: usize,
        label_row_index: usize,
    },
}

impl TableShape {
    pub fn layout(&self) -> TableLayout {
        match self {
            TableShape::Flat { .. } => TableLayout::Flat,
            TableShape::Matrix { .. } => TableLayout::Matrix,
        }
    }
}

// ==========================================
// TableLayout
// ==========================================
// Payload-free view of TableShape; also the "file format" half of a
// stored mapping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableLayout {
    Flat,
    Matrix,
}

impl fmt::Display for TableLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableLayout::Flat => write!(f, "flat"),
            TableLayout::Matrix => write!(f, "matrix"),
        }
    }
}

// ==========================================
// ImportStatus
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportStatus::Processing => write!(f, "processing"),
            ImportStatus::Completed => write!(f, "completed"),
            ImportStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(format!("unknown import status: {}", other)),
        }
    }
}

// ==========================================
// MappingSource
// ==========================================
// Where a resolved ColumnMapping came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingSource {
    Stored,
    Suggested,
    Pattern,
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingSource::Stored => write!(f, "stored"),
            MappingSource::Suggested => write!(f, "suggested"),
            MappingSource::Pattern => write!(f, "pattern"),
        }
    }
}
