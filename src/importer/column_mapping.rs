// ==========================================
// Ratebook ingestion - column mapping resolver
// ==========================================
// Source column name -> CanonicalField, from (in order):
//   1. stored provider mapping (authoritative, returned verbatim)
//   2. optional suggestion service (capability-checked, failures fall through)
//   3. ordered regex heuristics
// Required fields are validated before any row is mapped.
// ==========================================

use crate::domain::{
    CanonicalField, ColumnMapping, MappingSource, MappingSuggestionResponse, SourceTable,
    SuggestedMapping,
};
use crate::importer::cell_normalizer::to_trimmed_string;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::ratebook_importer_trait::MappingSuggestionService;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Confidence reported for a stored mapping.
pub const STORED_CONFIDENCE: u8 = 100;
/// Confidence reported for a heuristic pattern match.
pub const PATTERN_CONFIDENCE: u8 = 70;
/// Rows handed to the suggestion service as examples.
pub const SUGGESTION_SAMPLE_ROWS: usize = 5;

// Field order matters: the first field with a matching pattern wins, so
// specific names (excess mileage, model year, finance rental) come before
// the generic ones they contain.
const FIELD_PATTERNS: [(CanonicalField, &[&str]); 23] = [
    (CanonicalField::CapCode, &[r"^cap[\s_\-]*code$", r"^cap$"]),
    (
        CanonicalField::ExcessMileagePpm,
        &[r"excess", r"\bppm\b", r"pence[\s_\-]*per[\s_\-]*mile"],
    ),
    (CanonicalField::ModelYear, &[r"model[\s_\-]*year", r"^year$", r"^my$"]),
    (CanonicalField::Manufacturer, &[r"manufacturer", r"^make$", r"^brand$"]),
    (CanonicalField::Variant, &[r"variant", r"derivative", r"^trim$"]),
    (CanonicalField::Model, &[r"^model$", r"^model[\s_\-]*(name|range)$", r"^range$"]),
    (
        CanonicalField::Term,
        &[
            r"^(contract[\s_\-]*)?term([\s_\-]*\(?months?\)?)?$",
            r"^duration$",
            r"^months$",
        ],
    ),
    (
        CanonicalField::AnnualMileage,
        &[r"mileage", r"^miles$", r"miles[\s_\-]*(pa|per[\s_\-]*annum)"],
    ),
    (CanonicalField::LeaseRental, &[r"(finance|lease)[\s_\-]*rental", r"^finance$"]),
    (
        CanonicalField::ServiceRental,
        &[r"(service|maint(enance)?)[\s_\-]*rental", r"^maint(enance)?$"],
    ),
    (
        CanonicalField::TotalRental,
        &[
            r"^((net|total|monthly|gross|base)[\s_\-]*)?rentals?$",
            r"^(net|total|monthly)[\s_\-]*(rental|payment)",
            r"^\d{1,2}\+\d{2}$",
        ],
    ),
    (CanonicalField::P11d, &[r"p11d"]),
    (CanonicalField::Co2Gkm, &[r"co2"]),
    (CanonicalField::FuelType, &[r"fuel"]),
    (CanonicalField::Transmission, &[r"transmission", r"gearbox", r"^trans$"]),
    (CanonicalField::BodyStyle, &[r"body"]),
    (CanonicalField::WholeLifeCost, &[r"whole[\s_\-]*life", r"^wlc$"]),
    (CanonicalField::OtrPrice, &[r"^otr", r"on[\s_\-]*the[\s_\-]*road"]),
    (
        CanonicalField::BasicListPrice,
        &[r"^blp$", r"basic[\s_\-]*(list[\s_\-]*)?price", r"list[\s_\-]*price"],
    ),
    (CanonicalField::InsuranceGroup, &[r"insurance", r"^ins[\s_\-]*group$"]),
    (CanonicalField::MpgCombined, &[r"mpg"]),
    (
        CanonicalField::WltpEvRange,
        &[r"ev[\s_\-]*range", r"electric[\s_\-]*range", r"wltp.*range"],
    ),
    (CanonicalField::EuroRating, &[r"euro"]),
];

static COMPILED_PATTERNS: LazyLock<Vec<(CanonicalField, Vec<Regex>)>> = LazyLock::new(|| {
    FIELD_PATTERNS
        .iter()
        .map(|(field, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
                .collect();
            (*field, compiled)
        })
        .collect()
});

/// Heuristic match for one column name.
pub fn match_column(column: &str) -> Option<CanonicalField> {
    let name = column.trim();
    COMPILED_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(name)))
        .map(|(field, _)| *field)
}

/// Fail fast when a required field has no source column.
pub fn validate_required(mapping: &ColumnMapping) -> ImportResult<()> {
    let missing = mapping.missing_required();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ImportError::MissingRequiredFields(missing))
    }
}

// ==========================================
// Suggestion response validation
// ==========================================
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSuggestion {
    source_column: String,
    #[serde(default)]
    target_field: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSuggestionResponse {
    #[serde(default)]
    mappings: Vec<RawSuggestion>,
    #[serde(default)]
    suggested_provider_name: Option<String>,
}

/// Parse a raw suggestion-service payload. Confidence is clamped to 0..=100
/// and unknown target fields become null.
pub fn parse_suggestion_response(json: &str) -> anyhow::Result<MappingSuggestionResponse> {
    let raw: RawSuggestionResponse = serde_json::from_str(json)?;
    let mappings = raw
        .mappings
        .into_iter()
        .map(|s| SuggestedMapping {
            source_column: s.source_column,
            target_field: s.target_field,
            confidence: s.confidence.clamp(0.0, 100.0).round() as u8,
            reasoning: s.reasoning,
        })
        .collect();

    Ok(sanitize_suggestions(MappingSuggestionResponse {
        mappings,
        suggested_provider_name: raw.suggested_provider_name,
    }))
}

/// Coerce unknown target keys to null and normalise known ones.
pub fn sanitize_suggestions(mut response: MappingSuggestionResponse) -> MappingSuggestionResponse {
    for suggestion in &mut response.mappings {
        suggestion.confidence = suggestion.confidence.min(100);
        suggestion.target_field = suggestion
            .target_field
            .as_deref()
            .and_then(|key| key.parse::<CanonicalField>().ok())
            .map(|field| field.key().to_string());
    }
    response
}

// ==========================================
// MappingResolution
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingResolution {
    pub mapping: ColumnMapping,
    pub source: MappingSource,
    /// Per mapped column, 0..=100.
    pub confidence: BTreeMap<String, u8>,
}

impl MappingResolution {
    pub fn validate(&self) -> ImportResult<()> {
        validate_required(&self.mapping)
    }
}

// ==========================================
// ColumnMappingResolver
// ==========================================
#[derive(Default)]
pub struct ColumnMappingResolver {
    suggestion_service: Option<Box<dyn MappingSuggestionService>>,
}

impl ColumnMappingResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suggestion_service(service: Box<dyn MappingSuggestionService>) -> Self {
        Self {
            suggestion_service: Some(service),
        }
    }

    /// Resolve the mapping for a source table.
    ///
    /// # Parameters
    /// - stored: mapping configured for the provider, if any
    /// - min_confidence: suggestions below this are ignored
    pub async fn resolve(
        &self,
        provider_code: &str,
        table: &SourceTable,
        stored: Option<ColumnMapping>,
        min_confidence: u8,
    ) -> MappingResolution {
        if let Some(mapping) = stored {
            info!(provider_code, columns = mapping.columns.len(), "using stored column mapping");
            let confidence = mapping
                .columns
                .iter()
                .filter(|(_, field)| field.is_some())
                .map(|(column, _)| (column.clone(), STORED_CONFIDENCE))
                .collect();
            return MappingResolution {
                mapping,
                source: MappingSource::Stored,
                confidence,
            };
        }

        let mut resolution = MappingResolution {
            mapping: ColumnMapping::new(),
            source: MappingSource::Pattern,
            confidence: BTreeMap::new(),
        };

        if let Some(response) = self.fetch_suggestions(provider_code, table).await {
            let accepted = apply_suggestions(&mut resolution, &table.headers, &response, min_confidence);
            if accepted > 0 {
                resolution.source = MappingSource::Suggested;
            }
            info!(provider_code, accepted, "applied mapping suggestions");
        }

        for column in &table.headers {
            if resolution.mapping.get(column).is_some() {
                continue;
            }
            let field = match_column(column);
            if field.is_some() {
                resolution.confidence.insert(column.clone(), PATTERN_CONFIDENCE);
            }
            resolution.mapping.insert(column.clone(), field);
        }

        debug!(mapping = ?resolution.mapping, source = %resolution.source, "column mapping resolved");
        resolution
    }

    /// Heuristics only.
    pub fn resolve_by_patterns(&self, columns: &[String]) -> MappingResolution {
        let mut mapping = ColumnMapping::new();
        let mut confidence = BTreeMap::new();
        for column in columns {
            let field = match_column(column);
            if field.is_some() {
                confidence.insert(column.clone(), PATTERN_CONFIDENCE);
            }
            mapping.insert(column.clone(), field);
        }
        MappingResolution {
            mapping,
            source: MappingSource::Pattern,
            confidence,
        }
    }

    async fn fetch_suggestions(
        &self,
        provider_code: &str,
        table: &SourceTable,
    ) -> Option<MappingSuggestionResponse> {
        let service = self.suggestion_service.as_ref()?;
        if !service.is_available() {
            debug!("suggestion service unavailable, using heuristics");
            return None;
        }

        let samples: Vec<Vec<String>> = table
            .rows
            .iter()
            .take(SUGGESTION_SAMPLE_ROWS)
            .map(|row| row.cells.iter().map(to_trimmed_string).collect())
            .collect();

        match service.suggest(provider_code, &table.headers, &samples).await {
            Ok(response) => Some(sanitize_suggestions(response)),
            Err(e) => {
                warn!(error = %e, provider_code, "suggestion service failed, falling back to heuristics");
                None
            }
        }
    }
}

fn apply_suggestions(
    resolution: &mut MappingResolution,
    columns: &[String],
    response: &MappingSuggestionResponse,
    min_confidence: u8,
) -> usize {
    let mut accepted = 0;
    for suggestion in &response.mappings {
        if suggestion.confidence < min_confidence || !columns.contains(&suggestion.source_column) {
            continue;
        }
        let Some(field) = suggestion
            .target_field
            .as_deref()
            .and_then(|key| key.parse::<CanonicalField>().ok())
        else {
            continue;
        };
        resolution
            .mapping
            .insert(suggestion.source_column.clone(), Some(field));
        resolution
            .confidence
            .insert(suggestion.source_column.clone(), suggestion.confidence);
        accepted += 1;
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TableLayout;
    use async_trait::async_trait;

    fn table(headers: &[&str]) -> SourceTable {
        SourceTable {
            layout: TableLayout::Flat,
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    struct FixedSuggestions(&'static str);

    #[async_trait]
    impl MappingSuggestionService for FixedSuggestions {
        fn is_available(&self) -> bool {
            true
        }

        async fn suggest(
            &self,
            _provider_code: &str,
            _columns: &[String],
            _sample_rows: &[Vec<String>],
        ) -> anyhow::Result<MappingSuggestionResponse> {
            parse_suggestion_response(self.0)
        }
    }

    struct BrokenSuggestions;

    #[async_trait]
    impl MappingSuggestionService for BrokenSuggestions {
        fn is_available(&self) -> bool {
            true
        }

        async fn suggest(
            &self,
            _provider_code: &str,
            _columns: &[String],
            _sample_rows: &[Vec<String>],
        ) -> anyhow::Result<MappingSuggestionResponse> {
            anyhow::bail!("timeout after 30s")
        }
    }

    #[tokio::test]
    async fn test_scenario_c_heuristics() {
        let resolver = ColumnMappingResolver::new();
        let source = table(&["CAP_CODE", "Net_Rental", "ANNUAL_MILEAGE"]);
        let resolution = resolver.resolve("ALD", &source, None, 60).await;

        assert_eq!(resolution.source, MappingSource::Pattern);
        assert_eq!(resolution.mapping.get("CAP_CODE"), Some(CanonicalField::CapCode));
        assert_eq!(resolution.mapping.get("Net_Rental"), Some(CanonicalField::TotalRental));
        assert_eq!(
            resolution.mapping.get("ANNUAL_MILEAGE"),
            Some(CanonicalField::AnnualMileage)
        );
        let missing = resolution.mapping.missing_required();
        for field in [
            CanonicalField::CapCode,
            CanonicalField::TotalRental,
            CanonicalField::AnnualMileage,
        ] {
            assert!(!missing.contains(&field));
        }
        assert_eq!(resolution.confidence.get("CAP_CODE"), Some(&PATTERN_CONFIDENCE));
    }

    #[test]
    fn test_specific_patterns_win_over_generic() {
        assert_eq!(match_column("Excess Mileage"), Some(CanonicalField::ExcessMileagePpm));
        assert_eq!(match_column("Model Year"), Some(CanonicalField::ModelYear));
        assert_eq!(match_column("MODEL"), Some(CanonicalField::Model));
        assert_eq!(match_column("Finance Rental"), Some(CanonicalField::LeaseRental));
        assert_eq!(match_column("Service Rental"), Some(CanonicalField::ServiceRental));
        assert_eq!(match_column("Monthly Rental"), Some(CanonicalField::TotalRental));
        assert_eq!(match_column("Term (Months)"), Some(CanonicalField::Term));
        assert_eq!(match_column("DERIVATIVE"), Some(CanonicalField::Variant));
        assert_eq!(match_column("1+35"), Some(CanonicalField::TotalRental));
    }

    #[test]
    fn test_unrelated_columns_stay_unmapped() {
        assert_eq!(match_column("CAP ID"), None);
        assert_eq!(match_column("Term Code"), None);
        assert_eq!(match_column("Initial Rentals"), None);
        assert_eq!(match_column("Vehicle Description"), None);
    }

    #[test]
    fn test_matrix_synthesized_headers_resolve() {
        let resolution = ColumnMappingResolver::new().resolve_by_patterns(
            &[
                "Make", "Model", "Variant", "CAP Code", "CAP ID", "BLP", "OTR",
                "Vehicle Description", "Mileage", "Term Code", "Term", "Initial Rentals", "Rental",
            ]
            .map(String::from),
        );
        assert!(resolution.validate().is_ok());
        assert_eq!(resolution.mapping.get("BLP"), Some(CanonicalField::BasicListPrice));
        assert_eq!(resolution.mapping.get("OTR"), Some(CanonicalField::OtrPrice));
        assert_eq!(resolution.mapping.get("Rental"), Some(CanonicalField::TotalRental));
    }

    #[tokio::test]
    async fn test_stored_mapping_is_authoritative() {
        let mut stored = ColumnMapping::new();
        stored.insert("Vehicle Ref", Some(CanonicalField::CapCode));
        stored.insert("CAP_CODE", None);

        let resolver = ColumnMappingResolver::new();
        let source = table(&["Vehicle Ref", "CAP_CODE", "Net_Rental"]);
        let resolution = resolver.resolve("ALD", &source, Some(stored.clone()), 60).await;

        assert_eq!(resolution.source, MappingSource::Stored);
        assert_eq!(resolution.mapping, stored);
        // heuristics are bypassed entirely
        assert!(!resolution.mapping.contains_column("Net_Rental"));
        assert!(matches!(
            resolution.validate(),
            Err(ImportError::MissingRequiredFields(_))
        ));
    }

    #[tokio::test]
    async fn test_suggestions_merge_with_heuristics() {
        let json = r#"{
            "mappings": [
                {"sourceColumn": "Vehicle Ref", "targetField": "capCode", "confidence": 92.4, "reasoning": "looks like CAP"},
                {"sourceColumn": "Monthly", "targetField": "totalRental", "confidence": 40},
                {"sourceColumn": "Colour", "targetField": "paintColour", "confidence": 95},
                {"sourceColumn": "Not In File", "targetField": "model", "confidence": 99}
            ],
            "suggestedProviderName": "Lex Autolease"
        }"#;
        let resolver = ColumnMappingResolver::with_suggestion_service(Box::new(FixedSuggestions(json)));
        let source = table(&["Vehicle Ref", "Monthly", "Colour", "ANNUAL_MILEAGE"]);
        let resolution = resolver.resolve("LEX", &source, None, 60).await;

        assert_eq!(resolution.source, MappingSource::Suggested);
        assert_eq!(resolution.mapping.get("Vehicle Ref"), Some(CanonicalField::CapCode));
        assert_eq!(resolution.confidence.get("Vehicle Ref"), Some(&92));
        // below threshold, and "Monthly" matches no pattern
        assert_eq!(resolution.mapping.get("Monthly"), None);
        // unknown target coerced to null
        assert_eq!(resolution.mapping.get("Colour"), None);
        assert!(!resolution.mapping.contains_column("Not In File"));
        assert_eq!(
            resolution.mapping.get("ANNUAL_MILEAGE"),
            Some(CanonicalField::AnnualMileage)
        );
    }

    #[tokio::test]
    async fn test_suggestion_failure_falls_through() {
        let resolver = ColumnMappingResolver::with_suggestion_service(Box::new(BrokenSuggestions));
        let source = table(&["CAP_CODE", "Net_Rental"]);
        let resolution = resolver.resolve("ALD", &source, None, 60).await;

        assert_eq!(resolution.source, MappingSource::Pattern);
        assert_eq!(resolution.mapping.get("CAP_CODE"), Some(CanonicalField::CapCode));
    }

    #[test]
    fn test_parse_suggestion_response_validates() {
        let parsed = parse_suggestion_response(
            r#"{"mappings":[{"sourceColumn":"A","targetField":"TOTALRENTAL","confidence":150},
                            {"sourceColumn":"B","targetField":"bogus","confidence":-3}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.mappings[0].target_field.as_deref(), Some("totalRental"));
        assert_eq!(parsed.mappings[0].confidence, 100);
        assert_eq!(parsed.mappings[1].target_field, None);
        assert_eq!(parsed.mappings[1].confidence, 0);
        assert!(parse_suggestion_response("not json").is_err());
    }
}
