use serde::Serialize;

use super::{fields_for_doc_type, CriticalField, FieldConfig};
use crate::pipeline::analysis::MergedAnalysis;

/// Why a critical field counts as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    /// No provider produced anything.
    Missing,
    /// A provider answered with a placeholder meaning "not in the document".
    Unspecified,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingField {
    pub field: CriticalField,
    pub config: FieldConfig,
    pub reason: MissingReason,
}

/// Snapshot of critical-field presence. Taken before and after backfill.
#[derive(Debug, Clone, Serialize)]
pub struct CriticalFieldValidation {
    pub valid: bool,
    /// The document type carries no critical fields; backfill is not attempted.
    pub skipped: bool,
    pub missing: Vec<MissingField>,
    pub filled: Vec<CriticalField>,
    pub completeness: f64,
}

impl CriticalFieldValidation {
    pub fn missing_fields(&self) -> Vec<CriticalField> {
        self.missing.iter().map(|m| m.field).collect()
    }
}

/// Check the critical fields relevant to `doc_type`. `missing` only ever
/// contains schema fields, in schema order.
pub fn validate(analysis: &MergedAnalysis, doc_type: Option<&str>) -> CriticalFieldValidation {
    let fields = fields_for_doc_type(doc_type);

    if fields.is_empty() {
        tracing::info!(
            doc_type = doc_type.unwrap_or("none"),
            "Critical field check skipped: document type carries no critical fields"
        );
        return CriticalFieldValidation {
            valid: true,
            skipped: true,
            missing: Vec::new(),
            filled: Vec::new(),
            completeness: 1.0,
        };
    }

    let mut missing = Vec::new();
    let mut filled = Vec::new();
    for field in &fields {
        if field.is_filled(analysis) {
            filled.push(*field);
        } else {
            let reason = if field.is_unspecified(analysis) {
                MissingReason::Unspecified
            } else {
                MissingReason::Missing
            };
            missing.push(MissingField {
                field: *field,
                config: field.config(),
                reason,
            });
        }
    }

    let completeness = filled.len() as f64 / fields.len() as f64;

    tracing::info!(
        doc_type = doc_type.unwrap_or("all"),
        checked = fields.len(),
        filled = filled.len(),
        missing = missing.len(),
        completeness = format!("{:.1}%", completeness * 100.0),
        "Critical fields validated"
    );

    CriticalFieldValidation {
        valid: missing.is_empty(),
        skipped: false,
        missing,
        filled,
        completeness,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::analysis::Extracted;

    fn complete_analysis() -> MergedAnalysis {
        MergedAnalysis::from_canonical(&json!({
            "critical": {
                "contact": {"phone": "0312 555 12 34"},
                "guarantee_ratios": {"provisional": "%3", "final": "%6"},
                "service_hours": {"lunch": "12:00-13:30"},
                "financial_criteria": {"current_ratio": "0.75"},
                "estimated_value": "45.000.000,00 TL"
            }
        }))
    }

    #[test]
    fn empty_analysis_misses_everything() {
        let v = validate(&MergedAnalysis::default(), None);
        assert!(!v.valid);
        assert!(!v.skipped);
        assert_eq!(v.missing_fields(), CriticalField::ALL.to_vec());
        assert_eq!(v.completeness, 0.0);
        assert!(v.missing.iter().all(|m| m.reason == MissingReason::Missing));
    }

    #[test]
    fn complete_analysis_is_valid() {
        let v = validate(&complete_analysis(), None);
        assert!(v.valid);
        assert!(v.missing.is_empty());
        assert_eq!(v.completeness, 1.0);
    }

    #[test]
    fn partial_completeness() {
        let mut analysis = complete_analysis();
        analysis.critical.service_hours = Default::default();
        analysis.critical.contact.phone = Extracted::Unspecified;

        let v = validate(&analysis, None);
        assert_eq!(
            v.missing_fields(),
            vec![CriticalField::Contact, CriticalField::ServiceHours]
        );
        assert_eq!(v.missing[0].reason, MissingReason::Unspecified);
        assert_eq!(v.missing[1].reason, MissingReason::Missing);
        assert!((v.completeness - 0.6).abs() < 1e-9);
    }

    #[test]
    fn unit_price_documents_are_skipped() {
        let v = validate(&MergedAnalysis::default(), Some("unit_price"));
        assert!(v.valid);
        assert!(v.skipped);
        assert_eq!(v.completeness, 1.0);
    }

    #[test]
    fn technical_spec_only_checks_service_hours() {
        let v = validate(&MergedAnalysis::default(), Some("tech_spec"));
        assert_eq!(v.missing_fields(), vec![CriticalField::ServiceHours]);
    }

    #[test]
    fn validation_serializes_field_keys() {
        let v = validate(&MergedAnalysis::default(), Some("ilan"));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["missing"][0]["field"], "contact");
        assert_eq!(json["missing"][1]["field"], "estimated_value");
        assert_eq!(json["missing"][0]["config"]["required"][0], "phone");
    }
}
