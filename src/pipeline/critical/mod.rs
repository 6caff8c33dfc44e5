//! Domain-critical fields: the fixed schema, per-document-type scoping,
//! validation and the single-field backfill loop.

pub mod validator;
pub mod backfill;

pub use validator::*;
pub use backfill::*;

use serde::Serialize;
use serde_json::Value;

use crate::pipeline::analysis::{
    Contact, Extracted, FinancialCriteria, GuaranteeRatios, MergedAnalysis, ServiceHours,
};

/// A field every catering tender must state. Declared in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalField {
    Contact,
    GuaranteeRatios,
    ServiceHours,
    EstimatedValue,
    FinancialCriteria,
}

/// Static description of a critical field, reported with missing entries.
#[derive(Debug, Clone, Serialize)]
pub struct FieldConfig {
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    /// Document types that normally carry this field.
    pub doc_types: &'static [&'static str],
}

impl CriticalField {
    pub const ALL: [CriticalField; 5] = [
        Self::Contact,
        Self::GuaranteeRatios,
        Self::ServiceHours,
        Self::EstimatedValue,
        Self::FinancialCriteria,
    ];

    /// JSON key inside the `critical` group.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::GuaranteeRatios => "guarantee_ratios",
            Self::ServiceHours => "service_hours",
            Self::EstimatedValue => "estimated_value",
            Self::FinancialCriteria => "financial_criteria",
        }
    }

    pub fn config(&self) -> FieldConfig {
        match self {
            Self::Contact => FieldConfig {
                required: &["phone", "address"],
                optional: &["email", "contact_person"],
                doc_types: &["admin_spec", "announcement"],
            },
            Self::GuaranteeRatios => FieldConfig {
                required: &["provisional", "final"],
                optional: &[],
                doc_types: &["admin_spec", "contract"],
            },
            Self::ServiceHours => FieldConfig {
                required: &["breakfast", "lunch", "dinner"],
                optional: &[],
                doc_types: &["tech_spec"],
            },
            Self::EstimatedValue => FieldConfig {
                required: &[],
                optional: &[],
                doc_types: &["announcement", "admin_spec"],
            },
            Self::FinancialCriteria => FieldConfig {
                required: &["current_ratio", "equity_ratio"],
                optional: &["experience_ratio"],
                doc_types: &["admin_spec", "contract"],
            },
        }
    }

    /// Focused extraction prompt for this field alone. The document text is appended.
    pub fn fallback_prompt(&self) -> &'static str {
        match self {
            Self::Contact => {
                r#"Find the CONTACT DETAILS of the contracting authority (İLETİŞİM BİLGİLERİ) in this text:
- Phone number (usually 0xxx xxx xx xx)
- E-mail address
- Postal address (province, district, street)
- Name of the responsible person (yetkili)

Return JSON only:
{ "contact": { "phone": "...", "email": "...", "address": "...", "contact_person": "..." } }

Write "unspecified" for anything you cannot find."#
            }
            Self::GuaranteeRatios => {
                r#"Find the GUARANTEE RATIOS (TEMİNAT ORANLARI) in this text:
- Provisional guarantee, geçici teminat (usually %3)
- Final guarantee, kesin teminat (usually %6)

Return JSON only:
{ "guarantee_ratios": { "provisional": "%3", "final": "%6" } }

Write "unspecified" for anything you cannot find."#
            }
            Self::ServiceHours => {
                r#"Find the MEAL SERVICE HOURS (SERVİS SAATLERİ) in this text:
- Breakfast, kahvaltı (e.g. 07:00-08:30)
- Lunch, öğle yemeği (e.g. 12:00-13:30)
- Dinner, akşam yemeği (e.g. 17:30-19:00)

Return JSON only:
{ "service_hours": { "breakfast": "07:00-08:30", "lunch": "12:00-13:30", "dinner": "17:30-19:00" } }

Write "unspecified" for anything you cannot find."#
            }
            Self::EstimatedValue => {
                r#"Find the ESTIMATED VALUE of the tender in this text.
It usually appears as "Yaklaşık maliyet", "Tahmini bedel" or "İşin bedeli" and is an amount in TL.

Return JSON only:
{ "estimated_value": "45.000.000,00 TL" }

Write "unspecified" if you cannot find it."#
            }
            Self::FinancialCriteria => {
                r#"Find the FINANCIAL QUALIFICATION CRITERIA (MALİ YETERLİK KRİTERLERİ) in this text:
- Current ratio, cari oran (e.g. at least 0.75)
- Equity ratio, özkaynak oranı (e.g. 0.15 or %15)
- Work experience ratio, iş deneyimi (e.g. %25)

Return JSON only:
{ "financial_criteria": { "current_ratio": "0.75", "equity_ratio": "0.15", "experience_ratio": "%25" } }

Write "unspecified" for anything you cannot find."#
            }
        }
    }

    fn leaves<'a>(&self, analysis: &'a MergedAnalysis) -> Vec<&'a Extracted> {
        let c = &analysis.critical;
        match self {
            Self::Contact => vec![
                &c.contact.address,
                &c.contact.phone,
                &c.contact.email,
                &c.contact.contact_person,
            ],
            Self::GuaranteeRatios => {
                vec![&c.guarantee_ratios.provisional, &c.guarantee_ratios.final_ratio]
            }
            Self::ServiceHours => vec![
                &c.service_hours.breakfast,
                &c.service_hours.lunch,
                &c.service_hours.dinner,
            ],
            Self::EstimatedValue => vec![&c.estimated_value],
            Self::FinancialCriteria => vec![
                &c.financial_criteria.experience_ratio,
                &c.financial_criteria.equity_ratio,
                &c.financial_criteria.current_ratio,
            ],
        }
    }

    /// Filled when at least one leaf carries real content.
    pub fn is_filled(&self, analysis: &MergedAnalysis) -> bool {
        self.leaves(analysis).iter().any(|v| v.is_present())
    }

    /// Whether some provider explicitly answered "not in the document".
    pub fn is_unspecified(&self, analysis: &MergedAnalysis) -> bool {
        !self.is_filled(analysis)
            && self
                .leaves(analysis)
                .iter()
                .any(|v| matches!(v, Extracted::Unspecified))
    }

    /// Write a backfilled value into the analysis. Only leaves with real content
    /// overwrite; returns whether the field is filled afterwards.
    pub fn apply(&self, analysis: &mut MergedAnalysis, value: &Value) -> bool {
        let c = &mut analysis.critical;
        match self {
            Self::Contact => {
                let incoming: Contact = parse_group(value);
                overlay(&mut c.contact.address, incoming.address);
                overlay(&mut c.contact.phone, incoming.phone);
                overlay(&mut c.contact.email, incoming.email);
                overlay(&mut c.contact.contact_person, incoming.contact_person);
            }
            Self::GuaranteeRatios => {
                let incoming: GuaranteeRatios = parse_group(value);
                overlay(&mut c.guarantee_ratios.provisional, incoming.provisional);
                overlay(&mut c.guarantee_ratios.final_ratio, incoming.final_ratio);
            }
            Self::ServiceHours => {
                let incoming: ServiceHours = parse_group(value);
                overlay(&mut c.service_hours.breakfast, incoming.breakfast);
                overlay(&mut c.service_hours.lunch, incoming.lunch);
                overlay(&mut c.service_hours.dinner, incoming.dinner);
            }
            Self::EstimatedValue => {
                overlay(&mut c.estimated_value, Extracted::classify(value.clone()));
                analysis.sync_estimated_value();
            }
            Self::FinancialCriteria => {
                let incoming: FinancialCriteria = parse_group(value);
                overlay(&mut c.financial_criteria.experience_ratio, incoming.experience_ratio);
                overlay(&mut c.financial_criteria.equity_ratio, incoming.equity_ratio);
                overlay(&mut c.financial_criteria.current_ratio, incoming.current_ratio);
            }
        }
        self.is_filled(analysis)
    }
}

fn parse_group<T: serde::de::DeserializeOwned + Default>(value: &Value) -> T {
    if value.is_object() {
        serde_json::from_value(value.clone()).unwrap_or_default()
    } else {
        T::default()
    }
}

fn overlay(slot: &mut Extracted, incoming: Extracted) {
    if incoming.is_present() {
        *slot = incoming;
    }
}

/// Critical fields to check for a document type hint.
///
/// Administrative specifications carry every field; technical specifications
/// only meal-service hours; unit-price schedules none; contracts the guarantee
/// and financial terms; announcements the contact and estimated value.
/// Unknown or absent hints check everything.
pub fn fields_for_doc_type(doc_type: Option<&str>) -> Vec<CriticalField> {
    let Some(doc_type) = doc_type.map(str::to_lowercase).filter(|d| !d.trim().is_empty()) else {
        return CriticalField::ALL.to_vec();
    };
    let has = |needles: &[&str]| needles.iter().any(|n| doc_type.contains(n));

    if has(&["admin_spec", "idari", "zeyilname_admin"]) {
        CriticalField::ALL.to_vec()
    } else if has(&["tech_spec", "teknik", "zeyilname_tech"]) {
        vec![CriticalField::ServiceHours]
    } else if has(&["unit_price", "birim_fiyat"]) {
        Vec::new()
    } else if has(&["contract", "sozlesme", "sözleşme"]) {
        vec![CriticalField::GuaranteeRatios, CriticalField::FinancialCriteria]
    } else if has(&["ilan", "announcement"]) {
        vec![CriticalField::Contact, CriticalField::EstimatedValue]
    } else {
        CriticalField::ALL.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn schema_order_is_fixed() {
        let keys: Vec<_> = CriticalField::ALL.iter().map(|f| f.key()).collect();
        assert_eq!(
            keys,
            [
                "contact",
                "guarantee_ratios",
                "service_hours",
                "estimated_value",
                "financial_criteria"
            ]
        );
    }

    #[test]
    fn every_field_has_a_prompt_naming_its_key() {
        for field in CriticalField::ALL {
            assert!(field.fallback_prompt().contains(field.key()), "{field:?}");
        }
    }

    #[test]
    fn doc_type_scoping() {
        assert_eq!(fields_for_doc_type(None).len(), 5);
        assert_eq!(fields_for_doc_type(Some("")).len(), 5);
        assert_eq!(fields_for_doc_type(Some("admin_spec")).len(), 5);
        assert_eq!(fields_for_doc_type(Some("Idari_Sartname")).len(), 5);
        assert_eq!(
            fields_for_doc_type(Some("tech_spec")),
            vec![CriticalField::ServiceHours]
        );
        assert!(fields_for_doc_type(Some("unit_price")).is_empty());
        assert_eq!(
            fields_for_doc_type(Some("contract")),
            vec![CriticalField::GuaranteeRatios, CriticalField::FinancialCriteria]
        );
        assert_eq!(
            fields_for_doc_type(Some("ilan")),
            vec![CriticalField::Contact, CriticalField::EstimatedValue]
        );
        assert_eq!(fields_for_doc_type(Some("menu_list")).len(), 5);
    }

    #[test]
    fn filled_needs_one_present_leaf() {
        let mut analysis = MergedAnalysis::default();
        assert!(!CriticalField::Contact.is_filled(&analysis));
        analysis.critical.contact.phone = Extracted::Unspecified;
        assert!(!CriticalField::Contact.is_filled(&analysis));
        assert!(CriticalField::Contact.is_unspecified(&analysis));
        analysis.critical.contact.email = "ihale@belediye.gov.tr".into();
        assert!(CriticalField::Contact.is_filled(&analysis));
    }

    #[test]
    fn apply_overlays_only_real_values() {
        let mut analysis = MergedAnalysis::default();
        analysis.critical.contact.address = "Atatürk Cad. No:1 Ankara".into();

        let filled = CriticalField::Contact.apply(
            &mut analysis,
            &json!({"phone": "0312 555 12 34", "address": "unspecified", "email": ""}),
        );
        assert!(filled);
        assert_eq!(
            analysis.critical.contact.address.as_text().as_deref(),
            Some("Atatürk Cad. No:1 Ankara")
        );
        assert_eq!(
            analysis.critical.contact.phone.as_text().as_deref(),
            Some("0312 555 12 34")
        );
    }

    #[test]
    fn apply_placeholder_leaves_field_unfilled() {
        let mut analysis = MergedAnalysis::default();
        let filled = CriticalField::GuaranteeRatios.apply(
            &mut analysis,
            &json!({"provisional": "Belirtilmemiş", "final": "Belirtilmemiş"}),
        );
        assert!(!filled);
    }

    #[test]
    fn apply_estimated_value_mirrors_summary() {
        let mut analysis = MergedAnalysis::default();
        assert!(CriticalField::EstimatedValue.apply(&mut analysis, &json!("12.500.000,00 TL")));
        assert!(analysis.summary.estimated_value.is_present());
    }

    #[test]
    fn apply_non_object_to_group_is_ignored() {
        let mut analysis = MergedAnalysis::default();
        assert!(!CriticalField::ServiceHours.apply(&mut analysis, &json!("12:00")));
    }
}
