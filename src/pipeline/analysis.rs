//! Canonical tender analysis model.
//!
//! Every leaf is an [`Extracted`] value, so "the provider said it is not in the
//! document" (`Unspecified`) stays distinguishable from "nobody produced it"
//! (`Missing`) all the way to validation and output.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Strings that mean "absent" rather than real data: refusal phrases and
/// template examples copied from prompts. Compared trimmed, case-insensitively.
const ABSENCE_SENTINELS: &[&str] = &[
    "unspecified",
    "not specified",
    "not found",
    "not available",
    "unknown",
    "n/a",
    "none",
    "null",
    "-",
    "belirtilmemiş",
    "belirtilmemis",
    "bulunamadı",
    "bulunamadi",
    "bilinmiyor",
    "mevcut değil",
    "yok",
    "0xxx xxx xx xx",
    "email@domain.com",
    "xxx@domain.com",
    "tam adres",
    "ad soyad",
    "deneyim/sertifika",
    "sözleşmede belirtilecek tutar",
    "sözleşmede belirtilecek",
    "istenen tutar",
    "hesaplanacak",
    "teklif edilecek",
    "rakam ve yazıyla",
];

/// Whether a string is a recognized placeholder-for-absence.
pub fn is_absence_sentinel(text: &str) -> bool {
    let trimmed = text.trim().to_lowercase();
    ABSENCE_SENTINELS.iter().any(|s| *s == trimmed)
}

/// An extracted field value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Extracted {
    /// Real content.
    Present(Value),
    /// A provider answered, but with a placeholder meaning "not in the document".
    Unspecified,
    /// Nobody produced a value.
    #[default]
    Missing,
}

impl Extracted {
    /// Classify a raw JSON value.
    pub fn classify(value: Value) -> Self {
        if is_blank(&value) {
            Self::Missing
        } else if !has_content(&value) {
            Self::Unspecified
        } else {
            Self::Present(value)
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Present(v) => Some(v),
            _ => None,
        }
    }

    /// Present text, for prompts and logs.
    pub fn as_text(&self) -> Option<String> {
        self.value().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl From<&str> for Extracted {
    fn from(value: &str) -> Self {
        Self::classify(Value::String(value.to_string()))
    }
}

impl Serialize for Extracted {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Present(v) => v.serialize(serializer),
            Self::Unspecified => serializer.serialize_str("unspecified"),
            Self::Missing => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Extracted {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::classify)
    }
}

/// Null, blank string, or empty container.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Recursive content check: nested containers count only if some leaf is real.
pub fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty() && !is_absence_sentinel(s),
        Value::Array(items) => items.iter().any(has_content),
        Value::Object(map) => map.values().any(has_content),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Field groups
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Summary {
    pub title: Extracted,
    pub institution: Extracted,
    pub registration_number: Extracted,
    pub estimated_value: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catering {
    pub total_persons: Extracted,
    pub daily_meals: Extracted,
    pub contract_duration: Extracted,
    pub meal_types: Extracted,
    pub per_meal_person_counts: Extracted,
    pub service_days: Extracted,
    pub kitchen_type: Extracted,
    pub service_type: Extracted,
    pub meal_variety: Extracted,
    pub cooking_location: Extracted,
    pub labor_rate: Extracted,
    pub delivery_hours: Extracted,
    pub quality_standards: Extracted,
    pub food_safety_docs: Extracted,
    pub distribution_points: Extracted,
    pub equipment_list: Extracted,
    pub material_list: Extracted,
    pub meal_distribution: Extracted,
    pub unit_price_table: Extracted,
    /// Per-dish portion weights (gramaj), `[{item, weight, unit}]`.
    pub portion_weights: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dates {
    pub start_date: Extracted,
    pub end_date: Extracted,
    pub tender_date: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Personnel {
    pub total_count: Extracted,
    pub positions: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub address: Extracted,
    pub phone: Extracted,
    pub email: Extracted,
    pub contact_person: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuaranteeRatios {
    pub provisional: Extracted,
    #[serde(rename = "final")]
    pub final_ratio: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceHours {
    pub breakfast: Extracted,
    pub lunch: Extracted,
    pub dinner: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialCriteria {
    pub experience_ratio: Extracted,
    pub equity_ratio: Extracted,
    pub current_ratio: Extracted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalGroup {
    pub contact: Contact,
    pub guarantee_ratios: GuaranteeRatios,
    pub service_hours: ServiceHours,
    pub financial_criteria: FinancialCriteria,
    pub estimated_value: Extracted,
}

/// Canonical analysis of one tender document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergedAnalysis {
    pub summary: Summary,
    pub catering: Catering,
    pub dates: Dates,
    pub personnel: Personnel,
    pub critical: CriticalGroup,
}

/// Weights of the headline fields in the overall completeness score (sum 100).
const COMPLETENESS_WEIGHTS: &[(&str, u32)] = &[
    ("summary.title", 5),
    ("summary.institution", 5),
    ("summary.registration_number", 5),
    ("catering.total_persons", 10),
    ("catering.daily_meals", 10),
    ("catering.meal_types", 15),
    ("catering.unit_price_table", 15),
    ("personnel.positions", 15),
    ("dates.start_date", 10),
    ("dates.end_date", 10),
];

impl MergedAnalysis {
    /// Build from canonical JSON, tolerating malformed groups.
    ///
    /// A group that is not an object, or does not fit its shape, is treated as
    /// absent instead of failing the whole analysis.
    pub fn from_canonical(value: &Value) -> Self {
        let critical = value.get("critical");
        let mut analysis = Self {
            summary: group(value.get("summary")),
            catering: group(value.get("catering")),
            dates: group(value.get("dates")),
            personnel: group(value.get("personnel")),
            critical: CriticalGroup {
                contact: group(critical.and_then(|c| c.get("contact"))),
                guarantee_ratios: group(critical.and_then(|c| c.get("guarantee_ratios"))),
                service_hours: group(critical.and_then(|c| c.get("service_hours"))),
                financial_criteria: group(critical.and_then(|c| c.get("financial_criteria"))),
                estimated_value: critical
                    .and_then(|c| c.get("estimated_value"))
                    .cloned()
                    .map(Extracted::classify)
                    .unwrap_or_default(),
            },
        };
        analysis.sync_estimated_value();
        analysis
    }

    pub fn to_canonical(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// The estimated value lives in both the summary and the critical group.
    /// Fill whichever side lacks it from the other.
    pub fn sync_estimated_value(&mut self) {
        match (
            self.summary.estimated_value.is_present(),
            self.critical.estimated_value.is_present(),
        ) {
            (true, false) => self.critical.estimated_value = self.summary.estimated_value.clone(),
            (false, true) => self.summary.estimated_value = self.critical.estimated_value.clone(),
            _ => {}
        }
    }

    /// Every leaf with its dotted path, in schema order.
    pub fn leaves(&self) -> Vec<(&'static str, &Extracted)> {
        let s = &self.summary;
        let c = &self.catering;
        let d = &self.dates;
        let p = &self.personnel;
        let k = &self.critical;
        vec![
            ("summary.title", &s.title),
            ("summary.institution", &s.institution),
            ("summary.registration_number", &s.registration_number),
            ("summary.estimated_value", &s.estimated_value),
            ("catering.total_persons", &c.total_persons),
            ("catering.daily_meals", &c.daily_meals),
            ("catering.contract_duration", &c.contract_duration),
            ("catering.meal_types", &c.meal_types),
            ("catering.per_meal_person_counts", &c.per_meal_person_counts),
            ("catering.service_days", &c.service_days),
            ("catering.kitchen_type", &c.kitchen_type),
            ("catering.service_type", &c.service_type),
            ("catering.meal_variety", &c.meal_variety),
            ("catering.cooking_location", &c.cooking_location),
            ("catering.labor_rate", &c.labor_rate),
            ("catering.delivery_hours", &c.delivery_hours),
            ("catering.quality_standards", &c.quality_standards),
            ("catering.food_safety_docs", &c.food_safety_docs),
            ("catering.distribution_points", &c.distribution_points),
            ("catering.equipment_list", &c.equipment_list),
            ("catering.material_list", &c.material_list),
            ("catering.meal_distribution", &c.meal_distribution),
            ("catering.unit_price_table", &c.unit_price_table),
            ("catering.portion_weights", &c.portion_weights),
            ("dates.start_date", &d.start_date),
            ("dates.end_date", &d.end_date),
            ("dates.tender_date", &d.tender_date),
            ("personnel.total_count", &p.total_count),
            ("personnel.positions", &p.positions),
            ("critical.contact.address", &k.contact.address),
            ("critical.contact.phone", &k.contact.phone),
            ("critical.contact.email", &k.contact.email),
            ("critical.contact.contact_person", &k.contact.contact_person),
            ("critical.guarantee_ratios.provisional", &k.guarantee_ratios.provisional),
            ("critical.guarantee_ratios.final", &k.guarantee_ratios.final_ratio),
            ("critical.service_hours.breakfast", &k.service_hours.breakfast),
            ("critical.service_hours.lunch", &k.service_hours.lunch),
            ("critical.service_hours.dinner", &k.service_hours.dinner),
            ("critical.financial_criteria.experience_ratio", &k.financial_criteria.experience_ratio),
            ("critical.financial_criteria.equity_ratio", &k.financial_criteria.equity_ratio),
            ("critical.financial_criteria.current_ratio", &k.financial_criteria.current_ratio),
            ("critical.estimated_value", &k.estimated_value),
        ]
    }

    /// Present leaves. The mirrored summary estimated value counts once.
    pub fn populated_field_count(&self) -> usize {
        let mirrored = self.critical.estimated_value.is_present();
        self.leaves()
            .iter()
            .filter(|(path, v)| v.is_present() && !(mirrored && *path == "summary.estimated_value"))
            .count()
    }

    /// Weighted share of headline fields that are present, in `[0, 1]`.
    pub fn weighted_completeness(&self) -> f64 {
        let leaves = self.leaves();
        let total: u32 = COMPLETENESS_WEIGHTS.iter().map(|(_, w)| w).sum();
        let earned: u32 = COMPLETENESS_WEIGHTS
            .iter()
            .filter(|(path, _)| {
                leaves
                    .iter()
                    .any(|(p, v)| p == path && v.is_present())
            })
            .map(|(_, w)| w)
            .sum();
        earned as f64 / total as f64
    }
}

fn group<T: DeserializeOwned + Default>(value: Option<&Value>) -> T {
    match value {
        Some(v @ Value::Object(_)) => serde_json::from_value(v.clone()).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Malformed field group ignored");
            T::default()
        }),
        _ => T::default(),
    }
}
