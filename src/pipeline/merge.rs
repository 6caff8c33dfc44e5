//! Provider output preparation and result merging.
//!
//! `prepare` turns one OCR/custom-model result into prompt-ready text with
//! low-confidence fields removed. `merge` folds a provider result and the
//! semantic answer into one canonical [`MergedAnalysis`].

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::CONFIDENCE_THRESHOLD;
use crate::pipeline::analysis::{has_content, is_blank, MergedAnalysis};
use crate::pipeline::cleaner::clean_ocr_text;
use crate::pipeline::providers::{Paragraph, ProviderField, ProviderResult, Table};

/// Only the first tables and rows are surfaced to the language model.
const MAX_TABLES: usize = 20;
const MAX_TABLE_ROWS: usize = 15;

static FIRST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// A provider field withheld for low confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedField {
    pub field: String,
    /// Rounded to two decimals.
    pub confidence: f64,
}

/// Provider output ready to be sent as semantic-analysis context.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreparedInput {
    pub cleaned_text: String,
    pub cleaned_table_text: String,
    pub fields_text: String,
    pub filtered_fields: BTreeMap<String, Value>,
    pub dropped: Vec<DroppedField>,
}

impl PreparedInput {
    pub fn has_provider_fields(&self) -> bool {
        !self.filtered_fields.is_empty()
    }
}

pub fn prepare(result: &ProviderResult) -> PreparedInput {
    let text = if result.paragraphs.is_empty() {
        result.text.clone()
    } else {
        paragraphs_text(&result.paragraphs)
    };

    let (filtered_fields, dropped) = filter_by_confidence(&result.fields);
    if !dropped.is_empty() {
        tracing::info!(
            provider = result.provider.as_str(),
            dropped = dropped.len(),
            kept = filtered_fields.len(),
            "Low-confidence fields withheld from semantic context"
        );
    }

    let fields_text = filtered_fields
        .iter()
        .map(|(key, value)| format!("{key}: {}\n", value_text(value)))
        .collect();

    PreparedInput {
        cleaned_text: clean_ocr_text(&text),
        cleaned_table_text: clean_ocr_text(&rebuild_tables(&result.tables)),
        fields_text,
        filtered_fields,
        dropped,
    }
}

/// Split fields at the confidence threshold (inclusive). Empty values are
/// skipped without being recorded.
pub fn filter_by_confidence(
    fields: &BTreeMap<String, ProviderField>,
) -> (BTreeMap<String, Value>, Vec<DroppedField>) {
    let mut kept = BTreeMap::new();
    let mut dropped = Vec::new();

    for (name, field) in fields {
        if is_blank(&field.value) {
            continue;
        }
        if field.confidence >= CONFIDENCE_THRESHOLD {
            kept.insert(name.clone(), field.value.clone());
        } else {
            dropped.push(DroppedField {
                field: name.clone(),
                confidence: (f64::from(field.confidence) * 100.0).round() / 100.0,
            });
        }
    }
    (kept, dropped)
}

/// Markdown-like text from layout paragraphs, keeping headings.
pub fn paragraphs_text(paragraphs: &[Paragraph]) -> String {
    let mut text = String::new();
    for para in paragraphs {
        match para.role.as_deref() {
            Some("title") => text.push_str(&format!("\n# {}\n", para.content)),
            Some("sectionHeading") => text.push_str(&format!("\n## {}\n", para.content)),
            _ => {
                text.push_str(&para.content);
                text.push('\n');
            }
        }
    }
    text
}

/// Reassemble cell-addressed tables into row-ordered pipe grids.
///
/// Rows are sorted by index; each row is as wide as its highest column index
/// plus one, and gaps become empty cells.
pub fn rebuild_tables(tables: &[Table]) -> String {
    let mut out = String::new();
    for (i, table) in tables.iter().take(MAX_TABLES).enumerate() {
        out.push_str(&format!("\n--- TABLE {} ---\n", i + 1));

        let mut rows: BTreeMap<usize, BTreeMap<usize, String>> = BTreeMap::new();
        for cell in &table.cells {
            rows.entry(cell.row_index)
                .or_default()
                .insert(cell.column_index, cell.content.replace('\n', " "));
        }

        for columns in rows.values().take(MAX_TABLE_ROWS) {
            let width = columns.keys().next_back().map_or(0, |last| last + 1);
            let cells: Vec<&str> = (0..width)
                .map(|c| columns.get(&c).map(String::as_str).unwrap_or(""))
                .collect();
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }
    }
    out
}

/// What a provider table lists, judged by its words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Menu,
    PortionWeights,
    Personnel,
    Unknown,
}

const MENU_WORDS: &[&str] = &["menü", "kahvaltı", "öğle", "yemek"];
const WEIGHT_WORDS: &[&str] = &["gram", "porsiyon", "miktar", "ağırlık"];
const PERSONNEL_WORDS: &[&str] = &["personel", "aşçı", "görevli", "çalışan"];

/// Classify a table from all of its cell text. Menu words win over weight
/// words, which win over personnel words.
pub fn detect_table_type(table: &Table) -> TableKind {
    let text = table
        .cells
        .iter()
        .map(|c| c.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if mentions(MENU_WORDS) {
        TableKind::Menu
    } else if mentions(WEIGHT_WORDS) {
        TableKind::PortionWeights
    } else if mentions(PERSONNEL_WORDS) {
        TableKind::Personnel
    } else {
        TableKind::Unknown
    }
}

/// `(name, first number of column 1)` for every body row of the tables of
/// `kind`. The first row is taken as the header.
fn labelled_numbers(tables: &[Table], kind: TableKind) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for table in tables.iter().filter(|t| detect_table_type(t) == kind) {
        let mut rows: BTreeMap<usize, BTreeMap<usize, &str>> = BTreeMap::new();
        for cell in &table.cells {
            rows.entry(cell.row_index)
                .or_default()
                .insert(cell.column_index, cell.content.as_str());
        }

        for columns in rows.values().skip(1) {
            let name = columns.get(&0).map_or("", |c| c.trim());
            let number = columns
                .get(&1)
                .and_then(|c| FIRST_NUMBER.find(c))
                .map(|m| m.as_str().to_string());
            if let Some(number) = number.filter(|_| !name.is_empty()) {
                out.push((name.to_string(), number));
            }
        }
    }
    out
}

/// Staff positions from personnel tables, `[{title, count}]`.
pub fn personnel_rows(tables: &[Table]) -> Vec<Value> {
    labelled_numbers(tables, TableKind::Personnel)
        .into_iter()
        .filter_map(|(title, count)| {
            let count: u64 = count.parse().ok()?;
            Some(json!({ "title": title, "count": count }))
        })
        .collect()
}

/// Portion weights from gramaj tables, `[{item, weight, unit}]` in grams.
pub fn portion_weight_rows(tables: &[Table]) -> Vec<Value> {
    labelled_numbers(tables, TableKind::PortionWeights)
        .into_iter()
        .map(|(item, weight)| json!({ "item": item, "weight": weight, "unit": "g" }))
        .collect()
}

/// Fill list fields the provider's named fields left empty from its tables.
fn fill_from_tables(canonical: &mut Value, tables: &[Table]) {
    let derived: [(&str, fn(&[Table]) -> Vec<Value>); 2] = [
        ("personnel.positions", personnel_rows),
        ("catering.portion_weights", portion_weight_rows),
    ];
    for (path, rows) in derived {
        if !is_blank(get_path(canonical, path)) {
            continue;
        }
        let rows = rows(tables);
        if !rows.is_empty() {
            tracing::debug!(path, rows = rows.len(), "Field filled from provider tables");
            set_path(canonical, path, Value::Array(rows));
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Canonicalization
// ═══════════════════════════════════════════════════════════════════════════

/// Provider field names (custom-model Turkish names, English names, prebuilt
/// model names) per canonical path. The first non-empty alias wins.
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("summary.title", &["ihale_baslik", "ihale_konusu", "title"]),
    (
        "summary.institution",
        &["kurum_adi", "idare", "idare_adi", "institution", "VendorName", "CustomerName"],
    ),
    (
        "summary.registration_number",
        &["ihale_kayit_no", "ikn", "ihale_kayit_numarasi", "registration_number"],
    ),
    (
        "critical.estimated_value",
        &["tahmini_bedel", "yaklasik_maliyet", "estimated_value", "InvoiceTotal", "toplam_tutar"],
    ),
    ("dates.start_date", &["baslangic_tarihi", "is_baslangic", "start_date"]),
    ("dates.end_date", &["bitis_tarihi", "is_bitis", "end_date"]),
    ("dates.tender_date", &["ihale_tarihi", "tender_date"]),
    ("catering.total_persons", &["kisi_sayisi", "toplam_kisi", "total_persons"]),
    ("catering.daily_meals", &["gunluk_ogun", "ogun_sayisi", "daily_meals"]),
    ("catering.contract_duration", &["sozlesme_suresi", "sure", "contract_duration"]),
    ("catering.meal_types", &["ogun_turleri", "meal_types"]),
    ("catering.per_meal_person_counts", &["ogun_bazli_kisi", "per_meal_person_counts"]),
    ("catering.service_days", &["servis_gunleri", "hizmet_gunleri", "service_days"]),
    ("catering.kitchen_type", &["mutfak_tipi", "kitchen_type"]),
    ("catering.service_type", &["servis_tipi", "hizmet_tipi", "service_type"]),
    ("catering.meal_variety", &["yemek_cesidi", "cesit_sayisi", "meal_variety"]),
    ("catering.cooking_location", &["pisirme_yeri", "cooking_location"]),
    ("catering.labor_rate", &["iscilik_orani", "labor_rate"]),
    ("catering.delivery_hours", &["teslim_saatleri", "dagitim_saatleri", "delivery_hours"]),
    ("catering.quality_standards", &["kalite_standartlari", "quality_standards"]),
    ("catering.food_safety_docs", &["gida_guvenligi_belgeleri", "food_safety_docs"]),
    ("catering.distribution_points", &["dagitim_noktalari", "distribution_points"]),
    ("catering.equipment_list", &["ekipman_listesi", "equipment_list"]),
    ("catering.material_list", &["malzeme_listesi", "material_list"]),
    ("catering.meal_distribution", &["ogun_dagilimi", "meal_distribution"]),
    ("catering.unit_price_table", &["birim_fiyat_cetveli", "unit_price_table"]),
    ("catering.portion_weights", &["gramaj_listesi", "gramaj", "portion_weights"]),
    ("personnel.total_count", &["personel_sayisi", "toplam_personel", "total_count"]),
    ("personnel.positions", &["personel_listesi", "personel", "positions"]),
    (
        "critical.contact.address",
        &["adres", "idare_adres", "address", "VendorAddress", "VendorAddressRecipient"],
    ),
    ("critical.contact.phone", &["telefon", "idare_telefon", "phone"]),
    ("critical.contact.email", &["email", "idare_email"]),
    ("critical.contact.contact_person", &["yetkili", "yetkili_kisi", "contact_person"]),
    (
        "critical.guarantee_ratios.provisional",
        &["gecici_teminat", "gecici_teminat_orani", "provisional_guarantee"],
    ),
    (
        "critical.guarantee_ratios.final",
        &["kesin_teminat", "kesin_teminat_orani", "final_guarantee"],
    ),
    ("critical.service_hours.breakfast", &["kahvalti_saati", "breakfast_time"]),
    ("critical.service_hours.lunch", &["ogle_saati", "lunch_time"]),
    ("critical.service_hours.dinner", &["aksam_saati", "dinner_time"]),
    (
        "critical.financial_criteria.experience_ratio",
        &["is_deneyimi", "is_deneyim_orani", "experience_ratio"],
    ),
    ("critical.financial_criteria.equity_ratio", &["ozkaynak_orani", "equity_ratio"]),
    ("critical.financial_criteria.current_ratio", &["cari_oran", "current_ratio"]),
];

/// Critical group names as they appear in either language.
const CRITICAL_GROUP_ALIASES: &[(&str, &str)] = &[
    ("contact", "contact"),
    ("iletisim", "contact"),
    ("guarantee_ratios", "guarantee_ratios"),
    ("teminat_oranlari", "guarantee_ratios"),
    ("service_hours", "service_hours"),
    ("servis_saatleri", "service_hours"),
    ("financial_criteria", "financial_criteria"),
    ("mali_kriterler", "financial_criteria"),
    ("estimated_value", "estimated_value"),
    ("tahmini_bedel", "estimated_value"),
];

/// Sub-key renames inside critical groups.
const CRITICAL_SUBKEY_ALIASES: &[(&str, &str, &str)] = &[
    ("contact", "adres", "address"),
    ("contact", "telefon", "phone"),
    ("contact", "eposta", "email"),
    ("contact", "yetkili", "contact_person"),
    ("guarantee_ratios", "gecici", "provisional"),
    ("guarantee_ratios", "kesin", "final"),
    ("service_hours", "kahvalti", "breakfast"),
    ("service_hours", "ogle", "lunch"),
    ("service_hours", "aksam", "dinner"),
    ("financial_criteria", "is_deneyimi", "experience_ratio"),
    ("financial_criteria", "ozkaynak_orani", "equity_ratio"),
    ("financial_criteria", "cari_oran", "current_ratio"),
];

fn critical_group_name(key: &str) -> Option<&'static str> {
    CRITICAL_GROUP_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| *canonical)
}

/// Map flat provider fields onto canonical paths.
pub fn canonicalize_provider_fields(fields: &BTreeMap<String, Value>) -> Value {
    let mut canonical = json!({});

    // Grouped critical objects (`iletisim: {adres, telefon}`) first
    let mut critical = Map::new();
    for (key, value) in fields {
        if let (Some(group), Value::Object(_)) = (critical_group_name(key), value) {
            critical.insert(group.to_string(), value.clone());
        }
    }
    if !critical.is_empty() {
        let mut grouped = json!({ "critical": normalize_critical(critical) });
        deep_merge(&mut canonical, &mut grouped);
    }

    for (path, aliases) in FIELD_ALIASES {
        let found = aliases
            .iter()
            .filter_map(|alias| fields.get(*alias))
            .find(|value| has_content(value));
        if let Some(value) = found {
            if is_blank(get_path(&canonical, path)) {
                set_path(&mut canonical, path, value.clone());
            }
        }
    }
    canonical
}

/// Bring a semantic answer into canonical shape: critical groups found at the
/// top level or under Turkish names move under `critical`.
pub fn canonicalize_semantic(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return json!({});
    };

    let mut out = Map::new();
    let mut critical = obj
        .get("critical")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (key, v) in obj {
        if key == "critical" {
            continue;
        }
        match critical_group_name(key) {
            Some(group) => {
                critical.entry(group.to_string()).or_insert_with(|| v.clone());
            }
            None => {
                out.insert(key.clone(), v.clone());
            }
        }
    }

    if let Some(Value::Object(summary)) = out.get_mut("summary") {
        if let Some(ikn) = summary.remove("ikn") {
            summary.entry("registration_number").or_insert(ikn);
        }
    }

    out.insert("critical".into(), normalize_critical(critical));
    Value::Object(out)
}

fn normalize_critical(groups: Map<String, Value>) -> Value {
    let mut out = Map::new();
    for (key, value) in groups {
        let group = critical_group_name(&key).unwrap_or(key.as_str()).to_string();
        let value = match value {
            Value::Object(fields) => {
                let renamed: Map<String, Value> = fields
                    .into_iter()
                    .map(|(sub, v)| {
                        let name = CRITICAL_SUBKEY_ALIASES
                            .iter()
                            .find(|(g, alias, _)| *g == group && *alias == sub)
                            .map(|(_, _, canonical)| canonical.to_string())
                            .unwrap_or(sub);
                        (name, v)
                    })
                    .collect();
                Value::Object(renamed)
            }
            other => other,
        };
        out.entry(group).or_insert(value);
    }
    Value::Object(out)
}

/// Overlay `incoming` onto `base`. Objects merge key by key; a leaf from
/// `incoming` wins when it has content, or when `base` has nothing at all.
pub fn deep_merge(base: &mut Value, incoming: &mut Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map.iter_mut() {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.take());
                    }
                }
            }
        }
        (base, incoming) => {
            if has_content(incoming) || (is_blank(base) && !is_blank(incoming)) {
                *base = incoming.take();
            }
        }
    }
}

fn get_path<'a>(value: &'a Value, path: &str) -> &'a Value {
    path.split('.').fold(value, |v, key| v.get(key).unwrap_or(&Value::Null))
}

fn set_path(root: &mut Value, path: &str, leaf: Value) {
    let mut node = root;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        if !node.is_object() {
            *node = json!({});
        }
        let Value::Object(map) = node else {
            return;
        };
        if keys.peek().is_none() {
            map.insert(key.to_string(), leaf);
            return;
        }
        node = map.entry(key.to_string()).or_insert_with(|| json!({}));
    }
}

/// Merge a provider result with the semantic answer.
///
/// Semantic leaves with content take precedence; provider-only leaves survive.
/// Staff positions and portion weights missing from the provider fields are
/// read from its tables. A provider result without its success flag
/// contributes nothing.
pub fn merge(provider: Option<&ProviderResult>, semantic: Option<&Value>) -> MergedAnalysis {
    let mut canonical = match provider.filter(|p| p.success) {
        Some(result) => {
            let fields: BTreeMap<String, Value> = result
                .fields
                .iter()
                .map(|(k, f)| (k.clone(), f.value.clone()))
                .collect();
            let mut canonical = canonicalize_provider_fields(&fields);
            fill_from_tables(&mut canonical, &result.tables);
            canonical
        }
        None => json!({}),
    };

    if let Some(semantic) = semantic {
        let mut answer = canonicalize_semantic(semantic);
        deep_merge(&mut canonical, &mut answer);
    }

    MergedAnalysis::from_canonical(&canonical)
}
