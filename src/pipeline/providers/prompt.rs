use crate::pipeline::critical::CriticalField;
use crate::pipeline::merge::PreparedInput;

/// Character budgets of each prompt section.
const COLD_TEXT_CHARS: usize = 15_000;
const COLD_TABLE_CHARS: usize = 8_000;
const ENHANCE_TEXT_CHARS: usize = 12_000;
const ENHANCE_TABLE_CHARS: usize = 5_000;

const ROLE: &str = "You are an expert analyst of Turkish public procurement (ihale) documents for catering services.";

const CRITICAL_REMINDER: &str = "IMPORTANT: always fill these CRITICAL fields when the document states them:
- critical.contact (address, phone, email, contact_person)
- critical.guarantee_ratios (provisional, final)
- critical.service_hours (breakfast, lunch, dinner)
- critical.financial_criteria (experience_ratio, equity_ratio, current_ratio)
- critical.estimated_value";

/// Output schema shared by every analysis prompt.
pub const OUTPUT_SCHEMA: &str = r#"{
  "summary": {
    "title": "Tender title",
    "institution": "Contracting authority",
    "registration_number": "Tender registration number (İKN, e.g. 2025/123456)",
    "estimated_value": "Estimated value in TL"
  },
  "catering": {
    "total_persons": "Total persons served (number)",
    "daily_meals": "Meals per day (number)",
    "contract_duration": "Contract duration",
    "meal_types": ["breakfast", "lunch", "dinner"],
    "per_meal_person_counts": {"breakfast": 0, "lunch": 0, "dinner": 0},
    "service_days": "Service days",
    "kitchen_type": "Kitchen type",
    "service_type": "Service type",
    "meal_variety": "Dishes per meal",
    "cooking_location": "Where meals are cooked",
    "labor_rate": "Labor cost ratio",
    "delivery_hours": "Delivery hours",
    "quality_standards": ["ISO 22000"],
    "food_safety_docs": ["Required food safety documents"],
    "distribution_points": ["Distribution points"],
    "equipment_list": ["Equipment to be provided"],
    "material_list": ["Materials to be provided"],
    "meal_distribution": "Meal distribution method",
    "unit_price_table": [{"item": "Lunch", "quantity": 0, "unit": "portion"}],
    "portion_weights": [{"item": "Rice pilaf", "weight": "150", "unit": "g"}]
  },
  "dates": {
    "start_date": "DD.MM.YYYY",
    "end_date": "DD.MM.YYYY",
    "tender_date": "DD.MM.YYYY"
  },
  "personnel": {
    "total_count": "Total staff",
    "positions": [{"title": "Cook", "count": 5}]
  },
  "critical": {
    "contact": {"address": "", "phone": "", "email": "", "contact_person": ""},
    "guarantee_ratios": {"provisional": "%3", "final": "%6"},
    "service_hours": {"breakfast": "", "lunch": "", "dinner": ""},
    "financial_criteria": {"experience_ratio": "", "equity_ratio": "", "current_ratio": ""},
    "estimated_value": ""
  }
}"#;

/// First `limit` characters, never splitting a character.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Semantic pass over provider output: complete what the provider missed.
pub fn build_enhance_prompt(prepared: &PreparedInput) -> String {
    let provider_section = if prepared.has_provider_fields() {
        format!(
            "The extraction model already found these fields:\n{}\n",
            prepared.fields_text
        )
    } else {
        String::new()
    };

    format!(
        "{ROLE} An OCR/extraction service has processed the document below.\n\
         Find the information that is still missing and complete the analysis.\n\n\
         {CRITICAL_REMINDER}\n\n\
         {provider_section}\
         DOCUMENT TEXT:\n{}\n\n\
         TABLES:\n{}\n\n\
         Return JSON only, with null for anything not found, in this format:\n{OUTPUT_SCHEMA}",
        truncate_chars(&prepared.cleaned_text, ENHANCE_TEXT_CHARS),
        truncate_chars(&prepared.cleaned_table_text, ENHANCE_TABLE_CHARS),
    )
}

/// Semantic pass over plain extracted text, with no provider context.
pub fn build_cold_prompt(text: &str, table_text: &str) -> String {
    format!(
        "{ROLE} Analyze the document below.\n\n\
         {CRITICAL_REMINDER}\n\n\
         DOCUMENT TEXT:\n{}\n\n\
         TABLES:\n{}\n\n\
         Return JSON only, filling only what the document states, in this format:\n{OUTPUT_SCHEMA}",
        truncate_chars(text, COLD_TEXT_CHARS),
        truncate_chars(table_text, COLD_TABLE_CHARS),
    )
}

/// Semantic pass over the attached raw document.
pub fn build_full_document_prompt(display_name: &str) -> String {
    format!(
        "{ROLE} The attached file \"{display_name}\" could not be read by any text extractor. \
         Read it directly and analyze it.\n\n\
         {CRITICAL_REMINDER}\n\n\
         Return JSON only, filling only what the document states, in this format:\n{OUTPUT_SCHEMA}"
    )
}

/// Single-field backfill prompt.
pub fn build_field_prompt(field: CriticalField, context: &str) -> String {
    format!("{}\n\nTEXT:\n{context}", field.fallback_prompt())
}
