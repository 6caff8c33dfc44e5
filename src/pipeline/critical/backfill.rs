use std::collections::HashSet;

use serde::Serialize;

use super::validator::MissingField;
use super::CriticalField;
use crate::config::TRUNCATION_HEAD_SHARE;
use crate::pipeline::analysis::{has_content, MergedAnalysis};
use crate::pipeline::breaker::ExternalBreaker;
use crate::pipeline::monitor::{ApiCallKind, RunMonitor};
use crate::pipeline::providers::SemanticAnalysisAdapter;

/// Outcome of one backfill loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    /// Fields a call was issued for, in order.
    pub attempted: Vec<CriticalField>,
    /// Fields whose answer carried real content.
    pub filled: Vec<CriticalField>,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

/// Cut `text` to at most `limit` characters, keeping the head and the tail
/// around a marker naming how many characters were dropped.
pub fn truncate_head_tail(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }

    // Sized for the worst case; the real count never has more digits.
    let marker_len = drop_marker(total).chars().count();
    if limit <= marker_len {
        return text.chars().take(limit).collect();
    }

    let keep = limit - marker_len;
    let head = (keep as f64 * TRUNCATION_HEAD_SHARE).round() as usize;
    let tail = keep - head;
    let dropped = total - keep;

    let head_end = byte_offset(text, head);
    let tail_start = byte_offset(text, total - tail);

    let mut out = String::with_capacity(head_end + marker_len + (text.len() - tail_start));
    out.push_str(&text[..head_end]);
    out.push_str(&drop_marker(dropped));
    out.push_str(&text[tail_start..]);
    out
}

fn drop_marker(dropped: usize) -> String {
    format!("\n\n[... {dropped} characters dropped ...]\n\n")
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Re-query each missing field once with its fallback prompt.
///
/// The loop stops for good when the external breaker refuses a call or a call
/// fails with a fatal service fault. Other failures skip that field only.
pub fn backfill_missing(
    analysis: &mut MergedAnalysis,
    missing: &[MissingField],
    context: &str,
    adapter: &SemanticAnalysisAdapter,
    breaker: &ExternalBreaker,
    monitor: &mut RunMonitor,
) -> BackfillReport {
    let mut report = BackfillReport::default();
    let mut seen = HashSet::new();

    for entry in missing {
        let field = entry.field;
        if !seen.insert(field) {
            continue;
        }

        let decision = breaker.check();
        if !decision.allowed {
            tracing::warn!(
                field = field.key(),
                reason = decision.reason.as_deref().unwrap_or(""),
                "Backfill aborted: external calls refused"
            );
            report.aborted = true;
            report.abort_reason = decision.reason;
            break;
        }

        report.attempted.push(field);
        match adapter.extract_field(field, context) {
            Ok(answer) => {
                monitor.record_api_call(ApiCallKind::Semantic, Some(answer.usage));
                if has_content(&answer.value) && field.apply(analysis, &answer.value) {
                    tracing::info!(field = field.key(), "Backfill filled critical field");
                    report.filled.push(field);
                } else {
                    tracing::info!(field = field.key(), "Backfill found no value");
                }
            }
            Err(e) => {
                monitor.record_api_call(ApiCallKind::Semantic, None);
                monitor.record_error("backfill", &e);
                if breaker.report(&e) {
                    tracing::error!(field = field.key(), error = %e, "Backfill aborted: fatal service fault");
                    report.aborted = true;
                    report.abort_reason = Some(e.to_string());
                    break;
                }
                tracing::warn!(field = field.key(), error = %e, "Backfill call failed, continuing");
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::critical::validate;
    use crate::pipeline::providers::mock::MockSemanticProvider;

    const FATAL: &str = "Your credit balance is too low to access the API";

    fn adapter(mock: &MockSemanticProvider) -> SemanticAnalysisAdapter {
        SemanticAnalysisAdapter::new(Box::new(mock.clone()), Duration::ZERO)
    }

    fn announcement_gaps() -> (MergedAnalysis, Vec<MissingField>) {
        let analysis = MergedAnalysis::default();
        let validation = validate(&analysis, Some("ilan"));
        assert_eq!(validation.missing.len(), 2);
        (analysis, validation.missing)
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_head_tail("kısa metin", 100), "kısa metin");
    }

    #[test]
    fn long_text_keeps_head_tail_and_marker() {
        let text = format!("BAŞ{}SON", "x".repeat(499_995));
        assert_eq!(text.chars().count(), 500_001);

        let out = truncate_head_tail(&text, 500_000);
        assert!(out.chars().count() <= 500_000);
        assert!(out.starts_with("BAŞ"));
        assert!(out.ends_with("SON"));
        assert!(out.contains("characters dropped"));
    }

    #[test]
    fn head_gets_the_larger_share() {
        let text: String = ('a'..='z').cycle().take(10_000).collect();
        let out = truncate_head_tail(&text, 1_000);
        let (head, tail) = out.split_once("\n\n[...").unwrap();
        let tail = tail.split_once("...]\n\n").unwrap().1;
        assert!(head.len() > tail.len());
        assert!(out.chars().count() <= 1_000);
    }

    #[test]
    fn fills_first_then_aborts_on_fatal() {
        let (mut analysis, missing) = announcement_gaps();
        let mock = MockSemanticProvider::new()
            .reply(r#"{"contact": {"phone": "0312 555 00 00", "address": "Ankara"}}"#)
            .fail(400, FATAL);
        let breaker = ExternalBreaker::new();
        let mut monitor = RunMonitor::new("run");

        let report = backfill_missing(
            &mut analysis,
            &missing,
            "metin",
            &adapter(&mock),
            &breaker,
            &mut monitor,
        );

        assert_eq!(report.filled, [CriticalField::Contact]);
        assert!(report.aborted);
        assert!(breaker.is_tripped());
        assert_eq!(mock.calls(), 2);
        assert_eq!(validate(&analysis, Some("ilan")).missing.len(), 1);
        assert_eq!(monitor.metrics().api_calls.semantic, 2);
    }

    #[test]
    fn open_breaker_prevents_every_call() {
        let (mut analysis, missing) = announcement_gaps();
        let mock = MockSemanticProvider::new().otherwise("{}");
        let breaker = ExternalBreaker::new();
        breaker.report(&FATAL);
        let mut monitor = RunMonitor::new("run");

        let report = backfill_missing(
            &mut analysis,
            &missing,
            "metin",
            &adapter(&mock),
            &breaker,
            &mut monitor,
        );

        assert!(report.aborted);
        assert!(report.attempted.is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn non_fatal_failure_moves_on() {
        let (mut analysis, missing) = announcement_gaps();
        let mock = MockSemanticProvider::new()
            .fail(500, "internal error")
            .reply(r#"{"estimated_value": "4.500.000 TL"}"#);
        let breaker = ExternalBreaker::new();
        let mut monitor = RunMonitor::new("run");

        let report = backfill_missing(
            &mut analysis,
            &missing,
            "metin",
            &adapter(&mock),
            &breaker,
            &mut monitor,
        );

        assert!(!report.aborted);
        assert_eq!(report.attempted.len(), 2);
        assert_eq!(report.filled, [CriticalField::EstimatedValue]);
        assert!(!breaker.is_tripped());
    }

    #[test]
    fn placeholder_answer_is_not_accepted() {
        let (mut analysis, missing) = announcement_gaps();
        let mock = MockSemanticProvider::new()
            .reply(r#"{"contact": {"phone": "belirtilmemiş"}}"#)
            .reply(r#"{"estimated_value": "unspecified"}"#);
        let breaker = ExternalBreaker::new();
        let mut monitor = RunMonitor::new("run");

        let report = backfill_missing(
            &mut analysis,
            &missing,
            "metin",
            &adapter(&mock),
            &breaker,
            &mut monitor,
        );

        assert!(report.filled.is_empty());
        assert_eq!(validate(&analysis, Some("ilan")).missing.len(), 2);
    }

    #[test]
    fn duplicate_entries_are_queried_once() {
        let (mut analysis, mut missing) = announcement_gaps();
        missing.push(missing[0].clone());
        let mock = MockSemanticProvider::new().otherwise("{}");
        let breaker = ExternalBreaker::new();
        let mut monitor = RunMonitor::new("run");

        let report = backfill_missing(
            &mut analysis,
            &missing,
            "metin",
            &adapter(&mock),
            &breaker,
            &mut monitor,
        );

        assert_eq!(report.attempted.len(), 2);
        assert_eq!(mock.calls(), 2);
    }
}
