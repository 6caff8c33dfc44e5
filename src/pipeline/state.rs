//! OCR-branch provider selection as an explicit state machine.
//!
//! `transition` is pure: the orchestrator executes the state it is in, then
//! asks where to go next.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::providers::ProviderName;

/// Caller override of provider selection. Applies to the OCR branch only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFilter {
    #[default]
    Auto,
    Custom,
    Layout,
    Semantic,
}

impl ProviderFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Custom => "custom",
            Self::Layout => "layout",
            Self::Semantic => "semantic",
        }
    }

    pub fn allows_custom(&self) -> bool {
        matches!(self, Self::Auto | Self::Custom)
    }

    pub fn allows_layout(&self) -> bool {
        matches!(self, Self::Auto | Self::Layout)
    }

    /// Whether the semantic provider may run without any provider context.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::Auto | Self::Semantic)
    }
}

impl FromStr for ProviderFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "custom" => Ok(Self::Custom),
            "layout" => Ok(Self::Layout),
            "semantic" | "claude" => Ok(Self::Semantic),
            other => Err(format!(
                "unknown provider '{other}' (expected auto, custom, layout or semantic)"
            )),
        }
    }
}

impl fmt::Display for ProviderFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrState {
    Start,
    TryCustom,
    TryLayout,
    EnhanceOrFallback,
    Done,
}

/// Facts the transition function needs, gathered by the orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionInput {
    /// Filter and configuration permit the custom model.
    pub custom_allowed: bool,
    /// Filter and configuration permit layout extraction.
    pub layout_allowed: bool,
    /// Some OCR provider has succeeded so far.
    pub succeeded: bool,
}

pub fn transition(state: OcrState, input: &TransitionInput) -> OcrState {
    match state {
        OcrState::Start if input.custom_allowed => OcrState::TryCustom,
        OcrState::Start | OcrState::TryCustom if !input.succeeded && input.layout_allowed => {
            OcrState::TryLayout
        }
        OcrState::Start | OcrState::TryCustom | OcrState::TryLayout => OcrState::EnhanceOrFallback,
        OcrState::EnhanceOrFallback | OcrState::Done => OcrState::Done,
    }
}

/// What `EnhanceOrFallback` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalAction {
    /// Complete the successful provider result.
    Enhance,
    /// Semantic provider alone, reading the raw document.
    Cold,
    NoResult,
}

pub fn resolve_final_action(succeeded: bool, filter: ProviderFilter) -> FinalAction {
    if succeeded {
        FinalAction::Enhance
    } else if filter.allows_fallback() {
        FinalAction::Cold
    } else {
        FinalAction::NoResult
    }
}

/// Which provider chain produced the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderUsed {
    CustomSemantic,
    LayoutSemantic,
    /// Custom model result, semantic enhancement unavailable.
    Custom,
    /// Layout result, semantic enhancement unavailable.
    Layout,
    LocalSemantic,
    SemanticFallback,
}

impl ProviderUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomSemantic => "custom+semantic",
            Self::LayoutSemantic => "layout+semantic",
            Self::Custom => "custom",
            Self::Layout => "layout",
            Self::LocalSemantic => "local+semantic",
            Self::SemanticFallback => "semantic-fallback",
        }
    }

    /// Label for an OCR provider result, with or without semantic enhancement.
    pub fn for_provider(provider: ProviderName, enhanced: bool) -> Self {
        match (provider, enhanced) {
            (ProviderName::Custom, true) => Self::CustomSemantic,
            (ProviderName::Custom, false) => Self::Custom,
            (_, true) => Self::LayoutSemantic,
            (_, false) => Self::Layout,
        }
    }
}

impl fmt::Display for ProviderUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProviderUsed {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(custom: bool, layout: bool, succeeded: bool) -> TransitionInput {
        TransitionInput {
            custom_allowed: custom,
            layout_allowed: layout,
            succeeded,
        }
    }

    /// Walk the machine assuming each attempted provider fails.
    fn walk(custom: bool, layout: bool) -> Vec<OcrState> {
        let mut states = vec![OcrState::Start];
        let mut state = OcrState::Start;
        while state != OcrState::Done {
            state = transition(state, &input(custom, layout, false));
            states.push(state);
        }
        states
    }

    #[test]
    fn everything_allowed_tries_custom_then_layout() {
        assert_eq!(
            walk(true, true),
            [
                OcrState::Start,
                OcrState::TryCustom,
                OcrState::TryLayout,
                OcrState::EnhanceOrFallback,
                OcrState::Done
            ]
        );
    }

    #[test]
    fn disabled_custom_is_skipped_not_failed() {
        assert_eq!(
            transition(OcrState::Start, &input(false, true, false)),
            OcrState::TryLayout
        );
    }

    #[test]
    fn nothing_configured_degrades_to_fallback() {
        assert_eq!(
            walk(false, false),
            [OcrState::Start, OcrState::EnhanceOrFallback, OcrState::Done]
        );
    }

    #[test]
    fn custom_success_skips_layout() {
        assert_eq!(
            transition(OcrState::TryCustom, &input(true, true, true)),
            OcrState::EnhanceOrFallback
        );
    }

    #[test]
    fn final_action_by_filter() {
        assert_eq!(resolve_final_action(true, ProviderFilter::Layout), FinalAction::Enhance);
        assert_eq!(resolve_final_action(false, ProviderFilter::Auto), FinalAction::Cold);
        assert_eq!(resolve_final_action(false, ProviderFilter::Semantic), FinalAction::Cold);
        assert_eq!(resolve_final_action(false, ProviderFilter::Custom), FinalAction::NoResult);
        assert_eq!(resolve_final_action(false, ProviderFilter::Layout), FinalAction::NoResult);
    }

    #[test]
    fn filter_parsing() {
        assert_eq!("AUTO".parse::<ProviderFilter>(), Ok(ProviderFilter::Auto));
        assert_eq!("semantic".parse::<ProviderFilter>(), Ok(ProviderFilter::Semantic));
        assert!("azure".parse::<ProviderFilter>().is_err());
    }

    #[test]
    fn provider_used_labels() {
        assert_eq!(
            ProviderUsed::for_provider(ProviderName::Custom, true).as_str(),
            "custom+semantic"
        );
        assert_eq!(ProviderUsed::for_provider(ProviderName::Layout, false).as_str(), "layout");
        assert_eq!(
            serde_json::to_value(ProviderUsed::SemanticFallback).unwrap(),
            "semantic-fallback"
        );
    }
}
