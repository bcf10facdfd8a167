//! Intent payload parsing.
//!
//! The LLM returns a loosely-typed JSON object; this module maps it into a
//! tagged variant per action kind, defaulting anything unrecognized or
//! malformed to a plain recommendation instead of propagating a parse
//! error. A keyword heuristic covers the case where the classification
//! call itself fails.

use regex::Regex;
use std::sync::LazyLock;

use super::ActionKind;
use crate::llm::strip_code_fences;
use crate::types::FilterCriteria;

static NOT_PLAYED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"안\s*했|취소").expect("not-played regex is valid"));
static PLAYED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"했어|했다|해봤|플레이\s*했").expect("played regex is valid"));

/// A (location, theme-name) pair mentioned for play-history bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeMention {
    pub location: Option<String>,
    pub theme: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Recommend { filters: FilterCriteria },
    AnotherRecommend { overrides: FilterCriteria },
    PlayedCheck { items: Vec<ThemeMention> },
    NotPlayedCheck { items: Vec<ThemeMention> },
    PlayedCheckInquiry,
}

impl Intent {
    pub fn action(&self) -> ActionKind {
        match self {
            Intent::Recommend { .. } => ActionKind::Recommend,
            Intent::AnotherRecommend { .. } => ActionKind::AnotherRecommend,
            Intent::PlayedCheck { .. } => ActionKind::PlayedCheck,
            Intent::NotPlayedCheck { .. } => ActionKind::NotPlayedCheck,
            Intent::PlayedCheckInquiry => ActionKind::PlayedCheckInquiry,
        }
    }
}

/// Parse a raw model response into an [`Intent`]. Code fences are stripped
/// first; malformed JSON and unknown actions fall back to a fresh
/// recommendation with empty filters.
pub fn parse_intent(raw: &str) -> Intent {
    let body = strip_code_fences(raw);
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Malformed intent payload ({}); defaulting to recommend", e);
            return Intent::Recommend {
                filters: FilterCriteria::default(),
            };
        }
    };

    let action = value
        .get("action")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("recommend");

    match action {
        "another_recommend" => Intent::AnotherRecommend {
            overrides: extract_filters(&value),
        },
        "played_check" => Intent::PlayedCheck {
            items: extract_items(&value),
        },
        "not_played_check" => Intent::NotPlayedCheck {
            items: extract_items(&value),
        },
        "played_check_inquiry" => Intent::PlayedCheckInquiry,
        _ => Intent::Recommend {
            filters: extract_filters(&value),
        },
    }
}

/// Keyword fallback used when the classification call fails outright.
/// Negated forms are checked before their positive counterparts.
pub fn classify_heuristic(query: &str) -> Intent {
    if query.contains("기록") && (query.contains("방법") || query.contains("어떻게")) {
        return Intent::PlayedCheckInquiry;
    }
    if NOT_PLAYED_RE.is_match(query) {
        return Intent::NotPlayedCheck { items: Vec::new() };
    }
    if PLAYED_RE.is_match(query) {
        return Intent::PlayedCheck { items: Vec::new() };
    }
    if query.contains("다른") || query.contains("말고") {
        return Intent::AnotherRecommend {
            overrides: FilterCriteria::default(),
        };
    }
    Intent::Recommend {
        filters: FilterCriteria::default(),
    }
}

fn extract_filters(value: &serde_json::Value) -> FilterCriteria {
    FilterCriteria {
        locations: extract_string_or_list(value, "locations", "location"),
        keywords: extract_string_list(value.get("keywords")),
        min_rating: extract_number(value.get("min_rating")).map(|n| n as f32),
        party_size: extract_number(value.get("party_size")).map(|n| n.round() as u32),
        mentioned_users: extract_string_list(value.get("mentioned_users")),
    }
}

fn extract_items(value: &serde_json::Value) -> Vec<ThemeMention> {
    let mut items = Vec::new();
    if let Some(raw_items) = value.get("items").and_then(serde_json::Value::as_array) {
        for raw in raw_items {
            let theme = raw
                .get("theme")
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if theme.is_empty() {
                continue;
            }
            items.push(ThemeMention {
                location: nonempty_string(raw.get("location")),
                theme: theme.to_string(),
            });
        }
    }

    // A bare theme/location pair folds into a single-item list.
    if items.is_empty() {
        if let Some(theme) = nonempty_string(value.get("theme")) {
            items.push(ThemeMention {
                location: nonempty_string(value.get("location")),
                theme,
            });
        }
    }

    items
}

/// A field the model emits sometimes as a string, sometimes as a list.
fn extract_string_or_list(
    value: &serde_json::Value,
    list_key: &str,
    scalar_key: &str,
) -> Vec<String> {
    let from_list = extract_string_list(value.get(list_key));
    if !from_list.is_empty() {
        return from_list;
    }
    match value.get(scalar_key) {
        Some(serde_json::Value::Array(_)) => extract_string_list(value.get(scalar_key)),
        other => nonempty_string(other).into_iter().collect(),
    }
}

fn extract_string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| nonempty_string(Some(v)))
                .collect()
        })
        .unwrap_or_default()
}

fn extract_number(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn nonempty_string(value: Option<&serde_json::Value>) -> Option<String> {
    let s = value?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommend_payload_with_fenced_json() {
        let raw = "```json\n{\"action\": \"recommend\", \"locations\": [\"강남\"], \"keywords\": [\"공포\"]}\n```";
        let Intent::Recommend { filters } = parse_intent(raw) else {
            panic!("expected recommend");
        };
        assert_eq!(filters.locations, vec!["강남".to_string()]);
        assert_eq!(filters.keywords, vec!["공포".to_string()]);
    }

    #[test]
    fn scalar_location_is_accepted() {
        let raw = "{\"action\": \"recommend\", \"location\": \"홍대\"}";
        let Intent::Recommend { filters } = parse_intent(raw) else {
            panic!("expected recommend");
        };
        assert_eq!(filters.locations, vec!["홍대".to_string()]);
    }

    #[test]
    fn numeric_fields_tolerate_strings() {
        let raw = "{\"action\": \"recommend\", \"min_rating\": \"4.5\", \"party_size\": 4}";
        let Intent::Recommend { filters } = parse_intent(raw) else {
            panic!("expected recommend");
        };
        assert_eq!(filters.min_rating, Some(4.5));
        assert_eq!(filters.party_size, Some(4));
    }

    #[test]
    fn malformed_payload_defaults_to_recommend() {
        let intent = parse_intent("not json at all");
        assert_eq!(
            intent,
            Intent::Recommend {
                filters: FilterCriteria::default()
            }
        );
    }

    #[test]
    fn unknown_action_defaults_to_recommend() {
        let intent = parse_intent("{\"action\": \"dance\"}");
        assert_eq!(intent.action(), ActionKind::Recommend);
    }

    #[test]
    fn played_check_items_are_extracted() {
        let raw = "{\"action\": \"played_check\", \"items\": [\
                   {\"location\": \"강남\", \"theme\": \"링\"}, \
                   {\"location\": null, \"theme\": \"머니머니\"}]}";
        let Intent::PlayedCheck { items } = parse_intent(raw) else {
            panic!("expected played_check");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].location.as_deref(), Some("강남"));
        assert_eq!(items[0].theme, "링");
        assert_eq!(items[1].location, None);
    }

    #[test]
    fn bare_theme_folds_into_items() {
        let raw = "{\"action\": \"not_played_check\", \"location\": \"강남\", \"theme\": \"링\"}";
        let Intent::NotPlayedCheck { items } = parse_intent(raw) else {
            panic!("expected not_played_check");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].theme, "링");
    }

    #[test]
    fn heuristic_orders_negation_before_played() {
        assert_eq!(
            classify_heuristic("링 안했어").action(),
            ActionKind::NotPlayedCheck
        );
        assert_eq!(
            classify_heuristic("강남 링 했어").action(),
            ActionKind::PlayedCheck
        );
        assert_eq!(
            classify_heuristic("다른거 추천해줘").action(),
            ActionKind::AnotherRecommend
        );
        assert_eq!(
            classify_heuristic("기록은 어떻게 해?").action(),
            ActionKind::PlayedCheckInquiry
        );
        assert_eq!(
            classify_heuristic("재밌는거 추천").action(),
            ActionKind::Recommend
        );
    }
}
