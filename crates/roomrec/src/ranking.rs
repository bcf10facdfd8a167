//! Deterministic keyword-driven re-ranking.
//!
//! The query text is classified into exactly one rating dimension by
//! substring match, then the candidate list is reordered by that dimension
//! with overall satisfaction as the tie-break. This layer is independent of
//! the LLM-based filter extraction so ranking stays testable offline.

use std::cmp::Ordering;

use crate::types::Candidate;

/// Rating dimension targeted by a query, in detection priority order.
/// Several keyword sets can match the same text; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankIntent {
    LowFear,
    HighFear,
    LowDifficulty,
    PuzzleHeavy,
    LowActivity,
    HighActivity,
    Story,
    Interior,
    Staging,
    Overall,
}

/// Keyword tables, tested top to bottom. Ordering is deliberate: the
/// negated forms ("안무서운", "활동적이지 않은") contain their positive
/// counterparts as substrings and must be tried first.
const INTENT_KEYWORDS: &[(RankIntent, &[&str])] = &[
    (RankIntent::LowFear, &["안무서운", "무섭지 않은", "겁쟁이", "극쫄"]),
    (RankIntent::HighFear, &["공포", "무서운", "호러", "스릴러"]),
    (RankIntent::LowDifficulty, &["쉬운", "안어려운", "입문", "초보"]),
    (RankIntent::PuzzleHeavy, &["문제방", "어려운", "문제", "숙련자"]),
    (
        RankIntent::LowActivity,
        &["활동적이지 않은", "치마", "힐", "걷는"],
    ),
    (RankIntent::HighActivity, &["활동", "동적인", "바지", "체력"]),
    (RankIntent::Story, &["스토리", "드라마", "감성", "서사"]),
    (
        RankIntent::Interior,
        &["인테리어", "리얼리티", "실제같은", "배경"],
    ),
    (RankIntent::Staging, &["연출", "장치", "화려", "스케일"]),
];

impl RankIntent {
    pub fn detect(query: &str) -> RankIntent {
        for (intent, keywords) in INTENT_KEYWORDS {
            if keywords.iter().any(|kw| query.contains(kw)) {
                return *intent;
            }
        }
        RankIntent::Overall
    }
}

/// Reorder `candidates` in place according to the intent detected in
/// `query`. Ties on the targeted dimension fall back to overall rating,
/// descending. Missing rating values are 0.0 by construction, so the sort
/// never fails on sparse records. Empty input stays empty.
pub fn rank_by_query(candidates: &mut [Candidate], query: &str) {
    if candidates.is_empty() {
        return;
    }

    let intent = RankIntent::detect(query);
    candidates.sort_by(|a, b| compare(intent, a, b));
}

fn compare(intent: RankIntent, a: &Candidate, b: &Candidate) -> Ordering {
    let (ra, rb) = (&a.ratings, &b.ratings);
    let by_overall = rb.overall.total_cmp(&ra.overall);

    match intent {
        RankIntent::LowFear => ra.fear.total_cmp(&rb.fear).then(by_overall),
        RankIntent::HighFear => rb.fear.total_cmp(&ra.fear).then(by_overall),
        RankIntent::LowDifficulty => ra.difficulty.total_cmp(&rb.difficulty).then(by_overall),
        RankIntent::PuzzleHeavy => rb
            .problem
            .total_cmp(&ra.problem)
            .then(rb.difficulty.total_cmp(&ra.difficulty))
            .then(by_overall),
        RankIntent::LowActivity => ra.activity.total_cmp(&rb.activity).then(by_overall),
        RankIntent::HighActivity => rb.activity.total_cmp(&ra.activity).then(by_overall),
        RankIntent::Story => rb.story.total_cmp(&ra.story).then(by_overall),
        RankIntent::Interior => rb.interior.total_cmp(&ra.interior).then(by_overall),
        RankIntent::Staging => rb.staging.total_cmp(&ra.staging).then(by_overall),
        RankIntent::Overall => by_overall,
    }
}
