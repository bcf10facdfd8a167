//! Per-turn orchestration: intent classification, play-history management,
//! the three-bucket recommendation flow, and reply composition.

use std::collections::HashSet;
use std::sync::Arc;

use super::intent::{classify_heuristic, parse_intent, Intent, ThemeMention};
use super::{ActionKind, ResultBuckets, SessionCarryOver, TurnOutcome};
use crate::config::{RecConfig, SearchConfig};
use crate::embeddings::TextEmbedder;
use crate::llm::CompletionModel;
use crate::ranking::rank_by_query;
use crate::search::{RuleBasedRecommender, VectorRecommender};
use crate::storage::{CatalogStore, StoreError};
use crate::types::{normalize_match_key, FilterCriteria};

const MISSING_KEY_REPLY: &str = "⚠️ Groq API Key가 설정되지 않았습니다.";
const MISSING_NICKNAME_REPLY: &str = "⚠️ 플레이 기록을 관리하려면 닉네임 입력이 필요합니다.";
const MISSING_THEME_REPLY: &str = "⚠️ 테마 이름을 인식하지 못했습니다.";
const INQUIRY_REPLY: &str = "테마를 [지역, 테마명] 형식으로 알려주세요.";
const NO_RESULT_REPLY: &str =
    "죄송합니다. 조건에 맞는 테마를 찾지 못했습니다. 지역이나 조건을 조금 완화해서 다시 물어봐 주세요.";

pub struct BotEngine {
    store: Arc<dyn CatalogStore>,
    rule_based: RuleBasedRecommender,
    vector: VectorRecommender,
    llm: Option<Arc<dyn CompletionModel>>,
    config: SearchConfig,
}

impl BotEngine {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        embedder: Option<Arc<dyn TextEmbedder>>,
        llm: Option<Arc<dyn CompletionModel>>,
        config: &RecConfig,
    ) -> Self {
        Self {
            rule_based: RuleBasedRecommender::new(store.clone(), config.search.clone()),
            vector: VectorRecommender::new(store.clone(), embedder, config.search.clone()),
            store,
            llm,
            config: config.search.clone(),
        }
    }

    /// Process one user query to completion. Every external failure inside
    /// the turn is converted to a degraded outcome; the only hard stop is a
    /// missing LLM credential, reported as a configuration error.
    pub async fn handle_turn(
        &self,
        query: &str,
        active_user: Option<&str>,
        session: &SessionCarryOver,
    ) -> TurnOutcome {
        let Some(llm) = self.llm.clone() else {
            return TurnOutcome {
                reply: MISSING_KEY_REPLY.to_string(),
                buckets: ResultBuckets::default(),
                filters_used: FilterCriteria::default(),
                action: ActionKind::Error,
            };
        };

        let intent = self.analyze_intent(llm.as_ref(), query).await;
        tracing::info!(action = ?intent.action(), "Intent classified");

        match intent {
            Intent::PlayedCheckInquiry => TurnOutcome {
                reply: INQUIRY_REPLY.to_string(),
                buckets: ResultBuckets::default(),
                filters_used: FilterCriteria::default(),
                action: ActionKind::PlayedCheckInquiry,
            },
            Intent::PlayedCheck { items } => {
                self.update_history(active_user, &items, true).await
            }
            Intent::NotPlayedCheck { items } => {
                self.update_history(active_user, &items, false).await
            }
            Intent::Recommend { filters } => {
                self.recommend(
                    llm.as_ref(),
                    query,
                    active_user,
                    filters,
                    ActionKind::Recommend,
                    &HashSet::new(),
                )
                .await
            }
            Intent::AnotherRecommend { overrides } => {
                // Reuse the previous turn's criteria, narrowed by anything
                // newly specified, and exclude everything shown so far.
                let filters = session.last_filters.narrowed_by(&overrides);
                self.recommend(
                    llm.as_ref(),
                    query,
                    active_user,
                    filters,
                    ActionKind::AnotherRecommend,
                    &session.shown_ids,
                )
                .await
            }
        }
    }

    async fn analyze_intent(&self, llm: &dyn CompletionModel, query: &str) -> Intent {
        let prompt = intent_prompt(query);
        match llm.complete(&prompt, true).await {
            Ok(raw) => parse_intent(&raw),
            Err(e) => {
                tracing::warn!("Intent classification failed ({}); using keyword fallback", e);
                classify_heuristic(query)
            }
        }
    }

    /// Mark themes played / not-played for the active user. Each item is
    /// resolved and reported independently; one failed resolution does not
    /// block its siblings.
    async fn update_history(
        &self,
        active_user: Option<&str>,
        items: &[ThemeMention],
        played: bool,
    ) -> TurnOutcome {
        let action = if played {
            ActionKind::PlayedCheck
        } else {
            ActionKind::NotPlayedCheck
        };
        let outcome = |reply: String| TurnOutcome {
            reply,
            buckets: ResultBuckets::default(),
            filters_used: FilterCriteria::default(),
            action,
        };

        let Some(nickname) = active_user.map(str::trim).filter(|n| !n.is_empty()) else {
            return outcome(MISSING_NICKNAME_REPLY.to_string());
        };
        if items.is_empty() {
            return outcome(MISSING_THEME_REPLY.to_string());
        }

        let mut messages = Vec::with_capacity(items.len());
        for item in items {
            let Some(venue_id) = self.find_theme_id(item.location.as_deref(), &item.theme).await
            else {
                messages.push(format!(
                    "- {}: ⚠️ 테마를 찾을 수 없습니다. 지역 정보가 정확한지 확인해주세요.",
                    item.theme
                ));
                continue;
            };

            tracing::info!(nickname, venue_id = %venue_id, played, "Updating play history");
            let result = if played {
                self.store.add_played(nickname, &venue_id).await
            } else {
                self.store.remove_played(nickname, &venue_id).await
            };

            let message = match result {
                Ok(()) if played => "✅ 플레이 목록에 추가했습니다!",
                Ok(()) => "✅ 플레이 목록에서 제외했습니다.",
                Err(StoreError::UserNotFound(_)) => "❌ 유저를 찾을 수 없습니다.",
                Err(e) => {
                    tracing::warn!("Play-history update failed: {}", e);
                    "❌ 업데이트 중 오류가 발생했습니다."
                }
            };
            messages.push(format!("- {}: {}", item.theme, message));
        }

        outcome(messages.join("\n"))
    }

    /// Resolve a theme name (optionally scoped to a location) to a venue
    /// id: bounded scan, whitespace-stripped title containment, alias as
    /// the fallback match target.
    async fn find_theme_id(&self, location: Option<&str>, theme_name: &str) -> Option<String> {
        let target = normalize_match_key(theme_name);
        if target.is_empty() {
            return None;
        }

        let records = match location.map(str::trim).filter(|l| !l.is_empty()) {
            Some(loc) => {
                self.store
                    .venues_in_location(loc, self.config.theme_scan_limit)
                    .await
            }
            None => self.store.top_rated_venues(self.config.theme_scan_limit).await,
        };
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Theme lookup scan failed: {}", e);
                return None;
            }
        };

        for record in &records {
            if normalize_match_key(&record.title).contains(&target) {
                tracing::debug!(title = %record.title, "Resolved theme");
                return Some(record.canonical_id());
            }
            if let Some(alias) = &record.alias {
                if normalize_match_key(alias).contains(&target) {
                    tracing::debug!(title = %record.title, "Resolved theme via alias");
                    return Some(record.canonical_id());
                }
            }
        }

        tracing::debug!(theme = theme_name, "Theme not found");
        None
    }

    async fn recommend(
        &self,
        llm: &dyn CompletionModel,
        query: &str,
        active_user: Option<&str>,
        filters: FilterCriteria,
        action: ActionKind,
        exclude_ids: &HashSet<String>,
    ) -> TurnOutcome {
        // Effective participants: the caller's own nickname(s) plus anyone
        // mentioned in the query.
        let mut participants: Vec<String> = Vec::new();
        if let Some(raw) = active_user {
            for part in raw.split(',') {
                let trimmed = part.trim();
                if !trimmed.is_empty() && !participants.iter().any(|p| p == trimmed) {
                    participants.push(trimmed.to_string());
                }
            }
        }
        for mentioned in &filters.mentioned_users {
            let trimmed = mentioned.trim();
            if !trimmed.is_empty() && !participants.iter().any(|p| p == trimmed) {
                participants.push(trimmed.to_string());
            }
        }

        tracing::info!(
            ?participants,
            excluded = exclude_ids.len(),
            locations = ?filters.locations,
            "Running recommendation flow"
        );

        let mut buckets = ResultBuckets::default();
        buckets.rule_based = self
            .rule_based
            .search(
                &filters,
                query,
                self.config.bucket_limit,
                &participants,
                exclude_ids,
            )
            .await;
        if !buckets.rule_based.is_empty() {
            tracing::info!(count = buckets.rule_based.len(), "Rule-based bucket filled");
        }

        if !participants.is_empty() {
            buckets.personalized = self
                .vector
                .search_by_user_context(
                    &participants,
                    query,
                    self.config.bucket_limit,
                    &filters,
                    exclude_ids,
                )
                .await;
            if !buckets.personalized.is_empty() {
                tracing::info!(count = buckets.personalized.len(), "Personalized bucket filled");
            }
        }

        // Last resort: embed the query text itself.
        if buckets.rule_based.is_empty() && buckets.personalized.is_empty() {
            let mut text_results = self.vector.search_by_text(query, &filters, exclude_ids).await;
            rank_by_query(&mut text_results, query);
            text_results.truncate(self.config.bucket_limit);
            buckets.text_search = text_results;
            if !buckets.text_search.is_empty() {
                tracing::info!(count = buckets.text_search.len(), "Text-search bucket filled");
            }
        }

        if buckets.is_empty() {
            tracing::info!("All retrieval paths empty");
            return TurnOutcome {
                reply: NO_RESULT_REPLY.to_string(),
                buckets,
                filters_used: filters,
                action,
            };
        }

        let reply = self
            .compose_reply(llm, query, &participants, !exclude_ids.is_empty(), &buckets)
            .await;
        TurnOutcome {
            reply,
            buckets,
            filters_used: filters,
            action,
        }
    }

    /// Compose the natural-language summary. A failed or empty completion
    /// degrades to a templated message; the structured buckets are returned
    /// either way.
    async fn compose_reply(
        &self,
        llm: &dyn CompletionModel,
        query: &str,
        participants: &[String],
        excluded_previous: bool,
        buckets: &ResultBuckets,
    ) -> String {
        let mut intro = String::new();
        if excluded_previous {
            intro.push_str("이전 추천을 제외하고,");
        }
        match participants {
            [] => intro.push_str(" 요청하신 조건에 맞춰"),
            [single] => {
                intro.push_str(&format!(" {}님의 취향과 요청하신 조건을 모두 고려하여", single))
            }
            _ => intro.push_str(" 그룹 멤버분들의 취향과 요청하신 조건을 모두 고려하여"),
        }

        let prompt = format!(
            "당신은 방탈출 추천 AI '코난'입니다.\n\
             [상황] - 사용자 질문: \"{}\" - 추천 근거:{}\n\
             [검색된 테마 목록]{}\n\
             [지시사항]\n\
             1. 취향 맞춤 추천과 조건 부합 추천 결과를 종합하여 설명하세요.\n\
             2. 각 추천의 특징(만족도, 공포도 등)을 언급하며 왜 추천했는지 알려주세요.\n\
             3. 친절한 탐정 말투로 답변하세요.",
            query,
            intro,
            grounding_context(buckets)
        );

        tracing::debug!("Requesting reply composition");
        match llm.complete(&prompt, false).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => fallback_reply(buckets),
            Err(e) => {
                tracing::warn!("Reply composition failed ({}); using fallback template", e);
                fallback_reply(buckets)
            }
        }
    }
}

/// Grounding context handed to the reply prompt: one section per non-empty
/// bucket with title, key ratings, and a short description excerpt.
fn grounding_context(buckets: &ResultBuckets) -> String {
    let mut out = String::new();
    if !buckets.personalized.is_empty() {
        out.push_str("\n[취향 맞춤 추천 (Vector)]\n");
        for item in &buckets.personalized {
            out.push_str(&format!(
                "- {} (만족도 {:.1}, 공포 {:.1}): {}...\n",
                item.title,
                item.ratings.overall,
                item.ratings.fear,
                excerpt(&item.desc, 100)
            ));
        }
    }
    if !buckets.rule_based.is_empty() {
        out.push_str("\n[조건 부합 추천 (Rule-Based)]\n");
        for item in &buckets.rule_based {
            out.push_str(&format!(
                "- {} (만족도 {:.1}, 공포 {:.1}): {}...\n",
                item.title,
                item.ratings.overall,
                item.ratings.fear,
                excerpt(&item.desc, 100)
            ));
        }
    }
    if !buckets.text_search.is_empty() {
        out.push_str("\n[유사 테마 추천 (Text)]\n");
        for item in &buckets.text_search {
            out.push_str(&format!(
                "- {} (만족도 {:.1}): {}...\n",
                item.title,
                item.ratings.overall,
                excerpt(&item.desc, 100)
            ));
        }
    }
    out
}

/// First `max_chars` characters of `text`, counted by `char` so multibyte
/// text is never split mid-codepoint. Callers append their own ellipsis.
fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn fallback_reply(buckets: &ResultBuckets) -> String {
    let titles: Vec<String> = buckets
        .personalized
        .iter()
        .chain(buckets.rule_based.iter())
        .chain(buckets.text_search.iter())
        .map(|c| c.title.clone())
        .collect();
    format!(
        "죄송합니다. 답변 생성 중 오류가 발생했습니다. 찾은 추천 테마: {}",
        titles.join(", ")
    )
}

fn intent_prompt(query: &str) -> String {
    format!(
        "사용자의 질문을 분석하여 방탈출 추천 서비스의 의도(Intent)와 파라미터를 추출하세요.\n\
         \n\
         질문: \"{}\"\n\
         \n\
         다음 규칙에 따라 'action'을 결정하세요:\n\
         1. \"recommend\": 새로운 추천을 요청함 (예: \"강남 공포 테마 추천해줘\", \"재밌는거 추천좀\").\n\
         2. \"another_recommend\": 다른 추천을 요청함 (예: \"다른거 추천해줘\", \"이거 말고\", \"다음\").\n\
         3. \"played_check\": 특정 테마를 플레이했다고 말함 (예: \"강남 링 했어\", \"X 테마 해봤어\").\n\
         4. \"not_played_check\": 플레이하지 않았다고 정정하거나 취소함 (예: \"링 안했어\", \"플레이 기록 취소해줘\").\n\
         5. \"played_check_inquiry\": 플레이 기록 방법을 문의함.\n\
         \n\
         다음 필드를 추출하세요 (반드시 한국어로):\n\
         - locations: 지역명 리스트 (예: [\"강남\", \"홍대\"]) 또는 [].\n\
         - keywords: 추천을 위한 키워드 리스트 (장르, 분위기, 특징 등 예: \"공포\", \"활동성\", \"스토리\").\n\
         - min_rating: 언급된 최소 만족도 (숫자) 또는 null.\n\
         - party_size: 언급된 인원수 (숫자) 또는 null.\n\
         - mentioned_users: 질문에 언급된 다른 유저 닉네임 리스트.\n\
         - items: 플레이 기록용 [{{\"location\": 지역 또는 null, \"theme\": 테마명}}] 리스트.\n\
         \n\
         JSON 형식으로만 반환하세요. 예시:\n\
         {{ \"action\": \"recommend\", \"locations\": [\"강남\"], \"keywords\": [\"공포\"], \"min_rating\": null, \"party_size\": null, \"mentioned_users\": [], \"items\": [] }}",
        query
    )
}
