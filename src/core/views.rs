//! Derived views over the message log and conversation list
//!
//! Everything here is a pure function recomputed on read. Token counts use
//! the dashboard's character heuristic (`round(chars * 0.7)`, chars counted
//! in UTF-16 units) for display, cost and context usage alike; it is not a
//! tokenizer and all call sites must stay on the same estimate.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::conversation::{Conversation, Message, Role};

/// Tokens per character used by every estimate
pub const TOKENS_PER_CHAR: f64 = 0.7;

/// USD per 1000 input tokens
pub const INPUT_PRICE_PER_1K: f64 = 0.0005;

/// USD per 1000 output tokens
pub const OUTPUT_PRICE_PER_1K: f64 = 0.0015;

/// Window used when no table entry matches the model id
pub const DEFAULT_CONTEXT_WINDOW: u64 = 8192;

/// Ordered `(model id substring, window)` table, first match wins
const CONTEXT_WINDOWS: &[(&str, u64)] = &[
    ("gpt-4-turbo", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8192),
    ("gpt-3.5-turbo-16k", 16_385),
    ("gpt-3.5-turbo", 4096),
    ("claude-3", 200_000),
    ("claude", 100_000),
    ("gemini-1.5", 1_000_000),
    ("gemini", 32_768),
    ("deepseek", 64_000),
    ("qwen", 32_768),
    ("glm-4", 128_000),
    ("moonshot", 128_000),
];

const TIMELINE_SAMPLES: usize = 8;

const PREVIEW_CHARS: usize = 40;

pub fn token_estimate(text: &str) -> u64 {
    (text.encode_utf16().count() as f64 * TOKENS_PER_CHAR).round() as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenBreakdown {
    /// Tokens from user messages
    pub input: u64,
    /// Everything else
    pub output: u64,
    pub total: u64,
}

pub fn token_breakdown(messages: &[Message]) -> TokenBreakdown {
    let mut total = 0;
    let mut input = 0;
    for message in messages {
        let tokens = token_estimate(&message.text);
        total += tokens;
        if message.role == Role::User {
            input += tokens;
        }
    }
    TokenBreakdown {
        input,
        output: total - input,
        total,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub usd: f64,
    /// Cents rounded to two decimals
    pub cents: f64,
}

pub fn cost_estimate(messages: &[Message]) -> CostEstimate {
    cost_for_tokens(token_breakdown(messages))
}

pub fn cost_for_tokens(tokens: TokenBreakdown) -> CostEstimate {
    let usd = tokens.input as f64 / 1000.0 * INPUT_PRICE_PER_1K
        + tokens.output as f64 / 1000.0 * OUTPUT_PRICE_PER_1K;
    CostEstimate {
        usd,
        cents: (usd * 100.0 * 100.0).round() / 100.0,
    }
}

/// Context window for a model id, by case-insensitive substring lookup
pub fn context_window_for(model_id: &str) -> u64 {
    let needle = model_id.to_lowercase();
    CONTEXT_WINDOWS
        .iter()
        .find(|(pattern, _)| needle.contains(pattern))
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

pub fn context_usage_percent(estimated_tokens: u64, window: u64) -> f64 {
    if window == 0 {
        return 100.0;
    }
    (estimated_tokens as f64 / window as f64 * 100.0).min(100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContextUsage {
    pub estimated_tokens: u64,
    pub window: u64,
    pub percent: f64,
}

/// Context usage for a log; `window_override` wins over the lookup table
pub fn context_usage(messages: &[Message], model_id: &str, window_override: Option<u64>) -> ContextUsage {
    let estimated_tokens = token_breakdown(messages).total;
    let window = window_override.unwrap_or_else(|| context_window_for(model_id));
    ContextUsage {
        estimated_tokens,
        window,
        percent: context_usage_percent(estimated_tokens, window),
    }
}

/// Message filter; all active criteria must match
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub query: Option<String>,
    pub bookmarked_only: bool,
    pub role: Option<Role>,
}

impl MessageFilter {
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn bookmarked() -> Self {
        Self {
            bookmarked_only: true,
            ..Default::default()
        }
    }

    fn matches(&self, message: &Message, needle: Option<&str>) -> bool {
        if self.bookmarked_only && !message.is_bookmarked {
            return false;
        }
        if self.role.is_some_and(|role| role != message.role) {
            return false;
        }
        match needle {
            Some(needle) => message.text.to_lowercase().contains(needle),
            None => true,
        }
    }
}

/// Matching messages with their log indices
pub fn filter_messages<'a>(messages: &'a [Message], filter: &MessageFilter) -> Vec<(usize, &'a Message)> {
    let needle = filter
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| filter.matches(m, needle.as_deref()))
        .collect()
}

pub fn pinned_messages(messages: &[Message]) -> Vec<(usize, &Message)> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_pinned)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineMarker {
    pub index: usize,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub is_bookmarked: bool,
    pub is_pinned: bool,
    pub preview: String,
}

/// Markers sampled every `max(1, n / 8)` messages
pub fn timeline_markers(messages: &[Message]) -> Vec<TimelineMarker> {
    let step = (messages.len() / TIMELINE_SAMPLES).max(1);
    messages
        .iter()
        .enumerate()
        .step_by(step)
        .map(|(index, m)| TimelineMarker {
            index,
            role: m.role,
            timestamp: m.timestamp,
            is_bookmarked: m.is_bookmarked,
            is_pinned: m.is_pinned,
            preview: preview(&m.text),
        })
        .collect()
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(PREVIEW_CHARS).collect();
    if line.chars().count() > PREVIEW_CHARS || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub model_messages: usize,
    pub system_messages: usize,
    pub total_chars: usize,
    pub total_words: usize,
    pub tokens: TokenBreakdown,
    pub cost: Option<CostEstimate>,
    pub avg_response_time_ms: Option<f64>,
    pub bookmarked: usize,
    pub pinned: usize,
    pub rated: usize,
    pub avg_rating: Option<f64>,
}

pub fn conversation_stats(messages: &[Message]) -> ConversationStats {
    let mut stats = ConversationStats {
        total_messages: messages.len(),
        tokens: token_breakdown(messages),
        ..Default::default()
    };

    let mut response_times = Vec::new();
    let mut ratings = Vec::new();
    for m in messages {
        match m.role {
            Role::User => stats.user_messages += 1,
            Role::Model => stats.model_messages += 1,
            Role::System => stats.system_messages += 1,
        }
        stats.total_chars += m.text.chars().count();
        stats.total_words += m.text.split_whitespace().count();
        if m.is_bookmarked {
            stats.bookmarked += 1;
        }
        if m.is_pinned {
            stats.pinned += 1;
        }
        if let Some(ms) = m.response_time_ms {
            response_times.push(ms as f64);
        }
        if let Some(rating) = m.rating {
            ratings.push(f64::from(rating));
        }
    }

    stats.cost = Some(cost_for_tokens(stats.tokens));
    stats.rated = ratings.len();
    stats.avg_response_time_ms = mean(&response_times);
    stats.avg_rating = mean(&ratings);
    stats
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Conversation activity by weekday (Monday first) and hour, UTC
pub fn activity_heatmap(conversations: &[Conversation]) -> [[u32; 24]; 7] {
    let mut grid = [[0u32; 24]; 7];
    for c in conversations {
        let day = c.updated_at.weekday().num_days_from_monday() as usize;
        grid[day][c.updated_at.hour() as usize] += 1;
    }
    grid
}

/// Conversations updated per day for the `days` days ending at `today`
pub fn daily_activity(conversations: &[Conversation], today: NaiveDate, days: u32) -> Vec<(NaiveDate, u32)> {
    (0..days)
        .rev()
        .map(|back| {
            let day = today - Duration::days(i64::from(back));
            let count = conversations
                .iter()
                .filter(|c| c.updated_at.date_naive() == day)
                .count() as u32;
            (day, count)
        })
        .collect()
}

/// Conversations whose title contains the query, case-insensitive
pub fn search_conversations<'a>(conversations: &'a [Conversation], query: &str) -> Vec<&'a Conversation> {
    let needle = query.trim().to_lowercase();
    conversations
        .iter()
        .filter(|c| needle.is_empty() || c.title.to_lowercase().contains(&needle))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u32,
}

/// Weekday/hour heatmap plus the per-day series, for the activity panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    /// Rows are Monday..Sunday, columns are hours in UTC
    pub heatmap: [[u32; 24]; 7],
    pub daily: Vec<DailyCount>,
}

pub fn activity_summary(conversations: &[Conversation], today: NaiveDate, days: u32) -> ActivitySummary {
    ActivitySummary {
        heatmap: activity_heatmap(conversations),
        daily: daily_activity(conversations, today, days)
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text_of(len: usize) -> String {
        "a".repeat(len)
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(token_estimate(""), 0);
        assert_eq!(token_estimate("abc"), 2);
        assert_eq!(token_estimate(&text_of(100)), 70);
        // one UTF-16 unit per CJK char
        assert_eq!(token_estimate("你好世界"), 3);
    }

    #[test]
    fn test_cost_scenario() {
        let messages = vec![
            Message::user(text_of(40)),
            Message::user(text_of(60)),
            Message::model(text_of(200)),
        ];
        let tokens = token_breakdown(&messages);
        // 40*0.7 + 60*0.7 rounded per message
        assert_eq!(tokens.input, 28 + 42);
        assert_eq!(tokens.output, 140);
        assert_eq!(tokens.total, 210);

        let cost = cost_estimate(&messages);
        let expected_usd = 70.0 / 1000.0 * 0.0005 + 140.0 / 1000.0 * 0.0015;
        assert!((cost.usd - expected_usd).abs() < 1e-12);
        assert_eq!(cost.cents, (expected_usd * 100.0 * 100.0).round() / 100.0);
    }

    #[test]
    fn test_cost_monotonic_in_length() {
        let mut previous = 0.0;
        for len in [0, 1, 10, 100, 1000] {
            let cost = cost_estimate(&[Message::user(text_of(len)), Message::model(text_of(len))]);
            assert!(cost.usd >= previous);
            previous = cost.usd;
        }
    }

    #[test]
    fn test_context_window_lookup() {
        assert_eq!(context_window_for("GPT-4-Turbo-Preview"), 128_000);
        assert_eq!(context_window_for("gpt-4-0613"), 8192);
        assert_eq!(context_window_for("claude-3-opus"), 200_000);
        assert_eq!(context_window_for("mystery-model"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn test_context_usage_scenario() {
        let percent = context_usage_percent(50_000, context_window_for("gpt-4-turbo"));
        assert_eq!(percent, 39.0625);
        assert_eq!(context_usage_percent(10_000, 8192), 100.0);
    }

    #[test]
    fn test_search_composes_with_bookmarks() {
        let mut messages = vec![
            Message::user("Rust ownership"),
            Message::model("Ownership in RUST means..."),
            Message::user("What about Go?"),
        ];
        messages[1].is_bookmarked = true;

        let hits = filter_messages(&messages, &MessageFilter::search("rust"));
        assert_eq!(hits.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1]);

        let filter = MessageFilter {
            query: Some("rust".into()),
            bookmarked_only: true,
            role: None,
        };
        let hits = filter_messages(&messages, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);

        assert_eq!(filter_messages(&messages, &MessageFilter::search("  ")).len(), 3);
    }

    #[test]
    fn test_timeline_sampling() {
        let mut messages: Vec<Message> = (0..20).map(|i| Message::user(format!("m{i}"))).collect();
        messages[4].is_pinned = true;
        let markers = timeline_markers(&messages);
        // step = floor(20 / 8) = 2
        assert_eq!(markers.len(), 10);
        assert_eq!(markers[2].index, 4);
        assert!(markers[2].is_pinned);
        assert!(!markers[1].is_pinned);

        let short: Vec<Message> = (0..3).map(|i| Message::user(format!("m{i}"))).collect();
        assert_eq!(timeline_markers(&short).len(), 3);
        assert!(timeline_markers(&[]).is_empty());
    }

    #[test]
    fn test_stats() {
        let mut reply = Message::model("two words");
        reply.response_time_ms = Some(1500);
        reply.rating = Some(4);
        let mut other = Message::model("three more words");
        other.response_time_ms = Some(500);
        let stats = conversation_stats(&[Message::user("hello"), reply, other]);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.model_messages, 2);
        assert_eq!(stats.total_words, 6);
        assert_eq!(stats.avg_response_time_ms, Some(1000.0));
        assert_eq!(stats.avg_rating, Some(4.0));
        assert_eq!(stats.rated, 1);
    }

    #[test]
    fn test_heatmap_and_daily_activity() {
        let at = |d: u32, h: u32| {
            let ts = Utc.with_ymd_and_hms(2024, 5, d, h, 0, 0).unwrap();
            Conversation {
                id: format!("{d}-{h}"),
                title: format!("Notes {d}"),
                provider: None,
                model: None,
                assistant_id: None,
                created_at: ts,
                updated_at: ts,
            }
        };
        // 2024-05-06 is a Monday
        let conversations = vec![at(6, 9), at(6, 9), at(7, 23)];
        let grid = activity_heatmap(&conversations);
        assert_eq!(grid[0][9], 2);
        assert_eq!(grid[1][23], 1);

        let today = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        let daily = daily_activity(&conversations, today, 3);
        assert_eq!(daily.iter().map(|(_, n)| *n).collect::<Vec<_>>(), vec![0, 2, 1]);

        assert_eq!(search_conversations(&conversations, "NOTES 7").len(), 1);

        let summary = activity_summary(&conversations, today, 3);
        assert_eq!(summary.heatmap, grid);
        assert_eq!(summary.daily[1], DailyCount { date: today.pred_opt().unwrap(), count: 2 });
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["daily"][2]["date"], "2024-05-07");
    }
}
