use super::tokenizer::{tokenize_query, tokenize_text};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredText {
    pub text: String,
    pub score: f32,
}

impl ScoredText {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// Ranks candidate records against a query. May fail or be slow; callers
/// bound it with their own timeout.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn rank(&self, query: &str, candidates: &[String], top_k: usize) -> Result<Vec<ScoredText>>;
}

/// Local scorer: fraction of query tokens a record contains.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordScorer;

#[async_trait]
impl Scorer for KeywordScorer {
    async fn rank(&self, query: &str, candidates: &[String], top_k: usize) -> Result<Vec<ScoredText>> {
        let query_tokens = tokenize_query(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<ScoredText> = candidates
            .iter()
            .filter_map(|candidate| {
                let tokens = tokenize_text(candidate);
                let matched = query_tokens.iter().filter(|t| tokens.contains(*t)).count();
                (matched > 0).then(|| {
                    ScoredText::new(candidate.clone(), matched as f32 / query_tokens.len() as f32)
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

static RANKED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+\.\s*\[(\d+(?:\.\d+)?)\]\s*(.+?)\s*$").expect("ranked line pattern is valid")
});

const CHAT_TEMPERATURE: f32 = 0.1;
const CHAT_MAX_TOKENS: u32 = 3000;

/// Remote scorer backed by an OpenAI-compatible chat completion endpoint.
///
/// The model is asked to answer with lines like `1. [0.95] exact record`.
pub struct ChatScorer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl ChatScorer {
    pub fn new(endpoint: String, model: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            api_key: api_key.trim().to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Scorer for ChatScorer {
    async fn rank(&self, query: &str, candidates: &[String], top_k: usize) -> Result<Vec<ScoredText>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let system_prompt = format!(
            "You rank records against a query. Return the TOP {} most relevant records. \
             Return ONLY exact text from the records, unaltered. Format: 1. [0.95] Exact record",
            top_k
        );
        let user_prompt = format!(
            "Query:\n{}\n\nRecords:\n{}\n\nReturn top {} matches with scores.",
            query,
            candidates.join("\n"),
            top_k
        );

        let body = serde_json::json!({
            "model": self.model,
            "temperature": CHAT_TEMPERATURE,
            "max_tokens": CHAT_MAX_TOKENS,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        let value: serde_json::Value = response.json().await?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No choices returned from scorer"))?;

        Ok(parse_ranked_lines(content, top_k))
    }
}

/// Parses `N. [score] text` lines, ignoring anything else.
pub fn parse_ranked_lines(text: &str, top_k: usize) -> Vec<ScoredText> {
    text.lines()
        .filter_map(|line| {
            let caps = RANKED_LINE.captures(line)?;
            let score: f32 = caps.get(1)?.as_str().parse().ok()?;
            let content = caps.get(2)?.as_str();
            Some(ScoredText::new(content, score))
        })
        .take(top_k)
        .collect()
}
