//! Proposal service client
//!
//! One request per group of names. The request carries only the partition's
//! registry aliases; whatever comes back is advisory until the provenance
//! validator has checked it.

use crate::models::ConfidenceTier;
use crate::utils::Retryable;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("alias-match/", env!("CARGO_PKG_VERSION"));

/// Proposal client errors
#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("Proposal request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Retryable for ProposalError {
    fn is_retryable(&self) -> bool {
        match self {
            ProposalError::Timeout(_) | ProposalError::Transport(_) => true,
            ProposalError::Api { status, .. } => *status == 429 || *status >= 500,
            ProposalError::Parse(_) => false,
        }
    }
}

impl ProposalError {
    pub fn is_retryable(&self) -> bool {
        Retryable::is_retryable(self)
    }
}

/// One name to resolve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalEntry {
    pub record_id: String,
    pub full_name: String,
}

/// Confirmed example shown to the service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HintMapping {
    pub full_name: String,
    pub alias: String,
    pub confirmations: u32,
}

/// Reviewer correction shown to the service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HintCorrection {
    pub full_name: String,
    pub proposed: Option<String>,
    pub corrected: String,
}

/// Feedback-derived context attached to a request
///
/// Shapes the request only; nothing here can authorise an alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShapingHints {
    pub popular: Vec<HintMapping>,
    pub corrections: Vec<HintCorrection>,
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    /// Aliases repeatedly proposed and rejected
    pub avoid: Vec<String>,
}

impl ShapingHints {
    pub fn is_empty(&self) -> bool {
        self.popular.is_empty()
            && self.corrections.is_empty()
            && self.prefixes.is_empty()
            && self.suffixes.is_empty()
            && self.avoid.is_empty()
    }
}

/// One proposal call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalRequest {
    pub partition: String,
    /// The partition's registry aliases, the only allowed answers
    pub candidates: Vec<String>,
    pub entries: Vec<ProposalEntry>,
    pub hints: ShapingHints,
}

/// One answer from the service
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub record_id: String,
    /// `None` when the service found no candidate
    pub alias: Option<String>,
    pub confidence: ConfidenceTier,
    pub reasoning: String,
}

/// Source of alias proposals
#[async_trait]
pub trait ProposalService: Send + Sync {
    async fn propose(&self, request: &ProposalRequest) -> Result<Vec<Proposal>, ProposalError>;
}

/// Wire shape of one answer; ids may come back as numbers
#[derive(Debug, Deserialize)]
struct RawProposal {
    record_id: serde_json::Value,
    #[serde(default, alias = "abbreviation")]
    alias: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Extract the JSON array of proposals from free-form response text.
///
/// Replies often quote record ids in brackets before the array itself, so each
/// `[` is tried in order and the first one that opens a proposal array wins.
/// An empty array is only used when no non-empty one follows.
pub fn parse_proposals(text: &str) -> Result<Vec<Proposal>, ProposalError> {
    let mut empty_found = false;
    let mut last_error = None;
    let mut found = None;

    for (start, _) in text.match_indices('[') {
        let mut stream =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<Vec<RawProposal>>();
        match stream.next() {
            Some(Ok(parsed)) if parsed.is_empty() => empty_found = true,
            Some(Ok(parsed)) => {
                found = Some(parsed);
                break;
            }
            Some(Err(e)) => last_error = Some(e),
            None => {}
        }
    }

    let raw = match (found, last_error) {
        (Some(raw), _) => raw,
        (None, _) if empty_found => Vec::new(),
        (None, Some(e)) => {
            return Err(ProposalError::Parse(format!("invalid proposal JSON: {}", e)))
        }
        (None, None) => return Err(ProposalError::Parse("no JSON array in response".to_string())),
    };

    Ok(raw
        .into_iter()
        .map(|r| {
            let record_id = match r.record_id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            Proposal {
                record_id,
                alias: r.alias.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
                confidence: ConfidenceTier::parse_or_low(r.confidence.as_deref()),
                reasoning: r.reasoning.unwrap_or_default(),
            }
        })
        .collect())
}

pub const SYSTEM_PROMPT: &str = "你是一个专业的医药连锁名称匹配助手。

核心原则：
1. 严禁编造简称 - 所有简称必须来自候选库
2. 省份必须严格匹配 - 只能从目标省份的候选库中选择
3. 找不到匹配时留空 - 必须返回空字符串

输出要求：
- 只输出一个 JSON 数组
- 简称必须完全匹配候选库中的某一项
- 理由要简洁明了";

/// User prompt for a batch request
pub fn build_prompt(request: &ProposalRequest) -> String {
    let mut prompt = String::new();

    prompt.push_str("请将以下连锁药店全称逐条匹配到正确的简称。\n\n");
    prompt.push_str(&format!("## 目标省份\n{}\n\n", request.partition));

    prompt.push_str("## 候选简称库（必须从中选择）\n");
    for (i, alias) in request.candidates.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, alias));
    }

    let hints = &request.hints;
    if !hints.popular.is_empty() {
        prompt.push_str("\n## 历史确认案例\n");
        for m in &hints.popular {
            prompt.push_str(&format!(
                "- 全称: {} → 简称: {}（确认 {} 次）\n",
                m.full_name, m.alias, m.confirmations
            ));
        }
    }
    if !hints.corrections.is_empty() {
        prompt.push_str("\n## 近期人工修正\n");
        for c in &hints.corrections {
            prompt.push_str(&format!(
                "- 全称: {}：推荐 {} → 修正为 {}\n",
                c.full_name,
                c.proposed.as_deref().unwrap_or("（空）"),
                c.corrected
            ));
        }
    }
    if !hints.prefixes.is_empty() || !hints.suffixes.is_empty() {
        prompt.push_str(&format!(
            "\n## 常见名称特征\n- 前缀: {}\n- 后缀: {}\n",
            hints.prefixes.join("、"),
            hints.suffixes.join("、")
        ));
    }
    if !hints.avoid.is_empty() {
        prompt.push_str(&format!(
            "\n## 经常被拒绝的简称（慎用）\n{}\n",
            hints.avoid.join("、")
        ));
    }

    prompt.push_str("\n## 待匹配全称\n");
    for entry in &request.entries {
        prompt.push_str(&format!("- [{}] {}\n", entry.record_id, entry.full_name));
    }

    prompt.push_str(&format!(
        "\n## 任务要求\n\
         1. 只能从上述候选简称库中选择，严禁编造或使用库外简称\n\
         2. 简称必须属于目标省份【{}】\n\
         3. 候选库中没有合适简称时，alias 返回空字符串\n\n\
         ## 输出格式\n\
         每条全称输出一项，严格按以下 JSON 数组格式：\n\
         [{{\"record_id\": \"方括号中的编号\", \"alias\": \"选择的简称或空字符串\", \
         \"confidence\": \"High/Medium/Low\", \"reasoning\": \"简要理由\"}}]\n",
        request.partition
    ));

    prompt
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Settings for [`LlmProposalClient`]
#[derive(Debug, Clone)]
pub struct LlmClientSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_version: String,
    pub requests_per_minute: u32,
    pub timeout: Duration,
}

impl LlmClientSettings {
    pub fn from_config(
        config: &crate::config::ProposalConfig,
        api_key: String,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_version: config.api_version.clone(),
            requests_per_minute: config.requests_per_minute,
            timeout,
        }
    }
}

/// Anthropic-compatible Messages API client
pub struct LlmProposalClient {
    http_client: reqwest::Client,
    settings: LlmClientSettings,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl LlmProposalClient {
    pub fn new(settings: LlmClientSettings) -> Result<Self, ProposalError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProposalError::Transport(e.to_string()))?;

        let per_minute = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Self {
            http_client,
            settings,
            rate_limiter,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ProposalService for LlmProposalClient {
    async fn propose(&self, request: &ProposalRequest) -> Result<Vec<Proposal>, ProposalError> {
        self.rate_limiter.until_ready().await;

        let body = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: build_prompt(request),
            }],
        };

        tracing::debug!(
            partition = %request.partition,
            entries = request.entries.len(),
            candidates = request.candidates.len(),
            "Sending proposal request"
        );

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", &self.settings.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProposalError::Timeout(self.settings.timeout)
                } else {
                    ProposalError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProposalError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProposalError::Parse(e.to_string()))?;

        if let Some(usage) = &parsed.usage {
            tracing::info!(
                partition = %request.partition,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Proposal request succeeded"
            );
        }

        // Thinking models interleave non-text blocks; only text carries the answer
        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        parse_proposals(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proposals_from_fenced_text() {
        let text = r#"好的，结果如下：
```json
[
  {"record_id": "r1", "alias": "太极", "confidence": "High", "reasoning": "品牌一致"},
  {"record_id": 2, "abbreviation": "", "confidence": "unsure"}
]
```"#;

        let proposals = parse_proposals(text).unwrap();
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].alias.as_deref(), Some("太极"));
        assert_eq!(proposals[0].confidence, ConfidenceTier::High);
        assert_eq!(proposals[1].record_id, "2");
        assert_eq!(proposals[1].alias, None);
        assert_eq!(proposals[1].confidence, ConfidenceTier::Low);
    }

    #[test]
    fn test_parse_skips_bracketed_preamble() {
        let text = "已完成匹配 [共2条]，编号见 [r1]：\n[{\"record_id\":\"r1\",\"alias\":\"太极\",\"confidence\":\"High\"},{\"record_id\":\"r2\",\"alias\":\"\"}]\n以上 [完]";

        let proposals = parse_proposals(text).unwrap();
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].record_id, "r1");
        assert_eq!(proposals[0].alias.as_deref(), Some("太极"));
        assert_eq!(proposals[1].alias, None);
    }

    #[test]
    fn test_parse_empty_array_is_no_answers() {
        assert!(parse_proposals("没有匹配 []").unwrap().is_empty());
    }

    #[test]
    fn test_parse_broken_array_is_error() {
        let err = parse_proposals("结果 [共1条]：[{\"record_id\": \"r1\",").unwrap_err();
        assert!(matches!(err, ProposalError::Parse(m) if m.starts_with("invalid proposal JSON")));
    }

    #[test]
    fn test_parse_without_array_is_error() {
        let err = parse_proposals("抱歉，无法完成").unwrap_err();
        assert!(matches!(err, ProposalError::Parse(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_statuses() {
        let api = |status| ProposalError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(401).is_retryable());
        assert!(ProposalError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_prompt_lists_only_request_candidates() {
        let request = ProposalRequest {
            partition: "四川".to_string(),
            candidates: vec!["太极".to_string(), "一心堂".to_string()],
            entries: vec![ProposalEntry {
                record_id: "r1".to_string(),
                full_name: "四川太极大药房连锁有限公司".to_string(),
            }],
            hints: ShapingHints {
                avoid: vec!["桐君阁".to_string()],
                ..Default::default()
            },
        };

        let prompt = build_prompt(&request);
        assert!(prompt.contains("1. 太极"));
        assert!(prompt.contains("2. 一心堂"));
        assert!(prompt.contains("[r1] 四川太极大药房连锁有限公司"));
        assert!(prompt.contains("慎用"));
    }
}
