//! AI query generation and candidate validation for autoplay.
//!
//! The chat-completion service is optional. Every failure mode (no key,
//! quota denied, non-200, timeout, malformed JSON) degrades instead of
//! propagating: query generation falls back to [`fallback::fallback_query`],
//! validation approves every candidate.

pub mod fallback;
mod prompts;

use crate::autoplay::strategy::SearchStrategy;
use crate::cache::lru_cache::LRUCache;
use crate::quota::{QuotaGovernor, QuotaOperation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(15);
const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);
const RESPONSE_CACHE_SIZE: usize = 500;

/// One chat-completion call expecting a JSON object back.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Chat-completion transport. Returns the raw JSON content of the reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete_json(&self, request: ChatRequest) -> Result<String>;
}

/// Groq's OpenAI-compatible endpoint
pub struct GroqBackend {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

impl GroqBackend {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            api_key,
            model,
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl ChatBackend for GroqBackend {
    async fn complete_json(&self, request: ChatRequest) -> Result<String> {
        let payload = ChatPayload {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(GROQ_URL)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            anyhow::bail!("Groq API error ({}): {}", status, snippet);
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .context("Groq response without choices")
    }
}

/// Query suggested for the next autoplay search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query: String,
    #[serde(rename = "type", alias = "tipo", default)]
    pub kind: String,
    #[serde(alias = "genero", default)]
    pub genre: String,
    #[serde(rename = "isInternational", alias = "international", alias = "internacional", default)]
    pub is_international: bool,
    #[serde(alias = "explicacao", default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationCandidate {
    pub title: String,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub approved: bool,
    pub reason: String,
}

impl Validation {
    fn approve(reason: &str) -> Self {
        Self {
            approved: true,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidationReply {
    #[serde(default)]
    validations: Vec<ValidationVerdict>,
}

#[derive(Debug, Deserialize)]
struct ValidationVerdict {
    index: usize,
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    reason: Option<String>,
}

pub struct AiClient {
    backend: Option<Arc<dyn ChatBackend>>,
    quota: Arc<QuotaGovernor>,
    responses: LRUCache<String, QueryAnalysis>,
}

impl AiClient {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>, quota: Arc<QuotaGovernor>) -> Self {
        if backend.is_some() {
            info!("✅ Cliente IA inicializado con Groq");
        } else {
            warn!("⚠️ GROQ_API_KEY no configurada, usando generador local");
        }

        Self {
            backend,
            quota,
            responses: LRUCache::with_ttl(RESPONSE_CACHE_SIZE, Some(RESPONSE_CACHE_TTL)),
        }
    }

    fn cache_key(title: &str, channel: &str, history: &[String], strategy: SearchStrategy) -> String {
        let start = history.len().saturating_sub(5);
        let mut hasher = DefaultHasher::new();
        history[start..].hash(&mut hasher);
        format!("{}:{}:{:016x}:{}", title, channel, hasher.finish(), strategy.index())
    }

    /// Suggests the next search query for a reference track.
    pub async fn generate_query(
        &self,
        title: &str,
        channel: &str,
        history: &[String],
        strategy: SearchStrategy,
    ) -> QueryAnalysis {
        let Some(backend) = &self.backend else {
            debug!("⚠️ Usando fallback (sin backend de IA)");
            return fallback::fallback_query(title, channel, strategy);
        };

        let key = Self::cache_key(title, channel, history, strategy);
        if let Some(cached) = self.responses.get(&key) {
            debug!("✅ Cache HIT para query de autoplay");
            return cached;
        }

        if !self.quota.can_make_request(QuotaOperation::GroqAutoplay) {
            return fallback::fallback_query(title, channel, strategy);
        }
        let short_title: String = title.chars().take(40).collect();
        self.quota.track_operation(
            QuotaOperation::GroqAutoplay,
            format!("estrategia {} | {}", strategy.index(), short_title),
        );

        let request = ChatRequest {
            system: prompts::QUERY_SYSTEM.to_string(),
            prompt: prompts::query_prompt(title, channel, history, strategy),
            temperature: strategy.temperature(),
            max_tokens: 300,
            timeout: QUERY_TIMEOUT,
        };

        let analysis = backend
            .complete_json(request)
            .await
            .and_then(|content| parse_analysis(&content));

        match analysis {
            Ok(analysis) => {
                info!("🤖 IA generó query: '{}'", analysis.query);
                debug!(
                    "   Tipo: {} | Género: {} | Internacional: {} | {}",
                    analysis.kind, analysis.genre, analysis.is_international, analysis.explanation
                );
                self.responses.insert(key, analysis.clone());
                analysis
            }
            Err(e) => {
                error!("❌ Error al generar query con IA, usando fallback: {:#}", e);
                fallback::fallback_query(title, channel, strategy)
            }
        }
    }

    /// Labels each candidate. The result always has one verdict per
    /// candidate, in order.
    pub async fn validate(
        &self,
        candidates: &[ValidationCandidate],
        ref_title: &str,
        ref_channel: &str,
    ) -> Vec<Validation> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let approve_all = |reason: &str| vec![Validation::approve(reason); candidates.len()];

        let Some(backend) = &self.backend else {
            debug!("⚠️ IA no disponible, aprobando todos los videos");
            return approve_all("AI unavailable (auto-approved)");
        };

        if !self.quota.can_make_request(QuotaOperation::GroqValidation) {
            return approve_all("AI quota exhausted (auto-approved)");
        }
        self.quota.track_operation(
            QuotaOperation::GroqValidation,
            format!("validando {} videos", candidates.len()),
        );

        let request = ChatRequest {
            system: prompts::VALIDATION_SYSTEM.to_string(),
            prompt: prompts::validation_prompt(candidates, ref_title, ref_channel),
            temperature: 0.2,
            max_tokens: 500,
            timeout: VALIDATION_TIMEOUT,
        };

        let reply = backend
            .complete_json(request)
            .await
            .and_then(|content| Ok(serde_json::from_str::<ValidationReply>(&content)?));

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                error!("❌ Error en la validación IA, aprobando todos: {:#}", e);
                return approve_all("AI error (auto-approved)");
            }
        };

        candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let verdict = reply.validations.iter().find(|v| v.index == i + 1);
                let validation = match verdict {
                    Some(v) => Validation {
                        approved: v.approved,
                        reason: v
                            .reason
                            .clone()
                            .unwrap_or_else(|| "Validated by AI".to_string()),
                    },
                    None => Validation::approve("No verdict (auto-approved)"),
                };

                let status = if validation.approved { "✅" } else { "❌" };
                let short: String = candidate.title.chars().take(50).collect();
                info!("{} IA validación [{}]: \"{}\" - {}", status, i + 1, short, validation.reason);
                validation
            })
            .collect()
    }
}

fn parse_analysis(content: &str) -> Result<QueryAnalysis> {
    let analysis: QueryAnalysis =
        serde_json::from_str(content).context("malformed query JSON from AI")?;
    if analysis.query.trim().is_empty() {
        anyhow::bail!("AI returned an empty query");
    }
    Ok(analysis)
}
