//! Analyzer adapter: turns raw text into atomic, classified chunks and
//! synthesizes context summaries from ranked evidence.
//!
//! Transport failures propagate as errors (the job layer retries them);
//! malformed model output degrades to zero chunks plus a warning.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::constants::{DEFAULT_CONFIDENCE, DEFAULT_IMPORTANCE};
use crate::memory::types::MemoryType;

/// One extracted atomic statement.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub memory_type: MemoryType,
    pub tags: Vec<String>,
    pub related_entities: serde_json::Map<String, Value>,
    pub importance: u8,
    pub confidence: f32,
    pub event_time: Option<DateTime<Utc>>,
}

/// Analyzer output: chunks in input order plus extraction warnings.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
}

/// Extraction hints forwarded with the text.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeHints {
    pub source: Option<String>,
}

/// One evidence line handed to the synthesis prompt.
#[derive(Debug, Clone)]
pub struct EvidenceSnippet {
    pub memory_type: MemoryType,
    pub content: String,
}

/// Synthesized context for a downstream agent.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub struct Synthesis {
    pub summary: String,
    pub bullets: Vec<String>,
}

/// The LLM capability: extraction and summarization.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Split text into atomic statements; zero chunks means nothing worth
    /// retaining.
    async fn analyze(&self, text: &str, hints: &AnalyzeHints) -> Result<Analysis>;

    /// Summarize ranked evidence for a downstream agent.
    async fn summarize(
        &self,
        query: &str,
        app_context: Option<&Value>,
        evidence: &[EvidenceSnippet],
    ) -> Result<Synthesis>;
}

// ============================================================================
// Gemini implementation
// ============================================================================

const EXTRACTION_PROMPT: &str = r#"You are a memory extraction system. Analyze the input text and extract atomic pieces of information.

For each piece of information, determine:
1. "content": a concise, self-contained statement (include the subject if omitted)
2. "memory_type": one of
   - "fact": stable, objective information (name, skills, preferences)
   - "state": temporary, current conditions (mood, health, workload)
   - "episode": past events or experiences
   - "policy": standing rules or preferences the user wants applied
3. "tags": relevant classification tags (e.g. ["health", "work"])
4. "related_entities": object of named references (e.g. {"project": "atlas"})
5. "importance": 1-5 scale (5 = critical, 1 = trivial)
6. "confidence": 0.0-1.0 how certain you are about this extraction
7. "event_time": ISO-8601 timestamp when the statement describes a dated event, else null

Rules:
- Extract only meaningful, reusable information
- Skip pure greetings, acknowledgments, or trivial chat
- Normalize dates to absolute format when possible
- Combine related statements into one atomic statement

Output a JSON array. If no extractable information, return []."#;

const SYNTHESIS_PROMPT: &str = r#"Based on the user's query and their stored memories, synthesize a helpful context summary for a downstream agent.

Provide:
1. A concise summary paragraph
2. Key bullet points for the agent to consider

Output as JSON: {"summary": "...", "bullets": ["...", "..."]}"#;

/// Gemini-backed analyzer speaking the `generateContent` JSON protocol.
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: String, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
            ),
            api_key,
        }
    }

    async fn generate_json(&self, prompt: String, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": temperature,
            },
        });

        let response = self
            .client
            .post(&self.api_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("analyzer request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("analyzer returned HTTP {status}"));
        }

        let payload: Value = response.json().await.context("analyzer response body")?;
        payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("analyzer response missing candidate text"))
    }
}

/// Raw chunk shape as the model emits it; fields are validated and clamped
/// before becoming a `Chunk`.
#[derive(Debug, Deserialize)]
struct RawChunk {
    content: Option<String>,
    memory_type: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    related_entities: serde_json::Map<String, Value>,
    importance: Option<i64>,
    confidence: Option<f64>,
    event_time: Option<DateTime<Utc>>,
}

fn validate_chunks(raw: Vec<RawChunk>) -> Analysis {
    let mut analysis = Analysis::default();
    for raw_chunk in raw {
        let content = match raw_chunk.content {
            Some(c) if !c.trim().is_empty() => c,
            _ => continue,
        };
        let memory_type = raw_chunk
            .memory_type
            .as_deref()
            .and_then(MemoryType::parse)
            .unwrap_or(MemoryType::Fact);
        analysis.chunks.push(Chunk {
            content,
            memory_type,
            tags: raw_chunk.tags,
            related_entities: raw_chunk.related_entities,
            importance: raw_chunk
                .importance
                .map(|i| i.clamp(1, 5) as u8)
                .unwrap_or(DEFAULT_IMPORTANCE),
            confidence: raw_chunk
                .confidence
                .map(|c| c.clamp(0.0, 1.0) as f32)
                .unwrap_or(DEFAULT_CONFIDENCE),
            event_time: raw_chunk.event_time,
        });
    }
    analysis
}

fn format_evidence(evidence: &[EvidenceSnippet]) -> String {
    evidence
        .iter()
        .map(|e| format!("- [{}] {}", e.memory_type, e.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, text: &str, hints: &AnalyzeHints) -> Result<Analysis> {
        let source_line = hints
            .source
            .as_deref()
            .map(|s| format!("\nSource: {s}"))
            .unwrap_or_default();
        let prompt = format!("{EXTRACTION_PROMPT}{source_line}\n\n---\nInput text:\n{text}");

        let raw_text = self.generate_json(prompt, 0.2).await?;

        match serde_json::from_str::<Vec<RawChunk>>(&raw_text) {
            Ok(raw) => Ok(validate_chunks(raw)),
            Err(e) => {
                tracing::warn!(error = %e, "analyzer emitted malformed JSON");
                Ok(Analysis {
                    chunks: vec![],
                    warnings: vec!["Analyzer output was malformed; nothing extracted".to_string()],
                })
            }
        }
    }

    async fn summarize(
        &self,
        query: &str,
        app_context: Option<&Value>,
        evidence: &[EvidenceSnippet],
    ) -> Result<Synthesis> {
        let context_line = app_context
            .map(|c| format!("\nApplication state: {c}"))
            .unwrap_or_default();
        let prompt = format!(
            "{SYNTHESIS_PROMPT}\n\nUser query: {query}{context_line}\n\nRelevant memories:\n{}",
            format_evidence(evidence)
        );

        let raw_text = self.generate_json(prompt, 0.3).await?;
        serde_json::from_str(&raw_text).context("synthesis output was not valid JSON")
    }
}

// ============================================================================
// Heuristic implementation (development mode + tests)
// ============================================================================

/// Deterministic rule-based analyzer used when no LLM key is configured.
///
/// Splits on sentence boundaries and classifies each sentence from keyword
/// signals. Not a substitute for the model in production, but it keeps the
/// whole pipeline runnable offline and gives tests reproducible extractions.
#[derive(Debug, Default)]
pub struct HeuristicAnalyzer;

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "good morning", "good night",
];

const STATE_PATTERNS: &[&str] = &[
    "i'm ", "i am ", "feeling", "tired", "exhausted", "busy", "sick", "stressed", "currently",
    "right now", "today i feel",
];

const EPISODE_PATTERNS: &[&str] = &[
    "met ", "went ", "visited ", "attended ", "yesterday", "last week", "last month", "ago",
    " happened",
];

const POLICY_PATTERNS: &[&str] = &[
    "always ", "never ", "please ", "from now on", "make sure", "don't ", "do not ", "rule:",
    "policy:", "should ",
];

fn classify_sentence(sentence: &str) -> MemoryType {
    let lower = sentence.to_lowercase();
    if POLICY_PATTERNS.iter().any(|p| lower.contains(p)) {
        MemoryType::Policy
    } else if EPISODE_PATTERNS.iter().any(|p| lower.contains(p)) {
        MemoryType::Episode
    } else if STATE_PATTERNS.iter().any(|p| lower.contains(p)) {
        MemoryType::State
    } else {
        MemoryType::Fact
    }
}

fn is_noise(sentence: &str) -> bool {
    let lower = sentence.trim().to_lowercase();
    lower.len() < 3 || GREETINGS.iter().any(|g| lower == *g || lower == format!("{g}!"))
}

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    async fn analyze(&self, text: &str, _hints: &AnalyzeHints) -> Result<Analysis> {
        let mut analysis = Analysis::default();
        for sentence in text.split(['.', '!', '?', '\n']) {
            let sentence = sentence.trim();
            if sentence.is_empty() || is_noise(sentence) {
                continue;
            }
            let memory_type = classify_sentence(sentence);
            analysis.chunks.push(Chunk {
                content: format!("{sentence}."),
                memory_type,
                tags: vec![],
                related_entities: Default::default(),
                importance: DEFAULT_IMPORTANCE,
                confidence: 0.6,
                event_time: None,
            });
        }
        Ok(analysis)
    }

    async fn summarize(
        &self,
        _query: &str,
        _app_context: Option<&Value>,
        evidence: &[EvidenceSnippet],
    ) -> Result<Synthesis> {
        let bullets: Vec<String> = evidence.iter().map(|e| e.content.clone()).collect();
        Ok(Synthesis {
            summary: bullets.join(" "),
            bullets,
        })
    }
}
