//! Synthesizer: ranked evidence to `{summary, bullets}`.
//!
//! A thin formatter over the Analyzer's summarize capability. If the model
//! is unreachable the output degrades deterministically: bullets become the
//! evidence contents verbatim and the summary joins the top bullets.

use crate::adapters::{Adapters, EvidenceSnippet, Synthesis};
use crate::memory::ScoredMemory;

/// How many bullets the degraded summary stitches together.
const FALLBACK_SUMMARY_BULLETS: usize = 3;

pub struct Synthesizer {
    adapters: Adapters,
}

impl Synthesizer {
    pub fn new(adapters: Adapters) -> Self {
        Self { adapters }
    }

    /// Summarize ranked evidence for a downstream agent.
    #[tracing::instrument(skip(self, evidence), fields(evidence_len = evidence.len()))]
    pub async fn synthesize(
        &self,
        query: &str,
        app_context: Option<&serde_json::Value>,
        evidence: &[ScoredMemory],
    ) -> Synthesis {
        if evidence.is_empty() {
            return Synthesis {
                summary: "No relevant memories found for this query.".to_string(),
                bullets: vec![],
            };
        }

        let snippets: Vec<EvidenceSnippet> = evidence
            .iter()
            .map(|s| EvidenceSnippet {
                memory_type: s.memory.memory_type,
                content: s.memory.content.clone(),
            })
            .collect();

        match self.adapters.summarize(query, app_context, &snippets).await {
            Ok(synthesis) => synthesis,
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed, using verbatim fallback");
                fallback(&snippets)
            }
        }
    }
}

/// Deterministic degradation path.
fn fallback(snippets: &[EvidenceSnippet]) -> Synthesis {
    let bullets: Vec<String> = snippets.iter().map(|s| s.content.clone()).collect();
    let summary = bullets
        .iter()
        .take(FALLBACK_SUMMARY_BULLETS)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    Synthesis { summary, bullets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;

    #[test]
    fn test_fallback_is_verbatim() {
        let snippets = vec![
            EvidenceSnippet {
                memory_type: MemoryType::Fact,
                content: "User lives in Tokyo.".into(),
            },
            EvidenceSnippet {
                memory_type: MemoryType::Policy,
                content: "Always reply in English.".into(),
            },
        ];
        let synthesis = fallback(&snippets);
        assert_eq!(synthesis.bullets.len(), 2);
        assert_eq!(synthesis.bullets[0], "User lives in Tokyo.");
        assert!(synthesis.summary.contains("Tokyo"));
        assert!(synthesis.summary.contains("English"));
    }

    #[test]
    fn test_fallback_summary_caps_bullets() {
        let snippets: Vec<EvidenceSnippet> = (0..10)
            .map(|i| EvidenceSnippet {
                memory_type: MemoryType::Fact,
                content: format!("item{i}"),
            })
            .collect();
        let synthesis = fallback(&snippets);
        assert_eq!(synthesis.bullets.len(), 10);
        assert!(synthesis.summary.contains("item2"));
        assert!(!synthesis.summary.contains("item3"));
    }
}
