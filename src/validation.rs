//! Input validation at the API boundary.
//!
//! Prevents injection through identifiers, bounds payload sizes, and rejects
//! degenerate embedding vectors before they reach the store.

use anyhow::{anyhow, Result};

use crate::memory::types::Scope;

/// Maximum lengths for safety
pub const MAX_USER_ID_LENGTH: usize = 128;
pub const MAX_AGENT_ID_LENGTH: usize = 128;
pub const MAX_CONTENT_LENGTH: usize = 50_000; // 50KB
pub const MAX_TEXT_LENGTH: usize = 100_000; // raw ingest text
pub const MAX_TAG_LENGTH: usize = 256;
pub const MAX_TAGS_PER_MEMORY: usize = 50;
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 256;

/// Validate user_id
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(anyhow!("user_id cannot be empty"));
    }

    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(anyhow!(
            "user_id too long: {} chars (max: {})",
            user_id.len(),
            MAX_USER_ID_LENGTH
        ));
    }

    // Only allow alphanumeric, dash, underscore, at, dot
    if !user_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "user_id contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Validate agent_id (same charset as user_id)
pub fn validate_agent_id(agent_id: &str) -> Result<()> {
    if agent_id.is_empty() {
        return Err(anyhow!("agent_id cannot be empty"));
    }

    if agent_id.len() > MAX_AGENT_ID_LENGTH {
        return Err(anyhow!(
            "agent_id too long: {} chars (max: {})",
            agent_id.len(),
            MAX_AGENT_ID_LENGTH
        ));
    }

    if !agent_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || c == '.')
    {
        return Err(anyhow!(
            "agent_id contains invalid characters (allowed: alphanumeric, -, _, @, .)"
        ));
    }

    Ok(())
}

/// Scope consistency: `scope = agent` iff `agent_id` is present and non-empty.
pub fn validate_scope(scope: Scope, agent_id: Option<&str>) -> Result<()> {
    match (scope, agent_id) {
        (Scope::Agent, Some(id)) => validate_agent_id(id),
        (Scope::Agent, None) => Err(anyhow!("scope 'agent' requires agent_id")),
        (Scope::Global, None) => Ok(()),
        (Scope::Global, Some(_)) => Err(anyhow!("scope 'global' must not carry agent_id")),
    }
}

/// Validate memory_id (UUID format)
pub fn validate_memory_id(memory_id: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(memory_id).map_err(|e| anyhow!("Invalid memory_id UUID format: {e}"))
}

/// Validate content
pub fn validate_content(content: &str, allow_empty: bool) -> Result<()> {
    if !allow_empty && content.trim().is_empty() {
        return Err(anyhow!("content cannot be empty"));
    }

    if content.len() > MAX_CONTENT_LENGTH {
        return Err(anyhow!(
            "content too long: {} chars (max: {})",
            content.len(),
            MAX_CONTENT_LENGTH
        ));
    }

    Ok(())
}

/// Validate raw ingest text
pub fn validate_ingest_text(text: &str) -> Result<()> {
    if text.len() > MAX_TEXT_LENGTH {
        return Err(anyhow!(
            "text too long: {} chars (max: {})",
            text.len(),
            MAX_TEXT_LENGTH
        ));
    }
    Ok(())
}

/// Validate importance (1-5 scale)
pub fn validate_importance(importance: u8) -> Result<()> {
    if !(1..=5).contains(&importance) {
        return Err(anyhow!("importance must be between 1 and 5, got: {importance}"));
    }
    Ok(())
}

/// Validate confidence (0.0-1.0)
pub fn validate_confidence(confidence: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) || !confidence.is_finite() {
        return Err(anyhow!(
            "confidence must be between 0.0 and 1.0, got: {confidence}"
        ));
    }
    Ok(())
}

/// Validate tags list
pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS_PER_MEMORY {
        return Err(anyhow!(
            "Too many tags: {} (max: {})",
            tags.len(),
            MAX_TAGS_PER_MEMORY
        ));
    }

    for tag in tags {
        if tag.is_empty() {
            return Err(anyhow!("Tag cannot be empty"));
        }
        if tag.len() > MAX_TAG_LENGTH {
            return Err(anyhow!(
                "Tag too long: {} chars (max: {})",
                tag.len(),
                MAX_TAG_LENGTH
            ));
        }
        if tag.chars().any(|c| c.is_control()) {
            return Err(anyhow!("Tag contains invalid control characters"));
        }
    }

    Ok(())
}

/// Validate embeddings vector against the configured dimension
pub fn validate_embedding(embedding: &[f32], expected_dim: usize) -> Result<()> {
    if embedding.len() != expected_dim {
        return Err(anyhow!(
            "embedding dimension mismatch: {} (expected: {})",
            embedding.len(),
            expected_dim
        ));
    }

    if embedding.iter().any(|&v| !v.is_finite()) {
        return Err(anyhow!("embedding contains NaN or Inf values"));
    }

    Ok(())
}

/// Validate an idempotency key
pub fn validate_idempotency_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(anyhow!("Idempotency-Key cannot be empty"));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(anyhow!(
            "Idempotency-Key too long: {} chars (max: {})",
            key.len(),
            MAX_IDEMPOTENCY_KEY_LENGTH
        ));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(anyhow!("Idempotency-Key contains control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_user_id() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("user-123").is_ok());
        assert!(validate_user_id("00000000-0000-0000-0000-000000000001").is_ok());
        assert!(validate_user_id("user@example.com").is_ok());
    }

    #[test]
    fn test_invalid_user_id() {
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("user/123").is_err());
        assert!(validate_user_id(&"a".repeat(200)).is_err());
    }

    #[test]
    fn test_scope_consistency() {
        assert!(validate_scope(Scope::Global, None).is_ok());
        assert!(validate_scope(Scope::Agent, Some("finance")).is_ok());
        // agent scope without agent_id
        assert!(validate_scope(Scope::Agent, None).is_err());
        // global scope with agent_id
        assert!(validate_scope(Scope::Global, Some("finance")).is_err());
        // empty agent_id is as bad as a missing one
        assert!(validate_scope(Scope::Agent, Some("")).is_err());
    }

    #[test]
    fn test_content_bounds() {
        assert!(validate_content("Hello world", false).is_ok());
        assert!(validate_content("", true).is_ok());
        assert!(validate_content("", false).is_err());
        assert!(validate_content(&"x".repeat(100_000), false).is_err());
    }

    #[test]
    fn test_importance_and_confidence() {
        assert!(validate_importance(1).is_ok());
        assert!(validate_importance(5).is_ok());
        assert!(validate_importance(0).is_err());
        assert!(validate_importance(6).is_err());

        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(-0.1).is_err());
        assert!(validate_confidence(f32::NAN).is_err());
    }

    #[test]
    fn test_embedding_dimension() {
        assert!(validate_embedding(&vec![0.5; 768], 768).is_ok());
        assert!(validate_embedding(&vec![0.5; 384], 768).is_err());
        assert!(validate_embedding(&[f32::NAN; 4], 4).is_err());
    }

    #[test]
    fn test_tags() {
        let ok: Vec<String> = vec!["health".into(), "work".into()];
        assert!(validate_tags(&ok).is_ok());
        assert!(validate_tags(&vec!["".to_string()]).is_err());
        let too_many: Vec<String> = (0..100).map(|i| format!("tag{i}")).collect();
        assert!(validate_tags(&too_many).is_err());
    }

    #[test]
    fn test_idempotency_key() {
        assert!(validate_idempotency_key("abc").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key(&"k".repeat(500)).is_err());
    }
}
