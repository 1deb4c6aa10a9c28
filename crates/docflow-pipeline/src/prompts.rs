//! Tag-to-prompt-revision resolution (spec §4.4.2 step 2, §11.3).
//!
//! Out of scope as a prompt-management subsystem (§1) — this crate only
//! owns the seam the LLM handler calls through, the same way
//! `OcrProvider`/`LlmProvider` stand in for the out-of-scope engines
//! themselves.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex as StdMutex;

/// Resolves a document's tags to the prompt revisions the LLM handler
/// should run, and composes the final prompt text for one of them.
#[async_trait]
pub trait PromptResolver: Send + Sync {
    /// Ordered, tag-bound prompt-revision ids for `tag_ids`, in the order
    /// tag ids were supplied (spec §11.3: "first-seen-wins" — the caller
    /// still prepends the synthetic `"default"` id and dedups).
    async fn prompt_ids_for_tags(&self, tag_ids: &[String]) -> anyhow::Result<Vec<String>>;

    /// Compose the final prompt text for `prompt_id` against `document_text`.
    async fn compose(&self, prompt_id: &str, document_text: &str) -> anyhow::Result<String>;
}

/// An in-memory `tag_id -> [prompt_id]` mapping, good enough for tests and
/// for a single-process deployment with a static prompt catalogue.
#[derive(Default)]
pub struct InMemoryPromptResolver {
    by_tag: StdMutex<BTreeMap<String, Vec<String>>>,
}

impl InMemoryPromptResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(self, tag_id: impl Into<String>, prompt_ids: Vec<String>) -> Self {
        self.by_tag.lock().unwrap().insert(tag_id.into(), prompt_ids);
        self
    }
}

#[async_trait]
impl PromptResolver for InMemoryPromptResolver {
    async fn prompt_ids_for_tags(&self, tag_ids: &[String]) -> anyhow::Result<Vec<String>> {
        let by_tag = self.by_tag.lock().unwrap();
        let mut ids = Vec::new();
        for tag_id in tag_ids {
            if let Some(bound) = by_tag.get(tag_id) {
                ids.extend(bound.iter().cloned());
            }
        }
        Ok(ids)
    }

    async fn compose(&self, prompt_id: &str, document_text: &str) -> anyhow::Result<String> {
        Ok(format!("[{prompt_id}]\n{document_text}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_prompts_in_tag_order() {
        let resolver = InMemoryPromptResolver::new()
            .with_tag("invoice", vec!["invoice-extract".to_string()])
            .with_tag("legal", vec!["legal-summary".to_string(), "legal-risk".to_string()]);

        let ids = resolver
            .prompt_ids_for_tags(&["legal".to_string(), "invoice".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec!["legal-summary", "legal-risk", "invoice-extract"]);
    }

    #[tokio::test]
    async fn unbound_tags_resolve_to_nothing() {
        let resolver = InMemoryPromptResolver::new();
        let ids = resolver.prompt_ids_for_tags(&["unknown".to_string()]).await.unwrap();
        assert!(ids.is_empty());
    }
}
