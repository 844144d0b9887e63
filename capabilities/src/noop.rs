//! No-op capability implementations. Used when the pipeline is run without
//! any LLM/embedding provider configured; every caller must already handle
//! `is_available() == false`, so these simply report unavailable rather than
//! fabricating output.

use crate::errors::CapabilityError;
use crate::provider::{
    ClassificationPrompt, ClassificationSuggestion, DocumentClassifierCapability,
    EmbeddingCapability, InsightAnalyzerCapability, SuggestedInsight,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCapability;

impl DocumentClassifierCapability for NoopCapability {
    fn is_available(&self) -> bool {
        false
    }

    fn classify(
        &self,
        _prompt: &ClassificationPrompt<'_>,
    ) -> Result<Option<ClassificationSuggestion>, CapabilityError> {
        Ok(None)
    }
}

impl InsightAnalyzerCapability for NoopCapability {
    fn is_available(&self) -> bool {
        false
    }

    fn analyze(&self, _context_summary: &str) -> Result<Vec<SuggestedInsight>, CapabilityError> {
        Ok(Vec::new())
    }
}

impl EmbeddingCapability for NoopCapability {
    fn is_available(&self) -> bool {
        false
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, CapabilityError> {
        Err(CapabilityError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_capability_is_never_available() {
        let capability = NoopCapability;
        assert!(!DocumentClassifierCapability::is_available(&capability));
        assert!(!InsightAnalyzerCapability::is_available(&capability));
        assert!(!EmbeddingCapability::is_available(&capability));
    }
}
