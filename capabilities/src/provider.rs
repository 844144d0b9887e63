use serde::{Deserialize, Serialize};

use crate::errors::CapabilityError;

/// Text the pipeline hands to an LLM-backed capability: email subject, body,
/// and any concatenated PDF/attachment text, plus the closed set of labels
/// the caller is willing to accept back.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationPrompt<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    pub attachment_text: &'a str,
    pub candidate_labels: &'a [&'a str],
}

/// Raw suggestion from an LLM classifier. The pipeline is responsible for
/// validating `label` against its closed enum before trusting it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationSuggestion {
    pub label: String,
    pub confidence: u8,
}

/// One insight suggested by the optional AI analyzer. Structurally mirrors
/// the rule-based detector output so the synthesizer can merge both sources
/// without caring which one produced a given item.
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestedInsight {
    pub title: String,
    pub description: String,
    pub severity: String,
    pub confidence: u8,
    pub priority_boost: u8,
}

/// Optional LLM capability used as a fallback when the deterministic
/// classification cascade (§4.3) and the pattern-detector catalog (§4.7)
/// fail to produce a confident answer. Every call site must check
/// `is_available()` before calling `classify`/`analyze`; no code path may
/// assume a capability is present.
pub trait DocumentClassifierCapability: Send + Sync {
    fn is_available(&self) -> bool;

    fn classify(
        &self,
        prompt: &ClassificationPrompt<'_>,
    ) -> Result<Option<ClassificationSuggestion>, CapabilityError>;
}

/// Optional AI insight analyzer (§4.7 stage 3).
pub trait InsightAnalyzerCapability: Send + Sync {
    fn is_available(&self) -> bool;

    fn analyze(&self, context_summary: &str) -> Result<Vec<SuggestedInsight>, CapabilityError>;
}

/// Optional embedding capability used for vector-intent action detection
/// (§4.7 action determination, path (d)).
pub trait EmbeddingCapability: Send + Sync {
    fn is_available(&self) -> bool;

    fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}

/// Cosine similarity between two equal-length embeddings. Returns 0.0 for
/// mismatched lengths or a zero vector rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
