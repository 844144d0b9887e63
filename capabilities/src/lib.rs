pub mod errors;
pub mod noop;
pub mod openai;
pub mod provider;

pub use errors::CapabilityError;
pub use noop::NoopCapability;
pub use openai::{OpenAiCapability, OpenAiConfig};
pub use provider::{
    cosine_similarity, ClassificationPrompt, ClassificationSuggestion, DocumentClassifierCapability,
    EmbeddingCapability, InsightAnalyzerCapability, SuggestedInsight,
};
