pub mod action;
pub mod context;
pub mod rules;
pub mod synthesizer;

pub use action::{determine_action, ActionDecision, ActionLookupEntry, ActionSource};
pub use context::InsightContext;
pub use rules::{detect as detect_rule_insights, RuleDetection, DETECTOR_CATALOG};
pub use synthesizer::{synthesize, Insight};
