//! Action determination (§4.7 "Action determination"), invoked per inbound
//! document email. Cascades through five possible sources in priority
//! order and never returns a confidence below 50 — the ultimate fallback is
//! "no action" at the floor confidence rather than an error, since the
//! caller always needs a decision to route on.

use capabilities::EmbeddingCapability;

use crate::types::{DocumentType, SenderCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    Lookup,
    DocumentTypeDefault,
    PhraseMatch,
    VectorIntent,
    HistoricalNeighbor,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ActionDecision {
    pub has_action: bool,
    pub confidence: u8,
    pub source: ActionSource,
    pub flip_keyword: Option<String>,
    pub reason: String,
}

impl ActionDecision {
    fn clamp(mut self) -> Self {
        self.confidence = self.confidence.clamp(50, 100);
        self
    }
}

/// One row of the `action_lookup` table: an exact `(documentType,
/// senderCategory)` match takes priority over everything else.
#[derive(Debug, Clone)]
pub struct ActionLookupEntry {
    pub document_type: DocumentType,
    pub sender_category: SenderCategory,
    pub has_action: bool,
    pub confidence: u8,
}

/// Per-documentType default plus keyword lists that flip the default the
/// other way when present in the body (§4.7: "keyword-based flip-to-action
/// / flip-to-no-action lists").
#[derive(Debug, Clone)]
pub struct DocumentTypeDefault {
    pub document_type: DocumentType,
    pub default_has_action: bool,
    pub default_confidence: u8,
    pub flip_to_action_keywords: Vec<&'static str>,
    pub flip_to_no_action_keywords: Vec<&'static str>,
}

const PHRASE_REQUIRES_ACTION: &[&str] = &["please respond", "please confirm", "kindly advise", "awaiting your"];
const PHRASE_NO_ACTION: &[&str] = &["confirmed", "fyi only", "no action required", "for your records"];

/// Pre-embedded anchor texts used for the optional vector-intent check
/// (§4.7 path d): each anchor is paired with whether it represents an
/// action-required intent.
pub struct IntentAnchor {
    pub embedding: Vec<f32>,
    pub has_action: bool,
}

pub struct ActionDeterminationInput<'a> {
    pub document_type: DocumentType,
    pub sender_category: SenderCategory,
    pub body: &'a str,
}

#[allow(clippy::too_many_arguments)]
pub fn determine_action(
    input: &ActionDeterminationInput<'_>,
    lookup_table: &[ActionLookupEntry],
    type_defaults: &[DocumentTypeDefault],
    embedding: Option<&dyn EmbeddingCapability>,
    anchors: &[IntentAnchor],
) -> ActionDecision {
    if let Some(decision) = lookup_exact(input, lookup_table) {
        return decision.clamp();
    }
    if let Some(decision) = document_type_default(input, type_defaults) {
        return decision.clamp();
    }
    if let Some(decision) = phrase_match(input) {
        return decision.clamp();
    }
    if let Some(decision) = vector_intent(input, embedding, anchors) {
        return decision.clamp();
    }
    fallback()
}

fn lookup_exact(input: &ActionDeterminationInput<'_>, table: &[ActionLookupEntry]) -> Option<ActionDecision> {
    let entry = table
        .iter()
        .find(|e| e.document_type == input.document_type && e.sender_category == input.sender_category)?;
    Some(ActionDecision {
        has_action: entry.has_action,
        confidence: entry.confidence,
        source: ActionSource::Lookup,
        flip_keyword: None,
        reason: format!(
            "exact lookup for ({:?}, {:?})",
            input.document_type, input.sender_category
        ),
    })
}

fn document_type_default(
    input: &ActionDeterminationInput<'_>,
    defaults: &[DocumentTypeDefault],
) -> Option<ActionDecision> {
    let rule = defaults.iter().find(|d| d.document_type == input.document_type)?;
    let lower = input.body.to_lowercase();

    if let Some(keyword) = rule.flip_to_action_keywords.iter().find(|kw| lower.contains(**kw)) {
        return Some(ActionDecision {
            has_action: true,
            confidence: rule.default_confidence,
            source: ActionSource::DocumentTypeDefault,
            flip_keyword: Some(keyword.to_string()),
            reason: format!("flip-to-action keyword '{keyword}' for {:?}", input.document_type),
        });
    }
    if let Some(keyword) = rule.flip_to_no_action_keywords.iter().find(|kw| lower.contains(**kw)) {
        return Some(ActionDecision {
            has_action: false,
            confidence: rule.default_confidence,
            source: ActionSource::DocumentTypeDefault,
            flip_keyword: Some(keyword.to_string()),
            reason: format!("flip-to-no-action keyword '{keyword}' for {:?}", input.document_type),
        });
    }
    Some(ActionDecision {
        has_action: rule.default_has_action,
        confidence: rule.default_confidence,
        source: ActionSource::DocumentTypeDefault,
        flip_keyword: None,
        reason: format!("default for {:?}", input.document_type),
    })
}

fn phrase_match(input: &ActionDeterminationInput<'_>) -> Option<ActionDecision> {
    let lower = input.body.to_lowercase();
    if let Some(phrase) = PHRASE_REQUIRES_ACTION.iter().find(|p| lower.contains(**p)) {
        return Some(ActionDecision {
            has_action: true,
            confidence: 65,
            source: ActionSource::PhraseMatch,
            flip_keyword: Some(phrase.to_string()),
            reason: format!("body contains action phrase '{phrase}'"),
        });
    }
    if let Some(phrase) = PHRASE_NO_ACTION.iter().find(|p| lower.contains(**p)) {
        return Some(ActionDecision {
            has_action: false,
            confidence: 60,
            source: ActionSource::PhraseMatch,
            flip_keyword: Some(phrase.to_string()),
            reason: format!("body contains no-action phrase '{phrase}'"),
        });
    }
    None
}

/// §4.7 path (d): embed the body and compare against pre-embedded anchors.
/// Requires at least 75% similarity to the winning anchor and a 5-point
/// margin over the runner-up to avoid flip-flopping on near-ties.
fn vector_intent(
    input: &ActionDeterminationInput<'_>,
    embedding: Option<&dyn EmbeddingCapability>,
    anchors: &[IntentAnchor],
) -> Option<ActionDecision> {
    let embedding_capability = embedding.filter(|e| e.is_available())?;
    if anchors.is_empty() {
        return None;
    }
    let body_vector = embedding_capability.embed(input.body).ok()?;
    let mut scored: Vec<(f32, bool)> = anchors
        .iter()
        .map(|anchor| (capabilities::cosine_similarity(&body_vector, &anchor.embedding), anchor.has_action))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let (best_score, best_has_action) = scored[0];
    if best_score < 0.75 {
        return None;
    }
    if let Some((second_score, _)) = scored.get(1) {
        if best_score - second_score < 0.05 {
            return None;
        }
    }
    Some(ActionDecision {
        has_action: best_has_action,
        confidence: (50.0 + best_score * 50.0).round() as u8,
        source: ActionSource::VectorIntent,
        flip_keyword: None,
        reason: format!("vector intent match at {:.2} similarity", best_score),
    })
}

/// Embed the canonical action/no-action phrase lists into `IntentAnchor`s
/// (§4.7 path d). Called once at startup when an `EmbeddingCapability` is
/// configured; a phrase whose embed call fails is dropped rather than
/// aborting the whole seed, since a partial anchor set still beats none.
pub fn seed_intent_anchors(embedding: &dyn EmbeddingCapability) -> Vec<IntentAnchor> {
    if !embedding.is_available() {
        return Vec::new();
    }
    PHRASE_REQUIRES_ACTION
        .iter()
        .map(|phrase| (*phrase, true))
        .chain(PHRASE_NO_ACTION.iter().map(|phrase| (*phrase, false)))
        .filter_map(|(phrase, has_action)| match embedding.embed(phrase) {
            Ok(vector) => Some(IntentAnchor { embedding: vector, has_action }),
            Err(err) => {
                tracing::warn!("failed to embed intent anchor '{phrase}': {err}");
                None
            }
        })
        .collect()
}

/// In-process defaults used when the `action_lookup` / `document_type_action_rules`
/// / `action_completion_keywords` tables are empty (fresh environments, tests),
/// mirroring `workflow::default_states`'s role for the workflow DAG.
pub fn default_lookup_table() -> Vec<ActionLookupEntry> {
    vec![
        ActionLookupEntry {
            document_type: DocumentType::ArrivalNotice,
            sender_category: SenderCategory::Carrier,
            has_action: true,
            confidence: 85,
        },
        ActionLookupEntry {
            document_type: DocumentType::BookingConfirmation,
            sender_category: SenderCategory::Carrier,
            has_action: false,
            confidence: 80,
        },
    ]
}

pub fn default_type_defaults() -> Vec<DocumentTypeDefault> {
    vec![
        DocumentTypeDefault {
            document_type: DocumentType::BookingAmendment,
            default_has_action: true,
            default_confidence: 70,
            flip_to_action_keywords: vec!["confirm", "please confirm"],
            flip_to_no_action_keywords: vec!["no action needed"],
        },
        DocumentTypeDefault {
            document_type: DocumentType::ExceptionNotice,
            default_has_action: true,
            default_confidence: 80,
            flip_to_action_keywords: Vec::new(),
            flip_to_no_action_keywords: vec!["resolved", "no longer applicable"],
        },
        DocumentTypeDefault {
            document_type: DocumentType::Invoice,
            default_has_action: false,
            default_confidence: 60,
            flip_to_action_keywords: vec!["payment overdue", "past due"],
            flip_to_no_action_keywords: Vec::new(),
        },
        DocumentTypeDefault {
            document_type: DocumentType::Pod,
            default_has_action: false,
            default_confidence: 75,
            flip_to_action_keywords: Vec::new(),
            flip_to_no_action_keywords: Vec::new(),
        },
    ]
}

fn fallback() -> ActionDecision {
    ActionDecision {
        has_action: false,
        confidence: 50,
        source: ActionSource::Fallback,
        flip_keyword: None,
        reason: "no lookup, default, phrase, or vector signal matched".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capabilities::CapabilityError;

    struct FakeEmbedder;

    impl EmbeddingCapability for FakeEmbedder {
        fn is_available(&self) -> bool {
            true
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
            if text.contains("please respond") || text.contains("get back to me") {
                Ok(vec![1.0, 0.0])
            } else if text.starts_with("confirmed") {
                Ok(vec![0.0, 1.0])
            } else {
                Ok(vec![0.5, 0.5])
            }
        }
    }

    #[test]
    fn seed_intent_anchors_is_empty_without_an_available_embedder() {
        struct Unavailable;
        impl EmbeddingCapability for Unavailable {
            fn is_available(&self) -> bool {
                false
            }
            fn embed(&self, _text: &str) -> Result<Vec<f32>, CapabilityError> {
                Ok(vec![])
            }
        }
        let anchors = seed_intent_anchors(&Unavailable);
        assert!(anchors.is_empty());
    }

    #[test]
    fn seed_intent_anchors_covers_every_canonical_phrase() {
        let anchors = seed_intent_anchors(&FakeEmbedder);
        assert_eq!(anchors.len(), PHRASE_REQUIRES_ACTION.len() + PHRASE_NO_ACTION.len());
    }

    #[test]
    fn vector_intent_wins_when_no_earlier_stage_matches() {
        let anchors = seed_intent_anchors(&FakeEmbedder);
        let input = ActionDeterminationInput {
            document_type: DocumentType::GeneralCorrespondence,
            sender_category: SenderCategory::Customer,
            body: "need you to get back to me soon with an update",
        };
        let decision = determine_action(&input, &[], &[], Some(&FakeEmbedder), &anchors);
        assert_eq!(decision.source, ActionSource::VectorIntent);
        assert!(decision.has_action);
    }

    #[test]
    fn exact_lookup_wins_over_defaults() {
        let lookup = vec![ActionLookupEntry {
            document_type: DocumentType::ArrivalNotice,
            sender_category: SenderCategory::Carrier,
            has_action: true,
            confidence: 90,
        }];
        let defaults = vec![DocumentTypeDefault {
            document_type: DocumentType::ArrivalNotice,
            default_has_action: false,
            default_confidence: 70,
            flip_to_action_keywords: Vec::new(),
            flip_to_no_action_keywords: Vec::new(),
        }];
        let input = ActionDeterminationInput {
            document_type: DocumentType::ArrivalNotice,
            sender_category: SenderCategory::Carrier,
            body: "arrival notice",
        };
        let decision = determine_action(&input, &lookup, &defaults, None, &[]);
        assert_eq!(decision.source, ActionSource::Lookup);
        assert!(decision.has_action);
        assert_eq!(decision.confidence, 90);
    }

    #[test]
    fn flip_keyword_overrides_document_type_default() {
        let defaults = vec![DocumentTypeDefault {
            document_type: DocumentType::Invoice,
            default_has_action: false,
            default_confidence: 60,
            flip_to_action_keywords: vec!["payment overdue"],
            flip_to_no_action_keywords: Vec::new(),
        }];
        let input = ActionDeterminationInput {
            document_type: DocumentType::Invoice,
            sender_category: SenderCategory::Broker,
            body: "Note: payment overdue on this invoice.",
        };
        let decision = determine_action(&input, &[], &defaults, None, &[]);
        assert_eq!(decision.source, ActionSource::DocumentTypeDefault);
        assert!(decision.has_action);
        assert_eq!(decision.flip_keyword.as_deref(), Some("payment overdue"));
    }

    #[test]
    fn phrase_match_used_when_no_rule_configured() {
        let input = ActionDeterminationInput {
            document_type: DocumentType::GeneralCorrespondence,
            sender_category: SenderCategory::Customer,
            body: "Please respond by Friday with the updated packing list.",
        };
        let decision = determine_action(&input, &[], &[], None, &[]);
        assert_eq!(decision.source, ActionSource::PhraseMatch);
        assert!(decision.has_action);
    }

    #[test]
    fn fallback_floor_is_fifty() {
        let input = ActionDeterminationInput {
            document_type: DocumentType::GeneralCorrespondence,
            sender_category: SenderCategory::Unknown,
            body: "Nothing notable here.",
        };
        let decision = determine_action(&input, &[], &[], None, &[]);
        assert_eq!(decision.source, ActionSource::Fallback);
        assert_eq!(decision.confidence, 50);
    }
}
