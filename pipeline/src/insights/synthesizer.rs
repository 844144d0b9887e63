//! Synthesizer (§4.7 stages 3-5): merges rule-based detections with the
//! optional AI analyzer's suggestions, dedupes, ranks, and caps the total
//! priority boost before the result is handed to the store for persistence.

use capabilities::InsightAnalyzerCapability;
use uuid::Uuid;

use crate::types::{InsightSource, InsightStatus, InsightType, Severity};

use super::context::InsightContext;
use super::rules::RuleDetection;

#[derive(Debug, Clone)]
pub struct Insight {
    pub shipment_id: Uuid,
    pub insight_type: InsightType,
    pub severity: Severity,
    pub title: String,
    pub insight_text: String,
    pub confidence: u8,
    pub priority_boost: u8,
    pub source: InsightSource,
    pub status: InsightStatus,
}

/// §4.7 stage 3 gate: the AI analyzer only runs when at least one of these
/// holds, since an unconditional call on every shipment would make the LLM
/// provider a bottleneck on the common case (nothing noteworthy).
pub fn should_run_ai_analyzer(context: &InsightContext, rule_detections: &[RuleDetection]) -> bool {
    !rule_detections.is_empty()
        || context.shipper_is_high_tier()
        || context.related_shipments.len() >= 3
        || context.has_cutoff_within_days(7)
}

fn normalized_title_prefix(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

fn severity_from_label(label: &str) -> Severity {
    match label.to_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "low" => Severity::Low,
        _ => Severity::Medium,
    }
}

struct Candidate {
    insight_type: InsightType,
    severity: Severity,
    title: String,
    insight_text: String,
    confidence: u8,
    priority_boost: u8,
    source: InsightSource,
}

/// Run the optional AI analyzer (§4.7 stage 3) and merge its output with
/// the rule detections (stage 4), returning the top-ranked, boost-capped
/// insights ready for persistence (stage 5).
pub fn synthesize(
    shipment_id: Uuid,
    context: &InsightContext,
    rule_detections: Vec<RuleDetection>,
    ai_analyzer: Option<&dyn InsightAnalyzerCapability>,
) -> Vec<Insight> {
    let mut candidates: Vec<Candidate> = rule_detections
        .iter()
        .map(|d| Candidate {
            insight_type: d.category,
            severity: d.severity,
            title: d.title.clone(),
            insight_text: d.insight_text.clone(),
            confidence: d.confidence,
            priority_boost: d.priority_boost,
            source: InsightSource::Rules,
        })
        .collect();

    if should_run_ai_analyzer(context, &rule_detections) {
        if let Some(analyzer) = ai_analyzer.filter(|a| a.is_available()) {
            if let Ok(suggestions) = analyzer.analyze(&summarize_context(context)) {
                for suggestion in suggestions.into_iter().take(5) {
                    candidates.push(Candidate {
                        insight_type: InsightType::Prediction,
                        severity: severity_from_label(&suggestion.severity),
                        title: suggestion.title,
                        insight_text: suggestion.description,
                        confidence: suggestion.confidence,
                        priority_boost: suggestion.priority_boost.min(30),
                        source: InsightSource::Ai,
                    });
                }
            }
        }
    }

    dedupe(&mut candidates);
    rank(&mut candidates);
    candidates.truncate(5);
    cap_total_boost(&mut candidates);

    candidates
        .into_iter()
        .map(|c| Insight {
            shipment_id,
            insight_type: c.insight_type,
            severity: c.severity,
            title: c.title,
            insight_text: c.insight_text,
            confidence: c.confidence,
            priority_boost: c.priority_boost,
            source: c.source,
            status: InsightStatus::Active,
        })
        .collect()
}

fn dedupe(candidates: &mut Vec<Candidate>) {
    let mut kept: Vec<Candidate> = Vec::new();
    'outer: for candidate in candidates.drain(..) {
        let key = (candidate.severity, normalized_title_prefix(&candidate.title));
        for existing in kept.iter_mut() {
            let existing_key = (existing.severity, normalized_title_prefix(&existing.title));
            if existing_key == key {
                if existing.source != candidate.source {
                    existing.source = InsightSource::Hybrid;
                    existing.confidence = existing.confidence.max(candidate.confidence);
                    existing.priority_boost = existing.priority_boost.max(candidate.priority_boost);
                }
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    *candidates = kept;
}

fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.severity
            .weight()
            .cmp(&a.severity.weight())
            .then(b.confidence.cmp(&a.confidence))
            .then_with(|| match (a.source, b.source) {
                (InsightSource::Rules, InsightSource::Rules) => std::cmp::Ordering::Equal,
                (InsightSource::Rules, _) => std::cmp::Ordering::Less,
                (_, InsightSource::Rules) => std::cmp::Ordering::Greater,
                _ => std::cmp::Ordering::Equal,
            })
            .then(b.priority_boost.cmp(&a.priority_boost))
    });
}

fn cap_total_boost(candidates: &mut [Candidate]) {
    let total: u32 = candidates.iter().map(|c| c.priority_boost as u32).sum();
    if total <= 50 {
        return;
    }
    let scale = 50.0 / total as f32;
    for candidate in candidates.iter_mut() {
        candidate.priority_boost = ((candidate.priority_boost as f32) * scale).floor() as u8;
    }
}

fn summarize_context(context: &InsightContext) -> String {
    format!(
        "booking={} state={} documents={} amendments={} related_active={}",
        context.shipment.booking_number,
        context.shipment.workflow_state,
        context.document_count,
        context.amendment_count,
        context.related_shipments.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::context::HistoricalAverages;
    use crate::shipment::Shipment;
    use crate::types::{ShipmentStatus, WorkflowPhase};
    use chrono::Utc;

    fn base_shipment() -> Shipment {
        Shipment {
            id: Uuid::new_v4(),
            booking_number: "263815227".to_string(),
            mbl_number: None,
            hbl_number: None,
            carrier_code: None,
            vessel_name: None,
            voyage_number: None,
            port_of_loading: None,
            port_of_loading_code: None,
            port_of_discharge: None,
            port_of_discharge_code: None,
            etd: None,
            eta: None,
            si_cutoff: None,
            vgm_cutoff: None,
            cargo_cutoff: None,
            gate_cutoff: None,
            doc_cutoff: None,
            shipper_name: None,
            shipper_address: None,
            consignee_name: None,
            consignee_address: None,
            notify_party_name: None,
            notify_party_address: None,
            container_number_primary: None,
            container_numbers: Vec::new(),
            workflow_state: "booking_confirmation_received".to_string(),
            workflow_phase: WorkflowPhase::PreDeparture,
            status: ShipmentStatus::Booked,
            is_direct_carrier_confirmed: true,
            created_from_email_id: Uuid::new_v4(),
            booking_revision_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn base_context() -> InsightContext {
        InsightContext {
            shipment: base_shipment(),
            document_count: 1,
            amendment_count: 0,
            stakeholders: Vec::new(),
            related_shipments: Vec::new(),
            recent_communications: Vec::new(),
            days_since_last_inbound: None,
            historical_averages: HistoricalAverages::default(),
            now: Utc::now(),
        }
    }

    fn detection(code: &'static str, severity: Severity, confidence: u8, boost: u8, title: &str) -> RuleDetection {
        RuleDetection {
            code,
            category: InsightType::Risk,
            severity,
            priority_boost: boost,
            confidence,
            title: title.to_string(),
            insight_text: "text".to_string(),
            structured_action: super::super::rules::StructuredAction {
                urgency: crate::types::ActionUrgency::Soon,
                recommendation: "do something".to_string(),
            },
        }
    }

    #[test]
    fn ranks_by_severity_then_confidence() {
        let ctx = base_context();
        let detections = vec![
            detection("a", Severity::Low, 90, 5, "Low severity thing"),
            detection("b", Severity::Critical, 60, 10, "Critical severity thing"),
        ];
        let insights = synthesize(Uuid::new_v4(), &ctx, detections, None);
        assert_eq!(insights[0].severity, Severity::Critical);
    }

    #[test]
    fn total_boost_never_exceeds_fifty() {
        let ctx = base_context();
        let detections = vec![
            detection("a", Severity::Critical, 90, 30, "Overdue cutoff one"),
            detection("b", Severity::High, 85, 30, "Overdue cutoff two"),
        ];
        let insights = synthesize(Uuid::new_v4(), &ctx, detections, None);
        let total: u32 = insights.iter().map(|i| i.priority_boost as u32).sum();
        assert!(total <= 50);
    }

    #[test]
    fn duplicate_severity_and_title_prefix_collapses_to_one() {
        let ctx = base_context();
        let detections = vec![
            detection("a", Severity::High, 80, 10, "Overdue cutoff for booking X"),
            detection("b", Severity::High, 70, 10, "Overdue cutoff for booking Y"),
        ];
        let insights = synthesize(Uuid::new_v4(), &ctx, detections, None);
        assert_eq!(insights.len(), 1);
    }

    #[test]
    fn ai_analyzer_does_not_run_when_nothing_warrants_it() {
        let ctx = base_context();
        assert!(!should_run_ai_analyzer(&ctx, &[]));
    }
}
