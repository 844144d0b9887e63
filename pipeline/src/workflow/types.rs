//! Workflow configuration and history types (§3, §4.6). The state table
//! and transition table are loaded from the store and cached with a TTL
//! (§5); this module only carries the shapes, not the cache itself (see
//! `config::ConfigCache`, wired up in `workflow::engine`).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DocumentType, EmailType, WorkflowPhase, WorkflowTrigger};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub code: String,
    pub phase: WorkflowPhase,
    pub state_order: i32,
    pub is_optional: bool,
    pub is_milestone: bool,
    pub next_states: HashSet<String>,
    pub requires_document_types: HashSet<DocumentType>,
}

/// Append-only history row (§3 WorkflowTransition, invariant I4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub shipment_id: Uuid,
    pub from_state: Option<String>,
    pub to_state: String,
    pub triggered_by: WorkflowTrigger,
    pub triggering_email_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// `(documentType, direction) -> targetState` and `(emailType) -> targetState`
/// transition tables (§4.6 configuration).
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    pub by_document_type: Vec<(DocumentType, crate::types::Direction, String)>,
    pub by_email_type: Vec<(EmailType, String)>,
}

impl TransitionTable {
    pub fn target_for_document(
        &self,
        document_type: DocumentType,
        direction: crate::types::Direction,
    ) -> Option<&str> {
        self.by_document_type
            .iter()
            .find(|(dt, dir, _)| *dt == document_type && *dir == direction)
            .map(|(_, _, target)| target.as_str())
    }

    pub fn target_for_email_type(&self, email_type: EmailType) -> Option<&str> {
        self.by_email_type
            .iter()
            .find(|(et, _)| *et == email_type)
            .map(|(_, target)| target.as_str())
    }
}

/// The standard freight-forwarding milestone DAG (§4.6), used as the
/// in-process default when the store's `shipment_workflow_states` table is
/// empty (e.g. fresh environments, tests).
pub fn default_states() -> Vec<WorkflowState> {
    use WorkflowPhase::*;
    let mut states = vec![
        ("booking_confirmation_received", PreDeparture, 10, false, true, vec!["si_submitted", "vgm_submitted", "booking_cancelled"]),
        ("si_submitted", PreDeparture, 20, false, false, vec!["vgm_submitted", "bl_draft_issued", "booking_cancelled"]),
        ("vgm_submitted", PreDeparture, 30, false, false, vec!["bl_draft_issued", "booking_cancelled"]),
        ("bl_draft_issued", PreDeparture, 40, true, false, vec!["bl_confirmed", "booking_cancelled"]),
        ("bl_confirmed", PreDeparture, 50, false, true, vec!["departed", "booking_cancelled"]),
        ("departed", InTransit, 60, false, true, vec!["arrival_notice_received", "booking_cancelled"]),
        ("arrival_notice_received", Arrival, 70, false, true, vec!["customs_cleared", "booking_cancelled"]),
        ("customs_cleared", Delivery, 80, false, false, vec!["delivery_order_issued", "booking_cancelled"]),
        ("delivery_order_issued", Delivery, 90, false, false, vec!["pod_received", "booking_cancelled"]),
        ("pod_received", Delivery, 100, false, true, vec![]),
        ("booking_cancelled", Delivery, 0, false, true, vec![]),
    ];
    states
        .drain(..)
        .map(|(code, phase, order, optional, milestone, next)| WorkflowState {
            code: code.to_string(),
            phase,
            state_order: order,
            is_optional: optional,
            is_milestone: milestone,
            next_states: next.into_iter().map(String::from).collect(),
            requires_document_types: requires_for(code),
        })
        .collect()
}

fn requires_for(code: &str) -> HashSet<DocumentType> {
    use DocumentType::*;
    match code {
        "booking_confirmation_received" => [BookingConfirmation].into_iter().collect(),
        "si_submitted" => [SiSubmission, ShippingInstruction].into_iter().collect(),
        "vgm_submitted" => [VgmSubmission].into_iter().collect(),
        "bl_draft_issued" => [BlDraft, HblDraft].into_iter().collect(),
        "bl_confirmed" => [BillOfLading, Hbl].into_iter().collect(),
        "arrival_notice_received" => [ArrivalNotice].into_iter().collect(),
        "delivery_order_issued" => [DeliveryOrder].into_iter().collect(),
        "pod_received" => [Pod].into_iter().collect(),
        _ => HashSet::new(),
    }
}

pub fn default_transition_table() -> TransitionTable {
    use crate::types::Direction::*;
    TransitionTable {
        by_document_type: vec![
            (DocumentType::BookingConfirmation, Inbound, "booking_confirmation_received".to_string()),
            (DocumentType::SiSubmission, Outbound, "si_submitted".to_string()),
            (DocumentType::VgmSubmission, Outbound, "vgm_submitted".to_string()),
            (DocumentType::BlDraft, Inbound, "bl_draft_issued".to_string()),
            (DocumentType::BillOfLading, Inbound, "bl_confirmed".to_string()),
            (DocumentType::ArrivalNotice, Inbound, "arrival_notice_received".to_string()),
            (DocumentType::DeliveryOrder, Inbound, "delivery_order_issued".to_string()),
            (DocumentType::Pod, Inbound, "pod_received".to_string()),
            (DocumentType::BookingCancellation, Inbound, "booking_cancelled".to_string()),
        ],
        by_email_type: vec![
            (EmailType::Cancellation, "booking_cancelled".to_string()),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_states_are_monotonic_except_cancelled() {
        let states = default_states();
        let mut non_cancelled: Vec<_> = states.iter().filter(|s| s.code != "booking_cancelled").collect();
        non_cancelled.sort_by_key(|s| s.state_order);
        for pair in non_cancelled.windows(2) {
            assert!(pair[0].state_order < pair[1].state_order);
        }
    }
}
