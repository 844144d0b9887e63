//! Workflow transition engine (§4.6). A shipment's `workflow_state` only
//! ever moves along edges in the configured DAG; every move is recorded in
//! an append-only history before the shipment's current-state pointer is
//! mutated (invariant I4) so the pointer can always be rebuilt from history
//! if a crash lands between the two writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{ShipmentStoreError, WorkflowError};
use crate::types::{Direction, WorkflowTrigger};

use super::types::{TransitionTable, WorkflowState, WorkflowTransition};

/// What the engine needs from persistence: append a transition row, then
/// update the shipment's denormalized state/phase columns. Implemented by
/// `store::workflow::WorkflowStore` in production.
pub trait WorkflowHistoryStore {
    fn append_transition(&self, transition: &WorkflowTransition) -> Result<(), ShipmentStoreError>;
    fn set_shipment_state(
        &self,
        shipment_id: Uuid,
        state_code: &str,
        phase: crate::types::WorkflowPhase,
    ) -> Result<(), ShipmentStoreError>;
}

pub struct WorkflowEngine {
    states: HashMap<String, WorkflowState>,
    transitions: TransitionTable,
}

impl WorkflowEngine {
    pub fn new(states: Vec<WorkflowState>, transitions: TransitionTable) -> Self {
        Self {
            states: states.into_iter().map(|s| (s.code.clone(), s)).collect(),
            transitions,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(super::types::default_states(), super::types::default_transition_table())
    }

    fn state(&self, code: &str) -> Result<&WorkflowState, WorkflowError> {
        self.states.get(code).ok_or_else(|| WorkflowError::UnknownState(code.to_string()))
    }

    /// Move `shipment_id` from `from_state` to `to_state`, validating that
    /// the edge exists in the configured DAG, then persisting history
    /// before the shipment pointer (I4).
    pub fn transition_to(
        &self,
        store: &dyn WorkflowHistoryStore,
        shipment_id: Uuid,
        from_state: Option<&str>,
        to_state: &str,
        triggered_by: WorkflowTrigger,
        triggering_email_id: Option<Uuid>,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        let target = self.state(to_state)?;

        if let Some(from) = from_state {
            let current = self.state(from)?;
            if !current.next_states.contains(to_state) {
                return Err(WorkflowError::InvalidTransition {
                    shipment_id,
                    from: from.to_string(),
                    to: to_state.to_string(),
                    allowed: current.next_states.iter().cloned().collect(),
                });
            }
        }

        let transition = WorkflowTransition {
            shipment_id,
            from_state: from_state.map(String::from),
            to_state: to_state.to_string(),
            triggered_by,
            triggering_email_id,
            occurred_at,
            notes,
        };

        store.append_transition(&transition)?;
        store.set_shipment_state(shipment_id, to_state, target.phase)?;

        Ok(transition)
    }

    /// §4.6 "dual trigger": a transition can be driven either by a
    /// classified document type (direction-qualified) or by an email type
    /// (e.g. a cancellation notice with no attachment). Document-type
    /// triggers take priority when both would fire, since a document is
    /// stronger evidence than a subject-line classification.
    pub fn auto_transition_target(
        &self,
        document_type: Option<crate::types::DocumentType>,
        direction: Direction,
        email_type: Option<crate::types::EmailType>,
    ) -> Option<&str> {
        if let Some(document_type) = document_type {
            if let Some(target) = self.transitions.target_for_document(document_type, direction) {
                return Some(target);
            }
        }
        if let Some(email_type) = email_type {
            if let Some(target) = self.transitions.target_for_email_type(email_type) {
                return Some(target);
            }
        }
        None
    }

    /// Convenience wrapper combining target resolution with the actual
    /// transition. Returns `Ok(None)` when nothing in the configuration
    /// maps to a transition for this document/email — that is not an
    /// error, most inbound emails do not advance workflow state at all.
    pub fn auto_transition_from_document(
        &self,
        store: &dyn WorkflowHistoryStore,
        shipment_id: Uuid,
        current_state: &str,
        document_type: Option<crate::types::DocumentType>,
        direction: Direction,
        email_type: Option<crate::types::EmailType>,
        triggering_email_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<WorkflowTransition>, WorkflowError> {
        let Some(target) = self.auto_transition_target(document_type, direction, email_type) else {
            return Ok(None);
        };
        if target == current_state {
            return Ok(None);
        }
        let trigger = if document_type.is_some() {
            WorkflowTrigger::DocumentType
        } else {
            WorkflowTrigger::EmailType
        };
        let transition = self.transition_to(
            store,
            shipment_id,
            Some(current_state),
            target,
            trigger,
            Some(triggering_email_id),
            None,
            occurred_at,
        )?;
        Ok(Some(transition))
    }
}

/// Free function form of `auto_transition_target`, used by callers that
/// already hold a borrowed `WorkflowEngine` reference indirectly (e.g.
/// through an `Arc`) and want a non-method call site.
pub fn auto_transition_target(
    engine: &WorkflowEngine,
    document_type: Option<crate::types::DocumentType>,
    direction: Direction,
    email_type: Option<crate::types::EmailType>,
) -> Option<&str> {
    engine.auto_transition_target(document_type, direction, email_type)
}

pub fn transition_to(
    engine: &WorkflowEngine,
    store: &dyn WorkflowHistoryStore,
    shipment_id: Uuid,
    from_state: Option<&str>,
    to_state: &str,
    triggered_by: WorkflowTrigger,
    triggering_email_id: Option<Uuid>,
    notes: Option<String>,
    occurred_at: DateTime<Utc>,
) -> Result<WorkflowTransition, WorkflowError> {
    engine.transition_to(
        store,
        shipment_id,
        from_state,
        to_state,
        triggered_by,
        triggering_email_id,
        notes,
        occurred_at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        transitions: Mutex<Vec<WorkflowTransition>>,
        states: Mutex<HashMap<Uuid, String>>,
    }

    impl WorkflowHistoryStore for FakeStore {
        fn append_transition(&self, transition: &WorkflowTransition) -> Result<(), ShipmentStoreError> {
            self.transitions.lock().unwrap().push(transition.clone());
            Ok(())
        }
        fn set_shipment_state(
            &self,
            shipment_id: Uuid,
            state_code: &str,
            _phase: crate::types::WorkflowPhase,
        ) -> Result<(), ShipmentStoreError> {
            self.states.lock().unwrap().insert(shipment_id, state_code.to_string());
            Ok(())
        }
    }

    #[test]
    fn valid_transition_writes_history_then_state() {
        let engine = WorkflowEngine::with_defaults();
        let store = FakeStore::default();
        let shipment_id = Uuid::new_v4();
        let result = engine.transition_to(
            &store,
            shipment_id,
            Some("booking_confirmation_received"),
            "si_submitted",
            WorkflowTrigger::DocumentType,
            Some(Uuid::new_v4()),
            None,
            Utc::now(),
        );
        assert!(result.is_ok());
        assert_eq!(store.transitions.lock().unwrap().len(), 1);
        assert_eq!(
            store.states.lock().unwrap().get(&shipment_id).map(String::as_str),
            Some("si_submitted")
        );
    }

    #[test]
    fn invalid_edge_is_rejected_before_any_write() {
        let engine = WorkflowEngine::with_defaults();
        let store = FakeStore::default();
        let shipment_id = Uuid::new_v4();
        let result = engine.transition_to(
            &store,
            shipment_id,
            Some("booking_confirmation_received"),
            "pod_received",
            WorkflowTrigger::DocumentType,
            None,
            None,
            Utc::now(),
        );
        assert!(matches!(result, Err(WorkflowError::InvalidTransition { .. })));
        assert!(store.transitions.lock().unwrap().is_empty());
        assert!(store.states.lock().unwrap().is_empty());
    }

    #[test]
    fn dual_trigger_prefers_document_type_over_email_type() {
        let engine = WorkflowEngine::with_defaults();
        let target = engine.auto_transition_target(
            Some(crate::types::DocumentType::BillOfLading),
            Direction::Inbound,
            Some(crate::types::EmailType::Cancellation),
        );
        assert_eq!(target, Some("bl_confirmed"));
    }

    #[test]
    fn cancellation_email_with_no_document_still_transitions() {
        let engine = WorkflowEngine::with_defaults();
        let target = engine.auto_transition_target(None, Direction::Inbound, Some(crate::types::EmailType::Cancellation));
        assert_eq!(target, Some("booking_cancelled"));
    }
}
