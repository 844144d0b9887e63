//! Workflow state/history persistence (§6 `shipment_workflow_states`,
//! `shipment_workflow_history`). Implements `workflow::WorkflowHistoryStore`
//! so `WorkflowEngine::transition_to` can be handed this store directly.

use uuid::Uuid;

use crate::errors::ShipmentStoreError;
use crate::types::WorkflowPhase;
use crate::workflow::engine::WorkflowHistoryStore;
use crate::workflow::types::{WorkflowState, WorkflowTransition};

use super::{get_conn, PgPool};

#[derive(Clone)]
pub struct WorkflowStore {
    pool: PgPool,
}

impl WorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn load_states(&self) -> Result<Vec<WorkflowState>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let rows = conn.query(
            "SELECT code, phase, state_order, is_optional, is_milestone, next_states FROM shipment_workflow_states",
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let phase: String = row.get(1);
                let next_states: Vec<String> = row.get(5);
                WorkflowState {
                    code: row.get(0),
                    phase: phase.parse().unwrap_or(WorkflowPhase::PreDeparture),
                    state_order: row.get(2),
                    is_optional: row.get(3),
                    is_milestone: row.get(4),
                    next_states: next_states.into_iter().collect(),
                    requires_document_types: Default::default(),
                }
            })
            .collect())
    }

    pub fn history_for_shipment(&self, shipment_id: Uuid) -> Result<Vec<WorkflowTransition>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let rows = conn.query(
            "SELECT shipment_id, from_state, to_state, triggered_by, triggering_email_id, occurred_at, notes
             FROM shipment_workflow_history WHERE shipment_id = $1 ORDER BY occurred_at ASC",
            &[&shipment_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let triggered_by: String = row.get(3);
                WorkflowTransition {
                    shipment_id: row.get(0),
                    from_state: row.get(1),
                    to_state: row.get(2),
                    triggered_by: triggered_by.parse().unwrap_or(crate::types::WorkflowTrigger::User),
                    triggering_email_id: row.get(4),
                    occurred_at: row.get(5),
                    notes: row.get(6),
                }
            })
            .collect())
    }
}

impl WorkflowHistoryStore for WorkflowStore {
    fn append_transition(&self, transition: &WorkflowTransition) -> Result<(), ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO shipment_workflow_history
                (id, shipment_id, from_state, to_state, triggered_by, triggering_email_id, occurred_at, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &Uuid::new_v4(),
                &transition.shipment_id,
                &transition.from_state,
                &transition.to_state,
                &transition.triggered_by.as_str(),
                &transition.triggering_email_id,
                &transition.occurred_at,
                &transition.notes,
            ],
        )?;
        Ok(())
    }

    fn set_shipment_state(
        &self,
        shipment_id: Uuid,
        state_code: &str,
        phase: WorkflowPhase,
    ) -> Result<(), ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        conn.execute(
            "UPDATE shipments SET workflow_state = $2, workflow_phase = $3, updated_at = now() WHERE id = $1",
            &[&shipment_id, &state_code, &phase.as_str()],
        )?;
        Ok(())
    }
}
