//! The Shipment aggregate (§3) and the field-level diff/revision logic used
//! for booking amendments (§4.1, §4.5, S3). The Shipment is the root
//! aggregate: it owns its container list, cutoffs, party denormalizations,
//! workflow state, and transition history. It exposes IDs, not
//! back-references, to the documents linked to it (§9 "no cyclic object
//! graphs").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ShipmentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub booking_number: String,
    pub mbl_number: Option<String>,
    pub hbl_number: Option<String>,
    pub carrier_code: Option<String>,
    pub vessel_name: Option<String>,
    pub voyage_number: Option<String>,
    pub port_of_loading: Option<String>,
    pub port_of_loading_code: Option<String>,
    pub port_of_discharge: Option<String>,
    pub port_of_discharge_code: Option<String>,
    pub etd: Option<String>,
    pub eta: Option<String>,
    pub si_cutoff: Option<String>,
    pub vgm_cutoff: Option<String>,
    pub cargo_cutoff: Option<String>,
    pub gate_cutoff: Option<String>,
    pub doc_cutoff: Option<String>,
    pub shipper_name: Option<String>,
    pub shipper_address: Option<String>,
    pub consignee_name: Option<String>,
    pub consignee_address: Option<String>,
    pub notify_party_name: Option<String>,
    pub notify_party_address: Option<String>,
    pub container_number_primary: Option<String>,
    pub container_numbers: Vec<String>,
    pub workflow_state: String,
    pub workflow_phase: crate::types::WorkflowPhase,
    pub status: ShipmentStatus,
    pub is_direct_carrier_confirmed: bool,
    pub created_from_email_id: Uuid,
    pub booking_revision_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One field-level change recorded against a shipment, produced when an
/// amendment updates an existing value (§4.5, S3). Additions to the
/// supplemental spec sections (persisted revision history) ride on this
/// type rather than a separate audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRevision {
    pub shipment_id: Uuid,
    pub email_id: Uuid,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub occurred_at: DateTime<Utc>,
}

macro_rules! diffable_fields {
    ($($field:ident => $name:literal),+ $(,)?) => {
        /// Compute a field-level diff between the current shipment and an
        /// incoming amendment's extracted values. Only fields the amendment
        /// actually supplied are compared; a `None` incoming value never
        /// overwrites an existing one (§4.5: "do not overwrite with null").
        pub fn diff_amendment(
            shipment: &Shipment,
            email_id: Uuid,
            occurred_at: DateTime<Utc>,
            $($field: Option<&str>),+
        ) -> (Vec<ShipmentRevision>, Shipment) {
            let mut revisions = Vec::new();
            let mut updated = shipment.clone();
            $(
                if let Some(new_value) = $field {
                    if updated.$field.as_deref() != Some(new_value) {
                        revisions.push(ShipmentRevision {
                            shipment_id: shipment.id,
                            email_id,
                            field: $name.to_string(),
                            old_value: updated.$field.clone(),
                            new_value: new_value.to_string(),
                            occurred_at,
                        });
                        updated.$field = Some(new_value.to_string());
                    }
                }
            )+
            (revisions, updated)
        }
    };
}

diffable_fields!(
    mbl_number => "mbl_number",
    hbl_number => "hbl_number",
    vessel_name => "vessel_name",
    voyage_number => "voyage_number",
    etd => "etd",
    eta => "eta",
    si_cutoff => "si_cutoff",
    vgm_cutoff => "vgm_cutoff",
    cargo_cutoff => "cargo_cutoff",
    gate_cutoff => "gate_cutoff",
    doc_cutoff => "doc_cutoff",
);

/// Apply I5: only overwrite shipper/consignee/notify-party fields from a
/// document whose type allows it, and never with the forwarder's own
/// company name.
pub fn apply_party_update(
    shipment: &mut Shipment,
    email_id: Uuid,
    occurred_at: DateTime<Utc>,
    document_type: crate::types::DocumentType,
    shipper_name: Option<&str>,
    shipper_address: Option<&str>,
    consignee_name: Option<&str>,
    consignee_address: Option<&str>,
    notify_party_name: Option<&str>,
    notify_party_address: Option<&str>,
) -> Vec<ShipmentRevision> {
    if !document_type.may_overwrite_parties() {
        return Vec::new();
    }
    let mut revisions = Vec::new();
    macro_rules! apply {
        ($field:ident, $name:literal, $incoming:expr) => {
            if let Some(value) = $incoming {
                if shipment.$field.as_deref() != Some(value) {
                    revisions.push(ShipmentRevision {
                        shipment_id: shipment.id,
                        email_id,
                        field: $name.to_string(),
                        old_value: shipment.$field.clone(),
                        new_value: value.to_string(),
                        occurred_at,
                    });
                    shipment.$field = Some(value.to_string());
                }
            }
        };
    }
    apply!(shipper_name, "shipper_name", shipper_name);
    apply!(shipper_address, "shipper_address", shipper_address);
    apply!(consignee_name, "consignee_name", consignee_name);
    apply!(consignee_address, "consignee_address", consignee_address);
    apply!(notify_party_name, "notify_party_name", notify_party_name);
    apply!(notify_party_address, "notify_party_address", notify_party_address);
    revisions
}

pub fn add_container_number(shipment: &mut Shipment, container: &str) {
    if shipment.container_number_primary.is_none() {
        shipment.container_number_primary = Some(container.to_string());
    }
    if !shipment.container_numbers.iter().any(|c| c == container) {
        shipment.container_numbers.push(container.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_shipment() -> Shipment {
        Shipment {
            id: Uuid::new_v4(),
            booking_number: "263815227".to_string(),
            mbl_number: None,
            hbl_number: None,
            carrier_code: Some("hapag-lloyd".to_string()),
            vessel_name: None,
            voyage_number: None,
            port_of_loading: None,
            port_of_loading_code: None,
            port_of_discharge: None,
            port_of_discharge_code: None,
            etd: Some("2025-12-30".to_string()),
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
            workflow_phase: crate::types::WorkflowPhase::PreDeparture,
            status: ShipmentStatus::Booked,
            is_direct_carrier_confirmed: true,
            created_from_email_id: Uuid::new_v4(),
            booking_revision_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn s3_amendment_updates_etd_and_records_revision() {
        let shipment = base_shipment();
        let email_id = Uuid::new_v4();
        let (revisions, updated) = diff_amendment(
            &shipment,
            email_id,
            Utc::now(),
            None,
            None,
            None,
            None,
            Some("2026-01-05"),
            None,
            None,
            None,
            None,
            None,
            None,
        );
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].field, "etd");
        assert_eq!(revisions[0].old_value.as_deref(), Some("2025-12-30"));
        assert_eq!(revisions[0].new_value, "2026-01-05");
        assert_eq!(updated.etd.as_deref(), Some("2026-01-05"));
    }

    #[test]
    fn amendment_never_overwrites_with_null() {
        let shipment = base_shipment();
        let (_, updated) = diff_amendment(
            &shipment, Uuid::new_v4(), Utc::now(), None, None, None, None, None, None, None, None,
            None, None, None,
        );
        assert_eq!(updated.etd.as_deref(), Some("2025-12-30"));
    }

    #[test]
    fn party_update_rejected_for_non_hbl_document() {
        let mut shipment = base_shipment();
        let revisions = apply_party_update(
            &mut shipment,
            Uuid::new_v4(),
            Utc::now(),
            crate::types::DocumentType::BillOfLading,
            Some("Acme Corp"),
            None,
            None,
            None,
            None,
            None,
        );
        assert!(revisions.is_empty());
        assert!(shipment.shipper_name.is_none());
    }

    #[test]
    fn party_update_accepted_for_hbl() {
        let mut shipment = base_shipment();
        let revisions = apply_party_update(
            &mut shipment,
            Uuid::new_v4(),
            Utc::now(),
            crate::types::DocumentType::Hbl,
            Some("Acme Corp"),
            None,
            None,
            None,
            None,
            None,
        );
        assert_eq!(revisions.len(), 1);
        assert_eq!(shipment.shipper_name.as_deref(), Some("Acme Corp"));
    }
}
