//! Shipment persistence (§6 `shipments`, `shipment_revisions`,
//! `shipment_documents`). Implements `linking::ShipmentLookup` directly so
//! the orchestrator can hand this store to the linking stage without an
//! adapter.

use uuid::Uuid;

use crate::errors::ShipmentStoreError;
use crate::linking::{LinkMethod, ShipmentDocumentLink, ShipmentLookup};
use crate::shipment::{Shipment, ShipmentRevision};
use crate::types::{ShipmentStatus, WorkflowPhase};

use super::{get_conn, PgPool};

#[derive(Clone)]
pub struct ShipmentStore {
    pool: PgPool,
}

impl ShipmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn find_by_id(&self, shipment_id: Uuid) -> Result<Option<Shipment>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let row = conn.query_opt(SELECT_SHIPMENT, &[&shipment_id])?;
        Ok(row.map(row_to_shipment))
    }

    pub fn find_by_booking_number(&self, booking_number: &str) -> Result<Option<Shipment>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let row = conn.query_opt(
            "SELECT id, booking_number, mbl_number, hbl_number, carrier_code, vessel_name, voyage_number,
                    port_of_loading, port_of_loading_code, port_of_discharge, port_of_discharge_code,
                    etd, eta, si_cutoff, vgm_cutoff, cargo_cutoff, gate_cutoff, doc_cutoff,
                    shipper_name, shipper_address, consignee_name, consignee_address,
                    notify_party_name, notify_party_address, container_number_primary, container_numbers,
                    workflow_state, workflow_phase, status, is_direct_carrier_confirmed,
                    created_from_email_id, booking_revision_count, created_at, updated_at
             FROM shipments WHERE booking_number = $1",
            &[&booking_number],
        )?;
        Ok(row.map(row_to_shipment))
    }

    /// Create a new shipment, serialized by the caller via a keyed lock on
    /// `booking_number` (§5). A unique-constraint violation here means a
    /// concurrent creator won the race; the caller is expected to re-read
    /// and treat it as an update (`ConflictingWrite`, §7).
    pub fn create(&self, shipment: &Shipment) -> Result<(), ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let result = conn.execute(
            "INSERT INTO shipments (
                id, booking_number, mbl_number, hbl_number, carrier_code, vessel_name, voyage_number,
                port_of_loading, port_of_loading_code, port_of_discharge, port_of_discharge_code,
                etd, eta, si_cutoff, vgm_cutoff, cargo_cutoff, gate_cutoff, doc_cutoff,
                shipper_name, shipper_address, consignee_name, consignee_address,
                notify_party_name, notify_party_address, container_number_primary, container_numbers,
                workflow_state, workflow_phase, status, is_direct_carrier_confirmed,
                created_from_email_id, booking_revision_count, created_at, updated_at
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,
                       $23,$24,$25,$26,$27,$28,$29,$30,$31,$32,$33,$34)",
            &[
                &shipment.id,
                &shipment.booking_number,
                &shipment.mbl_number,
                &shipment.hbl_number,
                &shipment.carrier_code,
                &shipment.vessel_name,
                &shipment.voyage_number,
                &shipment.port_of_loading,
                &shipment.port_of_loading_code,
                &shipment.port_of_discharge,
                &shipment.port_of_discharge_code,
                &shipment.etd,
                &shipment.eta,
                &shipment.si_cutoff,
                &shipment.vgm_cutoff,
                &shipment.cargo_cutoff,
                &shipment.gate_cutoff,
                &shipment.doc_cutoff,
                &shipment.shipper_name,
                &shipment.shipper_address,
                &shipment.consignee_name,
                &shipment.consignee_address,
                &shipment.notify_party_name,
                &shipment.notify_party_address,
                &shipment.container_number_primary,
                &shipment.container_numbers,
                &shipment.workflow_state,
                &shipment.workflow_phase.as_str(),
                &shipment.status.as_str(),
                &shipment.is_direct_carrier_confirmed,
                &shipment.created_from_email_id,
                &(shipment.booking_revision_count as i32),
                &shipment.created_at,
                &shipment.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(ShipmentStoreError::DuplicateBooking(shipment.booking_number.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a diff produced by `shipment::diff_amendment` or
    /// `shipment::apply_party_update`: write the updated fields and append
    /// the revision rows in the same transaction (S3).
    pub fn apply_revisions(
        &self,
        updated: &Shipment,
        revisions: &[ShipmentRevision],
    ) -> Result<(), ShipmentStoreError> {
        if revisions.is_empty() {
            return Ok(());
        }
        let mut conn = get_conn(&self.pool)?;
        let mut tx = conn.transaction()?;

        tx.execute(
            "UPDATE shipments SET
                mbl_number = $2, hbl_number = $3, vessel_name = $4, voyage_number = $5,
                etd = $6, eta = $7, si_cutoff = $8, vgm_cutoff = $9, cargo_cutoff = $10,
                gate_cutoff = $11, doc_cutoff = $12, shipper_name = $13, shipper_address = $14,
                consignee_name = $15, consignee_address = $16, notify_party_name = $17,
                notify_party_address = $18, container_number_primary = $19, container_numbers = $20,
                booking_revision_count = $21, updated_at = $22
             WHERE id = $1",
            &[
                &updated.id,
                &updated.mbl_number,
                &updated.hbl_number,
                &updated.vessel_name,
                &updated.voyage_number,
                &updated.etd,
                &updated.eta,
                &updated.si_cutoff,
                &updated.vgm_cutoff,
                &updated.cargo_cutoff,
                &updated.gate_cutoff,
                &updated.doc_cutoff,
                &updated.shipper_name,
                &updated.shipper_address,
                &updated.consignee_name,
                &updated.consignee_address,
                &updated.notify_party_name,
                &updated.notify_party_address,
                &updated.container_number_primary,
                &updated.container_numbers,
                &(updated.booking_revision_count as i32),
                &updated.updated_at,
            ],
        )?;

        for revision in revisions {
            tx.execute(
                "INSERT INTO shipment_revisions (id, shipment_id, email_id, field, old_value, new_value, occurred_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &Uuid::new_v4(),
                    &revision.shipment_id,
                    &revision.email_id,
                    &revision.field,
                    &revision.old_value,
                    &revision.new_value,
                    &revision.occurred_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn create_link(&self, link: &ShipmentDocumentLink) -> Result<Uuid, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO shipment_documents
                (id, shipment_id, email_id, document_type, is_primary, link_method, link_confidence, booking_number_extracted)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &id,
                &link.shipment_id,
                &link.email_id,
                &link.document_type.as_str(),
                &link.is_primary,
                &link_method_str(&link.link_method),
                &(link.link_confidence as i16),
                &link.booking_number_extracted,
            ],
        )?;
        Ok(id)
    }

    pub fn document_count(&self, shipment_id: Uuid) -> Result<usize, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let row = conn.query_one(
            "SELECT COUNT(*) FROM shipment_documents WHERE shipment_id = $1",
            &[&shipment_id],
        )?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as usize)
    }

    /// S6: email ids currently linked to more than one distinct shipment,
    /// the set `dedupe_links` needs to resolve down to one.
    pub fn emails_with_multiple_links(&self) -> Result<Vec<Uuid>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let rows = conn.query(
            "SELECT email_id FROM shipment_documents
             WHERE shipment_id IS NOT NULL
             GROUP BY email_id
             HAVING COUNT(DISTINCT shipment_id) > 1",
            &[],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Row data needed to build a `linking::DedupeCandidate` per shipment
    /// this email is currently linked to (S6).
    pub fn dedupe_rows_for_email(
        &self,
        email_id: Uuid,
    ) -> Result<Vec<(Uuid, Option<Uuid>, String, u8, chrono::DateTime<chrono::Utc>)>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let rows = conn.query(
            "SELECT sd.shipment_id, s.created_from_email_id, COALESCE(sd.booking_number_extracted, ''),
                    sd.link_confidence, s.created_at
             FROM shipment_documents sd
             JOIN shipments s ON s.id = sd.shipment_id
             WHERE sd.email_id = $1 AND sd.shipment_id IS NOT NULL",
            &[&email_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let link_confidence: i16 = row.get(3);
                (row.get(0), row.get(1), row.get(2), link_confidence.max(0) as u8, row.get(4))
            })
            .collect())
    }

    /// Keep only the dedupe winner's link row for this email, dropping the
    /// rest (S6). Orphan rows (`shipment_id IS NULL`) for the same email
    /// are untouched since they aren't part of the duplicate set.
    pub fn retain_only_link(&self, email_id: Uuid, keep_shipment_id: Uuid) -> Result<u64, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let deleted = conn.execute(
            "DELETE FROM shipment_documents
             WHERE email_id = $1 AND shipment_id IS NOT NULL AND shipment_id != $2",
            &[&email_id, &keep_shipment_id],
        )?;
        Ok(deleted)
    }

    /// S4: promote an orphan link once a matching shipment appears.
    pub fn promote_orphan_links(
        &self,
        booking_number: &str,
        mbl_number: Option<&str>,
        hbl_number: Option<&str>,
        shipment_id: Uuid,
    ) -> Result<u64, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let updated = conn.execute(
            "UPDATE shipment_documents
             SET shipment_id = $1
             WHERE shipment_id IS NULL
               AND (booking_number_extracted = $2
                    OR ($3::text IS NOT NULL AND booking_number_extracted = $3)
                    OR ($4::text IS NOT NULL AND booking_number_extracted = $4))",
            &[&shipment_id, &booking_number, &mbl_number, &hbl_number],
        )?;
        Ok(updated)
    }
}

impl ShipmentLookup for ShipmentStore {
    fn find_by_booking_number(&self, booking_number: &str) -> Option<Uuid> {
        self.find_by_booking_number(booking_number).ok().flatten().map(|s| s.id)
    }

    fn find_by_mbl_number(&self, mbl_number: &str) -> Option<Uuid> {
        let mut conn = get_conn(&self.pool).ok()?;
        conn.query_opt("SELECT id FROM shipments WHERE mbl_number = $1", &[&mbl_number])
            .ok()
            .flatten()
            .map(|row| row.get(0))
    }

    fn find_by_hbl_number(&self, hbl_number: &str) -> Option<Uuid> {
        let mut conn = get_conn(&self.pool).ok()?;
        conn.query_opt("SELECT id FROM shipments WHERE hbl_number = $1", &[&hbl_number])
            .ok()
            .flatten()
            .map(|row| row.get(0))
    }

    fn find_by_container_number(&self, container_number: &str) -> Option<Uuid> {
        let mut conn = get_conn(&self.pool).ok()?;
        conn.query_opt(
            "SELECT id FROM shipments WHERE $1 = ANY(container_numbers)",
            &[&container_number],
        )
        .ok()
        .flatten()
        .map(|row| row.get(0))
    }
}

fn link_method_str(method: &LinkMethod) -> &'static str {
    match method {
        LinkMethod::BookingNumber => "booking_number",
        LinkMethod::MblNumber => "mbl_number",
        LinkMethod::HblNumber => "hbl_number",
        LinkMethod::ContainerNumber => "container_number",
        LinkMethod::Orphan => "orphan",
    }
}

fn is_unique_violation(err: &postgres::Error) -> bool {
    err.code().map(|c| c.code() == "23505").unwrap_or(false)
}

const SELECT_SHIPMENT: &str = "SELECT id, booking_number, mbl_number, hbl_number, carrier_code, vessel_name, voyage_number,
        port_of_loading, port_of_loading_code, port_of_discharge, port_of_discharge_code,
        etd, eta, si_cutoff, vgm_cutoff, cargo_cutoff, gate_cutoff, doc_cutoff,
        shipper_name, shipper_address, consignee_name, consignee_address,
        notify_party_name, notify_party_address, container_number_primary, container_numbers,
        workflow_state, workflow_phase, status, is_direct_carrier_confirmed,
        created_from_email_id, booking_revision_count, created_at, updated_at
 FROM shipments WHERE id = $1";

fn row_to_shipment(row: postgres::Row) -> Shipment {
    let workflow_phase: String = row.get(27);
    let status: String = row.get(28);
    let revision_count: i32 = row.get(31);
    Shipment {
        id: row.get(0),
        booking_number: row.get(1),
        mbl_number: row.get(2),
        hbl_number: row.get(3),
        carrier_code: row.get(4),
        vessel_name: row.get(5),
        voyage_number: row.get(6),
        port_of_loading: row.get(7),
        port_of_loading_code: row.get(8),
        port_of_discharge: row.get(9),
        port_of_discharge_code: row.get(10),
        etd: row.get(11),
        eta: row.get(12),
        si_cutoff: row.get(13),
        vgm_cutoff: row.get(14),
        cargo_cutoff: row.get(15),
        gate_cutoff: row.get(16),
        doc_cutoff: row.get(17),
        shipper_name: row.get(18),
        shipper_address: row.get(19),
        consignee_name: row.get(20),
        consignee_address: row.get(21),
        notify_party_name: row.get(22),
        notify_party_address: row.get(23),
        container_number_primary: row.get(24),
        container_numbers: row.get(25),
        workflow_state: row.get(26),
        workflow_phase: workflow_phase.parse().unwrap_or(WorkflowPhase::PreDeparture),
        status: status.parse().unwrap_or(ShipmentStatus::Booked),
        is_direct_carrier_confirmed: row.get(29),
        created_from_email_id: row.get(30),
        booking_revision_count: revision_count.max(0) as u32,
        created_at: row.get(32),
        updated_at: row.get(33),
    }
}
