//! Context gatherer (§4.7 stage 1): assembles everything the pattern
//! detectors and the optional AI analyzer need about one shipment, without
//! those downstream stages having to know where any of it came from.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::shipment::Shipment;

#[derive(Debug, Clone)]
pub struct StakeholderStats {
    pub name: String,
    pub role: StakeholderRole,
    pub reliability_score: Option<u8>,
    pub average_response_hours: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeholderRole {
    Shipper,
    Consignee,
    Carrier,
}

#[derive(Debug, Clone)]
pub struct RelatedShipment {
    pub shipment_id: Uuid,
    pub booking_number: String,
    pub relation: RelatedShipmentReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelatedShipmentReason {
    SameShipperActive,
    SameConsigneeActive,
    SameWeekArrival,
}

#[derive(Debug, Clone)]
pub struct RecentCommunication {
    pub email_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub sender_category: crate::types::SenderCategory,
    pub subject: String,
    pub had_action: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HistoricalAverages {
    pub shipper_si_delay_hours: Option<f32>,
    pub carrier_rollover_rate: Option<f32>,
    pub route_delay_days: Option<f32>,
}

/// Everything gathered for one shipment at insight-generation time. The
/// detectors in `rules` and the optional call into the AI analyzer both
/// read from this snapshot; neither mutates it.
#[derive(Debug, Clone)]
pub struct InsightContext {
    pub shipment: Shipment,
    pub document_count: usize,
    pub amendment_count: u32,
    pub stakeholders: Vec<StakeholderStats>,
    pub related_shipments: Vec<RelatedShipment>,
    pub recent_communications: Vec<RecentCommunication>,
    pub days_since_last_inbound: Option<f32>,
    pub historical_averages: HistoricalAverages,
    pub now: DateTime<Utc>,
}

impl InsightContext {
    pub fn days_until(&self, date: &Option<String>) -> Option<i64> {
        let date = date.as_ref()?;
        let parsed = chrono::NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M")
            .or_else(|_| {
                chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
            })
            .ok()?;
        let target = DateTime::<Utc>::from_naive_utc_and_offset(parsed, Utc);
        Some((target - self.now).num_hours() / 24)
    }

    pub fn shipper(&self) -> Option<&StakeholderStats> {
        self.stakeholders.iter().find(|s| s.role == StakeholderRole::Shipper)
    }

    /// §4.7 stage 3 gate (b): shipper reliability below this is treated as
    /// "high-tier" in the inverse sense used by the AI-trigger condition —
    /// kept here so the threshold has one home.
    pub fn shipper_is_high_tier(&self) -> bool {
        self.shipper().and_then(|s| s.reliability_score).map(|score| score >= 80).unwrap_or(false)
    }

    pub fn has_cutoff_within_days(&self, days: i64) -> bool {
        [
            &self.shipment.si_cutoff,
            &self.shipment.vgm_cutoff,
            &self.shipment.cargo_cutoff,
            &self.shipment.gate_cutoff,
            &self.shipment.doc_cutoff,
        ]
        .iter()
        .filter_map(|cutoff| self.days_until(cutoff))
        .any(|remaining| remaining >= 0 && remaining <= days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ShipmentStatus, WorkflowPhase};

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
            si_cutoff: Some("2025-12-25T10:00".to_string()),
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

    #[test]
    fn detects_cutoff_within_window() {
        let ctx = InsightContext {
            shipment: base_shipment(),
            document_count: 1,
            amendment_count: 0,
            stakeholders: Vec::new(),
            related_shipments: Vec::new(),
            recent_communications: Vec::new(),
            days_since_last_inbound: None,
            historical_averages: HistoricalAverages::default(),
            now: chrono::DateTime::parse_from_rfc3339("2025-12-20T00:00:00Z").unwrap().with_timezone(&Utc),
        };
        assert!(ctx.has_cutoff_within_days(7));
        assert!(!ctx.has_cutoff_within_days(2));
    }
}
