//! Pattern detector catalog (§4.7 stage 2). Each detector inspects an
//! `InsightContext` and optionally fires one `RuleDetection`. The catalog is
//! a plain slice of function pointers rather than a data table because the
//! detectors need to interpolate shipment-specific values (cutoff dates,
//! stakeholder names) into their text — a static table can't express that
//! without its own template engine, which would be more machinery than six
//! detectors justify.

use crate::types::{ActionUrgency, InsightType, Severity};

use super::context::InsightContext;

#[derive(Debug, Clone)]
pub struct RuleDetection {
    pub code: &'static str,
    pub category: InsightType,
    pub severity: Severity,
    pub priority_boost: u8,
    pub confidence: u8,
    pub title: String,
    pub insight_text: String,
    pub structured_action: StructuredAction,
}

#[derive(Debug, Clone)]
pub struct StructuredAction {
    pub urgency: ActionUrgency,
    pub recommendation: String,
}

pub type Detector = fn(&InsightContext) -> Option<RuleDetection>;

pub const DETECTOR_CATALOG: &[Detector] = &[
    approaching_cutoff_missing_inputs,
    overdue_cutoff,
    missing_upstream_document,
    stakeholder_non_response,
    repeated_amendments,
    customs_hold_signal,
];

pub fn detect(context: &InsightContext) -> Vec<RuleDetection> {
    DETECTOR_CATALOG.iter().filter_map(|detector| detector(context)).collect()
}

fn approaching_cutoff_missing_inputs(ctx: &InsightContext) -> Option<RuleDetection> {
    if ctx.shipment.si_cutoff.is_none() {
        return None;
    }
    let days = ctx.days_until(&ctx.shipment.si_cutoff)?;
    if !(0..=3).contains(&days) {
        return None;
    }
    if ctx.shipment.shipper_name.is_some() {
        return None;
    }
    Some(RuleDetection {
        code: "approaching_cutoff_missing_inputs",
        category: InsightType::Risk,
        severity: Severity::High,
        priority_boost: 20,
        confidence: 85,
        title: format!("SI cutoff in {days} day(s) with no shipper details on file"),
        insight_text: format!(
            "Booking {} has an SI cutoff in {days} day(s) but shipper information has not been received.",
            ctx.shipment.booking_number
        ),
        structured_action: StructuredAction {
            urgency: ActionUrgency::Immediate,
            recommendation: "Request shipping instructions from the shipper immediately.".to_string(),
        },
    })
}

fn overdue_cutoff(ctx: &InsightContext) -> Option<RuleDetection> {
    let cutoffs = [
        ("SI", &ctx.shipment.si_cutoff),
        ("VGM", &ctx.shipment.vgm_cutoff),
        ("cargo", &ctx.shipment.cargo_cutoff),
    ];
    for (label, cutoff) in cutoffs {
        if let Some(days) = ctx.days_until(cutoff) {
            if days < 0 {
                return Some(RuleDetection {
                    code: "overdue_cutoff",
                    category: InsightType::Risk,
                    severity: Severity::Critical,
                    priority_boost: 30,
                    confidence: 95,
                    title: format!("{label} cutoff missed for booking {}", ctx.shipment.booking_number),
                    insight_text: format!(
                        "The {label} cutoff for booking {} passed {} day(s) ago with no recorded submission.",
                        ctx.shipment.booking_number,
                        -days
                    ),
                    structured_action: StructuredAction {
                        urgency: ActionUrgency::Immediate,
                        recommendation: format!("Escalate the missed {label} cutoff to the carrier and shipper."),
                    },
                });
            }
        }
    }
    None
}

fn missing_upstream_document(ctx: &InsightContext) -> Option<RuleDetection> {
    if ctx.shipment.workflow_state == "bl_confirmed" && ctx.document_count < 2 {
        return Some(RuleDetection {
            code: "missing_upstream_document",
            category: InsightType::Risk,
            severity: Severity::Medium,
            priority_boost: 10,
            confidence: 70,
            title: format!("BL confirmed for {} without a preceding SI on file", ctx.shipment.booking_number),
            insight_text: "Bill of lading was confirmed but no shipping instruction document was recorded for this booking.".to_string(),
            structured_action: StructuredAction {
                urgency: ActionUrgency::Soon,
                recommendation: "Verify the SI was actually submitted and backfill the record.".to_string(),
            },
        });
    }
    None
}

fn stakeholder_non_response(ctx: &InsightContext) -> Option<RuleDetection> {
    let days_idle = ctx.days_since_last_inbound?;
    if days_idle < 5.0 {
        return None;
    }
    let shipper = ctx.shipper()?;
    Some(RuleDetection {
        code: "stakeholder_non_response",
        category: InsightType::Pattern,
        severity: Severity::Medium,
        priority_boost: 10,
        confidence: 65,
        title: format!("{} has not responded in {days_idle:.0} days", shipper.name),
        insight_text: format!(
            "No inbound communication from {} in {days_idle:.0} days on booking {}.",
            shipper.name, ctx.shipment.booking_number
        ),
        structured_action: StructuredAction {
            urgency: ActionUrgency::Soon,
            recommendation: "Send a follow-up to the shipper.".to_string(),
        },
    })
}

fn repeated_amendments(ctx: &InsightContext) -> Option<RuleDetection> {
    if ctx.amendment_count < 3 {
        return None;
    }
    Some(RuleDetection {
        code: "repeated_amendments",
        category: InsightType::Pattern,
        severity: Severity::Low,
        priority_boost: 5,
        confidence: 75,
        title: format!("Booking {} amended {} times", ctx.shipment.booking_number, ctx.amendment_count),
        insight_text: format!(
            "This booking has been amended {} times, which may indicate unstable planning upstream.",
            ctx.amendment_count
        ),
        structured_action: StructuredAction {
            urgency: ActionUrgency::Routine,
            recommendation: "Confirm final cargo details with the shipper before the next cutoff.".to_string(),
        },
    })
}

fn customs_hold_signal(ctx: &InsightContext) -> Option<RuleDetection> {
    let has_exception = ctx
        .recent_communications
        .iter()
        .any(|comm| comm.subject.to_lowercase().contains("hold") || comm.subject.to_lowercase().contains("customs"));
    if !has_exception {
        return None;
    }
    Some(RuleDetection {
        code: "customs_hold_signal",
        category: InsightType::Risk,
        severity: Severity::High,
        priority_boost: 25,
        confidence: 60,
        title: format!("Possible customs hold on booking {}", ctx.shipment.booking_number),
        insight_text: "Recent correspondence mentions a customs hold or exception for this shipment.".to_string(),
        structured_action: StructuredAction {
            urgency: ActionUrgency::Immediate,
            recommendation: "Contact the customs broker to confirm hold status and clearance path.".to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::context::{HistoricalAverages, RecentCommunication, StakeholderStats, StakeholderRole};
    use crate::shipment::Shipment;
    use crate::types::{ShipmentStatus, WorkflowPhase};
    use chrono::Utc;
    use uuid::Uuid;

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

    #[test]
    fn overdue_cutoff_fires_critical() {
        let mut ctx = base_context();
        ctx.shipment.si_cutoff = Some((ctx.now - chrono::Duration::days(2)).format("%Y-%m-%d").to_string());
        let detection = overdue_cutoff(&ctx).unwrap();
        assert_eq!(detection.severity, Severity::Critical);
        assert_eq!(detection.code, "overdue_cutoff");
    }

    #[test]
    fn repeated_amendments_requires_threshold() {
        let mut ctx = base_context();
        ctx.amendment_count = 2;
        assert!(repeated_amendments(&ctx).is_none());
        ctx.amendment_count = 3;
        assert!(repeated_amendments(&ctx).is_some());
    }

    #[test]
    fn stakeholder_non_response_needs_shipper_and_idle_days() {
        let mut ctx = base_context();
        ctx.days_since_last_inbound = Some(6.0);
        assert!(stakeholder_non_response(&ctx).is_none());
        ctx.stakeholders.push(StakeholderStats {
            name: "Acme Shipper".to_string(),
            role: StakeholderRole::Shipper,
            reliability_score: Some(40),
            average_response_hours: None,
        });
        assert!(stakeholder_non_response(&ctx).is_some());
    }

    #[test]
    fn customs_hold_signal_scans_recent_subjects() {
        let mut ctx = base_context();
        ctx.recent_communications.push(RecentCommunication {
            email_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            sender_category: crate::types::SenderCategory::Customs,
            subject: "Container on CUSTOMS HOLD".to_string(),
            had_action: false,
        });
        assert!(customs_hold_signal(&ctx).is_some());
    }

    #[test]
    fn detect_runs_full_catalog() {
        let ctx = base_context();
        let detections = detect(&ctx);
        assert!(detections.is_empty());
    }
}
