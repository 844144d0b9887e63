//! End-to-end scenario tests composing the stage functions directly
//! (flagging -> classification -> extraction -> linking -> shipment
//! diff/apply -> workflow transition -> action/insight) against in-memory
//! fakes for the two store seams that have trait abstractions
//! (`ShipmentLookup`, `WorkflowHistoryStore`). The Postgres-backed stores
//! have no such seam, so these tests prove stage composition rather than
//! exercising `orchestrator::process_one` against a live database.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use capabilities::NoopCapability;
use pipeline::classification::{self, ClassificationInput};
use pipeline::errors::{ShipmentStoreError, WorkflowError};
use pipeline::extraction;
use pipeline::insights::action::{self, ActionDeterminationInput};
use pipeline::insights;
use pipeline::linking::{self, LinkMethod, ShipmentLookup};
use pipeline::raw_email::RawEmail;
use pipeline::shipment::{self, Shipment};
use pipeline::types::{Direction, DocumentType, ShipmentStatus, WorkflowPhase, WorkflowTrigger};
use pipeline::workflow::{WorkflowEngine, WorkflowHistoryStore, WorkflowTransition};
use pipeline::{flagging, PipelineError};

fn base_email(subject: &str, body: &str, sender: &str) -> RawEmail {
    RawEmail {
        id: Uuid::new_v4(),
        thread_id: "thread-263815227".to_string(),
        subject: subject.to_string(),
        sender_email: sender.to_string(),
        sender_display_name: None,
        true_sender_email: None,
        recipients: vec!["ops@intoglo.com".to_string()],
        body_text: body.to_string(),
        headers: HashMap::new(),
        received_at: Utc::now(),
        labels: vec![],
        in_reply_to: None,
        has_attachments: false,
    }
}

fn carrier_domains() -> Vec<String> {
    vec!["hlag.com".to_string(), "maersk.com".to_string()]
}

#[derive(Default)]
struct FakeShipmentLookup {
    by_booking: Mutex<HashMap<String, Uuid>>,
    by_container: Mutex<HashMap<String, Uuid>>,
}

impl ShipmentLookup for FakeShipmentLookup {
    fn find_by_booking_number(&self, booking_number: &str) -> Option<Uuid> {
        self.by_booking.lock().unwrap().get(booking_number).copied()
    }
    fn find_by_mbl_number(&self, _: &str) -> Option<Uuid> {
        None
    }
    fn find_by_hbl_number(&self, _: &str) -> Option<Uuid> {
        None
    }
    fn find_by_container_number(&self, container_number: &str) -> Option<Uuid> {
        self.by_container.lock().unwrap().get(container_number).copied()
    }
}

#[derive(Default)]
struct FakeWorkflowStore {
    history: Mutex<Vec<WorkflowTransition>>,
    state: Mutex<HashMap<Uuid, (String, WorkflowPhase)>>,
}

impl WorkflowHistoryStore for FakeWorkflowStore {
    fn append_transition(&self, transition: &WorkflowTransition) -> Result<(), ShipmentStoreError> {
        self.history.lock().unwrap().push(transition.clone());
        Ok(())
    }
    fn set_shipment_state(
        &self,
        shipment_id: Uuid,
        state_code: &str,
        phase: WorkflowPhase,
    ) -> Result<(), ShipmentStoreError> {
        self.state.lock().unwrap().insert(shipment_id, (state_code.to_string(), phase));
        Ok(())
    }
}

fn base_shipment(email_id: Uuid) -> Shipment {
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
        created_from_email_id: email_id,
        booking_revision_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// S1: a booking confirmation from a carrier domain classifies as such,
/// extracts a booking number, and finds nothing to link against yet.
#[test]
fn s1_booking_confirmation_classifies_and_extracts_but_has_no_shipment_yet() {
    let email = base_email(
        "Booking Confirmation : 263815227",
        "Booking Number: 263815227\nVessel: MSC ANNA\nVoyage: 021W",
        "digital-business@hlag.com",
    );
    let own_domains: HashSet<String> = HashSet::new();
    let flagged = flagging::flag_email(&email, 0, &own_domains);
    assert_eq!(flagged.direction, Direction::Inbound);

    let input = ClassificationInput {
        email_id: email.id,
        subject: &email.subject,
        clean_subject: &flagged.clean_subject,
        sender_email: &email.sender_email,
        true_sender_email: email.true_sender_email.as_deref(),
        body_text: &email.body_text,
        attachment_filenames: &[],
        attachment_text: "",
        has_attachments: false,
        direction: flagged.direction,
    };
    let classification =
        classification::classify(&input, &carrier_domains(), &own_domains, &NoopCapability);
    assert_eq!(classification.document_type, DocumentType::BookingConfirmation);

    let extracted = extraction::extract_document_data(&email.body_text, &email.subject, Some("hlag.com"));
    assert_eq!(extracted.booking_number.as_ref().map(|f| f.value.as_str()), Some("263815227"));

    let lookup = FakeShipmentLookup::default();
    let resolution = linking::resolve_shipment(&lookup, &extracted);
    assert!(resolution.is_none(), "no shipment exists yet, so this should orphan (S4 backfill candidate)");

    let link = linking::build_link(email.id, classification.document_type, resolution, Some("263815227".to_string()));
    assert_eq!(link.link_method, LinkMethod::Orphan);
    assert!(link.shipment_id.is_none());
}

/// S2: a booking confirmation forwarded through an internal ops mailbox
/// resolves to inbound direction via the `true_sender_email` field rather
/// than the (own-domain) envelope sender.
#[test]
fn s2_forwarded_confirmation_via_ops_mailbox_resolves_inbound() {
    let mut email = base_email(
        "Booking Confirmation : 263815227",
        "Booking Number: 263815227",
        "ops@intoglo.com",
    );
    email.true_sender_email = Some("digital-business@hlag.com".to_string());

    let mut own_domains: HashSet<String> = HashSet::new();
    own_domains.insert("intoglo.com".to_string());

    let flagged = flagging::flag_email(&email, 0, &own_domains);
    assert_eq!(flagged.direction, Direction::Inbound);
    assert_eq!(flagged.true_sender_email.as_deref(), Some("digital-business@hlag.com"));

    let input = ClassificationInput {
        email_id: email.id,
        subject: &email.subject,
        clean_subject: &flagged.clean_subject,
        sender_email: &email.sender_email,
        true_sender_email: flagged.true_sender_email.as_deref(),
        body_text: &email.body_text,
        attachment_filenames: &[],
        attachment_text: "",
        has_attachments: false,
        direction: flagged.direction,
    };
    let classification =
        classification::classify(&input, &carrier_domains(), &own_domains, &NoopCapability);
    assert_eq!(classification.document_type, DocumentType::BookingConfirmation);
}

/// S3: an amendment email updates ETD on an existing shipment and records a
/// revision; fields the amendment doesn't mention stay untouched.
#[test]
fn s3_amendment_updates_etd_without_touching_other_fields() {
    let created_email_id = Uuid::new_v4();
    let mut shipment = base_shipment(created_email_id);
    shipment.etd = Some("2025-12-30".to_string());
    shipment.vessel_name = Some("MSC ANNA".to_string());

    let amendment_email = base_email(
        "Booking Amendment : 263815227",
        "Please note updated ETD: 2026-01-05",
        "digital-business@hlag.com",
    );
    let extracted = extraction::extract_document_data(&amendment_email.body_text, &amendment_email.subject, Some("hlag.com"));

    let (revisions, updated) = shipment::diff_amendment(
        &shipment,
        amendment_email.id,
        Utc::now(),
        None,
        None,
        None,
        None,
        extracted.etd.as_ref().map(|f| f.value.as_str()),
        None,
        None,
        None,
        None,
        None,
        None,
    );

    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].field, "etd");
    assert_eq!(updated.vessel_name.as_deref(), Some("MSC ANNA"));
}

/// S4: an orphan document (no shipment matched at link time) gets its
/// `shipment_id` filled in once a matching booking number appears via the
/// workflow engine's dual-trigger transition staying in sync.
#[test]
fn s4_backfill_promotes_orphan_once_booking_number_resolves() {
    let lookup = FakeShipmentLookup::default();
    let extracted_before = extraction::ExtractedDocumentData {
        booking_number: Some(extraction::FieldValue {
            value: "263815227".to_string(),
            confidence: 90,
            method: pipeline::types::ExtractionMethod::RegexSubject,
        }),
        ..Default::default()
    };
    assert!(linking::resolve_shipment(&lookup, &extracted_before).is_none());

    let shipment_id = Uuid::new_v4();
    lookup.by_booking.lock().unwrap().insert("263815227".to_string(), shipment_id);

    let resolution = linking::resolve_shipment(&lookup, &extracted_before);
    assert_eq!(resolution, Some((shipment_id, LinkMethod::BookingNumber, 95)));
}

/// S5/§4.6: a bill-of-lading document auto-advances the workflow through
/// the dual-trigger rule, writing history before the shipment pointer (I4).
#[test]
fn s5_document_type_drives_workflow_transition_in_history_then_state_order() {
    let engine = WorkflowEngine::with_defaults();
    let store = FakeWorkflowStore::default();
    let shipment_id = Uuid::new_v4();
    let email_id = Uuid::new_v4();

    let transition = engine
        .auto_transition_from_document(
            &store,
            shipment_id,
            "bl_draft_issued",
            Some(DocumentType::BillOfLading),
            Direction::Inbound,
            None,
            email_id,
            Utc::now(),
        )
        .unwrap();

    assert!(transition.is_some());
    assert_eq!(transition.as_ref().unwrap().triggered_by, WorkflowTrigger::DocumentType);
    assert_eq!(store.history.lock().unwrap().len(), 1, "history row written");
    assert_eq!(
        store.state.lock().unwrap().get(&shipment_id).map(|(code, _)| code.clone()),
        Some("bl_confirmed".to_string())
    );
}

/// §4.6: an invalid edge is rejected before any write lands, so history and
/// the shipment pointer never diverge.
#[test]
fn s5_invalid_transition_writes_nothing() {
    let engine = WorkflowEngine::with_defaults();
    let store = FakeWorkflowStore::default();
    let shipment_id = Uuid::new_v4();

    let err = engine
        .transition_to(
            &store,
            shipment_id,
            Some("booking_confirmation_received"),
            "pod_received",
            WorkflowTrigger::DocumentType,
            None,
            None,
            Utc::now(),
        )
        .unwrap_err();

    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    assert!(store.history.lock().unwrap().is_empty());
    assert!(store.state.lock().unwrap().is_empty());
    let pipeline_err: PipelineError = err.into();
    assert_eq!(pipeline_err.stage(), "workflow");
}

/// §4.7: an arrival notice from a carrier produces a has-action decision via
/// the exact lookup table, and the insight detectors plus synthesizer run
/// against a minimal context without an AI analyzer available.
#[test]
fn s6_arrival_notice_has_action_and_generates_no_duplicate_insights_when_rerun() {
    let input = ActionDeterminationInput {
        document_type: DocumentType::ArrivalNotice,
        sender_category: pipeline::types::SenderCategory::Carrier,
        body: "Your cargo has arrived at the destination port.",
    };
    let lookup = action::default_lookup_table();
    let defaults = action::default_type_defaults();
    let decision = action::determine_action(&input, &lookup, &defaults, None, &[]);
    assert!(decision.has_action);
    assert_eq!(decision.source, action::ActionSource::Lookup);

    let mut shipment = base_shipment(Uuid::new_v4());
    shipment.si_cutoff = Some(Utc::now().format("%Y-%m-%d").to_string());
    let context = insights::InsightContext {
        shipment,
        document_count: 2,
        amendment_count: 0,
        stakeholders: Vec::new(),
        related_shipments: Vec::new(),
        recent_communications: Vec::new(),
        days_since_last_inbound: None,
        historical_averages: Default::default(),
        now: Utc::now(),
    };
    let detections = insights::detect_rule_insights(&context);
    let first_run = insights::synthesize(context.shipment.id, &context, detections.clone(), None);
    let second_run = insights::synthesize(context.shipment.id, &context, detections, None);
    assert_eq!(first_run.len(), second_run.len(), "same inputs produce the same candidate set pre-dedup-store");
}
