//! Top-level per-email sequencing (§4.1, §5, §7): flagging, classification,
//! extraction, linking/backfill, workflow auto-transition, and insight/action
//! generation run in that order for one email, with every stage helper's
//! error collapsed into a `ProcessingResult` rather than propagated to the
//! batch driver. `run_batch` is the §5 batch entry point: a bounded worker
//! pool (grounded on the per-key worker-thread shape used elsewhere in this
//! codebase for serialized background writes, generalized here to a
//! semaphore-bounded `tokio` pool since stores are already async-adjacent
//! via `locks::KeyedLocks`), a soft per-email deadline, and a pause between
//! spawns so a single high-volume mailbox can't monopolize the pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use capabilities::{DocumentClassifierCapability, EmbeddingCapability, InsightAnalyzerCapability, NoopCapability};

use crate::classification::{self, ClassificationInput};
use crate::config::{self, PipelineConfig};
use crate::errors::{PipelineError, ShipmentStoreError};
use crate::extraction::{self, ExtractedDocumentData};
use crate::flagging;
use crate::insights::{
    self,
    action::{self, ActionDeterminationInput, ActionLookupEntry, DocumentTypeDefault, IntentAnchor},
    context::InsightContext,
};
use crate::linking::{self, LinkMethod};
use crate::locks::KeyedLocks;
use crate::raw_email::RawEmail;
use crate::shipment::{self, Shipment, ShipmentRevision};
use crate::store::emails::EmailStore;
use crate::store::insights::InsightStore;
use crate::store::shipments::ShipmentStore;
use crate::store::workflow::WorkflowStore;
use crate::store::PgPool;
use crate::types::{Direction, DocumentType, ProcessingStatus, SenderCategory, ShipmentStatus, WorkflowPhase};
use crate::workflow::engine::WorkflowEngine;

/// Everything a single `process_one` call needs. Built once per process
/// and shared across the worker pool via `Arc`.
pub struct PipelineServices {
    pub config: PipelineConfig,
    pub email_store: EmailStore,
    pub shipment_store: ShipmentStore,
    pub workflow_store: WorkflowStore,
    pub insight_store: InsightStore,
    pub engine: WorkflowEngine,
    pub locks: KeyedLocks,
    pub classifier: Arc<dyn DocumentClassifierCapability>,
    pub insight_analyzer: Arc<dyn InsightAnalyzerCapability>,
    pub embedding: Arc<dyn EmbeddingCapability>,
    pub carrier_domains: Vec<String>,
    pub action_lookup: Vec<ActionLookupEntry>,
    pub action_defaults: Vec<DocumentTypeDefault>,
    pub intent_anchors: Vec<IntentAnchor>,
}

impl PipelineServices {
    /// Builds services with no LLM/embedding provider wired in — every
    /// capability reports unavailable and the deterministic cascades carry
    /// the whole load, same as running with no `OPENAI_API_KEY` set.
    pub fn new(config: PipelineConfig, pool: PgPool) -> Self {
        let carrier_domains = config::carrier_domains_from_config(&config);
        Self {
            email_store: EmailStore::new(pool.clone()),
            shipment_store: ShipmentStore::new(pool.clone()),
            workflow_store: WorkflowStore::new(pool.clone()),
            insight_store: InsightStore::new(pool),
            engine: WorkflowEngine::with_defaults(),
            locks: KeyedLocks::new(),
            classifier: Arc::new(NoopCapability),
            insight_analyzer: Arc::new(NoopCapability),
            embedding: Arc::new(NoopCapability),
            carrier_domains,
            action_lookup: action::default_lookup_table(),
            action_defaults: action::default_type_defaults(),
            intent_anchors: Vec::new(),
            config,
        }
    }

    pub fn with_capabilities(
        mut self,
        classifier: Arc<dyn DocumentClassifierCapability>,
        insight_analyzer: Arc<dyn InsightAnalyzerCapability>,
        embedding: Arc<dyn EmbeddingCapability>,
    ) -> Self {
        self.classifier = classifier;
        self.insight_analyzer = insight_analyzer;
        self.intent_anchors = action::seed_intent_anchors(embedding.as_ref());
        self.embedding = embedding;
        self
    }
}

#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    /// Email resolved to a shipment (existing, amended, or newly created
    /// from a booking confirmation) and ran all the way through insight
    /// generation.
    Linked {
        shipment_id: Uuid,
        created_shipment: bool,
        has_action: bool,
        insights_persisted: usize,
    },
    /// No shipment matched; the document was recorded as an orphan link
    /// for a later backfill sweep (§4.5 S4/S6).
    Orphaned,
    /// Classification confidence was below threshold or produced
    /// `DocumentType::Unknown`; routed for manual review instead of
    /// continuing the pipeline (§7).
    NeedsManualReview { reason: String },
    Failed { stage: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub email_id: Uuid,
    pub outcome: ProcessingOutcome,
}

/// Run the full stage sequence for one email. Never returns an `Err` to the
/// caller — any stage failure becomes `ProcessingOutcome::Failed` (§7
/// propagation policy).
pub async fn process_one(services: &PipelineServices, email: RawEmail) -> ProcessingResult {
    let email_id = email.id;
    match process_one_inner(services, email).await {
        Ok(outcome) => ProcessingResult { email_id, outcome },
        Err(err) => {
            let stage = err.stage();
            let message = err.to_string();
            if let Err(store_err) =
                services
                    .email_store
                    .set_processing_status(email_id, ProcessingStatus::Failed, Some(&message))
            {
                warn!("failed to record failure status for email {email_id}: {store_err}");
            }
            ProcessingResult { email_id, outcome: ProcessingOutcome::Failed { stage, message } }
        }
    }
}

async fn process_one_inner(
    services: &PipelineServices,
    email: RawEmail,
) -> Result<ProcessingOutcome, PipelineError> {
    let now = Utc::now();

    let prior_in_thread = services
        .email_store
        .thread_position(&email.thread_id, email.received_at)
        .map_err(PipelineError::from)?;
    let flagged = flagging::flag_email(&email, prior_in_thread, &services.config.own_domains);
    services.email_store.mark_flagged(&flagged).map_err(PipelineError::from)?;

    let attachments = services.email_store.find_attachments(email.id).map_err(PipelineError::from)?;
    let business_attachments: Vec<_> = attachments
        .iter()
        .map(|att| (att, flagging::classify_attachment(att, now)))
        .filter(|(_, flagged_att)| flagged_att.is_business_document)
        .collect();
    let attachment_filenames: Vec<String> =
        business_attachments.iter().map(|(att, _)| att.filename.clone()).collect();
    let attachment_text: String = business_attachments
        .iter()
        .filter_map(|(att, _)| att.extracted_text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");

    let classification_input = ClassificationInput {
        email_id: email.id,
        subject: &email.subject,
        clean_subject: &flagged.clean_subject,
        sender_email: &email.sender_email,
        true_sender_email: flagged.true_sender_email.as_deref(),
        body_text: &email.body_text,
        attachment_filenames: &attachment_filenames,
        attachment_text: &attachment_text,
        has_attachments: email.has_attachments,
        direction: flagged.direction,
    };
    let classification = classification::classify(
        &classification_input,
        &services.carrier_domains,
        &services.config.own_domains,
        services.classifier.as_ref(),
    );
    services
        .email_store
        .save_classification(email.id, &classification)
        .map_err(PipelineError::from)?;

    if classification.document_type == DocumentType::Unknown
        || classification.document_confidence < services.config.low_confidence_threshold
    {
        services
            .email_store
            .set_processing_status(email.id, ProcessingStatus::NeedsReview, Some("low confidence classification"))
            .map_err(PipelineError::from)?;
        return Ok(ProcessingOutcome::NeedsManualReview {
            reason: format!(
                "document_type={:?} confidence={}",
                classification.document_type, classification.document_confidence
            ),
        });
    }

    let sender_domain_for_carrier = flagged
        .true_sender_email
        .as_deref()
        .and_then(crate::util::domain_of)
        .or_else(|| email.effective_sender_domain());
    let carrier_domain = matching_carrier_domain(&services.carrier_domains, sender_domain_for_carrier);
    let mut extracted = extraction::extract_document_data(&email.body_text, &email.subject, carrier_domain);
    if classification.document_type.may_overwrite_parties() {
        let party_data = extraction::extract_parties(&email.body_text, &services.config.forwarder_company_name);
        merge_party_fields(&mut extracted, party_data);
    }
    services
        .email_store
        .save_extraction(email.id, classification.document_type, &extracted)
        .map_err(PipelineError::from)?;

    let mut resolution = linking::resolve_shipment(&services.shipment_store, &extracted);
    let mut created_shipment = false;

    let carrier_attested = carrier_domain.is_some()
        || config::content_attests_carrier_origin(
            email.sender_display_name.as_deref(),
            &email.subject,
            &email.body_text,
        );

    if resolution.is_none()
        && classification.document_type == DocumentType::BookingConfirmation
        && flagged.direction == Direction::Inbound
        && classification.document_confidence >= services.config.booking_confirmation_threshold
        && carrier_attested
    {
        if let Some(booking) = extracted.booking_number.clone() {
            let _guard = services.locks.acquire(&booking.value).await;
            resolution = match services
                .shipment_store
                .find_by_booking_number(&booking.value)
                .map_err(PipelineError::from)?
            {
                Some(existing) => Some((existing.id, LinkMethod::BookingNumber, 100)),
                None => {
                    let new_shipment = build_shipment_from_booking(
                        email.id,
                        &extracted,
                        &booking.value,
                        classification.sender_category,
                        now,
                    );
                    match services.shipment_store.create(&new_shipment) {
                        Ok(()) => {
                            created_shipment = true;
                            Some((new_shipment.id, LinkMethod::BookingNumber, 100))
                        }
                        Err(ShipmentStoreError::DuplicateBooking(_)) => services
                            .shipment_store
                            .find_by_booking_number(&booking.value)
                            .map_err(PipelineError::from)?
                            .map(|s| (s.id, LinkMethod::BookingNumber, 100)),
                        Err(other) => return Err(other.into()),
                    }
                }
            };
            if let Some((shipment_id, _, _)) = resolution {
                services
                    .shipment_store
                    .promote_orphan_links(
                        &booking.value,
                        extracted.mbl_number.as_ref().map(|f| f.value.as_str()),
                        extracted.hbl_number.as_ref().map(|f| f.value.as_str()),
                        shipment_id,
                    )
                    .map_err(PipelineError::from)?;
            }
        }
    }

    let link = linking::build_link(
        email.id,
        classification.document_type,
        resolution.clone(),
        extracted.booking_number.as_ref().map(|f| f.value.clone()),
    );
    services.shipment_store.create_link(&link).map_err(PipelineError::from)?;

    let Some((shipment_id, _, _)) = resolution else {
        services
            .email_store
            .set_processing_status(email.id, ProcessingStatus::Processed, None)
            .map_err(PipelineError::from)?;
        return Ok(ProcessingOutcome::Orphaned);
    };

    let mut shipment = services
        .shipment_store
        .find_by_id(shipment_id)
        .map_err(PipelineError::from)?
        .ok_or_else(|| PipelineError::data_integrity("linking", "shipment vanished after link"))?;

    let mut revisions = Vec::new();
    if classification.document_type != DocumentType::BookingConfirmation {
        let (mut field_revisions, updated) = shipment::diff_amendment(
            &shipment,
            email.id,
            now,
            extracted.mbl_number.as_ref().map(|f| f.value.as_str()),
            extracted.hbl_number.as_ref().map(|f| f.value.as_str()),
            extracted.vessel_name.as_ref().map(|f| f.value.as_str()),
            extracted.voyage_number.as_ref().map(|f| f.value.as_str()),
            extracted.etd.as_ref().map(|f| f.value.as_str()),
            extracted.eta.as_ref().map(|f| f.value.as_str()),
            extracted.si_cutoff.as_ref().map(|f| f.value.as_str()),
            extracted.vgm_cutoff.as_ref().map(|f| f.value.as_str()),
            extracted.cargo_cutoff.as_ref().map(|f| f.value.as_str()),
            extracted.gate_cutoff.as_ref().map(|f| f.value.as_str()),
            extracted.doc_cutoff.as_ref().map(|f| f.value.as_str()),
        );
        shipment = updated;
        revisions.append(&mut field_revisions);
    }

    let mut party_revisions = shipment::apply_party_update(
        &mut shipment,
        email.id,
        now,
        classification.document_type,
        extracted.shipper_name.as_ref().map(|f| f.value.as_str()),
        extracted.shipper_address.as_ref().map(|f| f.value.as_str()),
        extracted.consignee_name.as_ref().map(|f| f.value.as_str()),
        extracted.consignee_address.as_ref().map(|f| f.value.as_str()),
        extracted.notify_party_name.as_ref().map(|f| f.value.as_str()),
        extracted.notify_party_address.as_ref().map(|f| f.value.as_str()),
    );
    revisions.append(&mut party_revisions);

    merge_container_numbers(&mut shipment, &extracted, email.id, now, &mut revisions);

    if classification.document_type == DocumentType::BookingAmendment {
        shipment.booking_revision_count += 1;
    }
    shipment.updated_at = now;

    if !revisions.is_empty() {
        services.shipment_store.apply_revisions(&shipment, &revisions).map_err(PipelineError::from)?;
    }

    services
        .engine
        .auto_transition_from_document(
            &services.workflow_store,
            shipment.id,
            &shipment.workflow_state,
            Some(classification.document_type),
            flagged.direction,
            Some(classification.email_type),
            email.id,
            now,
        )
        .map_err(PipelineError::from)?;

    let action_decision = action::determine_action(
        &ActionDeterminationInput {
            document_type: classification.document_type,
            sender_category: classification.sender_category,
            body: &email.body_text,
        },
        &services.action_lookup,
        &services.action_defaults,
        Some(services.embedding.as_ref()),
        &services.intent_anchors,
    );
    debug!(
        shipment_id = %shipment.id,
        has_action = action_decision.has_action,
        source = ?action_decision.source,
        "action determination complete"
    );

    let context = build_insight_context(&services.shipment_store, &shipment, now)?;
    let rule_detections = insights::detect_rule_insights(&context);
    let insight_list = insights::synthesize(
        shipment.id,
        &context,
        rule_detections,
        Some(services.insight_analyzer.as_ref()),
    );
    let persisted = services
        .insight_store
        .persist(shipment.id, &insight_list, false)
        .map_err(PipelineError::from)?;

    services
        .email_store
        .set_processing_status(email.id, ProcessingStatus::Processed, None)
        .map_err(PipelineError::from)?;

    Ok(ProcessingOutcome::Linked {
        shipment_id: shipment.id,
        created_shipment,
        has_action: action_decision.has_action,
        insights_persisted: persisted,
    })
}

fn matching_carrier_domain<'a>(domains: &'a [String], sender_domain: Option<&str>) -> Option<&'a str> {
    let sender_domain = sender_domain?;
    domains.iter().find(|d| sender_domain.contains(d.as_str())).map(|d| d.as_str())
}

/// `extract_document_data` never fills party fields (§4.4 restricts that to
/// `extract_parties`, itself gated to SI-draft/HBL documents by I5), so this
/// is a plain fill-if-missing merge rather than a conflict-resolution pass.
fn merge_party_fields(target: &mut ExtractedDocumentData, source: ExtractedDocumentData) {
    target.shipper_name = target.shipper_name.take().or(source.shipper_name);
    target.shipper_address = target.shipper_address.take().or(source.shipper_address);
    target.consignee_name = target.consignee_name.take().or(source.consignee_name);
    target.consignee_address = target.consignee_address.take().or(source.consignee_address);
    target.notify_party_name = target.notify_party_name.take().or(source.notify_party_name);
    target.notify_party_address = target.notify_party_address.take().or(source.notify_party_address);
}

fn merge_container_numbers(
    shipment: &mut Shipment,
    extracted: &ExtractedDocumentData,
    email_id: Uuid,
    occurred_at: DateTime<Utc>,
    revisions: &mut Vec<ShipmentRevision>,
) {
    for container in &extracted.container_numbers {
        if shipment.container_numbers.iter().any(|c| c == &container.value) {
            continue;
        }
        let old_primary = shipment.container_number_primary.clone();
        shipment::add_container_number(shipment, &container.value);
        revisions.push(ShipmentRevision {
            shipment_id: shipment.id,
            email_id,
            field: "container_numbers".to_string(),
            old_value: old_primary,
            new_value: container.value.clone(),
            occurred_at,
        });
    }
}

fn build_shipment_from_booking(
    email_id: Uuid,
    extracted: &ExtractedDocumentData,
    booking_number: &str,
    sender_category: SenderCategory,
    now: DateTime<Utc>,
) -> Shipment {
    Shipment {
        id: Uuid::new_v4(),
        booking_number: booking_number.to_string(),
        mbl_number: extracted.mbl_number.as_ref().map(|f| f.value.clone()),
        hbl_number: extracted.hbl_number.as_ref().map(|f| f.value.clone()),
        carrier_code: None,
        vessel_name: extracted.vessel_name.as_ref().map(|f| f.value.clone()),
        voyage_number: extracted.voyage_number.as_ref().map(|f| f.value.clone()),
        port_of_loading: extracted.port_of_loading.as_ref().map(|f| f.value.clone()),
        port_of_loading_code: extracted.port_of_loading_code.as_ref().map(|f| f.value.clone()),
        port_of_discharge: extracted.port_of_discharge.as_ref().map(|f| f.value.clone()),
        port_of_discharge_code: extracted.port_of_discharge_code.as_ref().map(|f| f.value.clone()),
        etd: extracted.etd.as_ref().map(|f| f.value.clone()),
        eta: extracted.eta.as_ref().map(|f| f.value.clone()),
        si_cutoff: extracted.si_cutoff.as_ref().map(|f| f.value.clone()),
        vgm_cutoff: extracted.vgm_cutoff.as_ref().map(|f| f.value.clone()),
        cargo_cutoff: extracted.cargo_cutoff.as_ref().map(|f| f.value.clone()),
        gate_cutoff: extracted.gate_cutoff.as_ref().map(|f| f.value.clone()),
        doc_cutoff: extracted.doc_cutoff.as_ref().map(|f| f.value.clone()),
        shipper_name: extracted.shipper_name.as_ref().map(|f| f.value.clone()),
        shipper_address: extracted.shipper_address.as_ref().map(|f| f.value.clone()),
        consignee_name: extracted.consignee_name.as_ref().map(|f| f.value.clone()),
        consignee_address: extracted.consignee_address.as_ref().map(|f| f.value.clone()),
        notify_party_name: extracted.notify_party_name.as_ref().map(|f| f.value.clone()),
        notify_party_address: extracted.notify_party_address.as_ref().map(|f| f.value.clone()),
        container_number_primary: extracted.container_numbers.first().map(|f| f.value.clone()),
        container_numbers: extracted.container_numbers.iter().map(|f| f.value.clone()).collect(),
        workflow_state: "booking_confirmation_received".to_string(),
        workflow_phase: WorkflowPhase::PreDeparture,
        status: ShipmentStatus::Booked,
        is_direct_carrier_confirmed: sender_category == SenderCategory::Carrier,
        created_from_email_id: email_id,
        booking_revision_count: 0,
        created_at: now,
        updated_at: now,
    }
}

/// §4.7 stage 1. Stakeholder/related-shipment/recent-communication data
/// isn't wired up to a store query yet, so those arrive empty; document
/// count is the one piece backed by a real query (`shipment_documents`).
fn build_insight_context(
    shipment_store: &ShipmentStore,
    shipment: &Shipment,
    now: DateTime<Utc>,
) -> Result<InsightContext, PipelineError> {
    let document_count = shipment_store.document_count(shipment.id).map_err(PipelineError::from)?;
    Ok(InsightContext {
        shipment: shipment.clone(),
        document_count,
        amendment_count: shipment.booking_revision_count,
        stakeholders: Vec::new(),
        related_shipments: Vec::new(),
        recent_communications: Vec::new(),
        days_since_last_inbound: None,
        historical_averages: Default::default(),
        now,
    })
}

#[derive(Debug, Default, Clone)]
pub struct BatchSummary {
    pub processed: usize,
    pub needs_review: usize,
    pub orphaned: usize,
    pub failed: usize,
    /// Capped at 50 entries (§7: batch drivers accumulate a bounded list
    /// of error messages rather than growing without limit over a large run).
    pub errors: Vec<String>,
}

const MAX_BATCH_ERRORS: usize = 50;

/// §5 batch driver: pull up to `limit` pending emails and run each through
/// `process_one` on a semaphore-bounded worker pool, respecting the
/// per-email soft deadline and the pause between spawns.
pub async fn run_batch(services: Arc<PipelineServices>, limit: i64) -> BatchSummary {
    let pending = match services.email_store.find_pending(limit) {
        Ok(emails) => emails,
        Err(err) => {
            return BatchSummary {
                failed: 1,
                errors: vec![format!("failed to load pending emails: {err}")],
                ..Default::default()
            }
        }
    };

    let semaphore = Arc::new(Semaphore::new(services.config.worker_pool_size.max(1)));
    let mut handles = Vec::with_capacity(pending.len());

    for email in pending {
        let task_services = services.clone();
        let semaphore = semaphore.clone();
        let deadline = services.config.email_soft_deadline;
        let email_id = email.id;
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            match timeout(deadline, process_one(&task_services, email)).await {
                Ok(result) => result,
                Err(_) => ProcessingResult {
                    email_id,
                    outcome: ProcessingOutcome::Failed {
                        stage: "orchestrator",
                        message: "soft deadline exceeded".to_string(),
                    },
                },
            }
        }));
        sleep(services.config.inter_email_delay).await;
    }

    let mut summary = BatchSummary::default();
    for handle in handles {
        match handle.await {
            Ok(result) => record(&mut summary, result),
            Err(join_err) => {
                summary.failed += 1;
                if summary.errors.len() < MAX_BATCH_ERRORS {
                    summary.errors.push(format!("worker task did not complete: {join_err}"));
                }
            }
        }
    }

    if let Err(err) = run_link_dedupe_pass(&services) {
        warn!("link dedupe pass failed: {err}");
        if summary.errors.len() < MAX_BATCH_ERRORS {
            summary.errors.push(format!("link dedupe pass failed: {err}"));
        }
    }

    summary
}

/// S6 maintenance pass: resolve every email currently linked to more than
/// one shipment down to a single link via `linking::dedupe_links`'s
/// tie-break order. Run once per batch so duplicate links created by races
/// between orphan backfill and direct linking don't accumulate.
pub fn run_link_dedupe_pass(services: &PipelineServices) -> Result<usize, PipelineError> {
    let duplicated = services.shipment_store.emails_with_multiple_links().map_err(PipelineError::from)?;
    let mut resolved = 0;
    for email_id in duplicated {
        let subject = services
            .email_store
            .find_by_id(email_id)
            .map_err(PipelineError::from)?
            .map(|email| email.subject.to_lowercase())
            .unwrap_or_default();

        let rows = services.shipment_store.dedupe_rows_for_email(email_id).map_err(PipelineError::from)?;
        let candidates: Vec<linking::DedupeCandidate> = rows
            .into_iter()
            .map(
                |(shipment_id, created_from_email_id, booking_number_extracted, link_confidence, shipment_created_at)| {
                    linking::DedupeCandidate {
                        shipment_id,
                        created_from_this_email: created_from_email_id == Some(email_id),
                        booking_in_subject: !booking_number_extracted.is_empty()
                            && subject.contains(&booking_number_extracted.to_lowercase()),
                        link_confidence,
                        shipment_created_at,
                    }
                },
            )
            .collect();

        if let Some(winner) = linking::dedupe_links(candidates) {
            services
                .shipment_store
                .retain_only_link(email_id, winner.shipment_id)
                .map_err(PipelineError::from)?;
            resolved += 1;
        }
    }
    Ok(resolved)
}

fn record(summary: &mut BatchSummary, result: ProcessingResult) {
    match result.outcome {
        ProcessingOutcome::Linked { .. } => summary.processed += 1,
        ProcessingOutcome::Orphaned => summary.orphaned += 1,
        ProcessingOutcome::NeedsManualReview { .. } => summary.needs_review += 1,
        ProcessingOutcome::Failed { stage, message } => {
            summary.failed += 1;
            if summary.errors.len() < MAX_BATCH_ERRORS {
                summary.errors.push(format!("{} ({stage}): {message}", result.email_id));
            }
        }
    }
}
