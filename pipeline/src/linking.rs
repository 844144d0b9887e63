//! Linking & Backfill (§4.5): resolves an email to a Shipment via
//! multi-key lookup, creates orphan links when nothing matches yet, and
//! sweeps orphans in once a shipment appears (S4, S6).

use uuid::Uuid;

use crate::extraction::ExtractedDocumentData;
use crate::types::DocumentType;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkMethod {
    BookingNumber,
    MblNumber,
    HblNumber,
    ContainerNumber,
    Orphan,
}

#[derive(Debug, Clone)]
pub struct ShipmentDocumentLink {
    pub shipment_id: Option<Uuid>,
    pub email_id: Uuid,
    pub document_type: DocumentType,
    pub is_primary: bool,
    pub link_method: LinkMethod,
    pub link_confidence: u8,
    pub booking_number_extracted: Option<String>,
}

/// What the store needs to expose for multi-key lookup (§4.5 lookup
/// order). Implemented by `store::shipments::ShipmentStore` in production
/// and by an in-memory fake in tests.
pub trait ShipmentLookup {
    fn find_by_booking_number(&self, booking_number: &str) -> Option<Uuid>;
    fn find_by_mbl_number(&self, mbl_number: &str) -> Option<Uuid>;
    fn find_by_hbl_number(&self, hbl_number: &str) -> Option<Uuid>;
    fn find_by_container_number(&self, container_number: &str) -> Option<Uuid>;
}

/// Resolve one email's extracted data to a shipment using the lookup order
/// in §4.5: booking number, then MBL, then HBL, then container, stopping
/// on the first hit. Returns `None` when nothing matched, in which case
/// the caller records an orphan link.
pub fn resolve_shipment(
    lookup: &dyn ShipmentLookup,
    extracted: &ExtractedDocumentData,
) -> Option<(Uuid, LinkMethod, u8)> {
    if let Some(booking) = extracted.booking_number.as_ref() {
        if let Some(id) = lookup.find_by_booking_number(&booking.value) {
            return Some((id, LinkMethod::BookingNumber, 95));
        }
    }
    if let Some(mbl) = extracted.mbl_number.as_ref() {
        if let Some(id) = lookup.find_by_mbl_number(&mbl.value) {
            return Some((id, LinkMethod::MblNumber, 90));
        }
    }
    if let Some(hbl) = extracted.hbl_number.as_ref() {
        if let Some(id) = lookup.find_by_hbl_number(&hbl.value) {
            return Some((id, LinkMethod::HblNumber, 88));
        }
    }
    for container in &extracted.container_numbers {
        if let Some(id) = lookup.find_by_container_number(&container.value) {
            return Some((id, LinkMethod::ContainerNumber, 80));
        }
    }
    None
}

pub fn build_link(
    email_id: Uuid,
    document_type: DocumentType,
    resolution: Option<(Uuid, LinkMethod, u8)>,
    booking_number_extracted: Option<String>,
) -> ShipmentDocumentLink {
    match resolution {
        Some((shipment_id, method, confidence)) => ShipmentDocumentLink {
            shipment_id: Some(shipment_id),
            email_id,
            document_type,
            is_primary: false,
            link_method: method,
            link_confidence: confidence,
            booking_number_extracted,
        },
        None => ShipmentDocumentLink {
            shipment_id: None,
            email_id,
            document_type,
            is_primary: false,
            link_method: LinkMethod::Orphan,
            link_confidence: 0,
            booking_number_extracted,
        },
    }
}

/// Candidate links gathered for one email during the cross-link dedupe
/// pass (§4.5, S6). Only `shipment_id`, `created_from_this_email`, and
/// whether the booking appears in the subject are needed to apply the
/// tie-break order.
#[derive(Debug, Clone)]
pub struct DedupeCandidate {
    pub shipment_id: Uuid,
    pub created_from_this_email: bool,
    pub booking_in_subject: bool,
    pub link_confidence: u8,
    pub shipment_created_at: chrono::DateTime<chrono::Utc>,
}

/// Cross-linking hygiene (§4.5): when an email ended up linked to more than
/// one shipment, keep exactly one per the tie-break order: (a) created
/// from this email, else (b) booking number in subject, else (c) highest
/// link confidence, else (d) earliest created.
pub fn dedupe_links(mut candidates: Vec<DedupeCandidate>) -> Option<DedupeCandidate> {
    if candidates.len() <= 1 {
        return candidates.pop();
    }
    candidates.sort_by(|a, b| {
        b.created_from_this_email
            .cmp(&a.created_from_this_email)
            .then(b.booking_in_subject.cmp(&a.booking_in_subject))
            .then(b.link_confidence.cmp(&a.link_confidence))
            .then(a.shipment_created_at.cmp(&b.shipment_created_at))
    });
    candidates.into_iter().next()
}
