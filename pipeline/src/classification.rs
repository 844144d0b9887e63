//! Classification (§4.3): decide `documentType`, `emailType`, direction, and
//! sender category for one email + its attachments.
//!
//! Structurally this mirrors a trait-plus-static-pattern-table extractor:
//! each cascade stage is a table of `(Regex, DocumentType, confidence)`
//! scanned in priority order, first sufficient match wins. The AI fallback
//! is the one stage that leaves the deterministic cascade and calls an
//! injected `DocumentClassifierCapability` (`capabilities` crate); every
//! other stage is pure and synchronous.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use capabilities::{ClassificationPrompt, DocumentClassifierCapability};

use crate::types::{ClassificationMethod, Direction, DocumentType, EmailType, SenderCategory};

pub struct ClassificationInput<'a> {
    pub email_id: Uuid,
    pub subject: &'a str,
    pub clean_subject: &'a str,
    pub sender_email: &'a str,
    pub true_sender_email: Option<&'a str>,
    pub body_text: &'a str,
    pub attachment_filenames: &'a [String],
    pub attachment_text: &'a str,
    pub has_attachments: bool,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub struct DocumentClassification {
    pub email_id: Uuid,
    pub document_type: DocumentType,
    pub document_confidence: u8,
    pub classification_method: ClassificationMethod,
    pub email_type: EmailType,
    pub email_type_confidence: u8,
    pub direction: Direction,
    pub sender_category: SenderCategory,
    pub is_urgent: bool,
    pub needs_manual_review: bool,
}

type PatternTable = Vec<(Regex, DocumentType, u8)>;

static ATTACHMENT_FILENAME_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)booking.?conf").unwrap(), DocumentType::BookingConfirmation, 95),
        (Regex::new(r"(?i)booking.?amend").unwrap(), DocumentType::BookingAmendment, 93),
        (Regex::new(r"(?i)(si.?draft|shipping.?instruction.?draft)").unwrap(), DocumentType::SiDraft, 92),
        (Regex::new(r"(?i)(si|shipping.?instruction)").unwrap(), DocumentType::ShippingInstruction, 88),
        (Regex::new(r"(?i)vgm").unwrap(), DocumentType::VgmSubmission, 90),
        (Regex::new(r"(?i)hbl.?draft").unwrap(), DocumentType::HblDraft, 93),
        (Regex::new(r"(?i)\bhbl\b|house.?bill").unwrap(), DocumentType::Hbl, 92),
        (Regex::new(r"(?i)\bbl\b|bill.?of.?lading|\bmbl\b").unwrap(), DocumentType::BillOfLading, 90),
        (Regex::new(r"(?i)arrival.?notice").unwrap(), DocumentType::ArrivalNotice, 93),
        (Regex::new(r"(?i)delivery.?order").unwrap(), DocumentType::DeliveryOrder, 92),
        (Regex::new(r"(?i)customs.?entry").unwrap(), DocumentType::CustomsEntry, 90),
        (Regex::new(r"(?i)entry.?summary").unwrap(), DocumentType::EntrySummary, 90),
        (Regex::new(r"(?i)duty.?invoice").unwrap(), DocumentType::DutyInvoice, 90),
        (Regex::new(r"(?i)invoice").unwrap(), DocumentType::Invoice, 85),
        (Regex::new(r"(?i)\bpod\b|proof.?of.?delivery").unwrap(), DocumentType::Pod, 90),
    ]
});

/// Carrier-specific and carrier-agnostic markers inside attachment text.
static BODY_MARKERS: LazyLock<PatternTable> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)booking\s+confirmation").unwrap(), DocumentType::BookingConfirmation, 90),
        (Regex::new(r"(?i)bill\s+of\s+lading").unwrap(), DocumentType::BillOfLading, 88),
        (Regex::new(r"(?i)arrival\s+notice").unwrap(), DocumentType::ArrivalNotice, 88),
        (Regex::new(r"(?i)verified\s+gross\s+mass").unwrap(), DocumentType::VgmSubmission, 87),
        (Regex::new(r"(?i)shipping\s+instructions?").unwrap(), DocumentType::ShippingInstruction, 85),
        (Regex::new(r"(?i)delivery\s+order").unwrap(), DocumentType::DeliveryOrder, 87),
    ]
});

static SUBJECT_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    let mut patterns: PatternTable = vec![
        (Regex::new(r"(?i)^booking\s+confirmation\s*:?\s*26\d{7}$").unwrap(), DocumentType::BookingConfirmation, 90),
    ];
    for marker in crate::carrier_patterns::subject_markers() {
        patterns.push((marker.clone(), DocumentType::BookingConfirmation, 88));
    }
    patterns.extend(vec![
        (Regex::new(r"(?i)booking\s+amendment").unwrap(), DocumentType::BookingAmendment, 85),
        (Regex::new(r"(?i)booking\s+cancell?ation").unwrap(), DocumentType::BookingCancellation, 88),
        (Regex::new(r"(?i)\barrival\s+notice\b").unwrap(), DocumentType::ArrivalNotice, 85),
        (Regex::new(r"(?i)\bvgm\b").unwrap(), DocumentType::VgmSubmission, 80),
        (Regex::new(r"(?i)\bsi\s+(draft|confirmation|submission)\b").unwrap(), DocumentType::ShippingInstruction, 80),
    ]);
    patterns
});

static BODY_KEYWORD_PATTERNS: LazyLock<PatternTable> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)please\s+find\s+attached.*booking\s+confirmation").unwrap(), DocumentType::BookingConfirmation, 75),
        (Regex::new(r"(?i)your\s+shipment\s+has\s+arrived").unwrap(), DocumentType::ArrivalNotice, 72),
        (Regex::new(r"(?i)kindly\s+submit\s+vgm").unwrap(), DocumentType::VgmSubmission, 72),
        (Regex::new(r"(?i)attached\s+is\s+the\s+draft\s+bill\s+of\s+lading").unwrap(), DocumentType::BlDraft, 74),
        (Regex::new(r"(?i)customs\s+hold").unwrap(), DocumentType::ExceptionNotice, 70),
    ]
});

type EmailTypeTable = Vec<(Regex, EmailType, u8)>;

static EMAIL_TYPE_MARKERS: LazyLock<EmailTypeTable> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)\bconfirm(ed|ation)?\b").unwrap(), EmailType::Confirmation, 78),
        (Regex::new(r"(?i)\bamend(ment|ed)?\b|\brevised?\b").unwrap(), EmailType::Amendment, 78),
        (Regex::new(r"(?i)\bcancel(led|lation)?\b").unwrap(), EmailType::Cancellation, 80),
        (Regex::new(r"(?i)\b(please|kindly)\s+(provide|submit|send|advise)\b").unwrap(), EmailType::Request, 72),
        (Regex::new(r"(?i)\bsubmi(t|ssion|tted)\b").unwrap(), EmailType::Submission, 70),
        (Regex::new(r"(?i)\bnotif(y|ication)\b|\bfyi\b").unwrap(), EmailType::Notification, 68),
        (Regex::new(r"(?i)\b(exception|hold|discrepancy|issue)\b").unwrap(), EmailType::Exception, 74),
        (Regex::new(r"(?i)\b(draft|review)\b").unwrap(), EmailType::DraftReview, 70),
        (Regex::new(r"(?i)\binstruction(s)?\b").unwrap(), EmailType::Instruction, 70),
    ]
});

const CARRIER_DOMAIN_SENDER_CONFIDENCE: u8 = 70;
const BROKER_KEYWORDS: &[&str] = &["broker", "clearance", "customhouse"];
const CUSTOMS_KEYWORDS: &[&str] = &["customs", "cbp.gov", "cbsa"];

fn classify_sender_category(domain: &str, own_domains_hint: bool, carrier_domains: &[String]) -> SenderCategory {
    let domain = domain.to_lowercase();
    if own_domains_hint {
        return SenderCategory::Internal;
    }
    if carrier_domains.iter().any(|c| domain.contains(c.as_str())) {
        return SenderCategory::Carrier;
    }
    if CUSTOMS_KEYWORDS.iter().any(|k| domain.contains(k)) {
        return SenderCategory::Customs;
    }
    if BROKER_KEYWORDS.iter().any(|k| domain.contains(k)) {
        return SenderCategory::Broker;
    }
    SenderCategory::Customer
}

fn best_match(table: &PatternTable, text: &str) -> Option<(DocumentType, u8)> {
    table
        .iter()
        .find(|(re, _, _)| re.is_match(text))
        .map(|(_, ty, conf)| (*ty, *conf))
}

fn classify_email_type(subject: &str, body: &str) -> (EmailType, u8) {
    let combined = format!("{subject}\n{body}");
    EMAIL_TYPE_MARKERS
        .iter()
        .find(|(re, _, _)| re.is_match(&combined))
        .map(|(_, ty, conf)| (*ty, *conf))
        .unwrap_or((EmailType::Correspondence, 50))
}

/// Run the deterministic document-type cascade. Returns `None` when no
/// stage produced a match, signalling the caller should consider the AI
/// fallback (stage 6).
fn classify_document_type_cascade(
    input: &ClassificationInput<'_>,
) -> Option<(DocumentType, u8, ClassificationMethod)> {
    for filename in input.attachment_filenames {
        if let Some((ty, conf)) = best_match(&ATTACHMENT_FILENAME_PATTERNS, filename) {
            return Some((ty, conf, ClassificationMethod::AttachmentFilename));
        }
    }

    if !input.attachment_text.is_empty() {
        if let Some((ty, conf)) = best_match(&BODY_MARKERS, input.attachment_text) {
            return Some((ty, conf, ClassificationMethod::BodyText));
        }
    }

    if let Some((ty, conf)) = best_match(&SUBJECT_PATTERNS, input.subject) {
        return Some((ty, conf, ClassificationMethod::Subject));
    }

    if let Some((ty, conf)) = best_match(&BODY_KEYWORD_PATTERNS, &input.body_text.to_lowercase()) {
        return Some((ty, conf, ClassificationMethod::Keyword));
    }

    None
}

pub fn classify(
    input: &ClassificationInput<'_>,
    carrier_domains: &[String],
    own_domains: &std::collections::HashSet<String>,
    ai_capability: &dyn DocumentClassifierCapability,
) -> DocumentClassification {
    let sender_domain = input
        .true_sender_email
        .and_then(crate::util::domain_of)
        .or_else(|| crate::util::domain_of(input.sender_email))
        .unwrap_or_default()
        .to_lowercase();
    let is_own_domain = own_domains.contains(&sender_domain);
    let sender_category = classify_sender_category(&sender_domain, is_own_domain, carrier_domains);

    let cascade_result = classify_document_type_cascade(input);

    let (document_type, document_confidence, classification_method) = match cascade_result {
        Some(result) => result,
        None => {
            if ai_capability.is_available() {
                let labels: Vec<&str> = ALL_DOCUMENT_TYPE_LABELS.to_vec();
                let prompt = ClassificationPrompt {
                    subject: input.subject,
                    body: input.body_text,
                    attachment_text: input.attachment_text,
                    candidate_labels: &labels,
                };
                match ai_capability.classify(&prompt) {
                    Ok(Some(suggestion)) => {
                        let ty = suggestion
                            .label
                            .parse::<DocumentType>()
                            .unwrap_or(DocumentType::Unknown);
                        (ty, suggestion.confidence.min(80), ClassificationMethod::AiFallback)
                    }
                    _ => (DocumentType::Unknown, 0, ClassificationMethod::AiFallback),
                }
            } else {
                (DocumentType::Unknown, 0, ClassificationMethod::AiFallback)
            }
        }
    };

    let (email_type, email_type_confidence) = classify_email_type(input.subject, input.body_text);

    let is_urgent = input.subject.to_lowercase().contains("urgent")
        || input.body_text.to_lowercase().contains("urgent action required");

    DocumentClassification {
        email_id: input.email_id,
        document_type,
        document_confidence,
        classification_method,
        email_type,
        email_type_confidence,
        direction: input.direction,
        sender_category,
        is_urgent,
        needs_manual_review: document_confidence < 50,
    }
}

const ALL_DOCUMENT_TYPE_LABELS: &[&str] = &[
    "booking_confirmation",
    "booking_amendment",
    "booking_cancellation",
    "shipping_instruction",
    "si_draft",
    "si_submission",
    "si_confirmation",
    "vgm_submission",
    "vgm_confirmation",
    "bill_of_lading",
    "bl_draft",
    "hbl",
    "hbl_draft",
    "arrival_notice",
    "delivery_order",
    "customs_entry",
    "entry_summary",
    "duty_invoice",
    "invoice",
    "exception_notice",
    "pod",
    "general_correspondence",
];

/// Thread Authority Rule (§4.3): a response's workflow-significant
/// `documentType` is downgraded to `general_correspondence` unless it
/// carries a new business-document attachment, when it disagrees with the
/// thread's already-established authoritative type.
pub fn apply_thread_authority_rule(
    classification: &mut DocumentClassification,
    is_response: bool,
    thread_authoritative_type: Option<DocumentType>,
    has_new_business_attachment: bool,
) {
    if !is_response || has_new_business_attachment {
        return;
    }
    if let Some(authoritative) = thread_authoritative_type {
        if authoritative != classification.document_type {
            classification.document_type = DocumentType::GeneralCorrespondence;
            classification.classification_method = ClassificationMethod::Pattern;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capabilities::NoopCapability;

    fn base_input<'a>(filenames: &'a [String]) -> ClassificationInput<'a> {
        ClassificationInput {
            email_id: Uuid::new_v4(),
            subject: "HL-22970937 USSAV RESILIENT",
            clean_subject: "HL-22970937 USSAV RESILIENT",
            sender_email: "digital-business@hlag.com",
            true_sender_email: None,
            body_text: "Booking Confirmation attached.",
            attachment_filenames: filenames,
            attachment_text: "",
            has_attachments: false,
            direction: Direction::Inbound,
        }
    }

    #[test]
    fn subject_pattern_classifies_hlcu_booking() {
        let input = base_input(&[]);
        let noop = NoopCapability;
        let result = classify(&input, &[], &std::collections::HashSet::new(), &noop);
        assert_eq!(result.document_type, DocumentType::BookingConfirmation);
        assert_eq!(result.classification_method, ClassificationMethod::Subject);
        assert!(result.document_confidence >= 80);
    }

    #[test]
    fn attachment_filename_wins_over_subject() {
        let filenames = vec!["arrival_notice_22970937.pdf".to_string()];
        let input = base_input(&filenames);
        let noop = NoopCapability;
        let result = classify(&input, &[], &std::collections::HashSet::new(), &noop);
        assert_eq!(result.document_type, DocumentType::ArrivalNotice);
        assert_eq!(result.classification_method, ClassificationMethod::AttachmentFilename);
    }

    #[test]
    fn no_match_with_unavailable_ai_falls_back_to_unknown() {
        let input = ClassificationInput {
            subject: "quick question",
            body_text: "hope you're well",
            ..base_input(&[])
        };
        let noop = NoopCapability;
        let result = classify(&input, &[], &std::collections::HashSet::new(), &noop);
        assert_eq!(result.document_type, DocumentType::Unknown);
        assert!(result.needs_manual_review);
    }

    #[test]
    fn thread_authority_downgrades_disagreeing_response() {
        let mut classification =
            classify(&base_input(&[]), &[], &std::collections::HashSet::new(), &NoopCapability);
        apply_thread_authority_rule(
            &mut classification,
            true,
            Some(DocumentType::ArrivalNotice),
            false,
        );
        assert_eq!(classification.document_type, DocumentType::GeneralCorrespondence);
    }

    #[test]
    fn thread_authority_preserves_new_attachment() {
        let mut classification =
            classify(&base_input(&[]), &[], &std::collections::HashSet::new(), &NoopCapability);
        let original = classification.document_type;
        apply_thread_authority_rule(
            &mut classification,
            true,
            Some(DocumentType::ArrivalNotice),
            true,
        );
        assert_eq!(classification.document_type, original);
    }
}
