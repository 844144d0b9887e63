//! Raw, immutable inputs to the pipeline (§3): `RawEmail` and
//! `RawAttachment` are owned by the mail-source adapter and the PDF
//! extraction service respectively; the pipeline only reads them and
//! writes derived flags back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message as delivered by the mail-source adapter. Immutable after
/// ingest; flags computed by `flagging.rs` live in `FlaggedEmail`, a
/// separate overlay, rather than mutating this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEmail {
    pub id: Uuid,
    pub thread_id: String,
    pub subject: String,
    pub sender_email: String,
    pub sender_display_name: Option<String>,
    /// Actual sender before a forwarding hop, if detected.
    pub true_sender_email: Option<String>,
    pub recipients: Vec<String>,
    pub body_text: String,
    pub headers: HashMap<String, Vec<String>>,
    pub received_at: DateTime<Utc>,
    pub labels: Vec<String>,
    pub in_reply_to: Option<String>,
    pub has_attachments: bool,
}

impl RawEmail {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn sender_domain(&self) -> Option<&str> {
        self.sender_email.split('@').nth(1)
    }

    pub fn true_sender_domain(&self) -> Option<&str> {
        self.true_sender_email
            .as_deref()
            .and_then(|addr| addr.split('@').nth(1))
    }

    /// The domain the pipeline should treat as authoritative for
    /// direction/carrier detection: the true sender if one was recovered
    /// from a forwarding hop, else the envelope sender.
    pub fn effective_sender_domain(&self) -> Option<&str> {
        self.true_sender_domain().or_else(|| self.sender_domain())
    }

    pub fn effective_sender_email(&self) -> &str {
        self.true_sender_email
            .as_deref()
            .unwrap_or(&self.sender_email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAttachment {
    pub id: Uuid,
    pub email_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Opaque pointer into the blob store; the pipeline never interprets
    /// this beyond passing it back to the store.
    pub storage_ref: String,
    /// Set asynchronously by the external PDF/OCR extractor. A missing
    /// value means "extraction hasn't happened yet or failed" and must be
    /// tolerated by every downstream stage, not treated as an error.
    pub extracted_text: Option<String>,
}

const BUSINESS_DOCUMENT_EXTENSIONS: &[&str] =
    &["pdf", "xlsx", "xls", "docx", "doc", "csv", "xlsm"];
const BUSINESS_DOCUMENT_MIME_PREFIXES: &[&str] = &[
    "application/pdf",
    "application/vnd.openxmlformats",
    "application/vnd.ms-excel",
    "application/msword",
    "text/csv",
];

impl RawAttachment {
    pub fn extension(&self) -> Option<&str> {
        self.filename.rsplit('.').next()
    }

    pub fn matches_business_document_shape(&self) -> bool {
        let mime = self.mime_type.to_lowercase();
        if BUSINESS_DOCUMENT_MIME_PREFIXES
            .iter()
            .any(|prefix| mime.starts_with(prefix))
        {
            return true;
        }
        self.extension()
            .map(|ext| {
                BUSINESS_DOCUMENT_EXTENSIONS
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.to_lowercase().starts_with("image/")
    }
}

/// Computed flags overlaid on a `RawEmail` (§3, §4.2). Kept separate from
/// `RawEmail` because the source record is immutable after ingest while
/// these are recomputed whenever flagging logic changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedEmail {
    pub email_id: Uuid,
    pub is_response: bool,
    pub clean_subject: String,
    pub direction: crate::types::Direction,
    pub thread_position: u32,
    pub responds_to_email_id: Option<Uuid>,
    /// Resolved true sender (§4.2): the input `RawEmail::true_sender_email`
    /// when supplied, else whatever `flagEmail` recovered from a forwarded
    /// header block in the body.
    pub true_sender_email: Option<String>,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedAttachment {
    pub attachment_id: Uuid,
    pub is_signature_image: bool,
    pub is_business_document: bool,
    pub flagged_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_email() -> RawEmail {
        RawEmail {
            id: Uuid::new_v4(),
            thread_id: "thread-1".to_string(),
            subject: "Booking Confirmation : 263815227".to_string(),
            sender_email: "ops@intoglo.com".to_string(),
            sender_display_name: None,
            true_sender_email: Some("digital-business@hlag.com".to_string()),
            recipients: vec![],
            body_text: String::new(),
            headers: HashMap::new(),
            received_at: Utc::now(),
            labels: vec![],
            in_reply_to: None,
            has_attachments: false,
        }
    }

    #[test]
    fn effective_sender_prefers_true_sender() {
        let email = sample_email();
        assert_eq!(email.effective_sender_domain(), Some("hlag.com"));
        assert_eq!(email.effective_sender_email(), "digital-business@hlag.com");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut email = sample_email();
        email
            .headers
            .insert("In-Reply-To".to_string(), vec!["<abc@hlag.com>".to_string()]);
        assert_eq!(email.header("in-reply-to"), Some("<abc@hlag.com>"));
    }

    #[test]
    fn business_document_shape_matches_pdf_extension() {
        let att = RawAttachment {
            id: Uuid::new_v4(),
            email_id: Uuid::new_v4(),
            filename: "booking.PDF".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size_bytes: 1024,
            storage_ref: "s3://bucket/key".to_string(),
            extracted_text: None,
        };
        assert!(att.matches_business_document_shape());
    }
}
