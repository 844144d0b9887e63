//! Flagging (§4.2): cheap, deterministic triage that runs before any
//! LLM/embedding spend. Never fails — unknown shapes fall through as safe
//! defaults for downstream stages.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::raw_email::{FlaggedAttachment, FlaggedEmail, RawAttachment, RawEmail};
use crate::types::Direction;

static REPLY_FORWARD_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(re|fw|fwd|aw|tr|res|rv)\s*:\s*").unwrap()
});

static QUOTED_HEADER_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(on .+ wrote:|from:\s*.+\s*\n\s*sent:|-{2,}\s*original message\s*-{2,})")
        .unwrap()
});

static FORWARDED_FROM_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*from:\s*(.+)$").unwrap());

/// Signature/logo/social-icon filename shapes common enough across carrier
/// and customer signatures to treat as never-a-business-document.
static SIGNATURE_FILENAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^image0*\d*\.(png|jpe?g|gif)$").unwrap(),
        Regex::new(r"(?i)(logo|signature|icon|banner)").unwrap(),
        Regex::new(r"(?i)^(facebook|twitter|linkedin|instagram|youtube)[-_]?(icon)?\.(png|jpe?g|gif)$")
            .unwrap(),
    ]
});

const SIGNATURE_IMAGE_SIZE_THRESHOLD_BYTES: u64 = 500 * 1024;

fn strip_reply_forward_prefixes(subject: &str) -> String {
    let mut current = subject.trim().to_string();
    loop {
        let stripped = REPLY_FORWARD_PREFIX.replace(&current, "").trim().to_string();
        if stripped == current {
            break;
        }
        current = stripped;
    }
    collapse_whitespace(&current)
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_for_hash(subject: &str, body: &str) -> String {
    format!(
        "{}\u{1}{}",
        subject.trim().to_lowercase(),
        body.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    )
}

fn content_hash(clean_subject: &str, body_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_hash(clean_subject, body_text).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn extract_true_sender(body_text: &str) -> Option<String> {
    FORWARDED_FROM_HEADER
        .captures(body_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .and_then(|line| {
            let addrs = crate::util::extract_emails(&line);
            addrs.into_iter().next()
        })
}

/// Flag one email. `prior_in_thread` is the count of other messages in the
/// same thread with `received_at` strictly before this one's — the caller
/// (orchestrator/store) supplies it since only the store knows thread
/// membership.
pub fn flag_email(email: &RawEmail, prior_in_thread: u32, own_domains: &HashSet<String>) -> FlaggedEmail {
    let clean_subject = strip_reply_forward_prefixes(&email.subject);
    let has_in_reply_to = email.in_reply_to.is_some() || !email.header_values("In-Reply-To").is_empty();
    let has_quoted_block = QUOTED_HEADER_BLOCK.is_match(&email.body_text);
    let is_response = clean_subject != collapse_whitespace(email.subject.trim())
        || has_in_reply_to
        || has_quoted_block;

    let true_sender_email = email.true_sender_email.clone().or_else(|| {
        if is_response {
            extract_true_sender(&email.body_text)
        } else {
            None
        }
    });

    let direction_domain = true_sender_email
        .as_deref()
        .and_then(crate::util::domain_of)
        .or_else(|| email.sender_domain())
        .unwrap_or_default()
        .to_lowercase();

    let direction = if own_domains.contains(&direction_domain) {
        Direction::Outbound
    } else {
        Direction::Inbound
    };

    FlaggedEmail {
        email_id: email.id,
        is_response,
        clean_subject: clean_subject.clone(),
        direction,
        thread_position: prior_in_thread + 1,
        responds_to_email_id: None,
        true_sender_email,
        content_hash: content_hash(&clean_subject, &email.body_text),
    }
}

pub fn classify_attachment(att: &RawAttachment, flagged_at: chrono::DateTime<chrono::Utc>) -> FlaggedAttachment {
    let is_business_document = att.matches_business_document_shape();

    let is_signature_image = att.is_image()
        && (SIGNATURE_FILENAME_PATTERNS
            .iter()
            .any(|pattern| pattern.is_match(&att.filename))
            || (att.size_bytes < SIGNATURE_IMAGE_SIZE_THRESHOLD_BYTES
                && looks_like_generic_filename(&att.filename)));

    FlaggedAttachment {
        attachment_id: att.id,
        is_signature_image,
        is_business_document: is_business_document && !is_signature_image,
        flagged_at,
    }
}

fn looks_like_generic_filename(filename: &str) -> bool {
    let stem = filename.rsplit('.').nth(1).unwrap_or(filename);
    stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && stem.len() <= 12
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn base_email(subject: &str, body: &str) -> RawEmail {
        RawEmail {
            id: Uuid::new_v4(),
            thread_id: "t1".to_string(),
            subject: subject.to_string(),
            sender_email: "ops@intoglo.com".to_string(),
            sender_display_name: None,
            true_sender_email: None,
            recipients: vec![],
            body_text: body.to_string(),
            headers: HashMap::new(),
            received_at: chrono::Utc::now(),
            labels: vec![],
            in_reply_to: None,
            has_attachments: false,
        }
    }

    #[test]
    fn strips_repeated_reply_forward_prefixes() {
        assert_eq!(
            strip_reply_forward_prefixes("Re: Fwd: Booking Confirmation : 263815227"),
            "Booking Confirmation : 263815227"
        );
    }

    #[test]
    fn detects_response_via_subject_prefix() {
        let email = base_email("Re: Booking Confirmation : 123", "hello");
        let flagged = flag_email(&email, 1, &HashSet::new());
        assert!(flagged.is_response);
        assert_eq!(flagged.thread_position, 2);
        assert_eq!(flagged.clean_subject, "Booking Confirmation : 123");
    }

    #[test]
    fn recovers_true_sender_from_forwarded_header() {
        let body = "---------- Forwarded message ----------\nFrom: digital-business@hlag.com\nSubject: Booking";
        let email = base_email("Fwd: Booking Confirmation : 263815227", body);
        let flagged = flag_email(&email, 0, &HashSet::new());
        assert!(flagged.is_response);
    }

    #[test]
    fn own_domain_marks_outbound() {
        let mut own = HashSet::new();
        own.insert("intoglo.com".to_string());
        let email = base_email("Booking Confirmation : 123", "hi");
        let flagged = flag_email(&email, 0, &own);
        assert_eq!(flagged.direction, Direction::Outbound);
    }

    #[test]
    fn s2_forwarded_confirmation_via_own_mailbox_resolves_inbound_from_true_sender_field() {
        let mut own = HashSet::new();
        own.insert("intoglo.com".to_string());
        let mut email = base_email("Booking Confirmation : 263815227", "no forwarded header here");
        email.sender_email = "ops@intoglo.com".to_string();
        email.true_sender_email = Some("digital-business@hlag.com".to_string());
        let flagged = flag_email(&email, 0, &own);
        assert_eq!(flagged.direction, Direction::Inbound);
        assert_eq!(flagged.true_sender_email.as_deref(), Some("digital-business@hlag.com"));
    }

    #[test]
    fn signature_image_is_not_a_business_document() {
        let att = RawAttachment {
            id: Uuid::new_v4(),
            email_id: Uuid::new_v4(),
            filename: "logo.png".to_string(),
            mime_type: "image/png".to_string(),
            size_bytes: 2048,
            storage_ref: "ref".to_string(),
            extracted_text: None,
        };
        let flagged = classify_attachment(&att, chrono::Utc::now());
        assert!(flagged.is_signature_image);
        assert!(!flagged.is_business_document);
    }

    #[test]
    fn pdf_attachment_is_a_business_document() {
        let att = RawAttachment {
            id: Uuid::new_v4(),
            email_id: Uuid::new_v4(),
            filename: "HL-22970937.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 40_000,
            storage_ref: "ref".to_string(),
            extracted_text: None,
        };
        let flagged = classify_attachment(&att, chrono::Utc::now());
        assert!(flagged.is_business_document);
        assert!(!flagged.is_signature_image);
    }
}
