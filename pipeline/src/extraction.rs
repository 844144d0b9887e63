//! Extraction (§4.4): schema-first, regex-driven entity harvesting from
//! email body and concatenated PDF text. AI extraction is intentionally
//! absent from the default path — this mirrors the trait + static
//! `LazyLock<Regex>` table + priority registry architecture used elsewhere
//! in this codebase for pattern-driven text harvesting, generalized here to
//! carrier-aware booking/BL/HBL/container patterns instead of artifact URLs.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::types::{EntityType, ExtractionMethod};

#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub email_id: Uuid,
    pub attachment_id: Option<Uuid>,
    pub entity_type: EntityType,
    pub value: String,
    pub confidence: u8,
    pub extraction_method: ExtractionMethod,
    pub source_field: String,
}

/// Everything extraction could find for one email, assembled from whatever
/// sub-extractors fired. Nullable fields mean "not found", not "empty
/// string" — callers must not treat the two the same.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractedDocumentData {
    pub booking_number: Option<FieldValue>,
    pub mbl_number: Option<FieldValue>,
    pub hbl_number: Option<FieldValue>,
    pub container_numbers: Vec<FieldValue>,
    pub vessel_name: Option<FieldValue>,
    pub voyage_number: Option<FieldValue>,
    pub port_of_loading: Option<FieldValue>,
    pub port_of_loading_code: Option<FieldValue>,
    pub port_of_discharge: Option<FieldValue>,
    pub port_of_discharge_code: Option<FieldValue>,
    pub etd: Option<FieldValue>,
    pub eta: Option<FieldValue>,
    pub si_cutoff: Option<FieldValue>,
    pub vgm_cutoff: Option<FieldValue>,
    pub cargo_cutoff: Option<FieldValue>,
    pub gate_cutoff: Option<FieldValue>,
    pub doc_cutoff: Option<FieldValue>,
    pub shipper_name: Option<FieldValue>,
    pub shipper_address: Option<FieldValue>,
    pub consignee_name: Option<FieldValue>,
    pub consignee_address: Option<FieldValue>,
    pub notify_party_name: Option<FieldValue>,
    pub notify_party_address: Option<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    pub value: String,
    pub confidence: u8,
    pub method: ExtractionMethod,
}

/// `(carrier code prefix regex applied to entity_type, compiled pattern)`.
/// `None` carrier code means the pattern is carrier-agnostic and tried
/// last, after every carrier-specific pattern for that field.
struct FieldPattern {
    entity_type: EntityType,
    carrier: Option<&'static str>,
    regex: Regex,
}

static BODY_FIELD_PATTERNS: LazyLock<Vec<FieldPattern>> = LazyLock::new(|| {
    let mut patterns: Vec<FieldPattern> = crate::carrier_patterns::booking_number_patterns()
        .into_iter()
        .map(|(carrier, regex)| FieldPattern {
            entity_type: EntityType::BookingNumber,
            carrier: Some(carrier),
            regex: regex.clone(),
        })
        .collect();

    patterns.extend(vec![
        FieldPattern { entity_type: EntityType::BookingNumber, carrier: None, regex: Regex::new(r"(?i)booking\s*(?:no\.?|number|confirmation)?\s*[:#]?\s*([A-Z]{0,4}\d{7,10})").unwrap() },

        FieldPattern { entity_type: EntityType::MblNumber, carrier: None, regex: Regex::new(r"(?i)\bm\.?b\.?l\.?\s*(?:no\.?|number)?\s*[:#]?\s*([A-Z]{2,4}\d{6,12})").unwrap() },
        FieldPattern { entity_type: EntityType::HblNumber, carrier: None, regex: Regex::new(r"(?i)\bh\.?b\.?l\.?\s*(?:no\.?|number)?\s*[:#]?\s*([A-Z]{2,7}\d{6,12})").unwrap() },

        FieldPattern { entity_type: EntityType::ContainerNumber, carrier: None, regex: Regex::new(r"\b[A-Z]{4}\d{7}\b").unwrap() },

        FieldPattern { entity_type: EntityType::VesselName, carrier: None, regex: Regex::new(r"(?i)vessel\s*(?:name)?\s*[:\-]\s*([A-Z][A-Za-z0-9 .'-]{2,40})").unwrap() },
        FieldPattern { entity_type: EntityType::VoyageNumber, carrier: None, regex: Regex::new(r"(?i)voyage\s*(?:no\.?|number)?\s*[:\-]\s*([A-Z0-9]{2,10})").unwrap() },

        FieldPattern { entity_type: EntityType::PortOfLoadingCode, carrier: None, regex: Regex::new(r"(?i)port\s+of\s+loading\s*[:\-]?\s*.*?\(([A-Z]{5})\)").unwrap() },
        FieldPattern { entity_type: EntityType::PortOfDischargeCode, carrier: None, regex: Regex::new(r"(?i)port\s+of\s+discharge\s*[:\-]?\s*.*?\(([A-Z]{5})\)").unwrap() },
    ]);

    patterns
});

static SUBJECT_FALLBACK_PATTERNS: LazyLock<Vec<FieldPattern>> = LazyLock::new(|| {
    vec![
        FieldPattern { entity_type: EntityType::BookingNumber, carrier: None, regex: Regex::new(r"\b(26\d{7})\b").unwrap() },
        FieldPattern { entity_type: EntityType::BookingNumber, carrier: None, regex: Regex::new(r"\b(HLCU\d{7,10}|HL-?\d{8})\b").unwrap() },
        FieldPattern { entity_type: EntityType::ContainerNumber, carrier: None, regex: Regex::new(r"\b([A-Z]{4}\d{7})\b").unwrap() },
        FieldPattern { entity_type: EntityType::HblNumber, carrier: None, regex: Regex::new(r"\b([A-Z]{2,7}\d{6,12})\b").unwrap() },
    ]
});

/// Intoglo deal-ID and customer-reference subject patterns (§4.4.2),
/// surfaced separately since they don't map onto `EntityType` directly and
/// exist for linking/tracing rather than shipment fields.
pub static DEAL_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{5,7}\d{8,12}_I\b").unwrap());

pub static US_CUSTOMS_ENTRY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{7}-\d\b").unwrap());

/// Key-value table extraction inside PDF text: `ETD: ...`, `VGM cut-off: ...`.
struct KeyValueLabel {
    entity_type: EntityType,
    regex: Regex,
}

static KEY_VALUE_LABELS: LazyLock<Vec<KeyValueLabel>> = LazyLock::new(|| {
    vec![
        KeyValueLabel { entity_type: EntityType::Etd, regex: Regex::new(r"(?i)etd\s*[:\-]\s*([0-9A-Za-z,\- :]{6,25})").unwrap() },
        KeyValueLabel { entity_type: EntityType::Eta, regex: Regex::new(r"(?i)eta\s*[:\-]\s*([0-9A-Za-z,\- :]{6,25})").unwrap() },
        KeyValueLabel { entity_type: EntityType::SiCutoff, regex: Regex::new(r"(?i)si\s*clos(?:ing|e)\s*[:\-]?\s*([0-9A-Za-z,\- :]{6,25})").unwrap() },
        KeyValueLabel { entity_type: EntityType::VgmCutoff, regex: Regex::new(r"(?i)vgm\s*cut-?off\s*[:\-]\s*([0-9A-Za-z,\- :]{6,25})").unwrap() },
        KeyValueLabel { entity_type: EntityType::CargoCutoff, regex: Regex::new(r"(?i)(?:fcl\s+delivery|cargo)\s*cut-?off\s*[:\-]\s*([0-9A-Za-z,\- :]{6,25})").unwrap() },
        KeyValueLabel { entity_type: EntityType::GateCutoff, regex: Regex::new(r"(?i)gate\s*cut-?off\s*[:\-]\s*([0-9A-Za-z,\- :]{6,25})").unwrap() },
        KeyValueLabel { entity_type: EntityType::DocCutoff, regex: Regex::new(r"(?i)doc(?:umentation)?\s*cut-?off\s*[:\-]\s*([0-9A-Za-z,\- :]{6,25})").unwrap() },
    ]
});

const DATE_FORMATS: &[&str] = &["%d-%b-%Y %H:%M", "%d-%b-%Y", "%Y-%m-%d", "%d/%m/%Y", "%B %d, %Y"];

/// Normalize a date/time string to ISO-8601, preserving time-of-day when
/// present (§4.4.4). Returns the original trimmed string if no known
/// format matches, so downstream code still has something to show a human.
pub fn normalize_date(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches(',');
    for format in &["%d-%b-%Y %H:%M", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
            return dt.format("%Y-%m-%dT%H:%M").to_string();
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    trimmed.to_string()
}

fn confidence_for(method: ExtractionMethod) -> u8 {
    match method {
        ExtractionMethod::Schema => 90,
        ExtractionMethod::RegexSubject => 75,
        ExtractionMethod::RegexBody => 80,
        ExtractionMethod::Ai => 60,
    }
}

fn field(value: impl Into<String>, method: ExtractionMethod) -> FieldValue {
    FieldValue { value: value.into(), confidence: confidence_for(method), method }
}

fn single_capture(pattern: &FieldPattern, text: &str) -> Option<String> {
    pattern.regex.captures(text).map(|caps| {
        let raw = caps.get(1).or_else(|| caps.get(0)).unwrap().as_str().trim().to_string();
        if pattern.entity_type == EntityType::BookingNumber {
            normalize_booking_value(&raw)
        } else {
            raw
        }
    })
}

static CARRIER_PREFIXED_BOOKING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:HLCU|HL-?|MAEU|COSU|CEI|AMC|CAD)(\d+)$").unwrap());

/// Strip a recognized carrier-code prefix from a matched booking number so
/// `HL-22970937` and `HLCU22970937` both normalize to `22970937`.
fn normalize_booking_value(raw: &str) -> String {
    CARRIER_PREFIXED_BOOKING
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Run the full sub-extractor chain over body text (carrier-aware field
/// regexes, then the key-value label table) and subject-line fallback for
/// anything the body missed.
pub fn extract_document_data(
    body_text: &str,
    subject: &str,
    carrier_domain: Option<&str>,
) -> ExtractedDocumentData {
    let mut data = ExtractedDocumentData::default();
    let mut containers: HashSet<String> = HashSet::new();

    // Stage 1: carrier-aware field regexes over body, carrier-specific first.
    let mut carrier_specific: Vec<&FieldPattern> = Vec::new();
    let mut generic: Vec<&FieldPattern> = Vec::new();
    for pattern in BODY_FIELD_PATTERNS.iter() {
        match (pattern.carrier, carrier_domain) {
            (Some(carrier), Some(domain)) if domain.contains(carrier) => carrier_specific.push(pattern),
            (None, _) => generic.push(pattern),
            _ => {}
        }
    }
    for pattern in carrier_specific.into_iter().chain(generic) {
        if pattern.entity_type == EntityType::ContainerNumber {
            for m in pattern.regex.find_iter(body_text) {
                containers.insert(m.as_str().to_string());
            }
            continue;
        }
        if already_set(&data, pattern.entity_type) {
            continue;
        }
        if let Some(value) = single_capture(pattern, body_text) {
            set_field(&mut data, pattern.entity_type, field(value, ExtractionMethod::RegexBody));
        }
    }

    // Stage 2: subject-line fallback for anything still missing.
    for pattern in SUBJECT_FALLBACK_PATTERNS.iter() {
        if pattern.entity_type == EntityType::ContainerNumber {
            for m in pattern.regex.find_iter(subject) {
                containers.insert(m.as_str().to_string());
            }
            continue;
        }
        if already_set(&data, pattern.entity_type) {
            continue;
        }
        if let Some(value) = single_capture(pattern, subject) {
            set_field(&mut data, pattern.entity_type, field(value, ExtractionMethod::RegexSubject));
        }
    }

    // Stage 3: key-value label table (dates/cutoffs), normalized per stage 4.
    for label in KEY_VALUE_LABELS.iter() {
        if already_set(&data, label.entity_type) {
            continue;
        }
        if let Some(caps) = label.regex.captures(body_text) {
            let raw = caps.get(1).unwrap().as_str();
            let normalized = normalize_date(raw);
            set_field(&mut data, label.entity_type, field(normalized, ExtractionMethod::RegexBody));
        }
    }

    data.container_numbers = containers
        .into_iter()
        .map(|c| field(c, ExtractionMethod::RegexBody))
        .collect();
    data.container_numbers.sort_by(|a, b| a.value.cmp(&b.value));

    data
}

fn already_set(data: &ExtractedDocumentData, entity_type: EntityType) -> bool {
    get_field(data, entity_type).is_some()
}

fn get_field(data: &ExtractedDocumentData, entity_type: EntityType) -> Option<&FieldValue> {
    match entity_type {
        EntityType::BookingNumber => data.booking_number.as_ref(),
        EntityType::MblNumber => data.mbl_number.as_ref(),
        EntityType::HblNumber => data.hbl_number.as_ref(),
        EntityType::VesselName => data.vessel_name.as_ref(),
        EntityType::VoyageNumber => data.voyage_number.as_ref(),
        EntityType::PortOfLoading => data.port_of_loading.as_ref(),
        EntityType::PortOfLoadingCode => data.port_of_loading_code.as_ref(),
        EntityType::PortOfDischarge => data.port_of_discharge.as_ref(),
        EntityType::PortOfDischargeCode => data.port_of_discharge_code.as_ref(),
        EntityType::Etd => data.etd.as_ref(),
        EntityType::Eta => data.eta.as_ref(),
        EntityType::SiCutoff => data.si_cutoff.as_ref(),
        EntityType::VgmCutoff => data.vgm_cutoff.as_ref(),
        EntityType::CargoCutoff => data.cargo_cutoff.as_ref(),
        EntityType::GateCutoff => data.gate_cutoff.as_ref(),
        EntityType::DocCutoff => data.doc_cutoff.as_ref(),
        _ => None,
    }
}

fn set_field(data: &mut ExtractedDocumentData, entity_type: EntityType, value: FieldValue) {
    match entity_type {
        EntityType::BookingNumber => data.booking_number = Some(value),
        EntityType::MblNumber => data.mbl_number = Some(value),
        EntityType::HblNumber => data.hbl_number = Some(value),
        EntityType::VesselName => data.vessel_name = Some(value),
        EntityType::VoyageNumber => data.voyage_number = Some(value),
        EntityType::PortOfLoading => data.port_of_loading = Some(value),
        EntityType::PortOfLoadingCode => data.port_of_loading_code = Some(value),
        EntityType::PortOfDischarge => data.port_of_discharge = Some(value),
        EntityType::PortOfDischargeCode => data.port_of_discharge_code = Some(value),
        EntityType::Etd => data.etd = Some(value),
        EntityType::Eta => data.eta = Some(value),
        EntityType::SiCutoff => data.si_cutoff = Some(value),
        EntityType::VgmCutoff => data.vgm_cutoff = Some(value),
        EntityType::CargoCutoff => data.cargo_cutoff = Some(value),
        EntityType::GateCutoff => data.gate_cutoff = Some(value),
        EntityType::DocCutoff => data.doc_cutoff = Some(value),
        _ => {}
    }
}

static PARTY_BLOCK_PATTERNS: LazyLock<Vec<(EntityType, EntityType, Regex)>> = LazyLock::new(|| {
    vec![
        (EntityType::ShipperName, EntityType::ShipperAddress, Regex::new(r"(?is)shipper\s*[:\-]\s*(.+?)\n\n").unwrap()),
        (EntityType::ConsigneeName, EntityType::ConsigneeAddress, Regex::new(r"(?is)consignee\s*[:\-]\s*(.+?)\n\n").unwrap()),
        (EntityType::NotifyPartyName, EntityType::NotifyPartyAddress, Regex::new(r"(?is)notify\s*party\s*[:\-]\s*(.+?)\n\n").unwrap()),
    ]
});

/// Party extraction (§4.4.5), restricted by the caller to `si_draft`,
/// `hbl_draft`, and `hbl` documents. Blocks naming the forwarder's own
/// company are dropped per I5.
pub fn extract_parties(text: &str, forwarder_company_name: &str) -> ExtractedDocumentData {
    let mut data = ExtractedDocumentData::default();
    for (name_type, address_type, pattern) in PARTY_BLOCK_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            let block = caps.get(1).unwrap().as_str().trim();
            if crate::util::contains_company_name(block, forwarder_company_name) {
                continue;
            }
            let mut lines = block.lines();
            let name = lines.next().unwrap_or("").trim().to_string();
            let address = lines.collect::<Vec<_>>().join(", ").trim().to_string();
            if !name.is_empty() {
                set_field(&mut data, *name_type, field(name, ExtractionMethod::RegexBody));
            }
            if !address.is_empty() {
                set_field(&mut data, *address_type, field(address, ExtractionMethod::RegexBody));
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1_BODY: &str = "HL-22970937 USSAV RESILIENT\nSI closing: 25-Dec-2025 10:00\nVGM cut-off: 26-Dec-2025\nFCL delivery cut-off: 27-Dec-2025";

    #[test]
    fn s1_extracts_booking_from_subject_and_cutoffs_from_body() {
        let data = extract_document_data(S1_BODY, "HL-22970937 USSAV RESILIENT", Some("hlag.com"));
        assert_eq!(data.booking_number.unwrap().value, "22970937");
        assert_eq!(data.si_cutoff.unwrap().value, "2025-12-25T10:00");
        assert_eq!(data.vgm_cutoff.unwrap().value, "2025-12-26");
        assert_eq!(data.cargo_cutoff.unwrap().value, "2025-12-27");
    }

    #[test]
    fn normalizes_date_with_time_of_day() {
        assert_eq!(normalize_date("25-Dec-2025 10:00"), "2025-12-25T10:00");
    }

    #[test]
    fn normalizes_date_without_time() {
        assert_eq!(normalize_date("26-Dec-2025"), "2025-12-26");
    }

    #[test]
    fn extraction_is_idempotent() {
        let first = extract_document_data(S1_BODY, "subject", None);
        let second = extract_document_data(S1_BODY, "subject", None);
        assert_eq!(first.si_cutoff.map(|f| f.value), second.si_cutoff.map(|f| f.value));
    }

    #[test]
    fn party_extraction_skips_forwarder_company() {
        let text = "Shipper: Intoglo Logistics Pvt Ltd\n123 Main St\n\nConsignee: Acme Corp\n456 Oak Ave\n\n";
        let data = extract_parties(text, "Intoglo");
        assert!(data.shipper_name.is_none());
        assert_eq!(data.consignee_name.unwrap().value, "Acme Corp");
    }
}
