//! Closed-set enumerations shared across every stage of the pipeline.
//!
//! Each of these used to be a free-form string in the source system this
//! crate models. They are tagged variants here so an unhandled case is a
//! compile error, not a silent `None`. A thin string-adjacency layer
//! (`as_str` / `FromStr`) sits at the persistence boundary so existing rows
//! tagged with legacy string values still round-trip.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $s:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($s => Ok(Self::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown enum value: {0}")]
pub struct UnknownVariant(pub String);

closed_enum!(
    DocumentType {
        BookingConfirmation => "booking_confirmation",
        BookingAmendment => "booking_amendment",
        BookingCancellation => "booking_cancellation",
        ShippingInstruction => "shipping_instruction",
        SiDraft => "si_draft",
        SiSubmission => "si_submission",
        SiConfirmation => "si_confirmation",
        VgmSubmission => "vgm_submission",
        VgmConfirmation => "vgm_confirmation",
        BillOfLading => "bill_of_lading",
        BlDraft => "bl_draft",
        Hbl => "hbl",
        HblDraft => "hbl_draft",
        ArrivalNotice => "arrival_notice",
        DeliveryOrder => "delivery_order",
        CustomsEntry => "customs_entry",
        EntrySummary => "entry_summary",
        DutyInvoice => "duty_invoice",
        Invoice => "invoice",
        ExceptionNotice => "exception_notice",
        Pod => "pod",
        GeneralCorrespondence => "general_correspondence",
        Unknown => "unknown",
    }
);

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::Unknown
    }
}

impl DocumentType {
    /// Document types whose shipper/consignee/notify-party blocks are
    /// authoritative enough to overwrite the shipment's party fields (I5).
    pub fn may_overwrite_parties(&self) -> bool {
        matches!(self, Self::SiDraft | Self::HblDraft | Self::Hbl)
    }
}

closed_enum!(
    EmailType {
        Confirmation => "confirmation",
        Amendment => "amendment",
        Cancellation => "cancellation",
        Request => "request",
        Submission => "submission",
        Correspondence => "correspondence",
        Notification => "notification",
        Exception => "exception",
        Instruction => "instruction",
        DraftReview => "draft_review",
    }
);

closed_enum!(
    SenderCategory {
        Carrier => "carrier",
        Broker => "broker",
        Customs => "customs",
        Customer => "customer",
        Internal => "internal",
        Unknown => "unknown",
    }
);

impl Default for SenderCategory {
    fn default() -> Self {
        SenderCategory::Unknown
    }
}

closed_enum!(
    Direction {
        Inbound => "inbound",
        Outbound => "outbound",
    }
);

closed_enum!(
    ClassificationMethod {
        AttachmentFilename => "attachment_filename",
        BodyText => "body_text",
        Subject => "subject",
        Keyword => "keyword",
        Pattern => "pattern",
        AiFallback => "ai_fallback",
    }
);

closed_enum!(
    ExtractionMethod {
        Schema => "schema",
        RegexSubject => "regex_subject",
        RegexBody => "regex_body",
        Ai => "ai",
    }
);

closed_enum!(
    EntityType {
        BookingNumber => "booking_number",
        MblNumber => "mbl_number",
        HblNumber => "hbl_number",
        ContainerNumber => "container_number",
        VesselName => "vessel_name",
        VoyageNumber => "voyage_number",
        PortOfLoading => "port_of_loading",
        PortOfLoadingCode => "port_of_loading_code",
        PortOfDischarge => "port_of_discharge",
        PortOfDischargeCode => "port_of_discharge_code",
        Etd => "etd",
        Eta => "eta",
        SiCutoff => "si_cutoff",
        VgmCutoff => "vgm_cutoff",
        CargoCutoff => "cargo_cutoff",
        GateCutoff => "gate_cutoff",
        DocCutoff => "doc_cutoff",
        ShipperName => "shipper_name",
        ShipperAddress => "shipper_address",
        ConsigneeName => "consignee_name",
        ConsigneeAddress => "consignee_address",
        NotifyPartyName => "notify_party_name",
        NotifyPartyAddress => "notify_party_address",
    }
);

closed_enum!(
    WorkflowPhase {
        PreDeparture => "pre_departure",
        InTransit => "in_transit",
        Arrival => "arrival",
        Delivery => "delivery",
    }
);

closed_enum!(
    ShipmentStatus {
        Booked => "booked",
        InTransit => "in_transit",
        Arrived => "arrived",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
);

closed_enum!(
    InsightType {
        Risk => "risk",
        Pattern => "pattern",
        Prediction => "prediction",
        Recommendation => "recommendation",
    }
);

closed_enum!(
    Severity {
        Critical => "critical",
        High => "high",
        Medium => "medium",
        Low => "low",
    }
);

impl Severity {
    /// Weight used by the insight synthesizer's ranking order (§4.7 stage 4).
    pub fn weight(&self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }
}

closed_enum!(
    InsightSource {
        Rules => "rules",
        Ai => "ai",
        Hybrid => "hybrid",
    }
);

closed_enum!(
    InsightStatus {
        Active => "active",
        Acknowledged => "acknowledged",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
);

closed_enum!(
    ActionUrgency {
        Immediate => "immediate",
        Soon => "soon",
        Routine => "routine",
    }
);

closed_enum!(
    ProcessingStatus {
        Pending => "pending",
        Classified => "classified",
        Processed => "processed",
        ManualReview => "manual_review",
        NeedsReview => "needs_review",
        Failed => "failed",
    }
);

closed_enum!(
    WorkflowTrigger {
        DocumentType => "document_type",
        EmailType => "email_type",
        User => "user",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        let dt = DocumentType::BookingConfirmation;
        let s = dt.as_str();
        let parsed: DocumentType = s.parse().unwrap();
        assert_eq!(dt, parsed);
    }

    #[test]
    fn unknown_value_is_rejected() {
        let parsed = "not_a_real_type".parse::<DocumentType>();
        assert!(parsed.is_err());
    }

    #[test]
    fn only_hbl_family_may_overwrite_parties() {
        assert!(DocumentType::HblDraft.may_overwrite_parties());
        assert!(DocumentType::Hbl.may_overwrite_parties());
        assert!(DocumentType::SiDraft.may_overwrite_parties());
        assert!(!DocumentType::BillOfLading.may_overwrite_parties());
    }
}
