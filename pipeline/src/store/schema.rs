//! Schema for the logical tables in §6. Not a migration framework — just
//! the DDL the pipeline depends on, applied once at startup via
//! `apply_schema` (idempotent, `CREATE ... IF NOT EXISTS` throughout) so a
//! fresh environment and the test harness can stand up the same shape the
//! store code assumes.

use super::{get_conn, PgPool};
use crate::errors::ShipmentStoreError;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_emails (
    id UUID PRIMARY KEY,
    thread_id TEXT NOT NULL DEFAULT '',
    subject TEXT NOT NULL DEFAULT '',
    sender_email TEXT NOT NULL,
    sender_display_name TEXT,
    true_sender_email TEXT,
    recipients TEXT[] NOT NULL DEFAULT '{}',
    body_text TEXT NOT NULL DEFAULT '',
    headers JSONB NOT NULL DEFAULT '{}',
    received_at TIMESTAMPTZ NOT NULL,
    labels TEXT[] NOT NULL DEFAULT '{}',
    in_reply_to TEXT,
    has_attachments BOOLEAN NOT NULL DEFAULT false,
    direction TEXT,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    processing_error TEXT,
    content_hash TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS raw_attachments (
    id UUID PRIMARY KEY,
    email_id UUID NOT NULL REFERENCES raw_emails(id),
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL DEFAULT '',
    size_bytes BIGINT NOT NULL DEFAULT 0,
    storage_ref TEXT NOT NULL DEFAULT '',
    extracted_text TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS document_classifications (
    email_id UUID PRIMARY KEY REFERENCES raw_emails(id),
    document_type TEXT NOT NULL,
    document_confidence SMALLINT NOT NULL,
    classification_method TEXT NOT NULL,
    email_type TEXT NOT NULL,
    email_type_confidence SMALLINT NOT NULL,
    direction TEXT NOT NULL,
    sender_category TEXT NOT NULL,
    is_urgent BOOLEAN NOT NULL DEFAULT false,
    needs_manual_review BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS email_extractions (
    email_id UUID NOT NULL REFERENCES raw_emails(id),
    document_type TEXT NOT NULL,
    extracted_json JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (email_id, document_type)
);

CREATE TABLE IF NOT EXISTS document_extractions (
    id UUID PRIMARY KEY,
    email_id UUID NOT NULL REFERENCES raw_emails(id),
    attachment_id UUID REFERENCES raw_attachments(id),
    document_type TEXT NOT NULL,
    extracted_json JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS shipments (
    id UUID PRIMARY KEY,
    booking_number TEXT NOT NULL UNIQUE,
    mbl_number TEXT,
    hbl_number TEXT,
    carrier_code TEXT,
    vessel_name TEXT,
    voyage_number TEXT,
    port_of_loading TEXT,
    port_of_loading_code TEXT,
    port_of_discharge TEXT,
    port_of_discharge_code TEXT,
    etd TEXT,
    eta TEXT,
    si_cutoff TEXT,
    vgm_cutoff TEXT,
    cargo_cutoff TEXT,
    gate_cutoff TEXT,
    doc_cutoff TEXT,
    shipper_name TEXT,
    shipper_address TEXT,
    consignee_name TEXT,
    consignee_address TEXT,
    notify_party_name TEXT,
    notify_party_address TEXT,
    container_number_primary TEXT,
    container_numbers TEXT[] NOT NULL DEFAULT '{}',
    workflow_state TEXT NOT NULL,
    workflow_phase TEXT NOT NULL,
    status TEXT NOT NULL,
    is_direct_carrier_confirmed BOOLEAN NOT NULL DEFAULT false,
    created_from_email_id UUID NOT NULL,
    booking_revision_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS shipment_revisions (
    id UUID PRIMARY KEY,
    shipment_id UUID NOT NULL REFERENCES shipments(id),
    email_id UUID NOT NULL,
    field TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS shipment_documents (
    id UUID PRIMARY KEY,
    shipment_id UUID REFERENCES shipments(id),
    email_id UUID NOT NULL REFERENCES raw_emails(id),
    document_type TEXT NOT NULL,
    is_primary BOOLEAN NOT NULL DEFAULT false,
    link_method TEXT NOT NULL,
    link_confidence SMALLINT NOT NULL,
    booking_number_extracted TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS shipment_documents_non_orphan_unique
    ON shipment_documents (email_id, shipment_id)
    WHERE shipment_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS shipment_workflow_states (
    code TEXT PRIMARY KEY,
    phase TEXT NOT NULL,
    state_order INTEGER NOT NULL,
    is_optional BOOLEAN NOT NULL DEFAULT false,
    is_milestone BOOLEAN NOT NULL DEFAULT false,
    next_states TEXT[] NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS shipment_workflow_history (
    id UUID PRIMARY KEY,
    shipment_id UUID NOT NULL REFERENCES shipments(id),
    from_state TEXT,
    to_state TEXT NOT NULL,
    triggered_by TEXT NOT NULL,
    triggering_email_id UUID,
    occurred_at TIMESTAMPTZ NOT NULL,
    notes TEXT
);

CREATE TABLE IF NOT EXISTS carriers (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS carrier_configs (
    id UUID PRIMARY KEY,
    carrier_code TEXT NOT NULL REFERENCES carriers(code),
    email_sender_pattern TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_type_action_rules (
    document_type TEXT PRIMARY KEY,
    default_has_action BOOLEAN NOT NULL,
    default_confidence SMALLINT NOT NULL
);

CREATE TABLE IF NOT EXISTS action_completion_keywords (
    id UUID PRIMARY KEY,
    document_type TEXT NOT NULL REFERENCES document_type_action_rules(document_type),
    keyword TEXT NOT NULL,
    flips_to_action BOOLEAN NOT NULL
);

CREATE TABLE IF NOT EXISTS action_lookup (
    document_type TEXT NOT NULL,
    sender_category TEXT NOT NULL,
    has_action BOOLEAN NOT NULL,
    confidence SMALLINT NOT NULL,
    PRIMARY KEY (document_type, sender_category)
);

CREATE TABLE IF NOT EXISTS shipment_insights (
    id UUID PRIMARY KEY,
    shipment_id UUID NOT NULL REFERENCES shipments(id),
    insight_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    title TEXT NOT NULL,
    insight_text TEXT NOT NULL,
    confidence SMALLINT NOT NULL,
    priority_boost SMALLINT NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    dedup_key TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS insight_generation_log (
    id UUID PRIMARY KEY,
    shipment_id UUID NOT NULL REFERENCES shipments(id),
    ran_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    rule_count INTEGER NOT NULL,
    ai_count INTEGER NOT NULL,
    persisted_count INTEGER NOT NULL
);
"#;

pub fn apply_schema(pool: &PgPool) -> Result<(), ShipmentStoreError> {
    let mut conn = get_conn(pool)?;
    conn.batch_execute(SCHEMA_SQL)?;
    Ok(())
}
