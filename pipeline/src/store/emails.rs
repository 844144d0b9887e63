//! Raw email / attachment / classification / extraction persistence (§6
//! `raw_emails`, `raw_attachments`, `document_classifications`,
//! `email_extractions`). The pipeline only reads `raw_emails` /
//! `raw_attachments` rows (populated by the mail-source adapter and PDF
//! extractor, respectively) but writes back flags, classification, and
//! extraction results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classification::DocumentClassification;
use crate::errors::ShipmentStoreError;
use crate::extraction::ExtractedDocumentData;
use crate::raw_email::{FlaggedEmail, RawAttachment, RawEmail};
use crate::types::ProcessingStatus;

use super::{get_conn, PgPool};

#[derive(Clone)]
pub struct EmailStore {
    pool: PgPool,
}

impl EmailStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// §5 batch driver query: emails still awaiting processing, oldest first.
    pub fn find_pending(&self, limit: i64) -> Result<Vec<RawEmail>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let rows = conn.query(
            "SELECT id, thread_id, subject, sender_email, sender_display_name, true_sender_email,
                    recipients, body_text, headers, received_at, labels, in_reply_to, has_attachments
             FROM raw_emails WHERE processing_status = 'pending' ORDER BY received_at ASC LIMIT $1",
            &[&limit],
        )?;
        Ok(rows.iter().map(row_to_raw_email).collect())
    }

    pub fn find_by_id(&self, email_id: Uuid) -> Result<Option<RawEmail>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let row = conn.query_opt(
            "SELECT id, thread_id, subject, sender_email, sender_display_name, true_sender_email,
                    recipients, body_text, headers, received_at, labels, in_reply_to, has_attachments
             FROM raw_emails WHERE id = $1",
            &[&email_id],
        )?;
        Ok(row.map(|r| row_to_raw_email(&r)))
    }

    /// How many earlier emails share this thread (§4.2 `thread_position`),
    /// counted rather than tracked incrementally since threads arrive out
    /// of order across adapters.
    pub fn thread_position(&self, thread_id: &str, before: DateTime<Utc>) -> Result<u32, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let row = conn.query_one(
            "SELECT COUNT(*) FROM raw_emails WHERE thread_id = $1 AND received_at < $2",
            &[&thread_id, &before],
        )?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u32)
    }

    pub fn find_attachments(&self, email_id: Uuid) -> Result<Vec<RawAttachment>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let rows = conn.query(
            "SELECT id, email_id, filename, mime_type, size_bytes, storage_ref, extracted_text
             FROM raw_attachments WHERE email_id = $1",
            &[&email_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let size_bytes: i64 = row.get(4);
                RawAttachment {
                    id: row.get(0),
                    email_id: row.get(1),
                    filename: row.get(2),
                    mime_type: row.get(3),
                    size_bytes: size_bytes.max(0) as u64,
                    storage_ref: row.get(5),
                    extracted_text: row.get(6),
                }
            })
            .collect())
    }

    pub fn mark_flagged(&self, flagged: &FlaggedEmail) -> Result<(), ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        conn.execute(
            "UPDATE raw_emails SET direction = $2, content_hash = $3 WHERE id = $1",
            &[&flagged.email_id, &flagged.direction.as_str(), &flagged.content_hash],
        )?;
        Ok(())
    }

    pub fn set_processing_status(
        &self,
        email_id: Uuid,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<(), ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        conn.execute(
            "UPDATE raw_emails SET processing_status = $2, processing_error = $3 WHERE id = $1",
            &[&email_id, &status.as_str(), &error],
        )?;
        Ok(())
    }

    pub fn save_classification(
        &self,
        email_id: Uuid,
        classification: &DocumentClassification,
    ) -> Result<(), ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO document_classifications
                (email_id, document_type, document_confidence, classification_method,
                 email_type, email_type_confidence, direction, sender_category, is_urgent, needs_manual_review)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (email_id) DO UPDATE SET
                document_type = EXCLUDED.document_type,
                document_confidence = EXCLUDED.document_confidence,
                classification_method = EXCLUDED.classification_method,
                email_type = EXCLUDED.email_type,
                email_type_confidence = EXCLUDED.email_type_confidence,
                direction = EXCLUDED.direction,
                sender_category = EXCLUDED.sender_category,
                is_urgent = EXCLUDED.is_urgent,
                needs_manual_review = EXCLUDED.needs_manual_review",
            &[
                &email_id,
                &classification.document_type.as_str(),
                &(classification.document_confidence as i16),
                &classification.classification_method.as_str(),
                &classification.email_type.as_str(),
                &(classification.email_type_confidence as i16),
                &classification.direction.as_str(),
                &classification.sender_category.as_str(),
                &classification.is_urgent,
                &classification.needs_manual_review,
            ],
        )?;
        Ok(())
    }

    /// Replace-by-(email, type) semantics for `email_extractions` (§6):
    /// re-extraction overwrites rather than appending, keeping idempotence
    /// (P5) straightforward.
    pub fn save_extraction(
        &self,
        email_id: Uuid,
        document_type: crate::types::DocumentType,
        extracted: &ExtractedDocumentData,
    ) -> Result<(), ShipmentStoreError> {
        let json = serde_json::to_value(extracted)
            .map_err(|e| ShipmentStoreError::Config(format!("extraction serialize failed: {e}")))?;
        let mut conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO email_extractions (email_id, document_type, extracted_json)
             VALUES ($1, $2, $3)
             ON CONFLICT (email_id, document_type) DO UPDATE SET extracted_json = EXCLUDED.extracted_json",
            &[&email_id, &document_type.as_str(), &json],
        )?;
        Ok(())
    }
}

fn row_to_raw_email(row: &postgres::Row) -> RawEmail {
    let headers_json: serde_json::Value = row.get(8);
    let headers: HashMap<String, Vec<String>> = serde_json::from_value(headers_json).unwrap_or_default();
    RawEmail {
        id: row.get(0),
        thread_id: row.get(1),
        subject: row.get(2),
        sender_email: row.get(3),
        sender_display_name: row.get(4),
        true_sender_email: row.get(5),
        recipients: row.get(6),
        body_text: row.get(7),
        headers,
        received_at: row.get(9),
        labels: row.get(10),
        in_reply_to: row.get(11),
        has_attachments: row.get(12),
    }
}
