//! Insight persistence (§6 `shipment_insights`, `insight_generation_log`,
//! §4.7 stage 5). A dedup key of `(severity, normalized title prefix)` is
//! stored alongside each row so a same-day rerun can skip insights that
//! already exist instead of piling up duplicates every time the engine runs.

use chrono::Utc;
use uuid::Uuid;

use crate::errors::ShipmentStoreError;
use crate::insights::synthesizer::Insight;

use super::{get_conn, PgPool};

#[derive(Clone)]
pub struct InsightStore {
    pool: PgPool,
}

impl InsightStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn dedup_key(insight: &Insight) -> String {
        let prefix: String = insight
            .title
            .to_lowercase()
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}:{}", insight.severity.as_str(), prefix)
    }

    pub fn existing_dedup_keys_today(&self, shipment_id: Uuid) -> Result<Vec<String>, ShipmentStoreError> {
        let mut conn = get_conn(&self.pool)?;
        let rows = conn.query(
            "SELECT dedup_key FROM shipment_insights
             WHERE shipment_id = $1 AND created_at::date = now()::date",
            &[&shipment_id],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Persist `insights`, skipping any whose dedup key already exists
    /// today for this shipment unless `force_refresh` is set (§4.7 stage 5).
    pub fn persist(
        &self,
        shipment_id: Uuid,
        insights: &[Insight],
        force_refresh: bool,
    ) -> Result<usize, ShipmentStoreError> {
        let existing = if force_refresh {
            Vec::new()
        } else {
            self.existing_dedup_keys_today(shipment_id)?
        };

        let mut conn = get_conn(&self.pool)?;
        let mut persisted = 0usize;
        for insight in insights {
            let key = Self::dedup_key(insight);
            if existing.contains(&key) {
                continue;
            }
            conn.execute(
                "INSERT INTO shipment_insights
                    (id, shipment_id, insight_type, severity, title, insight_text, confidence,
                     priority_boost, source, status, dedup_key, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &Uuid::new_v4(),
                    &insight.shipment_id,
                    &insight.insight_type.as_str(),
                    &insight.severity.as_str(),
                    &insight.title,
                    &insight.insight_text,
                    &(insight.confidence as i16),
                    &(insight.priority_boost as i16),
                    &insight.source.as_str(),
                    &insight.status.as_str(),
                    &key,
                    &Utc::now(),
                ],
            )?;
            persisted += 1;
        }

        conn.execute(
            "INSERT INTO insight_generation_log (id, shipment_id, ran_at, rule_count, ai_count, persisted_count)
             VALUES ($1, $2, now(), $3, $4, $5)",
            &[
                &Uuid::new_v4(),
                &shipment_id,
                &(insights.len() as i32),
                &0i32,
                &(persisted as i32),
            ],
        )?;

        Ok(persisted)
    }
}
