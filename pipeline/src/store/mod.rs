//! Postgres persistence (§6). One connection pool, shared across the
//! per-table stores, built the same way as the rest of this codebase's
//! Postgres-backed services: `postgres` + `r2d2` + native-TLS, with a
//! logging error handler so pool-level failures show up without the
//! caller having to thread them through every query.

pub mod emails;
pub mod insights;
pub mod schema;
pub mod shipments;
pub mod workflow;

use std::env;

use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;

use crate::config::PipelineConfig;
use crate::errors::ShipmentStoreError;

pub type PgPool = Pool<PostgresConnectionManager<MakeTlsConnector>>;
pub type PgConn = PooledConnection<PostgresConnectionManager<MakeTlsConnector>>;

#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("pipeline postgres pool error: {:?}", err);
    }
}

pub fn build_pool(config: &PipelineConfig) -> Result<PgPool, ShipmentStoreError> {
    let db_url = config
        .database_url
        .clone()
        .or_else(|| env::var("SHIPMENTS_DB_URL").ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or(ShipmentStoreError::MissingDbUrl)?;

    let pg_config: postgres::Config = db_url.parse()?;

    let mut tls_builder = native_tls::TlsConnector::builder();
    if config.tls_allow_invalid_certs {
        tls_builder.danger_accept_invalid_certs(true);
        tls_builder.danger_accept_invalid_hostnames(true);
    }
    let tls_connector = tls_builder
        .build()
        .map_err(|e| ShipmentStoreError::Config(e.to_string()))?;
    let tls = MakeTlsConnector::new(tls_connector);

    let manager = PostgresConnectionManager::new(pg_config, tls);
    let pool = Pool::builder()
        .max_size(config.pool_max_size)
        .min_idle(Some(config.pool_min_idle))
        .connection_timeout(config.pool_connection_timeout)
        .idle_timeout(Some(config.pool_idle_timeout))
        .error_handler(Box::new(LoggingErrorHandler))
        .build(manager)?;

    Ok(pool)
}

pub(crate) fn get_conn(pool: &PgPool) -> Result<PgConn, ShipmentStoreError> {
    Ok(pool.get()?)
}
