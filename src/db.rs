use std::{str::FromStr, time::Duration};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sqlx::{SqlitePool, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions}};
use uuid::Uuid;

use crate::error::FlowError;

pub async fn connect_and_bootstrap(database_url: &str) -> Result<SqlitePool, FlowError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(FlowError::storage)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    bootstrap_schema(&pool).await?;

    Ok(pool)
}

const SCHEMA_BOOTSTRAP_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS flows (
      id TEXT NOT NULL,
      flow_type TEXT NOT NULL,
      status TEXT NOT NULL,
      metadata_json TEXT NOT NULL,
      result_json TEXT,
      error_json TEXT,
      created_at_ms INTEGER NOT NULL,
      expires_at_ms INTEGER NOT NULL,
      completed_at_ms INTEGER,
      PRIMARY KEY (flow_type, id)
    );",

    "CREATE INDEX IF NOT EXISTS idx_flows_expires ON flows(expires_at_ms);",
];

async fn bootstrap_schema(pool: &SqlitePool) -> Result<(), FlowError> {
    for statement in SCHEMA_BOOTSTRAP_SQL {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

pub fn random_token(byte_len: usize) -> String {
    let mut bytes = vec![0_u8; byte_len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
