use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use super::{FlowStore, rejected_transition};
use crate::{
    error::FlowError,
    flow::{FlowFailure, FlowKey, FlowRecord, FlowStatus, Transition},
};

/// SQLite-backed store. Timestamps are integer unix milliseconds so expiry
/// checks compare numerically inside the statements.
#[derive(Clone, Debug)]
pub struct SqliteFlowStore {
    db: SqlitePool,
}

impl SqliteFlowStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

const SELECT_COLUMNS: &str = "id, flow_type, status, metadata_json, result_json, error_json,
    created_at_ms, expires_at_ms, completed_at_ms";

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, FlowError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| FlowError::storage(format!("timestamp out of range: {ms}")))
}

fn row_to_record(row: &SqliteRow) -> Result<FlowRecord, FlowError> {
    let status: String = row.try_get("status")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let result_json: Option<String> = row.try_get("result_json")?;
    let error_json: Option<String> = row.try_get("error_json")?;
    let completed_at_ms: Option<i64> = row.try_get("completed_at_ms")?;

    let result = result_json
        .map(|raw| serde_json::from_str::<Value>(&raw))
        .transpose()?;
    let error = error_json
        .map(|raw| serde_json::from_str::<FlowFailure>(&raw))
        .transpose()?;

    Ok(FlowRecord {
        id: row.try_get("id")?,
        flow_type: row.try_get("flow_type")?,
        status: FlowStatus::parse(&status)?,
        metadata: serde_json::from_str(&metadata_json)?,
        result,
        error,
        created_at: millis_to_datetime(row.try_get("created_at_ms")?)?,
        expires_at: millis_to_datetime(row.try_get("expires_at_ms")?)?,
        completed_at: completed_at_ms.map(millis_to_datetime).transpose()?,
    })
}

#[async_trait]
impl FlowStore for SqliteFlowStore {
    async fn put(&self, record: FlowRecord, overwrite: bool, now: DateTime<Utc>) -> Result<(), FlowError> {
        // The conflict branch only replaces an expired row unless overwriting.
        let statement = r#"
            INSERT INTO flows (
              id,
              flow_type,
              status,
              metadata_json,
              result_json,
              error_json,
              created_at_ms,
              expires_at_ms,
              completed_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(flow_type, id) DO UPDATE SET
              status = excluded.status,
              metadata_json = excluded.metadata_json,
              result_json = excluded.result_json,
              error_json = excluded.error_json,
              created_at_ms = excluded.created_at_ms,
              expires_at_ms = excluded.expires_at_ms,
              completed_at_ms = excluded.completed_at_ms
            WHERE ?10 = 1 OR flows.expires_at_ms <= ?11
            "#;

        let result_json = record.result.as_ref().map(serde_json::to_string).transpose()?;
        let error_json = record.error.as_ref().map(serde_json::to_string).transpose()?;

        let outcome = sqlx::query(statement)
            .bind(&record.id)
            .bind(&record.flow_type)
            .bind(record.status.as_str())
            .bind(serde_json::to_string(&record.metadata)?)
            .bind(result_json)
            .bind(error_json)
            .bind(record.created_at.timestamp_millis())
            .bind(record.expires_at.timestamp_millis())
            .bind(record.completed_at.map(|at| at.timestamp_millis()))
            .bind(overwrite)
            .bind(now.timestamp_millis())
            .execute(&self.db)
            .await?;

        if outcome.rows_affected() == 0 {
            return Err(FlowError::AlreadyExists(record.key().to_string()));
        }
        Ok(())
    }

    async fn get(&self, key: &FlowKey, now: DateTime<Utc>) -> Result<Option<FlowRecord>, FlowError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM flows
             WHERE flow_type = ?1 AND id = ?2 AND expires_at_ms > ?3"
        ))
        .bind(&key.flow_type)
        .bind(&key.id)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn delete(&self, key: &FlowKey) -> Result<(), FlowError> {
        sqlx::query("DELETE FROM flows WHERE flow_type = ?1 AND id = ?2")
            .bind(&key.flow_type)
            .bind(&key.id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn transition(
        &self,
        key: &FlowKey,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<FlowRecord, FlowError> {
        let (result_json, error_json) = match transition {
            Transition::Complete(result) => (Some(serde_json::to_string(result)?), None),
            Transition::Fail(failure) => (None, Some(serde_json::to_string(failure)?)),
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE flows
            SET status = ?1,
                result_json = ?2,
                error_json = ?3,
                completed_at_ms = ?4
            WHERE flow_type = ?5
              AND id = ?6
              AND status = 'pending'
              AND expires_at_ms > ?4
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(transition.target().as_str())
        .bind(result_json)
        .bind(error_json)
        .bind(now.timestamp_millis())
        .bind(&key.flow_type)
        .bind(&key.id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => row_to_record(&row),
            None => {
                let current = self.get(key, now).await?;
                Err(rejected_transition(key, current.as_ref()))
            }
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<FlowRecord>, FlowError> {
        let rows = sqlx::query(&format!(
            "DELETE FROM flows WHERE expires_at_ms <= ?1 RETURNING {SELECT_COLUMNS}"
        ))
        .bind(now.timestamp_millis())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn ping(&self) -> Result<(), FlowError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
