use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::models::{message::Channel, record::NotificationRecord, status::NotificationStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    channel TEXT NOT NULL,
    template_code TEXT NOT NULL,
    priority INTEGER NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
"#;

/// Persistence for notification records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts the record unless one with the same id exists. Returns whether
    /// a row was written.
    async fn create_pending(&self, record: &NotificationRecord) -> Result<bool, Error>;

    /// Returns `false` when no record has this id.
    async fn update_status(
        &self,
        id: &str,
        status: NotificationStatus,
        error: Option<&str>,
    ) -> Result<bool, Error>;

    async fn get(&self, id: &str) -> Result<Option<NotificationRecord>, Error>;
}

pub struct PostgresRecordStore {
    client: Client,
}

impl PostgresRecordStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to create notifications table: {}", e))
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn create_pending(&self, record: &NotificationRecord) -> Result<bool, Error> {
        let metadata = serde_json::to_value(&record.metadata)?;

        let inserted = self
            .client
            .execute(
                r#"
                INSERT INTO notifications (
                    id, user_id, channel, template_code, priority,
                    status, error, metadata, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[
                    &record.id,
                    &record.user_id,
                    &record.channel.as_str(),
                    &record.template_code,
                    &record.priority,
                    &record.status.as_str(),
                    &record.error,
                    &metadata,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(error = %e, request_id = %record.id, "Failed to write notification record");
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(request_id = %record.id, inserted, "Notification record stored");
        Ok(inserted > 0)
    }

    async fn update_status(
        &self,
        id: &str,
        status: NotificationStatus,
        error: Option<&str>,
    ) -> Result<bool, Error> {
        let updated = self
            .client
            .execute(
                "UPDATE notifications SET status = $2, error = $3, updated_at = now() WHERE id = $1",
                &[&id, &status.as_str(), &error],
            )
            .await
            .map_err(|e| anyhow!("Database update failed: {}", e))?;

        debug!(request_id = id, status = %status, "Notification status updated");
        Ok(updated > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<NotificationRecord>, Error> {
        let row = self
            .client
            .query_opt(
                r#"
                SELECT id, user_id, channel, template_code, priority,
                       status, error, metadata, created_at, updated_at
                FROM notifications WHERE id = $1
                "#,
                &[&id],
            )
            .await
            .map_err(|e| anyhow!("Database read failed: {}", e))?;

        row.map(|row| record_from_row(&row)).transpose()
    }
}

fn record_from_row(row: &Row) -> Result<NotificationRecord, Error> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;
    let metadata: Value = row.try_get("metadata")?;

    Ok(NotificationRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        channel: channel.parse::<Channel>().map_err(|e| anyhow!(e))?,
        template_code: row.try_get("template_code")?,
        priority: row.try_get("priority")?,
        status: NotificationStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown status '{}' in notifications table", status))?,
        error: row.try_get("error")?,
        metadata: serde_json::from_value(metadata).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
