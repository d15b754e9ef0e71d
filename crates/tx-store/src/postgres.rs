use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GlobalTxId, LocalTxId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Command, CommandStatus, EventId, EventType, NewTxEvent, Result, TxEvent, TxStoreError,
    store::{CommandStore, TxEventStore},
};

/// PostgreSQL-backed transaction store.
///
/// Events and commands share one `BIGINT` sequence; command derivation and
/// `mark_command_done` rely on a unique constraint and a conditional update
/// for store-level idempotence, which is what allows multiple coordinator
/// processes to scan the same store.
#[derive(Clone)]
pub struct PostgresTxStore {
    pool: PgPool,
}

const EVENT_COLUMNS: &str = "id, service_name, instance_id, timestamp, global_tx_id, \
     local_tx_id, parent_tx_id, event_type, compensation_method, payload";

const COMMAND_COLUMNS: &str = "id, global_tx_id, local_tx_id, parent_tx_id, service_name, \
     instance_id, compensation_method, payload, status";

impl PostgresTxStore {
    /// Creates a new PostgreSQL transaction store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<TxEvent> {
        let event_type: String = row.try_get("event_type")?;
        let event_type = EventType::parse(&event_type)
            .ok_or_else(|| TxStoreError::CorruptRecord(format!("event type {event_type:?}")))?;

        Ok(TxEvent {
            id: EventId::new(row.try_get("id")?),
            service_name: row.try_get("service_name")?,
            instance_id: row.try_get("instance_id")?,
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            global_tx_id: GlobalTxId::from_uuid(row.try_get::<Uuid, _>("global_tx_id")?),
            local_tx_id: LocalTxId::from_uuid(row.try_get::<Uuid, _>("local_tx_id")?),
            parent_tx_id: row
                .try_get::<Option<Uuid>, _>("parent_tx_id")?
                .map(LocalTxId::from_uuid),
            event_type,
            compensation_method: row.try_get("compensation_method")?,
            payload: row.try_get("payload")?,
        })
    }

    fn row_to_command(row: PgRow) -> Result<Command> {
        let status: String = row.try_get("status")?;
        let status = CommandStatus::parse(&status)
            .ok_or_else(|| TxStoreError::CorruptRecord(format!("command status {status:?}")))?;

        Ok(Command {
            id: EventId::new(row.try_get("id")?),
            global_tx_id: GlobalTxId::from_uuid(row.try_get::<Uuid, _>("global_tx_id")?),
            local_tx_id: LocalTxId::from_uuid(row.try_get::<Uuid, _>("local_tx_id")?),
            parent_tx_id: row
                .try_get::<Option<Uuid>, _>("parent_tx_id")?
                .map(LocalTxId::from_uuid),
            service_name: row.try_get("service_name")?,
            instance_id: row.try_get("instance_id")?,
            compensation_method: row.try_get("compensation_method")?,
            payload: row.try_get("payload")?,
            status,
        })
    }
}

#[async_trait]
impl TxEventStore for PostgresTxStore {
    async fn append(&self, event: NewTxEvent) -> Result<EventId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO saga_events
                (service_name, instance_id, timestamp, global_tx_id, local_tx_id,
                 parent_tx_id, event_type, compensation_method, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&event.service_name)
        .bind(&event.instance_id)
        .bind(event.timestamp)
        .bind(event.global_tx_id.as_uuid())
        .bind(event.local_tx_id.as_uuid())
        .bind(event.parent_tx_id.map(|p| p.as_uuid()))
        .bind(event.event_type.as_str())
        .bind(&event.compensation_method)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(EventId::new(id))
    }

    async fn find_ended_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM saga_events e
            WHERE e.id > $1
              AND e.event_type = 'TxEndedEvent'
              AND NOT EXISTS (
                  SELECT 1 FROM saga_events s
                  WHERE s.global_tx_id = e.global_tx_id
                    AND s.event_type = 'SagaEndedEvent')
              AND NOT EXISTS (
                  SELECT 1 FROM saga_events c
                  WHERE c.global_tx_id = e.global_tx_id
                    AND c.local_tx_id = e.local_tx_id
                    AND c.event_type = 'TxCompensatedEvent')
            ORDER BY e.id ASC
            "#
        ))
        .bind(cursor.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn find_compensated_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM saga_events
            WHERE id > $1 AND event_type = 'TxCompensatedEvent'
            ORDER BY id ASC
            "#
        ))
        .bind(cursor.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn find_aborted_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM saga_events e
            WHERE e.id > $1
              AND e.event_type = 'TxAbortedEvent'
              AND NOT EXISTS (
                  SELECT 1 FROM saga_events s
                  WHERE s.global_tx_id = e.global_tx_id
                    AND s.event_type = 'SagaEndedEvent')
            ORDER BY e.id ASC
            "#
        ))
        .bind(cursor.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn find_transactions(
        &self,
        global_tx_id: GlobalTxId,
        event_type: EventType,
    ) -> Result<Vec<TxEvent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM saga_events
            WHERE global_tx_id = $1 AND event_type = $2
            ORDER BY id ASC
            "#
        ))
        .bind(global_tx_id.as_uuid())
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn find_pending_sagas(&self) -> Result<HashMap<GlobalTxId, Vec<TxEvent>>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM saga_events e
            WHERE NOT EXISTS (
                SELECT 1 FROM saga_events t
                WHERE t.global_tx_id = e.global_tx_id
                  AND t.event_type IN ('SagaEndedEvent', 'TxAbortedEvent'))
            ORDER BY e.id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<GlobalTxId, Vec<TxEvent>> = HashMap::new();
        for row in rows {
            let event = Self::row_to_event(row)?;
            grouped.entry(event.global_tx_id).or_default().push(event);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl CommandStore for PostgresTxStore {
    async fn save_compensation_commands(&self, global_tx_id: GlobalTxId) -> Result<Vec<Command>> {
        // One statement: derive from the TxStartedEvent of every completed,
        // uncompensated step that has no command yet. The unique constraint
        // absorbs races between concurrent scanners.
        let rows = sqlx::query(&format!(
            r#"
            INSERT INTO saga_commands
                (global_tx_id, local_tx_id, parent_tx_id, service_name,
                 instance_id, compensation_method, payload)
            SELECT s.global_tx_id, s.local_tx_id, s.parent_tx_id, s.service_name,
                   s.instance_id, s.compensation_method, s.payload
            FROM saga_events s
            WHERE s.event_type = 'TxStartedEvent'
              AND s.global_tx_id = $1
              AND EXISTS (
                  SELECT 1 FROM saga_events e
                  WHERE e.global_tx_id = s.global_tx_id
                    AND e.local_tx_id = s.local_tx_id
                    AND e.event_type = 'TxEndedEvent')
              AND NOT EXISTS (
                  SELECT 1 FROM saga_events c
                  WHERE c.global_tx_id = s.global_tx_id
                    AND c.local_tx_id = s.local_tx_id
                    AND c.event_type = 'TxCompensatedEvent')
              AND NOT EXISTS (
                  SELECT 1 FROM saga_events g
                  WHERE g.global_tx_id = s.global_tx_id
                    AND g.event_type = 'SagaEndedEvent')
            ORDER BY s.id ASC
            ON CONFLICT (global_tx_id, local_tx_id) DO NOTHING
            RETURNING {COMMAND_COLUMNS}
            "#
        ))
        .bind(global_tx_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let commands: Vec<Command> = rows
            .into_iter()
            .map(Self::row_to_command)
            .collect::<Result<_>>()?;

        if !commands.is_empty() {
            tracing::debug!(%global_tx_id, count = commands.len(), "derived compensation commands");
        }
        Ok(commands)
    }

    async fn mark_command_done(
        &self,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE saga_commands SET status = 'DONE'
            WHERE global_tx_id = $1 AND local_tx_id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(global_tx_id.as_uuid())
        .bind(local_tx_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_uncompleted_commands(&self, global_tx_id: GlobalTxId) -> Result<Vec<Command>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COMMAND_COLUMNS} FROM saga_commands
            WHERE global_tx_id = $1 AND status = 'PENDING'
            ORDER BY id ASC
            "#
        ))
        .bind(global_tx_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_command).collect()
    }

    async fn find_commands_to_compensate(&self) -> Result<Vec<Command>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COMMAND_COLUMNS} FROM saga_commands cmd
            WHERE cmd.status = 'PENDING'
              AND NOT EXISTS (
                  SELECT 1 FROM saga_events s
                  WHERE s.global_tx_id = cmd.global_tx_id
                    AND s.event_type = 'SagaEndedEvent')
            ORDER BY cmd.id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_command).collect()
    }
}
