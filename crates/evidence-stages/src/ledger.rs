//! Alarm ledger on SQLite
//!
//! Each operation opens its own connection on the blocking pool and closes it
//! when done; no connection outlives a single logical operation.
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use evidence_core::config::LedgerConfig;
use evidence_core::{AlarmRecord, EvidenceError, EvidenceLedger, EvidenceRecord, EvidenceResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    path: PathBuf,
    table: String,
    clear_before_insert: bool,
}

fn db_err(e: impl std::fmt::Display) -> EvidenceError {
    EvidenceError::PersistenceError(e.to_string())
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl SqliteLedger {
    pub fn new(config: &LedgerConfig) -> EvidenceResult<Self> {
        let table = config.table.trim();
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(EvidenceError::Config(format!(
                "ledger table name {table:?} must be alphanumeric"
            )));
        }
        Ok(Self {
            path: config.path.clone(),
            table: table.to_string(),
            clear_before_insert: config.clear_before_insert,
        })
    }

    async fn with_connection<T, F>(&self, op: F) -> EvidenceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            op(&mut conn, &table)
        })
        .await
        .map_err(db_err)?
        .map_err(db_err)
    }

    pub async fn ensure_schema(&self) -> EvidenceResult<()> {
        self.with_connection(|conn, table| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (
                    guid TEXT PRIMARY KEY,
                    dispositivo TEXT NOT NULL,
                    alarmTime TEXT NOT NULL,
                    estado TEXT NOT NULL DEFAULT '',
                    video TEXT,
                    interno TEXT
                );
                CREATE INDEX IF NOT EXISTS \"{table}_estado_time\" ON \"{table}\" (estado, alarmTime);"
            ))
        })
        .await
    }

    /// Insert alarm rows, skipping guids already present. With
    /// `clear_before_insert` set, every existing row is deleted first.
    pub async fn insert_alarms(&self, rows: Vec<AlarmRecord>) -> EvidenceResult<usize> {
        let clear = self.clear_before_insert;
        let total = rows.len();
        let inserted = self
            .with_connection(move |conn, table| {
                let tx = conn.transaction()?;
                if clear {
                    let removed = tx.execute(&format!("DELETE FROM \"{table}\""), [])?;
                    info!(table, removed, "ledger cleared before insert");
                }
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(&format!(
                        "INSERT OR IGNORE INTO \"{table}\" (guid, dispositivo, alarmTime, estado, video, interno)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                    ))?;
                    for row in &rows {
                        inserted += stmt.execute(params![
                            row.guid,
                            row.device_id,
                            format_time(&row.alarm_time),
                            row.state,
                            row.video,
                            row.interno,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;

        if inserted < total {
            info!(inserted, skipped = total - inserted, "duplicate alarms skipped");
        }
        Ok(inserted)
    }

    /// Alarms in `state` with no video yet, raised at or after `since`, newest first.
    pub async fn pending_videos(
        &self,
        state: &str,
        since: DateTime<Utc>,
    ) -> EvidenceResult<Vec<AlarmRecord>> {
        let state = state.to_string();
        self.with_connection(move |conn, table| {
            let mut stmt = conn.prepare(&format!(
                "SELECT guid, dispositivo, alarmTime, estado, video, interno FROM \"{table}\"
                 WHERE estado = ?1 AND (video IS NULL OR video = '') AND alarmTime >= ?2
                 ORDER BY alarmTime DESC"
            ))?;
            let rows = stmt
                .query_map(params![state, format_time(&since)], read_alarm)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get(&self, guid: &str) -> EvidenceResult<Option<AlarmRecord>> {
        let guid = guid.to_string();
        self.with_connection(move |conn, table| {
            conn.query_row(
                &format!(
                    "SELECT guid, dispositivo, alarmTime, estado, video, interno FROM \"{table}\" WHERE guid = ?1"
                ),
                params![guid],
                read_alarm,
            )
            .optional()
        })
        .await
    }
}

fn read_alarm(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlarmRecord> {
    let raw_time: String = row.get(2)?;
    let alarm_time = DateTime::parse_from_rfc3339(&raw_time)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(AlarmRecord {
        guid: row.get(0)?,
        device_id: row.get(1)?,
        alarm_time,
        state: row.get(3)?,
        video: row.get(4)?,
        interno: row.get(5)?,
    })
}

#[async_trait]
impl EvidenceLedger for SqliteLedger {
    async fn update_video(&self, record: &EvidenceRecord) -> EvidenceResult<u64> {
        let record = record.clone();
        let guid = record.guid.clone();
        let rows = self
            .with_connection(move |conn, table| {
                conn.execute(
                    &format!("UPDATE \"{table}\" SET video = ?1 WHERE guid = ?2"),
                    params![record.video_url, record.guid],
                )
            })
            .await?;

        debug!(guid = %guid, rows, "ledger video update");
        Ok(rows as u64)
    }
}
