use crate::cache::durable::{DocumentRow, DurableStore};
use crate::errors::{AppError, AppResult};
use crate::models::{FeatureArea, FeatureRecordRow, InsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite-backed durable tier.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_document(&self, user_id: &str, kind: &str) -> AppResult<Option<DocumentRow>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT user_id, kind, document_json, generated_at
                 FROM plan_documents
                 WHERE user_id = ?1 AND kind = ?2",
                params![user_id, kind],
                parse_document_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn upsert_document_row(&self, row: &DocumentRow) -> AppResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO plan_documents (user_id, kind, document_json, generated_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, kind) DO UPDATE SET
               document_json = excluded.document_json,
               generated_at = excluded.generated_at,
               updated_at = excluded.updated_at",
            params![
                row.user_id,
                row.kind,
                serde_json::to_string(&row.document)?,
                row.generated_at.to_rfc3339(),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn delete_document_row(&self, user_id: &str, kind: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM plan_documents WHERE user_id = ?1 AND kind = ?2",
            params![user_id, kind],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_feature_record_row(&self, record: &FeatureRecordRow) -> AppResult<InsertOutcome> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO feature_records (
               id, user_id, feature_area, record_key, payload_json, recorded_at, migrated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                record.user_id,
                record.feature_area.as_str(),
                record.record_key,
                serde_json::to_string(&record.payload)?,
                record.recorded_at,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    pub fn list_feature_record_rows(&self, user_id: &str, area: FeatureArea) -> AppResult<Vec<FeatureRecordRow>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT user_id, feature_area, record_key, payload_json, recorded_at
             FROM feature_records
             WHERE user_id = ?1 AND feature_area = ?2
             ORDER BY recorded_at ASC, record_key ASC",
        )?;
        let rows = statement.query_map(params![user_id, area.as_str()], parse_feature_record_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn document_count(&self) -> AppResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM plan_documents", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[async_trait]
impl DurableStore for Database {
    async fn fetch_document(&self, user_id: &str, kind: &str) -> AppResult<Option<DocumentRow>> {
        self.get_document(user_id, kind)
    }

    async fn upsert_document(&self, row: &DocumentRow) -> AppResult<()> {
        self.upsert_document_row(row)
    }

    async fn delete_document(&self, user_id: &str, kind: &str) -> AppResult<bool> {
        self.delete_document_row(user_id, kind)
    }

    async fn insert_feature_record(&self, record: &FeatureRecordRow) -> AppResult<InsertOutcome> {
        self.insert_feature_record_row(record)
    }

    async fn list_feature_records(&self, user_id: &str, area: FeatureArea) -> AppResult<Vec<FeatureRecordRow>> {
        self.list_feature_record_rows(user_id, area)
    }
}

fn parse_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    let document_raw: String = row.get(2)?;
    Ok(DocumentRow {
        user_id: row.get(0)?,
        kind: row.get(1)?,
        document: serde_json::from_str(&document_raw).map_err(|error| conversion_error(2, error.to_string()))?,
        generated_at: parse_time(&row.get::<_, String>(3)?)?,
    })
}

fn parse_feature_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeatureRecordRow> {
    let area_raw: String = row.get(1)?;
    let payload_raw: String = row.get(3)?;
    Ok(FeatureRecordRow {
        user_id: row.get(0)?,
        feature_area: FeatureArea::parse(&area_raw)
            .ok_or_else(|| conversion_error(1, format!("Unknown feature area '{}'", area_raw)))?,
        record_key: row.get(2)?,
        payload: serde_json::from_str(&payload_raw).map_err(|error| conversion_error(3, error.to_string()))?,
        recorded_at: row.get(4)?,
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(0, error.to_string()))
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}
