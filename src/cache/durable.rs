//! Durable tier: the authoritative store for documents and migrated records.

use crate::errors::AppResult;
use crate::models::{FeatureArea, FeatureRecordRow, InsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRow {
    pub user_id: String,
    pub kind: String,
    pub document: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn fetch_document(&self, user_id: &str, kind: &str) -> AppResult<Option<DocumentRow>>;

    /// Insert or replace; never more than one row per user and kind.
    async fn upsert_document(&self, row: &DocumentRow) -> AppResult<()>;

    async fn delete_document(&self, user_id: &str, kind: &str) -> AppResult<bool>;

    /// Duplicate keys are reported, not treated as failures.
    async fn insert_feature_record(&self, record: &FeatureRecordRow) -> AppResult<InsertOutcome>;

    async fn list_feature_records(&self, user_id: &str, area: FeatureArea) -> AppResult<Vec<FeatureRecordRow>>;
}
