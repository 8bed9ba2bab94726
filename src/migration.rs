use crate::cache::durable::DurableStore;
use crate::cache::local::LocalStore;
use crate::errors::{AppError, AppResult};
use crate::models::{FeatureArea, FeatureRecordRow, InsertOutcome};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

const FLAG_DONE: &str = "done";
const FLAG_CLAIM_PREFIX: &str = "in_progress:";

/// One-time transfer of legacy local-only records into the durable tier.
pub struct MigrationManager {
    local: Arc<dyn LocalStore>,
    durable: Arc<dyn DurableStore>,
    stale_claim: Duration,
}

enum Claim {
    Acquired,
    Done,
    HeldElsewhere,
}

impl MigrationManager {
    pub fn new(local: Arc<dyn LocalStore>, durable: Arc<dyn DurableStore>, stale_claim: Duration) -> Self {
        Self {
            local,
            durable,
            stale_claim,
        }
    }

    /// Returns whether records were actually moved on this call.
    ///
    /// A failed pass leaves the flag unset and the legacy record in place, so
    /// the next call repeats it. Durable inserts ignore duplicates, which makes
    /// the repeat safe.
    pub async fn migrate_if_needed(&self, user_id: &str, area: FeatureArea) -> AppResult<bool> {
        let flag_key = area.flag_key(user_id);
        if self.local.get(&flag_key)?.as_deref().is_some_and(is_done) {
            return Ok(false);
        }

        match self.claim(&flag_key)? {
            Claim::Acquired => {}
            Claim::Done => return Ok(false),
            Claim::HeldElsewhere => {
                tracing::debug!(user_id, feature_area = area.as_str(), "migration already claimed");
                return Ok(false);
            }
        }

        match self.run_pass(user_id, area).await {
            Ok(Some(moved)) => {
                self.local.set(&flag_key, FLAG_DONE)?;
                if let Err(error) = self.local.remove(&area.legacy_key(user_id)) {
                    tracing::warn!(
                        user_id,
                        feature_area = area.as_str(),
                        error = %error,
                        "legacy record could not be deleted after migration"
                    );
                }
                tracing::info!(user_id, feature_area = area.as_str(), records = moved, "legacy records migrated");
                Ok(true)
            }
            Ok(None) => {
                self.local.set(&flag_key, FLAG_DONE)?;
                Ok(false)
            }
            Err(error) => {
                if let Err(release_error) = self.local.remove(&flag_key) {
                    tracing::warn!(
                        user_id,
                        feature_area = area.as_str(),
                        error = %release_error,
                        "failed to release migration claim"
                    );
                }
                Err(error)
            }
        }
    }

    /// `None` when there was nothing to move.
    async fn run_pass(&self, user_id: &str, area: FeatureArea) -> AppResult<Option<usize>> {
        let raw = self
            .local
            .get(&area.legacy_key(user_id))
            .map_err(|error| AppError::Migration(format!("reading legacy {} record: {}", area.as_str(), error)))?;
        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            return Ok(None);
        };

        let legacy: Value = serde_json::from_str(&raw)
            .map_err(|error| AppError::Migration(format!("legacy {} record is not JSON: {}", area.as_str(), error)))?;
        let rows = transform_legacy(user_id, area, legacy)?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut duplicates = 0;
        for row in &rows {
            let outcome = self.durable.insert_feature_record(row).await.map_err(|error| {
                AppError::Migration(format!(
                    "inserting {} record '{}': {}",
                    area.as_str(),
                    row.record_key,
                    error
                ))
            })?;
            if outcome == InsertOutcome::Duplicate {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            tracing::debug!(user_id, feature_area = area.as_str(), duplicates, "skipped already-migrated records");
        }
        Ok(Some(rows.len()))
    }

    fn claim(&self, flag_key: &str) -> AppResult<Claim> {
        let marker = format!("{}{}", FLAG_CLAIM_PREFIX, Utc::now().to_rfc3339());
        if self.local.insert_if_absent(flag_key, &marker)? {
            return Ok(Claim::Acquired);
        }

        let Some(current) = self.local.get(flag_key)? else {
            // Released between our insert and read; try once more.
            return Ok(if self.local.insert_if_absent(flag_key, &marker)? {
                Claim::Acquired
            } else {
                Claim::HeldElsewhere
            });
        };
        if is_done(&current) {
            return Ok(Claim::Done);
        }
        if self.claim_is_stale(&current) {
            tracing::warn!(flag_key, claim = %current, "taking over stale migration claim");
            self.local.set(flag_key, &marker)?;
            return Ok(Claim::Acquired);
        }
        Ok(Claim::HeldElsewhere)
    }

    fn claim_is_stale(&self, value: &str) -> bool {
        let Some(claimed_at) = value
            .strip_prefix(FLAG_CLAIM_PREFIX)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        else {
            return true;
        };
        let age = Utc::now().signed_duration_since(claimed_at.with_timezone(&Utc));
        age.to_std().map(|age| age >= self.stale_claim).unwrap_or(false)
    }
}

fn is_done(value: &str) -> bool {
    value == FLAG_DONE || value == "true"
}

/// Maps one area's legacy blob onto durable rows.
pub fn transform_legacy(user_id: &str, area: FeatureArea, legacy: Value) -> AppResult<Vec<FeatureRecordRow>> {
    let row = |record_key: String, payload: Value, recorded_at: Option<String>| FeatureRecordRow {
        user_id: user_id.to_string(),
        feature_area: area,
        record_key,
        payload,
        recorded_at,
    };

    match area {
        FeatureArea::Journal => expect_array(area, legacy)?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| -> AppResult<FeatureRecordRow> {
                let object = expect_object(area, index, &entry)?;
                let recorded_at = string_field(object, "date").or_else(|| string_field(object, "createdAt"));
                let key = id_field(object, "id").unwrap_or_else(|| positional_key(recorded_at.as_deref(), index));
                Ok(row(key, entry, recorded_at))
            })
            .collect(),
        FeatureArea::Challenges => expect_array(area, legacy)?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| -> AppResult<FeatureRecordRow> {
                let object = expect_object(area, index, &entry)?;
                let recorded_at = string_field(object, "startDate").or_else(|| string_field(object, "createdAt"));
                let key = id_field(object, "id").unwrap_or_else(|| positional_key(recorded_at.as_deref(), index));
                Ok(row(key, entry, recorded_at))
            })
            .collect(),
        FeatureArea::DailyActivity => Ok(expect_map(area, legacy)?
            .into_iter()
            .map(|(date, activity)| row(date.clone(), activity, Some(date)))
            .collect()),
        FeatureArea::HabitLog => {
            let mut rows = Vec::new();
            for (habit_id, dates) in expect_map(area, legacy)? {
                let Value::Array(dates) = dates else {
                    return Err(AppError::Migration(format!(
                        "habit_log entry '{}' is not a list of dates",
                        habit_id
                    )));
                };
                for date in dates {
                    let Value::String(date) = date else {
                        return Err(AppError::Migration(format!(
                            "habit_log entry '{}' holds a non-string date",
                            habit_id
                        )));
                    };
                    rows.push(row(
                        format!("{}:{}", habit_id, date),
                        serde_json::json!({ "habitId": &habit_id, "date": &date }),
                        Some(date),
                    ));
                }
            }
            Ok(rows)
        }
    }
}

/// Key for an entry without an id. Its position in the legacy list does not
/// change between retries, so reruns produce the same key.
fn positional_key(anchor: Option<&str>, index: usize) -> String {
    match anchor {
        Some(anchor) => format!("{}#{}", anchor, index),
        None => format!("#{}", index),
    }
}

fn expect_array(area: FeatureArea, value: Value) -> AppResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(AppError::Migration(format!(
            "legacy {} record should be a list, found {}",
            area.as_str(),
            json_type(&other)
        ))),
    }
}

fn expect_map(area: FeatureArea, value: Value) -> AppResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(AppError::Migration(format!(
            "legacy {} record should be an object, found {}",
            area.as_str(),
            json_type(&other)
        ))),
    }
}

fn expect_object<'a>(area: FeatureArea, index: usize, value: &'a Value) -> AppResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| malformed(area, index, "is not an object"))
}

fn malformed(area: FeatureArea, index: usize, problem: &str) -> AppError {
    AppError::Migration(format!("legacy {} entry {} {}", area.as_str(), index, problem))
}

fn id_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    match object.get(field)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::{transform_legacy, MigrationManager};
    use crate::cache::durable::{DocumentRow, DurableStore};
    use crate::cache::local::{LocalStore, MemoryLocalStore};
    use crate::db::Database;
    use crate::errors::{AppError, AppResult};
    use crate::models::{FeatureArea, FeatureRecordRow, InsertOutcome};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails every insert after the first `healthy_inserts`, until reset.
    struct FlakyStore {
        inner: Database,
        healthy_inserts: AtomicI32,
        insert_calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(healthy_inserts: i32) -> Self {
            Self {
                inner: Database::in_memory().expect("db"),
                healthy_inserts: AtomicI32::new(healthy_inserts),
                insert_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DurableStore for FlakyStore {
        async fn fetch_document(&self, user_id: &str, kind: &str) -> AppResult<Option<DocumentRow>> {
            self.inner.fetch_document(user_id, kind).await
        }

        async fn upsert_document(&self, row: &DocumentRow) -> AppResult<()> {
            self.inner.upsert_document(row).await
        }

        async fn delete_document(&self, user_id: &str, kind: &str) -> AppResult<bool> {
            self.inner.delete_document(user_id, kind).await
        }

        async fn insert_feature_record(&self, record: &FeatureRecordRow) -> AppResult<InsertOutcome> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy_inserts.fetch_sub(1, Ordering::SeqCst) <= 0 {
                return Err(AppError::Transport("connection reset".to_string()));
            }
            self.inner.insert_feature_record(record).await
        }

        async fn list_feature_records(&self, user_id: &str, area: FeatureArea) -> AppResult<Vec<FeatureRecordRow>> {
            self.inner.list_feature_records(user_id, area).await
        }
    }

    fn journal() -> String {
        json!([
            { "id": "e1", "date": "2024-01-01", "content": "Started", "mood": "hopeful" },
            { "date": "2024-01-02", "content": "Kept going" },
            { "id": 7, "date": "2024-01-03", "content": "Shipped a screen" }
        ])
        .to_string()
    }

    fn setup(healthy_inserts: i32) -> (Arc<MemoryLocalStore>, Arc<FlakyStore>, MigrationManager) {
        let local = Arc::new(MemoryLocalStore::new());
        let durable = Arc::new(FlakyStore::new(healthy_inserts));
        let manager = MigrationManager::new(local.clone(), durable.clone(), Duration::from_secs(300));
        (local, durable, manager)
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let (local, durable, manager) = setup(i32::MAX);
        local.set("journal_entries_user-1", &journal()).expect("seed");

        assert!(manager.migrate_if_needed("user-1", FeatureArea::Journal).await.expect("first"));
        let after_first = durable
            .inner
            .list_feature_record_rows("user-1", FeatureArea::Journal)
            .expect("list");
        assert_eq!(after_first.len(), 3);
        assert_eq!(local.get("journal_entries_user-1").expect("get"), None);
        assert_eq!(local.get("migrated:journal:user-1").expect("get").as_deref(), Some("done"));

        assert!(!manager.migrate_if_needed("user-1", FeatureArea::Journal).await.expect("second"));
        assert_eq!(durable.insert_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            durable
                .inner
                .list_feature_record_rows("user-1", FeatureArea::Journal)
                .expect("list"),
            after_first
        );
    }

    #[tokio::test]
    async fn same_day_entries_without_ids_are_all_kept() {
        let (local, durable, manager) = setup(1);
        let same_day = json!([
            { "date": "2024-01-05", "content": "Morning pages" },
            { "date": "2024-01-05", "content": "Evening review" }
        ]);
        local.set("journal_entries_user-1", &same_day.to_string()).expect("seed");

        assert!(manager.migrate_if_needed("user-1", FeatureArea::Journal).await.is_err());
        durable.healthy_inserts.store(i32::MAX, Ordering::SeqCst);
        assert!(manager.migrate_if_needed("user-1", FeatureArea::Journal).await.expect("retry"));

        let rows = durable
            .inner
            .list_feature_record_rows("user-1", FeatureArea::Journal)
            .expect("list");
        let contents: Vec<_> = rows.iter().map(|row| row.payload["content"].clone()).collect();
        assert_eq!(contents, vec![json!("Morning pages"), json!("Evening review")]);
        assert_eq!(local.get("journal_entries_user-1").expect("get"), None);
    }

    #[tokio::test]
    async fn absent_or_empty_legacy_record_sets_flag() {
        let (local, durable, manager) = setup(i32::MAX);
        assert!(!manager.migrate_if_needed("user-1", FeatureArea::Challenges).await.expect("absent"));
        assert_eq!(local.get("migrated:challenges:user-1").expect("get").as_deref(), Some("done"));

        local.set("daily_activity_user-1", "{}").expect("seed");
        assert!(!manager.migrate_if_needed("user-1", FeatureArea::DailyActivity).await.expect("empty"));
        assert_eq!(local.get("migrated:daily_activity:user-1").expect("get").as_deref(), Some("done"));
        assert_eq!(durable.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn partial_failure_leaves_flag_unset_and_retry_completes() {
        let (local, durable, manager) = setup(1);
        local.set("journal_entries_user-1", &journal()).expect("seed");

        let error = manager
            .migrate_if_needed("user-1", FeatureArea::Journal)
            .await
            .expect_err("second insert fails");
        assert!(matches!(error, AppError::Migration(_)));
        assert_eq!(local.get("migrated:journal:user-1").expect("get"), None);
        assert!(local.get("journal_entries_user-1").expect("get").is_some());

        durable.healthy_inserts.store(i32::MAX, Ordering::SeqCst);
        assert!(manager.migrate_if_needed("user-1", FeatureArea::Journal).await.expect("retry"));
        let rows = durable
            .inner
            .list_feature_record_rows("user-1", FeatureArea::Journal)
            .expect("list");
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_first_loads_migrate_once() {
        let (local, durable, manager) = setup(i32::MAX);
        local.set("habit_log_user-1", &json!({ "h1": ["2024-01-01", "2024-01-02"] }).to_string())
            .expect("seed");

        let (first, second) = tokio::join!(
            manager.migrate_if_needed("user-1", FeatureArea::HabitLog),
            manager.migrate_if_needed("user-1", FeatureArea::HabitLog)
        );
        let ran = [first.expect("first"), second.expect("second")];
        assert_eq!(ran.iter().filter(|ran| **ran).count(), 1);
        assert_eq!(durable.insert_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fresh_claim_blocks_and_stale_claim_is_taken_over() {
        let (local, durable, manager) = setup(i32::MAX);
        local.set("challenges_user-1", &json!([{ "id": "c1", "title": "30 days" }]).to_string())
            .expect("seed");

        local
            .set("migrated:challenges:user-1", &format!("in_progress:{}", Utc::now().to_rfc3339()))
            .expect("fresh claim");
        assert!(!manager.migrate_if_needed("user-1", FeatureArea::Challenges).await.expect("blocked"));
        assert_eq!(durable.insert_calls.load(Ordering::SeqCst), 0);

        let stale = Utc::now() - ChronoDuration::hours(1);
        local
            .set("migrated:challenges:user-1", &format!("in_progress:{}", stale.to_rfc3339()))
            .expect("stale claim");
        assert!(manager.migrate_if_needed("user-1", FeatureArea::Challenges).await.expect("takeover"));
        assert_eq!(durable.insert_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transforms_key_records_per_area() {
        let journal = transform_legacy("u", FeatureArea::Journal, serde_json::from_str(&journal()).expect("json"))
            .expect("journal");
        let keys: Vec<_> = journal.iter().map(|row| row.record_key.as_str()).collect();
        assert_eq!(keys, vec!["e1", "2024-01-02#1", "7"]);
        assert_eq!(journal[0].recorded_at.as_deref(), Some("2024-01-01"));

        let activity = transform_legacy(
            "u",
            FeatureArea::DailyActivity,
            json!({ "2024-02-01": { "completed": 3 } }),
        )
        .expect("activity");
        assert_eq!(activity[0].record_key, "2024-02-01");
        assert_eq!(activity[0].payload, json!({ "completed": 3 }));

        let habits = transform_legacy("u", FeatureArea::HabitLog, json!({ "h1": ["2024-03-01"] })).expect("habits");
        assert_eq!(habits[0].record_key, "h1:2024-03-01");

        let challenges = transform_legacy(
            "u",
            FeatureArea::Challenges,
            json!([{ "title": "no id", "startDate": "2024-04-01" }, { "title": "undated" }]),
        )
        .expect("challenges");
        let keys: Vec<_> = challenges.iter().map(|row| row.record_key.as_str()).collect();
        assert_eq!(keys, vec!["2024-04-01#0", "#1"]);

        assert!(matches!(
            transform_legacy("u", FeatureArea::Journal, json!("text")),
            Err(AppError::Migration(_))
        ));
    }
}
