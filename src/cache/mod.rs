//! Read-through, write-through cache over a best-effort local tier and an
//! authoritative durable tier.

pub mod durable;
pub mod local;

use crate::errors::{AppError, AppResult};
use crate::models::GeneratedPlanDocument;
use chrono::{DateTime, SubsecRound, Utc};
use durable::{DocumentRow, DurableStore};
use local::LocalStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// A document kind that can live in both tiers.
pub trait CachedDocument: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {
    const KIND: &'static str;

    /// Minimum shape a cached copy needs before it is served.
    fn is_structurally_valid(&self) -> bool;
}

impl CachedDocument for GeneratedPlanDocument {
    const KIND: &'static str = "plan";

    fn is_structurally_valid(&self) -> bool {
        !self.identity_summary.trim().is_empty() && !self.yearly_goal.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<D> {
    pub user_id: String,
    pub document: D,
    pub generated_at: DateTime<Utc>,
}

impl<D: CachedDocument> CacheEntry<D> {
    fn from_row(row: DocumentRow) -> Option<Self> {
        let document: D = serde_json::from_value(row.document).ok()?;
        document.is_structurally_valid().then(|| Self {
            user_id: row.user_id,
            document,
            generated_at: row.generated_at,
        })
    }

    fn to_row(&self) -> AppResult<DocumentRow> {
        Ok(DocumentRow {
            user_id: self.user_id.clone(),
            kind: D::KIND.to_string(),
            document: serde_json::to_value(&self.document)?,
            generated_at: self.generated_at,
        })
    }
}

pub struct DualTierCache<D> {
    local: Arc<dyn LocalStore>,
    durable: Arc<dyn DurableStore>,
    _kind: PhantomData<fn() -> D>,
}

impl<D> Clone for DualTierCache<D> {
    fn clone(&self) -> Self {
        Self {
            local: Arc::clone(&self.local),
            durable: Arc::clone(&self.durable),
            _kind: PhantomData,
        }
    }
}

impl<D: CachedDocument> DualTierCache<D> {
    pub fn new(local: Arc<dyn LocalStore>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            local,
            durable,
            _kind: PhantomData,
        }
    }

    pub fn local_key(user_id: &str) -> String {
        format!("doc_cache:{}:{}", D::KIND, user_id)
    }

    /// Local tier only. Unreadable or malformed entries count as a miss.
    pub fn peek_local(&self, user_id: &str) -> Option<CacheEntry<D>> {
        let raw = match self.local.get(&Self::local_key(user_id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(user_id, kind = D::KIND, error = %error, "local cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry<D>>(&raw) {
            Ok(entry) if entry.user_id == user_id && entry.document.is_structurally_valid() => Some(entry),
            Ok(_) => {
                tracing::debug!(user_id, kind = D::KIND, "ignoring structurally invalid local entry");
                None
            }
            Err(error) => {
                tracing::debug!(user_id, kind = D::KIND, error = %error, "ignoring unparseable local entry");
                None
            }
        }
    }

    /// Local tier first, then the durable tier, which wins on disagreement.
    ///
    /// When the durable tier cannot be reached the local entry is served as is;
    /// with no local entry the durable error is returned.
    pub async fn load(&self, user_id: &str) -> AppResult<Option<CacheEntry<D>>> {
        let local = self.peek_local(user_id);

        let durable = match self.durable.fetch_document(user_id, D::KIND).await {
            Ok(row) => row.and_then(CacheEntry::<D>::from_row),
            Err(error) => {
                tracing::warn!(
                    user_id,
                    kind = D::KIND,
                    error = %error,
                    served_local = local.is_some(),
                    "durable tier unavailable during load"
                );
                return match local {
                    Some(entry) => Ok(Some(entry)),
                    None => Err(error),
                };
            }
        };

        match durable {
            Some(entry) => {
                if local.as_ref() != Some(&entry) {
                    tracing::info!(
                        user_id,
                        kind = D::KIND,
                        had_local = local.is_some(),
                        "refreshing local tier from durable tier"
                    );
                    self.write_local(&entry);
                }
                Ok(Some(entry))
            }
            None => {
                if local.is_some() {
                    tracing::info!(user_id, kind = D::KIND, "dropping local entry unknown to durable tier");
                }
                self.remove_local(user_id);
                Ok(None)
            }
        }
    }

    /// Durable write first; the local tier is only touched once that succeeds.
    pub async fn save(&self, user_id: &str, document: &D) -> AppResult<CacheEntry<D>> {
        let entry = CacheEntry {
            user_id: user_id.to_string(),
            document: document.clone(),
            generated_at: Utc::now().trunc_subsecs(3),
        };
        self.durable.upsert_document(&entry.to_row()?).await?;
        self.write_local(&entry);
        Ok(entry)
    }

    pub async fn invalidate(&self, user_id: &str) -> AppResult<()> {
        self.remove_local(user_id);
        self.durable.delete_document(user_id, D::KIND).await?;
        Ok(())
    }

    fn write_local(&self, entry: &CacheEntry<D>) {
        let key = Self::local_key(&entry.user_id);
        let result = serde_json::to_string(entry)
            .map_err(AppError::from)
            .and_then(|raw| self.local.set(&key, &raw));
        if let Err(error) = result {
            tracing::warn!(user_id = %entry.user_id, kind = D::KIND, error = %error, "local cache write skipped");
        }
    }

    fn remove_local(&self, user_id: &str) {
        if let Err(error) = self.local.remove(&Self::local_key(user_id)) {
            tracing::warn!(user_id, kind = D::KIND, error = %error, "local cache remove failed");
        }
    }
}
