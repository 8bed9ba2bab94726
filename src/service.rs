use crate::cache::durable::DurableStore;
use crate::cache::local::{FileLocalStore, LocalStore};
use crate::cache::{CacheEntry, DualTierCache};
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::errors::AppResult;
use crate::generation::{GeminiClient, GenerationClient};
use crate::harness::audit_depth;
use crate::migration::MigrationManager;
use crate::models::{FeatureArea, GenerateOptions, GeneratedPlanDocument, PlanOutcome, PlanSource, UserProfile};
use crate::orchestrator::{RetryOrchestrator, RetryPolicy};
use crate::prompt::build_plan_prompt;
use crate::state::{PlanState, PlanStateRegistry};
use crate::synthesizer::synthesize_plan;
use std::sync::Arc;
use std::time::Duration;

/// Entry point for collaborators: plan retrieval and legacy migration.
pub struct PlanService {
    cache: DualTierCache<GeneratedPlanDocument>,
    migrations: MigrationManager,
    orchestrator: Option<RetryOrchestrator>,
    states: PlanStateRegistry,
}

impl PlanService {
    /// Opens the stores under `config.data_dir` and resolves the API key from
    /// the environment or keyring.
    pub fn open(config: &AppConfig) -> AppResult<Arc<Self>> {
        let api_key = CredentialStore::default().resolve_api_key();
        Self::open_with_key(config, api_key)
    }

    pub fn open_with_key(config: &AppConfig, api_key: Option<String>) -> AppResult<Arc<Self>> {
        let durable = Arc::new(Database::new(&config.database_path())?);
        let local = Arc::new(FileLocalStore::new(&config.local_store_dir())?);

        let client: Option<Arc<dyn GenerationClient>> = match api_key {
            Some(key) => Some(Arc::new(GeminiClient::new(config.generation.clone(), key)?)),
            None => {
                tracing::warn!("no generation API key configured; plans will be synthesized locally");
                None
            }
        };

        Ok(Arc::new(Self::new(
            local,
            durable,
            client,
            RetryPolicy::from(&config.retry),
            Duration::from_secs(config.migration.stale_claim_secs),
        )))
    }

    pub fn new(
        local: Arc<dyn LocalStore>,
        durable: Arc<dyn DurableStore>,
        client: Option<Arc<dyn GenerationClient>>,
        retry: RetryPolicy,
        stale_claim: Duration,
    ) -> Self {
        Self {
            cache: DualTierCache::new(Arc::clone(&local), Arc::clone(&durable)),
            migrations: MigrationManager::new(local, durable, stale_claim),
            orchestrator: client.map(|client| RetryOrchestrator::new(client, retry)),
            states: PlanStateRegistry::new(),
        }
    }

    pub fn is_generator_configured(&self) -> bool {
        self.orchestrator.is_some()
    }

    /// Cached plan when one exists, otherwise a fresh one.
    ///
    /// A valid local copy is returned without waiting on the durable tier. The
    /// durable check then runs on a spawned task and replaces the local copy
    /// when the two disagree.
    ///
    /// `force_refresh` skips the cache lookup. If that regeneration fails and
    /// a plan was cached before, the cached plan is returned with a warning.
    pub async fn get_or_generate(
        &self,
        user_id: &str,
        profile: &UserProfile,
        options: GenerateOptions,
    ) -> AppResult<PlanOutcome> {
        if !options.force_refresh {
            if let Some(entry) = self.cache.peek_local(user_id) {
                tracing::debug!(user_id, "serving local plan");
                let outcome = self.cached_outcome(user_id, entry.clone(), PlanSource::Cache, None);
                self.reconcile_in_background(user_id, entry);
                return Ok(outcome);
            }
            if let Some(entry) = self.cache.load(user_id).await? {
                tracing::debug!(user_id, "serving durable plan");
                return Ok(self.cached_outcome(user_id, entry, PlanSource::Cache, None));
            }
        }

        let Some(orchestrator) = &self.orchestrator else {
            if options.force_refresh {
                if let Some(entry) = self.cache.load(user_id).await? {
                    return Ok(self.cached_outcome(
                        user_id,
                        entry,
                        PlanSource::StaleCache,
                        Some("generator not configured; showing the saved plan".to_string()),
                    ));
                }
            }
            tracing::info!(user_id, "synthesizing plan locally");
            let document = synthesize_plan(profile);
            let warnings = audit_depth(&document).warnings();
            self.states.set(
                user_id,
                PlanState::Ready {
                    source: PlanSource::Synthesized,
                    generated_at: None,
                },
            );
            return Ok(PlanOutcome {
                document,
                warnings,
                source: PlanSource::Synthesized,
                generated_at: None,
            });
        };

        let prompt = build_plan_prompt(profile);
        let states = self.states.clone();
        let result = orchestrator
            .run(&prompt, |transition| states.observe(user_id, transition))
            .await;

        let plan = match result {
            Ok(plan) => plan,
            Err(error) => {
                if options.force_refresh {
                    match self.cache.load(user_id).await {
                        Ok(Some(entry)) => {
                            tracing::warn!(user_id, error = %error, "regeneration failed; keeping saved plan");
                            return Ok(self.cached_outcome(
                                user_id,
                                entry,
                                PlanSource::StaleCache,
                                Some(format!("regeneration failed, showing the saved plan: {}", error)),
                            ));
                        }
                        Ok(None) => {}
                        Err(load_error) => {
                            tracing::warn!(user_id, error = %load_error, "saved plan lookup failed after regeneration failure")
                        }
                    }
                }
                self.states.set(
                    user_id,
                    PlanState::Failed {
                        message: error.to_string(),
                    },
                );
                return Err(error);
            }
        };

        let mut warnings = plan.warnings;
        let generated_at = match self.cache.save(user_id, &plan.document).await {
            Ok(entry) => Some(entry.generated_at),
            Err(error) => {
                tracing::warn!(user_id, error = %error, "generated plan could not be saved");
                warnings.push(format!("plan was not saved: {}", error));
                None
            }
        };
        self.states.set(
            user_id,
            PlanState::Ready {
                source: PlanSource::Generated,
                generated_at,
            },
        );

        Ok(PlanOutcome {
            document: plan.document,
            warnings,
            source: PlanSource::Generated,
            generated_at,
        })
    }

    /// Migration problems are logged and retried on a later call.
    pub async fn migrate_if_needed(&self, user_id: &str, area: FeatureArea) -> bool {
        match self.migrations.migrate_if_needed(user_id, area).await {
            Ok(ran) => ran,
            Err(error) => {
                tracing::warn!(user_id, feature_area = area.as_str(), error = %error, "legacy migration failed");
                false
            }
        }
    }

    /// Runs [`Self::migrate_if_needed`] for every area; returns those that migrated.
    pub async fn migrate_all(&self, user_id: &str) -> Vec<FeatureArea> {
        let mut migrated = Vec::new();
        for area in FeatureArea::ALL {
            if self.migrate_if_needed(user_id, area).await {
                migrated.push(area);
            }
        }
        migrated
    }

    pub async fn invalidate(&self, user_id: &str) -> AppResult<()> {
        self.cache.invalidate(user_id).await?;
        self.states.clear(user_id);
        Ok(())
    }

    pub fn state(&self, user_id: &str) -> PlanState {
        self.states.get(user_id)
    }

    fn reconcile_in_background(&self, user_id: &str, served: CacheEntry<GeneratedPlanDocument>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cache = self.cache.clone();
        let states = self.states.clone();
        let user_id = user_id.to_string();
        runtime.spawn(async move {
            match cache.load(&user_id).await {
                Ok(Some(entry)) if entry != served => {
                    tracing::info!(user_id = %user_id, "durable plan replaced the served local copy");
                    states.set(
                        &user_id,
                        PlanState::Ready {
                            source: PlanSource::Cache,
                            generated_at: Some(entry.generated_at),
                        },
                    );
                }
                Ok(Some(_)) => {}
                Ok(None) => states.clear(&user_id),
                Err(error) => {
                    tracing::warn!(user_id = %user_id, error = %error, "durable check of local plan failed")
                }
            }
        });
    }

    fn cached_outcome(
        &self,
        user_id: &str,
        entry: CacheEntry<GeneratedPlanDocument>,
        source: PlanSource,
        notice: Option<String>,
    ) -> PlanOutcome {
        let mut warnings = audit_depth(&entry.document).warnings();
        warnings.extend(notice);
        self.states.set(
            user_id,
            PlanState::Ready {
                source,
                generated_at: Some(entry.generated_at),
            },
        );
        PlanOutcome {
            document: entry.document,
            warnings,
            source,
            generated_at: Some(entry.generated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PlanService;
    use crate::cache::durable::DurableStore;
    use crate::cache::local::{LocalStore, MemoryLocalStore};
    use crate::cache::tests::SwitchableStore;
    use crate::cache::{CacheEntry, DualTierCache};
    use crate::errors::AppError;
    use crate::generation::GenerationClient;
    use crate::harness::structured_output::tests::{full_plan, plan_with};
    use crate::models::{FeatureArea, GenerateOptions, GeneratedPlanDocument, PlanSource, UserProfile};
    use crate::orchestrator::tests::ScriptedClient;
    use crate::orchestrator::RetryPolicy;
    use crate::state::PlanState;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn profile() -> UserProfile {
        UserProfile {
            yearly_goal: Some("Ship a mobile app".to_string()),
            daily_time_capacity: Some("1 hour".to_string()),
            ..UserProfile::default()
        }
    }

    fn service(
        client: Option<Arc<ScriptedClient>>,
    ) -> (Arc<MemoryLocalStore>, Arc<SwitchableStore>, PlanService) {
        let local = Arc::new(MemoryLocalStore::new());
        let durable = Arc::new(SwitchableStore::new());
        let service = PlanService::new(
            local.clone(),
            durable.clone(),
            client.map(|client| client as Arc<dyn GenerationClient>),
            RetryPolicy::new(2, Duration::ZERO),
            Duration::from_secs(300),
        );
        (local, durable, service)
    }

    #[tokio::test]
    async fn generated_plan_is_saved_then_served_from_cache() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(full_plan().to_string())]));
        let (_local, durable, service) = service(Some(client.clone()));

        let first = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("generated");
        assert_eq!(first.source, PlanSource::Generated);
        assert!(first.warnings.is_empty());
        assert!(first.generated_at.is_some());
        assert!(durable.inner.get_document("user-1", "plan").expect("get").is_some());

        let second = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("cached");
        assert_eq!(second.source, PlanSource::Cache);
        assert_eq!(second.document, first.document);
        assert_eq!(second.generated_at, first.generated_at);
        assert_eq!(client.call_count(), 1);
        assert!(service.state("user-1").is_ready());
    }

    #[tokio::test]
    async fn thin_plan_is_delivered_with_depth_warnings() {
        let thin = plan_with(vec![crate::harness::structured_output::tests::quarter(1, 13, 7)]);
        let client = Arc::new(ScriptedClient::new(vec![Ok(thin.to_string())]));
        let (_local, _durable, service) = service(Some(client));

        let outcome = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("generated");
        assert_eq!(outcome.warnings.len(), 3);

        let cached = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("cached");
        assert_eq!(cached.warnings, outcome.warnings);
    }

    #[tokio::test]
    async fn unconfigured_generator_synthesizes_without_persisting() {
        let (_local, durable, service) = service(None);

        let outcome = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("synthesized");
        assert_eq!(outcome.source, PlanSource::Synthesized);
        assert_eq!(outcome.document.quarters.len(), 4);
        assert!(outcome.warnings.is_empty());
        assert!(durable.inner.get_document("user-1", "plan").expect("get").is_none());
    }

    #[tokio::test]
    async fn terminal_failure_reports_error_and_state() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("{\"quarters\": [".to_string())]));
        let (_local, durable, service) = service(Some(client.clone()));

        let error = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect_err("terminal failure");
        assert!(matches!(error.root_cause(), AppError::Truncated(_)));
        assert_eq!(client.call_count(), 2);
        assert!(durable.inner.get_document("user-1", "plan").expect("get").is_none());
        assert!(matches!(service.state("user-1"), PlanState::Failed { .. }));
    }

    #[tokio::test]
    async fn failed_force_refresh_falls_back_to_saved_plan() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(full_plan().to_string()),
            Err(AppError::Transport("503".to_string())),
            Err(AppError::Transport("503".to_string())),
        ]));
        let (_local, _durable, service) = service(Some(client.clone()));
        let first = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("generated");

        let refreshed = service
            .get_or_generate("user-1", &profile(), GenerateOptions { force_refresh: true })
            .await
            .expect("stale fallback");
        assert_eq!(refreshed.source, PlanSource::StaleCache);
        assert_eq!(refreshed.document, first.document);
        assert_eq!(refreshed.warnings.len(), 1);
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn durable_outage_on_save_still_returns_plan() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(full_plan().to_string())]));
        let (local, durable, service) = service(Some(client));
        durable.reject_writes.store(true, Ordering::SeqCst);

        let outcome = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("generated");
        assert_eq!(outcome.source, PlanSource::Generated);
        assert_eq!(outcome.generated_at, None);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(local.keys().is_empty());
    }

    #[tokio::test]
    async fn invalidate_forces_regeneration() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(full_plan().to_string())]));
        let (_local, durable, service) = service(Some(client.clone()));
        service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("generated");

        service.invalidate("user-1").await.expect("invalidate");
        assert_eq!(service.state("user-1"), PlanState::Idle);
        assert!(durable.fetch_document("user-1", "plan").await.expect("fetch").is_none());

        service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("regenerated");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn durable_outage_without_local_plan_does_not_generate() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(full_plan().to_string())]));
        let (_local, durable, service) = service(Some(client.clone()));
        durable.offline.store(true, Ordering::SeqCst);

        let error = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect_err("durable read error propagates");
        assert!(matches!(error, AppError::Transport(_)));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn local_plan_is_served_first_then_reconciled() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(full_plan().to_string())]));
        let (local, _durable, service) = service(Some(client.clone()));
        let saved = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("generated");

        let key = DualTierCache::<GeneratedPlanDocument>::local_key("user-1");
        let raw = local.get(&key).expect("get").expect("local entry");
        let mut older: CacheEntry<GeneratedPlanDocument> = serde_json::from_str(&raw).expect("entry");
        older.document.identity_summary = "An earlier self".to_string();
        older.generated_at -= chrono::Duration::days(1);
        local.set(&key, &serde_json::to_string(&older).expect("serialize")).expect("set");

        let served = service
            .get_or_generate("user-1", &profile(), GenerateOptions::default())
            .await
            .expect("local");
        assert_eq!(served.source, PlanSource::Cache);
        assert_eq!(served.document.identity_summary, "An earlier self");

        for _ in 0..100 {
            if service.cache.peek_local("user-1").map(|entry| entry.generated_at) == saved.generated_at {
                break;
            }
            tokio::task::yield_now().await;
        }
        let reconciled = service.cache.peek_local("user-1").expect("local entry");
        assert_eq!(reconciled.document, saved.document);
        assert_eq!(
            service.state("user-1"),
            PlanState::Ready {
                source: PlanSource::Cache,
                generated_at: saved.generated_at,
            }
        );
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn migration_errors_are_swallowed() {
        let (local, durable, service) = service(None);
        local.set("challenges_user-1", "{\"title\": \"not a list\"}").expect("seed");
        assert!(!service.migrate_if_needed("user-1", FeatureArea::Challenges).await);
        assert!(local.get("migrated:challenges:user-1").expect("get").is_none());

        local.set("challenges_user-1", "[{\"title\": \"no id\"}]").expect("seed");
        local
            .set("journal_entries_user-1", "[{\"date\": \"2024-01-01\", \"content\": \"hi\"}]")
            .expect("seed");
        assert_eq!(
            service.migrate_all("user-1").await,
            vec![FeatureArea::Journal, FeatureArea::Challenges]
        );
        assert_eq!(
            durable
                .list_feature_records("user-1", FeatureArea::Challenges)
                .await
                .expect("list")
                .len(),
            1
        );
    }
}
