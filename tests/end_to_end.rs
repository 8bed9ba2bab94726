use plan_engine::config::{AppConfig, GenerationConfig, RetryConfig};
use plan_engine::db::Database;
use plan_engine::synthesizer::synthesize_plan;
use plan_engine::{AppError, GenerateOptions, PlanService, PlanSource, PlanState, UserProfile};
use serde_json::json;
use std::path::Path;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

const MODEL: &str = "test-model";
const API_KEY: &str = "test-key";

fn profile() -> UserProfile {
    UserProfile {
        yearly_goal: Some("Ship a mobile app".to_string()),
        daily_time_capacity: Some("1 hour".to_string()),
        ..UserProfile::default()
    }
}

fn config(data_dir: &Path, server: &MockServer) -> AppConfig {
    AppConfig {
        data_dir: data_dir.to_path_buf(),
        generation: GenerationConfig {
            model: MODEL.to_string(),
            endpoint_base: server.uri(),
            request_timeout_secs: 10,
            ..GenerationConfig::default()
        },
        retry: RetryConfig {
            max_attempts: 2,
            backoff_ms: 10,
        },
        ..AppConfig::default()
    }
}

fn candidate(text: &str, finish_reason: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }], "role": "model" },
            "finishReason": finish_reason
        }]
    })
}

fn generate_content() -> MockBuilder {
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{}:generateContent", MODEL)))
        .and(query_param("key", API_KEY))
}

#[tokio::test]
async fn generated_plan_is_persisted_and_then_served_locally() {
    let server = MockServer::start().await;
    let plan = serde_json::to_string_pretty(&synthesize_plan(&profile())).expect("serialize");
    generate_content()
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(&format!("```json\n{}\n```", plan), "STOP")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &server);
    let service = PlanService::open_with_key(&config, Some(API_KEY.to_string())).expect("service");

    let first = service
        .get_or_generate("user-1", &profile(), GenerateOptions::default())
        .await
        .expect("generated");
    assert_eq!(first.source, PlanSource::Generated);
    assert!(first.warnings.is_empty(), "unexpected warnings: {:?}", first.warnings);
    assert_eq!(first.document.quarters.len(), 4);

    let db = Database::new(&config.database_path()).expect("db");
    let row = db.get_document("user-1", "plan").expect("get").expect("row");
    assert_eq!(Some(row.generated_at), first.generated_at);

    let second = service
        .get_or_generate("user-1", &profile(), GenerateOptions::default())
        .await
        .expect("cached");
    assert_eq!(second.source, PlanSource::Cache);
    assert_eq!(second.document, first.document);

    let reopened = PlanService::open_with_key(&config, Some(API_KEY.to_string())).expect("service");
    let third = reopened
        .get_or_generate("user-1", &profile(), GenerateOptions::default())
        .await
        .expect("cached after reopen");
    assert_eq!(third.source, PlanSource::Cache);
    assert_eq!(third.document, first.document);
}

#[tokio::test]
async fn truncated_responses_fail_without_durable_write() {
    let server = MockServer::start().await;
    generate_content()
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(
            "{\"identitySummary\": \"Builder\", \"quarters\": [{\"quarter\": 1, \"weeks\": [",
            "STOP",
        )))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(dir.path(), &server);
    let service = PlanService::open_with_key(&config, Some(API_KEY.to_string())).expect("service");

    let error = service
        .get_or_generate("user-1", &profile(), GenerateOptions::default())
        .await
        .expect_err("terminal failure");
    assert!(matches!(error, AppError::GenerationFailed { attempts: 2, .. }));
    assert!(matches!(error.root_cause(), AppError::Truncated(_)));
    assert!(error.to_string().contains("RESPONSE_TRUNCATED"));
    assert!(matches!(service.state("user-1"), PlanState::Failed { .. }));

    let db = Database::new(&config.database_path()).expect("db");
    assert_eq!(db.document_count().expect("count"), 0);
}

#[tokio::test]
async fn server_error_is_retried_once() {
    let server = MockServer::start().await;
    generate_content()
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    let plan = serde_json::to_string(&synthesize_plan(&profile())).expect("serialize");
    generate_content()
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate(&plan, "STOP")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let service = PlanService::open_with_key(&config(dir.path(), &server), Some(API_KEY.to_string())).expect("service");

    let outcome = service
        .get_or_generate("user-1", &profile(), GenerateOptions::default())
        .await
        .expect("generated on retry");
    assert_eq!(outcome.source, PlanSource::Generated);
}

#[tokio::test]
async fn token_ceiling_counts_as_truncation() {
    let server = MockServer::start().await;
    generate_content()
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("{\"identitySummary\": \"Bu", "MAX_TOKENS")))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let service = PlanService::open_with_key(&config(dir.path(), &server), Some(API_KEY.to_string())).expect("service");

    let error = service
        .get_or_generate("user-1", &profile(), GenerateOptions::default())
        .await
        .expect_err("terminal failure");
    assert!(matches!(error.root_cause(), AppError::Truncated(_)));
}
