use chrono::{Duration as ChronoDuration, Utc};
use covenant_auth::JwtClaims;
use covenant_core::{EntityId, RealmId};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use covenant_api::config::{
    AppConfig, AuthConfig, EventStoreBackend, EventStoreConfig, NodeEnv, RateLimitBackend,
    RateLimitConfig, ServerConfig,
};
use covenant_infra::BootstrapConfig;

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                node_env: NodeEnv::Development,
            },
            event_store: EventStoreConfig {
                backend: EventStoreBackend::Memory,
                url: None,
            },
            auth: AuthConfig {
                jwt_secret: JWT_SECRET.to_string(),
                issuer: None,
                audience: None,
            },
            rate_limit: RateLimitConfig {
                backend: RateLimitBackend::None,
                redis_url: None,
            },
            bootstrap: BootstrapConfig::default(),
            llm_api_key: None,
        };

        // Same router as prod, bound to an ephemeral port.
        let (router, _services, _worker) = covenant_api::app::build(config).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(entity_id: EntityId, realm_id: RealmId) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: entity_id,
        realm_id,
        scopes: vec!["query:*".to_string()],
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
        issuer: None,
        audience: None,
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn healthz_reports_the_log_head() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/healthz", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    // Bootstrap already appended the primordial realm events.
    assert!(body["sequence"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn anonymous_queries_are_served() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/intent", srv.base_url))
        .json(&json!({"intent": "realm:list", "payload": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["outcome"], "Queried");
    assert_eq!(body["data"]["realms"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn entity_actor_claims_require_credentials() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/intent", srv.base_url))
        .json(&json!({
            "intent": "realm:list",
            "actor": {"type": "Entity", "entity_id": EntityId::new()},
            "payload": {},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registration_is_immediately_queryable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let registered: serde_json::Value = client
        .post(format!("{}/intent", srv.base_url))
        .json(&json!({
            "intent": "register",
            "payload": {"kind": "Person", "name": "Ada"},
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(registered["success"], true);
    let entity_id = registered["data"]["entity_id"].clone();

    // Reads fold the log directly; no projection wait needed.
    let fetched: serde_json::Value = client
        .post(format!("{}/intent", srv.base_url))
        .json(&json!({
            "intent": "entity:get",
            "payload": {"entity_id": entity_id},
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["success"], true);
    assert_eq!(fetched["data"]["name"], "Ada");
}

#[tokio::test]
async fn denied_intents_still_return_a_determined_outcome() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let entity_id = EntityId::new();
    let other = EntityId::new();
    let token = mint_jwt(entity_id, RealmId::new());

    // Authenticated, but with no active agreements: forbidden, over HTTP 200.
    let res = client
        .post(format!("{}/intent", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "intent": "agreement:propose",
            "payload": {
                "agreement_type": "employment",
                "parties": [
                    {"entity_id": entity_id, "role": "employer"},
                    {"entity_id": other, "role": "employee"},
                ],
            },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["outcome"], "Nothing");
    assert_eq!(body["errors"][0]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn body_actor_must_match_bearer_identity() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let token = mint_jwt(EntityId::new(), RealmId::new());

    let res = client
        .post(format!("{}/intent", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({
            "intent": "realm:list",
            "actor": {"type": "Entity", "entity_id": EntityId::new()},
            "payload": {},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_intents_are_a_determined_outcome_not_a_404() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/intent", srv.base_url))
        .json(&json!({"intent": "no:such", "payload": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["code"], "INTENT_NOT_FOUND");
}
