use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::routing::post;
use kai_analysis::{OpenAiCompletionClient, TokioBackgroundTasks};
use kai_auth::{
    AuthError, SharedSecretConfig, SharedSecretVerifier, TokenVerifier, parse_hmac_algorithm,
};
use kai_contracts::ANALYZE_REQUEST_COLLECTION;
use kai_gateway::config::GatewayConfig;
use kai_gateway::http::{AppState, app, router};
use kai_store::{DocumentStore, MemoryDocumentStore};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const SECRET: &str = "smoke-test-secret";

struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl Server {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

async fn spawn_server(app: Router) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    Server {
        addr,
        shutdown: Some(shutdown_tx),
        handle,
    }
}

async fn wait_for_health(client: &reqwest::Client, server: &Server) {
    let url = server.url("/health");

    for _ in 0..50 {
        if let Ok(response) = client.get(&url).send().await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("server did not become ready at {}", url);
}

async fn mock_completion() -> Json<Value> {
    let content = json!({
        "summary": "A short upbeat note.",
        "sentiment": "positive",
        "keywords": ["upbeat", "note"],
    });
    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": content.to_string()}}],
    }))
}

async fn spawn_upstream() -> Server {
    spawn_server(Router::new().route("/v1/chat/completions", post(mock_completion))).await
}

fn local_config(upstream: &Server) -> GatewayConfig {
    GatewayConfig::from_kv(&HashMap::from([
        ("KAI_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        ("KAI_AUTH_MODE".to_string(), "local".to_string()),
        ("JWT_SECRET_KEY".to_string(), SECRET.to_string()),
        ("KAI_STORE_MODE".to_string(), "memory".to_string()),
        ("OPENAI_API_KEY".to_string(), "sk-smoke".to_string()),
        ("OPENAI_BASE_URL".to_string(), upstream.url("/v1")),
    ]))
    .expect("gateway config should be valid")
}

fn signer() -> SharedSecretVerifier {
    SharedSecretVerifier::new(SharedSecretConfig {
        secret: SECRET.to_string(),
        algorithm: parse_hmac_algorithm("HS256").expect("HS256 is supported"),
    })
    .expect("signer should build")
}

fn token_for(uid: &str) -> String {
    signer()
        .sign(&json!({
            "sub": uid,
            "name": "Smoke Tester",
            "email": format!("{uid}@example.test"),
            "exp": 4_102_444_800u64,
        }))
        .expect("token should sign")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_submit_then_list_reaches_terminal_status() {
    let log_buf = init_test_tracing();

    let upstream = spawn_upstream().await;
    let gateway = spawn_server(
        router(local_config(&upstream))
            .await
            .expect("gateway router should init"),
    )
    .await;

    let client = reqwest::Client::new();
    wait_for_health(&client, &gateway).await;

    let token = token_for("smoke-user");

    let me = client
        .get(gateway.url("/v1/user/me"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("me request should succeed");
    assert_eq!(me.status(), 200);
    let me: Value = me.json().await.expect("me body should be JSON");
    assert_eq!(me["success"], true);
    assert_eq!(me["data"]["uid"], "smoke-user");
    assert_eq!(me["data"]["email"], "smoke-user@example.test");

    let submitted = client
        .post(gateway.url("/v1/user/analyze"))
        .bearer_auth(&token)
        .json(&json!({"text": "What a lovely day for a walk."}))
        .send()
        .await
        .expect("submit should succeed");
    assert_eq!(submitted.status(), 200);
    let submitted: Value = submitted.json().await.expect("submit body should be JSON");
    assert_eq!(submitted["statusCode"], 200);
    assert_eq!(submitted["message"], "Analysis request created successfully");
    assert_eq!(submitted["data"]["status"], "pending");
    let document_id = submitted["data"]["document_id"]
        .as_str()
        .expect("document_id should be a string")
        .to_string();

    let mut listed = Value::Null;
    for _ in 0..50 {
        listed = client
            .get(gateway.url("/v1/user/analyze"))
            .bearer_auth(&token)
            .send()
            .await
            .expect("list should succeed")
            .json()
            .await
            .expect("list body should be JSON");
        if listed["data"]["requests"][0]["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let record = &listed["data"]["requests"][0];
    assert_eq!(listed["data"]["total"], 1);
    assert_eq!(record["id"], document_id.as_str());
    assert_eq!(record["user_id"], "smoke-user");
    assert_eq!(record["status"], "completed");
    assert_eq!(record["result"]["sentiment"], "positive");
    assert!(record["completed_at"].is_string());

    let logs = String::from_utf8_lossy(&log_buf.lock().expect("log lock").clone()).to_string();
    assert!(logs.contains("request completed"));
    assert!(logs.contains("auth allowed"));
    assert!(!logs.contains(&token), "bearer tokens must never be logged");

    gateway.stop().await;
    upstream.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_rejects_bad_credentials_and_bad_input() {
    let upstream = spawn_upstream().await;
    let gateway = spawn_server(
        router(local_config(&upstream))
            .await
            .expect("gateway router should init"),
    )
    .await;
    let client = reqwest::Client::new();
    wait_for_health(&client, &gateway).await;

    let missing = client
        .get(gateway.url("/v1/user/me"))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(missing.status(), 401);
    let missing: Value = missing.json().await.expect("body should be JSON");
    assert_eq!(missing["success"], false);
    assert_eq!(missing["data"], Value::Null);
    assert_eq!(missing["message"], "Invalid authorization header");

    let forged = client
        .get(gateway.url("/v1/user/me"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(forged.status(), 401);
    let forged: Value = forged.json().await.expect("body should be JSON");
    assert_eq!(forged["message"], "Invalid or expired token");

    let token = token_for("smoke-user");
    for text in ["", "ab"] {
        let response = client
            .post(gateway.url("/v1/user/analyze"))
            .bearer_auth(&token)
            .json(&json!({"text": text}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), 422, "text {text:?}");
        let body: Value = response.json().await.expect("body should be JSON");
        assert_eq!(body["statusCode"], 422);
    }

    let out_of_range = client
        .get(gateway.url("/v1/user/analyze?limit=0"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(out_of_range.status(), 422);

    let listed: Value = client
        .get(gateway.url("/v1/user/analyze"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request should succeed")
        .json()
        .await
        .expect("body should be JSON");
    assert_eq!(listed["data"]["total"], 0, "rejected input must not be stored");

    let wrong_method = client
        .delete(gateway.url("/v1/user/analyze"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(wrong_method.status(), 405);
    let wrong_method: Value = wrong_method.json().await.expect("body should be JSON");
    assert_eq!(wrong_method["statusCode"], 405);

    let unknown = client
        .get(gateway.url("/v1/nothing-here"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(unknown.status(), 404);
    let unknown: Value = unknown.json().await.expect("body should be JSON");
    assert_eq!(unknown["success"], false);

    gateway.stop().await;
    upstream.stop().await;
}

#[derive(Default)]
struct CountingVerifier {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl TokenVerifier for CountingVerifier {
    async fn verify(&self, _token: &str) -> Result<Value, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"sub": "counted-user"}))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_public_routes_skip_token_verification() {
    let upstream = spawn_upstream().await;
    let config = local_config(&upstream);
    let verifier = Arc::new(CountingVerifier::default());
    let completion = OpenAiCompletionClient::new(config.openai.clone())
        .expect("completion client should build");

    let state = AppState::new(
        config,
        verifier.clone(),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(completion),
        Arc::new(TokioBackgroundTasks),
    );
    let gateway = spawn_server(app(state)).await;
    let client = reqwest::Client::new();
    wait_for_health(&client, &gateway).await;

    let root: Value = client
        .get(gateway.url("/"))
        .send()
        .await
        .expect("root should succeed")
        .json()
        .await
        .expect("root body should be JSON");
    assert_eq!(root["data"]["status"], "healthy");
    assert_eq!(root["message"], "Kai Backend API is running");

    let docs = client
        .get(gateway.url("/openapi.json"))
        .send()
        .await
        .expect("openapi should succeed");
    assert_eq!(docs.status(), 200);

    let preflight = client
        .request(reqwest::Method::OPTIONS, gateway.url("/v1/user/analyze"))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .expect("preflight should succeed");
    assert!(preflight.status().is_success());
    assert_eq!(
        preflight
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:3000")
    );

    assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);

    let me = client
        .get(gateway.url("/v1/user/me"))
        .bearer_auth("anything")
        .header("x-request-id", "smoke-req-1")
        .send()
        .await
        .expect("me should succeed");
    assert_eq!(me.status(), 200);
    assert_eq!(
        me.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("smoke-req-1")
    );
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);

    gateway.stop().await;
    upstream.stop().await;
}

struct UnavailableVerifier;

#[async_trait::async_trait]
impl TokenVerifier for UnavailableVerifier {
    async fn verify(&self, _token: &str) -> Result<Value, AuthError> {
        Err(AuthError {
            code: AuthError::UNAVAILABLE,
            message: "failed to fetch JWKS".to_string(),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_verifier_fault_is_an_internal_error() {
    let upstream = spawn_upstream().await;
    let config = local_config(&upstream);
    let store = MemoryDocumentStore::new();
    let completion = OpenAiCompletionClient::new(config.openai.clone())
        .expect("completion client should build");

    let state = AppState::new(
        config,
        Arc::new(UnavailableVerifier),
        Arc::new(store.clone()),
        Arc::new(completion),
        Arc::new(TokioBackgroundTasks),
    );
    let gateway = spawn_server(app(state)).await;
    let client = reqwest::Client::new();
    wait_for_health(&client, &gateway).await;

    let response = client
        .post(gateway.url("/v1/user/analyze"))
        .bearer_auth("well-formed-but-unverifiable")
        .json(&json!({"text": "This should never be stored."}))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.expect("body should be JSON");
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 500);
    assert_eq!(body["data"], Value::Null);
    assert_eq!(body["message"], "Authentication failed");

    assert_eq!(
        store
            .count(ANALYZE_REQUEST_COLLECTION, &[])
            .await
            .expect("count should succeed"),
        0,
        "handler must not run when verification faults"
    );

    gateway.stop().await;
    upstream.stop().await;
}

#[derive(Clone)]
struct TestWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for TestWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf
            .lock()
            .map_err(|_| std::io::Error::other("log lock poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_test_tracing() -> Arc<Mutex<Vec<u8>>> {
    static LOG_BUF: OnceLock<Arc<Mutex<Vec<u8>>>> = OnceLock::new();

    LOG_BUF
        .get_or_init(|| {
            let buf = Arc::new(Mutex::new(Vec::new()));
            let make_writer = {
                let buf = buf.clone();
                move || TestWriter { buf: buf.clone() }
            };

            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .with_ansi(false)
                .with_writer(make_writer)
                .finish();

            tracing::subscriber::set_global_default(subscriber)
                .expect("global tracing subscriber should be set once");

            buf
        })
        .clone()
}
