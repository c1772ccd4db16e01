use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use reqwest::StatusCode;
use serde_json::json;

use simbench_api::app::{build_app, AppServices};
use simbench_auth::{Role, StaticRoleDirectory};
use simbench_core::{JobId, UserId};
use simbench_infra::jobs::{
    HttpExecutionDelegate, InMemoryJobStore, Job, JobFilter, JobPage, JobStore, JobStoreError,
    NewJob, Pagination, QueueStats, SimulationWorker, WorkerConfig,
};
use simbench_infra::sessions::{InMemorySessionStore, SessionStore};

struct TestServer {
    base_url: String,
    jobs: Arc<InMemoryJobStore>,
    sessions: Arc<InMemorySessionStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let jobs = InMemoryJobStore::arc();
        Self::spawn_with(jobs.clone(), jobs).await
    }

    /// Serve `job_store`; `jobs` is the in-memory handle tests inspect.
    async fn spawn_with(jobs: Arc<InMemoryJobStore>, job_store: Arc<dyn JobStore>) -> Self {
        let sessions = Arc::new(InMemorySessionStore::default());
        let roles = StaticRoleDirectory::new(vec![Role::SIMULATOR])
            .with_roles(UserId::new(99), vec![Role::new("viewer")]);
        let services = AppServices::new(job_store, sessions.clone(), Arc::new(roles));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            jobs,
            sessions,
            handle,
        }
    }

    async fn login(&self, user_id: i64) -> String {
        self.sessions
            .create(UserId::new(user_id))
            .await
            .unwrap()
            .session_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/simulations/queue{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Job store with the database gone.
struct UnavailableJobStore;

impl UnavailableJobStore {
    fn down<T>() -> Result<T, JobStoreError> {
        Err(JobStoreError::Storage("connection pool timed out".to_string()))
    }
}

#[async_trait]
impl JobStore for UnavailableJobStore {
    async fn enqueue(&self, _input: NewJob) -> Result<Job, JobStoreError> {
        Self::down()
    }

    async fn claim_next_ready(&self) -> Result<Option<Job>, JobStoreError> {
        Self::down()
    }

    async fn mark_completed(
        &self,
        _job_id: JobId,
        _result: serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        Self::down()
    }

    async fn mark_failed(&self, _job_id: JobId, _error_message: String) -> Result<Job, JobStoreError> {
        Self::down()
    }

    async fn cancel_job(&self, _job_id: JobId) -> Result<Job, JobStoreError> {
        Self::down()
    }

    async fn get_job(&self, _job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Self::down()
    }

    async fn list_jobs(
        &self,
        _filter: &JobFilter,
        _page: Pagination,
    ) -> Result<JobPage, JobStoreError> {
        Self::down()
    }

    async fn queue_stats(&self) -> Result<QueueStats, JobStoreError> {
        Self::down()
    }
}

fn job_body(priority: Option<i64>) -> serde_json::Value {
    let mut body = json!({
        "service_id": "svc1",
        "current_config": {"heap": "2g"},
        "proposed_config": {"heap": "4g"},
        "llm_provider": "openai",
    });
    if let Some(p) = priority {
        body["priority"] = json!(p);
    }
    body
}

async fn enqueue(
    client: &reqwest::Client,
    srv: &TestServer,
    session: &str,
    priority: Option<i64>,
) -> serde_json::Value {
    let res = client
        .post(srv.url(""))
        .bearer_auth(session)
        .json(&job_body(priority))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    body["job"].clone()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_queue_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let res = client
        .get(srv.url("/stats"))
        .bearer_auth("not-a-session")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_authenticates() {
    let srv = TestServer::spawn().await;
    let session = srv.login(5).await;

    let res = reqwest::Client::new()
        .get(format!("{}/whoami", srv.base_url))
        .header("Cookie", format!("session_id={session}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"], 5);
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "simulator"));
}

#[tokio::test]
async fn role_without_permissions_is_forbidden() {
    let srv = TestServer::spawn().await;
    let session = srv.login(99).await;

    let res = reqwest::Client::new()
        .post(srv.url(""))
        .bearer_auth(&session)
        .json(&job_body(None))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(srv.jobs.queue_stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn queue_lifecycle_create_fetch_list_cancel() {
    let srv = TestServer::spawn().await;
    let session = srv.login(1).await;
    let client = reqwest::Client::new();

    // Create
    let job = enqueue(&client, &srv, &session, None).await;
    assert_eq!(job["status"], "pending");
    assert_eq!(job["priority"], 50);
    assert_eq!(job["user_id"], 1);
    assert!(job["result"].is_null());
    assert!(job["error_message"].is_null());
    let id = job["id"].as_i64().unwrap();

    // Fetch
    let res = client
        .get(srv.url(&format!("/{id}")))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["job"]["id"], id);
    assert_eq!(body["job"]["proposed_config"], json!({"heap": "4g"}));

    // List
    let res = client
        .get(srv.url("?status=pending"))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["jobs"][0]["id"], id);

    // Cancel, then cancel again
    let res = client
        .delete(srv.url(&format!("/{id}")))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["job"]["status"], "cancelled");

    let res = client
        .delete(srv.url(&format!("/{id}")))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn list_is_scoped_to_requester_and_paginated() {
    let srv = TestServer::spawn().await;
    let alice = srv.login(1).await;
    let bob = srv.login(2).await;
    let client = reqwest::Client::new();

    for p in [10, 90, 50] {
        enqueue(&client, &srv, &alice, Some(p)).await;
    }
    enqueue(&client, &srv, &bob, Some(100)).await;

    let res = client
        .get(srv.url("?limit=2&offset=0"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["total"], 3);
    let priorities: Vec<i64> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["priority"].as_i64().unwrap())
        .collect();
    assert_eq!(priorities, vec![90, 50]);

    let res = client
        .get(srv.url("?status=finished"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let srv = TestServer::spawn().await;
    let session = srv.login(1).await;
    let client = reqwest::Client::new();

    // Missing proposed_config: 400 and nothing stored
    let res = client
        .post(srv.url(""))
        .bearer_auth(&session)
        .json(&json!({"service_id": "svc1", "current_config": {"heap": "2g"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert_eq!(srv.jobs.queue_stats().await.unwrap().total(), 0);

    // Missing service_id
    let res = client
        .post(srv.url(""))
        .bearer_auth(&session)
        .json(&json!({"current_config": {}, "proposed_config": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Malformed JSON
    let res = client
        .post(srv.url(""))
        .bearer_auth(&session)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Non-numeric id
    let res = client
        .get(srv.url("/abc"))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    // Unknown id
    let res = client
        .get(srv.url("/424242"))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .delete(srv.url("/424242"))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storage_outage_is_service_unavailable() {
    let srv = TestServer::spawn_with(InMemoryJobStore::arc(), Arc::new(UnavailableJobStore)).await;
    let session = srv.login(1).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url(""))
        .bearer_auth(&session)
        .json(&job_body(None))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "service_unavailable");

    for path in ["", "/stats", "/1"] {
        let res = client
            .get(srv.url(path))
            .bearer_auth(&session)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE, "GET {path}");
    }

    let res = client
        .delete(srv.url("/1"))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn out_of_range_priority_is_clamped() {
    let srv = TestServer::spawn().await;
    let session = srv.login(1).await;
    let client = reqwest::Client::new();

    assert_eq!(enqueue(&client, &srv, &session, Some(250)).await["priority"], 100);
    assert_eq!(enqueue(&client, &srv, &session, Some(-3)).await["priority"], 0);
}

#[tokio::test]
async fn submitted_job_is_evaluated_by_worker() {
    let srv = TestServer::spawn().await;
    let session = srv.login(1).await;
    let client = reqwest::Client::new();

    // Fake advisor
    let advisor = Router::new().route(
        "/api/v1/evaluate",
        post(|Json(body): Json<serde_json::Value>| async move {
            assert_eq!(body["llm_provider"], "openai");
            Json(json!({"verdict": "approved"}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let advisor_url = format!("http://{}", listener.local_addr().unwrap());
    let advisor_handle = tokio::spawn(async move {
        axum::serve(listener, advisor).await.unwrap();
    });

    let worker = SimulationWorker::new(
        srv.jobs.clone(),
        HttpExecutionDelegate::new(&advisor_url).unwrap(),
        WorkerConfig::default().with_poll_interval(Duration::from_millis(10)),
    )
    .spawn(tokio_util::sync::CancellationToken::new());

    let id = enqueue(&client, &srv, &session, None).await["id"].as_i64().unwrap();

    let mut job = serde_json::Value::Null;
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/{id}")))
            .bearer_auth(&session)
            .send()
            .await
            .unwrap();
        job = res.json::<serde_json::Value>().await.unwrap()["job"].clone();
        if job["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    worker.shutdown().await;
    advisor_handle.abort();

    assert_eq!(job["status"], "completed");
    assert_eq!(job["result"], json!({"verdict": "approved"}));
    assert!(job["error_message"].is_null());
    assert!(!job["completed_at"].is_null());

    let res = client
        .get(srv.url("/stats"))
        .bearer_auth(&session)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["stats"]["completed"], 1);
    assert_eq!(body["total"], 1);
}
