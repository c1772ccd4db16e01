//! End-to-end queue scenarios: enqueue → worker → HTTP advisor → terminal state.

use std::time::Duration;

use axum::{Json, Router, http::StatusCode, routing::post};
use proptest::prelude::*;
use serde_json::json;

use simbench_core::UserId;
use simbench_infra::jobs::{
    HttpExecutionDelegate, InMemoryJobStore, JobStatus, JobStore, JobStoreError, NewJob,
    SimulationWorker, WorkerConfig,
};

struct FakeAdvisor {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeAdvisor {
    async fn spawn(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { base_url, handle }
    }

    fn delegate(&self) -> HttpExecutionDelegate {
        HttpExecutionDelegate::new(&self.base_url).unwrap()
    }
}

impl Drop for FakeAdvisor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn new_job() -> NewJob {
    NewJob::new(
        UserId::new(1),
        "svc1",
        json!({"heap": "2g"}),
        json!({"heap": "4g"}),
    )
}

#[tokio::test]
async fn approved_evaluation_completes_job() {
    let advisor = FakeAdvisor::spawn(Router::new().route(
        "/api/v1/evaluate",
        post(|Json(body): Json<serde_json::Value>| async move {
            assert_eq!(body["proposed_config"], json!({"heap": "4g"}));
            Json(json!({"verdict": "approved"}))
        }),
    ))
    .await;
    let store = InMemoryJobStore::arc();
    let job = store.enqueue(new_job()).await.unwrap();

    let worker = SimulationWorker::new(store.clone(), advisor.delegate(), WorkerConfig::default());
    worker.process_next().await.unwrap();

    let done = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, Some(json!({"verdict": "approved"})));
    assert!(done.error_message.is_none());
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn advisor_error_fails_job() {
    let advisor = FakeAdvisor::spawn(Router::new().route(
        "/api/v1/evaluate",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "internal error") }),
    ))
    .await;
    let store = InMemoryJobStore::arc();
    let job = store.enqueue(new_job()).await.unwrap();

    let worker = SimulationWorker::new(store.clone(), advisor.delegate(), WorkerConfig::default());
    worker.process_next().await.unwrap();

    let done = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    let msg = done.error_message.unwrap();
    assert!(msg.contains("500"), "{msg}");
    assert!(msg.contains("internal error"), "{msg}");
    assert!(done.result.is_none());
}

#[tokio::test]
async fn non_json_advisor_reply_fails_job() {
    let advisor = FakeAdvisor::spawn(Router::new().route(
        "/api/v1/evaluate",
        post(|| async { (StatusCode::OK, "looks fine to me") }),
    ))
    .await;
    let store = InMemoryJobStore::arc();
    let job = store.enqueue(new_job()).await.unwrap();

    let worker = SimulationWorker::new(store.clone(), advisor.delegate(), WorkerConfig::default());
    worker.process_next().await.unwrap();

    let done = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.result.is_none());
    let msg = done.error_message.unwrap();
    assert!(msg.contains("unreadable body"), "{msg}");
}

#[tokio::test]
async fn missing_proposed_config_never_reaches_the_queue() {
    let store = InMemoryJobStore::arc();
    let mut input = new_job();
    input.proposed_config = None;

    let err = store.enqueue(input).await.unwrap_err();
    assert!(matches!(err, JobStoreError::Validation(_)));
    assert_eq!(store.queue_stats().await.unwrap().total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_workers_process_each_job_once() {
    let advisor = FakeAdvisor::spawn(Router::new().route(
        "/api/v1/evaluate",
        post(|| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Json(json!({"verdict": "approved"}))
        }),
    ))
    .await;
    let store = InMemoryJobStore::arc();
    for _ in 0..12 {
        store.enqueue(new_job()).await.unwrap();
    }

    let token = tokio_util::sync::CancellationToken::new();
    let handles: Vec<_> = (0..3)
        .map(|i| {
            SimulationWorker::new(
                store.clone(),
                advisor.delegate(),
                WorkerConfig::default()
                    .with_name(format!("worker-{i}"))
                    .with_poll_interval(Duration::from_millis(5)),
            )
            .spawn(token.clone())
        })
        .collect();

    for _ in 0..400 {
        let processed: u64 = handles.iter().map(|h| h.stats().jobs_processed).sum();
        if processed >= 12 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let processed: u64 = handles.iter().map(|h| h.stats().jobs_processed).sum();
    for handle in handles {
        handle.shutdown().await;
    }

    let stats = store.queue_stats().await.unwrap();
    assert_eq!(processed, 12);
    assert_eq!(stats.completed, 12);
    assert_eq!(stats.total(), 12);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn claims_come_out_in_priority_then_fifo_order(priorities in proptest::collection::vec(0_i64..=100, 1..30)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let store = InMemoryJobStore::new();
            let mut expected = Vec::new();
            for p in &priorities {
                let job = store.enqueue(new_job().with_priority(*p)).await.unwrap();
                expected.push((job.priority, job.id));
            }
            // priority DESC, then enqueue order (ids are monotonic)
            expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next_ready().await.unwrap() {
                claimed.push((job.priority, job.id));
            }
            prop_assert_eq!(claimed, expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
