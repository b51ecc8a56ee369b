use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinSet;
use tokio::time::Instant;

use courier_core::classify::Prediction;
use courier_core::{
    CourierError, Handler, InMemoryBackend, Outcome, ProcessError, QueueTransport, ReaperLoop,
    ResultRecord, ResultStore, Submitter, Typed, WaiterConfig, WorkerConfig, WorkerPool,
};

/// Stands in for the model: labels by file stem, with a few scripted cases.
struct StemLabeler;

#[async_trait]
impl Handler for StemLabeler {
    type Input = String;
    type Output = Prediction;

    async fn handle(&self, image_name: String) -> Result<Prediction, ProcessError> {
        match image_name.as_str() {
            "cat.jpg" => Ok(Prediction::new("tabby_cat", 0.92)),
            "broken.jpg" => Err(ProcessError::failed("cannot decode image")),
            "panic.jpg" => panic!("model crashed"),
            other => {
                let stem = other.rsplit_once('.').map_or(other, |(stem, _)| stem);
                Ok(Prediction::new(stem, 0.5))
            }
        }
    }
}

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        pop_wait: Duration::from_millis(20),
        ..WorkerConfig::default()
    }
}

fn start_pool(backend: &InMemoryBackend, workers: usize) -> WorkerPool {
    WorkerPool::spawn(
        workers,
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        Arc::new(Typed::new(StemLabeler)),
        fast_worker_config(),
    )
}

fn submitter(backend: &InMemoryBackend) -> Submitter {
    Submitter::new(Arc::new(backend.clone()), Arc::new(backend.clone())).with_config(WaiterConfig {
        poll_interval: Duration::from_millis(5),
        ..WaiterConfig::default()
    })
}

#[tokio::test]
async fn cat_scenario_returns_prediction_and_consumes_record() {
    let backend = InMemoryBackend::new();
    let pool = start_pool(&backend, 1);
    let sub = submitter(&backend);

    let job_id = sub.submit(json!("cat.jpg")).await.unwrap();
    let prediction: Prediction = sub
        .wait_for(job_id, Duration::from_secs(5))
        .await
        .unwrap()
        .into_typed(job_id)
        .unwrap();

    assert_eq!(prediction, Prediction::new("tabby_cat", 0.92));
    assert_eq!(prediction.score, 0.92);
    assert!(backend.try_fetch(&job_id).await.unwrap().is_none());

    pool.shutdown_and_join().await;
}

#[tokio::test]
async fn every_submitter_gets_its_own_outcome() {
    let backend = InMemoryBackend::new();
    let pool = start_pool(&backend, 3);
    let sub = Arc::new(submitter(&backend));

    let mut set = JoinSet::new();
    for i in 0..20 {
        let sub = Arc::clone(&sub);
        set.spawn(async move {
            let name = format!("img-{i}.png");
            let got: Prediction = sub
                .submit_and_wait_as(json!(name), Duration::from_secs(5))
                .await
                .unwrap();
            (i, got)
        });
    }

    while let Some(joined) = set.join_next().await {
        let (i, got) = joined.unwrap();
        assert_eq!(got.prediction, format!("img-{i}"));
    }
    assert_eq!(backend.len().await.unwrap(), 0);

    pool.shutdown_and_join().await;
}

#[tokio::test]
async fn two_submitters_sharing_one_worker_stay_isolated() {
    let backend = InMemoryBackend::new();
    let pool = start_pool(&backend, 1);
    let alice = submitter(&backend);
    let bob = submitter(&backend);

    let (a, b) = tokio::join!(
        alice.submit_and_wait_as::<Prediction>(json!("alice.jpg"), Duration::from_secs(5)),
        bob.submit_and_wait_as::<Prediction>(json!("bob.jpg"), Duration::from_secs(5)),
    );

    assert_eq!(a.unwrap().prediction, "alice");
    assert_eq!(b.unwrap().prediction, "bob");

    pool.shutdown_and_join().await;
}

#[tokio::test(start_paused = true)]
async fn times_out_when_no_worker_runs() {
    let backend = InMemoryBackend::new();
    let sub = submitter(&backend);
    let start = Instant::now();

    let err = sub
        .submit_and_wait(json!("cat.jpg"), Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(matches!(err, CourierError::Timeout { .. }));
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn zero_timeout_returns_immediately_even_with_workers() {
    let backend = InMemoryBackend::new();
    let pool = start_pool(&backend, 2);
    let sub = submitter(&backend);
    let start = std::time::Instant::now();

    let err = sub
        .submit_and_wait(json!("cat.jpg"), Duration::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, CourierError::Timeout { .. }));
    assert!(start.elapsed() < Duration::from_millis(500));

    pool.shutdown_and_join().await;
}

#[tokio::test]
async fn worker_survives_failures_and_keeps_serving() {
    let backend = InMemoryBackend::new();
    let pool = start_pool(&backend, 1);
    let sub = submitter(&backend);

    let failed = sub
        .submit_and_wait(json!("broken.jpg"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(failed, Outcome::failed("cannot decode image"));

    let panicked = sub
        .submit_and_wait(json!("panic.jpg"), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(!panicked.is_success());

    let ok: Prediction = sub
        .submit_and_wait_as(json!("dog.jpg"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ok.prediction, "dog");

    pool.shutdown_and_join().await;
}

#[tokio::test]
async fn failed_outcome_surfaces_as_processing_failure() {
    let backend = InMemoryBackend::new();
    let pool = start_pool(&backend, 1);
    let sub = submitter(&backend);

    let err = sub
        .submit_and_wait_as::<Prediction>(json!("broken.jpg"), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CourierError::WorkerProcessingFailure { ref reason, .. } if reason == "cannot decode image"
    ));

    pool.shutdown_and_join().await;
}

#[tokio::test]
async fn payload_of_wrong_shape_becomes_failed_outcome() {
    let backend = InMemoryBackend::new();
    let pool = start_pool(&backend, 1);
    let sub = submitter(&backend);

    let outcome = sub
        .submit_and_wait(json!({"image_name": 42}), Duration::from_secs(5))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Failed { ref reason } if reason.starts_with("invalid payload")));

    pool.shutdown_and_join().await;
}

#[tokio::test]
async fn reaper_redelivers_a_claim_abandoned_by_a_dead_worker() {
    let backend = InMemoryBackend::new();
    let sub = submitter(&backend);

    let job_id = sub.submit(json!("lost.jpg")).await.unwrap();
    // a worker claims the job and dies before publishing
    let abandoned = backend.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(abandoned.job_id(), job_id);
    drop(abandoned);

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let reaper = ReaperLoop::new(Arc::new(backend.clone()), Duration::from_millis(100))
        .with_interval(Duration::from_millis(20));
    let reaper = tokio::spawn(reaper.run(stop_rx));
    let pool = start_pool(&backend, 1);

    let got: Prediction = sub
        .wait_for(job_id, Duration::from_secs(5))
        .await
        .unwrap()
        .into_typed(job_id)
        .unwrap();
    assert_eq!(got.prediction, "lost");

    stop_tx.send(true).unwrap();
    reaper.await.unwrap();
    pool.shutdown_and_join().await;
}

#[tokio::test]
async fn redelivery_after_publish_keeps_the_first_result() {
    let backend = InMemoryBackend::new();
    let sub = submitter(&backend);

    let job_id = sub.submit(json!("cat.jpg")).await.unwrap();
    // first delivery published, then the worker died before ack
    let _claim = backend.dequeue(Duration::ZERO).await.unwrap().unwrap();
    backend
        .publish(&ResultRecord::new(job_id, Outcome::success(json!("first"))))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let reaper = ReaperLoop::new(Arc::new(backend.clone()), Duration::from_millis(50));
    assert_eq!(reaper.run_once().await.unwrap(), 1);

    let pool = start_pool(&backend, 1);
    // wait until the second delivery has been processed and acked
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = backend.stats().await.unwrap();
        if stats.queued == 0 && stats.claimed == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "re-delivery never processed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outcome = sub.wait_for(job_id, Duration::from_secs(1)).await.unwrap();
    assert_eq!(outcome, Outcome::success(json!("first")));

    pool.shutdown_and_join().await;
}

#[tokio::test(start_paused = true)]
async fn orphaned_results_expire() {
    let backend = InMemoryBackend::new().with_result_ttl(Duration::from_secs(60));
    let sub = submitter(&backend);

    let err = sub
        .submit_and_wait(json!("late.jpg"), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, CourierError::Timeout { .. }));

    // a worker shows up after the submitter gave up
    let pool = start_pool(&backend, 1);
    while backend.len().await.unwrap() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pool.shutdown_and_join().await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(backend.len().await.unwrap(), 0);
}
