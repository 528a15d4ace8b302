//! Integration tests for the producer-facing submission API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use scopework::model::{Scope, Session, WorkFn, WorkFuture};
use scopework::{BackgroundWorker, Error, context};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn missing_work_function_is_rejected_and_not_queued() {
    let worker = BackgroundWorker::with_capacity(4).unwrap();

    let err = worker.submit_boxed(None, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(worker.pending(), 0);
}

#[tokio::test]
async fn boxed_work_function_is_queued() {
    let worker = BackgroundWorker::with_capacity(4).unwrap();
    let work: WorkFn = Box::new(|_scope: Scope, _token: CancellationToken| {
        Box::pin(async { Ok::<(), anyhow::Error>(()) }) as WorkFuture
    });

    let id = worker.submit_boxed(Some(work), None).await.unwrap();
    let token = CancellationToken::new();
    let item = worker.receive(&token).await.unwrap();
    assert_eq!(item.id(), id);
}

#[tokio::test]
async fn submit_returns_without_running_the_work() {
    let worker = BackgroundWorker::with_capacity(4).unwrap();
    let ran = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&ran);
    worker
        .submit(
            move |_scope, _token| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(worker.pending(), 1);
}

#[tokio::test]
async fn parent_session_travels_with_the_item() {
    let worker = BackgroundWorker::with_capacity(4).unwrap();
    let session = Session::new();

    worker
        .submit(|_scope, _token| async { Ok(()) }, Some(session.clone()))
        .await
        .unwrap();

    let after_submit = chrono::Utc::now();
    let item = worker.receive(&CancellationToken::new()).await.unwrap();
    assert_eq!(item.parent_session(), Some(&session));
    assert!(item.submitted_at() <= after_submit);
    assert_eq!(item.origin(), None);
}

#[tokio::test]
async fn try_submit_fails_fast_when_full() {
    let worker = BackgroundWorker::with_capacity(1).unwrap();
    worker
        .try_submit(|_scope, _token| async { Ok(()) }, None)
        .unwrap();

    let err = worker
        .try_submit(|_scope, _token| async { Ok(()) }, None)
        .unwrap_err();
    assert!(matches!(err, Error::QueueFull));
}

#[tokio::test]
async fn closed_worker_refuses_submissions() {
    let worker = BackgroundWorker::with_capacity(2).unwrap();
    worker.close();

    let err = worker
        .submit(|_scope, _token| async { Ok(()) }, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Closed));
}

#[tokio::test]
async fn submission_from_inside_a_scope_records_its_origin() {
    let worker = BackgroundWorker::with_capacity(4).unwrap();
    let outer = Scope::new();
    let outer_id = outer.id;

    let producer = worker.clone();
    context::with_ambient(async move {
        let _installed = context::install(outer).unwrap();
        producer
            .submit(|_scope, _token| async { Ok(()) }, None)
            .await
            .unwrap();
    })
    .await;

    // Outside any scope, no origin is recorded.
    worker
        .submit(|_scope, _token| async { Ok(()) }, None)
        .await
        .unwrap();

    let token = CancellationToken::new();
    assert_eq!(worker.receive(&token).await.unwrap().origin(), Some(outer_id));
    assert_eq!(worker.receive(&token).await.unwrap().origin(), None);
}
