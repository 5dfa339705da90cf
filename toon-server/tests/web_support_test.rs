//! Tests for batch bookkeeping and error responses.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use toon_server::errors::WebError;
use toon_server::jobs::BatchJobs;

#[test]
fn test_one_batch_per_collection() {
    let jobs = BatchJobs::new();

    let guard = jobs.try_start("20240101_000000").unwrap();
    assert!(jobs.is_running("20240101_000000"));
    assert!(jobs.try_start("20240101_000000").is_none());
    // another collection is independent
    let other = jobs.try_start("20240102_000000").unwrap();

    drop(guard);
    assert!(!jobs.is_running("20240101_000000"));
    assert!(jobs.any_running());
    assert!(jobs.try_start("20240101_000000").is_some());

    drop(other);
    assert!(!jobs.any_running());
}

#[tokio::test]
async fn test_slot_is_released_when_the_task_ends() {
    let jobs = BatchJobs::new();
    let guard = jobs.try_start("1").unwrap();

    tokio::spawn(async move {
        let _guard = guard;
    })
    .await
    .unwrap();

    assert!(!jobs.is_running("1"));
}

#[test]
fn test_error_statuses() {
    assert_eq!(
        WebError::NotFound.into_response().status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        WebError::BadRequest("scene 19".to_string())
            .into_response()
            .status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        WebError::Internal(anyhow::anyhow!("disk full"))
            .into_response()
            .status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
