//! # Idempotence and Boundary Laws
//!
//! Platform-wide properties that must hold regardless of scenario.

#![cfg(test)]

use super::{png_bytes, upload_options, TestPlatform};
use bytes::Bytes;
use pf_01_blob_store::{BlobStore, PutOptions};
use pf_02_metadata_store::MetadataStore;
use pf_03_job_queue::EnqueueOutcome;
use pf_04_ingress::{IngressConfig, PhotoIngress};
use shared_types::{Component, Job, JobOptions, PhotoId, PlatformError, TraceId};

#[tokio::test]
async fn law_enqueue_with_identical_job_id_is_idempotent() {
    let platform = TestPlatform::boot(false).await;
    let options = JobOptions::default();
    let job = Job::for_photo(
        PhotoId::generate(),
        "photos/k",
        "photos",
        "full_processing",
        vec![],
        &options,
        TraceId::generate(),
        chrono::Utc::now(),
    );

    let first = platform
        .queue
        .enqueue(job.clone(), options.clone())
        .await
        .expect("enqueue");
    let second = platform.queue.enqueue(job, options).await.expect("enqueue");

    assert!(matches!(first, EnqueueOutcome::Created(_)));
    assert!(matches!(second, EnqueueOutcome::Duplicate(_)));
    assert_eq!(platform.queue.stats().await.enqueued_total, 1);
}

#[tokio::test]
async fn law_delete_photo_twice_equals_once() {
    let platform = TestPlatform::boot(true).await;
    let receipt = platform.upload_png("c1", None, 16, 16).await;

    assert!(platform
        .ingress
        .delete_photo(receipt.photo_id)
        .await
        .expect("first delete"));
    assert!(!platform
        .ingress
        .delete_photo(receipt.photo_id)
        .await
        .expect("second delete"));
    assert_eq!(platform.blob.object_count().await, 0);
}

#[tokio::test]
async fn law_identical_put_is_a_checksum_verified_noop() {
    let platform = TestPlatform::boot(false).await;
    let bytes = Bytes::from_static(b"identical-bytes");

    let first = platform
        .blob
        .put("photos", "same-key", bytes.clone(), PutOptions::default())
        .await
        .expect("put");
    let second = platform
        .blob
        .put("photos", "same-key", bytes, PutOptions::default())
        .await
        .expect("put again");

    assert_eq!(first.etag, second.etag);
    assert_eq!(platform.blob.object_count().await, 1);
}

#[tokio::test]
async fn law_upload_size_cap_boundary() {
    let platform = TestPlatform::boot(false).await;
    let fixture = png_bytes(16, 16);

    // A dedicated ingress whose cap is exactly the fixture size.
    let exact_cap = PhotoIngress::new(
        platform.blob.clone(),
        platform.meta.clone(),
        platform.queue.clone(),
        platform.bus.clone(),
        IngressConfig {
            max_upload_bytes: fixture.len() as u64,
            ..IngressConfig::default()
        },
    );
    exact_cap.start().await.expect("start");

    // Exactly the cap: accepted.
    exact_cap
        .upload(fixture.clone(), upload_options("c1", None))
        .await
        .expect("at-cap upload accepted");

    // One byte over: rejected with ValidationFailed. The extra trailing
    // byte sits after the PNG end chunk, so only the size check can fail.
    let mut oversized = fixture.to_vec();
    oversized.push(0);
    let err = exact_cap
        .upload(Bytes::from(oversized), upload_options("c1", None))
        .await
        .expect_err("over-cap upload rejected");
    assert!(matches!(err, PlatformError::ValidationFailed(_)));
}

#[tokio::test]
async fn law_event_without_subscribers_is_discarded_silently() {
    let platform = TestPlatform::boot(false).await;
    // No client connections, no worker: the uploaded event finds only the
    // fabric's own subscription, and a platform with the fabric stopped
    // finds none at all. Either way the upload succeeds.
    platform.router.stop().await.expect("stop fabric");

    let receipt = platform.upload_png("c1", None, 16, 16).await;
    assert_eq!(
        platform.meta.get(receipt.photo_id).await.expect("record").id,
        receipt.photo_id
    );
}

#[tokio::test]
async fn law_exhausted_retries_never_return_to_waiting() {
    let platform = TestPlatform::boot(false).await;

    // A job whose blob never materializes: every attempt fails retryably.
    platform.blob.fail_next_gets(u32::MAX);
    let receipt = platform.upload_png("c1", None, 16, 16).await;
    let job_id = shared_types::JobId::for_photo(&receipt.photo_id);

    platform.worker.start().await.expect("worker start");

    // max_attempts is 3; after the third nack the job must be
    // dead-lettered, not re-queued.
    for _ in 0..200 {
        if platform.queue.dlq().find(&job_id).is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    let entry = platform.queue.dlq().find(&job_id).expect("dead-lettered");
    assert_eq!(entry.job.attempts, 3);
    assert_eq!(entry.attempt_errors.len(), 3);

    use pf_03_job_queue::JobState;
    assert_eq!(platform.queue.state_of(&job_id).await, Some(JobState::Failed));
}
