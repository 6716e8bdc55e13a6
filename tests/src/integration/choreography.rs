//! # End-to-End Choreography
//!
//! Upload-to-events scenarios across ingress, queue, workers, pipeline,
//! and the event fabric.

#![cfg(test)]

use super::{collect_until, png_bytes, upload_options, TestPlatform};
use pf_02_metadata_store::MetadataStore;
use pf_03_job_queue::JobState;
use shared_types::{
    BackoffPolicy, Component, EventKind, Job, JobOptions, PhotoId, PhotoStatus, TraceId,
};
use std::collections::HashMap;
use std::time::Duration;

const EVENT_DEADLINE: Duration = Duration::from_secs(15);

#[tokio::test]
async fn s1_happy_path_upload_to_completed() {
    let platform = TestPlatform::boot(true).await;
    let (_conn, mut events) = platform.connect_client("c1", Some("s1"));

    let receipt = platform.upload_png("c1", Some("s1"), 32, 32).await;

    let observed = collect_until(&mut events, EVENT_DEADLINE, |event| {
        event.kind == EventKind::ProcessingCompleted
    })
    .await;

    // photo.uploaded, processing.started, 4 stage completions, completed.
    let kinds: Vec<EventKind> = observed.iter().map(|e| e.kind).collect();
    assert_eq!(kinds[0], EventKind::PhotoUploaded);
    assert_eq!(kinds[1], EventKind::ProcessingStarted);
    assert_eq!(
        kinds
            .iter()
            .filter(|k| **k == EventKind::StageCompleted)
            .count(),
        4
    );
    assert_eq!(*kinds.last().expect("events"), EventKind::ProcessingCompleted);

    // Sequences are the full causal chain 1..=7, strictly ascending.
    let sequences: Vec<u64> = observed.iter().map(|e| e.metadata.sequence).collect();
    assert_eq!(sequences, (1..=7).collect::<Vec<_>>());

    // Final record state.
    let record = platform.meta.get(receipt.photo_id).await.expect("record");
    assert_eq!(record.status, PhotoStatus::Completed);
    assert!(!record.artifacts.is_empty());
    assert!(record.error.is_none());
}

#[tokio::test]
async fn s2_transient_blob_fetch_recovered_across_claims() {
    let platform = TestPlatform::boot(false).await;
    let (_conn, mut events) = platform.connect_client("c1", None);

    // Two whole delivery attempts fail at the blob fetch; the third works.
    platform.blob.fail_next_gets(2);
    let receipt = platform.upload_png("c1", None, 24, 24).await;

    platform
        .worker
        .start()
        .await
        .expect("worker start");

    let observed = collect_until(&mut events, EVENT_DEADLINE, |event| {
        event.kind == EventKind::ProcessingCompleted
    })
    .await;

    // Exactly one completed event despite the retries.
    assert_eq!(
        observed
            .iter()
            .filter(|e| e.kind == EventKind::ProcessingCompleted)
            .count(),
        1
    );

    let record = platform.meta.get(receipt.photo_id).await.expect("record");
    assert_eq!(record.status, PhotoStatus::Completed);

    let job = platform
        .queue
        .job(&shared_types::JobId::for_photo(&receipt.photo_id))
        .await
        .expect("job retained");
    assert_eq!(job.attempts, 3);
}

#[tokio::test]
async fn s3_unrecognizable_bytes_rejected_at_ingress() {
    let platform = TestPlatform::boot(true).await;

    let noise = bytes::Bytes::from_static(&[
        0x8f, 0x3a, 0x11, 0x92, 0x55, 0x01, 0xfe, 0xcc, 0x24, 0x68, 0xac, 0xe0, 0x19, 0x73,
        0x5d, 0xb2,
    ]);
    let err = platform
        .ingress
        .upload(noise, upload_options("c1", None))
        .await
        .expect_err("must reject");
    assert!(matches!(
        err,
        shared_types::PlatformError::ValidationFailed(_)
    ));

    // No record, no blob, no job.
    assert_eq!(platform.blob.object_count().await, 0);
    assert_eq!(platform.queue.stats().await.enqueued_total, 0);
    assert_eq!(
        platform
            .meta
            .count(&pf_02_metadata_store::PhotoFilter::default())
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn s3_corrupt_image_fails_fatally_into_dlq() {
    let platform = TestPlatform::boot(true).await;
    let (_conn, mut events) = platform.connect_client("c1", None);

    // PNG magic satisfies the ingress sniff; the validation stage's real
    // decode then declares the body corrupt.
    let mut corrupt = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    corrupt.extend_from_slice(&[0x00; 256]);
    let receipt = platform
        .ingress
        .upload(bytes::Bytes::from(corrupt), upload_options("c1", None))
        .await
        .expect("ingress accepts the sniffable buffer");

    let observed = collect_until(&mut events, EVENT_DEADLINE, |event| {
        event.kind == EventKind::ProcessingFailed
    })
    .await;
    assert!(observed
        .iter()
        .all(|e| e.kind != EventKind::ProcessingCompleted));

    let record = platform.meta.get(receipt.photo_id).await.expect("record");
    assert_eq!(record.status, PhotoStatus::Failed);
    assert!(record.error.as_deref().expect("error").contains("validation"));

    // Fatal failure: one attempt, straight to the dead-letter stream.
    let job_id = shared_types::JobId::for_photo(&receipt.photo_id);
    let entry = platform.queue.dlq().find(&job_id).expect("dead-lettered");
    assert_eq!(entry.job.attempts, 1);
}

#[tokio::test]
async fn s4_parallel_uploads_preserve_per_photo_order() {
    let platform = TestPlatform::boot(true).await;
    let (_conn, mut events) = platform.connect_client("c1", None);

    let mut uploads = Vec::new();
    for _ in 0..10 {
        let ingress = platform.ingress.clone();
        uploads.push(tokio::spawn(async move {
            ingress
                .upload(png_bytes(16, 16), upload_options("c1", None))
                .await
                .expect("upload")
        }));
    }
    let mut photo_ids = Vec::new();
    for handle in uploads {
        photo_ids.push(handle.await.expect("join").photo_id);
    }

    // Drain until every photo reported terminal completion.
    let mut completed: HashMap<PhotoId, bool> = HashMap::new();
    let observed = collect_until(&mut events, EVENT_DEADLINE, |event| {
        if event.kind == EventKind::ProcessingCompleted {
            if let Some(photo_id) = event.metadata.photo_id {
                completed.insert(photo_id, true);
            }
        }
        completed.len() == 10
    })
    .await;

    // Per photo, sequences are strictly ascending; interleaving across
    // photos is free.
    let mut per_photo: HashMap<PhotoId, Vec<u64>> = HashMap::new();
    for event in &observed {
        if let Some(photo_id) = event.metadata.photo_id {
            per_photo.entry(photo_id).or_default().push(event.metadata.sequence);
        }
    }
    assert_eq!(per_photo.len(), 10);
    for (photo_id, sequences) in per_photo {
        assert!(
            sequences.windows(2).all(|w| w[0] < w[1]),
            "photo {photo_id} saw out-of-order sequences {sequences:?}"
        );
        assert_eq!(sequences[0], 1, "photo {photo_id} missed its uploaded event");
    }
    assert!(photo_ids.len() == 10);
}

#[tokio::test]
async fn s5_stalled_claim_recovered_without_duplicate_completion() {
    let platform = TestPlatform::boot(false).await;
    let (_conn, mut events) = platform.connect_client("c1", None);

    let receipt = platform.upload_png("c1", None, 24, 24).await;
    let job_id = shared_types::JobId::for_photo(&receipt.photo_id);

    // A "worker" claims with a short lease and dies: no ack ever arrives.
    let claimed = platform
        .queue
        .claim(Some(Duration::from_millis(250)))
        .await
        .expect("claim");
    assert_eq!(claimed.job.job_id, job_id);
    assert_eq!(platform.queue.state_of(&job_id).await, Some(JobState::Active));

    // The janitor returns the expired lease to `waiting`.
    for _ in 0..100 {
        if platform.queue.state_of(&job_id).await == Some(JobState::Waiting) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(
        platform.queue.state_of(&job_id).await,
        Some(JobState::Waiting)
    );

    // A healthy worker picks it up and finishes the photo.
    platform.worker.start().await.expect("worker start");
    let observed = collect_until(&mut events, EVENT_DEADLINE, |event| {
        event.kind == EventKind::ProcessingCompleted
    })
    .await;
    assert_eq!(
        observed
            .iter()
            .filter(|e| e.kind == EventKind::ProcessingCompleted)
            .count(),
        1
    );

    let record = platform.meta.get(receipt.photo_id).await.expect("record");
    assert_eq!(record.status, PhotoStatus::Completed);
    let job = platform.queue.job(&job_id).await.expect("job");
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn s6_priority_one_claimed_ahead_of_backlog() {
    let platform = TestPlatform::boot(false).await;

    let mut bulk = Vec::new();
    for _ in 0..20 {
        let options = JobOptions {
            priority: 5,
            backoff: BackoffPolicy::Fixed { base_ms: 50 },
            ..JobOptions::default()
        };
        let job = Job::for_photo(
            PhotoId::generate(),
            "photos/backlog",
            "photos",
            "full_processing",
            vec![],
            &options,
            TraceId::generate(),
            chrono::Utc::now(),
        );
        bulk.push((job, options));
    }
    platform.queue.enqueue_bulk(bulk).await.expect("bulk enqueue");

    let urgent_options = JobOptions {
        priority: 1,
        ..JobOptions::default()
    };
    let urgent = Job::for_photo(
        PhotoId::generate(),
        "photos/urgent",
        "photos",
        "full_processing",
        vec![],
        &urgent_options,
        TraceId::generate(),
        chrono::Utc::now(),
    );
    let urgent_id = urgent.job_id.clone();
    platform
        .queue
        .enqueue(urgent, urgent_options)
        .await
        .expect("enqueue urgent");

    // Despite 20 older priority-5 jobs, the priority-1 job is next.
    let claimed = platform
        .queue
        .try_claim(None)
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(claimed.job.job_id, urgent_id);
}
