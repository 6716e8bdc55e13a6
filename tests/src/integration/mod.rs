//! # Integration Harness
//!
//! Wires the full platform over the in-memory reference backends with
//! test-friendly timings, and exposes the fault-injection handles the
//! scenarios lean on.

pub mod choreography;
pub mod laws;

use bytes::Bytes;
use image::{ImageFormat, RgbaImage};
use pf_01_blob_store::InMemoryBlobStore;
use pf_02_metadata_store::InMemoryMetadataStore;
use pf_03_job_queue::{JobQueue, QueueConfig};
use pf_04_ingress::{IngressConfig, PhotoIngress, UploadOptions};
use pf_05_pipeline::{ExecutorConfig, PipelineExecutor, PipelineRegistry, FULL_PIPELINE};
use pf_06_worker::{Worker, WorkerConfig};
use pf_07_event_fabric::{ChannelConnection, ClientConnection, RoomRouter};
use shared_bus::InMemoryEventBus;
use shared_types::{
    BackoffPolicy, ClientId, Component, JobOptions, PhotoEvent, SessionId,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// The fully wired platform with fault-injection access.
pub struct TestPlatform {
    pub blob: Arc<InMemoryBlobStore>,
    pub meta: Arc<InMemoryMetadataStore>,
    pub bus: Arc<InMemoryEventBus>,
    pub queue: JobQueue,
    pub ingress: Arc<PhotoIngress>,
    pub worker: Worker,
    pub router: RoomRouter,
}

impl TestPlatform {
    /// Boot everything with fast timings. `worker_running` controls whether
    /// the worker starts claiming immediately.
    pub async fn boot(worker_running: bool) -> Self {
        let blob = Arc::new(InMemoryBlobStore::new("http://blob.local:9000"));
        let meta = Arc::new(InMemoryMetadataStore::new());
        let bus = Arc::new(InMemoryEventBus::new());

        // Short lease, fast janitor (a third of the lease).
        let queue = JobQueue::new(QueueConfig {
            default_lease_ms: 600,
            max_total_lease_ms: 60_000,
        });
        queue.start().await.expect("queue start");

        let registry = Arc::new(PipelineRegistry::with_defaults());
        let ingress = Arc::new(PhotoIngress::new(
            blob.clone(),
            meta.clone(),
            queue.clone(),
            bus.clone(),
            IngressConfig {
                stages: registry
                    .stage_names(FULL_PIPELINE)
                    .expect("default pipeline"),
                job_options: JobOptions {
                    max_attempts: 3,
                    backoff: BackoffPolicy::Fixed { base_ms: 50 },
                    ..JobOptions::default()
                },
                ..IngressConfig::default()
            },
        ));
        ingress.start().await.expect("ingress start");

        // One blob fetch per delivery attempt so injected fetch failures
        // consume whole queue attempts, the way a worker crash would.
        let executor = Arc::new(PipelineExecutor::new(
            blob.clone(),
            meta.clone(),
            bus.clone(),
            registry,
            ExecutorConfig {
                fetch_attempts: 1,
                fetch_retry_delay: Duration::from_millis(10),
                cancel_grace: Duration::from_millis(200),
                source: "worker-1".to_string(),
                ..ExecutorConfig::default()
            },
        ));

        let worker = Worker::new(
            "worker-1",
            queue.clone(),
            executor,
            WorkerConfig {
                concurrency: 2,
                lease: Duration::from_millis(600),
                shutdown_timeout: Duration::from_secs(5),
            },
        );
        if worker_running {
            worker.start().await.expect("worker start");
        }

        let router = RoomRouter::new(bus.clone());
        router.start().await.expect("router start");

        Self {
            blob,
            meta,
            bus,
            queue,
            ingress,
            worker,
            router,
        }
    }

    /// Register a connection identified as `client` (and optionally a
    /// session), returning its event stream.
    pub fn connect_client(
        &self,
        client: &str,
        session: Option<&str>,
    ) -> (Uuid, mpsc::Receiver<PhotoEvent>) {
        let (conn, rx) = ChannelConnection::pair(256);
        let conn_id = conn.connection_id();
        self.router.connect(Arc::new(conn));
        self.router.identify(
            conn_id,
            ClientId::from(client),
            session.map(SessionId::from),
        );
        (conn_id, rx)
    }

    /// Upload a generated PNG for `client`.
    pub async fn upload_png(
        &self,
        client: &str,
        session: Option<&str>,
        width: u32,
        height: u32,
    ) -> pf_04_ingress::UploadReceipt {
        self.ingress
            .upload(png_bytes(width, height), upload_options(client, session))
            .await
            .expect("upload accepted")
    }
}

/// A real encoded PNG fixture (gradient content, around 2 KiB at 32x32).
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 37 % 256) as u8, (y * 11 % 256) as u8, 200, 255])
    });
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("encode fixture");
    Bytes::from(buffer)
}

/// Standard upload options for a client.
pub fn upload_options(client: &str, session: Option<&str>) -> UploadOptions {
    UploadOptions {
        original_name: "fixture.png".to_string(),
        content_type: None,
        client_id: ClientId::from(client),
        session_id: session.map(SessionId::from),
        user_id: None,
        extra_metadata: Default::default(),
    }
}

/// Collect events from a connection until a predicate-matching event
/// arrives (inclusive), with a global timeout.
pub async fn collect_until(
    rx: &mut mpsc::Receiver<PhotoEvent>,
    deadline: Duration,
    mut done: impl FnMut(&PhotoEvent) -> bool,
) -> Vec<PhotoEvent> {
    let mut events = Vec::new();
    let result = tokio::time::timeout(deadline, async {
        while let Some(event) = rx.recv().await {
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for events; got {} so far",
        events.len()
    );
    events
}
