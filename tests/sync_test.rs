use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use media_sync::cdn::{CdnUploader, UploadRequest};
use media_sync::model::{PhotoRef, PhotoStatus, ProductDescriptor, RemoteRef, SyncStatus};
use media_sync::sync::SyncOrchestrator;
use media_sync::upload::{MediaUploadService, RetryPolicy};

#[derive(Debug, Clone)]
struct UploadCall {
    file_name: String,
    folder: String,
    tags: Vec<String>,
    sequence_order: String,
    ordinal: String,
}

/// Succeeds with a URL derived from folder and name unless a failure is scripted
/// for that file name.
#[derive(Clone, Default)]
struct RecordingCdn {
    failures: Arc<Mutex<HashMap<String, usize>>>,
    calls: Arc<Mutex<Vec<UploadCall>>>,
}

impl RecordingCdn {
    async fn fail(&self, file_name: &str, times: usize) {
        self.failures.lock().await.insert(file_name.to_string(), times);
    }

    async fn calls(&self) -> Vec<UploadCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CdnUploader for RecordingCdn {
    async fn upload(&self, request: &UploadRequest) -> Result<RemoteRef> {
        self.calls.lock().await.push(UploadCall {
            file_name: request.file_name.clone(),
            folder: request.folder.clone(),
            tags: request.tags.clone(),
            sequence_order: request
                .custom_metadata
                .get("sequence_order")
                .cloned()
                .unwrap_or_default(),
            ordinal: request
                .custom_metadata
                .get("ordinal")
                .cloned()
                .unwrap_or_default(),
        });
        let mut failures = self.failures.lock().await;
        if let Some(left) = failures.get_mut(&request.file_name) {
            if *left > 0 {
                *left -= 1;
                return Err(anyhow!("503 Service Unavailable"));
            }
        }
        let path = format!("{}/{}", request.folder, request.file_name);
        Ok(RemoteRef {
            remote_id: format!("id:{}", path),
            url: format!("https://ik.imagekit.io/test{}", path),
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn no_delay(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
    }
}

fn write_photos(root: &Path, names: &[&str]) {
    for name in names {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"\xFF\xD8\xFFjpeg").unwrap();
    }
}

fn descriptor(id: &str, urls: &[&str]) -> ProductDescriptor {
    ProductDescriptor {
        id: id.into(),
        name: "Victorian Mantel Clock".into(),
        category: "collectibles".into(),
        condition: "good".into(),
        photos: urls
            .iter()
            .map(|u| PhotoRef {
                url: u.to_string(),
                alt: None,
                sequence: None,
                note: None,
            })
            .collect(),
        sync_eligible: Some(true),
        ..Default::default()
    }
}

fn orchestrator(cdn: &RecordingCdn, root: &Path, retry: RetryPolicy) -> SyncOrchestrator {
    let uploader = MediaUploadService::new(
        Arc::new(cdn.clone()),
        root.to_path_buf(),
        "/kollect-it/products".into(),
        retry,
    )
    .unwrap();
    SyncOrchestrator::new(Arc::new(uploader), 3)
}

#[tokio::test]
async fn resync_yields_identical_remote_refs() {
    let td = tempfile::tempdir().unwrap();
    write_photos(td.path(), &["p/a.jpg", "p/b.png", "p/c.jpg"]);
    let cdn = RecordingCdn::default();
    let orch = orchestrator(&cdn, td.path(), no_delay(2));
    let product = descriptor("P-1001", &["p/a.jpg", "/p/b.png", "p/c.jpg"]);

    let first = orch.sync(&product).await;
    let second = orch.sync(&product).await;

    assert_eq!(first.status(), SyncStatus::Success);
    assert_eq!(first.remote_refs(), second.remote_refs());
    // uploads inside one sync run concurrently, so compare each run as a sorted set
    let names: Vec<String> = cdn.calls().await.into_iter().map(|c| c.file_name).collect();
    assert_eq!(names.len(), 6);
    for run in names.chunks(3) {
        let mut run = run.to_vec();
        run.sort();
        assert_eq!(run, vec!["P-1001_01.jpg", "P-1001_02.png", "P-1001_03.jpg"]);
    }
}

#[tokio::test]
async fn one_failing_photo_does_not_stop_the_rest() {
    let td = tempfile::tempdir().unwrap();
    write_photos(td.path(), &["p/1.jpg", "p/2.jpg", "p/4.jpg"]);
    let cdn = RecordingCdn::default();
    let orch = orchestrator(&cdn, td.path(), no_delay(1));
    // p/3.jpg does not exist on disk
    let product = descriptor("P-2", &["p/1.jpg", "p/2.jpg", "p/3.jpg", "p/4.jpg"]);

    let result = orch.sync(&product).await;

    assert_eq!(result.status(), SyncStatus::Partial);
    assert_eq!(result.total, 4);
    assert_eq!(result.uploaded, 3);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].photo, "p/3.jpg");
    assert!(result.errors[0].error.contains("File not found"));
    let failed = &result.outcomes[2];
    assert_eq!(failed.status, PhotoStatus::Failed);
    assert_eq!(failed.attempts, 0, "resolution failures are not retried");
    assert!(result.outcomes[3].remote.is_some());
}

#[tokio::test]
async fn retries_are_bounded() {
    let td = tempfile::tempdir().unwrap();
    write_photos(td.path(), &["p/a.jpg", "p/b.jpg"]);
    let cdn = RecordingCdn::default();
    cdn.fail("P-3_01.jpg", 100).await;
    cdn.fail("P-3_02.jpg", 2).await;
    let orch = orchestrator(&cdn, td.path(), no_delay(2));

    let result = orch.sync(&descriptor("P-3", &["p/a.jpg", "p/b.jpg"])).await;

    assert_eq!(result.outcomes[0].status, PhotoStatus::Failed);
    assert_eq!(result.outcomes[0].attempts, 3);
    assert!(result.outcomes[0].error.as_deref().unwrap().contains("503"));
    assert_eq!(result.outcomes[1].status, PhotoStatus::Success);
    assert_eq!(result.outcomes[1].attempts, 3);

    let calls = cdn.calls().await;
    assert_eq!(calls.iter().filter(|c| c.file_name == "P-3_01.jpg").count(), 3);
    assert_eq!(calls.iter().filter(|c| c.file_name == "P-3_02.jpg").count(), 3);
}

#[tokio::test]
async fn every_photo_failing_is_a_failed_sync() {
    let td = tempfile::tempdir().unwrap();
    let cdn = RecordingCdn::default();
    let orch = orchestrator(&cdn, td.path(), no_delay(0));

    let result = orch.sync(&descriptor("P-4", &["missing.jpg", "../escape.jpg"])).await;

    assert_eq!(result.status(), SyncStatus::Failed);
    assert_eq!(result.uploaded, 0);
    assert!(result.errors[1].error.contains("escapes media root"));
    assert!(cdn.calls().await.is_empty());
}

#[tokio::test]
async fn sequence_positions_drive_ordinals_and_metadata() {
    let td = tempfile::tempdir().unwrap();
    write_photos(td.path(), &["p/back.jpg", "p/front.jpg"]);
    let cdn = RecordingCdn::default();
    let orch = orchestrator(&cdn, td.path(), no_delay(0));
    let mut product = descriptor("P-5", &["p/back.jpg", "p/front.jpg"]);
    product.photos[0].sequence = Some(2);
    product.photos[1].sequence = Some(1);

    let result = orch.sync(&product).await;

    assert_eq!(result.outcomes[0].source, "p/front.jpg");
    assert_eq!(result.outcomes[0].ordinal, 1);
    assert_eq!(result.outcomes[1].source, "p/back.jpg");
    let calls = cdn.calls().await;
    let front = calls.iter().find(|c| c.file_name == "P-5_01.jpg").unwrap();
    assert_eq!(front.sequence_order, "1");
    assert_eq!(front.ordinal, "1");
    let back = calls.iter().find(|c| c.file_name == "P-5_02.jpg").unwrap();
    assert_eq!(back.sequence_order, "2");
    assert_eq!(back.ordinal, "2");
    assert_eq!(front.folder, "/kollect-it/products/P-5");
    assert_eq!(front.tags, vec!["P-5".to_string(), "product".to_string()]);
}
