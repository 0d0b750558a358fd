//! Integration tests for concurrent collection: partial failure, bounded
//! fan-out, and cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pvault_backup::{Collector, Directory, MemoryDirectory};
use pvault_core::types::{
    BackupMetadata, MemberAttribute, MemberRecord, ResourceConfig, ResourceSummary,
    MEMBERS_FILE, METADATA_FILE, RESOURCE_CONFIG_FILE,
};
use pvault_core::{VaultError, VaultResult};
use regex::Regex;
use tokio_util::sync::CancellationToken;

fn seeded_directory(ids: &[&str]) -> MemoryDirectory {
    let dir = MemoryDirectory::new();
    for id in ids {
        dir.insert_resource(
            id,
            ResourceConfig {
                name: format!("prod-{id}"),
                mfa_configuration: serde_json::json!("OPTIONAL"),
                ..Default::default()
            },
        );
        for n in 0..3 {
            dir.insert_member(
                id,
                MemberRecord {
                    username: format!("{id}-user{n}"),
                    attributes: vec![MemberAttribute::new("email", format!("{id}{n}@example.com"))],
                    groups: vec!["staff".into()],
                },
            );
        }
    }
    dir
}

fn all() -> Regex {
    Regex::new(".*").unwrap()
}

#[tokio::test]
async fn one_failing_resource_does_not_stop_the_others() {
    let dir = seeded_directory(&["A", "B", "C"]);
    dir.fail_list_members("B");

    let (result, archive) = Collector::new(Arc::new(dir))
        .collect_all(&all(), &CancellationToken::new())
        .await
        .expect("collection itself succeeds");

    assert_eq!(result.succeeded, vec!["A", "C"]);
    assert_eq!(result.failed_ids(), vec!["B"]);
    let cause = format!("{:#}", result.failures[0].error);
    assert!(cause.contains("listing members"), "{cause}");

    assert_eq!(archive.resource_ids().collect::<Vec<_>>(), vec!["A", "C"]);
    assert!(archive.files("B").is_none(), "failed unit must stage nothing");
}

#[tokio::test]
async fn all_failing_is_distinct_from_no_match() {
    let dir = seeded_directory(&["A"]);
    dir.fail_describe("A");

    let (result, archive) = Collector::new(Arc::new(dir))
        .collect_all(&all(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.succeeded.is_empty());
    assert_eq!(result.failures.len(), 1);
    assert!(archive.is_empty());
}

#[tokio::test]
async fn staged_metadata_names_the_payload_files() {
    let dir = seeded_directory(&["A"]);
    let (_, archive) = Collector::new(Arc::new(dir))
        .collect_all(&Regex::new("^prod-").unwrap(), &CancellationToken::new())
        .await
        .unwrap();

    let metadata: BackupMetadata =
        serde_json::from_slice(archive.file("A", METADATA_FILE).unwrap().content()).unwrap();
    assert_eq!(metadata.resource_id, "A");
    assert_eq!(metadata.version, "1.0");
    assert_eq!(metadata.backup_files, vec![RESOURCE_CONFIG_FILE, MEMBERS_FILE]);

    let config: serde_json::Value =
        serde_json::from_slice(archive.file("A", RESOURCE_CONFIG_FILE).unwrap().content())
            .unwrap();
    assert_eq!(config["name"], "prod-A");
    assert_eq!(config["mfaConfiguration"], "OPTIONAL");
}

/// Wraps a directory, delays `describe_resource`, and tracks peak concurrency.
struct SlowDirectory {
    inner: MemoryDirectory,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowDirectory {
    fn new(inner: MemoryDirectory, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Directory for SlowDirectory {
    async fn list_resources(&self, pattern: &Regex) -> VaultResult<Vec<ResourceSummary>> {
        self.inner.list_resources(pattern).await
    }

    async fn describe_resource(&self, resource_id: &str) -> VaultResult<ResourceConfig> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.describe_resource(resource_id).await
    }

    async fn list_members(&self, resource_id: &str) -> VaultResult<Vec<MemberRecord>> {
        self.inner.list_members(resource_id).await
    }

    async fn list_member_groups(
        &self,
        resource_id: &str,
        username: &str,
    ) -> VaultResult<Vec<String>> {
        self.inner.list_member_groups(resource_id, username).await
    }

    async fn create_resource(&self, config: &ResourceConfig) -> VaultResult<String> {
        self.inner.create_resource(config).await
    }

    async fn create_member(&self, resource_id: &str, member: &MemberRecord) -> VaultResult<()> {
        self.inner.create_member(resource_id, member).await
    }

    async fn add_member_to_group(
        &self,
        resource_id: &str,
        username: &str,
        group: &str,
    ) -> VaultResult<()> {
        self.inner.add_member_to_group(resource_id, username, group).await
    }
}

#[tokio::test]
async fn fan_out_respects_concurrency_limit() {
    let ids: Vec<String> = (0..10).map(|i| format!("R{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let dir = Arc::new(SlowDirectory::new(
        seeded_directory(&id_refs),
        Duration::from_millis(20),
    ));

    let (result, archive) = Collector::new(dir.clone())
        .with_concurrency(3)
        .collect_all(&all(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.succeeded.len(), 10);
    assert_eq!(archive.len(), 10);
    let peak = dir.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeds limit");
    assert!(peak >= 2, "units should overlap, peak was {peak}");
}

#[tokio::test]
async fn cancellation_discards_partial_archive() {
    let dir = Arc::new(SlowDirectory::new(
        seeded_directory(&["A", "B", "C", "D"]),
        Duration::from_secs(30),
    ));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = Collector::new(dir)
        .with_concurrency(2)
        .collect_all(&all(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, VaultError::Cancelled));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "units must exit promptly on cancellation"
    );
}
