//! End-to-end tests for the vault facade
//!
//! These tests drive the public surface: fire-and-forget appends through
//! the ingestion task, compressed retrieval, artifact export, explicit
//! rotation and background eviction.

use std::sync::Once;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use logkeep::{
    CapacityConfig, ExportConfig, LogVault, StoreConfig, VaultConfig, decompress,
};

static TRACING: Once = Once::new();

/// Install the subscriber once for the whole test binary; set RUST_LOG
/// to see worker logs while debugging a failure.
fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

fn vault_config(dir: &TempDir) -> VaultConfig {
    init_tracing();
    VaultConfig {
        store: StoreConfig::default().with_dir(dir.path().join("db")),
        capacity: CapacityConfig::default(),
        export: ExportConfig::default()
            .with_dir(dir.path().join("export"))
            .with_file_name("artifact.zz"),
    }
}

/// Poll until `predicate` holds or the timeout elapses
async fn wait_for<F: FnMut() -> bool>(mut predicate: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_append_is_asynchronous_and_persists() {
    let temp_dir = TempDir::new().unwrap();
    let vault = LogVault::open(vault_config(&temp_dir)).unwrap();

    for line in ["a", "b", "c", "d", "e"] {
        vault.append(line);
    }

    let store = vault.store().clone();
    let landed = wait_for(
        || store.count().map(|c| c == 5).unwrap_or(false),
        Duration::from_secs(5),
    )
    .await;
    assert!(landed, "appends did not reach the store in time");

    let all = store.find_all().unwrap();
    let keys: Vec<u64> = all.iter().map(|r| r.key).collect();
    let lines: Vec<&str> = all.iter().map(|r| r.line.as_str()).collect();
    assert_eq!(keys, vec![1, 2, 3, 4, 5]);
    assert_eq!(lines, vec!["a", "b", "c", "d", "e"]);

    vault.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retrieve_roundtrip_across_chunk_boundaries() {
    // Record counts crossing zero, one and two chunk boundaries at the
    // default chunk size of 1000.
    for count in [0usize, 1, 1000, 2500] {
        let temp_dir = TempDir::new().unwrap();
        let vault = LogVault::open(vault_config(&temp_dir)).unwrap();

        let store = vault.store().clone();
        store.open().unwrap();
        let mut lines = Vec::with_capacity(count);
        for i in 0..count {
            let line = format!("record number {i}");
            store.create(&line).unwrap();
            lines.push(line);
        }

        let compressed = vault.retrieve_all_compressed().await.unwrap();
        let text = String::from_utf8(decompress(&compressed).unwrap()).unwrap();
        assert_eq!(text, lines.join("\n"), "mismatch at count {count}");

        vault.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_export_materializes_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let vault = LogVault::open(vault_config(&temp_dir)).unwrap();

    let store = vault.store().clone();
    store.open().unwrap();
    store.create("first").unwrap();
    store.create("second").unwrap();

    let artifact = vault.export_to_file().await.unwrap();
    assert!(artifact.path.ends_with("artifact.zz"));

    let on_disk = std::fs::read(&artifact.path).unwrap();
    assert_eq!(on_disk.len() as u64, artifact.size_bytes);
    assert_eq!(decompress(&on_disk).unwrap(), b"first\nsecond");

    let path = artifact.path.clone();
    artifact.remove().await.unwrap();
    assert!(!path.exists());

    vault.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_top_n_bypasses_monitor() {
    let temp_dir = TempDir::new().unwrap();
    let vault = LogVault::open(vault_config(&temp_dir)).unwrap();

    let store = vault.store().clone();
    store.open().unwrap();
    for i in 0..10 {
        store.create(&format!("{i}")).unwrap();
    }

    let deleted = vault.delete_top_n(3).unwrap();
    assert_eq!(deleted, 3);

    let keys: Vec<u64> = store.find_all().unwrap().iter().map(|r| r.key).collect();
    assert_eq!(keys, vec![4, 5, 6, 7, 8, 9, 10]);

    vault.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_monitor_evicts_oldest_over_capacity() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = vault_config(&temp_dir);
    config.capacity = CapacityConfig::default()
        .with_max_count(50)
        .with_rolling_delete_count(10)
        .with_scan_interval(Duration::from_millis(50));

    // Fill past the ceiling before the monitor starts scanning.
    {
        let store = logkeep::LogStore::new();
        store.configure(config.store.clone()).unwrap();
        store.open().unwrap();
        for i in 0..60 {
            store.create(&format!("{i}")).unwrap();
        }
    }

    let vault = LogVault::open(config).unwrap();
    let store = vault.store().clone();

    // floor(min(60 * 0.2, 10)) = 10 oldest records go; 50 is at the
    // ceiling, not over it, so the store is stable afterwards.
    let evicted = wait_for(
        || store.count().map(|c| c == 50).unwrap_or(false),
        Duration::from_secs(5),
    )
    .await;
    assert!(evicted, "monitor did not evict in time");

    let all = store.find_all().unwrap();
    assert_eq!(all[0].key, 11);
    assert_eq!(all.last().unwrap().key, 60);

    // The monitor published a report for the post-eviction scan.
    let mut reports = vault.capacity_reports();
    let report = wait_for(
        || {
            let current = *reports.borrow_and_update();
            current.map(|r| r.count == 50).unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(report, "no capacity report for the settled store");

    vault.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capacity_reports_published_under_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = vault_config(&temp_dir);
    config.capacity = config
        .capacity
        .with_scan_interval(Duration::from_millis(50));

    let vault = LogVault::open(config).unwrap();
    vault.append("one line");

    let mut reports = vault.capacity_reports();
    let seen = wait_for(
        || {
            let current = *reports.borrow_and_update();
            current
                .map(|r| r.count == 1 && r.size_in_mb > 0.0)
                .unwrap_or(false)
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(seen, "monitor never reported the appended record");

    vault.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_stops_workers() {
    let temp_dir = TempDir::new().unwrap();
    let vault = LogVault::open(vault_config(&temp_dir)).unwrap();
    vault.append("going down");

    // Must return rather than hang on the monitor loop.
    tokio::time::timeout(Duration::from_secs(5), vault.shutdown())
        .await
        .expect("shutdown timed out");
}
