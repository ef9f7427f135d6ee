//! Integration tests for namespace persistence.

use std::sync::Arc;

use reqwest::Url;

use offline_agent::cache::entry::{CachedResponse, NamespaceRole, RequestKey};
use offline_agent::cache::evictor::EvictionManager;
use offline_agent::cache::registry::Registry;
use offline_agent::config::{NamespaceConfig, StorageConfig};
use offline_agent::storage::DiskStore;

fn key(path: &str) -> RequestKey {
    RequestKey::from_url(&Url::parse("https://app.example").unwrap().join(path).unwrap())
}

fn limits() -> NamespaceConfig {
    NamespaceConfig {
        dynamic_max_entries: Some(2),
        ..Default::default()
    }
}

async fn open_registry(dir: &std::path::Path, storage: &StorageConfig) -> Registry {
    let store = DiskStore::new(dir.to_path_buf(), storage).await.unwrap();
    Registry::new("app", "v1", limits()).with_store(Arc::new(store))
}

async fn write_and_restore(storage: StorageConfig) {
    let dir = tempfile::tempdir().unwrap();
    let evictor = EvictionManager::new();

    {
        let registry = open_registry(dir.path(), &storage).await;
        let ns = registry.open_role(NamespaceRole::Dynamic).await;
        for (i, path) in ["/one", "/two", "/three"].iter().enumerate() {
            let response = CachedResponse::new(
                200,
                vec![("content-type".to_string(), "text/html".to_string())],
                format!("page {i}"),
            );
            evictor.put(&ns, key(path), response).await.unwrap();
        }
    }

    let registry = open_registry(dir.path(), &storage).await;
    assert_eq!(registry.restore().await.unwrap(), 2);

    let ns = registry.open_role(NamespaceRole::Dynamic).await;
    assert_eq!(ns.keys().await, vec![key("/two"), key("/three")]);
    let two = ns.get(&key("/two")).await.unwrap();
    assert_eq!(two.body, "page 1");
    assert_eq!(two.content_type(), Some("text/html"));

    // Insertion order survives the restart: the next write evicts "/two".
    let outcome = evictor
        .put(&ns, key("/four"), CachedResponse::new(200, vec![], "page 3"))
        .await
        .unwrap();
    assert_eq!(outcome.evicted, Some(key("/two")));
}

#[tokio::test]
async fn test_restore_compressed() {
    write_and_restore(StorageConfig::default()).await;
}

#[tokio::test]
async fn test_restore_uncompressed() {
    write_and_restore(StorageConfig {
        compression: false,
        ..Default::default()
    })
    .await;
}

#[tokio::test]
async fn test_delete_removes_partition() {
    let dir = tempfile::tempdir().unwrap();
    let storage = StorageConfig::default();
    let registry = open_registry(dir.path(), &storage).await;

    let ns = registry.open_role(NamespaceRole::Static).await;
    EvictionManager::new()
        .put(&ns, key("/"), CachedResponse::new(200, vec![], "home"))
        .await
        .unwrap();
    assert!(dir.path().join("app-static-v1").exists());

    assert!(registry.delete("app-static-v1").await.unwrap());
    assert!(!dir.path().join("app-static-v1").exists());
    assert!(ns.is_sealed());

    // Deleting again is a no-op.
    assert!(!registry.delete("app-static-v1").await.unwrap());

    let restored = open_registry(dir.path(), &storage).await;
    assert_eq!(restored.restore().await.unwrap(), 0);
    assert!(restored.list_names().await.is_empty());
}
