mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use doogie_client::services::chunk_resolver::{ChunkResolution, ChunkResolver};

use common::client_with_token;

fn chunk_info(chunk_id: &str, document_id: &str, title: &str) -> serde_json::Value {
    json!({
        "chunk_id": chunk_id,
        "document_id": document_id,
        "document_title": title,
    })
}

#[tokio::test]
async fn test_resolve_dedups_and_returns_stable_order() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);
    let resolver = ChunkResolver::new(client);

    Mock::given(method("GET"))
        .and(path("/api/v1/rag/chunks/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chunk_info("c1", "d1", "Manual")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/rag/chunks/c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chunk_info("c2", "d1", "Manual")))
        .expect(1)
        .mount(&server)
        .await;
    // c3 was removed by a reprocessing run.
    Mock::given(method("GET"))
        .and(path("/api/v1/rag/chunks/c3"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let ids = vec![
        "c1".to_string(),
        "c2".to_string(),
        "c2".to_string(),
        "c3".to_string(),
    ];
    let results = resolver.resolve(&ids).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "c1");
    assert_eq!(results[1].0, "c2");
    assert_eq!(
        results[1].1,
        ChunkResolution::Resolved {
            document_id: "d1".to_string(),
            document_title: "Manual".to_string(),
        }
    );
    assert_eq!(results[2], ("c3".to_string(), ChunkResolution::Failed));
}

#[tokio::test]
async fn test_concurrent_resolves_coalesce_onto_one_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);
    let resolver = Arc::new(ChunkResolver::new(client));

    Mock::given(method("GET"))
        .and(path("/api/v1/rag/chunks/x"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(chunk_info("x", "d9", "Data sheet")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(async move {
            resolver.resolve(&["x".to_string()]).await
        }));
    }
    for handle in handles {
        let results = handle.await.unwrap();
        assert_eq!(
            results,
            vec![(
                "x".to_string(),
                ChunkResolution::Resolved {
                    document_id: "d9".to_string(),
                    document_title: "Data sheet".to_string(),
                }
            )]
        );
    }

    // Terminal entries are served from the cache from now on.
    assert_eq!(
        resolver.lookup("x"),
        Some(ChunkResolution::Resolved {
            document_id: "d9".to_string(),
            document_title: "Data sheet".to_string(),
        })
    );
}

#[tokio::test]
async fn test_aborted_fetch_releases_the_entry_for_retry() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);
    let resolver = Arc::new(ChunkResolver::new(client));

    // One request from the aborted fetch, one from the retry.
    Mock::given(method("GET"))
        .and(path("/api/v1/rag/chunks/y"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(400))
                .set_body_json(chunk_info("y", "d1", "Manual")),
        )
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve(&["y".to_string()]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A waiter attached to the in-flight entry must not hang when the
    // fetcher is torn down; it reports the id as unresolved.
    let waiter = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve(&["y".to_string()]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    fetcher.abort();
    assert!(fetcher.await.unwrap_err().is_cancelled());
    let waited = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter hung after fetcher abort")
        .unwrap();
    assert_eq!(waited, vec![("y".to_string(), ChunkResolution::Failed)]);

    // The entry was released, not poisoned: a retry fetches and resolves.
    let retried = tokio::time::timeout(Duration::from_secs(2), resolver.resolve(&["y".to_string()]))
        .await
        .expect("entry still loading after fetcher abort");
    assert_eq!(
        retried,
        vec![(
            "y".to_string(),
            ChunkResolution::Resolved {
                document_id: "d1".to_string(),
                document_title: "Manual".to_string(),
            }
        )]
    );
}

#[tokio::test]
async fn test_failed_resolution_is_cached_and_not_retried() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client_with_token(&server.uri(), &dir, 3600);
    let resolver = ChunkResolver::new(client);

    Mock::given(method("GET"))
        .and(path("/api/v1/rag/chunks/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let first = resolver.resolve(&["gone".to_string()]).await;
    let second = resolver.resolve(&["gone".to_string()]).await;
    assert_eq!(first, vec![("gone".to_string(), ChunkResolution::Failed)]);
    assert_eq!(second, first);
}
