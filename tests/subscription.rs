use docstore::{ChangeKind, DocumentStore, Error, MemoryBackend, Operator, filter};
use futures::StreamExt;
use serde_json::{Value, json};

#[tokio::test]
async fn follows_documents_in_and_out_of_the_result_set() -> anyhow::Result<()> {
    let store = DocumentStore::new(MemoryBackend::new());

    let handle = store
        .query_handle("users")?
        .with(filter("status", Operator::Eq, "active"));
    let mut changes = store.subscribe::<Value>(handle)?;

    store
        .create_with_id("users", "u1", &json!({"status": "active"}))
        .await?;
    store
        .create_with_id("users", "u2", &json!({"status": "idle"}))
        .await?;
    store
        .create_with_id("groups", "g1", &json!({"status": "active"}))
        .await?;
    store.update("users", "u1", &json!({"visits": 1})).await?;
    store.update("users", "u1", &json!({"status": "idle"})).await?;
    store.delete("users", "u1").await?;
    store
        .upsert("users", "u2", &json!({"status": "active"}))
        .await?;
    store.delete("users", "u2").await?;

    let mut seen = Vec::new();
    for _ in 0..5 {
        let change = changes.next().await.expect("change")?;
        seen.push((change.kind, change.document.id.clone(), change.document.data));
    }

    assert_eq!(
        seen,
        [
            (ChangeKind::Added, "u1".to_owned(), json!({"status": "active"})),
            (
                ChangeKind::Modified,
                "u1".to_owned(),
                json!({"status": "active", "visits": 1})
            ),
            (
                ChangeKind::Removed,
                "u1".to_owned(),
                json!({"status": "active", "visits": 1})
            ),
            (ChangeKind::Added, "u2".to_owned(), json!({"status": "active"})),
            (ChangeKind::Removed, "u2".to_owned(), json!({"status": "active"})),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn ends_when_the_store_closes() -> anyhow::Result<()> {
    let store = DocumentStore::new(MemoryBackend::new());
    let mut changes = store.subscribe::<Value>(store.query_handle("users")?)?;

    store
        .create_with_id("users", "u1", &json!({"name": "Alice"}))
        .await?;
    store.clone().close().await?;

    let first = changes.next().await.expect("buffered change")?;
    assert_eq!(first.kind, ChangeKind::Added);
    assert!(changes.next().await.is_none());

    assert!(matches!(
        store.subscribe::<Value>(store.query_handle("users")?),
        Err(Error::Closed)
    ));

    Ok(())
}

#[tokio::test]
async fn reports_lag_then_resumes() -> anyhow::Result<()> {
    let store = DocumentStore::new(MemoryBackend::with_capacity(2));
    let mut changes = store.subscribe::<Value>(store.query_handle("users")?)?;

    for n in 0..5 {
        store
            .create_with_id("users", &format!("u{n}"), &json!({"n": n}))
            .await?;
    }

    assert!(matches!(
        changes.next().await,
        Some(Err(Error::SubscriptionLagged))
    ));

    let next = changes.next().await.expect("retained change")?;
    assert_eq!(next.document.id, "u3");

    Ok(())
}
