use chronik_store::{
    Event, EventStore, MatchValue, MetadataMatcher, Operator, StoreError, Stream, StreamName,
};
use serde_json::json;

async fn reset_stream<S: EventStore + ?Sized>(store: &S, name: &StreamName) {
    let _ = store.delete(name).await;
}

fn aggregate_event(name: &str, id: &str, version: i64) -> Event {
    Event::new(name)
        .payload(json!({"name": ["John", "Jane"]}))
        .unwrap()
        .with_added_metadata("_aggregate_type", "user")
        .with_added_metadata("_aggregate_id", id)
        .with_added_metadata("_aggregate_version", version)
}

pub async fn test_round_trip<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    let first = aggregate_event("user-created", "a1", 1)
        .with_added_metadata("key", "value");
    let second = aggregate_event("user-renamed", "a1", 2);

    store
        .create(Stream::new(name.clone()).events(vec![first.clone(), second.clone()]))
        .await?;

    let mut iterator = store.load(&name, None, None, None).await?;

    let loaded = iterator.next().await?.unwrap();
    assert_eq!(loaded.event_id, first.event_id);
    assert_eq!(loaded.payload, first.payload);
    assert_eq!(loaded.metadata.get("key"), Some(&json!("value")));
    // position injected on read, not present on the input event
    assert_eq!(loaded.position(), Some(1));

    let loaded = iterator.next().await?.unwrap();
    assert_eq!(loaded.event_id, second.event_id);
    assert_eq!(loaded.position(), Some(2));

    assert!(iterator.next().await?.is_none());

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_load_bounds<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    let events = (1..=5)
        .map(|version| aggregate_event("user-changed", "a1", version))
        .collect();

    store.create(Stream::new(name.clone()).events(events)).await?;

    // forward from 3
    let mut iterator = store.load(&name, Some(3), None, None).await?;
    let mut positions = Vec::new();
    while let Some(event) = iterator.next().await? {
        positions.push(event.position().unwrap());
    }
    assert_eq!(positions, vec![3, 4, 5]);

    // reverse without from defaults to the end
    let mut iterator = store.load_reverse(&name, None, Some(2), None).await?;
    let mut positions = Vec::new();
    while let Some(event) = iterator.next().await? {
        positions.push(event.position().unwrap());
    }
    assert_eq!(positions, vec![5, 4]);

    // count = 0 yields an empty iterator
    let mut iterator = store.load(&name, None, Some(0), None).await?;
    assert!(iterator.next().await?.is_none());

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_duplicate_create<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    store.create(Stream::new(name.clone())).await?;

    let err = store.create(Stream::new(name.clone())).await.unwrap_err();
    assert!(matches!(err, StoreError::StreamExistsAlready(_)));

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_version_collision<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    let first = aggregate_event("user-created", "a", 1);
    store
        .create(Stream::new(name.clone()).events(vec![first.clone()]))
        .await?;

    let err = store
        .append_to(&name, vec![aggregate_event("user-created", "a", 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Concurrency(_)));

    // nothing from the failed batch is persisted
    let mut iterator = store.load(&name, None, None, None).await?;
    let only = iterator.next().await?.unwrap();
    assert_eq!(only.event_id, first.event_id);
    assert!(iterator.next().await?.is_none());

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_partial_batch_rolls_back<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    store
        .create(Stream::new(name.clone()).events(vec![aggregate_event("user-created", "a", 1)]))
        .await?;

    // second event of the batch collides, the whole batch must vanish
    let err = store
        .append_to(
            &name,
            vec![
                aggregate_event("user-renamed", "a", 2),
                aggregate_event("user-renamed", "a", 1),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Concurrency(_)));

    let count = store.load(&name, None, None, None).await?.count().await?;
    assert_eq!(count, 1);

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_append_empty_is_noop<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    store.create(Stream::new(name.clone())).await?;
    store.append_to(&name, Vec::new()).await?;

    let count = store.load(&name, None, None, None).await?.count().await?;
    assert_eq!(count, 0);

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_delete_stream<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    store
        .create(Stream::new(name.clone()).events(vec![aggregate_event("user-created", "a", 1)]))
        .await?;
    assert!(store.has_stream(&name).await?);

    store.delete(&name).await?;
    assert!(!store.has_stream(&name).await?);

    let err = store.delete(&name).await.unwrap_err();
    assert!(matches!(err, StoreError::StreamNotFound(_)));

    let err = store.load(&name, None, None, None).await.unwrap_err();
    assert!(matches!(err, StoreError::StreamNotFound(_)));

    Ok(())
}

pub async fn test_stream_metadata<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    let mut metadata = serde_json::Map::new();
    metadata.insert("owner".to_owned(), json!("billing"));

    store
        .create(Stream::new(name.clone()).metadata(metadata.clone()))
        .await?;

    assert_eq!(store.fetch_stream_metadata(&name).await?, metadata);

    metadata.insert("owner".to_owned(), json!("shipping"));
    store
        .update_stream_metadata(&name, metadata.clone())
        .await?;
    assert_eq!(store.fetch_stream_metadata(&name).await?, metadata);

    let missing = StreamName::new(format!("{stream}-missing"));
    assert!(matches!(
        store.fetch_stream_metadata(&missing).await.unwrap_err(),
        StoreError::StreamNotFound(_)
    ));
    assert!(matches!(
        store
            .update_stream_metadata(&missing, metadata)
            .await
            .unwrap_err(),
        StoreError::StreamNotFound(_)
    ));

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_metadata_matcher<S: EventStore + ?Sized>(
    store: &S,
    stream: &str,
) -> anyhow::Result<()> {
    let name = StreamName::new(stream);
    reset_stream(store, &name).await;

    let events = vec![
        aggregate_event("user-created", "a1", 1),
        aggregate_event("user-renamed", "a1", 2),
        aggregate_event("user-deleted", "a1", 3),
    ];

    store.create(Stream::new(name.clone()).events(events)).await?;

    let matcher = MetadataMatcher::new()
        .with_metadata_match("_aggregate_version", Operator::GreaterThanEquals, 2i64)?;
    let mut iterator = store.load(&name, None, None, Some(&matcher)).await?;
    let mut versions = Vec::new();
    while let Some(event) = iterator.next().await? {
        versions.push(event.aggregate_version().unwrap());
    }
    assert_eq!(versions, vec![2, 3]);

    let matcher = MetadataMatcher::new().with_message_property_match(
        "event_name",
        Operator::In,
        MatchValue::Many(vec!["user-created".into(), "user-deleted".into()]),
    )?;
    let mut iterator = store.load(&name, None, None, Some(&matcher)).await?;
    let mut names = Vec::new();
    while let Some(event) = iterator.next().await? {
        names.push(event.event_name);
    }
    assert_eq!(names, vec!["user-created", "user-deleted"]);

    // unknown metadata fields match nothing but are not an error
    let matcher =
        MetadataMatcher::new().with_metadata_match("nonexistent", Operator::Equals, "x")?;
    let mut iterator = store.load(&name, None, None, Some(&matcher)).await?;
    assert!(iterator.next().await?.is_none());

    store.delete(&name).await?;

    Ok(())
}

pub async fn test_enumeration<S: EventStore + ?Sized>(
    store: &S,
    prefix: &str,
) -> anyhow::Result<()> {
    let streams: Vec<StreamName> = ["one", "two", "three"]
        .iter()
        .map(|suffix| StreamName::new(format!("{prefix}-{suffix}")))
        .collect();

    for name in &streams {
        reset_stream(store, name).await;
        store.create(Stream::new(name.clone())).await?;
    }

    let names = store
        .fetch_stream_names_regex(&format!("^{prefix}-"), None, 20, 0)
        .await?;
    assert_eq!(names.len(), 3);

    let exact = store
        .fetch_stream_names(Some(&format!("{prefix}-one")), None, 20, 0)
        .await?;
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].as_str(), format!("{prefix}-one"));

    let categories = store.fetch_category_names(Some(prefix), 20, 0).await?;
    assert_eq!(categories, vec![prefix.to_owned()]);

    let err = store
        .fetch_stream_names_regex("(", None, 20, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    for name in &streams {
        store.delete(name).await?;
    }

    Ok(())
}
