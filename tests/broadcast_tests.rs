mod common;

use async_trait::async_trait;
use common::{get, registry, runner};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use subjectdb::core::{DbError, Result, Value};
use subjectdb::{
    DefaultDriver, EntityEvent, EntityRef, EntitySubscriber, ExecutorConfig, MemoryQueryRunner,
    PropertyPath, Subject, SubjectOperationExecutor, SubscriberBroadcaster,
};

/// Stamps posts before they are written and records what it saw afterwards.
#[derive(Default)]
struct PostAudit {
    seen: Mutex<Vec<String>>,
    inserted_ids: Mutex<Vec<Option<Value>>>,
}

impl PostAudit {
    fn record(&self, hook: &str) -> Result<()> {
        self.seen.lock()?.push(hook.to_string());
        Ok(())
    }
}

#[async_trait]
impl EntitySubscriber for PostAudit {
    fn listen_to(&self) -> Option<&str> {
        Some("Post")
    }

    async fn before_insert(&self, event: &EntityEvent) -> Result<()> {
        self.record("before_insert")?;
        if let Some(entity) = &event.entity {
            entity.set_value(&PropertyPath::new("text"), Value::from("stamped"));
        }
        Ok(())
    }

    async fn after_insert(&self, event: &EntityEvent) -> Result<()> {
        self.record("after_insert")?;
        let id = event
            .entity
            .as_ref()
            .and_then(|entity| entity.value(&PropertyPath::new("id")));
        self.inserted_ids.lock()?.push(id);
        Ok(())
    }

    async fn before_update(&self, event: &EntityEvent) -> Result<()> {
        self.record("before_update")?;
        if let Some(entity) = &event.entity {
            entity.set_value(&PropertyPath::new("text"), Value::from("edited"));
        }
        Ok(())
    }

    async fn after_update(&self, _event: &EntityEvent) -> Result<()> {
        self.record("after_update")
    }
}

/// Rejects every removal.
struct Guard;

#[async_trait]
impl EntitySubscriber for Guard {
    async fn before_remove(&self, event: &EntityEvent) -> Result<()> {
        Err(DbError::ExecutionError(format!(
            "{} may not be removed",
            event.target
        )))
    }
}

fn executor_with(
    runner: &Arc<MemoryQueryRunner>,
    broadcaster: SubscriberBroadcaster,
) -> SubjectOperationExecutor {
    SubjectOperationExecutor::new(
        runner.clone(),
        Arc::new(broadcaster),
        Arc::new(DefaultDriver),
    )
}

#[tokio::test]
async fn test_before_insert_changes_reach_the_row() -> Result<()> {
    let registry = registry();
    let runner = runner();
    let audit = Arc::new(PostAudit::default());
    let executor = executor_with(&runner, SubscriberBroadcaster::new().subscribe(audit.clone()));

    let post = EntityRef::new("Post").with("title", "Hello");
    let category = EntityRef::new("Category").with("name", "News");
    executor
        .execute(vec![
            Subject::insert(registry.get("Post")?, post.clone()),
            Subject::insert(registry.get("Category")?, category),
        ])
        .await?;

    assert_eq!(runner.rows("post")?[0].get("text"), Some(&Value::from("stamped")));
    assert_eq!(*audit.seen.lock()?, vec!["before_insert", "after_insert"]);
    assert_eq!(*audit.inserted_ids.lock()?, vec![get(&post, "id")]);
    assert!(get(&post, "id").is_some());
    Ok(())
}

#[tokio::test]
async fn test_before_update_changes_are_diffed() -> Result<()> {
    let registry = registry();
    let runner = runner();
    let audit = Arc::new(PostAudit::default());
    let executor = executor_with(&runner, SubscriberBroadcaster::new().subscribe(audit.clone()));

    let post = EntityRef::new("Post")
        .with("id", 1_i64)
        .with("title", "Hello")
        .with("version", 1_i64);
    executor
        .execute(vec![Subject::update(registry.get("Post")?, post.clone(), post.snapshot())])
        .await?;

    let updates = common::statements_on(&runner, subjectdb::StatementKind::Update, "post")?;
    assert_eq!(updates.len(), 1);
    assert_eq!(get(&post, "version"), Some(Value::Integer(2)));
    assert_eq!(*audit.seen.lock()?, vec!["before_update", "after_update"]);
    Ok(())
}

#[tokio::test]
async fn test_failing_before_hook_aborts_the_unit_of_work() -> Result<()> {
    let registry = registry();
    let runner = runner();
    let executor = executor_with(&runner, SubscriberBroadcaster::new().subscribe(Arc::new(Guard)));

    let category = EntityRef::new("Category").with("id", 1_i64);
    let fresh = EntityRef::new("Category").with("name", "Fresh");
    let result = executor
        .execute(vec![
            Subject::insert(registry.get("Category")?, fresh.clone()),
            Subject::remove(registry.get("Category")?, category, None),
        ])
        .await;

    match result {
        Err(DbError::ExecutionError(msg)) => assert!(msg.contains("Category")),
        other => panic!("Expected ExecutionError, got {:?}", other),
    }
    assert!(runner.rows("category")?.is_empty());
    assert_eq!(get(&fresh, "id"), None);
    Ok(())
}

#[tokio::test]
async fn test_disabled_listeners_are_not_called() -> Result<()> {
    let registry = registry();
    let runner = runner();
    let audit = Arc::new(PostAudit::default());
    let executor = executor_with(&runner, SubscriberBroadcaster::new().subscribe(audit.clone()))
        .with_config(ExecutorConfig::new().listeners(false));

    let post = EntityRef::new("Post").with("title", "Quiet");
    executor
        .execute(vec![Subject::insert(registry.get("Post")?, post.clone())])
        .await?;

    assert!(audit.seen.lock()?.is_empty());
    assert_eq!(runner.rows("post")?[0].get("text"), None);
    assert_eq!(get(&post, "text"), Some(Value::Null));
    Ok(())
}

#[tokio::test]
async fn test_subscriber_for_other_target_is_skipped() -> Result<()> {
    let registry = registry();
    let runner = runner();
    let audit = Arc::new(PostAudit::default());
    let executor = executor_with(&runner, SubscriberBroadcaster::new().subscribe(audit.clone()));

    executor
        .execute(vec![Subject::insert(
            registry.get("Tag")?,
            EntityRef::new("Tag").with("name", "rust"),
        )])
        .await?;

    assert!(audit.seen.lock()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_bounded_concurrency_with_interleaving_runner() -> Result<()> {
    let registry = registry();
    let runner = Arc::new(MemoryQueryRunner::new().with_yielding(true));
    let executor = executor_with(&runner, SubscriberBroadcaster::new())
        .with_config(ExecutorConfig::new().max_in_flight(2));

    let tags: Vec<EntityRef> = (0..8)
        .map(|i| EntityRef::new("Tag").with("name", format!("tag-{}", i)))
        .collect();
    let post = EntityRef::new("Post").with("title", "Tagged");

    let mut subjects = vec![
        Subject::insert(registry.get("Post")?, post.clone())
            .with_junction_insert("tags", tags.clone())?,
    ];
    for tag in &tags {
        subjects.push(Subject::insert(registry.get("Tag")?, tag.clone()));
    }
    executor.execute(subjects).await?;

    let ids: BTreeSet<i64> = tags
        .iter()
        .filter_map(|tag| get(tag, "id").and_then(|id| id.as_i64()))
        .collect();
    assert_eq!(ids, (1..=8).collect::<BTreeSet<i64>>());

    let linked: BTreeSet<i64> = runner
        .rows("post_tags")?
        .iter()
        .filter_map(|row| row.get("tag_id").and_then(Value::as_i64))
        .collect();
    assert_eq!(linked, ids);
    Ok(())
}
