mod common;

use common::{executor, get, kinds, registry, row, runner, statements_on};
use subjectdb::core::{DbError, Result, Value};
use subjectdb::{EntityRef, RelatedRef, Statement, StatementKind, Subject};

#[tokio::test]
async fn test_owner_side_link_writes_one_row() -> Result<()> {
    let registry = registry();
    let runner = runner();

    let post = EntityRef::new("Post").with("id", 1_i64).with("title", "Hello");
    let tag = EntityRef::new("Tag").with("id", 2_i64).with("name", "rust");

    let subject = Subject::new(registry.get("Post")?, Some(post), None)
        .with_junction_insert("tags", vec![tag])?;
    executor(&runner).execute(vec![subject]).await?;

    assert_eq!(
        runner.rows("post_tags")?,
        vec![row(&[("post_id", Value::Integer(1)), ("tag_id", Value::Integer(2))])]
    );
    assert_eq!(
        kinds(&runner)?,
        vec![StatementKind::Begin, StatementKind::Insert, StatementKind::Commit]
    );
    Ok(())
}

#[tokio::test]
async fn test_inverse_side_link_keeps_owner_column_order() -> Result<()> {
    let registry = registry();
    let runner = runner();

    let post = EntityRef::new("Post").with("id", 1_i64).with("title", "Hello");
    let tag = EntityRef::new("Tag").with("id", 2_i64).with("name", "rust");

    let subject = Subject::new(registry.get("Tag")?, Some(tag), None)
        .with_junction_insert("posts", vec![post])?;
    executor(&runner).execute(vec![subject]).await?;

    assert_eq!(
        runner.rows("post_tags")?,
        vec![row(&[("post_id", Value::Integer(1)), ("tag_id", Value::Integer(2))])]
    );
    Ok(())
}

#[tokio::test]
async fn test_link_between_entities_inserted_in_same_batch() -> Result<()> {
    let registry = registry();
    let runner = runner();

    let post = EntityRef::new("Post").with("title", "Hello");
    let rust = EntityRef::new("Tag").with("name", "rust");
    let orm = EntityRef::new("Tag").with("name", "orm");

    executor(&runner)
        .execute(vec![
            Subject::insert(registry.get("Post")?, post.clone())
                .with_junction_insert("tags", vec![rust.clone(), orm.clone()])?,
            Subject::insert(registry.get("Tag")?, rust.clone()),
            Subject::insert(registry.get("Tag")?, orm.clone()),
        ])
        .await?;

    let post_id = get(&post, "id").expect("post id generated");
    let mut links: Vec<(Option<Value>, Option<Value>)> = runner
        .rows("post_tags")?
        .into_iter()
        .map(|row| (row.get("post_id").cloned(), row.get("tag_id").cloned()))
        .collect();
    links.sort_by_key(|(_, tag)| tag.as_ref().and_then(Value::as_i64));

    let mut expected = vec![
        (Some(post_id.clone()), get(&rust, "id")),
        (Some(post_id), get(&orm, "id")),
    ];
    expected.sort_by_key(|(_, tag)| tag.as_ref().and_then(Value::as_i64));
    assert_eq!(links, expected);
    Ok(())
}

#[tokio::test]
async fn test_link_to_unpersisted_entity_fails_cascade_resolution() -> Result<()> {
    let registry = registry();
    let runner = runner();

    let post = EntityRef::new("Post").with("title", "Hello");
    let stray = EntityRef::new("Tag").with("name", "stray");

    let result = executor(&runner)
        .execute(vec![
            Subject::insert(registry.get("Post")?, post.clone())
                .with_junction_insert("tags", vec![stray])?,
        ])
        .await;

    match result {
        Err(DbError::CascadeResolution { target, relation }) => {
            assert_eq!(target, "Tag");
            assert_eq!(relation, "tags");
        }
        other => panic!("Expected CascadeResolution, got {:?}", other),
    }
    assert!(runner.rows("post")?.is_empty());
    assert!(runner.rows("post_tags")?.is_empty());
    assert_eq!(get(&post, "id"), None);
    Ok(())
}

#[tokio::test]
async fn test_unlink_by_entity_and_by_id() -> Result<()> {
    let registry = registry();
    let runner = runner();
    runner.seed(
        "post_tags",
        vec![
            row(&[("post_id", Value::Integer(1)), ("tag_id", Value::Integer(2))]),
            row(&[("post_id", Value::Integer(1)), ("tag_id", Value::Integer(3))]),
            row(&[("post_id", Value::Integer(1)), ("tag_id", Value::Integer(4))]),
        ],
    )?;

    let post = EntityRef::new("Post").with("id", 1_i64).with("title", "Hello");
    let tag = EntityRef::new("Tag").with("id", 2_i64);

    let subject = Subject::new(registry.get("Post")?, Some(post), None).with_junction_remove(
        "tags",
        vec![RelatedRef::Entity(tag), RelatedRef::Id(Value::Integer(3))],
    )?;
    executor(&runner).execute(vec![subject]).await?;

    assert_eq!(
        runner.rows("post_tags")?,
        vec![row(&[("post_id", Value::Integer(1)), ("tag_id", Value::Integer(4))])]
    );
    assert_eq!(statements_on(&runner, StatementKind::Delete, "post_tags")?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_removed_entity_unlinks_using_snapshot_id() -> Result<()> {
    let registry = registry();
    let runner = runner();
    runner.seed(
        "post",
        vec![row(&[("id", Value::Integer(9)), ("title", Value::from("Gone"))])],
    )?;
    runner.seed(
        "post_tags",
        vec![row(&[("post_id", Value::Integer(9)), ("tag_id", Value::Integer(2))])],
    )?;

    let snapshot = EntityRef::new("Post").with("id", 9_i64).with("title", "Gone");
    let subject = Subject::remove(registry.get("Post")?, snapshot, None)
        .with_junction_remove("tags", vec![RelatedRef::Id(Value::Integer(2))])?;
    executor(&runner).execute(vec![subject]).await?;

    assert!(runner.rows("post_tags")?.is_empty());
    assert!(runner.rows("post")?.is_empty());

    // Links go before the row they point at.
    let deletes: Vec<Statement> = runner
        .statements()?
        .into_iter()
        .filter(|statement| statement.kind() == StatementKind::Delete)
        .collect();
    assert_eq!(deletes[0].table(), Some("post_tags"));
    assert_eq!(deletes[1].table(), Some("post"));
    Ok(())
}
