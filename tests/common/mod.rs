#![allow(dead_code)]

use std::sync::Arc;
use subjectdb::core::Result;
use subjectdb::{
    ColumnMetadata, ColumnType, DefaultDriver, EmbeddedBuilder, EntityMetadata,
    EntityMetadataBuilder, EntityRef, Generation, MemoryQueryRunner, MetadataRegistry,
    NoopBroadcaster, PropertyPath, RelationMetadata, Statement, StatementKind,
    SubjectOperationExecutor, Value, ValueMap,
};

fn id_column() -> ColumnMetadata {
    ColumnMetadata::new("id", ColumnType::Integer)
        .primary()
        .generated(Generation::Increment)
}

fn category() -> EntityMetadataBuilder {
    EntityMetadata::builder("Category", "category")
        .column(id_column())
        .column(ColumnMetadata::new("name", ColumnType::Text))
        .relation(RelationMetadata::one_to_many("posts", "Post", "category"))
}

fn post() -> EntityMetadataBuilder {
    EntityMetadata::builder("Post", "post")
        .column(id_column())
        .column(ColumnMetadata::new("title", ColumnType::Text).not_null())
        .column(ColumnMetadata::new("text", ColumnType::Text))
        .column(ColumnMetadata::create_date("created_at"))
        .column(ColumnMetadata::update_date("updated_at"))
        .column(ColumnMetadata::version("version"))
        .embedded(
            EmbeddedBuilder::new("counters")
                .column(ColumnMetadata::new("likes_count", ColumnType::Integer).property("likes"))
                .column(ColumnMetadata::new("shares_count", ColumnType::Integer).property("shares")),
        )
        .relation(RelationMetadata::many_to_one("category", "Category").inverse("posts"))
        .relation(
            RelationMetadata::many_to_many_owner("tags", "Tag")
                .inverse("posts")
                .join_table("post_tags", "post_id", "tag_id"),
        )
        .relation(RelationMetadata::one_to_many("comments", "Comment", "post"))
}

fn tag() -> EntityMetadataBuilder {
    EntityMetadata::builder("Tag", "tag")
        .column(id_column())
        .column(ColumnMetadata::new("name", ColumnType::Text))
        .relation(RelationMetadata::many_to_many_inverse("posts", "Post", "tags"))
}

/// Comments cannot exist without their post.
fn comment() -> EntityMetadataBuilder {
    EntityMetadata::builder("Comment", "comment")
        .column(id_column())
        .column(ColumnMetadata::new("body", ColumnType::Text))
        .relation(
            RelationMetadata::many_to_one("post", "Post")
                .inverse("comments")
                .not_null(),
        )
}

fn content() -> EntityMetadataBuilder {
    EntityMetadata::builder("Content", "content")
        .column(id_column())
        .column(ColumnMetadata::new("title", ColumnType::Text))
        .column(ColumnMetadata::discriminator("type"))
        .column(ColumnMetadata::version("version"))
        .class_table_parent()
}

fn photo() -> EntityMetadataBuilder {
    EntityMetadata::builder("Photo", "photo")
        .column(ColumnMetadata::new("size", ColumnType::Integer))
        .child_of("Content")
}

fn node() -> EntityMetadataBuilder {
    EntityMetadata::builder("Node", "node")
        .column(id_column())
        .column(ColumnMetadata::new("name", ColumnType::Text))
        .column(ColumnMetadata::tree_level("level"))
        .relation(RelationMetadata::many_to_one("parent", "Node").inverse("children"))
        .relation(RelationMetadata::one_to_many("children", "Node", "parent"))
        .closure_table("node_closure", "parent", Some("children"))
}

fn user() -> EntityMetadataBuilder {
    EntityMetadata::builder("User", "user")
        .column(id_column())
        .column(ColumnMetadata::new("name", ColumnType::Text))
        .relation(RelationMetadata::one_to_one_inverse("profile", "Profile", "user"))
}

/// Owns the one-to-one link through `profile.user_id`.
fn profile() -> EntityMetadataBuilder {
    EntityMetadata::builder("Profile", "profile")
        .column(id_column())
        .column(ColumnMetadata::new("bio", ColumnType::Text))
        .relation(RelationMetadata::one_to_one_owner("user", "User").inverse("profile"))
}

fn document() -> EntityMetadataBuilder {
    EntityMetadata::builder("Document", "document")
        .column(ColumnMetadata::object_id("_id"))
        .column(ColumnMetadata::new("body", ColumnType::Text))
}

pub fn registry() -> MetadataRegistry {
    MetadataRegistry::builder()
        .entity(category())
        .entity(post())
        .entity(tag())
        .entity(comment())
        .entity(content())
        .entity(photo())
        .entity(node())
        .entity(user())
        .entity(profile())
        .entity(document())
        .build()
        .expect("fixture metadata is valid")
}

pub fn runner() -> Arc<MemoryQueryRunner> {
    Arc::new(MemoryQueryRunner::new())
}

pub fn executor(runner: &Arc<MemoryQueryRunner>) -> SubjectOperationExecutor {
    SubjectOperationExecutor::new(
        runner.clone(),
        Arc::new(NoopBroadcaster),
        Arc::new(DefaultDriver),
    )
}

pub fn row(pairs: &[(&str, Value)]) -> ValueMap {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

pub fn get(entity: &EntityRef, path: &str) -> Option<Value> {
    entity.value(&PropertyPath::parse(path))
}

pub fn kinds(runner: &MemoryQueryRunner) -> Result<Vec<StatementKind>> {
    Ok(runner.statements()?.iter().map(Statement::kind).collect())
}

/// Statements of `kind` that touched `table`, in issue order.
pub fn statements_on(
    runner: &MemoryQueryRunner,
    kind: StatementKind,
    table: &str,
) -> Result<Vec<Statement>> {
    Ok(runner
        .statements()?
        .into_iter()
        .filter(|statement| statement.kind() == kind && statement.table() == Some(table))
        .collect())
}

/// Position of the first statement of `kind` on `table`.
pub fn position_of(runner: &MemoryQueryRunner, kind: StatementKind, table: &str) -> Result<usize> {
    runner
        .statements()?
        .iter()
        .position(|statement| statement.kind() == kind && statement.table() == Some(table))
        .ok_or_else(|| {
            subjectdb::DbError::Internal(format!("no {:?} statement on '{}'", kind, table))
        })
}
