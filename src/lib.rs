// ============================================================================
// SubjectDB Library
// ============================================================================

//! Unit-of-work persistence engine.
//!
//! Callers describe what changed as [`Subject`]s; the
//! [`SubjectOperationExecutor`] turns them into ordered insert, update and
//! delete statements (plus closure-table and junction-table maintenance)
//! against a [`QueryRunner`], inside one transaction.
//!
//! ```
//! use std::sync::Arc;
//! use subjectdb::{
//!     ColumnMetadata, ColumnType, DefaultDriver, EntityMetadata, EntityRef, Generation,
//!     MemoryQueryRunner, MetadataRegistry, NoopBroadcaster, PropertyPath, Subject,
//!     SubjectOperationExecutor, Value,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> subjectdb::Result<()> {
//! let registry = MetadataRegistry::builder()
//!     .entity(
//!         EntityMetadata::builder("Post", "post")
//!             .column(
//!                 ColumnMetadata::new("id", ColumnType::Integer)
//!                     .primary()
//!                     .generated(Generation::Increment),
//!             )
//!             .column(ColumnMetadata::new("title", ColumnType::Text)),
//!     )
//!     .build()?;
//!
//! let runner = Arc::new(MemoryQueryRunner::new());
//! let executor = SubjectOperationExecutor::new(
//!     runner.clone(),
//!     Arc::new(NoopBroadcaster),
//!     Arc::new(DefaultDriver),
//! );
//!
//! let post = EntityRef::new("Post").with("title", "Hello");
//! executor
//!     .execute(vec![Subject::insert(registry.get("Post")?, post.clone())])
//!     .await?;
//!
//! assert_eq!(post.value(&PropertyPath::new("id")), Some(Value::Integer(1)));
//! assert_eq!(runner.rows("post")?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod core;
pub mod driver;
pub mod entity;
pub mod executor;
pub mod metadata;
pub mod runner;
pub mod subject;

// Re-export main types for convenience
pub use broadcast::{
    Broadcaster, EntityEvent, EntitySubscriber, NoopBroadcaster, SubscriberBroadcaster,
};
pub use config::ExecutorConfig;
pub use core::{ColumnType, DbError, Result, Value, ValueMap};
pub use driver::{DefaultDriver, Driver};
pub use entity::{EntityRef, Property, PropertyPath};
pub use executor::{SubjectOperationExecutor, apply_generated_values};
pub use metadata::{
    Cascade, ColumnMetadata, ColumnMode, EmbeddedBuilder, EntityMetadata, EntityMetadataBuilder,
    Generation, Inheritance, MetadataRegistry, RelationKind, RelationMetadata,
};
pub use runner::{MemoryQueryRunner, QueryRunner, Statement, StatementKind};
pub use subject::{JunctionInsert, JunctionRemove, RelatedRef, RelationUpdate, Subject};
